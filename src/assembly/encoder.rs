//! JVM bytecode encoding with label resolution.
//!
//! The encoder is the reverse counterpart of [`crate::assembly::decoder`]. Instructions are
//! emitted with symbolic [`crate::assembly::Label`] targets, and labels are placed between
//! them. [`crate::assembly::encoder::InstructionEncoder::finalize`] lays the code out and
//! resolves every target to a relative offset.
//!
//! Layout is iterative because instruction sizes depend on offsets:
//!
//! - `tableswitch` and `lookupswitch` pad their operands to a 4-byte boundary
//! - `goto` and `jsr` whose target lies beyond the `i16` range become `goto_w` and `jsr_w`,
//!   which shifts every following instruction
//!
//! Widening only ever grows the code, so the layout converges. Conditional branches have no
//! wide form; one whose target is out of range fails with [`crate::Error::InvalidBranch`].
//!
//! Operand-driven promotions need no iteration: `ldc` with a constant pool index above 255
//! is written as `ldc_w`, and local variable accesses (and `iinc`) that do not fit one byte
//! get a `wide` prefix.
//!
//! # Usage Examples
//!
//! ```rust
//! use classweave::assembly::{opcodes, Instruction, InstructionEncoder, Label, Operand};
//!
//! let mut encoder = InstructionEncoder::new();
//! let done = Label(0);
//!
//! encoder.emit(Instruction::simple(opcodes::ICONST_0))?;
//! encoder.emit(Instruction::new(opcodes::IFEQ, Operand::Branch(done)))?;
//! encoder.emit(Instruction::simple(opcodes::NOP))?;
//! encoder.define_label(done)?;
//! encoder.emit(Instruction::simple(opcodes::RETURN))?;
//!
//! let encoded = encoder.finalize()?;
//! assert_eq!(encoded.code, vec![0x03, 0x99, 0x00, 0x04, 0x00, 0xB1]);
//! assert_eq!(encoded.labels[&done], 5);
//! # Ok::<(), classweave::Error>(())
//! ```

use std::collections::{HashMap, HashSet};

use crate::{
    assembly::{
        instruction::{opcode_info, Instruction, Label, Operand, OperandType},
        opcodes,
    },
    file::io::write_be,
    Error, Result,
};

/// Result of [`InstructionEncoder::finalize`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedCode {
    /// The code array
    pub code: Vec<u8>,
    /// Offset of every placed label; labels after the last instruction map to the code length
    pub labels: HashMap<Label, u16>,
}

enum Item {
    Label(Label),
    Instruction(Instruction<Label>),
}

/// Label-resolving JVM instruction encoder.
///
/// # Thread Safety
///
/// [`InstructionEncoder`] holds mutable emission state. Create one per method body.
#[derive(Default)]
pub struct InstructionEncoder {
    items: Vec<Item>,
    defined: HashSet<Label>,
}

impl InstructionEncoder {
    /// Creates an empty encoder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Places `label` at the current position.
    ///
    /// # Errors
    /// Returns [`crate::Error::DuplicateLabel`] if `label` was already placed.
    pub fn define_label(&mut self, label: Label) -> Result<()> {
        if !self.defined.insert(label) {
            return Err(Error::DuplicateLabel(label.0));
        }

        self.items.push(Item::Label(label));
        Ok(())
    }

    /// Appends `instruction`.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidOpcode`] for reserved opcodes and `wide` (which is
    /// implied by the operand), [`crate::Error::Malformed`] if the operand does not match the
    /// opcode's layout.
    pub fn emit(&mut self, instruction: Instruction<Label>) -> Result<()> {
        let info = opcode_info(instruction.opcode).ok_or(Error::InvalidOpcode(instruction.opcode))?;

        let fits = match (info.operand, &instruction.operand) {
            (OperandType::None, Operand::None)
            | (OperandType::Byte, Operand::Byte(_))
            | (OperandType::Short, Operand::Short(_))
            | (OperandType::Local, Operand::Local(_))
            | (OperandType::Constant8 | OperandType::Constant16, Operand::Constant(_))
            | (OperandType::Iinc, Operand::Iinc { .. })
            | (OperandType::Branch16 | OperandType::Branch32, Operand::Branch(_))
            | (OperandType::LookupSwitch, Operand::LookupSwitch { .. })
            | (OperandType::InvokeInterface, Operand::InvokeInterface { .. })
            | (OperandType::InvokeDynamic, Operand::InvokeDynamic(_))
            | (OperandType::ArrayType, Operand::ArrayType(_))
            | (OperandType::MultiANewArray, Operand::MultiANewArray { .. }) => true,
            (
                OperandType::TableSwitch,
                Operand::TableSwitch {
                    low, high, targets, ..
                },
            ) => low <= high && i64::from(*high) - i64::from(*low) + 1 == targets.len() as i64,
            _ => false,
        };

        if !fits {
            return Err(malformed_error!(
                "Operand {:?} does not fit '{}'",
                instruction.operand,
                info.mnemonic
            ));
        }

        self.items.push(Item::Instruction(instruction));
        Ok(())
    }

    /// Lays out the code and resolves every label.
    ///
    /// # Errors
    /// Returns [`crate::Error::UndefinedLabel`] for targets that were never placed,
    /// [`crate::Error::InvalidBranch`] for conditional branches out of `i16` range and
    /// [`crate::Error::Malformed`] if the code exceeds 65535 bytes.
    pub fn finalize(self) -> Result<EncodedCode> {
        let mut widened = HashSet::new();
        let (positions, labels) = loop {
            let (positions, labels) = self.layout(&widened)?;

            let mut changed = false;
            for (index, item) in self.items.iter().enumerate() {
                let Item::Instruction(instruction) = item else {
                    continue;
                };
                let Operand::Branch(target) = &instruction.operand else {
                    continue;
                };
                if instruction.opcode == opcodes::GOTO_W
                    || instruction.opcode == opcodes::JSR_W
                    || widened.contains(&index)
                {
                    continue;
                }

                let relative = relative_offset(&labels, *target, positions[index])?;
                if i16::try_from(relative).is_err() {
                    if instruction.opcode == opcodes::GOTO || instruction.opcode == opcodes::JSR {
                        widened.insert(index);
                        changed = true;
                    } else {
                        return Err(Error::InvalidBranch(format!(
                            "'{}' at {} cannot reach {} ({} bytes away)",
                            instruction.mnemonic(),
                            positions[index],
                            target,
                            relative
                        )));
                    }
                }
            }

            if !changed {
                break (positions, labels);
            }
        };

        let mut code = Vec::new();
        for (index, item) in self.items.iter().enumerate() {
            if let Item::Instruction(instruction) = item {
                debug_assert_eq!(code.len(), positions[index]);
                write_instruction(
                    &mut code,
                    instruction,
                    positions[index],
                    widened.contains(&index),
                    &labels,
                )?;
            }
        }

        #[allow(clippy::cast_possible_truncation)]
        let labels = labels
            .into_iter()
            .map(|(label, offset)| (label, offset as u16))
            .collect();

        Ok(EncodedCode { code, labels })
    }

    /// Computes the position of every item and label for the given set of widened jumps.
    fn layout(&self, widened: &HashSet<usize>) -> Result<(Vec<usize>, HashMap<Label, usize>)> {
        let mut positions = Vec::with_capacity(self.items.len());
        let mut labels = HashMap::with_capacity(self.defined.len());
        let mut position = 0_usize;

        for (index, item) in self.items.iter().enumerate() {
            positions.push(position);
            match item {
                Item::Label(label) => {
                    labels.insert(*label, position);
                }
                Item::Instruction(instruction) => {
                    position += encoded_size(instruction, position, widened.contains(&index));
                }
            }
        }

        if position > usize::from(u16::MAX) {
            return Err(malformed_error!(
                "Method code of {} bytes exceeds the 65535 byte limit",
                position
            ));
        }

        Ok((positions, labels))
    }
}

fn relative_offset(labels: &HashMap<Label, usize>, target: Label, from: usize) -> Result<i64> {
    let to = labels.get(&target).ok_or(Error::UndefinedLabel(target.0))?;
    Ok(*to as i64 - from as i64)
}

fn switch_padding(position: usize) -> usize {
    (4 - (position + 1) % 4) % 4
}

fn needs_wide(index: u16) -> bool {
    index > u16::from(u8::MAX)
}

/// Size in bytes of `instruction` when placed at `position`.
fn encoded_size(instruction: &Instruction<Label>, position: usize, widened: bool) -> usize {
    match &instruction.operand {
        Operand::None => 1,
        Operand::Byte(_) | Operand::ArrayType(_) => 2,
        Operand::Short(_) => 3,
        Operand::Local(index) => {
            if needs_wide(*index) {
                4
            } else {
                2
            }
        }
        Operand::Constant(index) => {
            if instruction.opcode == opcodes::LDC && !needs_wide(*index) {
                2
            } else {
                3
            }
        }
        Operand::Iinc { index, delta } => {
            if needs_wide(*index) || i8::try_from(*delta).is_err() {
                6
            } else {
                3
            }
        }
        Operand::Branch(_) => {
            if widened || instruction.opcode == opcodes::GOTO_W || instruction.opcode == opcodes::JSR_W
            {
                5
            } else {
                3
            }
        }
        Operand::TableSwitch { targets, .. } => 1 + switch_padding(position) + 12 + 4 * targets.len(),
        Operand::LookupSwitch { pairs, .. } => 1 + switch_padding(position) + 8 + 8 * pairs.len(),
        Operand::InvokeInterface { .. } | Operand::InvokeDynamic(_) => 5,
        Operand::MultiANewArray { .. } => 4,
    }
}

fn write_instruction(
    code: &mut Vec<u8>,
    instruction: &Instruction<Label>,
    position: usize,
    widened: bool,
    labels: &HashMap<Label, usize>,
) -> Result<()> {
    let branch = |target: &Label| -> Result<i32> {
        let relative = relative_offset(labels, *target, position)?;
        i32::try_from(relative)
            .map_err(|_| Error::InvalidBranch(format!("offset {} out of range", relative)))
    };

    match &instruction.operand {
        Operand::None => code.push(instruction.opcode),
        Operand::Byte(value) => {
            code.push(instruction.opcode);
            write_be(code, *value);
        }
        Operand::Short(value) => {
            code.push(instruction.opcode);
            write_be(code, *value);
        }
        Operand::Local(index) => {
            if needs_wide(*index) {
                code.push(opcodes::WIDE);
                code.push(instruction.opcode);
                write_be(code, *index);
            } else {
                code.push(instruction.opcode);
                #[allow(clippy::cast_possible_truncation)]
                code.push(*index as u8);
            }
        }
        Operand::Constant(index) => {
            if instruction.opcode == opcodes::LDC {
                if needs_wide(*index) {
                    code.push(opcodes::LDC_W);
                    write_be(code, *index);
                } else {
                    code.push(opcodes::LDC);
                    #[allow(clippy::cast_possible_truncation)]
                    code.push(*index as u8);
                }
            } else {
                code.push(instruction.opcode);
                write_be(code, *index);
            }
        }
        Operand::Iinc { index, delta } => match i8::try_from(*delta) {
            Ok(small) if !needs_wide(*index) => {
                code.push(opcodes::IINC);
                #[allow(clippy::cast_possible_truncation)]
                code.push(*index as u8);
                write_be(code, small);
            }
            _ => {
                code.push(opcodes::WIDE);
                code.push(opcodes::IINC);
                write_be(code, *index);
                write_be(code, *delta);
            }
        },
        Operand::Branch(target) => {
            let relative = branch(target)?;
            let long_form = widened
                || instruction.opcode == opcodes::GOTO_W
                || instruction.opcode == opcodes::JSR_W;
            if long_form {
                code.push(match instruction.opcode {
                    opcodes::GOTO => opcodes::GOTO_W,
                    opcodes::JSR => opcodes::JSR_W,
                    other => other,
                });
                write_be(code, relative);
            } else {
                let relative = i16::try_from(relative).map_err(|_| {
                    Error::InvalidBranch(format!(
                        "'{}' at {} cannot reach {}",
                        instruction.mnemonic(),
                        position,
                        target
                    ))
                })?;
                code.push(instruction.opcode);
                write_be(code, relative);
            }
        }
        Operand::TableSwitch {
            default,
            low,
            high,
            targets,
        } => {
            code.push(instruction.opcode);
            code.resize(code.len() + switch_padding(position), 0);
            write_be(code, branch(default)?);
            write_be(code, *low);
            write_be(code, *high);
            for target in targets {
                write_be(code, branch(target)?);
            }
        }
        Operand::LookupSwitch { default, pairs } => {
            code.push(instruction.opcode);
            code.resize(code.len() + switch_padding(position), 0);
            write_be(code, branch(default)?);
            let npairs = i32::try_from(pairs.len())
                .map_err(|_| malformed_error!("lookupswitch with {} pairs", pairs.len()))?;
            write_be(code, npairs);
            for (key, target) in pairs {
                write_be(code, *key);
                write_be(code, branch(target)?);
            }
        }
        Operand::InvokeInterface { index, count } => {
            code.push(instruction.opcode);
            write_be(code, *index);
            code.push(*count);
            code.push(0);
        }
        Operand::InvokeDynamic(index) => {
            code.push(instruction.opcode);
            write_be(code, *index);
            write_be(code, 0_u16);
        }
        Operand::ArrayType(atype) => {
            code.push(instruction.opcode);
            code.push(*atype);
        }
        Operand::MultiANewArray { index, dimensions } => {
            code.push(instruction.opcode);
            write_be(code, *index);
            code.push(*dimensions);
        }
    }

    Ok(())
}
