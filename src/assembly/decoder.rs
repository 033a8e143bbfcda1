//! JVM bytecode decoding.
//!
//! Turns the code array of a `Code` attribute into a list of instructions with their
//! offsets. Relative branch offsets are resolved to absolute offsets, `wide` prefixes are
//! folded into the operand of the instruction they modify, and switch padding is skipped.
//!
//! # Key Components
//!
//! - [`crate::assembly::decoder::decode_instruction`] - Decode one instruction
//! - [`crate::assembly::decoder::decode_stream`] - Decode a whole code array
//!
//! # Usage Examples
//!
//! ```rust
//! use classweave::assembly::{decode_stream, opcodes, Operand};
//!
//! // iconst_0; ifeq +3 (-> offset 4); return
//! let code = [0x03, 0x99, 0x00, 0x03, 0xB1];
//! let instructions = decode_stream(&code)?;
//!
//! assert_eq!(instructions.len(), 3);
//! assert_eq!(instructions[1].0, 1);
//! assert_eq!(instructions[1].1.operand, Operand::Branch(4));
//! assert_eq!(instructions[2].1.opcode, opcodes::RETURN);
//! # Ok::<(), classweave::Error>(())
//! ```

use crate::{
    assembly::{
        instruction::{opcode_info, Instruction, Operand, OperandType},
        opcodes,
    },
    file::parser::Parser,
    Error, Result,
};

/// Decodes the whole code array.
///
/// Returns each instruction together with its offset, in code order.
///
/// # Errors
///
/// Returns [`crate::Error::InvalidOpcode`] on reserved opcodes, [`crate::Error::Malformed`]
/// on invalid `wide` usage, switch tables or branch targets outside the code array, and
/// [`crate::Error::OutOfBounds`] on truncated operands.
pub fn decode_stream(code: &[u8]) -> Result<Vec<(u16, Instruction<u16>)>> {
    if code.len() > usize::from(u16::MAX) {
        return Err(malformed_error!("Code array of {} bytes", code.len()));
    }

    let mut parser = Parser::new(code);
    let mut instructions = Vec::with_capacity(code.len() / 2);

    while parser.has_more_data() {
        #[allow(clippy::cast_possible_truncation)]
        let offset = parser.pos() as u16;
        let instruction = decode_instruction(&mut parser)?;
        instructions.push((offset, instruction));
    }

    Ok(instructions)
}

/// Decodes the instruction at the parser's position.
///
/// The parser must span exactly the code array: switch padding is measured from its start
/// and branch targets are checked against its length.
///
/// # Errors
///
/// See [`decode_stream`].
pub fn decode_instruction(parser: &mut Parser<'_>) -> Result<Instruction<u16>> {
    let offset = parser.pos();
    let opcode = parser.read_be::<u8>()?;

    if opcode == opcodes::WIDE {
        return decode_wide(parser, offset);
    }

    let info = opcode_info(opcode).ok_or(Error::InvalidOpcode(opcode))?;
    let code_len = parser.len() as i64;
    let target = |relative: i32| -> Result<u16> {
        let absolute = offset as i64 + i64::from(relative);
        if absolute < 0 || absolute >= code_len {
            return Err(malformed_error!(
                "Branch at {} targets {} outside the code array",
                offset,
                absolute
            ));
        }
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        Ok(absolute as u16)
    };

    let operand = match info.operand {
        OperandType::None => Operand::None,
        OperandType::Byte => Operand::Byte(parser.read_be::<i8>()?),
        OperandType::Short => Operand::Short(parser.read_be::<i16>()?),
        OperandType::Local => Operand::Local(u16::from(parser.read_be::<u8>()?)),
        OperandType::Constant8 => Operand::Constant(u16::from(parser.read_be::<u8>()?)),
        OperandType::Constant16 => Operand::Constant(parser.read_be::<u16>()?),
        OperandType::Iinc => Operand::Iinc {
            index: u16::from(parser.read_be::<u8>()?),
            delta: i16::from(parser.read_be::<i8>()?),
        },
        OperandType::Branch16 => {
            let relative = i32::from(parser.read_be::<i16>()?);
            Operand::Branch(target(relative)?)
        }
        OperandType::Branch32 => {
            let relative = parser.read_be::<i32>()?;
            Operand::Branch(target(relative)?)
        }
        OperandType::TableSwitch => {
            parser.align(4)?;
            let default = target(parser.read_be::<i32>()?)?;
            let low = parser.read_be::<i32>()?;
            let high = parser.read_be::<i32>()?;
            if low > high {
                return Err(malformed_error!(
                    "tableswitch at {} has low {} above high {}",
                    offset,
                    low,
                    high
                ));
            }

            let count = i64::from(high) - i64::from(low) + 1;
            if count * 4 > parser.remaining() as i64 {
                return Err(Error::OutOfBounds);
            }

            let mut targets = Vec::with_capacity(count as usize);
            for _ in 0..count {
                targets.push(target(parser.read_be::<i32>()?)?);
            }

            Operand::TableSwitch {
                default,
                low,
                high,
                targets,
            }
        }
        OperandType::LookupSwitch => {
            parser.align(4)?;
            let default = target(parser.read_be::<i32>()?)?;
            let npairs = parser.read_be::<i32>()?;
            if npairs < 0 || i64::from(npairs) * 8 > parser.remaining() as i64 {
                return Err(malformed_error!(
                    "lookupswitch at {} has invalid pair count {}",
                    offset,
                    npairs
                ));
            }

            let mut pairs: Vec<(i32, u16)> = Vec::with_capacity(npairs as usize);
            for _ in 0..npairs {
                let key = parser.read_be::<i32>()?;
                if pairs.last().is_some_and(|(previous, _)| *previous >= key) {
                    return Err(malformed_error!(
                        "lookupswitch at {} has unsorted keys",
                        offset
                    ));
                }
                pairs.push((key, target(parser.read_be::<i32>()?)?));
            }

            Operand::LookupSwitch { default, pairs }
        }
        OperandType::InvokeInterface => {
            let index = parser.read_be::<u16>()?;
            let count = parser.read_be::<u8>()?;
            parser.read_be::<u8>()?;
            Operand::InvokeInterface { index, count }
        }
        OperandType::InvokeDynamic => {
            let index = parser.read_be::<u16>()?;
            parser.read_be::<u16>()?;
            Operand::InvokeDynamic(index)
        }
        OperandType::ArrayType => Operand::ArrayType(parser.read_be::<u8>()?),
        OperandType::MultiANewArray => Operand::MultiANewArray {
            index: parser.read_be::<u16>()?,
            dimensions: parser.read_be::<u8>()?,
        },
    };

    Ok(Instruction { opcode, operand })
}

fn decode_wide(parser: &mut Parser<'_>, offset: usize) -> Result<Instruction<u16>> {
    let opcode = parser.read_be::<u8>()?;
    let operand = match opcode {
        opcodes::ILOAD..=opcodes::ALOAD | opcodes::ISTORE..=opcodes::ASTORE | opcodes::RET => {
            Operand::Local(parser.read_be::<u16>()?)
        }
        opcodes::IINC => Operand::Iinc {
            index: parser.read_be::<u16>()?,
            delta: parser.read_be::<i16>()?,
        },
        _ => {
            return Err(malformed_error!(
                "wide at {} modifies opcode 0x{:02X}",
                offset,
                opcode
            ))
        }
    };

    Ok(Instruction { opcode, operand })
}
