//! Label-based method body representation.
//!
//! [`crate::method::MethodBody`] is the editable form of a `Code` attribute. Every offset the
//! attribute carries (branch targets, handler ranges, stack map frames, line numbers, local
//! variable ranges and the `new` offsets of uninitialized types) becomes a
//! [`crate::assembly::Label`] placed in the node list. Instructions can therefore be inserted
//! anywhere without invalidating any reference, and [`crate::method::MethodBody::to_code`]
//! recomputes every offset when the body is encoded again.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::{
    assembly::{decode_stream, Instruction, InstructionEncoder, Label},
    classfile::{
        attributes::{
            line_numbers_to_bytes, local_variables_to_bytes, names, parse_line_numbers,
            parse_local_variables, AttributeInfo, CodeAttribute, ExceptionTableEntry,
            LineNumberEntry, LocalVariableEntry,
        },
        constpool::ConstantPool,
        stackmap::{parse_stack_map, stack_map_to_bytes, StackMapFrame},
    },
    method::handlers::{partial_overlaps, HandlerRegion},
    Error, Result,
};

/// One element of a method body: a position marker or an instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    /// Marks the position of the following instruction
    Label(Label),
    /// An instruction whose branch targets are labels
    Instruction(Instruction<Label>),
}

/// A `LineNumberTable` entry bound to a label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineNumber {
    /// First instruction of the line
    pub start: Label,
    /// Source line
    pub line: u16,
}

/// A `LocalVariableTable` / `LocalVariableTypeTable` entry bound to labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalVariable {
    /// Start of the live range
    pub start: Label,
    /// End of the live range (exclusive)
    pub end: Label,
    /// Index of the variable name
    pub name_index: u16,
    /// Index of the descriptor (or signature, in the type table)
    pub descriptor_index: u16,
    /// Local variable slot
    pub index: u16,
}

/// An editable method body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodBody {
    /// Maximum operand stack depth
    pub max_stack: u16,
    /// Number of local variable slots
    pub max_locals: u16,
    /// Labels and instructions in code order
    pub nodes: Vec<Node>,
    /// Handler regions in exception-table order
    pub handlers: Vec<HandlerRegion>,
    /// Stack map frames, `None` if the method has no `StackMapTable`
    pub frames: Option<Vec<StackMapFrame<Label>>>,
    /// Line number table
    pub line_numbers: Vec<LineNumber>,
    /// Local variable table
    pub local_variables: Vec<LocalVariable>,
    /// Local variable type table
    pub local_variable_types: Vec<LocalVariable>,
    /// Code attributes kept verbatim
    pub other_attributes: Vec<AttributeInfo>,
    next_label: u32,
}

/// Maps offsets of the original code array to labels.
struct LabelMap {
    boundaries: BTreeSet<u16>,
    code_len: u16,
    labels: BTreeMap<u16, Label>,
}

impl LabelMap {
    /// Label for an instruction boundary.
    fn at(&mut self, offset: u16, what: &str) -> Result<Label> {
        if !self.boundaries.contains(&offset) {
            return Err(malformed_error!(
                "{} at offset {} is not an instruction boundary",
                what,
                offset
            ));
        }
        Ok(self.get_or_insert(offset))
    }

    /// Label for an instruction boundary or the end of the code.
    fn at_or_end(&mut self, offset: u16, what: &str) -> Result<Label> {
        if offset == self.code_len {
            return Ok(self.get_or_insert(offset));
        }
        self.at(offset, what)
    }

    fn get_or_insert(&mut self, offset: u16) -> Label {
        #[allow(clippy::cast_possible_truncation)]
        let next = Label(self.labels.len() as u32);
        *self.labels.entry(offset).or_insert(next)
    }
}

impl MethodBody {
    /// Builds the editable form of a `Code` attribute.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the code array is empty, an offset does not
    /// fall on an instruction boundary, a handler range is empty or the method has more
    /// than one `StackMapTable`. Decoding errors are propagated.
    pub fn from_code(code: &CodeAttribute, pool: &ConstantPool) -> Result<Self> {
        if code.code.is_empty() {
            return Err(malformed_error!("Method has an empty code array"));
        }

        let instructions = decode_stream(&code.code)?;
        #[allow(clippy::cast_possible_truncation)]
        let mut map = LabelMap {
            boundaries: instructions.iter().map(|(offset, _)| *offset).collect(),
            code_len: code.code.len() as u16,
            labels: BTreeMap::new(),
        };

        let mut mapped = Vec::with_capacity(instructions.len());
        for (offset, instruction) in &instructions {
            let instruction = instruction.map_targets(|target| map.at(*target, "Branch target"))?;
            mapped.push((*offset, instruction));
        }

        let mut handlers = Vec::with_capacity(code.exception_table.len());
        for entry in &code.exception_table {
            if entry.start_pc >= entry.end_pc {
                return Err(malformed_error!(
                    "Empty handler range [{}, {})",
                    entry.start_pc,
                    entry.end_pc
                ));
            }
            handlers.push(HandlerRegion {
                start: map.at(entry.start_pc, "Handler range start")?,
                end: map.at_or_end(entry.end_pc, "Handler range end")?,
                handler: map.at(entry.handler_pc, "Handler")?,
                catch_type: (entry.catch_type != 0).then_some(entry.catch_type),
            });
        }

        let ranges: Vec<(u16, u16)> = code
            .exception_table
            .iter()
            .map(|entry| (entry.start_pc, entry.end_pc))
            .collect();
        for (a, b) in partial_overlaps(&ranges) {
            log::debug!(
                "Handler ranges [{}, {}) and [{}, {}) partially overlap",
                ranges[a].0,
                ranges[a].1,
                ranges[b].0,
                ranges[b].1
            );
        }

        let mut frames = None;
        let mut line_numbers = Vec::new();
        let mut local_variables = Vec::new();
        let mut local_variable_types = Vec::new();
        let mut other_attributes = Vec::new();

        for attribute in &code.attributes {
            if attribute.is(pool, names::STACK_MAP_TABLE) {
                if frames.is_some() {
                    return Err(malformed_error!("Method has more than one StackMapTable"));
                }
                let mut converted = Vec::new();
                for frame in parse_stack_map(&attribute.info)? {
                    converted.push(frame.map_positions(&mut |offset: &u16| {
                        map.at(*offset, "Stack map frame")
                    })?);
                }
                frames = Some(converted);
            } else if attribute.is(pool, names::LINE_NUMBER_TABLE) {
                for entry in parse_line_numbers(&attribute.info)? {
                    line_numbers.push(LineNumber {
                        start: map.at(entry.start_pc, "Line number")?,
                        line: entry.line_number,
                    });
                }
            } else if attribute.is(pool, names::LOCAL_VARIABLE_TABLE) {
                for entry in parse_local_variables(&attribute.info)? {
                    local_variables.push(Self::local_variable(&mut map, &entry)?);
                }
            } else if attribute.is(pool, names::LOCAL_VARIABLE_TYPE_TABLE) {
                for entry in parse_local_variables(&attribute.info)? {
                    local_variable_types.push(Self::local_variable(&mut map, &entry)?);
                }
            } else {
                other_attributes.push(attribute.clone());
            }
        }

        let mut nodes = Vec::with_capacity(mapped.len() + map.labels.len());
        for (offset, instruction) in mapped {
            if let Some(label) = map.labels.get(&offset) {
                nodes.push(Node::Label(*label));
            }
            nodes.push(Node::Instruction(instruction));
        }
        if let Some(label) = map.labels.get(&map.code_len) {
            nodes.push(Node::Label(*label));
        }

        #[allow(clippy::cast_possible_truncation)]
        let next_label = map.labels.len() as u32;

        Ok(MethodBody {
            max_stack: code.max_stack,
            max_locals: code.max_locals,
            nodes,
            handlers,
            frames,
            line_numbers,
            local_variables,
            local_variable_types,
            other_attributes,
            next_label,
        })
    }

    fn local_variable(map: &mut LabelMap, entry: &LocalVariableEntry) -> Result<LocalVariable> {
        let end = u32::from(entry.start_pc) + u32::from(entry.length);
        let end = u16::try_from(end)
            .map_err(|_| malformed_error!("Local variable range ends at {}", end))?;

        Ok(LocalVariable {
            start: map.at_or_end(entry.start_pc, "Local variable start")?,
            end: map.at_or_end(end, "Local variable end")?,
            name_index: entry.name_index,
            descriptor_index: entry.descriptor_index,
            index: entry.index,
        })
    }

    /// Returns a label that is not used anywhere in this body.
    pub fn new_label(&mut self) -> Label {
        let label = Label(self.next_label);
        self.next_label += 1;
        label
    }

    /// Iterates over the instructions, skipping labels.
    pub fn instructions(&self) -> impl Iterator<Item = &Instruction<Label>> {
        self.nodes.iter().filter_map(|node| match node {
            Node::Instruction(instruction) => Some(instruction),
            Node::Label(_) => None,
        })
    }

    /// Number of return instructions in the body.
    #[must_use]
    pub fn return_count(&self) -> usize {
        self.instructions().filter(|i| i.is_return()).count()
    }

    /// Encodes the body back into a `Code` attribute.
    ///
    /// Names of the debug and stack map attributes are added to `pool` if missing.
    ///
    /// # Errors
    /// Returns [`crate::Error::UndefinedLabel`] or [`crate::Error::DuplicateLabel`] if the
    /// label invariant is broken, [`crate::Error::Malformed`] if a handler range or local
    /// variable range ends before it starts, and encoding errors from
    /// [`crate::assembly::InstructionEncoder`].
    pub fn to_code(&self, pool: &mut ConstantPool) -> Result<CodeAttribute> {
        let mut encoder = InstructionEncoder::new();
        for node in &self.nodes {
            match node {
                Node::Label(label) => encoder.define_label(*label)?,
                Node::Instruction(instruction) => encoder.emit(instruction.clone())?,
            }
        }

        let encoded = encoder.finalize()?;
        let offset = |label: &Label| -> Result<u16> {
            encoded
                .labels
                .get(label)
                .copied()
                .ok_or(Error::UndefinedLabel(label.0))
        };

        let mut exception_table = Vec::with_capacity(self.handlers.len());
        for region in &self.handlers {
            let start_pc = offset(&region.start)?;
            let end_pc = offset(&region.end)?;
            if start_pc >= end_pc {
                return Err(malformed_error!(
                    "Handler region {} encodes to empty range [{}, {})",
                    region,
                    start_pc,
                    end_pc
                ));
            }
            exception_table.push(ExceptionTableEntry {
                start_pc,
                end_pc,
                handler_pc: offset(&region.handler)?,
                catch_type: region.catch_type.unwrap_or(0),
            });
        }

        let mut attributes = Vec::new();

        if !self.line_numbers.is_empty() {
            let mut entries = Vec::with_capacity(self.line_numbers.len());
            for line in &self.line_numbers {
                entries.push(LineNumberEntry {
                    start_pc: offset(&line.start)?,
                    line_number: line.line,
                });
            }
            attributes.push(AttributeInfo {
                name_index: pool.add_utf8(names::LINE_NUMBER_TABLE)?,
                info: line_numbers_to_bytes(&entries)?,
            });
        }

        for (table, name) in [
            (&self.local_variables, names::LOCAL_VARIABLE_TABLE),
            (&self.local_variable_types, names::LOCAL_VARIABLE_TYPE_TABLE),
        ] {
            if table.is_empty() {
                continue;
            }

            let mut entries = Vec::with_capacity(table.len());
            for variable in table {
                let start_pc = offset(&variable.start)?;
                let end_pc = offset(&variable.end)?;
                let length = end_pc.checked_sub(start_pc).ok_or_else(|| {
                    malformed_error!(
                        "Local variable range {}..{} ends before it starts",
                        variable.start,
                        variable.end
                    )
                })?;
                entries.push(LocalVariableEntry {
                    start_pc,
                    length,
                    name_index: variable.name_index,
                    descriptor_index: variable.descriptor_index,
                    index: variable.index,
                });
            }
            attributes.push(AttributeInfo {
                name_index: pool.add_utf8(name)?,
                info: local_variables_to_bytes(&entries)?,
            });
        }

        if let Some(frames) = &self.frames {
            let mut encoded_frames = Vec::with_capacity(frames.len());
            for frame in frames {
                encoded_frames.push(frame.map_positions(&mut |label: &Label| offset(label))?);
            }
            encoded_frames.sort_by_key(|frame| frame.position);
            attributes.push(AttributeInfo {
                name_index: pool.add_utf8(names::STACK_MAP_TABLE)?,
                info: stack_map_to_bytes(&encoded_frames)?,
            });
        }

        attributes.extend(self.other_attributes.iter().cloned());

        Ok(CodeAttribute {
            max_stack: self.max_stack,
            max_locals: self.max_locals,
            code: encoded.code,
            exception_table,
            attributes,
        })
    }

    /// Checks the label invariant: every label is placed exactly once and every reference
    /// (branch targets, handler regions, frames, debug tables) points at a placed label.
    ///
    /// # Errors
    /// Returns [`crate::Error::DuplicateLabel`] or [`crate::Error::UndefinedLabel`].
    pub fn validate(&self) -> Result<()> {
        let mut placed = HashMap::new();
        for node in &self.nodes {
            if let Node::Label(label) = node {
                if placed.insert(*label, ()).is_some() {
                    return Err(Error::DuplicateLabel(label.0));
                }
            }
        }

        let check = |label: &Label| -> Result<()> {
            if placed.contains_key(label) {
                Ok(())
            } else {
                Err(Error::UndefinedLabel(label.0))
            }
        };

        for instruction in self.instructions() {
            for target in instruction.targets() {
                check(target)?;
            }
        }
        for region in &self.handlers {
            check(&region.start)?;
            check(&region.end)?;
            check(&region.handler)?;
        }
        for line in &self.line_numbers {
            check(&line.start)?;
        }
        for variable in self.local_variables.iter().chain(&self.local_variable_types) {
            check(&variable.start)?;
            check(&variable.end)?;
        }
        if let Some(frames) = &self.frames {
            for frame in frames {
                frame.map_positions(&mut |label: &Label| check(label))?;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        assembly::{Operand, opcodes},
        classfile::stackmap::{FrameKind, VerificationType},
        file::io::write_be,
    };

    fn attribute(pool: &mut ConstantPool, name: &str, info: Vec<u8>) -> AttributeInfo {
        AttributeInfo {
            name_index: pool.add_utf8(name).unwrap(),
            info,
        }
    }

    /// `static int f(int x) { try { return 10 / x; } catch (ArithmeticException e) { return -1; } }`
    fn guarded_division(pool: &mut ConstantPool) -> CodeAttribute {
        let arithmetic = pool.add_class("java/lang/ArithmeticException").unwrap();

        let mut lines = Vec::new();
        write_be(&mut lines, 2_u16);
        write_be(&mut lines, 0_u16);
        write_be(&mut lines, 3_u16);
        write_be(&mut lines, 6_u16);
        write_be(&mut lines, 4_u16);

        let mut stack_map = Vec::new();
        write_be(&mut stack_map, 1_u16);
        stack_map.push(64 + 6); // same_locals_1 at offset 6
        stack_map.push(7);
        write_be(&mut stack_map, arithmetic);

        CodeAttribute {
            max_stack: 2,
            max_locals: 2,
            code: vec![
                0x10, 0x0A, // 0: bipush 10
                0x1A, // 2: iload_0
                0x6C, // 3: idiv
                0xAC, // 4: ireturn
                0x00, // 5: nop (unreachable filler)
                0x4C, // 6: astore_1
                0x02, // 7: iconst_m1
                0xAC, // 8: ireturn
            ],
            exception_table: vec![ExceptionTableEntry {
                start_pc: 0,
                end_pc: 5,
                handler_pc: 6,
                catch_type: arithmetic,
            }],
            attributes: vec![
                attribute(pool, names::LINE_NUMBER_TABLE, lines),
                attribute(pool, names::STACK_MAP_TABLE, stack_map),
            ],
        }
    }

    #[test]
    fn binds_offsets_to_labels() {
        let mut pool = ConstantPool::new();
        let code = guarded_division(&mut pool);
        let body = MethodBody::from_code(&code, &pool).unwrap();

        body.validate().unwrap();
        assert_eq!(body.handlers.len(), 1);
        assert_eq!(body.return_count(), 2);
        assert_eq!(body.line_numbers.len(), 2);

        let frames = body.frames.as_ref().unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].position, body.handlers[0].handler);
        assert!(matches!(
            frames[0].kind,
            FrameKind::SameLocals1(VerificationType::Object(_))
        ));
    }

    #[test]
    fn unchanged_body_roundtrips() {
        let mut pool = ConstantPool::new();
        let code = guarded_division(&mut pool);
        let body = MethodBody::from_code(&code, &pool).unwrap();

        let size = pool.len();
        let encoded = body.to_code(&mut pool).unwrap();
        assert_eq!(pool.len(), size);
        assert_eq!(encoded.code, code.code);
        assert_eq!(encoded.exception_table, code.exception_table);

        let mut expected = code.attributes.clone();
        let mut actual = encoded.attributes.clone();
        expected.sort_by_key(|a| a.name_index);
        actual.sort_by_key(|a| a.name_index);
        assert_eq!(actual, expected);
    }

    #[test]
    fn inserted_code_shifts_offsets() {
        let mut pool = ConstantPool::new();
        let code = guarded_division(&mut pool);
        let mut body = MethodBody::from_code(&code, &pool).unwrap();

        body.nodes.insert(0, Node::Instruction(Instruction::simple(opcodes::NOP)));
        body.nodes.insert(0, Node::Instruction(Instruction::simple(opcodes::NOP)));
        let encoded = body.to_code(&mut pool).unwrap();

        assert_eq!(encoded.code.len(), code.code.len() + 2);
        let entry = encoded.exception_table[0];
        assert_eq!((entry.start_pc, entry.end_pc, entry.handler_pc), (2, 7, 8));

        let frames = encoded
            .attributes
            .iter()
            .find(|a| a.is(&pool, names::STACK_MAP_TABLE))
            .map(|a| parse_stack_map(&a.info).unwrap())
            .unwrap();
        assert_eq!(frames[0].position, 8);

        let lines = encoded
            .attributes
            .iter()
            .find(|a| a.is(&pool, names::LINE_NUMBER_TABLE))
            .map(|a| parse_line_numbers(&a.info).unwrap())
            .unwrap();
        assert_eq!(lines[0].start_pc, 2);
        assert_eq!(lines[1].start_pc, 8);
    }

    #[test]
    fn branch_into_instruction_rejected() {
        let pool = ConstantPool::new();
        let code = CodeAttribute {
            max_stack: 1,
            max_locals: 0,
            // goto +1 lands in the middle of the goto itself
            code: vec![0xA7, 0x00, 0x01, 0xB1],
            exception_table: Vec::new(),
            attributes: Vec::new(),
        };
        assert!(matches!(
            MethodBody::from_code(&code, &pool),
            Err(Error::Malformed { .. })
        ));
    }

    #[test]
    fn empty_code_rejected() {
        let pool = ConstantPool::new();
        let code = CodeAttribute {
            max_stack: 0,
            max_locals: 0,
            code: Vec::new(),
            exception_table: Vec::new(),
            attributes: Vec::new(),
        };
        assert!(MethodBody::from_code(&code, &pool).is_err());
    }

    #[test]
    fn new_labels_are_fresh() {
        let mut pool = ConstantPool::new();
        let code = guarded_division(&mut pool);
        let mut body = MethodBody::from_code(&code, &pool).unwrap();

        let used: Vec<Label> = body
            .nodes
            .iter()
            .filter_map(|n| match n {
                Node::Label(l) => Some(*l),
                Node::Instruction(_) => None,
            })
            .collect();
        let fresh = body.new_label();
        assert!(!used.contains(&fresh));
        assert_ne!(body.new_label(), fresh);
    }

    #[test]
    fn validate_detects_dangling_reference() {
        let mut pool = ConstantPool::new();
        let code = guarded_division(&mut pool);
        let mut body = MethodBody::from_code(&code, &pool).unwrap();

        let dangling = body.new_label();
        body.nodes.insert(
            0,
            Node::Instruction(Instruction::new(opcodes::GOTO, Operand::Branch(dangling))),
        );
        assert!(matches!(body.validate(), Err(Error::UndefinedLabel(_))));
        assert!(body.to_code(&mut pool).is_err());

        body.nodes.remove(0);
        let existing = body.handlers[0].start;
        body.nodes.push(Node::Label(existing));
        assert!(matches!(body.validate(), Err(Error::DuplicateLabel(_))));
    }

    #[test]
    fn unknown_code_attributes_kept() {
        let mut pool = ConstantPool::new();
        let mut code = guarded_division(&mut pool);
        code.attributes.push(attribute(&mut pool, "Custom", vec![1, 2, 3]));

        let body = MethodBody::from_code(&code, &pool).unwrap();
        assert_eq!(body.other_attributes.len(), 1);

        let encoded = body.to_code(&mut pool).unwrap();
        assert!(encoded.attributes.iter().any(|a| a.info == vec![1, 2, 3]));
    }
}
