//! Attribute containers: the generic `attribute_info` and the `Code` attribute with its
//! debug tables.
//!
//! Attributes the rewriter does not need to understand are kept as
//! [`crate::classfile::attributes::AttributeInfo`] (name index plus raw payload) and
//! re-emitted unchanged. Only the `Code` attribute and the offset-carrying tables nested in
//! it are decoded into typed structures.

use crate::{
    classfile::constpool::ConstantPool,
    file::{
        io::{write_be, write_u16_len, write_u32_len},
        parser::Parser,
    },
    Result,
};

/// Names of the attributes this crate interprets.
pub mod names {
    #![allow(missing_docs)]
    pub const CODE: &str = "Code";
    pub const STACK_MAP_TABLE: &str = "StackMapTable";
    pub const LINE_NUMBER_TABLE: &str = "LineNumberTable";
    pub const LOCAL_VARIABLE_TABLE: &str = "LocalVariableTable";
    pub const LOCAL_VARIABLE_TYPE_TABLE: &str = "LocalVariableTypeTable";
    pub const RUNTIME_VISIBLE_TYPE_ANNOTATIONS: &str = "RuntimeVisibleTypeAnnotations";
    pub const RUNTIME_INVISIBLE_TYPE_ANNOTATIONS: &str = "RuntimeInvisibleTypeAnnotations";
}

/// An undecoded attribute: constant pool index of its name and its raw payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeInfo {
    /// Index of the `Utf8` name
    pub name_index: u16,
    /// Payload, without the 6-byte header
    pub info: Vec<u8>,
}

impl AttributeInfo {
    /// Reads one attribute.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] on truncated input.
    pub fn read(parser: &mut Parser<'_>) -> Result<Self> {
        let name_index = parser.read_be::<u16>()?;
        let length = parser.read_be::<u32>()?;
        let info = parser.read_bytes(length as usize)?.to_vec();
        Ok(AttributeInfo { name_index, info })
    }

    /// Appends this attribute, header included.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the payload exceeds `u32::MAX` bytes.
    pub fn write(&self, out: &mut Vec<u8>) -> Result<()> {
        write_be(out, self.name_index);
        write_u32_len(out, self.info.len(), "Attribute payload")?;
        out.extend_from_slice(&self.info);
        Ok(())
    }

    /// Returns `true` if this attribute's name is `name`.
    #[must_use]
    pub fn is(&self, pool: &ConstantPool, name: &str) -> bool {
        pool.utf8_eq(self.name_index, name)
    }
}

/// Reads an `attributes_count` followed by the attributes.
///
/// # Errors
/// Returns [`crate::Error::OutOfBounds`] on truncated input.
pub fn read_attributes(parser: &mut Parser<'_>) -> Result<Vec<AttributeInfo>> {
    parser.read_table(AttributeInfo::read)
}

/// Appends an `attributes_count` followed by the attributes.
///
/// # Errors
/// Returns [`crate::Error::Malformed`] if a count or length overflows its encoding.
pub fn write_attributes(out: &mut Vec<u8>, attributes: &[AttributeInfo]) -> Result<()> {
    write_u16_len(out, attributes.len(), "attributes")?;
    for attribute in attributes {
        attribute.write(out)?;
    }
    Ok(())
}

/// One entry of a `Code` attribute's exception table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExceptionTableEntry {
    /// First covered offset (inclusive)
    pub start_pc: u16,
    /// End of the covered range (exclusive)
    pub end_pc: u16,
    /// Offset of the handler
    pub handler_pc: u16,
    /// `Class` index of the caught type, `0` for any
    pub catch_type: u16,
}

/// The decoded `Code` attribute of a method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeAttribute {
    /// Maximum operand stack depth
    pub max_stack: u16,
    /// Number of local variable slots
    pub max_locals: u16,
    /// The bytecode
    pub code: Vec<u8>,
    /// Handlers in priority order
    pub exception_table: Vec<ExceptionTableEntry>,
    /// Nested attributes (`StackMapTable`, `LineNumberTable`, ...)
    pub attributes: Vec<AttributeInfo>,
}

impl CodeAttribute {
    /// Decodes the payload of a `Code` attribute.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the code array is empty or does not fit its
    /// 64 KiB limit, or the payload has trailing bytes; [`crate::Error::OutOfBounds`] on
    /// truncated input.
    pub fn parse(info: &[u8]) -> Result<Self> {
        let mut parser = Parser::new(info);
        let max_stack = parser.read_be::<u16>()?;
        let max_locals = parser.read_be::<u16>()?;
        let code_length = parser.read_be::<u32>()?;
        if code_length == 0 || code_length > u32::from(u16::MAX) {
            return Err(malformed_error!("Invalid code length {}", code_length));
        }

        let code = parser.read_bytes(code_length as usize)?.to_vec();
        let exception_table = parser.read_table(|p| {
            Ok(ExceptionTableEntry {
                start_pc: p.read_be::<u16>()?,
                end_pc: p.read_be::<u16>()?,
                handler_pc: p.read_be::<u16>()?,
                catch_type: p.read_be::<u16>()?,
            })
        })?;
        let attributes = read_attributes(&mut parser)?;

        if parser.has_more_data() {
            return Err(malformed_error!(
                "{} trailing bytes after Code attribute",
                parser.remaining()
            ));
        }

        Ok(CodeAttribute {
            max_stack,
            max_locals,
            code,
            exception_table,
            attributes,
        })
    }

    /// Encodes this attribute's payload.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the code array is empty or too long, or a
    /// table overflows its `u16` count.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        if self.code.is_empty() || self.code.len() > usize::from(u16::MAX) {
            return Err(malformed_error!("Invalid code length {}", self.code.len()));
        }

        let mut out = Vec::with_capacity(self.code.len() + 32);
        write_be(&mut out, self.max_stack);
        write_be(&mut out, self.max_locals);
        write_u32_len(&mut out, self.code.len(), "Code array")?;
        out.extend_from_slice(&self.code);

        write_u16_len(&mut out, self.exception_table.len(), "exception table entries")?;
        for entry in &self.exception_table {
            write_be(&mut out, entry.start_pc);
            write_be(&mut out, entry.end_pc);
            write_be(&mut out, entry.handler_pc);
            write_be(&mut out, entry.catch_type);
        }

        write_attributes(&mut out, &self.attributes)?;
        Ok(out)
    }
}

/// One `LineNumberTable` entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineNumberEntry {
    /// Offset at which the line starts
    pub start_pc: u16,
    /// Source line
    pub line_number: u16,
}

/// Decodes a `LineNumberTable` payload.
///
/// # Errors
/// Returns [`crate::Error::OutOfBounds`] on truncated input.
pub fn parse_line_numbers(info: &[u8]) -> Result<Vec<LineNumberEntry>> {
    Parser::new(info).read_table(|p| {
        Ok(LineNumberEntry {
            start_pc: p.read_be::<u16>()?,
            line_number: p.read_be::<u16>()?,
        })
    })
}

/// Encodes a `LineNumberTable` payload.
///
/// # Errors
/// Returns [`crate::Error::Malformed`] on more than 65535 entries.
pub fn line_numbers_to_bytes(entries: &[LineNumberEntry]) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(2 + entries.len() * 4);
    write_u16_len(&mut out, entries.len(), "line number entries")?;
    for entry in entries {
        write_be(&mut out, entry.start_pc);
        write_be(&mut out, entry.line_number);
    }
    Ok(out)
}

/// One `LocalVariableTable` or `LocalVariableTypeTable` entry.
///
/// Both tables share their layout; in the type table `descriptor_index` refers to a
/// generic signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalVariableEntry {
    /// Offset at which the variable becomes live
    pub start_pc: u16,
    /// Length of the live range
    pub length: u16,
    /// Index of the variable name
    pub name_index: u16,
    /// Index of the descriptor or signature
    pub descriptor_index: u16,
    /// Local variable slot
    pub index: u16,
}

/// Decodes a `LocalVariableTable` or `LocalVariableTypeTable` payload.
///
/// # Errors
/// Returns [`crate::Error::OutOfBounds`] on truncated input.
pub fn parse_local_variables(info: &[u8]) -> Result<Vec<LocalVariableEntry>> {
    Parser::new(info).read_table(|p| {
        Ok(LocalVariableEntry {
            start_pc: p.read_be::<u16>()?,
            length: p.read_be::<u16>()?,
            name_index: p.read_be::<u16>()?,
            descriptor_index: p.read_be::<u16>()?,
            index: p.read_be::<u16>()?,
        })
    })
}

/// Encodes a `LocalVariableTable` or `LocalVariableTypeTable` payload.
///
/// # Errors
/// Returns [`crate::Error::Malformed`] on more than 65535 entries.
pub fn local_variables_to_bytes(entries: &[LocalVariableEntry]) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(2 + entries.len() * 10);
    write_u16_len(&mut out, entries.len(), "local variable entries")?;
    for entry in entries {
        write_be(&mut out, entry.start_pc);
        write_be(&mut out, entry.length);
        write_be(&mut out, entry.name_index);
        write_be(&mut out, entry.descriptor_index);
        write_be(&mut out, entry.index);
    }
    Ok(out)
}
