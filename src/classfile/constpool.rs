//! The class file constant pool.
//!
//! The constant pool is a 1-based table of tagged entries referenced by index from every
//! other part of a class file. `long` and `double` entries occupy two slots, the second of
//! which is unusable. Strings are stored in *modified UTF-8* (JVMS §4.4.7): `U+0000` is
//! encoded as two bytes and supplementary characters as a surrogate pair of three-byte
//! sequences.
//!
//! [`crate::classfile::constpool::ConstantPool`] keeps the original entries and their
//! numbering untouched, so re-encoding a parsed pool reproduces it byte for byte. New
//! entries are only ever appended, and insertion de-duplicates against existing entries so
//! repeated instrumentation of the same class does not grow the pool unboundedly.

use std::collections::HashMap;

use crate::{
    file::{
        io::{write_be, write_u16_len},
        parser::Parser,
    },
    Result,
};

/// Constant pool tag bytes.
pub mod tags {
    #![allow(missing_docs)]
    pub const UTF8: u8 = 1;
    pub const INTEGER: u8 = 3;
    pub const FLOAT: u8 = 4;
    pub const LONG: u8 = 5;
    pub const DOUBLE: u8 = 6;
    pub const CLASS: u8 = 7;
    pub const STRING: u8 = 8;
    pub const FIELDREF: u8 = 9;
    pub const METHODREF: u8 = 10;
    pub const INTERFACE_METHODREF: u8 = 11;
    pub const NAME_AND_TYPE: u8 = 12;
    pub const METHOD_HANDLE: u8 = 15;
    pub const METHOD_TYPE: u8 = 16;
    pub const DYNAMIC: u8 = 17;
    pub const INVOKE_DYNAMIC: u8 = 18;
    pub const MODULE: u8 = 19;
    pub const PACKAGE: u8 = 20;
}

/// One constant pool entry.
///
/// Floating point values are kept as raw bits so that entries can be hashed and compared
/// exactly (NaN payloads included).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Constant {
    /// Raw modified UTF-8 bytes
    Utf8(Vec<u8>),
    /// `int` literal
    Integer(i32),
    /// `float` literal as IEEE-754 bits
    Float(u32),
    /// `long` literal, occupies two slots
    Long(i64),
    /// `double` literal as IEEE-754 bits, occupies two slots
    Double(u64),
    /// Class or array type, index of its internal name
    Class(u16),
    /// String literal, index of its contents
    String(u16),
    /// Field reference
    Fieldref {
        /// Index of the declaring `Class`
        class: u16,
        /// Index of the `NameAndType`
        name_and_type: u16,
    },
    /// Method reference on a class
    Methodref {
        /// Index of the declaring `Class`
        class: u16,
        /// Index of the `NameAndType`
        name_and_type: u16,
    },
    /// Method reference on an interface
    InterfaceMethodref {
        /// Index of the declaring `Class`
        class: u16,
        /// Index of the `NameAndType`
        name_and_type: u16,
    },
    /// Name and descriptor pair
    NameAndType {
        /// Index of the name
        name: u16,
        /// Index of the descriptor
        descriptor: u16,
    },
    /// Method handle
    MethodHandle {
        /// Reference kind (1..=9)
        kind: u8,
        /// Index of the referenced member
        reference: u16,
    },
    /// Method type, index of its descriptor
    MethodType(u16),
    /// Dynamically computed constant
    Dynamic {
        /// Index into the `BootstrapMethods` attribute
        bootstrap: u16,
        /// Index of the `NameAndType`
        name_and_type: u16,
    },
    /// Dynamically computed call site
    InvokeDynamic {
        /// Index into the `BootstrapMethods` attribute
        bootstrap: u16,
        /// Index of the `NameAndType`
        name_and_type: u16,
    },
    /// Module, index of its name
    Module(u16),
    /// Package, index of its name
    Package(u16),
    /// Slot 0 and the second slot of a `long` or `double`
    Unusable,
}

impl Constant {
    /// Returns `true` for `long` and `double`, which take two pool slots.
    #[must_use]
    pub fn is_wide(&self) -> bool {
        matches!(self, Constant::Long(_) | Constant::Double(_))
    }

    fn read(parser: &mut Parser<'_>) -> Result<Self> {
        let tag = parser.read_be::<u8>()?;
        let constant = match tag {
            tags::UTF8 => {
                let len = parser.read_be::<u16>()?;
                Constant::Utf8(parser.read_bytes(len as usize)?.to_vec())
            }
            tags::INTEGER => Constant::Integer(parser.read_be::<i32>()?),
            tags::FLOAT => Constant::Float(parser.read_be::<u32>()?),
            tags::LONG => Constant::Long(parser.read_be::<i64>()?),
            tags::DOUBLE => Constant::Double(parser.read_be::<u64>()?),
            tags::CLASS => Constant::Class(parser.read_be::<u16>()?),
            tags::STRING => Constant::String(parser.read_be::<u16>()?),
            tags::FIELDREF => Constant::Fieldref {
                class: parser.read_be::<u16>()?,
                name_and_type: parser.read_be::<u16>()?,
            },
            tags::METHODREF => Constant::Methodref {
                class: parser.read_be::<u16>()?,
                name_and_type: parser.read_be::<u16>()?,
            },
            tags::INTERFACE_METHODREF => Constant::InterfaceMethodref {
                class: parser.read_be::<u16>()?,
                name_and_type: parser.read_be::<u16>()?,
            },
            tags::NAME_AND_TYPE => Constant::NameAndType {
                name: parser.read_be::<u16>()?,
                descriptor: parser.read_be::<u16>()?,
            },
            tags::METHOD_HANDLE => Constant::MethodHandle {
                kind: parser.read_be::<u8>()?,
                reference: parser.read_be::<u16>()?,
            },
            tags::METHOD_TYPE => Constant::MethodType(parser.read_be::<u16>()?),
            tags::DYNAMIC => Constant::Dynamic {
                bootstrap: parser.read_be::<u16>()?,
                name_and_type: parser.read_be::<u16>()?,
            },
            tags::INVOKE_DYNAMIC => Constant::InvokeDynamic {
                bootstrap: parser.read_be::<u16>()?,
                name_and_type: parser.read_be::<u16>()?,
            },
            tags::MODULE => Constant::Module(parser.read_be::<u16>()?),
            tags::PACKAGE => Constant::Package(parser.read_be::<u16>()?),
            _ => {
                return Err(malformed_error!(
                    "Unknown constant pool tag {} at offset {}",
                    tag,
                    parser.pos() - 1
                ))
            }
        };

        Ok(constant)
    }

    fn write(&self, out: &mut Vec<u8>) -> Result<()> {
        match self {
            Constant::Utf8(bytes) => {
                out.push(tags::UTF8);
                write_u16_len(out, bytes.len(), "modified UTF-8 bytes")?;
                out.extend_from_slice(bytes);
            }
            Constant::Integer(value) => {
                out.push(tags::INTEGER);
                write_be(out, *value);
            }
            Constant::Float(bits) => {
                out.push(tags::FLOAT);
                write_be(out, *bits);
            }
            Constant::Long(value) => {
                out.push(tags::LONG);
                write_be(out, *value);
            }
            Constant::Double(bits) => {
                out.push(tags::DOUBLE);
                write_be(out, *bits);
            }
            Constant::Class(name) => {
                out.push(tags::CLASS);
                write_be(out, *name);
            }
            Constant::String(value) => {
                out.push(tags::STRING);
                write_be(out, *value);
            }
            Constant::Fieldref {
                class,
                name_and_type,
            } => {
                out.push(tags::FIELDREF);
                write_be(out, *class);
                write_be(out, *name_and_type);
            }
            Constant::Methodref {
                class,
                name_and_type,
            } => {
                out.push(tags::METHODREF);
                write_be(out, *class);
                write_be(out, *name_and_type);
            }
            Constant::InterfaceMethodref {
                class,
                name_and_type,
            } => {
                out.push(tags::INTERFACE_METHODREF);
                write_be(out, *class);
                write_be(out, *name_and_type);
            }
            Constant::NameAndType { name, descriptor } => {
                out.push(tags::NAME_AND_TYPE);
                write_be(out, *name);
                write_be(out, *descriptor);
            }
            Constant::MethodHandle { kind, reference } => {
                out.push(tags::METHOD_HANDLE);
                out.push(*kind);
                write_be(out, *reference);
            }
            Constant::MethodType(descriptor) => {
                out.push(tags::METHOD_TYPE);
                write_be(out, *descriptor);
            }
            Constant::Dynamic {
                bootstrap,
                name_and_type,
            } => {
                out.push(tags::DYNAMIC);
                write_be(out, *bootstrap);
                write_be(out, *name_and_type);
            }
            Constant::InvokeDynamic {
                bootstrap,
                name_and_type,
            } => {
                out.push(tags::INVOKE_DYNAMIC);
                write_be(out, *bootstrap);
                write_be(out, *name_and_type);
            }
            Constant::Module(name) => {
                out.push(tags::MODULE);
                write_be(out, *name);
            }
            Constant::Package(name) => {
                out.push(tags::PACKAGE);
                write_be(out, *name);
            }
            Constant::Unusable => {}
        }

        Ok(())
    }
}

/// The constant pool of one class file.
///
/// Index `0` and the slot following every `long`/`double` hold [`Constant::Unusable`].
#[derive(Debug, Clone)]
pub struct ConstantPool {
    entries: Vec<Constant>,
    lookup: HashMap<Constant, u16>,
}

impl Default for ConstantPool {
    fn default() -> Self {
        ConstantPool {
            entries: vec![Constant::Unusable],
            lookup: HashMap::new(),
        }
    }
}

impl ConstantPool {
    /// Creates an empty pool (only the reserved slot 0).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads `constant_pool_count` and the entries that follow it.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] on unknown tags or a `long`/`double` in the last
    /// slot, [`crate::Error::OutOfBounds`] on truncated input.
    pub fn read(parser: &mut Parser<'_>) -> Result<Self> {
        let count = parser.read_be::<u16>()?;
        if count == 0 {
            return Err(malformed_error!("Constant pool count must be at least 1"));
        }

        let mut pool = ConstantPool {
            entries: Vec::with_capacity(count as usize),
            lookup: HashMap::with_capacity(count as usize),
        };
        pool.entries.push(Constant::Unusable);

        while pool.entries.len() < count as usize {
            let constant = Constant::read(parser)?;
            let wide = constant.is_wide();
            if wide && pool.entries.len() + 1 >= count as usize {
                return Err(malformed_error!(
                    "Two-slot constant at index {} overruns the pool of {} entries",
                    pool.entries.len(),
                    count
                ));
            }

            #[allow(clippy::cast_possible_truncation)]
            let index = pool.entries.len() as u16;
            pool.lookup.entry(constant.clone()).or_insert(index);
            pool.entries.push(constant);
            if wide {
                pool.entries.push(Constant::Unusable);
            }
        }

        Ok(pool)
    }

    /// Appends `constant_pool_count` and every entry to `out`.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if a string exceeds the `u16` length limit.
    pub fn write(&self, out: &mut Vec<u8>) -> Result<()> {
        write_u16_len(out, self.entries.len(), "constant pool entries")?;
        for constant in self.entries.iter().skip(1) {
            constant.write(out)?;
        }
        Ok(())
    }

    /// The `constant_pool_count` value: number of slots including slot 0.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if the pool holds no entries besides slot 0.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.len() <= 1
    }

    /// Returns the entry at `index`.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if `index` is out of range or unusable.
    pub fn get(&self, index: u16) -> Result<&Constant> {
        match self.entries.get(index as usize) {
            Some(Constant::Unusable) | None => Err(malformed_error!(
                "Invalid constant pool index {} (pool has {} slots)",
                index,
                self.entries.len()
            )),
            Some(constant) => Ok(constant),
        }
    }

    /// Decodes the `Utf8` entry at `index`.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the entry is not `Utf8` or its bytes are not
    /// valid modified UTF-8.
    pub fn utf8(&self, index: u16) -> Result<String> {
        match self.get(index)? {
            Constant::Utf8(bytes) => decode_modified_utf8(bytes),
            other => Err(malformed_error!(
                "Expected Utf8 at constant pool index {}, found {:?}",
                index,
                other
            )),
        }
    }

    /// Returns `true` if the entry at `index` is a `Utf8` whose raw bytes equal the
    /// encoding of `expected`.
    ///
    /// Cheaper than [`ConstantPool::utf8`] for attribute-name lookups.
    #[must_use]
    pub fn utf8_eq(&self, index: u16, expected: &str) -> bool {
        match self.entries.get(index as usize) {
            Some(Constant::Utf8(bytes)) => *bytes == encode_modified_utf8(expected),
            _ => false,
        }
    }

    /// Resolves the internal name of the `Class` entry at `index`.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the entry is not a `Class`.
    pub fn class_name(&self, index: u16) -> Result<String> {
        match self.get(index)? {
            Constant::Class(name) => self.utf8(*name),
            other => Err(malformed_error!(
                "Expected Class at constant pool index {}, found {:?}",
                index,
                other
            )),
        }
    }

    /// Adds `constant`, returning the index of an identical existing entry if there is one.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the pool is full.
    pub fn add(&mut self, constant: Constant) -> Result<u16> {
        if let Some(index) = self.lookup.get(&constant) {
            return Ok(*index);
        }

        let slots = if constant.is_wide() { 2 } else { 1 };
        let index = u16::try_from(self.entries.len())
            .ok()
            .filter(|index| usize::from(*index) + slots <= usize::from(u16::MAX))
            .ok_or_else(|| malformed_error!("Constant pool is full"))?;

        self.lookup.insert(constant.clone(), index);
        let wide = constant.is_wide();
        self.entries.push(constant);
        if wide {
            self.entries.push(Constant::Unusable);
        }

        Ok(index)
    }

    /// Adds a `Utf8` entry for `value`.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the pool is full.
    pub fn add_utf8(&mut self, value: &str) -> Result<u16> {
        self.add(Constant::Utf8(encode_modified_utf8(value)))
    }

    /// Adds a `Class` entry for the internal name `name`.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the pool is full.
    pub fn add_class(&mut self, name: &str) -> Result<u16> {
        let name = self.add_utf8(name)?;
        self.add(Constant::Class(name))
    }

    /// Adds a `String` literal entry.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the pool is full.
    pub fn add_string(&mut self, value: &str) -> Result<u16> {
        let value = self.add_utf8(value)?;
        self.add(Constant::String(value))
    }

    /// Adds an `Integer` entry.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the pool is full.
    pub fn add_integer(&mut self, value: i32) -> Result<u16> {
        self.add(Constant::Integer(value))
    }

    /// Adds a `NameAndType` entry.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the pool is full.
    pub fn add_name_and_type(&mut self, name: &str, descriptor: &str) -> Result<u16> {
        let name = self.add_utf8(name)?;
        let descriptor = self.add_utf8(descriptor)?;
        self.add(Constant::NameAndType { name, descriptor })
    }

    /// Adds a `Methodref` for `owner.name descriptor`.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the pool is full.
    pub fn add_methodref(&mut self, owner: &str, name: &str, descriptor: &str) -> Result<u16> {
        let class = self.add_class(owner)?;
        let name_and_type = self.add_name_and_type(name, descriptor)?;
        self.add(Constant::Methodref {
            class,
            name_and_type,
        })
    }

    /// Adds a `Fieldref` for `owner.name descriptor`.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the pool is full.
    pub fn add_fieldref(&mut self, owner: &str, name: &str, descriptor: &str) -> Result<u16> {
        let class = self.add_class(owner)?;
        let name_and_type = self.add_name_and_type(name, descriptor)?;
        self.add(Constant::Fieldref {
            class,
            name_and_type,
        })
    }

    /// Resolves a `Methodref`/`InterfaceMethodref` to `(owner, name, descriptor)`.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the entry is not a method reference.
    pub fn member_ref(&self, index: u16) -> Result<(String, String, String)> {
        let (class, name_and_type) = match self.get(index)? {
            Constant::Methodref {
                class,
                name_and_type,
            }
            | Constant::InterfaceMethodref {
                class,
                name_and_type,
            }
            | Constant::Fieldref {
                class,
                name_and_type,
            } => (*class, *name_and_type),
            other => {
                return Err(malformed_error!(
                    "Expected member reference at index {}, found {:?}",
                    index,
                    other
                ))
            }
        };

        match self.get(name_and_type)? {
            Constant::NameAndType { name, descriptor } => Ok((
                self.class_name(class)?,
                self.utf8(*name)?,
                self.utf8(*descriptor)?,
            )),
            other => Err(malformed_error!(
                "Expected NameAndType at index {}, found {:?}",
                name_and_type,
                other
            )),
        }
    }
}

/// Encodes `value` as modified UTF-8.
#[must_use]
pub fn encode_modified_utf8(value: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(value.len());
    let mut units = [0_u16; 2];
    for ch in value.chars() {
        for unit in ch.encode_utf16(&mut units) {
            let unit = *unit;
            match unit {
                0x0001..=0x007F => out.push(unit as u8),
                0x0000 | 0x0080..=0x07FF => {
                    out.push(0xC0 | ((unit >> 6) & 0x1F) as u8);
                    out.push(0x80 | (unit & 0x3F) as u8);
                }
                _ => {
                    out.push(0xE0 | ((unit >> 12) & 0x0F) as u8);
                    out.push(0x80 | ((unit >> 6) & 0x3F) as u8);
                    out.push(0x80 | (unit & 0x3F) as u8);
                }
            }
        }
    }
    out
}

/// Decodes modified UTF-8 bytes into a `String`.
///
/// # Errors
/// Returns [`crate::Error::Malformed`] on invalid byte sequences or on unpaired surrogates,
/// which a Rust `String` cannot represent.
pub fn decode_modified_utf8(bytes: &[u8]) -> Result<String> {
    let mut units = Vec::with_capacity(bytes.len());
    let continuation = |index: usize| -> Result<u16> {
        match bytes.get(index) {
            Some(byte) if byte & 0xC0 == 0x80 => Ok(u16::from(byte & 0x3F)),
            _ => Err(malformed_error!(
                "Invalid modified UTF-8 continuation byte at {}",
                index
            )),
        }
    };

    let mut index = 0;
    while index < bytes.len() {
        let byte = bytes[index];
        if byte == 0 {
            return Err(malformed_error!("NUL byte in modified UTF-8 at {}", index));
        } else if byte & 0x80 == 0 {
            units.push(u16::from(byte));
            index += 1;
        } else if byte & 0xE0 == 0xC0 {
            units.push((u16::from(byte & 0x1F) << 6) | continuation(index + 1)?);
            index += 2;
        } else if byte & 0xF0 == 0xE0 {
            units.push(
                (u16::from(byte & 0x0F) << 12)
                    | (continuation(index + 1)? << 6)
                    | continuation(index + 2)?,
            );
            index += 3;
        } else {
            return Err(malformed_error!(
                "Invalid modified UTF-8 lead byte 0x{:02X} at {}",
                byte,
                index
            ));
        }
    }

    String::from_utf16(&units).map_err(|_| malformed_error!("Unpaired surrogate in string"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mutf8_ascii() {
        assert_eq!(encode_modified_utf8("Code"), b"Code");
        assert_eq!(decode_modified_utf8(b"Code").unwrap(), "Code");
    }

    #[test]
    fn mutf8_nul_and_supplementary() {
        let encoded = encode_modified_utf8("a\0b");
        assert_eq!(encoded, [b'a', 0xC0, 0x80, b'b']);
        assert_eq!(decode_modified_utf8(&encoded).unwrap(), "a\0b");

        // U+1F600 becomes a surrogate pair, 3 bytes each
        let emoji = encode_modified_utf8("\u{1F600}");
        assert_eq!(emoji.len(), 6);
        assert_eq!(emoji[0], 0xED);
        assert_eq!(decode_modified_utf8(&emoji).unwrap(), "\u{1F600}");
    }

    #[test]
    fn mutf8_rejects_raw_nul_and_truncation() {
        assert!(decode_modified_utf8(&[b'a', 0x00]).is_err());
        assert!(decode_modified_utf8(&[0xE0, 0x80]).is_err());
    }

    #[test]
    fn add_deduplicates() {
        let mut pool = ConstantPool::new();
        let first = pool.add_methodref("rt/Hooks", "onMethodEnter", "()V").unwrap();
        let size = pool.len();
        let second = pool.add_methodref("rt/Hooks", "onMethodEnter", "()V").unwrap();

        assert_eq!(first, second);
        assert_eq!(pool.len(), size);
        assert_eq!(
            pool.member_ref(first).unwrap(),
            (
                "rt/Hooks".to_string(),
                "onMethodEnter".to_string(),
                "()V".to_string()
            )
        );
    }

    #[test]
    fn wide_entries_take_two_slots() {
        let mut pool = ConstantPool::new();
        let long = pool.add(Constant::Long(7)).unwrap();
        let next = pool.add_utf8("x").unwrap();

        assert_eq!(long, 1);
        assert_eq!(next, 3);
        assert!(pool.get(2).is_err());
    }

    #[test]
    fn read_write_preserves_layout() {
        let mut pool = ConstantPool::new();
        pool.add_class("com/example/Foo").unwrap();
        pool.add(Constant::Double(1.5_f64.to_bits())).unwrap();
        pool.add_string("hello").unwrap();
        // Duplicate entries in the input must survive re-encoding
        pool.entries.push(Constant::Utf8(b"hello".to_vec()));

        let mut bytes = Vec::new();
        pool.write(&mut bytes).unwrap();

        let mut parser = Parser::new(&bytes);
        let parsed = ConstantPool::read(&mut parser).unwrap();
        assert_eq!(parsed.entries, pool.entries);
        assert!(!parser.has_more_data());

        let mut again = Vec::new();
        parsed.write(&mut again).unwrap();
        assert_eq!(again, bytes);
    }

    #[test]
    fn read_rejects_unknown_tag() {
        let bytes = [0x00, 0x02, 0x02, 0x00];
        let mut parser = Parser::new(&bytes);
        assert!(ConstantPool::read(&mut parser).is_err());
    }

    #[test]
    fn class_name_type_mismatch() {
        let mut pool = ConstantPool::new();
        let utf8 = pool.add_utf8("Foo").unwrap();
        assert!(pool.class_name(utf8).is_err());
        assert!(pool.utf8_eq(utf8, "Foo"));
        assert!(!pool.utf8_eq(utf8, "Bar"));
    }
}
