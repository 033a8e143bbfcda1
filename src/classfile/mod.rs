//! JVM class file model: parsing and re-encoding (JVMS §4).
//!
//! [`crate::classfile::ClassFile`] decodes the outer structure of a class: constant pool,
//! access flags, members and attributes. Member and attribute payloads stay raw until a
//! caller asks for them, so a class can be parsed, have a few method bodies replaced, and be
//! written back with every other byte untouched.
//!
//! # Key Components
//!
//! - [`crate::classfile::ClassFile`] - The whole class
//! - [`crate::classfile::MemberInfo`] - A field or method
//! - [`crate::classfile::constpool::ConstantPool`] - The constant pool
//! - [`crate::classfile::attributes::CodeAttribute`] - A method's `Code` attribute
//! - [`crate::classfile::descriptor`] - Field and method descriptors
//! - [`crate::classfile::stackmap`] - `StackMapTable` frames
//!
//! # Examples
//!
//! ```rust,no_run
//! use classweave::ClassFile;
//!
//! let bytes = std::fs::read("Foo.class")?;
//! let class = ClassFile::parse(&bytes)?;
//! for method in &class.methods {
//!     println!("{}{}", class.member_name(method)?, class.member_descriptor(method)?);
//! }
//! assert_eq!(class.to_bytes()?, bytes);
//! # Ok::<(), classweave::Error>(())
//! ```

pub mod attributes;
pub mod constpool;
pub mod descriptor;
pub mod stackmap;

use bitflags::bitflags;

use crate::{
    classfile::{
        attributes::{names, read_attributes, write_attributes, AttributeInfo, CodeAttribute},
        constpool::ConstantPool,
    },
    file::{
        io::{write_be, write_u16_len},
        parser::Parser,
    },
    Result,
};

/// Magic number every class file starts with.
pub const CLASS_MAGIC: u32 = 0xCAFE_BABE;

/// First major version whose verifier requires `StackMapTable` frames (Java 7).
pub const MAJOR_VERSION_STACK_MAPS_REQUIRED: u16 = 51;

bitflags! {
    /// Access flags of a class or interface.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ClassAccessFlags: u16 {
        /// Declared `public`
        const PUBLIC = 0x0001;
        /// Declared `final`
        const FINAL = 0x0010;
        /// Treat superclass methods specially in `invokespecial`
        const SUPER = 0x0020;
        /// An interface
        const INTERFACE = 0x0200;
        /// Declared `abstract`
        const ABSTRACT = 0x0400;
        /// Not present in source
        const SYNTHETIC = 0x1000;
        /// An annotation interface
        const ANNOTATION = 0x2000;
        /// An enum class
        const ENUM = 0x4000;
        /// A module, not a class
        const MODULE = 0x8000;
    }
}

bitflags! {
    /// Access flags of a method.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct MethodAccessFlags: u16 {
        /// Declared `public`
        const PUBLIC = 0x0001;
        /// Declared `private`
        const PRIVATE = 0x0002;
        /// Declared `protected`
        const PROTECTED = 0x0004;
        /// Declared `static`
        const STATIC = 0x0008;
        /// Declared `final`
        const FINAL = 0x0010;
        /// Declared `synchronized`
        const SYNCHRONIZED = 0x0020;
        /// Compiler-generated bridge method
        const BRIDGE = 0x0040;
        /// Variable arity
        const VARARGS = 0x0080;
        /// Declared `native`
        const NATIVE = 0x0100;
        /// Declared `abstract`
        const ABSTRACT = 0x0400;
        /// Declared `strictfp`
        const STRICT = 0x0800;
        /// Not present in source
        const SYNTHETIC = 0x1000;
    }
}

/// A field or method: `field_info` and `method_info` share their layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberInfo {
    /// Raw access flags
    pub access_flags: u16,
    /// Index of the `Utf8` name
    pub name_index: u16,
    /// Index of the `Utf8` descriptor
    pub descriptor_index: u16,
    /// Member attributes
    pub attributes: Vec<AttributeInfo>,
}

impl MemberInfo {
    fn read(parser: &mut Parser<'_>) -> Result<Self> {
        Ok(MemberInfo {
            access_flags: parser.read_be::<u16>()?,
            name_index: parser.read_be::<u16>()?,
            descriptor_index: parser.read_be::<u16>()?,
            attributes: read_attributes(parser)?,
        })
    }

    fn write(&self, out: &mut Vec<u8>) -> Result<()> {
        write_be(out, self.access_flags);
        write_be(out, self.name_index);
        write_be(out, self.descriptor_index);
        write_attributes(out, &self.attributes)
    }

    /// Access flags interpreted as method flags, unknown bits retained.
    #[must_use]
    pub fn method_flags(&self) -> MethodAccessFlags {
        MethodAccessFlags::from_bits_retain(self.access_flags)
    }

    /// Position of the `Code` attribute in [`MemberInfo::attributes`], if any.
    #[must_use]
    pub fn code_index(&self, pool: &ConstantPool) -> Option<usize> {
        self.attributes
            .iter()
            .position(|attribute| attribute.is(pool, names::CODE))
    }
}

/// A parsed class file.
#[derive(Debug, Clone)]
pub struct ClassFile {
    /// Minor version
    pub minor_version: u16,
    /// Major version (52 = Java 8)
    pub major_version: u16,
    /// The constant pool
    pub constant_pool: ConstantPool,
    /// Class access flags
    pub access_flags: ClassAccessFlags,
    /// `Class` index of this class
    pub this_class: u16,
    /// `Class` index of the superclass, `0` for `java/lang/Object`
    pub super_class: u16,
    /// `Class` indices of the direct superinterfaces
    pub interfaces: Vec<u16>,
    /// Fields
    pub fields: Vec<MemberInfo>,
    /// Methods
    pub methods: Vec<MemberInfo>,
    /// Class attributes
    pub attributes: Vec<AttributeInfo>,
}

impl ClassFile {
    /// Parses a complete class file.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] on a bad magic number, invalid constant pool or
    /// trailing data, [`crate::Error::OutOfBounds`] on truncated input.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let mut parser = Parser::new(data);

        let magic = parser.read_be::<u32>()?;
        if magic != CLASS_MAGIC {
            return Err(malformed_error!("Invalid class file magic 0x{:08X}", magic));
        }

        let minor_version = parser.read_be::<u16>()?;
        let major_version = parser.read_be::<u16>()?;
        let constant_pool = ConstantPool::read(&mut parser)?;
        let access_flags = ClassAccessFlags::from_bits_retain(parser.read_be::<u16>()?);
        let this_class = parser.read_be::<u16>()?;
        let super_class = parser.read_be::<u16>()?;
        let interfaces = parser.read_table(|p| p.read_be::<u16>())?;
        let fields = parser.read_table(MemberInfo::read)?;
        let methods = parser.read_table(MemberInfo::read)?;
        let attributes = read_attributes(&mut parser)?;

        if parser.has_more_data() {
            return Err(malformed_error!(
                "{} trailing bytes after class file",
                parser.remaining()
            ));
        }

        Ok(ClassFile {
            minor_version,
            major_version,
            constant_pool,
            access_flags,
            this_class,
            super_class,
            interfaces,
            fields,
            methods,
            attributes,
        })
    }

    /// Encodes the class file.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if a table overflows its count encoding.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        write_be(&mut out, CLASS_MAGIC);
        write_be(&mut out, self.minor_version);
        write_be(&mut out, self.major_version);
        self.constant_pool.write(&mut out)?;
        write_be(&mut out, self.access_flags.bits());
        write_be(&mut out, self.this_class);
        write_be(&mut out, self.super_class);

        write_u16_len(&mut out, self.interfaces.len(), "interfaces")?;
        for interface in &self.interfaces {
            write_be(&mut out, *interface);
        }

        write_u16_len(&mut out, self.fields.len(), "fields")?;
        for field in &self.fields {
            field.write(&mut out)?;
        }

        write_u16_len(&mut out, self.methods.len(), "methods")?;
        for method in &self.methods {
            method.write(&mut out)?;
        }

        write_attributes(&mut out, &self.attributes)?;
        Ok(out)
    }

    /// Internal name of this class, e.g. `com/example/Foo`.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if `this_class` is not a valid `Class` entry.
    pub fn name(&self) -> Result<String> {
        self.constant_pool.class_name(self.this_class)
    }

    /// Name of a field or method of this class.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the name index is invalid.
    pub fn member_name(&self, member: &MemberInfo) -> Result<String> {
        self.constant_pool.utf8(member.name_index)
    }

    /// Descriptor of a field or method of this class.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the descriptor index is invalid.
    pub fn member_descriptor(&self, member: &MemberInfo) -> Result<String> {
        self.constant_pool.utf8(member.descriptor_index)
    }

    /// Decodes the `Code` attribute of `method`, if it has one.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the attribute is malformed.
    pub fn code(&self, method: &MemberInfo) -> Result<Option<CodeAttribute>> {
        method
            .code_index(&self.constant_pool)
            .map(|index| CodeAttribute::parse(&method.attributes[index].info))
            .transpose()
    }

    /// Returns `true` if methods of this class must carry stack map frames for their
    /// branch and handler targets.
    #[must_use]
    pub fn requires_stack_maps(&self) -> bool {
        self.major_version >= MAJOR_VERSION_STACK_MAPS_REQUIRED
    }
}
