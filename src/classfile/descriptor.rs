//! Field and method descriptors (JVMS §4.3).
//!
//! Descriptors are parsed into [`crate::classfile::descriptor::FieldType`] values so that
//! hook policies can reason about the return value of the method they instrument: how many
//! stack slots it takes, which `dup` variant copies it, and which wrapper class boxes it.

use std::fmt;

use strum::Display;

use crate::Result;

/// Computational kind of a JVM value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum ValueKind {
    /// `int` and everything narrower (`boolean`, `byte`, `char`, `short`)
    Int,
    /// `long`
    Long,
    /// `float`
    Float,
    /// `double`
    Double,
    /// Any object or array reference
    Reference,
}

impl ValueKind {
    /// Number of operand stack (and local variable) slots a value of this kind takes.
    #[must_use]
    pub fn slots(self) -> u16 {
        match self {
            ValueKind::Long | ValueKind::Double => 2,
            _ => 1,
        }
    }
}

/// The type of a field, parameter or return value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FieldType {
    /// `B`
    Byte,
    /// `C`
    Char,
    /// `D`
    Double,
    /// `F`
    Float,
    /// `I`
    Int,
    /// `J`
    Long,
    /// `S`
    Short,
    /// `Z`
    Boolean,
    /// `Lname;`, holding the internal name
    Object(String),
    /// `[...`, holding the complete array descriptor
    Array(String),
}

impl FieldType {
    /// The computational kind of values of this type.
    #[must_use]
    pub fn kind(&self) -> ValueKind {
        match self {
            FieldType::Byte
            | FieldType::Char
            | FieldType::Short
            | FieldType::Boolean
            | FieldType::Int => ValueKind::Int,
            FieldType::Long => ValueKind::Long,
            FieldType::Float => ValueKind::Float,
            FieldType::Double => ValueKind::Double,
            FieldType::Object(_) | FieldType::Array(_) => ValueKind::Reference,
        }
    }

    /// Returns `true` for the eight primitive types.
    #[must_use]
    pub fn is_primitive(&self) -> bool {
        !matches!(self, FieldType::Object(_) | FieldType::Array(_))
    }

    /// Wrapper class and `valueOf` descriptor used to box a primitive of this type.
    #[must_use]
    pub fn boxing(&self) -> Option<(&'static str, &'static str)> {
        Some(match self {
            FieldType::Byte => ("java/lang/Byte", "(B)Ljava/lang/Byte;"),
            FieldType::Char => ("java/lang/Character", "(C)Ljava/lang/Character;"),
            FieldType::Double => ("java/lang/Double", "(D)Ljava/lang/Double;"),
            FieldType::Float => ("java/lang/Float", "(F)Ljava/lang/Float;"),
            FieldType::Int => ("java/lang/Integer", "(I)Ljava/lang/Integer;"),
            FieldType::Long => ("java/lang/Long", "(J)Ljava/lang/Long;"),
            FieldType::Short => ("java/lang/Short", "(S)Ljava/lang/Short;"),
            FieldType::Boolean => ("java/lang/Boolean", "(Z)Ljava/lang/Boolean;"),
            FieldType::Object(_) | FieldType::Array(_) => return None,
        })
    }

    /// Parses one field type starting at `*pos`, advancing past it.
    fn parse_at(descriptor: &str, pos: &mut usize) -> Result<Self> {
        let bytes = descriptor.as_bytes();
        let start = *pos;
        let Some(&tag) = bytes.get(start) else {
            return Err(malformed_error!("Truncated descriptor '{}'", descriptor));
        };
        *pos += 1;

        Ok(match tag {
            b'B' => FieldType::Byte,
            b'C' => FieldType::Char,
            b'D' => FieldType::Double,
            b'F' => FieldType::Float,
            b'I' => FieldType::Int,
            b'J' => FieldType::Long,
            b'S' => FieldType::Short,
            b'Z' => FieldType::Boolean,
            b'L' => {
                let Some(len) = descriptor[*pos..].find(';') else {
                    return Err(malformed_error!(
                        "Unterminated class type in '{}'",
                        descriptor
                    ));
                };
                if len == 0 {
                    return Err(malformed_error!("Empty class name in '{}'", descriptor));
                }
                let name = descriptor[*pos..*pos + len].to_string();
                *pos += len + 1;
                FieldType::Object(name)
            }
            b'[' => {
                let mut dimensions = 1;
                while bytes.get(*pos) == Some(&b'[') {
                    *pos += 1;
                    dimensions += 1;
                }
                if dimensions > 255 {
                    return Err(malformed_error!(
                        "Array of more than 255 dimensions in '{}'",
                        descriptor
                    ));
                }
                Self::parse_at(descriptor, pos)?;
                FieldType::Array(descriptor[start..*pos].to_string())
            }
            other => {
                return Err(malformed_error!(
                    "Invalid type tag '{}' in '{}'",
                    other as char,
                    descriptor
                ))
            }
        })
    }

    /// Parses a complete field descriptor.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if `descriptor` is not exactly one field type.
    pub fn parse(descriptor: &str) -> Result<Self> {
        let mut pos = 0;
        let field = Self::parse_at(descriptor, &mut pos)?;
        if pos != descriptor.len() {
            return Err(malformed_error!("Trailing data in descriptor '{}'", descriptor));
        }
        Ok(field)
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldType::Byte => f.write_str("B"),
            FieldType::Char => f.write_str("C"),
            FieldType::Double => f.write_str("D"),
            FieldType::Float => f.write_str("F"),
            FieldType::Int => f.write_str("I"),
            FieldType::Long => f.write_str("J"),
            FieldType::Short => f.write_str("S"),
            FieldType::Boolean => f.write_str("Z"),
            FieldType::Object(name) => write!(f, "L{};", name),
            FieldType::Array(descriptor) => f.write_str(descriptor),
        }
    }
}

/// A parsed method descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodDescriptor {
    /// Parameter types in declaration order
    pub parameters: Vec<FieldType>,
    /// Return type, `None` for `void`
    pub return_type: Option<FieldType>,
}

impl MethodDescriptor {
    /// Parses a method descriptor such as `(ILjava/lang/String;)V`.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the descriptor is invalid.
    pub fn parse(descriptor: &str) -> Result<Self> {
        if !descriptor.starts_with('(') {
            return Err(malformed_error!(
                "Method descriptor '{}' does not start with '('",
                descriptor
            ));
        }

        let mut pos = 1;
        let mut parameters = Vec::new();
        loop {
            match descriptor.as_bytes().get(pos) {
                Some(b')') => {
                    pos += 1;
                    break;
                }
                Some(_) => parameters.push(FieldType::parse_at(descriptor, &mut pos)?),
                None => {
                    return Err(malformed_error!(
                        "Unterminated parameter list in '{}'",
                        descriptor
                    ))
                }
            }
        }

        let return_type = if &descriptor[pos..] == "V" {
            None
        } else {
            let parsed = FieldType::parse_at(descriptor, &mut pos)?;
            if pos != descriptor.len() {
                return Err(malformed_error!(
                    "Trailing data in descriptor '{}'",
                    descriptor
                ));
            }
            Some(parsed)
        };

        Ok(MethodDescriptor {
            parameters,
            return_type,
        })
    }

    /// Number of local variable slots taken by the parameters, without `this`.
    #[must_use]
    pub fn parameter_slots(&self) -> u16 {
        self.parameters.iter().map(|p| p.kind().slots()).sum()
    }

    /// Computational kind of the return value, `None` for `void`.
    #[must_use]
    pub fn return_kind(&self) -> Option<ValueKind> {
        self.return_type.as_ref().map(FieldType::kind)
    }
}
