//! JVM instruction representation, operand layouts and opcode metadata.
//!
//! # Key Components
//!
//! - [`crate::assembly::instruction::Instruction`] - An opcode with its typed operand
//! - [`crate::assembly::instruction::Operand`] - Operand representation, generic over the
//!   branch target type
//! - [`crate::assembly::instruction::OpcodeInfo`] - Static metadata for every valid opcode
//! - [`crate::assembly::instruction::Label`] - Symbolic branch target
//!
//! Branch targets are generic: the decoder produces instructions whose targets are absolute
//! bytecode offsets (`Instruction<u16>`), and [`crate::method::MethodBody`] converts them to
//! `Instruction<Label>` so that code can be inserted without invalidating any jump.
//!
//! # Usage Examples
//!
//! ```rust
//! use classweave::assembly::{opcodes, FlowType, Instruction, Label, Operand};
//!
//! let jump = Instruction::new(opcodes::GOTO, Operand::Branch(Label(3)));
//! assert_eq!(jump.mnemonic(), "goto");
//! assert_eq!(jump.flow(), FlowType::UnconditionalBranch);
//! assert_eq!(jump.targets(), vec![&Label(3)]);
//! # Ok::<(), classweave::Error>(())
//! ```

use std::fmt;

use crate::{assembly::opcodes, Error, Result};

/// Symbolic position inside a method body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Label(pub u32);

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "L{}", self.0)
    }
}

/// Layout of the operand bytes that follow an opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandType {
    /// No operand
    None,
    /// Signed byte (`bipush`)
    Byte,
    /// Signed short (`sipush`)
    Short,
    /// Local variable index, one byte or two after `wide`
    Local,
    /// One-byte constant pool index (`ldc`)
    Constant8,
    /// Two-byte constant pool index
    Constant16,
    /// Local index and increment (`iinc`)
    Iinc,
    /// Two-byte relative branch offset
    Branch16,
    /// Four-byte relative branch offset
    Branch32,
    /// Padded jump table
    TableSwitch,
    /// Padded match/offset pairs
    LookupSwitch,
    /// Constant pool index, argument count and a zero byte
    InvokeInterface,
    /// Constant pool index and two zero bytes
    InvokeDynamic,
    /// Primitive array type code (`newarray`)
    ArrayType,
    /// Constant pool index and dimension count
    MultiANewArray,
}

/// How an instruction affects control flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowType {
    /// Execution continues with the next instruction
    Sequential,
    /// Either jumps or continues with the next instruction
    ConditionalBranch,
    /// Always jumps
    UnconditionalBranch,
    /// Multi-way jump (`tableswitch`, `lookupswitch`)
    Switch,
    /// Method invocation; continues with the next instruction
    Call,
    /// Leaves the method normally
    Return,
    /// Leaves the method (or enters a handler) abruptly
    Throw,
    /// Legacy subroutine call or return (`jsr`, `ret`)
    Subroutine,
}

/// Static metadata of an opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpcodeInfo {
    /// Mnemonic as written in JVMS §6.5
    pub mnemonic: &'static str,
    /// Operand layout
    pub operand: OperandType,
    /// Control flow behaviour
    pub flow: FlowType,
}

const fn info(mnemonic: &'static str, operand: OperandType, flow: FlowType) -> OpcodeInfo {
    OpcodeInfo {
        mnemonic,
        operand,
        flow,
    }
}

const fn plain(mnemonic: &'static str) -> OpcodeInfo {
    info(mnemonic, OperandType::None, FlowType::Sequential)
}

/// Looks up the metadata of `opcode`.
///
/// Returns `None` for reserved and unassigned opcodes (`0xCA..=0xFF`); `wide` is handled by
/// the decoder and has no entry of its own.
#[must_use]
pub fn opcode_info(opcode: u8) -> Option<OpcodeInfo> {
    use FlowType as F;
    use OperandType as O;

    Some(match opcode {
        opcodes::NOP => plain("nop"),
        opcodes::ACONST_NULL => plain("aconst_null"),
        opcodes::ICONST_M1 => plain("iconst_m1"),
        opcodes::ICONST_0 => plain("iconst_0"),
        opcodes::ICONST_1 => plain("iconst_1"),
        opcodes::ICONST_2 => plain("iconst_2"),
        opcodes::ICONST_3 => plain("iconst_3"),
        opcodes::ICONST_4 => plain("iconst_4"),
        opcodes::ICONST_5 => plain("iconst_5"),
        opcodes::LCONST_0 => plain("lconst_0"),
        opcodes::LCONST_1 => plain("lconst_1"),
        opcodes::FCONST_0 => plain("fconst_0"),
        opcodes::FCONST_1 => plain("fconst_1"),
        opcodes::FCONST_2 => plain("fconst_2"),
        opcodes::DCONST_0 => plain("dconst_0"),
        opcodes::DCONST_1 => plain("dconst_1"),
        opcodes::BIPUSH => info("bipush", O::Byte, F::Sequential),
        opcodes::SIPUSH => info("sipush", O::Short, F::Sequential),
        opcodes::LDC => info("ldc", O::Constant8, F::Sequential),
        opcodes::LDC_W => info("ldc_w", O::Constant16, F::Sequential),
        opcodes::LDC2_W => info("ldc2_w", O::Constant16, F::Sequential),
        opcodes::ILOAD => info("iload", O::Local, F::Sequential),
        opcodes::LLOAD => info("lload", O::Local, F::Sequential),
        opcodes::FLOAD => info("fload", O::Local, F::Sequential),
        opcodes::DLOAD => info("dload", O::Local, F::Sequential),
        opcodes::ALOAD => info("aload", O::Local, F::Sequential),
        opcodes::ILOAD_0 => plain("iload_0"),
        opcodes::ILOAD_1 => plain("iload_1"),
        opcodes::ILOAD_2 => plain("iload_2"),
        opcodes::ILOAD_3 => plain("iload_3"),
        opcodes::LLOAD_0 => plain("lload_0"),
        opcodes::LLOAD_1 => plain("lload_1"),
        opcodes::LLOAD_2 => plain("lload_2"),
        opcodes::LLOAD_3 => plain("lload_3"),
        opcodes::FLOAD_0 => plain("fload_0"),
        opcodes::FLOAD_1 => plain("fload_1"),
        opcodes::FLOAD_2 => plain("fload_2"),
        opcodes::FLOAD_3 => plain("fload_3"),
        opcodes::DLOAD_0 => plain("dload_0"),
        opcodes::DLOAD_1 => plain("dload_1"),
        opcodes::DLOAD_2 => plain("dload_2"),
        opcodes::DLOAD_3 => plain("dload_3"),
        opcodes::ALOAD_0 => plain("aload_0"),
        opcodes::ALOAD_1 => plain("aload_1"),
        opcodes::ALOAD_2 => plain("aload_2"),
        opcodes::ALOAD_3 => plain("aload_3"),
        opcodes::IALOAD => plain("iaload"),
        opcodes::LALOAD => plain("laload"),
        opcodes::FALOAD => plain("faload"),
        opcodes::DALOAD => plain("daload"),
        opcodes::AALOAD => plain("aaload"),
        opcodes::BALOAD => plain("baload"),
        opcodes::CALOAD => plain("caload"),
        opcodes::SALOAD => plain("saload"),
        opcodes::ISTORE => info("istore", O::Local, F::Sequential),
        opcodes::LSTORE => info("lstore", O::Local, F::Sequential),
        opcodes::FSTORE => info("fstore", O::Local, F::Sequential),
        opcodes::DSTORE => info("dstore", O::Local, F::Sequential),
        opcodes::ASTORE => info("astore", O::Local, F::Sequential),
        opcodes::ISTORE_0 => plain("istore_0"),
        opcodes::ISTORE_1 => plain("istore_1"),
        opcodes::ISTORE_2 => plain("istore_2"),
        opcodes::ISTORE_3 => plain("istore_3"),
        opcodes::LSTORE_0 => plain("lstore_0"),
        opcodes::LSTORE_1 => plain("lstore_1"),
        opcodes::LSTORE_2 => plain("lstore_2"),
        opcodes::LSTORE_3 => plain("lstore_3"),
        opcodes::FSTORE_0 => plain("fstore_0"),
        opcodes::FSTORE_1 => plain("fstore_1"),
        opcodes::FSTORE_2 => plain("fstore_2"),
        opcodes::FSTORE_3 => plain("fstore_3"),
        opcodes::DSTORE_0 => plain("dstore_0"),
        opcodes::DSTORE_1 => plain("dstore_1"),
        opcodes::DSTORE_2 => plain("dstore_2"),
        opcodes::DSTORE_3 => plain("dstore_3"),
        opcodes::ASTORE_0 => plain("astore_0"),
        opcodes::ASTORE_1 => plain("astore_1"),
        opcodes::ASTORE_2 => plain("astore_2"),
        opcodes::ASTORE_3 => plain("astore_3"),
        opcodes::IASTORE => plain("iastore"),
        opcodes::LASTORE => plain("lastore"),
        opcodes::FASTORE => plain("fastore"),
        opcodes::DASTORE => plain("dastore"),
        opcodes::AASTORE => plain("aastore"),
        opcodes::BASTORE => plain("bastore"),
        opcodes::CASTORE => plain("castore"),
        opcodes::SASTORE => plain("sastore"),
        opcodes::POP => plain("pop"),
        opcodes::POP2 => plain("pop2"),
        opcodes::DUP => plain("dup"),
        opcodes::DUP_X1 => plain("dup_x1"),
        opcodes::DUP_X2 => plain("dup_x2"),
        opcodes::DUP2 => plain("dup2"),
        opcodes::DUP2_X1 => plain("dup2_x1"),
        opcodes::DUP2_X2 => plain("dup2_x2"),
        opcodes::SWAP => plain("swap"),
        opcodes::IADD => plain("iadd"),
        opcodes::LADD => plain("ladd"),
        opcodes::FADD => plain("fadd"),
        opcodes::DADD => plain("dadd"),
        opcodes::ISUB => plain("isub"),
        opcodes::LSUB => plain("lsub"),
        opcodes::FSUB => plain("fsub"),
        opcodes::DSUB => plain("dsub"),
        opcodes::IMUL => plain("imul"),
        opcodes::LMUL => plain("lmul"),
        opcodes::FMUL => plain("fmul"),
        opcodes::DMUL => plain("dmul"),
        opcodes::IDIV => plain("idiv"),
        opcodes::LDIV => plain("ldiv"),
        opcodes::FDIV => plain("fdiv"),
        opcodes::DDIV => plain("ddiv"),
        opcodes::IREM => plain("irem"),
        opcodes::LREM => plain("lrem"),
        opcodes::FREM => plain("frem"),
        opcodes::DREM => plain("drem"),
        opcodes::INEG => plain("ineg"),
        opcodes::LNEG => plain("lneg"),
        opcodes::FNEG => plain("fneg"),
        opcodes::DNEG => plain("dneg"),
        opcodes::ISHL => plain("ishl"),
        opcodes::LSHL => plain("lshl"),
        opcodes::ISHR => plain("ishr"),
        opcodes::LSHR => plain("lshr"),
        opcodes::IUSHR => plain("iushr"),
        opcodes::LUSHR => plain("lushr"),
        opcodes::IAND => plain("iand"),
        opcodes::LAND => plain("land"),
        opcodes::IOR => plain("ior"),
        opcodes::LOR => plain("lor"),
        opcodes::IXOR => plain("ixor"),
        opcodes::LXOR => plain("lxor"),
        opcodes::IINC => info("iinc", O::Iinc, F::Sequential),
        opcodes::I2L => plain("i2l"),
        opcodes::I2F => plain("i2f"),
        opcodes::I2D => plain("i2d"),
        opcodes::L2I => plain("l2i"),
        opcodes::L2F => plain("l2f"),
        opcodes::L2D => plain("l2d"),
        opcodes::F2I => plain("f2i"),
        opcodes::F2L => plain("f2l"),
        opcodes::F2D => plain("f2d"),
        opcodes::D2I => plain("d2i"),
        opcodes::D2L => plain("d2l"),
        opcodes::D2F => plain("d2f"),
        opcodes::I2B => plain("i2b"),
        opcodes::I2C => plain("i2c"),
        opcodes::I2S => plain("i2s"),
        opcodes::LCMP => plain("lcmp"),
        opcodes::FCMPL => plain("fcmpl"),
        opcodes::FCMPG => plain("fcmpg"),
        opcodes::DCMPL => plain("dcmpl"),
        opcodes::DCMPG => plain("dcmpg"),
        opcodes::IFEQ => info("ifeq", O::Branch16, F::ConditionalBranch),
        opcodes::IFNE => info("ifne", O::Branch16, F::ConditionalBranch),
        opcodes::IFLT => info("iflt", O::Branch16, F::ConditionalBranch),
        opcodes::IFGE => info("ifge", O::Branch16, F::ConditionalBranch),
        opcodes::IFGT => info("ifgt", O::Branch16, F::ConditionalBranch),
        opcodes::IFLE => info("ifle", O::Branch16, F::ConditionalBranch),
        opcodes::IF_ICMPEQ => info("if_icmpeq", O::Branch16, F::ConditionalBranch),
        opcodes::IF_ICMPNE => info("if_icmpne", O::Branch16, F::ConditionalBranch),
        opcodes::IF_ICMPLT => info("if_icmplt", O::Branch16, F::ConditionalBranch),
        opcodes::IF_ICMPGE => info("if_icmpge", O::Branch16, F::ConditionalBranch),
        opcodes::IF_ICMPGT => info("if_icmpgt", O::Branch16, F::ConditionalBranch),
        opcodes::IF_ICMPLE => info("if_icmple", O::Branch16, F::ConditionalBranch),
        opcodes::IF_ACMPEQ => info("if_acmpeq", O::Branch16, F::ConditionalBranch),
        opcodes::IF_ACMPNE => info("if_acmpne", O::Branch16, F::ConditionalBranch),
        opcodes::GOTO => info("goto", O::Branch16, F::UnconditionalBranch),
        opcodes::JSR => info("jsr", O::Branch16, F::Subroutine),
        opcodes::RET => info("ret", O::Local, F::Subroutine),
        opcodes::TABLESWITCH => info("tableswitch", O::TableSwitch, F::Switch),
        opcodes::LOOKUPSWITCH => info("lookupswitch", O::LookupSwitch, F::Switch),
        opcodes::IRETURN => info("ireturn", O::None, F::Return),
        opcodes::LRETURN => info("lreturn", O::None, F::Return),
        opcodes::FRETURN => info("freturn", O::None, F::Return),
        opcodes::DRETURN => info("dreturn", O::None, F::Return),
        opcodes::ARETURN => info("areturn", O::None, F::Return),
        opcodes::RETURN => info("return", O::None, F::Return),
        opcodes::GETSTATIC => info("getstatic", O::Constant16, F::Sequential),
        opcodes::PUTSTATIC => info("putstatic", O::Constant16, F::Sequential),
        opcodes::GETFIELD => info("getfield", O::Constant16, F::Sequential),
        opcodes::PUTFIELD => info("putfield", O::Constant16, F::Sequential),
        opcodes::INVOKEVIRTUAL => info("invokevirtual", O::Constant16, F::Call),
        opcodes::INVOKESPECIAL => info("invokespecial", O::Constant16, F::Call),
        opcodes::INVOKESTATIC => info("invokestatic", O::Constant16, F::Call),
        opcodes::INVOKEINTERFACE => info("invokeinterface", O::InvokeInterface, F::Call),
        opcodes::INVOKEDYNAMIC => info("invokedynamic", O::InvokeDynamic, F::Call),
        opcodes::NEW => info("new", O::Constant16, F::Sequential),
        opcodes::NEWARRAY => info("newarray", O::ArrayType, F::Sequential),
        opcodes::ANEWARRAY => info("anewarray", O::Constant16, F::Sequential),
        opcodes::ARRAYLENGTH => plain("arraylength"),
        opcodes::ATHROW => info("athrow", O::None, F::Throw),
        opcodes::CHECKCAST => info("checkcast", O::Constant16, F::Sequential),
        opcodes::INSTANCEOF => info("instanceof", O::Constant16, F::Sequential),
        opcodes::MONITORENTER => plain("monitorenter"),
        opcodes::MONITOREXIT => plain("monitorexit"),
        opcodes::MULTIANEWARRAY => info("multianewarray", O::MultiANewArray, F::Sequential),
        opcodes::IFNULL => info("ifnull", O::Branch16, F::ConditionalBranch),
        opcodes::IFNONNULL => info("ifnonnull", O::Branch16, F::ConditionalBranch),
        opcodes::GOTO_W => info("goto_w", O::Branch32, F::UnconditionalBranch),
        opcodes::JSR_W => info("jsr_w", O::Branch32, F::Subroutine),
        _ => return None,
    })
}

/// The operand of an instruction. `T` is the branch target type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operand<T> {
    /// No operand, including the implicit-index forms such as `iload_0`
    None,
    /// `bipush` value
    Byte(i8),
    /// `sipush` value
    Short(i16),
    /// Local variable index; encoded with `wide` when above 255
    Local(u16),
    /// Constant pool index; `ldc` is promoted to `ldc_w` when above 255
    Constant(u16),
    /// `iinc`
    Iinc {
        /// Local variable index
        index: u16,
        /// Signed increment
        delta: i16,
    },
    /// Branch target
    Branch(T),
    /// `tableswitch`
    TableSwitch {
        /// Target when the key is out of range
        default: T,
        /// Lowest key
        low: i32,
        /// Highest key
        high: i32,
        /// One target per key in `low..=high`
        targets: Vec<T>,
    },
    /// `lookupswitch`
    LookupSwitch {
        /// Target when no key matches
        default: T,
        /// Key and target pairs, sorted by key
        pairs: Vec<(i32, T)>,
    },
    /// `invokeinterface`
    InvokeInterface {
        /// `InterfaceMethodref` index
        index: u16,
        /// Argument slot count including the receiver
        count: u8,
    },
    /// `invokedynamic` call site index
    InvokeDynamic(u16),
    /// `newarray` primitive type code
    ArrayType(u8),
    /// `multianewarray`
    MultiANewArray {
        /// Array class index
        index: u16,
        /// Number of dimensions to create
        dimensions: u8,
    },
}

/// One JVM instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction<T = Label> {
    /// The opcode byte (never `wide`)
    pub opcode: u8,
    /// The operand
    pub operand: Operand<T>,
}

impl<T> Instruction<T> {
    /// Creates an instruction.
    #[must_use]
    pub fn new(opcode: u8, operand: Operand<T>) -> Self {
        Instruction { opcode, operand }
    }

    /// Creates an instruction without operand.
    #[must_use]
    pub fn simple(opcode: u8) -> Self {
        Instruction {
            opcode,
            operand: Operand::None,
        }
    }

    /// Static metadata of this instruction's opcode.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidOpcode`] for reserved opcodes.
    pub fn info(&self) -> Result<OpcodeInfo> {
        opcode_info(self.opcode).ok_or(Error::InvalidOpcode(self.opcode))
    }

    /// Mnemonic, `"<invalid>"` for reserved opcodes.
    #[must_use]
    pub fn mnemonic(&self) -> &'static str {
        opcode_info(self.opcode).map_or("<invalid>", |info| info.mnemonic)
    }

    /// Control flow behaviour, [`FlowType::Sequential`] for reserved opcodes.
    #[must_use]
    pub fn flow(&self) -> FlowType {
        opcode_info(self.opcode).map_or(FlowType::Sequential, |info| info.flow)
    }

    /// Returns `true` for the six `*return` instructions.
    #[must_use]
    pub fn is_return(&self) -> bool {
        (opcodes::IRETURN..=opcodes::RETURN).contains(&self.opcode)
    }

    /// Returns `true` if execution never continues with the next instruction.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.flow(),
            FlowType::UnconditionalBranch | FlowType::Switch | FlowType::Return | FlowType::Throw
        ) || self.opcode == opcodes::RET
    }

    /// Every branch target of this instruction, defaults first.
    #[must_use]
    pub fn targets(&self) -> Vec<&T> {
        match &self.operand {
            Operand::Branch(target) => vec![target],
            Operand::TableSwitch {
                default, targets, ..
            } => std::iter::once(default).chain(targets.iter()).collect(),
            Operand::LookupSwitch { default, pairs } => std::iter::once(default)
                .chain(pairs.iter().map(|(_, target)| target))
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Converts every branch target with `map`, keeping everything else.
    ///
    /// # Errors
    /// Propagates any error returned by `map`.
    pub fn map_targets<U, F>(&self, mut map: F) -> Result<Instruction<U>>
    where
        F: FnMut(&T) -> Result<U>,
    {
        let operand = match &self.operand {
            Operand::None => Operand::None,
            Operand::Byte(value) => Operand::Byte(*value),
            Operand::Short(value) => Operand::Short(*value),
            Operand::Local(index) => Operand::Local(*index),
            Operand::Constant(index) => Operand::Constant(*index),
            Operand::Iinc { index, delta } => Operand::Iinc {
                index: *index,
                delta: *delta,
            },
            Operand::Branch(target) => Operand::Branch(map(target)?),
            Operand::TableSwitch {
                default,
                low,
                high,
                targets,
            } => Operand::TableSwitch {
                default: map(default)?,
                low: *low,
                high: *high,
                targets: targets.iter().map(&mut map).collect::<Result<Vec<_>>>()?,
            },
            Operand::LookupSwitch { default, pairs } => Operand::LookupSwitch {
                default: map(default)?,
                pairs: pairs
                    .iter()
                    .map(|(key, target)| Ok((*key, map(target)?)))
                    .collect::<Result<Vec<_>>>()?,
            },
            Operand::InvokeInterface { index, count } => Operand::InvokeInterface {
                index: *index,
                count: *count,
            },
            Operand::InvokeDynamic(index) => Operand::InvokeDynamic(*index),
            Operand::ArrayType(atype) => Operand::ArrayType(*atype),
            Operand::MultiANewArray { index, dimensions } => Operand::MultiANewArray {
                index: *index,
                dimensions: *dimensions,
            },
        };

        Ok(Instruction {
            opcode: self.opcode,
            operand,
        })
    }
}

impl<T: fmt::Display> fmt::Display for Instruction<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mnemonic())?;
        match &self.operand {
            Operand::None => Ok(()),
            Operand::Byte(value) => write!(f, " {}", value),
            Operand::Short(value) => write!(f, " {}", value),
            Operand::Local(index) => write!(f, " {}", index),
            Operand::Constant(index) | Operand::InvokeDynamic(index) => write!(f, " #{}", index),
            Operand::Iinc { index, delta } => write!(f, " {} {}", index, delta),
            Operand::Branch(target) => write!(f, " {}", target),
            Operand::TableSwitch {
                default, low, high, ..
            } => write!(f, " {}..={} default {}", low, high, default),
            Operand::LookupSwitch { default, pairs } => {
                write!(f, " {} keys default {}", pairs.len(), default)
            }
            Operand::InvokeInterface { index, count } => write!(f, " #{} {}", index, count),
            Operand::ArrayType(atype) => write!(f, " {}", atype),
            Operand::MultiANewArray { index, dimensions } => {
                write!(f, " #{} {}", index, dimensions)
            }
        }
    }
}
