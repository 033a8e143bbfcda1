//! JVM instruction decoding and encoding.
//!
//! # Key Components
//!
//! - [`crate::assembly::opcodes`] - Opcode byte constants
//! - [`crate::assembly::Instruction`] / [`crate::assembly::Operand`] - Typed instructions,
//!   generic over their branch target type
//! - [`crate::assembly::decode_stream`] - Code array to instructions with absolute targets
//! - [`crate::assembly::InstructionEncoder`] - Instructions and labels to a code array
//!
//! Decoding and encoding share the static opcode table in
//! [`crate::assembly::instruction::opcode_info`], so both directions agree on every
//! operand layout.

mod decoder;
mod encoder;
mod instruction;
pub mod opcodes;

pub use decoder::{decode_instruction, decode_stream};
pub use encoder::{EncodedCode, InstructionEncoder};
pub use instruction::{opcode_info, FlowType, Instruction, Label, OpcodeInfo, Operand, OperandType};
