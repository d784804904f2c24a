//! Instruction-set definitions for the Intel 8080/8085: registers, register
//! pairs, opcode table and byte-layout shapes, and the directive name table.
//! This crate has no notion of a source line, an expression, or an
//! assembler pass — it only knows how a mnemonic maps to bytes.

pub mod constants;
pub mod directives;
pub mod opcodes;
pub mod registers;

pub use directives::Directive;
pub use opcodes::{ArgShape, CpuMode, Opcode, OpcodeDef};
pub use registers::{Register, RegisterPair};
