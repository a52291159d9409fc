//! ZPLC Core: the parts of the toolchain that are fixed in binary
//!
//! This crate is the shared foundation for everything that handles encoded
//! programs — the compiler, the linker, and offline inspection tools. It
//! deliberately has no knowledge of Structured Text or any other source
//! language.
//!
//! # Modules
//!
//! - `opcode`: the 75-opcode instruction set and the operand-size table
//! - `memory`: the four-region memory model and work-window arithmetic
//! - `disasm`: bytecode decoder and textual disassembler
//! - `image`: the container file (header + CODE segment + TASK segment)

pub mod disasm;
pub mod image;
pub mod memory;
pub mod opcode;

pub use disasm::{disassemble, Decoder, Instruction};
pub use image::{ContainerImage, ImageError, TaskRecord, TaskType};
pub use opcode::{Opcode, OPCODE_COUNT};
