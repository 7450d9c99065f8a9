//! 6502 + SID emulation core for C64 music drivers.
//!
//! This crate executes player code instruction by instruction and records
//! every SID register write with its frame and cycle position:
//! - NMOS 6502 core with documented and stable undocumented opcodes
//! - Flat 64 KiB memory image with the SID mapped at `$D400-$D7FF`
//! - Per-job [`EmulationSession`] and the pure [`emulate`] entry point
//!
//! # Example
//!
//! ```
//! use sidconv_emu::{emulate, EmulationConfig, Program, SidRegister};
//!
//! // init: RTS / play: LDA #$09; STA $D400; RTS
//! let code = vec![0x60, 0xA9, 0x09, 0x8D, 0x00, 0xD4, 0x60];
//! let program = Program::new(0x1000, code, 0x1000, 0x1001);
//! let trace = emulate(&program, 1, &EmulationConfig::default()).unwrap();
//! assert_eq!(trace.frame(0)[0].register, SidRegister::Voice0FreqLo);
//! ```

#![warn(missing_docs)]

pub mod cpu;
pub mod error;
pub mod memory;
pub mod session;
pub mod sid;
pub mod trace;

pub use crate::cpu::opcodes::{AddressingMode, Mnemonic, Opcode};
pub use crate::cpu::{Bus, Mos6502, Registers, Status};
pub use crate::error::{EmulationError, Result};
pub use crate::memory::MemoryImage;
pub use crate::session::{
    emulate, CancelToken, Clock, EmulationConfig, EmulationSession, PlayMode, Program,
    RETURN_ADDRESS,
};
pub use crate::sid::{
    nearest_note, note_frequency, SidBank, SidRegister, VoiceRegister, SID_REGISTER_COUNT,
};
pub use crate::trace::{FrameTrace, TraceEntry};
