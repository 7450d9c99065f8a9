//! Error handling for the emulation core.

use thiserror::Error;

/// Convenient result alias for emulation runs.
pub type Result<T> = std::result::Result<T, EmulationError>;

/// Errors that stop an emulation run.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EmulationError {
    /// The CPU fetched an opcode outside the implemented set.
    #[error("unsupported opcode ${opcode:02X} at ${address:04X}")]
    UnsupportedInstruction {
        /// Opcode byte that was fetched.
        opcode: u8,
        /// Address the opcode was fetched from.
        address: u16,
    },
    /// A routine did not return to the halt sentinel within its cycle budget.
    #[error("routine at ${entry:04X} did not return within {cycles} cycles (frame {frame})")]
    ExecutionTimeout {
        /// Entry point of the routine.
        entry: u16,
        /// Frame being emulated when the budget ran out.
        frame: u32,
        /// Cycles spent before giving up.
        cycles: u64,
    },
    /// The job's cancellation token was set.
    #[error("emulation cancelled")]
    Cancelled,
    /// Interrupt-driven program left both IRQ vectors empty after init.
    #[error("no play routine: IRQ vectors at $0314 and $FFFE are unset")]
    NoPlayRoutine,
    /// A memory block does not fit in the 64 KiB address space.
    #[error("block of {len} bytes at ${address:04X} runs past $FFFF")]
    ImageOverflow {
        /// Load address of the block.
        address: u16,
        /// Length of the block in bytes.
        len: usize,
    },
}

impl EmulationError {
    /// Whether a caller may continue without emulation data (static-only).
    ///
    /// Cancellation is never recoverable; the job was asked to stop.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, EmulationError::Cancelled | EmulationError::ImageOverflow { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancellation_is_not_recoverable() {
        assert!(!EmulationError::Cancelled.is_recoverable());
        assert!(EmulationError::UnsupportedInstruction {
            opcode: 0x02,
            address: 0x1000
        }
        .is_recoverable());
        assert!(EmulationError::ExecutionTimeout {
            entry: 0x1003,
            frame: 4,
            cycles: 200_000
        }
        .is_recoverable());
    }

    #[test]
    fn messages_use_hex_addresses() {
        let err = EmulationError::UnsupportedInstruction {
            opcode: 0x02,
            address: 0x10AB,
        };
        assert_eq!(err.to_string(), "unsupported opcode $02 at $10AB");
    }
}
