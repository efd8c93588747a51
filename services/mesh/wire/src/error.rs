//! Wire protocol error types.

use thiserror::Error;

/// Wire protocol errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WireError {
    /// Message shorter than the opcode prefix
    #[error("malformed message: {len} bytes, opcode prefix needs {need}")]
    Malformed {
        /// Length of the received data
        len: usize,
        /// Minimum length required
        need: usize,
    },

    /// Opcode does not fit in 24 bits
    #[error("opcode out of range: {0:#x}")]
    OpcodeRange(u32),

    /// Text payload is not ASCII
    #[error("text payload is not ascii")]
    NonAscii,
}
