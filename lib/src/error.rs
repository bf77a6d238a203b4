//! Structural decode failures.
//!
//! Anything in here aborts the whole import. Recoverable defects (truncated
//! chunks, missing colors, bad face indices, ...) are repaired in place and
//! only logged.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FormatError {
    /// The input buffer contains no data at all.
    #[error("file is empty")]
    Empty,

    /// The first chunk is not a 3DS main container.
    #[error("not a 3DS file: first chunk is {id:#06X}")]
    NotA3ds { id: u16 },

    /// A read would move past the physical end of the buffer.
    #[error("unexpected end of file at {offset:#X}: need {needed} bytes, {available} available")]
    UnexpectedEof { offset: usize, needed: usize, available: usize },

    /// A chunk declares a length smaller than its own header.
    #[error("chunk {id:#06X} at {offset:#X} declares invalid length {length}")]
    InvalidChunkLength { id: u16, offset: usize, length: u32 },
}
