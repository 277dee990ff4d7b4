/*!
Common error types for the AstroPix configuration and readout core.
*/

use thiserror::Error;

use crate::registers::RegisterGroup;

/// Common result type used throughout the core library
pub type Result<T> = std::result::Result<T, AsicError>;

/// Error type for all configuration and decoding operations
#[derive(Error, Debug)]
pub enum AsicError {
    /// A value does not fit in its declared bit width
    #[error("Value {value} does not fit in {width} bits (allowed 0 - {max})")]
    Range { value: i128, width: usize, max: u64 },

    /// A bit width outside 1..=64 was requested
    #[error("Invalid bit width {0}: must be between 1 and 64")]
    InvalidWidth(usize),

    /// A bit sequence handed to the decoder does not match the requested width
    #[error("Bit length mismatch: expected {expected} bits, got {actual}")]
    BitLength { expected: usize, actual: usize },

    /// An override referenced a register that is not part of the map
    #[error("Unknown register '{name}' in {group} config")]
    UnknownRegister { group: RegisterGroup, name: String },

    /// A register group name could not be resolved
    #[error("Unknown register group '{0}'")]
    UnknownGroup(String),

    /// Chip geometry cannot be represented by the receiver word layout
    #[error("Invalid geometry {rows}x{cols}: {reason}")]
    InvalidGeometry { rows: usize, cols: usize, reason: String },

    /// Frame extraction needs frames of at least one byte
    #[error("Invalid frame size {0}: must be at least 1 byte")]
    InvalidFrameSize(usize),

    /// A digital mask could not be applied to the receiver config
    #[error("Invalid pixel mask: {0}")]
    InvalidMask(String),

    /// Fewer bytes than a full frame remained at the end of a readout
    #[error("Readout {readout_index}: truncated frame at offset {offset}, {remaining} of {expected} bytes left")]
    TruncatedFrame {
        readout_index: u64,
        offset: usize,
        remaining: usize,
        expected: usize,
    },

    /// A frame of unexpected length reached the field decoder
    #[error("Readout {readout_index}: malformed frame of {len} bytes, expected {expected}")]
    MalformedFrame {
        readout_index: u64,
        len: usize,
        expected: usize,
    },

    /// I/O errors raised by configuration writers
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl AsicError {
    /// Create a new invalid mask error
    pub fn invalid_mask(msg: impl Into<String>) -> Self {
        Self::InvalidMask(msg.into())
    }

    /// Create a new invalid geometry error
    pub fn invalid_geometry(rows: usize, cols: usize, reason: impl Into<String>) -> Self {
        Self::InvalidGeometry {
            rows,
            cols,
            reason: reason.into(),
        }
    }

    /// Readout index attached to a decode failure, if this is one
    pub fn readout_index(&self) -> Option<u64> {
        match self {
            Self::TruncatedFrame { readout_index, .. } | Self::MalformedFrame { readout_index, .. } => {
                Some(*readout_index)
            }
            _ => None,
        }
    }

    /// True for errors produced while slicing or decoding a readout
    pub fn is_decode_error(&self) -> bool {
        self.readout_index().is_some()
    }
}
