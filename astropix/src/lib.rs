/*!
# AstroPix ASIC core

Bit-level core for operating an AstroPix pixel-detector chip through its
FPGA bridge: building the configuration bitstream and decoding the readout
byte stream into hits. Transport, voltage boards and file output live in the
callers.

## Core Types

- [`RegisterMap`] - ordered digital/bias/DAC/receiver configuration
- [`Bitstream`] - serialized configuration vector
- [`HitFrame`] - one raw hit frame cut out of a readout
- [`DecodedHit`] - typed fields of one hit

## Modules

- [`bitfield`] - fixed-width integer <-> bit sequence codec
- [`registers`] - register map, defaults and pixel/injection mutations
- [`bitstream`] - register map serialization
- [`readout`] - hit frame extraction from raw readouts
- [`hit`] - hit field decoding
- [`asic`] - configuration session with a write-to-hardware hook
- [`error`] - common error types
*/

pub mod asic;
pub mod bitfield;
pub mod bitstream;
pub mod error;
pub mod hit;
pub mod readout;
pub mod registers;

// Re-export commonly used types
pub use asic::{Asic, ConfigWriter};
pub use bitstream::{serialize, Bitstream};
pub use error::{AsicError, Result};
pub use hit::{decode_frame, DecodedHit, HitDecoder};
pub use readout::{extract_frames, BitOrder, ExtractOptions, FrameExtractor, HitFrame};
pub use registers::{Geometry, RegisterBank, RegisterEntry, RegisterGroup, RegisterMap};

/// Version information for the core library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Protocol constants
pub mod protocol {
    /// Size of a hit frame in bytes
    pub const BYTES_PER_HIT: usize = 5;

    /// Idle byte of the readout link, as received before bit reversal
    pub const IDLE_BYTE: u8 = 0xBC;

    /// Idle byte when the link is read without bit reversal
    pub const IDLE_BYTE_NATIVE: u8 = 0x3D;

    /// Padding byte, also skipped during frame extraction
    pub const PAD_BYTE: u8 = 0xFF;

    /// Pixel matrix of AstroPix 2
    pub const DEFAULT_ROWS: usize = 35;
    pub const DEFAULT_COLS: usize = 35;

    pub const DEFAULT_CHIP_VERSION: u8 = 2;

    /// Zero bits written ahead of the configuration on chip version 1
    pub const V1_PREAMBLE_BITS: usize = 245;

    /// Sample clock period used for ToT conversion
    pub const DEFAULT_SAMPLE_CLOCK_PERIOD_NS: f64 = 5.0;

    /// Offset added to the comparator threshold when converting mV to V
    pub const THRESHOLD_OFFSET_VOLTS: f64 = 1.0;

    /// Highest threshold the voltage board may be programmed to
    pub const MAX_THRESHOLD_VOLTS: f64 = 1.7;
}

/// Convert a comparator threshold in mV to the voltage board setting in V
pub fn threshold_volts(threshold_mv: f64) -> f64 {
    threshold_mv / 1000.0 + protocol::THRESHOLD_OFFSET_VOLTS
}
