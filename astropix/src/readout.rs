/*!
Hit frame extraction from raw readout buffers.

The FPGA returns the chip's serial output as a byte stream in which hits are
fixed-size frames separated by idle bytes. The link transmits LSB first, so
in the normal mode every byte of a frame is bit-reversed before decoding.
*/

use crate::error::{AsicError, Result};
use crate::protocol::{BYTES_PER_HIT, IDLE_BYTE, IDLE_BYTE_NATIVE, PAD_BYTE};

/// Bit order of the readout link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BitOrder {
    /// Bytes arrive LSB first and are reversed per byte (normal operation)
    #[default]
    Reversed,
    /// Bytes are used as received
    Native,
}

impl BitOrder {
    pub fn from_reversed(reverse_bitorder: bool) -> Self {
        if reverse_bitorder {
            Self::Reversed
        } else {
            Self::Native
        }
    }

    /// Idle byte value as seen on the wire in this mode
    pub fn idle_byte(self) -> u8 {
        match self {
            Self::Reversed => IDLE_BYTE,
            Self::Native => IDLE_BYTE_NATIVE,
        }
    }
}

/// Parameters of the frame scan. The frame size is always at least one byte.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractOptions {
    frame_size: usize,
    idle_bytes: Vec<u8>,
    bit_order: BitOrder,
}

impl ExtractOptions {
    /// Standard options for the given bit order: 5 byte frames, idle byte of
    /// that mode and `0xFF` padding treated as filler
    pub fn new(bit_order: BitOrder) -> Self {
        Self {
            frame_size: BYTES_PER_HIT,
            idle_bytes: vec![bit_order.idle_byte(), PAD_BYTE],
            bit_order,
        }
    }

    /// Use frames of `frame_size` bytes instead of the hit size
    pub fn with_frame_size(mut self, frame_size: usize) -> Result<Self> {
        if frame_size == 0 {
            return Err(AsicError::InvalidFrameSize(frame_size));
        }
        self.frame_size = frame_size;
        Ok(self)
    }

    /// Replace the set of filler byte values
    pub fn with_idle_bytes(mut self, idle_bytes: Vec<u8>) -> Self {
        self.idle_bytes = idle_bytes;
        self
    }

    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    pub fn idle_bytes(&self) -> &[u8] {
        &self.idle_bytes
    }

    pub fn bit_order(&self) -> BitOrder {
        self.bit_order
    }

    fn is_idle(&self, byte: u8) -> bool {
        self.idle_bytes.contains(&byte)
    }
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self::new(BitOrder::default())
    }
}

/// Raw bytes of one hit, already in decoder bit order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HitFrame {
    bytes: Vec<u8>,
}

impl HitFrame {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Reverse the bit order of every byte in place
pub fn reverse_bitorder(data: &mut [u8]) {
    for byte in data.iter_mut() {
        *byte = byte.reverse_bits();
    }
}

/// Single-pass scanner over a readout buffer.
///
/// Idle bytes are skipped one at a time; any other byte starts a frame and
/// the next `frame_size` bytes are consumed as-is, even if an idle value
/// appears inside them. A short tail yields one `TruncatedFrame` error, after
/// which the iterator is exhausted.
pub struct FrameExtractor<'a> {
    raw: &'a [u8],
    options: &'a ExtractOptions,
    readout_index: u64,
    pos: usize,
    done: bool,
}

impl<'a> FrameExtractor<'a> {
    pub fn new(raw: &'a [u8], options: &'a ExtractOptions, readout_index: u64) -> Self {
        Self {
            raw,
            options,
            readout_index,
            pos: 0,
            done: false,
        }
    }
}

impl Iterator for FrameExtractor<'_> {
    type Item = Result<HitFrame>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        while self.pos < self.raw.len() && self.options.is_idle(self.raw[self.pos]) {
            self.pos += 1;
        }

        let remaining = self.raw.len() - self.pos;
        if remaining == 0 {
            self.done = true;
            return None;
        }

        let frame_size = self.options.frame_size;
        if remaining < frame_size {
            self.done = true;
            return Some(Err(AsicError::TruncatedFrame {
                readout_index: self.readout_index,
                offset: self.pos,
                remaining,
                expected: frame_size,
            }));
        }

        let mut bytes = self.raw[self.pos..self.pos + frame_size].to_vec();
        self.pos += frame_size;
        if self.options.bit_order == BitOrder::Reversed {
            reverse_bitorder(&mut bytes);
        }
        Some(Ok(HitFrame::new(bytes)))
    }
}

/// Scan `raw` for hit frames
pub fn extract_frames<'a>(raw: &'a [u8], options: &'a ExtractOptions, readout_index: u64) -> FrameExtractor<'a> {
    FrameExtractor::new(raw, options, readout_index)
}
