/*!
Fixed-width unsigned integer <-> bit sequence conversion.

Bit sequences are big-endian: the first bit of an encoded field is its most
significant bit. Values that do not fit are rejected, never clamped.
*/

use bitvec::prelude::*;

use crate::error::{AsicError, Result};

/// Widest field the codec handles
pub const MAX_WIDTH: usize = 64;

/// Bit sequence type shared by the codec and the serializer
pub type Bits = BitVec<u8, Msb0>;

/// Largest value representable in `width` bits
pub fn max_value(width: usize) -> u64 {
    if width >= MAX_WIDTH {
        u64::MAX
    } else {
        (1u64 << width) - 1
    }
}

/// Reject widths outside 1..=64
pub fn check_width(width: usize) -> Result<()> {
    if width == 0 || width > MAX_WIDTH {
        return Err(AsicError::InvalidWidth(width));
    }
    Ok(())
}

/// Check that `value` fits in `width` bits
pub fn check_fits(value: u64, width: usize) -> Result<()> {
    check_width(width)?;
    if value > max_value(width) {
        return Err(AsicError::Range {
            value: value as i128,
            width,
            max: max_value(width),
        });
    }
    Ok(())
}

/// Convert a signed value from an external source (config files carry signed
/// integers) into a field value, rejecting negatives and oversized values.
pub fn check_value(value: i64, width: usize) -> Result<u64> {
    check_width(width)?;
    let unsigned = u64::try_from(value).map_err(|_| AsicError::Range {
        value: value as i128,
        width,
        max: max_value(width),
    })?;
    check_fits(unsigned, width)?;
    Ok(unsigned)
}

/// Encode `value` as exactly `width` bits, MSB first
pub fn encode(value: u64, width: usize) -> Result<Bits> {
    let mut bits = Bits::with_capacity(width);
    encode_into(value, width, &mut bits)?;
    Ok(bits)
}

/// Append the `width`-bit encoding of `value` to `out`
pub fn encode_into(value: u64, width: usize, out: &mut Bits) -> Result<()> {
    check_fits(value, width)?;
    for shift in (0..width).rev() {
        out.push((value >> shift) & 1 == 1);
    }
    Ok(())
}

/// Decode a `width`-bit MSB-first sequence back into an integer
pub fn decode(bits: &BitSlice<u8, Msb0>, width: usize) -> Result<u64> {
    check_width(width)?;
    if bits.len() != width {
        return Err(AsicError::BitLength {
            expected: width,
            actual: bits.len(),
        });
    }
    Ok(bits.iter().by_vals().fold(0u64, |acc, bit| (acc << 1) | u64::from(bit)))
}
