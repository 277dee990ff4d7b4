/*!
Configuration bitstream generation.

The register map is flattened group by group, entry by entry, each field MSB
first at its declared width. The chip's configuration shift register expects
the last field first, so the normal transmission mode reverses the whole
vector end to end (this is not a per-field reversal).
*/

use std::fmt;

use bitvec::prelude::*;
use tracing::{debug, trace};

use crate::bitfield::{self, Bits};
use crate::error::Result;
use crate::registers::RegisterMap;

/// Serialized configuration, ready to be shifted into the chip
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Bitstream {
    bits: Bits,
}

impl Bitstream {
    /// A vector of `len` zero bits
    pub fn zeros(len: usize) -> Self {
        Self {
            bits: BitVec::repeat(false, len),
        }
    }

    pub fn len(&self) -> usize {
        self.bits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bits.is_empty()
    }

    pub fn as_bitslice(&self) -> &BitSlice<u8, Msb0> {
        &self.bits
    }

    /// Bits in transmission order
    pub fn iter(&self) -> impl Iterator<Item = bool> + '_ {
        self.bits.iter().by_vals()
    }

    /// Render as a string of `0`/`1` characters
    pub fn to_bit_string(&self) -> String {
        self.iter().map(|bit| if bit { '1' } else { '0' }).collect()
    }

    /// Pack into bytes, first bit in the MSB of the first byte, last byte
    /// zero padded
    pub fn to_bytes(&self) -> Vec<u8> {
        self.bits
            .chunks(8)
            .map(|chunk| chunk.load_be::<u8>() << (8 - chunk.len()))
            .collect()
    }
}

impl fmt::Display for Bitstream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_bit_string())
    }
}

impl From<Bits> for Bitstream {
    fn from(bits: Bits) -> Self {
        Self { bits }
    }
}

/// Serialize every register entry of `map` into one bit vector.
///
/// With `reverse_whole_vector` set (the normal transmission mode) the
/// concatenated vector is reversed end to end before it is returned.
pub fn serialize(map: &RegisterMap, reverse_whole_vector: bool) -> Result<Bitstream> {
    let mut bits = Bits::with_capacity(map.total_bits());

    for (group, bank) in map.groups() {
        let start = bits.len();
        for entry in bank.iter() {
            bitfield::encode_into(entry.value(), entry.width(), &mut bits)?;
        }
        debug!("{}: {} entries, {} bits", group, bank.len(), bits.len() - start);
    }

    if reverse_whole_vector {
        bits.reverse();
    }

    let bitstream = Bitstream { bits };
    trace!("Bitstream: {}", bitstream);
    Ok(bitstream)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registers::{Geometry, RegisterGroup};

    #[test]
    fn test_to_bytes_pads_last_byte() {
        let bits: Bits = bitvec![u8, Msb0; 1, 0, 1, 0, 0, 0, 0, 1, 1, 1];
        let bitstream = Bitstream::from(bits);
        assert_eq!(bitstream.to_bytes(), vec![0xA1, 0xC0]);
        assert_eq!(bitstream.to_bit_string(), "1010000111");
    }

    #[test]
    fn test_zeros() {
        let bitstream = Bitstream::zeros(245);
        assert_eq!(bitstream.len(), 245);
        assert!(bitstream.iter().all(|bit| !bit));
    }

    #[test]
    fn test_serialize_small_map() {
        let map = RegisterMap::new(Geometry::new(2, 1).unwrap());
        let forward = serialize(&map, false).unwrap();
        let reversed = serialize(&map, true).unwrap();

        assert_eq!(forward.len(), map.total_bits());
        // first digital entry is interrupt_pushpull = 1
        assert!(forward.iter().next().unwrap());
        // receiver word 0b00110 closes the vector
        assert!(forward.to_bit_string().ends_with("00110"));
        assert!(reversed.to_bit_string().starts_with("01100"));

        let mut back: Vec<bool> = reversed.iter().collect();
        back.reverse();
        assert_eq!(back, forward.iter().collect::<Vec<_>>());
    }

    #[test]
    fn test_serialize_reflects_overrides() {
        let mut map = RegisterMap::new(Geometry::new(2, 1).unwrap());
        map.apply_overrides(RegisterGroup::Dac, [("blres", 63)]).unwrap();
        let bits = serialize(&map, false).unwrap().to_bit_string();

        let offset = map.group(RegisterGroup::Digital).total_bits() + map.group(RegisterGroup::Bias).total_bits();
        assert_eq!(&bits[offset..offset + 6], "111111");
    }
}
