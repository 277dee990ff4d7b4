/*!
Chip configuration session.

[`Asic`] owns the register map of one chip and the hook that ships a
serialized bitstream to the hardware. Every mutation takes an `apply` flag:
when set the full configuration is regenerated and written right away,
otherwise the change is staged until the next [`Asic::update`], so many mask
changes can share one hardware transaction.
*/

use tracing::info;

use crate::bitstream::{serialize, Bitstream};
use crate::error::Result;
use crate::protocol::V1_PREAMBLE_BITS;
use crate::registers::{RegisterGroup, RegisterMap};

/// Destination of serialized configuration vectors
pub trait ConfigWriter {
    /// Shift one bit vector into the chip
    fn write_config(&mut self, bits: &Bitstream) -> Result<()>;
}

/// Collects written vectors in memory
impl ConfigWriter for Vec<Bitstream> {
    fn write_config(&mut self, bits: &Bitstream) -> Result<()> {
        self.push(bits.clone());
        Ok(())
    }
}

impl<W: ConfigWriter + ?Sized> ConfigWriter for &mut W {
    fn write_config(&mut self, bits: &Bitstream) -> Result<()> {
        (**self).write_config(bits)
    }
}

/// Configuration session of one chip
pub struct Asic<W> {
    registers: RegisterMap,
    writer: W,
    chip_version: u8,
}

impl<W: ConfigWriter> Asic<W> {
    pub fn new(registers: RegisterMap, writer: W) -> Self {
        Self {
            registers,
            writer,
            chip_version: crate::protocol::DEFAULT_CHIP_VERSION,
        }
    }

    /// Chip version 1 needs a dummy vector in front of every configuration
    pub fn with_chip_version(mut self, chip_version: u8) -> Self {
        self.chip_version = chip_version;
        self
    }

    pub fn chip_version(&self) -> u8 {
        self.chip_version
    }

    pub fn registers(&self) -> &RegisterMap {
        &self.registers
    }

    pub fn writer(&self) -> &W {
        &self.writer
    }

    pub fn writer_mut(&mut self) -> &mut W {
        &mut self.writer
    }

    pub fn into_parts(self) -> (RegisterMap, W) {
        (self.registers, self.writer)
    }

    /// Current configuration in transmission order
    pub fn bitstream(&self) -> Result<Bitstream> {
        serialize(&self.registers, true)
    }

    /// Regenerate the whole configuration and write it to the chip
    pub fn update(&mut self) -> Result<()> {
        if self.chip_version == 1 {
            self.writer.write_config(&Bitstream::zeros(V1_PREAMBLE_BITS))?;
        }
        let bits = self.bitstream()?;
        self.writer.write_config(&bits)?;
        info!("Wrote configbits successfully ({} bits)", bits.len());
        Ok(())
    }

    fn commit(&mut self, apply: bool) -> Result<()> {
        if apply {
            self.update()
        } else {
            Ok(())
        }
    }

    pub fn initialize_defaults(&mut self, apply: bool) -> Result<()> {
        self.registers.initialize_defaults();
        self.commit(apply)
    }

    pub fn apply_overrides<I, K>(&mut self, group: RegisterGroup, overrides: I, apply: bool) -> Result<()>
    where
        I: IntoIterator<Item = (K, i64)>,
        K: AsRef<str>,
    {
        self.registers.apply_overrides(group, overrides)?;
        self.commit(apply)
    }

    pub fn enable_pixel(&mut self, col: usize, row: usize, apply: bool) -> Result<()> {
        self.registers.enable_pixel(col, row);
        self.commit(apply)
    }

    pub fn disable_pixel(&mut self, col: usize, row: usize, apply: bool) -> Result<()> {
        self.registers.disable_pixel(col, row);
        self.commit(apply)
    }

    pub fn enable_injection_column(&mut self, col: usize, apply: bool) -> Result<()> {
        self.registers.enable_injection_column(col);
        self.commit(apply)
    }

    pub fn disable_injection_column(&mut self, col: usize, apply: bool) -> Result<()> {
        self.registers.disable_injection_column(col);
        self.commit(apply)
    }

    pub fn enable_injection_row(&mut self, row: usize, apply: bool) -> Result<()> {
        self.registers.enable_injection_row(row);
        self.commit(apply)
    }

    pub fn disable_injection_row(&mut self, row: usize, apply: bool) -> Result<()> {
        self.registers.disable_injection_row(row);
        self.commit(apply)
    }

    pub fn select_analog_output_column(&mut self, col: usize, apply: bool) -> Result<()> {
        self.registers.select_analog_output_column(col);
        self.commit(apply)
    }

    pub fn configure_analog_pixel(&mut self, col: usize, row: usize, inject: bool, apply: bool) -> Result<()> {
        self.registers.configure_analog_pixel(col, row, inject);
        self.commit(apply)
    }

    pub fn apply_digital_mask(&mut self, mask: &str, inject: bool, apply: bool) -> Result<()> {
        self.registers.apply_digital_mask(mask, inject)?;
        self.commit(apply)
    }

    pub fn reset_all(&mut self, apply: bool) -> Result<()> {
        self.registers.reset_all();
        self.commit(apply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_staged_changes_are_not_written() {
        let mut asic = Asic::new(RegisterMap::default(), Vec::new());
        asic.enable_pixel(0, 0, false).unwrap();
        asic.enable_pixel(0, 1, false).unwrap();
        assert!(asic.writer().is_empty());

        asic.enable_pixel(0, 2, true).unwrap();
        assert_eq!(asic.writer().len(), 1);
        assert_eq!(asic.writer()[0], asic.bitstream().unwrap());
        assert_eq!(asic.registers().is_pixel_enabled(0, 1), Some(true));
    }

    #[test]
    fn test_version_one_preamble() {
        let mut asic = Asic::new(RegisterMap::default(), Vec::new()).with_chip_version(1);
        asic.update().unwrap();

        let (registers, written) = asic.into_parts();
        assert_eq!(written.len(), 2);
        assert_eq!(written[0], Bitstream::zeros(V1_PREAMBLE_BITS));
        assert_eq!(written[1].len(), registers.total_bits());
    }

    #[test]
    fn test_failed_override_does_not_write() {
        let mut writes = Vec::new();
        let mut asic = Asic::new(RegisterMap::default(), &mut writes);
        assert!(asic.apply_overrides(RegisterGroup::Bias, [("nope", 1)], true).is_err());
        asic.apply_overrides(RegisterGroup::Bias, [("qon0", 1)], true).unwrap();
        drop(asic);
        assert_eq!(writes.len(), 1);
    }
}
