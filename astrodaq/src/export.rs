/*!
Bitstream export.

Stands in for the FPGA link when configuration vectors are only generated:
every vector the chip session writes goes to a file or stdout instead.
*/

use astropix::{Bitstream, ConfigWriter};
use clap::ValueEnum;
use std::io::Write;
use tracing::debug;

/// Text encoding of exported vectors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum BitstreamFormat {
    /// One '0'/'1' character per bit
    #[default]
    Bits,
    /// Hex bytes, MSB first, last byte zero padded
    Hex,
}

impl BitstreamFormat {
    pub fn render(self, bits: &Bitstream) -> String {
        match self {
            BitstreamFormat::Bits => bits.to_bit_string(),
            BitstreamFormat::Hex => hex::encode(bits.to_bytes()),
        }
    }
}

/// [`ConfigWriter`] writing one line per vector
pub struct FileWriter<W: Write> {
    out: W,
    format: BitstreamFormat,
    written: usize,
}

impl<W: Write> FileWriter<W> {
    pub fn new(out: W, format: BitstreamFormat) -> Self {
        Self {
            out,
            format,
            written: 0,
        }
    }

    /// Number of vectors written so far
    pub fn written(&self) -> usize {
        self.written
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> ConfigWriter for FileWriter<W> {
    fn write_config(&mut self, bits: &Bitstream) -> astropix::Result<()> {
        writeln!(self.out, "{}", self.format.render(bits))?;
        self.out.flush()?;
        self.written += 1;
        debug!("Exported vector {} ({} bits)", self.written, bits.len());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use astropix::{Asic, RegisterMap};

    #[test]
    fn test_hex_render() {
        let bits = Bitstream::zeros(12);
        assert_eq!(BitstreamFormat::Hex.render(&bits), "0000");
        assert_eq!(BitstreamFormat::Bits.render(&bits), "000000000000");
    }

    #[test]
    fn test_session_writes_through() {
        let writer = FileWriter::new(Vec::new(), BitstreamFormat::Bits);
        let mut asic = Asic::new(RegisterMap::default(), writer).with_chip_version(1);
        asic.enable_pixel(0, 0, false).unwrap();
        asic.update().unwrap();

        let expected = asic.bitstream().unwrap().to_bit_string();
        let (_, writer) = asic.into_parts();
        assert_eq!(writer.written(), 2);

        let text = String::from_utf8(writer.into_inner()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "0".repeat(245));
        assert_eq!(lines[1], expected);
    }
}
