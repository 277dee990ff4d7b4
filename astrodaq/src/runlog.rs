/*!
Run log parsing.

Data runs record every raw readout as one line, `<index>\t<hex bytes>`. Logs
written by the older Python tooling wrap the hex in `b'...'`; both forms are
accepted. Any other line (run headers, config dumps) is skipped.
*/

use anyhow::{Context, Result};
use regex::Regex;

/// One raw readout as recorded during a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Readout {
    pub index: u64,
    pub data: Vec<u8>,
}

/// Line parser for run logs
pub struct RunLogParser {
    pattern: Regex,
}

impl RunLogParser {
    pub fn new() -> Result<Self> {
        let pattern = Regex::new(r"^\s*(\d+)\t(?:b'([0-9a-fA-F]*)'|([0-9a-fA-F]*))\s*$")
            .context("Failed to compile run log pattern")?;
        Ok(Self { pattern })
    }

    /// Parse one line; `None` for lines that are not readout records
    pub fn parse_line(&self, line: &str) -> Result<Option<Readout>> {
        let Some(captures) = self.pattern.captures(line) else {
            return Ok(None);
        };

        let index = captures[1]
            .parse::<u64>()
            .with_context(|| format!("Invalid readout index in line '{}'", line))?;
        let hex_data = captures
            .get(2)
            .or_else(|| captures.get(3))
            .map(|m| m.as_str())
            .unwrap_or_default();
        let data = hex::decode(hex_data)
            .with_context(|| format!("Invalid hex data for readout {}", index))?;

        Ok(Some(Readout { index, data }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain_line() {
        let parser = RunLogParser::new().unwrap();
        let readout = parser.parse_line("12\tbcbc1081a0400cbc").unwrap().unwrap();
        assert_eq!(readout.index, 12);
        assert_eq!(readout.data, vec![0xBC, 0xBC, 0x10, 0x81, 0xA0, 0x40, 0x0C, 0xBC]);
    }

    #[test]
    fn test_parse_legacy_line() {
        let parser = RunLogParser::new().unwrap();
        let readout = parser.parse_line("3\tb'bcff'").unwrap().unwrap();
        assert_eq!(readout.index, 3);
        assert_eq!(readout.data, vec![0xBC, 0xFF]);
    }

    #[test]
    fn test_skip_header_lines() {
        let parser = RunLogParser::new().unwrap();
        assert!(parser.parse_line("[dac]").unwrap().is_none());
        assert!(parser.parse_line("vn1 = 20 (6)").unwrap().is_none());
        assert!(parser.parse_line("").unwrap().is_none());
    }

    #[test]
    fn test_odd_hex_is_an_error() {
        let parser = RunLogParser::new().unwrap();
        assert!(parser.parse_line("4\tbcb").is_err());
    }
}
