/*!
Hit output sinks.

Decoded hits leave the tool as CSV rows (one per hit, plus one placeholder
row per failed readout) and/or as JSON lines on stdout.
*/

use anyhow::{Context, Result};
use astropix::DecodedHit;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs::File;
use std::io::Write;
use std::path::Path;

/// One CSV row; every field but the readout and capture time is empty on a failure row
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HitRecord {
    pub readout: u64,
    pub chip_id: Option<u8>,
    pub payload: Option<u8>,
    pub location: Option<u8>,
    pub is_col: Option<bool>,
    pub timestamp: Option<u8>,
    pub tot_msb: Option<u8>,
    pub tot_lsb: Option<u8>,
    pub tot_total: Option<u16>,
    pub tot_us: Option<f64>,
    pub hittime: DateTime<Utc>,
}

impl HitRecord {
    pub fn failure(readout: u64, hittime: DateTime<Utc>) -> Self {
        Self {
            readout,
            chip_id: None,
            payload: None,
            location: None,
            is_col: None,
            timestamp: None,
            tot_msb: None,
            tot_lsb: None,
            tot_total: None,
            tot_us: None,
            hittime,
        }
    }
}

impl From<&DecodedHit> for HitRecord {
    fn from(hit: &DecodedHit) -> Self {
        Self {
            readout: hit.readout_index,
            chip_id: Some(hit.chip_id),
            payload: Some(hit.payload),
            location: Some(hit.location),
            is_col: Some(hit.is_column),
            timestamp: Some(hit.timestamp),
            tot_msb: Some(hit.tot_msb),
            tot_lsb: Some(hit.tot_lsb),
            tot_total: Some(hit.tot_total),
            tot_us: Some(hit.tot_time_us),
            hittime: hit.capture_time,
        }
    }
}

/// Destination of decoded hits
pub trait HitSink {
    fn write_hit(&mut self, hit: &DecodedHit) -> Result<()>;

    /// Record a readout that could not be decoded
    fn write_failure(&mut self, readout_index: u64, capture_time: DateTime<Utc>) -> Result<()>;

    fn flush(&mut self) -> Result<()>;
}

/// CSV table of hits
pub struct CsvSink<W: Write> {
    writer: csv::Writer<W>,
}

impl CsvSink<File> {
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let writer = csv::Writer::from_path(path.as_ref())
            .with_context(|| format!("Failed to create CSV file: {}", path.as_ref().display()))?;
        Ok(Self { writer })
    }
}

impl<W: Write> CsvSink<W> {
    pub fn from_writer(inner: W) -> Self {
        Self {
            writer: csv::Writer::from_writer(inner),
        }
    }

    pub fn into_inner(self) -> Result<W> {
        self.writer
            .into_inner()
            .map_err(|e| anyhow::anyhow!("Failed to flush CSV output: {}", e.error()))
    }

    fn write_record(&mut self, record: &HitRecord) -> Result<()> {
        self.writer
            .serialize(record)
            .with_context(|| format!("Failed to write CSV row for readout {}", record.readout))
    }
}

impl<W: Write> HitSink for CsvSink<W> {
    fn write_hit(&mut self, hit: &DecodedHit) -> Result<()> {
        self.write_record(&HitRecord::from(hit))
    }

    fn write_failure(&mut self, readout_index: u64, capture_time: DateTime<Utc>) -> Result<()> {
        self.write_record(&HitRecord::failure(readout_index, capture_time))
    }

    fn flush(&mut self) -> Result<()> {
        self.writer.flush().context("Failed to flush CSV output")
    }
}

/// One JSON object per hit and line
pub struct JsonLinesSink<W: Write> {
    out: W,
}

impl<W: Write> JsonLinesSink<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> HitSink for JsonLinesSink<W> {
    fn write_hit(&mut self, hit: &DecodedHit) -> Result<()> {
        serde_json::to_writer(&mut self.out, hit).context("Failed to serialize hit as JSON")?;
        writeln!(self.out)?;
        Ok(())
    }

    fn write_failure(&mut self, _readout_index: u64, _capture_time: DateTime<Utc>) -> Result<()> {
        // failures only show up in the log
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.out.flush()?;
        Ok(())
    }
}

/// Fan out to every configured sink
#[derive(Default)]
pub struct Outputs {
    sinks: Vec<Box<dyn HitSink>>,
}

impl Outputs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, sink: Box<dyn HitSink>) {
        self.sinks.push(sink);
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl HitSink for Outputs {
    fn write_hit(&mut self, hit: &DecodedHit) -> Result<()> {
        for sink in &mut self.sinks {
            sink.write_hit(hit)?;
        }
        Ok(())
    }

    fn write_failure(&mut self, readout_index: u64, capture_time: DateTime<Utc>) -> Result<()> {
        for sink in &mut self.sinks {
            sink.write_failure(readout_index, capture_time)?;
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        for sink in &mut self.sinks {
            sink.flush()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use astropix::HitDecoder;
    use chrono::TimeZone;

    fn sample_hit() -> DecodedHit {
        let time = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        HitDecoder::default()
            .decode(&[0x08, 0x81, 0x05, 0x02, 0x30], 7, time)
            .unwrap()
    }

    #[test]
    fn test_csv_header_and_rows() {
        let mut sink = CsvSink::from_writer(Vec::new());
        let hit = sample_hit();
        sink.write_hit(&hit).unwrap();
        sink.write_failure(8, hit.capture_time).unwrap();

        let text = String::from_utf8(sink.into_inner().unwrap()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(
            lines[0],
            "readout,chip_id,payload,location,is_col,timestamp,tot_msb,tot_lsb,tot_total,tot_us,hittime"
        );
        assert!(lines[1].starts_with("7,1,0,1,true,5,2,48,560,2.8,2024-05-01T12:00:00"));
        assert!(lines[2].starts_with("8,,,,,,,,,,2024-05-01T12:00:00"));
        assert_eq!(lines.len(), 3);
    }

    #[test]
    fn test_json_lines() {
        let mut sink = JsonLinesSink::new(Vec::new());
        sink.write_hit(&sample_hit()).unwrap();
        sink.write_failure(8, Utc::now()).unwrap();

        let text = String::from_utf8(sink.into_inner()).unwrap();
        assert_eq!(text.lines().count(), 1);
        let value: serde_json::Value = serde_json::from_str(text.trim()).unwrap();
        assert_eq!(value["readout_index"], 7);
        assert_eq!(value["tot_total"], 560);
        assert_eq!(value["is_column"], true);
    }

    #[test]
    fn test_csv_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hits.csv");
        let mut sink = CsvSink::create(&path).unwrap();
        sink.write_hit(&sample_hit()).unwrap();
        sink.flush().unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 2);
    }
}
