/*!
Hit field decoding.

Frame layout (after per-byte bit reversal):

| Byte | Bits | Field                                  |
|------|------|----------------------------------------|
| 0    | 7-3  | chip id                                |
| 0    | 2-0  | payload                                |
| 1    | 7    | 1 = location is a column, 0 = a row    |
| 1    | 6    | reserved                               |
| 1    | 5-0  | location (row or column index)         |
| 2    | 7-0  | timestamp                              |
| 3    | 3-0  | ToT MSB (bits 7-4 are zero)            |
| 4    | 7-0  | ToT LSB                                |
*/

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{AsicError, Result};
use crate::protocol::{BYTES_PER_HIT, DEFAULT_SAMPLE_CLOCK_PERIOD_NS};
use crate::readout::{extract_frames, ExtractOptions};

/// One decoded hit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecodedHit {
    pub readout_index: u64,
    pub chip_id: u8,
    pub payload: u8,
    pub location: u8,
    pub is_column: bool,
    pub timestamp: u8,
    pub tot_msb: u8,
    pub tot_lsb: u8,
    pub tot_total: u16,
    pub tot_time_us: f64,
    pub capture_time: DateTime<Utc>,
}

impl DecodedHit {
    /// "Row" or "Col", as printed in hit logs
    pub fn axis(&self) -> &'static str {
        if self.is_column {
            "Col"
        } else {
            "Row"
        }
    }
}

/// Decode a single frame. Pure function of its inputs.
pub fn decode_frame(
    frame: &[u8],
    readout_index: u64,
    sample_clock_period_ns: f64,
    capture_time: DateTime<Utc>,
) -> Result<DecodedHit> {
    let bytes: &[u8; BYTES_PER_HIT] = frame.try_into().map_err(|_| AsicError::MalformedFrame {
        readout_index,
        len: frame.len(),
        expected: BYTES_PER_HIT,
    })?;

    let tot_msb = bytes[3] & 0b1111;
    let tot_lsb = bytes[4];
    let tot_total = (u16::from(tot_msb) << 8) | u16::from(tot_lsb);

    Ok(DecodedHit {
        readout_index,
        chip_id: bytes[0] >> 3,
        payload: bytes[0] & 0b111,
        location: bytes[1] & 0b0011_1111,
        is_column: (bytes[1] >> 7) & 1 == 1,
        timestamp: bytes[2],
        tot_msb,
        tot_lsb,
        tot_total,
        tot_time_us: f64::from(tot_total) * sample_clock_period_ns / 1000.0,
        capture_time,
    })
}

/// Readout decoder: frame extraction settings, sample clock and hit logging
#[derive(Debug, Clone)]
pub struct HitDecoder {
    pub sample_clock_period_ns: f64,
    pub extract: ExtractOptions,
    pub log_hits: bool,
}

impl HitDecoder {
    pub fn new(sample_clock_period_ns: f64) -> Self {
        Self {
            sample_clock_period_ns,
            extract: ExtractOptions::default(),
            log_hits: false,
        }
    }

    pub fn with_extract_options(mut self, extract: ExtractOptions) -> Self {
        self.extract = extract;
        self
    }

    pub fn with_hit_logging(mut self, log_hits: bool) -> Self {
        self.log_hits = log_hits;
        self
    }

    /// Decode one frame, emitting the diagnostic line if enabled
    pub fn decode(&self, frame: &[u8], readout_index: u64, capture_time: DateTime<Utc>) -> Result<DecodedHit> {
        let hit = decode_frame(frame, readout_index, self.sample_clock_period_ns, capture_time)?;
        if self.log_hits {
            info!(
                "Header: ChipId: {}\tPayload: {}\tLocation: {}\tRow/Col: {}\tTimestamp: {}\tToT: MSB: {}\tLSB: {} Total: {} ({} us)",
                hit.chip_id,
                hit.payload,
                hit.location,
                hit.axis(),
                hit.timestamp,
                hit.tot_msb,
                hit.tot_lsb,
                hit.tot_total,
                hit.tot_time_us
            );
        }
        Ok(hit)
    }

    /// Extract and decode every frame of a readout buffer, stamping all hits
    /// with the same capture time.
    ///
    /// The readout succeeds or fails as a whole: the first failure aborts it
    /// and the hits already decoded from earlier frames are dropped. Iterate
    /// [`extract_frames`] directly to keep the frames before a truncated tail.
    pub fn decode_readout_at(
        &self,
        raw: &[u8],
        readout_index: u64,
        capture_time: DateTime<Utc>,
    ) -> Result<Vec<DecodedHit>> {
        extract_frames(raw, &self.extract, readout_index)
            .map(|frame| self.decode(frame?.as_bytes(), readout_index, capture_time))
            .collect()
    }

    /// [`decode_readout_at`](Self::decode_readout_at) with the current time
    pub fn decode_readout(&self, raw: &[u8], readout_index: u64) -> Result<Vec<DecodedHit>> {
        self.decode_readout_at(raw, readout_index, Utc::now())
    }
}

impl Default for HitDecoder {
    fn default() -> Self {
        Self::new(DEFAULT_SAMPLE_CLOCK_PERIOD_NS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_fields() {
        let hit = decode_frame(&[0x08, 0x81, 0x05, 0x02, 0x30], 3, 5.0, Utc::now()).unwrap();

        assert_eq!(hit.readout_index, 3);
        assert_eq!(hit.chip_id, 1);
        assert_eq!(hit.payload, 0);
        assert_eq!(hit.location, 1);
        assert!(hit.is_column);
        assert_eq!(hit.axis(), "Col");
        assert_eq!(hit.timestamp, 5);
        assert_eq!(hit.tot_msb, 2);
        assert_eq!(hit.tot_lsb, 0x30);
        assert_eq!(hit.tot_total, 560);
        assert!((hit.tot_time_us - 2.8).abs() < 1e-9);
    }

    #[test]
    fn test_masks_ignore_reserved_bits() {
        let hit = decode_frame(&[0xFF, 0x7F, 0xFF, 0xFF, 0xFF], 0, 10.0, Utc::now()).unwrap();
        assert_eq!(hit.chip_id, 31);
        assert_eq!(hit.payload, 7);
        assert_eq!(hit.location, 63);
        assert!(!hit.is_column);
        assert_eq!(hit.tot_total, 0xFFF);
        assert!((hit.tot_time_us - 40.95).abs() < 1e-9);
    }

    #[test]
    fn test_malformed_frame() {
        let err = decode_frame(&[0x08, 0x81, 0x05], 9, 5.0, Utc::now()).unwrap_err();
        assert!(matches!(err, AsicError::MalformedFrame { readout_index: 9, len: 3, expected: 5 }));
        assert_eq!(err.readout_index(), Some(9));
    }

    #[test]
    fn test_decode_readout() {
        let decoder = HitDecoder::default().with_hit_logging(true);
        let raw = [0xBC, 0x10, 0x81, 0xA0, 0x40, 0x0C, 0xBC, 0xBC];
        let now = Utc::now();
        let hits = decoder.decode_readout_at(&raw, 12, now).unwrap();

        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].readout_index, 12);
        assert_eq!(hits[0].tot_total, 560);
        assert_eq!(hits[0].capture_time, now);
    }

    #[test]
    fn test_decode_readout_reports_truncation() {
        let decoder = HitDecoder::default();
        let raw = [0x10, 0x81, 0xA0, 0x40, 0x0C, 0x11, 0x22, 0x33];
        let err = decoder.decode_readout(&raw, 4).unwrap_err();
        assert!(matches!(err, AsicError::TruncatedFrame { readout_index: 4, remaining: 3, .. }));

        // frames ahead of the tail are still reachable through the extractor
        let salvaged: Vec<_> = extract_frames(&raw, &decoder.extract, 4)
            .map_while(|frame| frame.ok())
            .map(|frame| decoder.decode(frame.as_bytes(), 4, Utc::now()).unwrap())
            .collect();
        assert_eq!(salvaged.len(), 1);
        assert_eq!(salvaged[0].tot_total, 560);
    }
}
