use super::miniseed::{self, DecodedRecord};
use crate::core::Scnl;
use crate::error::WaveResult;
use std::collections::HashMap;

/// Stateful record decoder shared by one streaming session.
///
/// Tracks where each stream is expected to continue so gaps and overlaps
/// can be reported. The state grows with every stream seen, so the session
/// calls `reset` periodically.
#[derive(Debug, Default)]
pub struct PacketDecoder {
    records: u64,
    discontinuities: u64,
    expected_next: HashMap<Scnl, f64>,
}

impl PacketDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode one record. Every call counts toward housekeeping, failed or not.
    pub fn decode(&mut self, record: &[u8]) -> WaveResult<DecodedRecord> {
        self.records += 1;
        let decoded = miniseed::decode_record(record)?;

        let header = &decoded.header;
        let rate = header.sample_rate();
        if header.num_samples > 0 && rate > 0.0 {
            let scnl = header.scnl();
            if let Some(expected) = self.expected_next.get(&scnl) {
                let drift = header.start_time - expected;
                if drift.abs() > 0.5 / rate {
                    self.discontinuities += 1;
                    log::debug!(
                        "{} {} of {:.3} s at {}",
                        scnl,
                        if drift > 0.0 { "gap" } else { "overlap" },
                        drift.abs(),
                        header.start_time
                    );
                }
            }
            self.expected_next.insert(scnl, header.end_time());
        }

        Ok(decoded)
    }

    pub fn records_processed(&self) -> u64 {
        self.records
    }

    pub fn discontinuities(&self) -> u64 {
        self.discontinuities
    }

    pub fn tracked_streams(&self) -> usize {
        self.expected_next.len()
    }

    /// Drop per-stream continuity state and counters
    pub fn reset(&mut self) {
        self.records = 0;
        self.discontinuities = 0;
        self.expected_next.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::seedlink::miniseed::RecordBuilder;

    #[test]
    fn test_continuity_tracking() {
        let scnl = Scnl::new("ANMO", "BHZ", "IU", "00");
        let mut decoder = PacketDecoder::new();

        let a = RecordBuilder::new(&scnl, 1000.0, 1.0).build(&[1; 10]).unwrap();
        let b = RecordBuilder::new(&scnl, 1010.0, 1.0).build(&[1; 10]).unwrap();
        let c = RecordBuilder::new(&scnl, 1030.0, 1.0).build(&[1; 10]).unwrap();

        decoder.decode(&a).unwrap();
        decoder.decode(&b).unwrap();
        assert_eq!(decoder.discontinuities(), 0);
        decoder.decode(&c).unwrap();
        assert_eq!(decoder.discontinuities(), 1);
        assert_eq!(decoder.records_processed(), 3);
        assert_eq!(decoder.tracked_streams(), 1);

        decoder.reset();
        assert_eq!(decoder.records_processed(), 0);
        assert_eq!(decoder.tracked_streams(), 0);
    }

    #[test]
    fn test_failed_decode_still_counts() {
        let scnl = Scnl::new("ANMO", "BHZ", "IU", "00");
        let mut decoder = PacketDecoder::new();
        assert!(decoder.decode(&[0u8; 512]).is_err());
        assert_eq!(decoder.records_processed(), 1);
        assert_eq!(decoder.tracked_streams(), 0);

        let good = RecordBuilder::new(&scnl, 1000.0, 1.0).build(&[1; 10]).unwrap();
        decoder.decode(&good).unwrap();
        assert_eq!(decoder.records_processed(), 2);
    }
}
