//! miniSEED 2 record decoding.
//!
//! A record is a 48-byte fixed header, a chain of blockettes and a data
//! section. Blockette 1000 carries the data encoding, data word order and
//! record length; blockette 100 optionally overrides the nominal rate.

use super::steim;
use crate::core::{Scnl, Wave};
use crate::error::{WaveError, WaveResult};
use byteorder::{BigEndian, ByteOrder, LittleEndian};
use chrono::{DateTime, Datelike, NaiveDate, Timelike};
use serde::{Deserialize, Serialize};

pub const FIXED_HEADER_LEN: usize = 48;

/// Record length used by SeedLink
pub const SEEDLINK_RECORD_LEN: usize = 512;

const MAX_BLOCKETTES: usize = 32;
const ACTIVITY_TIME_CORRECTION_APPLIED: u8 = 0x02;

/// Data section encoding from blockette 1000
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Encoding {
    Ascii,
    Int16,
    Int32,
    Float32,
    Float64,
    Steim1,
    Steim2,
    Other(u8),
}

impl Encoding {
    pub fn from_code(code: u8) -> Self {
        match code {
            0 => Self::Ascii,
            1 => Self::Int16,
            3 => Self::Int32,
            4 => Self::Float32,
            5 => Self::Float64,
            10 => Self::Steim1,
            11 => Self::Steim2,
            other => Self::Other(other),
        }
    }

    pub fn code(&self) -> u8 {
        match self {
            Self::Ascii => 0,
            Self::Int16 => 1,
            Self::Int32 => 3,
            Self::Float32 => 4,
            Self::Float64 => 5,
            Self::Steim1 => 10,
            Self::Steim2 => 11,
            Self::Other(code) => *code,
        }
    }
}

/// Nominal sample rate from the header's factor and multiplier.
///
/// Each term contributes `|x|` when positive and `1/|x|` when negative.
/// A zero factor marks a record without samples and yields 0.
pub fn sample_rate(factor: i16, multiplier: i16) -> f64 {
    if factor == 0 {
        return 0.0;
    }
    let f = (factor as f64).abs().powi(factor.signum() as i32);
    let m = (multiplier as f64).abs().powi(multiplier.signum() as i32);
    f * m
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecordHeader {
    pub sequence: String,
    pub quality: char,
    pub station: String,
    pub location: String,
    pub channel: String,
    pub network: String,

    /// Corrected start time, seconds since the epoch
    pub start_time: f64,

    pub num_samples: u16,
    pub sample_rate_factor: i16,
    pub sample_rate_multiplier: i16,
    pub activity_flags: u8,
    pub time_correction: i32,
    pub data_offset: u16,
    pub encoding: Encoding,

    /// Byte order of the fixed header
    pub header_big_endian: bool,

    /// Byte order of the data section
    pub data_big_endian: bool,

    pub record_length: usize,

    /// Blockette 100 override
    pub actual_sample_rate: Option<f32>,
}

impl RecordHeader {
    pub fn sample_rate(&self) -> f64 {
        match self.actual_sample_rate {
            Some(rate) if rate.is_finite() && rate > 0.0 => rate as f64,
            _ => sample_rate(self.sample_rate_factor, self.sample_rate_multiplier),
        }
    }

    pub fn scnl(&self) -> Scnl {
        Scnl::new(&self.station, &self.channel, &self.network, &self.location)
    }

    /// Time just past the last sample
    pub fn end_time(&self) -> f64 {
        let rate = self.sample_rate();
        if rate > 0.0 {
            self.start_time + self.num_samples as f64 / rate
        } else {
            self.start_time
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Samples(Vec<i32>),
    Text(String),
    Empty,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DecodedRecord {
    pub header: RecordHeader,
    pub payload: Payload,
}

impl DecodedRecord {
    /// Sample buffer for data records; `None` for text or empty records
    pub fn to_wave(&self) -> WaveResult<Option<Wave>> {
        match &self.payload {
            Payload::Samples(samples) if !samples.is_empty() => {
                let rate = self.header.sample_rate();
                if rate <= 0.0 {
                    return Err(WaveError::decode(format!(
                        "Record {} has samples but no sample rate",
                        self.header.sequence
                    )));
                }
                Wave::new(rate, self.header.start_time, samples.clone()).map(Some)
            }
            _ => Ok(None),
        }
    }

    pub fn text(&self) -> Option<&str> {
        match &self.payload {
            Payload::Text(text) => Some(text),
            _ => None,
        }
    }
}

fn ascii_field(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).trim().to_string()
}

fn read_u16(bytes: &[u8], big_endian: bool) -> u16 {
    if big_endian {
        BigEndian::read_u16(bytes)
    } else {
        LittleEndian::read_u16(bytes)
    }
}

fn read_i16(bytes: &[u8], big_endian: bool) -> i16 {
    read_u16(bytes, big_endian) as i16
}

fn read_i32(bytes: &[u8], big_endian: bool) -> i32 {
    if big_endian {
        BigEndian::read_i32(bytes)
    } else {
        LittleEndian::read_i32(bytes)
    }
}

fn read_f32(bytes: &[u8], big_endian: bool) -> f32 {
    if big_endian {
        BigEndian::read_f32(bytes)
    } else {
        LittleEndian::read_f32(bytes)
    }
}

fn plausible_btime(year: u16, day: u16) -> bool {
    (1900..=2100).contains(&year) && (1..=366).contains(&day)
}

fn btime_to_epoch(record: &[u8], big_endian: bool) -> WaveResult<f64> {
    let year = read_u16(&record[20..22], big_endian);
    let day = read_u16(&record[22..24], big_endian);
    let (hour, minute, second) = (record[24], record[25], record[26]);
    let fract = read_u16(&record[28..30], big_endian);

    if hour > 23 || minute > 59 || second > 60 || fract > 9999 {
        return Err(WaveError::decode(format!(
            "Invalid start time {:02}:{:02}:{:02}.{:04}",
            hour, minute, second, fract
        )));
    }

    let midnight = NaiveDate::from_yo_opt(year as i32, day as u32)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .ok_or_else(|| WaveError::decode(format!("Invalid date {}.{:03}", year, day)))?
        .and_utc()
        .timestamp() as f64;

    Ok(midnight
        + hour as f64 * 3600.0
        + minute as f64 * 60.0
        + second as f64
        + fract as f64 * 1e-4)
}

/// Parse the fixed header and blockette chain
pub fn parse_header(record: &[u8]) -> WaveResult<RecordHeader> {
    if record.len() < FIXED_HEADER_LEN {
        return Err(WaveError::decode(format!(
            "Record of {} bytes is shorter than the fixed header",
            record.len()
        )));
    }

    let quality = record[6] as char;
    if !matches!(quality, 'D' | 'R' | 'Q' | 'M') {
        return Err(WaveError::decode(format!("Invalid quality indicator {:?}", quality)));
    }

    let big_endian = if plausible_btime(
        BigEndian::read_u16(&record[20..22]),
        BigEndian::read_u16(&record[22..24]),
    ) {
        true
    } else if plausible_btime(
        LittleEndian::read_u16(&record[20..22]),
        LittleEndian::read_u16(&record[22..24]),
    ) {
        false
    } else {
        return Err(WaveError::decode("Cannot determine header byte order"));
    };

    let mut start_time = btime_to_epoch(record, big_endian)?;
    let activity_flags = record[36];
    let time_correction = read_i32(&record[40..44], big_endian);
    if activity_flags & ACTIVITY_TIME_CORRECTION_APPLIED == 0 {
        start_time += time_correction as f64 * 1e-4;
    }

    let mut header = RecordHeader {
        sequence: ascii_field(&record[0..6]),
        quality,
        station: ascii_field(&record[8..13]),
        location: ascii_field(&record[13..15]),
        channel: ascii_field(&record[15..18]),
        network: ascii_field(&record[18..20]),
        start_time,
        num_samples: read_u16(&record[30..32], big_endian),
        sample_rate_factor: read_i16(&record[32..34], big_endian),
        sample_rate_multiplier: read_i16(&record[34..36], big_endian),
        activity_flags,
        time_correction,
        data_offset: read_u16(&record[44..46], big_endian),
        encoding: Encoding::Other(u8::MAX),
        header_big_endian: big_endian,
        data_big_endian: big_endian,
        record_length: 0,
        actual_sample_rate: None,
    };

    let mut found_1000 = false;
    let mut offset = read_u16(&record[46..48], big_endian) as usize;
    for _ in 0..MAX_BLOCKETTES {
        if offset < FIXED_HEADER_LEN || offset + 4 > record.len() {
            break;
        }
        let kind = read_u16(&record[offset..offset + 2], big_endian);
        let next = read_u16(&record[offset + 2..offset + 4], big_endian) as usize;

        match kind {
            1000 if offset + 8 <= record.len() => {
                header.encoding = Encoding::from_code(record[offset + 4]);
                header.data_big_endian = record[offset + 5] == 1;
                let exponent = record[offset + 6];
                if !(7..=20).contains(&exponent) {
                    return Err(WaveError::decode(format!(
                        "Invalid record length exponent {}",
                        exponent
                    )));
                }
                header.record_length = 1usize << exponent;
                found_1000 = true;
            }
            100 if offset + 8 <= record.len() => {
                header.actual_sample_rate = Some(read_f32(&record[offset + 4..offset + 8], big_endian));
            }
            1001 if offset + 6 <= record.len() => {
                header.start_time += (record[offset + 5] as i8) as f64 * 1e-6;
            }
            _ => {}
        }

        if next <= offset {
            break;
        }
        offset = next;
    }

    if !found_1000 {
        return Err(WaveError::decode(format!(
            "Record {} has no blockette 1000",
            header.sequence
        )));
    }
    Ok(header)
}

/// Decode one record including its data section
pub fn decode_record(record: &[u8]) -> WaveResult<DecodedRecord> {
    let header = parse_header(record)?;
    let count = header.num_samples as usize;
    if count == 0 {
        return Ok(DecodedRecord {
            header,
            payload: Payload::Empty,
        });
    }

    let end = header.record_length.min(record.len());
    let start = header.data_offset as usize;
    if start < FIXED_HEADER_LEN || start >= end {
        return Err(WaveError::decode(format!("Invalid data offset {}", start)));
    }
    let data = &record[start..end];
    let big_endian = header.data_big_endian;

    let need = |width: usize| -> WaveResult<()> {
        if data.len() < count * width {
            return Err(WaveError::decode(format!(
                "Data section of {} bytes too short for {} samples",
                data.len(),
                count
            )));
        }
        Ok(())
    };

    let payload = match header.encoding {
        Encoding::Ascii => {
            Payload::Text(String::from_utf8_lossy(&data[..count.min(data.len())]).into_owned())
        }
        Encoding::Int16 => {
            need(2)?;
            Payload::Samples(
                data.chunks_exact(2)
                    .take(count)
                    .map(|b| read_i16(b, big_endian) as i32)
                    .collect(),
            )
        }
        Encoding::Int32 => {
            need(4)?;
            Payload::Samples(
                data.chunks_exact(4)
                    .take(count)
                    .map(|b| read_i32(b, big_endian))
                    .collect(),
            )
        }
        Encoding::Steim1 => Payload::Samples(steim::decode_steim1(data, count, big_endian)?),
        Encoding::Steim2 => Payload::Samples(steim::decode_steim2(data, count, big_endian)?),
        other => {
            return Err(WaveError::decode(format!(
                "Unsupported data encoding {:?}",
                other
            )))
        }
    };

    Ok(DecodedRecord { header, payload })
}

/// Decode every record in a byte stream, skipping undecodable ones
pub fn decode_all(bytes: &[u8]) -> Vec<DecodedRecord> {
    let mut records = Vec::new();
    let mut offset = 0;
    let mut skipped = 0usize;

    while bytes.len() - offset >= FIXED_HEADER_LEN {
        let rest = &bytes[offset..];
        let length = match parse_header(rest) {
            Ok(header) => header.record_length,
            Err(_) => SEEDLINK_RECORD_LEN,
        };
        let record = &rest[..length.min(rest.len())];
        match decode_record(record) {
            Ok(decoded) => records.push(decoded),
            Err(e) => {
                skipped += 1;
                log::debug!("Skipping record at byte {}: {}", offset, e);
            }
        }
        offset += length;
        if offset >= bytes.len() {
            break;
        }
    }

    if skipped > 0 {
        log::warn!("Skipped {} undecodable record(s)", skipped);
    }
    records
}

/// Writes big-endian records with a single blockette 1000
#[derive(Debug, Clone)]
pub struct RecordBuilder {
    scnl: Scnl,
    start_time: f64,
    sample_rate: f64,
    encoding: Encoding,
    record_length: usize,
    sequence: u32,
}

const BUILDER_DATA_OFFSET: usize = 64;

impl RecordBuilder {
    pub fn new(scnl: &Scnl, start_time: f64, sample_rate: f64) -> Self {
        Self {
            scnl: scnl.clone(),
            start_time,
            sample_rate,
            encoding: Encoding::Int32,
            record_length: SEEDLINK_RECORD_LEN,
            sequence: 1,
        }
    }

    pub fn encoding(mut self, encoding: Encoding) -> Self {
        self.encoding = encoding;
        self
    }

    /// Must be a power of two of at least 128
    pub fn record_length(mut self, record_length: usize) -> Self {
        self.record_length = record_length;
        self
    }

    pub fn sequence(mut self, sequence: u32) -> Self {
        self.sequence = sequence;
        self
    }

    fn rate_factors(&self) -> WaveResult<(i16, i16)> {
        let rate = self.sample_rate;
        let integral = |x: f64| (x - x.round()).abs() < 1e-9 && x.round() <= i16::MAX as f64;

        if rate >= 1.0 && integral(rate) {
            return Ok((rate.round() as i16, 1));
        }
        if rate > 0.0 && rate < 1.0 && integral(1.0 / rate) {
            return Ok((-((1.0 / rate).round() as i16), 1));
        }
        for multiplier in [10i16, 100, 1000, 10000] {
            let scaled = rate * multiplier as f64;
            if integral(scaled) {
                return Ok((scaled.round() as i16, -multiplier));
            }
        }
        Err(WaveError::config(format!("Cannot express sample rate {} in a record header", rate)))
    }

    fn check_length(&self) -> WaveResult<usize> {
        if !self.record_length.is_power_of_two() || self.record_length < 128 {
            return Err(WaveError::config(format!("Invalid record length {}", self.record_length)));
        }
        Ok(self.record_length - BUILDER_DATA_OFFSET)
    }

    /// ASCII record as used for INFO responses and log channels
    pub fn build_text(&self, text: &str) -> WaveResult<Vec<u8>> {
        let data_len = self.check_length()?;
        if text.len() > data_len {
            return Err(WaveError::config(format!(
                "{} bytes of text do not fit in a {} byte record",
                text.len(),
                self.record_length
            )));
        }
        self.assemble(Encoding::Ascii, text.len(), (0, 0), text.as_bytes())
    }

    pub fn build(&self, samples: &[i32]) -> WaveResult<Vec<u8>> {
        let data_len = self.check_length()?;
        let factors = self.rate_factors()?;

        let data = match self.encoding {
            Encoding::Int16 | Encoding::Int32 => {
                let width = if self.encoding == Encoding::Int16 { 2 } else { 4 };
                if samples.len() * width > data_len {
                    return Err(WaveError::config(format!(
                        "{} samples do not fit in a {} byte record",
                        samples.len(),
                        self.record_length
                    )));
                }
                let mut data = vec![0u8; samples.len() * width];
                for (i, &s) in samples.iter().enumerate() {
                    if width == 2 {
                        BigEndian::write_i16(&mut data[i * 2..i * 2 + 2], s as i16);
                    } else {
                        BigEndian::write_i32(&mut data[i * 4..i * 4 + 4], s);
                    }
                }
                data
            }
            Encoding::Steim1 => steim::encode_steim1(samples, data_len / 64)?,
            other => {
                return Err(WaveError::config(format!("Cannot encode {:?} records", other)));
            }
        };
        self.assemble(self.encoding, samples.len(), factors, &data)
    }

    fn assemble(
        &self,
        encoding: Encoding,
        count: usize,
        (factor, multiplier): (i16, i16),
        data: &[u8],
    ) -> WaveResult<Vec<u8>> {
        let secs = self.start_time.floor();
        let mut fract = ((self.start_time - secs) * 10_000.0).round() as u16;
        let mut secs = secs as i64;
        if fract >= 10_000 {
            secs += 1;
            fract = 0;
        }
        let time = DateTime::from_timestamp(secs, 0)
            .ok_or_else(|| WaveError::config(format!("Start time {} out of range", self.start_time)))?;

        let mut record = vec![0u8; self.record_length];
        let padded = |s: &str, width: usize| format!("{:<width$}", s, width = width).into_bytes();
        record[0..6].copy_from_slice(format!("{:06}", self.sequence % 1_000_000).as_bytes());
        record[6] = b'D';
        record[7] = b' ';
        record[8..13].copy_from_slice(&padded(&self.scnl.station, 5)[..5]);
        record[13..15].copy_from_slice(&padded(self.scnl.wire_location(), 2)[..2]);
        record[15..18].copy_from_slice(&padded(&self.scnl.channel, 3)[..3]);
        record[18..20].copy_from_slice(&padded(&self.scnl.network, 2)[..2]);

        BigEndian::write_u16(&mut record[20..22], time.year() as u16);
        BigEndian::write_u16(&mut record[22..24], time.ordinal() as u16);
        record[24] = time.hour() as u8;
        record[25] = time.minute() as u8;
        record[26] = time.second() as u8;
        BigEndian::write_u16(&mut record[28..30], fract);

        BigEndian::write_u16(&mut record[30..32], count as u16);
        BigEndian::write_i16(&mut record[32..34], factor);
        BigEndian::write_i16(&mut record[34..36], multiplier);
        record[39] = 1;
        BigEndian::write_u16(&mut record[44..46], BUILDER_DATA_OFFSET as u16);
        BigEndian::write_u16(&mut record[46..48], FIXED_HEADER_LEN as u16);

        BigEndian::write_u16(&mut record[48..50], 1000);
        record[52] = encoding.code();
        record[53] = 1;
        record[54] = self.record_length.trailing_zeros() as u8;

        record[BUILDER_DATA_OFFSET..BUILDER_DATA_OFFSET + data.len()].copy_from_slice(data);
        Ok(record)
    }
}
