use crate::error::{WaveError, WaveResult};
use byteorder::{BigEndian, ByteOrder, LittleEndian};

const FRAME_LEN: usize = 64;
const WORDS_PER_FRAME: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Level {
    Steim1,
    Steim2,
}

pub fn decode_steim1(data: &[u8], num_samples: usize, big_endian: bool) -> WaveResult<Vec<i32>> {
    decode(data, num_samples, big_endian, Level::Steim1)
}

pub fn decode_steim2(data: &[u8], num_samples: usize, big_endian: bool) -> WaveResult<Vec<i32>> {
    decode(data, num_samples, big_endian, Level::Steim2)
}

/// Sign-extend the low `bits` bits of `value`
fn extend(value: u32, bits: u32) -> i32 {
    let shift = 32 - bits;
    ((value << shift) as i32) >> shift
}

fn unpack(word: u32, shifts: &[u32], bits: u32, out: &mut Vec<i32>) {
    let mask = (1u32 << bits) - 1;
    for &shift in shifts {
        out.push(extend((word >> shift) & mask, bits));
    }
}

fn decode(data: &[u8], num_samples: usize, big_endian: bool, level: Level) -> WaveResult<Vec<i32>> {
    if num_samples == 0 {
        return Ok(Vec::new());
    }

    let read = |buf: &[u8]| {
        if big_endian {
            BigEndian::read_u32(buf)
        } else {
            LittleEndian::read_u32(buf)
        }
    };

    let mut diffs: Vec<i32> = Vec::with_capacity(num_samples + 8);
    let mut first = None;
    let mut last = 0i32;

    for (f, frame) in data.chunks_exact(FRAME_LEN).enumerate() {
        if diffs.len() >= num_samples {
            break;
        }
        let nibbles = read(&frame[0..4]);

        for w in 1..WORDS_PER_FRAME {
            let word = read(&frame[w * 4..w * 4 + 4]);
            if f == 0 && w == 1 {
                first = Some(word as i32);
                continue;
            }
            if f == 0 && w == 2 {
                last = word as i32;
                continue;
            }

            let nibble = (nibbles >> (30 - 2 * w as u32)) & 0x3;
            match (level, nibble) {
                (_, 0) => {}
                (_, 1) => unpack(word, &[24, 16, 8, 0], 8, &mut diffs),
                (Level::Steim1, 2) => unpack(word, &[16, 0], 16, &mut diffs),
                (Level::Steim1, 3) => diffs.push(word as i32),
                (Level::Steim2, 2) => match word >> 30 {
                    1 => unpack(word, &[0], 30, &mut diffs),
                    2 => unpack(word, &[15, 0], 15, &mut diffs),
                    3 => unpack(word, &[20, 10, 0], 10, &mut diffs),
                    _ => return Err(WaveError::decode("Invalid Steim2 sub-code 0 for nibble 2")),
                },
                (Level::Steim2, 3) => match word >> 30 {
                    0 => unpack(word, &[24, 18, 12, 6, 0], 6, &mut diffs),
                    1 => unpack(word, &[25, 20, 15, 10, 5, 0], 5, &mut diffs),
                    2 => unpack(word, &[24, 20, 16, 12, 8, 4, 0], 4, &mut diffs),
                    _ => return Err(WaveError::decode("Invalid Steim2 sub-code 3 for nibble 3")),
                },
                _ => unreachable!("nibble is two bits"),
            }
        }
    }

    let first = first.ok_or_else(|| WaveError::decode("Steim data shorter than one frame"))?;
    if diffs.len() < num_samples {
        return Err(WaveError::decode(format!(
            "Steim data holds {} differences, header promises {} samples",
            diffs.len(),
            num_samples
        )));
    }

    // The first difference is relative to the previous record and is skipped
    let mut samples = Vec::with_capacity(num_samples);
    samples.push(first);
    for &d in &diffs[1..num_samples] {
        let prev = *samples.last().unwrap_or(&first);
        samples.push(prev.wrapping_add(d));
    }

    if samples.last() != Some(&last) {
        log::debug!(
            "Steim reverse integration constant mismatch: {} vs {:?}",
            last,
            samples.last()
        );
    }
    Ok(samples)
}

/// Pack samples as Steim1 frames; fails if they do not fit in `frames`
pub fn encode_steim1(samples: &[i32], frames: usize) -> WaveResult<Vec<u8>> {
    let mut out = vec![0u8; frames * FRAME_LEN];
    if samples.is_empty() {
        return Ok(out);
    }

    let mut diffs = Vec::with_capacity(samples.len());
    diffs.push(0i32);
    for pair in samples.windows(2) {
        diffs.push(pair[1].wrapping_sub(pair[0]));
    }

    let fits = |d: &[i32], bits: u32| {
        let lo = -(1i64 << (bits - 1));
        let hi = (1i64 << (bits - 1)) - 1;
        d.iter().all(|&v| (lo..=hi).contains(&(v as i64)))
    };

    let mut idx = 0;
    for f in 0..frames {
        let base = f * FRAME_LEN;
        let mut nibbles = 0u32;
        for w in 1..WORDS_PER_FRAME {
            let at = base + w * 4;
            if f == 0 && w == 1 {
                BigEndian::write_i32(&mut out[at..at + 4], samples[0]);
                continue;
            }
            if f == 0 && w == 2 {
                BigEndian::write_i32(&mut out[at..at + 4], samples[samples.len() - 1]);
                continue;
            }
            if idx >= diffs.len() {
                continue;
            }

            let rest = &diffs[idx..];
            let (nibble, word, used) = if rest.len() >= 4 && fits(&rest[..4], 8) {
                let word = rest[..4]
                    .iter()
                    .fold(0u32, |acc, &d| (acc << 8) | (d as u32 & 0xFF));
                (1, word, 4)
            } else if rest.len() >= 2 && fits(&rest[..2], 16) {
                let word = ((rest[0] as u32 & 0xFFFF) << 16) | (rest[1] as u32 & 0xFFFF);
                (2, word, 2)
            } else {
                (3, rest[0] as u32, 1)
            };
            BigEndian::write_u32(&mut out[at..at + 4], word);
            nibbles |= nibble << (30 - 2 * w as u32);
            idx += used;
        }
        BigEndian::write_u32(&mut out[base..base + 4], nibbles);
    }

    if idx < diffs.len() {
        return Err(WaveError::decode(format!(
            "{} samples do not fit in {} Steim1 frames",
            samples.len(),
            frames
        )));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(words: [u32; 16]) -> Vec<u8> {
        let mut buf = vec![0u8; FRAME_LEN];
        for (i, w) in words.iter().enumerate() {
            BigEndian::write_u32(&mut buf[i * 4..i * 4 + 4], *w);
        }
        buf
    }

    #[test]
    fn test_steim1_byte_differences() {
        // w3: four 8-bit diffs (0, 1, -2, 3) -> 10, 11, 9, 12
        let mut words = [0u32; 16];
        words[0] = 1 << (30 - 6);
        words[1] = 10;
        words[2] = 12;
        words[3] = 0x00_01_FE_03;
        let samples = decode_steim1(&frame(words), 4, true).unwrap();
        assert_eq!(samples, vec![10, 11, 9, 12]);
    }

    #[test]
    fn test_steim1_mixed_widths() {
        let mut words = [0u32; 16];
        // w3 two 16-bit, w4 one 32-bit
        words[0] = (2 << (30 - 6)) | (3 << (30 - 8));
        words[1] = 100;
        words[2] = (100i32 - 300 + 70_000) as u32;
        words[3] = -300i32 as u32 & 0xFFFF;
        words[4] = 70_000;
        let samples = decode_steim1(&frame(words), 3, true).unwrap();
        assert_eq!(samples, vec![100, -200, 69_800]);
    }

    #[test]
    fn test_steim2_sub_codes() {
        let mut words = [0u32; 16];
        // w3: nibble 2 / dnib 3 -> three 10-bit diffs (0, -5, 7)
        // w4: nibble 3 / dnib 2 -> seven 4-bit diffs (1, -1, 2, -2, 3, -3, 0)
        words[0] = (2 << (30 - 6)) | (3 << (30 - 8));
        words[1] = 50;
        words[2] = 52;
        words[3] = (3 << 30) | ((-5i32 as u32 & 0x3FF) << 10) | 7;
        let nib4 = [1i32, -1, 2, -2, 3, -3, 0]
            .iter()
            .fold(0u32, |acc, &d| (acc << 4) | (d as u32 & 0xF));
        words[4] = (2 << 30) | nib4;
        let samples = decode_steim2(&frame(words), 10, true).unwrap();
        assert_eq!(samples, vec![50, 45, 52, 53, 52, 54, 52, 55, 52, 52]);
    }

    #[test]
    fn test_truncated_data_is_error() {
        let mut words = [0u32; 16];
        words[0] = 1 << (30 - 6);
        words[1] = 1;
        words[3] = 0;
        assert!(decode_steim1(&frame(words), 100, true).is_err());
        assert!(decode_steim1(&[0u8; 10], 1, true).is_err());
    }

    #[test]
    fn test_encoder_output_decodes() {
        let samples: Vec<i32> = (0..200).map(|i| ((i * 37) % 101 - 50) * (i % 7) * 1000).collect();
        let packed = encode_steim1(&samples, 15).unwrap();
        assert_eq!(decode_steim1(&packed, samples.len(), true).unwrap(), samples);
        assert!(encode_steim1(&samples, 1).is_err());
    }
}
