//! Decoder for the Heart Rate Measurement characteristic value.
//!
//! Layout (little-endian):
//!
//! ```text
//! ┌───────┬──────────────┬─────────────────┬──────────────────────┐
//! │ flags │ heart rate   │ energy expended │ RR intervals         │
//! │ u8    │ u8 or u16    │ u16 (bit 3)     │ u16 * n (bit 4)      │
//! └───────┴──────────────┴─────────────────┴──────────────────────┘
//! ```
//!
//! RR intervals are transmitted in units of 1/1024 s and converted to
//! milliseconds here.

use serde::{Deserialize, Serialize};

const FLAG_HR_U16: u8 = 0x01;
const FLAG_CONTACT_DETECTED: u8 = 0x02;
const FLAG_CONTACT_SUPPORTED: u8 = 0x04;
const FLAG_ENERGY_PRESENT: u8 = 0x08;
const FLAG_RR_PRESENT: u8 = 0x10;

/// Skin contact status reported in flags bits 1 and 2.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorContact {
    #[default]
    Unsupported,
    NotDetected,
    Detected,
}

/// One decoded measurement notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecodedSample {
    /// Heart rate in beats per minute
    pub heart_rate_bpm: u16,
    /// Beat-to-beat intervals in milliseconds, in arrival order
    pub rr_intervals_ms: Vec<u16>,
    /// Cumulative energy expended (kJ), when the sensor reports it
    pub energy_expended: Option<u16>,
    /// Skin contact status
    pub sensor_contact: SensorContact,
}

impl DecodedSample {
    pub fn has_rr_intervals(&self) -> bool {
        !self.rr_intervals_ms.is_empty()
    }
}

/// Errors produced while decoding a measurement frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// The frame had no bytes at all.
    Empty,
    /// The flags declared a field whose bytes are missing.
    Truncated { needed: usize, available: usize },
}

impl std::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DecodeError::Empty => write!(f, "Empty measurement frame"),
            DecodeError::Truncated { needed, available } => write!(
                f,
                "Truncated measurement frame: need {needed} bytes, have {available}"
            ),
        }
    }
}

impl std::error::Error for DecodeError {}

/// Decode a raw measurement frame.
pub fn decode(buffer: &[u8]) -> Result<DecodedSample, DecodeError> {
    let (&flags, _) = buffer.split_first().ok_or(DecodeError::Empty)?;
    let mut offset = 1;

    let heart_rate_bpm = if flags & FLAG_HR_U16 != 0 {
        let value = read_u16(buffer, offset)?;
        offset += 2;
        value
    } else {
        let value = *buffer.get(offset).ok_or(DecodeError::Truncated {
            needed: offset + 1,
            available: buffer.len(),
        })?;
        offset += 1;
        u16::from(value)
    };

    let sensor_contact = if flags & FLAG_CONTACT_SUPPORTED == 0 {
        SensorContact::Unsupported
    } else if flags & FLAG_CONTACT_DETECTED != 0 {
        SensorContact::Detected
    } else {
        SensorContact::NotDetected
    };

    let energy_expended = if flags & FLAG_ENERGY_PRESENT != 0 {
        let value = read_u16(buffer, offset)?;
        offset += 2;
        Some(value)
    } else {
        None
    };

    let rr_intervals_ms = if flags & FLAG_RR_PRESENT != 0 {
        // A dangling odd byte at the end is not an interval and is skipped.
        buffer[offset..]
            .chunks_exact(2)
            .map(|pair| rr_to_millis(u16::from_le_bytes([pair[0], pair[1]])))
            .collect()
    } else {
        Vec::new()
    };

    Ok(DecodedSample {
        heart_rate_bpm,
        rr_intervals_ms,
        energy_expended,
        sensor_contact,
    })
}

/// Convert a raw 1/1024 s interval to milliseconds, rounding half up.
pub fn rr_to_millis(raw: u16) -> u16 {
    ((u32::from(raw) * 1000 + 512) / 1024) as u16
}

fn read_u16(buffer: &[u8], offset: usize) -> Result<u16, DecodeError> {
    match buffer.get(offset..offset + 2) {
        Some(bytes) => Ok(u16::from_le_bytes([bytes[0], bytes[1]])),
        None => Err(DecodeError::Truncated {
            needed: offset + 2,
            available: buffer.len(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_u8_heart_rate_with_rr() {
        let sample = decode(&[0x10, 0x4B, 0x4B, 0x00, 0xA0, 0x03]).unwrap();
        assert_eq!(sample.heart_rate_bpm, 75);
        // 0x004B -> 73 ms, 0x03A0 = 928 -> 906 ms
        assert_eq!(sample.rr_intervals_ms, vec![73, 906]);
        assert_eq!(sample.energy_expended, None);
    }

    #[test]
    fn test_u16_heart_rate_without_rr() {
        let sample = decode(&[0x01, 0x4B, 0x00]).unwrap();
        assert_eq!(sample.heart_rate_bpm, 75);
        assert!(sample.rr_intervals_ms.is_empty());
        assert!(!sample.has_rr_intervals());
    }

    #[test]
    fn test_u16_heart_rate_uses_high_byte() {
        let sample = decode(&[0x01, 0x2C, 0x01]).unwrap();
        assert_eq!(sample.heart_rate_bpm, 300);
    }

    #[test]
    fn test_empty_and_truncated() {
        assert_eq!(decode(&[]), Err(DecodeError::Empty));
        assert_eq!(
            decode(&[0x01, 0x4B]),
            Err(DecodeError::Truncated {
                needed: 3,
                available: 2
            })
        );
        assert!(matches!(
            decode(&[0x00]),
            Err(DecodeError::Truncated { .. })
        ));
    }

    #[test]
    fn test_energy_field_is_read_before_rr() {
        // flags: energy + rr, hr 60, energy 0x0102, rr 1024 (= 1000 ms)
        let sample = decode(&[0x18, 60, 0x02, 0x01, 0x00, 0x04]).unwrap();
        assert_eq!(sample.heart_rate_bpm, 60);
        assert_eq!(sample.energy_expended, Some(0x0102));
        assert_eq!(sample.rr_intervals_ms, vec![1000]);
    }

    #[test]
    fn test_energy_declared_but_missing() {
        assert!(matches!(
            decode(&[0x08, 60, 0x01]),
            Err(DecodeError::Truncated {
                needed: 4,
                available: 3
            })
        ));
    }

    #[test]
    fn test_rr_flag_with_no_intervals_and_odd_tail() {
        let sample = decode(&[0x10, 70]).unwrap();
        assert!(sample.rr_intervals_ms.is_empty());

        let sample = decode(&[0x10, 70, 0x00, 0x04, 0x7F]).unwrap();
        assert_eq!(sample.rr_intervals_ms, vec![1000]);
    }

    #[test]
    fn test_sensor_contact_bits() {
        assert_eq!(
            decode(&[0x00, 70]).unwrap().sensor_contact,
            SensorContact::Unsupported
        );
        assert_eq!(
            decode(&[0x04, 70]).unwrap().sensor_contact,
            SensorContact::NotDetected
        );
        assert_eq!(
            decode(&[0x06, 70]).unwrap().sensor_contact,
            SensorContact::Detected
        );
    }

    #[test]
    fn test_rr_rounding() {
        assert_eq!(rr_to_millis(928), 906);
        assert_eq!(rr_to_millis(1024), 1000);
        // 1 / 1024 s = 0.977 ms
        assert_eq!(rr_to_millis(1), 1);
        assert_eq!(rr_to_millis(u16::MAX), 63_999);
    }
}
