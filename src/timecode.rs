//! Packet source time decoding from the secondary header.
//!
//! The space packet layer does not define a secondary header format, so time decoding is
//! left to the mission. [CdsTimeDecoder] handles the common day segmented format.
//!
//! Reference: [CCSDS Time Code Formats](https://public.ccsds.org/Pubs/301x0b4e1.pdf)
use chrono::{DateTime, Utc};

use crate::{Error, Result};

/// Decodes a packet's source time from its secondary header bytes.
pub trait TimeDecoder {
    /// # Errors
    /// When the secondary header does not contain a valid time.
    fn decode_time(&self, secondary_header: &[u8]) -> Result<DateTime<Utc>>;
}

/// CCSDS Day Segmented timecode with no P-field, a 2 byte day, 4 bytes of millisecond of
/// day and 2 bytes of microsecond of millisecond.
#[derive(Debug, Clone, Default)]
pub struct CdsTimeDecoder {
    /// Offset of the timecode in the secondary header.
    pub offset: usize,
}

impl CdsTimeDecoder {
    /// Seconds between Unix epoch(1970) and CDS epoch(1958)
    pub const EPOCH_DELTA: i64 = 378_691_200;
    pub const LEN: usize = 8;
}

impl TimeDecoder for CdsTimeDecoder {
    fn decode_time(&self, secondary_header: &[u8]) -> Result<DateTime<Utc>> {
        let minimum = self.offset + Self::LEN;
        if secondary_header.len() < minimum {
            return Err(Error::NotEnoughData {
                actual: secondary_header.len(),
                minimum,
            });
        }
        let buf = &secondary_header[self.offset..minimum];
        let days = i64::from(u16::from_be_bytes([buf[0], buf[1]]));
        let millis = i64::from(u32::from_be_bytes([buf[2], buf[3], buf[4], buf[5]]));
        let micros = i64::from(u16::from_be_bytes([buf[6], buf[7]]));
        if micros > 999 {
            return Err(Error::Timecode(format!(
                "microseconds of millisecond out of range: {micros}"
            )));
        }

        let secs = days * 86_400 + millis / 1000 - Self::EPOCH_DELTA;
        let nanos = (millis % 1000) * 1_000_000 + micros * 1000;
        // leap second millis (>= 86_400_000) are folded into the next day
        DateTime::<Utc>::from_timestamp(secs, nanos as u32)
            .ok_or_else(|| Error::Timecode(format!("days={days} millis={millis} out of range")))
    }
}
