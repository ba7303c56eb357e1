//! TM transfer frames.
//!
//! Reference: CCSDS TM Space Data Link Protocol 132.0-B-3
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::spacepacket::{check_range, Provenance};
use crate::{Error, Result};

pub type SCID = u16;
pub type VCID = u8;

/// TM transfer frame primary header.
///
/// Packed MSB first, big-endian:
///
/// ```text
/// | version:2 | scid:10 | vcid:3 | ocf:1 |
/// | master channel count:8 | virtual channel count:8 |
/// | sec hdr:1 | sync:1 | packet order:1 | segment length id:2 | first header pointer:11 |
/// ```
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone, Copy)]
pub struct FrameHeader {
    pub version: u8,
    pub scid: SCID,
    pub vcid: VCID,
    /// Operational control field is present at the end of the frame.
    pub ocf_flag: bool,
    pub mc_frame_count: u8,
    pub vc_frame_count: u8,
    pub has_secondary_header: bool,
    pub sync_flag: bool,
    pub packet_order_flag: bool,
    pub segment_length_id: u8,
    pub first_header_pointer: u16,
}

impl FrameHeader {
    /// Frame header length in bytes
    pub const LEN: usize = 6;
    /// First header pointer value indicating the frame only contains idle data
    pub const FHP_IDLE: u16 = 0x7fe;
    /// First header pointer value indicating no packet starts in this frame
    pub const FHP_NO_HEADER: u16 = 0x7ff;

    /// Decode from the provided bytes.
    ///
    /// # Errors
    /// [Error::NotEnoughData] if there are fewer than [Self::LEN] bytes, or
    /// [Error::UnsupportedVersion] if the version is not 0.
    pub fn decode(dat: &[u8]) -> Result<Self> {
        if dat.len() < Self::LEN {
            return Err(Error::NotEnoughData {
                actual: dat.len(),
                minimum: Self::LEN,
            });
        }
        let x = u16::from_be_bytes([dat[0], dat[1]]);
        let version = (x >> 14 & 0x3) as u8;
        if version != 0 {
            return Err(Error::UnsupportedVersion(version));
        }
        let status = u16::from_be_bytes([dat[4], dat[5]]);

        Ok(FrameHeader {
            version,
            scid: x >> 4 & 0x3ff,
            vcid: (x >> 1 & 0x7) as u8,
            ocf_flag: x & 0x1 == 1,
            mc_frame_count: dat[2],
            vc_frame_count: dat[3],
            has_secondary_header: status >> 15 & 0x1 == 1,
            sync_flag: status >> 14 & 0x1 == 1,
            packet_order_flag: status >> 13 & 0x1 == 1,
            segment_length_id: (status >> 11 & 0x3) as u8,
            first_header_pointer: status & 0x7ff,
        })
    }

    /// Encode to exactly [Self::LEN] bytes.
    ///
    /// # Errors
    /// [Error::Range] if any field does not fit its bit width.
    pub fn encode(&self) -> Result<[u8; Self::LEN]> {
        check_range("version", self.version.into(), 2)?;
        check_range("scid", self.scid.into(), 10)?;
        check_range("vcid", self.vcid.into(), 3)?;
        check_range("segment_length_id", self.segment_length_id.into(), 2)?;
        check_range("first_header_pointer", self.first_header_pointer.into(), 11)?;

        let x = u16::from(self.version) << 14
            | self.scid << 4
            | u16::from(self.vcid) << 1
            | u16::from(self.ocf_flag);
        let status = u16::from(self.has_secondary_header) << 15
            | u16::from(self.sync_flag) << 14
            | u16::from(self.packet_order_flag) << 13
            | u16::from(self.segment_length_id) << 11
            | self.first_header_pointer;

        let mut buf = [0u8; Self::LEN];
        buf[..2].copy_from_slice(&x.to_be_bytes());
        buf[2] = self.mc_frame_count;
        buf[3] = self.vc_frame_count;
        buf[4..].copy_from_slice(&status.to_be_bytes());
        Ok(buf)
    }
}

/// Frame quality as reported by the receiving ground station.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum FrameQuality {
    #[default]
    Good,
    Degraded,
    Bad,
    Missing,
}

#[derive(Debug, Clone)]
pub struct Frame {
    pub header: FrameHeader,
    /// Frame data field, not including the OCF or FECF
    pub data: Vec<u8>,
    /// Operational control field, present when the header OCF flag is set
    pub ocf: Option<[u8; 4]>,
    pub quality: FrameQuality,
    pub ground_receipt_time: Option<DateTime<Utc>>,
    pub ground_station_id: Option<String>,
    /// Bit error rate measured at the ground station, in `0.0..=1.0`.
    pub bit_error_rate: Option<f64>,
}

impl Frame {
    pub const OCF_LEN: usize = 4;
    pub const FECF_LEN: usize = 2;

    /// Decode a complete frame. `has_fecf` indicates the frame ends with a 2 byte error
    /// control field, which is dropped.
    ///
    /// # Errors
    /// If the header cannot be decoded or the frame is too short for the trailer fields.
    pub fn decode(dat: &[u8], has_fecf: bool) -> Result<Self> {
        let header = FrameHeader::decode(dat)?;
        let ocf_len = if header.ocf_flag { Self::OCF_LEN } else { 0 };
        let fecf_len = if has_fecf { Self::FECF_LEN } else { 0 };
        let minimum = FrameHeader::LEN + ocf_len + fecf_len;
        if dat.len() < minimum {
            return Err(Error::NotEnoughData {
                actual: dat.len(),
                minimum,
            });
        }
        let end = dat.len() - fecf_len;
        let data_end = end - ocf_len;
        let ocf = if header.ocf_flag {
            let mut ocf = [0u8; Self::OCF_LEN];
            ocf.copy_from_slice(&dat[data_end..end]);
            Some(ocf)
        } else {
            None
        };

        Ok(Frame {
            header,
            data: dat[FrameHeader::LEN..data_end].to_vec(),
            ocf,
            quality: FrameQuality::default(),
            ground_receipt_time: None,
            ground_station_id: None,
            bit_error_rate: None,
        })
    }

    /// Stamp the station and receipt time from `provenance`.
    #[must_use]
    pub fn with_provenance(mut self, provenance: &Provenance) -> Self {
        self.ground_station_id.clone_from(&provenance.source_id);
        self.ground_receipt_time = provenance.ground_receipt_time;
        self
    }

    /// Set the reception quality.
    ///
    /// # Errors
    /// [Error::Config] if `bit_error_rate` is not within `0.0..=1.0`.
    pub fn with_quality(
        mut self,
        quality: FrameQuality,
        bit_error_rate: Option<f64>,
    ) -> Result<Self> {
        if let Some(ber) = bit_error_rate {
            if !(0.0..=1.0).contains(&ber) {
                return Err(Error::Config(format!("bit error rate {ber} not in 0..=1")));
            }
        }
        self.quality = quality;
        self.bit_error_rate = bit_error_rate;
        Ok(self)
    }

    #[must_use]
    pub fn is_good(&self) -> bool {
        self.quality == FrameQuality::Good
    }

    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.header.first_header_pointer == FrameHeader::FHP_IDLE
    }

    /// Data starting at the first packet header in this frame, or `None` if no packet
    /// starts in this frame.
    #[must_use]
    pub fn first_packet(&self) -> Option<&[u8]> {
        let fhp = self.header.first_header_pointer;
        if self.header.sync_flag || fhp == FrameHeader::FHP_IDLE || fhp == FrameHeader::FHP_NO_HEADER
        {
            return None;
        }
        self.data.get(fhp as usize..)
    }
}
