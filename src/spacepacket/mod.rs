//! CCSDS space packets.
//!
//! References:
//! * CCSDS Space Packet Protocol 133.0-B-2
//!     - <https://public.ccsds.org/Pubs/133x0b2e1.pdf>
mod assembler;

use std::borrow::Cow;
use std::fmt::Display;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

pub use assembler::{assemble_packets, AssemblerConfig, PacketAssembler, Provenance, ASM};

pub type Apid = u16;

/// Packet type, the single bit following the version.
#[derive(Serialize, Deserialize, Debug, Copy, Clone, PartialEq, Eq)]
pub enum PacketType {
    Telemetry = 0,
    Telecommand = 1,
}

/// Defines a packets grouping.
#[derive(Serialize, Deserialize, Debug, Copy, Clone, PartialEq, Eq)]
pub enum SequenceFlags {
    /// Packet is a part of a packet group, but not first and not last
    Continuation = 0,
    /// Packet is the first packet in a packet group
    First = 1,
    /// Packet is the last packet in a packet group
    Last = 2,
    /// Packet is not part of a packet group, i.e., standalone.
    Unsegmented = 3,
}

impl SequenceFlags {
    fn from_bits(x: u16) -> Self {
        match x & 0x3 {
            0 => SequenceFlags::Continuation,
            1 => SequenceFlags::First,
            2 => SequenceFlags::Last,
            _ => SequenceFlags::Unsegmented,
        }
    }
}

/// CCSDS Primary Header
///
/// The primary header format is common to all CCSDS space packets. Fields are packed
/// MSB first into three big-endian 16-bit words:
///
/// ```text
/// | version:3 | type:1 | sec hdr:1 | apid:11 |
/// | sequence flags:2 | sequence id:14       |
/// | data length minus 1:16                  |
/// ```
#[derive(Serialize, Deserialize, Debug, Copy, Clone, PartialEq, Eq)]
pub struct PrimaryHeader {
    pub version: u8,
    pub type_flag: PacketType,
    pub has_secondary_header: bool,
    pub apid: Apid,
    pub sequence_flags: SequenceFlags,
    pub sequence_id: u16,
    /// Length of the packet data field minus 1.
    pub len_minus1: u16,
}

impl PrimaryHeader {
    /// Size of a ``PrimaryHeader``
    pub const LEN: usize = 6;
    pub const APID_MAX: Apid = 0x7ff;
    pub const SEQ_MAX: u16 = 0x3fff;
    pub const VERSION_MAX: u8 = 0x7;

    /// Decode from bytes.
    ///
    /// # Errors
    /// [Error::NotEnoughData] if `buf` is shorter than [Self::LEN], or
    /// [Error::UnsupportedVersion] if the version is not 0.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < Self::LEN {
            return Err(Error::NotEnoughData {
                actual: buf.len(),
                minimum: Self::LEN,
            });
        }
        let d1 = u16::from_be_bytes([buf[0], buf[1]]);
        let d2 = u16::from_be_bytes([buf[2], buf[3]]);
        let d3 = u16::from_be_bytes([buf[4], buf[5]]);

        let version = (d1 >> 13 & 0x7) as u8;
        if version != 0 {
            return Err(Error::UnsupportedVersion(version));
        }

        Ok(PrimaryHeader {
            version,
            type_flag: if d1 >> 12 & 0x1 == 1 {
                PacketType::Telecommand
            } else {
                PacketType::Telemetry
            },
            has_secondary_header: (d1 >> 11 & 0x1) == 1,
            apid: d1 & 0x7ff,
            sequence_flags: SequenceFlags::from_bits(d2 >> 14),
            sequence_id: d2 & 0x3fff,
            len_minus1: d3,
        })
    }

    /// Encode to exactly [Self::LEN] bytes.
    ///
    /// # Errors
    /// [Error::Range] if the version, apid, or sequence id do not fit their bit widths.
    pub fn encode(&self) -> Result<[u8; Self::LEN]> {
        check_range("version", self.version.into(), 3)?;
        check_range("apid", self.apid.into(), 11)?;
        check_range("sequence_id", self.sequence_id.into(), 14)?;

        let d1 = u16::from(self.version) << 13
            | (self.type_flag as u16) << 12
            | u16::from(self.has_secondary_header) << 11
            | self.apid;
        let d2 = (self.sequence_flags as u16) << 14 | self.sequence_id;

        let mut buf = [0u8; Self::LEN];
        buf[..2].copy_from_slice(&d1.to_be_bytes());
        buf[2..4].copy_from_slice(&d2.to_be_bytes());
        buf[4..].copy_from_slice(&self.len_minus1.to_be_bytes());
        Ok(buf)
    }

    /// Number of bytes in the packet data field, i.e., `len_minus1 + 1`.
    #[must_use]
    pub fn data_len(&self) -> usize {
        self.len_minus1 as usize + 1
    }

    /// Total packet length, header included.
    #[must_use]
    pub fn total_len(&self) -> usize {
        Self::LEN + self.data_len()
    }

    /// The sequence id following `id`, rolling over to 0 after [Self::SEQ_MAX].
    #[must_use]
    pub fn next_sequence_id(id: u16) -> u16 {
        id.wrapping_add(1) & Self::SEQ_MAX
    }
}

pub(crate) fn check_range(field: &'static str, value: u64, bits: u32) -> Result<()> {
    if value >> bits != 0 {
        return Err(Error::Range { field, value, bits });
    }
    Ok(())
}

/// Calculate the number of missing sequence ids.
///
/// `cur` is the current sequence id. `last` is the sequence id seen before `cur`.
#[must_use]
pub fn missing_packets(cur: u16, last: u16) -> u16 {
    let modulus = i32::from(PrimaryHeader::SEQ_MAX) + 1;
    (i32::from(cur) - i32::from(last) - 1).rem_euclid(modulus) as u16
}

/// Packet represents a single CCSDS space packet split into its primary header,
/// secondary header and user data, along with where and when it was received.
///
/// The secondary header and user data together are always exactly the length the
/// header declares.
///
/// # Example
/// ```
/// use ccsds_decom::spacepacket::Packet;
///
/// let dat: &[u8] = &[
///     // primary header bytes
///     0xd, 0x59, 0xd2, 0xab, 0x0, 0x8,
///     // CDS timecode bytes in secondary header
///     0x52, 0xc0, 0x0, 0x0, 0x0, 0xa7, 0x0, 0xdb,
///     // user data
///     0xff,
/// ];
/// let packet = Packet::decode(dat, 8).unwrap();
/// assert_eq!(packet.header().apid, 1369);
/// assert_eq!(packet.user_data(), &[0xff]);
/// ```
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct Packet {
    header: PrimaryHeader,
    #[serde(serialize_with = "hex_bytes")]
    secondary_header: Vec<u8>,
    #[serde(serialize_with = "hex_bytes")]
    user_data: Vec<u8>,

    offset: usize,
    source_time: Option<DateTime<Utc>>,
    ground_receipt_time: Option<DateTime<Utc>>,
    source_id: Option<String>,
}

impl Display for Packet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Packet{{apid={}, seq={}, secondary_header:[len={}], user_data:[len={}]}}",
            self.header.apid,
            self.header.sequence_id,
            self.secondary_header.len(),
            self.user_data.len()
        )
    }
}

impl Packet {
    /// Construct from a header and its data field, splitting off the first
    /// `sec_hdr_length` bytes as the secondary header when the header says there is one.
    ///
    /// # Errors
    /// [Error::TruncatedPacket] if `data` is shorter than the header declares, or
    /// [Error::Config] if `sec_hdr_length` is longer than the data field.
    pub fn new(header: PrimaryHeader, data: &[u8], sec_hdr_length: usize) -> Result<Self> {
        let want = header.data_len();
        if data.len() < want {
            return Err(Error::TruncatedPacket {
                apid: header.apid,
                expected: want,
                actual: data.len(),
            });
        }
        let data = &data[..want];
        let split = if header.has_secondary_header {
            sec_hdr_length
        } else {
            0
        };
        if split > data.len() {
            return Err(Error::Config(format!(
                "secondary header length {split} exceeds {} data bytes of packet apid={} seq={}",
                data.len(),
                header.apid,
                header.sequence_id
            )));
        }
        let (secondary_header, user_data) = data.split_at(split);

        Ok(Packet {
            header,
            secondary_header: secondary_header.to_vec(),
            user_data: user_data.to_vec(),
            offset: 0,
            source_time: None,
            ground_receipt_time: None,
            source_id: None,
        })
    }

    /// Decode a packet from the start of `buf`. Bytes beyond the declared packet length
    /// are ignored.
    ///
    /// # Errors
    /// See [PrimaryHeader::decode] and [Packet::new].
    pub fn decode(buf: &[u8], sec_hdr_length: usize) -> Result<Self> {
        let header = PrimaryHeader::decode(buf)?;
        Self::new(header, &buf[PrimaryHeader::LEN..], sec_hdr_length)
    }

    /// Serialize back to the bytes of a packet.
    ///
    /// # Errors
    /// See [PrimaryHeader::encode].
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(self.header.total_len());
        buf.extend_from_slice(&self.header.encode()?);
        buf.extend_from_slice(&self.secondary_header);
        buf.extend_from_slice(&self.user_data);
        Ok(buf)
    }

    pub(crate) fn with_offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    pub(crate) fn with_provenance(
        mut self,
        provenance: &Provenance,
        source_time: Option<DateTime<Utc>>,
    ) -> Self {
        self.source_id.clone_from(&provenance.source_id);
        self.ground_receipt_time = provenance.ground_receipt_time;
        self.source_time = source_time;
        self
    }

    #[must_use]
    pub fn header(&self) -> &PrimaryHeader {
        &self.header
    }

    #[must_use]
    pub fn apid(&self) -> Apid {
        self.header.apid
    }

    #[must_use]
    pub fn secondary_header(&self) -> &[u8] {
        &self.secondary_header
    }

    #[must_use]
    pub fn user_data(&self) -> &[u8] {
        &self.user_data
    }

    /// Secondary header followed by user data, i.e., the whole packet data field.
    #[must_use]
    pub fn data_field(&self) -> Cow<'_, [u8]> {
        if self.secondary_header.is_empty() {
            return Cow::Borrowed(&self.user_data);
        }
        let mut buf = self.secondary_header.clone();
        buf.extend_from_slice(&self.user_data);
        Cow::Owned(buf)
    }

    /// Byte offset of the primary header in the stream the packet was assembled from.
    #[must_use]
    pub fn offset(&self) -> usize {
        self.offset
    }

    #[must_use]
    pub fn source_time(&self) -> Option<DateTime<Utc>> {
        self.source_time
    }

    #[must_use]
    pub fn ground_receipt_time(&self) -> Option<DateTime<Utc>> {
        self.ground_receipt_time
    }

    #[must_use]
    pub fn source_id(&self) -> Option<&str> {
        self.source_id.as_deref()
    }

    #[must_use]
    pub fn is_first(&self) -> bool {
        self.header.sequence_flags == SequenceFlags::First
    }

    #[must_use]
    pub fn is_last(&self) -> bool {
        self.header.sequence_flags == SequenceFlags::Last
    }

    #[must_use]
    pub fn is_cont(&self) -> bool {
        self.header.sequence_flags == SequenceFlags::Continuation
    }

    #[must_use]
    pub fn is_standalone(&self) -> bool {
        self.header.sequence_flags == SequenceFlags::Unsegmented
    }
}

fn hex_bytes<S: serde::Serializer>(dat: &[u8], s: S) -> std::result::Result<S::Ok, S::Error> {
    s.serialize_str(&hex::encode(dat))
}
