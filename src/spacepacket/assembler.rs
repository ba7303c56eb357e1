use std::collections::HashSet;
use std::io::Read;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, trace};
use typed_builder::TypedBuilder;

use super::{Apid, Packet, PrimaryHeader};
use crate::bytes::Bytes;
use crate::timecode::TimeDecoder;
use crate::{Error, Result};

/// Standard CCSDS attached synchronization marker
pub const ASM: [u8; 4] = [0x1a, 0xcf, 0xfc, 0x1d];

/// Where packets came from, as told by the caller. Stamped on every assembled packet.
#[derive(Debug, Clone, Default)]
pub struct Provenance {
    pub source_id: Option<String>,
    pub ground_receipt_time: Option<DateTime<Utc>>,
}

/// Packet assembly options.
///
/// ```
/// use std::collections::HashSet;
/// use ccsds_decom::spacepacket::{AssemblerConfig, ASM};
///
/// let config = AssemblerConfig::builder()
///     .sync_marker(ASM)
///     .apid_filter(HashSet::from([100, 200]))
///     .sec_hdr_length(8)
///     .build();
/// ```
#[derive(TypedBuilder, Clone)]
pub struct AssemblerConfig {
    /// Only packets with these APIDs are produced. Others are still decoded so the
    /// stream position stays correct.
    #[builder(default, setter(strip_option))]
    pub apid_filter: Option<HashSet<Apid>>,
    /// When set, each packet is expected to follow this marker and the stream is scanned
    /// for it before every header, discarding anything in between.
    #[builder(default, setter(strip_option))]
    pub sync_marker: Option<[u8; 4]>,
    /// Mission specific secondary header length in bytes.
    #[builder(default)]
    pub sec_hdr_length: usize,
    #[builder(default)]
    pub provenance: Provenance,
    /// Decodes the packet source time from the secondary header.
    #[builder(default, setter(strip_option))]
    pub time_decoder: Option<Arc<dyn TimeDecoder + Send + Sync>>,
}

impl Default for AssemblerConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// Iterator of [Packet]s assembled from a byte stream. See [assemble_packets].
pub struct PacketAssembler<R>
where
    R: Read + Send,
{
    bytes: Bytes<R>,
    config: AssemblerConfig,
    done: bool,
}

impl<R> PacketAssembler<R>
where
    R: Read + Send,
{
    pub fn new(reader: R, config: AssemblerConfig) -> Self {
        PacketAssembler {
            bytes: Bytes::new(reader),
            config,
            done: false,
        }
    }

    /// Current position in the stream.
    pub fn offset(&self) -> usize {
        self.bytes.offset()
    }

    /// Advance past the next sync marker. Returns the number of bytes discarded before it
    /// or `None` if the stream ends first.
    fn synchronize(&mut self, marker: [u8; 4]) -> Result<Option<usize>> {
        let mut window = [0u8; 4];
        let mut discarded = 0;
        loop {
            let n = self.bytes.fill(&mut window)?;
            if n < window.len() {
                trace!(discarded = discarded + n, "stream ended without sync marker");
                return Ok(None);
            }
            if window == marker {
                return Ok(Some(discarded));
            }
            // the marker cannot start at the first byte, try again at the next
            self.bytes.unread(&window[1..]);
            discarded += 1;
        }
    }

    fn decode_time(&self, packet: &Packet) -> Option<DateTime<Utc>> {
        let decoder = self.config.time_decoder.as_ref()?;
        if !packet.header().has_secondary_header {
            return None;
        }
        match decoder.decode_time(packet.secondary_header()) {
            Ok(time) => Some(time),
            Err(err) => {
                trace!(apid = packet.apid(), error = %err, "failed to decode source time");
                None
            }
        }
    }
}

impl<R> Iterator for PacketAssembler<R>
where
    R: Read + Send,
{
    type Item = Result<Packet>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        loop {
            if let Some(marker) = self.config.sync_marker {
                match self.synchronize(marker) {
                    Ok(Some(0)) => {}
                    Ok(Some(discarded)) => {
                        debug!(discarded, offset = self.offset(), "resynchronized");
                    }
                    Ok(None) => {
                        self.done = true;
                        return None;
                    }
                    Err(err) => {
                        self.done = true;
                        return Some(Err(err));
                    }
                }
            }

            let offset = self.offset();
            let mut buf = [0u8; PrimaryHeader::LEN];
            let n = match self.bytes.fill(&mut buf) {
                Ok(n) => n,
                Err(err) => {
                    self.done = true;
                    return Some(Err(err.into()));
                }
            };
            if n == 0 {
                self.done = true;
                return None;
            }

            let header = match PrimaryHeader::decode(&buf[..n]) {
                Ok(header) => header,
                Err(err) => {
                    debug!(offset, error = %err, "malformed header");
                    if n < buf.len() || self.config.sync_marker.is_none() {
                        // no way to find the next packet
                        self.done = true;
                    } else {
                        // resume the marker scan at the byte following the marker
                        self.bytes.unread(&buf);
                    }
                    return Some(Err(err));
                }
            };

            let mut data = vec![0u8; header.data_len()];
            let n = match self.bytes.fill(&mut data) {
                Ok(n) => n,
                Err(err) => {
                    self.done = true;
                    return Some(Err(err.into()));
                }
            };
            if n < data.len() {
                debug!(
                    offset,
                    apid = header.apid,
                    expected = data.len(),
                    actual = n,
                    "truncated packet"
                );
                self.done = true;
                return Some(Err(Error::TruncatedPacket {
                    apid: header.apid,
                    expected: data.len(),
                    actual: n,
                }));
            }

            if let Some(filter) = &self.config.apid_filter {
                if !filter.contains(&header.apid) {
                    trace!(offset, apid = header.apid, "filtered");
                    continue;
                }
            }

            let packet = match Packet::new(header, &data, self.config.sec_hdr_length) {
                Ok(packet) => packet.with_offset(offset),
                Err(err) => return Some(Err(err)),
            };
            let source_time = self.decode_time(&packet);
            return Some(Ok(
                packet.with_provenance(&self.config.provenance, source_time)
            ));
        }
    }
}

/// Return an iterator providing [Packet]s assembled from `reader`.
///
/// Without a sync marker the stream must be packet aligned, i.e., start with a primary
/// header and contain nothing but packets. With a sync marker the stream is scanned for
/// the marker before each packet, which recovers from corrupt or foreign bytes.
///
/// Errors are produced for individual packets:
/// * a malformed header ends the stream, unless a sync marker is configured in which
///   case scanning resumes at the next byte
/// * a truncated final packet ends the stream
/// * a secondary header longer than a packet's data skips that packet
///
/// # Examples
/// ```
/// use ccsds_decom::spacepacket::{assemble_packets, AssemblerConfig};
///
/// let dat: &[u8] = &[
///     // primary header bytes
///     0xd, 0x59, 0xd2, 0xab, 0x0, 0x8,
///     // CDS timecode bytes in secondary header
///     0x52, 0xc0, 0x0, 0x0, 0x0, 0xa7, 0x0, 0xdb,
///     // user data
///     0xff,
/// ];
///
/// let config = AssemblerConfig::builder().sec_hdr_length(8).build();
/// assemble_packets(dat, config).for_each(|zult| {
///     let packet = zult.unwrap();
///     assert_eq!(packet.apid(), 1369);
///     assert_eq!(packet.user_data(), &[0xff]);
/// });
/// ```
pub fn assemble_packets<R>(reader: R, config: AssemblerConfig) -> PacketAssembler<R>
where
    R: Read + Send,
{
    PacketAssembler::new(reader, config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spacepacket::{PacketType, SequenceFlags};

    fn packet_bytes(apid: Apid, sequence_id: u16, data: &[u8]) -> Vec<u8> {
        let header = PrimaryHeader {
            version: 0,
            type_flag: PacketType::Telemetry,
            has_secondary_header: false,
            apid,
            sequence_flags: SequenceFlags::Unsegmented,
            sequence_id,
            len_minus1: (data.len() - 1) as u16,
        };
        let mut buf = header.encode().unwrap().to_vec();
        buf.extend_from_slice(data);
        buf
    }

    #[test]
    fn aligned_stream() {
        #[rustfmt::skip]
        let dat: &[u8] = &[
            // Primary/secondary header and a single byte of user data
            // byte 4 is sequence number 1 & 2
            0xd, 0x59, 0xc0, 0x01, 0x0, 0x8, 0x52, 0xc0, 0x0, 0x0, 0x0, 0xa7, 0x0, 0xdb, 0xff,
            0xd, 0x59, 0xc0, 0x02, 0x0, 0x8, 0x52, 0xc0, 0x0, 0x0, 0x0, 0xa7, 0x0, 0xdb, 0xff,
        ];
        let config = AssemblerConfig::builder().sec_hdr_length(8).build();

        let packets: Vec<Packet> = assemble_packets(dat, config)
            .filter_map(Result::ok)
            .collect();

        assert_eq!(packets.len(), 2);
        assert_eq!(packets[0].apid(), 1369);
        assert_eq!(packets[0].header().sequence_id, 1);
        assert_eq!(packets[0].offset(), 0);
        assert_eq!(packets[0].secondary_header(), &dat[6..14]);
        assert_eq!(packets[1].header().sequence_id, 2);
        assert_eq!(packets[1].offset(), 15);
    }

    #[test]
    fn sync_marker_discards_garbage() {
        let mut dat = vec![0x01, 0x02, 0x03];
        dat.extend_from_slice(&ASM);
        dat.extend_from_slice(&packet_bytes(100, 7, &[0xde, 0xad]));
        let config = AssemblerConfig::builder().sync_marker(ASM).build();

        let zults: Vec<Result<Packet>> = assemble_packets(&dat[..], config).collect();

        assert_eq!(zults.len(), 1, "{zults:?}");
        let packet = zults[0].as_ref().unwrap();
        assert_eq!(packet.apid(), 100);
        assert_eq!(packet.offset(), 7);
        assert_eq!(packet.user_data(), &[0xde, 0xad]);
    }

    #[test]
    fn sync_marker_resumes_after_bad_header() {
        let mut dat = ASM.to_vec();
        // version 7 header
        dat.extend_from_slice(&[0xff, 0xff, 0x00, 0x00, 0x00, 0x00]);
        dat.extend_from_slice(&ASM);
        dat.extend_from_slice(&packet_bytes(5, 1, &[0x01]));
        let config = AssemblerConfig::builder().sync_marker(ASM).build();

        let zults: Vec<Result<Packet>> = assemble_packets(&dat[..], config).collect();

        assert_eq!(zults.len(), 2, "{zults:?}");
        assert!(matches!(zults[0], Err(Error::UnsupportedVersion(7))));
        assert_eq!(zults[1].as_ref().unwrap().apid(), 5);
    }

    #[test]
    fn bad_header_without_sync_ends_stream() {
        let mut dat = vec![0xff, 0xff, 0x00, 0x00, 0x00, 0x00];
        dat.extend_from_slice(&packet_bytes(5, 1, &[0x01]));

        let zults: Vec<Result<Packet>> =
            assemble_packets(&dat[..], AssemblerConfig::default()).collect();

        assert_eq!(zults.len(), 1);
        assert!(zults[0].as_ref().unwrap_err().is_malformed_header());
    }

    #[test]
    fn truncated_packet() {
        let mut dat = packet_bytes(5, 1, &[0x01, 0x02]);
        let mut short = packet_bytes(6, 2, &[0x01, 0x02, 0x03, 0x04]);
        short.truncate(8);
        dat.extend_from_slice(&short);

        let zults: Vec<Result<Packet>> =
            assemble_packets(&dat[..], AssemblerConfig::default()).collect();

        assert_eq!(zults.len(), 2);
        assert!(zults[0].is_ok());
        assert!(
            matches!(
                zults[1],
                Err(Error::TruncatedPacket {
                    apid: 6,
                    expected: 4,
                    actual: 2
                })
            ),
            "{:?}",
            zults[1]
        );
    }

    #[test]
    fn short_header_at_end() {
        let mut dat = packet_bytes(5, 1, &[0x01]);
        dat.extend_from_slice(&[0x00, 0x05, 0xc0]);

        let zults: Vec<Result<Packet>> =
            assemble_packets(&dat[..], AssemblerConfig::default()).collect();

        assert_eq!(zults.len(), 2);
        assert!(matches!(
            zults[1],
            Err(Error::NotEnoughData {
                actual: 3,
                minimum: 6
            })
        ));
    }

    #[test]
    fn apid_filter() {
        let mut dat = packet_bytes(5, 1, &[0x01]);
        dat.extend_from_slice(&packet_bytes(6, 1, &[0x02, 0x03]));
        dat.extend_from_slice(&packet_bytes(5, 2, &[0x04]));
        let config = AssemblerConfig::builder()
            .apid_filter(HashSet::from([5]))
            .build();

        let packets: Vec<Packet> = assemble_packets(&dat[..], config)
            .filter_map(Result::ok)
            .collect();

        assert_eq!(packets.len(), 2);
        assert!(packets.iter().all(|p| p.apid() == 5));
        // offsets account for the filtered packet
        assert_eq!(packets[1].offset(), 7 + 8);
    }

    #[test]
    fn provenance_is_stamped() {
        let dat = packet_bytes(5, 1, &[0x01]);
        let grt = DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap();
        let config = AssemblerConfig::builder()
            .provenance(Provenance {
                source_id: Some("npp".to_string()),
                ground_receipt_time: Some(grt),
            })
            .build();

        let packet = assemble_packets(&dat[..], config).next().unwrap().unwrap();

        assert_eq!(packet.source_id(), Some("npp"));
        assert_eq!(packet.ground_receipt_time(), Some(grt));
        assert_eq!(packet.source_time(), None);
    }

    #[test]
    fn empty_stream() {
        let dat: &[u8] = &[];
        assert_eq!(assemble_packets(dat, AssemblerConfig::default()).count(), 0);
    }
}
