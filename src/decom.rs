//! Decommutation: extracting parameter values from packet data.
//!
//! Packet data is treated as one contiguous bit string, MSB first, so a parameter may
//! start and end anywhere regardless of byte boundaries.
use rayon::prelude::*;
use tracing::trace;

use crate::parameter::{ByteOrder, Encoding, ParameterDefinition, ParameterTable, RawParameter, RawValue};
use crate::spacepacket::Packet;
use crate::{Error, Result};

/// Packet bytes searched for parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Region {
    /// Bytes following the secondary header.
    #[default]
    UserData,
    /// Secondary header followed by user data.
    DataField,
}

/// Read up to 64 bits starting at `bit_offset` as an unsigned big-endian integer.
///
/// Returns `None` if `bit_length` is 0 or more than 64, or the window extends past the
/// end of `dat`.
#[must_use]
pub fn read_bits(dat: &[u8], bit_offset: usize, bit_length: usize) -> Option<u64> {
    if bit_length == 0 || bit_length > 64 {
        return None;
    }
    let end = bit_offset.checked_add(bit_length)?;
    if end > dat.len() * 8 {
        return None;
    }
    let first = bit_offset / 8;
    let last = (end - 1) / 8;
    // at most 9 bytes are touched by a 64 bit window
    let mut acc: u128 = 0;
    for b in &dat[first..=last] {
        acc = acc << 8 | u128::from(*b);
    }
    let trailing = (last - first + 1) * 8 - bit_offset % 8 - bit_length;
    let mask = u64::MAX >> (64 - bit_length);
    Some((acc >> trailing) as u64 & mask)
}

/// Copy `bit_length` bits starting at `bit_offset` into a new buffer, left aligned, with
/// the final byte zero padded.
#[must_use]
pub fn read_window(dat: &[u8], bit_offset: usize, bit_length: usize) -> Option<Vec<u8>> {
    let end = bit_offset.checked_add(bit_length)?;
    if bit_length == 0 || end > dat.len() * 8 {
        return None;
    }
    if bit_offset % 8 == 0 {
        let start = bit_offset / 8;
        let mut buf = dat[start..start + bit_length.div_ceil(8)].to_vec();
        let pad = buf.len() * 8 - bit_length;
        if let Some(b) = buf.last_mut() {
            *b &= 0xff << pad;
        }
        return Some(buf);
    }

    let mut buf = Vec::with_capacity(bit_length.div_ceil(8));
    let mut pos = bit_offset;
    while pos < end {
        let n = (end - pos).min(8);
        let bits = read_bits(dat, pos, n)? as u8;
        buf.push(bits << (8 - n));
        pos += n;
    }
    Some(buf)
}

fn sign_extend(x: u64, bits: usize) -> i64 {
    let shift = 64 - bits;
    ((x << shift) as i64) >> shift
}

/// Decode the value of a single parameter from `dat`.
///
/// # Errors
/// [Error::FieldRange] if the parameter does not fit in `dat`, or [Error::Config] if the
/// definition is not valid for its encoding.
pub fn decode_value(def: &ParameterDefinition, dat: &[u8]) -> Result<RawValue> {
    let available = dat.len() * 8;
    let out_of_range = || Error::FieldRange {
        name: def.name.clone(),
        bit_offset: def.bit_offset,
        bit_length: def.bit_length,
        available,
    };
    if def
        .bit_offset
        .checked_add(def.bit_length)
        .map_or(true, |end| end > available)
    {
        return Err(out_of_range());
    }
    def.validate()?;

    let value = match def.encoding {
        Encoding::String => {
            let start = def.bit_offset / 8;
            let text: String = dat[start..start + def.bit_length / 8]
                .iter()
                .map(|b| {
                    if b.is_ascii() {
                        char::from(*b)
                    } else {
                        char::REPLACEMENT_CHARACTER
                    }
                })
                .collect();
            RawValue::String(text.trim_end_matches('\0').to_string())
        }
        Encoding::Binary => RawValue::Binary(
            read_window(dat, def.bit_offset, def.bit_length).ok_or_else(out_of_range)?,
        ),
        encoding => {
            let mut x = read_bits(dat, def.bit_offset, def.bit_length).ok_or_else(out_of_range)?;
            if def.byte_order == ByteOrder::Little {
                x = x.swap_bytes() >> (64 - def.bit_length);
            }
            match encoding {
                Encoding::Boolean => RawValue::Bool(x != 0),
                Encoding::Float32 => RawValue::Float(f64::from(f32::from_bits(x as u32))),
                Encoding::Float64 => RawValue::Float(f64::from_bits(x)),
                e if e.is_signed() => RawValue::Int(sign_extend(x, def.bit_length)),
                _ => RawValue::UInt(x),
            }
        }
    };
    Ok(value)
}

/// Extracts parameter values from packets according to a [ParameterTable].
#[derive(Debug, Clone, Copy)]
pub struct Decommutator<'a> {
    table: &'a ParameterTable,
    region: Region,
}

impl<'a> Decommutator<'a> {
    pub fn new(table: &'a ParameterTable) -> Self {
        Decommutator {
            table,
            region: Region::default(),
        }
    }

    /// Set the packet bytes bit offsets are relative to. Defaults to [Region::UserData].
    #[must_use]
    pub fn with_region(mut self, region: Region) -> Self {
        self.region = region;
        self
    }

    /// Extract every parameter defined for the packet's APID, in table order.
    ///
    /// A parameter that does not fit in the packet produces an [Error::FieldRange] in its
    /// place; the remaining parameters are still extracted.
    pub fn extract(&self, packet: &Packet) -> Vec<Result<RawParameter>> {
        let data = match self.region {
            Region::UserData => std::borrow::Cow::Borrowed(packet.user_data()),
            Region::DataField => packet.data_field(),
        };
        let header = packet.header();
        self.table
            .for_apid(header.apid)
            .map(|def| {
                let value = decode_value(def, &data).map_err(|err| {
                    trace!(apid = header.apid, seq = header.sequence_id, error = %err, "skipping parameter");
                    err
                })?;
                Ok(RawParameter {
                    name: def.name.clone(),
                    apid: header.apid,
                    sequence_id: header.sequence_id,
                    value,
                    unit: def.unit.clone(),
                    time: packet.source_time(),
                })
            })
            .collect()
    }

    /// Extract parameters from many packets in parallel. Results are in packet order.
    pub fn extract_batch(&self, packets: &[Packet]) -> Vec<Vec<Result<RawParameter>>> {
        packets.par_iter().map(|p| self.extract(p)).collect()
    }
}

/// Extract parameters for `packet` from its user data. See [Decommutator::extract].
pub fn extract(packet: &Packet, table: &ParameterTable) -> Vec<Result<RawParameter>> {
    Decommutator::new(table).extract(packet)
}

/// Extract parameters for many packets in parallel. See [Decommutator::extract_batch].
pub fn extract_batch(packets: &[Packet], table: &ParameterTable) -> Vec<Vec<Result<RawParameter>>> {
    Decommutator::new(table).extract_batch(packets)
}
