#![allow(dead_code)]
use ccsds_decom::parameter::{ByteOrder, Encoding, ParameterDefinition};
use ccsds_decom::spacepacket::{Apid, PacketType, PrimaryHeader, SequenceFlags};

/// Encoded packet with no secondary header. `data` must not be empty.
pub fn packet_bytes(apid: Apid, sequence_id: u16, data: &[u8]) -> Vec<u8> {
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

pub fn def(name: &str, apid: Apid, bit_offset: usize, bit_length: usize, encoding: Encoding) -> ParameterDefinition {
    ParameterDefinition {
        name: name.to_string(),
        apid,
        bit_offset,
        bit_length,
        encoding,
        byte_order: ByteOrder::Big,
        unit: None,
        description: None,
    }
}
