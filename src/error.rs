use crate::spacepacket::Apid;

#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// Not enough bytes to decode a header.
    #[error("malformed header: need {minimum} bytes, got {actual}")]
    NotEnoughData {
        /// Number of bytes we got
        actual: usize,
        /// Minimum number of expected bytes
        minimum: usize,
    },

    /// Header version field is not the supported version 0.
    #[error("malformed header: unsupported version {0}")]
    UnsupportedVersion(u8),

    /// The source ended before the data field declared by the header.
    #[error("truncated packet for apid {apid}: expected {expected} data bytes, got {actual}")]
    TruncatedPacket {
        apid: Apid,
        expected: usize,
        actual: usize,
    },

    /// Structurally invalid configuration or definition.
    #[error("invalid config: {0}")]
    Config(String),

    /// A parameter's bit window does not fit in the packet it was applied to.
    #[error("parameter {name}: bits {bit_offset}+{bit_length} exceed {available} available bits")]
    FieldRange {
        name: String,
        bit_offset: usize,
        bit_length: usize,
        available: usize,
    },

    /// A value does not fit in its header field.
    #[error("{field} value {value} does not fit in {bits} bits")]
    Range {
        field: &'static str,
        value: u64,
        bits: u32,
    },

    #[error("parameter {0} does not have a numeric raw value")]
    NotNumeric(String),

    #[error("invalid timecode: {0}")]
    Timecode(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// True for either of the errors produced when header bytes cannot be decoded.
    #[must_use]
    pub fn is_malformed_header(&self) -> bool {
        matches!(
            self,
            Error::NotEnoughData { .. } | Error::UnsupportedVersion(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
