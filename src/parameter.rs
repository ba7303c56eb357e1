//! Parameter definitions describing where telemetry values live in packets.
use std::collections::{HashMap, HashSet};
use std::fmt::Display;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::spacepacket::Apid;
use crate::{Error, Result};

/// How the bits of a parameter are interpreted.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    #[serde(rename = "uint8")]
    UInt8,
    #[serde(rename = "uint16")]
    UInt16,
    #[serde(rename = "uint32")]
    UInt32,
    #[serde(rename = "uint64")]
    UInt64,
    #[serde(rename = "int8")]
    Int8,
    #[serde(rename = "int16")]
    Int16,
    #[serde(rename = "int32")]
    Int32,
    #[serde(rename = "int64")]
    Int64,
    #[serde(rename = "float32")]
    Float32,
    #[serde(rename = "float64")]
    Float64,
    #[serde(rename = "boolean")]
    Boolean,
    /// Unsigned state code of up to 64 bits
    #[serde(rename = "enumerated")]
    Enumerated,
    /// Byte aligned ASCII
    #[serde(rename = "string")]
    String,
    /// Opaque bits, padded to a byte boundary
    #[serde(rename = "binary")]
    Binary,
}

impl Encoding {
    /// Largest number of bits a value of this encoding may be read from, or `None` for
    /// variable length encodings.
    #[must_use]
    pub fn max_bits(&self) -> Option<usize> {
        match self {
            Encoding::UInt8 | Encoding::Int8 => Some(8),
            Encoding::UInt16 | Encoding::Int16 => Some(16),
            Encoding::UInt32 | Encoding::Int32 | Encoding::Float32 => Some(32),
            Encoding::UInt64 | Encoding::Int64 | Encoding::Float64 | Encoding::Enumerated => {
                Some(64)
            }
            Encoding::Boolean => Some(1),
            Encoding::String | Encoding::Binary => None,
        }
    }

    #[must_use]
    pub fn is_signed(&self) -> bool {
        matches!(
            self,
            Encoding::Int8 | Encoding::Int16 | Encoding::Int32 | Encoding::Int64
        )
    }

    #[must_use]
    pub fn is_float(&self) -> bool {
        matches!(self, Encoding::Float32 | Encoding::Float64)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ByteOrder {
    #[default]
    Big,
    Little,
}

/// Location and interpretation of a single parameter in the packets of one APID.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ParameterDefinition {
    /// Unique within a [ParameterTable].
    pub name: String,
    pub apid: Apid,
    /// Bit position of the first bit, counted MSB first from the start of the searched
    /// packet region.
    pub bit_offset: usize,
    pub bit_length: usize,
    pub encoding: Encoding,
    #[serde(default)]
    pub byte_order: ByteOrder,
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

impl ParameterDefinition {
    /// Check the bit width and alignment are compatible with the encoding. Whether the
    /// field fits in a packet can only be checked at extraction time.
    ///
    /// # Errors
    /// [Error::Config] describing the first problem found.
    pub fn validate(&self) -> Result<()> {
        let fail = |msg: String| Err(Error::Config(format!("parameter {}: {msg}", self.name)));

        if self.name.is_empty() {
            return Err(Error::Config("parameter name is empty".to_string()));
        }
        if self.bit_length == 0 {
            return fail("bit_length must be at least 1".to_string());
        }
        if self.apid > crate::spacepacket::PrimaryHeader::APID_MAX {
            return fail(format!("apid {} exceeds 11 bits", self.apid));
        }
        match self.encoding {
            Encoding::Float32 | Encoding::Float64 | Encoding::Boolean => {
                let want = self.encoding.max_bits().unwrap_or_default();
                if self.bit_length != want {
                    return fail(format!(
                        "{:?} requires bit_length {want}, got {}",
                        self.encoding, self.bit_length
                    ));
                }
            }
            Encoding::String => {
                if self.bit_offset % 8 != 0 || self.bit_length % 8 != 0 {
                    return fail(format!(
                        "string must be byte aligned, got bit_offset={} bit_length={}",
                        self.bit_offset, self.bit_length
                    ));
                }
            }
            Encoding::Binary => {}
            _ => {
                let max = self.encoding.max_bits().unwrap_or_default();
                if self.bit_length > max {
                    return fail(format!(
                        "{:?} holds at most {max} bits, got {}",
                        self.encoding, self.bit_length
                    ));
                }
            }
        }
        if self.byte_order == ByteOrder::Little {
            if matches!(
                self.encoding,
                Encoding::String | Encoding::Binary | Encoding::Boolean
            ) {
                return fail(format!(
                    "byte order does not apply to {:?}",
                    self.encoding
                ));
            }
            if self.bit_offset % 8 != 0 || self.bit_length % 8 != 0 {
                return fail("little endian fields must be byte aligned".to_string());
            }
        }
        Ok(())
    }
}

/// Immutable, validated collection of [ParameterDefinition]s indexed by APID.
#[derive(Debug, Clone, Default)]
pub struct ParameterTable {
    definitions: Vec<ParameterDefinition>,
    by_apid: HashMap<Apid, Vec<usize>>,
}

impl ParameterTable {
    /// Validate `definitions` and build the table. Definition order is kept and is the
    /// order parameters are extracted in.
    ///
    /// # Errors
    /// [Error::Config] for invalid definitions or duplicate names.
    pub fn new(definitions: Vec<ParameterDefinition>) -> Result<Self> {
        let mut names = HashSet::new();
        let mut by_apid: HashMap<Apid, Vec<usize>> = HashMap::new();
        for (idx, def) in definitions.iter().enumerate() {
            def.validate()?;
            if !names.insert(def.name.as_str()) {
                return Err(Error::Config(format!("duplicate parameter {}", def.name)));
            }
            by_apid.entry(def.apid).or_default().push(idx);
        }
        debug!(
            parameters = definitions.len(),
            apids = by_apid.len(),
            "built parameter table"
        );
        Ok(ParameterTable {
            definitions,
            by_apid,
        })
    }

    /// Definitions for `apid`, in table order.
    pub fn for_apid(&self, apid: Apid) -> impl Iterator<Item = &ParameterDefinition> + '_ {
        self.by_apid
            .get(&apid)
            .into_iter()
            .flatten()
            .map(|idx| &self.definitions[*idx])
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&ParameterDefinition> {
        self.definitions.iter().find(|d| d.name == name)
    }

    #[must_use]
    pub fn contains_apid(&self, apid: Apid) -> bool {
        self.by_apid.contains_key(&apid)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ParameterDefinition> {
        self.definitions.iter()
    }
}

/// A decoded but uncalibrated value.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub enum RawValue {
    UInt(u64),
    Int(i64),
    Float(f64),
    Bool(bool),
    String(String),
    Binary(Vec<u8>),
}

impl RawValue {
    /// The value as a float, if it has a numeric interpretation. Booleans are 0 or 1 and
    /// strings are parsed.
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            RawValue::UInt(x) => Some(*x as f64),
            RawValue::Int(x) => Some(*x as f64),
            RawValue::Float(x) => Some(*x),
            RawValue::Bool(x) => Some(if *x { 1.0 } else { 0.0 }),
            RawValue::String(s) => s.trim().parse().ok(),
            RawValue::Binary(_) => None,
        }
    }
}

impl Display for RawValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RawValue::UInt(x) => write!(f, "{x}"),
            RawValue::Int(x) => write!(f, "{x}"),
            RawValue::Float(x) => write!(f, "{x}"),
            RawValue::Bool(x) => write!(f, "{x}"),
            RawValue::String(s) => write!(f, "{s}"),
            RawValue::Binary(b) => write!(f, "{}", hex::encode(b)),
        }
    }
}

/// A parameter value extracted from one packet.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RawParameter {
    pub name: String,
    pub apid: Apid,
    pub sequence_id: u16,
    pub value: RawValue,
    pub unit: Option<String>,
    /// Packet source time, if it was decoded.
    pub time: Option<DateTime<Utc>>,
}
