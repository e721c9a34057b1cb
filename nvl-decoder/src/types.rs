//! Core types for the NVL decoder library
//!
//! This module defines the values that flow through the decode pipeline and the
//! records the dispatcher hands to a publisher. None of these types perform I/O.

use serde::Serialize;
use std::fmt;

/// Result type for decoder operations
pub type Result<T> = std::result::Result<T, DecoderError>;

/// Errors that can occur while loading definitions or handling packets
#[derive(Debug, thiserror::Error)]
pub enum DecoderError {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Packet rejected: {0}")]
    Rejected(#[from] Rejection),

    #[error("Decode failed: {0}")]
    Decode(#[from] DecodeError),
}

/// Reasons the packet validator refuses a datagram
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Rejection {
    #[error("packet too short: {required} bytes required, {actual} received")]
    TooShort { required: usize, actual: usize },

    #[error("checksum mismatch: packet carries 0x{expected:02X}, computed 0x{computed:02X}")]
    ChecksumMismatch { expected: u8, computed: u8 },
}

/// The decoder ran past the end of the payload
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("variable '{variable}' at offset {offset} needs {width} bytes, payload has {available}")]
pub struct DecodeError {
    pub variable: String,
    pub offset: usize,
    pub width: usize,
    pub available: usize,
}

/// Why a packet was dropped without emissions
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PacketError {
    #[error(transparent)]
    Rejected(#[from] Rejection),

    #[error(transparent)]
    Decode(#[from] DecodeError),
}

/// A primitive as read from the wire, before scaling
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RawValue {
    Bool(bool),
    Int(i64),
    Float(f64),
}

impl fmt::Display for RawValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RawValue::Bool(v) => write!(f, "{}", v),
            RawValue::Int(v) => write!(f, "{}", v),
            RawValue::Float(v) => write!(f, "{}", v),
        }
    }
}

/// One field pulled out of a payload by the variable decoder
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedValue {
    /// Variable name from the definition
    pub name: String,
    /// Decoded primitive
    pub raw: RawValue,
    /// Index of the originating `VariableSpec` in `VariableListDefinition::variables`
    pub spec_index: usize,
}

/// A value after scaling and rounding
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(untagged)]
pub enum Value {
    Boolean(bool),
    Integer(i64),
    Float(f64),
}

impl Value {
    /// Exact comparison used by on-change suppression.
    ///
    /// Floats compare by bit pattern so that a repeated NaN counts as unchanged.
    pub fn same_as(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::Integer(a), Value::Integer(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a.to_bits() == b.to_bits(),
            _ => false,
        }
    }

    /// Convert to f64 (booleans map to 0.0/1.0)
    pub fn as_f64(&self) -> f64 {
        match self {
            Value::Boolean(v) => {
                if *v {
                    1.0
                } else {
                    0.0
                }
            }
            Value::Integer(v) => *v as f64,
            Value::Float(v) => *v,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.same_as(other)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Boolean(v) => write!(f, "{}", v),
            Value::Integer(v) => write!(f, "{}", v),
            Value::Float(v) => write!(f, "{}", v),
        }
    }
}

/// Final output unit handed to a publisher
#[derive(Debug, Clone, PartialEq)]
pub struct EmissionRecord {
    /// Resolved topic (override or `topic_prefix/name`)
    pub topic: String,
    /// Transformed value
    pub value: Value,
    /// Engineering unit (e.g. "°C", "kW")
    pub unit: Option<String>,
    /// Classification tag for the consumer
    pub class: Option<String>,
    /// Whether the broker should retain the message
    pub retain: bool,
    /// Identifier of the list the value came from
    pub cob_id: u32,
    /// Variable name
    pub variable: String,
}

/// A packet whose identifier matched no definition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownIdentifierRecord {
    pub cob_id: u32,
    pub raw: Vec<u8>,
}

/// Result of running one packet through the dispatcher
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    /// Packet decoded; records that passed the change filter (possibly none)
    Emitted(Vec<EmissionRecord>),
    /// No definition for the packet's identifier
    UnknownIdentifier(UnknownIdentifierRecord),
    /// Packet failed validation or decoding and was dropped
    Dropped(PacketError),
}

impl DispatchOutcome {
    /// Emission records, empty for the other outcomes
    pub fn records(&self) -> &[EmissionRecord] {
        match self {
            DispatchOutcome::Emitted(records) => records,
            _ => &[],
        }
    }

    pub fn is_dropped(&self) -> bool {
        matches!(self, DispatchOutcome::Dropped(_))
    }
}
