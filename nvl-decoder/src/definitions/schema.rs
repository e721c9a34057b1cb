//! Validated schema types
//!
//! A `VariableListDefinition` is the static layout of one NVL telegram. Field
//! order in `variables` is the wire layout; there is no framing in the payload.

use std::fmt;
use std::str::FromStr;

/// Byte order for multi-byte fields
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    /// Little-endian (Intel format, CODESYS default on x86/ARM targets)
    LittleEndian,
    /// Big-endian (Motorola format)
    BigEndian,
}

impl FromStr for ByteOrder {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "little" | "le" | "little_endian" | "intel" => Ok(ByteOrder::LittleEndian),
            "big" | "be" | "big_endian" | "motorola" => Ok(ByteOrder::BigEndian),
            other => Err(format!("unknown byte order '{}'", other)),
        }
    }
}

impl fmt::Display for ByteOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ByteOrder::LittleEndian => write!(f, "little"),
            ByteOrder::BigEndian => write!(f, "big"),
        }
    }
}

/// Primitive wire types an NVL variable can have
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrimitiveType {
    Bool,
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
    F32,
    F64,
}

impl PrimitiveType {
    /// Width on the wire in bytes
    pub const fn width(self) -> usize {
        match self {
            PrimitiveType::Bool | PrimitiveType::I8 | PrimitiveType::U8 => 1,
            PrimitiveType::I16 | PrimitiveType::U16 => 2,
            PrimitiveType::I32 | PrimitiveType::U32 | PrimitiveType::F32 => 4,
            PrimitiveType::F64 => 8,
        }
    }

    /// Decimal places used when the configuration does not set a precision
    pub const fn default_precision(self) -> u32 {
        match self {
            PrimitiveType::F32 | PrimitiveType::F64 => 2,
            _ => 0,
        }
    }

    /// IEC 61131-3 name of the type
    pub const fn iec_name(self) -> &'static str {
        match self {
            PrimitiveType::Bool => "BOOL",
            PrimitiveType::I8 => "SINT",
            PrimitiveType::U8 => "USINT",
            PrimitiveType::I16 => "INT",
            PrimitiveType::U16 => "UINT",
            PrimitiveType::I32 => "DINT",
            PrimitiveType::U32 => "UDINT",
            PrimitiveType::F32 => "REAL",
            PrimitiveType::F64 => "LREAL",
        }
    }
}

impl FromStr for PrimitiveType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let tag = match s.to_ascii_lowercase().as_str() {
            "bool" | "boolean" => PrimitiveType::Bool,
            "sint" | "i8" => PrimitiveType::I8,
            "usint" | "byte" | "u8" => PrimitiveType::U8,
            "int" | "i16" => PrimitiveType::I16,
            "uint" | "word" | "u16" => PrimitiveType::U16,
            "dint" | "i32" => PrimitiveType::I32,
            "udint" | "dword" | "u32" => PrimitiveType::U32,
            "real" | "f32" => PrimitiveType::F32,
            "lreal" | "f64" => PrimitiveType::F64,
            _ => return Err(format!("unknown type tag '{}'", s)),
        };
        Ok(tag)
    }
}

impl fmt::Display for PrimitiveType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.iec_name())
    }
}

/// One decoded field of a variable list
#[derive(Debug, Clone, PartialEq)]
pub struct VariableSpec {
    /// Variable name, unique within its list
    pub name: String,
    /// Wire type
    pub kind: PrimitiveType,
    /// Overrides the list's byte order for this field
    pub byte_order: Option<ByteOrder>,
    /// Linear scale factor applied to numeric values
    pub scale: f64,
    /// Decimal places kept after scaling
    pub precision: u32,
    /// Engineering unit (e.g. "°C", "kW")
    pub unit: Option<String>,
    /// Classification tag for consumers (e.g. "temperature")
    pub class: Option<String>,
    /// Full topic override
    pub topic: Option<String>,
    /// Publish with the retain flag
    pub retain: bool,
}

/// A complete NVL definition
#[derive(Debug, Clone, PartialEq)]
pub struct VariableListDefinition {
    /// Identifier carried in the telegram header
    pub cob_id: u32,
    /// Optional display name
    pub name: Option<String>,
    /// Prefix for derived topics
    pub topic_prefix: String,
    /// Bytes skipped before the first variable
    pub header_bytes: usize,
    /// Default byte order for the list
    pub byte_order: ByteOrder,
    /// Per-list on-change override
    pub on_change: Option<bool>,
    /// Variables in wire order
    pub variables: Vec<VariableSpec>,
}

impl VariableListDefinition {
    /// Sum of all variable widths
    pub fn payload_width(&self) -> usize {
        self.variables.iter().map(|v| v.kind.width()).sum()
    }

    /// Minimum packet length that decodes successfully
    pub fn required_length(&self) -> usize {
        self.header_bytes + self.payload_width()
    }

    /// Effective byte order for a variable
    pub fn byte_order_of(&self, spec: &VariableSpec) -> ByteOrder {
        spec.byte_order.unwrap_or(self.byte_order)
    }

    /// Topic a variable is published on
    pub fn topic_for(&self, spec: &VariableSpec) -> String {
        match &spec.topic {
            Some(topic) => topic.clone(),
            None => format!("{}/{}", self.topic_prefix, spec.name),
        }
    }

    /// Name for log output, falling back to the identifier
    pub fn label(&self) -> String {
        match &self.name {
            Some(name) => format!("{} ({})", name, self.cob_id),
            None => self.cob_id.to_string(),
        }
    }
}
