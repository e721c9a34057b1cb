//! Decoder configuration types
//!
//! These are the serde-facing shapes of the configuration. They are loose on
//! purpose (type tags and byte orders are plain strings, header lengths are
//! signed) so that `Registry::load` can reject bad input with a message that
//! names the offending list and variable.

use serde::{Deserialize, Serialize};

/// Global NVL configuration plus the list definitions
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NvlConfig {
    /// Suppress values that did not change since the last emission
    #[serde(default = "default_true")]
    pub on_change: bool,

    /// Default byte order for lists that do not set one ("little" or "big")
    #[serde(default = "default_byte_order")]
    pub byte_order: String,

    /// Default header length for lists that do not set one
    #[serde(default = "default_header_bytes")]
    pub header_bytes: i64,

    /// Where the list identifier sits in every telegram
    #[serde(default)]
    pub identifier: IdentifierConfig,

    /// Checksum policy applied to every telegram
    #[serde(default)]
    pub checksum: ChecksumConfig,

    /// Variable list definitions
    #[serde(default)]
    pub lists: Vec<ListConfig>,
}

/// Location of the identifier (COB-ID) field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentifierConfig {
    #[serde(default = "default_identifier_offset")]
    pub offset: usize,
    /// Field width in bytes: 1, 2 or 4
    #[serde(default = "default_identifier_width")]
    pub width: usize,
    #[serde(default = "default_byte_order")]
    pub byte_order: String,
}

/// Checksum policy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChecksumConfig {
    /// "none", "sum8" or "xor8"
    #[serde(default = "default_checksum_algorithm")]
    pub algorithm: String,
    /// Absolute offset of the embedded checksum byte
    #[serde(default = "default_checksum_offset")]
    pub offset: usize,
    /// Byte holding the "checksum present" flag, if the telegram has one
    #[serde(default)]
    pub flag_offset: Option<usize>,
    /// Mask applied to the flag byte
    #[serde(default)]
    pub flag_mask: Option<u8>,
}

/// One variable list (one NVL stream)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListConfig {
    /// Identifier carried in the telegram header
    pub cob_id: u32,
    /// Topic prefix for all variables of this list
    pub topic: String,
    /// Optional name used in log output
    #[serde(default)]
    pub name: Option<String>,
    /// Overrides `NvlConfig::header_bytes`
    #[serde(default)]
    pub header_bytes: Option<i64>,
    /// Overrides `NvlConfig::byte_order`
    #[serde(default)]
    pub byte_order: Option<String>,
    /// Overrides `NvlConfig::on_change`
    #[serde(default)]
    pub on_change: Option<bool>,
    /// Variables in wire order
    #[serde(default)]
    pub variables: Vec<VariableConfig>,
}

/// One decoded field of a list
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VariableConfig {
    pub name: String,
    /// Type tag, e.g. "REAL", "INT", "BOOL" or "f32"
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub byte_order: Option<String>,
    #[serde(default = "default_scale")]
    pub scale: f64,
    /// Decimal places; defaults depend on the type
    #[serde(default)]
    pub precision: Option<i64>,
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default)]
    pub class: Option<String>,
    #[serde(default)]
    pub topic: Option<String>,
    #[serde(default)]
    pub retain: bool,
}

fn default_true() -> bool {
    true
}

fn default_byte_order() -> String {
    "little".to_string()
}

fn default_header_bytes() -> i64 {
    20
}

fn default_identifier_offset() -> usize {
    8
}

fn default_identifier_width() -> usize {
    2
}

fn default_checksum_algorithm() -> String {
    "none".to_string()
}

fn default_checksum_offset() -> usize {
    15
}

fn default_scale() -> f64 {
    1.0
}

impl Default for NvlConfig {
    fn default() -> Self {
        Self {
            on_change: default_true(),
            byte_order: default_byte_order(),
            header_bytes: default_header_bytes(),
            identifier: IdentifierConfig::default(),
            checksum: ChecksumConfig::default(),
            lists: Vec::new(),
        }
    }
}

impl Default for IdentifierConfig {
    fn default() -> Self {
        Self {
            offset: default_identifier_offset(),
            width: default_identifier_width(),
            byte_order: default_byte_order(),
        }
    }
}

impl Default for ChecksumConfig {
    fn default() -> Self {
        Self {
            algorithm: default_checksum_algorithm(),
            offset: default_checksum_offset(),
            flag_offset: None,
            flag_mask: None,
        }
    }
}

impl NvlConfig {
    /// Create a configuration with default global settings and no lists
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method: set the global on-change flag
    pub fn with_on_change(mut self, enabled: bool) -> Self {
        self.on_change = enabled;
        self
    }

    /// Builder method: set the default header length
    pub fn with_header_bytes(mut self, header_bytes: i64) -> Self {
        self.header_bytes = header_bytes;
        self
    }

    /// Builder method: set the default byte order
    pub fn with_byte_order(mut self, byte_order: impl Into<String>) -> Self {
        self.byte_order = byte_order.into();
        self
    }

    /// Builder method: set the identifier field location
    pub fn with_identifier(mut self, offset: usize, width: usize, byte_order: impl Into<String>) -> Self {
        self.identifier = IdentifierConfig {
            offset,
            width,
            byte_order: byte_order.into(),
        };
        self
    }

    /// Builder method: set the checksum policy
    pub fn with_checksum(mut self, checksum: ChecksumConfig) -> Self {
        self.checksum = checksum;
        self
    }

    /// Builder method: add a list definition
    pub fn add_list(mut self, list: ListConfig) -> Self {
        self.lists.push(list);
        self
    }
}

impl ChecksumConfig {
    /// Checksum of the given algorithm stored at `offset`, always verified
    pub fn new(algorithm: impl Into<String>, offset: usize) -> Self {
        Self {
            algorithm: algorithm.into(),
            offset,
            flag_offset: None,
            flag_mask: None,
        }
    }

    /// Builder method: verify only when `packet[offset] & mask != 0`
    pub fn with_flag(mut self, offset: usize, mask: u8) -> Self {
        self.flag_offset = Some(offset);
        self.flag_mask = Some(mask);
        self
    }
}

impl ListConfig {
    /// Create a list with no variables
    pub fn new(cob_id: u32, topic: impl Into<String>) -> Self {
        Self {
            cob_id,
            topic: topic.into(),
            name: None,
            header_bytes: None,
            byte_order: None,
            on_change: None,
            variables: Vec::new(),
        }
    }

    /// Builder method: override the header length
    pub fn with_header_bytes(mut self, header_bytes: i64) -> Self {
        self.header_bytes = Some(header_bytes);
        self
    }

    /// Builder method: override the byte order
    pub fn with_byte_order(mut self, byte_order: impl Into<String>) -> Self {
        self.byte_order = Some(byte_order.into());
        self
    }

    /// Builder method: override the on-change flag
    pub fn with_on_change(mut self, enabled: bool) -> Self {
        self.on_change = Some(enabled);
        self
    }

    /// Builder method: append a variable
    pub fn add_variable(mut self, variable: VariableConfig) -> Self {
        self.variables.push(variable);
        self
    }
}

impl VariableConfig {
    /// Create a variable with default scale and no metadata
    pub fn new(name: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: kind.into(),
            byte_order: None,
            scale: default_scale(),
            precision: None,
            unit: None,
            class: None,
            topic: None,
            retain: false,
        }
    }

    pub fn with_scale(mut self, scale: f64) -> Self {
        self.scale = scale;
        self
    }

    pub fn with_precision(mut self, precision: i64) -> Self {
        self.precision = Some(precision);
        self
    }

    pub fn with_byte_order(mut self, byte_order: impl Into<String>) -> Self {
        self.byte_order = Some(byte_order.into());
        self
    }

    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }

    pub fn with_class(mut self, class: impl Into<String>) -> Self {
        self.class = Some(class.into());
        self
    }

    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = Some(topic.into());
        self
    }

    pub fn with_retain(mut self, retain: bool) -> Self {
        self.retain = retain;
        self
    }
}
