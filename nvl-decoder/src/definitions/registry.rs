//! Definition registry
//!
//! Validates an `NvlConfig` into typed definitions and indexes them by
//! identifier. A registry is immutable; reconfiguration builds a new one.

use super::schema::{ByteOrder, PrimitiveType, VariableListDefinition, VariableSpec};
use crate::config::{IdentifierConfig, ListConfig, NvlConfig, VariableConfig};
use crate::types::{DecoderError, Result};
use crate::validator::PacketValidator;
use byteorder::{BigEndian, ByteOrder as _, LittleEndian};
use std::collections::{HashMap, HashSet};

/// Most decimal places an f64 can carry meaningfully
const MAX_PRECISION: u32 = 15;

/// Location of the list identifier inside every telegram
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdentifierField {
    pub offset: usize,
    /// Width in bytes: 1, 2 or 4
    pub width: usize,
    pub byte_order: ByteOrder,
}

impl IdentifierField {
    fn from_config(config: &IdentifierConfig) -> Result<Self> {
        if !matches!(config.width, 1 | 2 | 4) {
            return Err(DecoderError::Config(format!(
                "identifier: width must be 1, 2 or 4 bytes, got {}",
                config.width
            )));
        }
        let byte_order = config
            .byte_order
            .parse::<ByteOrder>()
            .map_err(|e| DecoderError::Config(format!("identifier: {}", e)))?;
        Ok(Self {
            offset: config.offset,
            width: config.width,
            byte_order,
        })
    }

    /// Read the identifier, `None` if the packet is too short to hold it
    pub fn extract(&self, raw: &[u8]) -> Option<u32> {
        let bytes = raw.get(self.offset..self.offset + self.width)?;
        let id = match (self.width, self.byte_order) {
            (1, _) => bytes[0] as u32,
            (2, ByteOrder::LittleEndian) => LittleEndian::read_u16(bytes) as u32,
            (2, ByteOrder::BigEndian) => BigEndian::read_u16(bytes) as u32,
            (_, ByteOrder::LittleEndian) => LittleEndian::read_u32(bytes),
            (_, ByteOrder::BigEndian) => BigEndian::read_u32(bytes),
        };
        Some(id)
    }

    /// Bytes needed to read the identifier
    pub fn end(&self) -> usize {
        self.offset + self.width
    }
}

/// Registry statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistryStats {
    /// Number of variable lists
    pub num_lists: usize,
    /// Total number of variables across all lists
    pub num_variables: usize,
}

/// Immutable set of variable-list definitions plus the global packet settings
#[derive(Debug, Clone)]
pub struct Registry {
    /// Definitions by identifier
    definitions: HashMap<u32, VariableListDefinition>,
    identifier: IdentifierField,
    validator: PacketValidator,
    on_change: bool,
}

impl Registry {
    /// Validate a configuration and build the registry.
    ///
    /// Any error rejects the whole configuration; there is no partial load.
    pub fn load(config: &NvlConfig) -> Result<Self> {
        let identifier = IdentifierField::from_config(&config.identifier)?;
        let validator = PacketValidator::from_config(&config.checksum)?;
        let default_order = config
            .byte_order
            .parse::<ByteOrder>()
            .map_err(|e| DecoderError::Config(format!("byte_order: {}", e)))?;
        let default_header = header_length(config.header_bytes, "header_bytes")?;

        let mut definitions = HashMap::with_capacity(config.lists.len());
        for list in &config.lists {
            let definition = convert_list(list, default_order, default_header)?;
            if definitions.contains_key(&definition.cob_id) {
                return Err(DecoderError::Config(format!(
                    "duplicate list identifier {}",
                    definition.cob_id
                )));
            }
            log::debug!(
                "Loaded list {} with {} variables ({} bytes)",
                definition.label(),
                definition.variables.len(),
                definition.required_length()
            );
            definitions.insert(definition.cob_id, definition);
        }

        let registry = Self {
            definitions,
            identifier,
            validator,
            on_change: config.on_change,
        };
        let stats = registry.stats();
        log::info!(
            "Registry loaded: {} lists, {} variables",
            stats.num_lists,
            stats.num_variables
        );
        Ok(registry)
    }

    /// Definition for an identifier
    pub fn lookup(&self, cob_id: u32) -> Option<&VariableListDefinition> {
        self.definitions.get(&cob_id)
    }

    /// Identifier field location
    pub fn identifier(&self) -> &IdentifierField {
        &self.identifier
    }

    /// Validator built from the checksum policy
    pub fn validator(&self) -> &PacketValidator {
        &self.validator
    }

    /// Global on-change default
    pub fn on_change(&self) -> bool {
        self.on_change
    }

    /// On-change flag in effect for one list
    pub fn on_change_for(&self, definition: &VariableListDefinition) -> bool {
        definition.on_change.unwrap_or(self.on_change)
    }

    /// All identifiers, sorted
    pub fn cob_ids(&self) -> Vec<u32> {
        let mut ids: Vec<u32> = self.definitions.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            num_lists: self.definitions.len(),
            num_variables: self.definitions.values().map(|d| d.variables.len()).sum(),
        }
    }
}

fn header_length(value: i64, what: &str) -> Result<usize> {
    usize::try_from(value)
        .map_err(|_| DecoderError::Config(format!("{} must not be negative, got {}", what, value)))
}

fn convert_list(
    list: &ListConfig,
    default_order: ByteOrder,
    default_header: usize,
) -> Result<VariableListDefinition> {
    let context = format!("list {}", list.cob_id);

    let header_bytes = match list.header_bytes {
        Some(value) => header_length(value, &format!("{}: header_bytes", context))?,
        None => default_header,
    };
    let byte_order = match &list.byte_order {
        Some(order) => order
            .parse::<ByteOrder>()
            .map_err(|e| DecoderError::Config(format!("{}: {}", context, e)))?,
        None => default_order,
    };

    let mut seen = HashSet::new();
    let mut variables = Vec::with_capacity(list.variables.len());
    for variable in &list.variables {
        let spec = convert_variable(variable, &context)?;
        if !seen.insert(spec.name.clone()) {
            return Err(DecoderError::Config(format!(
                "{}: duplicate variable '{}'",
                context, spec.name
            )));
        }
        variables.push(spec);
    }

    Ok(VariableListDefinition {
        cob_id: list.cob_id,
        name: list.name.clone(),
        topic_prefix: list.topic.trim_end_matches('/').to_string(),
        header_bytes,
        byte_order,
        on_change: list.on_change,
        variables,
    })
}

fn convert_variable(variable: &VariableConfig, context: &str) -> Result<VariableSpec> {
    if variable.name.trim().is_empty() {
        return Err(DecoderError::Config(format!("{}: variable with empty name", context)));
    }
    let context = format!("{}, variable '{}'", context, variable.name);

    let kind = variable
        .kind
        .parse::<PrimitiveType>()
        .map_err(|e| DecoderError::Config(format!("{}: {}", context, e)))?;

    let byte_order = variable
        .byte_order
        .as_deref()
        .map(str::parse::<ByteOrder>)
        .transpose()
        .map_err(|e| DecoderError::Config(format!("{}: {}", context, e)))?;

    if !variable.scale.is_finite() {
        return Err(DecoderError::Config(format!(
            "{}: scale must be finite, got {}",
            context, variable.scale
        )));
    }

    let precision = match variable.precision {
        Some(p) if p < 0 => {
            return Err(DecoderError::Config(format!(
                "{}: precision must not be negative, got {}",
                context, p
            )))
        }
        Some(p) if p > MAX_PRECISION as i64 => {
            return Err(DecoderError::Config(format!(
                "{}: precision must be at most {}, got {}",
                context, MAX_PRECISION, p
            )))
        }
        Some(p) => p as u32,
        None => kind.default_precision(),
    };

    Ok(VariableSpec {
        name: variable.name.clone(),
        kind,
        byte_order,
        scale: variable.scale,
        precision,
        unit: variable.unit.clone(),
        class: variable.class.clone(),
        topic: variable.topic.clone(),
        retain: variable.retain,
    })
}
