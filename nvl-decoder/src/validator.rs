//! Packet validation
//!
//! Runs before any interpretation of the payload: the packet must be long enough
//! for its definition and, when a checksum policy is configured, carry a
//! matching checksum byte.

use crate::config::ChecksumConfig;
use crate::definitions::VariableListDefinition;
use crate::types::{DecoderError, Rejection, Result};
use std::fmt;
use std::sync::Arc;

/// A one-byte checksum over a run of payload bytes
///
/// PLC-side conventions vary, so the algorithm is pluggable. Implementations
/// must be pure functions of the bytes they are given.
pub trait ChecksumAlgorithm: Send + Sync + fmt::Debug {
    /// Short name used in logs and configuration
    fn name(&self) -> &'static str;

    /// Compute the checksum of `bytes`
    fn compute(&self, bytes: &mut dyn Iterator<Item = u8>) -> u8;
}

/// Additive sum modulo 256
#[derive(Debug, Clone, Copy, Default)]
pub struct Sum8;

impl ChecksumAlgorithm for Sum8 {
    fn name(&self) -> &'static str {
        "sum8"
    }

    fn compute(&self, bytes: &mut dyn Iterator<Item = u8>) -> u8 {
        bytes.fold(0u8, |acc, b| acc.wrapping_add(b))
    }
}

/// Bytewise XOR
#[derive(Debug, Clone, Copy, Default)]
pub struct Xor8;

impl ChecksumAlgorithm for Xor8 {
    fn name(&self) -> &'static str {
        "xor8"
    }

    fn compute(&self, bytes: &mut dyn Iterator<Item = u8>) -> u8 {
        bytes.fold(0u8, |acc, b| acc ^ b)
    }
}

/// Resolve a configured algorithm name. `none` yields `Ok(None)`.
pub fn algorithm_by_name(name: &str) -> std::result::Result<Option<Arc<dyn ChecksumAlgorithm>>, String> {
    match name.to_ascii_lowercase().as_str() {
        "none" | "" => Ok(None),
        "sum8" | "sum" => Ok(Some(Arc::new(Sum8))),
        "xor8" | "xor" => Ok(Some(Arc::new(Xor8))),
        other => Err(format!("unknown checksum algorithm '{}'", other)),
    }
}

#[derive(Debug, Clone)]
struct ChecksumPolicy {
    algorithm: Arc<dyn ChecksumAlgorithm>,
    /// Absolute offset of the embedded checksum byte
    offset: usize,
    /// (offset, mask) of the "checksum present" flag
    flag: Option<(usize, u8)>,
}

/// Length and checksum checks for raw datagrams
#[derive(Debug, Clone, Default)]
pub struct PacketValidator {
    checksum: Option<ChecksumPolicy>,
}

impl PacketValidator {
    /// Validator that only checks length
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a validator from the global checksum configuration
    pub fn from_config(config: &ChecksumConfig) -> Result<Self> {
        let algorithm = algorithm_by_name(&config.algorithm)
            .map_err(|e| DecoderError::Config(format!("checksum: {}", e)))?;

        let flag = match (config.flag_offset, config.flag_mask) {
            (Some(offset), Some(mask)) if mask != 0 => Some((offset, mask)),
            (Some(_), Some(_)) => {
                return Err(DecoderError::Config(
                    "checksum: flag_mask must be nonzero".to_string(),
                ))
            }
            (None, None) => None,
            _ => {
                return Err(DecoderError::Config(
                    "checksum: flag_offset and flag_mask must be set together".to_string(),
                ))
            }
        };

        match algorithm {
            Some(algorithm) => {
                let mut validator = Self::new().with_algorithm(algorithm, config.offset);
                if let Some((offset, mask)) = flag {
                    validator = validator.with_flag(offset, mask);
                }
                Ok(validator)
            }
            None if flag.is_some() => Err(DecoderError::Config(
                "checksum: flag configured but algorithm is 'none'".to_string(),
            )),
            None => Ok(Self::new()),
        }
    }

    /// Builder method: verify a checksum byte at `offset` with `algorithm`
    pub fn with_algorithm(mut self, algorithm: Arc<dyn ChecksumAlgorithm>, offset: usize) -> Self {
        self.checksum = Some(ChecksumPolicy {
            algorithm,
            offset,
            flag: None,
        });
        self
    }

    /// Builder method: only verify when `packet[offset] & mask != 0`
    ///
    /// Has no effect unless an algorithm was set first.
    pub fn with_flag(mut self, offset: usize, mask: u8) -> Self {
        if let Some(policy) = self.checksum.as_mut() {
            policy.flag = Some((offset, mask));
        }
        self
    }

    /// Name of the active checksum algorithm, if any
    pub fn checksum_name(&self) -> Option<&'static str> {
        self.checksum.as_ref().map(|p| p.algorithm.name())
    }

    /// Check a raw datagram against its matched definition
    pub fn validate(&self, raw: &[u8], definition: &VariableListDefinition) -> std::result::Result<(), Rejection> {
        let required = definition.required_length();
        if raw.len() < required {
            return Err(Rejection::TooShort {
                required,
                actual: raw.len(),
            });
        }

        let Some(policy) = &self.checksum else {
            return Ok(());
        };

        if let Some((flag_offset, mask)) = policy.flag {
            let flag = *raw.get(flag_offset).ok_or(Rejection::TooShort {
                required: flag_offset + 1,
                actual: raw.len(),
            })?;
            if flag & mask == 0 {
                return Ok(());
            }
        }

        let expected = *raw.get(policy.offset).ok_or(Rejection::TooShort {
            required: policy.offset + 1,
            actual: raw.len(),
        })?;

        let start = definition.header_bytes;
        let checksum_offset = policy.offset;
        let mut covered = raw
            .iter()
            .enumerate()
            .skip(start)
            .filter(|(i, _)| *i != checksum_offset)
            .map(|(_, b)| *b);
        let computed = policy.algorithm.compute(&mut covered);

        if computed != expected {
            return Err(Rejection::ChecksumMismatch { expected, computed });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definitions::{ByteOrder, PrimitiveType, VariableSpec};

    fn definition(header_bytes: usize, kinds: &[PrimitiveType]) -> VariableListDefinition {
        VariableListDefinition {
            cob_id: 1,
            name: None,
            topic_prefix: "t".to_string(),
            header_bytes,
            byte_order: ByteOrder::LittleEndian,
            on_change: None,
            variables: kinds
                .iter()
                .enumerate()
                .map(|(i, kind)| VariableSpec {
                    name: format!("v{}", i),
                    kind: *kind,
                    byte_order: None,
                    scale: 1.0,
                    precision: 0,
                    unit: None,
                    class: None,
                    topic: None,
                    retain: false,
                })
                .collect(),
        }
    }

    #[test]
    fn test_sum8_wraps() {
        let mut bytes = [0xFFu8, 0x02, 0x01].into_iter();
        assert_eq!(Sum8.compute(&mut bytes), 0x02);
        let mut bytes = [0x0Fu8, 0xF0, 0x01].into_iter();
        assert_eq!(Xor8.compute(&mut bytes), 0xFE);
    }

    #[test]
    fn test_too_short() {
        let def = definition(4, &[PrimitiveType::U32]);
        let validator = PacketValidator::new();
        assert_eq!(
            validator.validate(&[0u8; 7], &def),
            Err(Rejection::TooShort {
                required: 8,
                actual: 7
            })
        );
        assert_eq!(validator.validate(&[0u8; 8], &def), Ok(()));
        // Trailing bytes are allowed
        assert_eq!(validator.validate(&[0u8; 12], &def), Ok(()));
    }

    #[test]
    fn test_checksum_in_header() {
        let def = definition(4, &[PrimitiveType::U8, PrimitiveType::U8]);
        let validator = PacketValidator::new().with_algorithm(Arc::new(Sum8), 3);

        let mut packet = vec![0x00, 0x00, 0x00, 0x00, 0x10, 0x20];
        packet[3] = 0x30;
        assert_eq!(validator.validate(&packet, &def), Ok(()));

        packet[5] = 0x21;
        assert_eq!(
            validator.validate(&packet, &def),
            Err(Rejection::ChecksumMismatch {
                expected: 0x30,
                computed: 0x31
            })
        );
    }

    #[test]
    fn test_checksum_byte_in_payload_is_skipped() {
        let def = definition(0, &[PrimitiveType::U8, PrimitiveType::U8, PrimitiveType::U8]);
        let validator = PacketValidator::new().with_algorithm(Arc::new(Sum8), 2);
        // checksum covers bytes 0 and 1 only
        assert_eq!(validator.validate(&[0x05, 0x06, 0x0B], &def), Ok(()));
    }

    #[test]
    fn test_checksum_flag() {
        let def = definition(4, &[PrimitiveType::U8]);
        let validator = PacketValidator::new()
            .with_algorithm(Arc::new(Sum8), 3)
            .with_flag(2, 0x01);

        // Flag clear: checksum not verified
        assert_eq!(validator.validate(&[0, 0, 0x00, 0xEE, 0x42], &def), Ok(()));
        // Flag set: wrong checksum rejected
        assert!(matches!(
            validator.validate(&[0, 0, 0x01, 0xEE, 0x42], &def),
            Err(Rejection::ChecksumMismatch { .. })
        ));
        assert_eq!(validator.validate(&[0, 0, 0x01, 0x42, 0x42], &def), Ok(()));
    }

    #[test]
    fn test_from_config() {
        let validator = PacketValidator::from_config(&ChecksumConfig::default()).unwrap();
        assert_eq!(validator.checksum_name(), None);

        let validator =
            PacketValidator::from_config(&ChecksumConfig::new("xor8", 15).with_flag(14, 1)).unwrap();
        assert_eq!(validator.checksum_name(), Some("xor8"));

        assert!(PacketValidator::from_config(&ChecksumConfig::new("crc32", 15)).is_err());
        assert!(PacketValidator::from_config(&ChecksumConfig::new("none", 15).with_flag(14, 1)).is_err());
    }
}
