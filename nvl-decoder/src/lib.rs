//! NVL Decoder Library
//!
//! Decodes CODESYS Network Variable List (NVL) UDP telegrams against statically
//! configured list definitions and turns the contained process values into
//! emission records for a message bus.
//!
//! # Architecture
//!
//! The library is the decoding and dispatch engine only:
//! - Validates configuration into an immutable definition registry
//! - Checks packet length and an optional, pluggable checksum
//! - Decodes the fixed-layout payload into typed values
//! - Scales and rounds values, and suppresses unchanged ones
//!
//! The library does NOT:
//! - Open sockets
//! - Talk to a message broker
//! - Read configuration files
//!
//! Those live in the application layer (nvl-bridge).
//!
//! # Example Usage
//!
//! ```
//! use nvl_decoder::{Dispatcher, DispatchOutcome, ListConfig, NvlConfig, Registry, VariableConfig};
//!
//! let config = NvlConfig::new()
//!     .with_header_bytes(16)
//!     .with_identifier(2, 2, "little")
//!     .add_list(
//!         ListConfig::new(0x0185, "plc/tank")
//!             .add_variable(VariableConfig::new("level", "REAL").with_unit("m")),
//!     );
//!
//! let dispatcher = Dispatcher::new(Registry::load(&config).unwrap());
//!
//! let mut packet = vec![0x00, 0x01, 0x85, 0x01];
//! packet.resize(16, 0);
//! packet.extend_from_slice(&1.0f32.to_le_bytes());
//!
//! match dispatcher.handle_packet(&packet) {
//!     DispatchOutcome::Emitted(records) => {
//!         assert_eq!(records[0].topic, "plc/tank/level");
//!     }
//!     other => panic!("unexpected outcome: {:?}", other),
//! }
//! ```

// Public modules
pub mod change_filter;
pub mod config;
pub mod definitions;
pub mod dispatcher;
pub mod transform;
pub mod types;
pub mod validator;
pub mod variable_decoder;

// Re-export main types for convenience
pub use change_filter::{ChangeKey, ChangeState};
pub use config::{ChecksumConfig, IdentifierConfig, ListConfig, NvlConfig, VariableConfig};
pub use definitions::{
    ByteOrder, IdentifierField, PrimitiveType, Registry, RegistryStats, VariableListDefinition,
    VariableSpec,
};
pub use dispatcher::{DispatchStats, Dispatcher};
pub use types::{
    DecodeError, DecodedValue, DecoderError, DispatchOutcome, EmissionRecord, PacketError,
    RawValue, Rejection, Result, UnknownIdentifierRecord, Value,
};
pub use validator::{ChecksumAlgorithm, PacketValidator, Sum8, Xor8};
pub use variable_decoder::VariableDecoder;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_library_basics() {
        // Smoke test: an empty configuration loads
        let registry = Registry::load(&NvlConfig::new()).unwrap();
        let stats = registry.stats();
        assert_eq!(stats.num_lists, 0);
    }
}
