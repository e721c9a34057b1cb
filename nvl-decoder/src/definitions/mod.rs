//! Variable-list definitions and the registry that indexes them
//!
//! `schema` holds the validated types, `registry` turns configuration into
//! them and answers identifier lookups.

pub mod registry;
pub mod schema;

// Re-export key types for convenience
pub use registry::{IdentifierField, Registry, RegistryStats};
pub use schema::{ByteOrder, PrimitiveType, VariableListDefinition, VariableSpec};
