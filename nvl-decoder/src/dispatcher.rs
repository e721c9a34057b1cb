//! Main dispatch API
//!
//! The `Dispatcher` is the entry point for packet handling. Each call to
//! `handle_packet` runs one datagram through the pipeline:
//! 1. Extract the identifier → unknown identifiers take their own output path
//! 2. Validate length and checksum
//! 3. Decode the variables
//! 4. Transform and filter each value, committing emitted values
//!
//! Rejected packets are dropped, never retried: decoding the same bytes again
//! would give the same result.

use crate::change_filter::{ChangeKey, ChangeState};
use crate::definitions::Registry;
use crate::transform::transform;
use crate::types::{DispatchOutcome, EmissionRecord, PacketError, Rejection, UnknownIdentifierRecord};
use crate::variable_decoder::VariableDecoder;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Packet dispatcher - safe to share between threads
pub struct Dispatcher {
    /// Current registry; reload swaps the whole Arc
    registry: RwLock<Arc<Registry>>,
    /// Last emitted value per key, kept across reloads
    changes: Arc<ChangeState>,
    counters: Counters,
}

impl Dispatcher {
    /// Create a dispatcher with its own empty change state
    pub fn new(registry: Registry) -> Self {
        Self::with_change_state(registry, Arc::new(ChangeState::new()))
    }

    /// Create a dispatcher around an existing change state
    pub fn with_change_state(registry: Registry, changes: Arc<ChangeState>) -> Self {
        Self {
            registry: RwLock::new(Arc::new(registry)),
            changes,
            counters: Counters::default(),
        }
    }

    /// Snapshot of the current registry
    pub fn registry(&self) -> Arc<Registry> {
        Arc::clone(&self.registry.read())
    }

    /// Replace the registry. Packets already in flight finish with the old one.
    pub fn reload(&self, registry: Registry) {
        let stats = registry.stats();
        *self.registry.write() = Arc::new(registry);
        self.counters.reloads.fetch_add(1, Ordering::Relaxed);
        log::info!(
            "Registry swapped: {} lists, {} variables",
            stats.num_lists,
            stats.num_variables
        );
    }

    /// The shared change state
    pub fn change_state(&self) -> &Arc<ChangeState> {
        &self.changes
    }

    /// Run one datagram through the pipeline
    pub fn handle_packet(&self, raw: &[u8]) -> DispatchOutcome {
        self.counters.packets.fetch_add(1, Ordering::Relaxed);
        let registry = self.registry();

        // Step 1: identifier
        let identifier = registry.identifier();
        let Some(cob_id) = identifier.extract(raw) else {
            log::warn!(
                "Dropping {}-byte packet: too short for identifier at offset {}",
                raw.len(),
                identifier.offset
            );
            return self.drop_packet(
                Rejection::TooShort {
                    required: identifier.end(),
                    actual: raw.len(),
                }
                .into(),
            );
        };

        // Step 2: lookup
        let Some(definition) = registry.lookup(cob_id) else {
            log::info!("Unknown list identifier {} ({} bytes)", cob_id, raw.len());
            self.counters.unknown.fetch_add(1, Ordering::Relaxed);
            return DispatchOutcome::UnknownIdentifier(UnknownIdentifierRecord {
                cob_id,
                raw: raw.to_vec(),
            });
        };

        // Step 3: validate
        if let Err(rejection) = registry.validator().validate(raw, definition) {
            log::warn!("Dropping packet for list {}: {}", definition.label(), rejection);
            return self.drop_packet(rejection.into());
        }

        // Step 4: decode
        let values = match VariableDecoder::decode(raw, definition) {
            Ok(values) => values,
            Err(e) => {
                log::error!("Dropping packet for list {}: {}", definition.label(), e);
                return self.drop_packet(e.into());
            }
        };

        // Step 5: transform, filter, emit
        let on_change = registry.on_change_for(definition);
        let mut records = Vec::new();
        for decoded in values {
            let spec = &definition.variables[decoded.spec_index];
            let value = transform(decoded.raw, spec);

            let slot = self.changes.slot(ChangeKey::new(cob_id, decoded.name));
            if !slot.should_emit(&value, on_change) {
                log::trace!("Unchanged {}/{} = {}", cob_id, spec.name, value);
                self.counters.suppressed.fetch_add(1, Ordering::Relaxed);
                continue;
            }
            slot.commit(value);

            let record = EmissionRecord {
                topic: definition.topic_for(spec),
                value,
                unit: spec.unit.clone(),
                class: spec.class.clone(),
                retain: spec.retain,
                cob_id,
                variable: spec.name.clone(),
            };
            log::debug!("Emit {} = {}", record.topic, record.value);
            records.push(record);
        }

        self.counters
            .emitted
            .fetch_add(records.len() as u64, Ordering::Relaxed);
        DispatchOutcome::Emitted(records)
    }

    /// Snapshot of the packet counters
    pub fn stats(&self) -> DispatchStats {
        let c = &self.counters;
        DispatchStats {
            packets: c.packets.load(Ordering::Relaxed),
            emitted: c.emitted.load(Ordering::Relaxed),
            suppressed: c.suppressed.load(Ordering::Relaxed),
            unknown_identifiers: c.unknown.load(Ordering::Relaxed),
            too_short: c.too_short.load(Ordering::Relaxed),
            checksum_mismatches: c.checksum.load(Ordering::Relaxed),
            decode_errors: c.decode.load(Ordering::Relaxed),
            reloads: c.reloads.load(Ordering::Relaxed),
        }
    }

    fn drop_packet(&self, error: PacketError) -> DispatchOutcome {
        let counter = match &error {
            PacketError::Rejected(Rejection::TooShort { .. }) => &self.counters.too_short,
            PacketError::Rejected(Rejection::ChecksumMismatch { .. }) => &self.counters.checksum,
            PacketError::Decode(_) => &self.counters.decode,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        DispatchOutcome::Dropped(error)
    }
}

#[derive(Debug, Default)]
struct Counters {
    packets: AtomicU64,
    emitted: AtomicU64,
    suppressed: AtomicU64,
    unknown: AtomicU64,
    too_short: AtomicU64,
    checksum: AtomicU64,
    decode: AtomicU64,
    reloads: AtomicU64,
}

/// Dispatcher statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    /// Datagrams handled
    pub packets: u64,
    /// Emission records produced
    pub emitted: u64,
    /// Values held back by the change filter
    pub suppressed: u64,
    /// Packets routed to the unknown-identifier path
    pub unknown_identifiers: u64,
    /// Packets too short for their definition (or the identifier)
    pub too_short: u64,
    /// Packets with a bad checksum
    pub checksum_mismatches: u64,
    /// Packets the decoder could not read
    pub decode_errors: u64,
    /// Registry swaps
    pub reloads: u64,
}

impl DispatchStats {
    /// Packets dropped for any reason
    pub fn dropped(&self) -> u64 {
        self.too_short + self.checksum_mismatches + self.decode_errors
    }
}
