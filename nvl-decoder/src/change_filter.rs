//! On-change suppression
//!
//! `ChangeState` remembers the last emitted value per (list, variable). Every
//! key has its own lock: checking and committing one key happen under it, so
//! duplicate or reordered telegrams handled on different threads cannot both
//! observe a change and both emit, while other keys proceed independently.

use crate::types::Value;
use dashmap::DashMap;
use parking_lot::{ArcMutexGuard, Mutex, RawMutex};
use std::sync::Arc;

/// Identifies one variable of one list
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChangeKey {
    pub cob_id: u32,
    pub variable: String,
}

impl ChangeKey {
    pub fn new(cob_id: u32, variable: impl Into<String>) -> Self {
        Self {
            cob_id,
            variable: variable.into(),
        }
    }
}

/// Decide whether `new` should be emitted given the last emitted value.
///
/// With `on_change` false every decode is emitted. Otherwise a value is emitted
/// when nothing was stored yet or the stored value differs exactly.
pub fn should_emit(stored: Option<&Value>, new: &Value, on_change: bool) -> bool {
    if !on_change {
        return true;
    }
    match stored {
        Some(previous) => !previous.same_as(new),
        None => true,
    }
}

type Cell = Arc<Mutex<Option<Value>>>;

/// Last emitted value for every key seen so far
#[derive(Debug, Default)]
pub struct ChangeState {
    values: DashMap<ChangeKey, Cell>,
}

impl ChangeState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock one key for a check-then-commit sequence.
    ///
    /// The map is only touched to find the key's cell; the returned slot holds
    /// that cell's lock alone, so slots for different keys never wait on each
    /// other. Acquiring the same key twice on one thread deadlocks.
    pub fn slot(&self, key: ChangeKey) -> KeySlot {
        let cell = match self.values.get(&key) {
            Some(cell) => Arc::clone(cell.value()),
            None => Arc::clone(self.values.entry(key).or_default().value()),
        };
        KeySlot {
            guard: cell.lock_arc(),
        }
    }

    /// Last emitted value for a key
    pub fn last_value(&self, key: &ChangeKey) -> Option<Value> {
        let cell = self.values.get(key).map(|cell| Arc::clone(cell.value()))?;
        let value = *cell.lock();
        value
    }

    /// Number of keys with an emitted value
    pub fn len(&self) -> usize {
        let cells: Vec<Cell> = self.values.iter().map(|cell| Arc::clone(cell.value())).collect();
        cells.iter().filter(|cell| cell.lock().is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Exclusive access to one key of the change state
pub struct KeySlot {
    guard: ArcMutexGuard<RawMutex, Option<Value>>,
}

impl KeySlot {
    /// Value stored for this key, if any
    pub fn last_value(&self) -> Option<&Value> {
        (*self.guard).as_ref()
    }

    /// Pure check; does not modify the state
    pub fn should_emit(&self, new: &Value, on_change: bool) -> bool {
        should_emit(self.last_value(), new, on_change)
    }

    /// Record `new` as the last emitted value and release the key
    pub fn commit(mut self, new: Value) {
        *self.guard = Some(new);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_should_emit_rules() {
        let v = Value::Float(1.0);
        assert!(should_emit(None, &v, true));
        assert!(!should_emit(Some(&Value::Float(1.0)), &v, true));
        assert!(should_emit(Some(&Value::Float(2.0)), &v, true));
        assert!(should_emit(Some(&Value::Float(1.0)), &v, false));
    }

    #[test]
    fn test_check_does_not_mutate() {
        let state = ChangeState::new();
        let key = ChangeKey::new(386, "temp");

        let slot = state.slot(key.clone());
        assert!(slot.should_emit(&Value::Integer(5), true));
        drop(slot);
        assert!(state.is_empty());

        state.slot(key.clone()).commit(Value::Integer(5));
        assert_eq!(state.last_value(&key), Some(Value::Integer(5)));
        assert!(!state.slot(key.clone()).should_emit(&Value::Integer(5), true));
        assert!(state.slot(key).should_emit(&Value::Integer(6), true));
    }

    #[test]
    fn test_keys_are_independent() {
        let state = ChangeState::new();
        state.slot(ChangeKey::new(1, "a")).commit(Value::Boolean(true));
        assert!(state.slot(ChangeKey::new(2, "a")).should_emit(&Value::Boolean(true), true));
        assert!(state.slot(ChangeKey::new(1, "b")).should_emit(&Value::Boolean(true), true));
        assert_eq!(state.len(), 1);
    }

    #[test]
    fn test_held_slot_does_not_block_other_keys() {
        let state = Arc::new(ChangeState::new());
        let held = state.slot(ChangeKey::new(1, "held"));

        // Enough keys that some share a map shard with the held one
        let worker = {
            let state = Arc::clone(&state);
            std::thread::spawn(move || {
                for i in 0..256 {
                    let slot = state.slot(ChangeKey::new(1, format!("v{}", i)));
                    assert!(slot.should_emit(&Value::Integer(i), true));
                    slot.commit(Value::Integer(i));
                }
            })
        };
        worker.join().unwrap();

        assert!(held.should_emit(&Value::Integer(0), true));
        held.commit(Value::Integer(0));
        assert_eq!(state.len(), 257);
    }

    #[test]
    fn test_concurrent_same_key_emits_once() {
        let state = Arc::new(ChangeState::new());
        let emitted = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let state = Arc::clone(&state);
                let emitted = Arc::clone(&emitted);
                std::thread::spawn(move || {
                    let slot = state.slot(ChangeKey::new(7, "x"));
                    if slot.should_emit(&Value::Integer(42), true) {
                        slot.commit(Value::Integer(42));
                        emitted.fetch_add(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(emitted.load(Ordering::SeqCst), 1);
    }
}
