//! Input History
//!
//! Time-ordered log of `network_input` component values per entity, used
//! to re-simulate from an authoritative past state: the extrapolation
//! worker replays recorded inputs at their original timestamps while
//! stepping forward to the present.
//!
//! Retention is bounded by the client-server time difference plus a safety
//! factor; anything older can never be replayed again.

use crate::components::NetworkInput;
use crate::math::Scalar;
use crate::registry::{Entity, Registry};
use serde::{Deserialize, Serialize};

/// One recorded input frame.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InputEntry {
    /// Time the inputs were sampled.
    pub timestamp: Scalar,
    /// Input values per entity.
    pub inputs: Vec<(Entity, NetworkInput)>,
}

/// Time-ordered input log.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct InputHistory {
    entries: Vec<InputEntry>,
}

impl InputHistory {
    /// Create an empty history.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the current `network_input` values of `entities` at `time`.
    pub fn emplace(
        &mut self,
        registry: &Registry,
        entities: impl IntoIterator<Item = Entity>,
        time: Scalar,
    ) {
        let inputs: Vec<(Entity, NetworkInput)> = entities
            .into_iter()
            .filter_map(|e| registry.network_input.get(e).map(|i| (e, i.clone())))
            .collect();
        if !inputs.is_empty() {
            self.insert_entry(InputEntry {
                timestamp: time,
                inputs,
            });
        }
    }

    /// Record explicit input values at `time` (used for inputs arriving in
    /// snapshots from other clients).
    pub fn emplace_values(&mut self, inputs: Vec<(Entity, NetworkInput)>, time: Scalar) {
        if !inputs.is_empty() {
            self.insert_entry(InputEntry {
                timestamp: time,
                inputs,
            });
        }
    }

    fn insert_entry(&mut self, entry: InputEntry) {
        let pos = self
            .entries
            .partition_point(|e| e.timestamp <= entry.timestamp);
        self.entries.insert(pos, entry);
    }

    /// Drop entries older than `t_min`.
    pub fn erase_until(&mut self, t_min: Scalar) {
        self.entries.retain(|e| e.timestamp >= t_min);
    }

    /// Apply the most recent inputs at or before `time` to the registry.
    pub fn apply_at(&self, registry: &mut Registry, time: Scalar) {
        // Latest entry per entity not younger than `time` wins; walk from
        // the oldest so later entries overwrite earlier ones.
        for entry in self.entries.iter().take_while(|e| e.timestamp <= time) {
            for (entity, input) in &entry.inputs {
                if registry.is_valid(*entity) {
                    registry.network_input.insert_silent(*entity, input.clone());
                }
            }
        }
    }

    /// Number of recorded entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the history is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries within `[begin, end)`.
    pub fn range(&self, begin: Scalar, end: Scalar) -> impl Iterator<Item = &InputEntry> {
        self.entries
            .iter()
            .filter(move |e| e.timestamp >= begin && e.timestamp < end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emplace_records_inputs() {
        let mut registry = Registry::new();
        let e = registry.create();
        registry.network_input.insert(e, NetworkInput(vec![1, 2, 3]));

        let mut history = InputHistory::new();
        history.emplace(&registry, [e], 1.0);
        assert_eq!(history.len(), 1);
    }

    #[test]
    fn test_erase_until_prunes_old() {
        let mut history = InputHistory::new();
        let mut registry = Registry::new();
        let e = registry.create();
        registry.network_input.insert(e, NetworkInput(vec![1]));

        for t in 0..5 {
            history.emplace(&registry, [e], t as Scalar);
        }
        history.erase_until(2.5);
        assert_eq!(history.len(), 2);
    }

    #[test]
    fn test_apply_at_uses_latest_before_time() {
        let mut registry = Registry::new();
        let e = registry.create();
        registry.network_input.insert(e, NetworkInput(vec![0]));

        let mut history = InputHistory::new();
        history.emplace_values(vec![(e, NetworkInput(vec![1]))], 1.0);
        history.emplace_values(vec![(e, NetworkInput(vec![2]))], 2.0);
        history.emplace_values(vec![(e, NetworkInput(vec![3]))], 3.0);

        history.apply_at(&mut registry, 2.5);
        assert_eq!(registry.network_input.get(e).unwrap().0, vec![2]);
    }

    #[test]
    fn test_entries_stay_time_ordered() {
        let mut history = InputHistory::new();
        let mut registry = Registry::new();
        let e = registry.create();
        history.emplace_values(vec![(e, NetworkInput(vec![2]))], 2.0);
        history.emplace_values(vec![(e, NetworkInput(vec![1]))], 1.0);

        let times: Vec<Scalar> = history.range(0.0, 10.0).map(|en| en.timestamp).collect();
        assert_eq!(times, vec![1.0, 2.0]);
    }
}
