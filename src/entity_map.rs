//! Bidirectional Entity Mapping
//!
//! Translates entity handles between two registries: a remote peer's
//! handles and local ones. Used by the networking importers, by island
//! workers mirroring coordinator entities, and by the extrapolation worker.
//!
//! Both directions stay consistent: for any inserted pair,
//! `at_remote(remote) == local` and `at_local(local) == remote` until the
//! pair is erased.

use crate::registry::Entity;
use std::collections::HashMap;

/// Bidirectional remote/local entity handle map.
#[derive(Clone, Debug, Default)]
pub struct EntityMap {
    remote_to_local: HashMap<Entity, Entity>,
    local_to_remote: HashMap<Entity, Entity>,
}

impl EntityMap {
    /// Create an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a pair, replacing any previous mapping of either handle.
    pub fn insert(&mut self, remote: Entity, local: Entity) {
        if let Some(old_local) = self.remote_to_local.insert(remote, local) {
            self.local_to_remote.remove(&old_local);
        }
        if let Some(old_remote) = self.local_to_remote.insert(local, remote) {
            self.remote_to_local.remove(&old_remote);
        }
    }

    /// Local handle of a remote entity.
    pub fn at_remote(&self, remote: Entity) -> Option<Entity> {
        self.remote_to_local.get(&remote).copied()
    }

    /// Remote handle of a local entity.
    pub fn at_local(&self, local: Entity) -> Option<Entity> {
        self.local_to_remote.get(&local).copied()
    }

    /// Whether a remote handle is known.
    pub fn contains_remote(&self, remote: Entity) -> bool {
        self.remote_to_local.contains_key(&remote)
    }

    /// Whether a local handle is known.
    pub fn contains_local(&self, local: Entity) -> bool {
        self.local_to_remote.contains_key(&local)
    }

    /// Erase by remote handle.
    pub fn erase_remote(&mut self, remote: Entity) {
        if let Some(local) = self.remote_to_local.remove(&remote) {
            self.local_to_remote.remove(&local);
        }
    }

    /// Erase by local handle.
    pub fn erase_local(&mut self, local: Entity) {
        if let Some(remote) = self.local_to_remote.remove(&local) {
            self.remote_to_local.remove(&remote);
        }
    }

    /// Number of mapped pairs.
    pub fn len(&self) -> usize {
        self.remote_to_local.len()
    }

    /// Whether the map is empty.
    pub fn is_empty(&self) -> bool {
        self.remote_to_local.is_empty()
    }

    /// Iterate `(remote, local)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (Entity, Entity)> + '_ {
        self.remote_to_local.iter().map(|(&r, &l)| (r, l))
    }

    /// The same mapping with remote and local swapped, for translating in
    /// the opposite direction.
    pub fn inverted(&self) -> Self {
        Self {
            remote_to_local: self.local_to_remote.clone(),
            local_to_remote: self.remote_to_local.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Registry;

    #[test]
    fn test_round_trip() {
        let mut registry = Registry::new();
        let remote = registry.create();
        let local = registry.create();

        let mut map = EntityMap::new();
        map.insert(remote, local);

        assert_eq!(map.at_remote(remote), Some(local));
        assert_eq!(map.at_local(local), Some(remote));

        map.erase_remote(remote);
        assert_eq!(map.at_remote(remote), None);
        assert_eq!(map.at_local(local), None);
        assert!(map.is_empty());
    }

    #[test]
    fn test_reinsert_replaces_both_directions() {
        let mut registry = Registry::new();
        let r1 = registry.create();
        let l1 = registry.create();
        let l2 = registry.create();

        let mut map = EntityMap::new();
        map.insert(r1, l1);
        map.insert(r1, l2);

        assert_eq!(map.at_remote(r1), Some(l2));
        assert_eq!(map.at_local(l1), None);
        assert_eq!(map.at_local(l2), Some(r1));
        assert_eq!(map.len(), 1);
    }
}
