//! Instance registry: the table that pairs native objects with the integer
//! handles shared with the remote peer.
//!
//! Calls arriving from either side of the bridge reference objects by
//! identifier, never by value. The registry owns the association in both
//! directions: identifier to instance (the forward map, holding each
//! instance either strongly or weakly) and instance address to identifier
//! (the reverse map, which keeps registration idempotent).
//!
//! The registry is single-threaded by construction - instances are `Rc` -
//! and every operation requires exclusive access. Embedders keep it on the
//! UI/event thread behind a `RefCell` and marshal background callbacks onto
//! that thread before touching it.

use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::rc::{Rc, Weak};

use crate::error::BridgeError;

/// An object held by the registry. Only identity matters; adapters downcast
/// to the concrete wrapper type they expect.
pub type Instance = Rc<dyn Any>;

/// Handle for one registered instance, shared with the remote peer.
///
/// Identifiers are assigned monotonically and are never reassigned to a
/// different instance while the original mapping could still be referenced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[derive(serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct InstanceId(u64);

impl InstanceId {
    /// Create an identifier from its raw value.
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// The raw identifier value as carried on the wire.
    pub const fn value(self) -> u64 {
        self.0
    }
}

impl From<u64> for InstanceId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl std::fmt::Display for InstanceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Ownership strength of one forward-map entry.
enum Entry {
    /// The registry keeps the instance alive.
    Strong(Rc<dyn Any>),
    /// The registry observes the instance; it disappears when the last
    /// owner elsewhere releases it.
    Weak(Weak<dyn Any>),
}

impl Entry {
    fn upgrade(&self) -> Option<Rc<dyn Any>> {
        match self {
            Entry::Strong(rc) => Some(Rc::clone(rc)),
            Entry::Weak(weak) => weak.upgrade(),
        }
    }

    fn is_live(&self) -> bool {
        match self {
            Entry::Strong(_) => true,
            Entry::Weak(weak) => weak.strong_count() > 0,
        }
    }

    /// Allocation address, valid as a map key even after a weak entry's
    /// instance has been reclaimed.
    fn address(&self) -> usize {
        match self {
            Entry::Strong(rc) => Rc::as_ptr(rc) as *const () as usize,
            Entry::Weak(weak) => weak.as_ptr() as *const () as usize,
        }
    }
}

fn address_of(instance: &Rc<dyn Any>) -> usize {
    Rc::as_ptr(instance) as *const () as usize
}

/// Bidirectional instance/identifier table with strong and weak entries.
///
/// One registry exists per plugin session. All operations are serialized:
/// the type is `!Send` and mutating calls take `&mut self`, so forward and
/// reverse map updates are atomic as a pair.
pub struct InstanceRegistry {
    entries: HashMap<InstanceId, Entry>,
    ids_by_address: HashMap<usize, InstanceId>,
    locked: HashSet<InstanceId>,
    next_id: u64,
}

impl InstanceRegistry {
    /// Create a registry assigning identifiers from 0.
    pub fn new() -> Self {
        Self::with_base(0)
    }

    /// Create a registry assigning identifiers from `base`.
    ///
    /// Embedders whose peer assigns its own identifiers can reserve the
    /// lower range for it, e.g. `with_base(1 << 16)`.
    pub fn with_base(base: u64) -> Self {
        Self {
            entries: HashMap::new(),
            ids_by_address: HashMap::new(),
            locked: HashSet::new(),
            next_id: base,
        }
    }

    /// Register `instance` with strong ownership and return its identifier.
    ///
    /// Re-registering an instance that is already present returns the
    /// previously assigned identifier without consuming a new one; the
    /// entry's ownership strength is left unchanged. An instance that was
    /// removed (or whose weak entry died) is treated as new.
    pub fn register(&mut self, instance: Rc<dyn Any>) -> InstanceId {
        if let Some(id) = self.live_identifier_of(&instance) {
            return id;
        }
        let id = self.allocate_id(&instance);
        self.entries.insert(id, Entry::Strong(instance));
        id
    }

    /// Register `instance` with weak ownership and return its identifier.
    ///
    /// Used for native-originated objects that must be visible to the peer
    /// without the registry keeping them alive. The entry reports absent
    /// once the last owner elsewhere releases the instance.
    pub fn register_weak(&mut self, instance: &Rc<dyn Any>) -> InstanceId {
        if let Some(id) = self.live_identifier_of(instance) {
            return id;
        }
        let id = self.allocate_id(instance);
        self.entries.insert(id, Entry::Weak(Rc::downgrade(instance)));
        id
    }

    /// Register an instance under a peer-chosen identifier.
    ///
    /// The entry is stored strongly and locked: the peer is its logical
    /// owner, so the sweep must never evict it. The monotonic counter is
    /// advanced past `id` so host assignment cannot collide with it later.
    pub fn register_remote(
        &mut self,
        id: InstanceId,
        instance: Rc<dyn Any>,
    ) -> Result<(), BridgeError> {
        if let Some(existing) = self.entries.get(&id) {
            if existing.is_live() {
                if existing.address() == address_of(&instance) {
                    // Same pairing already present; nothing to do.
                    self.locked.insert(id);
                    return Ok(());
                }
                return Err(BridgeError::IdentifierInUse(id));
            }
            self.purge(id);
        }
        if let Some(existing_id) = self.live_identifier_of(&instance) {
            return Err(BridgeError::AlreadyRegistered(existing_id));
        }
        self.purge_dead_at(address_of(&instance));
        self.ids_by_address.insert(address_of(&instance), id);
        self.entries.insert(id, Entry::Strong(instance));
        self.locked.insert(id);
        if id.value() >= self.next_id {
            self.next_id = id.value() + 1;
        }
        Ok(())
    }

    /// Look up the identifier for `instance`.
    ///
    /// Pure reverse lookup: never mutates and never changes ownership
    /// strength. Returns `None` for unregistered instances and for weak
    /// entries whose instance has been reclaimed.
    pub fn identifier_of(&self, instance: &Rc<dyn Any>) -> Option<InstanceId> {
        self.live_identifier_of(instance)
    }

    /// Look up the instance for `id`.
    ///
    /// Returns `None` for unknown identifiers and for weak entries whose
    /// instance has been reclaimed. A successful lookup does not guarantee
    /// liveness past the next sweep opportunity; callers holding the result
    /// across one must re-fetch.
    pub fn get(&self, id: InstanceId) -> Option<Rc<dyn Any>> {
        self.entries.get(&id).and_then(Entry::upgrade)
    }

    /// Look up the instance for `id` and downcast it to `T`.
    pub fn get_as<T: Any>(&self, id: InstanceId) -> Option<Rc<T>> {
        self.get(id).and_then(|rc| rc.downcast::<T>().ok())
    }

    /// Delete both mappings for `id` and return the removed instance.
    ///
    /// Returns `None` when the identifier is unknown; for a weak entry whose
    /// instance was already reclaimed the mappings are still deleted but no
    /// instance can be returned. Explicit removal is the only operation that
    /// releases a locked entry.
    pub fn remove(&mut self, id: InstanceId) -> Option<Rc<dyn Any>> {
        let entry = self.entries.remove(&id)?;
        self.ids_by_address.remove(&entry.address());
        self.locked.remove(&id);
        entry.upgrade()
    }

    /// Mark `id` as remote-originated.
    ///
    /// Locked entries are never evicted by [`sweep`](Self::sweep); only an
    /// explicit [`remove`](Self::remove) clears them. Returns `false` if the
    /// identifier is not registered.
    pub fn mark_locked(&mut self, id: InstanceId) -> bool {
        if self.entries.contains_key(&id) {
            self.locked.insert(id);
            true
        } else {
            false
        }
    }

    /// Whether `id` is marked remote-originated.
    pub fn is_locked(&self, id: InstanceId) -> bool {
        self.locked.contains(&id)
    }

    /// Evict entries that are provably unreachable through any other live
    /// owner, and return the evicted identifiers.
    ///
    /// Two kinds of entry go: weak entries whose instance has been
    /// reclaimed, and strong entries for which the registry holds the only
    /// remaining `Rc`. Locked entries always survive. Eviction happens only
    /// here - never synchronously with any other call - and scheduling is
    /// the embedder's choice, which is what makes the reclamation point
    /// nondeterministic from the peer's perspective.
    pub fn sweep(&mut self) -> Vec<InstanceId> {
        let mut evicted: Vec<InstanceId> = Vec::new();
        for (&id, entry) in &self.entries {
            if self.locked.contains(&id) {
                continue;
            }
            let unreachable = match entry {
                Entry::Strong(rc) => Rc::strong_count(rc) == 1,
                Entry::Weak(weak) => weak.strong_count() == 0,
            };
            if unreachable {
                evicted.push(id);
            }
        }
        evicted.sort_unstable();
        for &id in &evicted {
            self.purge(id);
        }
        if !evicted.is_empty() {
            log::debug!("registry sweep evicted {} instance(s)", evicted.len());
        }
        evicted
    }

    /// Whether `id` maps to a live instance.
    pub fn contains(&self, id: InstanceId) -> bool {
        self.entries.get(&id).is_some_and(Entry::is_live)
    }

    /// Number of entries, including weak entries not yet swept.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the registry holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of strongly held entries.
    pub fn strong_count(&self) -> usize {
        self.entries
            .values()
            .filter(|e| matches!(e, Entry::Strong(_)))
            .count()
    }

    /// Number of weakly held entries. May include entries whose instance has
    /// been reclaimed but not yet swept.
    pub fn weak_count(&self) -> usize {
        self.entries
            .values()
            .filter(|e| matches!(e, Entry::Weak(_)))
            .count()
    }

    /// Drop every entry. Called when the hosting plugin is deregistered.
    ///
    /// The identifier counter is not reset: identifiers from the cleared
    /// session are never handed out again within this registry's lifetime.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.ids_by_address.clear();
        self.locked.clear();
    }

    /// Reverse lookup that refuses to answer from a dead weak entry, so a
    /// reused allocation address can never alias a reclaimed instance.
    fn live_identifier_of(&self, instance: &Rc<dyn Any>) -> Option<InstanceId> {
        let id = *self.ids_by_address.get(&address_of(instance))?;
        let entry = self.entries.get(&id)?;
        (entry.is_live() && entry.address() == address_of(instance)).then_some(id)
    }

    fn allocate_id(&mut self, instance: &Rc<dyn Any>) -> InstanceId {
        self.purge_dead_at(address_of(instance));
        let id = InstanceId(self.next_id);
        self.next_id += 1;
        self.ids_by_address.insert(address_of(instance), id);
        id
    }

    /// Remove a stale mapping left at `address` by a reclaimed weak entry.
    fn purge_dead_at(&mut self, address: usize) {
        if let Some(&stale) = self.ids_by_address.get(&address) {
            let dead = self
                .entries
                .get(&stale)
                .is_some_and(|entry| !entry.is_live());
            if dead {
                self.purge(stale);
            }
        }
    }

    fn purge(&mut self, id: InstanceId) {
        if let Some(entry) = self.entries.remove(&id) {
            self.ids_by_address.remove(&entry.address());
        }
        self.locked.remove(&id);
    }
}

impl Default for InstanceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instance() -> Rc<dyn Any> {
        Rc::new(String::from("native object"))
    }

    #[test]
    fn test_register_assigns_monotonic_identifiers() {
        let mut registry = InstanceRegistry::new();
        assert_eq!(registry.register(instance()).value(), 0);
        assert_eq!(registry.register(instance()).value(), 1);
        assert_eq!(registry.register(instance()).value(), 2);
    }

    #[test]
    fn test_register_is_idempotent() {
        let mut registry = InstanceRegistry::new();
        let a: Rc<dyn Any> = Rc::new(41_u32);
        let first = registry.register(Rc::clone(&a));
        let second = registry.register(Rc::clone(&a));
        assert_eq!(first, second);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_identifier_roundtrip() {
        let mut registry = InstanceRegistry::new();
        let a: Rc<dyn Any> = Rc::new(7_i64);
        let id = registry.register(Rc::clone(&a));
        assert_eq!(registry.identifier_of(&a), Some(id));
    }

    #[test]
    fn test_remove_clears_both_mappings() {
        let mut registry = InstanceRegistry::new();
        let a: Rc<dyn Any> = Rc::new(7_i64);
        let id = registry.register(Rc::clone(&a));

        let removed = registry.remove(id).expect("instance was registered");
        assert!(Rc::ptr_eq(&removed, &a));
        assert!(registry.get(id).is_none());
        assert_eq!(registry.identifier_of(&a), None);
    }

    #[test]
    fn test_distinct_instances_get_distinct_identifiers() {
        let mut registry = InstanceRegistry::new();
        let a: Rc<dyn Any> = Rc::new(1_u8);
        let b: Rc<dyn Any> = Rc::new(2_u8);
        let id_a = registry.register(Rc::clone(&a));
        let id_b = registry.register(Rc::clone(&b));
        assert_ne!(id_a, id_b);
        assert_eq!(registry.identifier_of(&a), Some(id_a));
        assert_eq!(registry.identifier_of(&b), Some(id_b));
    }

    #[test]
    fn test_register_remove_lookup_sequence() {
        let mut registry = InstanceRegistry::new();
        let a: Rc<dyn Any> = Rc::new(String::from("a"));
        let b: Rc<dyn Any> = Rc::new(String::from("b"));

        assert_eq!(registry.register(Rc::clone(&a)).value(), 0);
        assert_eq!(registry.register(Rc::clone(&b)).value(), 1);
        assert_eq!(registry.register(Rc::clone(&a)).value(), 0);

        let removed = registry.remove(InstanceId::new(0)).unwrap();
        assert!(Rc::ptr_eq(&removed, &a));
        assert!(registry.get(InstanceId::new(0)).is_none());
        let got = registry.get(InstanceId::new(1)).unwrap();
        assert!(Rc::ptr_eq(&got, &b));
    }

    #[test]
    fn test_weak_entry_reports_absent_after_release() {
        let mut registry = InstanceRegistry::new();
        let a: Rc<dyn Any> = Rc::new(3.5_f64);
        let id = registry.register_weak(&a);
        assert!(registry.get(id).is_some());

        drop(a);
        assert!(registry.get(id).is_none());
        assert!(!registry.contains(id));
    }

    #[test]
    fn test_sweep_evicts_dead_weak_entries() {
        let mut registry = InstanceRegistry::new();
        let a: Rc<dyn Any> = Rc::new(1_u8);
        let b: Rc<dyn Any> = Rc::new(2_u8);
        let id_a = registry.register_weak(&a);
        let id_b = registry.register_weak(&b);

        drop(a);
        let evicted = registry.sweep();
        assert_eq!(evicted, vec![id_a]);
        assert_eq!(registry.len(), 1);
        assert!(registry.contains(id_b));
    }

    #[test]
    fn test_sweep_evicts_strong_entries_only_owned_here() {
        let mut registry = InstanceRegistry::new();
        let kept: Rc<dyn Any> = Rc::new(1_u8);
        let kept_id = registry.register(Rc::clone(&kept));
        let orphan_id = registry.register(instance());

        let evicted = registry.sweep();
        assert_eq!(evicted, vec![orphan_id]);
        assert!(registry.contains(kept_id));
        assert!(registry.get(orphan_id).is_none());
    }

    #[test]
    fn test_locked_entry_survives_sweep_until_removed() {
        let mut registry = InstanceRegistry::new();
        let id = registry.register(instance());
        assert!(registry.mark_locked(id));

        assert!(registry.sweep().is_empty());
        assert!(registry.contains(id));

        assert!(registry.remove(id).is_some());
        assert!(registry.get(id).is_none());
    }

    #[test]
    fn test_register_remote_locks_entry() {
        let mut registry = InstanceRegistry::new();
        let a: Rc<dyn Any> = Rc::new(9_u32);
        registry
            .register_remote(InstanceId::new(4), Rc::clone(&a))
            .unwrap();

        assert!(registry.is_locked(InstanceId::new(4)));
        assert_eq!(registry.identifier_of(&a), Some(InstanceId::new(4)));
        assert!(registry.sweep().is_empty());
    }

    #[test]
    fn test_register_remote_rejects_identifier_collision() {
        let mut registry = InstanceRegistry::new();
        registry
            .register_remote(InstanceId::new(0), instance())
            .unwrap();

        let err = registry
            .register_remote(InstanceId::new(0), instance())
            .unwrap_err();
        assert!(matches!(err, BridgeError::IdentifierInUse(id) if id.value() == 0));
    }

    #[test]
    fn test_register_remote_rejects_instance_collision() {
        let mut registry = InstanceRegistry::new();
        let a: Rc<dyn Any> = Rc::new(9_u32);
        let id = registry.register(Rc::clone(&a));

        let err = registry
            .register_remote(InstanceId::new(100), Rc::clone(&a))
            .unwrap_err();
        assert!(matches!(err, BridgeError::AlreadyRegistered(existing) if existing == id));
    }

    #[test]
    fn test_register_remote_keeps_counter_ahead() {
        let mut registry = InstanceRegistry::new();
        registry
            .register_remote(InstanceId::new(10), instance())
            .unwrap();
        assert_eq!(registry.register(instance()).value(), 11);
    }

    #[test]
    fn test_with_base_offsets_assignment() {
        let mut registry = InstanceRegistry::with_base(1 << 16);
        assert_eq!(registry.register(instance()).value(), 65536);
        assert_eq!(registry.register(instance()).value(), 65537);
    }

    #[test]
    fn test_identifiers_are_not_reused_after_removal() {
        let mut registry = InstanceRegistry::new();
        let id = registry.register(instance());
        registry.remove(id);
        let next = registry.register(instance());
        assert!(next > id);
    }

    #[test]
    fn test_removed_instance_registers_as_new() {
        let mut registry = InstanceRegistry::new();
        let a: Rc<dyn Any> = Rc::new(5_u16);
        let first = registry.register(Rc::clone(&a));
        registry.remove(first);

        let second = registry.register(Rc::clone(&a));
        assert_ne!(first, second);
        assert_eq!(registry.identifier_of(&a), Some(second));
    }

    #[test]
    fn test_dead_weak_entry_keeps_maps_consistent() {
        let mut registry = InstanceRegistry::new();
        let a: Rc<dyn Any> = Rc::new(5_u16);
        let id = registry.register_weak(&a);
        drop(a);

        // The stale pair lingers until swept but is unreachable.
        assert_eq!(registry.len(), 1);
        assert!(registry.get(id).is_none());

        let fresh: Rc<dyn Any> = Rc::new(5_u16);
        let fresh_id = registry.register(Rc::clone(&fresh));
        assert_ne!(id, fresh_id);
        assert_eq!(registry.identifier_of(&fresh), Some(fresh_id));
    }

    #[test]
    fn test_get_as_downcasts() {
        let mut registry = InstanceRegistry::new();
        let id = registry.register(Rc::new(String::from("payload")));
        let s = registry.get_as::<String>(id).unwrap();
        assert_eq!(*s, "payload");
        assert!(registry.get_as::<u32>(id).is_none());
    }

    #[test]
    fn test_clear_drops_all_entries_but_keeps_counter() {
        let mut registry = InstanceRegistry::new();
        registry.register(instance());
        registry.register(instance());
        registry.clear();
        assert!(registry.is_empty());
        assert_eq!(registry.register(instance()).value(), 2);
    }

    #[test]
    fn test_strong_and_weak_counts() {
        let mut registry = InstanceRegistry::new();
        let a: Rc<dyn Any> = Rc::new(1_u8);
        registry.register(instance());
        registry.register_weak(&a);
        assert_eq!(registry.strong_count(), 1);
        assert_eq!(registry.weak_count(), 1);
    }
}
