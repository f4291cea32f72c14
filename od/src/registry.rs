//! Instance registry
//!
//! Ordered, deduplicated store of instances with a round-robin cursor. The
//! registry does no locking of its own; the dispatcher owns it behind its lock
//! and every state transition below runs while that lock is held.

use tracing::debug;

use crate::instance::{Instance, InstanceId, InstanceSnapshot, InstanceState};

#[derive(Debug)]
struct Entry {
    address: String,
    state: InstanceState,
    active_count: usize,

    /// Bumped on every block/unblock so leases taken before a quarantine go stale
    generation: u64,
}

impl Entry {
    fn handle(&self, index: usize) -> Instance {
        Instance::new(InstanceId(index), self.address.clone())
    }

    fn snapshot(&self) -> InstanceSnapshot {
        InstanceSnapshot {
            address: self.address.clone(),
            state: self.state,
            active_count: self.active_count,
        }
    }
}

/// Proof that one task slot was acquired on an instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lease {
    instance: Instance,
    generation: u64,
}

impl Lease {
    pub fn instance(&self) -> &Instance {
        &self.instance
    }
}

/// Ordered collection of instances
#[derive(Debug, Default)]
pub struct Registry {
    entries: Vec<Entry>,
    cursor: usize,

    /// Max concurrent tasks on a Running instance (0 = unbounded)
    per_instance_limit: usize,
}

impl Registry {
    pub fn new(per_instance_limit: usize) -> Self {
        debug!(per_instance_limit, "Registry::new: called");
        Self {
            entries: Vec::new(),
            cursor: 0,
            per_instance_limit,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Insert an instance unless one with the same address already exists
    ///
    /// Returns the handle of the new or the existing instance.
    pub fn add(&mut self, address: &str) -> Instance {
        debug!(%address, "Registry::add: called");
        if let Some(index) = self.entries.iter().position(|e| e.address == address) {
            debug!(%address, index, "Registry::add: already registered");
            return self.entries[index].handle(index);
        }

        self.entries.push(Entry {
            address: address.to_string(),
            state: InstanceState::Ready,
            active_count: 0,
            generation: 0,
        });
        let index = self.entries.len() - 1;
        self.entries[index].handle(index)
    }

    /// Look up an instance by address
    pub fn find(&self, address: &str) -> Option<Instance> {
        self.entries
            .iter()
            .position(|e| e.address == address)
            .map(|index| self.entries[index].handle(index))
    }

    /// Round-robin over all instances regardless of state
    pub fn next(&mut self) -> Option<Instance> {
        if self.entries.is_empty() {
            debug!("Registry::next: empty registry");
            return None;
        }
        let index = self.cursor % self.entries.len();
        self.cursor = self.cursor.wrapping_add(1);
        Some(self.entries[index].handle(index))
    }

    /// First instance in insertion order that can take a task
    ///
    /// With `for_running_capacity` false, only Ready instances qualify. With it
    /// true, only Running instances below the per-instance limit qualify; a limit
    /// of 0 lets any Running instance take another task.
    pub fn select_available(&self, for_running_capacity: bool) -> Option<Instance> {
        let limit = self.per_instance_limit;
        self.entries
            .iter()
            .enumerate()
            .find(|(_, e)| {
                if for_running_capacity {
                    e.state == InstanceState::Running && (limit == 0 || e.active_count < limit)
                } else {
                    e.state == InstanceState::Ready
                }
            })
            .map(|(index, e)| e.handle(index))
    }

    /// True iff every instance is Blocked (vacuously true when empty)
    pub fn all_blocked(&self) -> bool {
        self.entries.iter().all(|e| e.state == InstanceState::Blocked)
    }

    pub fn count_by_state(&self, state: InstanceState) -> usize {
        self.entries.iter().filter(|e| e.state == state).count()
    }

    pub fn block(&mut self, instance: &Instance) {
        debug!(address = %instance.address(), "Registry::block: called");
        if let Some(entry) = self.entry_mut(instance) {
            entry.state = InstanceState::Blocked;
            entry.active_count = 0;
            entry.generation += 1;
        }
    }

    pub fn unblock(&mut self, instance: &Instance) {
        debug!(address = %instance.address(), "Registry::unblock: called");
        if let Some(entry) = self.entry_mut(instance) {
            entry.state = InstanceState::Ready;
            entry.active_count = 0;
            entry.generation += 1;
        }
    }

    /// Take one task slot on the instance
    ///
    /// Returns None for an instance this registry does not hold.
    pub fn acquire(&mut self, instance: &Instance) -> Option<Lease> {
        debug!(address = %instance.address(), "Registry::acquire: called");
        let entry = self.entry_mut(instance)?;
        entry.state = InstanceState::Running;
        entry.active_count += 1;
        Some(Lease {
            instance: instance.clone(),
            generation: entry.generation,
        })
    }

    /// Give back a task slot
    ///
    /// Leases taken before the instance was blocked or unblocked are ignored.
    /// Returns whether the release changed the registry.
    pub fn release(&mut self, lease: &Lease) -> bool {
        debug!(address = %lease.instance.address(), "Registry::release: called");
        let Some(entry) = self.entry_mut(&lease.instance) else {
            return false;
        };
        if entry.generation != lease.generation {
            debug!(address = %lease.instance.address(), "Registry::release: stale lease, ignoring");
            return false;
        }

        entry.active_count = entry.active_count.saturating_sub(1);
        if entry.active_count == 0 && entry.state == InstanceState::Running {
            entry.state = InstanceState::Ready;
        }
        true
    }

    pub fn snapshot(&self, instance: &Instance) -> Option<InstanceSnapshot> {
        self.entry(instance).map(Entry::snapshot)
    }

    pub fn snapshots(&self) -> Vec<InstanceSnapshot> {
        self.entries.iter().map(Entry::snapshot).collect()
    }

    fn entry(&self, instance: &Instance) -> Option<&Entry> {
        self.entries
            .get(instance.id().index())
            .filter(|e| e.address == instance.address())
    }

    fn entry_mut(&mut self, instance: &Instance) -> Option<&mut Entry> {
        let entry = self
            .entries
            .get_mut(instance.id().index())
            .filter(|e| e.address == instance.address());
        if entry.is_none() {
            debug!(address = %instance.address(), "Registry::entry_mut: unknown instance");
        }
        entry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn registry_with(addresses: &[&str], limit: usize) -> Registry {
        let mut registry = Registry::new(limit);
        for address in addresses {
            registry.add(address);
        }
        registry
    }

    #[test]
    fn test_add_is_idempotent() {
        let mut registry = Registry::new(0);
        let first = registry.add("a");
        let again = registry.add("a");
        registry.add("b");

        assert_eq!(registry.len(), 2);
        assert_eq!(first, again);
    }

    #[test]
    fn test_next_on_empty_registry() {
        let mut registry = Registry::new(0);
        assert!(registry.next().is_none());
    }

    #[test]
    fn test_select_ready_in_insertion_order() {
        let mut registry = registry_with(&["a", "b", "c"], 0);
        let a = registry.find("a").unwrap();
        registry.acquire(&a);

        let selected = registry.select_available(false).unwrap();
        assert_eq!(selected.address(), "b");
    }

    #[test]
    fn test_select_running_respects_per_instance_limit() {
        let mut registry = registry_with(&["a"], 2);
        let a = registry.find("a").unwrap();

        assert!(registry.select_available(true).is_none());
        registry.acquire(&a);
        assert_eq!(registry.select_available(true), Some(a.clone()));
        registry.acquire(&a);
        assert!(registry.select_available(true).is_none());
    }

    #[test]
    fn test_select_running_unbounded_when_limit_zero() {
        let mut registry = registry_with(&["a"], 0);
        let a = registry.find("a").unwrap();
        for _ in 0..5 {
            registry.acquire(&a).unwrap();
        }
        assert_eq!(registry.select_available(true), Some(a.clone()));
        assert_eq!(registry.snapshot(&a).unwrap().active_count, 5);
    }

    #[test]
    fn test_select_running_limit_one_never_colocates() {
        let mut registry = registry_with(&["a"], 1);
        let a = registry.find("a").unwrap();
        registry.acquire(&a).unwrap();
        assert!(registry.select_available(true).is_none());
    }

    #[test]
    fn test_all_blocked() {
        let mut registry = Registry::new(0);
        assert!(registry.all_blocked());

        let a = registry.add("a");
        let b = registry.add("b");
        assert!(!registry.all_blocked());

        registry.block(&a);
        assert!(!registry.all_blocked());
        registry.block(&b);
        assert!(registry.all_blocked());
    }

    #[test]
    fn test_acquire_and_release_cycle() {
        let mut registry = registry_with(&["a"], 0);
        let a = registry.find("a").unwrap();

        let first = registry.acquire(&a).unwrap();
        let second = registry.acquire(&a).unwrap();
        let snap = registry.snapshot(&a).unwrap();
        assert_eq!(snap.state, InstanceState::Running);
        assert_eq!(snap.active_count, 2);

        assert!(registry.release(&first));
        assert_eq!(registry.snapshot(&a).unwrap().state, InstanceState::Running);

        assert!(registry.release(&second));
        let snap = registry.snapshot(&a).unwrap();
        assert_eq!(snap.state, InstanceState::Ready);
        assert_eq!(snap.active_count, 0);
    }

    #[test]
    fn test_block_clears_active_count() {
        let mut registry = registry_with(&["a"], 0);
        let a = registry.find("a").unwrap();
        registry.acquire(&a);
        registry.block(&a);

        let snap = registry.snapshot(&a).unwrap();
        assert_eq!(snap.state, InstanceState::Blocked);
        assert_eq!(snap.active_count, 0);
        assert_eq!(registry.count_by_state(InstanceState::Running), 0);
    }

    #[test]
    fn test_stale_lease_does_not_touch_reinstated_instance() {
        let mut registry = registry_with(&["a"], 0);
        let a = registry.find("a").unwrap();

        let old = registry.acquire(&a).unwrap();
        registry.block(&a);
        registry.unblock(&a);
        let fresh = registry.acquire(&a).unwrap();

        assert!(!registry.release(&old));
        let snap = registry.snapshot(&a).unwrap();
        assert_eq!(snap.state, InstanceState::Running);
        assert_eq!(snap.active_count, 1);

        assert!(registry.release(&fresh));
        assert_eq!(registry.snapshot(&a).unwrap().state, InstanceState::Ready);
    }

    #[test]
    fn test_release_on_blocked_instance_keeps_it_blocked() {
        let mut registry = registry_with(&["a"], 0);
        let a = registry.find("a").unwrap();
        let lease = registry.acquire(&a).unwrap();
        registry.block(&a);

        assert!(!registry.release(&lease));
        assert_eq!(registry.snapshot(&a).unwrap().state, InstanceState::Blocked);
    }

    #[test]
    fn test_foreign_instance_is_ignored() {
        let mut registry = registry_with(&["a"], 0);
        let mut other = Registry::new(0);
        other.add("z");
        let foreign = other.find("z").unwrap();

        registry.block(&foreign);
        assert!(registry.acquire(&foreign).is_none());
        assert!(registry.snapshot(&foreign).is_none());
        assert_eq!(registry.count_by_state(InstanceState::Running), 0);
        assert!(!registry.all_blocked());
    }

    proptest! {
        #[test]
        fn prop_addresses_stay_unique(addresses in proptest::collection::vec("[a-e]", 0..40)) {
            let mut registry = Registry::new(0);
            for address in &addresses {
                registry.add(address);
            }
            let mut seen: Vec<String> = registry.snapshots().into_iter().map(|s| s.address).collect();
            let total = seen.len();
            seen.sort();
            seen.dedup();
            prop_assert_eq!(seen.len(), total);
        }

        #[test]
        fn prop_next_cycles_in_insertion_order(size in 1usize..8, calls in 0usize..64) {
            let addresses: Vec<String> = (0..size).map(|i| format!("10.0.0.{}", i)).collect();
            let mut registry = Registry::new(0);
            for address in &addresses {
                registry.add(address);
            }
            for n in 0..calls {
                let instance = registry.next().unwrap();
                prop_assert_eq!(instance.id().index(), n % size);
                prop_assert_eq!(instance.address(), addresses[n % size].as_str());
            }
        }
    }
}
