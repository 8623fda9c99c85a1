//! Bidirectional child registry
//!
//! Both registry tiers (groups of devices, the manager of groups) keep the same
//! two maps: key → child handle for routing, and worker id → key for cleaning up
//! after a termination notification. [`Registry`] owns both maps and only mutates
//! them together, so for every tracked key `k`:
//!
//! ```text
//! by_worker[by_key[k].worker_id()] == k      and      by_key.len() == by_worker.len()
//! ```

use std::borrow::Borrow;
use std::collections::{HashMap, HashSet};
use std::hash::Hash;

use crate::actors::worker::{Worker, WorkerId};

#[derive(Debug)]
pub struct Registry<K, H> {
    by_key: HashMap<K, H>,
    by_worker: HashMap<WorkerId, K>,
}

impl<K, H> Registry<K, H>
where
    K: Eq + Hash + Clone,
    H: Worker,
{
    pub fn new() -> Self {
        Self {
            by_key: HashMap::new(),
            by_worker: HashMap::new(),
        }
    }

    pub fn get<Q>(&self, key: &Q) -> Option<&H>
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        self.by_key.get(key)
    }

    /// Track `handle` under `key`
    ///
    /// Any handle previously tracked under the same key is untracked and returned.
    pub fn insert(&mut self, key: K, handle: H) -> Option<H> {
        let worker = handle.worker_id();

        let previous = self.by_key.insert(key.clone(), handle);
        if let Some(previous) = &previous {
            self.by_worker.remove(&previous.worker_id());
        }

        // a worker lives under exactly one key
        if let Some(old_key) = self.by_worker.insert(worker, key.clone()) {
            if old_key != key {
                self.by_key.remove(&old_key);
            }
        }

        previous
    }

    /// Untrack whatever is stored under `key`
    pub fn remove<Q>(&mut self, key: &Q) -> Option<H>
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        let handle = self.by_key.remove(key)?;
        self.by_worker.remove(&handle.worker_id());
        Some(handle)
    }

    /// Untrack the child with the given worker id
    ///
    /// Returns `None` if the worker is unknown, e.g. because it was already
    /// replaced by a newer worker under the same key.
    pub fn remove_worker(&mut self, worker: WorkerId) -> Option<(K, H)> {
        let key = self.by_worker.remove(&worker)?;
        let handle = self.by_key.remove(&key)?;
        Some((key, handle))
    }

    pub fn contains_worker(&self, worker: WorkerId) -> bool {
        self.by_worker.contains_key(&worker)
    }

    /// Snapshot of all tracked keys
    pub fn keys(&self) -> HashSet<K> {
        self.by_key.keys().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&K, &H)> {
        self.by_key.iter()
    }

    /// Untrack everything, handing back the handles
    pub fn drain(&mut self) -> Vec<(K, H)> {
        self.by_worker.clear();
        self.by_key.drain().collect()
    }

    pub fn len(&self) -> usize {
        self.by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }

    /// Check the forward/reverse consistency invariant
    pub fn is_consistent(&self) -> bool {
        self.by_key.len() == self.by_worker.len()
            && self
                .by_key
                .iter()
                .all(|(key, handle)| self.by_worker.get(&handle.worker_id()) == Some(key))
    }
}

impl<K, H> Default for Registry<K, H>
where
    K: Eq + Hash + Clone,
    H: Worker,
{
    fn default() -> Self {
        Self::new()
    }
}
