// Copyright 2025 the Corax Project Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;

/// The per-partition id-to-entry cache, tagged with the coordinator epoch
/// assigned when the partition was loaded.
///
/// The inner map has its own short-lived lock so that entries can be added
/// while the manager-level state lock is only read-held. Entries themselves
/// carry their own lock; this map only hands out `Arc`s.
#[derive(Debug)]
pub(crate) struct PartitionCache<E> {
    pub(crate) coordinator_epoch: i64,
    entries: Mutex<HashMap<String, Arc<E>>>,
}

impl<E> PartitionCache<E> {
    pub(crate) fn new(coordinator_epoch: i64) -> Self {
        PartitionCache {
            coordinator_epoch,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) fn get(&self, id: &str) -> Option<Arc<E>> {
        let entries = self.entries.lock().expect("cache lock poisoned");
        entries.get(id).cloned()
    }

    /// Inserts `entry` iff `id` is absent. Returns the resident entry and
    /// whether this call inserted it.
    pub(crate) fn insert_if_absent(&self, id: &str, entry: Arc<E>) -> (Arc<E>, bool) {
        let mut entries = self.entries.lock().expect("cache lock poisoned");
        match entries.get(id) {
            Some(existing) => (existing.clone(), false),
            None => {
                entries.insert(id.to_string(), entry.clone());
                (entry, true)
            }
        }
    }

    /// Replaces the whole inner map with freshly loaded entries.
    pub(crate) fn replace_all(&self, loaded: HashMap<String, Arc<E>>) {
        let mut entries = self.entries.lock().expect("cache lock poisoned");
        *entries = loaded;
    }

    pub(crate) fn values(&self) -> Vec<Arc<E>> {
        let entries = self.entries.lock().expect("cache lock poisoned");
        entries.values().cloned().collect()
    }

    pub(crate) fn len(&self) -> usize {
        let entries = self.entries.lock().expect("cache lock poisoned");
        entries.len()
    }
}
