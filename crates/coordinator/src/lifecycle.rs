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

use std::collections::HashSet;

/// Tracks which metadata partitions this broker is bringing up or serving.
///
/// Guarded by one mutex at the manager level. Critical sections must stay
/// short: the guard must never be held across an await point.
///
/// A partition is in at most one of the two sets. Transitions go
/// `absent -> loading -> owned -> absent`; an owned partition never turns
/// back into a loading one without being dropped first.
#[derive(Debug, Default)]
pub(crate) struct PartitionTable {
    loading: HashSet<i32>,
    owned: HashSet<i32>,
}

impl PartitionTable {
    pub(crate) fn is_owned(&self, partition: i32) -> bool {
        self.owned.contains(&partition)
    }

    pub(crate) fn is_loading(&self, partition: i32) -> bool {
        self.loading.contains(&partition)
    }

    pub(crate) fn any_loading(&self) -> bool {
        !self.loading.is_empty()
    }

    /// Marks `partition` as loading. Returns false if it is already known
    /// here, in which case the caller must not start another drain.
    pub(crate) fn begin_load(&mut self, partition: i32) -> bool {
        if self.loading.contains(&partition) || self.owned.contains(&partition) {
            return false;
        }
        self.loading.insert(partition)
    }

    /// Promotes `partition` from loading to owned. Returns false if it left
    /// the loading set in the meantime (a concurrent unload won the race),
    /// in which case the staged state must be abandoned.
    pub(crate) fn promote(&mut self, partition: i32) -> bool {
        if !self.loading.remove(&partition) {
            return false;
        }
        self.owned.insert(partition);
        true
    }

    /// Drops `partition` from both sets. Idempotent.
    pub(crate) fn remove(&mut self, partition: i32) {
        self.loading.remove(&partition);
        self.owned.remove(&partition);
    }
}
