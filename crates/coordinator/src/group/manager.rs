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

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::atomic::AtomicI64;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;

use corax_bus_client::LogBus;
use corax_bus_client::LogProducer;
use corax_bus_client::LogReader;
use corax_codec::decode_group_key;
use corax_codec::decode_group_value;
use corax_codec::encode_group_key;
use corax_codec::encode_group_value;
use corax_codec::GroupMetadataValue;
use error_stack::ResultExt;
use mea::latch::Latch;
use tokio::sync::RwLock;

use crate::cache::PartitionCache;
use crate::current_time_ms;
use crate::error::translate_append_error;
use crate::group::Group;
use crate::group::OffsetAndMetadata;
use crate::lifecycle::PartitionTable;
use crate::route_group;
use crate::CoordinatorError;
use crate::CoordinatorResult;
use crate::GroupConfig;
use crate::LoadError;
use crate::LogGateway;
use crate::TopicPartition;

/// The consumer group coordinator cache of one broker.
///
/// Group state is authoritative on the metadata topic; this manager mirrors
/// the partitions the broker currently leads. Leadership gain drains the
/// partition through [`GroupMetadataManager::schedule_load`]; every durable
/// mutation goes through the append-then-apply path of
/// [`GroupMetadataManager::store_group`].
pub struct GroupMetadataManager<B: LogBus> {
    config: GroupConfig,
    gateway: LogGateway<B>,
    partitions: Mutex<PartitionTable>,
    state: RwLock<HashMap<i32, PartitionCache<Group>>>,
    load_latches: Mutex<HashMap<i32, Arc<Latch>>>,
    epoch_counter: AtomicI64,
}

struct StagedGroups {
    groups: HashMap<String, GroupMetadataValue>,
    removed: HashSet<String>,
}

impl<B: LogBus> GroupMetadataManager<B> {
    pub fn new(config: GroupConfig, bus: B) -> Self {
        let gateway = LogGateway::new(bus, config.offsets_topic_name.clone());
        GroupMetadataManager {
            config,
            gateway,
            partitions: Mutex::new(PartitionTable::default()),
            state: RwLock::new(HashMap::new()),
            load_latches: Mutex::new(HashMap::new()),
            epoch_counter: AtomicI64::new(0),
        }
    }

    fn partitions(&self) -> MutexGuard<'_, PartitionTable> {
        self.partitions.lock().expect("partition table lock poisoned")
    }

    fn load_latches(&self) -> MutexGuard<'_, HashMap<i32, Arc<Latch>>> {
        self.load_latches.lock().expect("latch table lock poisoned")
    }

    pub fn partition_for(&self, group_id: &str) -> i32 {
        route_group(group_id, self.config.offsets_topic_num_partitions)
    }

    pub fn is_partition_owned(&self, partition: i32) -> bool {
        self.partitions().is_owned(partition)
    }

    pub fn is_partition_loading(&self, partition: i32) -> bool {
        self.partitions().is_loading(partition)
    }

    pub fn any_partition_loading(&self) -> bool {
        self.partitions().any_loading()
    }

    pub fn is_group_local(&self, group_id: &str) -> bool {
        self.is_partition_owned(self.partition_for(group_id))
    }

    pub fn is_group_loading(&self, group_id: &str) -> bool {
        self.is_partition_loading(self.partition_for(group_id))
    }

    /// True iff this broker owns the group's partition and the group is
    /// either unknown there or already dead.
    pub async fn group_not_exists(&self, group_id: &str) -> bool {
        let partition = self.partition_for(group_id);
        let state = self.state.read().await;
        if !self.partitions().is_owned(partition) {
            return false;
        }
        match state.get(&partition) {
            Some(cache) => match cache.get(group_id) {
                Some(group) => group.is_dead(),
                None => true,
            },
            None => true,
        }
    }

    /// The canonical read path. Fails while the partition is loading and
    /// when this broker does not serve it at all.
    pub async fn get_group(&self, group_id: &str) -> CoordinatorResult<Option<Arc<Group>>> {
        let partition = self.partition_for(group_id);
        let state = self.state.read().await;
        if self.partitions().is_loading(partition) {
            return Err(CoordinatorError::CoordinatorLoadInProgress);
        }
        match state.get(&partition) {
            Some(cache) => Ok(cache.get(group_id)),
            None => Err(CoordinatorError::NotCoordinator),
        }
    }

    /// Seeds a fresh group entry unless one is already cached; returns the
    /// resident entry either way.
    pub async fn put_group_if_absent(&self, group: Group) -> CoordinatorResult<Arc<Group>> {
        let partition = self.partition_for(group.group_id());
        let state = self.state.read().await;
        if self.partitions().is_loading(partition) {
            return Err(CoordinatorError::CoordinatorLoadInProgress);
        }
        match state.get(&partition) {
            Some(cache) => {
                let group_id = group.group_id().to_string();
                let (resident, _) = cache.insert_if_absent(&group_id, Arc::new(group));
                Ok(resident)
            }
            None => Err(CoordinatorError::NotCoordinator),
        }
    }

    /// All group entries of the partitions this broker owns.
    pub async fn current_groups(&self) -> Vec<Arc<Group>> {
        let state = self.state.read().await;
        let owned: Vec<i32> = {
            let partitions = self.partitions();
            state
                .keys()
                .copied()
                .filter(|partition| partitions.is_owned(*partition))
                .collect()
        };
        owned
            .into_iter()
            .filter_map(|partition| state.get(&partition))
            .flat_map(|cache| cache.values())
            .collect()
    }

    pub async fn groups_for(&self, partition: i32) -> Vec<Arc<Group>> {
        let state = self.state.read().await;
        state
            .get(&partition)
            .map(|cache| cache.values())
            .unwrap_or_default()
    }

    /// Durably writes a snapshot of `group` with the supplied member
    /// assignments, then applies the assignments to the cached entry.
    ///
    /// The state read lock is deliberately held across the bus append:
    /// an unload has to wait the append out, and the re-validation below
    /// catches the migration once it happened.
    pub async fn store_group(
        &self,
        group: &Arc<Group>,
        assignments: &BTreeMap<String, Vec<u8>>,
    ) -> CoordinatorResult<()> {
        let group_id = group.group_id();
        let partition = self.partition_for(group_id);

        let state = self.state.read().await;
        {
            let partitions = self.partitions();
            if partitions.is_loading(partition) {
                return Err(CoordinatorError::CoordinatorLoadInProgress);
            }
            if !partitions.is_owned(partition) {
                return Err(CoordinatorError::NotCoordinator);
            }
        }
        let Some(cache) = state.get(&partition) else {
            return Err(CoordinatorError::NotCoordinator);
        };
        if cache.get(group_id).is_none() {
            return Err(CoordinatorError::NotCoordinator);
        }
        let epoch = cache.coordinator_epoch;

        let key = encode_group_key(group_id).map_err(|err| {
            log::error!("failed to encode key for group {group_id}: {err}");
            CoordinatorError::UnknownServerError
        })?;
        let value = encode_group_value(&group.to_value(assignments)).map_err(|err| {
            log::error!("failed to encode metadata for group {group_id}: {err}");
            CoordinatorError::UnknownServerError
        })?;

        let append_result = self
            .gateway
            .append(partition, Some(key), value, current_time_ms())
            .await;
        drop(state);

        let state = self.state.read().await;
        let resident = state
            .get(&partition)
            .filter(|cache| cache.coordinator_epoch == epoch)
            .and_then(|cache| cache.get(group_id));

        match append_result {
            Ok(_) => match resident {
                Some(resident) => {
                    resident.apply_assignments(assignments);
                    Ok(())
                }
                None => {
                    log::warn!(
                        "group metadata partition {partition} migrated while appending group {group_id}"
                    );
                    Err(CoordinatorError::NotCoordinator)
                }
            },
            Err(err) => {
                let translated = translate_append_error(&err);
                log::error!(
                    "failed to append metadata for group {group_id}: {err}; returning {translated}"
                );
                Err(translated)
            }
        }
    }

    /// Durably commits consumer offsets for `group`.
    ///
    /// Not implemented yet: the record family exists, but the filtering by
    /// metadata size, the producer fencing, and the expiry tombstoning do
    /// not. Callers get a server error until that lands.
    pub async fn store_offsets(
        &self,
        group: &Arc<Group>,
        member_id: &str,
        offsets: BTreeMap<TopicPartition, OffsetAndMetadata>,
    ) -> CoordinatorResult<()> {
        log::error!(
            "refusing to store {} offsets for group {} from member {member_id}: offset persistence is not implemented",
            offsets.len(),
            group.group_id()
        );
        Err(CoordinatorError::UnknownServerError)
    }

    /// Becomes the coordinator for `partition`: drains the compacted log up
    /// to a freshly appended placeholder, installs the surviving groups,
    /// and promotes the partition to owned. `on_loaded` fires once per
    /// installed group.
    ///
    /// Loading an owned partition is a no-op; a concurrent duplicate call
    /// waits until the in-flight drain finishes.
    pub async fn schedule_load(
        &self,
        partition: i32,
        on_loaded: impl Fn(&Arc<Group>),
    ) -> error_stack::Result<(), LoadError> {
        enum Claim {
            AlreadyOwned,
            InFlight(Arc<Latch>),
            Claimed { epoch: i64, latch: Arc<Latch> },
        }

        let claim = {
            let mut state = self.state.write().await;
            let mut partitions = self.partitions();
            if partitions.is_owned(partition) {
                Claim::AlreadyOwned
            } else if partitions.is_loading(partition) {
                let latch = self
                    .load_latches()
                    .get(&partition)
                    .cloned()
                    .expect("loading partition has a latch");
                Claim::InFlight(latch)
            } else {
                partitions.begin_load(partition);
                let epoch = self.epoch_counter.fetch_add(1, Ordering::SeqCst) + 1;
                state.insert(partition, PartitionCache::new(epoch));
                let latch = Arc::new(Latch::new(1));
                self.load_latches().insert(partition, latch.clone());
                Claim::Claimed { epoch, latch }
            }
        };

        let (epoch, latch) = match claim {
            Claim::AlreadyOwned => return Ok(()),
            Claim::InFlight(latch) => {
                latch.wait().await;
                return Ok(());
            }
            Claim::Claimed { epoch, latch } => (epoch, latch),
        };

        // resolve waiters on every exit, but only unregister our own latch
        let _latch_guard = scopeguard::guard(latch, |latch| {
            let mut latches = self.load_latches();
            if latches
                .get(&partition)
                .is_some_and(|registered| Arc::ptr_eq(registered, &latch))
            {
                latches.remove(&partition);
            }
            latch.count_down();
        });

        log::info!("loading group metadata partition {partition} at coordinator epoch {epoch}");

        let staged = match self.drain(partition).await {
            Ok(staged) => staged,
            Err(err) => {
                self.abandon_load(partition, epoch).await;
                return Err(err);
            }
        };

        let state = self.state.read().await;
        let Some(cache) = state
            .get(&partition)
            .filter(|cache| cache.coordinator_epoch == epoch)
        else {
            log::warn!(
                "group metadata partition {partition} was unloaded during the drain; abandoning staged state"
            );
            return Ok(());
        };

        for (group_id, value) in staged.groups {
            let group = Arc::new(Group::from_value(group_id.clone(), value));
            let (resident, inserted) = cache.insert_if_absent(&group_id, group);
            if !inserted {
                log::warn!(
                    "group {group_id} already cached while loading partition {partition}; keeping the resident entry"
                );
            }
            on_loaded(&resident);
        }
        if !staged.removed.is_empty() {
            // offset cleanup for tombstoned groups is not wired up yet
            log::debug!(
                "observed {} tombstoned groups while loading partition {partition}",
                staged.removed.len()
            );
        }

        if self.partitions().promote(partition) {
            log::info!(
                "finished loading group metadata partition {partition} ({} groups)",
                cache.len()
            );
        } else {
            log::warn!(
                "group metadata partition {partition} left loading during the drain; ownership not taken"
            );
        }
        Ok(())
    }

    async fn drain(&self, partition: i32) -> error_stack::Result<StagedGroups, LoadError> {
        let make_error = || LoadError(format!("failed to drain group metadata partition {partition}"));

        let end_id = self
            .gateway
            .placeholder(partition)
            .await
            .change_context_lazy(make_error)?;

        let mut groups = HashMap::new();
        let mut removed = HashSet::new();
        loop {
            let message = self
                .gateway
                .read_next(partition)
                .await
                .change_context_lazy(make_error)?;
            if message.id >= end_id {
                break;
            }
            let Some(key) = message.key else {
                // placeholders carry no key
                continue;
            };
            let group_id = decode_group_key(&key).change_context_lazy(make_error)?;
            match decode_group_value(&message.value).change_context_lazy(make_error)? {
                None => {
                    groups.remove(&group_id);
                    removed.insert(group_id);
                }
                Some(value) => {
                    removed.remove(&group_id);
                    groups.insert(group_id, value);
                }
            }
        }
        Ok(StagedGroups { groups, removed })
    }

    async fn abandon_load(&self, partition: i32, epoch: i64) {
        let ours = {
            let mut state = self.state.write().await;
            let ours = state
                .get(&partition)
                .is_some_and(|cache| cache.coordinator_epoch == epoch);
            if ours {
                state.remove(&partition);
                self.partitions().remove(partition);
            }
            ours
        };
        // drop the half-consumed reader too, a retry must drain from the
        // earliest message again
        if ours {
            self.close_partition_handles(partition).await;
        }
    }

    async fn close_partition_handles(&self, partition: i32) {
        let (producer, reader) = self.gateway.pop(partition).await;
        let topic = self.gateway.partition_topic(partition);
        if let Some(producer) = producer {
            let topic = topic.clone();
            let _close = corax_runtime::bus_runtime().spawn(async move {
                if let Err(err) = producer.close().await {
                    log::warn!("failed to close producer of {topic}: {err}");
                }
            });
        }
        if let Some(reader) = reader {
            let _close = corax_runtime::bus_runtime().spawn(async move {
                if let Err(err) = reader.close().await {
                    log::warn!("failed to close reader of {topic}: {err}");
                }
            });
        }
    }

    /// Gives up the coordinator role for `partition`: drops the cache,
    /// forgets the lifecycle state, and closes the bus handles without
    /// blocking the caller.
    ///
    /// Waits out in-flight appends (they hold the state lock in read mode)
    /// and is a no-op for partitions this broker never saw.
    pub async fn remove_groups_for_partition(&self, partition: i32) {
        let dropped = {
            let mut state = self.state.write().await;
            self.partitions().remove(partition);
            state.remove(&partition)
        };
        match dropped {
            Some(cache) => log::info!(
                "removed group metadata partition {partition} ({} cached groups)",
                cache.len()
            ),
            None => log::debug!("group metadata partition {partition} was not resident"),
        }
        self.close_partition_handles(partition).await;
    }
}
