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
use std::sync::atomic::AtomicI64;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;

use corax_bus_client::LogBus;
use corax_bus_client::LogProducer;
use corax_bus_client::LogReader;
use corax_codec::decode_txn_key;
use corax_codec::decode_txn_value;
use corax_codec::encode_txn_key;
use corax_codec::encode_txn_value;
use corax_codec::TransactionLogValue;
use error_stack::ResultExt;
use mea::latch::Latch;
use tokio::sync::RwLock;

use crate::cache::PartitionCache;
use crate::current_time_ms;
use crate::error::translate_append_error;
use crate::lifecycle::PartitionTable;
use crate::route_txn;
use crate::txn::metadata::log_value_of;
use crate::txn::TransactionEntry;
use crate::txn::TransactionMetadata;
use crate::txn::TransactionResult;
use crate::txn::TransactionTransit;
use crate::CoordinatorError;
use crate::CoordinatorResult;
use crate::LoadError;
use crate::LogGateway;
use crate::TransactionConfig;

/// The transaction coordinator cache of one broker.
///
/// Mirrors the transaction log partitions this broker leads. State
/// transitions are staged on the entry, appended to the log, and applied
/// in place only once the bus acknowledged the record, re-validating that
/// the partition did not migrate during the append window.
pub struct TransactionStateManager<B: LogBus> {
    config: TransactionConfig,
    gateway: LogGateway<B>,
    partitions: Mutex<PartitionTable>,
    state: RwLock<HashMap<i32, PartitionCache<TransactionEntry>>>,
    load_latches: Mutex<HashMap<i32, Arc<Latch>>>,
    epoch_counter: AtomicI64,
}

impl<B: LogBus> TransactionStateManager<B> {
    pub fn new(config: TransactionConfig, bus: B) -> Self {
        let gateway = LogGateway::new(bus, config.transaction_log_topic_name.clone());
        TransactionStateManager {
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

    pub fn partition_for(&self, transactional_id: &str) -> i32 {
        route_txn(transactional_id, self.config.transaction_log_num_partitions)
    }

    pub fn is_partition_owned(&self, partition: i32) -> bool {
        self.partitions().is_owned(partition)
    }

    pub fn is_partition_loading(&self, partition: i32) -> bool {
        self.partitions().is_loading(partition)
    }

    /// Policy check for client-supplied transaction timeouts.
    pub fn validate_transaction_timeout_ms(&self, timeout_ms: i32) -> bool {
        timeout_ms > 0 && timeout_ms <= self.config.transaction_max_timeout_ms
    }

    /// The canonical read path: the entry for `transactional_id` together
    /// with the coordinator epoch of its partition.
    pub async fn get_transaction_state(
        &self,
        transactional_id: &str,
    ) -> CoordinatorResult<Option<(i64, Arc<TransactionEntry>)>> {
        let partition = self.partition_for(transactional_id);
        let state = self.state.read().await;
        if self.partitions().is_loading(partition) {
            return Err(CoordinatorError::ConcurrentTransactions);
        }
        match state.get(&partition) {
            Some(cache) => Ok(cache
                .get(transactional_id)
                .map(|entry| (cache.coordinator_epoch, entry))),
            None => Err(CoordinatorError::NotCoordinator),
        }
    }

    /// Seeds a fresh entry unless one is already cached; returns the
    /// resident entry and its partition's coordinator epoch either way.
    pub async fn put_transaction_state_if_absent(
        &self,
        transactional_id: &str,
        metadata: TransactionMetadata,
    ) -> CoordinatorResult<(i64, Arc<TransactionEntry>)> {
        let partition = self.partition_for(transactional_id);
        let state = self.state.read().await;
        if self.partitions().is_loading(partition) {
            return Err(CoordinatorError::ConcurrentTransactions);
        }
        match state.get(&partition) {
            Some(cache) => {
                let entry = Arc::new(TransactionEntry::new(transactional_id, metadata));
                let (resident, _) = cache.insert_if_absent(transactional_id, entry);
                Ok((cache.coordinator_epoch, resident))
            }
            None => Err(CoordinatorError::NotCoordinator),
        }
    }

    /// Durably appends `transit` for `transactional_id` and applies it to
    /// the cached entry once acknowledged.
    ///
    /// `coordinator_epoch` must be the epoch the caller observed when it
    /// decided the transition; a mismatch before the append means nothing
    /// is written, a mismatch after it means the cache migrated during the
    /// append window and the already durable record is left for the next
    /// coordinator to reconcile.
    ///
    /// On append failure `retry` decides whether the staged transition
    /// stays pending (the caller will retry) or is rolled back in memory.
    /// The append error is surfaced either way.
    pub async fn append_transaction(
        &self,
        transactional_id: &str,
        coordinator_epoch: i64,
        transit: TransactionTransit,
        retry: impl Fn(&CoordinatorError) -> bool,
    ) -> CoordinatorResult<()> {
        let partition = self.partition_for(transactional_id);

        let state = self.state.read().await;
        if self.partitions().is_loading(partition) {
            return Err(CoordinatorError::ConcurrentTransactions);
        }
        let Some(cache) = state.get(&partition) else {
            return Err(CoordinatorError::NotCoordinator);
        };
        if cache.coordinator_epoch != coordinator_epoch {
            // stale epoch: refuse before anything reaches the log
            return Err(CoordinatorError::NotCoordinator);
        }
        let Some(entry) = cache.get(transactional_id) else {
            return Err(CoordinatorError::NotCoordinator);
        };

        let key = encode_txn_key(transactional_id).map_err(|err| {
            log::error!("failed to encode key for transaction {transactional_id}: {err}");
            CoordinatorError::UnknownServerError
        })?;
        let value = encode_txn_value(&log_value_of(&transit)).map_err(|err| {
            log::error!("failed to encode state of transaction {transactional_id}: {err}");
            CoordinatorError::UnknownServerError
        })?;
        if value.len() > self.config.max_metadata_size {
            log::error!(
                "state record of transaction {transactional_id} is {} bytes, over the {} byte cap",
                value.len(),
                self.config.max_metadata_size
            );
            return Err(CoordinatorError::UnknownServerError);
        }

        entry.prepare_transition(&transit)?;

        // hot suspension point: the state read lock stays held across the
        // append so ownership cannot migrate silently underneath it
        let append_result = self
            .gateway
            .append(
                partition,
                Some(key),
                value,
                transit.txn_last_update_timestamp,
            )
            .await;
        drop(state);

        let state = self.state.read().await;
        let resident = state
            .get(&partition)
            .filter(|cache| cache.coordinator_epoch == coordinator_epoch)
            .and_then(|cache| cache.get(transactional_id));

        match append_result {
            Ok(_) => match resident {
                Some(entry) => entry.complete_transition_to(&transit),
                None => {
                    log::warn!(
                        "transaction partition {partition} migrated while appending {transactional_id}; \
                         the durable record stays in the log"
                    );
                    Err(CoordinatorError::NotCoordinator)
                }
            },
            Err(err) => {
                let translated = translate_append_error(&err);
                log::error!(
                    "failed to append state of transaction {transactional_id}: {err}; returning {translated}"
                );
                if let Some(entry) = resident {
                    if retry(&translated) {
                        log::info!(
                            "keeping pending transition of transaction {transactional_id} for retry"
                        );
                    } else {
                        entry.clear_pending();
                    }
                }
                Err(translated)
            }
        }
    }

    /// Becomes the coordinator for `partition`: drains the compacted log,
    /// installs the surviving entries wholesale, resumes transactions left
    /// in a prepare state through `send_markers`, and promotes the
    /// partition to owned.
    ///
    /// Loading an owned partition is a no-op; a concurrent duplicate call
    /// waits until the in-flight drain finishes.
    pub async fn load_transactions_for_partition(
        &self,
        partition: i32,
        send_markers: impl Fn(TransactionResult, &Arc<TransactionEntry>, TransactionTransit),
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

        log::info!("loading transaction partition {partition} at coordinator epoch {epoch}");

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
                "transaction partition {partition} was unloaded during the drain; abandoning staged state"
            );
            return Ok(());
        };

        let mut loaded = HashMap::new();
        for (transactional_id, value) in staged {
            let entry = TransactionEntry::from_value(transactional_id.clone(), value);
            loaded.insert(transactional_id, Arc::new(entry));
        }
        cache.replace_all(loaded);

        // post-recovery sweep: transactions interrupted between prepare and
        // complete must resume sending their markers
        let now = current_time_ms();
        for entry in cache.values() {
            if let Some((result, transit)) = entry.prepare_complete(now) {
                log::info!(
                    "resuming {:?} of transaction {} recovered from partition {partition}",
                    result,
                    entry.transactional_id()
                );
                send_markers(result, &entry, transit);
            }
        }

        if self.partitions().promote(partition) {
            log::info!(
                "finished loading transaction partition {partition} ({} transactions)",
                cache.len()
            );
        } else {
            log::warn!(
                "transaction partition {partition} left loading during the drain; ownership not taken"
            );
        }
        Ok(())
    }

    async fn drain(
        &self,
        partition: i32,
    ) -> error_stack::Result<HashMap<String, TransactionLogValue>, LoadError> {
        let make_error = || LoadError(format!("failed to drain transaction partition {partition}"));

        let end_id = self
            .gateway
            .placeholder(partition)
            .await
            .change_context_lazy(make_error)?;

        let mut staged = HashMap::new();
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
            let transactional_id = decode_txn_key(&key).change_context_lazy(make_error)?;
            match decode_txn_value(&message.value).change_context_lazy(make_error)? {
                None => {
                    staged.remove(&transactional_id);
                }
                Some(value) => {
                    staged.insert(transactional_id, value);
                }
            }
        }
        Ok(staged)
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
    pub async fn remove_transactions_for_partition(&self, partition: i32) {
        let dropped = {
            let mut state = self.state.write().await;
            self.partitions().remove(partition);
            state.remove(&partition)
        };
        match dropped {
            Some(cache) => log::info!(
                "removed transaction partition {partition} ({} cached transactions)",
                cache.len()
            ),
            None => log::debug!("transaction partition {partition} was not resident"),
        }
        self.close_partition_handles(partition).await;
    }
}
