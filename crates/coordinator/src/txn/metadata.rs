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
use std::collections::HashSet;
use std::sync::Mutex;

use corax_codec::TransactionLogValue;
use corax_codec::TransactionState;
use corax_codec::TxnTopicPartitions;

use crate::CoordinatorError;
use crate::CoordinatorResult;
use crate::TopicPartition;

/// How a resumed or decided transaction ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionResult {
    Commit,
    Abort,
}

/// The delta describing a proposed transition of a transaction entry,
/// built by the state machine above this crate and applied to the cache
/// only after the corresponding log append succeeded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionTransit {
    pub producer_id: i64,
    pub producer_epoch: i16,
    pub txn_timeout_ms: i32,
    pub state: TransactionState,
    pub topic_partitions: HashSet<TopicPartition>,
    pub txn_start_timestamp: i64,
    pub txn_last_update_timestamp: i64,
}

/// The committed metadata of one transactional id, plus the pending slot
/// holding a staged transition while its append is in flight.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionMetadata {
    pub producer_id: i64,
    pub producer_epoch: i16,
    pub txn_timeout_ms: i32,
    pub state: TransactionState,
    pub topic_partitions: HashSet<TopicPartition>,
    pub txn_start_timestamp: i64,
    pub txn_last_update_timestamp: i64,
    pub pending_state: Option<TransactionTransit>,
}

impl TransactionMetadata {
    /// A fresh, empty transaction for a producer that just claimed the id.
    pub fn empty(producer_id: i64, producer_epoch: i16, txn_timeout_ms: i32, now: i64) -> Self {
        TransactionMetadata {
            producer_id,
            producer_epoch,
            txn_timeout_ms,
            state: TransactionState::Empty,
            topic_partitions: HashSet::new(),
            txn_start_timestamp: now,
            txn_last_update_timestamp: now,
            pending_state: None,
        }
    }

    /// Builds the transit for moving this transaction to `state` at `now`,
    /// carrying everything else over.
    pub fn transit_to(&self, state: TransactionState, now: i64) -> TransactionTransit {
        TransactionTransit {
            producer_id: self.producer_id,
            producer_epoch: self.producer_epoch,
            txn_timeout_ms: self.txn_timeout_ms,
            state,
            topic_partitions: self.topic_partitions.clone(),
            txn_start_timestamp: self.txn_start_timestamp,
            txn_last_update_timestamp: now,
        }
    }
}

/// One transactional id's coordinator entry. The inner lock serializes all
/// state reads and transitions; the cache only hands out `Arc`s to it.
#[derive(Debug)]
pub struct TransactionEntry {
    transactional_id: String,
    inner: Mutex<TransactionMetadata>,
}

impl TransactionEntry {
    pub fn new(transactional_id: impl Into<String>, metadata: TransactionMetadata) -> Self {
        TransactionEntry {
            transactional_id: transactional_id.into(),
            inner: Mutex::new(metadata),
        }
    }

    pub fn transactional_id(&self) -> &str {
        &self.transactional_id
    }

    /// Runs `f` under the entry's own lock.
    pub fn in_lock<T>(&self, f: impl FnOnce(&mut TransactionMetadata) -> T) -> T {
        let mut inner = self.inner.lock().expect("transaction entry lock poisoned");
        f(&mut inner)
    }

    pub fn snapshot(&self) -> TransactionMetadata {
        self.in_lock(|metadata| metadata.clone())
    }

    pub fn state(&self) -> TransactionState {
        self.in_lock(|metadata| metadata.state)
    }

    /// Stages `transit` in the pending slot. Refused while another
    /// transition is already in flight.
    pub(crate) fn prepare_transition(&self, transit: &TransactionTransit) -> CoordinatorResult<()> {
        self.in_lock(|metadata| {
            if metadata.pending_state.is_some() {
                return Err(CoordinatorError::ConcurrentTransactions);
            }
            metadata.pending_state = Some(transit.clone());
            Ok(())
        })
    }

    /// Applies the staged transition in place after its append succeeded.
    ///
    /// The durable record is already written at this point; a mismatch
    /// between the pending slot and `transit` is a coordinator bug, so the
    /// slot is reset and the failure surfaced instead of guessing.
    pub(crate) fn complete_transition_to(
        &self,
        transit: &TransactionTransit,
    ) -> CoordinatorResult<()> {
        self.in_lock(|metadata| {
            if metadata.pending_state.as_ref() != Some(transit) {
                log::error!(
                    "completing a transition of transaction {} that was never staged (pending: {:?})",
                    self.transactional_id,
                    metadata.pending_state
                );
                metadata.pending_state = None;
                return Err(CoordinatorError::UnknownServerError);
            }
            metadata.producer_id = transit.producer_id;
            metadata.producer_epoch = transit.producer_epoch;
            metadata.txn_timeout_ms = transit.txn_timeout_ms;
            metadata.state = transit.state;
            metadata.topic_partitions = transit.topic_partitions.clone();
            metadata.txn_start_timestamp = transit.txn_start_timestamp;
            metadata.txn_last_update_timestamp = transit.txn_last_update_timestamp;
            metadata.pending_state = None;
            Ok(())
        })
    }

    pub(crate) fn clear_pending(&self) {
        self.in_lock(|metadata| metadata.pending_state = None)
    }

    /// If this entry was recovered in one of the two prepare states,
    /// stages its transit to the matching complete state and reports how
    /// the transaction must be finished.
    pub(crate) fn prepare_complete(
        &self,
        now: i64,
    ) -> Option<(TransactionResult, TransactionTransit)> {
        self.in_lock(|metadata| {
            let (result, next) = match metadata.state {
                TransactionState::PrepareCommit => {
                    (TransactionResult::Commit, TransactionState::CompleteCommit)
                }
                TransactionState::PrepareAbort => {
                    (TransactionResult::Abort, TransactionState::CompleteAbort)
                }
                _ => return None,
            };
            let transit = metadata.transit_to(next, now);
            metadata.pending_state = Some(transit.clone());
            Some((result, transit))
        })
    }

    pub(crate) fn from_value(transactional_id: String, value: TransactionLogValue) -> Self {
        let topic_partitions = value
            .topic_partitions
            .into_iter()
            .flat_map(|entry| {
                let topic = entry.topic;
                entry
                    .partitions
                    .into_iter()
                    .map(move |partition| TopicPartition::new(topic.clone(), partition))
            })
            .collect();
        TransactionEntry::new(transactional_id, TransactionMetadata {
            producer_id: value.producer_id,
            producer_epoch: value.producer_epoch,
            txn_timeout_ms: value.transaction_timeout_ms,
            state: value.state,
            topic_partitions,
            txn_start_timestamp: value.start_timestamp_ms,
            txn_last_update_timestamp: value.last_update_timestamp_ms,
            pending_state: None,
        })
    }
}

/// The durable shape of a transit, with the partition set grouped by topic
/// in a stable order.
pub(crate) fn log_value_of(transit: &TransactionTransit) -> TransactionLogValue {
    let mut by_topic: BTreeMap<String, Vec<i32>> = BTreeMap::new();
    for tp in &transit.topic_partitions {
        by_topic.entry(tp.topic.clone()).or_default().push(tp.partition);
    }
    let topic_partitions = by_topic
        .into_iter()
        .map(|(topic, mut partitions)| {
            partitions.sort_unstable();
            TxnTopicPartitions { topic, partitions }
        })
        .collect();
    TransactionLogValue {
        producer_id: transit.producer_id,
        producer_epoch: transit.producer_epoch,
        transaction_timeout_ms: transit.txn_timeout_ms,
        state: transit.state,
        topic_partitions,
        last_update_timestamp_ms: transit.txn_last_update_timestamp,
        start_timestamp_ms: transit.txn_start_timestamp,
    }
}
