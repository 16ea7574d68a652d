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

use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use corax_bus_client::BusError;
use corax_codec::decode_txn_value;
use corax_codec::encode_txn_key;
use corax_codec::encode_txn_value;
use corax_codec::TransactionLogValue;
use corax_codec::TransactionState;
use corax_codec::TxnTopicPartitions;
use corax_coordinator::route_txn;
use corax_coordinator::txn::TransactionMetadata;
use corax_coordinator::txn::TransactionResult;
use corax_coordinator::txn::TransactionStateManager;
use corax_coordinator::CoordinatorError;
use corax_coordinator::TopicPartition;
use corax_coordinator::TransactionConfig;
use corax_tests_toolkit::MemoryBus;
use insta::assert_compact_debug_snapshot;

const NUM_PARTITIONS: i32 = 8;

fn txn_manager(bus: MemoryBus) -> Arc<TransactionStateManager<MemoryBus>> {
    corax_tests_toolkit::init_logging();
    let config = TransactionConfig {
        transaction_log_num_partitions: NUM_PARTITIONS,
        ..Default::default()
    };
    Arc::new(TransactionStateManager::new(config, bus))
}

fn partition_topic(partition: i32) -> String {
    format!("__transaction_state-partition-{partition}")
}

fn seed_txn(bus: &MemoryBus, partition: i32, transactional_id: &str, state: TransactionState) {
    let value = TransactionLogValue {
        producer_id: 7_000,
        producer_epoch: 2,
        transaction_timeout_ms: 60_000,
        state,
        topic_partitions: vec![TxnTopicPartitions {
            topic: "orders".to_string(),
            partitions: vec![1],
        }],
        last_update_timestamp_ms: 500,
        start_timestamp_ms: 100,
    };
    bus.seed(
        &partition_topic(partition),
        Some(encode_txn_key(transactional_id).unwrap()),
        encode_txn_value(&value).unwrap(),
        500,
    );
}

/// Routing is pinned for a fixed build: these ids must keep their
/// partitions across releases.
#[test]
fn test_route_pinning() {
    let routes: Vec<i32> = ["orders", "payments", "audit"]
        .iter()
        .map(|id| route_txn(id, 50))
        .collect();
    assert_compact_debug_snapshot!(routes, @"[17, 13, 5]");
}

#[test]
fn test_validate_transaction_timeout() {
    let manager = txn_manager(MemoryBus::new());
    assert!(!manager.validate_transaction_timeout_ms(0));
    assert!(!manager.validate_transaction_timeout_ms(-5));
    assert!(manager.validate_transaction_timeout_ms(1));
    assert!(manager.validate_transaction_timeout_ms(900_000));
    assert!(!manager.validate_transaction_timeout_ms(900_001));
}

#[test]
fn test_append_transaction_applies_after_ack() {
    corax_runtime::test_runtime().block_on(async {
        let bus = MemoryBus::new();
        let manager = txn_manager(bus.clone());
        let partition = manager.partition_for("t1");
        manager
            .load_transactions_for_partition(partition, |_, _, _| {})
            .await
            .unwrap();

        let (epoch, entry) = manager
            .put_transaction_state_if_absent("t1", TransactionMetadata::empty(9_000, 0, 60_000, 10))
            .await
            .unwrap();

        let mut transit = entry.snapshot().transit_to(TransactionState::Ongoing, 20);
        transit.topic_partitions.insert(TopicPartition::new("orders", 0));
        manager
            .append_transaction("t1", epoch, transit, |_| false)
            .await
            .unwrap();

        let metadata = entry.snapshot();
        assert_eq!(metadata.state, TransactionState::Ongoing);
        assert_eq!(metadata.txn_last_update_timestamp, 20);
        assert!(metadata.pending_state.is_none());

        // the cache transition is backed by a durable record
        let records = bus.records(&partition_topic(partition));
        let last = records.last().unwrap();
        assert_eq!(
            last.key.as_deref(),
            Some(encode_txn_key("t1").unwrap().as_slice())
        );
        let value = decode_txn_value(&last.value).unwrap().unwrap();
        assert_eq!(value.state, TransactionState::Ongoing);
        assert_eq!(value.topic_partitions[0].topic, "orders");
    })
}

#[test]
fn test_stale_epoch_appends_nothing() {
    corax_runtime::test_runtime().block_on(async {
        let bus = MemoryBus::new();
        let manager = txn_manager(bus.clone());
        let partition = manager.partition_for("t1");
        manager
            .load_transactions_for_partition(partition, |_, _, _| {})
            .await
            .unwrap();

        let (epoch, entry) = manager
            .put_transaction_state_if_absent("t1", TransactionMetadata::empty(9_000, 0, 60_000, 10))
            .await
            .unwrap();
        let records_before = bus.records(&partition_topic(partition)).len();

        let transit = entry.snapshot().transit_to(TransactionState::Ongoing, 20);
        assert_eq!(
            manager
                .append_transaction("t1", epoch - 1, transit, |_| false)
                .await
                .unwrap_err(),
            CoordinatorError::NotCoordinator
        );

        assert_eq!(bus.records(&partition_topic(partition)).len(), records_before);
        assert!(entry.snapshot().pending_state.is_none());
        assert_eq!(entry.state(), TransactionState::Empty);
    })
}

#[test]
fn test_append_during_migration_returns_not_coordinator() {
    corax_runtime::test_runtime().block_on(async {
        let bus = MemoryBus::new();
        let manager = txn_manager(bus.clone());
        let partition = manager.partition_for("t1");
        manager
            .load_transactions_for_partition(partition, |_, _, _| {})
            .await
            .unwrap();

        let (epoch, entry) = manager
            .put_transaction_state_if_absent("t1", TransactionMetadata::empty(9_000, 4, 60_000, 10))
            .await
            .unwrap();

        // hold the append on the bus while the partition is unloaded
        let gate = bus.gate_next_append();
        let append = {
            let manager = manager.clone();
            let transit = entry.snapshot().transit_to(TransactionState::Ongoing, 20);
            tokio::spawn(async move {
                manager
                    .append_transaction("t1", epoch, transit, |_| false)
                    .await
            })
        };
        gate.entered().await;

        let unload = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.remove_transactions_for_partition(partition).await })
        };
        // the unloader must be parked on the state lock before the append
        // resumes, or there is no migration to observe
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!unload.is_finished());
        gate.release();

        assert_eq!(
            append.await.unwrap().unwrap_err(),
            CoordinatorError::NotCoordinator
        );
        unload.await.unwrap();

        assert!(!manager.is_partition_owned(partition));
        assert_eq!(
            manager.get_transaction_state("t1").await.unwrap_err(),
            CoordinatorError::NotCoordinator
        );

        // the append that lost the race is durable nevertheless
        let records = bus.records(&partition_topic(partition));
        let last = records.last().unwrap();
        assert_eq!(
            last.key.as_deref(),
            Some(encode_txn_key("t1").unwrap().as_slice())
        );
        assert_eq!(
            decode_txn_value(&last.value).unwrap().unwrap().state,
            TransactionState::Ongoing
        );
    })
}

#[test]
fn test_append_refuses_oversized_record() {
    corax_runtime::test_runtime().block_on(async {
        let bus = MemoryBus::new();
        corax_tests_toolkit::init_logging();
        let config = TransactionConfig {
            transaction_log_num_partitions: NUM_PARTITIONS,
            max_metadata_size: 16,
            ..Default::default()
        };
        let manager = TransactionStateManager::new(config, bus.clone());
        let partition = manager.partition_for("t1");
        manager
            .load_transactions_for_partition(partition, |_, _, _| {})
            .await
            .unwrap();
        let (epoch, entry) = manager
            .put_transaction_state_if_absent("t1", TransactionMetadata::empty(9_000, 0, 60_000, 10))
            .await
            .unwrap();
        let records_before = bus.records(&partition_topic(partition)).len();

        let transit = entry.snapshot().transit_to(TransactionState::Ongoing, 20);
        assert_eq!(
            manager
                .append_transaction("t1", epoch, transit, |_| false)
                .await
                .unwrap_err(),
            CoordinatorError::UnknownServerError
        );

        // refused before anything was staged or written
        assert_eq!(bus.records(&partition_topic(partition)).len(), records_before);
        assert!(entry.snapshot().pending_state.is_none());
        assert_eq!(entry.state(), TransactionState::Empty);
    })
}

#[test]
fn test_append_failure_honors_retry_predicate() {
    corax_runtime::test_runtime().block_on(async {
        let bus = MemoryBus::new();
        let manager = txn_manager(bus.clone());
        let partition = manager.partition_for("t1");
        manager
            .load_transactions_for_partition(partition, |_, _, _| {})
            .await
            .unwrap();
        let (epoch, entry) = manager
            .put_transaction_state_if_absent("t1", TransactionMetadata::empty(9_000, 0, 60_000, 10))
            .await
            .unwrap();

        // retryable failure keeps the staged transition pending
        bus.fail_next_append(BusError::RequestTimedOut);
        let transit = entry.snapshot().transit_to(TransactionState::Ongoing, 20);
        assert_eq!(
            manager
                .append_transaction("t1", epoch, transit.clone(), |err| {
                    *err == CoordinatorError::CoordinatorNotAvailable
                })
                .await
                .unwrap_err(),
            CoordinatorError::CoordinatorNotAvailable
        );
        assert!(entry.snapshot().pending_state.is_some());

        // while a transition is pending, another one is refused
        assert_eq!(
            manager
                .append_transaction("t1", epoch, transit, |_| false)
                .await
                .unwrap_err(),
            CoordinatorError::ConcurrentTransactions
        );
    })
}

#[test]
fn test_append_failure_clears_pending_without_retry() {
    corax_runtime::test_runtime().block_on(async {
        let bus = MemoryBus::new();
        let manager = txn_manager(bus.clone());
        let partition = manager.partition_for("t2");
        manager
            .load_transactions_for_partition(partition, |_, _, _| {})
            .await
            .unwrap();
        let (epoch, entry) = manager
            .put_transaction_state_if_absent("t2", TransactionMetadata::empty(9_000, 0, 60_000, 10))
            .await
            .unwrap();

        bus.fail_next_append(BusError::MessageTooLarge(1 << 24));
        let transit = entry.snapshot().transit_to(TransactionState::Ongoing, 20);
        assert_eq!(
            manager
                .append_transaction("t2", epoch, transit.clone(), |_| false)
                .await
                .unwrap_err(),
            CoordinatorError::UnknownServerError
        );
        assert!(entry.snapshot().pending_state.is_none());

        // the entry is usable again afterwards
        manager
            .append_transaction("t2", epoch, transit, |_| false)
            .await
            .unwrap();
        assert_eq!(entry.state(), TransactionState::Ongoing);
    })
}

#[test]
fn test_recover_pending_commit() {
    corax_runtime::test_runtime().block_on(async {
        let bus = MemoryBus::new();
        let manager = txn_manager(bus.clone());
        let partition = manager.partition_for("t3");
        seed_txn(&bus, partition, "t3", TransactionState::PrepareCommit);

        let markers = Mutex::new(Vec::new());
        manager
            .load_transactions_for_partition(partition, |result, entry, transit| {
                markers.lock().unwrap().push((
                    result,
                    entry.transactional_id().to_string(),
                    transit.state,
                ));
            })
            .await
            .unwrap();

        assert!(manager.is_partition_owned(partition));
        assert_eq!(
            markers.lock().unwrap().as_slice(),
            &[(
                TransactionResult::Commit,
                "t3".to_string(),
                TransactionState::CompleteCommit
            )]
        );

        let (_, entry) = manager.get_transaction_state("t3").await.unwrap().unwrap();
        let metadata = entry.snapshot();
        assert_eq!(metadata.state, TransactionState::PrepareCommit);
        let pending = metadata.pending_state.unwrap();
        assert_eq!(pending.state, TransactionState::CompleteCommit);
    })
}

#[test]
fn test_recover_pending_abort() {
    corax_runtime::test_runtime().block_on(async {
        let bus = MemoryBus::new();
        let manager = txn_manager(bus.clone());
        let partition = manager.partition_for("t4");
        seed_txn(&bus, partition, "t4", TransactionState::PrepareAbort);
        // settled transactions are not resumed
        seed_txn(&bus, partition, "settled", TransactionState::CompleteCommit);

        let markers = Mutex::new(Vec::new());
        manager
            .load_transactions_for_partition(partition, |result, entry, _| {
                markers
                    .lock()
                    .unwrap()
                    .push((result, entry.transactional_id().to_string()));
            })
            .await
            .unwrap();

        assert_eq!(
            markers.lock().unwrap().as_slice(),
            &[(TransactionResult::Abort, "t4".to_string())]
        );
    })
}

#[test]
fn test_tombstone_during_load() {
    corax_runtime::test_runtime().block_on(async {
        let bus = MemoryBus::new();
        let manager = txn_manager(bus.clone());
        let partition = manager.partition_for("t5");
        seed_txn(&bus, partition, "t5", TransactionState::Ongoing);
        bus.seed(
            &partition_topic(partition),
            Some(encode_txn_key("t5").unwrap()),
            vec![],
            600,
        );

        manager
            .load_transactions_for_partition(partition, |_, _, _| {})
            .await
            .unwrap();

        assert!(manager.is_partition_owned(partition));
        assert!(manager.get_transaction_state("t5").await.unwrap().is_none());
    })
}

#[test]
fn test_reads_fail_while_loading() {
    corax_runtime::test_runtime().block_on(async {
        let bus = MemoryBus::new();
        let manager = txn_manager(bus.clone());
        let partition = manager.partition_for("t6");

        let gate = bus.gate_next_append();
        let load = {
            let manager = manager.clone();
            tokio::spawn(async move {
                manager
                    .load_transactions_for_partition(partition, |_, _, _| {})
                    .await
            })
        };
        gate.entered().await;

        assert!(manager.is_partition_loading(partition));
        assert_eq!(
            manager.get_transaction_state("t6").await.unwrap_err(),
            CoordinatorError::ConcurrentTransactions
        );
        assert_eq!(
            manager
                .put_transaction_state_if_absent(
                    "t6",
                    TransactionMetadata::empty(1, 0, 60_000, 0)
                )
                .await
                .unwrap_err(),
            CoordinatorError::ConcurrentTransactions
        );

        gate.release();
        load.await.unwrap().unwrap();
        assert!(manager.is_partition_owned(partition));
        assert!(manager.get_transaction_state("t6").await.unwrap().is_none());
    })
}
