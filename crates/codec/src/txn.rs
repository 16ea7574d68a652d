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

// Derived:
// https://github.com/apache/kafka/blob/trunk/core/src/main/resources/common/message/TransactionLogKey.json
// https://github.com/apache/kafka/blob/trunk/core/src/main/resources/common/message/TransactionLogValue.json

use crate::primitive::*;
use crate::CodecError;

/// The key version tag that marks a transaction state record.
pub const TXN_KEY_VERSION: i16 = 0;

/// The value schema version written for new records.
pub const TXN_VALUE_SCHEMA_VERSION: i16 = 0;

/// Wire codes of the transaction state machine. The codes are durable in
/// the transaction log and must never be renumbered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransactionState {
    Empty,
    Ongoing,
    PrepareCommit,
    PrepareAbort,
    CompleteCommit,
    CompleteAbort,
    Dead,
}

impl TransactionState {
    pub fn code(&self) -> i8 {
        match self {
            TransactionState::Empty => 0,
            TransactionState::Ongoing => 1,
            TransactionState::PrepareCommit => 2,
            TransactionState::PrepareAbort => 3,
            TransactionState::CompleteCommit => 4,
            TransactionState::CompleteAbort => 5,
            TransactionState::Dead => 6,
        }
    }

    pub fn from_code(code: i8) -> Option<TransactionState> {
        match code {
            0 => Some(TransactionState::Empty),
            1 => Some(TransactionState::Ongoing),
            2 => Some(TransactionState::PrepareCommit),
            3 => Some(TransactionState::PrepareAbort),
            4 => Some(TransactionState::CompleteCommit),
            5 => Some(TransactionState::CompleteAbort),
            6 => Some(TransactionState::Dead),
            _ => None,
        }
    }
}

/// One topic's partitions participating in a transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxnTopicPartitions {
    pub topic: String,
    pub partitions: Vec<i32>,
}

/// The persisted shape of one transactional id's state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionLogValue {
    pub producer_id: i64,
    pub producer_epoch: i16,
    pub transaction_timeout_ms: i32,
    pub state: TransactionState,
    pub topic_partitions: Vec<TxnTopicPartitions>,
    pub last_update_timestamp_ms: i64,
    pub start_timestamp_ms: i64,
}

pub fn encode_txn_key(transactional_id: &str) -> Result<Vec<u8>, CodecError> {
    let mut out = vec![];
    write_i16(&mut out, TXN_KEY_VERSION)?;
    write_string(&mut out, transactional_id, "transactional_id")?;
    Ok(out)
}

/// Decodes a transaction record key, demanding the transaction state kind.
pub fn decode_txn_key(mut buf: &[u8]) -> Result<String, CodecError> {
    let version = read_i16(&mut buf, "key version")?;
    if version != TXN_KEY_VERSION {
        return Err(CodecError::UnsupportedVersion {
            schema: "transaction key",
            version,
        });
    }
    read_string(&mut buf, "transactional_id")
}

pub fn encode_txn_value(value: &TransactionLogValue) -> Result<Vec<u8>, CodecError> {
    let mut out = vec![];
    write_i16(&mut out, TXN_VALUE_SCHEMA_VERSION)?;
    write_i64(&mut out, value.producer_id)?;
    write_i16(&mut out, value.producer_epoch)?;
    write_i32(&mut out, value.transaction_timeout_ms)?;
    write_i8(&mut out, value.state.code())?;
    if value.topic_partitions.is_empty() {
        // the upstream schema writes a null array when no partition joined
        write_i32(&mut out, -1)?;
    } else {
        let len = i32::try_from(value.topic_partitions.len())
            .map_err(|_| crate::err_malformed("topic count overflows i32"))?;
        write_i32(&mut out, len)?;
        for entry in &value.topic_partitions {
            write_string(&mut out, &entry.topic, "topic")?;
            let len = i32::try_from(entry.partitions.len())
                .map_err(|_| crate::err_malformed("partition count overflows i32"))?;
            write_i32(&mut out, len)?;
            for partition in &entry.partitions {
                write_i32(&mut out, *partition)?;
            }
        }
    }
    write_i64(&mut out, value.last_update_timestamp_ms)?;
    write_i64(&mut out, value.start_timestamp_ms)?;
    Ok(out)
}

/// Decodes a transaction record value. An empty buffer is a tombstone and
/// decodes to `None`.
pub fn decode_txn_value(buf: &[u8]) -> Result<Option<TransactionLogValue>, CodecError> {
    if buf.is_empty() {
        return Ok(None);
    }
    let mut buf = buf;
    let version = read_i16(&mut buf, "value version")?;
    if version != TXN_VALUE_SCHEMA_VERSION {
        return Err(CodecError::UnsupportedVersion {
            schema: "transaction value",
            version,
        });
    }

    let producer_id = read_i64(&mut buf, "producer_id")?;
    let producer_epoch = read_i16(&mut buf, "producer_epoch")?;
    let transaction_timeout_ms = read_i32(&mut buf, "transaction_timeout_ms")?;
    let state_code = read_i8(&mut buf, "state")?;
    let state = TransactionState::from_code(state_code)
        .ok_or_else(|| crate::err_malformed(format!("unknown transaction state {state_code}")))?;

    let topic_count = read_i32(&mut buf, "topic count")?;
    let mut topic_partitions = vec![];
    if topic_count > 0 {
        topic_partitions.reserve(topic_count as usize);
        for _ in 0..topic_count {
            let topic = read_string(&mut buf, "topic")?;
            let partition_count = read_i32(&mut buf, "partition count")?;
            if partition_count < 0 {
                return Err(crate::err_malformed("negative partition count"));
            }
            let mut partitions = Vec::with_capacity(partition_count as usize);
            for _ in 0..partition_count {
                partitions.push(read_i32(&mut buf, "partition")?);
            }
            topic_partitions.push(TxnTopicPartitions { topic, partitions });
        }
    }

    let last_update_timestamp_ms = read_i64(&mut buf, "last_update_timestamp_ms")?;
    let start_timestamp_ms = read_i64(&mut buf, "start_timestamp_ms")?;

    Ok(Some(TransactionLogValue {
        producer_id,
        producer_epoch,
        transaction_timeout_ms,
        state,
        topic_partitions,
        last_update_timestamp_ms,
        start_timestamp_ms,
    }))
}
