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

//! Coordinator metadata managers for a Kafka-compatible broker persisting
//! its state on a log-structured message bus.
//!
//! Each broker owns a subset of the metadata topic's partitions. Gaining
//! leadership for a partition means draining its compacted log into an
//! in-memory cache; every client mutation is appended to the log first and
//! applied to the cache only once the bus acknowledged it, re-checking that
//! ownership did not migrate in the meantime.

mod cache;
mod config;
mod error;
mod gateway;
mod lifecycle;
mod router;

pub mod group;
pub mod txn;

pub use config::GroupConfig;
pub use config::TransactionConfig;
pub use error::CoordinatorError;
pub use error::CoordinatorResult;
pub use error::LoadError;
pub use gateway::LogGateway;
pub use router::route_group;
pub use router::route_txn;

/// A topic partition participating in a transaction or carrying committed
/// offsets.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TopicPartition {
    pub topic: String,
    pub partition: i32,
}

impl TopicPartition {
    pub fn new(topic: impl Into<String>, partition: i32) -> Self {
        TopicPartition {
            topic: topic.into(),
            partition,
        }
    }
}

impl std::fmt::Display for TopicPartition {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}-{}", self.topic, self.partition)
    }
}

pub(crate) fn current_time_ms() -> i64 {
    use std::time::SystemTime;
    use std::time::UNIX_EPOCH;
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before unix epoch")
        .as_millis() as i64
}
