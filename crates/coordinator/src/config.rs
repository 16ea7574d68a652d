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

use serde::Deserialize;
use serde::Serialize;

/// Group coordinator settings, injected at construction time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GroupConfig {
    /// Base name of the metadata topic whose partitions persist group
    /// state. Partition `n` lives at `<name>-partition-<n>`.
    #[serde(default = "default_offsets_topic_name")]
    pub offsets_topic_name: String,
    /// Fixed partition count of the metadata topic. Routing depends on it,
    /// so it must agree across every broker of the cluster.
    #[serde(default = "default_topic_num_partitions")]
    pub offsets_topic_num_partitions: i32,
    /// Upper bound on the metadata string attached to a committed offset.
    /// Consumed by the offset store path.
    #[serde(default = "default_max_metadata_size")]
    pub max_metadata_size: usize,
}

impl Default for GroupConfig {
    fn default() -> Self {
        GroupConfig {
            offsets_topic_name: default_offsets_topic_name(),
            offsets_topic_num_partitions: default_topic_num_partitions(),
            max_metadata_size: default_max_metadata_size(),
        }
    }
}

/// Transaction coordinator settings, injected at construction time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TransactionConfig {
    #[serde(default = "default_transaction_log_topic_name")]
    pub transaction_log_topic_name: String,
    #[serde(default = "default_topic_num_partitions")]
    pub transaction_log_num_partitions: i32,
    /// Upper bound accepted from clients for a transaction timeout.
    #[serde(default = "default_transaction_max_timeout_ms")]
    pub transaction_max_timeout_ms: i32,
    /// Upper bound on an encoded transaction state record accepted by the
    /// append path.
    #[serde(default = "default_max_metadata_size")]
    pub max_metadata_size: usize,
}

impl Default for TransactionConfig {
    fn default() -> Self {
        TransactionConfig {
            transaction_log_topic_name: default_transaction_log_topic_name(),
            transaction_log_num_partitions: default_topic_num_partitions(),
            transaction_max_timeout_ms: default_transaction_max_timeout_ms(),
            max_metadata_size: default_max_metadata_size(),
        }
    }
}

fn default_offsets_topic_name() -> String {
    "__consumer_offsets".to_string()
}

fn default_transaction_log_topic_name() -> String {
    "__transaction_state".to_string()
}

fn default_topic_num_partitions() -> i32 {
    50
}

fn default_transaction_max_timeout_ms() -> i32 {
    // 15 minutes
    900_000
}

fn default_max_metadata_size() -> usize {
    4096
}
