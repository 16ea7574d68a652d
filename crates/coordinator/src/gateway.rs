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

use corax_bus_client::BusError;
use corax_bus_client::InboundMessage;
use corax_bus_client::LogBus;
use corax_bus_client::LogProducer;
use corax_bus_client::LogReader;
use corax_bus_client::MessageId;
use corax_bus_client::OutboundRecord;
use corax_bus_client::ReaderOptions;
use corax_bus_client::StartPosition;
use tokio::sync::Mutex;

/// Lazy per-partition producer and reader handles against the metadata
/// topic of one manager.
///
/// Handles are created on first use and stay cached until the unloader pops
/// them on leadership loss. Readers consume the compacted view from the
/// earliest message.
pub struct LogGateway<B: LogBus> {
    bus: B,
    topic_base: String,
    producers: Mutex<HashMap<i32, Arc<B::Producer>>>,
    readers: Mutex<HashMap<i32, Arc<B::Reader>>>,
}

impl<B: LogBus> LogGateway<B> {
    pub fn new(bus: B, topic_base: impl Into<String>) -> Self {
        LogGateway {
            bus,
            topic_base: topic_base.into(),
            producers: Mutex::new(HashMap::new()),
            readers: Mutex::new(HashMap::new()),
        }
    }

    pub fn partition_topic(&self, partition: i32) -> String {
        format!("{}-partition-{}", self.topic_base, partition)
    }

    async fn producer(&self, partition: i32) -> Result<Arc<B::Producer>, BusError> {
        let mut producers = self.producers.lock().await;
        if let Some(handle) = producers.get(&partition) {
            return Ok(handle.clone());
        }
        let topic = self.partition_topic(partition);
        let handle = Arc::new(self.bus.create_producer(&topic).await?);
        producers.insert(partition, handle.clone());
        Ok(handle)
    }

    async fn reader(&self, partition: i32) -> Result<Arc<B::Reader>, BusError> {
        let mut readers = self.readers.lock().await;
        if let Some(handle) = readers.get(&partition) {
            return Ok(handle.clone());
        }
        let topic = self.partition_topic(partition);
        let options = ReaderOptions {
            start: StartPosition::Earliest,
            compacted: true,
        };
        let handle = Arc::new(self.bus.create_reader(&topic, options).await?);
        readers.insert(partition, handle.clone());
        Ok(handle)
    }

    pub async fn append(
        &self,
        partition: i32,
        key: Option<Vec<u8>>,
        value: Vec<u8>,
        event_time: i64,
    ) -> Result<MessageId, BusError> {
        let producer = self.producer(partition).await?;
        producer
            .append(OutboundRecord {
                key,
                value,
                event_time,
            })
            .await
    }

    /// Appends a keyless empty-value record. Its id is an upper bound on
    /// every record that existed in the partition beforehand, which makes
    /// it the end marker for a load drain.
    pub async fn placeholder(&self, partition: i32) -> Result<MessageId, BusError> {
        self.append(partition, None, vec![], crate::current_time_ms())
            .await
    }

    pub async fn read_next(&self, partition: i32) -> Result<InboundMessage, BusError> {
        let reader = self.reader(partition).await?;
        reader.read_next().await
    }

    /// Removes both handles for `partition`. The caller owns closing them.
    pub async fn pop(&self, partition: i32) -> (Option<Arc<B::Producer>>, Option<Arc<B::Reader>>) {
        let producer = self.producers.lock().await.remove(&partition);
        let reader = self.readers.lock().await.remove(&partition);
        (producer, reader)
    }
}
