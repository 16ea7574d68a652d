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
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Mutex;

use corax_bus_client::BusError;
use corax_bus_client::InboundMessage;
use corax_bus_client::LogBus;
use corax_bus_client::LogProducer;
use corax_bus_client::LogReader;
use corax_bus_client::MessageId;
use corax_bus_client::OutboundRecord;
use corax_bus_client::ReaderOptions;
use corax_bus_client::StartPosition;
use mea::latch::Latch;
use tokio::sync::watch;

/// An in-memory log bus. Topics are ordered logs with ids assigned from a
/// per-topic counter; readers replay from the earliest message and pend at
/// the log's end. Cloning shares the underlying state.
///
/// The bus never compacts: serving every appended record is a legal
/// compacted view, and the coordinator's last-write-wins load protocol must
/// cope with it anyway.
#[derive(Clone, Default)]
pub struct MemoryBus {
    inner: Arc<BusInner>,
}

#[derive(Default)]
struct BusInner {
    topics: Mutex<HashMap<String, Arc<TopicLog>>>,
    armed_gate: Mutex<Option<GatePair>>,
    next_append_error: Mutex<Option<BusError>>,
    closed_handles: AtomicUsize,
}

struct TopicLog {
    records: Mutex<Vec<InboundMessage>>,
    // length updates wake pending readers; watch keeps its own versioning,
    // so a push between a reader's length check and its wait is never lost
    len_watch: watch::Sender<usize>,
}

impl Default for TopicLog {
    fn default() -> Self {
        TopicLog {
            records: Mutex::new(Vec::new()),
            len_watch: watch::channel(0).0,
        }
    }
}

impl TopicLog {
    fn push(&self, key: Option<Vec<u8>>, value: Vec<u8>, event_time: i64) -> MessageId {
        let mut records = self.records.lock().unwrap();
        let id = MessageId(records.len() as i64);
        records.push(InboundMessage {
            id,
            key,
            value,
            event_time,
        });
        let len = records.len();
        drop(records);
        self.len_watch.send_replace(len);
        id
    }
}

struct GatePair {
    entered: Arc<Latch>,
    release: Arc<Latch>,
}

/// Handle to one armed append gate: the next append on the bus parks until
/// [`AppendGate::release`], and [`AppendGate::entered`] resolves once it
/// parked. Lets a test hold an append in flight while racing other calls
/// against it.
pub struct AppendGate {
    entered: Arc<Latch>,
    release: Arc<Latch>,
}

impl AppendGate {
    pub async fn entered(&self) {
        self.entered.wait().await
    }

    pub fn release(&self) {
        self.release.count_down()
    }
}

impl MemoryBus {
    pub fn new() -> Self {
        MemoryBus::default()
    }

    fn topic(&self, name: &str) -> Arc<TopicLog> {
        let mut topics = self.inner.topics.lock().unwrap();
        topics.entry(name.to_string()).or_default().clone()
    }

    /// Appends a record directly, bypassing gates and fault injection. For
    /// preparing a topic before the code under test reads it.
    pub fn seed(
        &self,
        topic: &str,
        key: Option<Vec<u8>>,
        value: Vec<u8>,
        event_time: i64,
    ) -> MessageId {
        self.topic(topic).push(key, value, event_time)
    }

    /// Everything appended to `topic` so far, in log order.
    pub fn records(&self, topic: &str) -> Vec<InboundMessage> {
        self.topic(topic).records.lock().unwrap().clone()
    }

    /// Arms a one-shot gate: the next append parks until released.
    pub fn gate_next_append(&self) -> AppendGate {
        let entered = Arc::new(Latch::new(1));
        let release = Arc::new(Latch::new(1));
        let mut armed = self.inner.armed_gate.lock().unwrap();
        *armed = Some(GatePair {
            entered: entered.clone(),
            release: release.clone(),
        });
        AppendGate { entered, release }
    }

    /// Fails the next append with `err` instead of writing it.
    pub fn fail_next_append(&self, err: BusError) {
        *self.inner.next_append_error.lock().unwrap() = Some(err);
    }

    /// How many producer and reader handles have been closed so far.
    pub fn closed_handles(&self) -> usize {
        self.inner.closed_handles.load(Ordering::SeqCst)
    }
}

pub struct MemoryProducer {
    bus: Arc<BusInner>,
    topic: Arc<TopicLog>,
}

impl LogProducer for MemoryProducer {
    async fn append(&self, record: OutboundRecord) -> Result<MessageId, BusError> {
        let gate = self.bus.armed_gate.lock().unwrap().take();
        if let Some(gate) = gate {
            gate.entered.count_down();
            gate.release.wait().await;
        }
        if let Some(err) = self.bus.next_append_error.lock().unwrap().take() {
            return Err(err);
        }
        Ok(self.topic.push(record.key, record.value, record.event_time))
    }

    async fn close(&self) -> Result<(), BusError> {
        self.bus.closed_handles.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub struct MemoryReader {
    bus: Arc<BusInner>,
    topic: Arc<TopicLog>,
    cursor: tokio::sync::Mutex<ReaderCursor>,
}

struct ReaderCursor {
    position: usize,
    len_rx: watch::Receiver<usize>,
}

impl LogReader for MemoryReader {
    async fn read_next(&self) -> Result<InboundMessage, BusError> {
        let mut cursor = self.cursor.lock().await;
        loop {
            cursor.len_rx.borrow_and_update();
            {
                let records = self.topic.records.lock().unwrap();
                if cursor.position < records.len() {
                    let message = records[cursor.position].clone();
                    cursor.position += 1;
                    return Ok(message);
                }
            }
            if cursor.len_rx.changed().await.is_err() {
                return Err(BusError::Transport("topic log dropped".to_string()));
            }
        }
    }

    async fn close(&self) -> Result<(), BusError> {
        self.bus.closed_handles.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

impl LogBus for MemoryBus {
    type Producer = MemoryProducer;
    type Reader = MemoryReader;

    async fn create_producer(&self, topic: &str) -> Result<MemoryProducer, BusError> {
        Ok(MemoryProducer {
            bus: self.inner.clone(),
            topic: self.topic(topic),
        })
    }

    async fn create_reader(
        &self,
        topic: &str,
        options: ReaderOptions,
    ) -> Result<MemoryReader, BusError> {
        let topic = self.topic(topic);
        let position = match options.start {
            StartPosition::Earliest => 0,
            StartPosition::Latest => topic.records.lock().unwrap().len(),
        };
        let len_rx = topic.len_watch.subscribe();
        Ok(MemoryReader {
            bus: self.inner.clone(),
            topic,
            cursor: tokio::sync::Mutex::new(ReaderCursor { position, len_rx }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block_on<F: std::future::Future>(future: F) -> F::Output {
        tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .unwrap()
            .block_on(future)
    }

    #[test]
    fn test_append_then_read() {
        block_on(async {
            let bus = MemoryBus::new();
            let producer = bus.create_producer("t").await.unwrap();
            let reader = bus
                .create_reader("t", ReaderOptions::default())
                .await
                .unwrap();

            let id = producer
                .append(OutboundRecord {
                    key: Some(vec![1]),
                    value: vec![2, 3],
                    event_time: 7,
                })
                .await
                .unwrap();
            assert_eq!(id, MessageId(0));

            let message = reader.read_next().await.unwrap();
            assert_eq!(message.id, MessageId(0));
            assert_eq!(message.key, Some(vec![1]));
            assert_eq!(message.value, vec![2, 3]);
        })
    }

    #[test]
    fn test_read_pends_until_append() {
        block_on(async {
            let bus = MemoryBus::new();
            let reader = bus
                .create_reader("t", ReaderOptions::default())
                .await
                .unwrap();

            let pending = {
                let bus = bus.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
                    bus.seed("t", None, vec![42], 0);
                })
            };

            let message = reader.read_next().await.unwrap();
            assert_eq!(message.value, vec![42]);
            pending.await.unwrap();
        })
    }

    #[test]
    fn test_seeded_ids_are_monotonic() {
        let bus = MemoryBus::new();
        assert_eq!(bus.seed("t", None, vec![], 0), MessageId(0));
        assert_eq!(bus.seed("t", Some(vec![9]), vec![1], 0), MessageId(1));
        assert_eq!(bus.records("t").len(), 2);
    }

    #[test]
    fn test_gate_holds_one_append() {
        block_on(async {
            let bus = MemoryBus::new();
            let producer = Arc::new(bus.create_producer("t").await.unwrap());
            let gate = bus.gate_next_append();

            let appender = {
                let producer = producer.clone();
                tokio::spawn(async move {
                    producer
                        .append(OutboundRecord {
                            key: None,
                            value: vec![1],
                            event_time: 0,
                        })
                        .await
                })
            };

            gate.entered().await;
            assert!(bus.records("t").is_empty());
            gate.release();
            appender.await.unwrap().unwrap();
            assert_eq!(bus.records("t").len(), 1);
        })
    }

    #[test]
    fn test_fail_next_append() {
        block_on(async {
            let bus = MemoryBus::new();
            let producer = bus.create_producer("t").await.unwrap();
            bus.fail_next_append(BusError::NotEnoughReplicas);
            let err = producer
                .append(OutboundRecord {
                    key: None,
                    value: vec![],
                    event_time: 0,
                })
                .await
                .unwrap_err();
            assert!(matches!(err, BusError::NotEnoughReplicas));
            // the failure is one-shot
            producer
                .append(OutboundRecord {
                    key: None,
                    value: vec![],
                    event_time: 0,
                })
                .await
                .unwrap();
        })
    }
}
