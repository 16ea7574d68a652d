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

//! The wire contract of the log bus that backs the Corax coordinator.
//!
//! The bus itself is an external collaborator. Corax only relies on the
//! primitives below: per-topic producers with acknowledged appends, and
//! per-topic readers that replay the compacted log from the earliest
//! message. Durability, replication, and compaction are the bus's business.

use std::future::Future;

/// The position of a message in a bus topic.
///
/// Totally ordered: the bus assigns strictly increasing ids within a topic,
/// so comparing two ids answers "was this appended before that".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MessageId(pub i64);

/// A record handed to [`LogProducer::append`].
///
/// An empty `value` is a tombstone for compaction purposes; a record with
/// neither key nor value is a pure position marker (see the loader's drain
/// protocol).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundRecord {
    pub key: Option<Vec<u8>>,
    pub value: Vec<u8>,
    pub event_time: i64,
}

/// A record handed back by [`LogReader::read_next`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub id: MessageId,
    pub key: Option<Vec<u8>>,
    pub value: Vec<u8>,
    pub event_time: i64,
}

/// Where a freshly created reader starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StartPosition {
    #[default]
    Earliest,
    Latest,
}

/// Options for [`LogBus::create_reader`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ReaderOptions {
    pub start: StartPosition,
    /// Read the compacted view of the topic, keyed on the record key. The
    /// bus may serve fewer messages than were appended, never more.
    pub compacted: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("unknown topic or partition: {0}")]
    UnknownTopicOrPartition(String),
    #[error("not enough replicas to acknowledge the append")]
    NotEnoughReplicas,
    #[error("bus request timed out")]
    RequestTimedOut,
    #[error("bus storage fault: {0}")]
    Storage(String),
    #[error("message too large: {0} bytes")]
    MessageTooLarge(usize),
    #[error("record list too large: {0} entries")]
    RecordListTooLarge(usize),
    #[error("bus transport error: {0}")]
    Transport(String),
}

/// A per-topic append handle.
pub trait LogProducer: Send + Sync + 'static {
    fn append(
        &self,
        record: OutboundRecord,
    ) -> impl Future<Output = Result<MessageId, BusError>> + Send;

    fn close(&self) -> impl Future<Output = Result<(), BusError>> + Send;
}

/// A per-topic sequential read handle.
pub trait LogReader: Send + Sync + 'static {
    /// Resolves with the next message in topic order. Pends until one is
    /// available.
    fn read_next(&self) -> impl Future<Output = Result<InboundMessage, BusError>> + Send;

    fn close(&self) -> impl Future<Output = Result<(), BusError>> + Send;
}

/// Factory for producers and readers of one log bus.
pub trait LogBus: Send + Sync + 'static {
    type Producer: LogProducer;
    type Reader: LogReader;

    fn create_producer(
        &self,
        topic: &str,
    ) -> impl Future<Output = Result<Self::Producer, BusError>> + Send;

    fn create_reader(
        &self,
        topic: &str,
        options: ReaderOptions,
    ) -> impl Future<Output = Result<Self::Reader, BusError>> + Send;
}
