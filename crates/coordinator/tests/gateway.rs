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

use corax_bus_client::MessageId;
use corax_coordinator::LogGateway;
use corax_tests_toolkit::MemoryBus;

#[test]
fn test_partition_topic_naming() {
    let bus = MemoryBus::new();
    let gateway = LogGateway::new(bus, "__consumer_offsets");
    assert_eq!(
        gateway.partition_topic(7),
        "__consumer_offsets-partition-7"
    );
}

#[test]
fn test_append_read_and_placeholder() {
    corax_tests_toolkit::init_logging();
    corax_runtime::test_runtime().block_on(async {
        let bus = MemoryBus::new();
        let gateway = LogGateway::new(bus.clone(), "__transaction_state");

        let first = gateway
            .append(3, Some(vec![1]), vec![2], 100)
            .await
            .unwrap();
        assert_eq!(first, MessageId(0));

        // the placeholder is keyless, empty, and ordered after the append
        let marker = gateway.placeholder(3).await.unwrap();
        assert!(marker > first);

        let message = gateway.read_next(3).await.unwrap();
        assert_eq!(message.id, first);
        assert_eq!(message.key, Some(vec![1]));

        let message = gateway.read_next(3).await.unwrap();
        assert_eq!(message.id, marker);
        assert_eq!(message.key, None);
        assert!(message.value.is_empty());

        // appends land on the partition's own topic
        assert_eq!(bus.records("__transaction_state-partition-3").len(), 2);
        assert!(bus.records("__transaction_state-partition-4").is_empty());
    })
}

#[test]
fn test_pop_forgets_handles() {
    corax_runtime::test_runtime().block_on(async {
        let bus = MemoryBus::new();
        let gateway = LogGateway::new(bus.clone(), "__transaction_state");

        gateway.append(5, None, vec![], 0).await.unwrap();
        gateway.read_next(5).await.unwrap();

        let (producer, reader) = gateway.pop(5).await;
        assert!(producer.is_some());
        assert!(reader.is_some());

        // a second pop has nothing left
        let (producer, reader) = gateway.pop(5).await;
        assert!(producer.is_none());
        assert!(reader.is_none());

        // fresh handles are created on the next use, reading from earliest
        let message = gateway.read_next(5).await.unwrap();
        assert_eq!(message.id, MessageId(0));
    })
}
