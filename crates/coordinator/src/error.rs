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

use corax_bus_client::BusError;

/// The wire-visible coordinator error taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum CoordinatorError {
    #[error("this broker is not the coordinator for the given id")]
    NotCoordinator,
    #[error("the coordinator is not available, retry the request")]
    CoordinatorNotAvailable,
    #[error("the coordinator partition is loading, retry shortly")]
    ConcurrentTransactions,
    #[error("the coordinator is loading and cannot process requests yet")]
    CoordinatorLoadInProgress,
    #[error("the coordinator hit an unrecoverable server error")]
    UnknownServerError,
}

pub type CoordinatorResult<T> = Result<T, CoordinatorError>;

/// A load drain that could not complete; the partition stays unowned.
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct LoadError(pub String);

/// Maps the status of a failed log append onto the coordinator taxonomy.
///
/// Transient replication and transport conditions are retryable as
/// `CoordinatorNotAvailable`; a storage fault means this broker should stop
/// claiming the partition; oversized payloads are not retryable at all.
pub(crate) fn translate_append_error(err: &BusError) -> CoordinatorError {
    match err {
        BusError::UnknownTopicOrPartition(_)
        | BusError::NotEnoughReplicas
        | BusError::RequestTimedOut
        | BusError::Transport(_) => CoordinatorError::CoordinatorNotAvailable,
        BusError::Storage(_) => CoordinatorError::NotCoordinator,
        BusError::MessageTooLarge(_) | BusError::RecordListTooLarge(_) => {
            CoordinatorError::UnknownServerError
        }
    }
}
