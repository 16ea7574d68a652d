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

//! Worker pools for the coordinator: a tokio wrapper whose task handles
//! escalate panics instead of swallowing them, plus lazily built global
//! pools for computation phases ([`coordinator_runtime`]) and bus I/O
//! ([`bus_runtime`]).

mod global;
pub use global::*;

mod runtime;
pub use runtime::*;
