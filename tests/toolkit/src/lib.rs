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

//! Test doubles for the Corax test suites, chiefly [`MemoryBus`]: a
//! complete in-memory log bus with per-topic ordered logs, monotonically
//! increasing message ids, and hooks for holding an append in flight or
//! failing the next one.

mod memory_bus;

pub use memory_bus::AppendGate;
pub use memory_bus::MemoryBus;

use std::sync::Once;

/// Initializes stderr logging once per test binary. `RUST_LOG` wins.
pub fn init_logging() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        corax_telemetry::init(&corax_telemetry::TelemetryConfig::default());
    });
}
