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

use std::num::NonZeroUsize;
use std::sync::OnceLock;

use serde::Deserialize;
use serde::Serialize;

use crate::Builder;
use crate::Runtime;

/// Worker pool sizing, injected by whoever embeds the coordinator.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct RuntimeOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coordinator_runtime_threads: Option<NonZeroUsize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bus_runtime_threads: Option<NonZeroUsize>,
}

pub fn make_runtime(runtime_name: &str, thread_name: &str, worker_threads: usize) -> Runtime {
    log::info!(
        "creating runtime with runtime_name: {runtime_name}, thread_name: {thread_name}, work_threads: {worker_threads}."
    );
    Builder::default()
        .runtime_name(runtime_name)
        .thread_name(thread_name)
        .worker_threads(worker_threads)
        .build()
        .expect("failed to create runtime")
}

#[cfg(any(test, feature = "test"))]
pub fn test_runtime() -> &'static Runtime {
    static RT: OnceLock<Runtime> = OnceLock::new();
    RT.get_or_init(|| make_runtime("test_runtime", "test_thread", 4))
}

#[derive(Debug)]
struct GlobalRuntimes {
    coordinator_runtime: Runtime,
    bus_runtime: Runtime,
}

static GLOBAL_RUNTIMES: OnceLock<GlobalRuntimes> = OnceLock::new();

pub fn init(opts: &RuntimeOptions) {
    GLOBAL_RUNTIMES.get_or_init(|| do_initialize_runtimes(opts));
}

fn do_initialize_runtimes(opts: &RuntimeOptions) -> GlobalRuntimes {
    log::info!("initializing global runtimes: {opts:?}");

    set_panic_hook();

    let RuntimeOptions {
        coordinator_runtime_threads,
        bus_runtime_threads,
    } = opts;

    let coordinator_runtime = make_runtime(
        "coordinator_runtime",
        "coordinator_thread",
        coordinator_runtime_threads.unwrap_or_else(num_cpus).get(),
    );
    let bus_runtime = make_runtime(
        "bus_runtime",
        "bus_thread",
        bus_runtime_threads.unwrap_or_else(num_cpus).get(),
    );

    GlobalRuntimes {
        coordinator_runtime,
        bus_runtime,
    }
}

// `available_parallelism` can fail on exotic platforms; one worker is
// still a working pool.
fn num_cpus() -> NonZeroUsize {
    std::thread::available_parallelism().unwrap_or_else(|err| {
        log::warn!("failed to probe the available parallelism, using one worker: {err}");
        NonZeroUsize::new(1).unwrap()
    })
}

fn set_panic_hook() {
    std::panic::set_hook(Box::new(move |info| {
        let backtrace = std::backtrace::Backtrace::force_capture();
        log::error!("panic occurred: {info}\nbacktrace:\n{backtrace}");
        better_panic::Settings::auto().create_panic_handler()(info);
        log::info!("shutting down runtimes");
        std::process::exit(1);
    }));
}

fn fetch_runtimes_or_default() -> &'static GlobalRuntimes {
    GLOBAL_RUNTIMES.get_or_init(|| do_initialize_runtimes(&RuntimeOptions::default()))
}

/// The pool that runs computation phases: record decoding, cache mutation,
/// load drains.
pub fn coordinator_runtime() -> &'static Runtime {
    &fetch_runtimes_or_default().coordinator_runtime
}

/// The pool that runs bus I/O continuations and asynchronous handle close.
pub fn bus_runtime() -> &'static Runtime {
    &fetch_runtimes_or_default().bus_runtime
}
