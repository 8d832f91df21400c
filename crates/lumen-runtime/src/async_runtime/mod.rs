//! Async runtime infrastructure
//!
//! The VM is single-threaded and cooperative; everything that genuinely
//! waits (timers, HTTP) runs as a task on a process-wide tokio runtime and
//! reports back through a channel of plain [`HostEvent`] values. The event
//! loop translates host events into microtasks, so host callbacks never
//! mutate VM state from outside the loop.

mod promise;

pub use promise::{Promise, PromiseRef, PromiseState, Reaction};

use std::sync::OnceLock;
use std::time::Duration;
use tokio::runtime::Runtime;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

use crate::value::Value;

/// Global tokio runtime for host operations
static TOKIO_RUNTIME: OnceLock<Runtime> = OnceLock::new();

/// Get the global tokio runtime, initializing it on first use
pub fn runtime() -> &'static Runtime {
    TOKIO_RUNTIME.get_or_init(|| {
        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .expect("Failed to initialize tokio runtime")
    })
}

/// Spawn a host task on the runtime
pub fn spawn<F>(future: F) -> tokio::task::JoinHandle<F::Output>
where
    F: std::future::Future + Send + 'static,
    F::Output: Send + 'static,
{
    runtime().spawn(future)
}

/// Block the VM thread on a future (used by the event loop's host wait)
pub fn block_on<F>(future: F) -> F::Output
where
    F: std::future::Future,
{
    runtime().block_on(future)
}

/// Completion notice from a spawned host task
#[derive(Debug)]
pub enum HostEvent {
    /// A `setTimeout` timer elapsed
    TimerFired { id: u64 },
    /// A `setInterval` timer ticked
    IntervalTick { id: u64 },
    /// A `fetch` request finished
    #[cfg(feature = "http")]
    FetchDone {
        id: u64,
        result: Result<FetchResponse, String>,
    },
}

/// Plain-data result of a fetch, converted to VM values on the VM thread
#[cfg(feature = "http")]
#[derive(Debug)]
pub struct FetchResponse {
    pub status: u16,
    pub url: String,
    pub body: String,
}

/// Create the host-event channel a VM listens on
pub fn host_channel() -> (UnboundedSender<HostEvent>, UnboundedReceiver<HostEvent>) {
    unbounded_channel()
}

/// Arm a one-shot timer task that reports back after `ms` milliseconds
pub fn spawn_timer(tx: UnboundedSender<HostEvent>, id: u64, ms: u64) {
    spawn(async move {
        tokio::time::sleep(Duration::from_millis(ms)).await;
        let _ = tx.send(HostEvent::TimerFired { id });
    });
}

/// Arm a repeating timer task; it ticks until the receiver side is dropped
/// or the interval is cleared (cleared intervals drop their ticks on the VM
/// side).
pub fn spawn_interval(tx: UnboundedSender<HostEvent>, id: u64, ms: u64) {
    spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_millis(ms.max(1)));
        interval.tick().await; // first tick completes immediately
        loop {
            interval.tick().await;
            if tx.send(HostEvent::IntervalTick { id }).is_err() {
                break;
            }
        }
    });
}

/// A deferred action executed by the event loop between dispatch windows
pub enum Microtask {
    /// Invoke a callee in a fresh call frame (async function bodies, timer
    /// callbacks). `promise`, when present, is resolved from the frame's
    /// RETURN.
    Call {
        callee: Value,
        args: Vec<Value>,
        receiver: Option<Value>,
        promise: Option<PromiseRef>,
    },
    /// Run a promise reaction with the settled outcome; AWAIT resumption
    /// rides through a native reaction that re-bases the suspended frame
    Reaction {
        reaction: Reaction,
        outcome: Result<Value, Value>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_runtime_initialization() {
        let _ = runtime();
    }

    #[test]
    fn test_block_on() {
        let result = block_on(async { 41 + 1 });
        assert_eq!(result, 42);
    }

    #[test]
    fn test_timer_reports_on_channel() {
        let (tx, mut rx) = host_channel();
        spawn_timer(tx, 7, 1);
        let event = block_on(async {
            tokio::time::timeout(Duration::from_secs(2), rx.recv())
                .await
                .expect("timer did not fire")
        });
        match event {
            Some(HostEvent::TimerFired { id }) => assert_eq!(id, 7),
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
