//! Single-worker drain loop over the process-local signal queue.
//!
//! Publishers push numbered signals into the in-memory queue from any task;
//! exactly one worker pops them in FIFO order and runs the apply engine.
//! `Notify`'s stored-permit semantics make the empty→non-empty wake-up
//! lossless, so a publish racing a drain is never missed and no second
//! drain ever starts.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{watch, Notify};
use tokio::time::sleep;
use tracing::{debug, error, warn};

use automat_kernel::{Engine, EngineError};
use automat_types::{Clock, NumberedSignal};

use crate::context;
use crate::Handle;

//─────────────────────────────
//  Error handling policy
//─────────────────────────────

/// What the drain loop does after a failed apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recovery {
    /// Sleep for the retry interval, then retry the same signal.
    Retry,
    /// Stop the drain loop entirely.
    Halt,
}

/// User hook invoked when an apply cycle fails.
///
/// The failed signal stays at the head of the queue either way; `Retry`
/// keeps the loop alive through persistent failures (database down) without
/// spinning, `Halt` aborts it and is mainly useful in tests.
pub trait ErrorHandler: Send + Sync {
    /// Inspect the error and choose how the loop proceeds.
    fn on_apply_error(&self, error: &EngineError) -> Recovery;
}

/// Default handler: log the error and retry.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogAndRetry;

impl ErrorHandler for LogAndRetry {
    fn on_apply_error(&self, error: &EngineError) -> Recovery {
        error!(%error, "apply cycle failed");
        Recovery::Retry
    }
}

//─────────────────────────────
//  Drain queue
//─────────────────────────────

/// Multi-producer single-consumer queue of numbered signals.
#[derive(Debug, Default)]
pub(crate) struct DrainQueue {
    queue: Mutex<VecDeque<NumberedSignal>>,
    notify: Notify,
}

impl DrainQueue {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Non-blocking enqueue from any task.
    pub(crate) fn offer(&self, signal: NumberedSignal) {
        self.queue.lock().expect("drain queue poisoned").push_back(signal);
        self.notify.notify_one();
    }

    fn head(&self) -> Option<NumberedSignal> {
        self.queue.lock().expect("drain queue poisoned").front().cloned()
    }

    fn pop(&self) {
        self.queue.lock().expect("drain queue poisoned").pop_front();
    }

    async fn wait(&self) {
        self.notify.notified().await;
    }
}

//─────────────────────────────
//  Worker
//─────────────────────────────

pub(crate) struct Worker {
    pub(crate) engine: Engine,
    pub(crate) queue: Arc<DrainQueue>,
    pub(crate) handle: Handle,
    pub(crate) error_handler: Arc<dyn ErrorHandler>,
    pub(crate) retry_interval: Duration,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) shutdown: watch::Receiver<bool>,
}

impl Worker {
    /// Drain until shutdown. At most one of these runs per runtime.
    pub(crate) async fn run(mut self) {
        loop {
            if *self.shutdown.borrow() {
                break;
            }
            let Some(head) = self.queue.head() else {
                tokio::select! {
                    _ = self.queue.wait() => continue,
                    _ = self.shutdown.changed() => break,
                }
            };

            let result = context::scope(self.handle.clone(), self.engine.apply(&head)).await;
            match result {
                Ok(outcome) => {
                    self.queue.pop();
                    for signal in outcome.immediate {
                        self.queue.offer(signal);
                    }
                    for signal in outcome.delayed {
                        spawn_timer(
                            Arc::clone(&self.queue),
                            Arc::clone(&self.clock),
                            self.shutdown.clone(),
                            signal,
                        );
                    }
                }
                Err(error) => match self.error_handler.on_apply_error(&error) {
                    Recovery::Retry => {
                        warn!(
                            seq = head.seq,
                            retry_ms = self.retry_interval.as_millis() as u64,
                            "apply failed, retrying after interval"
                        );
                        tokio::select! {
                            _ = sleep(self.retry_interval) => {}
                            _ = self.shutdown.changed() => break,
                        }
                    }
                    Recovery::Halt => {
                        error!(seq = head.seq, "apply failed, halting drain loop");
                        break;
                    }
                },
            }
        }
        debug!("drain worker stopped");
    }
}

/// Schedule a delayed signal to be offered at its fire-at time.
pub(crate) fn spawn_timer(
    queue: Arc<DrainQueue>,
    clock: Arc<dyn Clock>,
    mut shutdown: watch::Receiver<bool>,
    signal: NumberedSignal,
) {
    tokio::spawn(async move {
        if *shutdown.borrow() {
            return;
        }
        let Some(fire_at) = signal.signal.fire_at else {
            queue.offer(signal);
            return;
        };
        let delay = (fire_at - clock.now_ms()).max(0) as u64;
        tokio::select! {
            _ = sleep(Duration::from_millis(delay)) => queue.offer(signal),
            _ = shutdown.changed() => {}
        }
    });
}
