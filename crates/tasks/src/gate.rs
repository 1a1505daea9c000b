//! Reusable pause gate.
//!
//! The gate state `{armed, epoch}` lives in a watch channel. Every `arm()`
//! on an idle gate starts a new epoch; waiters block until their epoch is
//! released. `release()` wakes every waiter at once, then drains the queue
//! of deferred callbacks through the bounded scheduler.

use std::collections::VecDeque;
use std::convert::Infallible;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures_util::future::BoxFuture;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::scheduler::{DEFAULT_CONCURRENCY, run_bounded};

/// Async action queued until the next release.
pub type DeferredCallback = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct GateState {
    armed: bool,
    epoch: u64,
}

struct GateInner {
    state: watch::Sender<GateState>,
    deferred: Mutex<VecDeque<DeferredCallback>>,
    /// Auto-release timer and the epoch it belongs to.
    timer: Mutex<Option<(u64, JoinHandle<()>)>>,
    /// Serializes callback drains so two releases never interleave them.
    draining: tokio::sync::Mutex<()>,
}

/// A pause point shared between a controller and its workers.
///
/// Cloning is cheap; all clones refer to the same gate.
#[derive(Clone)]
pub struct PauseGate {
    inner: Arc<GateInner>,
}

/// Handle to one armed epoch of a [`PauseGate`].
#[derive(Debug)]
pub struct WaitPoint {
    rx: watch::Receiver<GateState>,
    epoch: u64,
}

impl WaitPoint {
    /// The epoch this wait-point belongs to.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Waits until this epoch is released.
    pub async fn wait(mut self) {
        let epoch = self.epoch;
        let _ = self.rx.wait_for(|s| !s.armed || s.epoch != epoch).await;
    }
}

impl Default for PauseGate {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for PauseGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = *self.inner.state.borrow();
        f.debug_struct("PauseGate")
            .field("armed", &state.armed)
            .field("epoch", &state.epoch)
            .finish()
    }
}

impl PauseGate {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(GateInner {
                state: watch::Sender::new(GateState {
                    armed: false,
                    epoch: 0,
                }),
                deferred: Mutex::new(VecDeque::new()),
                timer: Mutex::new(None),
                draining: tokio::sync::Mutex::new(()),
            }),
        }
    }

    /// Returns whether a pause is pending.
    pub fn is_armed(&self) -> bool {
        self.inner.state.borrow().armed
    }

    /// Arms the gate, or returns the current wait-point if already armed.
    pub fn arm(&self) -> WaitPoint {
        let mut epoch = 0;
        let armed = self.inner.state.send_if_modified(|s| {
            let idle = !s.armed;
            if idle {
                s.armed = true;
                s.epoch += 1;
            }
            epoch = s.epoch;
            idle
        });
        if armed {
            debug!(epoch, "pause gate armed");
        }
        WaitPoint {
            rx: self.inner.state.subscribe(),
            epoch,
        }
    }

    /// Arms the gate and releases it automatically after `timeout` unless an
    /// explicit [`release`](Self::release) happens first.
    ///
    /// Must be called from within a tokio runtime.
    pub fn arm_with_timeout(&self, timeout: Duration) -> WaitPoint {
        let point = self.arm();
        let epoch = point.epoch;
        let gate = self.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            gate.release_epoch(epoch).await;
        });

        let mut timer = self.inner.timer.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some((_, previous)) = timer.replace((epoch, handle)) {
            previous.abort();
        }
        point
    }

    /// Waits for the current pause to end. Returns at once when idle.
    pub async fn await_release(&self) {
        let mut rx = self.inner.state.subscribe();
        let current = *rx.borrow_and_update();
        if !current.armed {
            return;
        }
        let _ = rx
            .wait_for(|s| !s.armed || s.epoch != current.epoch)
            .await;
    }

    /// Queues `callback` to run on the next release.
    pub fn on_release<F, Fut>(&self, callback: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let boxed: DeferredCallback = Box::new(move || Box::pin(callback()));
        self.inner
            .deferred
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(boxed);
    }

    /// Number of callbacks waiting for the next release.
    pub fn pending_callbacks(&self) -> usize {
        self.inner
            .deferred
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Wakes every waiter, then runs the queued callbacks in registration
    /// order, at most [`DEFAULT_CONCURRENCY`] at a time.
    ///
    /// Returns once every callback has finished.
    pub async fn release(&self) {
        let timer = self
            .inner
            .timer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some((_, handle)) = timer {
            handle.abort();
        }

        let released = self.inner.state.send_if_modified(|s| {
            let was_armed = s.armed;
            s.armed = false;
            was_armed
        });
        if released {
            debug!("pause gate released");
        }
        self.drain().await;
    }

    /// Timer path: releases only if `epoch` is still the armed one.
    async fn release_epoch(&self, epoch: u64) {
        let released = self.inner.state.send_if_modified(|s| {
            let current = s.armed && s.epoch == epoch;
            if current {
                s.armed = false;
            }
            current
        });
        if !released {
            return;
        }
        debug!(epoch, "pause gate released by timeout");

        {
            let mut timer = self.inner.timer.lock().unwrap_or_else(PoisonError::into_inner);
            if timer.as_ref().is_some_and(|(owner, _)| *owner == epoch) {
                // Dropping our own handle detaches it; this task is finishing.
                timer.take();
            }
        }
        self.drain().await;
    }

    async fn drain(&self) {
        let _guard = self.inner.draining.lock().await;
        let callbacks: Vec<DeferredCallback> = self
            .inner
            .deferred
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        if callbacks.is_empty() {
            return;
        }

        let count = callbacks.len();
        let tasks: Vec<_> = callbacks
            .into_iter()
            .map(|callback| {
                move |_index: usize| async move {
                    callback().await;
                    Ok::<(), Infallible>(())
                }
            })
            .collect();

        if let Err(e) = run_bounded(tasks, DEFAULT_CONCURRENCY).await {
            warn!(error = %e, "deferred callback did not complete");
        }
        debug!(count, "deferred callbacks drained");
    }
}
