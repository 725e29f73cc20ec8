//! Single-slot coalescing queue for hardware application.
//!
//! Decision cycles only raise a dirty flag. A dedicated worker task clears
//! the flag and runs one application against whatever the state is at that
//! moment, so any number of schedules between two runs collapse into one.

use crate::core::error::Result;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

/// Work run by the queue. Reads current state when invoked, never a snapshot
/// taken at schedule time.
pub trait Apply: Send + Sync + 'static {
    fn apply(&self) -> Result<()>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ApplyStats {
    pub runs: u64,
    pub coalesced: u64,
    pub failures: u64,
}

struct QueueState {
    pending: AtomicBool,
    armed: AtomicBool,
    closed: AtomicBool,
    running: AtomicBool,
    wake: Notify,
    idle: Notify,
    /// Held by the worker for the whole of one application
    in_flight: tokio::sync::Mutex<()>,
    runs: AtomicU64,
    coalesced: AtomicU64,
    failures: AtomicU64,
}

pub struct ApplyQueue {
    state: Arc<QueueState>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Default for ApplyQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl ApplyQueue {
    pub fn new() -> Self {
        Self {
            state: Arc::new(QueueState {
                pending: AtomicBool::new(false),
                armed: AtomicBool::new(true),
                closed: AtomicBool::new(false),
                running: AtomicBool::new(false),
                wake: Notify::new(),
                idle: Notify::new(),
                in_flight: tokio::sync::Mutex::new(()),
                runs: AtomicU64::new(0),
                coalesced: AtomicU64::new(0),
                failures: AtomicU64::new(0),
            }),
            worker: Mutex::new(None),
        }
    }

    /// Spawns the worker on the current tokio runtime. The target is held
    /// weakly so the worker ends once its owner is dropped.
    pub fn start<A: Apply>(&self, target: Weak<A>) {
        let mut slot = self.worker.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_some() {
            return;
        }

        let state = self.state.clone();
        state.running.store(true, Ordering::Release);
        *slot = Some(tokio::spawn(async move {
            debug!(target: "mpgpu::apply", "Apply worker started");
            run_worker(&state, target).await;
            state.running.store(false, Ordering::Release);
            state.idle.notify_waiters();
            debug!(target: "mpgpu::apply", "Apply worker stopped");
        }));
    }

    /// Requests one application. Returns false when the request was folded
    /// into an already pending one or scheduling is disarmed.
    pub fn schedule(&self) -> bool {
        if !self.state.armed.load(Ordering::Acquire) || self.state.closed.load(Ordering::Acquire) {
            debug!(target: "mpgpu::apply", "Schedule ignored, queue disarmed");
            return false;
        }
        if self.state.pending.swap(true, Ordering::AcqRel) {
            self.state.coalesced.fetch_add(1, Ordering::Relaxed);
            return false;
        }
        self.state.wake.notify_one();
        true
    }

    pub fn is_pending(&self) -> bool {
        self.state.pending.load(Ordering::Acquire)
    }

    pub fn is_armed(&self) -> bool {
        self.state.armed.load(Ordering::Acquire)
    }

    /// Cancels a pending application, waits out one in flight and disarms
    /// scheduling until [`rearm`](Self::rearm).
    pub async fn flush(&self) {
        self.state.armed.store(false, Ordering::Release);
        if self.state.pending.swap(false, Ordering::AcqRel) {
            debug!(target: "mpgpu::apply", "Cancelled pending application");
        }
        let _guard = self.state.in_flight.lock().await;
        debug!(target: "mpgpu::apply", "Apply queue flushed");
    }

    pub fn rearm(&self) {
        if !self.state.closed.load(Ordering::Acquire) {
            self.state.armed.store(true, Ordering::Release);
            debug!(target: "mpgpu::apply", "Apply queue re-armed");
        }
    }

    /// Waits until nothing is pending or in flight. Does not disarm.
    pub async fn drain(&self) {
        loop {
            let guard = self.state.in_flight.lock().await;
            let busy = self.state.pending.load(Ordering::Acquire)
                && self.state.armed.load(Ordering::Acquire)
                && self.state.running.load(Ordering::Acquire);
            if !busy {
                return;
            }

            let idle = self.state.idle.notified();
            tokio::pin!(idle);
            idle.as_mut().enable();
            drop(guard);
            idle.await;
        }
    }

    /// Stops the worker after cancelling pending work and waiting for the
    /// application in flight.
    pub async fn shutdown(&self) {
        self.state.closed.store(true, Ordering::Release);
        self.flush().await;
        self.state.wake.notify_one();

        let handle = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle
            && let Err(e) = handle.await
        {
            error!(target: "mpgpu::apply", "Apply worker ended abnormally: {}", e);
        }
    }

    pub fn stats(&self) -> ApplyStats {
        ApplyStats {
            runs: self.state.runs.load(Ordering::Relaxed),
            coalesced: self.state.coalesced.load(Ordering::Relaxed),
            failures: self.state.failures.load(Ordering::Relaxed),
        }
    }
}

async fn run_worker<A: Apply>(state: &QueueState, target: Weak<A>) {
    loop {
        state.wake.notified().await;
        if state.closed.load(Ordering::Acquire) {
            return;
        }

        let guard = state.in_flight.lock().await;
        if state.armed.load(Ordering::Acquire) && state.pending.swap(false, Ordering::AcqRel) {
            let Some(target) = target.upgrade() else {
                return;
            };

            match tokio::task::spawn_blocking(move || target.apply()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    state.failures.fetch_add(1, Ordering::Relaxed);
                    warn!(target: "mpgpu::apply", "Deferred application failed: {}", e);
                }
                Err(e) => {
                    state.failures.fetch_add(1, Ordering::Relaxed);
                    error!(target: "mpgpu::apply", "Deferred application panicked: {}", e);
                }
            }
            state.runs.fetch_add(1, Ordering::Relaxed);
        }
        state.idle.notify_waiters();
        drop(guard);
    }
}
