// Copyright 2025 XylemDB Team
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

use crossbeam_queue::ArrayQueue;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, SystemTime};
use tokio::sync::{Notify, oneshot};
use tokio_util::sync::CancellationToken;

use crate::listener::LockEventListener;
use crate::mode::LockMode;
use crate::types::{LockOwner, ResourceId};

/// Which point of the lock protocol an event marks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventPhase {
    /// Intent declared before the grant decision.
    Attempted,
    /// Grant confirmed by the caller.
    Acquired,
    /// One hold increment released.
    Released,
}

/// One immutable record on the diagnostic feed.
///
/// Events are ephemeral telemetry: consumed by listeners, then discarded.
/// The manager never accumulates event history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockEvent {
    pub phase: EventPhase,
    pub resource: ResourceId,
    pub owner: LockOwner,
    pub mode: LockMode,
    pub timestamp: SystemTime,
}

impl LockEvent {
    fn new(phase: EventPhase, resource: ResourceId, owner: LockOwner, mode: LockMode) -> Self {
        Self {
            phase,
            resource,
            owner,
            mode,
            timestamp: SystemTime::now(),
        }
    }

    pub fn attempted(resource: ResourceId, owner: LockOwner, mode: LockMode) -> Self {
        Self::new(EventPhase::Attempted, resource, owner, mode)
    }

    pub fn acquired(resource: ResourceId, owner: LockOwner, mode: LockMode) -> Self {
        Self::new(EventPhase::Acquired, resource, owner, mode)
    }

    pub fn released(resource: ResourceId, owner: LockOwner, mode: LockMode) -> Self {
        Self::new(EventPhase::Released, resource, owner, mode)
    }
}

/// Handle returned by [`EventBus::subscribe`], used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Bounded, lossy, multi-producer/single-consumer diagnostic feed.
///
/// `publish` never blocks and never fails toward lock callers: on overflow
/// the oldest unconsumed event is displaced and counted. One background task
/// drains the queue and fans events out to listeners, so listener cost and
/// listener bugs stay off the acquire/release hot path.
pub struct EventBus {
    queue: ArrayQueue<LockEvent>,
    wake: Notify,
    listeners: RwLock<Vec<(SubscriptionId, Arc<dyn LockEventListener>)>>,
    next_subscription: AtomicU64,
    dropped: AtomicU64,
    listener_panics: AtomicU64,
    accepting: AtomicBool,
    cancel: CancellationToken,
    worker: Mutex<Option<tokio::task::JoinHandle<()>>>,
    done: Mutex<Option<oneshot::Receiver<()>>>,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("capacity", &self.queue.capacity())
            .field("queued", &self.queue.len())
            .field("listeners", &self.listeners.read().len())
            .field("dropped", &self.dropped)
            .finish_non_exhaustive()
    }
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: ArrayQueue::new(capacity.max(1)),
            wake: Notify::new(),
            listeners: RwLock::new(Vec::new()),
            next_subscription: AtomicU64::new(1),
            dropped: AtomicU64::new(0),
            listener_panics: AtomicU64::new(0),
            accepting: AtomicBool::new(true),
            cancel: CancellationToken::new(),
            worker: Mutex::new(None),
            done: Mutex::new(None),
        }
    }

    /// Spin up the single consumer task. Must run inside a tokio runtime.
    pub fn start(self: &Arc<Self>) {
        let mut worker = self.worker.lock();
        if worker.is_some() {
            return;
        }
        let (done_tx, done_rx) = oneshot::channel();
        *self.done.lock() = Some(done_rx);
        let bus = self.clone();
        *worker = Some(tokio::spawn(async move {
            bus.run(done_tx).await;
        }));
    }

    async fn run(&self, done: oneshot::Sender<()>) {
        loop {
            tokio::select! {
                _ = self.wake.notified() => {
                    self.drain();
                }
                _ = self.cancel.cancelled() => {
                    // Final best-effort drain of whatever is still queued.
                    self.drain();
                    let _ = done.send(());
                    tracing::debug!("lock event consumer stopped");
                    break;
                }
            }
        }
    }

    /// Enqueue an event. Lock-free, non-blocking, lossy under overload.
    pub fn publish(&self, event: LockEvent) {
        if !self.accepting.load(Ordering::Acquire) {
            return;
        }
        if self.queue.force_push(event).is_some() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        self.wake.notify_one();
    }

    fn drain(&self) {
        while let Some(event) = self.queue.pop() {
            let listeners: Vec<Arc<dyn LockEventListener>> = self
                .listeners
                .read()
                .iter()
                .map(|(_, listener)| listener.clone())
                .collect();
            for listener in listeners {
                // A misbehaving listener must not stall database operations:
                // count the panic, log it, keep dispatching.
                if catch_unwind(AssertUnwindSafe(|| listener.on_event(&event))).is_err() {
                    self.listener_panics.fetch_add(1, Ordering::Relaxed);
                    tracing::error!(
                        resource = %event.resource,
                        owner = %event.owner,
                        "lock event listener panicked"
                    );
                }
            }
        }
    }

    pub fn subscribe(&self, listener: Arc<dyn LockEventListener>) -> SubscriptionId {
        let id = SubscriptionId(self.next_subscription.fetch_add(1, Ordering::Relaxed));
        self.listeners.write().push((id, listener));
        id
    }

    /// Returns false when the id was not registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|(candidate, _)| *candidate != id);
        listeners.len() != before
    }

    /// Stop accepting events, drain what is queued (bounded), stop the
    /// consumer. Idempotent and safe while other threads still release locks.
    pub async fn shutdown(&self, drain_timeout: Duration) {
        self.accepting.store(false, Ordering::Release);
        self.cancel.cancel();

        let receiver = self.done.lock().take();
        if let Some(receiver) = receiver {
            if tokio::time::timeout(drain_timeout, receiver).await.is_err() {
                tracing::warn!(?drain_timeout, "lock event consumer did not drain in time, aborting");
                if let Some(handle) = self.worker.lock().take() {
                    handle.abort();
                }
                return;
            }
        }
        if let Some(handle) = self.worker.lock().take() {
            handle.abort();
        }
    }

    /// Events displaced from the full queue so far.
    pub fn dropped_events(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Listener panics swallowed so far.
    pub fn listener_panics(&self) -> u64 {
        self.listener_panics.load(Ordering::Relaxed)
    }

    #[cfg(test)]
    pub(crate) fn queued(&self) -> usize {
        self.queue.len()
    }
}
