//! Reconcile controller runtime.
//!
//! Keys enter a de-duplicating [`WorkQueue`] from store events (via
//! [`Controller::watch`]) or from reconcilers asking to be requeued.
//! Workers pull keys and hand them to a [`Reconciler`]. A key is never
//! reconciled by two workers at once: a key added while it is in flight
//! is parked and re-queued when the running reconcile finishes.

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::{Notify, broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::StateError;
use crate::types::{Event, ObjectKey};

/// Default delay before retrying a transient failure.
pub const DEFAULT_RETRY: Duration = Duration::from_secs(5);

/// What to do with a key after a successful reconcile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Done,
    RequeueAfter(Duration),
}

#[derive(Debug, Error)]
pub enum ReconcileError {
    /// Retried after the controller's retry delay.
    #[error("{0}")]
    Transient(String),

    /// Logged and dropped until the key changes again.
    #[error("{0}")]
    Permanent(String),
}

impl From<StateError> for ReconcileError {
    fn from(e: StateError) -> Self {
        match e {
            StateError::Encode { .. } | StateError::Decode { .. } => {
                ReconcileError::Permanent(e.to_string())
            }
            other => ReconcileError::Transient(other.to_string()),
        }
    }
}

#[async_trait]
pub trait Reconciler: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    async fn reconcile(&self, key: &ObjectKey) -> Result<Action, ReconcileError>;
}

// ── Work queue ─────────────────────────────────────────────────

#[derive(Default)]
struct QueueState {
    queue: VecDeque<ObjectKey>,
    queued: HashSet<ObjectKey>,
    in_flight: HashSet<ObjectKey>,
    dirty: HashSet<ObjectKey>,
}

#[derive(Default)]
pub struct WorkQueue {
    state: Mutex<QueueState>,
    notify: Notify,
}

impl WorkQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Queue `key` unless it is already waiting.
    pub fn add(&self, key: ObjectKey) {
        let mut state = self.state();
        if state.in_flight.contains(&key) {
            state.dirty.insert(key);
            return;
        }
        if state.queued.insert(key.clone()) {
            state.queue.push_back(key);
            drop(state);
            self.notify.notify_one();
        }
    }

    /// Queue `key` once `delay` has passed.
    pub fn add_after(self: &Arc<Self>, key: ObjectKey, delay: Duration) {
        let queue = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.add(key);
        });
    }

    /// Wait for the next key and mark it in flight.
    pub async fn pop(&self) -> ObjectKey {
        loop {
            {
                let mut state = self.state();
                if let Some(key) = state.queue.pop_front() {
                    state.queued.remove(&key);
                    state.in_flight.insert(key.clone());
                    // Wake another worker if more is waiting.
                    if !state.queue.is_empty() {
                        self.notify.notify_one();
                    }
                    return key;
                }
            }
            self.notify.notified().await;
        }
    }

    /// Mark `key` finished, re-queueing it if it changed meanwhile.
    pub fn done(&self, key: &ObjectKey) {
        let requeue = {
            let mut state = self.state();
            state.in_flight.remove(key);
            state.dirty.remove(key)
        };
        if requeue {
            self.add(key.clone());
        }
    }

    /// Keys waiting to be picked up.
    pub fn len(&self) -> usize {
        self.state().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ── Controller ─────────────────────────────────────────────────

pub struct Controller<R: Reconciler> {
    reconciler: Arc<R>,
    queue: Arc<WorkQueue>,
    workers: usize,
    retry: Duration,
}

impl<R: Reconciler> Controller<R> {
    pub fn new(reconciler: Arc<R>) -> Self {
        Self {
            reconciler,
            queue: Arc::new(WorkQueue::new()),
            workers: 1,
            retry: DEFAULT_RETRY,
        }
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn with_retry(mut self, retry: Duration) -> Self {
        self.retry = retry;
        self
    }

    pub fn queue(&self) -> Arc<WorkQueue> {
        self.queue.clone()
    }

    /// Feed the queue from store events. `map` turns each event into the
    /// keys this controller should reconcile.
    pub fn watch<F>(
        &self,
        mut events: broadcast::Receiver<Event>,
        mut shutdown: watch::Receiver<bool>,
        map: F,
    ) -> JoinHandle<()>
    where
        F: Fn(&Event) -> Vec<ObjectKey> + Send + 'static,
    {
        let queue = self.queue.clone();
        let name = self.reconciler.name();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    event = events.recv() => match event {
                        Ok(event) => {
                            for key in map(&event) {
                                queue.add(key);
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(controller = name, skipped, "event stream lagged");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                    _ = shutdown.changed() => break,
                }
            }
            debug!(controller = name, "event watch stopped");
        })
    }

    /// Run the workers until `shutdown` fires.
    pub async fn run(self, shutdown: watch::Receiver<bool>) {
        let name = self.reconciler.name();
        info!(controller = name, workers = self.workers, "controller started");
        let mut handles = Vec::with_capacity(self.workers);
        for _ in 0..self.workers {
            let worker = Worker {
                reconciler: self.reconciler.clone(),
                queue: self.queue.clone(),
                retry: self.retry,
            };
            handles.push(tokio::spawn(worker.run(shutdown.clone())));
        }
        for handle in handles {
            let _ = handle.await;
        }
        info!(controller = name, "controller stopped");
    }
}

struct Worker<R> {
    reconciler: Arc<R>,
    queue: Arc<WorkQueue>,
    retry: Duration,
}

impl<R: Reconciler> Worker<R> {
    async fn run(self, mut shutdown: watch::Receiver<bool>) {
        loop {
            tokio::select! {
                key = self.queue.pop() => self.handle(key).await,
                _ = shutdown.changed() => break,
            }
        }
    }

    async fn handle(&self, key: ObjectKey) {
        let name = self.reconciler.name();
        match self.reconciler.reconcile(&key).await {
            Ok(Action::Done) => debug!(controller = name, %key, "reconciled"),
            Ok(Action::RequeueAfter(delay)) => {
                debug!(controller = name, %key, ?delay, "requeue requested");
                self.queue.add_after(key.clone(), delay);
            }
            Err(ReconcileError::Transient(e)) => {
                warn!(controller = name, %key, error = %e, "reconcile failed, retrying");
                self.queue.add_after(key.clone(), self.retry);
            }
            Err(ReconcileError::Permanent(e)) => {
                error!(controller = name, %key, error = %e, "reconcile failed");
            }
        }
        self.queue.done(&key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::types::ObjectKind;

    fn key(name: &str) -> ObjectKey {
        ObjectKey::new("net", name)
    }

    #[tokio::test]
    async fn queue_dedups_waiting_keys() {
        let queue = WorkQueue::new();
        queue.add(key("a"));
        queue.add(key("a"));
        queue.add(key("b"));
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.pop().await, key("a"));
        assert_eq!(queue.pop().await, key("b"));
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn key_added_in_flight_is_parked() {
        let queue = WorkQueue::new();
        queue.add(key("a"));
        let a = queue.pop().await;
        queue.add(key("a"));
        assert!(queue.is_empty());
        queue.done(&a);
        assert_eq!(queue.len(), 1);
    }

    struct Counting {
        calls: AtomicUsize,
        active: AtomicUsize,
        overlapped: AtomicUsize,
    }

    #[async_trait]
    impl Reconciler for Counting {
        fn name(&self) -> &'static str {
            "counting"
        }

        async fn reconcile(&self, _key: &ObjectKey) -> Result<Action, ReconcileError> {
            if self.active.fetch_add(1, Ordering::SeqCst) > 0 {
                self.overlapped.fetch_add(1, Ordering::SeqCst);
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.active.fetch_sub(1, Ordering::SeqCst);
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Action::Done)
        }
    }

    #[tokio::test]
    async fn events_drive_reconciles_without_overlap() {
        let reconciler = Arc::new(Counting {
            calls: AtomicUsize::new(0),
            active: AtomicUsize::new(0),
            overlapped: AtomicUsize::new(0),
        });
        let controller = Controller::new(reconciler.clone()).with_workers(4);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (events_tx, events_rx) = broadcast::channel(16);
        let watcher = controller.watch(events_rx, shutdown_rx.clone(), |e| vec![e.key.clone()]);
        let run = tokio::spawn(controller.run(shutdown_rx));

        for _ in 0..5 {
            events_tx
                .send(Event {
                    kind: ObjectKind::Device,
                    key: key("leaf1"),
                })
                .unwrap();
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        tokio::time::sleep(Duration::from_millis(200)).await;

        let calls = reconciler.calls.load(Ordering::SeqCst);
        assert!(calls >= 1 && calls <= 5, "calls = {calls}");
        assert_eq!(reconciler.overlapped.load(Ordering::SeqCst), 0);

        shutdown_tx.send(true).unwrap();
        watcher.await.unwrap();
        run.await.unwrap();
    }
}
