// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Operation queue.
//!
//! Holds operation IDs, never operation state. An ID is either ready,
//! delayed until a deadline, or being processed by exactly one worker.
//! Adding an ID that is already queued does nothing, so a resumed operation
//! enqueued twice still runs once at a time.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use provisioner_core::persistence::{Persistence, PersistenceError};
use tokio::sync::{Notify, watch};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::executor::{OperationExecutor, ProcessingResult};

/// Upper bound of executions in one [`OperationQueue::drive_until_idle`] call.
const DRIVE_LIMIT: usize = 10_000;

/// Queue configuration.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Number of concurrent workers. With zero workers nothing is processed
    /// until [`OperationQueue::drive_until_idle`] is called.
    pub workers: usize,
    /// Delay before an operation runs again after a recoverable error.
    pub retry_delay: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            workers: 5,
            retry_delay: Duration::from_secs(5),
        }
    }
}

#[derive(Default)]
struct QueueState {
    ready: VecDeque<String>,
    delayed: HashMap<String, Instant>,
    processing: HashSet<String>,
    /// Added while processing; requeued right after.
    dirty: HashSet<String>,
}

impl QueueState {
    fn is_ready(&self, id: &str) -> bool {
        self.ready.iter().any(|queued| queued == id)
    }

    fn push_ready(&mut self, id: String) {
        self.delayed.remove(&id);
        if !self.is_ready(&id) {
            self.ready.push_back(id);
        }
    }

    /// Move delayed items whose deadline passed to the ready list.
    fn promote_due(&mut self, now: Instant) {
        let mut due: Vec<(String, Instant)> = self
            .delayed
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(id, deadline)| (id.clone(), *deadline))
            .collect();
        due.sort_by_key(|(_, deadline)| *deadline);
        for (id, _) in due {
            self.push_ready(id);
        }
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.delayed.values().min().copied()
    }

    fn take_ready(&mut self) -> Option<String> {
        let id = self.ready.pop_front()?;
        self.processing.insert(id.clone());
        Some(id)
    }
}

/// Work queue driving operations through their executor.
pub struct OperationQueue {
    executor: Arc<dyn OperationExecutor>,
    config: QueueConfig,
    state: Mutex<QueueState>,
    available: Notify,
    shutdown: Arc<Notify>,
}

impl OperationQueue {
    pub fn new(executor: Arc<dyn OperationExecutor>, config: QueueConfig) -> Self {
        Self {
            executor,
            config,
            state: Mutex::new(QueueState::default()),
            available: Notify::new(),
            shutdown: Arc::new(Notify::new()),
        }
    }

    fn state(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Get a handle to signal shutdown.
    pub fn shutdown_handle(&self) -> Arc<Notify> {
        self.shutdown.clone()
    }

    /// Enqueue `operation_id` for immediate processing.
    ///
    /// A delayed entry is brought forward.
    pub fn add(&self, operation_id: &str) {
        {
            let mut state = self.state();
            if state.processing.contains(operation_id) {
                state.dirty.insert(operation_id.to_string());
                return;
            }
            state.push_ready(operation_id.to_string());
        }
        debug!(operation_id = %operation_id, "Operation enqueued");
        self.available.notify_one();
    }

    /// Enqueue `operation_id` to run after `delay`.
    pub fn add_after(&self, operation_id: &str, delay: Duration) {
        if delay.is_zero() {
            self.add(operation_id);
            return;
        }

        {
            let mut state = self.state();
            if state.processing.contains(operation_id) || state.is_ready(operation_id) {
                return;
            }
            let deadline = Instant::now() + delay;
            let entry = state
                .delayed
                .entry(operation_id.to_string())
                .or_insert(deadline);
            if deadline < *entry {
                *entry = deadline;
            }
        }
        // Wake a worker so it recomputes its sleep deadline.
        self.available.notify_one();
    }

    /// Number of operations ready, delayed or being processed.
    pub fn len(&self) -> usize {
        let state = self.state();
        state.ready.len() + state.delayed.len() + state.processing.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Enqueue every operation persisted as in progress.
    pub async fn resume_in_progress(
        &self,
        persistence: &dyn Persistence,
    ) -> Result<usize, PersistenceError> {
        let operations = persistence.list_in_progress_operations().await?;
        for operation in &operations {
            self.add(&operation.id);
        }
        if !operations.is_empty() {
            info!(count = operations.len(), "Resumed in-progress operations");
        }
        Ok(operations.len())
    }

    /// Record the executor's verdict for an item taken from the queue.
    fn done(&self, operation_id: &str, result: ProcessingResult) {
        let requeue_now = {
            let mut state = self.state();
            state.processing.remove(operation_id);
            state.dirty.remove(operation_id)
        };

        if requeue_now {
            self.add(operation_id);
        } else if result.requeue {
            self.add_after(operation_id, result.delay);
        }
    }

    /// Wait for the next ready item.
    async fn next(&self) -> String {
        loop {
            // Registered before inspecting the state so an add in between is not lost.
            let notified = self.available.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let deadline = {
                let mut state = self.state();
                state.promote_due(Instant::now());
                if let Some(id) = state.take_ready() {
                    return id;
                }
                state.next_deadline()
            };

            match deadline {
                Some(deadline) => {
                    tokio::select! {
                        _ = &mut notified => {}
                        _ = tokio::time::sleep_until(deadline) => {}
                    }
                }
                None => notified.await,
            }
        }
    }

    async fn process(&self, operation_id: String) {
        let result = self.executor.execute(&operation_id).await;
        debug!(
            operation_id = %operation_id,
            requeue = result.requeue,
            delay_ms = result.delay.as_millis() as u64,
            "Operation processed"
        );
        self.done(&operation_id, result);
    }

    async fn worker(self: Arc<Self>, worker: usize, mut stop: watch::Receiver<bool>) {
        debug!(worker = worker, "Queue worker started");
        loop {
            tokio::select! {
                biased;

                _ = stop.changed() => break,
                operation_id = self.next() => {
                    // The in-flight operation finishes before the worker stops.
                    self.process(operation_id).await;
                    if *stop.borrow() {
                        break;
                    }
                }
            }
        }
        debug!(worker = worker, "Queue worker stopped");
    }

    /// Run the worker pool until shutdown is signalled.
    pub async fn run(self: Arc<Self>) {
        let workers = self.config.workers;
        info!(workers = workers, "Operation queue started");

        let (stop_tx, stop_rx) = watch::channel(false);
        let mut pool = JoinSet::new();
        for worker in 0..workers {
            pool.spawn(self.clone().worker(worker, stop_rx.clone()));
        }

        self.shutdown.notified().await;
        info!("Operation queue shutting down");
        let _ = stop_tx.send(true);

        while let Some(result) = pool.join_next().await {
            if let Err(e) = result {
                error!(error = %e, "Queue worker panicked");
            }
        }
        info!("Operation queue stopped");
    }

    /// Process queued work inline until nothing is left.
    ///
    /// Delays are collapsed: when no item is ready, the delayed item with the
    /// earliest deadline runs next. Returns the number of executions.
    pub async fn drive_until_idle(&self) -> usize {
        let mut executions = 0;

        while executions < DRIVE_LIMIT {
            let next = {
                let mut state = self.state();
                if state.ready.is_empty() {
                    let earliest = state
                        .delayed
                        .iter()
                        .min_by_key(|(_, deadline)| **deadline)
                        .map(|(id, _)| id.clone());
                    if let Some(id) = earliest {
                        state.push_ready(id);
                    }
                }
                state.take_ready()
            };
            let Some(operation_id) = next else {
                break;
            };

            self.process(operation_id).await;
            executions += 1;
        }

        if executions == DRIVE_LIMIT {
            warn!(executions = executions, "Queue still busy after execution limit");
        }
        executions
    }
}
