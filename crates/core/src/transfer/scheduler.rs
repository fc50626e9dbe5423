//! Transfer scheduler
//!
//! A single actor task owns the priority queue, the running set and the
//! pause flag. Callers talk to it through [`TransferScheduler`] commands;
//! workers report back through an internal channel, and the actor forwards
//! every event to the outward stream after updating its own state.

use std::collections::{BinaryHeap, HashMap};
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use super::event::{status, TransferEvent, STATUS_ONLY};
use super::task::{Queued, TaskId, TaskState, TransferMode, TransferTask};
use super::worker::{CancelFlag, TransferWorker};
use crate::cache::ListingCache;
use crate::config::TransferConfig;
use crate::error::{Error, Result};
use crate::gateway::Gateway;

/// Receiving end of the outward event stream
pub type EventStream = mpsc::UnboundedReceiver<TransferEvent>;

/// Scheduler settings
#[derive(Clone)]
pub struct SchedulerOptions {
    pub max_parallel: usize,
    pub progress_interval: Duration,
    pub shutdown_timeout: Duration,
    /// Invalidated when an upload lands
    pub cache: Option<Arc<ListingCache>>,
}

impl SchedulerOptions {
    pub fn with_cache(mut self, cache: Arc<ListingCache>) -> Self {
        self.cache = Some(cache);
        self
    }
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self::from(&TransferConfig::default())
    }
}

impl From<&TransferConfig> for SchedulerOptions {
    fn from(config: &TransferConfig) -> Self {
        Self {
            max_parallel: config.max_parallel.max(1),
            progress_interval: config.progress_interval(),
            shutdown_timeout: config.shutdown_timeout(),
            cache: None,
        }
    }
}

/// Snapshot of scheduler counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SchedulerStats {
    pub queued: usize,
    pub running: usize,
    pub paused: bool,
}

enum Command {
    Enqueue(TaskId, TransferMode, String, String, PathBuf),
    Pause,
    Resume,
    Cancel(TaskId),
    ClearQueue,
    Stats(oneshot::Sender<SchedulerStats>),
    State(TaskId, oneshot::Sender<Option<TaskState>>),
    Shutdown(oneshot::Sender<()>),
}

/// Handle to a running scheduler. Cheap to clone.
#[derive(Clone)]
pub struct TransferScheduler {
    commands: mpsc::UnboundedSender<Command>,
}

impl TransferScheduler {
    /// Start the scheduler actor on the current tokio runtime
    pub fn spawn(gateway: Gateway, options: SchedulerOptions) -> (Self, EventStream) {
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (outward, events) = mpsc::unbounded_channel();
        let (worker_tx, worker_rx) = mpsc::unbounded_channel();

        let actor = Actor {
            gateway,
            options,
            queue: BinaryHeap::new(),
            running: HashMap::new(),
            states: HashMap::new(),
            paused: false,
            next_sequence: 0,
            worker_tx,
            outward,
        };
        tokio::spawn(actor.run(command_rx, worker_rx));

        (Self { commands }, events)
    }

    fn send(&self, command: Command) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_| Error::General("Transfer scheduler has shut down".into()))
    }

    async fn ask<T>(&self, command: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.send(command(tx))?;
        rx.await
            .map_err(|_| Error::General("Transfer scheduler has shut down".into()))
    }

    /// Queue a transfer and return its id.
    ///
    /// A `Queued` update is emitted before the task can be admitted.
    pub fn enqueue(
        &self,
        mode: TransferMode,
        bucket: impl Into<String>,
        key: impl Into<String>,
        local_path: impl Into<PathBuf>,
    ) -> Result<TaskId> {
        let id = TaskId::new();
        self.send(Command::Enqueue(
            id,
            mode,
            bucket.into(),
            key.into(),
            local_path.into(),
        ))?;
        Ok(id)
    }

    pub fn enqueue_upload(
        &self,
        bucket: impl Into<String>,
        key: impl Into<String>,
        source: impl Into<PathBuf>,
    ) -> Result<TaskId> {
        self.enqueue(TransferMode::Upload, bucket, key, source)
    }

    pub fn enqueue_download(
        &self,
        bucket: impl Into<String>,
        key: impl Into<String>,
        destination: impl Into<PathBuf>,
    ) -> Result<TaskId> {
        self.enqueue(TransferMode::Download, bucket, key, destination)
    }

    /// Queue a download ahead of ordinary transfers
    pub fn enqueue_open(
        &self,
        bucket: impl Into<String>,
        key: impl Into<String>,
        destination: impl Into<PathBuf>,
    ) -> Result<TaskId> {
        self.enqueue(TransferMode::OpenView, bucket, key, destination)
    }

    /// Stop admitting tasks; running transfers continue
    pub fn pause(&self) -> Result<()> {
        self.send(Command::Pause)
    }

    pub fn resume(&self) -> Result<()> {
        self.send(Command::Resume)
    }

    /// Cancel a task. A queued task ends at once; a running one is asked to stop.
    pub fn cancel(&self, id: TaskId) -> Result<()> {
        self.send(Command::Cancel(id))
    }

    /// Discard every queued task without emitting events for them
    pub fn clear_queue(&self) -> Result<()> {
        self.send(Command::ClearQueue)
    }

    pub async fn stats(&self) -> Result<SchedulerStats> {
        self.ask(Command::Stats).await
    }

    pub async fn state(&self, id: TaskId) -> Result<Option<TaskState>> {
        self.ask(|reply| Command::State(id, reply)).await
    }

    /// Pause, drop the queue silently, cancel running transfers and wait for
    /// each up to the shutdown timeout.
    ///
    /// A worker that does not settle in time is detached and keeps running
    /// in the background until its store call returns. The event stream
    /// closes once shutdown completes.
    pub async fn shutdown(&self) -> Result<()> {
        self.ask(Command::Shutdown).await
    }
}

struct Running {
    cancel: CancelFlag,
    handle: JoinHandle<()>,
    task: TransferTask,
}

struct Actor {
    gateway: Gateway,
    options: SchedulerOptions,
    queue: BinaryHeap<Queued>,
    running: HashMap<TaskId, Running>,
    states: HashMap<TaskId, TaskState>,
    paused: bool,
    next_sequence: u64,
    worker_tx: mpsc::UnboundedSender<TransferEvent>,
    outward: mpsc::UnboundedSender<TransferEvent>,
}

impl Actor {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut worker_events: mpsc::UnboundedReceiver<TransferEvent>,
    ) {
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Shutdown(reply)) => {
                        commands.close();
                        self.shutdown(&mut worker_events).await;
                        let _ = reply.send(());
                        return;
                    }
                    Some(command) => self.handle(command),
                    None => {
                        self.shutdown(&mut worker_events).await;
                        return;
                    }
                },
                Some(event) = worker_events.recv() => self.on_worker_event(event),
            }
        }
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Enqueue(id, mode, bucket, key, local_path) => {
                let task = TransferTask {
                    id,
                    mode,
                    sequence: self.next_sequence,
                    bucket,
                    key,
                    local_path,
                };
                self.next_sequence += 1;
                tracing::debug!(%id, %mode, sequence = task.sequence, "Task queued");
                self.states.insert(id, TaskState::Queued);
                self.emit(TransferEvent::Updated {
                    id,
                    mode,
                    bucket: task.bucket.clone(),
                    key: task.key.clone(),
                    percent: 0,
                    status: status::QUEUED.to_string(),
                });
                self.queue.push(Queued(task));
                self.pump();
            }
            Command::Pause => {
                self.paused = true;
                tracing::info!("Scheduler paused");
            }
            Command::Resume => {
                self.paused = false;
                tracing::info!("Scheduler resumed");
                self.pump();
            }
            Command::Cancel(id) => self.cancel(id),
            Command::ClearQueue => self.clear_queue(),
            Command::Stats(reply) => {
                let _ = reply.send(SchedulerStats {
                    queued: self.queue.len(),
                    running: self.running.len(),
                    paused: self.paused,
                });
            }
            Command::State(id, reply) => {
                let _ = reply.send(self.states.get(&id).copied());
            }
            Command::Shutdown(_) => unreachable!("handled in run"),
        }
    }

    /// Admit queued tasks while slots are free
    fn pump(&mut self) {
        while !self.paused && self.running.len() < self.options.max_parallel {
            let Some(Queued(task)) = self.queue.pop() else {
                break;
            };
            self.start(task);
        }
    }

    fn start(&mut self, task: TransferTask) {
        let id = task.id;
        let cancel = CancelFlag::default();
        let worker = TransferWorker::new(
            self.gateway.clone(),
            task.clone(),
            cancel.clone(),
            self.worker_tx.clone(),
            self.options.progress_interval,
        );

        let panic_tx = self.worker_tx.clone();
        let handle = tokio::spawn(async move {
            if AssertUnwindSafe(worker.run()).catch_unwind().await.is_err() {
                let _ = panic_tx.send(TransferEvent::Failed {
                    id,
                    message: "Transfer worker panicked".into(),
                });
            }
        });

        tracing::debug!(%id, running = self.running.len() + 1, "Task admitted");
        self.states.insert(id, TaskState::Running);
        self.running.insert(
            id,
            Running {
                cancel,
                handle,
                task,
            },
        );
    }

    fn on_worker_event(&mut self, event: TransferEvent) {
        if let Some(state) = event.terminal_state() {
            let id = event.id();
            if let Some(running) = self.running.remove(&id) {
                self.states.insert(id, state);
                if state == TaskState::Done && running.task.mode == TransferMode::Upload {
                    if let Some(cache) = &self.options.cache {
                        cache.invalidate_ancestors(&running.task.bucket, &running.task.key);
                    }
                }
            }
            self.emit(event);
            self.pump();
        } else {
            self.emit(event);
        }
    }

    fn cancel(&mut self, id: TaskId) {
        if let Some(running) = self.running.get(&id) {
            tracing::info!(%id, "Cancelling running task");
            running.cancel.store(true, Ordering::SeqCst);
            return;
        }

        let before = self.queue.len();
        let mut removed = None;
        self.queue.retain(|Queued(task)| {
            if task.id == id {
                removed = Some(task.clone());
                false
            } else {
                true
            }
        });
        if let Some(task) = removed {
            debug_assert_eq!(before, self.queue.len() + 1);
            tracing::info!(%id, "Cancelled queued task");
            self.states.insert(id, TaskState::Cancelled);
            self.emit(TransferEvent::Updated {
                id,
                mode: task.mode,
                bucket: task.bucket,
                key: task.key,
                percent: STATUS_ONLY,
                status: status::CANCELLED.to_string(),
            });
            self.emit(TransferEvent::Cancelled {
                id,
                reason: "Cancelled before start".into(),
            });
        }
    }

    fn clear_queue(&mut self) {
        let discarded = self.queue.len();
        for Queued(task) in self.queue.drain() {
            self.states.insert(task.id, TaskState::Cancelled);
        }
        if discarded > 0 {
            tracing::info!(discarded, "Queue cleared");
        }
    }

    async fn shutdown(&mut self, worker_events: &mut mpsc::UnboundedReceiver<TransferEvent>) {
        self.paused = true;
        self.clear_queue();

        let running: Vec<(TaskId, Running)> = self.running.drain().collect();
        for (_, task) in &running {
            task.cancel.store(true, Ordering::SeqCst);
        }

        let timeout = self.options.shutdown_timeout;
        for (id, task) in running {
            match tokio::time::timeout(timeout, task.handle).await {
                Ok(_) => tracing::debug!(%id, "Worker settled"),
                Err(_) => {
                    tracing::warn!(
                        %id,
                        key = %task.task.key,
                        ?timeout,
                        "Worker did not stop in time; detaching it"
                    );
                    self.states.insert(id, TaskState::Cancelled);
                }
            }
        }

        while let Ok(event) = worker_events.try_recv() {
            if let Some(state) = event.terminal_state() {
                self.states.insert(event.id(), state);
            }
            self.emit(event);
        }
        tracing::info!("Scheduler shut down");
    }

    fn emit(&self, event: TransferEvent) {
        if self.outward.send(event).is_err() {
            tracing::debug!("Event stream receiver dropped");
        }
    }
}
