//! Executes one transfer task
//!
//! `Starting -> Transferring -> {Completed | Failed | Cancelled}`. The worker
//! only emits events; it never touches scheduler state.

use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::mpsc;

use super::event::{status, TransferEvent, STATUS_ONLY};
use super::task::{TaskState, TransferTask};
use crate::error::{Error, Result};
use crate::gateway::Gateway;
use crate::traits::{Progress, ProgressCallback};

/// Cooperative cancellation flag shared between the scheduler and a worker
pub type CancelFlag = Arc<AtomicBool>;

/// Runs a single upload or download
pub struct TransferWorker {
    gateway: Gateway,
    task: TransferTask,
    cancel: CancelFlag,
    events: mpsc::UnboundedSender<TransferEvent>,
    progress_interval: Duration,
    last_percent: Arc<AtomicI32>,
}

impl TransferWorker {
    pub fn new(
        gateway: Gateway,
        task: TransferTask,
        cancel: CancelFlag,
        events: mpsc::UnboundedSender<TransferEvent>,
        progress_interval: Duration,
    ) -> Self {
        Self {
            gateway,
            task,
            cancel,
            events,
            progress_interval,
            last_percent: Arc::new(AtomicI32::new(0)),
        }
    }

    /// Run the transfer to a terminal state, emitting exactly one terminal event
    pub async fn run(self) -> TaskState {
        tracing::info!(
            id = %self.task.id,
            mode = %self.task.mode,
            bucket = %self.task.bucket,
            key = %self.task.key,
            "Transfer started"
        );
        let result = self.execute().await;
        let cancelled = self.cancel.load(Ordering::SeqCst);

        match result {
            Ok(bytes) => {
                tracing::info!(id = %self.task.id, bytes, "Transfer completed");
                self.update(100, status::DONE.to_string());
                self.send(TransferEvent::Completed {
                    id: self.task.id,
                    local_path: self.task.local_path.clone(),
                });
                TaskState::Done
            }
            Err(e) if cancelled || matches!(e, Error::Cancelled) => {
                tracing::info!(id = %self.task.id, "Transfer cancelled");
                if self.task.mode.is_download() {
                    self.remove_partial().await;
                }
                self.update(STATUS_ONLY, status::CANCELLED.to_string());
                self.send(TransferEvent::Cancelled {
                    id: self.task.id,
                    reason: Error::Cancelled.to_string(),
                });
                TaskState::Cancelled
            }
            Err(e) => {
                tracing::warn!(id = %self.task.id, key = %self.task.key, "Transfer failed: {e}");
                self.update(STATUS_ONLY, status::FAILED.to_string());
                self.send(TransferEvent::Failed {
                    id: self.task.id,
                    message: e.to_string(),
                });
                TaskState::Failed
            }
        }
    }

    async fn execute(&self) -> Result<u64> {
        let task = &self.task;
        self.update(0, status::starting(task.mode).to_string());

        let total = if task.mode.is_download() {
            if let Some(parent) = task.local_path.parent() {
                if !parent.as_os_str().is_empty() {
                    tokio::fs::create_dir_all(parent).await?;
                }
            }
            self.gateway.object_size(&task.bucket, &task.key).await?
        } else {
            match tokio::fs::metadata(&task.local_path).await {
                Ok(meta) if meta.is_file() => meta.len(),
                _ => {
                    return Err(Error::SourceMissing(
                        task.local_path.display().to_string(),
                    ));
                }
            }
        };

        if self.cancel.load(Ordering::SeqCst) {
            return Err(Error::Cancelled);
        }

        let progress = self.progress_callback(total);
        let bytes = if task.mode.is_download() {
            self.gateway
                .get_stream(&task.bucket, &task.key, &task.local_path, progress)
                .await?
        } else {
            self.gateway
                .put_stream(&task.bucket, &task.key, &task.local_path, progress)
                .await?
        };

        if task.mode.is_download() && !tokio::fs::try_exists(&task.local_path).await.unwrap_or(false)
        {
            return Err(Error::VerificationFailed(
                task.local_path.display().to_string(),
            ));
        }
        Ok(bytes)
    }

    fn progress_callback(&self, total: u64) -> Progress {
        Arc::new(WorkerProgress {
            cancel: self.cancel.clone(),
            events: self.events.clone(),
            last_percent: self.last_percent.clone(),
            task: self.task.clone(),
            total,
            interval: self.progress_interval,
            started: Instant::now(),
            last_emit: Mutex::new(None),
        })
    }

    async fn remove_partial(&self) {
        match tokio::fs::remove_file(&self.task.local_path).await {
            Ok(()) => {
                tracing::debug!(path = %self.task.local_path.display(), "Removed partial download");
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(
                    path = %self.task.local_path.display(),
                    "Could not remove partial download: {e}"
                );
            }
        }
    }

    fn update(&self, percent: i32, status: String) {
        let percent = if percent == STATUS_ONLY {
            STATUS_ONLY
        } else {
            let previous = self.last_percent.fetch_max(percent, Ordering::SeqCst);
            percent.max(previous)
        };
        self.send(TransferEvent::Updated {
            id: self.task.id,
            mode: self.task.mode,
            bucket: self.task.bucket.clone(),
            key: self.task.key.clone(),
            percent,
            status,
        });
    }

    fn send(&self, event: TransferEvent) {
        if self.events.send(event).is_err() {
            tracing::debug!(id = %self.task.id, "Event receiver gone");
        }
    }
}

/// Computes percent and rate, emits at most one update per interval and
/// reports the cancel flag back to the store.
struct WorkerProgress {
    cancel: CancelFlag,
    events: mpsc::UnboundedSender<TransferEvent>,
    last_percent: Arc<AtomicI32>,
    task: TransferTask,
    total: u64,
    interval: Duration,
    started: Instant,
    last_emit: Mutex<Option<Instant>>,
}

impl ProgressCallback for WorkerProgress {
    fn on_progress(&self, bytes: u64) -> bool {
        if self.is_cancelled() {
            return false;
        }

        let now = Instant::now();
        {
            let mut last = self.last_emit.lock().unwrap_or_else(|e| e.into_inner());
            if last.is_some_and(|at| now.duration_since(at) < self.interval) {
                return true;
            }
            *last = Some(now);
        }

        let percent = percent_of(bytes, self.total);
        let previous = self.last_percent.fetch_max(percent, Ordering::SeqCst);
        let percent = percent.max(previous);
        let elapsed = now.duration_since(self.started).as_secs_f64();
        let rate = if elapsed > 0.0 {
            (bytes as f64 / elapsed) as u64
        } else {
            0
        };

        let task = &self.task;
        let _ = self.events.send(TransferEvent::Updated {
            id: task.id,
            mode: task.mode,
            bucket: task.bucket.clone(),
            key: task.key.clone(),
            percent,
            status: status::transferring(task.mode, percent, rate),
        });
        true
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }
}

/// `floor(bytes / total * 100)` clamped to `0..=100`; an empty object is complete
fn percent_of(bytes: u64, total: u64) -> i32 {
    if total == 0 {
        return 100;
    }
    ((u128::from(bytes) * 100 / u128::from(total)).min(100)) as i32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use crate::transfer::task::{TaskId, TransferMode};
    use std::path::PathBuf;

    fn task(mode: TransferMode, key: &str, local_path: PathBuf) -> TransferTask {
        TransferTask {
            id: TaskId::new(),
            mode,
            sequence: 0,
            bucket: "b".into(),
            key: key.into(),
            local_path,
        }
    }

    async fn run(
        store: Arc<MemoryStore>,
        task: TransferTask,
        cancel: CancelFlag,
    ) -> (TaskState, Vec<TransferEvent>) {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let worker = TransferWorker::new(
            Gateway::new(store),
            task,
            cancel,
            tx,
            Duration::from_millis(1),
        );
        let state = worker.run().await;
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        (state, events)
    }

    #[test]
    fn test_percent_of() {
        assert_eq!(percent_of(0, 200), 0);
        assert_eq!(percent_of(199, 200), 99);
        assert_eq!(percent_of(200, 200), 100);
        assert_eq!(percent_of(500, 200), 100);
        assert_eq!(percent_of(0, 0), 100);
    }

    #[tokio::test]
    async fn test_download_creates_directories() {
        let store = Arc::new(MemoryStore::new());
        store.insert("b", "docs/report.pdf", vec![1u8; 300]);
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("nested/deeper/report.pdf");

        let (state, events) = run(
            store,
            task(TransferMode::Download, "docs/report.pdf", dest.clone()),
            CancelFlag::default(),
        )
        .await;

        assert_eq!(state, TaskState::Done);
        assert_eq!(std::fs::read(&dest).unwrap().len(), 300);
        assert!(matches!(events.last(), Some(TransferEvent::Completed { .. })));
        assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);
    }

    #[tokio::test]
    async fn test_upload_of_missing_source_never_contacts_store() {
        let store = Arc::new(MemoryStore::new());
        store.create_bucket("b");
        let dir = tempfile::tempdir().unwrap();

        let (state, events) = run(
            store.clone(),
            task(TransferMode::Upload, "k", dir.path().join("absent.bin")),
            CancelFlag::default(),
        )
        .await;

        assert_eq!(state, TaskState::Failed);
        let Some(TransferEvent::Failed { message, .. }) = events.last() else {
            panic!("expected a failure event, got {events:?}");
        };
        assert!(message.contains("absent.bin"));
        assert!(store.transfer_starts().is_empty());
        assert!(!store.contains("b", "k"));
    }

    #[tokio::test]
    async fn test_missing_object_fails_download() {
        let store = Arc::new(MemoryStore::new());
        store.create_bucket("b");
        let dir = tempfile::tempdir().unwrap();

        let (state, events) = run(
            store,
            task(TransferMode::Download, "ghost", dir.path().join("ghost")),
            CancelFlag::default(),
        )
        .await;
        assert_eq!(state, TaskState::Failed);
        assert!(matches!(events.last(), Some(TransferEvent::Failed { .. })));
    }

    #[tokio::test]
    async fn test_pre_cancelled_download_is_cancelled() {
        let store = Arc::new(MemoryStore::new());
        store.insert("b", "k", vec![0u8; 64]);
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("k");

        let cancel = CancelFlag::default();
        cancel.store(true, Ordering::SeqCst);
        let (state, events) = run(store, task(TransferMode::Download, "k", dest.clone()), cancel).await;

        assert_eq!(state, TaskState::Cancelled);
        assert!(matches!(events.last(), Some(TransferEvent::Cancelled { .. })));
        assert!(!dest.exists());
    }

    #[test]
    fn test_throttled_progress_still_sees_cancel() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let worker = TransferWorker::new(
            Gateway::new(Arc::new(MemoryStore::new())),
            task(TransferMode::Download, "k", PathBuf::from("/tmp/k")),
            CancelFlag::default(),
            tx,
            Duration::from_secs(60),
        );
        let progress = crate::gateway::throttle(worker.progress_callback(100), Duration::from_secs(60));

        assert!(progress.on_progress(10));
        assert!(progress.on_progress(20));
        worker.cancel.store(true, Ordering::SeqCst);
        assert!(!progress.on_progress(30));
    }

    #[tokio::test]
    async fn test_upload_reports_monotonic_progress() {
        let store = Arc::new(MemoryStore::new().with_pacing(10, Duration::from_millis(2)));
        store.create_bucket("b");
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("up.bin");
        std::fs::write(&source, vec![9u8; 200]).unwrap();

        let (state, events) = run(
            store.clone(),
            task(TransferMode::Upload, "up.bin", source),
            CancelFlag::default(),
        )
        .await;

        assert_eq!(state, TaskState::Done);
        assert_eq!(store.data("b", "up.bin").unwrap().len(), 200);
        let percents: Vec<i32> = events
            .iter()
            .filter_map(|e| match e {
                TransferEvent::Updated { percent, .. } if *percent >= 0 => Some(*percent),
                _ => None,
            })
            .collect();
        assert!(percents.windows(2).all(|w| w[0] <= w[1]), "{percents:?}");
        assert_eq!(percents.last(), Some(&100));
    }
}
