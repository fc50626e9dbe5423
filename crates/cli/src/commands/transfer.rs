//! Drives a batch of transfers through the scheduler until every task ends
//!
//! Shared by `get`, `put` and `open`. Ctrl+C shuts the scheduler down,
//! which cancels running workers and discards whatever is still queued.

use std::collections::HashMap;
use std::path::PathBuf;

use serde::Serialize;

use loft_core::{TaskId, TransferEvent, TransferMode};

use super::session::Session;
use crate::exit_code::ExitCode;
use crate::output::{Formatter, TransferProgress};

/// One transfer to enqueue
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Job {
    pub mode: TransferMode,
    pub bucket: String,
    pub key: String,
    pub local_path: PathBuf,
}

impl Job {
    pub(crate) fn new(
        mode: TransferMode,
        bucket: impl Into<String>,
        key: impl Into<String>,
        local_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            mode,
            bucket: bucket.into(),
            key: key.into(),
            local_path: local_path.into(),
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct Finished {
    pub mode: TransferMode,
    pub bucket: String,
    pub key: String,
    pub local_path: PathBuf,
}

#[derive(Debug, Serialize)]
pub(crate) struct Unfinished {
    pub bucket: String,
    pub key: String,
    pub reason: String,
}

/// What happened to a batch
#[derive(Debug, Default, Serialize)]
pub(crate) struct TransferReport {
    pub completed: Vec<Finished>,
    pub failed: Vec<Unfinished>,
    pub cancelled: Vec<Unfinished>,
    pub interrupted: bool,
}

impl TransferReport {
    fn record(&mut self, job: Job, event: &TransferEvent) {
        match event {
            TransferEvent::Completed { local_path, .. } => self.completed.push(Finished {
                mode: job.mode,
                bucket: job.bucket,
                key: job.key,
                local_path: local_path.clone(),
            }),
            TransferEvent::Failed { message, .. } => self.failed.push(Unfinished {
                bucket: job.bucket,
                key: job.key,
                reason: message.clone(),
            }),
            TransferEvent::Cancelled { reason, .. } => self.cancelled.push(Unfinished {
                bucket: job.bucket,
                key: job.key,
                reason: reason.clone(),
            }),
            TransferEvent::Updated { .. } => {}
        }
    }

    /// Exit code for the batch as a whole
    pub(crate) fn exit_code(&self) -> ExitCode {
        if self.interrupted {
            ExitCode::Interrupted
        } else if self.failed.is_empty() {
            ExitCode::Success
        } else if self.completed.is_empty() {
            ExitCode::GeneralError
        } else {
            ExitCode::PartialFailure
        }
    }
}

/// Run `jobs` to completion and report each failure
pub(crate) async fn run(
    session: &Session,
    jobs: Vec<Job>,
    parallel: Option<usize>,
    formatter: &Formatter,
) -> TransferReport {
    let mut report = TransferReport::default();
    if jobs.is_empty() {
        return report;
    }

    let (scheduler, mut events) = session.spawn_scheduler(parallel);
    let mut progress = TransferProgress::new(formatter.config());
    let mut pending: HashMap<TaskId, Job> = HashMap::with_capacity(jobs.len());

    for job in jobs {
        match scheduler.enqueue(job.mode, &job.bucket, &job.key, &job.local_path) {
            Ok(id) => {
                pending.insert(id, job);
            }
            Err(e) => {
                report.failed.push(Unfinished {
                    bucket: job.bucket,
                    key: job.key,
                    reason: e.to_string(),
                });
            }
        }
    }

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut signal_armed = true;

    while !pending.is_empty() {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else { break };
                settle(&mut report, &mut pending, &mut progress, event);
            }
            signal = &mut ctrl_c, if signal_armed => {
                if let Err(e) = signal {
                    tracing::warn!("Cannot listen for Ctrl+C: {e}");
                    signal_armed = false;
                    continue;
                }
                tracing::info!(pending = pending.len(), "Interrupted, shutting down transfers");
                report.interrupted = true;
                if let Err(e) = scheduler.shutdown().await {
                    tracing::warn!("Scheduler shutdown failed: {e}");
                }
                while let Some(event) = events.recv().await {
                    settle(&mut report, &mut pending, &mut progress, event);
                }
                break;
            }
        }
    }

    if !report.interrupted {
        if let Err(e) = scheduler.shutdown().await {
            tracing::debug!("Scheduler already stopped: {e}");
        }
    }

    // Queued tasks discarded by shutdown never send a terminal event
    for (_, job) in pending.drain() {
        report.cancelled.push(Unfinished {
            bucket: job.bucket,
            key: job.key,
            reason: "Discarded at shutdown".into(),
        });
    }

    for failure in &report.failed {
        formatter.error(&format!(
            "{}/{}: {}",
            failure.bucket, failure.key, failure.reason
        ));
    }

    report
}

fn settle(
    report: &mut TransferReport,
    pending: &mut HashMap<TaskId, Job>,
    progress: &mut TransferProgress,
    event: TransferEvent,
) {
    progress.apply(&event);
    if event.is_terminal() {
        if let Some(job) = pending.remove(&event.id()) {
            report.record(job, &event);
        }
    }
}

/// Print the usual summary for a finished batch
pub(crate) fn summarize(report: &TransferReport, verb: &str, formatter: &Formatter) -> ExitCode {
    if formatter.is_json() {
        formatter.json(report);
    } else if report.interrupted {
        formatter.warning(&format!(
            "Interrupted: {} {verb}, {} cancelled",
            report.completed.len(),
            report.cancelled.len()
        ));
    } else if report.failed.is_empty() {
        formatter.success(&format!("{verb} {} file(s).", report.completed.len()));
    } else {
        formatter.warning(&format!(
            "Completed with errors: {} succeeded, {} failed",
            report.completed.len(),
            report.failed.len()
        ));
    }
    report.exit_code()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn finished() -> Finished {
        Finished {
            mode: TransferMode::Download,
            bucket: "b".into(),
            key: "k".into(),
            local_path: PathBuf::from("/tmp/k"),
        }
    }

    fn unfinished() -> Unfinished {
        Unfinished {
            bucket: "b".into(),
            key: "k".into(),
            reason: "boom".into(),
        }
    }

    #[test]
    fn test_exit_code_success() {
        let report = TransferReport {
            completed: vec![finished()],
            ..Default::default()
        };
        assert_eq!(report.exit_code(), ExitCode::Success);
    }

    #[test]
    fn test_exit_code_partial() {
        let report = TransferReport {
            completed: vec![finished()],
            failed: vec![unfinished()],
            ..Default::default()
        };
        assert_eq!(report.exit_code(), ExitCode::PartialFailure);
    }

    #[test]
    fn test_exit_code_all_failed() {
        let report = TransferReport {
            failed: vec![unfinished()],
            ..Default::default()
        };
        assert_eq!(report.exit_code(), ExitCode::GeneralError);
    }

    #[test]
    fn test_exit_code_interrupted_wins() {
        let report = TransferReport {
            failed: vec![unfinished()],
            interrupted: true,
            ..Default::default()
        };
        assert_eq!(report.exit_code(), ExitCode::Interrupted);
    }

    #[test]
    fn test_record_routes_terminal_events() {
        let mut report = TransferReport::default();
        let job = Job::new(TransferMode::Upload, "b", "k", "/tmp/k");
        let id: TaskId =
            serde_json::from_str("\"67e55044-10b1-426f-9247-bb680e5fe0c8\"").expect("uuid");
        report.record(
            job.clone(),
            &TransferEvent::Failed {
                id,
                message: "gone".into(),
            },
        );
        report.record(
            job,
            &TransferEvent::Cancelled {
                id,
                reason: "stop".into(),
            },
        );
        assert_eq!(report.failed[0].reason, "gone");
        assert_eq!(report.cancelled[0].reason, "stop");
        assert!(report.completed.is_empty());
    }
}
