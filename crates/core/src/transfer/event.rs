//! Events emitted by the transfer engine

use std::path::PathBuf;

use serde::Serialize;

use super::task::{TaskId, TaskState, TransferMode};

/// Percent value meaning "show the status text only"
pub const STATUS_ONLY: i32 = -1;

/// Status strings shown for a task
pub mod status {
    use super::TransferMode;

    pub const QUEUED: &str = "Queued";
    pub const DONE: &str = "Done";
    pub const FAILED: &str = "Failed";
    pub const CANCELLED: &str = "Cancelled";

    pub fn starting(mode: TransferMode) -> &'static str {
        if mode.is_download() {
            "Starting download…"
        } else {
            "Starting upload…"
        }
    }

    /// e.g. `DOWNLOAD 42% (3.1 MiB/s)`
    pub fn transferring(mode: TransferMode, percent: i32, bytes_per_sec: u64) -> String {
        format!(
            "{} {percent}% ({}/s)",
            mode.label(),
            humansize::format_size(bytes_per_sec, humansize::BINARY)
        )
    }
}

/// One entry of the outward event stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TransferEvent {
    /// Progress or status change; `percent` is in `0..=100` or [`STATUS_ONLY`]
    Updated {
        id: TaskId,
        mode: TransferMode,
        bucket: String,
        key: String,
        percent: i32,
        status: String,
    },

    Completed {
        id: TaskId,
        local_path: PathBuf,
    },

    Failed {
        id: TaskId,
        message: String,
    },

    Cancelled {
        id: TaskId,
        reason: String,
    },
}

impl TransferEvent {
    pub fn id(&self) -> TaskId {
        match self {
            TransferEvent::Updated { id, .. }
            | TransferEvent::Completed { id, .. }
            | TransferEvent::Failed { id, .. }
            | TransferEvent::Cancelled { id, .. } => *id,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.terminal_state().is_some()
    }

    /// The state a terminal event leaves its task in
    pub fn terminal_state(&self) -> Option<TaskState> {
        match self {
            TransferEvent::Updated { .. } => None,
            TransferEvent::Completed { .. } => Some(TaskState::Done),
            TransferEvent::Failed { .. } => Some(TaskState::Failed),
            TransferEvent::Cancelled { .. } => Some(TaskState::Cancelled),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_text() {
        assert_eq!(status::starting(TransferMode::OpenView), "Starting download…");
        assert_eq!(status::starting(TransferMode::Upload), "Starting upload…");
        let text = status::transferring(TransferMode::Download, 42, 2048);
        assert!(text.starts_with("DOWNLOAD 42% ("));
        assert!(text.ends_with("/s)"));
    }

    #[test]
    fn test_terminal_classification() {
        let id = TaskId::new();
        let done = TransferEvent::Completed {
            id,
            local_path: PathBuf::from("/tmp/f"),
        };
        assert_eq!(done.terminal_state(), Some(TaskState::Done));
        assert_eq!(done.id(), id);

        let update = TransferEvent::Updated {
            id,
            mode: TransferMode::Upload,
            bucket: "b".into(),
            key: "k".into(),
            percent: STATUS_ONLY,
            status: status::QUEUED.into(),
        };
        assert!(!update.is_terminal());
    }
}
