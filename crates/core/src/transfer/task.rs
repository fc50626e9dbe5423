//! Transfer task model

use std::cmp::Ordering;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque task identifier, assigned at enqueue time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(Uuid);

impl TaskId {
    pub(crate) fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What a task does
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferMode {
    Upload,
    Download,
    /// A download the caller wants to open as soon as it lands
    OpenView,
}

impl TransferMode {
    /// Scheduling tier; lower is admitted first
    pub const fn priority(self) -> u8 {
        match self {
            TransferMode::OpenView => 0,
            TransferMode::Download => 1,
            TransferMode::Upload => 2,
        }
    }

    /// Whether data flows from the store to the local filesystem
    pub const fn is_download(self) -> bool {
        !matches!(self, TransferMode::Upload)
    }

    /// Uppercase label used in status text
    pub const fn label(self) -> &'static str {
        match self {
            TransferMode::Upload => "UPLOAD",
            TransferMode::Download => "DOWNLOAD",
            TransferMode::OpenView => "OPEN",
        }
    }
}

impl fmt::Display for TransferMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Lifecycle of a task. Terminal states are final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Queued,
    Running,
    Done,
    Failed,
    Cancelled,
}

impl TaskState {
    pub const fn is_terminal(self) -> bool {
        matches!(self, TaskState::Done | TaskState::Failed | TaskState::Cancelled)
    }
}

/// One upload or download
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransferTask {
    pub id: TaskId,
    pub mode: TransferMode,
    /// Enqueue order; breaks ties within a priority class
    pub sequence: u64,
    pub bucket: String,
    pub key: String,
    /// Upload source or download destination
    pub local_path: PathBuf,
}

impl TransferTask {
    pub fn priority(&self) -> u8 {
        self.mode.priority()
    }
}

/// Heap entry ordering tasks so that `BinaryHeap::pop` yields the smallest
/// `(priority, sequence)`.
#[derive(Debug)]
pub(crate) struct Queued(pub TransferTask);

impl Queued {
    fn rank(&self) -> (u8, u64) {
        (self.0.priority(), self.0.sequence)
    }
}

impl PartialEq for Queued {
    fn eq(&self, other: &Self) -> bool {
        self.rank() == other.rank()
    }
}

impl Eq for Queued {}

impl PartialOrd for Queued {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Queued {
    fn cmp(&self, other: &Self) -> Ordering {
        other.rank().cmp(&self.rank())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BinaryHeap;

    fn task(mode: TransferMode, sequence: u64) -> TransferTask {
        TransferTask {
            id: TaskId::new(),
            mode,
            sequence,
            bucket: "b".into(),
            key: format!("k{sequence}"),
            local_path: PathBuf::from("/tmp/x"),
        }
    }

    #[test]
    fn test_priority_order() {
        assert!(TransferMode::OpenView.priority() < TransferMode::Download.priority());
        assert!(TransferMode::Download.priority() < TransferMode::Upload.priority());
        assert!(TransferMode::OpenView.is_download());
        assert!(!TransferMode::Upload.is_download());
    }

    #[test]
    fn test_heap_pops_by_priority_then_sequence() {
        let mut heap = BinaryHeap::new();
        heap.push(Queued(task(TransferMode::Upload, 0)));
        heap.push(Queued(task(TransferMode::Download, 1)));
        heap.push(Queued(task(TransferMode::Upload, 2)));
        heap.push(Queued(task(TransferMode::OpenView, 3)));
        heap.push(Queued(task(TransferMode::Download, 4)));

        let order: Vec<u64> = std::iter::from_fn(|| heap.pop().map(|q| q.0.sequence)).collect();
        assert_eq!(order, vec![3, 1, 4, 0, 2]);
    }

    #[test]
    fn test_terminal_states() {
        assert!(!TaskState::Queued.is_terminal());
        assert!(!TaskState::Running.is_terminal());
        assert!(TaskState::Done.is_terminal());
        assert!(TaskState::Cancelled.is_terminal());
    }
}
