//! Background transfer engine
//!
//! [`TransferScheduler`] queues uploads and downloads by priority and runs a
//! bounded number of [`TransferWorker`]s at once. Progress and outcomes
//! arrive on a single [`EventStream`].

pub mod event;
pub mod scheduler;
pub mod task;
pub mod worker;

pub use event::{status, TransferEvent, STATUS_ONLY};
pub use scheduler::{EventStream, SchedulerOptions, SchedulerStats, TransferScheduler};
pub use task::{TaskId, TaskState, TransferMode, TransferTask};
pub use worker::{CancelFlag, TransferWorker};
