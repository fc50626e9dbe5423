//! loft-core: Core library for the loft object store client
//!
//! This crate provides the core functionality for loft, including:
//! - Configuration and credential profiles
//! - Path parsing and prefix arithmetic
//! - ObjectStore trait for S3-compatible operations
//! - Gateway with retry, pagination and batched deletes
//! - Folder operations over the flat key space
//! - Background transfer scheduling
//!
//! This crate is designed to be independent of any specific S3 SDK,
//! allowing for easy testing and potential future support for other backends.

pub mod cache;
pub mod config;
pub mod error;
pub mod folder;
pub mod gateway;
pub mod memory;
pub mod path;
pub mod profile;
pub mod traits;
pub mod transfer;

pub use cache::ListingCache;
pub use config::{Config, ConfigManager, RetryConfig, TransferConfig};
pub use error::{BatchFailure, Error, Result};
pub use folder::{FileRenameOutcome, FolderOps, FolderOutcome};
pub use gateway::Gateway;
pub use memory::MemoryStore;
pub use path::{parse_path, parse_remote, ParsedPath, RemotePath};
pub use profile::{Profile, ProfileManager};
pub use traits::{
    progress_fn, BucketInfo, ListOptions, ListPage, NoProgress, ObjectInfo, ObjectListing,
    ObjectStore, Progress, ProgressCallback,
};
pub use transfer::{
    EventStream, SchedulerOptions, SchedulerStats, TaskId, TaskState, TransferEvent,
    TransferMode, TransferScheduler,
};
