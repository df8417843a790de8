//! # companion-core
//!
//! Core abstractions for the Companion Memory backend.
//!
//! This crate provides the foundational types and traits shared by the job
//! queue and its binaries:
//!
//! - **Identifiers**: Strongly-typed, time-ordered job IDs
//! - **Storage**: A conditional-write item store over object storage
//! - **Singleton lock**: Lease-based leader election for cron planners
//! - **Clock**: Injectable time source for deterministic tests
//! - **Error types**: Shared error definitions and result types
//!
//! ## Crate Boundary
//!
//! `companion-core` is the only crate allowed to define shared primitives.
//! Everything the queue persists goes through [`storage::StorageBackend`],
//! and every piece of distributed coordination is a conditional write.

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod clock;
pub mod error;
pub mod id;
pub mod lock;
pub mod observability;
pub mod storage;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{Error, Result};
pub use id::JobId;
pub use lock::{InstanceInfo, LeaseInfo, RefreshOutcome, SingletonLock};
pub use observability::{LogFormat, init_logging};
pub use storage::{
    ItemMeta, MemoryBackend, ObjectStoreBackend, StorageBackend, WritePrecondition, WriteResult,
};
