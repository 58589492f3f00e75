//! Services module - the building blocks of the indexing pipeline.
//!
//! - [`tools`]: the boundary to the external archive extractor and config converter,
//!   with a subprocess implementation ([`ArmaTools`]) that enforces timeouts
//! - [`partition`]: size-balanced splitting of files across workers
//! - [`worker_pool`]: short-lived named worker threads for one stage
//! - [`cache`]: the on-disk reference cache and its validity marker
//!
//! None of these know about events or addons; the
//! [`indexer`](crate::indexer) wires them together.

pub mod cache;
pub mod partition;
pub mod tools;
pub mod worker_pool;

pub use cache::{EntryState, ReferenceCache};
pub use partition::{SizedFile, bucket_size, partition_by_size};
pub use tools::{ArchiveTools, ArmaTools, ToolError, ToolOutcome};
pub use worker_pool::{PoolReport, WorkerPool};
