//! Data models for the addon indexer.
//!
//! - [`AddonIndexingHandle`]: live, shared state of one addon during a run (progress,
//!   cancellation, accumulated parse results)
//! - [`Addon`]: the immutable result published to the
//!   [`AddonRegistry`](crate::state::AddonRegistry) when a run finishes
//! - [`AddonsConfig`] / [`IndexerSettings`]: YAML configuration loaded by
//!   [`ConfigManager`](crate::config::ConfigManager)

pub mod addon;
pub mod config;
pub mod handle;

pub use addon::Addon;
pub use config::{AddonsConfig, IndexerSettings, PROJECT_DIR_MACRO};
pub use handle::AddonIndexingHandle;
