// addon-indexer - indexes game addons into a cached, parsed reference tree
//
// This is the library crate with the indexing pipeline and its collaborators.
// The binary crate (main.rs) provides the command-line entry point.

pub mod config;
pub mod events;
pub mod header;
pub mod indexer;
pub mod logging;
pub mod metrics;
pub mod models;
pub mod services;
pub mod state;

// Re-export commonly used types for convenience
pub use config::ConfigManager;
pub use events::{IndexingCallback, IndexingData, IndexingEvent, Step};
pub use header::{ConfigParser, HeaderFile, HeaderParser, ParseError, ParseResult};
pub use indexer::{AddonIndexer, IndexError};
pub use models::{Addon, AddonIndexingHandle, AddonsConfig, IndexerSettings};
pub use services::{ArchiveTools, ArmaTools, ToolError, ToolOutcome};
pub use state::{AddonRegistry, RegistryChange};

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");
