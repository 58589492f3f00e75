//! Pipeline orchestrator.
//!
//! [`AddonIndexer::load_addons_async`] runs a whole indexing pass on one background
//! thread: discover addons, hydrate each from the reference cache or run the full
//! extract/convert/parse/save pipeline, clean up, and publish the resulting addon list
//! to the [`AddonRegistry`]. Progress is only observable through the callback and the
//! registry.

mod stages;

use crate::events::{ForwardingThread, IndexingCallback, IndexingData, RunLog};
use crate::header::ConfigParser;
use crate::metrics::IndexMetrics;
use crate::models::{Addon, AddonIndexingHandle, AddonsConfig, IndexerSettings};
use crate::services::cache::ReferenceCache;
use crate::services::tools::{ArchiveTools, ToolError};
use crate::services::worker_pool::WorkerPool;
use crate::state::AddonRegistry;
use anyhow::Result;
use camino::{Utf8Path, Utf8PathBuf};
use stages::{AddonRun, ExtractDirs};
use std::fs;
use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use thiserror::Error;

/// Base name of the extraction directory created under the reference root
pub const TEMP_DIR_NAME: &str = "_addonIndexerTemp";

pub const LOAD_THREAD_NAME: &str = "addon-indexer: load addons";

/// Conditions that abort a whole indexing run
#[derive(Error, Debug)]
pub enum IndexError {
    #[error("Reference directory {0} exists but is not a directory")]
    ReferenceRootNotDirectory(Utf8PathBuf),

    #[error("Failed to create reference directory {path}")]
    CreateReferenceRoot {
        path: Utf8PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to create temp directory {path}")]
    CreateTempRoot {
        path: Utf8PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to read addon directory {path}")]
    ReadAddonDirectory {
        path: Utf8PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Archive tools are not available")]
    ToolsUnavailable(#[from] ToolError),
}

/// Runs indexing passes and owns their collaborators.
///
/// Cheap to clone; clones share the registry and metrics.
#[derive(Clone)]
pub struct AddonIndexer {
    registry: AddonRegistry,
    tools: Arc<dyn ArchiveTools>,
    parser: Arc<dyn ConfigParser>,
    settings: IndexerSettings,
    metrics: Arc<IndexMetrics>,
}

impl AddonIndexer {
    pub fn new(
        registry: AddonRegistry,
        tools: Arc<dyn ArchiveTools>,
        parser: Arc<dyn ConfigParser>,
        settings: IndexerSettings,
    ) -> Self {
        Self {
            registry,
            tools,
            parser,
            settings,
            metrics: Arc::new(IndexMetrics::new()),
        }
    }

    /// The most recently published addons
    pub fn addons(&self) -> Arc<Vec<Arc<Addon>>> {
        self.registry.snapshot()
    }

    pub fn registry(&self) -> &AddonRegistry {
        &self.registry
    }

    pub fn metrics(&self) -> &IndexMetrics {
        &self.metrics
    }

    pub fn settings(&self) -> &IndexerSettings {
        &self.settings
    }

    /// Start an indexing pass on a new background thread and return immediately.
    ///
    /// `log_file`, if given, receives a plain-text log of the run. Events are delivered
    /// to `callback` on a separate forwarding thread. `FinishedIndex` is emitted once per
    /// run; only a failure to remove the temp root can be reported after it. Joining the
    /// returned handle waits for the whole run, including delivery of every event.
    pub fn load_addons_async(
        &self,
        config: AddonsConfig,
        log_file: Option<Utf8PathBuf>,
        callback: impl IndexingCallback + 'static,
    ) -> io::Result<JoinHandle<()>> {
        let indexer = self.clone();
        thread::Builder::new()
            .name(LOAD_THREAD_NAME.to_string())
            .spawn(move || indexer.run(config, log_file.as_deref(), callback))
    }

    fn run(
        &self,
        config: AddonsConfig,
        log_file: Option<&Utf8Path>,
        callback: impl IndexingCallback + 'static,
    ) {
        let forwarding = match ForwardingThread::start(callback, RunLog::open(log_file)) {
            Ok(forwarding) => forwarding,
            Err(e) => {
                tracing::error!("Failed to start forwarding thread: {}", e);
                return;
            }
        };
        forwarding.log("[BEGIN LOAD ADDONS]");

        match self.load_addons(&config, &forwarding) {
            Ok(addons) => self.registry.publish(addons),
            Err(e) => forwarding.error(
                None,
                "Couldn't complete indexing addons",
                Some(format!("{:#}", e)),
            ),
        }

        forwarding.finished_index();

        // Still present if the run failed before its own cleanup
        if let Some(temp_root) = forwarding.root_temp_directory() {
            if temp_root.exists() {
                if let Err(e) = fs::remove_dir_all(&temp_root) {
                    forwarding.error(
                        None,
                        format!("Failed to delete root temp directory {}", temp_root),
                        Some(e.to_string()),
                    );
                }
            }
        }

        self.metrics.log_summary();
        forwarding.log("[EXIT LOAD ADDONS]");
        forwarding.close();
    }

    fn load_addons(&self, config: &AddonsConfig, forwarding: &ForwardingThread) -> Result<Vec<Addon>> {
        let reference_root = config.reference_root();
        ensure_reference_root(&reference_root)?;
        self.tools.ensure_available().map_err(IndexError::from)?;

        let handles = discover_addons(config, forwarding);
        forwarding.started_index(IndexingData {
            config: config.clone(),
            addons: handles.clone(),
        });

        let temp_root = create_temp_root(&reference_root)?;
        forwarding.set_root_temp_directory(temp_root.clone());
        forwarding.log(&format!("Temp directory for addons extraction: {}", temp_root));

        let cache = ReferenceCache::new(reference_root);
        self.index_discovered(&handles, &cache, &temp_root, forwarding)?;

        match fs::remove_dir_all(&temp_root) {
            Ok(()) => forwarding.log(&format!("Deleted temp directory {}", temp_root)),
            Err(e) => tracing::warn!("Failed to delete temp directory {}: {}", temp_root, e),
        }

        let mut addons = Vec::with_capacity(handles.len());
        for handle in &handles {
            if handle.is_cancelled() {
                self.metrics.record_addon_cancelled();
                forwarding.log(&format!("Addon cancelled: {}", handle.addon_name()));
                continue;
            }
            self.metrics.record_addon_indexed();
            forwarding.log(&format!("Addon finished: {}", handle.addon_name()));
            addons.push(Addon::from_handle(handle));
        }
        Ok(addons)
    }

    /// Index each handle in order. Cancelled handles are skipped without events.
    fn index_discovered(
        &self,
        handles: &[Arc<AddonIndexingHandle>],
        cache: &ReferenceCache,
        temp_root: &Utf8Path,
        forwarding: &ForwardingThread,
    ) -> Result<()> {
        let pool = WorkerPool::new(self.settings.worker_threads, "addon-indexer worker");

        for handle in handles {
            if handle.is_cancelled() {
                continue;
            }

            forwarding.addon_started(handle);
            forwarding.log(&format!("INDEX STARTED for addon {}", handle.addon_name()));

            let run = AddonRun {
                handle,
                forwarding,
                tools: self.tools.as_ref(),
                parser: self.parser.as_ref(),
                cache,
                settings: &self.settings,
                metrics: &self.metrics,
                pool: &pool,
            };
            let extract_dirs = ExtractDirs::default();

            let result = if run.hydrate_from_cache() {
                Ok(())
            } else {
                run.index_addon(temp_root, &extract_dirs).map(|_| ())
            };
            run.cleanup(temp_root, &extract_dirs);
            result?;

            forwarding.addon_finished(handle);
            forwarding.log(&format!("INDEX FINISHED for addon {}", handle.addon_name()));
        }
        Ok(())
    }
}

fn ensure_reference_root(root: &Utf8Path) -> Result<(), IndexError> {
    if root.exists() {
        if !root.is_dir() {
            return Err(IndexError::ReferenceRootNotDirectory(root.to_path_buf()));
        }
        return Ok(());
    }
    fs::create_dir_all(root).map_err(|source| IndexError::CreateReferenceRoot {
        path: root.to_path_buf(),
        source,
    })
}

/// Create `<root>/_addonIndexerTemp`, appending `_` until the name is unused.
fn create_temp_root(reference_root: &Utf8Path) -> Result<Utf8PathBuf, IndexError> {
    let mut name = TEMP_DIR_NAME.to_string();
    while reference_root.join(&name).exists() {
        name.push('_');
    }
    let temp_root = reference_root.join(name);
    fs::create_dir(&temp_root).map_err(|source| IndexError::CreateTempRoot {
        path: temp_root.clone(),
        source,
    })?;
    Ok(temp_root)
}

/// `@`-prefixed directories of every existing root, deny-list first, then allow-list.
/// Sorted by name within a root; roots keep their configured order.
fn discover_addons(config: &AddonsConfig, forwarding: &ForwardingThread) -> Vec<Arc<AddonIndexingHandle>> {
    let mut handles = Vec::new();

    for root in &config.roots {
        let root = Utf8Path::new(root);
        if !root.is_dir() {
            tracing::debug!("Skipping addon root {}: not a directory", root);
            continue;
        }
        forwarding.log(&format!("Found addon root {}", root));

        let entries = match root.read_dir_utf8() {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!("Failed to list addon root {}: {}", root, e);
                continue;
            }
        };

        let mut found: Vec<Utf8PathBuf> = entries
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().map(|t| t.is_dir()).unwrap_or(false))
            .filter(|e| e.file_name().starts_with('@'))
            .filter(|e| {
                let name = e.file_name();
                if config.is_blacklisted(name) {
                    forwarding.log(&format!("Addon excluded (blacklisted): {}", name));
                    return false;
                }
                config.is_whitelisted(name)
            })
            .map(|e| e.into_path())
            .collect();
        found.sort();

        for dir in found {
            forwarding.log(&format!("Addon directory marked for indexing: {}", dir));
            handles.push(Arc::new(AddonIndexingHandle::new(dir)));
        }
    }
    handles
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{IndexingEvent, Step};
    use crate::header::{ParseError, ParseResult};
    use crate::services::tools::ToolOutcome;
    use std::sync::mpsc;
    use std::time::Duration;
    use tempfile::TempDir;

    struct NoTools;

    impl ArchiveTools for NoTools {
        fn extract_archive(&self, _: &Utf8Path, dest: &Utf8Path, _: Duration) -> Result<ToolOutcome, ToolError> {
            fs::create_dir_all(dest).unwrap();
            Ok(ToolOutcome::Success)
        }

        fn convert_config(&self, _: &Utf8Path, _: &Utf8Path, _: Duration) -> Result<ToolOutcome, ToolError> {
            Ok(ToolOutcome::Success)
        }
    }

    struct NoParser;

    impl ConfigParser for NoParser {
        fn parse(&self, file: &Utf8Path, _: &Utf8Path) -> Result<ParseResult, ParseError> {
            Err(ParseError::Syntax {
                path: file.to_path_buf(),
                line: 1,
                message: "unused".to_string(),
            })
        }
    }

    fn utf8(dir: &TempDir) -> Utf8PathBuf {
        Utf8PathBuf::try_from(dir.path().to_path_buf()).unwrap()
    }

    fn indexer() -> AddonIndexer {
        AddonIndexer::new(
            AddonRegistry::new(),
            Arc::new(NoTools),
            Arc::new(NoParser),
            IndexerSettings::default(),
        )
    }

    fn collecting_forwarder() -> (ForwardingThread, mpsc::Receiver<IndexingEvent>) {
        let (tx, rx) = mpsc::channel();
        let forwarding = ForwardingThread::start(
            move |event: IndexingEvent| {
                let _ = tx.send(event);
            },
            RunLog::disabled(),
        )
        .unwrap();
        (forwarding, rx)
    }

    #[test]
    fn test_temp_root_name_suffixed_until_unused() {
        let dir = TempDir::new().unwrap();
        let root = utf8(&dir);
        fs::create_dir(root.join(TEMP_DIR_NAME)).unwrap();
        fs::write(root.join(format!("{}_", TEMP_DIR_NAME)), "").unwrap();

        let temp = create_temp_root(&root).unwrap();
        assert_eq!(temp, root.join(format!("{}__", TEMP_DIR_NAME)));
        assert!(temp.is_dir());
    }

    #[test]
    fn test_reference_root_must_be_directory() {
        let dir = TempDir::new().unwrap();
        let file = utf8(&dir).join("ref");
        fs::write(&file, "").unwrap();

        assert!(matches!(
            ensure_reference_root(&file),
            Err(IndexError::ReferenceRootNotDirectory(_))
        ));
        ensure_reference_root(&utf8(&dir).join("nested/ref")).unwrap();
    }

    #[test]
    fn test_discovery_filters_and_sorts() {
        let dir = TempDir::new().unwrap();
        let root = utf8(&dir);
        for name in ["@Zeta", "@Alpha", "@Bad", "plain"] {
            fs::create_dir(root.join(name)).unwrap();
        }
        fs::write(root.join("@File"), "").unwrap();

        let mut config = AddonsConfig::new(root.join("ref").to_string());
        config.roots = vec![root.to_string(), root.join("missing").to_string()];
        config.blacklist = vec!["@Bad".to_string()];

        let (forwarding, _rx) = collecting_forwarder();
        let handles = discover_addons(&config, &forwarding);
        let names: Vec<&str> = handles.iter().map(|h| h.addon_name()).collect();
        assert_eq!(names, vec!["@Alpha", "@Zeta"]);

        config.whitelist = vec!["@Zeta".to_string()];
        let handles = discover_addons(&config, &forwarding);
        assert_eq!(handles.len(), 1);
        assert_eq!(handles[0].addon_name(), "@Zeta");
    }

    #[test]
    fn test_cancelled_before_start_emits_nothing() {
        let dir = TempDir::new().unwrap();
        let root = utf8(&dir);
        fs::create_dir_all(root.join("mods/@A/addons")).unwrap();
        fs::write(root.join("mods/@A/addons/main.pbo"), "pbo").unwrap();
        let temp_root = create_temp_root(&root).unwrap();

        let handle = Arc::new(AddonIndexingHandle::new(root.join("mods/@A")));
        handle.cancel();

        let indexer = indexer();
        let (forwarding, rx) = collecting_forwarder();
        let cache = ReferenceCache::new(root.join("ref"));
        indexer
            .index_discovered(&[Arc::clone(&handle)], &cache, &temp_root, &forwarding)
            .unwrap();
        forwarding.close();

        assert_eq!(rx.try_iter().count(), 0);
        assert!(!cache.entry_dir("@A").exists());
    }

    #[test]
    fn test_missing_container_skips_addon_with_paired_steps() {
        let dir = TempDir::new().unwrap();
        let root = utf8(&dir);
        fs::create_dir_all(root.join("mods/@NoAddons")).unwrap();
        let temp_root = create_temp_root(&root).unwrap();
        let handle = Arc::new(AddonIndexingHandle::new(root.join("mods/@NoAddons")));

        let indexer = indexer();
        let (forwarding, rx) = collecting_forwarder();
        let cache = ReferenceCache::new(root.join("ref"));
        indexer
            .index_discovered(&[handle], &cache, &temp_root, &forwarding)
            .unwrap();
        forwarding.close();

        let events: Vec<IndexingEvent> = rx.try_iter().collect();
        let steps: Vec<(bool, Step)> = events
            .iter()
            .filter_map(|e| match e {
                IndexingEvent::StepStart { step, .. } => Some((true, *step)),
                IndexingEvent::StepFinish { step, .. } => Some((false, *step)),
                _ => None,
            })
            .collect();
        assert_eq!(
            steps,
            vec![
                (true, Step::ExtractPbos),
                (false, Step::ExtractPbos),
                (true, Step::Cleanup),
                (false, Step::Cleanup),
            ]
        );
        assert!(events.iter().any(|e| matches!(e, IndexingEvent::Warning { .. })));
        assert!(matches!(events.last(), Some(IndexingEvent::AddonFinished(_))));
    }
}
