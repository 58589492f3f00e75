//! Per-addon pipeline stages.
//!
//! Every stage opens a [`StepGuard`](crate::events::StepGuard) first, so its
//! `StepFinish` is emitted however the stage ends. Cancellation is checked before every
//! unit of work; a cancelled stage returns [`StageStatus::Stopped`].

use super::IndexError;
use crate::events::{ForwardingThread, Step};
use crate::header::ConfigParser;
use crate::metrics::IndexMetrics;
use crate::models::{AddonIndexingHandle, IndexerSettings};
use crate::services::cache::{EntryState, ReferenceCache};
use crate::services::partition::{SizedFile, bucket_size, measure_all, partition_by_size};
use crate::services::tools::{ArchiveTools, ToolOutcome};
use crate::services::worker_pool::WorkerPool;
use anyhow::Result;
use camino::{Utf8Path, Utf8PathBuf};
use std::fs;
use std::io;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Instant;
use walkdir::WalkDir;

const ARCHIVE_CONTAINER: &str = "addons";
const ARCHIVE_EXTENSION: &str = "pbo";
const BINARY_CONFIG_NAME: &str = "config.bin";
const TEXT_CONFIG_NAME: &str = "config.cpp";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StageStatus {
    Completed,
    /// The addon was cancelled or cannot continue; later stages are skipped
    Stopped,
}

/// Extraction directories created for one addon. Filled by extraction workers and read
/// by cleanup, whatever happened in between.
#[derive(Debug, Default)]
pub(crate) struct ExtractDirs {
    dirs: Mutex<Vec<Utf8PathBuf>>,
}

impl ExtractDirs {
    fn push(&self, dir: Utf8PathBuf) {
        self.lock().push(dir);
    }

    pub(crate) fn snapshot(&self) -> Vec<Utf8PathBuf> {
        self.lock().clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Utf8PathBuf>> {
        self.dirs
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Everything a stage needs for one addon.
pub(crate) struct AddonRun<'a> {
    pub handle: &'a Arc<AddonIndexingHandle>,
    pub forwarding: &'a ForwardingThread,
    pub tools: &'a dyn ArchiveTools,
    pub parser: &'a dyn ConfigParser,
    pub cache: &'a ReferenceCache,
    pub settings: &'a IndexerSettings,
    pub metrics: &'a IndexMetrics,
    pub pool: &'a WorkerPool,
}

impl AddonRun<'_> {
    fn name(&self) -> &str {
        self.handle.addon_name()
    }

    fn stop_if_cancelled(&self) -> StageStatus {
        if self.handle.is_cancelled() {
            StageStatus::Stopped
        } else {
            StageStatus::Completed
        }
    }

    /// Load the addon from a valid reference cache entry. Returns `false` if there is no
    /// usable entry and the full pipeline has to run.
    pub(crate) fn hydrate_from_cache(&self) -> bool {
        match self.cache.entry_state(self.name()) {
            EntryState::Missing => false,
            EntryState::Invalid => {
                self.forwarding.log(&format!(
                    "Reference cache for {} is marked invalid, indexing again",
                    self.name()
                ));
                false
            }
            EntryState::Valid => {
                let entry = self.cache.entry_dir(self.name());
                self.forwarding
                    .log(&format!("Loading {} from reference cache {}", self.name(), entry));
                self.metrics.record_cache_hit();
                self.handle.set_reference_directory(entry.clone());
                let configs = self.cache.config_files(&entry);
                self.parse_configs(&configs);
                true
            }
        }
    }

    /// Extract, de-binarize, parse and save. Stops early on cancellation or when the
    /// addon has no archive container.
    pub(crate) fn index_addon(
        &self,
        temp_root: &Utf8Path,
        extract_dirs: &ExtractDirs,
    ) -> Result<StageStatus> {
        if self.extract_pbos(temp_root, extract_dirs)? == StageStatus::Stopped {
            return Ok(StageStatus::Stopped);
        }

        let (status, configs) = self.debinarize_configs(extract_dirs)?;
        if status == StageStatus::Stopped {
            return Ok(status);
        }

        if self.parse_configs(&configs) == StageStatus::Stopped {
            return Ok(StageStatus::Stopped);
        }

        Ok(self.save_references(extract_dirs))
    }

    pub(crate) fn extract_pbos(
        &self,
        temp_root: &Utf8Path,
        extract_dirs: &ExtractDirs,
    ) -> Result<StageStatus> {
        let _step = self.forwarding.step_start(self.handle, Step::ExtractPbos);

        let Some(container) = find_archive_container(self.handle.addon_directory())? else {
            self.forwarding.warning(
                self.handle,
                format!(
                    "No '{}' directory in {}, skipping addon",
                    ARCHIVE_CONTAINER,
                    self.handle.addon_directory()
                ),
                None,
            );
            return Ok(StageStatus::Stopped);
        };

        let archives = list_archives(&container).map_err(|source| IndexError::ReadAddonDirectory {
            path: container.clone(),
            source,
        })?;
        self.forwarding.log(&format!(
            "{} PBO files found in {}",
            archives.len(),
            container
        ));
        self.forwarding.begin_work(self.handle, archives.len());

        let destination = temp_root.join(self.name());
        let buckets = partition_by_size(measure_all(&archives), self.pool.workers(), |f| f.size);
        let report = self.pool.run(buckets, |bucket: Vec<SizedFile>| {
            self.log_worker_block("Extracting PBOs", &bucket);
            for archive in bucket {
                if self.handle.is_cancelled() {
                    return;
                }
                let stem = archive.path.file_stem().unwrap_or(archive.path.as_str());
                let dest_dir = destination.join(stem);
                extract_dirs.push(dest_dir.clone());

                let start = Instant::now();
                let result =
                    self.tools
                        .extract_archive(&archive.path, &dest_dir, self.settings.extract_timeout());
                self.metrics.record_tool_time(start.elapsed());
                self.report_tool_result("extract", &archive.path, &dest_dir, result, |ok| {
                    self.metrics.record_extraction(ok)
                });
                self.forwarding.unit_done(self.handle);
            }
        })?;
        if !report.all_completed() {
            self.report_panics(&report.panicked);
        }

        Ok(self.stop_if_cancelled())
    }

    /// Convert every `config.bin` under the extraction directories. Returns the text
    /// configs to parse, including ones that were already text.
    pub(crate) fn debinarize_configs(
        &self,
        extract_dirs: &ExtractDirs,
    ) -> Result<(StageStatus, Vec<Utf8PathBuf>)> {
        let _step = self
            .forwarding
            .step_start(self.handle, Step::DebinarizeConfigs);

        let mut binaries = Vec::new();
        let mut texts = Vec::new();
        for dir in extract_dirs.snapshot() {
            if self.handle.is_cancelled() {
                return Ok((StageStatus::Stopped, Vec::new()));
            }
            let (found_binaries, found_texts) = find_configs(&dir);
            binaries.extend(found_binaries);
            texts.extend(found_texts);
        }
        for text in &texts {
            self.forwarding
                .log(&format!("Found text config {}, no conversion needed", text));
        }
        self.forwarding.begin_work(self.handle, binaries.len());

        let converted = Mutex::new(texts);
        let buckets = partition_by_size(measure_all(&binaries), self.pool.workers(), |f| f.size);
        let report = self.pool.run(buckets, |bucket: Vec<SizedFile>| {
            self.log_worker_block("De-binarizing configs", &bucket);
            for binary in bucket {
                if self.handle.is_cancelled() {
                    return;
                }
                let text = binary.path.with_file_name(TEXT_CONFIG_NAME);

                let start = Instant::now();
                let result =
                    self.tools
                        .convert_config(&binary.path, &text, self.settings.convert_timeout());
                self.metrics.record_tool_time(start.elapsed());
                let ok = self.report_tool_result("convert", &binary.path, &text, result, |ok| {
                    self.metrics.record_conversion(ok)
                });
                if ok {
                    converted
                        .lock()
                        .unwrap_or_else(|poisoned| poisoned.into_inner())
                        .push(text);
                }
                self.forwarding.unit_done(self.handle);
            }
        })?;
        if !report.all_completed() {
            self.report_panics(&report.panicked);
        }

        let mut configs = converted
            .into_inner()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        configs.sort();
        Ok((self.stop_if_cancelled(), configs))
    }

    /// Parse text configs on the current thread. Failures are reported and skipped.
    pub(crate) fn parse_configs(&self, configs: &[Utf8PathBuf]) -> StageStatus {
        let _step = self.forwarding.step_start(self.handle, Step::ParseConfigs);
        self.forwarding.begin_work(self.handle, configs.len());

        for config in configs {
            if self.handle.is_cancelled() {
                return StageStatus::Stopped;
            }
            let include_dir = config.parent().unwrap_or(config.as_path());
            match self.parser.parse(config, include_dir) {
                Ok(result) => {
                    self.metrics.record_parse(true);
                    self.handle.push_parse_result(result);
                    self.forwarding
                        .message(self.handle, format!("Parsed config {}", config));
                }
                Err(e) => {
                    self.metrics.record_parse(false);
                    self.forwarding.error(
                        Some(self.handle),
                        format!("Failed to parse config {}", config),
                        Some(format!("{:#}", anyhow::Error::new(e))),
                    );
                }
            }
            self.forwarding.unit_done(self.handle);
        }
        StageStatus::Completed
    }

    /// Copy scripts and headers into a fresh cache entry and mark it valid.
    pub(crate) fn save_references(&self, extract_dirs: &ExtractDirs) -> StageStatus {
        let _step = self
            .forwarding
            .step_start(self.handle, Step::SaveReferences);

        let entry = match self.cache.prepare_entry(self.name()) {
            Ok(entry) => entry,
            Err(e) => {
                self.forwarding.error(
                    Some(self.handle),
                    format!(
                        "Failed to create reference directory {}",
                        self.cache.entry_dir(self.name())
                    ),
                    Some(e.to_string()),
                );
                return StageStatus::Stopped;
            }
        };
        self.handle.set_reference_directory(entry.clone());

        let plan: Vec<_> = extract_dirs
            .snapshot()
            .into_iter()
            .filter_map(|dir| {
                let name = dir.file_name()?.to_string();
                let files = self.cache.reference_files(&dir);
                Some((name, files))
            })
            .collect();
        self.forwarding
            .begin_work(self.handle, plan.iter().map(|(_, files)| files.len()).sum());

        for (extract_dir_name, files) in &plan {
            for file in files {
                if self.handle.is_cancelled() {
                    return StageStatus::Stopped;
                }
                match self.cache.copy_reference_file(&entry, extract_dir_name, file) {
                    Ok(target) => {
                        self.metrics.record_copy(true);
                        self.forwarding.message(
                            self.handle,
                            format!("Copied {} to {}", file.source, target),
                        );
                    }
                    Err(e) => {
                        self.metrics.record_copy(false);
                        self.forwarding.error(
                            Some(self.handle),
                            format!("Couldn't copy {} into {}", file.source, entry),
                            Some(e.to_string()),
                        );
                    }
                }
                self.forwarding.unit_done(self.handle);
            }
        }

        if let Err(e) = self.cache.mark_valid(&entry) {
            self.forwarding.error(
                Some(self.handle),
                format!("Failed to mark reference directory {} as valid", entry),
                Some(e.to_string()),
            );
        }
        StageStatus::Completed
    }

    /// Delete the addon's extraction directories. Always runs, also after cancellation
    /// or a fatal error.
    pub(crate) fn cleanup(&self, temp_root: &Utf8Path, extract_dirs: &ExtractDirs) {
        let _step = self.forwarding.step_start(self.handle, Step::Cleanup);

        for dir in extract_dirs.snapshot() {
            match remove_dir_if_exists(&dir) {
                Ok(()) => self.forwarding.log(&format!("Deleted temp directory {}", dir)),
                Err(e) => self.forwarding.warning(
                    self.handle,
                    format!("Failed to delete temp directory {}", dir),
                    Some(e.to_string()),
                ),
            }
        }

        // Only succeeds once the extraction directories are gone
        let addon_temp = temp_root.join(self.name());
        if addon_temp.is_dir() {
            if let Err(e) = fs::remove_dir(&addon_temp) {
                tracing::debug!("Could not remove {}: {}", addon_temp, e);
            }
        }
    }

    /// Returns whether the tool succeeded.
    fn report_tool_result(
        &self,
        action: &str,
        input: &Utf8Path,
        output: &Utf8Path,
        result: Result<ToolOutcome, crate::services::tools::ToolError>,
        record: impl Fn(bool),
    ) -> bool {
        match result {
            Ok(ToolOutcome::Success) => {
                record(true);
                self.forwarding
                    .message(self.handle, format!("Finished {} of {} to {}", action, input, output));
                true
            }
            Ok(outcome) => {
                record(false);
                self.forwarding.error(
                    Some(self.handle),
                    format!("Couldn't {} {}", action, input),
                    Some(outcome.describe()),
                );
                false
            }
            Err(e) => {
                record(false);
                self.forwarding.error(
                    Some(self.handle),
                    format!("Couldn't {} {}", action, input),
                    Some(format!("{:#}", anyhow::Error::new(e))),
                );
                false
            }
        }
    }

    fn log_worker_block(&self, what: &str, bucket: &[SizedFile]) {
        let thread_name = thread::current().name().unwrap_or("unnamed").to_string();
        let mut block = format!(
            "{} on thread {} ({} bytes): [\n",
            what,
            thread_name,
            bucket_size(bucket)
        );
        for file in bucket {
            block.push_str(&format!("\t{}\n", file.path));
        }
        block.push(']');
        self.forwarding.log(&block);
    }

    fn report_panics(&self, panicked: &[String]) {
        for worker in panicked {
            self.forwarding.error(
                Some(self.handle),
                format!("Worker thread '{}' panicked while indexing {}", worker, self.name()),
                None,
            );
        }
    }
}

/// The child directory named `addons`, compared case-insensitively.
fn find_archive_container(addon_dir: &Utf8Path) -> Result<Option<Utf8PathBuf>, IndexError> {
    let entries = addon_dir
        .read_dir_utf8()
        .map_err(|source| IndexError::ReadAddonDirectory {
            path: addon_dir.to_path_buf(),
            source,
        })?;

    for entry in entries.filter_map(|e| e.ok()) {
        let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
        if is_dir && entry.file_name().eq_ignore_ascii_case(ARCHIVE_CONTAINER) {
            return Ok(Some(entry.into_path()));
        }
    }
    Ok(None)
}

fn list_archives(container: &Utf8Path) -> io::Result<Vec<Utf8PathBuf>> {
    let mut archives = Vec::new();
    for entry in container.read_dir_utf8()? {
        let entry = entry?;
        let path = entry.path();
        let is_archive = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case(ARCHIVE_EXTENSION));
        if is_archive && entry.file_type()?.is_file() {
            archives.push(entry.into_path());
        }
    }
    archives.sort();
    Ok(archives)
}

/// Binary configs to convert and text configs that can be used as they are. A text
/// config next to a binary one is left out; conversion overwrites it.
fn find_configs(dir: &Utf8Path) -> (Vec<Utf8PathBuf>, Vec<Utf8PathBuf>) {
    let mut binaries = Vec::new();
    let mut texts = Vec::new();

    for entry in WalkDir::new(dir).into_iter().filter_map(|e| e.ok()) {
        if !entry.file_type().is_file() {
            continue;
        }
        let Ok(path) = Utf8PathBuf::from_path_buf(entry.into_path()) else {
            continue;
        };
        let Some(name) = path.file_name() else {
            continue;
        };
        if name.eq_ignore_ascii_case(BINARY_CONFIG_NAME) {
            binaries.push(path);
        } else if name.eq_ignore_ascii_case(TEXT_CONFIG_NAME) {
            texts.push(path);
        }
    }

    texts.retain(|text| {
        !binaries
            .iter()
            .any(|binary| binary.parent() == text.parent())
    });
    binaries.sort();
    texts.sort();
    (binaries, texts)
}

fn remove_dir_if_exists(dir: &Utf8Path) -> io::Result<()> {
    match fs::remove_dir_all(dir) {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn utf8(dir: &TempDir) -> Utf8PathBuf {
        Utf8PathBuf::try_from(dir.path().to_path_buf()).unwrap()
    }

    #[test]
    fn test_archive_container_case_insensitive() {
        let dir = TempDir::new().unwrap();
        let root = utf8(&dir);
        fs::create_dir(root.join("Addons")).unwrap();

        let found = find_archive_container(&root).unwrap();
        assert_eq!(found, Some(root.join("Addons")));
    }

    #[test]
    fn test_missing_container_is_none() {
        let dir = TempDir::new().unwrap();
        let root = utf8(&dir);
        fs::write(root.join("addons"), "not a directory").unwrap();

        assert_eq!(find_archive_container(&root).unwrap(), None);
    }

    #[test]
    fn test_unreadable_addon_directory_is_error() {
        let err = find_archive_container(Utf8Path::new("/no/such/@Addon")).unwrap_err();
        assert!(matches!(err, IndexError::ReadAddonDirectory { .. }));
    }

    #[test]
    fn test_list_archives_filters_extension() {
        let dir = TempDir::new().unwrap();
        let root = utf8(&dir);
        fs::write(root.join("b.PBO"), "").unwrap();
        fs::write(root.join("a.pbo"), "").unwrap();
        fs::write(root.join("a.pbo.bisign"), "").unwrap();
        fs::create_dir(root.join("dir.pbo")).unwrap();

        let archives = list_archives(&root).unwrap();
        assert_eq!(archives, vec![root.join("a.pbo"), root.join("b.PBO")]);
    }

    #[test]
    fn test_find_configs_skips_text_next_to_binary() {
        let dir = TempDir::new().unwrap();
        let root = utf8(&dir);
        fs::create_dir_all(root.join("one")).unwrap();
        fs::create_dir_all(root.join("two")).unwrap();
        fs::write(root.join("one/config.bin"), "").unwrap();
        fs::write(root.join("one/config.cpp"), "").unwrap();
        fs::write(root.join("two/Config.cpp"), "").unwrap();

        let (binaries, texts) = find_configs(&root);
        assert_eq!(binaries, vec![root.join("one/config.bin")]);
        assert_eq!(texts, vec![root.join("two/Config.cpp")]);
    }

    #[test]
    fn test_remove_missing_dir_is_ok() {
        assert!(remove_dir_if_exists(Utf8Path::new("/no/such/extract/dir")).is_ok());
    }
}
