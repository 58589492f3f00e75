use crate::header::ParseResult;
use camino::{Utf8Path, Utf8PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, OnceLock};

/// Live state of one addon while it is being indexed.
///
/// Shared as `Arc<AddonIndexingHandle>` between the pipeline and whoever observes the
/// run. Progress and the cancellation flag are atomics so they can be read and set
/// from any thread without locking.
#[derive(Debug)]
pub struct AddonIndexingHandle {
    addon_directory: Utf8PathBuf,
    addon_name: String,
    current_work_progress: AtomicU64,
    total_work_progress: AtomicU64,
    cancelled: AtomicBool,
    parse_results: Mutex<Vec<ParseResult>>,
    reference_directory: OnceLock<Utf8PathBuf>,
}

impl AddonIndexingHandle {
    /// `addon_directory` must end in the addon's `@`-prefixed directory name.
    pub fn new(addon_directory: impl Into<Utf8PathBuf>) -> Self {
        let addon_directory = addon_directory.into();
        let addon_name = addon_directory
            .file_name()
            .unwrap_or(addon_directory.as_str())
            .to_string();
        Self {
            addon_directory,
            addon_name,
            current_work_progress: AtomicU64::new(0f64.to_bits()),
            total_work_progress: AtomicU64::new(0f64.to_bits()),
            cancelled: AtomicBool::new(false),
            parse_results: Mutex::new(Vec::new()),
            reference_directory: OnceLock::new(),
        }
    }

    pub fn addon_directory(&self) -> &Utf8Path {
        &self.addon_directory
    }

    /// Directory name, including the leading `@`
    pub fn addon_name(&self) -> &str {
        &self.addon_name
    }

    /// Request cancellation. The pipeline stops at the next unit of work.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn current_work_progress(&self) -> f64 {
        f64::from_bits(self.current_work_progress.load(Ordering::Acquire))
    }

    pub fn total_work_progress(&self) -> f64 {
        f64::from_bits(self.total_work_progress.load(Ordering::Acquire))
    }

    pub(crate) fn set_current_work_progress(&self, progress: f64) {
        self.current_work_progress
            .store(progress.to_bits(), Ordering::Release);
    }

    pub(crate) fn set_total_work_progress(&self, progress: f64) {
        self.total_work_progress
            .store(progress.to_bits(), Ordering::Release);
    }

    /// Add `delta` to the current progress and return the new value.
    pub(crate) fn advance_current_work_progress(&self, delta: f64) -> f64 {
        let mut previous = self.current_work_progress.load(Ordering::Acquire);
        loop {
            let next = (f64::from_bits(previous) + delta).to_bits();
            match self.current_work_progress.compare_exchange_weak(
                previous,
                next,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return f64::from_bits(next),
                Err(actual) => previous = actual,
            }
        }
    }

    /// Fraction of the current stage completed, in `0.0..=1.0`
    pub fn progress_fraction(&self) -> f64 {
        let total = self.total_work_progress();
        if total <= 0.0 {
            0.0
        } else {
            (self.current_work_progress() / total).clamp(0.0, 1.0)
        }
    }

    pub(crate) fn push_parse_result(&self, result: ParseResult) {
        lock(&self.parse_results).push(result);
    }

    /// Take every parse result accumulated so far, leaving the handle empty.
    pub(crate) fn take_parse_results(&self) -> Vec<ParseResult> {
        std::mem::take(&mut *lock(&self.parse_results))
    }

    pub fn parse_result_count(&self) -> usize {
        lock(&self.parse_results).len()
    }

    /// Reference cache entry for this addon, once it is known
    pub fn reference_directory(&self) -> Option<&Utf8Path> {
        self.reference_directory.get().map(Utf8PathBuf::as_path)
    }

    /// Set the reference directory. Only the first call has an effect.
    pub(crate) fn set_reference_directory(&self, dir: Utf8PathBuf) {
        if self.reference_directory.set(dir).is_err() {
            tracing::debug!(
                "Reference directory for {} was already set",
                self.addon_name
            );
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
