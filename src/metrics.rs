// Indexing metrics
//
// Lock-free counters updated from worker threads and summarized at the end of a run

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

/// Counters for one indexer instance.
///
/// Shared between the orchestrator and the stage workers; every field is atomic so
/// recording never blocks a worker.
#[derive(Debug)]
pub struct IndexMetrics {
    pub archives_extracted: AtomicUsize,
    pub archives_failed: AtomicUsize,

    pub configs_converted: AtomicUsize,
    pub configs_failed: AtomicUsize,

    pub configs_parsed: AtomicUsize,
    pub parse_failures: AtomicUsize,

    pub files_copied: AtomicUsize,
    pub copy_failures: AtomicUsize,

    /// Addons loaded straight from a valid reference cache entry
    pub cache_hits: AtomicUsize,

    pub addons_indexed: AtomicUsize,
    pub addons_cancelled: AtomicUsize,

    /// Wall time spent inside external tools, in milliseconds
    pub total_tool_time_ms: AtomicU64,

    start_time: Instant,
}

impl IndexMetrics {
    pub fn new() -> Self {
        Self {
            archives_extracted: AtomicUsize::new(0),
            archives_failed: AtomicUsize::new(0),
            configs_converted: AtomicUsize::new(0),
            configs_failed: AtomicUsize::new(0),
            configs_parsed: AtomicUsize::new(0),
            parse_failures: AtomicUsize::new(0),
            files_copied: AtomicUsize::new(0),
            copy_failures: AtomicUsize::new(0),
            cache_hits: AtomicUsize::new(0),
            addons_indexed: AtomicUsize::new(0),
            addons_cancelled: AtomicUsize::new(0),
            total_tool_time_ms: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    pub fn record_extraction(&self, success: bool) {
        bump(if success { &self.archives_extracted } else { &self.archives_failed });
    }

    pub fn record_conversion(&self, success: bool) {
        bump(if success { &self.configs_converted } else { &self.configs_failed });
    }

    pub fn record_parse(&self, success: bool) {
        bump(if success { &self.configs_parsed } else { &self.parse_failures });
    }

    pub fn record_copy(&self, success: bool) {
        bump(if success { &self.files_copied } else { &self.copy_failures });
    }

    pub fn record_cache_hit(&self) {
        bump(&self.cache_hits);
    }

    pub fn record_addon_indexed(&self) {
        bump(&self.addons_indexed);
    }

    pub fn record_addon_cancelled(&self) {
        bump(&self.addons_cancelled);
    }

    pub fn record_tool_time(&self, duration: Duration) {
        self.total_tool_time_ms
            .fetch_add(duration.as_millis() as u64, Ordering::Relaxed);
    }

    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Average time per tool invocation in milliseconds
    pub fn avg_tool_time_ms(&self) -> f64 {
        let total = self.total_tool_time_ms.load(Ordering::Relaxed);
        let count = self.tool_invocations();
        if count > 0 {
            total as f64 / count as f64
        } else {
            0.0
        }
    }

    pub fn tool_invocations(&self) -> usize {
        load(&self.archives_extracted)
            + load(&self.archives_failed)
            + load(&self.configs_converted)
            + load(&self.configs_failed)
    }

    pub fn log_summary(&self) {
        tracing::info!("=== Indexing Metrics Summary ===");
        tracing::info!("Uptime: {:.2}s", self.uptime().as_secs_f64());
        tracing::info!(
            "Addons: {} indexed ({} from cache), {} cancelled",
            load(&self.addons_indexed),
            load(&self.cache_hits),
            load(&self.addons_cancelled)
        );
        tracing::info!(
            "Archives: {} extracted, {} failed; configs: {} converted, {} failed",
            load(&self.archives_extracted),
            load(&self.archives_failed),
            load(&self.configs_converted),
            load(&self.configs_failed)
        );
        tracing::info!(
            "Parsed: {} ok, {} failed; copied: {} ok, {} failed",
            load(&self.configs_parsed),
            load(&self.parse_failures),
            load(&self.files_copied),
            load(&self.copy_failures)
        );
        tracing::info!(
            "Total tool time: {:.2}s (avg: {:.2}ms per invocation)",
            self.total_tool_time_ms.load(Ordering::Relaxed) as f64 / 1000.0,
            self.avg_tool_time_ms()
        );
    }
}

impl Default for IndexMetrics {
    fn default() -> Self {
        Self::new()
    }
}

fn bump(counter: &AtomicUsize) {
    counter.fetch_add(1, Ordering::Relaxed);
}

fn load(counter: &AtomicUsize) -> usize {
    counter.load(Ordering::Relaxed)
}
