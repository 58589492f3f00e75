//! Fixed-size pool of short-lived worker threads.
//!
//! Each call to [`WorkerPool::run`] spawns one named thread per non-empty bucket, runs
//! the supplied closure over that bucket's items on it, and joins every thread before
//! returning. Threads are scoped, so the closure may borrow from the caller's stack
//! (handles, shared output lists, the forwarding channel).

use anyhow::{Context, Result};
use std::thread;

/// Default degree of parallelism for tool stages.
pub const DEFAULT_WORKER_THREADS: usize = 2;

/// Outcome of a pool run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PoolReport {
    /// Number of worker threads that were started.
    pub workers_started: usize,
    /// Names of workers that panicked. Their remaining items were not processed.
    pub panicked: Vec<String>,
}

impl PoolReport {
    pub fn all_completed(&self) -> bool {
        self.panicked.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct WorkerPool {
    workers: usize,
    name_prefix: String,
}

impl WorkerPool {
    /// Create a pool with `workers` threads (minimum 1). Thread names are
    /// `"<name_prefix> <n>"` with `n` starting at 1.
    pub fn new(workers: usize, name_prefix: impl Into<String>) -> Self {
        Self {
            workers: workers.max(1),
            name_prefix: name_prefix.into(),
        }
    }

    /// Number of workers (and therefore buckets the caller should partition into).
    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Run `work` once per bucket, each bucket on its own thread.
    ///
    /// `work` receives the bucket's items. Empty buckets do not get a thread. Returns an
    /// error only if a thread could not be spawned; threads that were already running are
    /// still joined first.
    pub fn run<T, F>(&self, buckets: Vec<Vec<T>>, work: F) -> Result<PoolReport>
    where
        T: Send,
        F: Fn(Vec<T>) + Sync,
    {
        let work = &work;
        thread::scope(|scope| {
            let mut handles = Vec::with_capacity(buckets.len());
            let mut spawn_error = None;

            for (index, bucket) in buckets.into_iter().enumerate() {
                if bucket.is_empty() {
                    continue;
                }
                let name = format!("{} {}", self.name_prefix, index + 1);
                let spawned = thread::Builder::new()
                    .name(name.clone())
                    .spawn_scoped(scope, move || work(bucket))
                    .with_context(|| format!("Failed to spawn worker thread '{}'", name));

                match spawned {
                    Ok(handle) => handles.push((name, handle)),
                    Err(e) => {
                        spawn_error = Some(e);
                        break;
                    }
                }
            }

            let mut report = PoolReport {
                workers_started: handles.len(),
                panicked: Vec::new(),
            };
            for (name, handle) in handles {
                if handle.join().is_err() {
                    tracing::error!("Worker thread '{}' panicked", name);
                    report.panicked.push(name);
                }
            }

            match spawn_error {
                Some(e) => Err(e),
                None => Ok(report),
            }
        })
    }
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self::new(DEFAULT_WORKER_THREADS, "addon-indexer worker")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Mutex;

    #[test]
    fn test_every_item_processed_once() {
        let pool = WorkerPool::new(2, "test worker");
        let seen = Mutex::new(Vec::new());

        let report = pool
            .run(vec![vec![1, 2, 3], vec![4, 5]], |items| {
                seen.lock().unwrap().extend(items);
            })
            .unwrap();

        assert_eq!(report.workers_started, 2);
        assert!(report.all_completed());
        let mut seen = seen.into_inner().unwrap();
        seen.sort();
        assert_eq!(seen, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_workers_are_named_threads() {
        let pool = WorkerPool::new(2, "named worker");
        let names = Mutex::new(HashSet::new());

        pool.run(vec![vec![()], vec![()]], |_| {
            let name = thread::current().name().unwrap_or_default().to_string();
            names.lock().unwrap().insert(name);
        })
        .unwrap();

        let names = names.into_inner().unwrap();
        assert!(names.contains("named worker 1"));
        assert!(names.contains("named worker 2"));
    }

    #[test]
    fn test_empty_buckets_spawn_nothing() {
        let pool = WorkerPool::new(2, "idle worker");
        let report = pool.run(vec![Vec::<u8>::new(), Vec::new()], |_| {}).unwrap();
        assert_eq!(report.workers_started, 0);
    }

    #[test]
    fn test_panicking_worker_is_reported() {
        let pool = WorkerPool::new(2, "panicky worker");
        let report = pool
            .run(vec![vec![true], vec![false]], |items| {
                if items[0] {
                    panic!("boom");
                }
            })
            .unwrap();

        assert_eq!(report.panicked, vec!["panicky worker 1".to_string()]);
    }

    #[test]
    fn test_minimum_one_worker() {
        assert_eq!(WorkerPool::new(0, "x").workers(), 1);
    }
}
