// Forwarding thread - delivers indexing events to the consumer's callback
//
// Pipeline threads never call the callback directly. Each event is boxed into a closure
// and queued on an unbounded channel; one dedicated thread drains the queue in FIFO
// order and invokes the callback. The run log is written synchronously by the
// submitting thread.

use super::{IndexingCallback, IndexingData, IndexingEvent, RunLog, Step};
use crate::models::AddonIndexingHandle;
use camino::Utf8PathBuf;
use std::io;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use tokio::sync::mpsc;

type Delivery = Box<dyn FnOnce(&mut dyn IndexingCallback) + Send>;

enum Forwarded {
    Call(Delivery),
    /// Stop after everything queued before it has been delivered
    Exit,
}

/// Owns the callback thread and the run log for one indexing run.
///
/// Safe to share by reference between the orchestrator and stage workers.
pub struct ForwardingThread {
    queue_tx: mpsc::UnboundedSender<Forwarded>,
    worker: Mutex<Option<JoinHandle<()>>>,
    log: RunLog,
    root_temp_directory: Mutex<Option<Utf8PathBuf>>,
}

impl ForwardingThread {
    pub const THREAD_NAME: &'static str = "addon-indexer: event forwarding";

    /// Start the forwarding thread. `callback` is moved onto it and only ever called there.
    pub fn start(callback: impl IndexingCallback + 'static, log: RunLog) -> io::Result<Self> {
        let (queue_tx, mut queue_rx) = mpsc::unbounded_channel::<Forwarded>();
        let mut callback = callback;
        tracing::debug!(
            "Starting forwarding thread (run log {})",
            if log.is_enabled() { "enabled" } else { "disabled" }
        );

        let worker = thread::Builder::new()
            .name(Self::THREAD_NAME.to_string())
            .spawn(move || {
                tracing::debug!("Forwarding thread started");
                while let Some(forwarded) = queue_rx.blocking_recv() {
                    match forwarded {
                        Forwarded::Call(deliver) => deliver(&mut callback),
                        Forwarded::Exit => break,
                    }
                }
                tracing::debug!("Forwarding thread terminated");
            })?;

        Ok(Self {
            queue_tx,
            worker: Mutex::new(Some(worker)),
            log,
            root_temp_directory: Mutex::new(None),
        })
    }

    fn emit(&self, event: IndexingEvent) {
        let deliver: Delivery =
            Box::new(move |callback: &mut dyn IndexingCallback| callback.on_event(event));
        if self.queue_tx.send(Forwarded::Call(deliver)).is_err() {
            tracing::warn!("Failed to forward indexing event - forwarding thread has stopped");
        }
    }

    pub fn log(&self, message: &str) {
        self.log.log(message);
    }

    pub fn started_index(&self, data: IndexingData) {
        self.emit(IndexingEvent::StartedIndex(data));
    }

    pub fn addon_started(&self, handle: &Arc<AddonIndexingHandle>) {
        self.emit(IndexingEvent::AddonStarted(Arc::clone(handle)));
    }

    pub fn addon_finished(&self, handle: &Arc<AddonIndexingHandle>) {
        self.emit(IndexingEvent::AddonFinished(Arc::clone(handle)));
    }

    pub fn finished_index(&self) {
        self.emit(IndexingEvent::FinishedIndex);
    }

    /// Emit `StepStart`. The matching `StepFinish` is emitted when the guard drops.
    #[must_use = "dropping the guard finishes the step immediately"]
    pub fn step_start(&self, handle: &Arc<AddonIndexingHandle>, step: Step) -> StepGuard<'_> {
        tracing::debug!("{}: {} started", handle.addon_name(), step);
        self.emit(IndexingEvent::StepStart {
            handle: Arc::clone(handle),
            step,
        });
        StepGuard {
            forwarding: self,
            handle: Arc::clone(handle),
            step,
        }
    }

    pub fn message(&self, handle: &Arc<AddonIndexingHandle>, message: impl Into<String>) {
        let message = message.into();
        self.log.log(&message);
        self.emit(IndexingEvent::Message {
            handle: Arc::clone(handle),
            message,
        });
    }

    pub fn warning(
        &self,
        handle: &Arc<AddonIndexingHandle>,
        message: impl Into<String>,
        detail: Option<String>,
    ) {
        let message = message.into();
        self.log.log_warning(&message, detail.as_deref());
        self.emit(IndexingEvent::Warning {
            handle: Arc::clone(handle),
            message,
            detail,
        });
    }

    /// Report an error. `handle` is `None` for run-level errors.
    pub fn error(
        &self,
        handle: Option<&Arc<AddonIndexingHandle>>,
        message: impl Into<String>,
        detail: Option<String>,
    ) {
        let message = message.into();
        self.log.log_error(&message, detail.as_deref());
        self.emit(IndexingEvent::Error {
            handle: handle.cloned(),
            message,
            detail,
        });
    }

    /// Start counting `units` of work for the current stage.
    pub fn begin_work(&self, handle: &Arc<AddonIndexingHandle>, units: usize) {
        let total = units as f64;
        handle.set_total_work_progress(total);
        handle.set_current_work_progress(0.0);
        self.emit(IndexingEvent::TotalProgress {
            handle: Arc::clone(handle),
            progress: total,
        });
        self.emit(IndexingEvent::CurrentProgress {
            handle: Arc::clone(handle),
            progress: 0.0,
        });
    }

    /// Record one finished unit of work.
    pub fn unit_done(&self, handle: &Arc<AddonIndexingHandle>) {
        let progress = handle.advance_current_work_progress(1.0);
        self.emit(IndexingEvent::CurrentProgress {
            handle: Arc::clone(handle),
            progress,
        });
    }

    pub fn set_root_temp_directory(&self, dir: Utf8PathBuf) {
        *self
            .root_temp_directory
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(dir);
    }

    pub fn root_temp_directory(&self) -> Option<Utf8PathBuf> {
        self.root_temp_directory
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Deliver everything queued so far, stop the thread and close the log.
    ///
    /// Blocks until the callback has seen the last event. Later calls do nothing.
    pub fn close(&self) {
        let worker = self
            .worker
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        let Some(worker) = worker else {
            return;
        };

        let _ = self.queue_tx.send(Forwarded::Exit);
        self.log.close();
        if worker.join().is_err() {
            tracing::error!("Indexing callback panicked on the forwarding thread");
        }
    }
}

impl Drop for ForwardingThread {
    fn drop(&mut self) {
        self.close();
    }
}

/// Emits `StepFinish` for its step when dropped, on every exit path.
pub struct StepGuard<'a> {
    forwarding: &'a ForwardingThread,
    handle: Arc<AddonIndexingHandle>,
    step: Step,
}

impl Drop for StepGuard<'_> {
    fn drop(&mut self) {
        tracing::debug!("{}: {} finished", self.handle.addon_name(), self.step);
        self.forwarding.emit(IndexingEvent::StepFinish {
            handle: Arc::clone(&self.handle),
            step: self.step,
        });
    }
}
