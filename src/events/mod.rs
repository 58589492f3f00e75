//! Events reported during an indexing run, and the callback that receives them.
//!
//! Events are delivered on the run's forwarding thread in the order they were
//! submitted (see [`ForwardingThread`]).

mod forwarding;
mod run_log;

pub use forwarding::{ForwardingThread, StepGuard};
pub use run_log::RunLog;

use crate::models::{AddonIndexingHandle, AddonsConfig};
use std::fmt;
use std::sync::Arc;

/// Per-addon pipeline stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Step {
    ExtractPbos,
    DebinarizeConfigs,
    ParseConfigs,
    SaveReferences,
    Cleanup,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Step::ExtractPbos => "Extract PBOs",
            Step::DebinarizeConfigs => "De-binarize configs",
            Step::ParseConfigs => "Parse configs",
            Step::SaveReferences => "Save references",
            Step::Cleanup => "Cleanup",
        };
        f.write_str(name)
    }
}

/// What a run is about to index
#[derive(Debug, Clone)]
pub struct IndexingData {
    pub config: AddonsConfig,
    pub addons: Vec<Arc<AddonIndexingHandle>>,
}

#[derive(Debug, Clone)]
pub enum IndexingEvent {
    StartedIndex(IndexingData),
    AddonStarted(Arc<AddonIndexingHandle>),
    StepStart {
        handle: Arc<AddonIndexingHandle>,
        step: Step,
    },
    StepFinish {
        handle: Arc<AddonIndexingHandle>,
        step: Step,
    },
    Message {
        handle: Arc<AddonIndexingHandle>,
        message: String,
    },
    Warning {
        handle: Arc<AddonIndexingHandle>,
        message: String,
        detail: Option<String>,
    },
    /// `handle` is `None` for errors that abort the whole run
    Error {
        handle: Option<Arc<AddonIndexingHandle>>,
        message: String,
        detail: Option<String>,
    },
    TotalProgress {
        handle: Arc<AddonIndexingHandle>,
        progress: f64,
    },
    CurrentProgress {
        handle: Arc<AddonIndexingHandle>,
        progress: f64,
    },
    AddonFinished(Arc<AddonIndexingHandle>),
    FinishedIndex,
}

impl IndexingEvent {
    /// Name of the addon the event is about, if any
    pub fn addon_name(&self) -> Option<&str> {
        let handle = match self {
            IndexingEvent::AddonStarted(handle)
            | IndexingEvent::AddonFinished(handle)
            | IndexingEvent::StepStart { handle, .. }
            | IndexingEvent::StepFinish { handle, .. }
            | IndexingEvent::Message { handle, .. }
            | IndexingEvent::Warning { handle, .. }
            | IndexingEvent::TotalProgress { handle, .. }
            | IndexingEvent::CurrentProgress { handle, .. } => handle,
            IndexingEvent::Error {
                handle: Some(handle),
                ..
            } => handle,
            IndexingEvent::Error { handle: None, .. }
            | IndexingEvent::StartedIndex(_)
            | IndexingEvent::FinishedIndex => return None,
        };
        Some(handle.addon_name())
    }
}

/// Receiver of [`IndexingEvent`]s. Called only from the forwarding thread.
pub trait IndexingCallback: Send {
    fn on_event(&mut self, event: IndexingEvent);
}

impl<F> IndexingCallback for F
where
    F: FnMut(IndexingEvent) + Send,
{
    fn on_event(&mut self, event: IndexingEvent) {
        self(event)
    }
}
