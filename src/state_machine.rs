//! Per-image pipeline stages:
//! Queued → Preprocessing → Recognizing → Filtering → Clustering → Classifying
//! → Assembling → Completed
//! Failed/Cancelled reachable from any non-terminal stage. Exposed for live progress polling.

use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    Queued,
    Preprocessing,
    Recognizing,
    Filtering,
    Clustering,
    Classifying,
    Assembling,
    Completed,
    Failed,
    Cancelled,
}

impl std::fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            PipelineStage::Queued => "Queued",
            PipelineStage::Preprocessing => "Preprocessing",
            PipelineStage::Recognizing => "Recognizing",
            PipelineStage::Filtering => "Filtering",
            PipelineStage::Clustering => "Clustering",
            PipelineStage::Classifying => "Classifying",
            PipelineStage::Assembling => "Assembling",
            PipelineStage::Completed => "Completed",
            PipelineStage::Failed => "Failed",
            PipelineStage::Cancelled => "Cancelled",
        };
        f.write_str(name)
    }
}

impl PipelineStage {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            PipelineStage::Completed | PipelineStage::Failed | PipelineStage::Cancelled
        )
    }

    /// Returns whether transitioning from `self` to `next` is valid.
    pub fn can_transition_to(self, next: PipelineStage) -> bool {
        use PipelineStage::*;
        if self.is_terminal() {
            return false;
        }
        matches!(
            (self, next),
            (Queued, Preprocessing)
                | (Preprocessing, Recognizing)
                | (Preprocessing, Filtering) // cached recognition
                | (Recognizing, Filtering)
                | (Filtering, Clustering)
                | (Clustering, Classifying)
                | (Classifying, Assembling)
                | (Assembling, Completed)
                | (_, Failed)
                | (_, Cancelled)
        )
    }
}

/// Thread-safe stage holder, read by the request status endpoint.
pub struct StageTracker {
    stage: RwLock<PipelineStage>,
}

impl Default for StageTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl StageTracker {
    pub fn new() -> Self {
        Self {
            stage: RwLock::new(PipelineStage::Queued),
        }
    }

    pub fn current(&self) -> PipelineStage {
        *self.stage.read()
    }

    /// Attempt a transition. Returns Ok(new_stage) or Err with reason.
    pub fn transition(&self, next: PipelineStage) -> Result<PipelineStage, String> {
        let mut stage = self.stage.write();
        let current = *stage;
        if !current.can_transition_to(next) {
            let msg = format!("invalid transition: {} -> {}", current, next);
            warn!("{}", msg);
            return Err(msg);
        }
        *stage = next;
        debug!(from = %current, to = %next, "stage_transition");
        Ok(next)
    }

    /// Move to `next` if allowed; illegal moves are logged and ignored.
    pub fn advance(&self, next: PipelineStage) {
        let _ = self.transition(next);
    }
}
