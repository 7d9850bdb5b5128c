//! Request registry: per-request cancellation tokens and live stages.
//! Every request gets a child of the server root token. Dropping the
//! request guard (handler finished or client went away) cancels and
//! deregisters it; shutdown cancels the root.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::metrics::RequestIds;
use crate::state_machine::{PipelineStage, StageTracker};

struct RequestEntry {
    token: CancellationToken,
    stages: Vec<Arc<StageTracker>>,
    started_at: Instant,
}

/// In-flight requests keyed by request id.
pub struct RequestRegistry {
    root: CancellationToken,
    inflight: RwLock<HashMap<String, Arc<RequestEntry>>>,
    generation: AtomicU64,
}

impl Default for RequestRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestRegistry {
    pub fn new() -> Self {
        Self::with_root(CancellationToken::new())
    }

    pub fn with_root(root: CancellationToken) -> Self {
        Self {
            root,
            inflight: RwLock::new(HashMap::new()),
            generation: AtomicU64::new(0),
        }
    }

    /// Register a new request with one stage tracker per image.
    pub fn register(self: &Arc<Self>, image_count: usize) -> RequestGuard {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let ids = RequestIds::new(generation);
        let entry = Arc::new(RequestEntry {
            token: self.root.child_token(),
            stages: (0..image_count).map(|_| Arc::new(StageTracker::new())).collect(),
            started_at: Instant::now(),
        });
        self.inflight
            .write()
            .insert(ids.request_id.clone(), Arc::clone(&entry));
        debug!(request_id = %ids.request_id, generation, image_count, "request_registered");
        RequestGuard {
            registry: Arc::clone(self),
            ids,
            entry,
        }
    }

    /// Cancel an in-flight request. Returns false when the id is unknown.
    pub fn cancel(&self, request_id: &str) -> bool {
        match self.inflight.read().get(request_id) {
            Some(entry) => {
                entry.token.cancel();
                info!(request_id, "request_cancelled");
                true
            }
            None => false,
        }
    }

    pub fn snapshot(&self, request_id: &str) -> Option<RequestSnapshot> {
        let inflight = self.inflight.read();
        let entry = inflight.get(request_id)?;
        Some(RequestSnapshot {
            request_id: request_id.to_string(),
            cancelled: entry.token.is_cancelled(),
            elapsed_ms: entry.started_at.elapsed().as_millis() as u64,
            stages: entry.stages.iter().map(|s| s.current()).collect(),
        })
    }

    /// Cancel every in-flight request (shutdown).
    pub fn cancel_all(&self) {
        self.root.cancel();
    }

    pub fn len(&self) -> usize {
        self.inflight.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn remove(&self, request_id: &str) {
        self.inflight.write().remove(request_id);
    }
}

/// Live view of one request for `GET /api/ocr/requests/{id}`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestSnapshot {
    pub request_id: String,
    pub cancelled: bool,
    pub elapsed_ms: u64,
    /// One entry per uploaded image.
    pub stages: Vec<PipelineStage>,
}

/// Held by the handler for the lifetime of a request.
pub struct RequestGuard {
    registry: Arc<RequestRegistry>,
    ids: RequestIds,
    entry: Arc<RequestEntry>,
}

impl RequestGuard {
    pub fn request_id(&self) -> &str {
        &self.ids.request_id
    }

    pub fn ids(&self) -> &RequestIds {
        &self.ids
    }

    pub fn token(&self) -> &CancellationToken {
        &self.entry.token
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.entry.token.is_cancelled()
    }

    /// Tracker for image `index`; a detached tracker if out of range.
    pub fn stage(&self, index: usize) -> Arc<StageTracker> {
        self.entry
            .stages
            .get(index)
            .cloned()
            .unwrap_or_else(|| Arc::new(StageTracker::new()))
    }
}

impl Drop for RequestGuard {
    fn drop(&mut self) {
        self.entry.token.cancel();
        self.registry.remove(&self.ids.request_id);
        debug!(request_id = %self.ids.request_id, "request_deregistered");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_by_id_fires_the_request_token() {
        let registry = Arc::new(RequestRegistry::new());
        let guard = registry.register(2);
        let id = guard.request_id().to_string();

        assert!(registry.cancel(&id));
        assert!(guard.is_cancelled());
        assert!(!registry.cancel("no-such-request"));
        assert!(registry.snapshot(&id).unwrap().cancelled);
    }

    #[test]
    fn dropping_the_guard_cancels_and_deregisters() {
        let registry = Arc::new(RequestRegistry::new());
        let guard = registry.register(1);
        let token = guard.token().clone();
        let id = guard.request_id().to_string();
        assert_eq!(registry.len(), 1);

        drop(guard);

        assert!(token.is_cancelled());
        assert!(registry.snapshot(&id).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn root_cancellation_reaches_every_request() {
        let registry = Arc::new(RequestRegistry::new());
        let a = registry.register(1);
        let b = registry.register(1);
        registry.cancel_all();
        assert!(a.is_cancelled() && b.is_cancelled());
    }

    #[test]
    fn snapshot_reports_per_image_stages() {
        let registry = Arc::new(RequestRegistry::new());
        let guard = registry.register(2);
        guard.stage(1).advance(PipelineStage::Preprocessing);

        let snapshot = registry.snapshot(guard.request_id()).unwrap();
        assert_eq!(
            snapshot.stages,
            [PipelineStage::Queued, PipelineStage::Preprocessing]
        );
    }

    #[test]
    fn request_ids_are_unique() {
        let registry = Arc::new(RequestRegistry::new());
        let a = registry.register(1);
        let b = registry.register(1);
        assert_ne!(a.request_id(), b.request_id());
        assert!(b.ids().generation > a.ids().generation);
    }
}
