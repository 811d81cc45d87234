//! Approval Oracle — asynchronous boolean rendezvous with a human
//! reviewer via the chat bridge. At most one outstanding request is in
//! flight per process; a new request supersedes any unresolved prior one.

use std::sync::Arc;

use tokio::sync::{oneshot, Mutex};
use tracing::warn;

struct Pending {
    stage: String,
    task: String,
    responder: oneshot::Sender<bool>,
}

/// Single-outstanding-request rendezvous. Cloneable handle backed by a
/// shared mutex, so both the Pipeline (awaiting) and the chat bridge
/// (resolving) can hold a reference.
#[derive(Clone)]
pub struct ApprovalOracle {
    bridge_configured: bool,
    pending: Arc<Mutex<Option<Pending>>>,
}

impl ApprovalOracle {
    pub fn new(bridge_configured: bool) -> Self {
        Self {
            bridge_configured,
            pending: Arc::new(Mutex::new(None)),
        }
    }

    /// Render a two-button approval request and suspend until resolved.
    /// If the bridge is not configured, resolves immediately to `true`.
    pub async fn ask(&self, stage: &str, task: &str) -> bool {
        if !self.bridge_configured {
            return true;
        }

        let (tx, rx) = oneshot::channel();
        {
            let mut slot = self.pending.lock().await;
            if let Some(prior) = slot.take() {
                warn!(
                    "superseding unresolved approval for stage={} task={}",
                    prior.stage, prior.task
                );
                let _ = prior.responder.send(false);
            }
            *slot = Some(Pending {
                stage: stage.to_string(),
                task: task.to_string(),
                responder: tx,
            });
        }

        rx.await.unwrap_or(false)
    }

    /// Resolve the currently outstanding request, if any. Called by the
    /// chat bridge on an inbound approve/reject callback.
    pub async fn resolve(&self, decision: bool) {
        let mut slot = self.pending.lock().await;
        if let Some(pending) = slot.take() {
            let _ = pending.responder.send(decision);
        }
    }

    /// Resolve any outstanding request as reject. Called on pipeline stop:
    /// the open question in the source material is resolved this way to
    /// free the waiting worker rather than leave it dangling.
    pub async fn cancel_all(&self) {
        self.resolve(false).await;
    }

    pub async fn has_pending(&self) -> bool {
        self.pending.lock().await.is_some()
    }
}
