//! Pending user approvals.
//!
//! When a connected site asks for something sensitive, a popup opens and
//! the site's in-flight request parks on a one-shot continuation. The
//! map entry is written when the popup opens, consumed when the user
//! answers, and cleared by an expiry task after five minutes: a request
//! the user never answers resolves to [`ApprovalOutcome::TimedOut`] on
//! its own, without waiting for any later message to sweep it up.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use common::time::TimestampMs;
use tokio::sync::oneshot;
use tokio::time::timeout;
use tracing::debug;

pub const APPROVAL_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// What the user was asked to approve. Returned to the router when the
/// answer arrives so it can act on the original payload.
#[derive(Clone, Debug)]
pub struct PendingApproval {
    pub origin: String,
    pub message: String,
    pub opened_at: TimestampMs,
}

/// The continuation's resolution. `Approved` carries the handler's
/// result (e.g. the signature) for the parked site request.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ApprovalOutcome {
    Approved(serde_json::Value),
    Rejected,
    TimedOut,
}

struct Entry {
    /// Ties each entry to its own expiry task, so the timer of a
    /// replaced entry cannot clear a newer one under the same id.
    generation: u64,
    tx: oneshot::Sender<ApprovalOutcome>,
    request: PendingApproval,
}

#[derive(Default)]
struct Inner {
    entries: HashMap<String, Entry>,
    next_generation: u64,
}

/// The pending-approvals map. Interior-locked so the expiry tasks can
/// clear entries without a handle on the rest of the core state.
#[derive(Clone, Default)]
pub struct Approvals {
    inner: Arc<Mutex<Inner>>,
}

impl Approvals {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a pending approval and get the receiver to park on.
    /// Arms the five-minute expiry; a duplicate request id cancels the
    /// older waiter.
    pub fn open(
        &self,
        request_id: &str,
        request: PendingApproval,
    ) -> oneshot::Receiver<ApprovalOutcome> {
        let (tx, rx) = oneshot::channel();
        let generation = {
            let mut inner = self.inner.lock().unwrap();
            let generation = inner.next_generation;
            inner.next_generation += 1;
            let replaced = inner.entries.insert(
                request_id.to_owned(),
                Entry {
                    generation,
                    tx,
                    request,
                },
            );
            if replaced.is_some() {
                debug!(%request_id, "replaced an existing pending approval");
            }
            generation
        };

        let inner = Arc::clone(&self.inner);
        let id = request_id.to_owned();
        tokio::spawn(async move {
            tokio::time::sleep(APPROVAL_TIMEOUT).await;
            let mut inner = inner.lock().unwrap();
            let expired = matches!(
                inner.entries.get(&id),
                Some(entry) if entry.generation == generation
            );
            if expired {
                debug!(request_id = %id, "approval timed out");
                let entry =
                    inner.entries.remove(&id).expect("checked above");
                let _ = entry.tx.send(ApprovalOutcome::TimedOut);
            }
        });

        rx
    }

    /// The user answered: consume the entry. Returns the original
    /// request payload plus the continuation to resolve, or `None` for
    /// unknown / already-consumed / expired ids.
    pub fn take(
        &self,
        request_id: &str,
    ) -> Option<(PendingApproval, oneshot::Sender<ApprovalOutcome>)> {
        self.inner
            .lock()
            .unwrap()
            .entries
            .remove(request_id)
            .map(|entry| (entry.request, entry.tx))
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().unwrap().entries.is_empty()
    }
}

/// Park on an approval. The expiry task resolves abandoned entries, and
/// the timeout here backstops a dropped sender as well.
pub async fn wait(
    rx: oneshot::Receiver<ApprovalOutcome>,
) -> ApprovalOutcome {
    match timeout(APPROVAL_TIMEOUT, rx).await {
        Ok(Ok(outcome)) => outcome,
        _ => ApprovalOutcome::TimedOut,
    }
}
