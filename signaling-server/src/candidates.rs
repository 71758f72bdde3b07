//! Buffer for browser ICE candidates that arrive before the server endpoint exists.
//!
//! Candidates are appended at the tail and flushed from the head. An entry lives only
//! until the session's endpoint is created; [CandidateQueue::flush] takes the whole
//! entry out under the lock, so a candidate is applied exactly once.

use std::collections::{HashMap, VecDeque};

use log::{debug, warn};
use tokio::sync::Mutex;
use webrtc_relay_protocol::{IceCandidate, SessionId};

use crate::gateway::{EndpointId, MediaHandle};

/// Candidates kept per session before its endpoint exists; later ones are dropped.
pub const MAX_QUEUED_CANDIDATES: usize = 128;

#[derive(Default)]
pub struct CandidateQueue {
    pending: Mutex<HashMap<SessionId, VecDeque<IceCandidate>>>,
}

impl CandidateQueue {
    /// Append `candidate` for `id`. Returns false when the queue is full and the
    /// candidate was dropped.
    pub async fn enqueue(&self, id: SessionId, candidate: IceCandidate) -> bool {
        let mut pending = self.pending.lock().await;
        let queued = pending.entry(id).or_default();
        if queued.len() >= MAX_QUEUED_CANDIDATES {
            warn!(
                "{id}: {MAX_QUEUED_CANDIDATES} candidates already queued, dropping {}",
                candidate.candidate
            );
            return false;
        }
        queued.push_back(candidate);
        true
    }

    /// Remove and return the candidates queued for `id`, oldest first.
    pub async fn take(&self, id: SessionId) -> VecDeque<IceCandidate> {
        self.pending.lock().await.remove(&id).unwrap_or_default()
    }

    /// Apply every queued candidate to `endpoint` in arrival order and drop the entry.
    /// Returns how many candidates were applied.
    pub async fn flush(&self, id: SessionId, media: &MediaHandle, endpoint: &EndpointId) -> usize {
        let mut queued = self.take(id).await;
        let mut applied = 0;
        while let Some(candidate) = queued.pop_front() {
            match media.add_ice_candidate(endpoint, &candidate).await {
                Ok(()) => applied += 1,
                Err(e) => warn!("{id}: queued candidate rejected by {endpoint}: {e}"),
            }
        }
        if applied > 0 {
            debug!("{id}: flushed {applied} queued candidates into {endpoint}");
        }
        applied
    }

    pub async fn discard(&self, id: SessionId) {
        if let Some(dropped) = self.pending.lock().await.remove(&id) {
            debug!("{id}: discarded {} queued candidates", dropped.len());
        }
    }

    /// Number of candidates waiting for `id`.
    pub async fn len(&self, id: SessionId) -> usize {
        self.pending.lock().await.get(&id).map_or(0, VecDeque::len)
    }

    pub async fn contains(&self, id: SessionId) -> bool {
        self.pending.lock().await.contains_key(&id)
    }
}
