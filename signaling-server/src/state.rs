use log::info;

use crate::candidates::CandidateQueue;
use crate::gateway::MediaGateway;
use crate::registry::SessionRegistry;

/// Process-wide state shared by every connection.
pub struct AppState {
    pub sessions: SessionRegistry,
    pub candidates: CandidateQueue,
    pub gateway: MediaGateway,
}

impl AppState {
    pub fn new(gateway: MediaGateway) -> Self {
        AppState {
            sessions: SessionRegistry::default(),
            candidates: CandidateQueue::default(),
            gateway,
        }
    }

    /// Release every registered session, used on shutdown.
    pub async fn release_all(&self) {
        let sessions = self.sessions.drain().await;
        if !sessions.is_empty() {
            info!("releasing {} remaining sessions", sessions.len());
        }
        for session in sessions {
            self.candidates.discard(session.id()).await;
            session.release().await;
        }
    }
}
