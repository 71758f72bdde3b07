use std::collections::hash_map::Entry;
use std::collections::HashMap;

use log::{error, info, warn};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use uuid::Uuid;
use webrtc_relay_protocol::SessionId;

use crate::gateway::{EndpointId, MediaHandle, PipelineId};

/// Role of the single endpoint in the loopback topology.
pub const LOOPBACK_ROLE: &str = "endpoint";

pub fn new_session_id() -> SessionId {
    SessionId::new(Uuid::new_v4().as_u128())
}

/// Media server resources provisioned for one call.
///
/// The session exclusively owns its pipeline; [Session::release] consumes it, so a
/// pipeline is released at most once.
pub struct Session {
    id: SessionId,
    media: MediaHandle,
    pipeline: PipelineId,
    endpoints: HashMap<&'static str, EndpointId>,
    bridge: Option<JoinHandle<()>>,
}

impl Session {
    pub fn new(id: SessionId, media: MediaHandle, pipeline: PipelineId) -> Self {
        Session {
            id,
            media,
            pipeline,
            endpoints: HashMap::new(),
            bridge: None,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn media(&self) -> &MediaHandle {
        &self.media
    }

    pub fn pipeline(&self) -> &PipelineId {
        &self.pipeline
    }

    pub fn endpoint(&self, role: &str) -> Option<&EndpointId> {
        self.endpoints.get(role)
    }

    /// Record the endpoint playing `role`. A role is bound once; later calls are ignored.
    pub fn insert_endpoint(&mut self, role: &'static str, endpoint: EndpointId) -> bool {
        match self.endpoints.entry(role) {
            Entry::Vacant(entry) => {
                entry.insert(endpoint);
                true
            }
            Entry::Occupied(entry) => {
                warn!(
                    "{}: role {role} already bound to {}, ignoring {endpoint}",
                    self.id,
                    entry.get()
                );
                false
            }
        }
    }

    /// Keep the task forwarding server candidates, aborted on release.
    pub fn attach_bridge(&mut self, bridge: JoinHandle<()>) {
        if let Some(previous) = self.bridge.replace(bridge) {
            previous.abort();
        }
    }

    /// Stop forwarding events and release the pipeline. Failures are logged, not retried.
    pub async fn release(mut self) {
        if let Some(bridge) = self.bridge.take() {
            bridge.abort();
        }
        info!("{}: releasing pipeline {}", self.id, self.pipeline);
        if let Err(e) = self.media.release(&self.pipeline).await {
            error!("{}: failed to release pipeline {}: {}", self.id, self.pipeline, e);
        }
    }
}

/// Sessions whose pipeline was created and not yet released.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<SessionId, Session>>,
}

impl SessionRegistry {
    /// Register a fully provisioned session. An occupied id hands the session back.
    pub async fn insert(&self, session: Session) -> Result<(), Session> {
        match self.sessions.write().await.entry(session.id) {
            Entry::Vacant(entry) => {
                entry.insert(session);
                Ok(())
            }
            Entry::Occupied(_) => Err(session),
        }
    }

    pub async fn contains(&self, id: SessionId) -> bool {
        self.sessions.read().await.contains_key(&id)
    }

    /// The media handle and endpoint playing `role` in session `id`, if registered.
    pub async fn endpoint(&self, id: SessionId, role: &str) -> Option<(MediaHandle, EndpointId)> {
        let sessions = self.sessions.read().await;
        let session = sessions.get(&id)?;
        let endpoint = session.endpoint(role)?.clone();
        Some((session.media.clone(), endpoint))
    }

    pub async fn remove(&self, id: SessionId) -> Option<Session> {
        self.sessions.write().await.remove(&id)
    }

    pub async fn drain(&self) -> Vec<Session> {
        self.sessions
            .write()
            .await
            .drain()
            .map(|(_, session)| session)
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::testing::{Call, FakeMediaServer};

    async fn session(server: &std::sync::Arc<FakeMediaServer>) -> Session {
        let media = server.gateway().client().await.unwrap();
        let pipeline = media.create_pipeline().await.unwrap();
        Session::new(new_session_id(), media, pipeline)
    }

    #[tokio::test]
    async fn endpoint_roles_are_bound_once() {
        let server = FakeMediaServer::new();
        let mut session = session(&server).await;
        assert!(session.insert_endpoint(LOOPBACK_ROLE, EndpointId("a".into())));
        assert!(!session.insert_endpoint(LOOPBACK_ROLE, EndpointId("b".into())));
        assert_eq!(
            session.endpoint(LOOPBACK_ROLE),
            Some(&EndpointId("a".into()))
        );
    }

    #[tokio::test]
    async fn duplicate_ids_are_refused() {
        let server = FakeMediaServer::new();
        let registry = SessionRegistry::default();
        let first = session(&server).await;
        let id = first.id();
        let media = first.media().clone();
        let second = Session::new(id, media, PipelineId("other".into()));

        assert!(registry.insert(first).await.is_ok());
        let refused = registry.insert(second).await.unwrap_err();
        assert_eq!(refused.pipeline(), &PipelineId("other".into()));
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn removed_session_is_released_once() {
        let server = FakeMediaServer::new();
        let registry = SessionRegistry::default();
        let session = session(&server).await;
        let id = session.id();
        let pipeline = session.pipeline().clone();
        assert!(registry.insert(session).await.is_ok());

        if let Some(session) = registry.remove(id).await {
            session.release().await;
        }
        assert!(registry.remove(id).await.is_none());
        assert!(registry.is_empty().await);
        assert_eq!(server.count(|call| *call == Call::Release(pipeline.clone())), 1);
    }

    #[tokio::test]
    async fn release_failure_is_swallowed() {
        let server = FakeMediaServer::new();
        let session = session(&server).await;
        server.fail("release");
        session.release().await;
        assert_eq!(server.count(|call| matches!(call, Call::Release(_))), 0);
    }
}
