//! Per-connection signaling state machine.
//!
//! A [Dispatcher] consumes the messages of one connection strictly in arrival order,
//! awaiting each before looking at the next, so start, stop and candidate handling
//! never interleave for a session. Different connections run in their own tasks and
//! only meet at the shared [AppState].

use std::sync::Arc;

use log::{debug, error, info, warn};
use webrtc_relay_protocol::{ClientMessage, ConnectionId, IceCandidate, ServerMessage, SessionId};

use crate::bridge::{self, Outbox};
use crate::error::{GatewayError, SignalingError};
use crate::gateway::{EndpointId, EndpointKind};
use crate::registry::{new_session_id, Session, LOOPBACK_ROLE};
use crate::state::AppState;

pub struct Dispatcher {
    connection: ConnectionId,
    session_id: Option<SessionId>,
    state: Arc<AppState>,
    outbox: Outbox,
}

impl Dispatcher {
    pub fn new(connection: ConnectionId, state: Arc<AppState>, outbox: Outbox) -> Self {
        Dispatcher {
            connection,
            session_id: None,
            state,
            outbox,
        }
    }

    /// Session id of this connection, if a message has needed one yet.
    pub fn session_id(&self) -> Option<SessionId> {
        self.session_id
    }

    pub async fn handle_text(&mut self, text: &str) {
        match serde_json::from_str::<ClientMessage>(text) {
            Ok(message) => {
                info!("message received from {}: {:?}", self.connection, message);
                self.handle(message).await;
            }
            Err(e) => {
                warn!("invalid message from {}: {}", self.connection, e);
                self.reply(ServerMessage::error(format!("Invalid message {text}")));
            }
        }
    }

    pub fn reject_binary(&self) {
        warn!("binary frame from {} ignored", self.connection);
        self.reply(ServerMessage::error("Invalid message <binary>"));
    }

    pub async fn handle(&mut self, message: ClientMessage) {
        match message {
            ClientMessage::Start { sdp_offer } => {
                if let Err(e) = self.start(sdp_offer).await {
                    error!("{}: start failed: {}", self.connection, e);
                    self.reply(ServerMessage::error(e.to_string()));
                }
            }
            ClientMessage::Stop => self.stop().await,
            ClientMessage::OnIceCandidate { candidate } => self.on_ice_candidate(candidate).await,
        }
    }

    /// Provision a loopback pipeline for the offer and answer it.
    ///
    /// Any failure once the pipeline exists releases it before the error surfaces;
    /// the session is registered only when provisioning fully succeeded.
    async fn start(&mut self, sdp_offer: String) -> Result<(), SignalingError> {
        let id = self.session();
        if self.state.sessions.contains(id).await {
            return Err(SignalingError::AlreadyStarted(id));
        }

        let media = self.state.gateway.client().await?;
        let pipeline = media.create_pipeline().await?;
        info!("{}: created pipeline {} for {}", id, pipeline, self.connection);

        let mut session = Session::new(id, media.clone(), pipeline);
        let (endpoint, sdp_answer) = match self.provision(&mut session, &sdp_offer).await {
            Ok(provisioned) => provisioned,
            Err(e) => {
                session.release().await;
                return Err(e.into());
            }
        };

        if let Err(session) = self.state.sessions.insert(session).await {
            session.release().await;
            return Err(SignalingError::AlreadyStarted(id));
        }

        if let Err(e) = media.gather_candidates(&endpoint).await {
            if let Some(session) = self.state.sessions.remove(id).await {
                session.release().await;
            }
            return Err(e.into());
        }

        debug!("{}: sending sdp answer to {}", id, self.connection);
        self.reply(ServerMessage::StartResponse { sdp_answer });
        Ok(())
    }

    async fn provision(
        &self,
        session: &mut Session,
        sdp_offer: &str,
    ) -> Result<(EndpointId, String), GatewayError> {
        let media = session.media().clone();
        let endpoint = media
            .create_endpoint(session.pipeline(), EndpointKind::WebRtc)
            .await?;
        session.insert_endpoint(LOOPBACK_ROLE, endpoint.clone());
        media.connect(&endpoint, &endpoint).await?;

        let candidates = media.subscribe_candidates(&endpoint).await?;
        session.attach_bridge(bridge::spawn(
            self.connection,
            session.id(),
            candidates,
            self.outbox.clone(),
        ));

        // queued candidates go in before the offer so none of them waits on negotiation
        self.state
            .candidates
            .flush(session.id(), &media, &endpoint)
            .await;

        let sdp_answer = media.process_offer(&endpoint, sdp_offer).await?;
        Ok((endpoint, sdp_answer))
    }

    /// Release the session of this connection, if any. Stopping twice is a no-op.
    pub async fn stop(&mut self) {
        let Some(id) = self.session_id else {
            debug!("stop from {} without a session", self.connection);
            return;
        };
        if let Some(session) = self.state.sessions.remove(id).await {
            self.state.candidates.discard(id).await;
            session.release().await;
        }
    }

    async fn on_ice_candidate(&mut self, candidate: IceCandidate) {
        let id = self.session();
        match self.state.sessions.endpoint(id, LOOPBACK_ROLE).await {
            Some((media, endpoint)) => {
                debug!("{id}: forwarding candidate to {endpoint}");
                if let Err(e) = media.add_ice_candidate(&endpoint, &candidate).await {
                    warn!("{id}: candidate rejected by {endpoint}: {e}");
                }
            }
            None => {
                debug!("{id}: queueing candidate");
                self.state.candidates.enqueue(id, candidate).await;
            }
        }
    }

    /// Tear down after the transport closed or failed: an implicit stop that also
    /// drops candidates queued for a session that never started.
    pub async fn close(mut self) {
        self.stop().await;
        if let Some(id) = self.session_id {
            self.state.candidates.discard(id).await;
        }
    }

    fn session(&mut self) -> SessionId {
        *self.session_id.get_or_insert_with(new_session_id)
    }

    fn reply(&self, message: ServerMessage) {
        if self.outbox.send(message).is_err() {
            debug!("{} is gone, reply dropped", self.connection);
        }
    }
}
