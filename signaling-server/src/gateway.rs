//! Asynchronous facade over the external media server.
//!
//! [MediaConnector] and [MediaClient] are the capability set the dispatcher needs;
//! [crate::kurento] implements them against a Kurento Media Server and tests swap
//! in an in-memory fake. [MediaGateway] memoizes one client for the whole process
//! and hands out [MediaHandle]s that bound every call with a timeout.

use std::fmt::{Display, Formatter};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use log::info;
use tokio::sync::Mutex;
use webrtc_relay_protocol::IceCandidate;

use crate::error::GatewayError;

/// Media server object id of a pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PipelineId(pub String);

/// Media server object id of an endpoint living inside a pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EndpointId(pub String);

impl Display for PipelineId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl Display for EndpointId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Kind of media element to create inside a pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointKind {
    /// Terminates a WebRTC peer connection
    WebRtc,
}

/// Creates connected media clients. Invoked at most once at a time by [MediaGateway].
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MediaConnector: Send + Sync {
    async fn connect(&self) -> Result<Arc<dyn MediaClient>, GatewayError>;
}

/// Operations offered by a media server. Every call may suspend and fail independently.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MediaClient: Send + Sync {
    async fn create_pipeline(&self) -> Result<PipelineId, GatewayError>;

    async fn create_endpoint(
        &self,
        pipeline: &PipelineId,
        kind: EndpointKind,
    ) -> Result<EndpointId, GatewayError>;

    async fn connect(&self, source: &EndpointId, sink: &EndpointId) -> Result<(), GatewayError>;

    /// Negotiate the browser's SDP offer, returning the SDP answer.
    async fn process_offer(&self, endpoint: &EndpointId, offer: &str)
        -> Result<String, GatewayError>;

    /// Start ICE gathering. Discovered candidates arrive on the stream
    /// returned by [MediaClient::subscribe_candidates].
    async fn gather_candidates(&self, endpoint: &EndpointId) -> Result<(), GatewayError>;

    async fn add_ice_candidate(
        &self,
        endpoint: &EndpointId,
        candidate: &IceCandidate,
    ) -> Result<(), GatewayError>;

    /// Candidates discovered by the endpoint. The stream ends when the owning
    /// pipeline is released or the media server goes away.
    async fn subscribe_candidates(
        &self,
        endpoint: &EndpointId,
    ) -> Result<BoxStream<'static, IceCandidate>, GatewayError>;

    async fn release(&self, pipeline: &PipelineId) -> Result<(), GatewayError>;

    /// Whether the client can still reach the media server.
    fn is_connected(&self) -> bool {
        true
    }
}

/// Process-wide access point to the media server.
pub struct MediaGateway {
    connector: Box<dyn MediaConnector>,
    client: Mutex<Option<Arc<dyn MediaClient>>>,
    timeout: Duration,
}

impl MediaGateway {
    pub fn new(connector: impl MediaConnector + 'static, timeout: Duration) -> Self {
        MediaGateway {
            connector: Box::new(connector),
            client: Mutex::new(None),
            timeout,
        }
    }

    /// Return the memoized client, creating it on first use.
    ///
    /// The lock is held across the connection attempt, so concurrent first callers
    /// share one attempt and its outcome. A client that lost its connection is replaced.
    pub async fn client(&self) -> Result<MediaHandle, GatewayError> {
        let mut slot = self.client.lock().await;
        if let Some(client) = slot.as_ref().filter(|client| client.is_connected()) {
            return Ok(self.handle(client.clone()));
        }
        let client = bounded("connect", self.timeout, self.connector.connect()).await?;
        info!("connected to media server");
        *slot = Some(client.clone());
        Ok(self.handle(client))
    }

    fn handle(&self, client: Arc<dyn MediaClient>) -> MediaHandle {
        MediaHandle {
            client,
            timeout: self.timeout,
        }
    }
}

/// A media client whose every call fails with [GatewayError::Timeout] once the
/// provisioning timeout expires.
#[derive(Clone)]
pub struct MediaHandle {
    client: Arc<dyn MediaClient>,
    timeout: Duration,
}

impl MediaHandle {
    pub async fn create_pipeline(&self) -> Result<PipelineId, GatewayError> {
        bounded("create_pipeline", self.timeout, self.client.create_pipeline()).await
    }

    pub async fn create_endpoint(
        &self,
        pipeline: &PipelineId,
        kind: EndpointKind,
    ) -> Result<EndpointId, GatewayError> {
        bounded(
            "create_endpoint",
            self.timeout,
            self.client.create_endpoint(pipeline, kind),
        )
        .await
    }

    pub async fn connect(&self, source: &EndpointId, sink: &EndpointId) -> Result<(), GatewayError> {
        bounded("connect", self.timeout, self.client.connect(source, sink)).await
    }

    pub async fn process_offer(
        &self,
        endpoint: &EndpointId,
        offer: &str,
    ) -> Result<String, GatewayError> {
        bounded(
            "process_offer",
            self.timeout,
            self.client.process_offer(endpoint, offer),
        )
        .await
    }

    pub async fn gather_candidates(&self, endpoint: &EndpointId) -> Result<(), GatewayError> {
        bounded(
            "gather_candidates",
            self.timeout,
            self.client.gather_candidates(endpoint),
        )
        .await
    }

    pub async fn add_ice_candidate(
        &self,
        endpoint: &EndpointId,
        candidate: &IceCandidate,
    ) -> Result<(), GatewayError> {
        bounded(
            "add_ice_candidate",
            self.timeout,
            self.client.add_ice_candidate(endpoint, candidate),
        )
        .await
    }

    pub async fn subscribe_candidates(
        &self,
        endpoint: &EndpointId,
    ) -> Result<BoxStream<'static, IceCandidate>, GatewayError> {
        bounded(
            "subscribe_candidates",
            self.timeout,
            self.client.subscribe_candidates(endpoint),
        )
        .await
    }

    pub async fn release(&self, pipeline: &PipelineId) -> Result<(), GatewayError> {
        bounded("release", self.timeout, self.client.release(pipeline)).await
    }
}

async fn bounded<T>(
    operation: &'static str,
    after: Duration,
    call: impl Future<Output = Result<T, GatewayError>>,
) -> Result<T, GatewayError> {
    match tokio::time::timeout(after, call).await {
        Ok(outcome) => outcome,
        Err(_) => Err(GatewayError::Timeout { operation, after }),
    }
}
