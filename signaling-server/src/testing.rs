//! In-memory media server recording every call, for tests.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use webrtc_relay_protocol::IceCandidate;

use crate::error::GatewayError;
use crate::gateway::{
    EndpointId, EndpointKind, MediaClient, MediaConnector, MediaGateway, PipelineId,
};

pub fn candidate(name: &str) -> IceCandidate {
    IceCandidate {
        candidate: name.to_owned(),
        sdp_mid: Some("0".to_owned()),
        sdp_m_line_index: Some(0),
    }
}

/// Answer the fake produces for `offer`.
pub fn answer_for(offer: &str) -> String {
    format!("answer:{offer}")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    CreatePipeline(PipelineId),
    CreateEndpoint(PipelineId, EndpointId),
    Connect(EndpointId, EndpointId),
    Subscribe(EndpointId),
    ProcessOffer(EndpointId, String),
    GatherCandidates(EndpointId),
    AddIceCandidate(EndpointId, String),
    Release(PipelineId),
}

#[derive(Default)]
pub struct FakeMediaServer {
    calls: Mutex<Vec<Call>>,
    failing: Mutex<HashSet<&'static str>>,
    offer_delays: Mutex<HashMap<String, Duration>>,
    subscribers: Mutex<HashMap<EndpointId, mpsc::UnboundedSender<IceCandidate>>>,
    next_object: AtomicU64,
}

impl FakeMediaServer {
    pub fn new() -> Arc<Self> {
        Arc::new(FakeMediaServer::default())
    }

    pub fn gateway(self: &Arc<Self>) -> MediaGateway {
        self.gateway_with_timeout(Duration::from_secs(5))
    }

    pub fn gateway_with_timeout(self: &Arc<Self>, timeout: Duration) -> MediaGateway {
        MediaGateway::new(FakeConnector(self.clone()), timeout)
    }

    /// Make every later call to `operation` fail.
    pub fn fail(&self, operation: &'static str) {
        self.failing.lock().unwrap().insert(operation);
    }

    /// Delay the answer to `offer`.
    pub fn delay_offer(&self, offer: &str, delay: Duration) {
        self.offer_delays
            .lock()
            .unwrap()
            .insert(offer.to_owned(), delay);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, predicate: impl Fn(&Call) -> bool) -> usize {
        self.calls.lock().unwrap().iter().filter(|&call| predicate(call)).count()
    }

    /// Endpoints created so far, oldest first.
    pub fn endpoints(&self) -> Vec<EndpointId> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter_map(|call| match call {
                Call::CreateEndpoint(_, endpoint) => Some(endpoint.clone()),
                _ => None,
            })
            .collect()
    }

    /// Emit a candidate as if `endpoint` had discovered it.
    pub fn discover(&self, endpoint: &EndpointId, candidate: IceCandidate) -> bool {
        match self.subscribers.lock().unwrap().get(endpoint) {
            Some(subscriber) => subscriber.send(candidate).is_ok(),
            None => false,
        }
    }

    fn check(&self, operation: &'static str) -> Result<(), GatewayError> {
        if self.failing.lock().unwrap().contains(operation) {
            return Err(GatewayError::Rejected {
                operation: operation.to_owned(),
                code: -1,
                message: "injected failure".to_owned(),
            });
        }
        Ok(())
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }

    fn next_id(&self, prefix: &str) -> String {
        format!("{prefix}-{}", self.next_object.fetch_add(1, Ordering::Relaxed))
    }
}

#[async_trait]
impl MediaClient for FakeMediaServer {
    async fn create_pipeline(&self) -> Result<PipelineId, GatewayError> {
        self.check("create_pipeline")?;
        let pipeline = PipelineId(self.next_id("pipeline"));
        self.record(Call::CreatePipeline(pipeline.clone()));
        Ok(pipeline)
    }

    async fn create_endpoint(
        &self,
        pipeline: &PipelineId,
        _kind: EndpointKind,
    ) -> Result<EndpointId, GatewayError> {
        self.check("create_endpoint")?;
        let endpoint = EndpointId(self.next_id("endpoint"));
        self.record(Call::CreateEndpoint(pipeline.clone(), endpoint.clone()));
        Ok(endpoint)
    }

    async fn connect(&self, source: &EndpointId, sink: &EndpointId) -> Result<(), GatewayError> {
        self.check("connect")?;
        self.record(Call::Connect(source.clone(), sink.clone()));
        Ok(())
    }

    async fn process_offer(
        &self,
        endpoint: &EndpointId,
        offer: &str,
    ) -> Result<String, GatewayError> {
        let delay = self.offer_delays.lock().unwrap().get(offer).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.check("process_offer")?;
        self.record(Call::ProcessOffer(endpoint.clone(), offer.to_owned()));
        Ok(answer_for(offer))
    }

    async fn gather_candidates(&self, endpoint: &EndpointId) -> Result<(), GatewayError> {
        self.check("gather_candidates")?;
        self.record(Call::GatherCandidates(endpoint.clone()));
        Ok(())
    }

    async fn add_ice_candidate(
        &self,
        endpoint: &EndpointId,
        candidate: &IceCandidate,
    ) -> Result<(), GatewayError> {
        self.check("add_ice_candidate")?;
        self.record(Call::AddIceCandidate(
            endpoint.clone(),
            candidate.candidate.clone(),
        ));
        Ok(())
    }

    async fn subscribe_candidates(
        &self,
        endpoint: &EndpointId,
    ) -> Result<BoxStream<'static, IceCandidate>, GatewayError> {
        self.check("subscribe_candidates")?;
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().unwrap().insert(endpoint.clone(), tx);
        self.record(Call::Subscribe(endpoint.clone()));
        Ok(UnboundedReceiverStream::new(rx).boxed())
    }

    async fn release(&self, pipeline: &PipelineId) -> Result<(), GatewayError> {
        self.check("release")?;
        self.record(Call::Release(pipeline.clone()));
        Ok(())
    }
}

struct FakeConnector(Arc<FakeMediaServer>);

#[async_trait]
impl MediaConnector for FakeConnector {
    async fn connect(&self) -> Result<Arc<dyn MediaClient>, GatewayError> {
        let client: Arc<dyn MediaClient> = self.0.clone();
        Ok(client)
    }
}
