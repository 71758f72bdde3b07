//! [MediaClient] backed by a Kurento Media Server, spoken to in JSON-RPC 2.0 over a
//! WebSocket.
//!
//! One connection is shared by every session. Responses are matched to requests by
//! their `id`; `onEvent` notifications carrying discovered ICE candidates are routed to
//! the subscriber registered for the emitting endpoint.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use futures_util::{SinkExt, StreamExt};
use log::{debug, info, warn};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use webrtc_relay_protocol::IceCandidate;

use crate::error::GatewayError;
use crate::gateway::{EndpointId, EndpointKind, MediaClient, MediaConnector, PipelineId};

/// Event types announcing a candidate found by a WebRTC endpoint. Media servers before
/// 6.7 emit the legacy name.
const CANDIDATE_EVENTS: [&str; 2] = ["IceCandidateFound", "OnIceCandidate"];

/// Opens [KurentoClient]s on `uri`, e.g. `ws://localhost:8888/kurento`.
pub struct KurentoConnector {
    uri: String,
    keepalive: Duration,
}

impl KurentoConnector {
    pub fn new(uri: impl Into<String>, keepalive: Duration) -> Self {
        KurentoConnector {
            uri: uri.into(),
            keepalive,
        }
    }
}

#[async_trait]
impl MediaConnector for KurentoConnector {
    async fn connect(&self) -> Result<Arc<dyn MediaClient>, GatewayError> {
        let client: Arc<dyn MediaClient> =
            Arc::new(KurentoClient::open(&self.uri, self.keepalive).await?);
        Ok(client)
    }
}

#[derive(Clone)]
pub struct KurentoClient {
    inner: Arc<Inner>,
}

type Pending = oneshot::Sender<Result<Value, GatewayError>>;

struct Inner {
    outgoing: mpsc::UnboundedSender<String>,
    next_id: AtomicU64,
    connected: AtomicBool,
    session_id: Mutex<Option<String>>,
    pending: Mutex<HashMap<u64, (String, Pending)>>,
    /// `create` requests whose caller gave up; a late answer releases the object
    abandoned: Mutex<HashSet<u64>>,
    subscribers: Mutex<HashMap<String, mpsc::UnboundedSender<IceCandidate>>>,
    /// endpoints created in each pipeline, so releasing it ends their candidate streams
    children: Mutex<HashMap<String, Vec<String>>>,
}

#[derive(Deserialize)]
struct Frame {
    id: Option<u64>,
    method: Option<String>,
    params: Option<Value>,
    result: Option<Value>,
    error: Option<RpcError>,
}

#[derive(Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

impl KurentoClient {
    pub async fn open(uri: &str, keepalive: Duration) -> Result<Self, GatewayError> {
        let (ws, _) = connect_async(uri)
            .await
            .map_err(|e| GatewayError::Connect {
                uri: uri.to_owned(),
                reason: e.to_string(),
            })?;
        info!("connected to Kurento at {uri}");
        let (mut ws_tx, mut ws_rx) = ws.split();

        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        let client = KurentoClient::with_outgoing(tx);

        tokio::spawn(async move {
            while let Some(frame) = rx.recv().await {
                if let Err(e) = ws_tx.send(Message::Text(frame)).await {
                    warn!("Kurento send error: {e}");
                    break;
                }
            }
        });

        let inner = client.inner.clone();
        tokio::spawn(async move {
            while let Some(message) = ws_rx.next().await {
                match message {
                    Ok(Message::Text(text)) => inner.dispatch(&text),
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        warn!("Kurento connection error: {e}");
                        break;
                    }
                }
            }
            inner.disconnected();
        });

        tokio::spawn(send_pings(Arc::downgrade(&client.inner), keepalive));
        Ok(client)
    }

    fn with_outgoing(outgoing: mpsc::UnboundedSender<String>) -> Self {
        KurentoClient {
            inner: Arc::new(Inner {
                outgoing,
                next_id: AtomicU64::new(1),
                connected: AtomicBool::new(true),
                session_id: Mutex::new(None),
                pending: Mutex::new(HashMap::new()),
                abandoned: Mutex::new(HashSet::new()),
                subscribers: Mutex::new(HashMap::new()),
                children: Mutex::new(HashMap::new()),
            }),
        }
    }

    async fn create(&self, kind: &str, constructor_params: Value) -> Result<String, GatewayError> {
        let result = self
            .inner
            .request(
                "create",
                json!({
                    "type": kind,
                    "constructorParams": constructor_params,
                    "properties": {},
                }),
            )
            .await?;
        string_value(&result, "create")
    }

    async fn invoke(
        &self,
        object: &str,
        operation: &str,
        operation_params: Value,
    ) -> Result<Value, GatewayError> {
        self.inner
            .request(
                "invoke",
                json!({
                    "object": object,
                    "operation": operation,
                    "operationParams": operation_params,
                }),
            )
            .await
    }
}

#[async_trait]
impl MediaClient for KurentoClient {
    async fn create_pipeline(&self) -> Result<PipelineId, GatewayError> {
        self.create("MediaPipeline", json!({})).await.map(PipelineId)
    }

    async fn create_endpoint(
        &self,
        pipeline: &PipelineId,
        kind: EndpointKind,
    ) -> Result<EndpointId, GatewayError> {
        let type_name = match kind {
            EndpointKind::WebRtc => "WebRtcEndpoint",
        };
        let endpoint = self
            .create(type_name, json!({ "mediaPipeline": pipeline.0 }))
            .await?;
        lock(&self.inner.children)
            .entry(pipeline.0.clone())
            .or_default()
            .push(endpoint.clone());
        Ok(EndpointId(endpoint))
    }

    async fn connect(&self, source: &EndpointId, sink: &EndpointId) -> Result<(), GatewayError> {
        self.invoke(&source.0, "connect", json!({ "sink": sink.0 }))
            .await
            .map(drop)
    }

    async fn process_offer(
        &self,
        endpoint: &EndpointId,
        offer: &str,
    ) -> Result<String, GatewayError> {
        let result = self
            .invoke(&endpoint.0, "processOffer", json!({ "offer": offer }))
            .await?;
        string_value(&result, "processOffer")
    }

    async fn gather_candidates(&self, endpoint: &EndpointId) -> Result<(), GatewayError> {
        self.invoke(&endpoint.0, "gatherCandidates", json!({}))
            .await
            .map(drop)
    }

    async fn add_ice_candidate(
        &self,
        endpoint: &EndpointId,
        candidate: &IceCandidate,
    ) -> Result<(), GatewayError> {
        let mut typed = json!({
            "__module__": "kurento",
            "__type__": "IceCandidate",
            "candidate": candidate.candidate,
        });
        if let Some(sdp_mid) = &candidate.sdp_mid {
            typed["sdpMid"] = json!(sdp_mid);
        }
        if let Some(index) = candidate.sdp_m_line_index {
            typed["sdpMLineIndex"] = json!(index);
        }
        self.invoke(&endpoint.0, "addIceCandidate", json!({ "candidate": typed }))
            .await
            .map(drop)
    }

    async fn subscribe_candidates(
        &self,
        endpoint: &EndpointId,
    ) -> Result<BoxStream<'static, IceCandidate>, GatewayError> {
        // registered first so no event emitted right after the subscription is lost
        let (tx, rx) = mpsc::unbounded_channel();
        lock(&self.inner.subscribers).insert(endpoint.0.clone(), tx);
        let subscribed = self
            .inner
            .request(
                "subscribe",
                json!({ "type": CANDIDATE_EVENTS[0], "object": endpoint.0 }),
            )
            .await;
        if let Err(e) = subscribed {
            lock(&self.inner.subscribers).remove(&endpoint.0);
            return Err(e);
        }
        Ok(UnboundedReceiverStream::new(rx).boxed())
    }

    async fn release(&self, pipeline: &PipelineId) -> Result<(), GatewayError> {
        let endpoints = lock(&self.inner.children)
            .remove(&pipeline.0)
            .unwrap_or_default();
        {
            let mut subscribers = lock(&self.inner.subscribers);
            for endpoint in &endpoints {
                subscribers.remove(endpoint);
            }
        }
        self.inner
            .request("release", json!({ "object": pipeline.0 }))
            .await
            .map(drop)
    }

    fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::Acquire)
    }
}

impl Inner {
    async fn request(&self, method: &str, mut params: Value) -> Result<Value, GatewayError> {
        if !self.connected.load(Ordering::Acquire) {
            return Err(GatewayError::Disconnected);
        }
        let session_id = lock(&self.session_id).clone();
        if let (Some(session_id), Some(params)) = (session_id, params.as_object_mut()) {
            params.insert("sessionId".to_owned(), Value::String(session_id));
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let frame = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });
        let (tx, rx) = oneshot::channel();
        lock(&self.pending).insert(id, (method.to_owned(), tx));
        let _slot = PendingSlot { inner: self, id };
        if self.outgoing.send(frame.to_string()).is_err() {
            return Err(GatewayError::Disconnected);
        }
        rx.await.map_err(|_| GatewayError::Disconnected)?
    }

    /// Release an object created for a caller that is no longer waiting for it.
    fn release_orphan(&self, object: &str) {
        warn!("releasing {object}, created after its caller gave up");
        let mut params = json!({ "object": object });
        if let Some(session_id) = lock(&self.session_id).clone() {
            params["sessionId"] = Value::String(session_id);
        }
        let frame = json!({
            "jsonrpc": "2.0",
            "id": self.next_id.fetch_add(1, Ordering::Relaxed),
            "method": "release",
            "params": params,
        });
        if self.outgoing.send(frame.to_string()).is_err() {
            debug!("connection gone, {object} goes with it");
        }
    }

    fn dispatch(&self, text: &str) {
        let frame: Frame = match serde_json::from_str(text) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("unreadable Kurento frame: {e}");
                return;
            }
        };
        match (frame.method.as_deref(), frame.id) {
            (Some("onEvent"), _) => self.on_event(frame.params.unwrap_or_default()),
            (Some(method), _) => debug!("ignoring Kurento request `{method}`"),
            (None, Some(id)) => self.on_response(id, frame.result, frame.error),
            (None, None) => warn!("Kurento frame without id or method"),
        }
    }

    fn on_response(&self, id: u64, result: Option<Value>, error: Option<RpcError>) {
        let (entry, abandoned) = {
            let mut pending = lock(&self.pending);
            match pending.remove(&id) {
                Some(entry) => (Some(entry), false),
                None => (None, lock(&self.abandoned).remove(&id)),
            }
        };
        let Some((method, tx)) = entry else {
            match result.as_ref().and_then(created_object) {
                Some(object) if abandoned => self.release_orphan(object),
                _ => debug!("late Kurento response {id}"),
            }
            return;
        };
        let created = method == "create";
        let outcome = match error {
            Some(error) => Err(GatewayError::Rejected {
                operation: method,
                code: error.code,
                message: error.message,
            }),
            None => {
                let result = result.unwrap_or_default();
                if let Some(session_id) = result.get("sessionId").and_then(Value::as_str) {
                    *lock(&self.session_id) = Some(session_id.to_owned());
                }
                Ok(result)
            }
        };
        if let Err(Ok(result)) = tx.send(outcome) {
            if created {
                if let Some(object) = created_object(&result) {
                    self.release_orphan(object);
                }
            }
        }
    }

    fn on_event(&self, params: Value) {
        let value = &params["value"];
        let kind = value["type"].as_str().unwrap_or_default();
        if !CANDIDATE_EVENTS.contains(&kind) {
            debug!("ignoring Kurento event {kind}");
            return;
        }
        let Some(object) = value["object"].as_str() else {
            warn!("{kind} event without an object");
            return;
        };
        let candidate = match IceCandidate::deserialize(&value["data"]["candidate"]) {
            Ok(candidate) => candidate,
            Err(e) => {
                warn!("malformed {kind} event from {object}: {e}");
                return;
            }
        };
        let mut subscribers = lock(&self.subscribers);
        if let Some(subscriber) = subscribers.get(object) {
            if subscriber.send(candidate).is_err() {
                subscribers.remove(object);
            }
        }
    }

    fn disconnected(&self) {
        self.connected.store(false, Ordering::Release);
        warn!("Kurento connection lost");
        for (_, (_, tx)) in lock(&self.pending).drain() {
            let _ = tx.send(Err(GatewayError::Disconnected));
        }
        lock(&self.abandoned).clear();
        lock(&self.subscribers).clear();
        lock(&self.children).clear();
    }
}

/// Removes a request from the pending table when its caller stops waiting.
struct PendingSlot<'a> {
    inner: &'a Inner,
    id: u64,
}

impl Drop for PendingSlot<'_> {
    fn drop(&mut self) {
        let mut pending = lock(&self.inner.pending);
        if let Some((method, _)) = pending.remove(&self.id) {
            if method == "create" {
                lock(&self.inner.abandoned).insert(self.id);
            }
        }
    }
}

/// Keep the media server session alive while the client is in use.
async fn send_pings(inner: Weak<Inner>, every: Duration) {
    let mut ticks = tokio::time::interval(every);
    ticks.tick().await;
    loop {
        ticks.tick().await;
        let Some(inner) = inner.upgrade() else {
            return;
        };
        let interval = u64::try_from(every.as_millis()).unwrap_or(u64::MAX);
        match inner.request("ping", json!({ "interval": interval })).await {
            Ok(_) => {}
            Err(GatewayError::Disconnected) => return,
            Err(e) => warn!("Kurento keepalive failed: {e}"),
        }
    }
}

fn created_object(result: &Value) -> Option<&str> {
    result.get("value").and_then(Value::as_str)
}

fn string_value(result: &Value, operation: &str) -> Result<String, GatewayError> {
    result
        .get("value")
        .and_then(Value::as_str)
        .map(str::to_owned)
        .ok_or_else(|| GatewayError::Protocol(format!("`{operation}` returned no value")))
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
