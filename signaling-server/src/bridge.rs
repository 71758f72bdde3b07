use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use log::debug;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use webrtc_relay_protocol::{ConnectionId, IceCandidate, ServerMessage, SessionId};

/// Outbound queue of one browser connection.
pub type Outbox = mpsc::UnboundedSender<ServerMessage>;

/// Forward candidates discovered by the media server to the connection that owns the session.
///
/// The task ends with the candidate stream, or as soon as the connection's outbox is
/// closed. Send failures are swallowed.
pub fn spawn(
    connection: ConnectionId,
    session: SessionId,
    mut candidates: BoxStream<'static, IceCandidate>,
    outbox: Outbox,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(candidate) = candidates.next().await {
            if outbox.is_closed() {
                break;
            }
            debug!("{session}: server candidate for {connection}: {}", candidate.candidate);
            if outbox.send(ServerMessage::IceCandidate { candidate }).is_err() {
                break;
            }
        }
        debug!("{session}: candidate bridge to {connection} finished");
    })
}
