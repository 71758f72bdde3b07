/*!
Signaling relay brokering WebRTC sessions between browsers and a media server.

Each browser connection gets a [dispatcher::Dispatcher] that turns `start`, `stop` and
`onIceCandidate` messages into calls on the [gateway::MediaGateway], buffering browser
ICE candidates in the [candidates::CandidateQueue] until the server-side endpoint
exists. Candidates found by the media server travel back through [bridge].
*/

pub mod bridge;
pub mod candidates;
pub mod config;
pub mod connection;
pub mod dispatcher;
pub mod error;
pub mod gateway;
pub mod kurento;
pub mod registry;
pub mod state;

#[cfg(test)]
pub(crate) mod testing;
