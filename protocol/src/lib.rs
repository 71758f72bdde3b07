/*!
Types shared between browsers and the [webrtc-relay signaling server](../webrtc_relay_signaling_server/index.html).

The server brokers a WebRTC session between each browser connection and a media
server; [loopback] declares the JSON messages of that exchange.
*/

use std::fmt::{Display, Formatter};

pub mod loopback;

pub use loopback::{ClientMessage, IceCandidate, ServerMessage};

/// Identifier of one signaling session, stable for the lifetime of a call.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub struct SessionId(u128);

impl SessionId {
    pub fn new(inner: u128) -> Self {
        SessionId(inner)
    }
}

impl Display for SessionId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Seid-{:032x}", self.0)
    }
}

/// Identifier of a browser connection to the signaling server.
/// A connection owns at most one [SessionId].
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn new(inner: u64) -> Self {
        ConnectionId(inner)
    }
}

impl Display for ConnectionId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Conn-{}", self.0)
    }
}
