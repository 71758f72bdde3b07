/*!
Signaling messages of the loopback topology: the browser offers a stream, the media
server echoes it back through a single WebRTC endpoint connected to itself.

Every message is a JSON object discriminated by its `id` field.
 */

use serde::{Deserialize, Serialize};

/// ICE candidate in the shape browsers produce with `RTCIceCandidate.toJSON()`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(default)]
    pub sdp_mid: Option<String>,
    #[serde(default, rename = "sdpMLineIndex")]
    pub sdp_m_line_index: Option<u16>,
}

/// Messages sent by the browser to the signaling server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "id", rename_all = "camelCase")]
pub enum ClientMessage {
    /// Begin a session: provision a pipeline and answer this SDP offer
    #[serde(rename_all = "camelCase")]
    Start { sdp_offer: String },
    /// End the session and release everything the media server holds for it
    Stop,
    /// ICE candidate discovered by the browser
    OnIceCandidate { candidate: IceCandidate },
}

/// Messages sent by the signaling server to the browser.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "id", rename_all = "camelCase")]
pub enum ServerMessage {
    /// SDP answer produced by the media server for the browser's offer
    #[serde(rename_all = "camelCase")]
    StartResponse { sdp_answer: String },
    /// ICE candidate discovered by the media server
    IceCandidate { candidate: IceCandidate },
    /// Generic error containing detailed information about the cause
    Error { message: String },
}

impl ServerMessage {
    pub fn error(message: impl Into<String>) -> Self {
        ServerMessage::Error {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_browser_messages() {
        let start: ClientMessage =
            serde_json::from_value(json!({"id": "start", "sdpOffer": "v=0"})).unwrap();
        assert_eq!(
            start,
            ClientMessage::Start {
                sdp_offer: "v=0".into()
            }
        );

        let stop: ClientMessage = serde_json::from_value(json!({"id": "stop"})).unwrap();
        assert_eq!(stop, ClientMessage::Stop);

        let candidate: ClientMessage = serde_json::from_value(json!({
            "id": "onIceCandidate",
            "candidate": {
                "candidate": "candidate:1 1 UDP 2122252543 10.0.0.2 49203 typ host",
                "sdpMid": "0",
                "sdpMLineIndex": 0
            }
        }))
        .unwrap();
        let ClientMessage::OnIceCandidate { candidate } = candidate else {
            panic!("expected a candidate message");
        };
        assert_eq!(candidate.sdp_mid.as_deref(), Some("0"));
        assert_eq!(candidate.sdp_m_line_index, Some(0));
    }

    #[test]
    fn candidate_ignores_media_server_type_tags() {
        let candidate: IceCandidate = serde_json::from_value(json!({
            "__module__": "kurento",
            "__type__": "IceCandidate",
            "candidate": "candidate:2 1 UDP 1 192.0.2.1 3478 typ relay",
            "sdpMid": "video",
            "sdpMLineIndex": 1
        }))
        .unwrap();
        assert_eq!(candidate.sdp_mid.as_deref(), Some("video"));
        assert_eq!(candidate.sdp_m_line_index, Some(1));
    }

    #[test]
    fn candidate_fields_are_optional() {
        let candidate: IceCandidate =
            serde_json::from_value(json!({"candidate": "candidate:3"})).unwrap();
        assert_eq!(candidate.sdp_mid, None);
        assert_eq!(candidate.sdp_m_line_index, None);
    }

    #[test]
    fn rejects_unknown_ids() {
        assert!(serde_json::from_value::<ClientMessage>(json!({"id": "register"})).is_err());
        assert!(serde_json::from_value::<ClientMessage>(json!({"sdpOffer": "v=0"})).is_err());
    }

    #[test]
    fn server_messages_use_browser_field_names() {
        let answer = ServerMessage::StartResponse {
            sdp_answer: "v=0".into(),
        };
        assert_eq!(
            serde_json::to_value(&answer).unwrap(),
            json!({"id": "startResponse", "sdpAnswer": "v=0"})
        );

        let candidate = ServerMessage::IceCandidate {
            candidate: IceCandidate {
                candidate: "candidate:4".into(),
                sdp_mid: Some("0".into()),
                sdp_m_line_index: Some(0),
            },
        };
        assert_eq!(
            serde_json::to_value(&candidate).unwrap(),
            json!({
                "id": "iceCandidate",
                "candidate": {"candidate": "candidate:4", "sdpMid": "0", "sdpMLineIndex": 0}
            })
        );

        assert_eq!(
            serde_json::to_value(ServerMessage::error("nope")).unwrap(),
            json!({"id": "error", "message": "nope"})
        );
    }
}
