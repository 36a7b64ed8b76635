//! JSON envelope codec
//!
//! Every frame is a JSON object `{"action", "user_id", "data"}` where
//! `data` is base64 text (or `null` when there is no payload). This is the
//! same shape older relay builds put on the wire, so mixed fleets keep
//! working.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::DecodeError;
use crate::message::{Action, Credentials, WireMessage, MAX_MESSAGE_SIZE};

/// Raw envelope as it appears on the wire
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub action: String,
    #[serde(default)]
    pub user_id: String,
    #[serde(default, with = "base64_data")]
    pub data: Vec<u8>,
}

impl From<&WireMessage> for Envelope {
    fn from(message: &WireMessage) -> Self {
        let data = match message {
            WireMessage::Register { credentials, .. } => credentials.to_payload().into_bytes(),
            WireMessage::ClipboardChanged { data, .. } => data.to_vec(),
            WireMessage::Ready { .. } | WireMessage::Terminate { .. } => Vec::new(),
        };

        Self {
            action: message.action().as_str().to_string(),
            user_id: message.user_id().to_string(),
            data,
        }
    }
}

impl TryFrom<Envelope> for WireMessage {
    type Error = DecodeError;

    fn try_from(envelope: Envelope) -> Result<Self, Self::Error> {
        let action = Action::from_tag(&envelope.action)
            .ok_or_else(|| DecodeError::UnknownAction(envelope.action.clone()))?;
        let user_id = envelope.user_id;

        Ok(match action {
            Action::Register => WireMessage::Register {
                user_id,
                credentials: Credentials::parse(&envelope.data)?,
            },
            Action::Ready => WireMessage::Ready { user_id },
            Action::ClipboardChanged => WireMessage::ClipboardChanged {
                user_id,
                data: Bytes::from(envelope.data),
            },
            Action::Terminate => WireMessage::Terminate { user_id },
        })
    }
}

/// Encode a message into a frame payload
pub fn encode(message: &WireMessage) -> Bytes {
    // A struct of strings and bytes always serializes.
    let json = serde_json::to_vec(&Envelope::from(message)).unwrap_or_default();
    Bytes::from(json)
}

/// Encode a message as the text of a WebSocket text frame
pub fn encode_text(message: &WireMessage) -> String {
    serde_json::to_string(&Envelope::from(message)).unwrap_or_default()
}

/// Decode a frame payload (text or binary) into a message
pub fn decode(frame: &[u8]) -> Result<WireMessage, DecodeError> {
    if frame.len() > MAX_MESSAGE_SIZE {
        return Err(DecodeError::TooLarge {
            size: frame.len(),
            max: MAX_MESSAGE_SIZE,
        });
    }

    let envelope: Envelope = serde_json::from_slice(frame)?;
    WireMessage::try_from(envelope)
}

/// Serde adapter: bytes as standard base64, `null` as empty
mod base64_data {
    use super::STANDARD;
    use base64::Engine;
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if data.is_empty() {
            serializer.serialize_none()
        } else {
            serializer.serialize_str(&STANDARD.encode(data))
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Option::<String>::deserialize(deserializer)? {
            Some(text) => STANDARD.decode(text.as_bytes()).map_err(de::Error::custom),
            None => Ok(Vec::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::SyncMode;

    #[test]
    fn test_roundtrip_every_action() {
        let messages = [
            WireMessage::Register {
                user_id: "laptop".to_string(),
                credentials: Credentials::new("alice", "00ff$abcd", SyncMode::Auto).unwrap(),
            },
            WireMessage::Ready {
                user_id: "laptop-2".to_string(),
            },
            WireMessage::clipboard_changed("laptop", Bytes::from_static(b"hello\0world")),
            WireMessage::terminate("laptop"),
        ];

        for message in messages {
            let frame = encode(&message);
            assert_eq!(decode(&frame).unwrap(), message);
            assert_eq!(decode(encode_text(&message).as_bytes()).unwrap(), message);
        }
    }

    #[test]
    fn test_wire_shape_matches_legacy_envelope() {
        let frame = encode(&WireMessage::clipboard_changed("pc", Bytes::from_static(b"hi")));
        let value: serde_json::Value = serde_json::from_slice(&frame).unwrap();
        assert_eq!(value["action"], "cbchanged");
        assert_eq!(value["user_id"], "pc");
        assert_eq!(value["data"], "aGk=");

        let frame = encode(&WireMessage::terminate("pc"));
        let value: serde_json::Value = serde_json::from_slice(&frame).unwrap();
        assert!(value["data"].is_null());
    }

    #[test]
    fn test_decode_legacy_frame_without_data() {
        let message = decode(br#"{"action":"ready","user_id":"pc"}"#).unwrap();
        assert_eq!(
            message,
            WireMessage::Ready {
                user_id: "pc".to_string()
            }
        );
    }

    #[test]
    fn test_decode_rejects_malformed() {
        assert!(matches!(decode(b"not json"), Err(DecodeError::Malformed(_))));
        assert!(matches!(
            decode(br#"{"action":"cbchanged","user_id":"pc","data":"***"}"#),
            Err(DecodeError::Malformed(_))
        ));
    }

    #[test]
    fn test_decode_unknown_action() {
        let err = decode(br#"{"action":"lsdaemonreq","user_id":"pc","data":null}"#).unwrap_err();
        assert!(matches!(err, DecodeError::UnknownAction(tag) if tag == "lsdaemonreq"));
    }

    #[test]
    fn test_decode_register_with_bad_credentials() {
        let frame = serde_json::to_vec(&Envelope {
            action: "register".to_string(),
            user_id: "pc".to_string(),
            data: b"alice".to_vec(),
        })
        .unwrap();
        assert!(matches!(
            decode(&frame),
            Err(DecodeError::InvalidCredentials(_))
        ));
    }
}
