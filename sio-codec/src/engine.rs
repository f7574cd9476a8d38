//! Engine.IO packet types and text/binary framing.
//!
//! Grounded on `EnginePacketType`/`EnginePacket` from the Socket.IO
//! protocol reference file in the retrieval pack (`open-webui`'s
//! `socketio/protocol.rs`), generalized to round-trip the full packet
//! set the Engine state machine needs (open/handshake fields, optional
//! ping/pong payloads, binary data frames).

use sio_core::error::{SioError, SioResult};

/// The seven Engine.IO packet kinds. `BinaryData`
/// never appears with a leading type digit on the wire — over
/// WebSocket it is its own binary frame, and over polling it is
/// length-prefixed in the batch — but it is still a first-class
/// `EnginePacket` value at this layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnginePacketType {
    Open,
    Close,
    Ping,
    Pong,
    Message,
    Upgrade,
    Noop,
    BinaryData,
}

impl EnginePacketType {
    fn to_digit(self) -> Option<u8> {
        match self {
            Self::Open => Some(0),
            Self::Close => Some(1),
            Self::Ping => Some(2),
            Self::Pong => Some(3),
            Self::Message => Some(4),
            Self::Upgrade => Some(5),
            Self::Noop => Some(6),
            Self::BinaryData => None,
        }
    }

    fn from_digit(d: u8) -> Option<Self> {
        match d {
            0 => Some(Self::Open),
            1 => Some(Self::Close),
            2 => Some(Self::Ping),
            3 => Some(Self::Pong),
            4 => Some(Self::Message),
            5 => Some(Self::Upgrade),
            6 => Some(Self::Noop),
            _ => None,
        }
    }
}

/// A decoded Engine.IO packet.
#[derive(Debug, Clone, PartialEq)]
pub enum EnginePacket {
    Open {
        sid: String,
        upgrades: Vec<String>,
        ping_interval: u64,
        ping_timeout: u64,
    },
    Close,
    Ping {
        payload: Option<String>,
    },
    Pong {
        payload: Option<String>,
    },
    Message {
        payload: String,
    },
    Upgrade,
    Noop,
    BinaryData {
        payload: Vec<u8>,
    },
}

impl EnginePacket {
    pub fn packet_type(&self) -> EnginePacketType {
        match self {
            Self::Open { .. } => EnginePacketType::Open,
            Self::Close => EnginePacketType::Close,
            Self::Ping { .. } => EnginePacketType::Ping,
            Self::Pong { .. } => EnginePacketType::Pong,
            Self::Message { .. } => EnginePacketType::Message,
            Self::Upgrade => EnginePacketType::Upgrade,
            Self::Noop => EnginePacketType::Noop,
            Self::BinaryData { .. } => EnginePacketType::BinaryData,
        }
    }

    /// Encode as a text frame: a single ASCII digit followed by any
    /// payload, or — for `BinaryData`, which has no digit of its own —
    /// a `b` prefix followed by the base64 of the raw bytes. This is
    /// the long-polling transport's only way to carry a binary frame,
    /// since its batched body is plain text; WebSocket instead sends
    /// `BinaryData` as its own binary frame via
    /// [`EnginePacket::encode_binary`].
    pub fn encode_text(&self) -> SioResult<String> {
        if let Self::BinaryData { payload } = self {
            use base64::Engine;
            return Ok(format!(
                "b{}",
                base64::engine::general_purpose::STANDARD.encode(payload)
            ));
        }

        let digit = self
            .packet_type()
            .to_digit()
            .expect("non-binary engine.io packets always map to a digit");

        let body = match self {
            Self::Open {
                sid,
                upgrades,
                ping_interval,
                ping_timeout,
            } => serde_json::json!({
                "sid": sid,
                "upgrades": upgrades,
                "pingInterval": ping_interval,
                "pingTimeout": ping_timeout,
            })
            .to_string(),
            Self::Close | Self::Upgrade | Self::Noop => String::new(),
            Self::Ping { payload } | Self::Pong { payload } => {
                payload.clone().unwrap_or_default()
            }
            Self::Message { payload } => payload.clone(),
            Self::BinaryData { .. } => unreachable!("checked above"),
        };

        Ok(format!("{digit}{body}"))
    }

    /// Decode a text frame produced by [`EnginePacket::encode_text`]. A
    /// leading `b` marks a base64-encoded `BinaryData` frame.
    pub fn decode_text(frame: &str) -> SioResult<Self> {
        if let Some(rest) = frame.strip_prefix('b') {
            use base64::Engine;
            let payload = base64::engine::general_purpose::STANDARD
                .decode(rest)
                .map_err(|e| SioError::Decode(format!("invalid base64 in binary frame: {e}")))?;
            return Ok(EnginePacket::BinaryData { payload });
        }

        let mut chars = frame.chars();
        let digit = chars
            .next()
            .and_then(|c| c.to_digit(10))
            .ok_or_else(|| SioError::Decode("empty or non-numeric engine.io frame".into()))?;
        let kind = EnginePacketType::from_digit(digit as u8)
            .ok_or_else(|| SioError::Decode(format!("unknown engine.io packet type {digit}")))?;
        let rest: String = chars.collect();

        Ok(match kind {
            EnginePacketType::Open => {
                let v: serde_json::Value = serde_json::from_str(&rest)?;
                EnginePacket::Open {
                    sid: v
                        .get("sid")
                        .and_then(|s| s.as_str())
                        .ok_or_else(|| SioError::Decode("open packet missing sid".into()))?
                        .to_string(),
                    upgrades: v
                        .get("upgrades")
                        .and_then(|u| u.as_array())
                        .map(|arr| {
                            arr.iter()
                                .filter_map(|e| e.as_str().map(str::to_string))
                                .collect()
                        })
                        .unwrap_or_default(),
                    ping_interval: v.get("pingInterval").and_then(|n| n.as_u64()).unwrap_or(0),
                    ping_timeout: v.get("pingTimeout").and_then(|n| n.as_u64()).unwrap_or(0),
                }
            }
            EnginePacketType::Close => EnginePacket::Close,
            EnginePacketType::Ping => EnginePacket::Ping {
                payload: if rest.is_empty() { None } else { Some(rest) },
            },
            EnginePacketType::Pong => EnginePacket::Pong {
                payload: if rest.is_empty() { None } else { Some(rest) },
            },
            EnginePacketType::Message => EnginePacket::Message { payload: rest },
            EnginePacketType::Upgrade => EnginePacket::Upgrade,
            EnginePacketType::Noop => EnginePacket::Noop,
        })
    }

    /// Encode the raw bytes of a `BinaryData` packet, for dispatch as a
    /// WebSocket binary frame.
    pub fn encode_binary(&self) -> SioResult<Vec<u8>> {
        match self {
            Self::BinaryData { payload } => Ok(payload.clone()),
            _ => Err(SioError::Decode(
                "only BinaryData packets have a binary encoding".into(),
            )),
        }
    }

    pub fn decode_binary(bytes: &[u8]) -> Self {
        Self::BinaryData {
            payload: bytes.to_vec(),
        }
    }
}

/// Split a long-polling response body into individual text frames.
/// Engine.IO v4 (protocol 4) batches frames with `\x1e` record
/// separators.
pub fn split_batch(body: &str) -> Vec<&str> {
    if body.is_empty() {
        Vec::new()
    } else {
        body.split('\u{1e}').collect()
    }
}

/// Join frames into a single polling POST/GET batch body.
pub fn join_batch(frames: &[String]) -> String {
    frames.join("\u{1e}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_and_decodes_message() {
        let p = EnginePacket::Message {
            payload: "hello".into(),
        };
        let encoded = p.encode_text().unwrap();
        assert_eq!(encoded, "4hello");
        assert_eq!(EnginePacket::decode_text(&encoded).unwrap(), p);
    }

    #[test]
    fn encodes_and_decodes_open() {
        let p = EnginePacket::Open {
            sid: "abc123".into(),
            upgrades: vec!["websocket".into()],
            ping_interval: 25000,
            ping_timeout: 20000,
        };
        let encoded = p.encode_text().unwrap();
        assert!(encoded.starts_with('0'));
        let decoded = EnginePacket::decode_text(&encoded).unwrap();
        assert_eq!(decoded, p);
    }

    #[test]
    fn ping_pong_without_payload_round_trip() {
        let p = EnginePacket::Ping { payload: None };
        assert_eq!(p.encode_text().unwrap(), "2");
        assert_eq!(EnginePacket::decode_text("2").unwrap(), p);

        let pong = EnginePacket::Pong {
            payload: Some("probe".into()),
        };
        assert_eq!(pong.encode_text().unwrap(), "3probe");
    }

    #[test]
    fn decode_rejects_unknown_type_digit() {
        assert!(EnginePacket::decode_text("9x").is_err());
    }

    #[test]
    fn decode_rejects_empty_frame() {
        assert!(EnginePacket::decode_text("").is_err());
    }

    #[test]
    fn binary_data_round_trips_through_raw_bytes() {
        let p = EnginePacket::BinaryData {
            payload: vec![1, 2, 3, 4],
        };
        let bytes = p.encode_binary().unwrap();
        assert_eq!(EnginePacket::decode_binary(&bytes), p);
    }

    #[test]
    fn binary_data_round_trips_through_base64_text_frame() {
        let p = EnginePacket::BinaryData {
            payload: vec![0, 1, 2, 253, 254, 255],
        };
        let encoded = p.encode_text().unwrap();
        assert!(encoded.starts_with('b'));
        assert_eq!(EnginePacket::decode_text(&encoded).unwrap(), p);
    }

    #[test]
    fn split_and_join_batch_round_trip() {
        let frames = vec!["0{}".to_string(), "4hi".to_string()];
        let body = join_batch(&frames);
        let split: Vec<String> = split_batch(&body).into_iter().map(String::from).collect();
        assert_eq!(split, frames);
    }
}
