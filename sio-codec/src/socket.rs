//! Socket.IO packet types and text framing.
//!
//! Grounded on `SocketPacketType`/`SocketPacket` from the protocol
//! reference file in the retrieval pack, extended with the binary
//! placeholder scheme (`{"_placeholder":true,"num":N}`) the
//! `BinaryEvent`/`BinaryAck` packets need, which that reference left
//! as `#[allow(dead_code)]` stubs.

use serde_json::Value as JsonValue;

use sio_core::error::{SioError, SioResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketPacketType {
    Connect,
    Disconnect,
    Event,
    Ack,
    ConnectError,
    BinaryEvent,
    BinaryAck,
}

impl SocketPacketType {
    fn to_digit(self) -> u8 {
        match self {
            Self::Connect => 0,
            Self::Disconnect => 1,
            Self::Event => 2,
            Self::Ack => 3,
            Self::ConnectError => 4,
            Self::BinaryEvent => 5,
            Self::BinaryAck => 6,
        }
    }

    fn from_digit(d: u8) -> Option<Self> {
        match d {
            0 => Some(Self::Connect),
            1 => Some(Self::Disconnect),
            2 => Some(Self::Event),
            3 => Some(Self::Ack),
            4 => Some(Self::ConnectError),
            5 => Some(Self::BinaryEvent),
            6 => Some(Self::BinaryAck),
            _ => None,
        }
    }

    fn is_binary(self) -> bool {
        matches!(self, Self::BinaryEvent | Self::BinaryAck)
    }
}

/// One element of a `BinaryEvent`/`BinaryAck` payload array: either an
/// inline JSON value or a reference to the Nth attachment that follows
/// as a separate binary frame.
#[derive(Debug, Clone, PartialEq)]
pub enum PayloadElement {
    Json(JsonValue),
    AttachmentRef(usize),
}

impl PayloadElement {
    fn to_json(&self) -> JsonValue {
        match self {
            Self::Json(v) => v.clone(),
            Self::AttachmentRef(i) => serde_json::json!({ "_placeholder": true, "num": i }),
        }
    }

    fn from_json(v: &JsonValue) -> Self {
        if v.get("_placeholder").and_then(|p| p.as_bool()) == Some(true) {
            if let Some(num) = v.get("num").and_then(|n| n.as_u64()) {
                return Self::AttachmentRef(num as usize);
            }
        }
        Self::Json(v.clone())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SocketPacket {
    Connect {
        namespace: String,
        payload: Option<JsonValue>,
    },
    Disconnect {
        namespace: String,
    },
    Event {
        namespace: String,
        ack_id: Option<u64>,
        payload: JsonValue,
    },
    Ack {
        namespace: String,
        ack_id: u64,
        payload: JsonValue,
    },
    ConnectError {
        namespace: String,
        error_data: Option<JsonValue>,
    },
    BinaryEvent {
        namespace: String,
        ack_id: Option<u64>,
        payload: Vec<PayloadElement>,
        n_attachments: usize,
    },
    BinaryAck {
        namespace: String,
        ack_id: Option<u64>,
        payload: Vec<PayloadElement>,
        n_attachments: usize,
    },
}

impl SocketPacket {
    pub fn namespace(&self) -> &str {
        match self {
            Self::Connect { namespace, .. }
            | Self::Disconnect { namespace }
            | Self::Event { namespace, .. }
            | Self::Ack { namespace, .. }
            | Self::ConnectError { namespace, .. }
            | Self::BinaryEvent { namespace, .. }
            | Self::BinaryAck { namespace, .. } => namespace,
        }
    }

    pub fn packet_type(&self) -> SocketPacketType {
        match self {
            Self::Connect { .. } => SocketPacketType::Connect,
            Self::Disconnect { .. } => SocketPacketType::Disconnect,
            Self::Event { .. } => SocketPacketType::Event,
            Self::Ack { .. } => SocketPacketType::Ack,
            Self::ConnectError { .. } => SocketPacketType::ConnectError,
            Self::BinaryEvent { .. } => SocketPacketType::BinaryEvent,
            Self::BinaryAck { .. } => SocketPacketType::BinaryAck,
        }
    }

    /// Encode to the Socket.IO text frame format:
    /// `<type><nAttachments>-][/namespace,][ackId][json]`.
    pub fn encode(&self) -> String {
        let mut out = String::new();
        out.push_str(&self.packet_type().to_digit().to_string());

        if self.packet_type().is_binary() {
            let n = match self {
                Self::BinaryEvent { n_attachments, .. } | Self::BinaryAck { n_attachments, .. } => {
                    *n_attachments
                }
                _ => unreachable!(),
            };
            out.push_str(&n.to_string());
            out.push('-');
        }

        let ns = self.namespace();
        if ns != "/" {
            out.push_str(ns);
            out.push(',');
        }

        let ack_id = match self {
            Self::Event { ack_id, .. } => *ack_id,
            Self::Ack { ack_id, .. } => Some(*ack_id),
            Self::BinaryEvent { ack_id, .. } | Self::BinaryAck { ack_id, .. } => *ack_id,
            _ => None,
        };
        if let Some(id) = ack_id {
            out.push_str(&id.to_string());
        }

        let data = match self {
            Self::Connect { payload, .. } => payload.clone(),
            Self::Disconnect { .. } => None,
            Self::Event { payload, .. } => Some(payload.clone()),
            Self::Ack { payload, .. } => Some(payload.clone()),
            Self::ConnectError { error_data, .. } => error_data.clone(),
            Self::BinaryEvent { payload, .. } | Self::BinaryAck { payload, .. } => {
                Some(JsonValue::Array(payload.iter().map(|e| e.to_json()).collect()))
            }
        };
        if let Some(d) = data {
            out.push_str(&d.to_string());
        }

        out
    }

    /// Decode a Socket.IO text frame produced by [`SocketPacket::encode`].
    pub fn decode(frame: &str) -> SioResult<Self> {
        let mut chars = frame.chars();
        let digit = chars
            .next()
            .and_then(|c| c.to_digit(10))
            .ok_or_else(|| SioError::Decode("empty or non-numeric socket.io frame".into()))?;
        let kind = SocketPacketType::from_digit(digit as u8)
            .ok_or_else(|| SioError::Decode(format!("unknown socket.io packet type {digit}")))?;
        let mut rest: String = chars.collect();

        let n_attachments = if kind.is_binary() {
            let dash = rest
                .find('-')
                .ok_or_else(|| SioError::Decode("binary packet missing '-' separator".into()))?;
            let n: usize = rest[..dash]
                .parse()
                .map_err(|_| SioError::Decode("invalid attachment count".into()))?;
            rest = rest[dash + 1..].to_string();
            n
        } else {
            0
        };

        let mut namespace = "/".to_string();
        let mut cursor = 0usize;
        if rest.starts_with('/') {
            if let Some(comma) = rest.find(',') {
                namespace = rest[..comma].to_string();
                cursor = comma + 1;
            } else {
                let end = rest
                    .find(|c: char| c == '[' || c == '{' || c.is_whitespace())
                    .unwrap_or(rest.len());
                namespace = rest[..end].to_string();
                cursor = end;
            }
        }

        let remaining = &rest[cursor..];
        let data_start = remaining
            .find(|c: char| c == '[' || c == '{')
            .unwrap_or(remaining.len());

        let mut ack_id = None;
        if data_start > 0 {
            let id_str = remaining[..data_start].trim();
            if !id_str.is_empty() {
                ack_id = Some(id_str.parse::<u64>().map_err(|_| {
                    SioError::Decode(format!("invalid ack id {id_str:?}"))
                })?);
            }
        }

        let data: Option<JsonValue> = if data_start < remaining.len() {
            Some(serde_json::from_str(&remaining[data_start..])?)
        } else {
            None
        };

        Ok(match kind {
            SocketPacketType::Connect => Self::Connect { namespace, payload: data },
            SocketPacketType::Disconnect => Self::Disconnect { namespace },
            SocketPacketType::Event => Self::Event {
                namespace,
                ack_id,
                payload: data.ok_or_else(|| SioError::Decode("event missing payload".into()))?,
            },
            SocketPacketType::Ack => Self::Ack {
                namespace,
                ack_id: ack_id.ok_or_else(|| SioError::Decode("ack missing id".into()))?,
                payload: data.unwrap_or(JsonValue::Array(vec![])),
            },
            SocketPacketType::ConnectError => Self::ConnectError {
                namespace,
                error_data: data,
            },
            SocketPacketType::BinaryEvent | SocketPacketType::BinaryAck => {
                let elements = match data {
                    Some(JsonValue::Array(arr)) => {
                        arr.iter().map(PayloadElement::from_json).collect()
                    }
                    Some(other) => vec![PayloadElement::from_json(&other)],
                    None => Vec::new(),
                };
                if kind == SocketPacketType::BinaryEvent {
                    Self::BinaryEvent {
                        namespace,
                        ack_id,
                        payload: elements,
                        n_attachments,
                    }
                } else {
                    Self::BinaryAck {
                        namespace,
                        ack_id,
                        payload: elements,
                        n_attachments,
                    }
                }
            }
        })
    }

    /// Extract `(event, data)` from an `Event` packet's `[event, data]`
    /// JSON-array payload.
    pub fn as_event(&self) -> Option<(String, JsonValue)> {
        let Self::Event { payload, .. } = self else {
            return None;
        };
        let arr = payload.as_array()?;
        let event = arr.first()?.as_str()?.to_string();
        let data = arr.get(1).cloned().unwrap_or(JsonValue::Null);
        Some((event, data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_round_trips_default_namespace() {
        let p = SocketPacket::Event {
            namespace: "/".into(),
            ack_id: None,
            payload: serde_json::json!(["chat", {"message": "hi"}]),
        };
        let encoded = p.encode();
        assert_eq!(encoded, "2[\"chat\",{\"message\":\"hi\"}]");
        assert_eq!(SocketPacket::decode(&encoded).unwrap(), p);
    }

    #[test]
    fn event_round_trips_custom_namespace_and_ack() {
        let p = SocketPacket::Event {
            namespace: "/admin".into(),
            ack_id: Some(12),
            payload: serde_json::json!(["ping", 1]),
        };
        let encoded = p.encode();
        assert!(encoded.starts_with("2/admin,12["));
        let decoded = SocketPacket::decode(&encoded).unwrap();
        assert_eq!(decoded, p);
    }

    #[test]
    fn ack_round_trips() {
        let p = SocketPacket::Ack {
            namespace: "/".into(),
            ack_id: 3,
            payload: serde_json::json!([1, 2]),
        };
        let encoded = p.encode();
        assert_eq!(encoded, "33[1,2]");
        assert_eq!(SocketPacket::decode(&encoded).unwrap(), p);
    }

    #[test]
    fn binary_event_round_trips_with_placeholder() {
        let p = SocketPacket::BinaryEvent {
            namespace: "/".into(),
            ack_id: None,
            payload: vec![
                PayloadElement::Json(serde_json::json!("bin")),
                PayloadElement::AttachmentRef(0),
            ],
            n_attachments: 1,
        };
        let encoded = p.encode();
        assert!(encoded.starts_with("51-"));
        assert!(encoded.contains("_placeholder"));
        let decoded = SocketPacket::decode(&encoded).unwrap();
        assert_eq!(decoded, p);
    }

    #[test]
    fn connect_packet_with_sid_payload() {
        let p = SocketPacket::Connect {
            namespace: "/".into(),
            payload: Some(serde_json::json!({"sid": "abc"})),
        };
        let encoded = p.encode();
        assert_eq!(encoded, "0{\"sid\":\"abc\"}");
        assert_eq!(SocketPacket::decode(&encoded).unwrap(), p);
    }

    #[test]
    fn as_event_extracts_name_and_data() {
        let p = SocketPacket::Event {
            namespace: "/".into(),
            ack_id: None,
            payload: serde_json::json!(["greet", "world"]),
        };
        let (name, data) = p.as_event().unwrap();
        assert_eq!(name, "greet");
        assert_eq!(data, serde_json::json!("world"));
    }

    #[test]
    fn decode_rejects_unknown_type() {
        assert!(SocketPacket::decode("9[]").is_err());
    }

    #[test]
    fn decode_rejects_binary_without_dash() {
        assert!(SocketPacket::decode("5[]").is_err());
    }
}
