//! Reassembly of a Socket.IO binary packet from its placeholder header
//! plus N binary attachment frames.

use serde_json::Value as JsonValue;
use sio_codec::{PayloadElement, SocketPacket};
use sio_core::error::{SioError, SioResult};

/// One element of a reconstructed message: either a value carried
/// inline in the header's JSON payload, or raw bytes from an
/// attachment frame.
#[derive(Debug, Clone, PartialEq)]
pub enum DataElement {
    Json(JsonValue),
    Bytes(Vec<u8>),
}

/// The fully reassembled message, handed to the namespace socket's
/// ack/event dispatch.
#[derive(Debug, Clone)]
pub struct ReconstructedMessage {
    pub is_ack: bool,
    pub ack_id: Option<u64>,
    pub elements: Vec<DataElement>,
}

/// Ephemeral state tracking one in-progress binary packet.
pub struct BinaryReconstructor {
    payload: Vec<PayloadElement>,
    ack_id: Option<u64>,
    is_ack: bool,
    n_attachments: usize,
    buffers: Vec<Vec<u8>>,
}

impl BinaryReconstructor {
    /// Seed a reconstructor from a `BinaryEvent`/`BinaryAck` header
    /// packet. Any other packet kind is a programmer error.
    pub fn new(header: &SocketPacket) -> SioResult<Self> {
        match header {
            SocketPacket::BinaryEvent {
                ack_id,
                payload,
                n_attachments,
                ..
            } => Ok(Self {
                payload: payload.clone(),
                ack_id: *ack_id,
                is_ack: false,
                n_attachments: *n_attachments,
                buffers: Vec::with_capacity(*n_attachments),
            }),
            SocketPacket::BinaryAck {
                ack_id,
                payload,
                n_attachments,
                ..
            } => Ok(Self {
                payload: payload.clone(),
                ack_id: *ack_id,
                is_ack: true,
                n_attachments: *n_attachments,
                buffers: Vec::with_capacity(*n_attachments),
            }),
            _ => Err(SioError::InvalidArgument(
                "BinaryReconstructor requires a BinaryEvent or BinaryAck header".into(),
            )),
        }
    }

    /// Number of attachments still expected.
    pub fn remaining(&self) -> usize {
        self.n_attachments.saturating_sub(self.buffers.len())
    }

    /// Feed the next attachment frame. Returns the reassembled message
    /// once the expected attachment count is reached.
    pub fn add(&mut self, buffer: Vec<u8>) -> SioResult<Option<ReconstructedMessage>> {
        if self.buffers.len() >= self.n_attachments {
            return Err(SioError::InvalidState(
                "received a BinaryData frame with no active reconstructor slot".into(),
            ));
        }
        self.buffers.push(buffer);

        if self.buffers.len() == self.n_attachments {
            let elements = self
                .payload
                .iter()
                .map(|e| match e {
                    PayloadElement::Json(v) => DataElement::Json(v.clone()),
                    PayloadElement::AttachmentRef(i) => DataElement::Bytes(
                        self.buffers
                            .get(*i)
                            .cloned()
                            .unwrap_or_default(),
                    ),
                })
                .collect();
            Ok(Some(ReconstructedMessage {
                is_ack: self.is_ack,
                ack_id: self.ack_id,
                elements,
            }))
        } else {
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header() -> SocketPacket {
        SocketPacket::BinaryEvent {
            namespace: "/".into(),
            ack_id: None,
            payload: vec![
                PayloadElement::Json(serde_json::json!("bin")),
                PayloadElement::AttachmentRef(0),
            ],
            n_attachments: 1,
        }
    }

    #[test]
    fn reconstructs_after_expected_attachment_count() {
        let mut r = BinaryReconstructor::new(&header()).unwrap();
        assert_eq!(r.remaining(), 1);
        let result = r.add(vec![1, 2, 3]).unwrap();
        let msg = result.expect("should complete after one attachment");
        assert!(!msg.is_ack);
        assert_eq!(
            msg.elements,
            vec![
                DataElement::Json(serde_json::json!("bin")),
                DataElement::Bytes(vec![1, 2, 3]),
            ]
        );
    }

    #[test]
    fn rejects_extra_attachment_past_expected_count() {
        let mut r = BinaryReconstructor::new(&header()).unwrap();
        r.add(vec![1]).unwrap();
        assert!(r.add(vec![2]).is_err());
    }

    #[test]
    fn rejects_non_binary_header() {
        let plain = SocketPacket::Event {
            namespace: "/".into(),
            ack_id: None,
            payload: serde_json::json!(["x"]),
        };
        assert!(BinaryReconstructor::new(&plain).is_err());
    }

    #[test]
    fn multiple_attachments_reassemble_in_order() {
        let header = SocketPacket::BinaryAck {
            namespace: "/".into(),
            ack_id: Some(7),
            payload: vec![
                PayloadElement::AttachmentRef(1),
                PayloadElement::AttachmentRef(0),
            ],
            n_attachments: 2,
        };
        let mut r = BinaryReconstructor::new(&header).unwrap();
        assert!(r.add(vec![0xA]).unwrap().is_none());
        let msg = r.add(vec![0xB]).unwrap().unwrap();
        assert!(msg.is_ack);
        assert_eq!(msg.ack_id, Some(7));
        assert_eq!(
            msg.elements,
            vec![DataElement::Bytes(vec![0xB]), DataElement::Bytes(vec![0xA])]
        );
    }
}
