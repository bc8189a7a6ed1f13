//! NetString-framed JSON-RPC 2.0 wire format (spec §4.8): a frame is
//! `<ascii-decimal-length> ":" <json-bytes> ","`. A read yields exactly one
//! JSON object or `None` at a clean EOF.

use bytes::{Buf, BufMut, BytesMut};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::codec::{Decoder, Encoder};

use crate::error::WireError;

/// Hard cap on a single frame's payload, protecting the reader from an
/// adversarial or malfunctioning peer claiming an unbounded length prefix.
const MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RpcMessage {
    pub jsonrpc: String,
    pub method: String,
    pub params: Value,
}

impl RpcMessage {
    pub fn new(method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            method: method.into(),
            params,
        }
    }

    /// The `ts` field the router stamps onto every durable message's params.
    pub fn timestamp(&self) -> Option<f64> {
        self.params.get("ts").and_then(Value::as_f64)
    }
}

/// `tokio_util::codec::{Decoder, Encoder}` implementation for the NetString
/// frame. One `WireCodec` per TLS stream, split into read/write halves by
/// `tokio_util::codec::Framed`.
#[derive(Default)]
pub struct WireCodec {
    // Length of the frame currently being assembled, once the prefix has
    // been read; `None` while still scanning for the `:` separator.
    pending_len: Option<usize>,
}

impl Decoder for WireCodec {
    type Item = RpcMessage;
    type Error = WireError;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<RpcMessage>, WireError> {
        let len = match self.pending_len {
            Some(len) => len,
            None => {
                let Some(colon) = buf.iter().position(|&b| b == b':') else {
                    if buf.len() > 20 {
                        return Err(WireError::InvalidLengthPrefix(
                            String::from_utf8_lossy(&buf[..20]).into_owned(),
                        ));
                    }
                    return Ok(None);
                };
                let prefix = &buf[..colon];
                let digits = std::str::from_utf8(prefix)
                    .ok()
                    .and_then(|s| s.parse::<usize>().ok())
                    .ok_or_else(|| {
                        WireError::InvalidLengthPrefix(String::from_utf8_lossy(prefix).into_owned())
                    })?;
                if digits > MAX_FRAME_BYTES {
                    return Err(WireError::FrameTooLarge {
                        max: MAX_FRAME_BYTES,
                        got: digits,
                    });
                }
                buf.advance(colon + 1);
                self.pending_len = Some(digits);
                digits
            }
        };

        // payload + trailing comma terminator
        if buf.len() < len + 1 {
            return Ok(None);
        }
        if buf[len] != b',' {
            return Err(WireError::MissingTerminator);
        }

        let payload = buf.split_to(len);
        buf.advance(1); // consume the trailing comma
        self.pending_len = None;

        let message: RpcMessage = serde_json::from_slice(&payload)?;
        Ok(Some(message))
    }
}

impl Encoder<RpcMessage> for WireCodec {
    type Error = WireError;

    fn encode(&mut self, message: RpcMessage, buf: &mut BytesMut) -> Result<(), WireError> {
        let payload = serde_json::to_vec(&message)?;
        buf.reserve(payload.len() + 32);
        buf.put_slice(payload.len().to_string().as_bytes());
        buf.put_u8(b':');
        buf.put_slice(&payload);
        buf.put_u8(b',');
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn round_trips_a_single_frame() {
        let mut codec = WireCodec::default();
        let mut buf = BytesMut::new();
        let message = RpcMessage::new("cluster::HeartBeat", json!({"identity": "node-a", "ts": 1.0}));
        codec.encode(message.clone(), &mut buf).unwrap();

        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded.method, message.method);
        assert!(buf.is_empty());
    }

    #[test]
    fn decode_returns_none_on_partial_frame() {
        let mut codec = WireCodec::default();
        let mut buf = BytesMut::new();
        let message = RpcMessage::new("cluster::HeartBeat", json!({}));
        codec.encode(message, &mut buf).unwrap();
        let mut partial = buf.split_to(buf.len() - 1);
        assert!(codec.decode(&mut partial).unwrap().is_none());
    }

    #[test]
    fn rejects_frame_missing_terminator() {
        let mut codec = WireCodec::default();
        let mut buf = BytesMut::from(&b"3:abcX"[..]);
        let err = codec.decode(&mut buf).unwrap_err();
        assert!(matches!(err, WireError::MissingTerminator));
    }

    #[test]
    fn decodes_two_frames_arriving_back_to_back() {
        let mut codec = WireCodec::default();
        let mut buf = BytesMut::new();
        codec
            .encode(RpcMessage::new("a", json!({"ts": 1.0})), &mut buf)
            .unwrap();
        codec
            .encode(RpcMessage::new("b", json!({"ts": 2.0})), &mut buf)
            .unwrap();

        let first = codec.decode(&mut buf).unwrap().unwrap();
        let second = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(first.method, "a");
        assert_eq!(second.method, "b");
    }
}
