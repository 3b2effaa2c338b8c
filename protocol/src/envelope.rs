//! # Wire Envelope
//!
//! The one message shape that crosses a socket: [`Envelope`]. Everything
//! else — `cast`, `call`, `GenServer` events, gossip updates — is carried
//! as the `data` field of one or more envelopes sharing a [`StreamDesc`].

use serde::{Deserialize, Serialize};

use crate::identity::Node;

/// A payload as a caller hands it to `NetKernel::cast`/`call`. Internally
/// every variant is coerced into one or more framed chunks before hitting
/// the wire — see `transport::kernel::NetKernel::frame_payload`.
///
/// `Chunks` models a caller-supplied byte-chunk stream as an already
/// materialized list rather than an async `Stream` object: this crate has
/// no use case that needs backpressure on the producer side, and a `Vec`
/// keeps `cast`/`call` signatures free of an extra generic parameter.
#[derive(Debug, Clone)]
pub enum Payload {
    Bytes(Vec<u8>),
    Text(String),
    Chunks(Vec<Vec<u8>>),
}

impl Payload {
    /// Splits this payload into the ordered list of chunks a stream sender
    /// will emit, each as the bytes of one non-final frame.
    pub fn into_chunks(self) -> Vec<Vec<u8>> {
        match self {
            Payload::Bytes(b) => vec![b],
            Payload::Text(s) => vec![s.into_bytes()],
            Payload::Chunks(chunks) => chunks,
        }
    }
}

impl From<Vec<u8>> for Payload {
    fn from(b: Vec<u8>) -> Self {
        Payload::Bytes(b)
    }
}

impl From<&str> for Payload {
    fn from(s: &str) -> Self {
        Payload::Text(s.to_string())
    }
}

impl From<String> for Payload {
    fn from(s: String) -> Self {
        Payload::Text(s)
    }
}

/// Tagged byte sequence matching the wire's `{"type":"Buffer","data":[...]}`
/// representation, so a byte payload is visibly distinct from a JSON string
/// or number to a receiver that only partially understands the envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "BufferRepr", into = "BufferRepr")]
pub struct WireBytes(pub Vec<u8>);

#[derive(Debug, Clone, Serialize, Deserialize)]
struct BufferRepr {
    #[serde(rename = "type")]
    kind: String,
    data: Vec<u8>,
}

impl TryFrom<BufferRepr> for WireBytes {
    type Error = String;

    fn try_from(repr: BufferRepr) -> Result<Self, Self::Error> {
        if repr.kind != "Buffer" {
            return Err(format!("expected Buffer tag, got {:?}", repr.kind));
        }
        Ok(WireBytes(repr.data))
    }
}

impl From<WireBytes> for BufferRepr {
    fn from(bytes: WireBytes) -> Self {
        BufferRepr {
            kind: "Buffer".to_string(),
            data: bytes.0,
        }
    }
}

/// A JSON-encodable error carried in a [`StreamDesc`] or returned from a
/// failed `call`. Mirrors spec: a `message`, an `_error: true` marker so a
/// receiver can distinguish it from a legitimate payload shaped like an
/// object, any caller-supplied structured fields, and — outside production
/// mode — a `stack` string for local debugging.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncodedError {
    pub message: String,
    #[serde(rename = "_error")]
    pub is_error: bool,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub fields: serde_json::Map<String, serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
}

impl EncodedError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            is_error: true,
            fields: serde_json::Map::new(),
            stack: None,
        }
    }

    /// Attaches the current backtrace as `stack`, unless `production` mode
    /// is enabled (in which case stacks are never exposed to peers).
    pub fn with_stack_unless_production(mut self, production: bool) -> Self {
        if !production {
            self.stack = Some(std::backtrace::Backtrace::force_capture().to_string());
        }
        self
    }
}

impl std::fmt::Display for EncodedError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for EncodedError {}

/// Stream bookkeeping attached to every chunk. A stream ends the moment a
/// chunk arrives with `done: true`; `error` being present always implies
/// `done: true`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamDesc {
    pub stream: String,
    pub done: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<EncodedError>,
}

impl StreamDesc {
    pub fn new(stream_id: impl Into<String>) -> Self {
        Self {
            stream: stream_id.into(),
            done: false,
            error: None,
        }
    }

    pub fn chunk(stream_id: impl Into<String>) -> Self {
        Self::new(stream_id)
    }

    pub fn finish(stream_id: impl Into<String>) -> Self {
        Self {
            stream: stream_id.into(),
            done: true,
            error: None,
        }
    }

    pub fn fail(stream_id: impl Into<String>, error: EncodedError) -> Self {
        Self {
            stream: stream_id.into(),
            done: true,
            error: Some(error),
        }
    }
}

/// The one message shape that crosses a socket.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    /// Target handler name on the receiver.
    pub id: String,
    /// Sender's self-node.
    pub from: Node,
    /// Return route for synchronous replies; `None` for `cast`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    pub stream: StreamDesc,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<WireBytes>,
    #[serde(rename = "checkSum", skip_serializing_if = "Option::is_none")]
    pub check_sum: Option<String>,
}

impl Envelope {
    pub fn new(id: impl Into<String>, from: Node, stream: StreamDesc) -> Self {
        Self {
            id: id.into(),
            from,
            tag: None,
            stream,
            data: None,
            check_sum: None,
        }
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    pub fn with_data(mut self, data: Vec<u8>) -> Self {
        self.data = Some(WireBytes(data));
        self
    }

    pub fn data_bytes(&self) -> &[u8] {
        self.data.as_ref().map(|w| w.0.as_slice()).unwrap_or(&[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_node() -> Node {
        Node::new("n1", "127.0.0.1", 9000)
    }

    #[test]
    fn wire_bytes_encode_as_tagged_buffer() {
        let env = Envelope::new("h", sample_node(), StreamDesc::finish("s1"))
            .with_data(vec![1, 2, 3]);
        let json = serde_json::to_value(&env).unwrap();
        assert_eq!(json["data"]["type"], "Buffer");
        assert_eq!(json["data"]["data"], serde_json::json!([1, 2, 3]));
    }

    #[test]
    fn envelope_round_trips_through_json() {
        let env = Envelope::new("h", sample_node(), StreamDesc::chunk("s1"))
            .with_tag("tag-1")
            .with_data(b"hello".to_vec());
        let json = serde_json::to_string(&env).unwrap();
        let parsed: Envelope = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.id, env.id);
        assert_eq!(parsed.tag, env.tag);
        assert_eq!(parsed.data_bytes(), b"hello");
    }

    #[test]
    fn stream_desc_done_with_error_carries_message() {
        let desc = StreamDesc::fail("s1", EncodedError::new("boom"));
        assert!(desc.done);
        assert_eq!(desc.error.as_ref().unwrap().message, "boom");
    }

    #[test]
    fn payload_variants_split_into_expected_chunks() {
        assert_eq!(Payload::Bytes(vec![1, 2]).into_chunks(), vec![vec![1, 2]]);
        assert_eq!(
            Payload::Text("hi".into()).into_chunks(),
            vec!["hi".as_bytes().to_vec()]
        );
        assert_eq!(
            Payload::Chunks(vec![vec![1], vec![2]]).into_chunks(),
            vec![vec![1], vec![2]]
        );
    }
}
