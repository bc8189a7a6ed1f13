use thiserror::Error;

/// Errors from encoding/decoding the NetString-framed JSON-RPC wire format (spec §4.8).
#[derive(Error, Debug)]
pub enum WireError {
    #[error("frame length prefix is not valid ASCII decimal: {0:?}")]
    InvalidLengthPrefix(String),

    #[error("frame exceeds maximum size of {max} bytes (got {got})")]
    FrameTooLarge { max: usize, got: usize },

    #[error("frame is missing its trailing comma terminator")]
    MissingTerminator,

    #[error("payload is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("message is missing required field {0:?}")]
    MissingField(&'static str),
}

/// Errors from the append-only replay log (spec §4.7).
#[derive(Error, Debug)]
pub enum ReplayLogError {
    #[error("I/O error on replay log segment {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("segment {path} is corrupt at byte offset {offset}: {reason}")]
    CorruptSegment {
        path: String,
        offset: u64,
        reason: String,
    },
}

/// Errors surfaced by the cluster mesh: dialing, handshaking, and relaying (spec §4.6/§4.7).
#[derive(Error, Debug)]
pub enum ClusterError {
    #[error("TLS error with peer {peer}: {source}")]
    Tls {
        peer: String,
        #[source]
        source: watchmesh_tls::TlsError,
    },

    #[error("peer presented CN {cn:?}, which has no configured endpoint")]
    UnknownPeerIdentity { cn: String },

    #[error("malformed protocol message from {peer}: {reason}")]
    ProtocolViolation { peer: String, reason: String },

    #[error("{sender} lacks required privileges for {object}")]
    AuthorizationDenied { sender: String, object: String },

    #[error(transparent)]
    Wire(#[from] WireError),

    #[error(transparent)]
    ReplayLog(#[from] ReplayLogError),
}

/// Errors from mutating a [`crate::checkable::Checkable`] (spec §4.1).
#[derive(Error, Debug)]
pub enum CheckableError {
    #[error("downtime {0} is not attached to this checkable")]
    UnknownDowntime(uuid::Uuid),

    #[error("comment {0} is not attached to this checkable")]
    UnknownComment(uuid::Uuid),

    #[error("downtime window is invalid: start {start} is after end {end}")]
    InvalidDowntimeWindow { start: f64, end: f64 },
}
