use crate::types::{CallableKey, CorrelationId, FunctionId, Rank};

pub type Result<T> = std::result::Result<T, ArpcError>;

#[derive(Debug, thiserror::Error)]
pub enum ArpcError {
    #[error("remote function is not associated with a live execution pool")]
    Unassociated,

    #[error("remote function (key={key}) already registered as fn_id={fn_id}")]
    DuplicateRegistration { key: CallableKey, fn_id: FunctionId },

    #[error("no function registered for fn_id={fn_id}")]
    UnknownFunction { fn_id: FunctionId },

    #[error("function fn_id={fn_id} failed: {reason}")]
    InvokeFailure { fn_id: FunctionId, reason: String },

    #[error("malformed message header: expected 13 bytes, got {len}")]
    MalformedHeader { len: usize },

    #[error("unknown message kind 0x{kind:02x}")]
    UnknownMessageKind { kind: u8 },

    #[error("no pending call for correlation id {correlation}")]
    UnknownCorrelation { correlation: CorrelationId },

    #[error("encode failed: {0}")]
    EncodeFailed(String),

    #[error("decode failed: {0}")]
    DecodeFailed(String),

    #[error("invalid rank {rank}: world size is {world_size}")]
    InvalidRank { rank: Rank, world_size: u32 },

    #[error("transport error: {message}")]
    Transport {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("peer {rank} disconnected unexpectedly")]
    PeerDisconnected { rank: Rank },

    #[error("barrier failed at rank {rank}: {reason}")]
    BarrierFailed { rank: Rank, reason: String },

    #[error("remote call on rank {rank} failed: {reason}")]
    RemoteFailure { rank: Rank, reason: String },

    #[error("pending call abandoned before a response arrived")]
    Abandoned,

    #[error("execution pool is shutting down")]
    ShutDown,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ArpcError {
    /// Create a `Transport` error with just a message.
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport {
            message: msg.into(),
            source: None,
        }
    }

    /// Create a `Transport` error with a message and a source error.
    pub fn transport_with_source(
        msg: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Transport {
            message: msg.into(),
            source: Some(Box::new(source)),
        }
    }
}
