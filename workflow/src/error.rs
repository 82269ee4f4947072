use thiserror::Error;

/// Errors surfaced by the status channel.
///
/// Only [`ChannelError::EmptyExecutionId`] and [`ChannelError::NoRuntime`]
/// are returned from `open`; the rest reach callers through the `on_error`
/// handler and never stop a live subscription.
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("execution id must not be empty")]
    EmptyExecutionId,

    #[error("status channel must be opened inside a tokio runtime")]
    NoRuntime,

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Fetch(#[from] FetchError),
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("transport is not connected")]
    NotConnected,

    #[error("invalid realtime endpoint {0}")]
    InvalidEndpoint(String),

    #[error("websocket error: {0}")]
    WebSocket(String),

    #[error("handshake failed: {0}")]
    Handshake(String),

    #[error("gave up reconnecting after {attempts} attempts")]
    GaveUp { attempts: u32 },
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("failed to decode response from {url}: {reason}")]
    Decode { url: String, reason: String },

    #[error("{0} cannot be used as an api base url")]
    InvalidUrl(String),
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PacketError {
    #[error("empty packet")]
    Empty,

    #[error("unknown engine.io packet type {0:?}")]
    UnknownEngineType(char),

    #[error("unknown socket.io packet type {0:?}")]
    UnknownSocketType(char),

    #[error("binary socket.io packets are not supported")]
    Binary,

    #[error("malformed payload: {0}")]
    Payload(String),
}
