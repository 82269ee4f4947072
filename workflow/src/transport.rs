use crate::error::TransportError;
use serde_json::Value;
use tokio::sync::mpsc::UnboundedSender;

/// What a transport reports back to its owner.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// The connection is ready for emits. `reconnect` is false only for the
    /// first successful connection after [`Transport::connect`].
    Connected { reconnect: bool },
    Disconnected { reason: String },
    Message { event: String, payload: Value },
    /// The transport exhausted its reconnection attempts and stopped.
    GaveUp { attempts: u32 },
}

/// A multiplexed realtime connection.
///
/// Calls never block: `connect` starts the connection in the background and
/// reports progress through `events`, `disconnect` stops it. A transport may
/// be connected again after a disconnect, with a fresh event sender.
pub trait Transport: Send + Sync + 'static {
    fn connect(&self, events: UnboundedSender<TransportEvent>);

    fn disconnect(&self);

    fn emit(&self, event: &str, payload: Value) -> Result<(), TransportError>;
}
