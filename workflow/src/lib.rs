mod channel;
mod config;
mod connection;
mod error;
mod fetch;
mod layout;
mod packet;
mod protocol;
mod record;
mod socketio;
mod status;
mod transport;

pub use channel::Handlers;
pub use channel::StatusChannel;
pub use channel::Subscription;
pub use channel::SubscriptionHandle;
pub use channel::SubscriptionPhase;
pub use config::ChannelConfig;
pub use config::DEFAULT_API_BASE_URL;
pub use connection::ConnectionManager;
pub use error::ChannelError;
pub use error::FetchError;
pub use error::PacketError;
pub use error::TransportError;
pub use fetch::Asset;
pub use fetch::AssetOrigin;
pub use fetch::ExecutionSnapshot;
pub use fetch::HttpStatusSource;
pub use fetch::LegacyFlags;
pub use fetch::StatusSource;
pub use layout::TranscriptLayout;
pub use packet::EnginePacket;
pub use packet::Handshake;
pub use packet::SocketPacket;
pub use protocol::ChannelVocabulary;
pub use protocol::ExecutionId;
pub use protocol::UpdateMessage;
pub use record::ExecutionRecord;
pub use socketio::ReconnectPolicy;
pub use socketio::SocketIoTransport;
pub use socketio::socket_endpoint;
pub use status::ExecutionStatus;
pub use status::LogEntry;
pub use transport::Transport;
pub use transport::TransportEvent;

use std::sync::Arc;

/// Builds a channel backed by the REST API and a Socket.IO connection, as
/// described by `config`.
pub fn connect_channel(config: &ChannelConfig) -> Result<StatusChannel, ChannelError> {
    let transport = SocketIoTransport::new(config.socket_url(), config.reconnect.clone())?;
    let source = HttpStatusSource::new(
        config.api_base_url.clone(),
        config.account.clone(),
        config.request_timeout(),
    )?;
    let manager = ConnectionManager::new(Arc::new(transport));
    Ok(StatusChannel::new(manager, Arc::new(source)).with_vocabulary(config.vocabulary))
}
