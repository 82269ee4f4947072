use crate::error::TransportError;
use crate::packet::EnginePacket;
use crate::packet::SocketPacket;
use crate::transport::Transport;
use crate::transport::TransportEvent;
use futures::SinkExt;
use futures::Stream;
use futures::StreamExt;
use parking_lot::Mutex;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::mpsc::UnboundedSender;
use tokio::time::Instant;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::info;
use tracing::warn;
use url::Url;

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Bounded exponential backoff between connection attempts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectPolicy {
    /// Consecutive failed attempts tolerated before giving up.
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff_ms: 1_000,
            max_backoff_ms: 5_000,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before the attempt following `failures` consecutive failures.
    pub fn backoff(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1).min(16);
        let delay = self.initial_backoff_ms.saturating_mul(1_u64 << exponent);
        Duration::from_millis(delay.min(self.max_backoff_ms))
    }
}

/// Socket.IO endpoint for a server base url, e.g.
/// `http://host:8006` becomes `ws://host:8006/socket.io/?EIO=4&transport=websocket`.
pub fn socket_endpoint(base: &Url) -> Result<Url, TransportError> {
    let scheme = match base.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => {
            return Err(TransportError::InvalidEndpoint(format!(
                "unsupported scheme {other} in {base}"
            )));
        }
    };
    let mut endpoint = base.clone();
    endpoint
        .set_scheme(scheme)
        .map_err(|()| TransportError::InvalidEndpoint(base.to_string()))?;
    endpoint.set_path("/socket.io/");
    endpoint.set_query(Some("EIO=4&transport=websocket"));
    endpoint.set_fragment(None);
    Ok(endpoint)
}

struct ActiveConnection {
    cancel: CancellationToken,
    outbound: UnboundedSender<SocketPacket>,
}

/// [`Transport`] speaking Socket.IO over a single WebSocket.
pub struct SocketIoTransport {
    endpoint: Url,
    policy: ReconnectPolicy,
    active: Mutex<Option<ActiveConnection>>,
}

impl SocketIoTransport {
    pub fn new(base: &Url, policy: ReconnectPolicy) -> Result<Self, TransportError> {
        Ok(Self {
            endpoint: socket_endpoint(base)?,
            policy,
            active: Mutex::new(None),
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

impl Transport for SocketIoTransport {
    fn connect(&self, events: UnboundedSender<TransportEvent>) {
        let mut active = self.active.lock();
        if let Some(previous) = active.take() {
            previous.cancel.cancel();
        }
        let cancel = CancellationToken::new();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        tokio::spawn(run_connection(
            self.endpoint.clone(),
            self.policy.clone(),
            cancel.clone(),
            outbound_rx,
            events,
        ));
        *active = Some(ActiveConnection {
            cancel,
            outbound: outbound_tx,
        });
    }

    fn disconnect(&self) {
        if let Some(active) = self.active.lock().take() {
            debug!(endpoint = %self.endpoint, "disconnecting realtime transport");
            active.cancel.cancel();
        }
    }

    fn emit(&self, event: &str, payload: Value) -> Result<(), TransportError> {
        let active = self.active.lock();
        let Some(active) = active.as_ref() else {
            return Err(TransportError::NotConnected);
        };
        active
            .outbound
            .send(SocketPacket::event(event, payload))
            .map_err(|_| TransportError::NotConnected)
    }
}

async fn run_connection(
    endpoint: Url,
    policy: ReconnectPolicy,
    cancel: CancellationToken,
    mut outbound: UnboundedReceiver<SocketPacket>,
    events: UnboundedSender<TransportEvent>,
) {
    let mut failures: u32 = 0;
    let mut reconnect = false;
    loop {
        let outcome = tokio::select! {
            _ = cancel.cancelled() => return,
            outcome = run_session(&endpoint, &mut outbound, &events, reconnect) => outcome,
        };
        match outcome {
            Ok(reason) => {
                info!(%endpoint, %reason, "realtime connection lost");
                let _ = events.send(TransportEvent::Disconnected { reason });
                failures = 0;
                reconnect = true;
            }
            Err(err) => {
                failures += 1;
                warn!(%endpoint, attempt = failures, "realtime connection failed: {err}");
            }
        }
        if failures >= policy.max_attempts {
            warn!(%endpoint, attempts = failures, "giving up on realtime connection");
            let _ = events.send(TransportEvent::GaveUp { attempts: failures });
            return;
        }
        let delay = policy.backoff(failures.max(1));
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

/// Runs one WebSocket session. Errors mean the session never reached the
/// connected state; `Ok` carries the reason a connected session ended.
async fn run_session(
    endpoint: &Url,
    outbound: &mut UnboundedReceiver<SocketPacket>,
    events: &UnboundedSender<TransportEvent>,
    reconnect: bool,
) -> Result<String, TransportError> {
    let (mut ws, _) = connect_async(endpoint.as_str())
        .await
        .map_err(|err| TransportError::WebSocket(err.to_string()))?;

    let handshake = tokio::time::timeout(HANDSHAKE_TIMEOUT, async {
        let handshake = match next_packet(&mut ws).await? {
            EnginePacket::Open(handshake) => handshake,
            other => {
                return Err(TransportError::Handshake(format!(
                    "expected open packet, got {other:?}"
                )));
            }
        };
        send_packet(&mut ws, EnginePacket::Message(SocketPacket::connect())).await?;
        loop {
            match next_packet(&mut ws).await? {
                EnginePacket::Message(SocketPacket::Connect { .. }) => return Ok(handshake),
                EnginePacket::Message(SocketPacket::ConnectError { payload, .. }) => {
                    return Err(TransportError::Handshake(format!(
                        "namespace rejected: {}",
                        payload.unwrap_or(Value::Null)
                    )));
                }
                EnginePacket::Ping(data) => send_packet(&mut ws, EnginePacket::Pong(data)).await?,
                _ => {}
            }
        }
    })
    .await
    .map_err(|_| TransportError::Handshake("timed out".to_string()))??;

    debug!(%endpoint, sid = %handshake.sid, reconnect, "realtime transport connected");
    let _ = events.send(TransportEvent::Connected { reconnect });

    // The server pings every `ping_interval`; silence past the timeout means
    // the connection is dead even if TCP has not noticed yet.
    let liveness = Duration::from_millis(handshake.ping_interval + handshake.ping_timeout);
    let deadline = tokio::time::sleep(liveness);
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = &mut deadline => return Ok("ping timeout".to_string()),
            Some(packet) = outbound.recv() => {
                if let Err(err) = send_packet(&mut ws, EnginePacket::Message(packet)).await {
                    return Ok(err.to_string());
                }
            }
            frame = ws.next() => match frame {
                Some(Ok(Message::Text(text))) => match EnginePacket::decode(&text) {
                    Ok(EnginePacket::Ping(data)) => {
                        deadline.as_mut().reset(Instant::now() + liveness);
                        if let Err(err) = send_packet(&mut ws, EnginePacket::Pong(data)).await {
                            return Ok(err.to_string());
                        }
                    }
                    Ok(EnginePacket::Message(SocketPacket::Event { name, args, .. })) => {
                        let payload = args.into_iter().next().unwrap_or(Value::Null);
                        let _ = events.send(TransportEvent::Message { event: name, payload });
                    }
                    Ok(EnginePacket::Message(SocketPacket::Disconnect { .. }))
                    | Ok(EnginePacket::Close) => return Ok("server closed the session".to_string()),
                    Ok(_) => {}
                    Err(err) => warn!(%endpoint, "dropping undecodable frame: {err}"),
                },
                Some(Ok(Message::Close(_))) | None => {
                    return Ok("websocket closed".to_string());
                }
                Some(Ok(_)) => {}
                Some(Err(err)) => return Ok(err.to_string()),
            },
        }
    }
}

async fn next_packet<S>(ws: &mut S) -> Result<EnginePacket, TransportError>
where
    S: Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
{
    loop {
        match ws.next().await {
            Some(Ok(Message::Text(text))) => {
                return EnginePacket::decode(&text)
                    .map_err(|err| TransportError::Handshake(err.to_string()));
            }
            Some(Ok(Message::Close(_))) | None => {
                return Err(TransportError::WebSocket(
                    "closed during handshake".to_string(),
                ));
            }
            Some(Ok(_)) => {}
            Some(Err(err)) => return Err(TransportError::WebSocket(err.to_string())),
        }
    }
}

async fn send_packet<S>(ws: &mut S, packet: EnginePacket) -> Result<(), TransportError>
where
    S: futures::Sink<Message, Error = tungstenite::Error> + Unpin,
{
    ws.send(Message::Text(packet.encode()))
        .await
        .map_err(|err| TransportError::WebSocket(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn endpoint_switches_scheme_and_path() {
        let base = Url::parse("http://localhost:8006/api").expect("url");
        let endpoint = socket_endpoint(&base).expect("endpoint");
        assert_eq!(
            endpoint.as_str(),
            "ws://localhost:8006/socket.io/?EIO=4&transport=websocket"
        );
        let secure = socket_endpoint(&Url::parse("https://docs.example.com").expect("url"))
            .expect("endpoint");
        assert_eq!(secure.scheme(), "wss");
    }

    #[test]
    fn endpoint_rejects_other_schemes() {
        let base = Url::parse("ftp://example.com").expect("url");
        assert!(matches!(
            socket_endpoint(&base),
            Err(TransportError::InvalidEndpoint(_))
        ));
    }

    #[test]
    fn backoff_doubles_until_capped() {
        let policy = ReconnectPolicy {
            max_attempts: 10,
            initial_backoff_ms: 500,
            max_backoff_ms: 3_000,
        };
        assert_eq!(policy.backoff(1), Duration::from_millis(500));
        assert_eq!(policy.backoff(2), Duration::from_millis(1_000));
        assert_eq!(policy.backoff(3), Duration::from_millis(2_000));
        assert_eq!(policy.backoff(4), Duration::from_millis(3_000));
        assert_eq!(policy.backoff(40), Duration::from_millis(3_000));
    }

    #[test]
    fn emit_without_connection_fails() {
        let base = Url::parse("http://localhost:8006").expect("url");
        let transport =
            SocketIoTransport::new(&base, ReconnectPolicy::default()).expect("transport");
        assert_eq!(
            transport.emit("join_workflow", Value::Null),
            Err(TransportError::NotConnected)
        );
    }
}
