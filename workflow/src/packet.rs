//! Text framing for Engine.IO v4 carrying Socket.IO v5 packets.
//!
//! Each WebSocket text frame holds one Engine.IO packet: a single type digit
//! followed by its data. Engine.IO `message` packets (`4`) wrap a Socket.IO
//! packet, itself a type digit, an optional `/namespace,` prefix, an
//! optional ack id and a JSON body, e.g. `42["workflow_update",{"log":"…"}]`.

use crate::error::PacketError;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

pub const DEFAULT_NAMESPACE: &str = "/";

/// Server greeting sent as the first Engine.IO packet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Handshake {
    pub sid: String,
    #[serde(default)]
    pub upgrades: Vec<String>,
    pub ping_interval: u64,
    pub ping_timeout: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_payload: Option<u64>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EnginePacket {
    Open(Handshake),
    Close,
    Ping(String),
    Pong(String),
    Message(SocketPacket),
    Upgrade,
    Noop,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SocketPacket {
    Connect {
        namespace: String,
        payload: Option<Value>,
    },
    Disconnect {
        namespace: String,
    },
    Event {
        namespace: String,
        ack_id: Option<u64>,
        name: String,
        args: Vec<Value>,
    },
    Ack {
        namespace: String,
        ack_id: u64,
        args: Vec<Value>,
    },
    ConnectError {
        namespace: String,
        payload: Option<Value>,
    },
}

impl SocketPacket {
    pub fn connect() -> Self {
        Self::Connect {
            namespace: DEFAULT_NAMESPACE.to_string(),
            payload: None,
        }
    }

    pub fn event(name: impl Into<String>, payload: Value) -> Self {
        Self::Event {
            namespace: DEFAULT_NAMESPACE.to_string(),
            ack_id: None,
            name: name.into(),
            args: vec![payload],
        }
    }

    fn namespace(&self) -> &str {
        match self {
            Self::Connect { namespace, .. }
            | Self::Disconnect { namespace }
            | Self::Event { namespace, .. }
            | Self::Ack { namespace, .. }
            | Self::ConnectError { namespace, .. } => namespace,
        }
    }

    fn type_digit(&self) -> char {
        match self {
            Self::Connect { .. } => '0',
            Self::Disconnect { .. } => '1',
            Self::Event { .. } => '2',
            Self::Ack { .. } => '3',
            Self::ConnectError { .. } => '4',
        }
    }

    pub fn encode(&self) -> String {
        let mut out = String::new();
        out.push(self.type_digit());
        let namespace = self.namespace();
        if namespace != DEFAULT_NAMESPACE {
            out.push_str(namespace);
            out.push(',');
        }
        match self {
            Self::Connect { payload, .. } | Self::ConnectError { payload, .. } => {
                if let Some(payload) = payload {
                    out.push_str(&payload.to_string());
                }
            }
            Self::Disconnect { .. } => {}
            Self::Event {
                ack_id, name, args, ..
            } => {
                if let Some(ack_id) = ack_id {
                    out.push_str(&ack_id.to_string());
                }
                let mut body = Vec::with_capacity(args.len() + 1);
                body.push(Value::String(name.clone()));
                body.extend(args.iter().cloned());
                out.push_str(&Value::Array(body).to_string());
            }
            Self::Ack { ack_id, args, .. } => {
                out.push_str(&ack_id.to_string());
                out.push_str(&Value::Array(args.clone()).to_string());
            }
        }
        out
    }

    pub fn decode(text: &str) -> Result<Self, PacketError> {
        let mut chars = text.chars();
        let kind = chars.next().ok_or(PacketError::Empty)?;
        match kind {
            '0'..='4' => {}
            '5' | '6' => return Err(PacketError::Binary),
            other => return Err(PacketError::UnknownSocketType(other)),
        }
        let rest = chars.as_str();

        let (namespace, rest) = match rest.strip_prefix('/') {
            Some(_) => match rest.split_once(',') {
                Some((namespace, rest)) => (namespace.to_string(), rest),
                None => (rest.to_string(), ""),
            },
            None => (DEFAULT_NAMESPACE.to_string(), rest),
        };

        let digits = rest.chars().take_while(char::is_ascii_digit).count();
        let (ack_digits, body) = rest.split_at(digits);
        let ack_id = if ack_digits.is_empty() {
            None
        } else {
            Some(
                ack_digits
                    .parse::<u64>()
                    .map_err(|err| PacketError::Payload(err.to_string()))?,
            )
        };
        let data = if body.is_empty() {
            None
        } else {
            Some(
                serde_json::from_str::<Value>(body)
                    .map_err(|err| PacketError::Payload(err.to_string()))?,
            )
        };

        match kind {
            '0' => Ok(Self::Connect {
                namespace,
                payload: data,
            }),
            '1' => Ok(Self::Disconnect { namespace }),
            '2' => {
                let mut args = match data {
                    Some(Value::Array(args)) => args,
                    _ => return Err(PacketError::Payload("event body must be an array".into())),
                };
                if args.is_empty() {
                    return Err(PacketError::Payload("event without a name".into()));
                }
                let name = match args.remove(0) {
                    Value::String(name) => name,
                    other => {
                        return Err(PacketError::Payload(format!(
                            "event name must be a string, got {other}"
                        )));
                    }
                };
                Ok(Self::Event {
                    namespace,
                    ack_id,
                    name,
                    args,
                })
            }
            '3' => {
                let ack_id =
                    ack_id.ok_or_else(|| PacketError::Payload("ack without an id".into()))?;
                let args = match data {
                    Some(Value::Array(args)) => args,
                    None => Vec::new(),
                    Some(other) => vec![other],
                };
                Ok(Self::Ack {
                    namespace,
                    ack_id,
                    args,
                })
            }
            _ => Ok(Self::ConnectError {
                namespace,
                payload: data,
            }),
        }
    }
}

impl EnginePacket {
    pub fn encode(&self) -> String {
        match self {
            Self::Open(handshake) => {
                let body = serde_json::to_string(handshake).unwrap_or_default();
                format!("0{body}")
            }
            Self::Close => "1".to_string(),
            Self::Ping(data) => format!("2{data}"),
            Self::Pong(data) => format!("3{data}"),
            Self::Message(packet) => format!("4{}", packet.encode()),
            Self::Upgrade => "5".to_string(),
            Self::Noop => "6".to_string(),
        }
    }

    pub fn decode(text: &str) -> Result<Self, PacketError> {
        let mut chars = text.chars();
        let kind = chars.next().ok_or(PacketError::Empty)?;
        let rest = chars.as_str();
        match kind {
            '0' => serde_json::from_str(rest)
                .map(Self::Open)
                .map_err(|err| PacketError::Payload(err.to_string())),
            '1' => Ok(Self::Close),
            '2' => Ok(Self::Ping(rest.to_string())),
            '3' => Ok(Self::Pong(rest.to_string())),
            '4' => SocketPacket::decode(rest).map(Self::Message),
            '5' => Ok(Self::Upgrade),
            '6' => Ok(Self::Noop),
            other => Err(PacketError::UnknownEngineType(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn decodes_open_handshake() {
        let packet = EnginePacket::decode(
            r#"0{"sid":"lv_VI97HAXpY6yYWAAAC","upgrades":[],"pingInterval":25000,"pingTimeout":20000,"maxPayload":1000000}"#,
        )
        .expect("decode");
        let EnginePacket::Open(handshake) = packet else {
            panic!("expected open packet, got {packet:?}");
        };
        assert_eq!(handshake.sid, "lv_VI97HAXpY6yYWAAAC");
        assert_eq!(handshake.ping_interval, 25_000);
        assert_eq!(handshake.ping_timeout, 20_000);
    }

    #[test]
    fn decodes_event_with_payload() {
        let packet = EnginePacket::decode(
            r#"42["workflow_update",{"workflow_execution_id":"exec-1","log":"Leyendo archivos"}]"#,
        )
        .expect("decode");
        assert_eq!(
            packet,
            EnginePacket::Message(SocketPacket::Event {
                namespace: "/".into(),
                ack_id: None,
                name: "workflow_update".into(),
                args: vec![json!({
                    "workflow_execution_id": "exec-1",
                    "log": "Leyendo archivos",
                })],
            })
        );
    }

    #[test]
    fn decodes_namespace_and_ack_id() {
        let packet = SocketPacket::decode(r#"2/admin,13["ping_me",1]"#).expect("decode");
        assert_eq!(
            packet,
            SocketPacket::Event {
                namespace: "/admin".into(),
                ack_id: Some(13),
                name: "ping_me".into(),
                args: vec![json!(1)],
            }
        );
    }

    #[test]
    fn decodes_connect_confirmation() {
        let packet = EnginePacket::decode(r#"40{"sid":"wZX3oN0bSVIhsaknAAAI"}"#).expect("decode");
        assert_eq!(
            packet,
            EnginePacket::Message(SocketPacket::Connect {
                namespace: "/".into(),
                payload: Some(json!({ "sid": "wZX3oN0bSVIhsaknAAAI" })),
            })
        );
    }

    #[test]
    fn encodes_join_event_and_connect() {
        let join = SocketPacket::event("join_workflow", json!({ "workflow_id": "exec-1" }));
        assert_eq!(
            EnginePacket::Message(join).encode(),
            r#"42["join_workflow",{"workflow_id":"exec-1"}]"#
        );
        assert_eq!(EnginePacket::Message(SocketPacket::connect()).encode(), "40");
        assert_eq!(EnginePacket::Pong(String::new()).encode(), "3");
    }

    #[test]
    fn rejects_binary_and_garbage() {
        assert_eq!(SocketPacket::decode("51-[]"), Err(PacketError::Binary));
        assert_eq!(EnginePacket::decode(""), Err(PacketError::Empty));
        assert_eq!(EnginePacket::decode("9"), Err(PacketError::UnknownEngineType('9')));
        assert!(matches!(
            SocketPacket::decode(r#"2{"not":"an array"}"#),
            Err(PacketError::Payload(_))
        ));
    }
}
