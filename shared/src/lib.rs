use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_SERVER_URL: &str = "http://localhost:3001";
pub const DEBOUNCE_WINDOW: Duration = Duration::from_millis(500);
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
pub const MAX_CONNECT_ATTEMPTS: u32 = 3;
pub const RETRY_DELAY: Duration = Duration::from_secs(1);
pub const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);
pub const DEFAULT_PING_INTERVAL: Duration = Duration::from_millis(25_000);
pub const DEFAULT_PING_TIMEOUT: Duration = Duration::from_millis(20_000);
/// Hardware-level bounce filter on buzzer inputs.
pub const GPIO_BOUNCE_TIME: Duration = Duration::from_millis(300);

/// BCM pins commonly wired to buzzers on a Raspberry Pi header.
pub const AVAILABLE_PINS: [u8; 26] = [
    2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16, 17, 18, 19, 20, 21, 22, 23, 24, 25, 26,
    27,
];

pub const EVENT_JOIN_GAME: &str = "join_game";
pub const EVENT_PRESS_BUZZER: &str = "press_buzzer";
pub const EVENT_GAME_UPDATE: &str = "game_update";

#[derive(Debug, Error, PartialEq)]
pub enum ProtocolError {
    #[error("empty frame")]
    Empty,
    #[error("unknown packet type {0:?}")]
    UnknownPacket(String),
    #[error("malformed payload: {0}")]
    Malformed(String),
}

/// Actions a player connection sends to the game server.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    JoinGame { game_id: String, player_id: String },
    PressBuzzer,
}

impl ClientEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::JoinGame { .. } => EVENT_JOIN_GAME,
            ClientEvent::PressBuzzer => EVENT_PRESS_BUZZER,
        }
    }

    pub fn into_packet(self) -> Packet {
        let data = match &self {
            ClientEvent::JoinGame { game_id, player_id } => {
                Some(json!({ "gameId": game_id, "playerId": player_id }))
            }
            ClientEvent::PressBuzzer => None,
        };

        Packet::Event {
            name: self.name().to_string(),
            data,
        }
    }
}

/// Round flags carried by a `game_update` push.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GameUpdate {
    pub is_active: bool,
    pub buzzers_locked: bool,
    pub countdown_active: bool,
}

impl GameUpdate {
    /// Extracts the flags from `{data: {game: {...}}}`. Missing flags read as false.
    pub fn from_payload(payload: &Value) -> Option<Self> {
        let game = payload.get("data")?.get("game")?;
        serde_json::from_value(game.clone()).ok()
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenHandshake {
    pub sid: String,
    #[serde(default)]
    pub ping_interval: u64,
    #[serde(default)]
    pub ping_timeout: u64,
}

impl OpenHandshake {
    /// How long the session may stay silent before the server counts as gone.
    /// Missing values fall back to the Engine.IO defaults.
    pub fn liveness_window(&self) -> Duration {
        let interval = match self.ping_interval {
            0 => DEFAULT_PING_INTERVAL,
            ms => Duration::from_millis(ms),
        };
        let timeout = match self.ping_timeout {
            0 => DEFAULT_PING_TIMEOUT,
            ms => Duration::from_millis(ms),
        };
        interval + timeout
    }
}

/// One Engine.IO text frame, with the Socket.IO packet it carries flattened in.
#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    Open(OpenHandshake),
    Close,
    Ping,
    Pong,
    Noop,
    Connect,
    Disconnect,
    ConnectError(String),
    Event { name: String, data: Option<Value> },
}

impl Packet {
    pub fn encode(&self) -> String {
        match self {
            Packet::Open(handshake) => format!(
                "0{}",
                json!({
                    "sid": handshake.sid,
                    "pingInterval": handshake.ping_interval,
                    "pingTimeout": handshake.ping_timeout,
                })
            ),
            Packet::Close => "1".to_string(),
            Packet::Ping => "2".to_string(),
            Packet::Pong => "3".to_string(),
            Packet::Noop => "6".to_string(),
            Packet::Connect => "40".to_string(),
            Packet::Disconnect => "41".to_string(),
            Packet::ConnectError(message) => format!("44{}", json!({ "message": message })),
            Packet::Event { name, data } => {
                let mut items = vec![Value::String(name.clone())];
                if let Some(data) = data {
                    items.push(data.clone());
                }
                format!("42{}", Value::Array(items))
            }
        }
    }

    pub fn decode(frame: &str) -> Result<Self, ProtocolError> {
        let mut chars = frame.chars();
        let kind = chars.next().ok_or(ProtocolError::Empty)?;
        let rest = chars.as_str();

        match kind {
            '0' => serde_json::from_str(rest)
                .map(Packet::Open)
                .map_err(|e| ProtocolError::Malformed(e.to_string())),
            '1' => Ok(Packet::Close),
            '2' => Ok(Packet::Ping),
            '3' => Ok(Packet::Pong),
            '6' => Ok(Packet::Noop),
            '4' => Self::decode_message(rest),
            _ => Err(ProtocolError::UnknownPacket(frame.to_string())),
        }
    }

    fn decode_message(message: &str) -> Result<Self, ProtocolError> {
        let mut chars = message.chars();
        let kind = chars.next().ok_or(ProtocolError::Empty)?;
        let body = skip_namespace(chars.as_str());

        match kind {
            '0' => Ok(Packet::Connect),
            '1' => Ok(Packet::Disconnect),
            '4' => {
                let reason = serde_json::from_str::<Value>(body)
                    .ok()
                    .and_then(|v| v.get("message").and_then(Value::as_str).map(str::to_string))
                    .unwrap_or_else(|| body.to_string());
                Ok(Packet::ConnectError(reason))
            }
            '2' => {
                // An ack id may sit between the packet type and the array.
                let body = body.trim_start_matches(|c: char| c.is_ascii_digit());
                let items: Vec<Value> = serde_json::from_str(body)
                    .map_err(|e| ProtocolError::Malformed(e.to_string()))?;
                let mut items = items.into_iter();
                let name = match items.next() {
                    Some(Value::String(name)) => name,
                    _ => return Err(ProtocolError::Malformed("event without name".into())),
                };
                Ok(Packet::Event {
                    name,
                    data: items.next(),
                })
            }
            _ => Err(ProtocolError::UnknownPacket(format!("4{}", message))),
        }
    }
}

fn skip_namespace(body: &str) -> &str {
    if body.starts_with('/') {
        match body.find(',') {
            Some(idx) => &body[idx + 1..],
            None => "",
        }
    } else {
        body
    }
}

/// Builds the Engine.IO WebSocket endpoint for an `http(s)://` game server URL.
pub fn socket_url(server_url: &str) -> String {
    let base = server_url.trim_end_matches('/');
    let base = if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{}", rest)
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{}", rest)
    } else {
        base.to_string()
    };
    format!("{}/socket.io/?EIO=4&transport=websocket", base)
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinRequest {
    pub game_code: String,
    pub player_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameInfo {
    pub id: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinResponse {
    pub player_id: String,
    pub game: GameInfo,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GameInfoResponse {
    pub game: GameInfo,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ErrorResponse {
    pub error: Option<String>,
}
