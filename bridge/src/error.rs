//! Error taxonomy for the bridge.
//!
//! None of these cross the coordinator boundary as hard failures: connection
//! errors become an absent connection, press failures become a `false`
//! result, and unmapped input is only logged.

use thiserror::Error;

/// Opening a player's transport failed.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConnectionError {
    #[error("connection timed out")]
    Timeout,
    #[error("transport error: {0}")]
    Transport(String),
    #[error("handshake rejected: {0}")]
    HandshakeRejected(String),
    #[error("transport closed before the session was established")]
    Closed,
}

/// A press was attempted on a connection that is not live.
#[derive(Debug, Error, Clone, PartialEq)]
#[error("player {player_id} is not connected")]
pub struct NotConnectedError {
    pub player_id: String,
}

/// Why the current round refuses presses. Ordered by check priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenialReason {
    Countdown,
    Inactive,
    Locked,
}

impl std::fmt::Display for DenialReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            DenialReason::Countdown => "countdown in progress",
            DenialReason::Inactive => "round not active",
            DenialReason::Locked => "buzzers are locked",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Error)]
pub enum JoinError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("join rejected: {0}")]
    Rejected(String),
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

#[derive(Debug, Error)]
pub enum RosterError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("pin {0} is already assigned")]
    PinInUse(u8),
    #[error("unknown player {0}")]
    UnknownPlayer(String),
}
