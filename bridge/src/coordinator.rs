//! Player session orchestration
//!
//! The [`SessionCoordinator`] owns everything that spans players: the
//! local-to-remote id mapping, the set of live [`SessionConnection`]s and the
//! shared [`SessionState`]. Its operations isolate per-player failures, so a
//! player whose connection cannot be opened never stops the others from
//! joining, and none of them return errors to the caller.

use crate::api::GameDirectory;
use crate::connection::{Connector, SessionConnection};
use crate::error::DenialReason;
use crate::roster::Player;
use crate::state::{BridgeEvent, SessionState};
use log::{error, info, warn};
use shared::{CONNECT_TIMEOUT, DEFAULT_SERVER_URL, MAX_CONNECT_ATTEMPTS, RETRY_DELAY};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::sleep;

#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub server_url: String,
    pub connect_timeout: Duration,
    pub max_attempts: u32,
    pub retry_delay: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            server_url: DEFAULT_SERVER_URL.to_string(),
            connect_timeout: CONNECT_TIMEOUT,
            max_attempts: MAX_CONNECT_ATTEMPTS,
            retry_delay: RETRY_DELAY,
        }
    }
}

/// Result of a single press attempt. Only `Sent` produced wire traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PressOutcome {
    Sent,
    Denied(DenialReason),
    NoConnection,
    NotConnected,
}

impl PressOutcome {
    pub fn is_sent(&self) -> bool {
        matches!(self, PressOutcome::Sent)
    }
}

/// Per-player tally of a batch join.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JoinSummary {
    pub joined: Vec<String>,
    pub failed: Vec<(String, String)>,
}

impl JoinSummary {
    pub fn any_joined(&self) -> bool {
        !self.joined.is_empty()
    }
}

/// Point-in-time view of the session for status displays.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionStatus {
    pub connected: bool,
    pub connected_players: Vec<String>,
    pub registered: usize,
    pub game_id: Option<String>,
    pub buzzers_available: bool,
    pub round: &'static str,
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Server connected: {} ({} of {} players)",
            self.connected,
            self.connected_players.len(),
            self.registered
        )?;
        writeln!(f, "Game ID: {}", self.game_id.as_deref().unwrap_or("none"))?;
        write!(
            f,
            "Buzzers available: {} ({})",
            self.buzzers_available, self.round
        )
    }
}

#[derive(Debug, Default)]
struct Connections {
    live: HashMap<String, SessionConnection>,
    opening: HashSet<String>,
}

/// Holds a local id in the opening set until dropped.
struct Reservation<'a> {
    connections: &'a Mutex<Connections>,
    local_id: &'a str,
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        lock(self.connections).opening.remove(self.local_id);
    }
}

pub struct SessionCoordinator<C: Connector> {
    connector: C,
    config: CoordinatorConfig,
    state: Arc<SessionState>,
    mappings: Mutex<HashMap<String, String>>,
    connections: Mutex<Connections>,
}

impl<C: Connector> SessionCoordinator<C> {
    pub fn new(connector: C, config: CoordinatorConfig) -> Self {
        Self {
            connector,
            config,
            state: Arc::new(SessionState::new()),
            mappings: Mutex::new(HashMap::new()),
            connections: Mutex::new(Connections::default()),
        }
    }

    pub fn state(&self) -> &Arc<SessionState> {
        &self.state
    }

    pub fn set_event_sink(&self, sink: mpsc::UnboundedSender<BridgeEvent>) {
        self.state.set_event_sink(sink);
    }

    /// True as soon as any one player is live.
    pub fn connected(&self) -> bool {
        lock(&self.connections)
            .live
            .values()
            .any(SessionConnection::is_connected)
    }

    pub fn connected_players(&self) -> Vec<String> {
        let mut players: Vec<String> = lock(&self.connections)
            .live
            .values()
            .filter(|connection| connection.is_connected())
            .map(|connection| connection.local_id().to_string())
            .collect();
        players.sort();
        players
    }

    pub fn registered_players(&self) -> HashMap<String, String> {
        lock(&self.mappings).clone()
    }

    pub fn status(&self) -> SessionStatus {
        let connected_players = self.connected_players();
        let flags = self.state.snapshot();
        SessionStatus {
            connected: !connected_players.is_empty(),
            connected_players,
            registered: lock(&self.mappings).len(),
            game_id: self.state.game_id().map(str::to_string),
            buzzers_available: flags.is_press_eligible(),
            round: flags.status_label(),
        }
    }

    /// Maps a local player to its server-assigned id and, once the game id is
    /// known, opens its connection. Returns whether the player ended up live.
    pub async fn register_player(&self, local_id: &str, remote_id: &str) -> bool {
        let remote_id = {
            let mut mappings = lock(&self.mappings);
            let mapped = mappings
                .entry(local_id.to_string())
                .or_insert_with(|| remote_id.to_string());
            if mapped.as_str() != remote_id {
                warn!(
                    "Local player {} already mapped to {}, keeping it over {}",
                    local_id, mapped, remote_id
                );
            }
            mapped.clone()
        };
        info!("Mapped local player {} to API player {}", local_id, remote_id);

        let Some(game_id) = self.state.game_id().map(str::to_string) else {
            warn!("Cannot open connection for {}: game ID is not set", local_id);
            return false;
        };

        {
            let mut connections = lock(&self.connections);
            if let Some(existing) = connections.live.get(local_id) {
                return existing.is_connected();
            }
            if !connections.opening.insert(local_id.to_string()) {
                info!("Connection for {} is already being opened", local_id);
                return false;
            }
        }
        let _reservation = Reservation {
            connections: &self.connections,
            local_id,
        };

        for attempt in 1..=self.config.max_attempts {
            match SessionConnection::open(
                &self.connector,
                &self.config.server_url,
                local_id,
                &remote_id,
                &game_id,
                Arc::clone(&self.state),
                self.config.connect_timeout,
            )
            .await
            {
                Ok(connection) => {
                    lock(&self.connections)
                        .live
                        .insert(local_id.to_string(), connection);
                    return true;
                }
                Err(e) => {
                    warn!(
                        "Failed to connect player {} (attempt {}/{}): {}",
                        remote_id, attempt, self.config.max_attempts, e
                    );
                    if attempt < self.config.max_attempts {
                        sleep(self.config.retry_delay).await;
                    }
                }
            }
        }

        error!(
            "Giving up on player {} after {} attempts",
            remote_id, self.config.max_attempts
        );
        false
    }

    /// Joins every player to the game identified by `game_code` and opens
    /// their connections. A player counts as joined only when it is live.
    pub async fn join_all<D: GameDirectory>(
        &self,
        directory: &D,
        game_code: &str,
        players: &[Player],
    ) -> JoinSummary {
        let mut summary = JoinSummary::default();

        for player in players {
            let response = match directory.join(game_code, &player.name).await {
                Ok(response) => response,
                Err(e) => {
                    warn!("Failed to register {}: {}", player.name, e);
                    summary.failed.push((player.local_id.clone(), e.to_string()));
                    continue;
                }
            };

            self.state.set_game_id(&response.game.id);

            if self
                .register_player(&player.local_id, &response.player_id)
                .await
            {
                summary.joined.push(player.local_id.clone());
            } else {
                summary
                    .failed
                    .push((player.local_id.clone(), "connection failed".to_string()));
            }
        }

        info!(
            "Joined {} of {} players",
            summary.joined.len(),
            players.len()
        );
        summary
    }

    /// Sends a press for `local_id` if the round currently allows it.
    pub fn press(&self, local_id: &str) -> PressOutcome {
        if let Some(reason) = self.state.denial_reason() {
            info!("[BUZZER] Press ignored: {}", reason);
            return PressOutcome::Denied(reason);
        }

        let connections = lock(&self.connections);
        let Some(connection) = connections.live.get(local_id) else {
            warn!("No connection found for local player {}", local_id);
            return PressOutcome::NoConnection;
        };

        match connection.press() {
            Ok(()) => PressOutcome::Sent,
            Err(_) => PressOutcome::NotConnected,
        }
    }

    pub fn press_buzzer(&self, local_id: &str) -> bool {
        self.press(local_id).is_sent()
    }

    /// Closes every connection. Safe to call repeatedly.
    pub async fn disconnect_all(&self) {
        let connections: Vec<SessionConnection> = lock(&self.connections)
            .live
            .drain()
            .map(|(_, connection)| connection)
            .collect();

        for mut connection in connections {
            connection.close().await;
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
