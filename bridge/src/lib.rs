//! # Buzzer Bridge Library
//!
//! Bridges physical quiz buzzers to a remote real-time game session. Each
//! button maps to a logical player, and every player holds its own Socket.IO
//! connection to the game server because the server tells participants apart
//! by connection.
//!
//! ## Data Flow
//!
//! ```text
//! hardware trigger -> InputMonitor (debounce, pin -> player)
//!                  -> press channel
//!                  -> SessionCoordinator::press (eligibility check)
//!                  -> SessionConnection::press -> press_buzzer on the wire
//!
//! game_update on any connection -> SessionState::apply_update -> observer
//! ```
//!
//! ## Module Organization
//!
//! ### State Module (`state`)
//! The round flags (`active`, `locked`, `countdownActive`) shared by every
//! connection, the single eligibility predicate, and change notifications.
//!
//! ### Connection Module (`connection`)
//! One player's session: open with a 5 second bound, room join on connect,
//! ordered processing of inbound pushes, fire-and-forget presses.
//!
//! ### Transport Module (`transport`)
//! Engine.IO v4 over WebSocket, the production [`connection::Connector`].
//!
//! ### Coordinator Module (`coordinator`)
//! Player id mapping, connection retry (3 attempts, 1 second apart), press
//! gating and batch joins with per-player failure isolation.
//!
//! ### Monitor Module (`monitor`)
//! Debounces raw triggers (500 ms per player) and resolves pins to players.
//!
//! ### Supporting Modules
//! - `hardware`: the buzzer input seam, backend selection and a simulated
//!   backend
//! - `gpio`: Raspberry Pi buzzers (behind the `gpio` feature)
//! - `roster`: the JSON player store
//! - `api`: the join and game-info REST calls
//! - `error`: the error taxonomy
//!
//! ## Consistency Notes
//!
//! Pushes carry no sequence number. Updates from one connection are applied
//! in arrival order, but two connections can deliver conflicting updates in
//! either order and the last one applied wins.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use bridge::api::HttpGameApi;
//! use bridge::coordinator::{CoordinatorConfig, SessionCoordinator};
//! use bridge::hardware::MockHardware;
//! use bridge::monitor::InputMonitor;
//! use bridge::roster::{PlayerRoster, Roster};
//! use bridge::transport::WsConnector;
//! use std::sync::Arc;
//! use tokio::sync::mpsc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let roster = PlayerRoster::load("player_config.json");
//!     let api = HttpGameApi::new("http://localhost:3001")?;
//!     let coordinator = Arc::new(SessionCoordinator::new(
//!         WsConnector,
//!         CoordinatorConfig::default(),
//!     ));
//!
//!     let players = roster.list_enabled_players();
//!     let summary = coordinator.join_all(&api, "ABCD", &players).await;
//!     println!("{} players joined", summary.joined.len());
//!
//!     let (press_tx, mut press_rx) = mpsc::unbounded_channel();
//!     let monitor = InputMonitor::new(Arc::new(MockHardware::new()), press_tx);
//!     monitor.start_monitoring(&players);
//!
//!     while let Some(local_id) = press_rx.recv().await {
//!         coordinator.press(&local_id);
//!     }
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod connection;
pub mod coordinator;
pub mod error;
#[cfg(feature = "gpio")]
pub mod gpio;
pub mod hardware;
pub mod monitor;
pub mod roster;
pub mod state;
pub mod transport;
