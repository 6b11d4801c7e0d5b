//! Per-player session membership on the game server
//!
//! The server identifies participants by connection, so every player gets a
//! [`SessionConnection`] of its own. A connection owns one reader task that
//! handles the transport's inbound events strictly in arrival order and
//! applies `game_update` pushes to the shared [`SessionState`].

use crate::error::{ConnectionError, NotConnectedError};
use crate::state::SessionState;
use log::{debug, error, info, warn};
use serde_json::Value;
use shared::{ClientEvent, GameUpdate, CLOSE_TIMEOUT, EVENT_GAME_UPDATE};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;

/// Events a transport reports upward.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Connected,
    Disconnected(String),
    Event { name: String, data: Option<Value> },
}

/// Requests handed down to a transport.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportCommand {
    Emit(ClientEvent),
    Close,
}

/// Both directions of an open transport, plus the task driving it when the
/// transport runs one.
#[derive(Debug)]
pub struct TransportHandle {
    pub outbound: mpsc::UnboundedSender<TransportCommand>,
    pub inbound: mpsc::UnboundedReceiver<TransportEvent>,
    pub driver: Option<JoinHandle<()>>,
}

/// Opens transports to the game server.
pub trait Connector: Send + Sync + 'static {
    fn connect(
        &self,
        server_url: &str,
    ) -> impl Future<Output = Result<TransportHandle, ConnectionError>> + Send;
}

pub struct SessionConnection {
    local_id: String,
    remote_id: String,
    connected: Arc<AtomicBool>,
    outbound: mpsc::UnboundedSender<TransportCommand>,
    reader: Option<JoinHandle<()>>,
    driver: Option<JoinHandle<()>>,
}

impl SessionConnection {
    /// Opens the transport and waits for the server to accept the session.
    ///
    /// The whole exchange is bounded by `connect_timeout`. There is no retry
    /// here; callers decide whether to try again.
    pub async fn open<C: Connector>(
        connector: &C,
        server_url: &str,
        local_id: &str,
        remote_id: &str,
        game_id: &str,
        state: Arc<SessionState>,
        connect_timeout: Duration,
    ) -> Result<Self, ConnectionError> {
        info!("Connecting player {} to {}", remote_id, server_url);

        let handle = timeout(connect_timeout, establish(connector, server_url))
            .await
            .map_err(|_| ConnectionError::Timeout)??;

        let TransportHandle {
            outbound,
            inbound,
            driver,
        } = handle;
        let connected = Arc::new(AtomicBool::new(true));
        info!("Player {} connected to server", remote_id);
        announce(&outbound, game_id, remote_id);

        let reader = tokio::spawn(run_reader(
            remote_id.to_string(),
            game_id.to_string(),
            inbound,
            outbound.clone(),
            Arc::clone(&connected),
            state,
        ));

        Ok(Self {
            local_id: local_id.to_string(),
            remote_id: remote_id.to_string(),
            connected,
            outbound,
            reader: Some(reader),
            driver,
        })
    }

    pub fn local_id(&self) -> &str {
        &self.local_id
    }

    pub fn remote_id(&self) -> &str {
        &self.remote_id
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Queues a `press_buzzer` emit without waiting for the server.
    pub fn press(&self) -> Result<(), NotConnectedError> {
        let not_connected = || NotConnectedError {
            player_id: self.remote_id.clone(),
        };

        if !self.is_connected() {
            warn!(
                "Cannot press buzzer: player {} not connected",
                self.remote_id
            );
            return Err(not_connected());
        }

        if self
            .outbound
            .send(TransportCommand::Emit(ClientEvent::PressBuzzer))
            .is_err()
        {
            error!(
                "Error pressing buzzer for player {}: transport gone",
                self.remote_id
            );
            self.connected.store(false, Ordering::SeqCst);
            return Err(not_connected());
        }

        debug!("Buzzer pressed for player {}", self.remote_id);
        Ok(())
    }

    /// Shuts the transport down. Once this returns the reader task has
    /// stopped, so no further update from this connection reaches the state,
    /// and the transport has finished its teardown or been cut off after
    /// [`CLOSE_TIMEOUT`].
    pub async fn close(&mut self) {
        let Some(reader) = self.reader.take() else {
            return;
        };

        if self.outbound.send(TransportCommand::Close).is_err() {
            debug!("Transport for player {} already closed", self.remote_id);
        }

        reader.abort();
        match reader.await {
            Ok(()) => {}
            Err(e) if e.is_cancelled() => {}
            Err(e) => error!("Error disconnecting player {}: {}", self.remote_id, e),
        }
        self.connected.store(false, Ordering::SeqCst);

        if let Some(mut driver) = self.driver.take() {
            match timeout(CLOSE_TIMEOUT, &mut driver).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!("Transport for player {} failed: {}", self.remote_id, e),
                Err(_) => {
                    warn!(
                        "Transport for player {} did not close in {:?}",
                        self.remote_id, CLOSE_TIMEOUT
                    );
                    driver.abort();
                }
            }
        }

        info!("Player {} disconnected cleanly", self.remote_id);
    }
}

impl Drop for SessionConnection {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }
}

impl std::fmt::Debug for SessionConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionConnection")
            .field("local_id", &self.local_id)
            .field("remote_id", &self.remote_id)
            .field("connected", &self.is_connected())
            .finish()
    }
}

async fn establish<C: Connector>(
    connector: &C,
    server_url: &str,
) -> Result<TransportHandle, ConnectionError> {
    let mut handle = connector.connect(server_url).await?;

    match handle.inbound.recv().await {
        Some(TransportEvent::Connected) => Ok(handle),
        Some(TransportEvent::Disconnected(reason)) => {
            Err(ConnectionError::HandshakeRejected(reason))
        }
        Some(other) => Err(ConnectionError::HandshakeRejected(format!(
            "unexpected {:?} before connect",
            other
        ))),
        None => Err(ConnectionError::Closed),
    }
}

/// Best-effort room join; most servers re-broadcast state on entry anyway.
fn announce(outbound: &mpsc::UnboundedSender<TransportCommand>, game_id: &str, remote_id: &str) {
    let join = ClientEvent::JoinGame {
        game_id: game_id.to_string(),
        player_id: remote_id.to_string(),
    };

    if let Err(e) = outbound.send(TransportCommand::Emit(join)) {
        warn!("Failed to join game room for player {}: {}", remote_id, e);
    }
}

async fn run_reader(
    remote_id: String,
    game_id: String,
    mut inbound: mpsc::UnboundedReceiver<TransportEvent>,
    outbound: mpsc::UnboundedSender<TransportCommand>,
    connected: Arc<AtomicBool>,
    state: Arc<SessionState>,
) {
    while let Some(event) = inbound.recv().await {
        match event {
            TransportEvent::Connected => {
                connected.store(true, Ordering::SeqCst);
                info!("Player {} connected to server", remote_id);
                announce(&outbound, &game_id, &remote_id);
            }
            TransportEvent::Disconnected(reason) => {
                connected.store(false, Ordering::SeqCst);
                warn!("Player {} disconnected: {}", remote_id, reason);
            }
            TransportEvent::Event { name, data } if name == EVENT_GAME_UPDATE => match data {
                Some(payload) => apply_game_update(&state, payload),
                None => debug!("Empty game update for player {}", remote_id),
            },
            TransportEvent::Event { name, .. } => {
                debug!("Ignoring event {} for player {}", name, remote_id);
            }
        }
    }

    connected.store(false, Ordering::SeqCst);
}

fn apply_game_update(state: &SessionState, payload: Value) {
    match GameUpdate::from_payload(&payload) {
        Some(update) => {
            state.apply_update(update);
            state.forward_game_update(payload);
        }
        None => debug!("Game update without game data: {}", payload),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::AtomicU32;
    use std::sync::Mutex;

    /// The server side of a mock transport.
    pub(crate) struct MockPeer {
        pub events: mpsc::UnboundedSender<TransportEvent>,
        pub commands: mpsc::UnboundedReceiver<TransportCommand>,
    }

    impl MockPeer {
        pub(crate) fn sent(&mut self) -> Vec<TransportCommand> {
            let mut sent = Vec::new();
            while let Ok(command) = self.commands.try_recv() {
                sent.push(command);
            }
            sent
        }
    }

    /// Connector whose attempts fail until `fail_first` have been made.
    /// URLs listed in `always_fail` never connect.
    #[derive(Default)]
    pub(crate) struct MockConnector {
        pub fail_first: u32,
        pub always_fail: Vec<String>,
        pub attempts: AtomicU32,
        pub peers: Mutex<Vec<MockPeer>>,
    }

    impl Connector for MockConnector {
        async fn connect(&self, server_url: &str) -> Result<TransportHandle, ConnectionError> {
            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
            if attempt <= self.fail_first || self.always_fail.iter().any(|u| u == server_url) {
                return Err(ConnectionError::Transport("connection refused".to_string()));
            }

            let (event_tx, event_rx) = mpsc::unbounded_channel();
            let (command_tx, command_rx) = mpsc::unbounded_channel();
            let _ = event_tx.send(TransportEvent::Connected);
            self.peers.lock().unwrap().push(MockPeer {
                events: event_tx,
                commands: command_rx,
            });

            Ok(TransportHandle {
                outbound: command_tx,
                inbound: event_rx,
                driver: None,
            })
        }
    }

    async fn open(connector: &MockConnector, state: Arc<SessionState>) -> SessionConnection {
        SessionConnection::open(
            connector,
            "http://game.test",
            "local-a",
            "remote-a",
            "game-1",
            state,
            Duration::from_secs(5),
        )
        .await
        .unwrap()
    }

    fn game_update(active: bool, locked: bool, countdown: bool) -> TransportEvent {
        TransportEvent::Event {
            name: "game_update".to_string(),
            data: Some(json!({
                "data": {"game": {
                    "isActive": active,
                    "buzzersLocked": locked,
                    "countdownActive": countdown,
                }}
            })),
        }
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    #[tokio::test]
    async fn test_open_announces_join() {
        let connector = MockConnector::default();
        let connection = open(&connector, Arc::new(SessionState::new())).await;
        assert!(connection.is_connected());
        assert_eq!(connection.local_id(), "local-a");

        let mut peer = connector.peers.lock().unwrap().pop().unwrap();
        assert_eq!(
            peer.sent(),
            vec![TransportCommand::Emit(ClientEvent::JoinGame {
                game_id: "game-1".to_string(),
                player_id: "remote-a".to_string(),
            })]
        );
    }

    #[tokio::test]
    async fn test_open_fails_on_transport_error() {
        let connector = MockConnector {
            fail_first: 1,
            ..Default::default()
        };
        let result = SessionConnection::open(
            &connector,
            "http://game.test",
            "local-a",
            "remote-a",
            "game-1",
            Arc::new(SessionState::new()),
            Duration::from_secs(5),
        )
        .await;
        assert!(matches!(result, Err(ConnectionError::Transport(_))));
        assert_eq!(connector.attempts.load(Ordering::SeqCst), 1);
    }

    struct SilentConnector;

    impl Connector for SilentConnector {
        async fn connect(&self, _server_url: &str) -> Result<TransportHandle, ConnectionError> {
            std::future::pending().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_times_out() {
        let result = SessionConnection::open(
            &SilentConnector,
            "http://game.test",
            "local-a",
            "remote-a",
            "game-1",
            Arc::new(SessionState::new()),
            Duration::from_secs(5),
        )
        .await;
        assert_eq!(result.unwrap_err(), ConnectionError::Timeout);
    }

    struct RejectingConnector;

    impl Connector for RejectingConnector {
        async fn connect(&self, _server_url: &str) -> Result<TransportHandle, ConnectionError> {
            let (event_tx, event_rx) = mpsc::unbounded_channel();
            let (command_tx, _command_rx) = mpsc::unbounded_channel();
            let _ = event_tx.send(TransportEvent::Disconnected("Not authorized".to_string()));
            Ok(TransportHandle {
                outbound: command_tx,
                inbound: event_rx,
                driver: None,
            })
        }
    }

    #[tokio::test]
    async fn test_open_reports_handshake_rejection() {
        let result = SessionConnection::open(
            &RejectingConnector,
            "http://game.test",
            "local-a",
            "remote-a",
            "game-1",
            Arc::new(SessionState::new()),
            Duration::from_secs(5),
        )
        .await;
        assert_eq!(
            result.unwrap_err(),
            ConnectionError::HandshakeRejected("Not authorized".to_string())
        );
    }

    #[tokio::test]
    async fn test_game_update_applied_to_shared_state() {
        let connector = MockConnector::default();
        let state = Arc::new(SessionState::new());
        let (tx, mut rx) = mpsc::unbounded_channel();
        state.set_event_sink(tx);
        let _connection = open(&connector, Arc::clone(&state)).await;

        let peer = connector.peers.lock().unwrap().pop().unwrap();
        peer.events.send(game_update(true, false, false)).unwrap();
        settle().await;

        assert!(state.is_press_eligible());
        let mut saw_raw = false;
        while let Ok(event) = rx.try_recv() {
            if matches!(event, crate::state::BridgeEvent::GameUpdate(_)) {
                saw_raw = true;
            }
        }
        assert!(saw_raw);
    }

    #[tokio::test]
    async fn test_press_sends_without_payload() {
        let connector = MockConnector::default();
        let connection = open(&connector, Arc::new(SessionState::new())).await;
        let mut peer = connector.peers.lock().unwrap().pop().unwrap();
        peer.sent();

        assert!(connection.press().is_ok());
        assert_eq!(
            peer.sent(),
            vec![TransportCommand::Emit(ClientEvent::PressBuzzer)]
        );
    }

    #[tokio::test]
    async fn test_press_after_disconnect_fails() {
        let connector = MockConnector::default();
        let connection = open(&connector, Arc::new(SessionState::new())).await;
        let mut peer = connector.peers.lock().unwrap().pop().unwrap();
        peer.sent();

        peer.events
            .send(TransportEvent::Disconnected("server shutdown".to_string()))
            .unwrap();
        settle().await;

        assert!(!connection.is_connected());
        assert_eq!(
            connection.press(),
            Err(NotConnectedError {
                player_id: "remote-a".to_string()
            })
        );
        assert!(peer.sent().is_empty());
    }

    #[tokio::test]
    async fn test_close_stops_state_updates() {
        let connector = MockConnector::default();
        let state = Arc::new(SessionState::new());
        let mut connection = open(&connector, Arc::clone(&state)).await;
        let mut peer = connector.peers.lock().unwrap().pop().unwrap();

        connection.close().await;
        assert!(!connection.is_connected());
        assert!(peer.sent().contains(&TransportCommand::Close));

        let _ = peer.events.send(game_update(true, false, false));
        settle().await;
        assert!(!state.is_press_eligible());

        // A second close is a no-op.
        connection.close().await;
    }

    /// Transport whose driver takes a while to tear down after `Close`.
    struct LingeringConnector {
        finished: Arc<AtomicBool>,
        linger: Duration,
    }

    impl Connector for LingeringConnector {
        async fn connect(&self, _server_url: &str) -> Result<TransportHandle, ConnectionError> {
            let (event_tx, event_rx) = mpsc::unbounded_channel();
            let (command_tx, mut command_rx) = mpsc::unbounded_channel();
            let _ = event_tx.send(TransportEvent::Connected);

            let finished = Arc::clone(&self.finished);
            let linger = self.linger;
            let driver = tokio::spawn(async move {
                let _events = event_tx;
                while let Some(command) = command_rx.recv().await {
                    if command == TransportCommand::Close {
                        break;
                    }
                }
                tokio::time::sleep(linger).await;
                finished.store(true, Ordering::SeqCst);
            });

            Ok(TransportHandle {
                outbound: command_tx,
                inbound: event_rx,
                driver: Some(driver),
            })
        }
    }

    async fn open_lingering(connector: &LingeringConnector) -> SessionConnection {
        SessionConnection::open(
            connector,
            "http://game.test",
            "local-a",
            "remote-a",
            "game-1",
            Arc::new(SessionState::new()),
            Duration::from_secs(5),
        )
        .await
        .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_waits_for_transport_teardown() {
        let connector = LingeringConnector {
            finished: Arc::new(AtomicBool::new(false)),
            linger: Duration::from_millis(200),
        };
        let mut connection = open_lingering(&connector).await;

        connection.close().await;
        assert!(connector.finished.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_cuts_off_stuck_transport() {
        let connector = LingeringConnector {
            finished: Arc::new(AtomicBool::new(false)),
            linger: Duration::from_secs(60),
        };
        let mut connection = open_lingering(&connector).await;

        let started = tokio::time::Instant::now();
        connection.close().await;
        assert!(started.elapsed() < Duration::from_secs(2));
        assert!(!connector.finished.load(Ordering::SeqCst));
        assert!(!connection.is_connected());
    }
}
