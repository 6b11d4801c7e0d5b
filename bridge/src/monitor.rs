//! Buzzer trigger debouncing and pin-to-player resolution

use crate::hardware::{Hardware, TriggerCallback};
use crate::roster::{Player, Roster};
use log::{debug, info, warn};
use shared::DEBOUNCE_WINDOW;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

/// What happened to a single raw trigger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerOutcome {
    Forwarded(String),
    Debounced,
    Unmapped,
    Stopped,
}

#[derive(Debug, Default)]
struct MonitorInner {
    active: bool,
    pin_map: HashMap<u8, String>,
    last_trigger: HashMap<String, Instant>,
}

/// Turns hardware triggers into at most one press per player per debounce
/// window. Accepted presses are sent as local player ids on `presses`.
pub struct InputMonitor {
    hardware: Arc<dyn Hardware>,
    inner: Arc<Mutex<MonitorInner>>,
    presses: mpsc::UnboundedSender<String>,
    debounce: Duration,
}

impl InputMonitor {
    pub fn new(hardware: Arc<dyn Hardware>, presses: mpsc::UnboundedSender<String>) -> Self {
        Self {
            hardware,
            inner: Arc::new(Mutex::new(MonitorInner::default())),
            presses,
            debounce: DEBOUNCE_WINDOW,
        }
    }

    pub fn is_monitoring(&self) -> bool {
        lock(&self.inner).active
    }

    /// Starts watching the pins of a point-in-time roster snapshot. Later
    /// roster edits only take effect after a restart. No-op while active.
    pub fn start_monitoring(&self, players: &[Player]) {
        let pins: Vec<u8> = {
            let mut inner = lock(&self.inner);
            if inner.active {
                return;
            }

            inner.active = true;
            inner.pin_map = players
                .iter()
                .filter(|player| player.enabled)
                .map(|player| (player.pin, player.local_id.clone()))
                .collect();
            inner.pin_map.keys().copied().collect()
        };

        let inner = Arc::clone(&self.inner);
        let presses = self.presses.clone();
        let debounce = self.debounce;
        let callback: TriggerCallback = Arc::new(move |pin| {
            handle_trigger(&inner, &presses, debounce, pin, Instant::now());
        });

        for player in players.iter().filter(|player| player.enabled) {
            info!(
                "Monitoring {} on GPIO {} -> Player ID {}",
                player.name, player.pin, player.local_id
            );
        }
        for pin in pins {
            self.hardware.register_trigger(pin, Arc::clone(&callback));
        }
    }

    /// Stops watching. When this returns no trigger reaches the press channel
    /// until the next start.
    pub fn stop_monitoring(&self) {
        {
            let mut inner = lock(&self.inner);
            if !inner.active {
                return;
            }
            inner.active = false;
            inner.pin_map.clear();
        }

        self.hardware.unregister_all();
        info!("Stopped monitoring");
    }

    /// Simulates the buzzer of a configured player.
    pub fn mock_press<R: Roster + ?Sized>(&self, roster: &R, local_id: &str) -> bool {
        info!("Mock buzzer press for player ID: {}", local_id);
        match roster.lookup_player(local_id) {
            Some(player) => self.hardware.simulate_trigger(player.pin),
            None => {
                warn!("Player {} not found", local_id);
                false
            }
        }
    }

    #[cfg(test)]
    fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    #[cfg(test)]
    fn trigger_at(&self, pin: u8, now: Instant) -> TriggerOutcome {
        handle_trigger(&self.inner, &self.presses, self.debounce, pin, now)
    }
}

fn handle_trigger(
    inner: &Mutex<MonitorInner>,
    presses: &mpsc::UnboundedSender<String>,
    debounce: Duration,
    pin: u8,
    now: Instant,
) -> TriggerOutcome {
    let mut inner = lock(inner);
    if !inner.active {
        return TriggerOutcome::Stopped;
    }

    let Some(local_id) = inner.pin_map.get(&pin).cloned() else {
        warn!("No player mapped to GPIO pin {}", pin);
        return TriggerOutcome::Unmapped;
    };

    if let Some(last) = inner.last_trigger.get(&local_id) {
        if now.saturating_duration_since(*last) < debounce {
            return TriggerOutcome::Debounced;
        }
    }

    inner.last_trigger.insert(local_id.clone(), now);

    // Still under the lock: a stop either precedes this send or waits for it.
    if presses.send(local_id.clone()).is_err() {
        debug!("Press channel closed, dropping press for {}", local_id);
    }
    TriggerOutcome::Forwarded(local_id)
}

fn lock(inner: &Mutex<MonitorInner>) -> MutexGuard<'_, MonitorInner> {
    inner.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::MockHardware;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn player(id: &str, pin: u8) -> Player {
        Player {
            local_id: id.to_string(),
            name: id.to_uppercase(),
            pin,
            enabled: true,
        }
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<String>) -> Vec<String> {
        let mut presses = Vec::new();
        while let Ok(id) = rx.try_recv() {
            presses.push(id);
        }
        presses
    }

    fn monitor() -> (Arc<MockHardware>, InputMonitor, mpsc::UnboundedReceiver<String>) {
        let hardware = Arc::new(MockHardware::new());
        let (tx, rx) = mpsc::unbounded_channel();
        let monitor = InputMonitor::new(hardware.clone(), tx);
        (hardware, monitor, rx)
    }

    #[test]
    fn test_start_registers_enabled_pins() {
        let (hardware, monitor, _rx) = monitor();
        let mut disabled = player("c", 4);
        disabled.enabled = false;

        monitor.start_monitoring(&[player("a", 2), player("b", 3), disabled]);
        assert!(monitor.is_monitoring());
        assert_eq!(hardware.registered_pins(), vec![2, 3]);
    }

    #[test]
    fn test_debounce_scenario() {
        let (_hardware, monitor, mut rx) = monitor();
        monitor.start_monitoring(&[player("a", 2), player("b", 3)]);
        let t0 = Instant::now();

        assert_eq!(monitor.trigger_at(2, t0), TriggerOutcome::Forwarded("a".into()));
        assert_eq!(
            monitor.trigger_at(2, t0 + Duration::from_millis(100)),
            TriggerOutcome::Debounced
        );
        assert_eq!(drain(&mut rx), vec!["a"]);

        assert_eq!(monitor.trigger_at(3, t0), TriggerOutcome::Forwarded("b".into()));
        assert_eq!(
            monitor.trigger_at(3, t0 + Duration::from_millis(600)),
            TriggerOutcome::Forwarded("b".into())
        );
        assert_eq!(drain(&mut rx), vec!["b", "b"]);
    }

    #[test]
    fn test_window_boundary_accepts() {
        let (_hardware, monitor, mut rx) = monitor();
        monitor.start_monitoring(&[player("a", 2)]);
        let t0 = Instant::now();

        monitor.trigger_at(2, t0);
        assert_eq!(
            monitor.trigger_at(2, t0 + Duration::from_millis(499)),
            TriggerOutcome::Debounced
        );
        assert_eq!(
            monitor.trigger_at(2, t0 + Duration::from_millis(500)),
            TriggerOutcome::Forwarded("a".into())
        );
        assert_eq!(drain(&mut rx).len(), 2);
    }

    #[test]
    fn test_debounce_is_per_player() {
        let (_hardware, monitor, mut rx) = monitor();
        monitor.start_monitoring(&[player("a", 2), player("b", 3)]);
        let t0 = Instant::now();

        monitor.trigger_at(2, t0);
        monitor.trigger_at(3, t0 + Duration::from_millis(10));
        assert_eq!(drain(&mut rx), vec!["a", "b"]);
    }

    #[test]
    fn test_unmapped_pin_dropped() {
        let (_hardware, monitor, mut rx) = monitor();
        monitor.start_monitoring(&[player("a", 2)]);

        assert_eq!(monitor.trigger_at(9, Instant::now()), TriggerOutcome::Unmapped);
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn test_stop_makes_triggers_noops() {
        let (hardware, monitor, mut rx) = monitor();
        monitor.start_monitoring(&[player("a", 2)]);
        monitor.stop_monitoring();

        assert!(!monitor.is_monitoring());
        assert!(hardware.registered_pins().is_empty());
        assert!(!hardware.simulate_trigger(2));
        assert_eq!(monitor.trigger_at(2, Instant::now()), TriggerOutcome::Stopped);
        assert!(drain(&mut rx).is_empty());

        // Stopping twice is harmless.
        monitor.stop_monitoring();
    }

    #[test]
    fn test_no_press_after_stop_returns() {
        let (_hardware, monitor, mut rx) = monitor();
        let monitor = monitor.with_debounce(Duration::ZERO);
        monitor.start_monitoring(&[player("a", 2)]);
        let stopped = AtomicBool::new(false);

        std::thread::scope(|scope| {
            for _ in 0..4 {
                scope.spawn(|| {
                    while !stopped.load(Ordering::SeqCst) {
                        monitor.trigger_at(2, Instant::now());
                    }
                    assert_eq!(monitor.trigger_at(2, Instant::now()), TriggerOutcome::Stopped);
                });
            }

            std::thread::sleep(Duration::from_millis(20));
            monitor.stop_monitoring();
            assert!(!drain(&mut rx).is_empty());

            stopped.store(true, Ordering::SeqCst);
        });

        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn test_start_is_idempotent() {
        let (hardware, monitor, _rx) = monitor();
        monitor.start_monitoring(&[player("a", 2)]);
        monitor.start_monitoring(&[player("b", 3)]);
        assert_eq!(hardware.registered_pins(), vec![2]);
    }

    #[test]
    fn test_restart_uses_new_snapshot() {
        let (hardware, monitor, mut rx) = monitor();
        monitor.start_monitoring(&[player("a", 2)]);
        monitor.stop_monitoring();
        monitor.start_monitoring(&[player("b", 2)]);

        assert!(hardware.simulate_trigger(2));
        assert_eq!(drain(&mut rx), vec!["b"]);
    }

    #[test]
    fn test_simulated_hardware_presses_through_callback() {
        let (hardware, monitor, mut rx) = monitor();
        let monitor = monitor.with_debounce(Duration::from_millis(50));
        monitor.start_monitoring(&[player("a", 2), player("b", 3)]);

        hardware.simulate_trigger(2);
        hardware.simulate_trigger(2);
        assert_eq!(drain(&mut rx), vec!["a"]);

        hardware.simulate_trigger(3);
        std::thread::sleep(Duration::from_millis(60));
        hardware.simulate_trigger(3);
        assert_eq!(drain(&mut rx), vec!["b", "b"]);
    }

    struct OnePlayer(Player);

    impl Roster for OnePlayer {
        fn list_enabled_players(&self) -> Vec<Player> {
            vec![self.0.clone()]
        }

        fn lookup_player(&self, local_id: &str) -> Option<Player> {
            (self.0.local_id == local_id).then(|| self.0.clone())
        }
    }

    #[test]
    fn test_mock_press_resolves_player_pin() {
        let (_hardware, monitor, mut rx) = monitor();
        let roster = OnePlayer(player("a", 2));
        monitor.start_monitoring(&roster.list_enabled_players());

        assert!(monitor.mock_press(&roster, "a"));
        assert!(!monitor.mock_press(&roster, "nobody"));
        assert_eq!(drain(&mut rx), vec!["a"]);
    }
}
