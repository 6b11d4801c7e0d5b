//! Shared round state pushed by the game server
//!
//! Every player connection applies `game_update` pushes to the same
//! [`SessionState`], and every press attempt reads it. The three round flags
//! live behind one mutex so a reader never sees a half-applied update.

use crate::error::DenialReason;
use log::{info, warn};
use serde_json::Value;
use shared::GameUpdate;
use std::sync::{Mutex, MutexGuard, OnceLock, PoisonError};
use tokio::sync::mpsc;

/// Which round flag changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flag {
    Active,
    Locked,
    Countdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlagChange {
    pub field: Flag,
    pub old: bool,
    pub new: bool,
}

/// Notifications for an external observer (CLI, diagnostics).
#[derive(Debug, Clone, PartialEq)]
pub enum BridgeEvent {
    FlagChanged(FlagChange),
    GameUpdate(Value),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RoundFlags {
    pub active: bool,
    pub locked: bool,
    pub countdown_active: bool,
}

impl RoundFlags {
    pub fn is_press_eligible(&self) -> bool {
        self.denial_reason().is_none()
    }

    pub fn denial_reason(&self) -> Option<DenialReason> {
        if self.countdown_active {
            Some(DenialReason::Countdown)
        } else if !self.active {
            Some(DenialReason::Inactive)
        } else if self.locked {
            Some(DenialReason::Locked)
        } else {
            None
        }
    }

    pub fn status_label(&self) -> &'static str {
        if !self.active {
            "waiting for round"
        } else if self.countdown_active {
            "countdown in progress"
        } else if self.locked {
            "buzzers locked"
        } else {
            "buzzers ready"
        }
    }

    fn diff(&self, newer: &RoundFlags) -> Vec<FlagChange> {
        [
            (Flag::Locked, self.locked, newer.locked),
            (Flag::Active, self.active, newer.active),
            (Flag::Countdown, self.countdown_active, newer.countdown_active),
        ]
        .into_iter()
        .filter(|(_, old, new)| old != new)
        .map(|(field, old, new)| FlagChange { field, old, new })
        .collect()
    }
}

impl From<GameUpdate> for RoundFlags {
    fn from(update: GameUpdate) -> Self {
        Self {
            active: update.is_active,
            locked: update.buzzers_locked,
            countdown_active: update.countdown_active,
        }
    }
}

#[derive(Debug, Default)]
pub struct SessionState {
    game_id: OnceLock<String>,
    flags: Mutex<RoundFlags>,
    events: Mutex<Option<mpsc::UnboundedSender<BridgeEvent>>>,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_event_sink(&self, sink: mpsc::UnboundedSender<BridgeEvent>) {
        *lock(&self.events) = Some(sink);
    }

    pub fn game_id(&self) -> Option<&str> {
        self.game_id.get().map(String::as_str)
    }

    /// Records the session's game id. Only the first id sticks.
    pub fn set_game_id(&self, game_id: &str) -> bool {
        match self.game_id.set(game_id.to_string()) {
            Ok(()) => {
                info!("Game ID set to {}", game_id);
                true
            }
            Err(_) => {
                if self.game_id() != Some(game_id) {
                    warn!(
                        "Ignoring game ID {}, session already bound to {:?}",
                        game_id,
                        self.game_id()
                    );
                }
                false
            }
        }
    }

    /// Overwrites all three flags at once and reports the ones that changed.
    /// Change events leave in the same order the updates were applied.
    pub fn apply_update(&self, update: GameUpdate) -> Vec<FlagChange> {
        let newer = RoundFlags::from(update);
        let mut flags = lock(&self.flags);
        let changes = flags.diff(&newer);
        *flags = newer;

        for change in &changes {
            log_change(change);
            self.emit(BridgeEvent::FlagChanged(*change));
        }

        changes
    }

    /// Passes a raw `game_update` payload on to the observer, changed or not.
    pub fn forward_game_update(&self, payload: Value) {
        self.emit(BridgeEvent::GameUpdate(payload));
    }

    pub fn snapshot(&self) -> RoundFlags {
        *lock(&self.flags)
    }

    pub fn is_press_eligible(&self) -> bool {
        self.snapshot().is_press_eligible()
    }

    pub fn denial_reason(&self) -> Option<DenialReason> {
        self.snapshot().denial_reason()
    }

    pub fn status_label(&self) -> &'static str {
        self.snapshot().status_label()
    }

    fn emit(&self, event: BridgeEvent) {
        let sink = lock(&self.events).clone();
        if let Some(sink) = sink {
            // Observer went away; nothing to report to.
            let _ = sink.send(event);
        }
    }
}

fn log_change(change: &FlagChange) {
    match change.field {
        Flag::Locked => info!(
            "[GAME] Buzzers are now {}",
            if change.new { "LOCKED" } else { "UNLOCKED" }
        ),
        Flag::Active => info!(
            "[GAME] Game is now {}",
            if change.new { "ACTIVE" } else { "INACTIVE" }
        ),
        Flag::Countdown => info!(
            "[GAME] Countdown state: {}",
            if change.new { "COUNTDOWN" } else { "NO COUNTDOWN" }
        ),
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
