//! Player roster persisted as a JSON file keyed by local player id.

use crate::error::RosterError;
use log::{error, info};
use serde::{Deserialize, Serialize};
use shared::AVAILABLE_PINS;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// A configured buzzer player as the core sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Player {
    pub local_id: String,
    pub name: String,
    pub pin: u8,
    pub enabled: bool,
}

/// Read access the bridge needs from whatever stores players.
pub trait Roster: Send + Sync {
    fn list_enabled_players(&self) -> Vec<Player>;
    fn lookup_player(&self, local_id: &str) -> Option<Player>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct PlayerConfig {
    name: String,
    gpio_pin: u8,
    #[serde(default = "enabled_by_default")]
    enabled: bool,
}

fn enabled_by_default() -> bool {
    true
}

#[derive(Debug)]
pub struct PlayerRoster {
    path: PathBuf,
    players: BTreeMap<String, PlayerConfig>,
}

impl PlayerRoster {
    /// Loads the roster. A missing or unreadable file yields an empty roster.
    pub fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let players = if path.exists() {
            match Self::read(&path) {
                Ok(players) => players,
                Err(e) => {
                    error!("Error loading config {}: {}", path.display(), e);
                    BTreeMap::new()
                }
            }
        } else {
            BTreeMap::new()
        };

        Self { path, players }
    }

    fn read(path: &Path) -> Result<BTreeMap<String, PlayerConfig>, RosterError> {
        let contents = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&contents)?)
    }

    pub fn save(&self) -> Result<(), RosterError> {
        let contents = serde_json::to_string_pretty(&self.players)?;
        std::fs::write(&self.path, contents)?;
        Ok(())
    }

    pub fn generate_id() -> String {
        uuid::Uuid::new_v4().simple().to_string()[..8].to_string()
    }

    pub fn add_player(&mut self, local_id: &str, name: &str, pin: u8) -> Result<(), RosterError> {
        if self.is_pin_used(pin, Some(local_id)) {
            return Err(RosterError::PinInUse(pin));
        }

        self.players.insert(
            local_id.to_string(),
            PlayerConfig {
                name: name.to_string(),
                gpio_pin: pin,
                enabled: true,
            },
        );
        self.save()?;
        info!("Added player {} on pin {}", name, pin);
        Ok(())
    }

    pub fn remove_player(&mut self, local_id: &str) -> Result<Player, RosterError> {
        let config = self
            .players
            .remove(local_id)
            .ok_or_else(|| RosterError::UnknownPlayer(local_id.to_string()))?;
        self.save()?;
        Ok(to_player(local_id, &config))
    }

    /// Changes only the fields given; a pin already owned by someone else is rejected.
    pub fn update_player(
        &mut self,
        local_id: &str,
        name: Option<&str>,
        pin: Option<u8>,
        enabled: Option<bool>,
    ) -> Result<Player, RosterError> {
        let current = self
            .players
            .get(local_id)
            .cloned()
            .ok_or_else(|| RosterError::UnknownPlayer(local_id.to_string()))?;

        if let Some(pin) = pin {
            if pin != current.gpio_pin && self.is_pin_used(pin, Some(local_id)) {
                return Err(RosterError::PinInUse(pin));
            }
        }

        let updated = PlayerConfig {
            name: name.map(str::to_string).unwrap_or(current.name),
            gpio_pin: pin.unwrap_or(current.gpio_pin),
            enabled: enabled.unwrap_or(current.enabled),
        };
        let player = to_player(local_id, &updated);
        self.players.insert(local_id.to_string(), updated);
        self.save()?;
        Ok(player)
    }

    pub fn get_player(&self, local_id: &str) -> Option<Player> {
        self.players
            .get(local_id)
            .map(|config| to_player(local_id, config))
    }

    pub fn all_players(&self) -> Vec<Player> {
        self.players
            .iter()
            .map(|(id, config)| to_player(id, config))
            .collect()
    }

    pub fn enabled_players(&self) -> Vec<Player> {
        self.all_players()
            .into_iter()
            .filter(|player| player.enabled)
            .collect()
    }

    pub fn is_pin_used(&self, pin: u8, exclude: Option<&str>) -> bool {
        self.players
            .iter()
            .any(|(id, config)| Some(id.as_str()) != exclude && config.gpio_pin == pin)
    }

    pub fn available_pins(&self) -> Vec<u8> {
        AVAILABLE_PINS
            .iter()
            .copied()
            .filter(|pin| !self.is_pin_used(*pin, None))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }
}

impl Roster for PlayerRoster {
    fn list_enabled_players(&self) -> Vec<Player> {
        self.enabled_players()
    }

    fn lookup_player(&self, local_id: &str) -> Option<Player> {
        self.get_player(local_id)
    }
}

fn to_player(local_id: &str, config: &PlayerConfig) -> Player {
    Player {
        local_id: local_id.to_string(),
        name: config.name.clone(),
        pin: config.gpio_pin,
        enabled: config.enabled,
    }
}
