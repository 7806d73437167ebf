//! Game configuration consumed by sessions and the tick scheduler
//!
//! Values come from built-in defaults, optionally overlaid by a TOML file,
//! then by command-line flags in `main`. Every field of the file is optional.

use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Read(#[from] std::io::Error),
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// How a running session decides it is over
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case", tag = "mode")]
pub enum WinCondition {
    /// Ends when at most one snake is alive.
    LastStanding,
    /// Ends after `ticks` ticks, or earlier if every snake is dead.
    TimeLimit { ticks: u64 },
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct GameConfig {
    pub board_width: u32,
    pub board_height: u32,
    pub tick_interval_ms: u64,
    pub min_food: usize,
    pub max_food: usize,
    pub initial_length: usize,
    pub max_players: usize,
    pub win_condition: WinCondition,
    /// A full snapshot follows the diff every this many ticks.
    pub snapshot_interval: u64,
    /// Outbound frames a client may have queued before it is dropped.
    pub outbound_buffer: usize,
    /// Fixed food RNG seed. When unset each session derives its own.
    pub seed: Option<u64>,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            board_width: 40,
            board_height: 30,
            tick_interval_ms: 150,
            min_food: 1,
            max_food: 8,
            initial_length: 4,
            max_players: 8,
            win_condition: WinCondition::LastStanding,
            snapshot_interval: 50,
            outbound_buffer: 64,
            seed: None,
        }
    }
}

impl GameConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path.as_ref())?;
        let config: GameConfig = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    /// Rejects settings the simulation cannot run with.
    ///
    /// Every seat spawns on its own row, so the board must be at least as
    /// tall as the player cap.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_interval_ms == 0 {
            return Err(ConfigError::Invalid("tick interval must be positive".into()));
        }
        if self.board_width < 4 || self.board_height < 2 {
            return Err(ConfigError::Invalid(format!(
                "board {}x{} is too small",
                self.board_width, self.board_height
            )));
        }
        if self.max_players == 0 {
            return Err(ConfigError::Invalid("max players must be positive".into()));
        }
        if (self.board_height as usize) < self.max_players {
            return Err(ConfigError::Invalid(format!(
                "board height {} cannot seat {} players",
                self.board_height, self.max_players
            )));
        }
        if self.min_food > self.max_food {
            return Err(ConfigError::Invalid(format!(
                "min food {} exceeds max food {}",
                self.min_food, self.max_food
            )));
        }
        if self.initial_length == 0 {
            return Err(ConfigError::Invalid("initial length must be positive".into()));
        }
        if self.snapshot_interval == 0 || self.outbound_buffer == 0 {
            return Err(ConfigError::Invalid(
                "snapshot interval and outbound buffer must be positive".into(),
            ));
        }
        if let WinCondition::TimeLimit { ticks: 0 } = self.win_condition {
            return Err(ConfigError::Invalid("time limit must be positive".into()));
        }
        Ok(())
    }
}
