//! Configuration system.
//!
//! Loads engine configuration from JSON strings/files. Every field has a
//! default, so a partial file (or `{}`) is a valid configuration.

use std::{path::Path, time::Duration};

use anyhow::{ensure, Context};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{math::Vec2, physics::BodyParams};

/// Root configuration shared by client/server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Server listen address, e.g. `127.0.0.1:40000`.
    #[serde(default = "default_server_addr")]
    pub server_addr: String,
    /// Fixed scheduler tick, in milliseconds.
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,
    /// Where newly connected bodies appear.
    #[serde(default = "default_spawn")]
    pub spawn: Vec2,
    /// Physical parameters of newly connected bodies.
    #[serde(default)]
    pub body: BodyParams,
    /// How long a new connection may take to say hello.
    #[serde(default = "default_handshake_timeout_ms")]
    pub handshake_timeout_ms: u64,
}

fn default_server_addr() -> String {
    "127.0.0.1:40000".to_string()
}

fn default_tick_ms() -> u64 {
    20
}

fn default_spawn() -> Vec2 {
    Vec2::new(500.0, 500.0)
}

fn default_handshake_timeout_ms() -> u64 {
    5000
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            server_addr: default_server_addr(),
            tick_ms: default_tick_ms(),
            spawn: default_spawn(),
            body: BodyParams::default(),
            handshake_timeout_ms: default_handshake_timeout_ms(),
        }
    }
}

impl EngineConfig {
    /// Parses config from JSON.
    pub fn from_json_str(s: &str) -> serde_json::Result<Self> {
        serde_json::from_str(s)
    }

    /// Reads, parses and validates a JSON config file.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("read config {}", path.display()))?;
        let cfg = Self::from_json_str(&text)
            .with_context(|| format!("parse config {}", path.display()))?;
        cfg.validate()?;
        debug!(path = %path.display(), addr = %cfg.server_addr, tick_ms = cfg.tick_ms, "Config loaded");
        Ok(cfg)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        ensure!(self.tick_ms > 0, "tick_ms must be positive");
        ensure!(self.spawn.is_finite(), "spawn point must be finite");
        self.body.validate().context("invalid body parameters")?;
        Ok(())
    }

    /// Scheduler sleep between ticks.
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }

    /// Simulated seconds advanced per tick.
    pub fn tick_dt(&self) -> f64 {
        self.tick_interval().as_secs_f64()
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }
}
