//! Server configuration.
//!
//! A JSON document persisted in the data directory. CONFIG GET/SET operate
//! on the live copy; CONFIG REWRITE (and every successful SET) writes it
//! back to disk. `server_id` is minted on first boot and never changes for
//! the lifetime of the data directory.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::Error;
use crate::glob::Glob;

pub const CONFIG_FILE: &str = "config";
pub const DEFAULT_KEEPALIVE: u64 = 300;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server_id: String,
    pub requirepass: String,
    pub leaderauth: String,
    #[serde(rename = "protectedMode")]
    pub protected_mode: String,
    pub maxmemory: String,
    pub autogc: u64,
    pub keepalive: u64,
    pub read_only: String,
    pub follow_host: String,
    pub follow_port: u16,
    pub follow_id: String,
    pub follow_pos: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_id: String::new(),
            requirepass: String::new(),
            leaderauth: String::new(),
            protected_mode: "no".to_string(),
            maxmemory: String::new(),
            autogc: 0,
            keepalive: DEFAULT_KEEPALIVE,
            read_only: "no".to_string(),
            follow_host: String::new(),
            follow_port: 0,
            follow_id: String::new(),
            follow_pos: 0,
        }
    }
}

impl Config {
    /// Load from `<dir>/config`, creating the file with defaults and a
    /// fresh server id when absent.
    pub fn load(dir: &Path) -> Result<Self> {
        let path = Self::path(dir);
        let mut config = if path.exists() {
            let raw = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read config: {path:?}"))?;
            serde_json::from_str(&raw)
                .with_context(|| format!("failed to parse config: {path:?}"))?
        } else {
            Config::default()
        };
        if config.server_id.is_empty() {
            config.server_id = uuid::Uuid::new_v4().simple().to_string();
            info!(server_id = %config.server_id, "assigned new server id");
        }
        if config.keepalive == 0 {
            config.keepalive = DEFAULT_KEEPALIVE;
        }
        config.save(dir)?;
        Ok(config)
    }

    pub fn path(dir: &Path) -> PathBuf {
        dir.join(CONFIG_FILE)
    }

    pub fn save(&self, dir: &Path) -> Result<()> {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create data directory: {dir:?}"))?;
        let raw = serde_json::to_string_pretty(self)?;
        std::fs::write(Self::path(dir), raw)
            .with_context(|| format!("failed to write config under {dir:?}"))?;
        Ok(())
    }

    pub fn is_protected(&self) -> bool {
        self.protected_mode == "yes" && self.requirepass.is_empty()
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only == "yes"
    }

    pub fn following(&self) -> bool {
        !self.follow_host.is_empty()
    }

    /// Memory ceiling in bytes; 0 means unlimited.
    pub fn maxmemory_bytes(&self) -> u64 {
        parse_memory(&self.maxmemory).unwrap_or(0)
    }

    /// Readable properties for CONFIG GET, in a stable order.
    pub fn properties(&self) -> Vec<(&'static str, String)> {
        vec![
            ("requirepass", self.requirepass.clone()),
            ("leaderauth", self.leaderauth.clone()),
            ("protected-mode", self.protected_mode.clone()),
            ("maxmemory", self.maxmemory.clone()),
            ("autogc", self.autogc.to_string()),
            ("keepalive", self.keepalive.to_string()),
            ("read-only", self.read_only.clone()),
        ]
    }

    pub fn get_matching(&self, pattern: &str) -> Result<Vec<(&'static str, String)>> {
        let glob = Glob::new(pattern).map_err(anyhow::Error::from)?;
        Ok(self
            .properties()
            .into_iter()
            .filter(|(name, _)| glob.matches(name))
            .collect())
    }

    /// CONFIG SET: validates and applies a single property.
    pub fn set_property(&mut self, name: &str, value: &str) -> std::result::Result<(), Error> {
        let yes_no = |v: &str| -> std::result::Result<String, Error> {
            match v {
                "yes" | "no" => Ok(v.to_string()),
                _ => Err(Error::InvalidArgument(v.to_string())),
            }
        };
        match name.to_lowercase().as_str() {
            "requirepass" => self.requirepass = value.to_string(),
            "leaderauth" => self.leaderauth = value.to_string(),
            "protected-mode" => self.protected_mode = yes_no(value)?,
            "read-only" => self.read_only = yes_no(value)?,
            "maxmemory" => {
                parse_memory(value).ok_or_else(|| Error::InvalidArgument(value.to_string()))?;
                self.maxmemory = value.to_string();
            }
            "autogc" => {
                self.autogc = value
                    .parse()
                    .map_err(|_| Error::InvalidArgument(value.to_string()))?;
            }
            "keepalive" => {
                self.keepalive = value
                    .parse()
                    .map_err(|_| Error::InvalidArgument(value.to_string()))?;
            }
            other => return Err(Error::Other(format!("Unsupported CONFIG parameter: {other}"))),
        }
        Ok(())
    }
}

/// Parse a memory size with an optional kb/mb/gb suffix. Empty and "0"
/// both mean unlimited.
pub fn parse_memory(s: &str) -> Option<u64> {
    let s = s.trim().to_lowercase();
    if s.is_empty() {
        return Some(0);
    }
    let (digits, scale) = if let Some(d) = s.strip_suffix("kb") {
        (d, 1024)
    } else if let Some(d) = s.strip_suffix("mb") {
        (d, 1024 * 1024)
    } else if let Some(d) = s.strip_suffix("gb") {
        (d, 1024 * 1024 * 1024)
    } else {
        (s.as_str(), 1)
    };
    digits.trim().parse::<u64>().ok().map(|v| v * scale)
}
