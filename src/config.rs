//! Configuration management for armorykit.
//!
//! This module defines the structure of the `armorykit.toml` configuration file,
//! loads it, and resolves a named profile into the `Profile` handed to the launcher.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;

use crate::events::ProcessSignal;
use crate::flags::DashStyle;

/// Default location of the configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "~/.config/armorykit.toml";

/// Top-level configuration structure corresponding to `armorykit.toml`.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Settings shared by every profile.
    #[serde(default)]
    pub bitcoind: BitcoindSettings,
    /// How the two programs are invoked and stopped.
    #[serde(default)]
    pub launch: LaunchSettings,
    /// Named profiles.
    #[serde(default)]
    pub profiles: HashMap<String, ProfileSettings>,
}

/// Global bitcoind settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct BitcoindSettings {
    /// Address bitcoind listens on for peers.
    pub host: String,
    /// Peer port, also used by the preflight check.
    pub port: u16,
    /// JSON-RPC port.
    #[serde(alias = "rpc_port")]
    pub rpcport: Option<u16>,
    /// Blockchain data directory, shared with Armory.
    #[serde(alias = "data_dir")]
    pub datadir: Option<String>,
    /// Path to `bitcoin.conf`.
    pub config: Option<String>,
    /// Extra flags passed to bitcoind for every profile.
    pub flags: Vec<String>,
}

impl Default for BitcoindSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8333,
            rpcport: None,
            datadir: None,
            config: None,
            flags: Vec::new(),
        }
    }
}

/// Per-profile overrides.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ProfileSettings {
    /// Armory data directory for this profile.
    pub armory_datadir: Option<String>,
    /// Extra flags passed to bitcoind for this profile.
    pub bitcoind_flags: Vec<String>,
    /// Extra flags passed to Armory for this profile.
    pub armory_flags: Vec<String>,
}

/// Invocation settings for the supervised programs.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LaunchSettings {
    pub bitcoind_binary: String,
    pub armory_binary: String,
    pub bitcoind_stop_signal: ProcessSignal,
    pub armory_stop_signal: ProcessSignal,
    /// Run each program through `/bin/sh -c` with a composed command line.
    pub shell: bool,
    /// Dash style for generated flags.
    pub flag_dash: DashStyle,
}

impl Default for LaunchSettings {
    fn default() -> Self {
        Self {
            bitcoind_binary: "bitcoind".to_string(),
            armory_binary: "armory".to_string(),
            bitcoind_stop_signal: ProcessSignal::SigTerm,
            armory_stop_signal: ProcessSignal::SigInt,
            shell: false,
            flag_dash: DashStyle::Double,
        }
    }
}

/// Global settings merged with one named profile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Profile {
    pub name: String,
    pub bitcoind: BitcoindSettings,
    pub settings: ProfileSettings,
}

impl Profile {
    /// The `host:port` bitcoind will bind.
    pub fn bitcoind_addr(&self) -> String {
        let host = &self.bitcoind.host;
        if host.contains(':') && !host.starts_with('[') {
            format!("[{}]:{}", host, self.bitcoind.port)
        } else {
            format!("{}:{}", host, self.bitcoind.port)
        }
    }
}

impl Config {
    /// Resolves a profile by name.
    pub fn profile(&self, key: &str) -> Result<Profile> {
        let settings = self.profiles.get(key).ok_or_else(|| {
            let names = self.profile_names();
            if names.is_empty() {
                anyhow!("unknown profile {}, no profiles are configured", key)
            } else {
                anyhow!("unknown profile {}, available: {}", key, names.join(", "))
            }
        })?;
        Ok(Profile {
            name: key.to_string(),
            bitcoind: self.bitcoind.clone(),
            settings: settings.clone(),
        })
    }

    /// Profile names in sorted order.
    pub fn profile_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.profiles.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

/// Loads and parses the configuration from a file path.
///
/// A leading `~/` is expanded to the current user's home directory.
pub fn load_config(path: &Path) -> Result<Config> {
    let path = expand_home(path);
    let raw = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    let config: Config = toml::from_str(&raw)
        .with_context(|| format!("failed to parse config file {}", path.display()))?;
    Ok(config)
}

/// Expands a leading `~/` to the home directory, if one is known.
pub fn expand_home(path: &Path) -> PathBuf {
    match (path.strip_prefix("~"), dirs::home_dir()) {
        (Ok(rest), Some(home)) => home.join(rest),
        _ => path.to_path_buf(),
    }
}
