use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use log::LevelFilter;
use serde::Deserialize;

/// Prefix of every environment variable read by [`Config::from_env`].
pub const ENV_PREFIX: &str = "PEER_CALLS_";

/// Server settings, read from `PEER_CALLS_*` environment variables.
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Config {
    #[serde(default = "default_address")]
    pub address: SocketAddr,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// How long a call may ring before the sweeper marks it missed.
    #[serde(default = "default_ring_timeout_secs")]
    pub ring_timeout_secs: u64,
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
    /// Require `missed` requests to come from one of the call's parties.
    #[serde(default)]
    pub strict_missed: bool,
    /// JSON file mapping conversation ids to their member ids.
    #[serde(default)]
    pub membership_file: Option<PathBuf>,
}

fn default_address() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 9001))
}

fn default_log_level() -> String {
    "info".to_owned()
}

const fn default_ring_timeout_secs() -> u64 {
    45
}

const fn default_sweep_interval_secs() -> u64 {
    5
}

impl Default for Config {
    fn default() -> Self {
        Self {
            address: default_address(),
            log_level: default_log_level(),
            ring_timeout_secs: default_ring_timeout_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
            strict_missed: false,
            membership_file: None,
        }
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        envy::prefixed(ENV_PREFIX)
            .from_env()
            .context("invalid PEER_CALLS_* environment variables")
    }

    pub fn from_vars(vars: impl IntoIterator<Item = (String, String)>) -> anyhow::Result<Self> {
        envy::prefixed(ENV_PREFIX)
            .from_iter(vars)
            .context("invalid PEER_CALLS_* variables")
    }

    /// Replace the listen address with a command-line override, if any.
    pub fn with_address_arg(mut self, arg: Option<String>) -> anyhow::Result<Self> {
        if let Some(arg) = arg {
            self.address = arg
                .parse()
                .with_context(|| format!("invalid ip address provided: {arg}"))?;
        }
        Ok(self)
    }

    pub fn level_filter(&self) -> anyhow::Result<LevelFilter> {
        self.log_level
            .parse()
            .with_context(|| format!("unknown log level {}", self.log_level))
    }

    pub const fn ring_timeout(&self) -> Duration {
        Duration::from_secs(self.ring_timeout_secs)
    }

    pub const fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}
