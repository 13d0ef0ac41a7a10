//! Server configuration.
//!
//! The hub is configured by environment variables layered over sensible
//! defaults, following the same override-then-default shape as the
//! teacher's `Config::load()` — except there is no on-disk config file or
//! keyring here: this process has no secrets to persist across restarts
//! beyond the optional shared auth secret, which is itself an env var.

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::constants::{
    DEFAULT_BIND_ADDR, DEFAULT_MAX_CONNECTIONS, DEFAULT_OFFLINE_MAX_AGE, DEFAULT_QUEUE_CAPACITY,
};

/// Runtime configuration for the hub process.
#[derive(Clone, Debug)]
pub struct Config {
    /// Address the websocket/admin HTTP listener binds to.
    pub bind_addr: SocketAddr,
    /// Maximum number of concurrently admitted sockets.
    pub max_connections: usize,
    /// Per-lane bounded queue capacity for each connection's write pipeline.
    pub queue_capacity: usize,
    /// Time-to-live for a spooled offline message before eviction.
    pub offline_max_age: Duration,
    /// Shared secret accepted by the default `TokenValidator`.
    ///
    /// `None` disables the shared-secret path entirely; a real deployment
    /// should supply its own `TokenValidator` implementation instead.
    pub auth_shared_secret: Option<String>,
    /// Whether the admin HTTP surface (`POST /broadcast`) is mounted.
    pub admin_enabled: bool,
    /// Optional DSN for a persisted `CallStore`. Unset falls back to the
    /// in-memory store.
    pub call_store_url: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: DEFAULT_BIND_ADDR.parse().expect("constant is a valid addr"),
            max_connections: DEFAULT_MAX_CONNECTIONS,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            offline_max_age: DEFAULT_OFFLINE_MAX_AGE,
            auth_shared_secret: None,
            admin_enabled: true,
            call_store_url: None,
        }
    }
}

impl Config {
    /// Builds configuration from defaults, then applies environment variable
    /// overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if an override value is present but cannot be parsed.
    pub fn load() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env_overrides()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(addr) = std::env::var("HUB_BIND_ADDR") {
            self.bind_addr = addr
                .parse()
                .with_context(|| format!("HUB_BIND_ADDR is not a valid socket address: {addr}"))?;
        }

        if let Ok(max) = std::env::var("HUB_MAX_CONNECTIONS") {
            self.max_connections = max
                .parse()
                .with_context(|| format!("HUB_MAX_CONNECTIONS is not a valid number: {max}"))?;
        }

        if let Ok(cap) = std::env::var("HUB_QUEUE_CAPACITY") {
            self.queue_capacity = cap
                .parse()
                .with_context(|| format!("HUB_QUEUE_CAPACITY is not a valid number: {cap}"))?;
        }

        if let Ok(secs) = std::env::var("HUB_OFFLINE_MAX_AGE_SECS") {
            let secs: u64 = secs
                .parse()
                .with_context(|| format!("HUB_OFFLINE_MAX_AGE_SECS is not a valid number: {secs}"))?;
            self.offline_max_age = Duration::from_secs(secs);
        }

        if let Ok(secret) = std::env::var("HUB_AUTH_SHARED_SECRET") {
            self.auth_shared_secret = Some(secret);
        }

        if let Ok(enabled) = std::env::var("HUB_ADMIN_ENABLED") {
            self.admin_enabled = enabled != "0" && !enabled.eq_ignore_ascii_case("false");
        }

        if let Ok(url) = std::env::var("HUB_CALL_STORE_URL") {
            self.call_store_url = Some(url);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_constants() {
        let config = Config::default();
        assert_eq!(config.max_connections, DEFAULT_MAX_CONNECTIONS);
        assert_eq!(config.queue_capacity, DEFAULT_QUEUE_CAPACITY);
        assert_eq!(config.offline_max_age, DEFAULT_OFFLINE_MAX_AGE);
        assert!(config.auth_shared_secret.is_none());
        assert!(config.admin_enabled);
    }

    #[test]
    fn rejects_invalid_bind_addr_override() {
        std::env::set_var("HUB_BIND_ADDR", "not-an-address");
        let result = Config::load();
        std::env::remove_var("HUB_BIND_ADDR");
        assert!(result.is_err());
    }

    #[test]
    fn admin_enabled_override_accepts_false() {
        std::env::set_var("HUB_ADMIN_ENABLED", "false");
        let config = Config::load().expect("valid config");
        std::env::remove_var("HUB_ADMIN_ENABLED");
        assert!(!config.admin_enabled);
    }
}
