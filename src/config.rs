//! Server configuration.
//!
//! Loaded from an optional TOML file; every key has a default so an empty
//! file (or no file) is a valid configuration.
//!
//! ```toml
//! listen = "0.0.0.0:8080"
//! database = "./hashes.db"
//! compact_on_start = false
//!
//! [store]
//! max_wal_size = 67108864
//! sync_on_write = true
//! ```

use std::fs;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{HashEquivError, HashEquivResult};
use crate::storage::PersistentConfig;

/// Default listen address.
pub const DEFAULT_LISTEN: SocketAddr =
    SocketAddr::new(IpAddr::V4(std::net::Ipv4Addr::UNSPECIFIED), 8080);

/// Default database directory.
pub const DEFAULT_DATABASE: &str = "./hashes.db";

/// Top-level server configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    /// Address the gRPC server binds to.
    pub listen: SocketAddr,
    /// Database directory.
    pub database: PathBuf,
    /// Persistent store tuning.
    pub store: PersistentConfig,
    /// Compact the store once after opening, before serving.
    pub compact_on_start: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: DEFAULT_LISTEN,
            database: PathBuf::from(DEFAULT_DATABASE),
            store: PersistentConfig::default(),
            compact_on_start: false,
        }
    }
}

impl ServerConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    /// Returns a config error if the file cannot be read or parsed, or if
    /// the `[store]` section is out of range.
    pub fn load_from_file(path: &Path) -> HashEquivResult<Self> {
        debug!(path = %path.display(), "loading config");
        let content = fs::read_to_string(path)
            .map_err(|e| HashEquivError::config(path, format!("cannot read: {e}")))?;
        Self::from_toml(&content).map_err(|e| match e {
            HashEquivError::Config { reason, .. } => HashEquivError::config(path, reason),
            other => other,
        })
    }

    /// Parse configuration from TOML text.
    ///
    /// # Errors
    /// Returns a config error for malformed TOML or invalid values.
    pub fn from_toml(content: &str) -> HashEquivResult<Self> {
        let config: Self =
            toml::from_str(content).map_err(|e| HashEquivError::config("<inline>", e.to_string()))?;
        config.validate()
    }

    /// Check values that serde cannot.
    ///
    /// # Errors
    /// Returns a config error if the store settings are rejected.
    pub fn validate(self) -> HashEquivResult<Self> {
        if self.database.as_os_str().is_empty() {
            return Err(HashEquivError::config("<inline>", "database path is empty"));
        }
        let store = self
            .store
            .clone()
            .validate()
            .map_err(|e| HashEquivError::config("<inline>", e.to_string()))?;
        Ok(Self { store, ..self })
    }

    /// Override the host part of the listen address.
    pub fn set_host(&mut self, host: IpAddr) {
        self.listen.set_ip(host);
    }

    /// Override the port part of the listen address.
    pub fn set_port(&mut self, port: u16) {
        self.listen.set_port(port);
    }
}
