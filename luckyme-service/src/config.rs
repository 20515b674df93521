//! `~/.luckyme/config.yaml`: every field optional, missing file means defaults.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use luckyme_client::paths::config_path;
use luckyme_core::{interest, APP_ATTRIBUTE};

use crate::error::{io_err, ServiceError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Session name registered with the daemon.
    pub app_name: String,
    pub create_interval_secs: u64,
    pub attribute_pool_size: u64,
    pub num_dataobject_attributes: usize,
    pub variance_interest_attributes: u64,
    /// Grid topology side length; 0 disables grid mode.
    pub grid_size: u64,
    /// This node's position in the grid.
    pub node_number: u64,
    /// Only the host with this name publishes.
    pub single_source: Option<String>,
    /// Overrides the detected host name.
    pub host_name: Option<String>,
    /// File attached to every published object.
    pub data_file: Option<PathBuf>,
    /// Fixed RNG seed for repeatable runs.
    pub seed: Option<u64>,
    pub daemon_binary: PathBuf,
    pub spawn_timeout_secs: u64,
    pub publisher_join_timeout_secs: u64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            app_name: APP_ATTRIBUTE.to_string(),
            create_interval_secs: 10,
            attribute_pool_size: 100,
            num_dataobject_attributes: 3,
            variance_interest_attributes: 2,
            grid_size: 0,
            node_number: 0,
            single_source: None,
            host_name: None,
            data_file: None,
            seed: None,
            daemon_binary: PathBuf::from("luckyme-daemon"),
            spawn_timeout_secs: 60,
            publisher_join_timeout_secs: 10,
        }
    }
}

impl ServiceConfig {
    /// Load `~/.luckyme/config.yaml` under `home`.
    pub fn load_at(home: &Path) -> Result<Self, ServiceError> {
        Self::load_from(&config_path(home))
    }

    pub fn load_from(path: &Path) -> Result<Self, ServiceError> {
        let contents = match fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no config file, using defaults");
                return Ok(Self::default());
            }
            Err(err) => return Err(io_err(path, err)),
        };
        if contents.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(&contents).map_err(|source| ServiceError::Config {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn create_interval(&self) -> Duration {
        Duration::from_secs(self.create_interval_secs.max(1))
    }

    pub fn spawn_timeout(&self) -> Duration {
        Duration::from_secs(self.spawn_timeout_secs)
    }

    pub fn publisher_join_timeout(&self) -> Duration {
        Duration::from_secs(self.publisher_join_timeout_secs)
    }

    pub fn grid_enabled(&self) -> bool {
        self.grid_size > 0
    }

    /// Grid mode overrides the configured pool with the row and column ids.
    pub fn effective_pool_size(&self) -> u64 {
        if self.grid_enabled() {
            2 * self.grid_size
        } else {
            self.attribute_pool_size
        }
    }

    /// Number of interests in a generated profile.
    pub fn interest_count(&self) -> usize {
        interest::count_for_variance(self.variance_interest_attributes)
    }

    /// Configured host name, else `$HOSTNAME`, else `/etc/hostname`.
    pub fn resolved_host_name(&self) -> String {
        if let Some(name) = &self.host_name {
            return name.clone();
        }
        std::env::var("HOSTNAME")
            .ok()
            .filter(|h| !h.is_empty())
            .or_else(|| {
                fs::read_to_string("/etc/hostname")
                    .ok()
                    .map(|h| h.trim().to_string())
                    .filter(|h| !h.is_empty())
            })
            .unwrap_or_else(|| "localhost".to_string())
    }
}
