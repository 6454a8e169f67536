pub mod acquisition_config;
pub mod link_config;

use std::path::Path;

use anyhow::{Result, bail};
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use tokio::fs;

pub use crate::config::acquisition_config::AcquisitionConfig;
pub use crate::config::link_config::{DiscoveryConfig, LinkConfig};
use crate::utils::ensure_directory_exists;

pub const CONFIG_FILE_NAME: &str = "sleeplink.json";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub link: LinkConfig,
    pub acquisition: AcquisitionConfig,
    pub discovery: DiscoveryConfig,
}

impl AppConfig {
    /// Loads the config from `path`, falling back to defaults when the file is missing.
    pub async fn load_config<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            warn!("Config file not found at {:?}, using default.", path);
            return Ok(Self::default());
        }

        let config_json = fs::read_to_string(path).await?;
        let config: Self = serde_json::from_str(&config_json)?;
        config.validate()?;

        info!("Config loaded from {:?}", path);
        Ok(config)
    }

    /// Saves the config to `path`, creating the parent directory if needed.
    pub async fn save_config<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(dir) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            ensure_directory_exists(dir).await?;
        }

        let config_json = match serde_json::to_string_pretty(&self) {
            Ok(json) => json,
            Err(e) => {
                error!("Failed to serialize config to JSON: {}", e);
                return Err(e.into());
            }
        };

        fs::write(path, config_json).await?;

        info!("Config saved to {:?}.", path);
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let acq = &self.acquisition;
        if acq.interval_ms == 0 || acq.error_backoff_ms == 0 || acq.read_timeout_ms == 0 {
            bail!("acquisition intervals and timeouts must be non-zero");
        }
        if acq.read_buffer_size == 0 {
            bail!("read_buffer_size must be non-zero");
        }
        if acq.max_consecutive_io_errors == 0 {
            bail!("max_consecutive_io_errors must be at least 1");
        }
        if self.link.connect_timeout_secs == 0 || self.link.send_timeout_ms == 0 {
            bail!("link timeouts must be non-zero");
        }
        self.link.selector()?;
        Ok(())
    }
}
