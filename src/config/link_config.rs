use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::bluetooth::constants::{
    CONNECT_TIMEOUT_SECS, KNOWN_MODEL_FRAGMENTS, MODERN_NAME_PATTERNS, SEND_TIMEOUT_MS,
};
use crate::core::bluetooth::{TransportSelector, matches_known_model};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// Upper bound on a single connect attempt.
    pub connect_timeout_secs: u64,

    /// Upper bound on writing one command to the device.
    pub send_timeout_ms: u64,

    /// Regexes over the advertised name that select attribute streaming.
    /// Anything else uses the serial socket.
    pub modern_name_patterns: Vec<String>,

    /// `host:port` of a TCP bridge relaying the serial socket, if any.
    pub serial_bridge_addr: Option<String>,
}

impl Default for LinkConfig {
    fn default() -> Self {
        LinkConfig {
            connect_timeout_secs: CONNECT_TIMEOUT_SECS,
            send_timeout_ms: SEND_TIMEOUT_MS,
            modern_name_patterns: MODERN_NAME_PATTERNS.iter().map(|p| p.to_string()).collect(),
            serial_bridge_addr: None,
        }
    }
}

impl LinkConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }

    pub fn selector(&self) -> Result<TransportSelector, regex::Error> {
        TransportSelector::new(&self.modern_name_patterns)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Model-name fragments a discovered device must contain, ignoring case.
    pub name_fragments: Vec<String>,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        DiscoveryConfig {
            name_fragments: KNOWN_MODEL_FRAGMENTS.iter().map(|f| f.to_string()).collect(),
        }
    }
}

impl DiscoveryConfig {
    pub fn accepts(&self, name: &str) -> bool {
        matches_known_model(name, &self.name_fragments)
    }
}
