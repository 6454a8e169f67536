//! Device name rules: the discovery filter and transport selection

use log::debug;
use regex::Regex;

use crate::core::bluetooth::constants::MODERN_NAME_PATTERNS;
use crate::core::bluetooth::types::{DeviceHandle, TransportKind};

/// Returns true if `name` contains one of `fragments`, ignoring case.
pub fn matches_known_model<S: AsRef<str>>(name: &str, fragments: &[S]) -> bool {
    let name = name.to_lowercase();
    fragments
        .iter()
        .any(|fragment| name.contains(&fragment.as_ref().to_lowercase()))
}

/// Picks the transport for a device from its advertised name.
#[derive(Debug, Clone)]
pub struct TransportSelector {
    modern_patterns: Vec<Regex>,
}

impl TransportSelector {
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Result<Self, regex::Error> {
        let modern_patterns = patterns
            .iter()
            .map(|p| Regex::new(p.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { modern_patterns })
    }

    /// Attribute streaming for the modern sensor generation, serial socket otherwise.
    pub fn select(&self, device: &DeviceHandle) -> TransportKind {
        self.kind_for_name(device.name())
    }

    pub fn kind_for_name(&self, name: &str) -> TransportKind {
        let kind = if self.is_modern_generation(name) {
            TransportKind::AttributeStreaming
        } else {
            TransportKind::SerialSocket
        };
        debug!("Selected {:?} for device {:?}", kind, name);
        kind
    }

    fn is_modern_generation(&self, name: &str) -> bool {
        self.modern_patterns.iter().any(|re| re.is_match(name))
    }
}

impl Default for TransportSelector {
    fn default() -> Self {
        let modern_patterns = MODERN_NAME_PATTERNS
            .iter()
            .filter_map(|p| Regex::new(p).ok())
            .collect();
        Self { modern_patterns }
    }
}
