//! Defines shared data structures for the Bluetooth module.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Capability a device advertises when it is discovered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Capability {
    LegacySerial,
    AttributeStreaming,
}

impl Capability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LegacySerial => "legacy-serial",
            Self::AttributeStreaming => "attribute-streaming",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A discovered device, supplied by the discovery collaborator.
/// Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceHandle {
    id: String,
    name: String,
    capability: Capability,
}

impl DeviceHandle {
    pub fn new(id: impl Into<String>, name: impl Into<String>, capability: Capability) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            capability,
        }
    }

    /// Platform-specific identifier
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Advertised display name
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn capability(&self) -> Capability {
        self.capability
    }
}

/// Current state of a link. Exactly one value per link instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum LinkStatus {
    Disconnected,
    Connecting,
    Connected { device_name: String },
    Error { reason: String },
}

impl LinkStatus {
    /// `Connecting` or `Connected`
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Connecting | Self::Connected { .. })
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected { .. })
    }
}

/// The two transport implementations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransportKind {
    AttributeStreaming,
    SerialSocket,
}

impl TransportKind {
    /// Capability a device must advertise to be driven by this transport
    pub fn required_capability(self) -> Capability {
        match self {
            Self::AttributeStreaming => Capability::AttributeStreaming,
            Self::SerialSocket => Capability::LegacySerial,
        }
    }

    /// How inbound data arrives
    pub fn delivery(self) -> Delivery {
        match self {
            Self::AttributeStreaming => Delivery::Push,
            Self::SerialSocket => Delivery::Poll,
        }
    }
}

/// Inbound data model of a transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Data is read by actively polling an input channel
    Poll,
    /// Data arrives as asynchronous notifications
    Push,
}

/// Where a raw frame came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameSource {
    /// Notification on the attribute with this identifier
    Attribute(Uuid),
    /// Bytes read from the serial socket
    SerialStream,
}

impl fmt::Display for FrameSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Attribute(uuid) => write!(f, "attribute-uuid={uuid}"),
            Self::SerialStream => f.write_str("serial-stream"),
        }
    }
}

/// Undecoded payload plus its source tag
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame {
    pub source: FrameSource,
    pub bytes: Vec<u8>,
}

impl RawFrame {
    pub fn attribute(uuid: Uuid, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            source: FrameSource::Attribute(uuid),
            bytes: bytes.into(),
        }
    }

    pub fn serial(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            source: FrameSource::SerialStream,
            bytes: bytes.into(),
        }
    }
}
