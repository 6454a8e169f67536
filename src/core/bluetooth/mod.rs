//! Device link for wrist-worn health sensors
//! This module handles transport selection, connecting, and receiving data
//! over either the attribute-streaming or the serial-socket transport.

pub mod attribute;
pub mod commands;
#[cfg(feature = "bluetooth")]
mod connection;
pub mod constants;
pub mod device;
mod manager;
#[cfg(feature = "bluetooth")]
mod notification;
pub mod serial;
pub mod transport;
mod types;

// Re-export types that should be publicly accessible
pub use attribute::{AttributeTransport, GattConnector, GattLink};
pub use commands::{CommandSender, HealthCommand, UnknownCommand};
#[cfg(feature = "bluetooth")]
pub use connection::{BluestConnector, BluestLink};
pub use device::{TransportSelector, matches_known_model};
pub use manager::LinkManager;
#[cfg(feature = "bluetooth")]
pub use notification::NotificationHandler;
pub use serial::{SerialStream, SerialTransport, SocketConnector, TcpSocketConnector};
pub use transport::{ConnectorFactory, SharedTransport, Transport, TransportFactory};
pub use types::{
    Capability, Delivery, DeviceHandle, FrameSource, LinkStatus, RawFrame, TransportKind,
};
