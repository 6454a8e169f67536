//! Constants used throughout the device link
//! This module contains the well-known attribute identifiers, default
//! timeouts and cadence values, and the command tokens.

use uuid::Uuid;

/// Standard heart-rate service
pub const UUID_HEART_RATE_SERVICE: Uuid = Uuid::from_u128(0x0000180d_0000_1000_8000_00805f9b34fb);
/// Heart-rate measurement characteristic (flags byte + 8/16-bit value)
pub const UUID_HEART_RATE_MEASUREMENT: Uuid = Uuid::from_u128(0x00002a37_0000_1000_8000_00805f9b34fb);

/// Vendor health service on modern watches
pub const UUID_VENDOR_HEALTH_SERVICE: Uuid = Uuid::from_u128(0x0000fe26_0000_1000_8000_00805f9b34fb);
/// Step count characteristic inside the vendor health service
pub const UUID_STEP_COUNT_CHAR: Uuid = Uuid::from_u128(0x00000001_0000_1000_8000_00805f9b34fb);
/// Sleep characteristic inside the vendor health service
pub const UUID_SLEEP_DATA_CHAR: Uuid = Uuid::from_u128(0x00000002_0000_1000_8000_00805f9b34fb);

/// Serial port profile, used by the serial-socket transport
pub const UUID_SERIAL_PORT_PROFILE: Uuid = Uuid::from_u128(0x00001101_0000_1000_8000_00805f9b34fb);

/// Characteristics subscribed to on the attribute-streaming transport
pub const SUBSCRIBED_CHARACTERISTICS: [Uuid; 3] = [
    UUID_HEART_RATE_MEASUREMENT,
    UUID_STEP_COUNT_CHAR,
    UUID_SLEEP_DATA_CHAR,
];

/// Name patterns of the sensor generation that speaks attribute streaming
pub const MODERN_NAME_PATTERNS: [&str; 1] = [r"(?i)galaxy\s*watch\s*[4-7]"];

/// Model-name fragments accepted by the discovery filter
pub const KNOWN_MODEL_FRAGMENTS: [&str; 7] = [
    "Galaxy Watch",
    "Samsung Galaxy Watch",
    "SM-R",
    "Watch4",
    "Watch5",
    "Watch6",
    "Watch7",
];

/// Timeout for a connect attempt in seconds
pub const CONNECT_TIMEOUT_SECS: u64 = 12;

/// Upper bound on one outbound command write in milliseconds
pub const SEND_TIMEOUT_MS: u64 = 2000;

/// Interval between acquisition cycles in milliseconds
pub const ACQUISITION_INTERVAL_MS: u64 = 2000;

/// Interval used for the one cycle following an I/O error
pub const ERROR_BACKOFF_MS: u64 = 5000;

/// Per-cycle read timeout for poll-based transports
pub const READ_TIMEOUT_MS: u64 = 1000;

/// Upper bound on a single serial read
pub const READ_BUFFER_SIZE: usize = 1024;

/// Consecutive I/O errors that end a monitoring session
pub const MAX_CONSECUTIVE_IO_ERRORS: u32 = 3;

/// Pending push notifications kept per attribute transport
pub const NOTIFICATION_QUEUE_DEPTH: usize = 64;
