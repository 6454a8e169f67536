use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::bluetooth::constants::{
    ACQUISITION_INTERVAL_MS, ERROR_BACKOFF_MS, MAX_CONSECUTIVE_IO_ERRORS, READ_BUFFER_SIZE,
    READ_TIMEOUT_MS,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AcquisitionConfig {
    /// Delay between acquisition cycles.
    pub interval_ms: u64,

    /// Delay used for the one cycle after an I/O error.
    pub error_backoff_ms: u64,

    /// Upper bound on a single poll read.
    pub read_timeout_ms: u64,

    /// Size of the poll read buffer in bytes.
    pub read_buffer_size: usize,

    /// Consecutive I/O errors that end a session.
    pub max_consecutive_io_errors: u32,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        AcquisitionConfig {
            interval_ms: ACQUISITION_INTERVAL_MS,
            error_backoff_ms: ERROR_BACKOFF_MS,
            read_timeout_ms: READ_TIMEOUT_MS,
            read_buffer_size: READ_BUFFER_SIZE,
            max_consecutive_io_errors: MAX_CONSECUTIVE_IO_ERRORS,
        }
    }
}

impl AcquisitionConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn error_backoff(&self) -> Duration {
        Duration::from_millis(self.error_backoff_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}
