//! Health command protocol
//! Plaintext ASCII tokens written to the transport as raw bytes. There is no
//! acknowledgement framing; the device answers with a frame on its own schedule.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;

use crate::error::LinkError;

/// Commands understood by the wrist-side relay
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HealthCommand {
    /// Request every field at once
    GetHealthData,
    GetHeartRate,
    GetSteps,
    GetSleepData,
}

impl HealthCommand {
    pub const ALL: [HealthCommand; 4] = [
        Self::GetHealthData,
        Self::GetHeartRate,
        Self::GetSteps,
        Self::GetSleepData,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::GetHealthData => "GET_HEALTH_DATA",
            Self::GetHeartRate => "GET_HEART_RATE",
            Self::GetSteps => "GET_STEPS",
            Self::GetSleepData => "GET_SLEEP_DATA",
        }
    }

    /// Convert the command to its wire representation
    pub fn to_bytes(&self) -> Vec<u8> {
        self.as_str().as_bytes().to_vec()
    }
}

impl fmt::Display for HealthCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown health command: {0}")]
pub struct UnknownCommand(pub String);

impl FromStr for HealthCommand {
    type Err = UnknownCommand;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let token = s.trim();
        Self::ALL
            .into_iter()
            .find(|cmd| cmd.as_str().eq_ignore_ascii_case(token))
            .ok_or_else(|| UnknownCommand(token.to_string()))
    }
}

/// Command sender trait
#[async_trait]
pub trait CommandSender {
    /// Send a command to the device
    async fn send_command(&self, command: HealthCommand) -> Result<(), LinkError>;
}
