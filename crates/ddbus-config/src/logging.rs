//! Output formats understood by the listener's telemetry layer.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// How diagnostic traces are rendered on stderr.
#[derive(
    Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq, EnumString, Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum LogFormat {
    /// One JSON object per event, for log shippers.
    #[default]
    Json,
    /// Single-line human-readable events.
    Compact,
}

/// Error raised when a [`LogFormat`] name is not recognised.
pub type LogFormatParseError = strum::ParseError;
