use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// How the daemon renders its `tracing` events on stderr.
#[derive(
    Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq, EnumString, Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum LogFormat {
    /// One JSON object per event with fields flattened to the top level.
    #[default]
    Json,
    /// Single line text with a timestamp, for terminals.
    Compact,
    /// Single line text without timestamps or colour, for a service manager
    /// that stamps each line itself.
    Journal,
}

impl LogFormat {
    /// Whether ANSI colour may be used when stderr is a terminal.
    #[must_use]
    pub const fn colour(self) -> bool {
        matches!(self, Self::Compact)
    }
}

/// Errors encountered while parsing a [`LogFormat`] from text.
pub type LogFormatParseError = strum::ParseError;
