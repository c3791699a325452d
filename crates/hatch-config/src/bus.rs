use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Message bus the daemon attaches its services to.
#[derive(
    Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq, Hash, EnumString, Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum BusKind {
    /// The system-wide bus; the normal deployment target.
    #[default]
    System,
    /// The per-login session bus, mainly useful for local testing.
    Session,
}

/// Errors encountered while parsing a [`BusKind`] from text.
pub type BusKindParseError = strum::ParseError;
