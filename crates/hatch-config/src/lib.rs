//! Shared configuration for the hatch daemon and its client.
//!
//! Values are layered by `ortho_config`: built-in defaults, then an optional
//! TOML file (`--config-path` or `HATCH_CONFIG_PATH`), then `HATCH_*`
//! environment variables, then command-line flags.

mod bus;
pub mod command;
mod defaults;
mod logging;
pub mod methods;

use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use ortho_config::OrthoConfig;
use serde::{Deserialize, Serialize};

pub use bus::{BusKind, BusKindParseError};
pub use command::{CommandLineError, split_command_line};
pub use defaults::{
    DEFAULT_LOG_FILTER, DEFAULT_METHODS_PATH, DEFAULT_RECONNECT_TIMEOUT_SECS, default_bus,
    default_log_filter, default_log_filter_string, default_log_format, default_methods_path,
    default_reconnect_timeout,
};
pub use logging::{LogFormat, LogFormatParseError};
pub use methods::{MethodEntry, MethodTable, MethodTableError};

/// Runtime configuration for the daemon.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, OrthoConfig)]
#[ortho_config(prefix = "HATCH")]
pub struct Config {
    /// Bus the services are exposed on.
    #[ortho_config(default = default_bus())]
    pub bus: BusKind,
    /// Seconds between reconnection attempts. Zero makes a lost connection
    /// terminate the daemon instead.
    #[ortho_config(default = DEFAULT_RECONNECT_TIMEOUT_SECS)]
    pub reconnect_timeout: u64,
    /// `tracing` filter directive applied to the subscriber.
    #[ortho_config(default = default_log_filter_string())]
    pub log_filter: String,
    /// Log output format.
    #[ortho_config(default = default_log_format())]
    pub log_format: LogFormat,
    /// Resolve each caller's security label before dispatching.
    #[ortho_config(default = false)]
    pub security_context_lookup: bool,
    /// TOML file listing the exposed methods.
    #[ortho_config(default = default_methods_path())]
    pub methods_path: Utf8PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bus: default_bus(),
            reconnect_timeout: default_reconnect_timeout(),
            log_filter: default_log_filter_string(),
            log_format: default_log_format(),
            security_context_lookup: false,
            methods_path: default_methods_path(),
        }
    }
}

impl Config {
    /// Bus the services are exposed on.
    #[must_use]
    pub fn bus(&self) -> BusKind {
        self.bus
    }

    /// Interval between reconnection attempts; zero means exit on disconnect.
    #[must_use]
    pub fn reconnect_timeout(&self) -> Duration {
        Duration::from_secs(self.reconnect_timeout)
    }

    /// Filter directive for the tracing subscriber.
    #[must_use]
    pub fn log_filter(&self) -> &str {
        &self.log_filter
    }

    /// Output format for the tracing subscriber.
    #[must_use]
    pub fn log_format(&self) -> LogFormat {
        self.log_format
    }

    /// Whether callers' security labels are looked up per request.
    #[must_use]
    pub fn security_context_lookup(&self) -> bool {
        self.security_context_lookup
    }

    /// Path of the method table.
    #[must_use]
    pub fn methods_path(&self) -> &Utf8Path {
        &self.methods_path
    }
}
