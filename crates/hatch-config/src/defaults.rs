use camino::Utf8PathBuf;

use crate::bus::BusKind;
use crate::logging::LogFormat;

/// Default log filter expression used by the binaries.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Seconds between reconnection attempts once the fast retries are spent.
pub const DEFAULT_RECONNECT_TIMEOUT_SECS: u64 = 30;

/// Location of the exposed method table when none is configured.
pub const DEFAULT_METHODS_PATH: &str = "/etc/hatch/methods.toml";

/// Default log filter expression used by the binaries.
pub fn default_log_filter() -> &'static str {
    DEFAULT_LOG_FILTER
}

/// Owned log filter value used where allocation is required (e.g. serde).
pub fn default_log_filter_string() -> String {
    DEFAULT_LOG_FILTER.to_string()
}

/// Default logging format for the binaries.
pub fn default_log_format() -> LogFormat {
    LogFormat::Json
}

/// Default bus the daemon binds its services on.
pub fn default_bus() -> BusKind {
    BusKind::System
}

/// Default reconnect interval in whole seconds.
pub fn default_reconnect_timeout() -> u64 {
    DEFAULT_RECONNECT_TIMEOUT_SECS
}

/// Default path to the method table.
pub fn default_methods_path() -> Utf8PathBuf {
    Utf8PathBuf::from(DEFAULT_METHODS_PATH)
}
