//! Argument definitions for `hatch-call`.

use clap::Parser;

/// Default time to wait for the daemon's reply.
pub(crate) const DEFAULT_TIMEOUT_MS: u64 = 25_000;

/// Invokes one method exported by the hatch daemon.
#[derive(Parser, Debug)]
#[command(name = "hatch-call", version)]
pub(crate) struct Cli {
    /// Uses the session bus instead of the system bus.
    #[arg(long)]
    pub(crate) session: bool,
    /// Milliseconds to wait for the reply.
    #[arg(long, value_name = "MS", default_value_t = DEFAULT_TIMEOUT_MS)]
    pub(crate) timeout_ms: u64,
    /// Appends one argument per line read from standard input.
    #[arg(long)]
    pub(crate) stdin: bool,
    /// Well-known name of the service.
    pub(crate) service: String,
    /// Object path.
    pub(crate) object: String,
    /// Interface name.
    pub(crate) interface: String,
    /// Method name.
    pub(crate) method: String,
    /// String arguments passed to the method.
    #[arg(
        value_name = "ARG",
        num_args = 0..,
        trailing_var_arg = true,
        allow_hyphen_values = true
    )]
    pub(crate) arguments: Vec<String>,
}
