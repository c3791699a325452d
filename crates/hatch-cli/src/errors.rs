//! Error types for the client runtime.

use std::io;

use thiserror::Error;

/// Failures that stop a call before a result code is known.
#[derive(Debug, Error)]
pub enum CliError {
    /// Arguments could not be parsed.
    #[error("{0}")]
    Usage(#[from] clap::Error),
    /// Standard input could not be read.
    #[error("failed to read arguments from stdin: {0}")]
    ReadArguments(#[source] io::Error),
    /// No connection to the bus could be opened.
    #[error("failed to connect to the message bus: {0}")]
    Connect(String),
    /// The request could not be built.
    #[error("invalid request: {0}")]
    Request(String),
    /// The daemon answered with an error.
    #[error("{name}: {message}")]
    Remote {
        /// Error name.
        name: String,
        /// Error detail.
        message: String,
    },
    /// The reply did not carry a result code and text.
    #[error("unexpected reply: {0}")]
    Decode(String),
    /// Output could not be written.
    #[error("failed to write output: {0}")]
    Write(#[source] io::Error),
}
