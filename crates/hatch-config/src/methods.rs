//! The exposed method table.
//!
//! Each `[[method]]` entry names where a method lives on the bus and which
//! helper program runs when it is called:
//!
//! ```toml
//! [[method]]
//! service = "org.hatch.hatchd"
//! object = "/org/hatch/hatchd"
//! interface = "org.hatch.hatchd.homedir"
//! method = "create"
//! helper = "/usr/libexec/hatch/mkhomedir -m 0700"
//! arguments = 1
//! allow_users = ["root", "gdm"]
//! ```

use std::fs;
use std::io;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::command::{CommandLineError, split_command_line};

/// Errors raised while loading the method table.
#[derive(Debug, Error)]
pub enum MethodTableError {
    /// The file could not be read.
    #[error("failed to read method table '{path}': {source}")]
    Read {
        /// Path that was read.
        path: Utf8PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },
    /// The file is not valid TOML for the table layout.
    #[error("failed to parse method table: {0}")]
    Parse(#[from] toml::de::Error),
    /// A required field is empty.
    #[error("method entry {index} has an empty '{field}'")]
    EmptyField {
        /// Zero-based entry position.
        index: usize,
        /// Field name.
        field: &'static str,
    },
    /// The helper command line could not be split.
    #[error("method entry {index} has a malformed helper command: {source}")]
    Helper {
        /// Zero-based entry position.
        index: usize,
        /// Splitting failure.
        #[source]
        source: CommandLineError,
    },
    /// The helper command line contained no words.
    #[error("method entry {index} has an empty helper command")]
    EmptyHelper {
        /// Zero-based entry position.
        index: usize,
    },
}

/// One exposed method and the helper that implements it.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct MethodEntry {
    /// Well-known bus name.
    pub service: String,
    /// Object path pattern (shell glob).
    pub object: String,
    /// Interface name.
    pub interface: String,
    /// Method name.
    pub method: String,
    /// Helper command line.
    pub helper: String,
    /// Number of string arguments the method takes.
    #[serde(default)]
    pub arguments: u32,
    /// Accounts allowed to call the method. Empty allows everyone.
    #[serde(default)]
    pub allow_users: Vec<String>,
    /// Mirror the reply as a signal addressed to the caller.
    #[serde(default)]
    pub also_signal: bool,
}

impl MethodEntry {
    /// Splits the helper command line into program and arguments.
    ///
    /// # Errors
    ///
    /// Returns [`CommandLineError`] when the command line is malformed.
    pub fn helper_argv(&self) -> Result<Vec<String>, CommandLineError> {
        split_command_line(&self.helper)
    }

    fn validate(&self, index: usize) -> Result<(), MethodTableError> {
        let fields = [
            ("service", &self.service),
            ("object", &self.object),
            ("interface", &self.interface),
            ("method", &self.method),
        ];
        for (field, value) in fields {
            if value.trim().is_empty() {
                return Err(MethodTableError::EmptyField { index, field });
            }
        }
        let argv = self
            .helper_argv()
            .map_err(|source| MethodTableError::Helper { index, source })?;
        if argv.is_empty() {
            return Err(MethodTableError::EmptyHelper { index });
        }
        Ok(())
    }
}

/// All methods exposed by the daemon, in file order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct MethodTable {
    /// Entries in declaration order.
    #[serde(default, rename = "method")]
    pub methods: Vec<MethodEntry>,
}

impl MethodTable {
    /// Parses and validates a table from TOML text.
    ///
    /// # Errors
    ///
    /// Returns [`MethodTableError`] when the text is malformed or an entry is
    /// invalid.
    pub fn from_toml_str(text: &str) -> Result<Self, MethodTableError> {
        let table: Self = toml::from_str(text)?;
        for (index, entry) in table.methods.iter().enumerate() {
            entry.validate(index)?;
        }
        Ok(table)
    }

    /// Reads the table from `path`.
    ///
    /// # Errors
    ///
    /// Returns [`MethodTableError`] when the file cannot be read or parsed.
    pub fn load(path: &Utf8Path) -> Result<Self, MethodTableError> {
        let text = fs::read_to_string(path).map_err(|source| MethodTableError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Iterates over the entries.
    pub fn iter(&self) -> impl Iterator<Item = &MethodEntry> {
        self.methods.iter()
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.methods.len()
    }

    /// Whether the table is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }
}
