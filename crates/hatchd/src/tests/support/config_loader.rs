//! Configuration loaders for bootstrap scenarios covering success and failure.

use std::ffi::OsString;
use std::sync::Arc;

use hatch_config::{Config, LogFormat};
use ortho_config::{OrthoConfig, OrthoError};

use crate::bootstrap::ConfigLoader;

/// Loader returning a compact-logging configuration.
#[derive(Debug, Default)]
pub struct TestConfigLoader;

impl ConfigLoader for TestConfigLoader {
    fn load(&self) -> Result<Config, Arc<OrthoError>> {
        Ok(Config {
            log_format: LogFormat::Compact,
            log_filter: "debug".to_owned(),
            ..Config::default()
        })
    }
}

/// Loader that fails by passing an unknown bus on the command line.
#[derive(Debug, Default)]
pub struct FailingConfigLoader;

impl ConfigLoader for FailingConfigLoader {
    fn load(&self) -> Result<Config, Arc<OrthoError>> {
        let args = vec![
            OsString::from("hatchd"),
            OsString::from("--bus"),
            OsString::from("carrier-pigeon"),
        ];
        Config::load_from_iter(args)
    }
}
