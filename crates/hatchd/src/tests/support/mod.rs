//! Test harness utilities for the daemon suites.

mod accounts;
mod bus;
mod config_loader;
mod reporter;
mod sleeper;
mod world;

pub use accounts::FakeAccounts;
pub use bus::{FakeBus, method_call};
pub use config_loader::TestConfigLoader;
pub use reporter::{HealthEvent, RecordingHealthReporter};
pub use world::{ALICE_UID, TestWorld, world};
