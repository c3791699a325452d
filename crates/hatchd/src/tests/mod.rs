//! Test suites for the hatch daemon.

mod support;
mod unit;
