//! Thin client for the hatch daemon.
//!
//! `hatch-call` invokes one exported method synchronously, prints the
//! standard output and standard error the helper produced, and exits with the
//! helper's result code. Transport failures exit with status 2.

mod cli;
mod errors;
mod transport;

use std::ffi::OsString;
use std::io::{BufRead, Write};
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use hatch_config::BusKind;

use cli::Cli;
pub use errors::CliError;
pub use transport::{CallReply, CallRequest, DbusCaller, MethodCaller};

/// Exit status for failures before a result code is known.
pub const TRANSPORT_FAILURE: u8 = 2;

/// Runs the client against the bus selected on the command line.
pub fn run<I, R, W, E>(args: I, stdin: &mut R, stdout: &mut W, stderr: &mut E) -> ExitCode
where
    I: IntoIterator<Item = OsString>,
    R: BufRead,
    W: Write,
    E: Write,
{
    run_with_caller(args, stdin, stdout, stderr, DbusCaller::new)
}

/// Runs the client with the caller built by `connect`.
pub fn run_with_caller<I, R, W, E, C, F>(
    args: I,
    stdin: &mut R,
    stdout: &mut W,
    stderr: &mut E,
    connect: F,
) -> ExitCode
where
    I: IntoIterator<Item = OsString>,
    R: BufRead,
    W: Write,
    E: Write,
    C: MethodCaller,
    F: FnOnce(BusKind) -> C,
{
    match execute(args, stdin, stdout, stderr, connect) {
        Ok(code) => ExitCode::from(exit_status(code)),
        Err(error) => ExitCode::from(report(stderr, &error)),
    }
}

/// Prints `error` and returns the exit status for it. Usage errors keep
/// clap's status unless the message itself cannot be written.
fn report<E: Write>(stderr: &mut E, error: &CliError) -> u8 {
    let (written, status) = match error {
        CliError::Usage(usage) => (
            write!(stderr, "{usage}"),
            u8::try_from(usage.exit_code()).unwrap_or(TRANSPORT_FAILURE),
        ),
        other => (writeln!(stderr, "hatch-call: {other}"), TRANSPORT_FAILURE),
    };
    match written.and_then(|()| stderr.flush()) {
        Ok(()) => status,
        Err(_) => TRANSPORT_FAILURE,
    }
}

fn execute<I, R, W, E, C, F>(
    args: I,
    stdin: &mut R,
    stdout: &mut W,
    stderr: &mut E,
    connect: F,
) -> Result<i32, CliError>
where
    I: IntoIterator<Item = OsString>,
    R: BufRead,
    W: Write,
    E: Write,
    C: MethodCaller,
    F: FnOnce(BusKind) -> C,
{
    let cli = Cli::try_parse_from(args)?;
    let mut arguments = cli.arguments;
    if cli.stdin {
        arguments.extend(read_lines(stdin)?);
    }
    let request = CallRequest {
        service: cli.service,
        object: cli.object,
        interface: cli.interface,
        method: cli.method,
        arguments,
        timeout: Duration::from_millis(cli.timeout_ms),
    };
    let bus = if cli.session {
        BusKind::Session
    } else {
        BusKind::System
    };

    let reply = connect(bus).call(&request)?;
    stdout
        .write_all(reply.stdout.as_bytes())
        .and_then(|()| stderr.write_all(reply.stderr.as_bytes()))
        .and_then(|()| stdout.flush())
        .map_err(CliError::Write)?;
    Ok(reply.code)
}

fn read_lines<R: BufRead>(stdin: &mut R) -> Result<Vec<String>, CliError> {
    stdin
        .lines()
        .collect::<Result<Vec<_>, _>>()
        .map_err(CliError::ReadArguments)
}

/// Maps a result code onto a process exit status the way a shell would.
fn exit_status(code: i32) -> u8 {
    u8::try_from(code.rem_euclid(256)).unwrap_or(u8::MAX)
}
