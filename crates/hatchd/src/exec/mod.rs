//! Handlers backing the methods listed in the method table.
//!
//! [`ExecHandler`] runs a helper program on behalf of the caller. The helper
//! is forked while the call is being handled. Its arguments are fed and its
//! output collected through non-blocking descriptor watches, and the reply is
//! sent once the child has exited and both output streams have closed.

mod introspect;

use std::cell::RefCell;
use std::io::{self, ErrorKind, Read, Write};
use std::os::fd::{AsRawFd, RawFd};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::rc::Rc;

use hatch_config::{CommandLineError, MethodEntry};
use nix::fcntl::{FcntlArg, OFlag, fcntl};
use nix::sys::wait::WaitStatus;
use nix::unistd::Pid;

use crate::buffer::OutputBuffer;
use crate::dispatch::{CallError, Context, DeferredReply, MethodCall, MethodHandler, output_body};
use crate::event_loop::{EventLoop, WatchControl, WatchFlags};

pub use introspect::{INTROSPECTABLE_INTERFACE, INTROSPECT_METHOD, IntrospectHandler, introspect_xml};

const EXEC_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::exec");

const READ_CHUNK: usize = 4096;

/// Runs a configured helper for each permitted call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecHandler {
    argv: Vec<String>,
    allow_users: Vec<String>,
    also_signal: bool,
}

impl ExecHandler {
    /// Builds a handler running `argv`. An empty allow list admits everyone.
    #[must_use]
    pub fn new(argv: Vec<String>, allow_users: Vec<String>, also_signal: bool) -> Self {
        Self {
            argv,
            allow_users,
            also_signal,
        }
    }

    /// Builds a handler from a method table entry.
    ///
    /// # Errors
    ///
    /// Returns [`CommandLineError`] when the helper command line is malformed.
    pub fn from_entry(entry: &MethodEntry) -> Result<Self, CommandLineError> {
        Ok(Self::new(
            entry.helper_argv()?,
            entry.allow_users.clone(),
            entry.also_signal,
        ))
    }

    /// Helper command line.
    #[must_use]
    pub fn argv(&self) -> &[String] {
        &self.argv
    }

    fn permits(&self, user: &str) -> bool {
        self.allow_users.is_empty() || self.allow_users.iter().any(|allowed| allowed == user)
    }

    fn spawn(&self, call: &MethodCall<'_>) -> io::Result<Child> {
        let (program, args) = self
            .argv
            .split_first()
            .ok_or_else(|| io::Error::new(ErrorKind::InvalidInput, "empty helper command"))?;
        Command::new(program)
            .args(args)
            .env("HATCH_USER", call.user())
            .env("HATCH_UID", call.uid().to_string())
            .env("HATCH_SERVICE", call.service())
            .env("HATCH_OBJECT", call.path())
            .env("HATCH_INTERFACE", call.interface())
            .env("HATCH_METHOD", call.method())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
    }
}

impl MethodHandler for ExecHandler {
    fn handle(&self, call: &mut MethodCall<'_>) {
        if !self.permits(call.user()) {
            call.reply_error(&CallError::Acl {
                user: call.user().to_owned(),
            });
            return;
        }

        let mut child = match self.spawn(call) {
            Ok(child) => child,
            Err(error) => {
                let program = self.argv.first().map_or("", String::as_str);
                call.reply_error(&CallError::Exec {
                    detail: format!("{program}: {error}"),
                });
                return;
            }
        };
        let Ok(raw_pid) = i32::try_from(child.id()) else {
            call.reply_error(&CallError::Exec {
                detail: format!("unexpected child pid {}", child.id()),
            });
            return;
        };
        let pid = Pid::from_raw(raw_pid);

        tracing::info!(
            target: EXEC_TARGET,
            pid = raw_pid,
            helper = %self.argv.join(" "),
            user = call.user(),
            "started helper"
        );

        let job = Rc::new(RefCell::new(Job::new(call.defer(), self.also_signal)));
        let input = argument_lines(call.args());
        let events = call.events();
        if let Some(stdout) = child.stdout.take() {
            watch_stream(events, &job, stdout, Stream::Stdout);
        }
        if let Some(stderr) = child.stderr.take() {
            watch_stream(events, &job, stderr, Stream::Stderr);
        }
        if let Some(stdin) = child.stdin.take() {
            feed_arguments(events, stdin, input);
        }
        let reaped = Rc::clone(&job);
        events.add_pid(pid, move |host, _events, _pid, status| {
            reaped.borrow_mut().exit = Some(exit_code(status));
            finish(host, &reaped);
        });
    }
}

#[derive(Debug, Clone, Copy)]
enum Stream {
    Stdout,
    Stderr,
}

struct Job {
    reply: Option<DeferredReply>,
    also_signal: bool,
    stdout: OutputBuffer,
    stderr: OutputBuffer,
    open_streams: u8,
    exit: Option<i32>,
}

impl Job {
    fn new(reply: DeferredReply, also_signal: bool) -> Self {
        Self {
            reply: Some(reply),
            also_signal,
            stdout: OutputBuffer::new(),
            stderr: OutputBuffer::new(),
            open_streams: 0,
            exit: None,
        }
    }

    fn buffer(&mut self, stream: Stream) -> &mut OutputBuffer {
        match stream {
            Stream::Stdout => &mut self.stdout,
            Stream::Stderr => &mut self.stderr,
        }
    }
}

fn argument_lines(args: &[String]) -> Vec<u8> {
    let mut input = Vec::with_capacity(args.iter().map(|arg| arg.len() + 1).sum());
    for arg in args {
        input.extend_from_slice(arg.as_bytes());
        input.push(b'\n');
    }
    input
}

/// Writes `input` to the helper's stdin as the pipe drains, then closes it.
fn feed_arguments(events: &mut EventLoop<Context>, mut stdin: ChildStdin, input: Vec<u8>) {
    if input.is_empty() {
        return;
    }
    let fd = stdin.as_raw_fd();
    if let Err(error) = set_nonblocking(fd) {
        tracing::warn!(
            target: EXEC_TARGET,
            error = %error,
            "cannot make helper stdin non-blocking; closing it"
        );
        return;
    }
    let mut written = 0;
    events.add_watch(fd, WatchFlags::WRITABLE, move |_host, _events, _fd, _flags| {
        let Some(pending) = input.get(written..) else {
            return WatchControl::Done;
        };
        match stdin.write(pending) {
            Ok(count) => {
                written += count;
                if written < input.len() {
                    return WatchControl::Continue;
                }
            }
            Err(error) if matches!(error.kind(), ErrorKind::Interrupted | ErrorKind::WouldBlock) => {
                return WatchControl::Continue;
            }
            Err(error) => tracing::warn!(
                target: EXEC_TARGET,
                error = %error,
                "helper stopped reading its arguments"
            ),
        }
        WatchControl::Done
    });
}

fn set_nonblocking(fd: RawFd) -> nix::Result<()> {
    let current = OFlag::from_bits_truncate(fcntl(fd, FcntlArg::F_GETFL)?);
    fcntl(fd, FcntlArg::F_SETFL(current | OFlag::O_NONBLOCK))?;
    Ok(())
}

fn watch_stream<R>(events: &mut EventLoop<Context>, job: &Rc<RefCell<Job>>, mut stream: R, kind: Stream)
where
    R: Read + AsRawFd + 'static,
{
    let fd: RawFd = stream.as_raw_fd();
    let job = Rc::clone(job);
    job.borrow_mut().open_streams += 1;
    let mut chunk = [0_u8; READ_CHUNK];
    events.add_watch(fd, WatchFlags::READABLE, move |host, _events, _fd, _flags| {
        match stream.read(&mut chunk) {
            Ok(0) => {}
            Ok(count) => {
                if let Some(read) = chunk.get(..count) {
                    job.borrow_mut().buffer(kind).append(read);
                }
                return WatchControl::Continue;
            }
            Err(error) if matches!(error.kind(), ErrorKind::Interrupted | ErrorKind::WouldBlock) => {
                return WatchControl::Continue;
            }
            Err(error) => tracing::warn!(
                target: EXEC_TARGET,
                stream = ?kind,
                error = %error,
                "failed to read helper output"
            ),
        }
        job.borrow_mut().open_streams -= 1;
        finish(host, &job);
        WatchControl::Done
    });
}

fn exit_code(status: WaitStatus) -> i32 {
    match status {
        WaitStatus::Exited(_, code) => code,
        WaitStatus::Signaled(_, signal, _) => 128 + signal as i32,
        _ => -1,
    }
}

fn finish(host: &mut Context, job: &Rc<RefCell<Job>>) {
    let mut state = job.borrow_mut();
    if state.open_streams > 0 {
        return;
    }
    let Some(code) = state.exit else {
        return;
    };
    let Some(reply) = state.reply.take() else {
        return;
    };
    let body = output_body(code, &state.stdout, &state.stderr);
    let also_signal = state.also_signal;
    drop(state);
    tracing::info!(target: EXEC_TARGET, code, "helper finished");
    host.complete(reply, body, also_signal);
}
