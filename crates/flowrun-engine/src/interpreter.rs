//! Recursive evaluation of blocks against a pair of ambient streams.
//!
//! Every command, pipe writer and stderr merge runs in a forked child. The
//! parent always waits for the children it creates before returning, so
//! blocks inside a concatenation run strictly one after another.

use std::convert::Infallible;
use std::fs::File;
use std::io::{self, Read, Write};
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, RawFd};

use nix::errno::Errno;
use nix::fcntl::OFlag;
use nix::sys::signal::{signal, SigHandler, Signal};
use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::{dup2, execvp, fork, pipe2, ForkResult, Pid};
use tracing::{debug, warn};

use flowrun_types::{ExecutionLimits, FlowError, Result};

use crate::guard::RunGuards;
use crate::store::{Block, BlockStore, FileRole};
use crate::tokenize;

/// Copy granularity for file endpoints.
const CHUNK: usize = 1024;

/// The stdin and stdout a block reads from and writes to.
///
/// Nothing is duplicated onto descriptors 0 and 1 of the engine process
/// itself; a command child installs these just before `execvp`.
#[derive(Debug, Clone, Copy)]
pub struct Streams<'fd> {
    pub stdin: BorrowedFd<'fd>,
    pub stdout: BorrowedFd<'fd>,
}

impl Streams<'static> {
    /// The streams the process was started with.
    pub fn inherited() -> Self {
        // SAFETY: descriptors 0 and 1 belong to the process for its whole
        // lifetime and the engine never closes them.
        unsafe {
            Streams {
                stdin: BorrowedFd::borrow_raw(0),
                stdout: BorrowedFd::borrow_raw(1),
            }
        }
    }
}

enum Branch {
    Parent(Pid),
    Child,
}

pub struct Interpreter<'s> {
    store: &'s BlockStore,
    guards: RunGuards,
}

impl<'s> Interpreter<'s> {
    pub fn new(store: &'s BlockStore, limits: ExecutionLimits) -> Self {
        Self {
            store,
            guards: RunGuards::new(limits),
        }
    }

    pub fn guards(&self) -> &RunGuards {
        &self.guards
    }

    /// Evaluate the block called `name`. A name that resolves to nothing is
    /// skipped with a warning.
    pub fn evaluate(&mut self, name: &str, io: Streams<'_>) -> Result<()> {
        self.guards.enter()?;
        let result = self.dispatch(name, io);
        self.guards.leave();
        result
    }

    fn dispatch(&mut self, name: &str, io: Streams<'_>) -> Result<()> {
        let store = self.store;
        let Some(block) = store.resolve(name) else {
            warn!(block = name, "reference does not name any block, skipping");
            return Ok(());
        };
        debug!(block = name, kind = block.kind().as_str(), depth = self.guards.depth(), "evaluating");

        match block {
            Block::Command { name, argv_source } => self.run_command(name, argv_source, io),
            Block::Pipe { from, to, .. } => self.run_pipe(from, to, io),
            Block::Concatenation { parts, .. } => {
                for part in parts {
                    self.evaluate(part, io)?;
                }
                Ok(())
            }
            Block::StderrMerge { from, .. } => self.run_stderr_merge(from, io),
            Block::FileEndpoint { name, path } => self.run_file(name, path, io),
        }
    }

    // ---- Forking ----

    fn fork_branch(&mut self) -> Result<Branch> {
        self.guards.record_fork()?;
        // SAFETY: the engine runs on a single thread, so the child starts with
        // a consistent heap and only evaluates blocks before exec or `_exit`.
        match unsafe { fork() }.map_err(|e| FlowError::os("fork", e))? {
            ForkResult::Parent { child } => {
                debug!(pid = child.as_raw(), forks = self.guards.forks(), "forked");
                Ok(Branch::Parent(child))
            }
            ForkResult::Child => Ok(Branch::Child),
        }
    }

    /// Terminate a forked child with a status derived from its result.
    fn finish_child(result: Result<()>) -> ! {
        let code = match result {
            Ok(()) => 0,
            Err(err) => {
                eprintln!("Error: {err}");
                err.exit_code()
            }
        };
        // SAFETY: `_exit` skips destructors and atexit handlers, which belong
        // to the parent process.
        unsafe { libc::_exit(code) }
    }

    // ---- Block kinds ----

    fn run_command(&mut self, block: &str, argv_source: &str, io: Streams<'_>) -> Result<()> {
        match self.fork_branch()? {
            Branch::Child => {
                let result = exec_command(block, argv_source, io);
                Self::finish_child(result.map(|never| match never {}))
            }
            Branch::Parent(child) => wait_for(child),
        }
    }

    fn run_pipe(&mut self, from: &str, to: &str, io: Streams<'_>) -> Result<()> {
        let (read, write) = pipe2(OFlag::O_CLOEXEC).map_err(|e| FlowError::os("pipe", e))?;

        match self.fork_branch()? {
            Branch::Child => {
                drop(read);
                let result = self.evaluate(
                    from,
                    Streams {
                        stdout: write.as_fd(),
                        ..io
                    },
                );
                drop(write);
                Self::finish_child(result)
            }
            Branch::Parent(writer) => {
                drop(write);
                let result = self.evaluate(
                    to,
                    Streams {
                        stdin: read.as_fd(),
                        ..io
                    },
                );
                // The channel never outlives `to`: later blocks in this frame
                // read the frame's own stdin, and the writer gets EPIPE as
                // soon as its consumers are gone.
                drop(read);
                wait_for(writer)?;
                result
            }
        }
    }

    fn run_stderr_merge(&mut self, from: &str, io: Streams<'_>) -> Result<()> {
        match self.fork_branch()? {
            Branch::Child => {
                let result = redirect(io.stdout, libc::STDERR_FILENO)
                    .and_then(|()| self.evaluate(from, io));
                Self::finish_child(result)
            }
            Branch::Parent(child) => wait_for(child),
        }
    }

    fn run_file(&mut self, block: &str, path: &str, io: Streams<'_>) -> Result<()> {
        if path.is_empty() {
            return Err(FlowError::MissingPath {
                block: block.to_string(),
            });
        }
        match self.store.file_role(block) {
            Some(FileRole::Source) => {
                let mut file = File::open(path)
                    .map_err(|e| FlowError::file_io(format!("cannot open '{path}' for reading"), e))?;
                let mut out = stream_file(io.stdout)?;
                let copied = pump(&mut file, &mut out)
                    .map_err(|e| FlowError::file_io(format!("cannot copy '{path}' to stdout"), e))?;
                debug!(block, path, bytes = copied, "file source drained");
                Ok(())
            }
            Some(FileRole::Sink) => {
                let mut file = File::create(path)
                    .map_err(|e| FlowError::file_io(format!("cannot open '{path}' for writing"), e))?;
                let mut input = stream_file(io.stdin)?;
                let copied = pump(&mut input, &mut file)
                    .map_err(|e| FlowError::file_io(format!("cannot write stdin to '{path}'"), e))?;
                debug!(block, path, bytes = copied, "file sink filled");
                Ok(())
            }
            None => {
                debug!(block, "file block is not wired by any pipe");
                Ok(())
            }
        }
    }
}

// ---- Process plumbing ----

/// Install the streams on descriptors 0 and 1 and replace the process image.
fn exec_command(block: &str, argv_source: &str, io: Streams<'_>) -> Result<Infallible> {
    let args = tokenize::argv(block, argv_source)?;
    redirect(io.stdin, libc::STDIN_FILENO)?;
    redirect(io.stdout, libc::STDOUT_FILENO)?;
    // The Rust runtime ignores SIGPIPE and an ignored disposition survives
    // exec; producers must die quietly when their consumer exits.
    // SAFETY: no handler is installed, only the default disposition.
    unsafe { signal(Signal::SIGPIPE, SigHandler::SigDfl) }
        .map_err(|e| FlowError::os("signal", e))?;
    let program = &args[0];
    execvp(program, &args).map_err(|e| FlowError::LaunchFailed {
        program: program.to_string_lossy().into_owned(),
        source: e.into(),
    })
}

fn redirect(fd: BorrowedFd<'_>, target: RawFd) -> Result<()> {
    if fd.as_raw_fd() != target {
        dup2(fd.as_raw_fd(), target).map_err(|e| FlowError::os("dup2", e))?;
    }
    Ok(())
}

/// Block until `child` terminates. A non-zero status is not an engine failure.
fn wait_for(child: Pid) -> Result<()> {
    loop {
        match waitpid(child, None) {
            Ok(WaitStatus::Exited(_, 0)) => return Ok(()),
            Ok(WaitStatus::Exited(_, code)) => {
                debug!(pid = child.as_raw(), code, "child exited with non-zero status");
                return Ok(());
            }
            Ok(WaitStatus::Signaled(_, signal, _)) => {
                debug!(pid = child.as_raw(), ?signal, "child killed by signal");
                return Ok(());
            }
            Ok(_) => continue,
            Err(Errno::EINTR) => continue,
            Err(e) => return Err(FlowError::os("waitpid", e)),
        }
    }
}

/// An owned `File` over a duplicate of `fd`, so dropping it leaves `fd` open.
fn stream_file(fd: BorrowedFd<'_>) -> Result<File> {
    let owned = fd
        .try_clone_to_owned()
        .map_err(|e| FlowError::os("dup", e))?;
    Ok(File::from(owned))
}

fn pump(reader: &mut impl Read, writer: &mut impl Write) -> io::Result<u64> {
    let mut buf = [0u8; CHUNK];
    let mut total = 0u64;
    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        writer.write_all(&buf[..n])?;
        total += n as u64;
    }
    writer.flush()?;
    Ok(total)
}
