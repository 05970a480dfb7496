use std::collections::HashSet;
use std::io;
use std::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command, Stdio};
use std::sync::Mutex;
use std::thread;

use crate::error::{Error, Result};

use super::context::WorkerContext;

/// Set of live child processes, shared by all workers.
///
/// Spawning happens under the registry lock so that `kill_all` can
/// guarantee its post-condition: every child already started has been
/// signalled, and no new child will start.
#[derive(Default)]
pub struct ProcessRegistry {
    inner: Mutex<Registry>,
}

#[derive(Default)]
struct Registry {
    stopped: bool,
    pids: HashSet<u32>,
}

impl ProcessRegistry {
    pub fn new() -> ProcessRegistry {
        ProcessRegistry::default()
    }

    /// Spawn a command and track its pid. Fails once the registry has been
    /// stopped by `kill_all`.
    pub fn spawn(&self, command: &mut Command) -> Result<Child> {
        let mut registry = self.inner.lock().unwrap();
        if registry.stopped {
            return Err(Error::Interrupted);
        }
        let child = command.spawn()?;
        registry.pids.insert(child.id());
        Ok(child)
    }

    pub fn deregister(&self, pid: u32) {
        self.inner.lock().unwrap().pids.remove(&pid);
    }

    /// Kill every tracked child and refuse any further spawn.
    pub fn kill_all(&self) {
        let mut registry = self.inner.lock().unwrap();
        registry.stopped = true;
        for &pid in &registry.pids {
            kill(pid);
        }
    }
}

#[cfg(unix)]
fn kill(pid: u32) {
    unsafe {
        libc::kill(pid as libc::pid_t, libc::SIGKILL);
    }
}

#[cfg(not(unix))]
fn kill(_pid: u32) {}

/// Run one worker's command with piped standard streams.
///
/// The three handlers run on their own threads; the first handler error
/// kills this worker's child so the sibling handlers unblock on their
/// pipes instead of deadlocking the stage. A broken-pipe error that the
/// child's own death provoked is reported as the child's exit status
/// rather than as an I/O failure.
pub fn exec<FI, FO, FE>(
    ctx: &WorkerContext,
    command: &str,
    stdin: FI,
    stdout: FO,
    stderr: FE,
) -> Result<()>
where
    FI: FnOnce(ChildStdin) -> Result<()> + Send,
    FO: FnOnce(ChildStdout) -> Result<()> + Send,
    FE: FnOnce(ChildStderr) -> Result<()> + Send,
{
    let args: Vec<&str> = command.split_whitespace().collect();
    let Some((program, rest)) = args.split_first() else {
        return Err(Error::Config(format!("empty command '{}'", command)));
    };

    let mut cmd = Command::new(program);
    cmd.args(rest)
        .env("WORKER_ID", ctx.worker_id.to_string())
        .env("MAPPERS", ctx.mappers.to_string())
        .env("REDUCERS", ctx.reducers.to_string())
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let mut child = ctx.registry.spawn(&mut cmd)?;
    let pid = child.id();

    let pipe_err = || io::Error::other("child pipes were not opened");
    let in_pipe = child.stdin.take().ok_or_else(pipe_err)?;
    let out_pipe = child.stdout.take().ok_or_else(pipe_err)?;
    let err_pipe = child.stderr.take().ok_or_else(pipe_err)?;

    let first_err: Mutex<Option<Error>> = Mutex::new(None);
    let record = |e: Error| {
        let mut slot = first_err.lock().unwrap();
        if slot.is_none() {
            *slot = Some(e);
            kill(pid);
        }
    };

    thread::scope(|s| {
        s.spawn(|| {
            if let Err(e) = stdin(in_pipe) {
                record(e);
            }
        });
        s.spawn(|| {
            if let Err(e) = stdout(out_pipe) {
                record(e);
            }
        });
        s.spawn(|| {
            if let Err(e) = stderr(err_pipe) {
                record(e);
            }
        });
    });

    let status = child.wait();
    ctx.registry.deregister(pid);
    let status = status?;

    let child_exit = || Error::ChildExit {
        worker_id: ctx.worker_id,
        command: command.to_string(),
        status: status.to_string(),
    };

    match first_err.into_inner().unwrap() {
        Some(e) if e.is_broken_pipe() && !status.success() => Err(child_exit()),
        Some(e) => Err(e),
        None if !status.success() => Err(child_exit()),
        None => Ok(()),
    }
}
