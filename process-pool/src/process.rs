use crate::{PoolError, Result};
use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::{self, ForkResult, Pid};
use std::collections::HashMap;
use std::ffi::CString;

/// Handle to a live child process.
///
/// At most one logical owner at a time; the owner is whoever will eventually
/// observe the child's exit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Process(Pid);

/// Decoded exit status of a terminated child.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitResult {
  pub exit_code: i32,
  pub process: Process,
}

impl Process {
  pub fn pid(self) -> i32 {
    self.0.as_raw()
  }

  /// Non-blocking exit check. `Ok(None)` while the child is still running.
  pub fn poll_exit(self) -> Result<Option<ExitResult>> {
    match waitpid(self.0, Some(WaitPidFlag::WNOHANG)) {
      Ok(status) => Ok(decode_status(status)),
      Err(err) => Err(PoolError::Wait(err)),
    }
  }

  /// Send SIGKILL without waiting; the caller is expected to reap.
  pub fn kill(self) -> Result<()> {
    signal::kill(self.0, Signal::SIGKILL).map_err(PoolError::Kill)
  }
}

fn decode_status(status: WaitStatus) -> Option<ExitResult> {
  match status {
    WaitStatus::Exited(pid, code) => Some(ExitResult {
      exit_code: code,
      process: Process(pid),
    }),
    // Signal termination decodes as the shell convention 128 + signo.
    WaitStatus::Signaled(pid, sig, _) => Some(ExitResult {
      exit_code: 128 + sig as i32,
      process: Process(pid),
    }),
    _ => None,
  }
}

const EXEC_FAILED: &[u8] = b"jakttest: exec failed: ";

/// Start `argv[0]` with the remaining elements as arguments.
///
/// The child inherits the parent's file descriptors; anything the child needs
/// is prepared before the fork so the child side only performs
/// async-signal-safe calls. exec failure writes a short message to stderr and
/// exits the child with 127.
pub fn spawn(argv: &[String]) -> Result<Process> {
  if argv.is_empty() {
    return Err(PoolError::InvalidArgv);
  }
  let args = argv
    .iter()
    .map(|arg| CString::new(arg.as_bytes()).map_err(|_| PoolError::InvalidArgv))
    .collect::<Result<Vec<CString>>>()?;

  match unsafe { unistd::fork() }.map_err(PoolError::Spawn)? {
    ForkResult::Parent { child } => Ok(Process(child)),
    ForkResult::Child => {
      let err = match unistd::execvp(&args[0], &args) {
        Ok(never) => match never {},
        Err(err) => err,
      };
      let desc = err.desc();
      unsafe {
        libc::write(libc::STDERR_FILENO, EXEC_FAILED.as_ptr().cast(), EXEC_FAILED.len());
        libc::write(libc::STDERR_FILENO, desc.as_ptr().cast(), desc.len());
        libc::write(libc::STDERR_FILENO, b"\n".as_ptr().cast(), 1);
        libc::_exit(127);
      }
    }
  }
}

/// Non-blocking reap of any child of this process.
///
/// `Ok(None)` when no child has exited, including when there are no children
/// at all.
pub fn poll_any_exit() -> Result<Option<ExitResult>> {
  match waitpid(Pid::from_raw(-1), Some(WaitPidFlag::WNOHANG)) {
    Ok(status) => Ok(decode_status(status)),
    Err(Errno::ECHILD) => Ok(None),
    Err(err) => Err(PoolError::Wait(err)),
  }
}

/// Block until some child of this process terminates.
///
/// The wait itself is a wildcard: the kernel may hand back a child that is
/// not in `at_least`. The matching key is returned when the reaped pid is
/// found in the map; callers reconcile the rest by polling.
pub fn wait_any(at_least: &HashMap<u64, Process>) -> Result<(Option<u64>, ExitResult)> {
  if at_least.is_empty() {
    return Err(PoolError::EmptyWaitSet);
  }
  loop {
    match waitpid(Pid::from_raw(-1), None) {
      Ok(status) => {
        if let Some(exit) = decode_status(status) {
          let key = at_least
            .iter()
            .find(|(_, process)| **process == exit.process)
            .map(|(&id, _)| id);
          return Ok((key, exit));
        }
        // Stopped or continued children are not exits; keep waiting.
      }
      Err(Errno::EINTR) => {}
      Err(err) => return Err(PoolError::Wait(err)),
    }
  }
}
