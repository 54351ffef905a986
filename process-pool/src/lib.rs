//! Process primitives and a bounded pool of OS child processes.
//!
//! This crate is intentionally small and dependency-light so the test harness
//! and the build orchestration can share behavior without copy/pasting.

use nix::errno::Errno;
use std::io;
use thiserror::Error;

pub mod builder;
pub mod pool;
pub mod process;

pub type Result<T> = std::result::Result<T, PoolError>;

#[derive(Debug, Error)]
pub enum PoolError {
  #[error("failed to spawn child process: {0}")]
  Spawn(Errno),
  #[error("wait for child process failed: {0}")]
  Wait(Errno),
  #[error("failed to kill child process: {0}")]
  Kill(Errno),
  #[error("cannot wait on an empty set of processes")]
  EmptyWaitSet,
  #[error("argv is empty or contains interior NUL bytes")]
  InvalidArgv,
  #[error("compilation failed with exit code {0}")]
  CompilationFailed(i32),
  #[error("linking failed with exit code {0}")]
  LinkingFailed(i32),
  #[error(transparent)]
  Io(#[from] io::Error),
}

pub use builder::Builder;
pub use pool::ParallelExecutionPool;
pub use process::{poll_any_exit, spawn, wait_any, ExitResult, Process};
