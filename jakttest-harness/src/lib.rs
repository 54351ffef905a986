//! Parallel test runner for the Jakt-to-C++ toolchain.
//!
//! Each test file is handed to a driver subprocess that transpiles the source
//! to C++, compiles it, and runs the result; the harness schedules those
//! drivers across a fixed set of scratch directories, reaps them on SIGCHLD,
//! and compares captured output against the expectations embedded in the
//! source.

use nix::errno::Errno;
use std::io;
use thiserror::Error;

pub mod classify;
pub mod directives;
pub mod discover;
pub mod report;
pub mod scheduler;

pub type Result<T> = std::result::Result<T, HarnessError>;

#[derive(Debug, Error)]
pub enum HarnessError {
  #[error(transparent)]
  Io(#[from] io::Error),
  #[error(transparent)]
  Pool(#[from] process_pool::PoolError),
  #[error("signal wait failed: {0}")]
  SignalWait(Errno),
  #[error("invalid filter '{0}'")]
  InvalidFilter(String),
  #[error("{0}")]
  Arg(String),
}

pub use classify::{classify, classify_exit, FailureReason, TestOutcome, TestStage};
pub use directives::{
  parse_test_source, ExpectedKind, ExpectedResult, ParsedExpectation, ParsedTest,
};
pub use discover::{build_filter, discover_test_files, Filter};
pub use report::{print_human_report, write_json_report, Summary, REPORT_SCHEMA_VERSION};
pub use scheduler::{
  create_scratch_directories, remove_scratch_directories, run_tests, DriverConfig, Test,
  TestsRunResult,
};
