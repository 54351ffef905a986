use crate::classify::{classify_exit, FailureReason, TestOutcome};
use crate::directives::ExpectedResult;
use crate::{HarnessError, Result};
use nix::libc;
use nix::sys::signal::{
  sigaction, sigprocmask, SaFlags, SigAction, SigHandler, SigSet, SigmaskHow, Signal,
};
use process_pool::{poll_any_exit, spawn, Process};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

// Some host shells cannot pass an empty argument, so an empty include list
// rides as this literal. Part of the driver contract.
const CPP_INCLUDE_NONE: &str = "None";

/// One pending test: the directive-derived oracle plus dispatch bookkeeping.
///
/// `directory_index` is assigned when the test is handed to a worker slot.
#[derive(Debug, Clone)]
pub struct Test {
  pub expected: ExpectedResult,
  pub file_name: String,
  pub directory_index: usize,
  pub cpp_includes: String,
}

/// Everything needed to build the driver argv for one test.
#[derive(Debug, Clone)]
pub struct DriverConfig {
  pub interpreter: String,
  pub script: PathBuf,
  pub build_dir: PathBuf,
  pub target_triple: String,
  pub cpp_compiler: PathBuf,
}

impl DriverConfig {
  /// The reusable command buffer. The trailing three slots (C++ includes,
  /// scratch directory, source file) are patched on every dispatch; the
  /// buffer is never read back after a spawn returns, so reuse is safe.
  pub(crate) fn argv_template(&self) -> Vec<String> {
    vec![
      self.interpreter.clone(),
      self.script.display().to_string(),
      "--jakt-binary".to_string(),
      self.build_dir.join("bin").join("jakt").display().to_string(),
      "--jakt-lib-dir".to_string(),
      self.build_dir.join("lib").display().to_string(),
      "--target-triple".to_string(),
      self.target_triple.clone(),
      "--cpp-compiler".to_string(),
      self.cpp_compiler.display().to_string(),
      "--cpp-include".to_string(),
      CPP_INCLUDE_NONE.to_string(),
      String::new(),
      String::new(),
    ]
  }
}

#[derive(Debug)]
pub struct TestsRunResult {
  pub passed_count: usize,
  pub failed_count: usize,
  pub failed_reasons: Option<BTreeMap<String, FailureReason>>,
}

struct TestScheduler {
  running_tests: HashMap<Process, Test>,
  free_directories: Vec<usize>,
  directories: Vec<PathBuf>,
  passed_count: usize,
  failed_count: usize,
  failed_reasons: Option<BTreeMap<String, FailureReason>>,
  total_test_count: usize,
}

/// Run every test through the driver, bounded by the number of scratch
/// directories. Tests are popped from the back of the queue; completion order
/// follows OS scheduling.
pub fn run_tests(
  mut tests: Vec<Test>,
  directories: Vec<PathBuf>,
  collect_reasons: bool,
  starting_failed_tests: usize,
  total_test_count: usize,
  driver: &DriverConfig,
) -> Result<TestsRunResult> {
  let mut scheduler = TestScheduler {
    running_tests: HashMap::new(),
    free_directories: (0..directories.len()).collect(),
    directories,
    passed_count: 0,
    failed_count: starting_failed_tests,
    failed_reasons: collect_reasons.then(BTreeMap::new),
    total_test_count,
  };

  if tests.is_empty() {
    return Ok(scheduler.into_result());
  }
  if scheduler.directories.is_empty() {
    return Err(HarnessError::Arg(
      "at least one scratch directory is required".to_string(),
    ));
  }

  let sigchld = block_sigchld()?;

  let mut argv = driver.argv_template();
  let includes_slot = argv.len() - 3;
  let directory_slot = argv.len() - 2;
  let file_slot = argv.len() - 1;

  info!(
    tests = tests.len(),
    workers = scheduler.directories.len(),
    "dispatching tests"
  );

  while let Some(mut test) = tests.pop() {
    let directory_index = scheduler.wait_for_free_directory(&sigchld)?;
    test.directory_index = directory_index;

    argv[includes_slot] = if test.cpp_includes.is_empty() {
      CPP_INCLUDE_NONE.to_string()
    } else {
      test.cpp_includes.clone()
    };
    argv[directory_slot] = scheduler.directories[directory_index].display().to_string();
    argv[file_slot] = test.file_name.clone();

    debug!(file = %test.file_name, directory = directory_index, "starting driver");
    let process = spawn(&argv)?;
    scheduler.print_progress(&test.file_name);
    scheduler.running_tests.insert(process, test);
  }

  while !scheduler.running_tests.is_empty() {
    sigchld.wait().map_err(HarnessError::SignalWait)?;
    scheduler.poll_running_tests()?;
  }

  // Erase the last progress line.
  eprint!("\r\x1b[2K");
  io::stderr().flush().ok();

  let result = scheduler.into_result();
  info!(
    passed = result.passed_count,
    failed = result.failed_count,
    "test run complete"
  );
  Ok(result)
}

impl TestScheduler {
  /// Pop a free directory index, blocking on SIGCHLD and reaping finished
  /// drivers until one frees up.
  fn wait_for_free_directory(&mut self, sigchld: &SigSet) -> Result<usize> {
    loop {
      if let Some(index) = self.free_directories.pop() {
        return Ok(index);
      }
      sigchld.wait().map_err(HarnessError::SignalWait)?;
      self.poll_running_tests()?;
    }
  }

  /// Drain every child that has exited since the last poll. One SIGCHLD can
  /// stand for several exits, so this loops until the kernel reports no more.
  fn poll_running_tests(&mut self) -> Result<()> {
    while let Some(exit) = poll_any_exit()? {
      self.on_test_exited(exit.process, exit.exit_code);
    }
    Ok(())
  }

  fn on_test_exited(&mut self, process: Process, exit_code: i32) {
    // Wildcard reaping may surface a child that is not one of ours.
    let Some(test) = self.running_tests.remove(&process) else {
      return;
    };
    self.free_directories.push(test.directory_index);

    let directory = &self.directories[test.directory_index];
    match classify_exit(exit_code, &test.expected, directory) {
      TestOutcome::Passed => self.passed_count += 1,
      TestOutcome::Failed(reason) => {
        self.failed_count += 1;
        eprintln!("\r\x1b[2K[ FAIL ] {}", test.file_name);
        if let Some(reasons) = &mut self.failed_reasons {
          reasons.insert(test.file_name, reason);
        }
      }
    }
  }

  fn print_progress(&self, file_name: &str) {
    eprint!(
      "\r\x1b[2K({}/{}/{}) Testing {}",
      self.failed_count, self.passed_count, self.total_test_count, file_name
    );
    io::stderr().flush().ok();
  }

  fn into_result(self) -> TestsRunResult {
    TestsRunResult {
      passed_count: self.passed_count,
      failed_count: self.failed_count,
      failed_reasons: self.failed_reasons,
    }
  }
}

extern "C" fn sigchld_noop(_: libc::c_int) {}

/// Replace the default-ignore SIGCHLD disposition with an empty handler and
/// block the signal, so child exits stay queued and a synchronous
/// `SigSet::wait` observes them.
fn block_sigchld() -> Result<SigSet> {
  let action = SigAction::new(
    SigHandler::Handler(sigchld_noop),
    SaFlags::empty(),
    SigSet::empty(),
  );
  unsafe { sigaction(Signal::SIGCHLD, &action) }.map_err(HarnessError::SignalWait)?;

  let mut set = SigSet::empty();
  set.add(Signal::SIGCHLD);
  sigprocmask(SigmaskHow::SIG_BLOCK, Some(&set), None).map_err(HarnessError::SignalWait)?;
  Ok(set)
}

/// Create the per-worker scratch directories `<temp_dir>/jakttest-tmp-<i>`.
pub fn create_scratch_directories(temp_dir: &Path, count: usize) -> io::Result<Vec<PathBuf>> {
  let mut directories = Vec::with_capacity(count);
  for index in 0..count {
    let directory = temp_dir.join(format!("jakttest-tmp-{index}"));
    fs::create_dir_all(&directory)?;
    directories.push(directory);
  }
  Ok(directories)
}

/// Best-effort recursive cleanup of the scratch directories.
pub fn remove_scratch_directories(directories: &[PathBuf]) {
  for directory in directories {
    if let Err(err) = fs::remove_dir_all(directory) {
      tracing::warn!(
        directory = %directory.display(),
        error = %err,
        "failed to remove scratch directory"
      );
    }
  }
}
