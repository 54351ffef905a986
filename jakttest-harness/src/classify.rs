use crate::directives::{ExpectedKind, ExpectedResult};
use serde::Serialize;
use std::fs;
use std::path::Path;

/// Pipeline stages the driver can report, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TestStage {
  TranspileJakt,
  CompileCpp,
  TestRun,
}

impl TestStage {
  /// Map a driver exit code back to the last stage it reached. Codes 0 and 1
  /// both mean the test ran; anything above 3 is an abrupt exit.
  pub fn from_exit_code(exit_code: i32) -> Option<TestStage> {
    match exit_code {
      0 | 1 => Some(TestStage::TestRun),
      2 => Some(TestStage::CompileCpp),
      3 => Some(TestStage::TranspileJakt),
      _ => None,
    }
  }

  /// Stdout/stderr capture files the driver writes for this stage, relative
  /// to the scratch directory.
  pub fn output_filenames(self) -> (&'static str, &'static str) {
    match self {
      TestStage::TranspileJakt => ("compile_jakt.out", "compile_jakt.err"),
      TestStage::CompileCpp => ("compile_cpp.out", "compile_cpp.err"),
      TestStage::TestRun => ("runtest.out", "runtest.err"),
    }
  }

  pub fn describe(self) -> &'static str {
    match self {
      TestStage::TranspileJakt => "Jakt transpilation",
      TestStage::CompileCpp => "Clang++ compilation of generated C++ source",
      TestStage::TestRun => "running the test binary",
    }
  }
}

impl ExpectedKind {
  /// The stage at which this expectation is checked.
  pub fn to_stage(self) -> TestStage {
    match self {
      ExpectedKind::Okay | ExpectedKind::RuntimeError => TestStage::TestRun,
      ExpectedKind::CompileError => TestStage::TranspileJakt,
    }
  }
}

/// Why a test failed, with enough captured context to explain the mismatch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureReason {
  CompilerErrorUnmatched {
    had: String,
    expected: String,
  },
  StdoutUnmatched {
    had: String,
    expected: String,
  },
  StderrUnmatched {
    had: String,
    expected: String,
  },
  ExpectedError {
    had: String,
    expected: String,
  },
  ErroredAtEarlierStage {
    had: String,
    expected: String,
    failed_stage: &'static str,
  },
  ErroredAtLaterStage {
    had: String,
    expected: String,
    failed_stage: &'static str,
  },
  AbruptExit {
    exit_code: i32,
  },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TestOutcome {
  Passed,
  Failed(FailureReason),
}

/// Strip carriage returns and make newlines printable, so multi-line
/// expectations can be matched as substrings of one-line normalized output.
/// Applying this twice is a no-op.
pub fn normalize_error_output(raw: &str) -> String {
  raw.replace('\r', "").replace('\n', "\\n")
}

/// Deterministically map a reaped driver exit plus the captured stage outputs
/// to a pass or a tagged failure.
pub fn classify(
  exit_code: i32,
  expected: &ExpectedResult,
  result_output: &str,
  error_output: &str,
) -> TestOutcome {
  let Some(stage) = TestStage::from_exit_code(exit_code) else {
    return TestOutcome::Failed(FailureReason::AbruptExit { exit_code });
  };

  let stdout = result_output.replace('\r', "");
  let matched = match expected.kind {
    ExpectedKind::Okay => stdout == expected.output,
    ExpectedKind::CompileError | ExpectedKind::RuntimeError => {
      normalize_error_output(error_output).contains(&normalize_error_output(&expected.output))
    }
  };
  if matched {
    return TestOutcome::Passed;
  }

  let expected_stage = expected.kind.to_stage();
  let reason = if stage != expected_stage {
    if stage < expected_stage {
      FailureReason::ErroredAtEarlierStage {
        had: error_output.to_string(),
        expected: expected.output.clone(),
        failed_stage: stage.describe(),
      }
    } else if stage == TestStage::TestRun && !result_output.is_empty() {
      // An error was expected, but the test ran and produced output.
      FailureReason::ExpectedError {
        had: stdout,
        expected: expected.output.clone(),
      }
    } else {
      FailureReason::ErroredAtLaterStage {
        had: error_output.to_string(),
        expected: expected.output.clone(),
        failed_stage: stage.describe(),
      }
    }
  } else {
    match expected.kind {
      ExpectedKind::Okay => FailureReason::StdoutUnmatched {
        had: stdout,
        expected: expected.output.clone(),
      },
      ExpectedKind::RuntimeError => FailureReason::StderrUnmatched {
        had: error_output.to_string(),
        expected: expected.output.clone(),
      },
      ExpectedKind::CompileError => FailureReason::CompilerErrorUnmatched {
        had: error_output.to_string(),
        expected: expected.output.clone(),
      },
    }
  };
  TestOutcome::Failed(reason)
}

/// Classify a reaped driver exit by reading the reached stage's capture files
/// from the test's scratch directory. Missing files read as empty buffers.
pub fn classify_exit(exit_code: i32, expected: &ExpectedResult, directory: &Path) -> TestOutcome {
  let Some(stage) = TestStage::from_exit_code(exit_code) else {
    return TestOutcome::Failed(FailureReason::AbruptExit { exit_code });
  };
  let (out_name, err_name) = stage.output_filenames();
  let result_output = fs::read_to_string(directory.join(out_name)).unwrap_or_default();
  let error_output = fs::read_to_string(directory.join(err_name)).unwrap_or_default();
  classify(exit_code, expected, &result_output, &error_output)
}
