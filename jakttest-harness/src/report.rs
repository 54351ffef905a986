use crate::classify::FailureReason;
use crate::scheduler::TestsRunResult;
use anyhow::Context;
use serde::Serialize;
use std::io::{self, Write};

pub const REPORT_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct Summary {
  pub total: usize,
  pub passed: usize,
  pub failed: usize,
  pub skipped: usize,
}

#[derive(Debug, Serialize)]
pub struct FailureEntry<'a> {
  pub file: &'a str,
  #[serde(flatten)]
  pub reason: &'a FailureReason,
}

#[derive(Debug, Serialize)]
pub struct Report<'a> {
  pub schema_version: u32,
  pub summary: Summary,
  pub failures: Vec<FailureEntry<'a>>,
}

pub fn summary_of(result: &TestsRunResult, skipped: usize) -> Summary {
  Summary {
    total: result.passed_count + result.failed_count + skipped,
    passed: result.passed_count,
    failed: result.failed_count,
    skipped,
  }
}

/// Write the machine-readable report to stdout. Failures are already sorted
/// by file name, so the output is deterministic.
pub fn write_json_report(result: &TestsRunResult, skipped: usize) -> anyhow::Result<()> {
  let failures = result
    .failed_reasons
    .iter()
    .flatten()
    .map(|(file, reason)| FailureEntry {
      file: file.as_str(),
      reason,
    })
    .collect();
  let report = Report {
    schema_version: REPORT_SCHEMA_VERSION,
    summary: summary_of(result, skipped),
    failures,
  };

  let stdout = io::stdout();
  let mut handle = stdout.lock();
  serde_json::to_writer_pretty(&mut handle, &report).context("write JSON report")?;
  writeln!(&mut handle).ok();
  Ok(())
}

pub fn print_human_report(result: &TestsRunResult, skipped: usize, hide_reasons: bool) {
  let summary = summary_of(result, skipped);
  println!(
    "Ran {} test(s): {} passed, {} failed, {} skipped",
    summary.total, summary.passed, summary.failed, summary.skipped
  );

  if hide_reasons {
    return;
  }
  if let Some(reasons) = &result.failed_reasons {
    for (file, reason) in reasons {
      println!();
      println!("{file}:");
      print!("{}", describe_reason(reason));
    }
  }
}

pub fn describe_reason(reason: &FailureReason) -> String {
  match reason {
    FailureReason::StdoutUnmatched { had, expected } => format!(
      "  Expected stdout:\n{}  Instead got:\n{}",
      indent(expected),
      indent(had)
    ),
    FailureReason::StderrUnmatched { had, expected } => format!(
      "  Expected stderr to contain:\n{}  Instead got:\n{}",
      indent(expected),
      indent(had)
    ),
    FailureReason::CompilerErrorUnmatched { had, expected } => format!(
      "  Expected a compile error containing:\n{}  Instead the compiler printed:\n{}",
      indent(expected),
      indent(had)
    ),
    FailureReason::ExpectedError { had, expected } => format!(
      "  Expected an error containing:\n{}  but the test ran and printed:\n{}",
      indent(expected),
      indent(had)
    ),
    FailureReason::ErroredAtEarlierStage {
      had,
      expected,
      failed_stage,
    } => format!(
      "  Failed during {failed_stage} before reaching the expected stage.\n  Expected:\n{}  Output was:\n{}",
      indent(expected),
      indent(had)
    ),
    FailureReason::ErroredAtLaterStage {
      had,
      expected,
      failed_stage,
    } => format!(
      "  Got past the expected stage and failed during {failed_stage}.\n  Expected:\n{}  Output was:\n{}",
      indent(expected),
      indent(had)
    ),
    FailureReason::AbruptExit { exit_code } => {
      format!("  The test driver exited abruptly with code {exit_code}\n")
    }
  }
}

fn indent(text: &str) -> String {
  let body = if text.is_empty() { "(empty)" } else { text };
  let mut out = String::new();
  for line in body.lines() {
    out.push_str("    ");
    out.push_str(line);
    out.push('\n');
  }
  out
}
