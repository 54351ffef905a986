use assert_cmd::Command;
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::tempdir;

const CLI_TIMEOUT: Duration = Duration::from_secs(30);

// Minimal stand-in for the per-test pipeline driver: records its argv, writes
// stage capture files into the scratch directory, and exits with the stage
// code the harness expects.
const DRIVER_TEMPLATE: &str = r#"#!/bin/sh
log="__LOG__"
echo "$@" >> "$log"
eval "dir=\${$(($# - 1))}"
eval "file=\${$#}"
case "$file" in
  *pass*)
    printf 'hi\n' > "$dir/runtest.out"
    exit 0 ;;
  *wrongout*)
    printf 'bye\n' > "$dir/runtest.out"
    exit 0 ;;
  *comperr*)
    printf 'error: undefined name foo\n' > "$dir/compile_jakt.err"
    exit 3 ;;
  *runerr*)
    printf 'index out of bounds\n' > "$dir/runtest.err"
    exit 1 ;;
  *abrupt*)
    exit 7 ;;
  *)
    exit 1 ;;
esac
"#;

fn write_driver(root: &Path) -> (PathBuf, PathBuf) {
  let log = root.join("driver.log");
  fs::write(&log, "").expect("create driver log");
  let script = root.join("fake_driver.sh");
  fs::write(
    &script,
    DRIVER_TEMPLATE.replace("__LOG__", &log.display().to_string()),
  )
  .expect("write fake driver");
  (script, log)
}

fn write_test(dir: &Path, name: &str, directive: &str) -> PathBuf {
  let path = dir.join(name);
  fs::write(
    &path,
    format!("/// Expect:\n/// {directive}\n\nfn main() {{}}\n"),
  )
  .expect("write test fixture");
  path
}

fn jakttest_cmd(root: &Path, script: &Path) -> Command {
  let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("jakttest");
  cmd.timeout(CLI_TIMEOUT);
  cmd
    .arg("--driver-interpreter")
    .arg("sh")
    .arg("--driver")
    .arg(script)
    .arg("--temp-dir")
    .arg(root.join("tmp"))
    .arg("--build-dir")
    .arg(root.join("build"))
    .arg("-j")
    .arg("2");
  cmd
}

#[test]
fn passing_tests_exit_zero() {
  let dir = tempdir().expect("tempdir");
  let root = dir.path();
  let (script, _log) = write_driver(root);
  let a = write_test(root, "pass1.jakt", "- output: \"hi\\n\"");
  let b = write_test(root, "pass2.jakt", "- output: \"hi\\n\"");

  let assert = jakttest_cmd(root, &script).arg(a).arg(b).assert().success();
  let stdout = String::from_utf8_lossy(&assert.get_output().stdout);
  assert!(
    stdout.contains("2 passed, 0 failed, 0 skipped"),
    "unexpected summary: {stdout}"
  );
}

#[test]
fn wrong_output_fails_with_an_explanation() {
  let dir = tempdir().expect("tempdir");
  let root = dir.path();
  let (script, _log) = write_driver(root);
  let test = write_test(root, "wrongout.jakt", "- output: \"hi\\n\"");

  let assert = jakttest_cmd(root, &script).arg(test).assert().failure().code(1);
  let output = assert.get_output();
  let stdout = String::from_utf8_lossy(&output.stdout);
  let stderr = String::from_utf8_lossy(&output.stderr);
  assert!(
    stdout.contains("0 passed, 1 failed"),
    "unexpected summary: {stdout}"
  );
  assert!(
    stdout.contains("Expected stdout:"),
    "missing failure explanation: {stdout}"
  );
  assert!(stderr.contains("[ FAIL ]"), "missing FAIL line: {stderr}");
}

#[test]
fn hide_reasons_suppresses_explanations() {
  let dir = tempdir().expect("tempdir");
  let root = dir.path();
  let (script, _log) = write_driver(root);
  let test = write_test(root, "wrongout.jakt", "- output: \"hi\\n\"");

  let assert = jakttest_cmd(root, &script)
    .arg("--hide-reasons")
    .arg(test)
    .assert()
    .failure()
    .code(1);
  let stdout = String::from_utf8_lossy(&assert.get_output().stdout);
  assert!(stdout.contains("0 passed, 1 failed"));
  assert!(
    !stdout.contains("Expected stdout:"),
    "explanations should be hidden: {stdout}"
  );
}

#[test]
fn compile_error_expectations_match_substrings() {
  let dir = tempdir().expect("tempdir");
  let root = dir.path();
  let (script, _log) = write_driver(root);
  let test = write_test(root, "comperr.jakt", "- error: \"undefined name\"");

  jakttest_cmd(root, &script).arg(test).assert().success();
}

#[test]
fn runtime_error_expectations_check_stderr() {
  let dir = tempdir().expect("tempdir");
  let root = dir.path();
  let (script, _log) = write_driver(root);
  let test = write_test(root, "runerr.jakt", "- stderr: \"out of bounds\"");

  jakttest_cmd(root, &script).arg(test).assert().success();
}

#[test]
fn abrupt_driver_exits_are_reported() {
  let dir = tempdir().expect("tempdir");
  let root = dir.path();
  let (script, _log) = write_driver(root);
  let test = write_test(root, "abrupt.jakt", "- output: \"hi\\n\"");

  let assert = jakttest_cmd(root, &script).arg(test).assert().failure().code(1);
  let stdout = String::from_utf8_lossy(&assert.get_output().stdout);
  assert!(
    stdout.contains("exited abruptly with code 7"),
    "missing abrupt-exit explanation: {stdout}"
  );
}

#[test]
fn skip_markers_count_separately() {
  let dir = tempdir().expect("tempdir");
  let root = dir.path();
  let (script, _log) = write_driver(root);
  let pass = write_test(root, "pass1.jakt", "- output: \"hi\\n\"");
  let skip = write_test(root, "skipped.jakt", "- skip");

  let assert = jakttest_cmd(root, &script).arg(pass).arg(skip).assert().success();
  let stdout = String::from_utf8_lossy(&assert.get_output().stdout);
  assert!(
    stdout.contains("1 passed, 0 failed, 1 skipped"),
    "unexpected summary: {stdout}"
  );
}

#[test]
fn files_without_directives_count_as_failed() {
  let dir = tempdir().expect("tempdir");
  let root = dir.path();
  let (script, _log) = write_driver(root);
  let path = root.join("bare.jakt");
  fs::write(&path, "fn main() {}\n").expect("write fixture");

  let assert = jakttest_cmd(root, &script).arg(path).assert().failure().code(1);
  let output = assert.get_output();
  let stdout = String::from_utf8_lossy(&output.stdout);
  let stderr = String::from_utf8_lossy(&output.stderr);
  assert!(stderr.contains("no Expect directive"), "stderr: {stderr}");
  assert!(stdout.contains("0 passed, 1 failed"), "stdout: {stdout}");
}

#[test]
fn directories_are_searched_for_jakt_files() {
  let dir = tempdir().expect("tempdir");
  let root = dir.path();
  let (script, _log) = write_driver(root);
  let suite = root.join("suite/nested");
  fs::create_dir_all(&suite).expect("mkdir");
  write_test(&suite, "pass_deep.jakt", "- output: \"hi\\n\"");
  fs::write(suite.join("ignored.txt"), "").expect("write");

  let assert = jakttest_cmd(root, &script)
    .arg(root.join("suite"))
    .assert()
    .success();
  let stdout = String::from_utf8_lossy(&assert.get_output().stdout);
  assert!(
    stdout.contains("1 passed, 0 failed, 0 skipped"),
    "unexpected summary: {stdout}"
  );
}

#[test]
fn json_report_is_machine_readable() {
  let dir = tempdir().expect("tempdir");
  let root = dir.path();
  let (script, _log) = write_driver(root);
  let pass = write_test(root, "pass1.jakt", "- output: \"hi\\n\"");
  let wrong = write_test(root, "wrongout.jakt", "- output: \"hi\\n\"");

  let assert = jakttest_cmd(root, &script)
    .arg("--json")
    .arg(pass)
    .arg(wrong)
    .assert()
    .failure()
    .code(1);
  let report: Value =
    serde_json::from_slice(&assert.get_output().stdout).expect("stdout should be valid JSON");
  assert_eq!(report["schema_version"], 1);
  assert_eq!(report["summary"]["passed"], 1);
  assert_eq!(report["summary"]["failed"], 1);
  assert_eq!(report["failures"][0]["kind"], "stdout_unmatched");
  let file = report["failures"][0]["file"].as_str().expect("file");
  assert!(file.ends_with("wrongout.jakt"), "unexpected file: {file}");
}

#[test]
fn include_arguments_use_the_none_sentinel() {
  let dir = tempdir().expect("tempdir");
  let root = dir.path();
  let (script, log) = write_driver(root);
  let plain = write_test(root, "pass_plain.jakt", "- output: \"hi\\n\"");
  let with_import = root.join("pass_import.jakt");
  fs::write(
    &with_import,
    "import extern \"vector\"\n\n/// Expect:\n/// - output: \"hi\\n\"\n\nfn main() {}\n",
  )
  .expect("write fixture");

  jakttest_cmd(root, &script)
    .arg(plain)
    .arg(with_import)
    .assert()
    .success();

  let logged = fs::read_to_string(&log).expect("read driver log");
  assert!(
    logged.contains("--cpp-include None"),
    "missing sentinel: {logged}"
  );
  assert!(
    logged.contains("--cpp-include vector"),
    "missing include: {logged}"
  );
}

#[test]
fn serial_execution_with_one_job_still_runs_everything() {
  let dir = tempdir().expect("tempdir");
  let root = dir.path();
  let (script, _log) = write_driver(root);
  let mut cmd = jakttest_cmd(root, &script);
  for index in 0..4 {
    cmd.arg(write_test(root, &format!("pass{index}.jakt"), "- output: \"hi\\n\""));
  }

  let assert = cmd.arg("-j").arg("1").assert().success();
  let stdout = String::from_utf8_lossy(&assert.get_output().stdout);
  assert!(
    stdout.contains("4 passed, 0 failed, 0 skipped"),
    "unexpected summary: {stdout}"
  );
}

#[test]
fn filter_restricts_the_discovered_set() {
  let dir = tempdir().expect("tempdir");
  let root = dir.path();
  let (script, _log) = write_driver(root);
  let suite = root.join("suite");
  fs::create_dir_all(&suite).expect("mkdir");
  write_test(&suite, "pass_keep.jakt", "- output: \"hi\\n\"");
  write_test(&suite, "wrongout_drop.jakt", "- output: \"hi\\n\"");

  let assert = jakttest_cmd(root, &script)
    .arg("--filter")
    .arg("pass_*.jakt")
    .arg(&suite)
    .assert()
    .success();
  let stdout = String::from_utf8_lossy(&assert.get_output().stdout);
  assert!(
    stdout.contains("1 passed, 0 failed, 0 skipped"),
    "unexpected summary: {stdout}"
  );
}
