use anyhow::Context;
use clap::error::ErrorKind;
use clap::Parser;
use jakttest_harness::directives::{parse_test_source, ParsedExpectation};
use jakttest_harness::discover::{build_filter, discover_test_files};
use jakttest_harness::report;
use jakttest_harness::scheduler::{
  create_scratch_directories, remove_scratch_directories, run_tests, DriverConfig, Test,
};
use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
  name = "jakttest",
  version,
  about = "Parallel test runner for the Jakt toolchain",
  long_about = None,
  args_override_self = true
)]
struct Cli {
  /// Do not collect or print per-test failure explanations.
  #[arg(long)]
  hide_reasons: bool,

  /// Number of tests to run in parallel.
  #[arg(short = 'j', long = "jobs", default_value_t = num_cpus::get())]
  jobs: usize,

  /// Jakt build directory containing bin/jakt and lib/.
  #[arg(short = 'b', long = "build-dir", default_value = "build")]
  build_dir: PathBuf,

  /// Where to create the per-worker scratch directories (default: OS temp).
  #[arg(long = "temp-dir")]
  temp_dir: Option<PathBuf>,

  /// C++ compiler forwarded to the driver.
  #[arg(short = 'C', long = "cpp-compiler", default_value = "clang++")]
  cpp_compiler: PathBuf,

  /// Target triple forwarded to the driver.
  #[arg(long, default_value_t = default_target_triple())]
  target_triple: String,

  /// Driver script implementing the transpile/compile/run pipeline.
  #[arg(long, default_value = "jakttest/run_one.py")]
  driver: PathBuf,

  /// Interpreter used to invoke the driver script.
  #[arg(long, default_value = "python3")]
  driver_interpreter: String,

  /// Glob or regex restricting which tests run.
  #[arg(long)]
  filter: Option<String>,

  /// Emit a JSON report on stdout instead of the human summary.
  #[arg(long)]
  json: bool,

  /// Enable tracing output on stderr.
  #[arg(long)]
  trace: bool,

  /// Test files, or directories searched for *.jakt files.
  #[arg(required = true)]
  paths: Vec<PathBuf>,
}

fn default_target_triple() -> String {
  format!(
    "{}-unknown-{}",
    std::env::consts::ARCH,
    std::env::consts::OS
  )
}

fn install_subscriber(trace: bool) {
  if !trace {
    return;
  }
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(std::io::stderr)
    .init();
}

fn main() -> ExitCode {
  let cli = match Cli::try_parse() {
    Ok(cli) => cli,
    Err(err) => {
      let code = match err.kind() {
        ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => 0,
        _ => 1,
      };
      let _ = err.print();
      return ExitCode::from(code);
    }
  };
  install_subscriber(cli.trace);

  match try_main(cli) {
    Ok(code) => code,
    Err(err) => {
      eprintln!("error: {err:#}");
      ExitCode::from(1)
    }
  }
}

fn try_main(cli: Cli) -> anyhow::Result<ExitCode> {
  let filter = build_filter(cli.filter.as_deref())?;
  let files = discover_test_files(&cli.paths, &filter)?;

  let mut tests = Vec::new();
  let mut skipped = 0usize;
  let mut starting_failed = 0usize;
  for path in &files {
    let source =
      fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let parsed = parse_test_source(&source);
    let file_name = path.display().to_string();
    match parsed.expectation {
      ParsedExpectation::Expected(expected) => tests.push(Test {
        expected,
        file_name,
        directory_index: 0,
        cpp_includes: parsed.cpp_includes,
      }),
      ParsedExpectation::SkipTest => skipped += 1,
      ParsedExpectation::NoExpectation => {
        starting_failed += 1;
        eprintln!("[ FAIL ] {file_name} (no Expect directive)");
      }
    }
  }

  let total_test_count = tests.len() + starting_failed;
  let temp_dir = cli.temp_dir.clone().unwrap_or_else(std::env::temp_dir);
  let jobs = cli.jobs.max(1);
  let directories = create_scratch_directories(&temp_dir, jobs)
    .with_context(|| format!("create scratch directories under {}", temp_dir.display()))?;

  let driver = DriverConfig {
    interpreter: cli.driver_interpreter.clone(),
    script: cli.driver.clone(),
    build_dir: cli.build_dir.clone(),
    target_triple: cli.target_triple.clone(),
    cpp_compiler: cli.cpp_compiler.clone(),
  };

  info!(
    tests = tests.len(),
    skipped,
    failed_to_parse = starting_failed,
    jobs,
    "starting test run"
  );

  let result = run_tests(
    tests,
    directories.clone(),
    !cli.hide_reasons,
    starting_failed,
    total_test_count,
    &driver,
  );
  remove_scratch_directories(&directories);
  let result = result?;

  if cli.json {
    report::write_json_report(&result, skipped)?;
  } else {
    report::print_human_report(&result, skipped, cli.hide_reasons);
  }

  if result.failed_count > 0 {
    Ok(ExitCode::from(1))
  } else {
    Ok(ExitCode::SUCCESS)
  }
}
