use crate::pool::ParallelExecutionPool;
use crate::{PoolError, Result};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::error;

/// Compiles a list of source files into object files through the shared pool
/// and links the results into an executable or archive.
#[derive(Debug)]
pub struct Builder {
  linked_files: Vec<String>,
  files_to_compile: Vec<String>,
  pool: ParallelExecutionPool,
}

impl Builder {
  pub fn for_building(files: Vec<String>, max_concurrent: usize) -> Self {
    Self {
      linked_files: Vec::new(),
      files_to_compile: files,
      pool: ParallelExecutionPool::new(max_concurrent),
    }
  }

  /// Object files produced so far, in submission order.
  pub fn linked_files(&self) -> &[String] {
    &self.linked_files
  }

  /// Compile every pending file into `<binary_dir>/<file>.o`.
  ///
  /// `compiler_invocation` maps a source path and an object path to the full
  /// compiler argv for one translation unit. The first non-zero exit aborts
  /// the build: in-flight jobs are killed and reaped before returning.
  pub fn build_all(
    &mut self,
    binary_dir: &Path,
    compiler_invocation: impl Fn(&str, &str) -> Vec<String>,
  ) -> Result<()> {
    let files = std::mem::take(&mut self.files_to_compile);
    let total = files.len();

    for (submitted, file_name) in files.iter().enumerate() {
      self.check_completed_jobs(true)?;

      let built_object = object_path(binary_dir, file_name);
      self.linked_files.push(built_object.clone());
      let source = binary_dir.join(file_name).display().to_string();
      let argv = compiler_invocation(&source, &built_object);
      self.pool.run(&argv)?;

      eprint!(
        "\r\x1b[2KBuilding: {}/{} ({})",
        submitted + 1,
        total,
        file_name
      );
      std::io::stderr().flush().ok();
    }
    eprintln!();

    self.pool.wait_for_all_jobs_to_complete()?;
    self.check_completed_jobs(false)
  }

  fn check_completed_jobs(&mut self, kill_on_failure: bool) -> Result<()> {
    let failed = self
      .pool
      .completed_jobs()
      .find(|(_, status)| status.exit_code != 0);
    if let Some((id, status)) = failed {
      error!(job = id, exit_code = status.exit_code, "compilation failed");
      if kill_on_failure {
        self.pool.kill_all()?;
        // Reap the killed children so none outlive the build.
        let _ = self.pool.wait_for_all_jobs_to_complete();
      }
      return Err(PoolError::CompilationFailed(status.exit_code));
    }
    Ok(())
  }

  pub fn link_into_executable(
    &mut self,
    cxx_compiler_path: &str,
    output_filename: &str,
    extra_arguments: &[String],
  ) -> Result<()> {
    let mut argv = vec![
      cxx_compiler_path.to_string(),
      "-o".to_string(),
      output_filename.to_string(),
    ];
    argv.extend(self.linked_files.iter().cloned());
    argv.extend(extra_arguments.iter().cloned());
    self.run_link_job(argv)
  }

  pub fn link_into_archive(&mut self, archiver: &str, archive_filename: &str) -> Result<()> {
    let mut argv = vec![
      archiver.to_string(),
      "cr".to_string(),
      archive_filename.to_string(),
    ];
    argv.extend(self.linked_files.iter().cloned());
    self.run_link_job(argv)
  }

  fn run_link_job(&mut self, argv: Vec<String>) -> Result<()> {
    let id = self.pool.run(&argv)?;
    self.pool.wait_for_all_jobs_to_complete()?;
    match self.pool.status(id) {
      Some(status) if status.exit_code == 0 => Ok(()),
      Some(status) => {
        error!(exit_code = status.exit_code, "linking failed");
        Err(PoolError::LinkingFailed(status.exit_code))
      }
      None => Err(PoolError::LinkingFailed(-1)),
    }
  }
}

fn object_path(binary_dir: &Path, file_name: &str) -> String {
  let with_object_ext = PathBuf::from(file_name).with_extension("o");
  binary_dir.join(with_object_ext).display().to_string()
}
