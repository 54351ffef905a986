use crate::{HarnessError, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use regex::Regex;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

#[derive(Debug, Clone)]
pub enum Filter {
  All,
  Glob(GlobSet),
  Regex(Regex),
}

/// Build a test filter from a pattern, trying glob syntax first and falling
/// back to a regex.
pub fn build_filter(pattern: Option<&str>) -> Result<Filter> {
  match pattern {
    None => Ok(Filter::All),
    Some(raw) => {
      if let Ok(glob) = Glob::new(raw) {
        let mut builder = GlobSetBuilder::new();
        builder.add(glob);
        let set = builder
          .build()
          .map_err(|err| HarnessError::InvalidFilter(err.to_string()))?;
        return Ok(Filter::Glob(set));
      }

      let regex =
        Regex::new(raw).map_err(|err| HarnessError::InvalidFilter(err.to_string()))?;
      Ok(Filter::Regex(regex))
    }
  }
}

impl Filter {
  pub fn matches(&self, id: &str) -> bool {
    match self {
      Filter::All => true,
      Filter::Glob(set) => set.is_match(id),
      Filter::Regex(re) => re.is_match(id),
    }
  }
}

/// Expand the positional arguments into a sorted list of test files.
///
/// Files are taken as-is; directories are searched depth-first for `*.jakt`.
pub fn discover_test_files(paths: &[PathBuf], filter: &Filter) -> Result<Vec<PathBuf>> {
  let mut files = Vec::new();
  for path in paths {
    if path.is_dir() {
      for entry in WalkDir::new(path).into_iter().filter_map(|entry| entry.ok()) {
        if !entry.file_type().is_file() {
          continue;
        }
        let candidate = entry.into_path();
        if candidate.extension().and_then(|ext| ext.to_str()) != Some("jakt") {
          continue;
        }
        if filter.matches(&normalize_id(path, &candidate)) {
          files.push(candidate);
        }
      }
    } else if path.is_file() {
      if filter.matches(&path.to_string_lossy().replace('\\', "/")) {
        files.push(path.clone());
      }
    } else {
      return Err(HarnessError::Arg(format!(
        "no such file or directory: {}",
        path.display()
      )));
    }
  }
  files.sort();
  files.dedup();
  Ok(files)
}

fn normalize_id(root: &Path, path: &Path) -> String {
  path
    .strip_prefix(root)
    .unwrap_or(path)
    .to_string_lossy()
    .replace('\\', "/")
}
