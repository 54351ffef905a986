use serde::{Deserialize, Serialize};

/// What a test's `Expect:` block promises about the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpectedKind {
  Okay,
  CompileError,
  RuntimeError,
}

/// The directive-derived oracle for one test: a kind plus the expected text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpectedResult {
  pub kind: ExpectedKind,
  pub output: String,
}

/// Outcome of scanning one source file for directives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedExpectation {
  Expected(ExpectedResult),
  SkipTest,
  NoExpectation,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedTest {
  pub expectation: ParsedExpectation,
  /// Comma-joined headers from `import extern` lines; empty when none.
  pub cpp_includes: String,
}

/// Scan a source file for an `Expect:` block and extern C++ imports.
///
/// The block is a run of `///` doc comments:
///
/// ```text
/// /// Expect:
/// /// - output: "hello\n"
/// ```
///
/// Items are `- output:` (normal run), `- error:` (transpile failure),
/// `- stderr:` (runtime failure) with a quoted, backslash-escaped value, or a
/// bare `- skip`. Any non-comment line ends the block; the last item of an
/// expectation kind wins, and `skip` wins over everything.
pub fn parse_test_source(source: &str) -> ParsedTest {
  let mut expectation = ParsedExpectation::NoExpectation;
  let mut in_expect_block = false;
  let mut includes: Vec<String> = Vec::new();

  for line in source.lines() {
    let trimmed = line.trim_start();

    if let Some(rest) = trimmed.strip_prefix("import extern") {
      if let Some(header) = first_quoted(rest) {
        if !includes.iter().any(|known| known == &header) {
          includes.push(header);
        }
      }
      in_expect_block = false;
      continue;
    }

    let Some(comment) = trimmed.strip_prefix("///") else {
      in_expect_block = false;
      continue;
    };
    let comment = comment.trim();

    if comment == "Expect:" {
      in_expect_block = true;
      continue;
    }
    if !in_expect_block {
      continue;
    }

    let Some(item) = comment.strip_prefix('-') else {
      continue;
    };
    let item = item.trim_start();

    if item == "skip" {
      expectation = ParsedExpectation::SkipTest;
      continue;
    }
    if expectation == ParsedExpectation::SkipTest {
      continue;
    }

    let Some((key, raw_value)) = item.split_once(':') else {
      continue;
    };
    let kind = match key.trim() {
      "output" => ExpectedKind::Okay,
      "error" => ExpectedKind::CompileError,
      "stderr" => ExpectedKind::RuntimeError,
      _ => continue,
    };
    let output = unquote(raw_value.trim());
    expectation = ParsedExpectation::Expected(ExpectedResult { kind, output });
  }

  ParsedTest {
    expectation,
    cpp_includes: includes.join(","),
  }
}

/// Strip surrounding double quotes and process `\n`, `\t`, `\"`, `\\`.
/// Unrecognized escapes are kept verbatim.
fn unquote(raw: &str) -> String {
  let inner = raw
    .strip_prefix('"')
    .and_then(|rest| rest.strip_suffix('"'))
    .unwrap_or(raw);

  let mut out = String::with_capacity(inner.len());
  let mut chars = inner.chars();
  while let Some(c) = chars.next() {
    if c != '\\' {
      out.push(c);
      continue;
    }
    match chars.next() {
      Some('n') => out.push('\n'),
      Some('t') => out.push('\t'),
      Some('"') => out.push('"'),
      Some('\\') => out.push('\\'),
      Some(other) => {
        out.push('\\');
        out.push(other);
      }
      None => out.push('\\'),
    }
  }
  out
}

fn first_quoted(raw: &str) -> Option<String> {
  let start = raw.find('"')?;
  let rest = &raw[start + 1..];
  let end = rest.find('"')?;
  Some(rest[..end].to_string())
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn parses_an_output_expectation() {
    let parsed = parse_test_source("/// Expect:\n/// - output: \"hi\\n\"\n\nfn main() {}\n");
    assert_eq!(
      parsed.expectation,
      ParsedExpectation::Expected(ExpectedResult {
        kind: ExpectedKind::Okay,
        output: "hi\n".to_string(),
      })
    );
    assert_eq!(parsed.cpp_includes, "");
  }

  #[test]
  fn parses_error_and_stderr_expectations() {
    let parsed = parse_test_source("/// Expect:\n/// - error: \"undefined name\"\n");
    assert_eq!(
      parsed.expectation,
      ParsedExpectation::Expected(ExpectedResult {
        kind: ExpectedKind::CompileError,
        output: "undefined name".to_string(),
      })
    );

    let parsed = parse_test_source("/// Expect:\n/// - stderr: \"index out of bounds\"\n");
    assert_eq!(
      parsed.expectation,
      ParsedExpectation::Expected(ExpectedResult {
        kind: ExpectedKind::RuntimeError,
        output: "index out of bounds".to_string(),
      })
    );
  }

  #[test]
  fn skip_marker_wins_over_other_items() {
    let parsed =
      parse_test_source("/// Expect:\n/// - skip\n/// - output: \"ignored\"\nfn main() {}\n");
    assert_eq!(parsed.expectation, ParsedExpectation::SkipTest);
  }

  #[test]
  fn escapes_are_decoded() {
    let parsed = parse_test_source("/// Expect:\n/// - output: \"a\\tb\\\\c\\\"d\\n\"\n");
    let ParsedExpectation::Expected(expected) = parsed.expectation else {
      panic!("expected an expectation");
    };
    assert_eq!(expected.output, "a\tb\\c\"d\n");
  }

  #[test]
  fn directive_free_files_have_no_expectation() {
    let parsed = parse_test_source("fn main() {\n  println(\"hi\")\n}\n");
    assert_eq!(parsed.expectation, ParsedExpectation::NoExpectation);
  }

  #[test]
  fn a_non_comment_line_ends_the_block() {
    let parsed = parse_test_source("/// Expect:\nfn main() {}\n/// - output: \"hi\"\n");
    assert_eq!(parsed.expectation, ParsedExpectation::NoExpectation);
  }

  #[test]
  fn the_last_expectation_item_wins() {
    let parsed =
      parse_test_source("/// Expect:\n/// - output: \"first\"\n/// - output: \"second\"\n");
    let ParsedExpectation::Expected(expected) = parsed.expectation else {
      panic!("expected an expectation");
    };
    assert_eq!(expected.output, "second");
  }

  #[test]
  fn extern_imports_feed_cpp_includes() {
    let source = "import extern \"vector\"\nimport extern \"string\"\nimport extern \"vector\"\n\
                  /// Expect:\n/// - output: \"ok\"\nfn main() {}\n";
    let parsed = parse_test_source(source);
    assert_eq!(parsed.cpp_includes, "vector,string");
  }
}
