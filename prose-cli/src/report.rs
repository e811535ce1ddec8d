//! Checking files and printing findings as `path:line:col: [rule] message`

use std::fmt;
use std::path::{Path, PathBuf};

use prose_core::checking::{CancellationToken, CheckRequest, DocumentChecker, RuleMatch};
use prose_core::dialect::dialect_for_path;
use prose_core::document::Document;
use prose_core::settings::Settings;

/// One match located in a file. Line and column are 1-based; the column counts UTF-16
/// units, like editor positions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Finding {
    pub path: PathBuf,
    pub line: u32,
    pub column: u32,
    pub rule_id: String,
    pub message: String,
}

impl Finding {
    fn new(path: &Path, document: &Document, found: &RuleMatch) -> Self {
        let start = document.to_position(found.range.start);
        Self {
            path: path.to_path_buf(),
            line: start.line + 1,
            column: start.character + 1,
            rule_id: found.rule_id.clone(),
            message: plain_message(&found.message),
        }
    }
}

impl fmt::Display for Finding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}: [{}] {}",
            self.path.display(),
            self.line,
            self.column,
            self.rule_id,
            self.message
        )
    }
}

/// Drop suggestion markup, quoting the suggestion instead.
fn plain_message(message: &str) -> String {
    message
        .replace("<suggestion>", "'")
        .replace("</suggestion>", "'")
}

pub fn dialect_of(path: &Path) -> &'static str {
    dialect_for_path(path).unwrap_or("plaintext")
}

/// Check one file's text. Files are checked whatever `enabled` says: naming a file on
/// the command line is the request to check it.
pub fn check_text(
    checker: &mut DocumentChecker,
    path: &Path,
    text: &str,
    settings: &Settings,
) -> Vec<Finding> {
    let dialect = dialect_of(path);
    let settings = settings.with_enabled([dialect]);
    let document = Document::new(path.to_string_lossy(), dialect, 0, text);
    let request = CheckRequest::new(dialect, text, &settings);
    match checker.check(&request, &CancellationToken::never()) {
        Ok(result) => result
            .matches
            .iter()
            .map(|found| Finding::new(path, &document, found))
            .collect(),
        Err(cancelled) => {
            tracing::warn!(path = %path.display(), "{cancelled}");
            Vec::new()
        }
    }
}
