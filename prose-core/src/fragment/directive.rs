//! Inline `ltex:` directives
//!
//!     A directive body is a blank-separated list of `key=value` entries. Keys are
//!     case-insensitive; unknown keys and entries without `=` are logged and skipped.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

use crate::settings::{Settings, DEFAULT_ENABLED};

use super::{CodeFragment, Fragmentizer};

static LATEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?mR)^[ \t]*%[ \t]*(?i:ltex):(.*?)$").unwrap());

static MARKDOWN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(concat!(
        r#"(?mR)^[ \t]*\[[^\]]+\]:[ \t]*<>[ \t]*"[ \t]*(?i:ltex):(.*?)"[ \t]*$"#,
        r"|^[ \t]*<!--[ \t]*(?i:ltex):(.*?)[ \t]*-->[ \t]*$",
    ))
    .unwrap()
});

static RESTRUCTUREDTEXT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?mR)^[ \t]*\.\.[ \t]*(?i:ltex):(.*?)[ \t]*$").unwrap());

static ORG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?mR)^[ \t]*#[ \t]+(?i:ltex):(.*?)[ \t]*$").unwrap());

/// Parse a directive body into `(key, value)` pairs, in order.
pub fn parse_entries(body: &str) -> Vec<(String, String)> {
    body.split([' ', '\t'])
        .filter(|entry| !entry.is_empty())
        .filter_map(|entry| match entry.split_once('=') {
            Some((key, value)) => Some((key.trim().to_string(), value.trim().to_string())),
            None => {
                tracing::warn!(entry, "ignoring malformed inline setting");
                None
            }
        })
        .collect()
}

/// Derive the settings that follow a directive.
pub fn apply(settings: &Settings, body: &str) -> Settings {
    let mut settings = settings.clone();
    for (key, value) in parse_entries(body) {
        if key.eq_ignore_ascii_case("enabled") {
            settings = if value == "true" {
                settings.with_enabled(DEFAULT_ENABLED.iter().copied())
            } else {
                settings.with_enabled(Vec::<String>::new())
            };
        } else if key.eq_ignore_ascii_case("language") {
            settings = settings.with_language(&value);
        } else {
            tracing::warn!(key = %key, value = %value, "ignoring unknown inline setting");
        }
    }
    settings
}

/// Splits at whole-line directive comments found by one or more regexes.
///
/// Each regex captures the directive body in one of its groups.
#[derive(Debug, Clone)]
pub struct DirectiveFragmentizer {
    dialect: String,
    regexes: Vec<Regex>,
}

impl DirectiveFragmentizer {
    pub fn new(dialect: impl Into<String>, regexes: Vec<Regex>) -> Self {
        Self {
            dialect: dialect.into(),
            regexes,
        }
    }

    pub fn latex(dialect: &str) -> Self {
        Self::new(dialect, vec![LATEX.clone()])
    }

    pub fn markdown(dialect: &str) -> Self {
        Self::new(dialect, vec![MARKDOWN.clone()])
    }

    pub fn restructuredtext() -> Self {
        Self::new("restructuredtext", vec![RESTRUCTUREDTEXT.clone()])
    }

    pub fn org() -> Self {
        Self::new("org", vec![ORG.clone()])
    }

    pub fn dialect(&self) -> &str {
        &self.dialect
    }

    /// The earliest directive at or after `pos`.
    fn next_directive<'c>(&self, code: &'c str, pos: usize) -> Option<Captures<'c>> {
        self.regexes
            .iter()
            .filter_map(|regex| regex.captures_at(code, pos))
            .min_by_key(|captures| captures.get(0).map_or(usize::MAX, |found| found.start()))
    }
}

impl Fragmentizer for DirectiveFragmentizer {
    fn fragmentize(&self, code: &str, settings: &Settings) -> Vec<CodeFragment> {
        let mut fragments = Vec::new();
        let mut settings = settings.clone();
        let mut pos = 0;

        while pos <= code.len() {
            let Some(captures) = self.next_directive(code, pos) else {
                break;
            };
            let Some(whole) = captures.get(0) else {
                break;
            };
            fragments.push(CodeFragment::new(
                &self.dialect,
                &code[pos..whole.start()],
                pos,
                settings.clone(),
            ));

            match captures.iter().skip(1).flatten().next() {
                Some(body) => settings = apply(&settings, body.as_str()),
                None => tracing::warn!("directive without settings"),
            }

            let rest = &code[whole.end()..];
            let terminator = if rest.starts_with("\r\n") {
                2
            } else if rest.starts_with('\n') {
                1
            } else {
                0
            };
            let end = whole.end() + terminator;
            if end == pos {
                // Directive regexes always consume the marker.
                break;
            }
            pos = end;
        }

        fragments.push(CodeFragment::new(
            &self.dialect,
            &code[pos.min(code.len())..],
            pos.min(code.len()),
            settings,
        ));
        fragments
    }
}
