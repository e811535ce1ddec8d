//! Matches to protocol diagnostics
//!
//!     Each match becomes one diagnostic with source `prose` and the rule id as code. The
//!     message renders `<suggestion>x</suggestion>` as `'x'` and ends in ` – RULE_ID`.
//!
//!     While the user types, a diagnostic right at the caret is mostly noise about the
//!     unfinished word. Diagnostics touching the character before the caret are held back
//!     and published once the caret has rested for [`CARET_DELAY`].

use std::ops::Range as ByteRange;
use std::time::Duration;

use lsp_types::{Diagnostic, DiagnosticSeverity, NumberOrString, Position, Range};
use once_cell::sync::Lazy;
use regex::Regex;

use prose_core::checking::{CheckResult, RuleMatch};
use prose_core::document::{Document, Position as DocumentPosition};
use prose_core::settings::{Settings, Severity};

pub const SOURCE: &str = "prose";

pub const CARET_DELAY: Duration = Duration::from_secs(2);

static SUGGESTION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<suggestion>(.*?)</suggestion>").unwrap());

pub fn to_lsp_position(position: DocumentPosition) -> Position {
    Position::new(position.line, position.character)
}

pub fn from_lsp_position(position: Position) -> DocumentPosition {
    DocumentPosition::new(position.line, position.character)
}

pub fn to_lsp_range(document: &Document, range: &ByteRange<usize>) -> Range {
    let (start, end) = document.to_positions(range);
    Range::new(to_lsp_position(start), to_lsp_position(end))
}

pub fn from_lsp_range(document: &Document, range: Range) -> ByteRange<usize> {
    document.to_offsets((from_lsp_position(range.start), from_lsp_position(range.end)))
}

pub fn severity(severity: Severity) -> DiagnosticSeverity {
    match severity {
        Severity::Error => DiagnosticSeverity::ERROR,
        Severity::Warning => DiagnosticSeverity::WARNING,
        Severity::Information => DiagnosticSeverity::INFORMATION,
        Severity::Hint => DiagnosticSeverity::HINT,
    }
}

pub fn render_message(message: &str, rule_id: &str) -> String {
    let message = SUGGESTION.replace_all(message, "'$1'");
    format!("{message} \u{2013} {rule_id}")
}

pub fn diagnostic(document: &Document, settings: &Settings, found: &RuleMatch) -> Diagnostic {
    Diagnostic {
        range: to_lsp_range(document, &found.range),
        severity: Some(severity(settings.severity_for(&found.rule_id))),
        code: Some(NumberOrString::String(found.rule_id.clone())),
        source: Some(SOURCE.to_string()),
        message: render_message(&found.message, &found.rule_id),
        ..Diagnostic::default()
    }
}

pub fn diagnostics(
    document: &Document,
    settings: &Settings,
    result: &CheckResult,
) -> Vec<Diagnostic> {
    result
        .matches
        .iter()
        .map(|found| diagnostic(document, settings, found))
        .collect()
}

/// From the character before the caret up to the caret.
pub fn caret_range(caret: Position) -> Range {
    Range::new(
        Position::new(caret.line, caret.character.saturating_sub(1)),
        caret,
    )
}

fn key(position: Position) -> (u32, u32) {
    (position.line, position.character)
}

/// Closed-interval intersection.
pub fn intersects(a: &Range, b: &Range) -> bool {
    key(a.start) <= key(b.end) && key(b.start) <= key(a.end)
}

/// Split off diagnostics touching the caret. Returns the ones to publish now and whether
/// anything was held back.
pub fn hold_back_at_caret(
    diagnostics: Vec<Diagnostic>,
    caret: Position,
) -> (Vec<Diagnostic>, bool) {
    let caret = caret_range(caret);
    let total = diagnostics.len();
    let visible: Vec<_> = diagnostics
        .into_iter()
        .filter(|diagnostic| !intersects(&diagnostic.range, &caret))
        .collect();
    let held_back = visible.len() < total;
    (visible, held_back)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::collections::BTreeMap;

    fn range(a: (u32, u32), b: (u32, u32)) -> Range {
        Range::new(Position::new(a.0, a.1), Position::new(b.0, b.1))
    }

    fn rule_match(range: ByteRange<usize>, message: &str) -> RuleMatch {
        RuleMatch {
            rule_id: "EN_A_VS_AN".to_string(),
            sentence: "This is an test.".to_string(),
            range,
            message: message.to_string(),
            replacements: vec!["a".to_string()],
            language: "en-US".to_string(),
            word: None,
        }
    }

    #[rstest]
    #[case(
        "Use <suggestion>a</suggestion> instead of 'an'.",
        "Use 'a' instead of 'an'. \u{2013} EN_A_VS_AN"
    )]
    #[case("Plain message.", "Plain message. \u{2013} EN_A_VS_AN")]
    #[case(
        "<suggestion>x</suggestion> or <suggestion>y</suggestion>",
        "'x' or 'y' \u{2013} EN_A_VS_AN"
    )]
    fn message_rendering(#[case] message: &str, #[case] expected: &str) {
        assert_eq!(render_message(message, "EN_A_VS_AN"), expected);
    }

    #[test]
    fn diagnostic_fields() {
        let document = Document::new("file:///a.md", "markdown", 1, "Intro\nThis is an test.");
        let settings = Settings::default().with_diagnostic_severity(BTreeMap::from([
            ("EN_A_VS_AN".to_string(), Severity::Warning),
            ("default".to_string(), Severity::Hint),
        ]));
        let found = rule_match(14..16, "Use <suggestion>a</suggestion>.");
        let diagnostic = diagnostic(&document, &settings, &found);

        assert_eq!(diagnostic.range, range((1, 8), (1, 10)));
        assert_eq!(diagnostic.severity, Some(DiagnosticSeverity::WARNING));
        assert_eq!(diagnostic.source.as_deref(), Some("prose"));
        assert_eq!(
            diagnostic.code,
            Some(NumberOrString::String("EN_A_VS_AN".to_string()))
        );
        assert_eq!(diagnostic.message, "Use 'a'. \u{2013} EN_A_VS_AN");
    }

    #[test]
    fn default_severity_is_information() {
        let document = Document::new("file:///a.md", "markdown", 1, "This is an test.");
        let found = rule_match(8..10, "Message.");
        let diagnostic = diagnostic(&document, &Settings::default(), &found);
        assert_eq!(diagnostic.severity, Some(DiagnosticSeverity::INFORMATION));
    }

    #[rstest]
    #[case(range((0, 5), (0, 9)), (0, 9), true)]
    #[case(range((0, 5), (0, 9)), (0, 10), true)]
    #[case(range((0, 5), (0, 9)), (0, 11), false)]
    #[case(range((0, 5), (0, 9)), (0, 5), true)]
    #[case(range((0, 5), (0, 9)), (0, 4), false)]
    #[case(range((0, 0), (0, 3)), (0, 0), true)]
    #[case(range((1, 0), (1, 3)), (0, 2), false)]
    fn caret_intersection(
        #[case] diagnostic: Range,
        #[case] caret: (u32, u32),
        #[case] held: bool,
    ) {
        let diagnostics = vec![Diagnostic {
            range: diagnostic,
            ..Diagnostic::default()
        }];
        let (visible, held_back) = hold_back_at_caret(diagnostics, Position::new(caret.0, caret.1));
        assert_eq!(held_back, held);
        assert_eq!(visible.is_empty(), held);
    }
}
