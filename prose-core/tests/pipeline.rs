//! End-to-end checks: fragmentize, build, run a real speller, map back

use std::collections::BTreeSet;
use std::path::PathBuf;

use prose_core::checking::{CancellationToken, CheckRequest, DocumentChecker};
use prose_core::engine::SpellingEngine;
use prose_core::settings::Settings;
use prose_core::Document;
use spellbook::Dictionary;

const AFF: &str = "SET UTF-8\nTRY esianrtolcdugmphbyfvkwzESIANRTOLCDUGMPHBYFVKWZ'\n";
const DIC: &str = "9\nhello\nworld\nthis\nis\na\nsome\ncode\nand\ntest\n";

fn checker() -> DocumentChecker {
    let dictionary = Dictionary::new(AFF, DIC).unwrap();
    let engine = SpellingEngine::new(PathBuf::from("/nonexistent/dictionaries"))
        .with_dictionary("en-US", dictionary);
    DocumentChecker::new(Box::new(engine))
}

fn covered(text: &str, settings: &Settings, dialect: &str) -> Vec<String> {
    let result = checker()
        .check(
            &CheckRequest::new(dialect, text, settings),
            &CancellationToken::never(),
        )
        .unwrap();
    result
        .matches
        .iter()
        .map(|found| found.covered(text).to_string())
        .collect()
}

#[test]
fn latex_matches_land_on_source_words() {
    let text = "This is \\textbf{wrold}.\n% ltex: language=de-DE\nDas ist gut.\n";
    let result = checker()
        .check(
            &CheckRequest::new("latex", text, &Settings::default()),
            &CancellationToken::never(),
        )
        .unwrap();

    // The German fragment has no dictionary; its failure is logged and skipped.
    assert_eq!(result.matches.len(), 1);
    let found = &result.matches[0];
    assert_eq!(found.covered(text), "wrold");
    assert_eq!(found.language, "en-US");
    assert_eq!(found.word.as_deref(), Some("wrold"));
    assert!(found.replacements.contains(&"world".to_string()));
}

#[test]
fn markdown_headings_and_code() {
    let text = "# Helo\n\nSome `wrold` code and a tset.\n";
    assert_eq!(covered(text, &Settings::default(), "markdown"), ["Helo", "tset"]);
}

#[test]
fn user_dictionary_suppresses_matches() {
    let text = "Some wrold.\n";
    let settings = Settings::default().with_dictionary(BTreeSet::from(["wrold".to_string()]));
    assert!(covered(text, &settings, "plaintext").is_empty());
}

#[test]
fn positions_follow_utf16_columns() {
    let text = "Ünïcode 😀 tset.\n";
    let result = checker()
        .check(
            &CheckRequest::new("plaintext", text, &Settings::default()),
            &CancellationToken::never(),
        )
        .unwrap();
    let document = Document::new("file:///a.txt", "plaintext", 1, text);
    let starts: Vec<_> = result
        .matches
        .iter()
        .map(|found| document.to_position(found.range.start))
        .collect();
    // "Ünïcode" is unknown too; the emoji counts two UTF-16 units.
    assert_eq!(starts.len(), 2);
    assert_eq!(starts[1].character, 11);
}
