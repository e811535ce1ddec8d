//! Checking pipeline
//!
//!     text ──fragmentize──▶ fragments ──build──▶ annotated texts ──engine──▶ matches
//!
//!     Matches come back relative to their fragment and are shifted into document
//!     coordinates. Unknown words the user put in the dictionary and hidden false positives
//!     are dropped before the result is returned.
//!
//! Cancellation
//!
//!     Every document owns a [`CancellationCounter`]. A check takes a [`CancellationToken`]
//!     snapshot and polls it between stages. Once the counter moves on, the check stops
//!     with [`Cancelled`] and its partial work is discarded.

use std::ops::Range;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::annotated::AnnotatedText;
use crate::building::{annotate, program::CommentSyntax};
use crate::engine::{is_unknown_word_rule, AnalysisEngine, EngineMatch, EngineSettings};
use crate::error::Cancelled;
use crate::fragment::{fragmentize, CodeFragment};
use crate::settings::Settings;

const LOGGED_TEXT_LENGTH: usize = 100;

static REPEATED_SPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[ \n]{2,}").unwrap());

/// Per-document generation counter. Incrementing it invalidates outstanding tokens.
#[derive(Debug, Clone, Default)]
pub struct CancellationCounter(Arc<AtomicU64>);

impl CancellationCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }

    pub fn token(&self) -> CancellationToken {
        CancellationToken {
            counter: self.0.clone(),
            generation: self.0.load(Ordering::SeqCst),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CancellationToken {
    counter: Arc<AtomicU64>,
    generation: u64,
}

impl CancellationToken {
    /// A token nothing can cancel.
    pub fn never() -> Self {
        CancellationCounter::new().token()
    }

    pub fn is_cancelled(&self) -> bool {
        self.counter.load(Ordering::SeqCst) != self.generation
    }

    pub fn check(&self) -> Result<(), Cancelled> {
        if self.is_cancelled() {
            Err(Cancelled)
        } else {
            Ok(())
        }
    }
}

/// A reported problem in document coordinates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleMatch {
    pub rule_id: String,
    pub sentence: String,
    /// Byte range in the document text.
    pub range: Range<usize>,
    pub message: String,
    pub replacements: Vec<String>,
    /// Language of the fragment the match was found in.
    pub language: String,
    /// The word as the engine read it, for unknown-word matches.
    pub word: Option<String>,
}

impl RuleMatch {
    pub fn is_unknown_word(&self) -> bool {
        is_unknown_word_rule(&self.rule_id)
    }

    /// The covered text in `document_text`, or `""` if the range is out of bounds.
    pub fn covered<'a>(&self, document_text: &'a str) -> &'a str {
        document_text.get(self.range.clone()).unwrap_or("")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnnotatedFragment {
    pub fragment: CodeFragment,
    pub annotated: AnnotatedText,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CheckResult {
    pub matches: Vec<RuleMatch>,
    pub fragments: Vec<AnnotatedFragment>,
}

/// What to check.
#[derive(Debug, Clone)]
pub struct CheckRequest<'a> {
    pub dialect: &'a str,
    pub text: &'a str,
    pub settings: &'a Settings,
    /// Restrict the check to this byte range of `text`.
    pub range: Option<Range<usize>>,
}

impl<'a> CheckRequest<'a> {
    pub fn new(dialect: &'a str, text: &'a str, settings: &'a Settings) -> Self {
        Self {
            dialect,
            text,
            settings,
            range: None,
        }
    }

    pub fn with_range(self, range: Option<Range<usize>>) -> Self {
        Self { range, ..self }
    }
}

pub struct DocumentChecker {
    engine: Box<dyn AnalysisEngine>,
}

impl DocumentChecker {
    pub fn new(engine: Box<dyn AnalysisEngine>) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &dyn AnalysisEngine {
        self.engine.as_ref()
    }

    pub fn set_engine(&mut self, engine: Box<dyn AnalysisEngine>) {
        self.engine = engine;
    }

    pub fn check(
        &mut self,
        request: &CheckRequest<'_>,
        token: &CancellationToken,
    ) -> Result<CheckResult, Cancelled> {
        let (code, range_offset) = match &request.range {
            Some(range) => match request.text.get(range.clone()) {
                Some(code) => (code, range.start),
                None => {
                    tracing::warn!(
                        from = range.start,
                        to = range.end,
                        "ignoring check range outside of the text"
                    );
                    (request.text, 0)
                }
            },
            None => (request.text, 0),
        };

        token.check()?;
        let fragments = fragmentize(request.dialect, code, request.settings);
        let annotated: Vec<AnnotatedFragment> = fragments
            .into_iter()
            .map(|fragment| {
                let dialect = if request.range.is_some()
                    && CommentSyntax::for_language(&fragment.dialect).is_some()
                {
                    "plaintext"
                } else {
                    fragment.dialect.as_str()
                };
                let annotated = annotate(dialect, &fragment.text, &fragment.settings);
                AnnotatedFragment {
                    fragment,
                    annotated,
                }
            })
            .collect();

        if !self.engine.is_ready() {
            tracing::warn!("analysis engine is not ready, skipping check");
            return Ok(CheckResult {
                matches: Vec::new(),
                fragments: annotated,
            });
        }

        let mut matches = Vec::new();
        for item in &annotated {
            let eligible = request.range.is_some()
                || matches!(item.fragment.dialect.as_str(), "nop" | "plaintext")
                || item.fragment.settings.is_dialect_enabled(&item.fragment.dialect);
            if !eligible || item.annotated.plain_text().trim().is_empty() {
                continue;
            }

            token.check()?;
            let found = self.check_fragment(item);
            token.check()?;

            matches.extend(
                found
                    .into_iter()
                    .filter_map(|found| remap(item, found, range_offset)),
            );
        }

        Ok(CheckResult {
            matches,
            fragments: annotated,
        })
    }

    fn check_fragment(&mut self, item: &AnnotatedFragment) -> Vec<EngineMatch> {
        let settings = &item.fragment.settings;
        let plain = item.annotated.plain_text();
        tracing::debug!(
            dialect = %item.fragment.dialect,
            language = settings.language(),
            text = %truncate(plain, LOGGED_TEXT_LENGTH),
            "checking fragment"
        );
        tracing::trace!(annotation = ?item.annotated.parts(), "fragment annotation");

        self.engine.enable_rules(settings.enabled_rules());
        self.engine.disable_rules(settings.disabled_rules());
        match self
            .engine
            .check(&item.annotated, &EngineSettings::from_settings(settings))
        {
            Ok(found) => {
                tracing::debug!(count = found.len(), "fragment checked");
                found
            }
            Err(err) => {
                tracing::error!(
                    dialect = %item.fragment.dialect,
                    offset = item.fragment.offset,
                    error = %err,
                    "fragment check failed"
                );
                Vec::new()
            }
        }
    }
}

/// Shift a fragment-relative match into document coordinates, applying the dictionary,
/// hidden false positives and message cleanup. Returns `None` for dropped matches.
fn remap(item: &AnnotatedFragment, found: EngineMatch, range_offset: usize) -> Option<RuleMatch> {
    let settings = &item.fragment.settings;
    let original = &item.fragment.text;
    let from = found.from.min(original.len());
    let to = found.to.clamp(from, original.len());
    let unknown_word = is_unknown_word_rule(&found.rule_id);

    let plain_word = item.annotated.plain_substring(from..to);
    if unknown_word {
        let original_word = original.get(from..to).unwrap_or("");
        let dictionary = settings.dictionary();
        if dictionary.contains(original_word) || dictionary.contains(plain_word) {
            tracing::trace!(word = plain_word, "word is in dictionary");
            return None;
        }
    }

    let sentence = found.sentence.trim();
    if let Some(hidden) = settings
        .hidden_false_positives()
        .iter()
        .find(|hidden| hidden.matches(&found.rule_id, sentence))
    {
        tracing::trace!(
            rule_id = %found.rule_id,
            pattern = hidden.sentence_pattern(),
            "hiding false positive"
        );
        return None;
    }

    let message = if unknown_word {
        format!("'{plain_word}': {}", found.message)
    } else {
        found.message
    };
    let message = REPEATED_SPACE.replace_all(&message, " ").trim().to_string();

    let shift = item.fragment.offset + range_offset;
    Some(RuleMatch {
        rule_id: found.rule_id,
        sentence: found.sentence,
        range: shift + from..shift + to,
        message,
        replacements: found.replacements,
        language: settings.language().to_string(),
        word: unknown_word.then(|| plain_word.to_string()),
    })
}

fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((index, _)) => format!("{}...", &text[..index]),
        None => text.to_string(),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::error::EngineError;
    use crate::settings::HiddenFalsePositive;
    use std::collections::{BTreeSet, HashMap};
    use std::sync::Mutex;

    /// Reports every occurrence of a fixed word and records what it was asked.
    #[derive(Clone, Default)]
    pub(crate) struct WordEngine {
        pub word: String,
        pub rule_id: String,
        pub calls: Arc<Mutex<Vec<(String, EngineSettings)>>>,
        pub disabled: Arc<Mutex<BTreeSet<String>>>,
        pub fail_on: Option<String>,
    }

    impl WordEngine {
        pub fn new(word: &str, rule_id: &str) -> Self {
            Self {
                word: word.to_string(),
                rule_id: rule_id.to_string(),
                ..Default::default()
            }
        }

        pub fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    impl AnalysisEngine for WordEngine {
        fn is_ready(&self) -> bool {
            true
        }

        fn check(
            &mut self,
            text: &AnnotatedText,
            settings: &EngineSettings,
        ) -> Result<Vec<EngineMatch>, EngineError> {
            let plain = text.plain_text();
            self.calls
                .lock()
                .unwrap()
                .push((plain.to_string(), settings.clone()));
            if self.fail_on.as_deref().is_some_and(|fail| plain.contains(fail)) {
                return Err(EngineError::Status(500));
            }
            Ok(plain
                .match_indices(&self.word)
                .map(|(index, word)| EngineMatch {
                    rule_id: self.rule_id.clone(),
                    sentence: format!("  {plain}  "),
                    from: text.original_offset(index, crate::annotated::Bias::Start),
                    to: text.original_offset(index + word.len(), crate::annotated::Bias::End),
                    message: "Found  a\n\nproblem.".to_string(),
                    replacements: vec!["fixed".to_string()],
                })
                .collect())
        }

        fn enable_rules(&mut self, _: &BTreeSet<String>) {}

        fn disable_rules(&mut self, rule_ids: &BTreeSet<String>) {
            *self.disabled.lock().unwrap() = rule_ids.clone();
        }
    }

    fn checker(engine: &WordEngine) -> DocumentChecker {
        DocumentChecker::new(Box::new(engine.clone()))
    }

    fn check(engine: &WordEngine, dialect: &str, text: &str, settings: &Settings) -> CheckResult {
        checker(engine)
            .check(&CheckRequest::new(dialect, text, settings), &CancellationToken::never())
            .unwrap()
    }

    #[test]
    fn matches_are_mapped_to_document_offsets() {
        let engine = WordEngine::new("wrong", "SOME_RULE");
        let text = "This is \\textbf{wrong}.\n% ltex: language=de-DE\nAlso wrong.\n";
        let result = check(&engine, "latex", text, &Settings::default());

        assert_eq!(result.matches.len(), 2);
        for found in &result.matches {
            assert_eq!(found.covered(text), "wrong");
        }
        assert_eq!(result.matches[0].language, "en-US");
        assert_eq!(result.matches[1].language, "de-DE");
        assert_eq!(result.matches[0].message, "Found a problem.");
    }

    #[test]
    fn unknown_words_are_prefixed_and_filtered() {
        let engine = WordEngine::new("Qwerty", "MORFOLOGIK_RULE_EN_US");
        let text = "Some Qwerty text.";
        let result = check(&engine, "plaintext", text, &Settings::default());
        assert_eq!(result.matches.len(), 1);
        assert_eq!(result.matches[0].message, "'Qwerty': Found a problem.");
        assert_eq!(result.matches[0].word.as_deref(), Some("Qwerty"));

        let settings =
            Settings::default().with_dictionary(BTreeSet::from(["Qwerty".to_string()]));
        assert!(check(&engine, "plaintext", text, &settings).matches.is_empty());
    }

    #[test]
    fn dictionary_matches_plain_form_of_markup() {
        let engine = WordEngine::new("Ä", "GERMAN_SPELLER_RULE");
        let settings = Settings::default()
            .with_language("de-DE")
            .with_dictionary(BTreeSet::from(["Ä".to_string()]));
        let result = check(&engine, "latex", "Ein \\\"A hier.", &settings);
        assert!(result.matches.is_empty());
    }

    #[test]
    fn hidden_false_positives_use_trimmed_sentence() {
        let engine = WordEngine::new("wrong", "SOME_RULE");
        let hidden = HiddenFalsePositive::new("SOME_RULE", "^This is wrong\\.$").unwrap();
        let settings = Settings::default().with_all_hidden_false_positives(HashMap::from([(
            "en-US".to_string(),
            vec![hidden],
        )]));
        assert!(check(&engine, "plaintext", "This is wrong.", &settings)
            .matches
            .is_empty());
        assert_eq!(
            check(&engine, "plaintext", "That is wrong.", &settings)
                .matches
                .len(),
            1
        );
    }

    #[test]
    fn disabled_dialects_are_skipped() {
        let engine = WordEngine::new("wrong", "SOME_RULE");
        let settings = Settings::default().with_enabled(["markdown"]);
        let result = check(&engine, "latex", "This is wrong.", &settings);
        assert!(result.matches.is_empty());
        assert_eq!(engine.call_count(), 0);
        assert_eq!(result.fragments.len(), 1);
    }

    #[test]
    fn range_check_uses_plaintext_for_program_source() {
        let engine = WordEngine::new("wrong", "SOME_RULE");
        let text = "fn main() {}\n// This is wrong.\n";
        let range = 16..text.len();
        let result = checker(&engine)
            .check(
                &CheckRequest::new("rust", text, &Settings::default()).with_range(Some(range)),
                &CancellationToken::never(),
            )
            .unwrap();

        assert_eq!(result.matches.len(), 1);
        assert_eq!(result.matches[0].covered(text), "wrong");
        assert_eq!(result.fragments[0].annotated.plain_text(), "This is wrong.\n");
    }

    #[test]
    fn program_fragments_disable_comment_rules() {
        let engine = WordEngine::new("wrong", "SOME_RULE");
        let settings = Settings::default().with_enabled(["python"]);
        check(&engine, "python", "# This is wrong.\n", &settings);
        assert!(engine.disabled.lock().unwrap().contains("UPPERCASE_SENTENCE_START"));
    }

    #[test]
    fn engine_errors_only_affect_their_fragment() {
        let mut engine = WordEngine::new("wrong", "SOME_RULE");
        engine.fail_on = Some("broken".to_string());
        let text = "broken and wrong.\n\n<!-- ltex: language=de-DE -->\n\nThis is wrong.\n";
        let result = check(&engine, "markdown", text, &Settings::default());

        assert_eq!(engine.call_count(), 2);
        assert_eq!(result.matches.len(), 1);
        assert_eq!(result.matches[0].language, "de-DE");
    }

    #[test]
    fn engine_receives_fragment_settings() {
        let engine = WordEngine::new("x", "SOME_RULE");
        let settings = Settings::default()
            .with_mother_tongue(Some("de-DE"))
            .with_enable_picky_rules(true);
        let text = "Hello.\n\n<!-- ltex: language=fr -->\n\nBonjour.\n";
        check(&engine, "markdown", text, &settings);

        let calls = engine.calls.lock().unwrap();
        let languages: Vec<_> = calls.iter().map(|(_, s)| s.language.as_str()).collect();
        assert_eq!(languages, ["en-US", "fr"]);
        assert!(calls.iter().all(|(_, s)| s.picky));
        assert!(calls
            .iter()
            .all(|(_, s)| s.mother_tongue.as_deref() == Some("de-DE")));
    }

    #[test]
    fn cancelled_token_stops_check() {
        let engine = WordEngine::new("wrong", "SOME_RULE");
        let counter = CancellationCounter::new();
        let token = counter.token();
        counter.cancel();

        let settings = Settings::default();
        let result = checker(&engine).check(
            &CheckRequest::new("plaintext", "This is wrong.", &settings),
            &token,
        );
        assert_eq!(result, Err(Cancelled));
        assert_eq!(engine.call_count(), 0);
        assert!(counter.token().check().is_ok());
    }

    #[test]
    fn null_engine_skips_checks() {
        let mut checker = DocumentChecker::new(Box::new(crate::engine::NullEngine));
        let settings = Settings::default();
        let result = checker
            .check(
                &CheckRequest::new("markdown", "Text.", &settings),
                &CancellationToken::never(),
            )
            .unwrap();
        assert!(result.matches.is_empty());
        assert_eq!(result.fragments.len(), 1);
    }

    #[test]
    fn truncation_counts_characters() {
        assert_eq!(truncate("äöü", 2), "äö...");
        assert_eq!(truncate("abc", 3), "abc");
    }
}
