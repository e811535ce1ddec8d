//! Local spell checking with Hunspell dictionaries
//!
//!     Dictionaries are looked up in one directory as `<language>.aff` and `<language>.dic`,
//!     trying `de-DE`, `de_DE` and `de` in that order. Loaded dictionaries are cached for
//!     the lifetime of the engine. Only one rule exists, [`RULE_ID`]; disabling it turns the
//!     engine into a no-op.

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use spellbook::Dictionary;

use crate::annotated::{AnnotatedText, Bias};
use crate::dummy::DUMMY_PATTERN;
use crate::error::EngineError;

use super::{AnalysisEngine, EngineMatch, EngineSettings};

pub const RULE_ID: &str = "HUNSPELL_RULE";

const MAX_SUGGESTIONS: usize = 5;

static DUMMY_WORD: Lazy<Regex> = Lazy::new(|| Regex::new(&format!("^{DUMMY_PATTERN}$")).unwrap());

pub struct SpellingEngine {
    directory: PathBuf,
    dictionaries: HashMap<String, Arc<Dictionary>>,
    disabled: bool,
}

impl SpellingEngine {
    pub fn new(directory: PathBuf) -> Self {
        Self {
            directory,
            dictionaries: HashMap::new(),
            disabled: false,
        }
    }

    /// Register an already parsed dictionary for `language`.
    pub fn with_dictionary(mut self, language: &str, dictionary: Dictionary) -> Self {
        self.dictionaries
            .insert(language.to_string(), Arc::new(dictionary));
        self
    }

    fn dictionary(&mut self, language: &str) -> Result<Arc<Dictionary>, EngineError> {
        if let Some(dictionary) = self.dictionaries.get(language) {
            return Ok(dictionary.clone());
        }
        let dictionary = Arc::new(load_dictionary(&self.directory, language)?);
        tracing::debug!(
            language,
            directory = %self.directory.display(),
            "loaded spelling dictionary"
        );
        self.dictionaries
            .insert(language.to_string(), dictionary.clone());
        Ok(dictionary)
    }
}

fn candidate_names(language: &str) -> Vec<String> {
    let mut names = vec![language.to_string(), language.replace('-', "_")];
    if let Some((base, _)) = language.split_once('-') {
        names.push(base.to_string());
    }
    names.dedup();
    names
}

fn load_dictionary(directory: &Path, language: &str) -> Result<Dictionary, EngineError> {
    let error = |reason: String| EngineError::Dictionary {
        language: language.to_string(),
        reason,
    };

    for name in candidate_names(language) {
        let aff_path = directory.join(format!("{name}.aff"));
        let dic_path = directory.join(format!("{name}.dic"));
        if !aff_path.exists() || !dic_path.exists() {
            continue;
        }
        let aff = std::fs::read_to_string(&aff_path).map_err(|err| error(err.to_string()))?;
        let dic = std::fs::read_to_string(&dic_path).map_err(|err| error(err.to_string()))?;
        return Dictionary::new(&aff, &dic).map_err(|err| error(err.to_string()));
    }

    Err(error(format!(
        "no dictionary files in {}",
        directory.display()
    )))
}

/// Byte ranges of the words in `text`, with surrounding punctuation stripped.
fn words(text: &str) -> Vec<(usize, usize)> {
    let mut words = Vec::new();
    let mut token_start = None;

    let mut push = |start: usize, end: usize| {
        let token = &text[start..end];
        if DUMMY_WORD.is_match(token) {
            return;
        }
        let trimmed_start = token.trim_start_matches(|c: char| !c.is_alphabetic());
        let trimmed = trimmed_start.trim_end_matches(|c: char| !c.is_alphabetic());
        if !trimmed.is_empty() {
            let from = start + (token.len() - trimmed_start.len());
            words.push((from, from + trimmed.len()));
        }
    };

    for (index, c) in text.char_indices() {
        match (c.is_whitespace(), token_start) {
            (true, Some(start)) => {
                push(start, index);
                token_start = None;
            }
            (false, None) => token_start = Some(index),
            _ => {}
        }
    }
    if let Some(start) = token_start {
        push(start, text.len());
    }

    words
}

/// The sentence around `from..to`, delimited by terminal punctuation or line breaks.
fn sentence_around(text: &str, from: usize, to: usize) -> &str {
    let is_boundary = |c: char| matches!(c, '.' | '!' | '?' | '\n');
    let start = text[..from]
        .rfind(is_boundary)
        .map(|index| index + 1)
        .unwrap_or(0);
    let end = text[to..]
        .find(is_boundary)
        .map(|index| to + index + 1)
        .unwrap_or(text.len());
    text[start..end].trim()
}

impl AnalysisEngine for SpellingEngine {
    fn is_ready(&self) -> bool {
        !self.dictionaries.is_empty() || self.directory.is_dir()
    }

    fn check(
        &mut self,
        text: &AnnotatedText,
        settings: &EngineSettings,
    ) -> Result<Vec<EngineMatch>, EngineError> {
        if self.disabled {
            return Ok(Vec::new());
        }
        let dictionary = self.dictionary(&settings.language)?;
        let plain = text.plain_text();

        let matches = words(plain)
            .into_iter()
            .filter(|&(from, to)| !dictionary.check(&plain[from..to]))
            .map(|(from, to)| {
                let word = &plain[from..to];
                let mut replacements = Vec::new();
                dictionary.suggest(word, &mut replacements);
                replacements.truncate(MAX_SUGGESTIONS);
                EngineMatch {
                    rule_id: RULE_ID.to_string(),
                    sentence: sentence_around(plain, from, to).to_string(),
                    from: text.original_offset(from, Bias::Start),
                    to: text.original_offset(to, Bias::End),
                    message: "Possible spelling mistake found.".to_string(),
                    replacements,
                }
            })
            .collect();
        Ok(matches)
    }

    fn enable_rules(&mut self, _: &BTreeSet<String>) {}

    fn disable_rules(&mut self, rule_ids: &BTreeSet<String>) {
        self.disabled = rule_ids.contains(RULE_ID);
    }
}
