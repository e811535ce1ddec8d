//! Analysis engines
//!
//!     An engine checks one annotated text at a time and reports matches in the coordinates
//!     of the text's original source (byte offsets). Engines are configured per fragment:
//!     the pipeline sets the rule sets through [`AnalysisEngine::enable_rules`] and
//!     [`AnalysisEngine::disable_rules`] and passes the language options with every call.
//!
//!     Three engines are provided:
//!
//!         - [`HttpEngine`]: a LanguageTool-compatible HTTP server
//!         - [`SpellingEngine`]: local Hunspell dictionaries through `spellbook`
//!         - [`NullEngine`]: never ready; every check is skipped

use std::collections::BTreeSet;

use crate::annotated::AnnotatedText;
use crate::error::EngineError;
use crate::settings::Settings;

pub mod http;
pub mod spelling;

pub use http::HttpEngine;
pub use spelling::SpellingEngine;

/// Language options for one check.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EngineSettings {
    pub language: String,
    pub mother_tongue: Option<String>,
    pub picky: bool,
}

impl EngineSettings {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            language: settings.language().to_string(),
            mother_tongue: settings.mother_tongue().map(str::to_string),
            picky: settings.enable_picky_rules(),
        }
    }
}

/// A problem reported by an engine. `from` and `to` are byte offsets into the original
/// text of the checked fragment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineMatch {
    pub rule_id: String,
    pub sentence: String,
    pub from: usize,
    pub to: usize,
    pub message: String,
    pub replacements: Vec<String>,
}

pub trait AnalysisEngine: Send {
    fn is_ready(&self) -> bool;

    fn check(
        &mut self,
        text: &AnnotatedText,
        settings: &EngineSettings,
    ) -> Result<Vec<EngineMatch>, EngineError>;

    /// Replace the set of explicitly enabled rules.
    fn enable_rules(&mut self, rule_ids: &BTreeSet<String>);

    /// Replace the set of disabled rules.
    fn disable_rules(&mut self, rule_ids: &BTreeSet<String>);

    /// Whether users can grow the engine's vocabulary through the dictionary setting.
    /// Remote servers keep their own.
    fn supports_dictionary(&self) -> bool {
        true
    }
}

/// Placeholder used when no engine could be set up.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullEngine;

impl AnalysisEngine for NullEngine {
    fn is_ready(&self) -> bool {
        false
    }

    fn check(
        &mut self,
        _: &AnnotatedText,
        _: &EngineSettings,
    ) -> Result<Vec<EngineMatch>, EngineError> {
        Err(EngineError::NotReady)
    }

    fn enable_rules(&mut self, _: &BTreeSet<String>) {}

    fn disable_rules(&mut self, _: &BTreeSet<String>) {}
}

/// Choose the engine for `settings`: the HTTP server if one is configured, else the local
/// speller if a dictionary directory is configured, else nothing.
pub fn engine_for(settings: &Settings) -> Box<dyn AnalysisEngine> {
    if let Some(uri) = settings.language_tool_http_server_uri() {
        match HttpEngine::new(uri, settings.sentence_cache_size()) {
            Ok(engine) => return Box::new(engine),
            Err(err) => tracing::error!(uri, error = %err, "could not set up analysis server"),
        }
    }
    if let Some(path) = settings.spelling_dictionary_path() {
        return Box::new(SpellingEngine::new(path.clone()));
    }
    tracing::warn!("no analysis engine configured, documents will not be checked");
    Box::new(NullEngine)
}

/// Rule ids that report unknown words.
pub fn is_unknown_word_rule(rule_id: &str) -> bool {
    rule_id.starts_with("MORFOLOGIK_")
        || rule_id.starts_with("HUNSPELL_")
        || rule_id.ends_with("_SPELLER_RULE")
        || rule_id.ends_with("_SPELLING_RULE")
        || matches!(
            rule_id,
            "MUZSKY_ROD_NEZIV_A" | "ZENSKY_ROD_A" | "STREDNY_ROD_A"
        )
}
