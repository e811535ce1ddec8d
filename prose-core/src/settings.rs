//! Checking settings
//!
//!     `Settings` is an immutable value. Directives in a document never mutate it: they derive
//!     a new value through the `with_*` methods, which only clone what changes. Everything
//!     per-language (dictionary, rules, hidden false positives) is keyed by language code and
//!     read through the active language.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Dialects checked when no `enabled` setting is given.
pub const DEFAULT_ENABLED: &[&str] = &[
    "bibtex",
    "context",
    "context.tex",
    "html",
    "latex",
    "markdown",
    "org",
    "restructuredtext",
    "rsweave",
];

pub const DEFAULT_LANGUAGE: &str = "en-US";
pub const DEFAULT_SENTENCE_CACHE_SIZE: usize = 2000;

/// When documents are checked automatically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckFrequency {
    #[default]
    Edit,
    Save,
    Manual,
}

/// Diagnostic severity, independent of any protocol crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
    #[default]
    Information,
    Hint,
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "error" => Ok(Severity::Error),
            "warning" => Ok(Severity::Warning),
            "information" => Ok(Severity::Information),
            "hint" => Ok(Severity::Hint),
            other => Err(format!("unknown severity '{other}'")),
        }
    }
}

/// A (rule, sentence pattern) pair whose matches are never reported.
#[derive(Debug, Clone)]
pub struct HiddenFalsePositive {
    rule_id: String,
    sentence: Regex,
}

impl HiddenFalsePositive {
    pub fn new(rule_id: impl Into<String>, sentence_pattern: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            rule_id: rule_id.into(),
            sentence: Regex::new(sentence_pattern)?,
        })
    }

    /// Parse the `{"rule": ..., "sentence": ...}` form used in settings.
    ///
    /// Invalid JSON, missing fields and bad patterns are logged and yield `None`.
    pub fn from_json(json: &str) -> Option<Self> {
        #[derive(Deserialize)]
        struct Raw {
            rule: String,
            sentence: String,
        }

        let raw: Raw = match serde_json::from_str(json) {
            Ok(raw) => raw,
            Err(err) => {
                tracing::warn!(entry = json, error = %err, "ignoring malformed hidden false positive");
                return None;
            }
        };
        match Self::new(raw.rule, &raw.sentence) {
            Ok(hidden) => Some(hidden),
            Err(err) => {
                tracing::warn!(entry = json, error = %err, "ignoring hidden false positive with invalid sentence pattern");
                None
            }
        }
    }

    pub fn rule_id(&self) -> &str {
        &self.rule_id
    }

    pub fn sentence_pattern(&self) -> &str {
        self.sentence.as_str()
    }

    pub fn matches(&self, rule_id: &str, sentence: &str) -> bool {
        self.rule_id == rule_id && self.sentence.is_match(sentence)
    }
}

impl PartialEq for HiddenFalsePositive {
    fn eq(&self, other: &Self) -> bool {
        self.rule_id == other.rule_id && self.sentence.as_str() == other.sentence.as_str()
    }
}

impl Eq for HiddenFalsePositive {}

impl fmt::Display for HiddenFalsePositive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.rule_id, self.sentence.as_str())
    }
}

/// Turn a settings word list into a set, where `-word` removes an earlier `word`.
pub fn merge_word_list<I, S>(entries: I) -> BTreeSet<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut words = BTreeSet::new();
    for entry in entries {
        let entry = entry.as_ref();
        match entry.strip_prefix('-') {
            Some(removed) => {
                words.remove(removed);
            }
            None => {
                words.insert(entry.to_string());
            }
        }
    }
    words
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    enabled: BTreeSet<String>,
    language: String,
    mother_tongue: Option<String>,
    dictionaries: HashMap<String, BTreeSet<String>>,
    disabled_rules: HashMap<String, BTreeSet<String>>,
    enabled_rules: HashMap<String, BTreeSet<String>>,
    hidden_false_positives: HashMap<String, Vec<HiddenFalsePositive>>,
    latex_commands: BTreeMap<String, String>,
    latex_environments: BTreeMap<String, String>,
    markdown_nodes: BTreeMap<String, String>,
    enable_picky_rules: bool,
    language_tool_http_server_uri: Option<String>,
    spelling_dictionary_path: Option<PathBuf>,
    sentence_cache_size: usize,
    diagnostic_severity: BTreeMap<String, Severity>,
    check_frequency: CheckFrequency,
    clear_diagnostics_when_closing_file: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            enabled: DEFAULT_ENABLED.iter().map(|id| id.to_string()).collect(),
            language: DEFAULT_LANGUAGE.to_string(),
            mother_tongue: None,
            dictionaries: HashMap::new(),
            disabled_rules: HashMap::new(),
            enabled_rules: HashMap::new(),
            hidden_false_positives: HashMap::new(),
            latex_commands: BTreeMap::new(),
            latex_environments: BTreeMap::new(),
            markdown_nodes: BTreeMap::new(),
            enable_picky_rules: false,
            language_tool_http_server_uri: None,
            spelling_dictionary_path: None,
            sentence_cache_size: DEFAULT_SENTENCE_CACHE_SIZE,
            diagnostic_severity: BTreeMap::from([("default".to_string(), Severity::Information)]),
            check_frequency: CheckFrequency::Edit,
            clear_diagnostics_when_closing_file: true,
        }
    }
}

impl Settings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enabled(&self) -> &BTreeSet<String> {
        &self.enabled
    }

    pub fn is_dialect_enabled(&self, dialect: &str) -> bool {
        self.enabled.contains(dialect)
    }

    /// The active language code. `auto` is not supported and reads as the default.
    pub fn language(&self) -> &str {
        &self.language
    }

    pub fn mother_tongue(&self) -> Option<&str> {
        self.mother_tongue.as_deref()
    }

    pub fn dictionary(&self) -> &BTreeSet<String> {
        static EMPTY: BTreeSet<String> = BTreeSet::new();
        self.dictionaries.get(&self.language).unwrap_or(&EMPTY)
    }

    pub fn disabled_rules(&self) -> &BTreeSet<String> {
        static EMPTY: BTreeSet<String> = BTreeSet::new();
        self.disabled_rules.get(&self.language).unwrap_or(&EMPTY)
    }

    pub fn enabled_rules(&self) -> &BTreeSet<String> {
        static EMPTY: BTreeSet<String> = BTreeSet::new();
        self.enabled_rules.get(&self.language).unwrap_or(&EMPTY)
    }

    pub fn hidden_false_positives(&self) -> &[HiddenFalsePositive] {
        self.hidden_false_positives
            .get(&self.language)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn latex_commands(&self) -> &BTreeMap<String, String> {
        &self.latex_commands
    }

    pub fn latex_environments(&self) -> &BTreeMap<String, String> {
        &self.latex_environments
    }

    pub fn markdown_nodes(&self) -> &BTreeMap<String, String> {
        &self.markdown_nodes
    }

    pub fn enable_picky_rules(&self) -> bool {
        self.enable_picky_rules
    }

    pub fn language_tool_http_server_uri(&self) -> Option<&str> {
        self.language_tool_http_server_uri.as_deref()
    }

    pub fn spelling_dictionary_path(&self) -> Option<&PathBuf> {
        self.spelling_dictionary_path.as_ref()
    }

    pub fn sentence_cache_size(&self) -> usize {
        self.sentence_cache_size
    }

    pub fn diagnostic_severity(&self) -> &BTreeMap<String, Severity> {
        &self.diagnostic_severity
    }

    /// Severity for a rule: its own entry, then `default`, then information.
    pub fn severity_for(&self, rule_id: &str) -> Severity {
        self.diagnostic_severity
            .get(rule_id)
            .or_else(|| self.diagnostic_severity.get("default"))
            .copied()
            .unwrap_or_default()
    }

    pub fn check_frequency(&self) -> CheckFrequency {
        self.check_frequency
    }

    pub fn clear_diagnostics_when_closing_file(&self) -> bool {
        self.clear_diagnostics_when_closing_file
    }

    pub fn with_enabled<I, S>(&self, enabled: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            enabled: enabled.into_iter().map(Into::into).collect(),
            ..self.clone()
        }
    }

    pub fn with_language(&self, language: &str) -> Self {
        let language = if language.eq_ignore_ascii_case("auto") {
            tracing::warn!(
                fallback = DEFAULT_LANGUAGE,
                "automatic language detection is not supported"
            );
            DEFAULT_LANGUAGE
        } else {
            language
        };
        Self {
            language: language.to_string(),
            ..self.clone()
        }
    }

    pub fn with_mother_tongue(&self, mother_tongue: Option<&str>) -> Self {
        Self {
            mother_tongue: mother_tongue
                .filter(|code| !code.is_empty())
                .map(str::to_string),
            ..self.clone()
        }
    }

    /// Replace the dictionary of the active language.
    pub fn with_dictionary(&self, words: BTreeSet<String>) -> Self {
        let mut dictionaries = self.dictionaries.clone();
        dictionaries.insert(self.language.clone(), words);
        Self {
            dictionaries,
            ..self.clone()
        }
    }

    pub fn with_all_dictionaries(&self, dictionaries: HashMap<String, BTreeSet<String>>) -> Self {
        Self {
            dictionaries,
            ..self.clone()
        }
    }

    /// Replace the disabled rules of the active language.
    pub fn with_disabled_rules(&self, rules: BTreeSet<String>) -> Self {
        let mut disabled_rules = self.disabled_rules.clone();
        disabled_rules.insert(self.language.clone(), rules);
        Self {
            disabled_rules,
            ..self.clone()
        }
    }

    pub fn with_all_disabled_rules(&self, rules: HashMap<String, BTreeSet<String>>) -> Self {
        Self {
            disabled_rules: rules,
            ..self.clone()
        }
    }

    pub fn with_all_enabled_rules(&self, rules: HashMap<String, BTreeSet<String>>) -> Self {
        Self {
            enabled_rules: rules,
            ..self.clone()
        }
    }

    pub fn with_all_hidden_false_positives(
        &self,
        hidden: HashMap<String, Vec<HiddenFalsePositive>>,
    ) -> Self {
        Self {
            hidden_false_positives: hidden,
            ..self.clone()
        }
    }

    pub fn with_latex_commands(&self, commands: BTreeMap<String, String>) -> Self {
        Self {
            latex_commands: commands,
            ..self.clone()
        }
    }

    pub fn with_latex_environments(&self, environments: BTreeMap<String, String>) -> Self {
        Self {
            latex_environments: environments,
            ..self.clone()
        }
    }

    pub fn with_markdown_nodes(&self, nodes: BTreeMap<String, String>) -> Self {
        Self {
            markdown_nodes: nodes,
            ..self.clone()
        }
    }

    pub fn with_enable_picky_rules(&self, picky: bool) -> Self {
        Self {
            enable_picky_rules: picky,
            ..self.clone()
        }
    }

    pub fn with_language_tool_http_server_uri(&self, uri: Option<&str>) -> Self {
        Self {
            language_tool_http_server_uri: uri.filter(|uri| !uri.is_empty()).map(str::to_string),
            ..self.clone()
        }
    }

    pub fn with_spelling_dictionary_path(&self, path: Option<PathBuf>) -> Self {
        Self {
            spelling_dictionary_path: path,
            ..self.clone()
        }
    }

    pub fn with_sentence_cache_size(&self, size: usize) -> Self {
        Self {
            sentence_cache_size: size,
            ..self.clone()
        }
    }

    pub fn with_diagnostic_severity(&self, severity: BTreeMap<String, Severity>) -> Self {
        Self {
            diagnostic_severity: severity,
            ..self.clone()
        }
    }

    pub fn with_check_frequency(&self, frequency: CheckFrequency) -> Self {
        Self {
            check_frequency: frequency,
            ..self.clone()
        }
    }

    pub fn with_clear_diagnostics_when_closing_file(&self, clear: bool) -> Self {
        Self {
            clear_diagnostics_when_closing_file: clear,
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let settings = Settings::default();
        assert_eq!(settings.language(), "en-US");
        assert!(settings.is_dialect_enabled("latex"));
        assert!(!settings.is_dialect_enabled("python"));
        assert!(settings.dictionary().is_empty());
        assert_eq!(settings.check_frequency(), CheckFrequency::Edit);
        assert!(settings.clear_diagnostics_when_closing_file());
        assert_eq!(settings.sentence_cache_size(), 2000);
    }

    #[test]
    fn per_language_values_follow_the_active_language() {
        let settings = Settings::default()
            .with_dictionary(BTreeSet::from(["Foo".to_string()]))
            .with_language("de-DE")
            .with_dictionary(BTreeSet::from(["Bar".to_string()]));

        assert!(settings.dictionary().contains("Bar"));
        assert!(!settings.dictionary().contains("Foo"));
        assert!(settings.with_language("en-US").dictionary().contains("Foo"));
    }

    #[test]
    fn with_methods_leave_the_original_untouched() {
        let base = Settings::default();
        let derived = base.with_language("fr").with_enabled(Vec::<String>::new());
        assert_eq!(base.language(), "en-US");
        assert!(base.is_dialect_enabled("markdown"));
        assert_eq!(derived.language(), "fr");
        assert!(derived.enabled().is_empty());
    }

    #[test]
    fn auto_language_falls_back_to_default() {
        assert_eq!(Settings::default().with_language("auto").language(), "en-US");
    }

    #[test]
    fn word_list_removal_entries() {
        let words = merge_word_list(["alpha", "beta", "-alpha", "gamma", "-delta"]);
        assert_eq!(
            words.into_iter().collect::<Vec<_>>(),
            vec!["beta".to_string(), "gamma".to_string()]
        );
    }

    #[test]
    fn severity_lookup_order() {
        let severity = BTreeMap::from([
            ("default".to_string(), Severity::Hint),
            ("TOO_LONG".to_string(), Severity::Error),
        ]);
        let settings = Settings::default().with_diagnostic_severity(severity);
        assert_eq!(settings.severity_for("TOO_LONG"), Severity::Error);
        assert_eq!(settings.severity_for("OTHER"), Severity::Hint);

        let settings = settings.with_diagnostic_severity(BTreeMap::new());
        assert_eq!(settings.severity_for("OTHER"), Severity::Information);
    }

    #[test]
    fn hidden_false_positive_parsing() {
        let hidden =
            HiddenFalsePositive::from_json(r#"{"rule": "RULE", "sentence": "^A sentence\\.$"}"#)
                .unwrap();
        assert!(hidden.matches("RULE", "A sentence."));
        assert!(!hidden.matches("OTHER", "A sentence."));
        assert!(!hidden.matches("RULE", "Another sentence."));

        assert!(HiddenFalsePositive::from_json("not json").is_none());
        assert!(HiddenFalsePositive::from_json(r#"{"rule": "R", "sentence": "("}"#).is_none());
    }
}
