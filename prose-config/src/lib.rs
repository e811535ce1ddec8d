//! Shared configuration loader for the prose checker.
//!
//! `defaults/prose.default.toml` is embedded into every binary so that docs and runtime
//! behavior stay in sync. Applications layer configuration files, editor settings (JSON)
//! and command-line overrides on top of those defaults via [`Loader`], then turn the
//! resulting [`ProseConfig`] into checking [`Settings`] with [`ProseConfig::to_settings`].

use config::builder::DefaultState;
use config::{Config, ConfigBuilder, File, FileFormat, ValueKind};
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};

use prose_core::settings::{
    merge_word_list, CheckFrequency, HiddenFalsePositive, Settings, Severity, DEFAULT_ENABLED,
};

pub use config::ConfigError;

const DEFAULT_TOML: &str = include_str!("../defaults/prose.default.toml");

/// Top-level configuration, keyed like the client-side `prose.*` settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProseConfig {
    pub enabled: Enabled,
    pub language: String,
    #[serde(default)]
    pub dictionary: HashMap<String, Vec<String>>,
    #[serde(default)]
    pub disabled_rules: HashMap<String, Vec<String>>,
    #[serde(default)]
    pub enabled_rules: HashMap<String, Vec<String>>,
    #[serde(default)]
    pub hidden_false_positives: HashMap<String, Vec<String>>,
    #[serde(default)]
    pub latex_commands: BTreeMap<String, String>,
    #[serde(default)]
    pub latex_environments: BTreeMap<String, String>,
    #[serde(default)]
    pub markdown_nodes: BTreeMap<String, String>,
    pub additional_rules: AdditionalRulesConfig,
    pub language_tool_http_server_uri: String,
    pub spelling: SpellingConfig,
    pub log_level: String,
    pub sentence_cache_size: usize,
    pub diagnostic_severity: DiagnosticSeverity,
    pub check_frequency: CheckFrequency,
    pub clear_diagnostics_when_closing_file: bool,
}

/// `enabled` is either a list of dialect ids or a switch for the default list.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum Enabled {
    All(bool),
    Dialects(Vec<String>),
}

impl Enabled {
    pub fn dialects(&self) -> Vec<String> {
        match self {
            Enabled::All(true) => DEFAULT_ENABLED.iter().map(|id| id.to_string()).collect(),
            Enabled::All(false) => Vec::new(),
            Enabled::Dialects(dialects) => dialects.clone(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdditionalRulesConfig {
    pub mother_tongue: String,
    pub enable_picky_rules: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpellingConfig {
    pub dictionary_path: String,
}

/// One severity for everything, or a per-rule table with an optional `default` entry.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum DiagnosticSeverity {
    Uniform(Severity),
    PerRule(BTreeMap<String, Severity>),
}

impl DiagnosticSeverity {
    pub fn to_map(&self) -> BTreeMap<String, Severity> {
        match self {
            DiagnosticSeverity::Uniform(severity) => {
                BTreeMap::from([("default".to_string(), *severity)])
            }
            DiagnosticSeverity::PerRule(map) => map.clone(),
        }
    }
}

fn rule_sets(rules: &HashMap<String, Vec<String>>) -> HashMap<String, BTreeSet<String>> {
    rules
        .iter()
        .map(|(language, rules)| (language.clone(), rules.iter().cloned().collect()))
        .collect()
}

impl ProseConfig {
    /// Checking settings described by this configuration.
    ///
    /// Entries that cannot be used (malformed hidden false positives) are logged and
    /// skipped.
    pub fn to_settings(&self) -> Settings {
        let dictionaries = self
            .dictionary
            .iter()
            .map(|(language, words)| (language.clone(), merge_word_list(words)))
            .collect();
        let hidden = self
            .hidden_false_positives
            .iter()
            .map(|(language, entries)| {
                let parsed = entries
                    .iter()
                    .filter_map(|entry| HiddenFalsePositive::from_json(entry))
                    .collect();
                (language.clone(), parsed)
            })
            .collect();
        let mother_tongue = Some(self.additional_rules.mother_tongue.as_str());
        let uri = Some(self.language_tool_http_server_uri.as_str());
        let dictionary_path = Some(self.spelling.dictionary_path.as_str())
            .filter(|path| !path.is_empty())
            .map(PathBuf::from);

        Settings::default()
            .with_enabled(self.enabled.dialects())
            .with_language(&self.language)
            .with_all_dictionaries(dictionaries)
            .with_all_disabled_rules(rule_sets(&self.disabled_rules))
            .with_all_enabled_rules(rule_sets(&self.enabled_rules))
            .with_all_hidden_false_positives(hidden)
            .with_latex_commands(self.latex_commands.clone())
            .with_latex_environments(self.latex_environments.clone())
            .with_markdown_nodes(self.markdown_nodes.clone())
            .with_mother_tongue(mother_tongue)
            .with_enable_picky_rules(self.additional_rules.enable_picky_rules)
            .with_language_tool_http_server_uri(uri)
            .with_spelling_dictionary_path(dictionary_path)
            .with_sentence_cache_size(self.sentence_cache_size)
            .with_diagnostic_severity(self.diagnostic_severity.to_map())
            .with_check_frequency(self.check_frequency)
            .with_clear_diagnostics_when_closing_file(self.clear_diagnostics_when_closing_file)
    }
}

/// Helper for layering user overrides over the built-in defaults.
#[derive(Debug, Clone)]
pub struct Loader {
    builder: ConfigBuilder<DefaultState>,
}

impl Loader {
    /// Start a loader seeded with the embedded defaults.
    pub fn new() -> Self {
        let builder = Config::builder().add_source(File::from_str(DEFAULT_TOML, FileFormat::Toml));
        Self { builder }
    }

    /// Layer a configuration file. Missing files trigger an error.
    pub fn with_file(mut self, path: impl AsRef<Path>) -> Self {
        tracing::debug!(path = %path.as_ref().display(), "layering configuration file");
        let source = File::from(path.as_ref())
            .format(FileFormat::Toml)
            .required(true);
        self.builder = self.builder.add_source(source);
        self
    }

    /// Layer an optional configuration file (ignored if the file is absent).
    pub fn with_optional_file(mut self, path: impl AsRef<Path>) -> Self {
        tracing::debug!(path = %path.as_ref().display(), "layering optional configuration file");
        let source = File::from(path.as_ref())
            .format(FileFormat::Toml)
            .required(false);
        self.builder = self.builder.add_source(source);
        self
    }

    /// Layer settings sent by an editor as a JSON object.
    pub fn with_json(mut self, json: &str) -> Self {
        self.builder = self
            .builder
            .add_source(File::from_str(json, FileFormat::Json));
        self
    }

    /// Apply a single key/value override (useful for CLI settings).
    pub fn set_override<I>(mut self, key: &str, value: I) -> Result<Self, ConfigError>
    where
        I: Into<ValueKind>,
    {
        self.builder = self.builder.set_override(key, value)?;
        Ok(self)
    }

    /// Finalize the builder and deserialize the resulting configuration.
    pub fn build(self) -> Result<ProseConfig, ConfigError> {
        self.builder.build()?.try_deserialize()
    }
}

impl Default for Loader {
    fn default() -> Self {
        Self::new()
    }
}

/// Convenience helper for callers that only need the defaults.
pub fn load_defaults() -> Result<ProseConfig, ConfigError> {
    Loader::new().build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::fs;

    #[test]
    fn loads_default_config() {
        let config = load_defaults().expect("defaults to deserialize");
        assert_eq!(config.language, "en-US");
        assert_eq!(config.sentence_cache_size, 2000);
        assert_eq!(config.check_frequency, CheckFrequency::Edit);
        assert_eq!(config.log_level, "info");

        let settings = config.to_settings();
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn supports_overrides() {
        let config = Loader::new()
            .set_override("language", "de-DE")
            .expect("override to apply")
            .set_override("additionalRules.enablePickyRules", true)
            .expect("override to apply")
            .build()
            .expect("config to build");
        let settings = config.to_settings();
        assert_eq!(settings.language(), "de-DE");
        assert!(settings.enable_picky_rules());
    }

    #[test]
    fn layers_editor_settings() {
        let json = r#"{
            "language": "de-DE",
            "dictionary": {"de-DE": ["Fooo", "Baar", "-Fooo"]},
            "disabledRules": {"de-DE": ["DE_CASE"]},
            "hiddenFalsePositives": {"de-DE": [
                "{\"rule\": \"DE_CASE\", \"sentence\": \"^Hallo$\"}",
                "not json"
            ]},
            "latexCommands": {"\\foo{}": "ignore"},
            "additionalRules": {"motherTongue": "fr"},
            "checkFrequency": "save",
            "diagnosticSeverity": {"DE_CASE": "error", "default": "hint"}
        }"#;
        let settings = Loader::new().with_json(json).build().unwrap().to_settings();

        assert_eq!(settings.dictionary(), &BTreeSet::from(["Baar".to_string()]));
        assert!(settings.disabled_rules().contains("DE_CASE"));
        assert_eq!(settings.hidden_false_positives().len(), 1);
        assert_eq!(settings.latex_commands()["\\foo{}"], "ignore");
        assert_eq!(settings.mother_tongue(), Some("fr"));
        assert_eq!(settings.check_frequency(), CheckFrequency::Save);
        assert_eq!(settings.severity_for("DE_CASE"), Severity::Error);
        assert_eq!(settings.severity_for("OTHER"), Severity::Hint);
        assert!(settings.is_dialect_enabled("latex"));
    }

    #[rstest]
    #[case("true", true)]
    #[case("false", false)]
    fn enabled_switch(#[case] value: &str, #[case] latex_enabled: bool) {
        let json = format!(r#"{{"enabled": {value}}}"#);
        let settings = Loader::new().with_json(&json).build().unwrap().to_settings();
        assert_eq!(settings.is_dialect_enabled("latex"), latex_enabled);
    }

    #[test]
    fn enabled_list() {
        let json = r#"{"enabled": ["markdown", "python"]}"#;
        let settings = Loader::new().with_json(json).build().unwrap().to_settings();
        assert!(settings.is_dialect_enabled("python"));
        assert!(!settings.is_dialect_enabled("latex"));
    }

    #[test]
    fn layers_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prose.toml");
        fs::write(
            &path,
            "language = \"fr\"\nlanguageToolHttpServerUri = \"http://localhost:8081\"\n\n[spelling]\ndictionaryPath = \"/usr/share/hunspell\"\n",
        )
        .unwrap();

        let settings = Loader::new()
            .with_file(&path)
            .with_optional_file(dir.path().join("missing.toml"))
            .build()
            .unwrap()
            .to_settings();
        assert_eq!(settings.language(), "fr");
        assert_eq!(
            settings.language_tool_http_server_uri(),
            Some("http://localhost:8081")
        );
        assert_eq!(
            settings.spelling_dictionary_path(),
            Some(&PathBuf::from("/usr/share/hunspell"))
        );
    }

    #[test]
    fn missing_required_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let result = Loader::new()
            .with_file(dir.path().join("missing.toml"))
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn invalid_values_fail() {
        let result = Loader::new()
            .with_json(r#"{"checkFrequency": "hourly"}"#)
            .build();
        assert!(result.is_err());
    }
}
