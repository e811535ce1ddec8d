//! LanguageTool-compatible HTTP engine
//!
//!     Each check posts one form to `<server>/v2/check`. The annotated text travels as the
//!     `data` field so the server sees markup and knows how to read it:
//!
//!         {"annotation": [{"text": "Hello "}, {"markup": "\\textbf{", "interpretAs": ""}, ...]}
//!
//!     Match offsets in the answer count UTF-16 code units of the original text and are
//!     converted to byte offsets before they leave this module. Answers are cached by
//!     request, so unchanged fragments are not sent twice.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::Url;
use serde::{Deserialize, Serialize};

use crate::annotated::{AnnotatedText, TextPart};
use crate::document::utf16_to_byte_offset;
use crate::error::EngineError;

use super::{AnalysisEngine, EngineMatch, EngineSettings};

const TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Serialize)]
struct Annotation<'a> {
    annotation: Vec<AnnotationPart<'a>>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum AnnotationPart<'a> {
    Text {
        text: &'a str,
    },
    Markup {
        markup: &'a str,
        #[serde(rename = "interpretAs")]
        interpret_as: &'a str,
    },
}

#[derive(Debug, Deserialize)]
struct CheckResponse {
    matches: Vec<ResponseMatch>,
}

#[derive(Debug, Deserialize)]
struct ResponseMatch {
    offset: usize,
    length: usize,
    message: String,
    #[serde(default)]
    sentence: String,
    rule: ResponseRule,
    #[serde(default)]
    replacements: Vec<Replacement>,
}

#[derive(Debug, Deserialize)]
struct ResponseRule {
    id: String,
}

#[derive(Debug, Deserialize)]
struct Replacement {
    value: String,
}

/// Bounded first-in first-out cache of server answers.
#[derive(Debug, Default)]
struct ResultCache {
    capacity: usize,
    order: VecDeque<String>,
    entries: HashMap<String, Vec<EngineMatch>>,
}

impl ResultCache {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            ..Default::default()
        }
    }

    fn get(&self, key: &str) -> Option<&Vec<EngineMatch>> {
        self.entries.get(key)
    }

    fn insert(&mut self, key: String, matches: Vec<EngineMatch>) {
        if self.capacity == 0 {
            return;
        }
        if self.entries.insert(key.clone(), matches).is_none() {
            self.order.push_back(key);
        }
        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.entries.remove(&oldest);
            }
        }
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

pub struct HttpEngine {
    client: Client,
    endpoint: Url,
    enabled_rules: BTreeSet<String>,
    disabled_rules: BTreeSet<String>,
    cache: ResultCache,
}

impl HttpEngine {
    pub fn new(server_uri: &str, cache_size: usize) -> Result<Self, EngineError> {
        let endpoint = check_endpoint(server_uri)?;
        let client = Client::builder().timeout(TIMEOUT).build()?;
        Ok(Self {
            client,
            endpoint,
            enabled_rules: BTreeSet::new(),
            disabled_rules: BTreeSet::new(),
            cache: ResultCache::new(cache_size),
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    fn form(
        &self,
        text: &AnnotatedText,
        settings: &EngineSettings,
    ) -> Result<Vec<(&'static str, String)>, EngineError> {
        let mut form = vec![
            ("language", settings.language.clone()),
            ("data", annotation_json(text)?),
        ];
        if settings.picky {
            form.push(("level", "picky".to_string()));
        }
        if let Some(mother_tongue) = &settings.mother_tongue {
            form.push(("motherTongue", mother_tongue.clone()));
        }
        if !self.enabled_rules.is_empty() {
            form.push(("enabledRules", join(&self.enabled_rules)));
        }
        if !self.disabled_rules.is_empty() {
            form.push(("disabledRules", join(&self.disabled_rules)));
        }
        Ok(form)
    }
}

fn join(rules: &BTreeSet<String>) -> String {
    rules.iter().map(String::as_str).collect::<Vec<_>>().join(",")
}

/// `<server>/v2/check`, whether or not the configured URI ends in a slash.
pub fn check_endpoint(server_uri: &str) -> Result<Url, EngineError> {
    let invalid = |reason: String| EngineError::InvalidUri {
        uri: server_uri.to_string(),
        reason,
    };
    let base = Url::parse(&format!("{}/", server_uri.trim_end_matches('/')))
        .map_err(|err| invalid(err.to_string()))?;
    if base.cannot_be_a_base() {
        return Err(invalid("not a hierarchical URI".to_string()));
    }
    base.join("v2/check").map_err(|err| invalid(err.to_string()))
}

fn annotation_json(text: &AnnotatedText) -> Result<String, EngineError> {
    let annotation = text
        .parts()
        .iter()
        .map(|part| match part {
            TextPart::Text(text) => AnnotationPart::Text { text },
            TextPart::Markup { raw, interpret_as } => AnnotationPart::Markup {
                markup: raw,
                interpret_as: interpret_as.as_deref().unwrap_or(""),
            },
        })
        .collect();
    Ok(serde_json::to_string(&Annotation { annotation })?)
}

fn parse_response(original: &str, body: &str) -> Result<Vec<EngineMatch>, EngineError> {
    let response: CheckResponse = serde_json::from_str(body)?;
    Ok(response
        .matches
        .into_iter()
        .map(|found| {
            let from = utf16_to_byte_offset(original, found.offset);
            let to = utf16_to_byte_offset(original, found.offset + found.length);
            EngineMatch {
                rule_id: found.rule.id,
                sentence: found.sentence,
                from,
                to,
                message: found.message,
                replacements: found
                    .replacements
                    .into_iter()
                    .map(|replacement| replacement.value)
                    .collect(),
            }
        })
        .collect())
}

impl AnalysisEngine for HttpEngine {
    fn is_ready(&self) -> bool {
        true
    }

    fn check(
        &mut self,
        text: &AnnotatedText,
        settings: &EngineSettings,
    ) -> Result<Vec<EngineMatch>, EngineError> {
        let form = self.form(text, settings)?;
        let key = serde_json::to_string(&form)?;
        if let Some(matches) = self.cache.get(&key) {
            tracing::trace!(cached = self.cache.len(), "using cached server answer");
            return Ok(matches.clone());
        }

        let response = self
            .client
            .post(self.endpoint.clone())
            .form(&form)
            .send()?;
        let status = response.status();
        if status != reqwest::StatusCode::OK {
            return Err(EngineError::Status(status.as_u16()));
        }
        let body = response.text()?;
        let matches = parse_response(text.original_text(), &body)?;

        self.cache.insert(key, matches.clone());
        Ok(matches)
    }

    fn enable_rules(&mut self, rule_ids: &BTreeSet<String>) {
        self.enabled_rules = rule_ids.clone();
    }

    fn disable_rules(&mut self, rule_ids: &BTreeSet<String>) {
        self.disabled_rules = rule_ids.clone();
    }

    fn supports_dictionary(&self) -> bool {
        false
    }
}
