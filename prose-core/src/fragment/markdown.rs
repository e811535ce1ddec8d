//! Markdown fragments: front matter language plus inline directives

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;

use crate::settings::Settings;

use super::{CodeFragment, DirectiveFragmentizer, Fragmentizer};

static FRONT_MATTER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?sR)\A---[ \t]*\r?\n(.*?)(?m:^)---[ \t]*(?m:$)").unwrap());

#[derive(Debug, Deserialize)]
struct FrontMatter {
    lang: Option<String>,
}

/// The `lang` key of a leading YAML front matter block, if any.
pub fn front_matter_language(code: &str) -> Option<String> {
    let yaml = FRONT_MATTER.captures(code)?.get(1)?.as_str();
    match serde_yaml::from_str::<FrontMatter>(yaml) {
        Ok(front_matter) => front_matter.lang.filter(|lang| !lang.is_empty()),
        Err(err) => {
            tracing::warn!(error = %err, "ignoring malformed front matter");
            None
        }
    }
}

#[derive(Debug, Clone)]
pub struct MarkdownFragmentizer {
    directives: DirectiveFragmentizer,
}

impl MarkdownFragmentizer {
    pub fn new(dialect: &str) -> Self {
        Self {
            directives: DirectiveFragmentizer::markdown(dialect),
        }
    }
}

impl Fragmentizer for MarkdownFragmentizer {
    fn fragmentize(&self, code: &str, settings: &Settings) -> Vec<CodeFragment> {
        match front_matter_language(code) {
            Some(language) => self
                .directives
                .fragmentize(code, &settings.with_language(&language)),
            None => self.directives.fragmentize(code, settings),
        }
    }
}
