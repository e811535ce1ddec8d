//! Program source fragments
//!
//!     Directives are whole-line comments in the language's own syntax. Every fragment
//!     also gets a few settings that suit doc comments: tag words in the dictionary and
//!     rules that misfire on code-adjacent prose turned off, unless the user enabled them.

use crate::building::program::CommentSyntax;
use crate::settings::Settings;

use super::{CodeFragment, DirectiveFragmentizer, Fragmentizer};

pub const DICTIONARY: &[&str] = &["@param", "@return", "param"];

pub const DISABLED_RULES: &[&str] = &[
    "COPYRIGHT",
    "DASH_RULE",
    "R_SYMBOL",
    "UPPERCASE_SENTENCE_START",
    "WHITESPACE_RULE",
];

#[derive(Debug, Clone)]
pub struct ProgramFragmentizer {
    directives: DirectiveFragmentizer,
}

impl ProgramFragmentizer {
    pub fn new(language: &str, syntax: &CommentSyntax) -> Self {
        Self {
            directives: DirectiveFragmentizer::new(language, syntax.directive_regexes()),
        }
    }
}

/// Settings adjusted for checking comments.
pub fn comment_settings(settings: &Settings) -> Settings {
    let mut dictionary = settings.dictionary().clone();
    dictionary.extend(DICTIONARY.iter().map(|word| word.to_string()));

    let mut disabled = settings.disabled_rules().clone();
    disabled.extend(
        DISABLED_RULES
            .iter()
            .filter(|rule| !settings.enabled_rules().contains(**rule))
            .map(|rule| rule.to_string()),
    );

    settings
        .with_dictionary(dictionary)
        .with_disabled_rules(disabled)
}

impl Fragmentizer for ProgramFragmentizer {
    fn fragmentize(&self, code: &str, settings: &Settings) -> Vec<CodeFragment> {
        self.directives
            .fragmentize(code, settings)
            .into_iter()
            .map(|fragment| CodeFragment {
                settings: comment_settings(&fragment.settings),
                ..fragment
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fragment::fragmentize;
    use rstest::rstest;
    use std::collections::{BTreeSet, HashMap};

    #[rstest]
    #[case("java", "//", "//\t")]
    #[case("python", "# ", "#\t\t")]
    #[case("powershell", "# ", "#\t\t")]
    #[case("julia", "# ", "#\t\t")]
    #[case("lua", "--", "--\t")]
    #[case("haskell", "--", "--\t")]
    #[case("sql", "--", "--\t")]
    #[case("lisp", "; ", ";\t\t")]
    #[case("matlab", "% ", "%\t\t")]
    #[case("erlang", "% ", "%\t\t")]
    #[case("fortran-modern", "c ", "c\t\t")]
    #[case("vb", "' ", "'\t\t")]
    fn line_comment_directives(#[case] language: &str, #[case] first: &str, #[case] second: &str) {
        let code = format!(
            "Sentence 1\n\n{first} ltex: language=de-DE\n\nSentence 2\n\n{second}ltex:\tlanguage=en-US\n\nSentence 3\n"
        );
        let fragments = fragmentize(language, &code, &Settings::default());
        assert_eq!(fragments.len(), 3, "{fragments:#?}");

        assert!(fragments.iter().all(|f| f.dialect == language));
        let languages: Vec<_> = fragments.iter().map(|f| f.settings.language()).collect();
        assert_eq!(languages, ["en-US", "de-DE", "en-US"]);

        assert_eq!(fragments[0].text, "Sentence 1\n\n");
        assert_eq!(fragments[1].text, "\nSentence 2\n\n");
        assert_eq!(fragments[2].text, "\nSentence 3\n");
    }

    #[test]
    fn block_comment_directive() {
        let code = "int a;\n/* ltex: language=fr */\nint b;\n";
        let fragments = fragmentize("c", code, &Settings::default());
        assert_eq!(fragments.len(), 2);
        assert_eq!(fragments[1].text, "int b;\n");
        assert_eq!(fragments[1].offset, 31);
        assert_eq!(fragments[1].settings.language(), "fr");
    }

    #[test]
    fn comment_friendly_settings() {
        let enabled = HashMap::from([(
            "en-US".to_string(),
            BTreeSet::from(["DASH_RULE".to_string()]),
        )]);
        let settings = Settings::default().with_all_enabled_rules(enabled);
        let fragments = fragmentize("rust", "// Some docs.\n", &settings);
        let settings = &fragments[0].settings;

        assert!(settings.dictionary().contains("@param"));
        assert!(settings.dictionary().contains("param"));
        assert!(settings.disabled_rules().contains("WHITESPACE_RULE"));
        assert!(!settings.disabled_rules().contains("DASH_RULE"));
    }
}
