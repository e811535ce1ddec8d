//! LaTeX fragments: inline directives plus babel language switches
//!
//!     After `% ltex:` directives are split out, babel commands switch the language of
//!     what follows:
//!
//!         - `\usepackage[...]{babel}`: the `main=` option, else the last recognized
//!           language option, applies from the command on
//!         - `\selectlanguage{lang}`: applies from the command on
//!         - `\begin{otherlanguage}{lang}`, `\begin{otherlanguage*}{lang}` and
//!           language-named environments such as `\begin{ngerman}`: apply to the
//!           environment body only
//!
//!     Commands belong to the fragment they close (environments) or open (switches), so
//!     the split fragments still partition the fragment they came from. Commands inside `%`
//!     comments are skipped.

use std::collections::HashMap;
use std::ops::Range;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::building::latex::signature::{match_argument, ArgumentKind, CommandSignature};
use crate::building::Action;
use crate::settings::Settings;

use super::{CodeFragment, DirectiveFragmentizer, Fragmentizer};

/// Babel language names and the language codes they select.
pub const BABEL_LANGUAGES: &[(&str, &str)] = &[
    ("ar", "ar"),
    ("ast", "ast-ES"),
    ("ast-ES", "ast-ES"),
    ("be", "be-BY"),
    ("be-BY", "be-BY"),
    ("br", "br-FR"),
    ("br-FR", "br-FR"),
    ("ca", "ca-ES"),
    ("ca-ES", "ca-ES"),
    ("ca-ES-valencia", "ca-ES-valencia"),
    ("da", "da-DK"),
    ("da-DK", "da-DK"),
    ("de", "de"),
    ("de-AT", "de-AT"),
    ("de-CH", "de-CH"),
    ("de-DE", "de-DE"),
    ("de-DE-x-simple-language", "de-DE-x-simple-language"),
    ("el", "el-GR"),
    ("el-GR", "el-GR"),
    ("en", "en"),
    ("en-AU", "en-AU"),
    ("en-CA", "en-CA"),
    ("en-GB", "en-GB"),
    ("en-NZ", "en-NZ"),
    ("en-US", "en-US"),
    ("en-ZA", "en-ZA"),
    ("eo", "eo"),
    ("es", "es"),
    ("fa", "fa"),
    ("fr", "fr"),
    ("ga", "ga-IE"),
    ("ga-IE", "ga-IE"),
    ("gl", "gl-ES"),
    ("gl-ES", "gl-ES"),
    // `it` and `sl` are left out: `\textit` and `\textsl` would read as language switches.
    ("ja", "ja-JP"),
    ("ja-JP", "ja-JP"),
    ("km", "km-KH"),
    ("km-KH", "km-KH"),
    ("nl", "nl"),
    ("pl", "pl-PL"),
    ("pl-PL", "pl-PL"),
    ("pt", "pt"),
    ("pt-AO", "pt-AO"),
    ("pt-BR", "pt-BR"),
    ("pt-MZ", "pt-MZ"),
    ("pt-PT", "pt-PT"),
    ("ro", "ro-RO"),
    ("ro-RO", "ro-RO"),
    ("ru", "ru-RU"),
    ("ru-RU", "ru-RU"),
    ("sk", "sk-SK"),
    ("sk-SK", "sk-SK"),
    ("sl-SI", "sl-SI"),
    ("sv", "sv"),
    ("ta", "ta-IN"),
    ("ta-IN", "ta-IN"),
    ("tl", "tl-PH"),
    ("tl-PH", "tl-PH"),
    ("uk", "uk-UA"),
    ("uk-UA", "uk-UA"),
    ("zh", "zh-CN"),
    ("zh-CN", "zh-CN"),
    ("arabic", "ar"),
    ("asturian", "ast-ES"),
    ("belarusian", "be-BY"),
    ("brazil", "pt-BR"),
    ("brazilian", "pt-BR"),
    ("catalan", "ca-ES"),
    ("danish", "da-DK"),
    ("german", "de-DE"),
    ("ngerman", "de-DE"),
    ("greek", "el-GR"),
    ("british", "en-GB"),
    ("UKenglish", "en-GB"),
    ("american", "en-US"),
    ("english", "en-US"),
    ("USenglish", "en-US"),
    ("esperanto", "eo"),
    ("estonian", "es"),
    ("farsi", "fa"),
    ("french", "fr"),
    ("irish", "ga-IE"),
    ("galician", "gl-ES"),
    ("italian", "it"),
    ("japanese", "ja-JP"),
    ("khmer", "km-KH"),
    ("dutch", "nl"),
    ("polish", "pl-PL"),
    ("portuges", "pt-PT"),
    ("portuguese", "pt-PT"),
    ("romanian", "ro-RO"),
    ("russian", "ru-RU"),
    ("slovak", "sk-SK"),
    ("slovene", "sl-SI"),
    ("swedish", "sv"),
    ("tamil", "ta-IN"),
    ("ukrainian", "uk-UA"),
    ("chinese", "zh-CN"),
];

static BABEL_MAP: Lazy<HashMap<&'static str, &'static str>> =
    Lazy::new(|| BABEL_LANGUAGES.iter().copied().collect());

/// Environment names: babel names plus their letters-only tags (`deDE`, `enUS`).
static ENVIRONMENT_MAP: Lazy<HashMap<String, &'static str>> = Lazy::new(|| {
    let mut map = HashMap::new();
    for &(name, code) in BABEL_LANGUAGES {
        map.insert(name.to_string(), code);
        map.insert(NON_LETTERS.replace_all(name, "").into_owned(), code);
    }
    map
});

static NON_LETTERS: Lazy<Regex> = Lazy::new(|| Regex::new("[^A-Za-z]+").unwrap());

static USE_PACKAGE: Lazy<Option<CommandSignature>> =
    Lazy::new(|| CommandSignature::parse(r"\usepackage[]{}", Action::Ignore));

static SELECT_LANGUAGE: Lazy<Option<CommandSignature>> =
    Lazy::new(|| CommandSignature::parse(r"\selectlanguage{}", Action::Ignore));

/// Language code for a babel language name.
pub fn babel_language(name: &str) -> Option<&'static str> {
    BABEL_MAP.get(name).copied()
}

fn resolve(name: &str) -> Option<&'static str> {
    let code = babel_language(name);
    if code.is_none() {
        tracing::warn!(language = name, "ignoring unknown babel language");
    }
    code
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Event {
    /// The language changes from `at` on.
    Switch { at: usize, language: &'static str },
    /// An environment body starts at `at`. `None` keeps the current language.
    Begin {
        at: usize,
        language: Option<&'static str>,
    },
    End { at: usize },
}

impl Event {
    fn at(&self) -> usize {
        match self {
            Event::Switch { at, .. } | Event::Begin { at, .. } | Event::End { at } => *at,
        }
    }
}

/// Language chosen by `\usepackage[options]{babel}`.
fn package_language(options: &str) -> Option<&'static str> {
    let mut main = None;
    let mut last = None;
    for option in split_options(options) {
        let (key, value) = match option.split_once('=') {
            Some((key, value)) => (key.trim(), Some(value.trim())),
            None => (option.trim(), None),
        };
        match value {
            Some(value) if key == "main" => main = resolve(value).or(main),
            Some(_) => {}
            None => last = babel_language(key).or(last),
        }
    }
    main.or(last)
}

/// Top-level comma-separated options with `%` comments removed.
fn split_options(options: &str) -> Vec<String> {
    let mut result = Vec::new();
    let mut current = String::new();
    let mut depth = 0usize;
    let mut chars = options.chars();
    while let Some(ch) = chars.next() {
        match ch {
            '%' => {
                for skipped in chars.by_ref() {
                    if skipped == '\n' {
                        break;
                    }
                }
                current.push(' ');
            }
            '\\' => {
                current.push(ch);
                if let Some(next) = chars.next() {
                    current.push(next);
                }
            }
            '{' => {
                depth += 1;
                current.push(ch);
            }
            '}' => {
                depth = depth.saturating_sub(1);
                current.push(ch);
            }
            ',' if depth == 0 => result.push(std::mem::take(&mut current)),
            _ => current.push(ch),
        }
    }
    result.push(current);
    result
}

fn inner(code: &str, argument: &Range<usize>) -> String {
    code[argument.start + 1..argument.end - 1].trim().to_string()
}

/// Match `\begin{name}` or `\end{name}` at `pos`, returning the name and the end offset.
fn environment_at(code: &str, pos: usize, command: &str) -> Option<(String, usize)> {
    if !code[pos..].starts_with(command) {
        return None;
    }
    let start = pos + command.len();
    let end = match_argument(code, start, ArgumentKind::Brace)?;
    Some((code[start + 1..end - 1].trim().to_string(), end))
}

fn optional_argument(code: &str, pos: usize, kind: ArgumentKind) -> usize {
    match_argument(code, pos, kind).unwrap_or(pos)
}

/// Babel event starting at the backslash at `pos`, plus where scanning resumes.
fn event_at(code: &str, pos: usize) -> Option<(Event, usize)> {
    if let Some(signature) = USE_PACKAGE.as_ref() {
        if let Some((end, arguments)) = signature.match_with_arguments(code, pos) {
            if inner(code, &arguments[1]) == "babel" {
                let options = inner(code, &arguments[0]);
                if let Some(language) = package_language(&options) {
                    return Some((Event::Switch { at: pos, language }, end));
                }
            }
            return None;
        }
    }

    if let Some(signature) = SELECT_LANGUAGE.as_ref() {
        if let Some((end, arguments)) = signature.match_with_arguments(code, pos) {
            let language = resolve(&inner(code, &arguments[0]))?;
            return Some((Event::Switch { at: pos, language }, end));
        }
    }

    if let Some((name, end)) = environment_at(code, pos, r"\begin") {
        if name == "otherlanguage" || name == "otherlanguage*" {
            let options_end = optional_argument(code, end, ArgumentKind::Bracket);
            let language_end = match_argument(code, options_end, ArgumentKind::Brace)?;
            let language = resolve(&inner(code, &(options_end..language_end)));
            return Some((
                Event::Begin {
                    at: language_end,
                    language,
                },
                language_end,
            ));
        }
        let language = *ENVIRONMENT_MAP.get(&name)?;
        let end = optional_argument(code, end, ArgumentKind::Bracket);
        return Some((
            Event::Begin {
                at: end,
                language: Some(language),
            },
            end,
        ));
    }

    if let Some((name, end)) = environment_at(code, pos, r"\end") {
        if name == "otherlanguage"
            || name == "otherlanguage*"
            || ENVIRONMENT_MAP.contains_key(&name)
        {
            return Some((Event::End { at: pos }, end));
        }
    }

    None
}

/// All babel events in `code`, in order, skipping comments.
fn find_events(code: &str) -> Vec<Event> {
    let mut events = Vec::new();
    let mut pos = 0;
    while let Some(offset) = code[pos..].find(['\\', '%']) {
        pos += offset;
        if code[pos..].starts_with('%') {
            pos = code[pos..].find('\n').map_or(code.len(), |newline| pos + newline + 1);
            continue;
        }
        if let Some((event, resume)) = event_at(code, pos) {
            events.push(event);
            pos = resume;
            continue;
        }
        // Skip the backslash and the escaped character.
        pos += 1;
        if let Some(escaped) = code[pos..].chars().next() {
            pos += escaped.len_utf8();
        }
    }
    events
}

/// Split one LaTeX fragment at babel language switches.
pub fn split_babel(dialect: &str, code: &str, settings: &Settings) -> Vec<CodeFragment> {
    let mut fragments = Vec::new();
    let mut stack = vec![settings.clone()];
    let mut start = 0;

    let emit = |fragments: &mut Vec<CodeFragment>, range: Range<usize>, settings: &Settings| {
        if !range.is_empty() {
            fragments.push(CodeFragment::new(
                dialect,
                &code[range.clone()],
                range.start,
                settings.clone(),
            ));
        }
    };

    for event in find_events(code) {
        if matches!(event, Event::End { .. }) && stack.len() == 1 {
            tracing::debug!(offset = event.at(), "unmatched babel environment end");
            continue;
        }
        let Some(current) = stack.last().cloned() else {
            break;
        };
        emit(&mut fragments, start..event.at(), &current);
        start = event.at();
        match event {
            Event::Switch { language, .. } => {
                if let Some(top) = stack.last_mut() {
                    *top = top.with_language(language);
                }
            }
            Event::Begin { language, .. } => stack.push(match language {
                Some(language) => current.with_language(language),
                None => current,
            }),
            Event::End { .. } => {
                stack.pop();
            }
        }
    }

    if let Some(current) = stack.last() {
        emit(&mut fragments, start..code.len(), current);
    }
    if fragments.is_empty() {
        fragments.push(CodeFragment::new(dialect, code, 0, settings.clone()));
    }
    fragments
}

#[derive(Debug, Clone)]
pub struct LatexFragmentizer {
    dialect: String,
    directives: DirectiveFragmentizer,
}

impl LatexFragmentizer {
    pub fn new(dialect: &str) -> Self {
        Self {
            dialect: dialect.to_string(),
            directives: DirectiveFragmentizer::latex(dialect),
        }
    }
}

impl Fragmentizer for LatexFragmentizer {
    fn fragmentize(&self, code: &str, settings: &Settings) -> Vec<CodeFragment> {
        let fragments = self.directives.fragmentize(code, settings);
        BabelSplitter(&self.dialect).refragmentize(&self.dialect, fragments)
    }
}

struct BabelSplitter<'a>(&'a str);

impl Fragmentizer for BabelSplitter<'_> {
    fn fragmentize(&self, code: &str, settings: &Settings) -> Vec<CodeFragment> {
        split_babel(self.0, code, settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fragment::fragmentize;

    fn summary(fragments: &[CodeFragment]) -> Vec<(&str, &str, usize)> {
        fragments
            .iter()
            .map(|f| (f.text.as_str(), f.settings.language(), f.offset))
            .collect()
    }

    #[test]
    fn directives() {
        let code = "Sentence\\footnote[abc]{Footnote} 1\n\t\t  %\t ltex: language=de-DE\nSentence 2\\todo{Todo note}\n%ltex:\tlanguage=en-US\n\nSentence 3\n";
        let fragments = fragmentize("latex", code, &Settings::default());
        assert_eq!(
            summary(&fragments),
            vec![
                ("Sentence\\footnote[abc]{Footnote} 1\n", "en-US", 0),
                ("Sentence 2\\todo{Todo note}\n", "de-DE", 63),
                ("\nSentence 3\n", "en-US", 112),
            ]
        );
        assert!(fragments.iter().all(|f| f.dialect == "latex"));
    }

    #[test]
    fn babel_package_options() {
        let code = "This is a test.\n\\usepackage[\n  american,  % American English\n  ngerman,   % German\n  dummy={abc,def}\n]{babel}\nDies ist ein Test.\n";
        let fragments = fragmentize("latex", code, &Settings::default());
        assert_eq!(fragments.len(), 2);
        assert_eq!(fragments[0].text.len(), 16);
        assert_eq!(fragments[1].text.len(), 113);
        assert_eq!(fragments[0].settings.language(), "en-US");
        assert_eq!(fragments[1].settings.language(), "de-DE");
    }

    #[test]
    fn babel_main_option_wins() {
        let code = "This is a test.\n\\usepackage[\n  main=ngerman,  % German\n  american,      % American English\n  dummy={abc,def}\n]{babel}\nDies ist ein Test.\n";
        let fragments = fragmentize("latex", code, &Settings::default());
        assert_eq!(fragments.len(), 2);
        assert_eq!(fragments[0].text.len(), 16);
        assert_eq!(fragments[1].text.len(), 121);
        assert_eq!(fragments[1].settings.language(), "de-DE");
    }

    #[test]
    fn commented_out_package_is_ignored() {
        let settings = Settings::default();
        let active = "This is a test.\n  \\usepackage[ngerman]{babel}\nThis is another test.";
        assert_eq!(fragmentize("latex", active, &settings).len(), 2);

        let commented = "This is a test.\n  % \\usepackage[ngerman]{babel}\nThis is another test.";
        assert_eq!(fragmentize("latex", commented, &settings).len(), 1);

        let escaped = "100\\% \\selectlanguage{french}Bonjour.";
        let fragments = fragmentize("latex", escaped, &settings);
        assert_eq!(fragments.len(), 2);
        assert_eq!(fragments[1].settings.language(), "fr");
    }

    #[test]
    fn other_language_environment_splits_in_three() {
        let code = "This is a \\begin{otherlanguage*}{de-DE}Beispiel\\end{otherlanguage*}.\n";
        let fragments = fragmentize("latex", code, &Settings::default());
        assert_eq!(
            summary(&fragments),
            vec![
                ("This is a \\begin{otherlanguage*}{de-DE}", "en-US", 0),
                ("Beispiel", "de-DE", 39),
                ("\\end{otherlanguage*}.\n", "en-US", 47),
            ]
        );
    }

    #[test]
    fn unbalanced_environments() {
        let settings = Settings::default();
        let fragments = fragmentize("latex", "This is a \\begin{de-DE}Beispiel.\n", &settings);
        assert_eq!(
            summary(&fragments),
            vec![
                ("This is a \\begin{de-DE}", "en-US", 0),
                ("Beispiel.\n", "de-DE", 23),
            ]
        );

        let fragments = fragmentize("latex", "This is a Beispiel\\end{de-DE}.\n", &settings);
        assert_eq!(fragments.len(), 1);
        assert_eq!(fragments[0].text.len(), 31);
    }

    #[test]
    fn switches_and_nested_environments() {
        let code = "Intro.\n\\selectlanguage{french}\nC'est un test.\n\\selectlanguage{german}\nUnd \\begin{american}[abc]\n  sentence\n  \\begin{french}[abc]\n    phrase\n  \\end{french}\n\\end{american}.\n";
        let fragments = fragmentize("latex", code, &Settings::default());
        let languages: Vec<_> = fragments.iter().map(|f| f.settings.language()).collect();
        assert_eq!(languages, ["en-US", "fr", "de-DE", "en-US", "fr", "en-US", "de-DE"]);
        assert_eq!(fragments[4].text, "\n    phrase\n  ");
        assert_eq!(fragments[6].text, "\\end{american}.\n");

        let joined: String = fragments.iter().map(|f| f.text.as_str()).collect();
        assert_eq!(joined, code);
    }

    #[test]
    fn unknown_languages_are_ignored() {
        let code = "A \\selectlanguage{klingon} B \\begin{otherlanguage}{klingon}C\\end{otherlanguage}";
        let fragments = fragmentize("latex", code, &Settings::default());
        assert!(fragments.iter().all(|f| f.settings.language() == "en-US"));
    }

    #[test]
    fn language_tags_name_environments() {
        let fragments = fragmentize("latex", "\\begin{enGB}Colour\\end{enGB}", &Settings::default());
        assert_eq!(fragments[1].text, "Colour");
        assert_eq!(fragments[1].settings.language(), "en-GB");
    }

    #[test]
    fn package_option_parsing() {
        assert_eq!(package_language("american,ngerman"), Some("de-DE"));
        assert_eq!(package_language("ngerman,main=british"), Some("en-GB"));
        assert_eq!(package_language("dummy={american,x}"), None);
        assert_eq!(package_language("% french\nenglish"), Some("en-US"));
    }
}
