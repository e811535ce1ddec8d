//! LaTeX builder
//!
//!     A character-driven state machine over a stack of modes. Text modes emit running text,
//!     math modes swallow everything and emit one placeholder when the formula closes,
//!     ignored environments swallow everything up to their `\end`.
//!
//! Math Placeholders
//!
//!     Inline math reads as `Dummy<n>`, or `Ina<n>` when the formula starts with a symbol
//!     pronounced with a leading vowel ("an x"). Display math reads as a placeholder set off
//!     by spaces; punctuation inside the formula right before it closes is carried over so
//!     sentences still end where the author ended them.
//!
//!     The bookkeeping below (`last_space`, `dummy_last_punctuation`, `is_math_empty`, ...)
//!     exists only to get spaces and punctuation around placeholders right.

use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::annotated::AnnotatedText;
use crate::dummy::DummyGenerator;
use crate::error::MalformedInputError;
use crate::settings::Settings;

use super::{contains_two_line_ends, MarkupBuilder, Scanner};

mod accents;
pub mod registry;
pub mod signature;

pub use registry::LatexRegistry;
use signature::{match_argument, Action, ArgumentKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    ParagraphText,
    InlineText,
    Heading,
    InlineMath,
    DisplayMath,
    IgnoreEnvironment,
    Rsweave,
}

impl Mode {
    fn is_math(self) -> bool {
        matches!(self, Mode::InlineMath | Mode::DisplayMath)
    }

    fn is_text(self) -> bool {
        !self.is_math() && self != Mode::IgnoreEnvironment
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MathVowel {
    Undecided,
    Vowel,
    Consonant,
}

/// How an ignored environment ends.
#[derive(Debug, Clone, PartialEq, Eq)]
enum EnvironmentEnd {
    End(String),
    Stop(String),
}

static COMMAND: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\\(?:[^A-Za-z@]|[A-Za-z@]+)\*?").unwrap());
static ARGUMENT: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\{[^}]*?\}").unwrap());
static COMMENT: Lazy<Regex> = Lazy::new(|| Regex::new(r"^%.*?(?:$|\r?\n[ \n\r\t]*)").unwrap());
static WHITESPACE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[ \n\r\t]+(?:%.*?(?:$|\r?\n[ \n\r\t]*))?").unwrap());
static LENGTH_IN_BRACE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\{-?[0-9]*(?:\.[0-9]+)?(?:pt|mm|cm|ex|em|bp|dd|pc|in)\}").unwrap()
});
static LENGTH_IN_BRACKET: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\[-?[0-9]*(?:\.[0-9]+)?(?:pt|mm|cm|ex|em|bp|dd|pc|in)\]").unwrap()
});
static ACCENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"^(?P<command>\\[`'^~"=.Hbcdkruv])(?: *(?P<bare>[A-Za-z]|\\i|\\j)|\{(?P<braced>[A-Za-z]|\\i|\\j)\})"#)
        .unwrap()
});
static ACCENT_IN_BRACE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"^\{(?P<command>\\[`'^~"=.Hbcdkruv])(?: *(?P<bare>[A-Za-z]|\\i|\\j)|\{(?P<braced>[A-Za-z]|\\i|\\j)\})\}"#)
        .unwrap()
});
static RSWEAVE_BEGIN: Lazy<Regex> = Lazy::new(|| Regex::new(r"^<<.*?>>=").unwrap());

const MATH_ENVIRONMENTS: &[&str] = &[
    "align",
    "align*",
    "alignat",
    "alignat*",
    "displaymath",
    "eqnarray",
    "eqnarray*",
    "equation",
    "equation*",
    "flalign",
    "flalign*",
    "formula",
    "gather",
    "gather*",
    "math",
    "multline",
    "multline*",
];

const HEADING_COMMANDS: &[&str] = &[
    "part",
    "chapter",
    "section",
    "subsection",
    "subsubsection",
    "paragraph",
    "subparagraph",
];

/// Math commands that do not decide how the formula is pronounced.
const TRANSPARENT_MATH_COMMANDS: &[&str] = &[
    r"\bm",
    r"\boldsymbol",
    r"\hat",
    r"\mathbb",
    r"\mathbf",
    r"\mathcal",
    r"\mathfrak",
    r"\mathit",
    r"\mathnormal",
    r"\mathsf",
    r"\mathtt",
    r"\mathop",
    r"\operatorname",
    r"\overbrace",
    r"\overleftarrow",
    r"\overleftrightarrow",
    r"\overline",
    r"\overrightarrow",
    r"\tilde",
    r"\underbrace",
    r"\underline",
    r"\vec",
    r"\widetilde",
    r"\widehat",
];

const VOWEL_MATH_COMMANDS: &[&str] = &[
    r"\alpha",
    r"\ell",
    r"\epsilon",
    r"\eta",
    r"\iota",
    r"\Omega",
    r"\omega",
    r"\varepsilon",
];

const SPACING_COMMANDS: &[&str] = &[
    r"\ ", r"\,", r"\;", r"\\", r"\hfill", r"\hspace", r"\hspace*", r"\quad", r"\qquad",
    r"\newline",
];

pub struct LatexBuilder {
    scanner: Scanner,
    rsweave: bool,
    language: String,
    registry: Arc<LatexRegistry>,
    modes: Vec<Mode>,
    cur_mode: Mode,
    dummy_counter: usize,
    last_space: bool,
    last_punctuation: bool,
    dummy_last_space: bool,
    dummy_last_punctuation: String,
    is_math_empty: bool,
    math_vowel: MathVowel,
    preserve_dummy_last: bool,
    can_insert_space_before_dummy: bool,
    is_math_char_trivial: bool,
    ignore_end: Option<EnvironmentEnd>,
}

impl LatexBuilder {
    pub fn new(dialect: &str, settings: &Settings) -> Self {
        Self {
            scanner: Scanner::new("latex"),
            rsweave: dialect == "rsweave",
            language: settings.language().to_string(),
            registry: LatexRegistry::with_overrides(
                settings.latex_commands(),
                settings.latex_environments(),
            ),
            modes: vec![Mode::ParagraphText],
            cur_mode: Mode::ParagraphText,
            dummy_counter: 0,
            last_space: false,
            last_punctuation: false,
            dummy_last_space: false,
            dummy_last_punctuation: String::new(),
            is_math_empty: false,
            math_vowel: MathVowel::Undecided,
            preserve_dummy_last: false,
            can_insert_space_before_dummy: false,
            is_math_char_trivial: false,
            ignore_end: None,
        }
    }

    fn top_mode(&self) -> Option<Mode> {
        self.modes.last().copied()
    }

    fn pop_mode(&mut self) {
        self.modes.pop();
        if self.modes.is_empty() {
            self.modes.push(Mode::ParagraphText);
        }
    }

    fn enter_display_math(&mut self) {
        self.modes.push(Mode::DisplayMath);
        self.is_math_empty = true;
        self.math_vowel = MathVowel::Undecided;
        self.can_insert_space_before_dummy = true;
    }

    fn enter_inline_math(&mut self) {
        self.modes.push(Mode::InlineMath);
        self.is_math_empty = true;
        self.math_vowel = MathVowel::Undecided;
        self.can_insert_space_before_dummy = true;
        self.is_math_char_trivial = true;
    }

    fn text(&mut self, len: usize) {
        if len == 0 {
            return;
        }
        let last = self.scanner.slice(len).chars().next_back();
        self.scanner.add_text(len);
        if let Some(last) = last {
            self.text_added(last);
        }
    }

    fn markup(&mut self, len: usize) {
        if len == 0 {
            return;
        }
        self.scanner.add_markup(len);
        if self.preserve_dummy_last {
            self.preserve_dummy_last = false;
        } else {
            self.dummy_last_space = false;
            self.dummy_last_punctuation.clear();
        }
    }

    fn markup_as(&mut self, len: usize, interpret_as: &str) {
        if interpret_as.is_empty() {
            self.markup(len);
            return;
        }
        self.scanner.add_markup_as(len, interpret_as);
        self.preserve_dummy_last = false;
        if let Some(last) = interpret_as.chars().next_back() {
            self.text_added(last);
        }
    }

    fn text_added(&mut self, last: char) {
        self.last_space = matches!(last, ' ' | '\n' | '\r');
        self.last_punctuation = is_punctuation(last);
    }

    fn process_character(&mut self, ch: char) {
        self.cur_mode = self.top_mode().unwrap_or(Mode::ParagraphText);
        self.is_math_char_trivial = false;

        if self.cur_mode == Mode::IgnoreEnvironment {
            self.process_ignored_environment(ch);
        } else if self.rsweave && self.cur_mode == Mode::Rsweave {
            if self.scanner.starts_with("@") {
                self.pop_mode();
                self.markup(1);
            } else {
                self.markup(ch.len_utf8());
            }
        } else {
            match ch {
                '\\' => self.process_backslash(),
                '{' => self.process_opening_brace(),
                '}' => self.process_closing_brace(),
                '$' => self.process_dollar(),
                '%' => self.process_percent(),
                ' ' | '&' | '~' | '\n' | '\r' | '\t' => self.process_whitespace(ch),
                '`' | '\'' | '"' => self.process_quotation_mark(ch),
                _ => self.process_default_character(ch),
            }
        }

        if !self.is_math_char_trivial {
            self.can_insert_space_before_dummy = false;
            self.is_math_empty = false;
        }
    }

    fn process_ignored_environment(&mut self, ch: char) {
        let Some(end) = &self.ignore_end else {
            tracing::warn!("ignored environment without a known end, leaving it");
            self.pop_mode();
            return;
        };
        let end_len = match end {
            EnvironmentEnd::End(name) => {
                let end = format!("\\end{{{name}}}");
                if self.scanner.starts_with(&end) {
                    end.len()
                } else {
                    0
                }
            }
            EnvironmentEnd::Stop(name) => {
                let stop = format!("\\stop{name}");
                let rest = self.scanner.rest();
                let followed_by_letter = rest
                    .get(stop.len()..)
                    .and_then(|after| after.chars().next())
                    .is_some_and(|next| next.is_ascii_alphabetic());
                if rest.starts_with(&stop) && !followed_by_letter {
                    stop.len()
                } else {
                    0
                }
            }
        };
        if end_len > 0 {
            self.pop_mode();
            self.markup(end_len);
        } else {
            self.markup(ch.len_utf8());
        }
    }

    fn process_backslash(&mut self) {
        let command = self.scanner.slice(self.scanner.match_len(&COMMAND)).to_string();
        if command.is_empty() {
            self.markup(1);
            return;
        }

        let is_begin = command == r"\begin" || command.starts_with(r"\start");
        let is_end = command == r"\end" || command.starts_with(r"\stop");

        if is_begin || is_end {
            self.process_environment_command(&command, is_begin);
        } else if matches!(command.as_str(), r"\$" | r"\%" | r"\&" | r"\#" | r"\_" | r"\{" | r"\}")
        {
            self.markup_as(command.len(), &command[1..]);
        } else if command == r"\[" {
            self.enter_display_math();
            self.markup(command.len());
        } else if command == r"\(" {
            self.enter_inline_math();
            self.markup(command.len());
        } else if command == r"\]" || command == r"\)" {
            self.pop_mode();
            let dummy = self.generate_dummy(DummyGenerator::SINGULAR);
            self.markup_as(command.len(), &dummy);
        } else if let Some(letter) = special_letter(&command) {
            let interpret_as = if self.cur_mode.is_math() { "" } else { letter };
            self.markup_as(command.len(), interpret_as);
        } else if is_accent_command(&command) {
            self.process_accent(&command);
        } else if command == r"\-" {
            self.markup(command.len());
        } else if SPACING_COMMANDS.contains(&command.as_str()) {
            self.process_spacing(&command);
        } else if let Some(interpretation) = abbreviation(&command) {
            let interpret_as = if self.cur_mode.is_math() {
                ""
            } else {
                interpretation
            };
            self.markup_as(command.len(), interpret_as);
        } else if command == r"\notag" || command == r"\qed" {
            self.preserve_dummy_last = true;
            self.markup(command.len());
        } else if HEADING_COMMANDS.contains(&command.trim_start_matches('\\').trim_end_matches('*'))
        {
            self.process_heading(&command);
        } else if command == r"\text" || command == r"\intertext" {
            let has_brace = self
                .scanner
                .rest()
                .get(command.len()..)
                .is_some_and(|after| after.starts_with('{'));
            let len = command.len() + usize::from(has_brace);
            if has_brace {
                self.modes.push(Mode::InlineText);
            }
            let interpret_as = if self.cur_mode.is_math() {
                self.generate_dummy(DummyGenerator::SINGULAR)
            } else {
                String::new()
            };
            self.markup_as(len, &interpret_as);
        } else if command == r"\verb" || command == r"\verb*" {
            match verb_len(self.scanner.rest(), command.len()) {
                Some(len) => {
                    let dummy = self.generate_dummy(DummyGenerator::SINGULAR);
                    self.markup_as(len, &dummy);
                }
                None => self.markup(command.len()),
            }
        } else {
            self.process_generic_command(&command);
        }
    }

    fn process_environment_command(&mut self, command: &str, is_begin: bool) {
        self.preserve_dummy_last = true;
        let pos = self.scanner.pos();
        let is_latex_style = command == r"\begin" || command == r"\end";
        let (argument_len, name) = if is_latex_style {
            let len = self
                .scanner
                .match_len_at(&ARGUMENT, pos + command.len());
            let argument = &self.scanner.code()[pos + command.len()..pos + command.len() + len];
            let name = if argument.len() >= 2 {
                argument[1..argument.len() - 1].to_string()
            } else {
                String::new()
            };
            (len, name)
        } else {
            let prefix = if is_begin { r"\start" } else { r"\stop" };
            (0, command[prefix.len()..].to_string())
        };

        let mut arguments_processed = false;
        let mut interpret_as = String::new();

        if MATH_ENVIRONMENTS.contains(&name.as_str()) {
            self.markup(command.len());
            if is_begin {
                if name == "math" {
                    self.enter_inline_math();
                } else {
                    self.enter_display_math();
                }
            } else {
                self.pop_mode();
                interpret_as = self.generate_dummy(DummyGenerator::SINGULAR);
            }
        } else if is_begin {
            let begin = self.scanner.slice(command.len() + argument_len).to_string();
            let registry = Arc::clone(&self.registry);
            let matched = registry.match_environment(&begin, self.scanner.code(), pos);
            match matched {
                Some((signature, end)) => {
                    if signature.action() == Action::Ignore {
                        self.modes.push(Mode::IgnoreEnvironment);
                        self.ignore_end = Some(if is_latex_style {
                            EnvironmentEnd::End(name.clone())
                        } else {
                            EnvironmentEnd::Stop(name.clone())
                        });
                    }
                    if signature.ignores_all_arguments() {
                        self.markup(command.len());
                    } else {
                        self.markup(end - pos);
                        arguments_processed = true;
                    }
                }
                None => {
                    self.markup(command.len());
                    self.modes.push(self.cur_mode);
                }
            }
        } else {
            self.markup(command.len());
            self.pop_mode();
        }

        if self.top_mode() != Some(Mode::IgnoreEnvironment) {
            self.is_math_char_trivial = true;
            self.preserve_dummy_last = true;
            if !arguments_processed {
                self.markup_as(argument_len, &interpret_as);
                if is_begin {
                    self.process_environment_arguments();
                }
            }
        }
    }

    fn process_environment_arguments(&mut self) {
        loop {
            let pos = self.scanner.pos();
            let end = [
                ArgumentKind::Brace,
                ArgumentKind::Bracket,
                ArgumentKind::Parenthesis,
            ]
            .into_iter()
            .find_map(|kind| match_argument(self.scanner.code(), pos, kind));
            match end {
                Some(end) => self.markup(end - pos),
                None => break,
            }
        }
    }

    fn process_accent(&mut self, command: &str) {
        if self.cur_mode.is_math() {
            self.markup(command.len());
            return;
        }
        let accent = self.scanner.captures(&ACCENT).map(|captures| {
            let letter = captures
                .name("bare")
                .or_else(|| captures.name("braced"))
                .map_or("", |letter| letter.as_str());
            (captures[0].len(), accents::compose(&captures["command"], letter))
        });
        match accent {
            Some((len, interpret_as)) => self.markup_as(len, &interpret_as),
            None => self.markup(command.len()),
        }
    }

    fn process_spacing(&mut self, command: &str) {
        let mut len = command.len();
        if command == r"\hspace" || command == r"\hspace*" {
            len += self
                .scanner
                .match_len_at(&ARGUMENT, self.scanner.pos() + command.len());
        }

        if self.cur_mode.is_math() && !self.last_space && self.can_insert_space_before_dummy {
            self.markup_as(len, " ");
        } else {
            self.preserve_dummy_last = true;
            if self.cur_mode.is_math() {
                self.markup(len);
                self.dummy_last_space = true;
            } else {
                let space = if self.last_space {
                    ""
                } else if command == r"\," {
                    "\u{202f}"
                } else {
                    " "
                };
                self.markup_as(len, space);
            }
        }
    }

    fn process_heading(&mut self, command: &str) {
        self.markup(command.len());
        let pos = self.scanner.pos();
        if let Some(end) = match_argument(self.scanner.code(), pos, ArgumentKind::Bracket) {
            self.markup(end - pos);
        }
        if self.scanner.starts_with("{") {
            self.modes.push(Mode::Heading);
            self.markup(1);
        }
    }

    fn process_generic_command(&mut self, command: &str) {
        let registry = Arc::clone(&self.registry);
        let matched = registry.match_command(command, self.scanner.code(), self.scanner.pos());
        match matched {
            Some((signature, end)) if signature.action() != Action::Default => {
                let len = end - self.scanner.pos();
                match signature.action() {
                    Action::Dummy(generator) => {
                        let dummy = self.generate_dummy(generator);
                        self.markup_as(len, &dummy);
                    }
                    _ => self.markup(len),
                }
            }
            _ => {
                if self.cur_mode.is_math() && self.math_vowel == MathVowel::Undecided {
                    if VOWEL_MATH_COMMANDS.contains(&command) {
                        self.math_vowel = MathVowel::Vowel;
                    } else if !TRANSPARENT_MATH_COMMANDS.contains(&command) {
                        self.math_vowel = MathVowel::Consonant;
                    }
                }
                self.markup(command.len());
            }
        }
    }

    fn process_opening_brace(&mut self) {
        let length = self.scanner.match_len(&LENGTH_IN_BRACE);
        if length > 0 {
            self.markup(length);
            return;
        }
        let accent = self.scanner.captures(&ACCENT_IN_BRACE).map(|captures| {
            let letter = captures
                .name("bare")
                .or_else(|| captures.name("braced"))
                .map_or("", |letter| letter.as_str());
            (captures[0].len(), accents::compose(&captures["command"], letter))
        });
        match accent {
            Some((len, interpret_as)) => self.markup_as(len, &interpret_as),
            None => {
                self.modes.push(self.cur_mode);
                self.markup(1);
            }
        }
    }

    fn process_closing_brace(&mut self) {
        let interpret_as = if self.cur_mode == Mode::Heading && !self.last_punctuation {
            "."
        } else if self.cur_mode.is_text() && self.scanner.peek() == Some('{') {
            " "
        } else {
            ""
        };
        self.pop_mode();
        self.markup_as(1, interpret_as);
        self.can_insert_space_before_dummy = true;
        if self.cur_mode.is_text() && self.top_mode().is_some_and(Mode::is_math) {
            self.is_math_empty = true;
        }
        self.is_math_char_trivial = true;
    }

    fn process_dollar(&mut self) {
        if self.scanner.starts_with("$$") {
            if self.cur_mode == Mode::DisplayMath {
                self.pop_mode();
                let dummy = self.generate_dummy(DummyGenerator::SINGULAR);
                self.markup_as(2, &dummy);
            } else {
                self.enter_display_math();
                self.markup(2);
            }
        } else if self.cur_mode == Mode::InlineMath {
            self.pop_mode();
            let dummy = self.generate_dummy(DummyGenerator::SINGULAR);
            self.markup_as(1, &dummy);
        } else {
            self.enter_inline_math();
            self.markup(1);
        }
    }

    fn process_percent(&mut self) {
        let len = self.scanner.match_len(&COMMENT).max(1);
        let paragraph = contains_two_line_ends(self.scanner.slice(len));
        self.preserve_dummy_last = true;
        self.is_math_char_trivial = true;
        self.markup_as(len, if paragraph { "\n\n" } else { "" });
    }

    fn process_whitespace(&mut self, ch: char) {
        let len = if ch != '~' && ch != '&' {
            self.scanner.match_len(&WHITESPACE).max(1)
        } else {
            1
        };
        self.preserve_dummy_last = true;
        self.is_math_char_trivial = true;

        if self.cur_mode.is_text() {
            if contains_two_line_ends(self.scanner.slice(len)) {
                self.markup_as(len, "\n\n");
            } else if ch == '~' {
                let space = if self.last_space { "" } else { "\u{a0}" };
                self.markup_as(len, space);
            } else {
                let space = if self.last_space { "" } else { " " };
                self.markup_as(len, space);
            }
        } else {
            self.markup(len);
        }

        if ch == '~' || ch == '&' {
            self.dummy_last_space = true;
        }
    }

    fn process_quotation_mark(&mut self, ch: char) {
        if !self.cur_mode.is_text() {
            self.markup(1);
            return;
        }
        const SMART_QUOTES: &[(&str, &str)] = &[
            ("``", "\u{201c}"),
            ("\"'", "\u{201c}"),
            ("''", "\u{201d}"),
            ("\"`", "\u{201e}"),
            ("\"-", ""),
            ("\"\"", ""),
            ("\"|", ""),
            ("\"=", "-"),
            ("\"~", "-"),
        ];
        match SMART_QUOTES
            .iter()
            .find(|(pair, _)| self.scanner.starts_with(pair))
        {
            Some((pair, quote)) => self.markup_as(pair.len(), quote),
            None => self.text(ch.len_utf8()),
        }
    }

    fn process_default_character(&mut self, ch: char) {
        match ch {
            '-' if self.cur_mode.is_text() => {
                if self.scanner.starts_with("---") {
                    self.markup_as(3, "\u{2014}");
                    return;
                }
                if self.scanner.starts_with("--") {
                    self.markup_as(2, "\u{2013}");
                    return;
                }
            }
            '[' => {
                let length = self.scanner.match_len(&LENGTH_IN_BRACKET);
                if length > 0 {
                    self.is_math_char_trivial = true;
                    self.preserve_dummy_last = true;
                    self.markup(length);
                    return;
                }
            }
            '<' if self.rsweave => {
                let begin = self.scanner.match_len(&RSWEAVE_BEGIN);
                if begin > 0 {
                    self.modes.push(Mode::Rsweave);
                    self.markup(begin);
                    return;
                }
            }
            _ => {}
        }

        if self.cur_mode.is_text() {
            self.text(ch.len_utf8());
        } else {
            self.markup(ch.len_utf8());
            if is_punctuation(ch) {
                self.dummy_last_punctuation = ch.to_string();
            }
            if self.math_vowel == MathVowel::Undecided {
                self.math_vowel = if is_vowel(ch) {
                    MathVowel::Vowel
                } else {
                    MathVowel::Consonant
                };
            }
        }
    }

    fn next_counter(&mut self) -> usize {
        let counter = self.dummy_counter;
        self.dummy_counter += 1;
        counter
    }

    fn generate_dummy(&mut self, generator: DummyGenerator) -> String {
        let vowel = self.math_vowel == MathVowel::Vowel;
        let dummy = if self.cur_mode.is_text() {
            let counter = self.next_counter();
            generator.generate_with_vowel(&self.language, counter, vowel)
        } else if self.is_math_empty {
            if self.cur_mode == Mode::DisplayMath && !self.last_space {
                " ".to_string()
            } else {
                String::new()
            }
        } else if self.cur_mode == Mode::DisplayMath {
            let counter = self.next_counter();
            let trailing_space = if self.top_mode() == Some(Mode::InlineText) {
                self.dummy_last_space
            } else {
                true
            };
            format!(
                "{}{}{}{}",
                if self.last_space { "" } else { " " },
                generator.generate(&self.language, counter),
                self.dummy_last_punctuation,
                if trailing_space { " " } else { "" },
            )
        } else {
            let counter = self.next_counter();
            format!(
                "{}{}{}",
                generator.generate_with_vowel(&self.language, counter, vowel),
                self.dummy_last_punctuation,
                if self.dummy_last_space { " " } else { "" },
            )
        };
        self.dummy_last_space = false;
        self.dummy_last_punctuation.clear();
        self.math_vowel = MathVowel::Undecided;
        dummy
    }
}

impl MarkupBuilder for LatexBuilder {
    fn add_code(&mut self, code: &str) -> Result<(), MalformedInputError> {
        self.scanner.load(code);
        while let Some(ch) = self.scanner.current() {
            let last_pos = self.scanner.pos();
            self.process_character(ch);
            self.scanner.ensure_progress(last_pos)?;
        }
        Ok(())
    }

    fn add_markup(&mut self, raw: &str, interpret_as: &str) {
        self.scanner.push_external_markup(raw, interpret_as);
    }

    fn set_strict(&mut self, strict: bool) {
        self.scanner.set_strict(strict);
    }

    fn build(&self) -> AnnotatedText {
        self.scanner.build()
    }
}

fn is_punctuation(ch: char) -> bool {
    matches!(ch, '.' | ',' | ':' | ';' | '\u{2026}')
}

/// Letters whose spoken name starts with a vowel sound.
fn is_vowel(ch: char) -> bool {
    matches!(
        ch.to_ascii_lowercase(),
        'a' | 'e' | 'f' | 'h' | 'i' | 'l' | 'm' | 'n' | 'o' | 'r' | 's' | 'x'
    )
}

fn is_accent_command(command: &str) -> bool {
    matches!(
        command,
        r"\`" | r"\'" | r"\^" | r"\~" | r#"\""# | r"\=" | r"\." | r"\H" | r"\b" | r"\c" | r"\d"
            | r"\k" | r"\r" | r"\u" | r"\v"
    )
}

fn special_letter(command: &str) -> Option<&'static str> {
    Some(match command {
        r"\AA" => "\u{c5}",
        r"\L" => "\u{141}",
        r"\O" => "\u{d8}",
        r"\SS" => "\u{1e9e}",
        r"\aa" => "\u{e5}",
        r"\i" => "\u{131}",
        r"\j" => "\u{237}",
        r"\l" => "\u{142}",
        r"\o" => "\u{f8}",
        r"\ss" => "\u{df}",
        _ => return None,
    })
}

fn abbreviation(command: &str) -> Option<&'static str> {
    Some(match command {
        r"\dots" | r"\ldots" => "\u{2026}",
        r"\eg" => "e.g.",
        r"\egc" => "e.g.,",
        r"\euro" => "\u{20ac}",
        r"\ie" => "i.e.",
        r"\iec" => "i.e.,",
        _ => return None,
    })
}

/// Length of `\verb<d>...<d>` at the start of `rest`, if the delimiter closes.
fn verb_len(rest: &str, command_len: usize) -> Option<usize> {
    let after = rest.get(command_len..)?;
    let delimiter = after.chars().next()?;
    let body = &after[delimiter.len_utf8()..];
    let close = body.find(delimiter)?;
    Some(command_len + delimiter.len_utf8() + close + delimiter.len_utf8())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotated::Bias;
    use rstest::rstest;
    use std::collections::BTreeMap;

    fn plain(code: &str) -> String {
        plain_with(code, &Settings::default())
    }

    fn plain_with(code: &str, settings: &Settings) -> String {
        let mut builder = LatexBuilder::new("latex", settings);
        builder.set_strict(true);
        builder.add_code(code).unwrap();
        builder.build().plain_text().to_string()
    }

    #[test]
    fn inline_math_becomes_vowel_dummy() {
        assert_eq!(plain("This equals $a^{b}$.\n"), "This equals Ina0. ");
    }

    #[test]
    fn environments_and_items() {
        assert_eq!(
            plain(
                "We can do\n\\begin{itemize}[first-{test}]{[second]-test}\n  \\item this or\n  \\item that.\n\\end{itemize}\n"
            ),
            "We can do this or that. "
        );
    }

    #[test]
    fn comments_and_paragraphs() {
        assert_eq!(
            plain("This is a sentence.%\n\nThis is another sentence.\n"),
            "This is a sentence.\n\nThis is another sentence. "
        );
    }

    #[test]
    fn special_characters() {
        assert_eq!(
            plain("This is a te\\-st. Another te\"-st. Donau\"=Dampf\"\"schiff\"~Fahrt.\n"),
            "This is a test. Another test. Donau-Dampfschiff-Fahrt. "
        );
        assert_eq!(
            plain("Das macht dann 10 \\euro. Oder z.\\,B. vielleicht doch 12~\\euro{}?\n"),
            "Das macht dann 10 \u{20ac}. Oder z.\u{202f}B. vielleicht doch 12\u{a0}\u{20ac}? "
        );
        assert_eq!(plain("\\AA\\L\\O\\SS"), "\u{c5}\u{141}\u{d8}\u{1e9e}");
    }

    #[test]
    fn dashes_and_quotes() {
        assert_eq!(
            plain("This is a test -- this is another test --- this is the final test.\n"),
            "This is a test \u{2013} this is another test \u{2014} this is the final test. "
        );
        assert_eq!(
            plain("This ``is'' a \"`test.\"'\n"),
            "This \u{201c}is\u{201d} a \u{201e}test.\u{201c} "
        );
    }

    #[rstest]
    #[case("Er sagte \"\u{dc}bung macht den Meister\".\n", "Er sagte \"\u{dc}bung macht den Meister\". ")]
    #[case("C'est l'\u{e9}t\u{e9}.\n", "C'est l'\u{e9}t\u{e9}. ")]
    #[case("Ein `\u{e9}' hier.\n", "Ein `\u{e9}' hier. ")]
    fn quotes_before_non_ascii_letters(#[case] code: &str, #[case] expected: &str) {
        assert_eq!(plain(code), expected);
    }

    #[test]
    fn quote_before_non_ascii_in_rsweave() {
        let settings = Settings::default();
        let mut builder = LatexBuilder::new("rsweave", &settings);
        builder.set_strict(true);
        builder.add_code("\"\u{e9} _\u{e9}").unwrap();
        assert_eq!(builder.build().original_text(), "\"\u{e9} _\u{e9}");
    }

    #[test]
    fn headings_get_a_period() {
        assert_eq!(
            plain("\\section{Heading}\nThis is a test.\n\\subsection[abc]{This is another heading.}\nThis is another test.\n"),
            "Heading. This is a test. This is another heading. This is another test. "
        );
    }

    #[test]
    fn citations() {
        assert_eq!(
            plain("This is a test: \\cite{test1}, \\cite[a]{test2}, \\cite[a][b]{test3}.\n\\textcites{test1}{test2}{test3} shows that this should be plural.\n"),
            "This is a test: Dummy0, Dummy1, Dummy2. Dummies shows that this should be plural. "
        );
        assert_eq!(plain("\\cites{test}"), "Dummies");
    }

    #[test]
    fn command_overrides() {
        let code = "This is a test: \\foobar{abc}{def}.\n";
        assert_eq!(plain(code), "This is a test: abc def. ");
        for (action, expected) in [
            ("ignore", "This is a test: . "),
            ("dummy", "This is a test: Dummy0. "),
            ("pluralDummy", "This is a test: Dummies. "),
            ("vowelDummy", "This is a test: Ina0. "),
        ] {
            let settings = Settings::default().with_latex_commands(BTreeMap::from([(
                r"\foobar{}{}".to_string(),
                action.to_string(),
            )]));
            assert_eq!(plain_with(code, &settings), expected, "action {action}");
        }
    }

    #[test]
    fn environment_overrides() {
        let code = "This is a test: \\begin{foobar}{abc}def\\end{foobar}.\n";
        assert_eq!(plain(code), "This is a test: def. ");
        for (prototype, action, expected) in [
            ("foobar", "default", "This is a test: def. "),
            (r"\begin{foobar}", "default", "This is a test: abcdef. "),
            (r"\begin{foobar}{}", "default", "This is a test: def. "),
            ("foobar", "ignore", "This is a test: . "),
        ] {
            let settings = Settings::default().with_latex_environments(BTreeMap::from([(
                prototype.to_string(),
                action.to_string(),
            )]));
            assert_eq!(plain_with(code, &settings), expected, "{prototype} {action}");
        }
    }

    #[test]
    fn display_math() {
        assert_eq!(
            plain("Recall that\n\\begin{equation*}\n  \\begin{cases}\n    a&\\text{if $b$,}\\\\\n    c&\\text{otherwise.}\n  \\end{cases}\n\\end{equation*}\nNow we argue.\n"),
            "Recall that Dummy0 if Dummy1, Dummy2 otherwise. Now we argue. "
        );
        assert_eq!(
            plain("This is a test:\n\\[\n  E = mc^2.\n\\]\nAnd this is another one: \\(c^2\\).\n"),
            "This is a test: Dummy0. And this is another one: Dummy1. "
        );
    }

    #[test]
    fn math_vowels() {
        assert_eq!(
            plain("This is an $A$, $e$, $\\ell$, $\\mathcal{r}$. This is not a $b$, $\\ella$.\n"),
            "This is an Ina0, Ina1, Ina2, Ina3. This is not a Dummy4, Dummy5. "
        );
    }

    #[test]
    fn french_dummies() {
        let settings = Settings::default().with_language("fr");
        assert_eq!(
            plain_with("C'est un test: $E = mc^2$.\n", &settings),
            "C'est un test: Jimmy-0. "
        );
    }

    #[test]
    fn ignored_environments() {
        assert_eq!(
            plain("This is a test.\n\\begin{tikzpicture}\n  \\node[color=blue] at (42mm,0mm) {qwerty};\n\\end{tikzpicture}\nThis is another sentence.\n"),
            "This is a test. This is another sentence. "
        );
    }

    #[test]
    fn verb_becomes_dummy() {
        assert_eq!(plain("Use \\verb|x = 1| here.\n"), "Use Dummy0 here. ");
    }

    #[test]
    fn rsweave_chunks_are_skipped() {
        let mut builder = LatexBuilder::new("rsweave", &Settings::default());
        builder
            .add_code("<<import-packages>>=\nlibrary(tidyverse)\n@\n")
            .unwrap();
        assert_eq!(builder.build().plain_text(), " ");

        assert_eq!(
            plain("<<import-packages>>=\nlibrary(tidyverse)\n@\n"),
            "<<import-packages>>= library(tidyverse) @ "
        );
    }

    #[test]
    fn accent_positions_map_back() {
        let mut builder = LatexBuilder::new("latex", &Settings::default());
        builder.add_code("\\v{S}ekki\n").unwrap();
        let annotated = builder.build();
        assert_eq!(annotated.original_offset(0, Bias::Start), 0);
        // "Š" is two bytes in the plain text
        assert_eq!(annotated.original_offset(2, Bias::Start), 5);
        assert_eq!(annotated.original_offset(3, Bias::Start), 6);
    }
}
