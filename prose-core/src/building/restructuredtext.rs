//! reStructuredText builder
//!
//!     Works character by character. At the start of a line the builder looks for block
//!     syntax (explicit markup, tables, adornments, list markers); everything else goes
//!     through the inline rules. Line breaks inside paragraphs are kept as they are, blank
//!     line runs collapse to a single `\n`.
//!
//!     Comments, tables and literal blocks are markup. Footnotes and directives keep their
//!     body text. Inline literals, interpreted text, internal targets and references turn
//!     into one dummy each.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::annotated::AnnotatedText;
use crate::dummy::DummyGenerator;
use crate::error::MalformedInputError;
use crate::settings::Settings;

use super::{MarkupBuilder, Scanner};

static BLOCK_SEPARATOR: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(?:[ \t]*\r?\n)+").unwrap());
static INDENTATION: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[ \t]+").unwrap());

static FOOTNOTE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\.\. \[(?:[0-9]+|[#*]|#[0-9A-Za-z\-_.:+]+)\](?:[ \t\r\n]|$)").unwrap()
});
static DIRECTIVE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\.\. [0-9A-Za-z\-_.:+]+::(?:[ \t\r\n]|$)").unwrap());
static COMMENT: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\.\.(?:[ \t\r\n]|$)").unwrap());
static GRID_TABLE_START: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?:\+-{3,}){2,}\+\r?\n").unwrap());
static SIMPLE_TABLE_START: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^={3,}(?: +={3,})+\r?\n").unwrap());
static SECTION_TITLE_ADORNMENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"^(?:={3,}|-{3,}|`{3,}|:{3,}|\.{3,}|'{3,}|"{3,}|~{3,}|\^{3,}|_{3,}|\*{3,}|\+{3,}|#{3,})\r?\n"#,
    )
    .unwrap()
});
static LINE_BLOCK: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\|[ \t]+").unwrap());
static BULLET_LIST: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[*+\-\u{2022}\u{2023}\u{2043}][ \t]+").unwrap());
static ENUMERATED_LIST: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^(?:(?:[0-9]+|[A-Za-z#]|[IVXLCDM]+|[ivxlcdm]+)\.|\(?(?:[0-9]+|[A-Za-z#]|[IVXLCDM]+|[ivxlcdm]+)\))[ \t]+",
    )
    .unwrap()
});
static FIELD_MARKER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^:[0-9A-Za-z][^:\r\n]*:(?:[ \t]+|(?m:$))").unwrap());

static STRONG_EMPHASIS: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\*\*").unwrap());
static EMPHASIS: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\*").unwrap());
static INLINE_LITERAL: Lazy<Regex> = Lazy::new(|| Regex::new(r"^``").unwrap());
static INTERPRETED_TEXT_START: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?::[0-9A-Za-z\-_.:+]+:)?`").unwrap());
static INTERPRETED_TEXT_END: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^`(?::[0-9A-Za-z\-_.:+]+:)?").unwrap());
static INTERNAL_TARGET_START: Lazy<Regex> = Lazy::new(|| Regex::new(r"^_`").unwrap());
static INTERNAL_TARGET_END: Lazy<Regex> = Lazy::new(|| Regex::new(r"^`").unwrap());
static FOOTNOTE_REFERENCE_START: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\[").unwrap());
static FOOTNOTE_REFERENCE_END: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\]_").unwrap());
static HYPERLINK_REFERENCE_START: Lazy<Regex> = Lazy::new(|| Regex::new(r"^`").unwrap());
static HYPERLINK_REFERENCE_END: Lazy<Regex> = Lazy::new(|| Regex::new(r"^`__?").unwrap());

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Edge {
    Start,
    End,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Effect {
    Markup,
    OpenDummy,
    CloseDummy,
}

/// Inline rules in priority order.
static INLINE_RULES: [(&Lazy<Regex>, Edge, Effect); 14] = [
    (&STRONG_EMPHASIS, Edge::Start, Effect::Markup),
    (&STRONG_EMPHASIS, Edge::End, Effect::Markup),
    (&EMPHASIS, Edge::Start, Effect::Markup),
    (&EMPHASIS, Edge::End, Effect::Markup),
    (&INLINE_LITERAL, Edge::Start, Effect::OpenDummy),
    (&INLINE_LITERAL, Edge::End, Effect::CloseDummy),
    (&INTERPRETED_TEXT_START, Edge::Start, Effect::OpenDummy),
    (&INTERPRETED_TEXT_END, Edge::End, Effect::CloseDummy),
    (&INTERNAL_TARGET_START, Edge::Start, Effect::OpenDummy),
    (&INTERNAL_TARGET_END, Edge::End, Effect::CloseDummy),
    (&FOOTNOTE_REFERENCE_START, Edge::Start, Effect::OpenDummy),
    (&FOOTNOTE_REFERENCE_END, Edge::End, Effect::CloseDummy),
    (&HYPERLINK_REFERENCE_START, Edge::Start, Effect::OpenDummy),
    (&HYPERLINK_REFERENCE_END, Edge::End, Effect::CloseDummy),
];

fn is_line_space(ch: char) -> bool {
    matches!(ch, ' ' | '\t' | '\r' | '\n')
}

fn may_precede_inline_start(ch: char) -> bool {
    is_line_space(ch) || matches!(ch, '-' | ':' | '/' | '\'' | '"' | '<' | '(' | '[' | '{')
}

fn may_follow_inline_end(ch: char) -> bool {
    is_line_space(ch)
        || matches!(
            ch,
            '-' | '.' | ',' | ':' | ';' | '!' | '?' | '\\' | '/' | '\'' | '"' | ')' | ']' | '}'
                | '>'
        )
}

fn may_start_inline_markup(ch: char) -> bool {
    matches!(ch, '*' | '`' | ':' | '_' | '[' | ']')
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Block {
    Paragraph,
    Footnote,
    Directive,
    Comment,
    GridTable,
    SimpleTable,
    /// Indented block after a paragraph ending in `::`; holds that paragraph's indentation.
    Literal(usize),
}

impl Block {
    fn is_explicit(self) -> bool {
        matches!(self, Block::Footnote | Block::Directive | Block::Comment)
    }

    fn is_markup(self) -> bool {
        matches!(
            self,
            Block::Comment | Block::GridTable | Block::SimpleTable | Block::Literal(_)
        )
    }
}

pub struct RestructuredtextBuilder {
    scanner: Scanner,
    language: String,
    dummy_counter: usize,
    indentation: usize,
    last_indentation: usize,
    block: Block,
    in_ignored_markup: bool,
    literal_after: Option<usize>,
}

impl RestructuredtextBuilder {
    pub fn new(settings: &Settings) -> Self {
        Self {
            scanner: Scanner::new("restructuredtext"),
            language: settings.language().to_string(),
            dummy_counter: 0,
            indentation: 0,
            last_indentation: 0,
            block: Block::Paragraph,
            in_ignored_markup: false,
            literal_after: None,
        }
    }

    fn generate_dummy(&mut self) -> String {
        let dummy = DummyGenerator::SINGULAR.generate(&self.language, self.dummy_counter);
        self.dummy_counter += 1;
        dummy
    }

    fn process_character(&mut self) {
        let at_line_start = self.scanner.is_start_of_line();
        let mut start_of_block = false;

        if at_line_start {
            start_of_block = self.process_start_of_block();
            self.process_indentation();
            if self.scanner.at_end() {
                return;
            }
        }

        if start_of_block {
            self.in_ignored_markup = false;
            if self.ends_block() {
                self.block = Block::Paragraph;
            }
            if let Some(base) = self.literal_after.take() {
                if self.indentation > base {
                    self.block = Block::Literal(base);
                }
            }
        }

        if at_line_start && self.process_start_of_line() {
            return;
        }
        if self.block.is_markup() {
            let len = self.scanner.line_len();
            self.scanner.add_markup(len);
        } else {
            self.process_inline();
        }
    }

    fn process_start_of_block(&mut self) -> bool {
        let separator = self.scanner.match_len(&BLOCK_SEPARATOR);
        if separator > 0 {
            let before = &self.scanner.code()[..self.scanner.pos()];
            if self.block == Block::Paragraph && before.trim_end().ends_with("::") {
                self.literal_after = Some(self.indentation);
            }
            self.scanner.add_markup_as(separator, "\n");
            true
        } else {
            self.scanner.pos() == 0
        }
    }

    fn process_indentation(&mut self) {
        let whitespace = self.scanner.match_len(&INDENTATION);
        self.last_indentation = self.indentation;
        self.indentation = whitespace;
        self.scanner.add_markup(whitespace);
    }

    /// Whether the block starting at the cursor leaves the current block.
    fn ends_block(&self) -> bool {
        match self.block {
            Block::GridTable | Block::SimpleTable => true,
            Block::Literal(base) => self.indentation <= base,
            block if block.is_explicit() => {
                self.indentation == 0 || self.indentation < self.last_indentation
            }
            _ => false,
        }
    }

    fn process_start_of_line(&mut self) -> bool {
        let explicit = [
            (&FOOTNOTE, Block::Footnote),
            (&DIRECTIVE, Block::Directive),
            (&COMMENT, Block::Comment),
            (&GRID_TABLE_START, Block::GridTable),
            (&SIMPLE_TABLE_START, Block::SimpleTable),
        ];
        for (regex, block) in explicit {
            let len = self.scanner.match_len(regex);
            if len > 0 {
                self.block = block;
                self.scanner.add_markup(len);
                return true;
            }
        }

        let mut len = self.scanner.match_len(&SECTION_TITLE_ADORNMENT);
        if len == 0 {
            len = self.line_block_marker_len();
        }
        if len == 0 {
            len = self.scanner.match_len(&BULLET_LIST);
        }
        if len == 0 {
            len = self.scanner.match_len(&ENUMERATED_LIST);
        }
        if len == 0 && self.block == Block::Paragraph {
            len = self.scanner.match_len(&FIELD_MARKER);
        }
        self.scanner.add_markup(len);
        len > 0
    }

    /// `| ` starts a line-block line unless the rest of the line is empty or ends in `|`.
    fn line_block_marker_len(&self) -> usize {
        let len = self.scanner.match_len(&LINE_BLOCK);
        if len == 0 {
            return 0;
        }
        let line = self.scanner.rest().lines().next().unwrap_or_default();
        let after_bar = line[1..].trim_end_matches('\r');
        let valid = after_bar.len() >= 2 && !after_bar.ends_with('|');
        if valid {
            len
        } else {
            0
        }
    }

    fn inline_start(&self, regex: &Regex) -> usize {
        if self
            .scanner
            .previous()
            .is_some_and(|ch| !may_precede_inline_start(ch))
        {
            return 0;
        }
        let len = self.scanner.match_len(regex);
        if len == 0 || self.scanner.pos() == 0 || self.scanner.peek().is_none() {
            return len;
        }
        let following = self.scanner.rest()[len..].chars().next();
        if !following.is_some_and(|ch| !is_line_space(ch)) {
            return 0;
        }
        let forbidden = match self.scanner.previous() {
            Some('\'') => '\'',
            Some('"') => '"',
            Some('<') => '>',
            Some('(') => ')',
            Some('[') => ']',
            Some('{') => '}',
            _ => return len,
        };
        if self.scanner.peek() == Some(forbidden) {
            0
        } else {
            len
        }
    }

    fn inline_end(&self, regex: &Regex) -> usize {
        if !self.scanner.previous().is_some_and(|ch| !is_line_space(ch)) {
            return 0;
        }
        let len = self.scanner.match_len(regex);
        if len == 0 {
            return 0;
        }
        match self.scanner.rest()[len..].chars().next() {
            None => len,
            Some(ch) if may_follow_inline_end(ch) => len,
            Some(_) => 0,
        }
    }

    fn process_inline(&mut self) {
        for (regex, edge, effect) in &INLINE_RULES {
            let len = match edge {
                Edge::Start => self.inline_start(regex),
                Edge::End => self.inline_end(regex),
            };
            if len == 0 {
                continue;
            }
            match effect {
                Effect::Markup => self.scanner.add_markup(len),
                Effect::OpenDummy => {
                    let dummy = self.generate_dummy();
                    self.scanner.add_markup_as(len, &dummy);
                    self.in_ignored_markup = true;
                }
                Effect::CloseDummy => {
                    self.scanner.add_markup(len);
                    self.in_ignored_markup = false;
                }
            }
            return;
        }

        if !self.in_ignored_markup && self.scanner.starts_with("::") {
            let rest = &self.scanner.rest()[2..];
            if rest.is_empty() || rest.starts_with('\n') || rest.starts_with("\r\n") {
                // `Paragraph::` reads as `Paragraph:`, a lone `::` disappears
                if self.scanner.previous().map_or(true, is_line_space) {
                    self.scanner.add_markup(2);
                } else {
                    self.scanner.add_text(1);
                    self.scanner.add_markup(1);
                }
                return;
            }
        }

        let len = self.run_len();
        if self.in_ignored_markup {
            self.scanner.add_markup(len);
        } else {
            self.scanner.add_text(len);
        }
    }

    /// Length of the plain run at the cursor: up to the next character that may start
    /// inline markup, or through the end of the line.
    fn run_len(&self) -> usize {
        let mut len = 0;
        for (index, ch) in self.scanner.rest().char_indices() {
            if index > 0 && may_start_inline_markup(ch) {
                break;
            }
            len = index + ch.len_utf8();
            if ch == '\n' {
                break;
            }
        }
        len
    }
}

impl MarkupBuilder for RestructuredtextBuilder {
    fn add_code(&mut self, code: &str) -> Result<(), MalformedInputError> {
        self.scanner.load(code);
        while !self.scanner.at_end() {
            let last_pos = self.scanner.pos();
            self.process_character();
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
