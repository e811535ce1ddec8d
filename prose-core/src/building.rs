//! Annotated-text builders, one per markup dialect
//!
//!     A builder walks the source of one fragment with a forward-only cursor and turns it
//!     into an [`AnnotatedText`]. All dialects share the same loop shape: look at the
//!     character under the cursor, try the dialect's patterns in order, emit text or markup
//!     for exactly the bytes consumed, repeat. The shared [`Scanner`] owns that loop's
//!     bookkeeping so each dialect only describes what to do with a match.
//!
//! Progress
//!
//!     Every step must consume at least one byte. A step that does not is a parser bug; in
//!     lenient mode the scanner logs it and consumes one character as markup, in strict
//!     mode it fails with [`MalformedInputError`].
//!
//! Dispatch
//!
//!     [`builder_for`] maps a dialect id to its builder. Program languages get the comment
//!     builder, which feeds comment bodies to a nested Markdown (or reStructuredText)
//!     builder. Unknown ids are treated as plain text.

use regex::{Captures, Regex};

use crate::annotated::{AnnotatedText, AnnotatedTextBuilder};
use crate::dummy::DummyGenerator;
use crate::error::MalformedInputError;
use crate::settings::Settings;

mod entities;
pub mod html;
pub mod latex;
pub mod markdown;
pub mod org;
pub mod plaintext;
pub mod program;
pub mod restructuredtext;

pub use html::HtmlBuilder;
pub use latex::LatexBuilder;
pub use markdown::MarkdownBuilder;
pub use org::OrgBuilder;
pub use plaintext::{NopBuilder, PlaintextBuilder};
pub use program::ProgramBuilder;
pub use restructuredtext::RestructuredtextBuilder;

/// Dialect ids handled by the LaTeX builder.
pub const LATEX_DIALECTS: &[&str] = &[
    "bib",
    "bibtex",
    "context",
    "context.tex",
    "latex",
    "plaintex",
    "rsweave",
    "tex",
];

/// Dialect ids handled by the Markdown builder.
pub const MARKDOWN_DIALECTS: &[&str] = &["markdown", "rmd"];

/// What to do with a recognised construct, as configured by users.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Drop the construct's syntax only; its content is read as running text.
    Default,
    /// Drop the construct including its content.
    Ignore,
    /// Replace the whole construct by a placeholder word.
    Dummy(DummyGenerator),
}

impl Action {
    /// Parse a settings value.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "default" => Some(Action::Default),
            "ignore" => Some(Action::Ignore),
            "dummy" => Some(Action::Dummy(DummyGenerator::SINGULAR)),
            "pluralDummy" => Some(Action::Dummy(DummyGenerator::PLURAL)),
            "vowelDummy" => Some(Action::Dummy(DummyGenerator::VOWEL)),
            _ => None,
        }
    }
}

/// A markup-aware converter from source code to annotated text.
pub trait MarkupBuilder: Send {
    /// Parse `code` and append the resulting parts.
    fn add_code(&mut self, code: &str) -> Result<(), MalformedInputError>;

    /// Append markup that does not come from parsing, e.g. comment delimiters.
    fn add_markup(&mut self, raw: &str, interpret_as: &str);

    /// Fail instead of recovering when a step makes no progress.
    fn set_strict(&mut self, strict: bool);

    fn build(&self) -> AnnotatedText;
}

/// Create the builder for `dialect`, configured from `settings`.
pub fn builder_for(dialect: &str, settings: &Settings) -> Box<dyn MarkupBuilder> {
    if LATEX_DIALECTS.contains(&dialect) {
        return Box::new(LatexBuilder::new(dialect, settings));
    }
    if MARKDOWN_DIALECTS.contains(&dialect) {
        return Box::new(MarkdownBuilder::new(settings));
    }
    match dialect {
        "restructuredtext" => Box::new(RestructuredtextBuilder::new(settings)),
        "org" => Box::new(OrgBuilder::new(settings)),
        "html" => Box::new(HtmlBuilder::new()),
        "nop" => Box::new(NopBuilder::new()),
        "plaintext" => Box::new(PlaintextBuilder::new()),
        other => match ProgramBuilder::new(other, settings) {
            Some(builder) => Box::new(builder),
            None => {
                tracing::warn!(dialect = other, "unsupported dialect, checking as plain text");
                Box::new(PlaintextBuilder::new())
            }
        },
    }
}

/// Convenience wrapper: build the annotated text of `code` in one go.
pub fn annotate(dialect: &str, code: &str, settings: &Settings) -> AnnotatedText {
    let mut builder = builder_for(dialect, settings);
    if let Err(err) = builder.add_code(code) {
        tracing::warn!(dialect, error = %err, "builder gave up on malformed input");
    }
    builder.build()
}

/// Cursor over the code handed to one `add_code` call, plus the part collector.
#[derive(Debug)]
pub(crate) struct Scanner {
    dialect: &'static str,
    out: AnnotatedTextBuilder,
    code: String,
    pos: usize,
    strict: bool,
}

impl Scanner {
    pub(crate) fn new(dialect: &'static str) -> Self {
        Self {
            dialect,
            out: AnnotatedTextBuilder::new(),
            code: String::new(),
            pos: 0,
            strict: false,
        }
    }

    pub(crate) fn set_strict(&mut self, strict: bool) {
        self.strict = strict;
    }

    /// Start scanning a new chunk. Parts emitted so far are kept.
    pub(crate) fn load(&mut self, code: &str) {
        self.code = code.to_string();
        self.pos = 0;
    }

    pub(crate) fn pos(&self) -> usize {
        self.pos
    }

    pub(crate) fn code(&self) -> &str {
        &self.code
    }

    pub(crate) fn rest(&self) -> &str {
        &self.code[self.pos..]
    }

    pub(crate) fn at_end(&self) -> bool {
        self.pos >= self.code.len()
    }

    pub(crate) fn current(&self) -> Option<char> {
        self.rest().chars().next()
    }

    /// The character right after the current one.
    pub(crate) fn peek(&self) -> Option<char> {
        let mut chars = self.rest().chars();
        chars.next();
        chars.next()
    }

    pub(crate) fn previous(&self) -> Option<char> {
        self.code[..self.pos].chars().next_back()
    }

    pub(crate) fn starts_with(&self, prefix: &str) -> bool {
        self.rest().starts_with(prefix)
    }

    pub(crate) fn is_start_of_line(&self) -> bool {
        self.pos == 0 || self.code[..self.pos].ends_with('\n')
    }

    /// Length of a non-empty match of `regex` at the cursor, or 0.
    ///
    /// Patterns are expected to be anchored with `^`.
    pub(crate) fn match_len(&self, regex: &Regex) -> usize {
        self.match_len_at(regex, self.pos)
    }

    pub(crate) fn match_len_at(&self, regex: &Regex, pos: usize) -> usize {
        self.code
            .get(pos..)
            .and_then(|rest| regex.find(rest))
            .map_or(0, |found| found.len())
    }

    pub(crate) fn captures(&self, regex: &Regex) -> Option<Captures<'_>> {
        regex
            .captures(self.rest())
            .filter(|captures| captures.get(0).is_some_and(|whole| !whole.is_empty()))
    }

    /// End of a `len`-byte step, moved forward to the next character boundary.
    fn end_of(&self, len: usize) -> usize {
        let mut end = (self.pos + len).min(self.code.len());
        while !self.code.is_char_boundary(end) {
            end += 1;
        }
        end
    }

    /// The next `len` bytes of input, widened to whole characters.
    pub(crate) fn slice(&self, len: usize) -> &str {
        &self.code[self.pos..self.end_of(len)]
    }

    pub(crate) fn add_text(&mut self, len: usize) {
        if len == 0 {
            return;
        }
        let end = self.end_of(len);
        self.out.add_text(&self.code[self.pos..end]);
        self.pos = end;
    }

    pub(crate) fn add_markup(&mut self, len: usize) {
        if len == 0 {
            return;
        }
        let end = self.end_of(len);
        self.out.add_markup(&self.code[self.pos..end]);
        self.pos = end;
    }

    /// Consume `len` bytes as markup read as `interpret_as`. With `len == 0` this inserts
    /// a synthetic part.
    pub(crate) fn add_markup_as(&mut self, len: usize, interpret_as: &str) {
        let end = self.end_of(len);
        self.out.add_markup_as(&self.code[self.pos..end], interpret_as);
        self.pos = end;
    }

    /// Append markup that is not part of the scanned chunk.
    pub(crate) fn push_external_markup(&mut self, raw: &str, interpret_as: &str) {
        self.out.add_markup_as(raw, interpret_as);
    }

    /// Consume the rest of the line, including its terminator.
    pub(crate) fn line_len(&self) -> usize {
        match self.rest().find('\n') {
            Some(index) => index + 1,
            None => self.rest().len(),
        }
    }

    /// Check that the step starting at `last_pos` consumed something.
    pub(crate) fn ensure_progress(&mut self, last_pos: usize) -> Result<(), MalformedInputError> {
        if self.pos > last_pos || self.at_end() {
            return Ok(());
        }
        let context: String = self.rest().chars().take(20).collect();
        if self.strict {
            return Err(MalformedInputError {
                dialect: self.dialect,
                offset: self.pos,
                context,
            });
        }
        tracing::warn!(
            dialect = self.dialect,
            offset = self.pos,
            context = %context,
            "builder made no progress, skipping one character"
        );
        let len = self.current().map_or(1, char::len_utf8);
        self.add_markup(len);
        Ok(())
    }

    pub(crate) fn build(&self) -> AnnotatedText {
        self.out.build()
    }
}

pub(crate) fn contains_two_line_ends(text: &str) -> bool {
    text.contains("\n\n") || text.contains("\r\n\r\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    struct Stuck {
        scanner: Scanner,
    }

    impl Stuck {
        fn run(&mut self, code: &str) -> Result<(), MalformedInputError> {
            self.scanner.load(code);
            while !self.scanner.at_end() {
                let last = self.scanner.pos();
                if self.scanner.starts_with("a") {
                    self.scanner.add_text(1);
                }
                self.scanner.ensure_progress(last)?;
            }
            Ok(())
        }
    }

    #[test]
    fn lenient_scanner_skips_stuck_characters_as_markup() {
        let mut stuck = Stuck {
            scanner: Scanner::new("test"),
        };
        stuck.run("abab").unwrap();
        let annotated = stuck.scanner.build();
        assert_eq!(annotated.plain_text(), "aa");
        assert_eq!(annotated.original_text(), "abab");
    }

    #[test]
    fn strict_scanner_reports_stuck_position() {
        let mut stuck = Stuck {
            scanner: Scanner::new("test"),
        };
        stuck.scanner.set_strict(true);
        let err = stuck.run("ab").unwrap_err();
        assert_eq!(err.offset, 1);
        assert_eq!(err.dialect, "test");
    }

    #[test]
    fn byte_steps_never_split_characters() {
        let mut scanner = Scanner::new("test");
        scanner.load("\"\u{dc}bung");
        assert_eq!(scanner.slice(2), "\"\u{dc}");
        scanner.add_markup(2);
        assert_eq!(scanner.rest(), "bung");
    }

    #[rstest]
    #[case("latex")]
    #[case("bibtex")]
    #[case("rsweave")]
    #[case("markdown")]
    #[case("rmd")]
    #[case("restructuredtext")]
    #[case("org")]
    #[case("html")]
    #[case("plaintext")]
    #[case("python")]
    #[case("rust")]
    fn factory_preserves_the_original_text(#[case] dialect: &str) {
        let code = "Some text.\n\n% comment\n# heading\n// line\n";
        let annotated = annotate(dialect, code, &Settings::default());
        assert_eq!(annotated.original_text(), code);
    }

    #[test]
    fn unknown_dialect_falls_back_to_plain_text() {
        let annotated = annotate("klingon", "Some $text$.", &Settings::default());
        assert_eq!(annotated.plain_text(), "Some $text$.");
    }

    #[test]
    fn nop_contributes_nothing() {
        let annotated = annotate("nop", "Some text.", &Settings::default());
        assert_eq!(annotated.plain_text(), "");
        assert_eq!(annotated.original_text(), "Some text.");
    }
}
