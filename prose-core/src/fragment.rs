//! Code fragments: splitting a document where its settings change
//!
//!     A document is checked as a sequence of fragments. Each fragment carries the dialect
//!     it is written in and the settings in effect for it. Fragments are produced in
//!     document order and never overlap. Apart from directive lines they cover the whole
//!     document.
//!
//! Directives
//!
//!     Users change settings inline with a whole-line comment holding `ltex: key=value ...`.
//!     The comment syntax depends on the dialect (see [`directive`]). The directive line,
//!     including its line terminator, belongs to no fragment; the next fragment starts on
//!     the following line with the new settings.
//!
//! Dialect Extras
//!
//!     - LaTeX: babel package options, `\selectlanguage` and language environments switch
//!       the language ([`latex`]).
//!     - Markdown: a YAML front matter `lang` key sets the document language ([`markdown`]).
//!     - Program source: comment-friendly dictionary words and disabled rules ([`program`]).

use std::ops::Range;

use crate::building::{program::CommentSyntax, LATEX_DIALECTS, MARKDOWN_DIALECTS};
use crate::settings::Settings;

pub mod directive;
pub mod latex;
pub mod markdown;
pub mod program;

pub use directive::DirectiveFragmentizer;

/// A slice of a document, checked with its own settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeFragment {
    pub dialect: String,
    pub text: String,
    /// Byte offset of `text` in the fragmentized source.
    pub offset: usize,
    pub settings: Settings,
}

impl CodeFragment {
    pub fn new(
        dialect: impl Into<String>,
        text: impl Into<String>,
        offset: usize,
        settings: Settings,
    ) -> Self {
        Self {
            dialect: dialect.into(),
            text: text.into(),
            offset,
            settings,
        }
    }

    pub fn range(&self) -> Range<usize> {
        self.offset..self.offset + self.text.len()
    }

    /// Whether a match span lies within this fragment.
    pub fn contains(&self, span: &Range<usize>) -> bool {
        span.start >= self.offset && span.end <= self.offset + self.text.len()
    }

    /// Same fragment, shifted by `delta` bytes.
    pub(crate) fn shifted(mut self, delta: usize) -> Self {
        self.offset += delta;
        self
    }
}

/// Splits source code into fragments.
pub trait Fragmentizer: Send + Sync {
    fn fragmentize(&self, code: &str, settings: &Settings) -> Vec<CodeFragment>;

    /// Refine existing fragments. Fragments of other dialects, e.g. the `nop` fragments of
    /// directive lines, pass through untouched.
    fn refragmentize(&self, dialect: &str, fragments: Vec<CodeFragment>) -> Vec<CodeFragment> {
        let mut result = Vec::with_capacity(fragments.len());
        for fragment in fragments {
            if fragment.dialect != dialect {
                result.push(fragment);
                continue;
            }
            let offset = fragment.offset;
            result.extend(
                self.fragmentize(&fragment.text, &fragment.settings)
                    .into_iter()
                    .map(|child| child.shifted(offset)),
            );
        }
        result
    }
}

/// Leaves the code in one piece.
#[derive(Debug, Clone)]
pub struct SingleFragmentizer {
    dialect: String,
}

impl SingleFragmentizer {
    pub fn new(dialect: impl Into<String>) -> Self {
        Self {
            dialect: dialect.into(),
        }
    }
}

impl Fragmentizer for SingleFragmentizer {
    fn fragmentize(&self, code: &str, settings: &Settings) -> Vec<CodeFragment> {
        vec![CodeFragment::new(&self.dialect, code, 0, settings.clone())]
    }
}

/// Create the fragmentizer for `dialect`.
pub fn fragmentizer_for(dialect: &str) -> Box<dyn Fragmentizer> {
    if LATEX_DIALECTS.contains(&dialect) {
        return Box::new(latex::LatexFragmentizer::new(dialect));
    }
    if MARKDOWN_DIALECTS.contains(&dialect) {
        return Box::new(markdown::MarkdownFragmentizer::new(dialect));
    }
    match dialect {
        "restructuredtext" => Box::new(DirectiveFragmentizer::restructuredtext()),
        "org" => Box::new(DirectiveFragmentizer::org()),
        "html" | "nop" | "plaintext" => Box::new(SingleFragmentizer::new(dialect)),
        other => match CommentSyntax::for_language(other) {
            Some(syntax) => Box::new(program::ProgramFragmentizer::new(other, &syntax)),
            None => {
                tracing::warn!(dialect = other, "unsupported dialect, checking as plain text");
                Box::new(SingleFragmentizer::new("plaintext"))
            }
        },
    }
}

/// Split `code` written in `dialect` into fragments.
pub fn fragmentize(dialect: &str, code: &str, settings: &Settings) -> Vec<CodeFragment> {
    fragmentizer_for(dialect).fragmentize(code, settings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("latex", "latex")]
    #[case("bibtex", "bibtex")]
    #[case("rsweave", "rsweave")]
    #[case("markdown", "markdown")]
    #[case("rmd", "rmd")]
    #[case("restructuredtext", "restructuredtext")]
    #[case("org", "org")]
    #[case("html", "html")]
    #[case("nop", "nop")]
    #[case("plaintext", "plaintext")]
    #[case("java", "java")]
    #[case("python", "python")]
    #[case("cobol", "plaintext")]
    fn factory_keeps_the_dialect(#[case] dialect: &str, #[case] expected: &str) {
        let fragments = fragmentize(dialect, "Some text.\n", &Settings::default());
        assert_eq!(fragments.len(), 1);
        assert_eq!(fragments[0].dialect, expected);
        assert_eq!(fragments[0].text, "Some text.\n");
    }

    #[test]
    fn single_fragmentizers_ignore_directives() {
        let code = "This is a test.\n# LTeX: language=de-DE\n% LTeX: language=en-US\n";
        let fragments = fragmentize("nop", code, &Settings::default());
        assert_eq!(fragments.len(), 1);
        assert_eq!(fragments[0].text, code);
        assert_eq!(fragments[0].offset, 0);
        assert_eq!(fragments[0].settings.language(), "en-US");
    }

    #[test]
    fn containment() {
        let fragment = CodeFragment::new("latex", "abcdef", 10, Settings::default());
        assert!(fragment.contains(&(10..16)));
        assert!(fragment.contains(&(12..13)));
        assert!(!fragment.contains(&(9..12)));
        assert!(!fragment.contains(&(15..17)));
    }
}
