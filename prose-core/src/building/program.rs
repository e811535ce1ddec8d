//! Comments in program source.
//!
//!     Only comment bodies are checked. A comment is either a run of consecutive line
//!     comments or a block comment whose delimiters sit on lines of their own (apart from
//!     whitespace). Trailing comments after code are left alone.
//!
//!     The body of each comment line is handed to an inner builder: reStructuredText for
//!     Python, Markdown everywhere else. Code between comments reads as a paragraph
//!     break, comment prefixes as line breaks.

use std::ops::Range;

use regex::Regex;

use crate::annotated::AnnotatedText;
use crate::error::MalformedInputError;
use crate::settings::Settings;

use super::{MarkdownBuilder, MarkupBuilder, RestructuredtextBuilder};

/// Comment delimiters of one language, as regex fragments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommentSyntax {
    pub block: Option<(&'static str, &'static str)>,
    pub line: Option<&'static str>,
}

impl CommentSyntax {
    pub fn for_language(language: &str) -> Option<Self> {
        let (block, line) = match language {
            "c" | "cpp" | "csharp" | "dart" | "fsharp" | "go" | "groovy" | "java"
            | "javascript" | "javascriptreact" | "kotlin" | "php" | "rust" | "scala"
            | "swift" | "typescript" | "typescriptreact" | "verilog" => {
                (Some((r"/\*\*?", r"\*\*?/")), Some(r"///?"))
            }
            "elixir" | "python" => (Some((r#"""""#, r#"""""#)), Some(r"##?")),
            "powershell" => (Some((r"<#", r"#>")), Some(r"##?")),
            "coffeescript" | "julia" | "perl" | "perl6" | "puppet" | "r" | "ruby"
            | "shellscript" => (None, Some(r"##?")),
            "lua" => (Some((r"--\[\[", r"\]\]")), Some(r"---?")),
            "elm" | "haskell" => (Some((r"\{-", r"-\}")), Some(r"---?")),
            "sql" => (None, Some(r"---?")),
            "clojure" | "lisp" => (None, Some(r";;?")),
            "matlab" => (Some((r"%\{", r"%\}")), Some(r"%%?")),
            "erlang" => (None, Some(r"%%?")),
            "fortran-modern" => (None, Some(r"c")),
            "vb" => (None, Some(r"''?")),
            _ => return None,
        };
        Some(Self { block, line })
    }

    /// Regexes for a whole-line comment holding `ltex: ...`, one per comment form.
    /// Group 1 is the directive body.
    pub fn directive_regexes(&self) -> Vec<Regex> {
        let mut patterns = Vec::new();
        if let Some((start, end)) = self.block {
            patterns.push(format!(
                r"(?mR)^[ \t]*{start}[ \t]*(?i:ltex):(.*?)[ \t]*{end}[ \t]*$"
            ));
        }
        if let Some(line) = self.line {
            patterns.push(format!(r"(?mR)^[ \t]*{line}[ \t]*(?i:ltex):(.*?)[ \t]*$"));
        }
        patterns
            .iter()
            .filter_map(|pattern| Regex::new(pattern).ok())
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CommentKind {
    Line,
    Block,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Comment {
    kind: CommentKind,
    /// The checked part: the whole run for line comments, the text between the
    /// delimiters for block comments.
    body: Range<usize>,
    end: usize,
}

struct CommentFinder {
    block: Option<(Regex, Regex, Regex)>,
    line: Option<Regex>,
}

impl CommentFinder {
    fn new(syntax: &CommentSyntax) -> Result<Self, regex::Error> {
        let block = match syntax.block {
            Some((start, end)) => Some((
                Regex::new(&format!(r"^[ \t]*(?:{start})(?:[ \t]|(?mR:$))"))?,
                Regex::new(end)?,
                Regex::new(&format!(r"^(?:{end})[ \t]*(?mR:$)"))?,
            )),
            None => None,
        };
        let line = match syntax.line {
            Some(line) => Some(Regex::new(&format!(r"^[ \t]*(?:{line})[ \t][^\r\n]*(?:\r?\n)?"))?),
            None => None,
        };
        Ok(Self { block, line })
    }

    fn find_all(&self, code: &str) -> Vec<Comment> {
        let mut comments = Vec::new();
        let mut pos = 0;
        while pos < code.len() {
            if let Some(comment) = self.block_at(code, pos) {
                pos = comment.end;
                comments.push(comment);
            } else if let Some(comment) = self.line_run_at(code, pos) {
                pos = comment.end;
                comments.push(comment);
                // Line runs end on a line start already.
                continue;
            }
            pos = match code[pos..].find('\n') {
                Some(index) => pos + index + 1,
                None => code.len(),
            };
        }
        comments
    }

    /// A block comment starting on the line at `pos`. The body ends at the first closing
    /// delimiter, which must be preceded by whitespace or a line break and end its line.
    fn block_at(&self, code: &str, pos: usize) -> Option<Comment> {
        let (start, end, closing) = self.block.as_ref()?;
        let body_start = pos + start.find(&code[pos..])?.end();
        let delimiter = body_start + end.find(&code[body_start..])?.start();

        let before = code[..delimiter].chars().next_back();
        let body_end = match before {
            Some(' ' | '\t') if delimiter > body_start => delimiter - 1,
            Some('\n') => delimiter,
            _ => return None,
        };
        let closing_len = closing.find(&code[delimiter..])?.end();
        Some(Comment {
            kind: CommentKind::Block,
            body: body_start..body_end,
            end: delimiter + closing_len,
        })
    }

    fn line_run_at(&self, code: &str, pos: usize) -> Option<Comment> {
        let line = self.line.as_ref()?;
        let mut end = pos;
        while let Some(found) = line.find(&code[end..]) {
            if found.is_empty() {
                break;
            }
            end += found.end();
            if end >= code.len() {
                break;
            }
        }
        (end > pos).then(|| Comment {
            kind: CommentKind::Line,
            body: pos..end,
            end,
        })
    }
}

/// The decoration character every non-empty line of a comment starts with, such as the
/// `*` of a doc comment. Lines that start with anything else cancel it.
fn common_first_character(comment: &str) -> Option<char> {
    let mut common = None;
    for line in comment.lines() {
        if line.is_empty() {
            continue;
        }
        let first = match line.trim_start_matches([' ', '\t']).chars().next() {
            Some(ch) if "#$%*+-/".contains(ch) => ch,
            _ => return None,
        };
        match common {
            None => common = Some(first),
            Some(previous) if previous != first => return None,
            Some(_) => {}
        }
    }
    common
}

pub struct ProgramBuilder {
    inner: Box<dyn MarkupBuilder>,
    syntax: CommentSyntax,
    finder: CommentFinder,
}

impl ProgramBuilder {
    /// `None` when `language` has no known comment syntax.
    pub fn new(language: &str, settings: &Settings) -> Option<Self> {
        let syntax = CommentSyntax::for_language(language)?;
        let finder = match CommentFinder::new(&syntax) {
            Ok(finder) => finder,
            Err(err) => {
                tracing::error!(language, error = %err, "invalid comment syntax");
                return None;
            }
        };
        let inner: Box<dyn MarkupBuilder> = if language == "python" {
            Box::new(RestructuredtextBuilder::new(settings))
        } else {
            Box::new(MarkdownBuilder::new(settings))
        };
        Some(Self {
            inner,
            syntax,
            finder,
        })
    }

    fn add_comment(&mut self, comment: &str, kind: CommentKind) -> Result<(), MalformedInputError> {
        let decoration = common_first_character(comment)
            .map(|ch| format!("{}?", regex::escape(&ch.to_string())))
            .unwrap_or_default();
        let marker = match (kind, self.syntax.line) {
            (CommentKind::Line, Some(line)) => format!("(?:{line})"),
            _ => String::new(),
        };
        let prefix = match Regex::new(&format!(r"^[ \t]*{marker}{decoration}[ \t]*")) {
            Ok(prefix) => prefix,
            Err(err) => {
                tracing::error!(error = %err, "invalid comment prefix pattern");
                self.inner.add_markup(comment, "\n\n");
                return Ok(());
            }
        };

        let mut cur = 0;
        let mut line_start = 0;
        for line in comment.split_inclusive('\n') {
            let content = line.trim_end_matches('\n').trim_end_matches('\r');
            if let Some(found) = prefix.find(content) {
                let content_start = line_start + found.end();
                let content_end = line_start + content.len();
                self.inner.add_markup(&comment[cur..content_start], "\n");
                self.inner.add_code(&comment[content_start..content_end])?;
                cur = content_end;
            }
            line_start += line.len();
        }

        if kind == CommentKind::Block {
            self.inner.add_markup(&comment[cur..], "\n");
        } else if cur < comment.len() {
            self.inner.add_markup(&comment[cur..], "");
        }
        Ok(())
    }
}

impl MarkupBuilder for ProgramBuilder {
    fn add_code(&mut self, code: &str) -> Result<(), MalformedInputError> {
        let mut cur = 0;
        for comment in self.finder.find_all(code) {
            self.inner.add_markup(&code[cur..comment.body.start], "\n\n");
            self.add_comment(&code[comment.body.clone()], comment.kind)?;
            cur = comment.body.end;
        }
        if cur < code.len() {
            self.inner.add_markup(&code[cur..], "");
        }
        Ok(())
    }

    fn add_markup(&mut self, raw: &str, interpret_as: &str) {
        self.inner.add_markup(raw, interpret_as);
    }

    fn set_strict(&mut self, strict: bool) {
        self.inner.set_strict(strict);
    }

    fn build(&self) -> AnnotatedText {
        self.inner.build()
    }
}
