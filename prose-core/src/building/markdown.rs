//! Markdown builder
//!
//!     Blocks are recognised line by line: front matter, headings, fences, display math,
//!     HTML blocks, tables, list and definition items, paragraphs. Paragraph, heading and
//!     table cell contents then go through an inline pass. Only text reaches the plain
//!     text; syntax is markup.
//!
//! Line Breaks
//!
//!     A line break inside a paragraph reads as a space. Every other line break, including
//!     the one ending a paragraph, reads as `\n`, so blank lines and block boundaries stay
//!     visible to sentence splitting. List item markers and the pipes between table cells
//!     read as paragraph breaks, so neighbouring items never run into one sentence.
//!
//! Node Actions
//!
//!     Code, math, autolinks and a few block kinds are nodes whose treatment is
//!     configurable by name (`markdownNodes`). [`DEFAULT_NODES`] lists the defaults;
//!     `CodeBlock` applies to both fenced and indented code unless those are set
//!     individually.

use std::collections::{HashMap, HashSet};
use std::ops::Range;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::annotated::AnnotatedText;
use crate::dummy::DummyGenerator;
use crate::error::MalformedInputError;
use crate::settings::Settings;

use super::{entities, Action, MarkupBuilder, Scanner};

pub const DEFAULT_NODES: &[(&str, &str)] = &[
    ("AutoLink", "dummy"),
    ("Code", "dummy"),
    ("CodeBlock", "ignore"),
    ("DisplayMath", "ignore"),
    ("FencedCodeBlock", "ignore"),
    ("HtmlBlock", "ignore"),
    ("HtmlCommentBlock", "ignore"),
    ("IndentedCodeBlock", "ignore"),
    ("InlineMath", "dummy"),
    ("TableSeparator", "ignore"),
];

static QUOTE_PREFIX: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(?: {0,3}>[ ]?)+").unwrap());
static CONTINUATION_PREFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?:[ \t]*>[ ]?)*[ \t]*").unwrap());
static LEADING_WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[ \t]+").unwrap());
static INDENTED_CODE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(?: {4}|\t)").unwrap());
static FENCE_OPEN: Lazy<Regex> = Lazy::new(|| Regex::new(r"^ {0,3}(`{3,}|~{3,})(.*)$").unwrap());
static DISPLAY_MATH: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[ \t]*\$\$[ \t]*$").unwrap());
static ATX_HEADING: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^ {0,3}#{1,6}(?:[ \t]+|$)").unwrap());
static ATX_CLOSING: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?:^|[ \t]+)#+[ \t]*$").unwrap());
static THEMATIC_BREAK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^ {0,3}(?:(?:\*[ \t]*){3,}|(?:-[ \t]*){3,}|(?:_[ \t]*){3,})$").unwrap()
});
static SETEXT_UNDERLINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^ {0,3}(?:=+|-+)[ \t]*$").unwrap());
static HTML_COMMENT_START: Lazy<Regex> = Lazy::new(|| Regex::new(r"^ {0,3}<!--").unwrap());
static HTML_BLOCK_TAG: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)^ {0,3}</?(?:address|article|aside|blockquote|body|dd|details|dialog|div|dl|dt|fieldset|figcaption|figure|footer|form|h[1-6]|header|hr|html|li|main|nav|ol|p|pre|script|section|style|summary|table|tbody|td|tfoot|th|thead|tr|ul)(?:[ \t>]|/>|$)",
    )
    .unwrap()
});
static HTML_LONE_TAG: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"^ {0,3}(?:<[A-Za-z][A-Za-z0-9-]*(?:[^>"']|"[^"]*"|'[^']*')*>|</[A-Za-z][A-Za-z0-9-]*[ \t]*>)[ \t]*$"#,
    )
    .unwrap()
});
static LINK_DEFINITION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^ {0,3}\[[^\]]+\]:[ \t]*\S").unwrap());
static LINK_LABELS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^(?: {0,3}>[ ]?)* {0,3}\[([^\]]+)\]:").unwrap());
static TABLE_SEPARATOR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[ \t]*\|?[ \t]*:?-+:?[ \t]*(?:\|[ \t]*:?-+:?[ \t]*)*\|?[ \t]*$").unwrap()
});
static LIST_MARKER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[ \t]*(?:[-+*]|[0-9]{1,9}[.)])(?:[ \t]+|$)(?:\[[ xX]\](?:[ \t]+|$))?").unwrap()
});
static LIST_INTERRUPT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[ \t]*(?:[-+*]|1[.)])[ \t]+\S").unwrap());
static LIST_ITEM_START: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[ \t]*(?:[-+*]|[0-9]{1,9}[.)])[ \t]+\S").unwrap());
static DEFINITION_MARKER: Lazy<Regex> = Lazy::new(|| Regex::new(r"^ {0,3}:[ \t]+").unwrap());
static AUTOLINK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^<(?:[A-Za-z][A-Za-z0-9+.-]{1,31}:[^\s<>]*|[A-Za-z0-9.!#$%&'*+/=?^_`{|}~-]+@[A-Za-z0-9](?:[A-Za-z0-9-]*[A-Za-z0-9])?(?:\.[A-Za-z0-9](?:[A-Za-z0-9-]*[A-Za-z0-9])?)*)>",
    )
    .unwrap()
});
static INLINE_HTML: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"^(?:<!--(?s:.*?)-->|</[A-Za-z][A-Za-z0-9-]*\s*>|<[A-Za-z][A-Za-z0-9-]*(?:\s+[A-Za-z_:][A-Za-z0-9_.:-]*(?:\s*=\s*(?:"[^"]*"|'[^']*'|[^\s"'=<>`]+))?)*\s*/?>)"#,
    )
    .unwrap()
});
static ENTITY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^&(?:#[0-9]{1,7}|#[xX][0-9a-fA-F]{1,6}|[A-Za-z][A-Za-z0-9]{1,31});").unwrap()
});

/// One source line: `start..content_end` is the line without its terminator.
#[derive(Debug, Clone, Copy)]
struct Line {
    start: usize,
    content_end: usize,
    next: usize,
}

fn line_at(code: &str, start: usize) -> Line {
    match code[start..].find('\n') {
        Some(index) => {
            let newline = start + index;
            let content_end = if newline > start && code.as_bytes()[newline - 1] == b'\r' {
                newline - 1
            } else {
                newline
            };
            Line {
                start,
                content_end,
                next: newline + 1,
            }
        }
        None => Line {
            start,
            content_end: code.len(),
            next: code.len(),
        },
    }
}

/// The line after `line`, if there is one.
fn next_line(code: &str, line: Line) -> Option<Line> {
    (line.next > line.content_end && line.next < code.len()).then(|| line_at(code, line.next))
}

fn strip_quote(text: &str) -> (bool, &str) {
    match QUOTE_PREFIX.find(text) {
        Some(prefix) => (true, &text[prefix.end()..]),
        None => (false, text),
    }
}

fn is_blank(text: &str) -> bool {
    text.trim_matches([' ', '\t']).is_empty()
}

fn is_fence_close(text: &str, marker: char, len: usize) -> bool {
    let indent = text.len() - text.trim_start_matches(' ').len();
    if indent > 3 {
        return false;
    }
    let rest = &text[indent..];
    let run = rest.len() - rest.trim_start_matches(marker).len();
    run >= len && is_blank(&rest[run..])
}

fn normalize_label(label: &str) -> String {
    label.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
}

/// Offset of the `closing` that balances the `opening` at `pos`, before `limit`.
fn matching_delimiter(
    code: &str,
    pos: usize,
    limit: usize,
    opening: char,
    closing: char,
) -> Option<usize> {
    let mut depth = 0usize;
    let mut chars = code[pos..limit].char_indices();
    while let Some((index, ch)) = chars.next() {
        match ch {
            '\\' => {
                chars.next();
            }
            _ if ch == opening => depth += 1,
            _ if ch == closing => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(pos + index);
                }
            }
            _ => {}
        }
    }
    None
}

/// End of a backtick code span opening at `pos`, or `None` if it never closes.
fn code_span_end(code: &str, pos: usize, limit: usize) -> Option<usize> {
    let rest = &code[pos..limit];
    let run = rest.len() - rest.trim_start_matches('`').len();
    let mut search = pos + run;
    while search < limit {
        let offset = code[search..limit].find('`')?;
        let start = search + offset;
        let closing = code[start..limit].len() - code[start..limit].trim_start_matches('`').len();
        if closing == run {
            return Some(start + run);
        }
        search = start + closing;
    }
    None
}

/// End of `$…$` inline math opening at `pos`.
///
/// The content must not start or end with a space, the closing `$` must not be escaped,
/// and a single closing `$` must not be followed by a digit, so prices like `$3` stay
/// text.
fn inline_math_end(code: &str, pos: usize, limit: usize) -> Option<usize> {
    let body_start = pos + 1;
    let first = code[body_start..limit].chars().next()?;
    if first == ' ' {
        return None;
    }
    for (index, ch) in code[body_start..limit].char_indices() {
        let at = body_start + index;
        if ch != '$' || index == 0 {
            continue;
        }
        if matches!(code[..at].chars().next_back(), Some(' ' | '\\')) {
            continue;
        }
        let run = code[at..limit].len() - code[at..limit].trim_start_matches('$').len();
        if run >= 2 {
            return Some(at + run);
        }
        if code[at + 1..limit]
            .chars()
            .next()
            .is_some_and(|next| next.is_ascii_digit())
        {
            continue;
        }
        return Some(at + 1);
    }
    None
}

fn is_inline_special(ch: char) -> bool {
    matches!(
        ch,
        '\\' | '`' | '$' | '*' | '_' | '~' | '!' | '[' | '<' | '&' | '\n' | '\r'
    )
}

/// What a line starts, decided before any of it is consumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Block {
    Blank,
    IndentedCode,
    Fence { marker: char, len: usize },
    DisplayMath,
    AtxHeading,
    ThematicBreak,
    HtmlComment,
    Html,
    LinkDefinition,
    Table,
    ListItem(usize),
    Definition(usize),
    Paragraph,
}

pub struct MarkdownBuilder {
    scanner: Scanner,
    language: String,
    nodes: HashMap<String, Action>,
    overridden: HashSet<String>,
    link_labels: HashSet<String>,
    dummy_counter: usize,
    quoted: bool,
    in_list: bool,
    in_definitions: bool,
}

impl MarkdownBuilder {
    pub fn new(settings: &Settings) -> Self {
        let mut nodes: HashMap<String, Action> = DEFAULT_NODES
            .iter()
            .filter_map(|(name, action)| Some((name.to_string(), Action::parse(action)?)))
            .collect();
        let mut overridden = HashSet::new();
        for (name, value) in settings.markdown_nodes() {
            match Action::parse(value) {
                Some(action) => {
                    nodes.insert(name.clone(), action);
                    overridden.insert(name.clone());
                }
                None => tracing::warn!(node = %name, action = %value, "unknown Markdown node action"),
            }
        }
        Self {
            scanner: Scanner::new("markdown"),
            language: settings.language().to_string(),
            nodes,
            overridden,
            link_labels: HashSet::new(),
            dummy_counter: 0,
            quoted: false,
            in_list: false,
            in_definitions: false,
        }
    }

    fn action(&self, node: &str) -> Action {
        self.nodes.get(node).copied().unwrap_or(Action::Default)
    }

    fn code_block_action(&self, node: &str) -> Action {
        if !self.overridden.contains(node) && self.overridden.contains("CodeBlock") {
            self.action("CodeBlock")
        } else {
            self.action(node)
        }
    }

    fn generate_dummy(&mut self, generator: DummyGenerator) -> String {
        let dummy = generator.generate(&self.language, self.dummy_counter);
        self.dummy_counter += 1;
        dummy
    }

    fn line(&self) -> Line {
        line_at(self.scanner.code(), self.scanner.pos())
    }

    /// Consume a line terminator, if any, reading it as `interpret_as`.
    fn line_break(&mut self, interpret_as: &str) {
        if self.scanner.starts_with("\r\n") {
            self.scanner.add_markup(1);
        }
        if self.scanner.starts_with("\n") {
            self.scanner.add_markup_as(1, interpret_as);
        }
    }

    fn markup_line(&mut self) {
        let line = self.line();
        self.scanner.add_markup(line.content_end - line.start);
        self.line_break("\n");
    }

    fn skip_front_matter(&mut self) {
        let code = self.scanner.code();
        let first = line_at(code, 0);
        if code[..first.content_end].trim_end() != "---" {
            return;
        }
        let mut line = first;
        let mut end = None;
        while let Some(next) = next_line(code, line) {
            let text = code[next.start..next.content_end].trim_end();
            if text == "---" || text == "..." {
                end = Some(next.next);
                break;
            }
            line = next;
        }
        if let Some(end) = end {
            while self.scanner.pos() < end {
                self.markup_line();
            }
        }
    }

    fn classify(&self, line: Line) -> Block {
        let code = self.scanner.code();
        let text = &code[self.scanner.pos()..line.content_end];
        if is_blank(text) {
            return Block::Blank;
        }
        if !self.in_list && INDENTED_CODE.is_match(text) {
            return Block::IndentedCode;
        }
        if let Some(captures) = FENCE_OPEN.captures(text) {
            let fence = &captures[1];
            let marker = if fence.starts_with('`') { '`' } else { '~' };
            if marker == '~' || !captures[2].contains('`') {
                return Block::Fence {
                    marker,
                    len: fence.len(),
                };
            }
        }
        if DISPLAY_MATH.is_match(text) {
            return Block::DisplayMath;
        }
        if ATX_HEADING.is_match(text) {
            return Block::AtxHeading;
        }
        if THEMATIC_BREAK.is_match(text) {
            return Block::ThematicBreak;
        }
        if HTML_COMMENT_START.is_match(text) {
            return Block::HtmlComment;
        }
        if HTML_BLOCK_TAG.is_match(text) || HTML_LONE_TAG.is_match(text) {
            return Block::Html;
        }
        if LINK_DEFINITION.is_match(text) {
            return Block::LinkDefinition;
        }
        if text.contains('|') {
            if let Some(next) = next_line(code, line) {
                let (_, next_text) = strip_quote(&code[next.start..next.content_end]);
                if next_text.contains('|') && TABLE_SEPARATOR.is_match(next_text) {
                    return Block::Table;
                }
            }
        }
        if let Some(marker) = LIST_MARKER.find(text) {
            return Block::ListItem(marker.len());
        }
        if self.in_definitions {
            if let Some(marker) = DEFINITION_MARKER.find(text) {
                return Block::Definition(marker.len());
            }
        }
        Block::Paragraph
    }

    fn process_block(&mut self) {
        let quote = self.scanner.match_len(&QUOTE_PREFIX);
        self.quoted = quote > 0;
        self.scanner.add_markup(quote);

        let line = self.line();
        let block = self.classify(line);
        let indented = self
            .scanner
            .current()
            .is_some_and(|ch| ch == ' ' || ch == '\t');
        if !matches!(block, Block::Blank | Block::ListItem(_)) && !indented {
            self.in_list = false;
        }
        if !matches!(block, Block::Blank | Block::Definition(_)) {
            self.in_definitions = false;
        }

        match block {
            Block::Blank => self.markup_line(),
            Block::IndentedCode => self.indented_code(line),
            Block::Fence { marker, len } => self.fenced_code(line, marker, len),
            Block::DisplayMath => self.display_math(line),
            Block::AtxHeading => self.atx_heading(line),
            Block::ThematicBreak | Block::LinkDefinition => self.markup_line(),
            Block::HtmlComment => self.html_comment(line),
            Block::Html => self.html_block(line),
            Block::Table => self.table(line),
            Block::ListItem(marker) => {
                self.in_list = true;
                self.scanner.add_markup_as(marker, "\n\n");
                if is_blank(&self.scanner.code()[self.scanner.pos()..line.content_end]) {
                    self.markup_line();
                } else {
                    self.paragraph(false);
                }
            }
            Block::Definition(marker) => {
                self.scanner.add_markup(marker);
                self.paragraph(false);
            }
            Block::Paragraph => self.paragraph(true),
        }
    }

    /// Emit the lines from the cursor up to `end` as one block. Lines starting in `body`
    /// carry the content, the others are delimiters.
    fn opaque_block(&mut self, action: Action, end: usize, body: Range<usize>) {
        match action {
            Action::Ignore => {
                while self.scanner.pos() < end {
                    self.markup_line();
                }
            }
            Action::Dummy(generator) => {
                let code = self.scanner.code();
                let mut last = line_at(code, self.scanner.pos());
                while last.next < end {
                    last = line_at(code, last.next);
                }
                let len = last.content_end - self.scanner.pos();
                let dummy = self.generate_dummy(generator);
                self.scanner.add_markup_as(len, &dummy);
                self.line_break("\n");
            }
            Action::Default => {
                while self.scanner.pos() < end {
                    if body.contains(&self.scanner.pos()) {
                        let prefix = self.scanner.match_len(&CONTINUATION_PREFIX);
                        self.scanner.add_markup(prefix);
                        let line = self.line();
                        self.scanner.add_text(line.content_end - self.scanner.pos());
                        self.line_break("\n");
                    } else {
                        self.markup_line();
                    }
                }
            }
        }
    }

    fn indented_code(&mut self, first: Line) {
        let code = self.scanner.code();
        let mut end = first.next;
        let mut line = first;
        while let Some(next) = next_line(code, line) {
            let text = &code[next.start..next.content_end];
            if INDENTED_CODE.is_match(text) && !is_blank(text) {
                end = next.next;
            } else if !is_blank(text) {
                break;
            }
            line = next;
        }
        let action = self.code_block_action("IndentedCodeBlock");
        let start = self.scanner.pos();
        self.opaque_block(action, end, start..end);
    }

    fn fenced_code(&mut self, first: Line, marker: char, len: usize) {
        let code = self.scanner.code();
        let mut line = first;
        let mut body_end = code.len();
        let mut end = code.len();
        while let Some(next) = next_line(code, line) {
            let (_, text) = strip_quote(&code[next.start..next.content_end]);
            if is_fence_close(text, marker, len) {
                body_end = next.start;
                end = next.next;
                break;
            }
            line = next;
        }
        let action = self.code_block_action("FencedCodeBlock");
        self.opaque_block(action, end, first.next..body_end);
    }

    fn display_math(&mut self, first: Line) {
        let code = self.scanner.code();
        let mut line = first;
        let mut body_end = code.len();
        let mut end = code.len();
        while let Some(next) = next_line(code, line) {
            let (_, text) = strip_quote(&code[next.start..next.content_end]);
            if DISPLAY_MATH.is_match(text) {
                body_end = next.start;
                end = next.next;
                break;
            }
            line = next;
        }
        let action = self.action("DisplayMath");
        self.opaque_block(action, end, first.next..body_end);
    }

    fn html_comment(&mut self, first: Line) {
        let code = self.scanner.code();
        let mut line = first;
        let opening = self.scanner.pos() + code[self.scanner.pos()..].find("<!--").unwrap_or(0);
        let mut end = code.len();
        if code[opening..first.content_end].contains("-->") {
            end = first.next;
        } else {
            while let Some(next) = next_line(code, line) {
                if code[next.start..next.content_end].contains("-->") {
                    end = next.next;
                    break;
                }
                line = next;
            }
        }
        let action = self.action("HtmlCommentBlock");
        let start = self.scanner.pos();
        self.opaque_block(action, end, start..end);
    }

    fn html_block(&mut self, first: Line) {
        let code = self.scanner.code();
        let mut line = first;
        let mut end = first.next;
        while let Some(next) = next_line(code, line) {
            if is_blank(strip_quote(&code[next.start..next.content_end]).1) {
                break;
            }
            end = next.next;
            line = next;
        }
        let action = self.action("HtmlBlock");
        let start = self.scanner.pos();
        self.opaque_block(action, end, start..end);
    }

    fn atx_heading(&mut self, line: Line) {
        let marker = self.scanner.match_len(&ATX_HEADING);
        self.scanner.add_markup(marker);
        let text = &self.scanner.code()[self.scanner.pos()..line.content_end];
        let content_len = match ATX_CLOSING.find(text) {
            Some(closing) => closing.start(),
            None => text.trim_end_matches([' ', '\t']).len(),
        };
        let limit = self.scanner.pos() + content_len;
        self.inline(limit);
        self.scanner.add_markup(line.content_end - self.scanner.pos());
        self.line_break("\n");
    }

    fn paragraph(&mut self, may_be_term: bool) {
        let leading = self.scanner.match_len(&LEADING_WHITESPACE);
        self.scanner.add_markup(leading);

        let code = self.scanner.code();
        let mut last = self.line();
        while let Some(next) = next_line(code, last) {
            if !self.continues_paragraph(&code[next.start..next.content_end]) {
                break;
            }
            last = next;
        }
        let underline = next_line(code, last).filter(|next| {
            SETEXT_UNDERLINE.is_match(strip_quote(&code[next.start..next.content_end]).1)
        });
        let term = may_be_term && underline.is_none() && self.is_term(last);
        let limit = code[..last.content_end]
            .trim_end_matches([' ', '\t'])
            .len()
            .max(self.scanner.pos());

        self.inline(limit);
        self.scanner.add_markup(last.content_end - self.scanner.pos());
        if term {
            self.scanner.add_markup_as(0, ".");
            self.in_definitions = true;
        }
        self.line_break("\n");
        if underline.is_some() {
            let quote = self.scanner.match_len(&QUOTE_PREFIX);
            self.scanner.add_markup(quote);
            self.markup_line();
        }
    }

    fn continues_paragraph(&self, text: &str) -> bool {
        let (quoted, rest) = strip_quote(text);
        if quoted && !self.quoted {
            return false;
        }
        let Some(fence) = FENCE_OPEN.captures(rest) else {
            return !(is_blank(rest)
                || ATX_HEADING.is_match(rest)
                || THEMATIC_BREAK.is_match(rest)
                || SETEXT_UNDERLINE.is_match(rest)
                || DISPLAY_MATH.is_match(rest)
                || HTML_COMMENT_START.is_match(rest)
                || HTML_BLOCK_TAG.is_match(rest)
                || self.starts_list_item(rest)
                || DEFINITION_MARKER.is_match(rest));
        };
        fence[1].starts_with('~') || fence[2].contains('`')
    }

    /// Inside a list any item marker ends the paragraph, outside only those that may
    /// start a new list.
    fn starts_list_item(&self, text: &str) -> bool {
        if self.in_list {
            LIST_ITEM_START.is_match(text)
        } else {
            LIST_INTERRUPT.is_match(text)
        }
    }

    /// A paragraph is a definition term when the next non-blank line is a definition.
    fn is_term(&self, last: Line) -> bool {
        let code = self.scanner.code();
        let mut line = last;
        while let Some(next) = next_line(code, line) {
            let text = &code[next.start..next.content_end];
            if !is_blank(text) {
                return DEFINITION_MARKER.is_match(text);
            }
            line = next;
        }
        false
    }

    fn table(&mut self, header: Line) {
        self.table_row(header);
        let quote = self.scanner.match_len(&QUOTE_PREFIX);
        self.scanner.add_markup(quote);
        let separator = self.line();
        match self.action("TableSeparator") {
            Action::Default => self.markup_line(),
            action => self.opaque_block(action, separator.next, 0..0),
        }
        loop {
            let code = self.scanner.code();
            if self.scanner.at_end() {
                break;
            }
            let line = self.line();
            let (_, text) = strip_quote(&code[line.start..line.content_end]);
            if is_blank(text) || !text.contains('|') {
                break;
            }
            let quote = self.scanner.match_len(&QUOTE_PREFIX);
            self.scanner.add_markup(quote);
            self.table_row(line);
        }
    }

    fn table_row(&mut self, line: Line) {
        let leading = self.scanner.code()[self.scanner.pos()..line.content_end]
            .trim_start_matches([' ', '\t']);
        let skip = line.content_end - self.scanner.pos() - leading.len()
            + usize::from(leading.starts_with('|'));
        self.scanner.add_markup(skip);

        let mut cells = Vec::new();
        {
            let code = self.scanner.code();
            let mut start = self.scanner.pos();
            let mut chars = code[start..line.content_end].char_indices();
            let base = start;
            while let Some((index, ch)) = chars.next() {
                match ch {
                    '\\' => {
                        chars.next();
                    }
                    '|' => {
                        cells.push((start, base + index, true));
                        start = base + index + 1;
                    }
                    _ => {}
                }
            }
            if !is_blank(&code[start..line.content_end]) {
                cells.push((start, line.content_end, false));
            }
        }

        let last = cells.len().saturating_sub(1);
        for (index, (start, end, piped)) in cells.into_iter().enumerate() {
            let cell = &self.scanner.code()[start..end];
            let leading = cell.len() - cell.trim_start_matches([' ', '\t']).len();
            let content = cell.trim_matches([' ', '\t']).len();
            self.scanner.add_markup(leading);
            self.inline(start + leading + content);
            self.scanner.add_markup(end - self.scanner.pos());
            match (piped, index < last) {
                (true, true) => self.scanner.add_markup_as(1, "\n\n"),
                (true, false) => self.scanner.add_markup(1),
                (false, _) => {}
            }
        }
        self.scanner.add_markup(line.content_end - self.scanner.pos());
        self.line_break("\n");
    }

    /// Inline pass over the cursor's input up to `limit`.
    fn inline(&mut self, limit: usize) {
        while self.scanner.pos() < limit {
            let Some(ch) = self.scanner.current() else {
                break;
            };
            let last_pos = self.scanner.pos();
            match ch {
                '\\' => self.escape(limit),
                '`' => self.code_span(limit),
                '$' => self.inline_math(limit),
                '*' | '_' => self.emphasis(ch, limit),
                '~' if self.scanner.starts_with("~~") => self.scanner.add_markup(2),
                '!' if self.scanner.peek() == Some('[') => self.image(limit),
                '[' => self.link(limit),
                '<' => self.angle_bracket(limit),
                '&' => self.entity(limit),
                '\r' => self.scanner.add_markup(1),
                '\n' => {
                    self.scanner.add_markup_as(1, " ");
                    let prefix = self.within(&CONTINUATION_PREFIX, limit);
                    self.scanner.add_markup(prefix);
                }
                ' ' | '\t' => {
                    let rest = &self.scanner.code()[self.scanner.pos()..limit];
                    let whitespace = rest.len() - rest.trim_start_matches([' ', '\t']).len();
                    if rest[whitespace..].starts_with(['\r', '\n']) {
                        self.scanner.add_markup(whitespace);
                    } else {
                        self.text_run(limit);
                    }
                }
                _ => self.text_run(limit),
            }
            if self.scanner.pos() == last_pos {
                self.scanner.add_text(ch.len_utf8());
            }
        }
    }

    fn within(&self, regex: &Regex, limit: usize) -> usize {
        let pos = self.scanner.pos();
        regex
            .find(&self.scanner.code()[pos..limit])
            .map_or(0, |found| found.len())
    }

    /// Consume ordinary text up to the next character that may start syntax.
    fn text_run(&mut self, limit: usize) {
        let rest = &self.scanner.code()[self.scanner.pos()..limit];
        let mut len = 0;
        for (index, ch) in rest.char_indices() {
            if index > 0 && is_inline_special(ch) {
                break;
            }
            if index > 0 && (ch == ' ' || ch == '\t') {
                let after = rest[index..].trim_start_matches([' ', '\t']);
                if after.starts_with(['\r', '\n']) {
                    break;
                }
            }
            len = index + ch.len_utf8();
        }
        self.scanner.add_text(len);
    }

    fn escape(&mut self, limit: usize) {
        let next = self.scanner.code()[self.scanner.pos() + 1..limit].chars().next();
        match next {
            Some(ch) if ch.is_ascii_punctuation() => {
                self.scanner.add_markup(1);
                self.scanner.add_text(1);
            }
            Some('\r' | '\n') => self.scanner.add_markup(1),
            _ => self.scanner.add_text(1),
        }
    }

    fn code_span(&mut self, limit: usize) {
        let pos = self.scanner.pos();
        let code = self.scanner.code();
        let run = code[pos..limit].len() - code[pos..limit].trim_start_matches('`').len();
        let Some(end) = code_span_end(code, pos, limit) else {
            self.scanner.add_text(run);
            return;
        };
        match self.action("Code") {
            Action::Default => {
                self.scanner.add_markup(run);
                self.scanner.add_text(end - run - self.scanner.pos());
                self.scanner.add_markup(run);
            }
            Action::Ignore => self.scanner.add_markup(end - pos),
            Action::Dummy(generator) => {
                let dummy = self.generate_dummy(generator);
                self.scanner.add_markup_as(end - pos, &dummy);
            }
        }
    }

    fn inline_math(&mut self, limit: usize) {
        let pos = self.scanner.pos();
        let code = self.scanner.code();
        let end = if self.scanner.peek() == Some('`') {
            code_span_end(code, pos + 1, limit)
                .filter(|&end| code[end..limit].starts_with('$'))
                .map(|end| end + 1)
        } else {
            inline_math_end(code, pos, limit)
        };
        let Some(end) = end else {
            self.scanner.add_text(1);
            return;
        };
        match self.action("InlineMath") {
            Action::Default => self.scanner.add_text(end - pos),
            Action::Ignore => self.scanner.add_markup(end - pos),
            Action::Dummy(generator) => {
                let dummy = self.generate_dummy(generator);
                self.scanner.add_markup_as(end - pos, &dummy);
            }
        }
    }

    fn emphasis(&mut self, marker: char, limit: usize) {
        let pos = self.scanner.pos();
        let rest = &self.scanner.code()[pos..limit];
        let run = rest.len() - rest.trim_start_matches(marker).len();
        let before = self.scanner.previous();
        let after = rest[run..].chars().next();
        let space_before = before.map_or(true, char::is_whitespace);
        let space_after = after.map_or(true, char::is_whitespace);
        let intraword = marker == '_'
            && before.is_some_and(char::is_alphanumeric)
            && after.is_some_and(char::is_alphanumeric);
        if (space_before && space_after) || intraword {
            self.scanner.add_text(run);
        } else {
            self.scanner.add_markup(run);
        }
    }

    /// `(close bracket, end)` of a link whose text opens at `pos`.
    fn link_end(&self, pos: usize, limit: usize) -> Option<(usize, usize)> {
        let code = self.scanner.code();
        let close = matching_delimiter(code, pos, limit, '[', ']')?;
        let after = close + 1;
        if code[after..limit].starts_with('(') {
            let end = matching_delimiter(code, after, limit, '(', ')')?;
            return Some((close, end + 1));
        }
        if code[after..limit].starts_with('[') {
            let end = matching_delimiter(code, after, limit, '[', ']')?;
            return Some((close, end + 1));
        }
        self.link_labels
            .contains(&normalize_label(&code[pos + 1..close]))
            .then_some((close, after))
    }

    fn link(&mut self, limit: usize) {
        let Some((close, end)) = self.link_end(self.scanner.pos(), limit) else {
            self.scanner.add_text(1);
            return;
        };
        self.scanner.add_markup(1);
        self.inline(close);
        self.scanner.add_markup(end - self.scanner.pos());
    }

    fn image(&mut self, limit: usize) {
        match self.link_end(self.scanner.pos() + 1, limit) {
            Some((_, end)) => self.scanner.add_markup(end - self.scanner.pos()),
            None => self.scanner.add_text(1),
        }
    }

    fn angle_bracket(&mut self, limit: usize) {
        let autolink = self.within(&AUTOLINK, limit);
        if autolink > 0 {
            match self.action("AutoLink") {
                Action::Default => {
                    self.scanner.add_markup(1);
                    self.scanner.add_text(autolink - 2);
                    self.scanner.add_markup(1);
                }
                Action::Ignore => self.scanner.add_markup(autolink),
                Action::Dummy(generator) => {
                    let dummy = self.generate_dummy(generator);
                    self.scanner.add_markup_as(autolink, &dummy);
                }
            }
            return;
        }
        let html = self.within(&INLINE_HTML, limit);
        if html > 0 {
            self.scanner.add_markup(html);
        } else {
            self.scanner.add_text(1);
        }
    }

    fn entity(&mut self, limit: usize) {
        let len = self.within(&ENTITY, limit);
        let decoded = entities::decode(self.scanner.slice(len));
        match decoded {
            Some(decoded) if len > 0 => self.scanner.add_markup_as(len, &decoded),
            _ => self.scanner.add_text(1),
        }
    }
}

impl MarkupBuilder for MarkdownBuilder {
    fn add_code(&mut self, code: &str) -> Result<(), MalformedInputError> {
        self.scanner.load(code);
        self.link_labels = LINK_LABELS
            .captures_iter(code)
            .map(|captures| normalize_label(&captures[1]))
            .collect();
        self.in_list = false;
        self.in_definitions = false;
        self.skip_front_matter();
        while !self.scanner.at_end() {
            let last_pos = self.scanner.pos();
            self.process_block();
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

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::collections::BTreeMap;

    fn plain_with(code: &str, settings: &Settings) -> String {
        let mut builder = MarkdownBuilder::new(settings);
        builder.set_strict(true);
        builder.add_code(code).unwrap();
        let annotated = builder.build();
        assert_eq!(annotated.original_text(), code);
        annotated.plain_text().to_string()
    }

    fn plain(code: &str) -> String {
        plain_with(code, &Settings::default())
    }

    #[rstest]
    #[case(
        "# Heading\nParagraph with\nmultiple lines and [link](example.com)\n",
        "Heading\nParagraph with multiple lines and link\n"
    )]
    #[case("This is a  \r\ntest.\r\n", "This is a test.\n")]
    #[case(
        "# This is a &copy; Test\nAnother [day &ndash; another](example.com) sentence\n",
        "This is a \u{a9} Test\nAnother day \u{2013} another sentence\n"
    )]
    #[case(
        "This is a test: `inline code`.\n\n```\ncode block\n```\n\nThis is another sentence.\n",
        "This is a test: Dummy0.\n\n\n\n\n\nThis is another sentence.\n"
    )]
    #[case(
        "This is a test: $`E = mc^2`$.\n\n```math\na^2 + b^2 = c^2\n```\n\nThis is another test.\n",
        "This is a test: Dummy0.\n\n\n\n\n\nThis is another test.\n"
    )]
    fn basic_constructs(#[case] code: &str, #[case] expected: &str) {
        assert_eq!(plain(code), expected);
    }

    #[test]
    fn node_actions_can_be_overridden() {
        let nodes = BTreeMap::from([
            ("Code".to_string(), "default".to_string()),
            ("FencedCodeBlock".to_string(), "default".to_string()),
        ]);
        let settings = Settings::default().with_markdown_nodes(nodes);
        assert_eq!(
            plain_with(
                "This is a test: `inline code`.\n\n```\ncode block\n```\n\nThis is another sentence.\n",
                &settings
            ),
            "This is a test: inline code.\n\n\ncode block\n\n\nThis is another sentence.\n"
        );
    }

    #[test]
    fn code_block_setting_covers_both_kinds() {
        let nodes = BTreeMap::from([("CodeBlock".to_string(), "dummy".to_string())]);
        let settings = Settings::default().with_markdown_nodes(nodes);
        assert_eq!(
            plain_with("Text.\n\n    let x = 1;\n    x + 1\n", &settings),
            "Text.\n\nDummy0\n"
        );
    }

    #[test]
    fn definition_lists() {
        let code = "Term1\n: Das ist die Definition von *Term1*.\n\nTerm2\n\n: Das ist die erste Definition von *Term2*.\n: Das ist die zweite Definition von *Term2*.\n\n: Das ist die dritte Definition von *Term2*.\n";
        assert_eq!(
            plain(code),
            "Term1.\nDas ist die Definition von Term1.\n\nTerm2.\n\nDas ist die erste Definition von Term2.\nDas ist die zweite Definition von Term2.\n\nDas ist die dritte Definition von Term2.\n"
        );
    }

    #[test]
    fn tables() {
        let code = "This is a test.\n\n| First Column | Second Column |\n| ------------ | ------------- |\n| Interesting  | Super         |\n\nThis is another sentence.\n";
        assert_eq!(
            plain(code),
            "This is a test.\n\nFirst Column\n\nSecond Column\n\nInteresting\n\nSuper\n\nThis is another sentence.\n"
        );
    }

    #[rstest]
    #[case(
        "---\n# This is YAML front matter\n- test\n---\n\n# Heading\nTest sentence\n",
        "\n\n\n\n\nHeading\nTest sentence\n"
    )]
    #[case(
        "---\ntest: This is a test.\n---\n\n# Heading\nTest sentence\n",
        "\n\n\n\nHeading\nTest sentence\n"
    )]
    fn front_matter(#[case] code: &str, #[case] expected: &str) {
        assert_eq!(plain(code), expected);
    }

    #[rstest]
    #[case("This is $a$, and this is $b$.\n", "This is Dummy0, and this is Dummy1.\n")]
    #[case(
        "This is a test: $E = mc^2\n$.\nThe book is $3, not $5.\n",
        "This is a test: Dummy0. The book is $3, not $5.\n"
    )]
    #[case("Interesting: $1 \\$2 3$.\n", "Interesting: Dummy0.\n")]
    #[case(
        "This is a test.\n\n$$\na^2 + b^2 = c^2\n\n$$\n\nThis is another test.\n",
        "This is a test.\n\n\n\n\n\n\nThis is another test.\n"
    )]
    fn math(#[case] code: &str, #[case] expected: &str) {
        assert_eq!(plain(code), expected);
    }

    #[rstest]
    #[case("- First item\n- Second *item*\n", "\n\nFirst item\n\n\nSecond item\n")]
    #[case("1. First\n2. Second\n", "\n\nFirst\n\n\nSecond\n")]
    #[case("- [x] Done\n- [ ] Open\n", "\n\nDone\n\n\nOpen\n")]
    #[case("> Quoted\n> text.\n", "Quoted text.\n")]
    #[case("Title\n=====\n\nText.\n", "Title\n\n\nText.\n")]
    #[case("## Closed heading ##\n", "Closed heading\n")]
    #[case("Above\n\n***\n\nBelow\n", "Above\n\n\n\nBelow\n")]
    fn blocks(#[case] code: &str, #[case] expected: &str) {
        assert_eq!(plain(code), expected);
    }

    #[rstest]
    #[case("- first item\n- second item\n", &["first item", "second item"])]
    #[case("| a cell | b cell |\n|---|---|\n| c | d |\n", &["a cell", "b cell", "c", "d"])]
    #[case("a cell | b cell\n--- | ---\nc | d\n", &["a cell", "b cell", "c", "d"])]
    fn items_and_cells_are_separate_paragraphs(#[case] code: &str, #[case] expected: &[&str]) {
        let plain = plain(code);
        let paragraphs: Vec<&str> = plain
            .split("\n\n")
            .map(str::trim)
            .filter(|paragraph| !paragraph.is_empty())
            .collect();
        assert_eq!(paragraphs, expected);
    }

    #[rstest]
    #[case("Visit <https://example.com> now.\n", "Visit Dummy0 now.\n")]
    #[case("Hello <!-- hidden --> world.\n", "Hello  world.\n")]
    #[case("A <span class=\"x\">red</span> word.\n", "A red word.\n")]
    #[case(
        "See [the docs][docs].\n\n[docs]: https://example.com\n",
        "See the docs.\n\n\n"
    )]
    #[case("Not \\*emphasis\\*.\n", "Not *emphasis*.\n")]
    #[case("Use snake_case_names here.\n", "Use snake_case_names here.\n")]
    #[case("A **bold** and ~~struck~~ word.\n", "A bold and struck word.\n")]
    #[case("Line one\\\nline two\n", "Line one line two\n")]
    #[case("An ![image](a.png) here.\n", "An  here.\n")]
    #[case("Three * stars\n", "Three * stars\n")]
    fn inlines(#[case] code: &str, #[case] expected: &str) {
        assert_eq!(plain(code), expected);
    }

    #[test]
    fn html_blocks_are_ignored() {
        assert_eq!(
            plain("Before.\n\n<div>\nhidden\n</div>\n\n<!--\ncomment\n-->\nAfter.\n"),
            "Before.\n\n\n\n\n\n\n\n\nAfter.\n"
        );
    }

    #[test]
    fn unclosed_fence_runs_to_the_end() {
        assert_eq!(plain("Text.\n\n```\ncode\n"), "Text.\n\n\n\n");
    }

    #[test]
    fn link_text_maps_back_to_source() {
        use crate::annotated::Bias;
        let mut builder = MarkdownBuilder::new(&Settings::default());
        builder.add_code("A [link](x) word.\n").unwrap();
        let annotated = builder.build();
        let plain = annotated.plain_text();
        let start = plain.find("link").unwrap();
        assert_eq!(annotated.original_offset(start, Bias::Start), 3);
        assert_eq!(annotated.original_offset(start + 4, Bias::End), 7);
    }
}
