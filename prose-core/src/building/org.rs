//! Org builder
//!
//!     Works character by character like the reStructuredText builder, but tracks two
//!     stacks: the greater elements the cursor is in (blocks, drawers, tables, headlines)
//!     and the inline objects that are open (emphasis, verbatim, link descriptions).
//!
//! Line Breaks
//!
//!     Every line break is markup read as `\n`. Headlines, list items and table rows start
//!     with a synthetic `\n` and end with an extra one so each reads as its own paragraph.
//!     Table cells are separated by a blank line.
//!
//! Ignored Content
//!
//!     Comment, example, export and source blocks, property drawers and LaTeX
//!     environments are markup up to their closing line. Verbatim and code objects,
//!     LaTeX fragments, timestamps, macros, targets and links without a description turn
//!     into one dummy each.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::annotated::AnnotatedText;
use crate::dummy::DummyGenerator;
use crate::error::MalformedInputError;
use crate::settings::Settings;

use super::{MarkupBuilder, Scanner};

const TIMESTAMP: &str = r"[0-9]{4}-[0-9]{2}-[0-9]{2}[ \t]+[^ \t\r\n+\-0-9>\]]+(?:[ \t]+[0-9]{1,2}:[0-9]{2})?(?:[ \t]+(?:\+|\+\+|\.\+|-|--)[0-9]+[dhmwy]){0,2}";
const TIMESTAMP_RANGE: &str = r"[0-9]{4}-[0-9]{2}-[0-9]{2}[ \t]+[^ \t\r\n+\-0-9>\]]+[ \t]+[0-9]{1,2}:[0-9]{2}-[0-9]{1,2}:[0-9]{2}(?:[ \t]+(?:\+|\+\+|\.\+|-|--)[0-9]+[dhmwy]){0,2}";

fn regex(pattern: &str) -> Regex {
    Regex::new(pattern).unwrap()
}

static WHITESPACE: Lazy<Regex> = Lazy::new(|| regex(r"^[ \t]+"));

static HEADLINE: Lazy<Regex> = Lazy::new(|| {
    regex(r"(?i)^\*+ [ \t]*(?:(?-i:TODO|DONE)[ \t]*)?(?:\[#[A-Za-z]\][ \t]*)?")
});
static HEADLINE_COMMENT: Lazy<Regex> = Lazy::new(|| {
    regex(
        r"(?i)^\*+ [ \t]*(?:(?-i:TODO|DONE)[ \t]+)?(?:\[#[A-Za-z]\][ \t]+)?COMMENT(?:[ \t][^\r\n]*)?(?mR:$)",
    )
});
static HEADLINE_TAGS: Lazy<Regex> =
    Lazy::new(|| regex(r"^[ \t]*(?:(?::[#%0-9@A-Z_a-z]+)+:)?[ \t]*(?mR:$)"));

static AFFILIATED_KEYWORD: Lazy<Regex> = Lazy::new(|| {
    regex(r"(?i)^#\+(?:CAPTION|HEADER|NAME|PLOT|RESULTS|(?:CAPTION|RESULTS)\[[^\r\n]*?\]|ATTR_[-0-9A-Z_a-z]+): [^\r\n]*")
});

static BLOCK_BEGIN: Lazy<Regex> =
    Lazy::new(|| regex(r"(?i)^#\+BEGIN_([^ \t\r\n]+)(?:[ \t]+[^\r\n]*?)?[ \t]*(?mR:$)"));
static BLOCK_END: Lazy<Regex> = Lazy::new(|| regex(r"(?i)^#\+END_[^ \t\r\n]+[ \t]*(?mR:$)"));

static DRAWER_BEGIN: Lazy<Regex> = Lazy::new(|| regex(r"^:([-A-Z_a-z]+):[ \t]*(?mR:$)"));
static DRAWER_END: Lazy<Regex> = Lazy::new(|| regex(r"(?i)^:END:[ \t]*(?mR:$)"));

static DYNAMIC_BLOCK_BEGIN: Lazy<Regex> =
    Lazy::new(|| regex(r"(?i)^#\+BEGIN: [^ \t\r\n]+[ \t]+[^\r\n]*?[ \t]*(?mR:$)"));
static DYNAMIC_BLOCK_END: Lazy<Regex> = Lazy::new(|| regex(r"(?i)^#\+END:[ \t]*(?mR:$)"));

static FOOTNOTE_DEFINITION: Lazy<Regex> =
    Lazy::new(|| regex(r"(?i)^\[fn:(?:[0-9]+|[-A-Z_a-z]+)\][ \t]*"));

static ITEM_BULLET: Lazy<Regex> =
    Lazy::new(|| regex(r"^(?:\*|-|\+|(?:[0-9]+|[A-Za-z])[.)])"));
static ITEM_TAIL: Lazy<Regex> = Lazy::new(|| {
    regex(r"(?i)^(?:[ \t]+\[@(?:[0-9]+|[A-Za-z])\])?(?:[ \t]+\[[- \tX]\])?(?:[ \t]+[^\r\n]*?[ \t]+::)?[ \t]*")
});

static TABLE_ROW: Lazy<Regex> = Lazy::new(|| regex(r"^\|[ \t]*"));
static RULE_TABLE_ROW: Lazy<Regex> = Lazy::new(|| regex(r"^\|-[^\r\n]*"));
static TABLE_CELL_SEPARATOR: Lazy<Regex> = Lazy::new(|| regex(r"^[ \t]*\|[ \t]*"));

static LATEX_ENVIRONMENT_BEGIN: Lazy<Regex> =
    Lazy::new(|| regex(r"^\\begin\{([*0-9A-Za-z]+)\}[ \t]*"));
static LATEX_ENVIRONMENT_END: Lazy<Regex> =
    Lazy::new(|| regex(r"^\\end\{([*0-9A-Za-z]+)\}[ \t]*"));

/// Whole-line elements that are dropped without further effect.
static LINE_MARKUP: Lazy<[Regex; 8]> = Lazy::new(|| {
    [
        // babel call
        regex(r"(?i)^#\+CALL:[ \t]*[^\r\n]+?[ \t]*(?mR:$)"),
        // clock
        regex(r"(?i)^CLOCK:[ \t]*[^\r\n]+?[ \t]*(?mR:$)"),
        // diary sexp
        regex(r"^%%\([^\r\n]*"),
        regex(&format!(
            r"(?i)^(?:DEADLINE|SCHEDULED|CLOSED):[ \t]*(?:<%%\([^\r\n>]+\)>|<{ts}>|\[{ts}\]|<{ts}>--<{ts}>|<{range}>|\[{ts}\]\[{ts}\]|\[{range}\])\]*(?mR:$)",
            ts = TIMESTAMP,
            range = TIMESTAMP_RANGE,
        )),
        // comment line
        regex(r"^#(?:[ \t]+[^\r\n]*?)?(?:\r?\n|\z)"),
        // fixed-width line
        regex(r"^:(?:[ \t]+|(?mR:$))"),
        // horizontal rule
        regex(r"^-{5,}[ \t]*(?mR:$)"),
        // keyword
        regex(r"^#\+[^ \t\r\n]+?:[ \t]*[^\r\n]+?[ \t]*(?mR:$)"),
    ]
});

static LATEX_FRAGMENTS: Lazy<[Regex; 4]> = Lazy::new(|| {
    [
        regex(r"^\\[A-Za-z]+(?:\[[^\r\n{}\[\]]*\]|\{[^\r\n{}]*\})*"),
        regex(r"^\\\((?s:.)*?\\\)"),
        regex(r"^\\\[(?s:.)*?\\\]"),
        regex(r"^\$\$(?s:.)*?\$\$"),
    ]
});
static DOLLAR_MATH_CHAR: Lazy<Regex> = Lazy::new(|| regex(r#"^\$[^ \t\r\n"',.;?]\$"#));
static DOLLAR_MATH: Lazy<Regex> =
    Lazy::new(|| regex(r"^\$[^ \t\r\n$,.;](?:[^\r\n$]|\r?\n)*[^ \t\r\n$,.]\$"));

static EXPORT_SNIPPET: Lazy<Regex> = Lazy::new(|| regex(r"^@@[-0-9A-Za-z]+:[^\r\n]*?@@"));
static FOOTNOTE_REFERENCES: Lazy<[Regex; 2]> = Lazy::new(|| {
    [
        regex(r"(?i)^\[fn:[-0-9A-Z_a-z]*\]"),
        regex(r"(?i)^\[fn:[-0-9A-Z_a-z]*:[^\r\n]*?\]"),
    ]
});

/// Objects that read as a single dummy, in priority order.
static DUMMY_OBJECTS: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        // inline babel call
        regex(r"(?i)^call_[^ \t\r\n()]+(?:\[[^\r\n]*?\])?\([^\r\n]*?\)(?:\[[^\r\n]*?\])?"),
        // inline source block
        regex(r"(?i)^src_[^ \t\r\n]+(?:\[[^\r\n]*?\])?\{[^\r\n]*?\}"),
        // macro
        regex(r"^\{\{\{[A-Za-z][-0-9A-Z_a-z]*(?:\([^\r\n]*?\))?\}\}\}"),
        // statistics cookie
        regex(r"^\[[0-9]*(?:%|/[0-9]*)\]"),
        // diary timestamp
        regex(r"^<%%\([^\r\n>]+\)>"),
        regex(&format!(r"(?i)^<{ts}>--<{ts}>", ts = TIMESTAMP)),
        regex(&format!(r"(?i)^<{range}>", range = TIMESTAMP_RANGE)),
        regex(&format!(r"(?i)^\[{ts}\]--\[{ts}\]", ts = TIMESTAMP)),
        regex(&format!(r"(?i)^\[{range}\]", range = TIMESTAMP_RANGE)),
        regex(&format!(r"(?i)^<{ts}>", ts = TIMESTAMP)),
        regex(&format!(r"(?i)^\[{ts}\]", ts = TIMESTAMP)),
    ]
});

static RADIO_TARGET: Lazy<Regex> =
    Lazy::new(|| regex(r"^<<<[^ \t\r\n<>](?:[^\r\n<>]*[^ \t\r\n<>])?>>>"));
static TARGET: Lazy<Regex> =
    Lazy::new(|| regex(r"^<<[^ \t\r\n<>](?:[^\r\n<>]*[^ \t\r\n<>])?>>"));
static ANGLE_LINK: Lazy<Regex> = Lazy::new(|| regex(r"^<[A-Za-z]+:[^\r\n<>\]]+>"));
static PLAIN_LINK: Lazy<Regex> = Lazy::new(|| regex(r"^[A-Za-z]+:[^ \t\r\n()<>]+"));
static REGULAR_LINK: Lazy<Regex> = Lazy::new(|| regex(r"^\[\[[^\r\n\[\]]+\]\]"));
static REGULAR_LINK_WITH_DESCRIPTION: Lazy<Regex> =
    Lazy::new(|| regex(r"^\[\[[^\r\n\[\]]+\]\["));
static LINK_DESCRIPTION: Lazy<Regex> = Lazy::new(|| regex(r"^[^\r\n\[\]]+\]\]"));
static LINK_DESCRIPTION_END: Lazy<Regex> = Lazy::new(|| regex(r"^\]\]"));

static TEXT_MARKUP_MARKER: Lazy<Regex> = Lazy::new(|| regex(r"^[*+/=_~]"));
static VERBATIM_END: Lazy<Regex> = Lazy::new(|| regex(r"^="));
static CODE_END: Lazy<Regex> = Lazy::new(|| regex(r"^~"));

fn is_line_space(ch: char) -> bool {
    matches!(ch, ' ' | '\t' | '\r' | '\n')
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Element {
    Paragraph,
    Headline,
    CenterBlock,
    QuoteBlock,
    SpecialBlock,
    CommentBlock,
    ExampleBlock,
    ExportBlock,
    SourceBlock,
    VerseBlock,
    Drawer,
    PropertyDrawer,
    DynamicBlock,
    LatexEnvironment,
    Table,
}

impl Element {
    fn for_block(name: &str) -> Self {
        match name.to_ascii_uppercase().as_str() {
            "CENTER" => Element::CenterBlock,
            "QUOTE" => Element::QuoteBlock,
            "COMMENT" => Element::CommentBlock,
            "EXAMPLE" => Element::ExampleBlock,
            "EXPORT" => Element::ExportBlock,
            "SRC" => Element::SourceBlock,
            "VERSE" => Element::VerseBlock,
            _ => Element::SpecialBlock,
        }
    }

    /// Blocks whose content is skipped until `#+END_...`.
    fn is_verbatim_block(self) -> bool {
        matches!(
            self,
            Element::CommentBlock
                | Element::ExampleBlock
                | Element::ExportBlock
                | Element::SourceBlock
        )
    }

    fn is_ignored(self) -> bool {
        self.is_verbatim_block()
            || matches!(self, Element::PropertyDrawer | Element::LatexEnvironment)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Object {
    LinkDescription,
    Bold,
    Strikethrough,
    Italic,
    Verbatim,
    Underline,
    Code,
}

impl Object {
    fn for_marker(marker: &str) -> Option<Self> {
        Some(match marker {
            "*" => Object::Bold,
            "+" => Object::Strikethrough,
            "/" => Object::Italic,
            "=" => Object::Verbatim,
            "_" => Object::Underline,
            "~" => Object::Code,
            _ => return None,
        })
    }
}

pub struct OrgBuilder {
    scanner: Scanner,
    language: String,
    dummy_counter: usize,
    indentation: usize,
    append_at_end_of_line: &'static str,
    elements: Vec<Element>,
    latex_environment: Option<String>,
    objects: Vec<Object>,
}

impl OrgBuilder {
    pub fn new(settings: &Settings) -> Self {
        Self {
            scanner: Scanner::new("org"),
            language: settings.language().to_string(),
            dummy_counter: 0,
            indentation: 0,
            append_at_end_of_line: "",
            elements: vec![Element::Paragraph],
            latex_environment: None,
            objects: Vec::new(),
        }
    }

    fn add_dummy(&mut self, len: usize) {
        let dummy = DummyGenerator::SINGULAR.generate(&self.language, self.dummy_counter);
        self.dummy_counter += 1;
        self.scanner.add_markup_as(len, &dummy);
    }

    fn skip_character(&mut self) {
        let len = self.scanner.current().map_or(1, char::len_utf8);
        self.scanner.add_markup(len);
    }

    fn skip_line(&mut self) {
        let len = self.scanner.line_len();
        self.scanner.add_markup(len);
    }

    fn in_element(&self, element: Element) -> bool {
        self.elements.contains(&element)
    }

    fn pop_element(&mut self) {
        self.elements.pop();
        if self.elements.is_empty() {
            self.elements.push(Element::Paragraph);
        }
    }

    fn toggle_object(&mut self, object: Object) {
        if self.objects.last() == Some(&object) {
            self.objects.pop();
        } else {
            self.objects.push(object);
        }
    }

    fn process_character(&mut self) {
        let at_line_start = self.scanner.is_start_of_line();
        if at_line_start {
            let len = self.scanner.match_len(&WHITESPACE);
            self.indentation = len;
            self.scanner.add_markup(len);
            if self.scanner.at_end() {
                return;
            }
            // Text markup does not span paragraphs.
            if self.scanner.starts_with("\n") || self.scanner.starts_with("\r\n") {
                self.objects.clear();
            }
        }

        let literal_end = if self.objects.contains(&Object::Verbatim) {
            Some(&*VERBATIM_END)
        } else if self.objects.contains(&Object::Code) {
            Some(&*CODE_END)
        } else {
            None
        };

        if let Some(end) = literal_end {
            let len = self.inline_end_len(end);
            if len > 0 {
                self.objects.pop();
                self.add_dummy(len);
            } else {
                self.skip_character();
            }
        } else if at_line_start && self.process_start_of_line() {
        } else if self.elements.iter().any(|element| element.is_ignored()) {
            self.skip_line();
        } else {
            self.process_inline();
        }
    }

    fn process_start_of_line(&mut self) -> bool {
        if self.in_element(Element::Table) && self.scanner.match_len(&TABLE_ROW) == 0 {
            self.pop_element();
        }

        if self.elements.iter().any(|element| element.is_verbatim_block()) {
            self.close_or_skip_line(&BLOCK_END);
            return true;
        }
        if self.in_element(Element::PropertyDrawer) {
            self.close_or_skip_line(&DRAWER_END);
            return true;
        }
        if self.in_element(Element::LatexEnvironment) {
            let closing = self
                .scanner
                .captures(&LATEX_ENVIRONMENT_END)
                .filter(|captures| {
                    self.latex_environment.as_deref() == captures.get(1).map(|name| name.as_str())
                })
                .and_then(|captures| captures.get(0))
                .map(|whole| whole.len());
            match closing {
                Some(len) => {
                    self.pop_element();
                    self.latex_environment = None;
                    self.scanner.add_markup(len);
                }
                None => self.skip_line(),
            }
            return true;
        }

        if self.indentation == 0 {
            let len = self.scanner.match_len(&HEADLINE_COMMENT);
            if len > 0 {
                self.scanner.add_markup_as(len, "\n");
                return true;
            }
            let len = self.scanner.match_len(&HEADLINE);
            if len > 0 {
                self.elements.push(Element::Headline);
                self.append_at_end_of_line = "\n";
                self.scanner.add_markup_as(len, "\n");
                return true;
            }
        }

        let len = self.scanner.match_len(&AFFILIATED_KEYWORD);
        if len > 0 {
            self.scanner.add_markup(len);
            return true;
        }

        let block = self.scanner.captures(&BLOCK_BEGIN).and_then(|captures| {
            let name = captures.get(1)?.as_str();
            Some((captures.get(0)?.len(), Element::for_block(name)))
        });
        if let Some((len, element)) = block {
            self.elements.push(element);
            self.scanner.add_markup(len);
            return true;
        }

        for closing in [&*BLOCK_END, &*DRAWER_END, &*DYNAMIC_BLOCK_END] {
            let len = self.scanner.match_len(closing);
            if len > 0 {
                self.pop_element();
                self.scanner.add_markup(len);
                return true;
            }
        }

        let drawer = self.scanner.captures(&DRAWER_BEGIN).and_then(|captures| {
            let name = captures.get(1)?.as_str();
            let element = if name.eq_ignore_ascii_case("PROPERTIES") {
                Element::PropertyDrawer
            } else {
                Element::Drawer
            };
            Some((captures.get(0)?.len(), element))
        });
        if let Some((len, element)) = drawer {
            self.elements.push(element);
            self.scanner.add_markup(len);
            return true;
        }

        let len = self.scanner.match_len(&DYNAMIC_BLOCK_BEGIN);
        if len > 0 {
            self.elements.push(Element::DynamicBlock);
            self.scanner.add_markup(len);
            return true;
        }

        let len = self.scanner.match_len(&FOOTNOTE_DEFINITION);
        if len > 0 {
            self.scanner.add_markup(len);
            return true;
        }

        let len = match self.scanner.match_len(&RULE_TABLE_ROW) {
            0 => self.scanner.match_len(&TABLE_ROW),
            len => len,
        };
        if len > 0 {
            if !self.in_element(Element::Table) {
                self.elements.push(Element::Table);
            }
            self.append_at_end_of_line = "\n";
            self.scanner.add_markup_as(len, "\n");
            return true;
        }

        let len = self.item_len();
        if len > 0 {
            self.append_at_end_of_line = "\n";
            self.scanner.add_markup_as(len, "\n");
            return true;
        }

        for line in LINE_MARKUP.iter() {
            let len = self.scanner.match_len(line);
            if len > 0 {
                self.scanner.add_markup(len);
                return true;
            }
        }

        let environment = self
            .scanner
            .captures(&LATEX_ENVIRONMENT_BEGIN)
            .and_then(|captures| {
                let name = captures.get(1)?.as_str().to_string();
                Some((captures.get(0)?.len(), name))
            });
        if let Some((len, name)) = environment {
            self.elements.push(Element::LatexEnvironment);
            self.latex_environment = Some(name);
            self.scanner.add_markup(len);
            return true;
        }

        false
    }

    fn close_or_skip_line(&mut self, closing: &Regex) {
        let len = self.scanner.match_len(closing);
        if len > 0 {
            self.pop_element();
            self.scanner.add_markup(len);
        } else {
            self.skip_line();
        }
    }

    /// List item marker with its optional counter, checkbox and tag.
    fn item_len(&self) -> usize {
        let bullet = self.scanner.match_len(&ITEM_BULLET);
        if bullet == 0 {
            return 0;
        }
        let following = self.scanner.code()[self.scanner.pos() + bullet..].chars().next();
        if !matches!(following, None | Some(' ' | '\t')) {
            return 0;
        }
        bullet + self.scanner.match_len_at(&ITEM_TAIL, self.scanner.pos() + bullet)
    }

    fn process_inline(&mut self) {
        if self.in_element(Element::Headline) {
            let len = self.scanner.match_len(&HEADLINE_TAGS);
            if len > 0 {
                self.scanner.add_markup(len);
                return;
            }
        }
        if self.in_element(Element::Table) {
            let len = self.scanner.match_len(&TABLE_CELL_SEPARATOR);
            if len > 0 {
                self.scanner.add_markup_as(len, "\n\n");
                return;
            }
        }
        if self.objects.contains(&Object::LinkDescription) {
            let len = self.scanner.match_len(&LINK_DESCRIPTION_END);
            if len > 0 {
                self.objects.pop();
                self.scanner.add_markup(len);
                return;
            }
        }

        for fragment in LATEX_FRAGMENTS.iter() {
            let len = self.scanner.match_len(fragment);
            if len > 0 {
                self.add_dummy(len);
                return;
            }
        }
        let len = self.dollar_math_len();
        if len > 0 {
            self.add_dummy(len);
            return;
        }

        let len = self.scanner.match_len(&EXPORT_SNIPPET);
        if len > 0 {
            self.scanner.add_markup(len);
            return;
        }
        for reference in FOOTNOTE_REFERENCES.iter() {
            let len = self.scanner.match_len(reference);
            if len > 0 {
                self.scanner.add_markup(len);
                return;
            }
        }
        for object in DUMMY_OBJECTS.iter() {
            let len = self.scanner.match_len(object);
            if len > 0 {
                self.add_dummy(len);
                return;
            }
        }

        let link_may_start = match self.scanner.previous() {
            None | Some('\n') => true,
            Some(prev) => prev != '\r' && !prev.is_ascii_alphanumeric(),
        };
        if link_may_start {
            for target in [&*RADIO_TARGET, &*TARGET] {
                let len = self.scanner.match_len(target);
                if len > 0 {
                    self.add_dummy(len);
                    return;
                }
            }
        }
        let len = self.scanner.match_len(&ANGLE_LINK);
        if len > 0 {
            self.add_dummy(len);
            return;
        }
        if link_may_start {
            let len = self.plain_link_len();
            if len > 0 {
                self.add_dummy(len);
                return;
            }
        }
        let len = self.scanner.match_len(&REGULAR_LINK);
        if len > 0 {
            self.add_dummy(len);
            return;
        }
        let len = self.scanner.match_len(&REGULAR_LINK_WITH_DESCRIPTION);
        if len > 0
            && self
                .scanner
                .match_len_at(&LINK_DESCRIPTION, self.scanner.pos() + len)
                > 0
        {
            self.objects.push(Object::LinkDescription);
            self.scanner.add_markup(len);
            return;
        }

        let len = match self.inline_start_len() {
            0 => self.inline_end_len(&TEXT_MARKUP_MARKER),
            len => len,
        };
        if let Some(object) = Object::for_marker(self.scanner.slice(len)) {
            self.toggle_object(object);
            self.scanner.add_markup(len);
            return;
        }

        let newline = if self.scanner.starts_with("\r\n") {
            2
        } else if self.scanner.starts_with("\n") {
            1
        } else {
            0
        };
        if newline > 0 {
            let interpret_as = format!("\n{}", self.append_at_end_of_line);
            self.scanner.add_markup_as(newline, &interpret_as);
            self.append_at_end_of_line = "";
            if self.in_element(Element::Headline) {
                self.pop_element();
            }
            return;
        }

        let len = self.scanner.current().map_or(1, char::len_utf8);
        self.scanner.add_text(len);
    }

    /// Inline `$...$` math. The closing dollar must be followed by whitespace or
    /// punctuation, and the opening one must not follow another dollar.
    fn dollar_math_len(&self) -> usize {
        if self.scanner.previous() == Some('$') {
            return 0;
        }
        let candidates = [
            (&*DOLLAR_MATH_CHAR, "\"'(),.;<>?[]"),
            (&*DOLLAR_MATH, "!\"'(),.;<>?[]"),
        ];
        for (regex, punctuation) in candidates {
            let len = self.scanner.match_len(regex);
            if len == 0 {
                continue;
            }
            let following = self.scanner.rest()[len..].chars().next();
            let closes = match following {
                None => true,
                Some(ch) => is_line_space(ch) || punctuation.contains(ch),
            };
            if closes {
                return len;
            }
        }
        0
    }

    /// Plain `scheme:path` link. The link ends on a letter or on a slash after something
    /// other than punctuation, and is not followed by an alphanumeric character.
    fn plain_link_len(&self) -> usize {
        let Some(found) = PLAIN_LINK.find(self.scanner.rest()) else {
            return 0;
        };
        let candidate = found.as_str();
        let Some(colon) = candidate.find(':') else {
            return 0;
        };
        let rest = self.scanner.rest();

        let mut ends: Vec<usize> = candidate
            .char_indices()
            .map(|(index, ch)| index + ch.len_utf8())
            .filter(|end| *end > colon + 1)
            .collect();
        ends.reverse();

        for end in ends {
            let mut tail = candidate[..end].chars().rev();
            let ends_well = match (tail.next(), tail.next()) {
                (Some(last), _) if last.is_ascii_alphabetic() => true,
                (Some('/'), Some(before)) => {
                    !is_line_space(before) && !matches!(before, '!' | ',' | '.' | ';' | '?')
                }
                _ => false,
            };
            let followed_well = rest[end..]
                .chars()
                .next()
                .map_or(true, |next| !next.is_ascii_alphanumeric());
            if ends_well && followed_well {
                return end;
            }
        }
        0
    }

    fn inline_start_len(&self) -> usize {
        if let Some(prev) = self.scanner.previous() {
            if !is_line_space(prev) && !matches!(prev, '"' | '\'' | '(' | '-' | '{') {
                return 0;
            }
        }
        let len = self.scanner.match_len(&TEXT_MARKUP_MARKER);
        if len == 0 || self.scanner.pos() == 0 {
            return len;
        }
        match self.scanner.rest()[len..].chars().next() {
            None => len,
            Some(next) if !is_line_space(next) => len,
            Some(_) => 0,
        }
    }

    fn inline_end_len(&self, regex: &Regex) -> usize {
        match self.scanner.previous() {
            Some(prev) if !is_line_space(prev) => {}
            _ => return 0,
        }
        let len = self.scanner.match_len(regex);
        if len == 0 {
            return 0;
        }
        match self.scanner.rest()[len..].chars().next() {
            Some(next)
                if is_line_space(next)
                    || matches!(
                        next,
                        '!' | '"' | '\'' | ')' | ',' | '-' | '.' | ':' | ';' | '?' | '[' | '}'
                    ) =>
            {
                len
            }
            _ => 0,
        }
    }
}

impl MarkupBuilder for OrgBuilder {
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
