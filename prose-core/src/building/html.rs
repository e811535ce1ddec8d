//! HTML builder
//!
//!     Tags, comments and declarations are markup. Block elements read as paragraph
//!     breaks, `<br>` and `<li>` as line breaks, everything else as nothing. The bodies of
//!     `<script>` and `<style>` are markup too. Character references read as the
//!     character they name, and whitespace runs collapse into one space.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::annotated::AnnotatedText;
use crate::error::MalformedInputError;

use super::{entities, MarkupBuilder, Scanner};

static COMMENT: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)^<!--.*?(?:-->|\z)").unwrap());
static DECLARATION: Lazy<Regex> = Lazy::new(|| Regex::new(r"^<[!?][^>]*>?").unwrap());
static START_TAG: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"^<([A-Za-z][A-Za-z0-9-]*)(?:[^>"']|"[^"]*"|'[^']*')*>"#).unwrap()
});
static END_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"^</[A-Za-z][A-Za-z0-9-]*[^>]*>").unwrap());
static ENTITY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^&(?:#[0-9]{1,7}|#[xX][0-9a-fA-F]{1,6}|[A-Za-z][A-Za-z0-9]{1,31});").unwrap()
});
static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[ \t\r\n]+").unwrap());
static WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[^<& \t\r\n]+").unwrap());

/// Elements whose content is never prose.
const RAW_TEXT_ELEMENTS: &[&str] = &["script", "style"];

fn interpretation(element: &str) -> &'static str {
    match element {
        "body" | "div" | "h1" | "h2" | "h3" | "h4" | "h5" | "h6" | "p" | "table" | "tr" => "\n\n",
        "br" | "li" => "\n",
        _ => "",
    }
}

pub struct HtmlBuilder {
    scanner: Scanner,
    last_space: bool,
}

impl Default for HtmlBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl HtmlBuilder {
    pub fn new() -> Self {
        Self {
            scanner: Scanner::new("html"),
            last_space: false,
        }
    }

    fn text(&mut self, len: usize) {
        let last = self.scanner.slice(len).chars().next_back();
        self.scanner.add_text(len);
        if let Some(last) = last {
            self.last_space = last.is_whitespace();
        }
    }

    fn markup_as(&mut self, len: usize, interpret_as: &str) {
        self.scanner.add_markup_as(len, interpret_as);
        if let Some(last) = interpret_as.chars().next_back() {
            self.last_space = last.is_whitespace();
        }
    }

    fn start_tag(&mut self, len: usize, name: &str) {
        self.markup_as(len, interpretation(name));
        if RAW_TEXT_ELEMENTS.contains(&name) {
            let closing = format!("</{name}");
            let body = self
                .scanner
                .rest()
                .to_ascii_lowercase()
                .find(&closing)
                .unwrap_or(self.scanner.rest().len());
            self.scanner.add_markup(body);
        }
    }

    fn entity(&mut self) {
        let len = self.scanner.match_len(&ENTITY);
        match entities::decode(self.scanner.slice(len)) {
            Some(decoded) if len > 0 => self.markup_as(len, &decoded),
            _ => self.text(1),
        }
    }

    fn process(&mut self) {
        let Some(ch) = self.scanner.current() else {
            return;
        };
        match ch {
            '<' => {
                let comment = self.scanner.match_len(&COMMENT);
                if comment > 0 {
                    self.scanner.add_markup(comment);
                    return;
                }
                let declaration = self.scanner.match_len(&DECLARATION);
                if declaration > 0 {
                    self.scanner.add_markup(declaration);
                    return;
                }
                let end_tag = self.scanner.match_len(&END_TAG);
                if end_tag > 0 {
                    self.scanner.add_markup(end_tag);
                    return;
                }
                let start_tag = self
                    .scanner
                    .captures(&START_TAG)
                    .map(|captures| (captures[0].len(), captures[1].to_ascii_lowercase()));
                match start_tag {
                    Some((len, name)) => self.start_tag(len, &name),
                    None => self.text(1),
                }
            }
            '&' => self.entity(),
            ' ' | '\t' | '\r' | '\n' => {
                let len = self.scanner.match_len(&WHITESPACE);
                let space = if self.last_space { "" } else { " " };
                self.markup_as(len, space);
            }
            _ => {
                let len = self.scanner.match_len(&WORD);
                self.text(len);
            }
        }
    }
}

impl MarkupBuilder for HtmlBuilder {
    fn add_code(&mut self, code: &str) -> Result<(), MalformedInputError> {
        self.scanner.load(code);
        while !self.scanner.at_end() {
            let last_pos = self.scanner.pos();
            self.process();
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

    fn plain(code: &str) -> String {
        let mut builder = HtmlBuilder::new();
        builder.set_strict(true);
        builder.add_code(code).unwrap();
        let annotated = builder.build();
        assert_eq!(annotated.original_text(), code);
        annotated.plain_text().to_string()
    }

    #[test]
    fn document_structure() {
        let code = "<html>\n  <head>\n    <title>Title</title>\n  </head>\n  <body style=\"color:red;\">\n    This is a <b>test</b>.\n    <!-- This is a comment. -->\n  </body>\n</html>";
        assert_eq!(plain(code), " Title \n\nThis is a test. ");
    }

    #[rstest]
    #[case(
        "<html><body>This is a te<script>abc</script>st.</body></html>\n",
        "\n\nThis is a test. "
    )]
    #[case("<html><body>This is a te<br/>st.</body></html>\n", "\n\nThis is a te\nst. ")]
    #[case(
        "<html><body>This is a test &amp; another test.</body></html>\n",
        "\n\nThis is a test & another test. "
    )]
    #[case(
        "<html>\r\n  <body>\r\n    This is a test.\r\n  </body>\r\n</html>\r\n",
        " \n\nThis is a test. "
    )]
    #[case("<!DOCTYPE html>\n<p>K\u{e4}se &uuml;ber alles.</p>", " \n\nK\u{e4}se \u{fc}ber alles.")]
    #[case("<ul><li>One</li><li>Two</li></ul>", "\nOne\nTwo")]
    #[case("<STYLE>p { color: red; }</STYLE><P>Text.</P>", "\n\nText.")]
    fn elements(#[case] code: &str, #[case] expected: &str) {
        assert_eq!(plain(code), expected);
    }

    #[rstest]
    #[case("a < b && c")]
    #[case("Unclosed <!-- comment")]
    #[case("<script>never closed")]
    #[case("<p title='a > b'>x</p>")]
    fn malformed_input_is_kept(#[case] code: &str) {
        plain(code);
    }
}
