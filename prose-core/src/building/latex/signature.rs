//! Command and environment signatures
//!
//!     A signature is written the way users write it in settings: a literal prefix followed
//!     by argument shapes, e.g. `\cite[]{}` or `\begin{tabular}{}`. Matching walks the
//!     arguments with a bracket-balancing scanner, skipping `%` comments between them.

use std::ops::Range;

use once_cell::sync::Lazy;
use regex::Regex;

pub use crate::building::Action;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgumentKind {
    Brace,
    Bracket,
    Parenthesis,
}

impl ArgumentKind {
    fn open(self) -> char {
        match self {
            ArgumentKind::Brace => '{',
            ArgumentKind::Bracket => '[',
            ArgumentKind::Parenthesis => '(',
        }
    }

    fn marker(self) -> &'static str {
        match self {
            ArgumentKind::Brace => "{}",
            ArgumentKind::Bracket => "[]",
            ArgumentKind::Parenthesis => "()",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSignature {
    prefix: String,
    arguments: Vec<ArgumentKind>,
    action: Action,
}

impl CommandSignature {
    /// Parse a prototype such as `\cite[]{}`. Returns `None` for an empty prototype.
    pub fn parse(prototype: &str, action: Action) -> Option<Self> {
        let mut prefix = prototype;
        let mut arguments = Vec::new();
        'strip: loop {
            for kind in [
                ArgumentKind::Brace,
                ArgumentKind::Bracket,
                ArgumentKind::Parenthesis,
            ] {
                if let Some(stripped) = prefix.strip_suffix(kind.marker()) {
                    if !stripped.is_empty() {
                        prefix = stripped;
                        arguments.push(kind);
                        continue 'strip;
                    }
                }
            }
            break;
        }
        if prefix.is_empty() {
            tracing::warn!(prototype, "ignoring invalid command prototype");
            return None;
        }
        arguments.reverse();
        Some(Self {
            prefix: prefix.to_string(),
            arguments,
            action,
        })
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn arguments(&self) -> &[ArgumentKind] {
        &self.arguments
    }

    pub fn action(&self) -> Action {
        self.action
    }

    /// End offset of a match starting at `pos`, if the signature matches there.
    pub fn match_at(&self, code: &str, pos: usize) -> Option<usize> {
        self.match_with_arguments(code, pos).map(|(end, _)| end)
    }

    /// Like [`match_at`](Self::match_at), also returning the argument ranges.
    pub fn match_with_arguments(
        &self,
        code: &str,
        pos: usize,
    ) -> Option<(usize, Vec<Range<usize>>)> {
        if !code.get(pos..)?.starts_with(&self.prefix) {
            return None;
        }
        let mut pos = pos + self.prefix.len();
        let mut ranges = Vec::with_capacity(self.arguments.len());
        for &kind in &self.arguments {
            pos += comment_len(code, pos);
            let end = match_argument(code, pos, kind)?;
            ranges.push(pos..end);
            pos = end;
        }
        Some((pos, ranges))
    }
}

/// An environment signature, keyed by its `\begin{name}` prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvironmentSignature {
    command: CommandSignature,
    name: String,
    ignore_all_arguments: bool,
}

static BEGIN_PREFIX: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\\begin\{([^}]+)\}").unwrap());

impl EnvironmentSignature {
    /// Parse either a bare name (`tabular`, arguments are skipped) or a full prototype
    /// (`\begin{tabular}{}`, only the listed arguments are part of the match).
    pub fn parse(prototype: &str, action: Action) -> Option<Self> {
        match BEGIN_PREFIX.captures(prototype) {
            Some(captures) => {
                let name = captures[1].to_string();
                Some(Self {
                    command: CommandSignature::parse(prototype, action)?,
                    name,
                    ignore_all_arguments: false,
                })
            }
            None => Some(Self {
                command: CommandSignature::parse(&format!("\\begin{{{prototype}}}"), action)?,
                name: prototype.to_string(),
                ignore_all_arguments: true,
            }),
        }
    }

    pub fn prefix(&self) -> &str {
        self.command.prefix()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn action(&self) -> Action {
        self.command.action()
    }

    pub fn ignores_all_arguments(&self) -> bool {
        self.ignore_all_arguments
    }

    pub fn match_at(&self, code: &str, pos: usize) -> Option<usize> {
        self.command.match_at(code, pos)
    }
}

/// End offset of a balanced argument of `kind` starting exactly at `pos`.
///
/// Braces and brackets nest and must close in order; parentheses only close the
/// outermost parenthesis argument. Backslash escapes the next character.
pub fn match_argument(code: &str, pos: usize, kind: ArgumentKind) -> Option<usize> {
    let rest = code.get(pos..)?;
    if !rest.starts_with(kind.open()) {
        return None;
    }
    let mut stack = vec![kind];
    let mut chars = rest.char_indices().skip(1);
    while let Some((index, ch)) = chars.next() {
        match ch {
            '\\' => {
                chars.next();
            }
            '{' => stack.push(ArgumentKind::Brace),
            '[' => stack.push(ArgumentKind::Bracket),
            '}' | ']' => {
                let closing = if ch == '}' {
                    ArgumentKind::Brace
                } else {
                    ArgumentKind::Bracket
                };
                if stack.last() != Some(&closing) {
                    return None;
                }
                if stack.len() == 1 {
                    return Some(pos + index + 1);
                }
                stack.pop();
            }
            ')' if stack.len() == 1 && stack[0] == ArgumentKind::Parenthesis => {
                return Some(pos + index + 1);
            }
            _ => {}
        }
    }
    None
}

static COMMENT: Lazy<Regex> = Lazy::new(|| Regex::new(r"^%.*?(?:$|\n[ \n\r\t]*)").unwrap());

fn comment_len(code: &str, pos: usize) -> usize {
    code.get(pos..)
        .and_then(|rest| COMMENT.find(rest))
        .map_or(0, |found| found.len())
}
