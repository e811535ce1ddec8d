//! Annotated text: the plain-text projection of a markup fragment
//!
//!     Builders never hand the analysis engine the raw source. They emit an ordered list of
//!     parts instead, each one tagged with how it contributes to the text the engine sees:
//!
//!         - `Text`: copied verbatim into the plain text
//!         - `Markup` without interpretation: dropped
//!         - `Markup` with interpretation: replaced by the interpretation (dummies, accents,
//!           typographic quotes, paragraph breaks)
//!
//!     The concatenation of all raw parts is the original fragment, the concatenation of all
//!     contributions is the plain text. Nothing else is stored.
//!
//! Position Mapping
//!
//!     Instead of one entry per character, the mapping keeps a sparse list of checkpoints,
//!     one per part boundary, as (plain offset, original offset) pairs. Both coordinates are
//!     non-decreasing. Offsets between checkpoints are linearly interpolated, which is exact
//!     inside `Text` parts since those advance both coordinates equally.
//!
//!     A boundary can repeat a coordinate: dropped markup advances only the original offset.
//!     Lookups therefore take a [`Bias`]: the start of a match is placed after such markup,
//!     the end of a match before it, so `\textbf{word}` maps the plain word exactly onto
//!     `word`.
//!
//!     All offsets are UTF-8 byte offsets. Interpolated results are snapped down to the
//!     nearest character boundary.

use std::fmt;
use std::ops::Range;

/// One piece of an annotated text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TextPart {
    Text(String),
    Markup {
        raw: String,
        interpret_as: Option<String>,
    },
}

impl TextPart {
    /// The slice of the original source this part stands for.
    pub fn raw(&self) -> &str {
        match self {
            TextPart::Text(text) => text,
            TextPart::Markup { raw, .. } => raw,
        }
    }

    /// What this part adds to the plain-text projection.
    pub fn contribution(&self) -> &str {
        match self {
            TextPart::Text(text) => text,
            TextPart::Markup {
                interpret_as: Some(interpretation),
                ..
            } => interpretation,
            TextPart::Markup {
                interpret_as: None, ..
            } => "",
        }
    }

    pub fn is_text(&self) -> bool {
        matches!(self, TextPart::Text(_))
    }
}

impl fmt::Display for TextPart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TextPart::Text(text) => write!(f, "TEXT({text:?})"),
            TextPart::Markup {
                raw,
                interpret_as: None,
            } => write!(f, "MARKUP({raw:?})"),
            TextPart::Markup {
                raw,
                interpret_as: Some(interpretation),
            } => write!(f, "MARKUP({raw:?}, {interpretation:?})"),
        }
    }
}

/// A (plain offset, original offset) pair at a part boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Checkpoint {
    pub plain: usize,
    pub original: usize,
}

impl Checkpoint {
    pub fn new(plain: usize, original: usize) -> Self {
        Self { plain, original }
    }
}

/// Which side of a zero-width region an offset should land on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bias {
    /// Start of a range: skip past markup that contributes nothing.
    Start,
    /// End of a range: stop before such markup.
    End,
}

/// The result of running a builder over a fragment.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AnnotatedText {
    parts: Vec<TextPart>,
    plain_text: String,
    original_text: String,
    mapping: Vec<Checkpoint>,
}

impl AnnotatedText {
    pub fn parts(&self) -> &[TextPart] {
        &self.parts
    }

    pub fn plain_text(&self) -> &str {
        &self.plain_text
    }

    pub fn original_text(&self) -> &str {
        &self.original_text
    }

    pub fn mapping(&self) -> &[Checkpoint] {
        &self.mapping
    }

    /// Map a plain-text offset back into the original fragment.
    pub fn original_offset(&self, plain: usize, bias: Bias) -> usize {
        let offset = interpolate(
            &self.mapping,
            plain,
            bias,
            |checkpoint| checkpoint.plain,
            |checkpoint| checkpoint.original,
        );
        floor_char_boundary(&self.original_text, offset)
    }

    /// Map an original offset into the plain text.
    pub fn plain_offset(&self, original: usize, bias: Bias) -> usize {
        let offset = interpolate(
            &self.mapping,
            original,
            bias,
            |checkpoint| checkpoint.original,
            |checkpoint| checkpoint.plain,
        );
        floor_char_boundary(&self.plain_text, offset)
    }

    /// The plain text that corresponds to an original range.
    ///
    /// Used to recover the word an unknown-word match refers to, e.g. `Ä` for `\"A`.
    pub fn plain_substring(&self, original: Range<usize>) -> &str {
        let start = self.plain_offset(original.start, Bias::Start);
        let end = self.plain_offset(original.end, Bias::End);
        if start <= end {
            &self.plain_text[start..end]
        } else {
            tracing::warn!(
                from = original.start,
                to = original.end,
                plain_from = start,
                plain_to = end,
                "could not determine plain-text positions"
            );
            ""
        }
    }
}

fn interpolate(
    mapping: &[Checkpoint],
    position: usize,
    bias: Bias,
    key: impl Fn(&Checkpoint) -> usize,
    value: impl Fn(&Checkpoint) -> usize,
) -> usize {
    let (Some(first), Some(last)) = (mapping.first(), mapping.last()) else {
        return position;
    };
    if position <= key(first) {
        return match bias {
            Bias::End => value(first),
            Bias::Start => {
                let equal = mapping.partition_point(|c| key(c) <= key(first));
                value(&mapping[equal - 1])
            }
        };
    }
    if position >= key(last) {
        return match bias {
            Bias::Start => value(last),
            Bias::End => {
                let lower = mapping.partition_point(|c| key(c) < key(last));
                value(&mapping[lower])
            }
        };
    }

    let lower = mapping.partition_point(|c| key(c) < position);
    let upper = mapping.partition_point(|c| key(c) <= position);

    if lower < upper {
        return match bias {
            Bias::Start => value(&mapping[upper - 1]),
            Bias::End => value(&mapping[lower]),
        };
    }

    let below = &mapping[lower - 1];
    let above = &mapping[lower];
    let span = key(above) - key(below);
    let distance = position - key(below);
    let target_span = value(above) - value(below);
    value(below) + (distance * target_span + span / 2) / span
}

fn floor_char_boundary(text: &str, offset: usize) -> usize {
    let mut offset = offset.min(text.len());
    while !text.is_char_boundary(offset) {
        offset -= 1;
    }
    offset
}

/// Low-level part collector shared by every dialect builder.
#[derive(Debug, Clone, Default)]
pub struct AnnotatedTextBuilder {
    parts: Vec<TextPart>,
}

impl AnnotatedTextBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_text(&mut self, text: &str) -> &mut Self {
        if text.is_empty() {
            return self;
        }
        match self.parts.last_mut() {
            Some(TextPart::Text(last)) => last.push_str(text),
            _ => self.parts.push(TextPart::Text(text.to_string())),
        }
        self
    }

    pub fn add_markup(&mut self, raw: &str) -> &mut Self {
        if !raw.is_empty() {
            self.parts.push(TextPart::Markup {
                raw: raw.to_string(),
                interpret_as: None,
            });
        }
        self
    }

    /// Add markup that reads as `interpret_as`. An empty interpretation is plain markup.
    ///
    /// The raw text may be empty here, which is how synthetic separators are inserted
    /// without consuming input.
    pub fn add_markup_as(&mut self, raw: &str, interpret_as: &str) -> &mut Self {
        if interpret_as.is_empty() {
            return self.add_markup(raw);
        }
        self.parts.push(TextPart::Markup {
            raw: raw.to_string(),
            interpret_as: Some(interpret_as.to_string()),
        });
        self
    }

    pub fn parts(&self) -> &[TextPart] {
        &self.parts
    }

    /// Number of original bytes consumed so far.
    pub fn original_len(&self) -> usize {
        self.parts.iter().map(|part| part.raw().len()).sum()
    }

    /// The plain text emitted so far.
    pub fn plain_text(&self) -> String {
        self.parts.iter().map(TextPart::contribution).collect()
    }

    pub fn build(&self) -> AnnotatedText {
        let mut plain_text = String::new();
        let mut original_text = String::new();
        let mut mapping = vec![Checkpoint::new(0, 0)];

        for part in &self.parts {
            plain_text.push_str(part.contribution());
            original_text.push_str(part.raw());
            let checkpoint = Checkpoint::new(plain_text.len(), original_text.len());
            if mapping.last() != Some(&checkpoint) {
                mapping.push(checkpoint);
            }
        }

        AnnotatedText {
            parts: self.parts.clone(),
            plain_text,
            original_text,
            mapping,
        }
    }
}
