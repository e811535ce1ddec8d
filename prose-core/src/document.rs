//! Open documents and their position index
//!
//!     A [`Document`] owns the current text of one editor buffer plus everything derived
//!     from it: the line-start table used to convert between byte offsets and protocol
//!     positions, the cached check result with the settings it was computed with, and a
//!     guess where the user's caret is. Diagnostics are not cached: they are rebuilt from
//!     the cached result on every publish, since which of them are held back depends on
//!     the caret at that moment.
//!
//! Positions
//!
//!     Protocol positions count lines from 0 and columns in UTF-16 code units. Offsets are
//!     UTF-8 byte offsets into the text. Lines end at `\n`, `\r\n` or a lone `\r`.
//!     Conversions clamp instead of failing: a line past the end maps to the end of the
//!     text and a column past the end of its line maps to the line end, before its
//!     terminator.
//!
//! Caret Estimate
//!
//!     Diagnostics right before the caret are held back while the user is typing. The
//!     protocol does not report the caret, so it is guessed from edits: after an insertion
//!     it sits after the inserted text, after a deletion at the deletion start. For a full
//!     text replacement the changed region is found from the common prefix and suffix, and
//!     the guess is only kept if the unchanged part covers at least half of both texts.
//!     This is a heuristic and may be wrong.

use std::ops::Range;
use std::sync::Arc;
use std::time::Instant;

use crate::checking::{CancellationCounter, CheckResult};
use crate::settings::Settings;

/// A protocol position: 0-based line and UTF-16 column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Position {
    pub line: u32,
    pub character: u32,
}

impl Position {
    pub fn new(line: u32, character: u32) -> Self {
        Self { line, character }
    }
}

/// One content change event. Without a range the whole text is replaced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextChange {
    pub range: Option<(Position, Position)>,
    pub text: String,
}

impl TextChange {
    pub fn full(text: impl Into<String>) -> Self {
        Self {
            range: None,
            text: text.into(),
        }
    }

    pub fn replace(start: Position, end: Position, text: impl Into<String>) -> Self {
        Self {
            range: Some((start, end)),
            text: text.into(),
        }
    }
}

/// Start offset of every line. The first entry is always 0.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineIndex {
    starts: Vec<usize>,
}

impl LineIndex {
    pub fn new(text: &str) -> Self {
        let bytes = text.as_bytes();
        let mut starts = vec![0];
        let mut i = 0;
        while i < bytes.len() {
            match bytes[i] {
                b'\r' => {
                    if bytes.get(i + 1) == Some(&b'\n') {
                        i += 1;
                    }
                    starts.push(i + 1);
                }
                b'\n' => starts.push(i + 1),
                _ => {}
            }
            i += 1;
        }
        Self { starts }
    }

    pub fn line_count(&self) -> usize {
        self.starts.len()
    }

    pub fn line_starts(&self) -> &[usize] {
        &self.starts
    }

    /// Byte offset of `position` in `text`, clamped.
    pub fn to_offset(&self, text: &str, position: Position) -> usize {
        let line = position.line as usize;
        let Some(&line_start) = self.starts.get(line) else {
            return text.len();
        };
        let next_start = self.starts.get(line + 1).copied().unwrap_or(text.len());
        let line_text = &text[line_start..next_start];
        let content = line_text.trim_end_matches(['\n', '\r']);

        let mut units = 0usize;
        for (index, ch) in content.char_indices() {
            if units >= position.character as usize {
                return line_start + index;
            }
            units += ch.len_utf16();
        }
        line_start + content.len()
    }

    /// Protocol position of a byte offset, clamped and snapped to a character boundary.
    pub fn to_position(&self, text: &str, offset: usize) -> Position {
        let mut offset = offset.min(text.len());
        while !text.is_char_boundary(offset) {
            offset -= 1;
        }
        let line = self.starts.partition_point(|&start| start <= offset) - 1;
        let line_start = self.starts[line];
        let character: usize = text[line_start..offset].chars().map(char::len_utf16).sum();
        Position::new(line as u32, character as u32)
    }
}

/// Convert a UTF-16 offset into `text` to a byte offset, clamped to the text length.
pub fn utf16_to_byte_offset(text: &str, utf16_offset: usize) -> usize {
    let mut units = 0;
    for (index, ch) in text.char_indices() {
        if units >= utf16_offset {
            return index;
        }
        units += ch.len_utf16();
    }
    text.len()
}

/// An open editor buffer.
#[derive(Debug)]
pub struct Document {
    uri: String,
    dialect: String,
    version: i32,
    text: String,
    lines: LineIndex,
    result: Option<(Arc<CheckResult>, Settings)>,
    caret: Option<Position>,
    caret_changed_at: Instant,
    being_checked: bool,
    cancellation: CancellationCounter,
}

impl Document {
    pub fn new(
        uri: impl Into<String>,
        dialect: impl Into<String>,
        version: i32,
        text: impl Into<String>,
    ) -> Self {
        let text = text.into();
        Self {
            uri: uri.into(),
            dialect: dialect.into(),
            version,
            lines: LineIndex::new(&text),
            text,
            result: None,
            caret: None,
            caret_changed_at: Instant::now(),
            being_checked: false,
            cancellation: CancellationCounter::new(),
        }
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn dialect(&self) -> &str {
        &self.dialect
    }

    pub fn version(&self) -> i32 {
        self.version
    }

    pub fn set_version(&mut self, version: i32) {
        self.version = version;
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn lines(&self) -> &LineIndex {
        &self.lines
    }

    pub fn to_offset(&self, position: Position) -> usize {
        self.lines.to_offset(&self.text, position)
    }

    pub fn to_position(&self, offset: usize) -> Position {
        self.lines.to_position(&self.text, offset)
    }

    pub fn to_offsets(&self, range: (Position, Position)) -> Range<usize> {
        let start = self.to_offset(range.0);
        let end = self.to_offset(range.1).max(start);
        start..end
    }

    pub fn to_positions(&self, range: &Range<usize>) -> (Position, Position) {
        (self.to_position(range.start), self.to_position(range.end))
    }

    /// The last whole-document result and the settings it was computed with.
    pub fn cached_check(&self) -> Option<(Arc<CheckResult>, &Settings)> {
        self.result
            .as_ref()
            .map(|(result, settings)| (result.clone(), settings))
    }

    /// The cached result, if it was computed with `settings`.
    pub fn cached_result_for(&self, settings: &Settings) -> Option<Arc<CheckResult>> {
        self.result
            .as_ref()
            .filter(|(_, checked_with)| checked_with == settings)
            .map(|(result, _)| result.clone())
    }

    pub fn set_cached_result(&mut self, result: Arc<CheckResult>, settings: Settings) {
        self.result = Some((result, settings));
    }

    pub fn caret(&self) -> Option<Position> {
        self.caret
    }

    pub fn caret_changed_at(&self) -> Instant {
        self.caret_changed_at
    }

    pub fn is_being_checked(&self) -> bool {
        self.being_checked
    }

    pub fn set_being_checked(&mut self, checking: bool) {
        self.being_checked = checking;
    }

    pub fn cancellation(&self) -> &CancellationCounter {
        &self.cancellation
    }

    /// Share a cancellation counter held elsewhere, so checks can be cancelled without
    /// access to the document.
    pub fn with_cancellation(mut self, cancellation: CancellationCounter) -> Self {
        self.cancellation = cancellation;
        self
    }

    /// Replace the whole text.
    pub fn set_text(&mut self, text: impl Into<String>) {
        let old = std::mem::replace(&mut self.text, text.into());
        self.text_changed();
        let caret = self.guess_caret_after_replacement(&old);
        self.set_caret(caret);
    }

    /// Apply a batch of change events in order.
    ///
    /// Only a single-event batch yields a caret estimate; for larger batches the caret is
    /// unknown and its timestamp stays as it was before the batch.
    pub fn apply_changes(&mut self, changes: &[TextChange]) {
        let previous_change = self.caret_changed_at;
        for change in changes {
            self.apply_change(change);
        }
        if changes.len() > 1 {
            self.caret = None;
            self.caret_changed_at = previous_change;
        }
    }

    pub fn apply_change(&mut self, change: &TextChange) {
        let Some((start, end)) = change.range else {
            self.set_text(change.text.clone());
            return;
        };

        let from = self.to_offset(start);
        let to = if end == start {
            from
        } else {
            self.to_offset(end).max(from)
        };
        self.text.replace_range(from..to, &change.text);
        self.text_changed();

        let caret = if from == to {
            Some(self.to_position(from + change.text.len()))
        } else if change.text.is_empty() {
            Some(start)
        } else {
            None
        };
        self.set_caret(caret);
    }

    fn text_changed(&mut self) {
        self.lines = LineIndex::new(&self.text);
        self.result = None;
    }

    fn set_caret(&mut self, caret: Option<Position>) {
        self.caret = caret;
        if caret.is_some() {
            self.caret_changed_at = Instant::now();
        }
    }

    fn guess_caret_after_replacement(&self, old: &str) -> Option<Position> {
        let new = self.text.as_str();
        let (prefix, suffix) = common_affixes(old, new);
        let unchanged = (prefix + suffix) as f64;
        if unchanged < old.len() as f64 / 2.0 || unchanged < new.len() as f64 / 2.0 {
            return None;
        }
        Some(self.to_position(new.len() - suffix))
    }
}

/// Byte lengths of the longest common prefix and the longest non-overlapping common suffix,
/// both ending on character boundaries.
fn common_affixes(old: &str, new: &str) -> (usize, usize) {
    let prefix: usize = old
        .chars()
        .zip(new.chars())
        .take_while(|(a, b)| a == b)
        .map(|(a, _)| a.len_utf8())
        .sum();
    let limit = old.len().min(new.len()) - prefix;
    let mut suffix = 0;
    for (a, b) in old[prefix..].chars().rev().zip(new[prefix..].chars().rev()) {
        if a != b || suffix + a.len_utf8() > limit {
            break;
        }
        suffix += a.len_utf8();
    }
    (prefix, suffix)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const SAMPLE: &str = "Hello\nEnthusiastic\r\nReader!";

    #[test]
    fn line_starts_for_all_terminators() {
        assert_eq!(LineIndex::new(SAMPLE).line_starts(), &[0, 6, 20]);
        assert_eq!(LineIndex::new("a\rb\r\nc\n").line_starts(), &[0, 2, 5, 7]);
        assert_eq!(LineIndex::new("").line_starts(), &[0]);
    }

    #[test]
    fn offsets_to_positions() {
        let document = Document::new("file:///a.txt", "plaintext", 1, SAMPLE);
        assert_eq!(document.to_position(6), Position::new(1, 0));
        assert_eq!(document.to_position(18), Position::new(1, 12));
        assert_eq!(document.to_position(0), Position::new(0, 0));
        assert_eq!(document.to_position(999), Position::new(2, 7));
    }

    #[test]
    fn positions_to_offsets_clamp() {
        let document = Document::new("file:///a.txt", "plaintext", 1, SAMPLE);
        assert_eq!(document.to_offset(Position::new(0, 0)), 0);
        assert_eq!(document.to_offset(Position::new(1, 0)), 6);
        assert_eq!(document.to_offset(Position::new(1, 12)), 18);
        assert_eq!(document.to_offset(Position::new(1, 50)), 18);
        assert_eq!(document.to_offset(Position::new(0, 50)), 5);
        assert_eq!(document.to_offset(Position::new(2, 3)), 23);
        assert_eq!(document.to_offset(Position::new(3, 0)), SAMPLE.len());
    }

    #[test]
    fn columns_count_utf16_units() {
        let text = "a😀b\nä";
        let document = Document::new("file:///a.md", "markdown", 1, text);
        assert_eq!(document.to_position(5), Position::new(0, 3));
        assert_eq!(document.to_offset(Position::new(0, 3)), 5);
        assert_eq!(document.to_offset(Position::new(1, 1)), text.len());
        // Inside a multi-byte character snaps back to its start.
        assert_eq!(document.to_position(2), Position::new(0, 1));
    }

    #[test]
    fn utf16_offsets() {
        assert_eq!(utf16_to_byte_offset("a😀b", 3), 5);
        assert_eq!(utf16_to_byte_offset("a😀b", 9), 6);
    }

    #[test]
    fn insertion_moves_caret_after_inserted_text() {
        let mut document = Document::new("file:///a.md", "markdown", 1, "Hello world");
        document.apply_changes(&[TextChange::replace(
            Position::new(0, 5),
            Position::new(0, 5),
            ",",
        )]);
        assert_eq!(document.text(), "Hello, world");
        assert_eq!(document.caret(), Some(Position::new(0, 6)));
    }

    #[test]
    fn deletion_puts_caret_at_start() {
        let mut document = Document::new("file:///a.md", "markdown", 1, "Hello world");
        document.apply_changes(&[TextChange::replace(
            Position::new(0, 5),
            Position::new(0, 11),
            "",
        )]);
        assert_eq!(document.text(), "Hello");
        assert_eq!(document.caret(), Some(Position::new(0, 5)));
    }

    #[test]
    fn replacement_and_batches_lose_the_caret() {
        let mut document = Document::new("file:///a.md", "markdown", 1, "Hello world");
        document.apply_changes(&[TextChange::replace(
            Position::new(0, 0),
            Position::new(0, 5),
            "Howdy",
        )]);
        assert_eq!(document.caret(), None);

        document.apply_changes(&[TextChange::replace(
            Position::new(0, 0),
            Position::new(0, 0),
            "A",
        )]);
        let stamp = document.caret_changed_at();
        document.apply_changes(&[
            TextChange::replace(Position::new(0, 0), Position::new(0, 0), "B"),
            TextChange::replace(Position::new(0, 0), Position::new(0, 0), "C"),
        ]);
        assert_eq!(document.text(), "CBAHowdy world");
        assert_eq!(document.caret(), None);
        assert_eq!(document.caret_changed_at(), stamp);
    }

    #[test]
    fn full_replacement_guesses_caret() {
        let mut document = Document::new("file:///a.md", "markdown", 1, "This is a sentence.\n");
        document.set_text("This is a long sentence.\n");
        assert_eq!(document.caret(), Some(Position::new(0, 15)));

        document.set_text("Completely different.");
        assert_eq!(document.caret(), None);
    }

    #[test]
    fn edits_invalidate_cached_result() {
        let mut document = Document::new("file:///a.md", "markdown", 1, "Text.");
        let settings = Settings::default();
        document.set_cached_result(Arc::new(CheckResult::default()), settings.clone());
        assert!(document.cached_result_for(&settings).is_some());
        document.apply_change(&TextChange::full("Other text."));
        assert!(document.cached_result_for(&settings).is_none());
        assert!(document.cached_check().is_none());
    }

    #[test]
    fn cached_result_belongs_to_its_settings() {
        let mut document = Document::new("file:///a.md", "markdown", 1, "Text.");
        let settings = Settings::default();
        document.set_cached_result(Arc::new(CheckResult::default()), settings.clone());

        let german = settings.with_language("de-DE");
        assert!(document.cached_result_for(&german).is_none());
        assert!(document.cached_result_for(&settings).is_some());
        let (_, checked_with) = document.cached_check().unwrap();
        assert_eq!(checked_with, &settings);
    }

    #[test]
    fn common_affixes_do_not_overlap() {
        assert_eq!(common_affixes("aaa", "aaaa"), (3, 0));
        assert_eq!(common_affixes("abc", "axc"), (1, 1));
        assert_eq!(common_affixes("é", "è"), (0, 0));
    }

    proptest! {
        #[test]
        fn position_round_trip(text in "[a-zé😀\r\n]{0,40}", offset in 0usize..60) {
            let index = LineIndex::new(&text);
            let position = index.to_position(&text, offset);
            let back = index.to_offset(&text, position);
            let mut snapped = offset.min(text.len());
            while !text.is_char_boundary(snapped) {
                snapped -= 1;
            }
            // Offsets inside a `\r\n` pair map to the end of the line content.
            prop_assert!(back <= snapped);
            prop_assert_eq!(index.to_position(&text, back).line, position.line);
        }

        #[test]
        fn line_starts_are_sorted(text in "[ab\r\n]{0,40}") {
            let index = LineIndex::new(&text);
            prop_assert_eq!(index.line_starts()[0], 0);
            prop_assert!(index.line_starts().windows(2).all(|pair| pair[0] < pair[1]));
        }
    }
}
