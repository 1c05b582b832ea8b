//! Incremental helpers: edit events and coordinate shifting
//!
//! A live document reports each change as a single `Edit` in pre-edit
//! coordinates. Spans wholly before the edit keep their offsets, spans wholly
//! after it move by `Edit::shift()`, and spans touching it are rescanned.

use serde::{Deserialize, Serialize};
use std::ops::Range;

use crate::scanner::matcher::Match;

// =============================================================================
// Edit
// =============================================================================

/// One buffer change: `from..to` (old coordinates) replaced by `inserted_len` bytes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edit {
    pub from: usize,
    pub to: usize,
    pub inserted_len: usize,
}

impl Edit {
    pub fn new(from: usize, to: usize, inserted_len: usize) -> Self {
        Self { from, to, inserted_len }
    }

    pub fn insert(at: usize, len: usize) -> Self {
        Self::new(at, at, len)
    }

    pub fn delete(range: Range<usize>) -> Self {
        Self::new(range.start, range.end, 0)
    }

    /// Bytes removed from the old text
    pub fn removed_len(&self) -> usize {
        self.to.saturating_sub(self.from)
    }

    /// Net shift applied to everything after the edit
    pub fn shift(&self) -> i64 {
        self.inserted_len as i64 - self.removed_len() as i64
    }

    /// End of the inserted text, in new coordinates
    pub fn new_end(&self) -> usize {
        self.from + self.inserted_len
    }

    pub fn is_noop(&self) -> bool {
        self.from == self.to && self.inserted_len == 0
    }

    /// True if the old span `start..end` overlaps or touches the edited range.
    ///
    /// Touching counts: typing right after `AA1` can turn it into `AA12`.
    pub fn touches(&self, start: usize, end: usize) -> bool {
        start <= self.to && end >= self.from
    }

    /// Map an old offset into new coordinates.
    ///
    /// Offsets inside the replaced range collapse to the end of the insertion.
    pub fn map_offset(&self, offset: usize) -> usize {
        if offset <= self.from {
            offset
        } else if offset >= self.to {
            (offset as i64 + self.shift()).max(0) as usize
        } else {
            self.new_end()
        }
    }
}

// =============================================================================
// Trait for shiftable items
// =============================================================================

/// Items that have start/end positions
pub trait HasSpan {
    fn start(&self) -> usize;
    fn end(&self) -> usize;
    fn set_span(&mut self, start: usize, end: usize);
}

impl HasSpan for Match {
    fn start(&self) -> usize { self.start }
    fn end(&self) -> usize { self.end }
    fn set_span(&mut self, start: usize, end: usize) {
        self.start = start;
        self.end = end;
    }
}

/// Move an item that lies entirely after the edit
pub fn shift_item<T: HasSpan>(item: &mut T, edit: &Edit) {
    let shift = edit.shift();
    if shift != 0 {
        let start = (item.start() as i64 + shift).max(0) as usize;
        let end = (item.end() as i64 + shift).max(0) as usize;
        item.set_span(start, end);
    }
}

// =============================================================================
// Rescan windows
// =============================================================================

/// Widen `range` outward to whitespace boundaries, then by `padding` bytes.
///
/// The result is clamped to the text and lands on char boundaries.
pub fn widen_window(text: &str, range: Range<usize>, padding: usize) -> Range<usize> {
    let len = text.len();
    let mut start = floor_char_boundary(text, range.start.min(len));
    let mut end = ceil_char_boundary(text, range.end.min(len).max(start));

    start = match text[..start].rfind(char::is_whitespace) {
        Some(idx) => idx + text[idx..].chars().next().map_or(1, |c| c.len_utf8()),
        None => 0,
    };
    end = match text[end..].find(char::is_whitespace) {
        Some(idx) => end + idx,
        None => len,
    };

    if padding > 0 {
        start = floor_char_boundary(text, start.saturating_sub(padding));
        end = ceil_char_boundary(text, (end + padding).min(len));
    }

    start..end
}

fn floor_char_boundary(text: &str, mut pos: usize) -> usize {
    while pos > 0 && !text.is_char_boundary(pos) {
        pos -= 1;
    }
    pos
}

fn ceil_char_boundary(text: &str, mut pos: usize) -> usize {
    while pos < text.len() && !text.is_char_boundary(pos) {
        pos += 1;
    }
    pos
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scanner::matcher::Token;

    fn mention(start: usize, end: usize) -> Match {
        Match { token: Token::from("AA1"), start, end }
    }

    #[test]
    fn test_edit_shift() {
        assert_eq!(Edit::insert(0, 1).shift(), 1);
        assert_eq!(Edit::delete(2..5).shift(), -3);
        assert_eq!(Edit::new(2, 5, 3).shift(), 0);
    }

    #[test]
    fn test_noop_edit() {
        assert!(Edit::insert(4, 0).is_noop());
        assert!(!Edit::insert(4, 1).is_noop());
        assert!(!Edit::delete(4..5).is_noop());
    }

    #[test]
    fn test_touches() {
        let edit = Edit::insert(7, 1);
        assert!(edit.touches(4, 7), "insertion right after a span touches it");
        assert!(edit.touches(7, 10), "insertion right before a span touches it");
        assert!(!edit.touches(0, 3));
        assert!(!edit.touches(8, 11));
    }

    #[test]
    fn test_map_offset() {
        let edit = Edit::new(4, 8, 2);
        assert_eq!(edit.map_offset(2), 2);
        assert_eq!(edit.map_offset(4), 4);
        assert_eq!(edit.map_offset(6), 6); // inside: collapses to new_end
        assert_eq!(edit.map_offset(8), 6);
        assert_eq!(edit.map_offset(12), 10);
    }

    #[test]
    fn test_shift_item() {
        let mut item = mention(4, 7);
        shift_item(&mut item, &Edit::insert(0, 1));
        assert_eq!((item.start, item.end), (5, 8));

        shift_item(&mut item, &Edit::delete(0..2));
        assert_eq!((item.start, item.end), (3, 6));
    }

    #[test]
    fn test_widen_window_to_whitespace() {
        let text = "see AA12 soon";
        assert_eq!(widen_window(text, 6..7, 0), 4..8);
        assert_eq!(widen_window(text, 0..0, 0), 0..3);
        assert_eq!(widen_window(text, 13..13, 0), 9..13);
    }

    #[test]
    fn test_widen_window_padding_clamped() {
        let text = "ab cd";
        assert_eq!(widen_window(text, 3..4, 10), 0..5);
    }

    #[test]
    fn test_widen_window_multibyte() {
        let text = "vol → AF12 ok";
        let arrow = text.find('→').unwrap();
        let range = widen_window(text, arrow + 1..arrow + 1, 0);
        assert!(text.is_char_boundary(range.start));
        assert!(text.is_char_boundary(range.end));
        assert_eq!(&text[range], "→");
    }
}
