//! DecorationSet: span → widget bindings for one rendering surface
//!
//! # Invariants
//! - Sorted by start offset, never overlapping
//! - Bound to one text version (`version()`, `text_len()`)
//!
//! # Reconcile
//! Given one edit in old coordinates and the live text after it:
//! 1. Decorations before the edit keep their spans
//! 2. Decorations after it shift by `Edit::shift()`
//! 3. Decorations touching it are dropped
//! 4. The dirty region, widened to whitespace (and by the phrase length for
//!    literal triggers), is rescanned and spliced in
//!
//! Only the window is rescanned; the rest of the document is never touched.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Range;

use crate::scanner::incremental::{shift_item, widen_window, Edit, HasSpan};
use crate::scanner::matcher::{Match, Token, TokenMatcher};
use crate::scanner::widget::{Widget, WidgetFactory, WidgetId};

// =============================================================================
// Types
// =============================================================================

/// A text span replaced by a widget
#[derive(Debug, Clone)]
pub struct Decoration {
    pub occurrence: Match,
    pub widget: Widget,
}

impl Decoration {
    pub fn token(&self) -> &Token {
        &self.occurrence.token
    }

    pub fn range(&self) -> Range<usize> {
        self.occurrence.range()
    }
}

impl HasSpan for Decoration {
    fn start(&self) -> usize { self.occurrence.start }
    fn end(&self) -> usize { self.occurrence.end }
    fn set_span(&mut self, start: usize, end: usize) {
        self.occurrence.set_span(start, end);
    }
}

/// Edit that does not fit the text this set was built against
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileInconsistency {
    pub edit: Edit,
    /// Text length the set knows about
    pub text_len: usize,
    /// Length of the live text handed in with the edit
    pub live_len: usize,
}

impl fmt::Display for ReconcileInconsistency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Edit {}..{} (+{}) does not fit text of length {} (live text is {})",
            self.edit.from, self.edit.to, self.edit.inserted_len, self.text_len, self.live_len
        )
    }
}

impl std::error::Error for ReconcileInconsistency {}

/// Live text plus the matcher used to rescan around an edit
pub struct RescanWindow<'a> {
    pub text: &'a str,
    pub matcher: &'a TokenMatcher,
    /// Extra bytes scanned beyond the whitespace-widened window
    pub padding: usize,
}

impl<'a> RescanWindow<'a> {
    pub fn new(text: &'a str, matcher: &'a TokenMatcher) -> Self {
        Self { text, matcher, padding: 0 }
    }
}

/// What one reconcile did
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReconcileStats {
    /// Untouched decorations before the edit
    pub kept: usize,
    /// Decorations moved by the edit's shift
    pub shifted: usize,
    /// Decorations removed for good
    pub dropped: usize,
    /// New decorations from the rescan
    pub inserted: usize,
    /// Rescanned matches that kept their previous widget
    pub reused: usize,
    /// Rescanned byte range (new coordinates)
    pub window: Option<(usize, usize)>,
    /// Tokens of inserted decorations
    pub discovered: Vec<Token>,
}

/// Piece of a decorated text: raw text or a widget in place of a token
#[derive(Debug, Clone)]
pub enum Segment<'t> {
    Text(&'t str),
    Widget(Widget),
}

// =============================================================================
// DecorationSet
// =============================================================================

#[derive(Debug, Clone, Default)]
pub struct DecorationSet {
    decorations: Vec<Decoration>,
    text_len: usize,
    version: u64,
}

impl DecorationSet {
    /// Full build from a scan of a text of `text_len` bytes.
    ///
    /// Matches are sorted; any that overlap an earlier one are skipped.
    pub fn build(
        matches: impl IntoIterator<Item = Match>,
        text_len: usize,
        factory: &WidgetFactory,
    ) -> Self {
        let mut matches: Vec<Match> = matches
            .into_iter()
            .filter(|m| m.start < m.end && m.end <= text_len)
            .collect();
        matches.sort_by_key(|m| (m.start, m.end));

        let mut decorations: Vec<Decoration> = Vec::with_capacity(matches.len());
        for occurrence in matches {
            if decorations.last().is_some_and(|d| d.end() > occurrence.start) {
                continue;
            }
            let widget = factory.make(&occurrence.token);
            decorations.push(Decoration { occurrence, widget });
        }

        Self {
            decorations,
            text_len,
            version: 0,
        }
    }

    /// Incrementally update after `edit`. See the module docs for the algorithm.
    ///
    /// On error the set is left unchanged and the caller should rebuild.
    pub fn reconcile(
        &mut self,
        edit: &Edit,
        window: &RescanWindow<'_>,
        factory: &WidgetFactory,
    ) -> Result<ReconcileStats, ReconcileInconsistency> {
        let live_len = window.text.len();
        let inconsistent = || ReconcileInconsistency {
            edit: *edit,
            text_len: self.text_len,
            live_len,
        };

        if edit.from > edit.to || edit.to > self.text_len {
            return Err(inconsistent());
        }
        if self.text_len - edit.removed_len() + edit.inserted_len != live_len {
            return Err(inconsistent());
        }
        if edit.is_noop() {
            return Ok(ReconcileStats::default());
        }

        // Partition against the edit; spans of removed decorations are mapped
        // to new coordinates so the rescan can hand their widgets back.
        let mut before = Vec::new();
        let mut after = Vec::new();
        let mut removed: Vec<Decoration> = Vec::new();
        let mut dirty = edit.from..edit.new_end();

        for mut decoration in self.decorations.drain(..) {
            if !edit.touches(decoration.start(), decoration.end()) {
                if decoration.end() < edit.from {
                    before.push(decoration);
                } else {
                    shift_item(&mut decoration, edit);
                    after.push(decoration);
                }
                continue;
            }
            let start = edit.map_offset(decoration.start());
            let end = edit.map_offset(decoration.end());
            dirty.start = dirty.start.min(start);
            dirty.end = dirty.end.max(end);
            decoration.set_span(start, end);
            removed.push(decoration);
        }

        // Literal phrases can span whitespace; reach one full phrase past the word
        let padding = window
            .padding
            .max(window.matcher.max_token_len().unwrap_or(0));
        let mut scan = widen_window(window.text, dirty, padding);

        // Never cut through a surviving decoration: it is rescanned whole instead
        for decoration in before.iter().chain(after.iter()) {
            if decoration.start() < scan.end && decoration.end() > scan.start {
                scan.start = scan.start.min(decoration.start());
                scan.end = scan.end.max(decoration.end());
            }
        }
        let overlaps = |d: &Decoration| d.start() < scan.end && d.end() > scan.start;

        let (inside, before): (Vec<_>, Vec<_>) = before.into_iter().partition(|d| overlaps(d));
        let (inside_after, after): (Vec<_>, Vec<_>) = after.into_iter().partition(|d| overlaps(d));
        removed.extend(inside);
        removed.extend(inside_after);

        let mut stats = ReconcileStats {
            kept: before.len(),
            shifted: after.len(),
            window: Some((scan.start, scan.end)),
            ..Default::default()
        };

        let mut fresh = Vec::new();
        for occurrence in window.matcher.scan_window(window.text, scan.clone()) {
            let reuse = removed.iter().position(|d| {
                d.token() == &occurrence.token
                    && d.start() == occurrence.start
                    && d.end() == occurrence.end
            });
            let widget = match reuse {
                Some(idx) => {
                    stats.reused += 1;
                    removed.swap_remove(idx).widget
                }
                None => {
                    stats.inserted += 1;
                    stats.discovered.push(occurrence.token.clone());
                    factory.make(&occurrence.token)
                }
            };
            fresh.push(Decoration { occurrence, widget });
        }
        stats.dropped = removed.len();

        let mut decorations = before;
        decorations.extend(fresh);
        decorations.extend(after);
        self.decorations = decorations;
        self.text_len = live_len;
        self.version += 1;

        log::debug!(
            "[DecorationSet] reconciled v{}: window {}..{}, +{} -{} ~{}",
            self.version,
            scan.start,
            scan.end,
            stats.inserted,
            stats.dropped,
            stats.shifted
        );

        Ok(stats)
    }

    pub fn decorations(&self) -> &[Decoration] {
        &self.decorations
    }

    pub fn len(&self) -> usize {
        self.decorations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.decorations.is_empty()
    }

    /// Number of successful reconciles since the last build
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn text_len(&self) -> usize {
        self.text_len
    }

    /// Spans and tokens only, for structural comparison
    pub fn layout(&self) -> Vec<Match> {
        self.decorations.iter().map(|d| d.occurrence.clone()).collect()
    }

    /// Widgets bound to `token`
    pub fn widgets_for<'a>(&'a self, token: &'a Token) -> impl Iterator<Item = &'a Widget> + 'a {
        self.decorations
            .iter()
            .filter(move |d| d.token() == token)
            .map(|d| &d.widget)
    }

    pub fn widget(&self, id: WidgetId) -> Option<&Widget> {
        self.decorations
            .iter()
            .map(|d| &d.widget)
            .find(|w| w.id() == id)
    }

    /// Decoration covering byte `offset`, if any
    pub fn at_offset(&self, offset: usize) -> Option<&Decoration> {
        let idx = self.decorations.partition_point(|d| d.end() <= offset);
        self.decorations
            .get(idx)
            .filter(|d| d.start() <= offset && offset < d.end())
    }

    /// Split `text` into raw runs and widgets.
    ///
    /// `text` must be the text this set is bound to; a stale set stops
    /// splicing at the first span that no longer fits.
    pub fn segments<'t>(&self, text: &'t str) -> Vec<Segment<'t>> {
        let mut out = Vec::new();
        let mut pos = 0;

        for decoration in &self.decorations {
            let (Some(gap), Some(_)) = (text.get(pos..decoration.start()), text.get(decoration.range())) else {
                break;
            };
            if !gap.is_empty() {
                out.push(Segment::Text(gap));
            }
            out.push(Segment::Widget(decoration.widget.clone()));
            pos = decoration.end();
        }

        if let Some(rest) = text.get(pos..) {
            if !rest.is_empty() {
                out.push(Segment::Text(rest));
            }
        }
        out
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scanner::tests::support::harness;

    fn factory() -> WidgetFactory {
        let (_pool, cache, _resolver) = harness();
        WidgetFactory::new(cache)
    }

    fn build(text: &str, factory: &WidgetFactory) -> DecorationSet {
        let matcher = TokenMatcher::default();
        DecorationSet::build(matcher.scan(text), text.len(), factory)
    }

    fn spans(set: &DecorationSet) -> Vec<(&str, usize, usize)> {
        set.decorations()
            .iter()
            .map(|d| (d.token().as_str(), d.start(), d.end()))
            .collect()
    }

    #[test]
    fn test_build_binds_widgets() {
        let factory = factory();
        let set = build("Flight BA249 departed", &factory);

        assert_eq!(spans(&set), vec![("BA249", 7, 12)]);
        assert_eq!(set.decorations()[0].widget.token().as_str(), "BA249");
        assert_eq!(set.text_len(), 21);
    }

    #[test]
    fn test_build_idempotent_layout() {
        let factory = factory();
        let text = "AA1 then BB22 and AA1";
        assert_eq!(build(text, &factory).layout(), build(text, &factory).layout());
    }

    #[test]
    fn test_build_skips_overlaps() {
        let factory = factory();
        let matches = vec![
            Match { token: Token::from("BB2"), start: 4, end: 7 },
            Match { token: Token::from("AA1"), start: 0, end: 3 },
            Match { token: Token::from("A1"), start: 1, end: 3 },
        ];
        let set = DecorationSet::build(matches, 10, &factory);
        assert_eq!(spans(&set), vec![("AA1", 0, 3), ("BB2", 4, 7)]);
    }

    #[test]
    fn test_same_token_distinct_widgets() {
        let factory = factory();
        let set = build("AA1 and AA1", &factory);
        let token = Token::from("AA1");
        let widgets: Vec<&Widget> = set.widgets_for(&token).collect();

        assert_eq!(widgets.len(), 2);
        assert_ne!(widgets[0].id(), widgets[1].id());
    }

    #[test]
    fn test_reconcile_noop_unchanged() {
        let factory = factory();
        let matcher = TokenMatcher::default();
        let text = "see AA1 soon";
        let mut set = build(text, &factory);
        let before: Vec<WidgetId> = set.decorations().iter().map(|d| d.widget.id()).collect();

        let stats = set.reconcile(&Edit::insert(5, 0), &RescanWindow::new(text, &matcher), &factory).unwrap();

        assert_eq!(stats, ReconcileStats::default());
        assert_eq!(spans(&set), vec![("AA1", 4, 7)]);
        assert_eq!(set.decorations()[0].widget.id(), before[0]);
        assert_eq!(set.version(), 0);
    }

    #[test]
    fn test_reconcile_insert_before_shifts() {
        let factory = factory();
        let matcher = TokenMatcher::default();
        let mut set = build("see AA1 soon", &factory);
        let widget = set.decorations()[0].widget.id();

        let stats = set
            .reconcile(&Edit::insert(0, 1), &RescanWindow::new("xsee AA1 soon", &matcher), &factory)
            .unwrap();

        assert_eq!(spans(&set), vec![("AA1", 5, 8)]);
        assert_eq!(set.decorations()[0].widget.id(), widget);
        assert_eq!(stats.shifted, 1);
        assert_eq!(stats.inserted, 0);
        assert_eq!(stats.window, Some((0, 4)));
        assert_eq!(set.version(), 1);
    }

    #[test]
    fn test_reconcile_typing_extends_token() {
        let factory = factory();
        let matcher = TokenMatcher::default();
        let mut set = build("see AA1 soon", &factory);

        let stats = set
            .reconcile(&Edit::insert(7, 1), &RescanWindow::new("see AA12 soon", &matcher), &factory)
            .unwrap();

        assert_eq!(spans(&set), vec![("AA12", 4, 8)]);
        assert_eq!(stats.dropped, 1);
        assert_eq!(stats.inserted, 1);
        assert_eq!(stats.discovered, vec![Token::from("AA12")]);
    }

    #[test]
    fn test_reconcile_delete_token() {
        let factory = factory();
        let matcher = TokenMatcher::default();
        let mut set = build("see AA1 soon BB2", &factory);

        set.reconcile(&Edit::delete(4..7), &RescanWindow::new("see  soon BB2", &matcher), &factory)
            .unwrap();

        assert_eq!(spans(&set), vec![("BB2", 10, 13)]);
    }

    #[test]
    fn test_reconcile_insert_new_token_reuses_neighbour() {
        let factory = factory();
        let matcher = TokenMatcher::default();
        let mut set = build("AA1 and BB2", &factory);
        let aa1 = set.decorations()[0].widget.id();

        let stats = set
            .reconcile(&Edit::insert(3, 4), &RescanWindow::new("AA1 CC3 and BB2", &matcher), &factory)
            .unwrap();

        assert_eq!(spans(&set), vec![("AA1", 0, 3), ("CC3", 4, 7), ("BB2", 12, 15)]);
        assert_eq!(set.decorations()[0].widget.id(), aa1);
        assert_eq!(stats.reused, 1);
        assert_eq!(stats.inserted, 1);
        assert_eq!(stats.shifted, 1);
        assert_eq!(stats.discovered, vec![Token::from("CC3")]);
    }

    #[test]
    fn test_reconcile_replace_inside_token() {
        let factory = factory();
        let matcher = TokenMatcher::default();
        let mut set = build("fly BA249 now", &factory);

        // "249" -> "7"
        set.reconcile(&Edit::new(6, 9, 1), &RescanWindow::new("fly BA7 now", &matcher), &factory)
            .unwrap();
        assert_eq!(spans(&set), vec![("BA7", 4, 7)]);
    }

    #[test]
    fn test_reconcile_multi_word_phrase() {
        let factory = factory();
        let matcher = TokenMatcher::literal("my flight").unwrap();
        let mut set = DecorationSet::build(matcher.scan("my fight"), 8, &factory);
        assert!(set.is_empty());

        // Typing 'l' completes a phrase that spans the space before the edited word
        set.reconcile(&Edit::insert(4, 1), &RescanWindow::new("my flight", &matcher), &factory)
            .unwrap();
        assert_eq!(spans(&set), vec![("my flight", 0, 9)]);

        // Editing the other word of the phrase breaks it again
        set.reconcile(&Edit::new(0, 2, 2), &RescanWindow::new("by flight", &matcher), &factory)
            .unwrap();
        assert!(set.is_empty());
    }

    #[test]
    fn test_reconcile_keeps_phrase_cut_by_window() {
        let factory = factory();
        let matcher = TokenMatcher::literal("my flight").unwrap();
        let text = "my flight x my flight";
        let mut set = DecorationSet::build(matcher.scan(text), text.len(), &factory);
        let first = set.decorations()[0].widget.id();

        // Padded window around "x" reaches into both phrases
        set.reconcile(&Edit::new(10, 11, 1), &RescanWindow::new("my flight y my flight", &matcher), &factory)
            .unwrap();
        assert_eq!(spans(&set), vec![("my flight", 0, 9), ("my flight", 12, 21)]);
        assert_eq!(set.decorations()[0].widget.id(), first);
    }

    #[test]
    fn test_reconcile_offsets_out_of_range() {
        let factory = factory();
        let matcher = TokenMatcher::default();
        let mut set = build("AA1", &factory);

        let err = set
            .reconcile(&Edit::new(2, 10, 0), &RescanWindow::new("AA", &matcher), &factory)
            .unwrap_err();
        assert_eq!(err.text_len, 3);
        assert_eq!(spans(&set), vec![("AA1", 0, 3)]);
    }

    #[test]
    fn test_reconcile_length_mismatch() {
        let factory = factory();
        let matcher = TokenMatcher::default();
        let mut set = build("AA1 x", &factory);

        let result = set.reconcile(&Edit::insert(5, 1), &RescanWindow::new("AA1 x??", &matcher), &factory);
        assert!(result.is_err());
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_at_offset() {
        let factory = factory();
        let set = build("AA1 and BB2", &factory);

        assert_eq!(set.at_offset(1).unwrap().token().as_str(), "AA1");
        assert!(set.at_offset(3).is_none());
        assert_eq!(set.at_offset(8).unwrap().token().as_str(), "BB2");
        assert!(set.at_offset(11).is_none());
    }

    #[test]
    fn test_segments() {
        let factory = factory();
        let text = "Flight BA249 departed";
        let set = build(text, &factory);
        let segments = set.segments(text);

        assert_eq!(segments.len(), 3);
        assert!(matches!(segments[0], Segment::Text("Flight ")));
        assert!(matches!(&segments[1], Segment::Widget(w) if w.label() == "BA249"));
        assert!(matches!(segments[2], Segment::Text(" departed")));
    }

    #[test]
    fn test_segments_stale_text() {
        let factory = factory();
        let set = build("some text AA1", &factory);
        let segments = set.segments("short");

        assert_eq!(segments.len(), 1);
        assert!(matches!(segments[0], Segment::Text("short")));
    }
}
