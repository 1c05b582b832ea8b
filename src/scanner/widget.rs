//! Widgets: opaque clickable units bound to a token
//!
//! A widget holds its token as a lookup key into the shared cache, never a
//! pointer into cache internals. Activation reads the current entry with
//! `ResolutionCache::get`, so clicking never starts network work by itself.

use serde::{Deserialize, Serialize};
use std::cell::Cell;
use std::fmt;
use std::rc::Rc;

use crate::scanner::cache::{EntryState, ResolutionCache};
use crate::scanner::detail::DetailView;
use crate::scanner::matcher::Token;

/// Unique per factory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WidgetId(u64);

impl WidgetId {
    pub fn get(&self) -> u64 {
        self.0
    }
}

/// Visual state a surface should render the widget in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WidgetStyle {
    Loading,
    Ready,
    Failed,
}

impl WidgetStyle {
    pub fn css_class(&self) -> &'static str {
        match self {
            WidgetStyle::Loading => "flight-widget is-loading",
            WidgetStyle::Ready => "flight-widget",
            WidgetStyle::Failed => "flight-widget is-failed",
        }
    }
}

impl From<EntryState> for WidgetStyle {
    fn from(state: EntryState) -> Self {
        match state {
            EntryState::Pending => WidgetStyle::Loading,
            EntryState::Resolved => WidgetStyle::Ready,
            EntryState::Failed => WidgetStyle::Failed,
        }
    }
}

// =============================================================================
// Widget
// =============================================================================

/// Renderable unit for one decoration
#[derive(Clone)]
pub struct Widget {
    id: WidgetId,
    token: Token,
    cache: ResolutionCache,
}

impl fmt::Debug for Widget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Widget")
            .field("id", &self.id)
            .field("token", &self.token)
            .finish()
    }
}

impl Widget {
    pub fn id(&self) -> WidgetId {
        self.id
    }

    pub fn token(&self) -> &Token {
        &self.token
    }

    /// Text shown inline in place of the raw token
    pub fn label(&self) -> &str {
        self.token.as_str()
    }

    /// Current entry state. Unknown tokens read as pending.
    pub fn state(&self) -> EntryState {
        self.cache
            .get(&self.token)
            .map(|entry| entry.state())
            .unwrap_or(EntryState::Pending)
    }

    pub fn style(&self) -> WidgetStyle {
        self.state().into()
    }

    /// Detail view for the current entry. Never fetches.
    pub fn activate(&self) -> DetailView {
        let entry = self.cache.get(&self.token).map(|e| e.snapshot());
        DetailView::from_entry(&self.token, entry.as_ref())
    }

    /// Retry affordance of a failed widget
    pub fn retry(&self) -> bool {
        self.cache.invalidate(&self.token)
    }
}

// =============================================================================
// WidgetFactory
// =============================================================================

/// Produces widgets that close over their token and the shared cache
#[derive(Clone)]
pub struct WidgetFactory {
    cache: ResolutionCache,
    next_id: Rc<Cell<u64>>,
}

impl WidgetFactory {
    pub fn new(cache: ResolutionCache) -> Self {
        Self {
            cache,
            next_id: Rc::new(Cell::new(1)),
        }
    }

    pub fn cache(&self) -> &ResolutionCache {
        &self.cache
    }

    pub fn make(&self, token: &Token) -> Widget {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        Widget {
            id: WidgetId(id),
            token: token.clone(),
            cache: self.cache.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scanner::cache::ResolutionError;
    use crate::scanner::detail::DetailState;
    use crate::scanner::tests::support::{harness, record};

    #[test]
    fn test_widgets_are_distinct_instances() {
        let (_pool, cache, _resolver) = harness();
        let factory = WidgetFactory::new(cache);
        let a = factory.make(&Token::from("AA1"));
        let b = factory.make(&Token::from("AA1"));

        assert_ne!(a.id(), b.id());
        assert_eq!(a.token(), b.token());
    }

    #[test]
    fn test_cloned_factories_share_ids() {
        let (_pool, cache, _resolver) = harness();
        let factory = WidgetFactory::new(cache);
        let other = factory.clone();

        let a = factory.make(&Token::from("AA1"));
        let b = other.make(&Token::from("AA1"));
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_activate_does_not_fetch() {
        let (_pool, cache, resolver) = harness();
        let factory = WidgetFactory::new(cache);
        let widget = factory.make(&Token::from("BA249"));

        let view = widget.activate();
        assert_eq!(view.state, DetailState::Loading);
        assert_eq!(widget.style(), WidgetStyle::Loading);
        assert_eq!(resolver.total_calls(), 0);
    }

    #[test]
    fn test_style_follows_entry() {
        let (mut pool, cache, resolver) = harness();
        let factory = WidgetFactory::new(cache.clone());
        let ok = factory.make(&Token::from("AA1"));
        let bad = factory.make(&Token::from("ZZ0"));
        cache.observe(ok.token());
        cache.observe(bad.token());

        resolver.succeed("AA1", record(&[("status", "On time")]));
        resolver.fail("ZZ0", ResolutionError::Fetch("404".into()));
        pool.run_until_stalled();

        assert_eq!(ok.style(), WidgetStyle::Ready);
        assert_eq!(bad.style(), WidgetStyle::Failed);
        assert_eq!(bad.style().css_class(), "flight-widget is-failed");
        assert_eq!(ok.activate().rows[0].1, "On time");
    }

    #[test]
    fn test_retry_failed_widget() {
        let (mut pool, cache, resolver) = harness();
        let factory = WidgetFactory::new(cache.clone());
        let widget = factory.make(&Token::from("ZZ0"));
        cache.observe(widget.token());
        resolver.fail("ZZ0", ResolutionError::Timeout);
        pool.run_until_stalled();

        assert!(widget.activate().can_retry);
        assert!(widget.retry());
        assert_eq!(widget.style(), WidgetStyle::Loading);
        assert_eq!(resolver.calls("ZZ0"), 2);
    }
}
