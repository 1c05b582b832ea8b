//! RenderConductor: drives matcher + cache + decorations against surfaces
//!
//! # Surfaces
//! - Static snapshot: scan, observe every token, build immediately with
//!   whatever state the cache has. Never waits for resolution.
//! - Live documents: one `DecorationSet` per open document, reconciled on each
//!   edit. Cache transitions refresh the affected widgets, no rescan.
//!
//! # State machines
//! 1. Engine: Running → Stopped (`start` / `stop`)
//! 2. Live document: Clean → Dirty → Reconciling → Clean. Edits that arrive
//!    while a document is reconciling are queued and applied in order.
//!
//! # Usage
//! ```rust,ignore
//! let conductor = RenderConductor::start(EngineConfig::default(), resolver, spawner)?;
//! let snapshot = conductor.render_snapshot("Flight BA249 departed").unwrap();
//! let doc = conductor.open_document("see AA1 soon").unwrap();
//! conductor.apply_edit(doc, Edit::insert(0, 1), "xsee AA1 soon");
//! ```

use serde::{Deserialize, Serialize};
use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::rc::{Rc, Weak};

use crate::scanner::cache::{ListenerId, ResolutionCache, ResolutionEntry, Resolver, Spawn};
use crate::scanner::change::SnapshotDetector;
use crate::scanner::config::EngineConfig;
use crate::scanner::decoration::{DecorationSet, ReconcileStats, RescanWindow};
use crate::scanner::detail::DetailView;
use crate::scanner::incremental::Edit;
use crate::scanner::matcher::{MatchError, Token, TokenMatcher};
use crate::scanner::widget::{Widget, WidgetFactory};

// =============================================================================
// Types
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EngineState {
    Running,
    Stopped,
}

/// Handle for an open live document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(u64);

impl DocumentId {
    pub fn get(&self) -> u64 {
        self.0
    }
}

impl From<u64> for DocumentId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "doc#{}", self.0)
    }
}

/// Live document state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentState {
    Clean,
    Dirty,
    Reconciling,
}

/// What happened to one edit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum EditOutcome {
    /// Incremental update applied
    Reconciled(ReconcileStats),
    /// Full rebuild (inconsistent edit or pattern change)
    Rebuilt { decorations: usize },
    /// Document busy; edit applied after the current reconcile
    Queued { depth: usize },
}

/// Timing and counts for one static render
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RenderStats {
    pub total_us: u64,
    /// Content hash as hex string (u64 would overflow JS Number.MAX_SAFE_INTEGER)
    pub content_hash: String,
    pub was_skipped: bool,
    pub tokens_found: usize,
    pub distinct_tokens: usize,
    /// Tokens seen for the first time this session
    pub new_tokens: usize,
}

/// Decorated static snapshot
#[derive(Debug, Clone)]
pub struct RenderedSnapshot {
    pub decorations: DecorationSet,
    pub stats: RenderStats,
}

/// Called with the widgets of a document whose token changed state
pub type RefreshHook = Rc<dyn Fn(DocumentId, &[Widget])>;

struct LiveDocument {
    set: DecorationSet,
    state: DocumentState,
    queue: VecDeque<(Edit, String)>,
    needs_rebuild: bool,
}

/// State shared with the cache listener
#[derive(Default)]
struct Shared {
    documents: HashMap<DocumentId, LiveDocument>,
    refresh: Option<RefreshHook>,
}

#[derive(Default)]
struct StaticSurface {
    detector: SnapshotDetector,
    last: Option<DecorationSet>,
}

// =============================================================================
// RenderConductor
// =============================================================================

/// Single coordinator for both rendering surfaces.
///
/// All operations take `&self` so a refresh hook holding a handle to the
/// conductor can feed edits back in; those edits are queued, not nested.
pub struct RenderConductor {
    state: Cell<EngineState>,
    config: RefCell<EngineConfig>,
    matcher: RefCell<TokenMatcher>,
    cache: ResolutionCache,
    factory: WidgetFactory,
    /// Never borrowed across a call into the cache
    shared: Rc<RefCell<Shared>>,
    listener: Cell<Option<ListenerId>>,
    snapshot: RefCell<StaticSurface>,
    next_document: Cell<u64>,
}

impl RenderConductor {
    /// Compile the trigger and start the engine. A bad pattern is fatal.
    pub fn start(
        config: EngineConfig,
        resolver: Rc<dyn Resolver>,
        spawner: Rc<dyn Spawn>,
    ) -> Result<Self, MatchError> {
        let matcher = config.matcher().map_err(|e| {
            log::error!("[RenderConductor] not starting: {}", e);
            e
        })?;

        let cache = ResolutionCache::new(resolver, spawner);
        let shared: Rc<RefCell<Shared>> = Rc::default();

        let weak: Weak<RefCell<Shared>> = Rc::downgrade(&shared);
        let listener = cache.subscribe(move |token, _state| {
            // Surfaces torn down: nothing left to refresh
            if let Some(shared) = weak.upgrade() {
                refresh_token(&shared, token);
            }
        });

        log::info!("[RenderConductor] started with pattern {}", matcher.pattern());

        Ok(Self {
            state: Cell::new(EngineState::Running),
            config: RefCell::new(config),
            matcher: RefCell::new(matcher),
            factory: WidgetFactory::new(cache.clone()),
            cache,
            shared,
            listener: Cell::new(Some(listener)),
            snapshot: RefCell::default(),
            next_document: Cell::new(1),
        })
    }

    /// Tear down all surfaces. In-flight resolutions finish into the cache
    /// with nobody listening.
    pub fn stop(&self) {
        if self.state.get() == EngineState::Stopped {
            return;
        }
        if let Some(id) = self.listener.take() {
            self.cache.unsubscribe(id);
        }
        {
            let mut shared = self.shared.borrow_mut();
            shared.documents.clear();
            shared.refresh = None;
        }
        *self.snapshot.borrow_mut() = StaticSurface::default();
        self.state.set(EngineState::Stopped);
        log::info!("[RenderConductor] stopped");
    }

    pub fn is_running(&self) -> bool {
        self.state.get() == EngineState::Running
    }

    /// Current state name (for debugging)
    pub fn state_name(&self) -> &'static str {
        match self.state.get() {
            EngineState::Running => "running",
            EngineState::Stopped => "stopped",
        }
    }

    pub fn config(&self) -> EngineConfig {
        self.config.borrow().clone()
    }

    /// Swap the trigger pattern. Cached entries are keyed by literal token
    /// text and survive; open documents rebuild on their next edit.
    pub fn reconfigure(&self, config: EngineConfig) -> Result<(), MatchError> {
        let matcher = config.matcher()?;
        log::info!("[RenderConductor] pattern changed to {}", matcher.pattern());

        *self.matcher.borrow_mut() = matcher;
        *self.config.borrow_mut() = config;
        for document in self.shared.borrow_mut().documents.values_mut() {
            document.needs_rebuild = true;
        }
        Ok(())
    }

    pub fn cache(&self) -> &ResolutionCache {
        &self.cache
    }

    pub fn entry(&self, token: &Token) -> Option<ResolutionEntry> {
        self.cache.get(token).map(|e| e.snapshot())
    }

    /// Register the live-surface refresh hook (replaces any previous one)
    pub fn set_refresh_hook(&self, hook: impl Fn(DocumentId, &[Widget]) + 'static) {
        self.shared.borrow_mut().refresh = Some(Rc::new(hook));
    }

    // -------------------------------------------------------------------------
    // Static surface
    // -------------------------------------------------------------------------

    /// Decorate a snapshot. Returns None once stopped.
    pub fn render_snapshot(&self, text: &str) -> Option<RenderedSnapshot> {
        if !self.is_running() {
            return None;
        }
        let started = instant::Instant::now();
        let (check, previous) = {
            let matcher = self.matcher.borrow();
            let mut surface = self.snapshot.borrow_mut();
            let check = surface.detector.check(matcher.pattern(), text);
            let previous = if check.has_changed { None } else { surface.last.clone() };
            (check, previous)
        };

        if let Some(last) = previous {
            let stats = RenderStats {
                total_us: started.elapsed().as_micros() as u64,
                content_hash: format!("{:016x}", check.content_hash),
                was_skipped: true,
                tokens_found: last.len(),
                distinct_tokens: distinct(&last).len(),
                new_tokens: 0,
            };
            return Some(RenderedSnapshot { decorations: last, stats });
        }

        // Observing may run hooks synchronously; no conductor borrow is held here
        let set = self.full_build(text);
        let tokens = distinct(&set);
        let mut new_tokens = 0;
        for token in &tokens {
            if self.cache.get(token).is_none() {
                new_tokens += 1;
            }
            self.cache.observe(token);
        }

        let stats = RenderStats {
            total_us: started.elapsed().as_micros() as u64,
            content_hash: format!("{:016x}", check.content_hash),
            was_skipped: false,
            tokens_found: set.len(),
            distinct_tokens: tokens.len(),
            new_tokens,
        };
        log::debug!(
            "[RenderConductor] snapshot: {} tokens ({} new) in {}us",
            stats.tokens_found,
            stats.new_tokens,
            stats.total_us
        );

        self.snapshot.borrow_mut().last = Some(set.clone());
        Some(RenderedSnapshot { decorations: set, stats })
    }

    // -------------------------------------------------------------------------
    // Live surface
    // -------------------------------------------------------------------------

    /// Open a live document and decorate its initial text
    pub fn open_document(&self, text: &str) -> Option<DocumentId> {
        if !self.is_running() {
            return None;
        }
        let id = DocumentId(self.next_document.get());
        self.next_document.set(id.0 + 1);

        let set = self.full_build(text);
        self.observe_all(&set);
        self.shared.borrow_mut().documents.insert(
            id,
            LiveDocument {
                set,
                state: DocumentState::Clean,
                queue: VecDeque::new(),
                needs_rebuild: false,
            },
        );
        log::debug!("[RenderConductor] opened {}", id);
        Some(id)
    }

    /// Drop a document's decorations and listeners' interest in it
    pub fn close_document(&self, id: DocumentId) -> bool {
        let closed = self.shared.borrow_mut().documents.remove(&id).is_some();
        if closed {
            log::debug!("[RenderConductor] closed {}", id);
        }
        closed
    }

    /// Apply one edit event. `text` is the live text after the edit.
    ///
    /// Returns None for unknown documents or once stopped.
    pub fn apply_edit(&self, id: DocumentId, edit: Edit, text: &str) -> Option<EditOutcome> {
        if !self.is_running() {
            return None;
        }
        {
            let mut shared = self.shared.borrow_mut();
            let document = shared.documents.get_mut(&id)?;
            if document.state == DocumentState::Reconciling {
                document.queue.push_back((edit, text.to_string()));
                return Some(EditOutcome::Queued { depth: document.queue.len() });
            }
            document.state = DocumentState::Dirty;
        }

        // Hooks run while the document is still Reconciling, so edits they
        // feed back in are queued behind this one
        let mut outcome = self.reconcile_document(id, &edit, text)?;
        loop {
            let next = {
                let mut shared = self.shared.borrow_mut();
                let Some(document) = shared.documents.get_mut(&id) else {
                    break;
                };
                match document.queue.pop_front() {
                    Some(next) => next,
                    None => {
                        document.state = DocumentState::Clean;
                        break;
                    }
                }
            };
            match self.reconcile_document(id, &next.0, &next.1) {
                Some(next_outcome) => outcome = next_outcome,
                None => break,
            }
        }

        Some(outcome)
    }

    /// Full rebuild of a document from its current text
    pub fn refresh_document(&self, id: DocumentId, text: &str) -> Option<usize> {
        if !self.is_running() {
            return None;
        }
        let set = self.full_build(text);
        let count = set.len();
        {
            let mut shared = self.shared.borrow_mut();
            let document = shared.documents.get_mut(&id)?;
            document.set = set.clone();
            document.needs_rebuild = false;
        }
        self.observe_all(&set);
        Some(count)
    }

    /// Copy of a document's current decorations
    pub fn decorations(&self, id: DocumentId) -> Option<DecorationSet> {
        self.shared.borrow().documents.get(&id).map(|d| d.set.clone())
    }

    pub fn document_state(&self, id: DocumentId) -> Option<DocumentState> {
        self.shared.borrow().documents.get(&id).map(|d| d.state)
    }

    pub fn document_count(&self) -> usize {
        self.shared.borrow().documents.len()
    }

    // -------------------------------------------------------------------------
    // Widgets
    // -------------------------------------------------------------------------

    /// Detail view for a clicked widget. Reads the cache, never fetches.
    pub fn activate(&self, widget: &Widget) -> DetailView {
        widget.activate()
    }

    /// Retry a failed widget's token
    pub fn retry(&self, widget: &Widget) -> bool {
        widget.retry()
    }

    // -------------------------------------------------------------------------
    // Internals
    // -------------------------------------------------------------------------

    fn full_build(&self, text: &str) -> DecorationSet {
        let matcher = self.matcher.borrow();
        DecorationSet::build(matcher.scan(text), text.len(), &self.factory)
    }

    fn observe_all(&self, set: &DecorationSet) {
        for token in distinct(set) {
            self.cache.observe(&token);
        }
    }

    /// One reconcile step. Falls back to a full rebuild on inconsistency.
    fn reconcile_document(&self, id: DocumentId, edit: &Edit, text: &str) -> Option<EditOutcome> {
        let padding = self.config.borrow().rescan_padding;

        let (outcome, discovered) = {
            let matcher = self.matcher.borrow();
            let mut shared = self.shared.borrow_mut();
            let document = shared.documents.get_mut(&id)?;
            document.state = DocumentState::Reconciling;

            let result = if document.needs_rebuild {
                None
            } else {
                let window = RescanWindow { text, matcher: &matcher, padding };
                match document.set.reconcile(edit, &window, &self.factory) {
                    Ok(stats) => Some(stats),
                    Err(e) => {
                        log::warn!("[RenderConductor] {}: {}; rebuilding", id, e);
                        None
                    }
                }
            };

            match result {
                Some(stats) => {
                    let discovered = stats.discovered.clone();
                    (EditOutcome::Reconciled(stats), discovered)
                }
                None => {
                    document.set = DecorationSet::build(matcher.scan(text), text.len(), &self.factory);
                    document.needs_rebuild = false;
                    let discovered = distinct(&document.set);
                    (EditOutcome::Rebuilt { decorations: document.set.len() }, discovered)
                }
            }
        };

        // Borrows released: hooks fired from here may re-enter the conductor
        for token in &discovered {
            self.cache.observe(token);
        }
        Some(outcome)
    }
}

impl Drop for RenderConductor {
    fn drop(&mut self) {
        if let Some(id) = self.listener.take() {
            self.cache.unsubscribe(id);
        }
    }
}

/// Hand every widget bound to `token` to the refresh hook, per document
fn refresh_token(shared: &RefCell<Shared>, token: &Token) {
    let (hook, batches) = {
        let shared = shared.borrow();
        let Some(hook) = shared.refresh.clone() else {
            return;
        };
        let batches: Vec<(DocumentId, Vec<Widget>)> = shared
            .documents
            .iter()
            .map(|(id, doc)| (*id, doc.set.widgets_for(token).cloned().collect::<Vec<_>>()))
            .filter(|(_, widgets)| !widgets.is_empty())
            .collect();
        (hook, batches)
    };

    for (id, widgets) in batches {
        hook(id, &widgets);
    }
}

fn distinct(set: &DecorationSet) -> Vec<Token> {
    let mut seen = HashSet::new();
    set.decorations()
        .iter()
        .filter(|d| seen.insert(d.token().clone()))
        .map(|d| d.token().clone())
        .collect()
}

// =============================================================================
// Tests
// =============================================================================
