//! ResolutionCache: async memoizing token → flight-data store
//!
//! # Guarantees
//! 1. At most one entry per token, shared by every caller
//! 2. At most one in-flight resolution per token
//! 3. `get` never starts a fetch
//! 4. Listeners hear about every state transition, with no borrow held
//!
//! # Scheduling
//! Single-threaded and cooperative. Resolution tasks are `!Send` futures handed
//! to an injected [`Spawn`]. An entry is only written inside the turn that
//! receives the resolver result, so a `RefCell` is all the locking needed.

use futures::future::LocalBoxFuture;
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::rc::{Rc, Weak};

use crate::scanner::matcher::Token;

/// Resolved flight data: a JSON object
pub type Record = serde_json::Map<String, serde_json::Value>;

// =============================================================================
// Types
// =============================================================================

/// Resolution state of one token
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryState {
    Pending,
    Resolved,
    Failed,
}

impl EntryState {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryState::Pending => "pending",
            EntryState::Resolved => "resolved",
            EntryState::Failed => "failed",
        }
    }
}

/// Why a resolution failed. Stored in the entry, never thrown at renderers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "message", rename_all = "lowercase")]
pub enum ResolutionError {
    Fetch(String),
    Timeout,
    Malformed(String),
}

impl fmt::Display for ResolutionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResolutionError::Fetch(msg) => write!(f, "Fetch failed: {}", msg),
            ResolutionError::Timeout => write!(f, "Fetch timed out"),
            ResolutionError::Malformed(msg) => write!(f, "Malformed response: {}", msg),
        }
    }
}

impl std::error::Error for ResolutionError {}

/// Cached resolution state for one token
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolutionEntry {
    pub token: Token,
    pub state: EntryState,
    pub data: Option<Record>,
    pub error: Option<ResolutionError>,
    /// Number of resolutions started for this token
    pub attempts: u32,
}

impl ResolutionEntry {
    fn pending(token: Token) -> Self {
        Self {
            token,
            state: EntryState::Pending,
            data: None,
            error: None,
            attempts: 0,
        }
    }
}

/// Shared handle to the single entry for a token.
///
/// Every `observe`/`get` for the same token hands out a clone of the same handle.
#[derive(Debug, Clone)]
pub struct EntryRef(Rc<RefCell<ResolutionEntry>>);

impl EntryRef {
    fn new(token: Token) -> Self {
        Self(Rc::new(RefCell::new(ResolutionEntry::pending(token))))
    }

    pub fn token(&self) -> Token {
        self.0.borrow().token.clone()
    }

    pub fn state(&self) -> EntryState {
        self.0.borrow().state
    }

    pub fn data(&self) -> Option<Record> {
        self.0.borrow().data.clone()
    }

    pub fn error(&self) -> Option<ResolutionError> {
        self.0.borrow().error.clone()
    }

    pub fn attempts(&self) -> u32 {
        self.0.borrow().attempts
    }

    /// Copy of the entry as it is right now
    pub fn snapshot(&self) -> ResolutionEntry {
        self.0.borrow().clone()
    }

    /// True if both handles point at the same underlying entry
    pub fn ptr_eq(&self, other: &EntryRef) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    fn begin_attempt(&self) {
        let mut entry = self.0.borrow_mut();
        entry.state = EntryState::Pending;
        entry.data = None;
        entry.error = None;
        entry.attempts += 1;
    }

    fn settle(&self, result: Result<Record, ResolutionError>) -> EntryState {
        let mut entry = self.0.borrow_mut();
        match result {
            Ok(data) => {
                entry.state = EntryState::Resolved;
                entry.data = Some(data);
                entry.error = None;
            }
            Err(error) => {
                entry.state = EntryState::Failed;
                entry.data = None;
                entry.error = Some(error);
            }
        }
        entry.state
    }
}

// =============================================================================
// Collaborator traits
// =============================================================================

/// Injected async lookup of flight data for a token.
///
/// Called at most once concurrently per token; called again only after `invalidate`.
pub trait Resolver {
    fn resolve(&self, token: &Token) -> LocalBoxFuture<'static, Result<Record, ResolutionError>>;
}

impl<F, Fut> Resolver for F
where
    F: Fn(Token) -> Fut,
    Fut: Future<Output = Result<Record, ResolutionError>> + 'static,
{
    fn resolve(&self, token: &Token) -> LocalBoxFuture<'static, Result<Record, ResolutionError>> {
        Box::pin(self(token.clone()))
    }
}

/// Runs `!Send` background tasks on the current thread
pub trait Spawn {
    fn spawn(&self, task: LocalBoxFuture<'static, ()>);
}

impl Spawn for futures::executor::LocalSpawner {
    fn spawn(&self, task: LocalBoxFuture<'static, ()>) {
        if let Err(e) = futures::task::LocalSpawnExt::spawn_local(self, task) {
            log::warn!("[ResolutionCache] executor refused task: {}", e);
        }
    }
}

// =============================================================================
// ResolutionCache
// =============================================================================

/// Listener registration handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Listener = Rc<dyn Fn(&Token, EntryState)>;

/// Aggregate cache statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    pub entries: usize,
    pub pending: usize,
    pub resolved: usize,
    pub failed: usize,
    pub fetches_started: u64,
}

#[derive(Default)]
struct CacheInner {
    entries: HashMap<Token, EntryRef>,
    listeners: Vec<(ListenerId, Listener)>,
    next_listener: u64,
    fetches_started: u64,
}

/// Shared, cheaply clonable cache handle
#[derive(Clone)]
pub struct ResolutionCache {
    inner: Rc<RefCell<CacheInner>>,
    resolver: Rc<dyn Resolver>,
    spawner: Rc<dyn Spawn>,
}

impl ResolutionCache {
    pub fn new(resolver: Rc<dyn Resolver>, spawner: Rc<dyn Spawn>) -> Self {
        Self {
            inner: Rc::new(RefCell::new(CacheInner::default())),
            resolver,
            spawner,
        }
    }

    /// Existing entry, or a new `Pending` one with its resolution started
    pub fn observe(&self, token: &Token) -> EntryRef {
        if let Some(entry) = self.get(token) {
            return entry;
        }

        let entry = EntryRef::new(token.clone());
        self.inner
            .borrow_mut()
            .entries
            .insert(token.clone(), entry.clone());
        self.start_resolution(&entry, false);
        entry
    }

    /// Pure lookup. Never starts a fetch.
    pub fn get(&self, token: &Token) -> Option<EntryRef> {
        self.inner.borrow().entries.get(token).cloned()
    }

    /// Reset a settled entry to `Pending` and resolve it again.
    ///
    /// Unknown tokens and entries still in flight are left alone.
    /// Returns true if a new resolution was started.
    pub fn invalidate(&self, token: &Token) -> bool {
        let Some(entry) = self.get(token) else {
            return false;
        };
        if entry.state() == EntryState::Pending {
            return false;
        }

        log::debug!("[ResolutionCache] invalidating {}", token);
        self.start_resolution(&entry, true);
        true
    }

    /// Register a state-transition listener
    pub fn subscribe(&self, listener: impl Fn(&Token, EntryState) + 'static) -> ListenerId {
        let mut inner = self.inner.borrow_mut();
        let id = ListenerId(inner.next_listener);
        inner.next_listener += 1;
        inner.listeners.push((id, Rc::new(listener)));
        id
    }

    pub fn unsubscribe(&self, id: ListenerId) {
        self.inner.borrow_mut().listeners.retain(|(lid, _)| *lid != id);
    }

    pub fn listener_count(&self) -> usize {
        self.inner.borrow().listeners.len()
    }

    pub fn len(&self) -> usize {
        self.inner.borrow().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.borrow().entries.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.borrow();
        let mut stats = CacheStats {
            entries: inner.entries.len(),
            fetches_started: inner.fetches_started,
            ..Default::default()
        };
        for entry in inner.entries.values() {
            match entry.state() {
                EntryState::Pending => stats.pending += 1,
                EntryState::Resolved => stats.resolved += 1,
                EntryState::Failed => stats.failed += 1,
            }
        }
        stats
    }

    /// `announce` notifies listeners of the move back to `Pending` before the task is spawned
    fn start_resolution(&self, entry: &EntryRef, announce: bool) {
        entry.begin_attempt();
        self.inner.borrow_mut().fetches_started += 1;

        let token = entry.token();
        if announce {
            notify(&self.inner, &token, EntryState::Pending);
        }
        log::debug!("[ResolutionCache] resolving {} (attempt {})", token, entry.attempts());

        let fetch = self.resolver.resolve(&token);
        let entry = entry.clone();
        let cache: Weak<RefCell<CacheInner>> = Rc::downgrade(&self.inner);

        self.spawner.spawn(Box::pin(async move {
            let result = fetch.await;
            if let Err(e) = &result {
                log::warn!("[ResolutionCache] {} failed: {}", token, e);
            }
            let state = entry.settle(result);

            // Cache gone (engine stopped): the write above is simply discarded
            if let Some(inner) = cache.upgrade() {
                notify(&inner, &token, state);
            }
        }));
    }
}

fn notify(inner: &RefCell<CacheInner>, token: &Token, state: EntryState) {
    let listeners: Vec<Listener> = inner
        .borrow()
        .listeners
        .iter()
        .map(|(_, listener)| listener.clone())
        .collect();
    for listener in listeners {
        listener(token, state);
    }
}

// =============================================================================
// Tests
// =============================================================================
