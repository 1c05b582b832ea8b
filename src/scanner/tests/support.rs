//! Test doubles: a resolver settled by hand and an inline spawner

use futures::channel::oneshot;
use futures::executor::LocalPool;
use futures::future::LocalBoxFuture;
use std::cell::RefCell;
use std::rc::Rc;

use crate::scanner::cache::{Record, ResolutionCache, ResolutionError, Resolver, Spawn};
use crate::scanner::conductor::RenderConductor;
use crate::scanner::config::EngineConfig;
use crate::scanner::matcher::Token;

type Reply = Result<Record, ResolutionError>;

/// Resolver whose fetches stay pending until the test settles them
#[derive(Clone, Default)]
pub struct ScriptedResolver {
    calls: Rc<RefCell<Vec<Token>>>,
    waiting: Rc<RefCell<Vec<(Token, oneshot::Sender<Reply>)>>>,
}

impl Resolver for ScriptedResolver {
    fn resolve(&self, token: &Token) -> LocalBoxFuture<'static, Reply> {
        self.calls.borrow_mut().push(token.clone());
        let (tx, rx) = oneshot::channel();
        self.waiting.borrow_mut().push((token.clone(), tx));
        Box::pin(async move {
            rx.await
                .unwrap_or_else(|_| Err(ResolutionError::Fetch("resolver dropped".to_string())))
        })
    }
}

impl ScriptedResolver {
    /// Resolver calls made for `token`
    pub fn calls(&self, token: &str) -> usize {
        self.calls.borrow().iter().filter(|t| t.as_str() == token).count()
    }

    pub fn total_calls(&self) -> usize {
        self.calls.borrow().len()
    }

    /// Fetches still waiting for a reply
    pub fn in_flight(&self) -> usize {
        self.waiting.borrow().len()
    }

    pub fn succeed(&self, token: &str, record: Record) -> bool {
        self.settle(token, Ok(record))
    }

    pub fn fail(&self, token: &str, error: ResolutionError) -> bool {
        self.settle(token, Err(error))
    }

    /// Reply to the oldest waiting fetch for `token`
    fn settle(&self, token: &str, reply: Reply) -> bool {
        let idx = self.waiting.borrow().iter().position(|(t, _)| t.as_str() == token);
        let Some(idx) = idx else {
            return false;
        };
        let (_, tx) = self.waiting.borrow_mut().remove(idx);
        tx.send(reply).is_ok()
    }
}

/// Runs each task to completion on the spot. Only for futures that are
/// already ready, such as `futures::future::ready`.
pub struct InlineSpawner;

impl Spawn for InlineSpawner {
    fn spawn(&self, task: LocalBoxFuture<'static, ()>) {
        futures::executor::block_on(task);
    }
}

pub fn harness() -> (LocalPool, ResolutionCache, ScriptedResolver) {
    let pool = LocalPool::new();
    let resolver = ScriptedResolver::default();
    let cache = ResolutionCache::new(Rc::new(resolver.clone()), Rc::new(pool.spawner()));
    (pool, cache, resolver)
}

pub fn conductor() -> (LocalPool, RenderConductor, ScriptedResolver) {
    let pool = LocalPool::new();
    let resolver = ScriptedResolver::default();
    let conductor = RenderConductor::start(
        EngineConfig::default(),
        Rc::new(resolver.clone()),
        Rc::new(pool.spawner()),
    )
    .unwrap();
    (pool, conductor, resolver)
}

pub fn record(pairs: &[(&str, &str)]) -> Record {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), serde_json::Value::from(*v)))
        .collect()
}
