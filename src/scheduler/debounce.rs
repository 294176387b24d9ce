//! Trailing-edge debouncer over a set of dirty keys.
//!
//! Every [`register`](Debouncer::register) adds the key to the dirty set and
//! restarts one shared timer. When the timer survives a full window without
//! another registration, the whole dirty set is drained and handed to the
//! pass handler in registration order, each key exactly once.
//!
//! Passes never overlap: a pass that fires while the previous one is still
//! running waits for it.

use crate::clock::Clock;
use futures::future::BoxFuture;
use std::hash::Hash;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::debug;

/// Callback invoked with one drained batch of keys.
pub type PassHandler<K> = Arc<dyn Fn(Vec<K>) -> BoxFuture<'static, ()> + Send + Sync>;

#[derive(Debug)]
struct DebounceState<K> {
    /// Distinct keys in first-registration order.
    pending: Vec<K>,
    /// Bumped on every registration; a timer only fires if it still matches.
    generation: u64,
    passes: u64,
}

struct Inner<K> {
    window: Duration,
    clock: Arc<dyn Clock>,
    handler: PassHandler<K>,
    state: Mutex<DebounceState<K>>,
    pass_lock: tokio::sync::Mutex<()>,
}

/// Debouncer handle; cheap to clone.
pub struct Debouncer<K> {
    inner: Arc<Inner<K>>,
}

impl<K> Clone for Debouncer<K> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K> Debouncer<K>
where
    K: Eq + Hash + Clone + Send + std::fmt::Debug + 'static,
{
    pub fn new(window: Duration, clock: Arc<dyn Clock>, handler: PassHandler<K>) -> Self {
        Self {
            inner: Arc::new(Inner {
                window,
                clock,
                handler,
                state: Mutex::new(DebounceState {
                    pending: Vec::new(),
                    generation: 0,
                    passes: 0,
                }),
                pass_lock: tokio::sync::Mutex::new(()),
            }),
        }
    }

    /// Mark `key` dirty and restart the timer.
    ///
    /// Must be called from within a tokio runtime.
    pub fn register(&self, key: K) {
        let generation = {
            let mut state = self.inner.lock();
            if !state.pending.contains(&key) {
                state.pending.push(key);
            }
            state.generation += 1;
            state.generation
        };

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            inner.clock.sleep(inner.window).await;
            inner.fire(Some(generation)).await;
        });
    }

    /// Run any pending pass now instead of waiting for the timer.
    pub async fn flush(&self) {
        self.inner.fire(None).await;
    }

    /// Keys registered since the last pass.
    pub fn pending(&self) -> Vec<K> {
        self.inner.lock().pending.clone()
    }

    /// Number of passes run so far.
    pub fn passes(&self) -> u64 {
        self.inner.lock().passes
    }
}

impl<K> Inner<K>
where
    K: Eq + Hash + Clone + Send + std::fmt::Debug + 'static,
{
    fn lock(&self) -> std::sync::MutexGuard<'_, DebounceState<K>> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Drain and run. `expected` is the generation a timer was armed with;
    /// `None` forces the pass.
    async fn fire(&self, expected: Option<u64>) {
        let _pass = self.pass_lock.lock().await;
        let batch = {
            let mut state = self.lock();
            if let Some(generation) = expected {
                if state.generation != generation {
                    // superseded by a later registration
                    return;
                }
            }
            if state.pending.is_empty() {
                return;
            }
            state.passes += 1;
            // invalidate timers still sleeping for this batch
            state.generation += 1;
            std::mem::take(&mut state.pending)
        };
        debug!("Debounce pass over {} key(s): {:?}", batch.len(), batch);
        (self.handler)(batch).await;
    }
}
