//! Hierarchical cancellation context
//!
//! A [`Context`] is a node in a tree that carries a one-shot "done" signal. Emitting done
//! on a node runs its handlers in registration order and then cascades to every child,
//! transitively. Propagation is fan-out only: a child going done never touches its parent
//! or its siblings.
//!
//! One root context exists per [`TrackDownloader`](crate::TrackDownloader); the queue,
//! each consumer, each job and each transfer attempt hang below it.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tokio_util::sync::CancellationToken;

/// Events a context can carry
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ContextEvent {
    /// One-shot completion/cancellation signal
    Done,
}

type Handler = Box<dyn FnOnce() + Send + 'static>;

struct Listener {
    id: u64,
    handler: Handler,
}

#[derive(Default)]
struct State {
    emitted: bool,
    next_id: u64,
    listeners: Vec<Listener>,
}

struct Inner {
    name: String,
    token: CancellationToken,
    state: Mutex<State>,
    /// Parent node and the id of our listener on it, removed again on drop.
    /// Children keep their ancestors alive; parents only hold children weakly.
    parent: Option<(Arc<Inner>, u64)>,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, State> {
        // A panicking handler never runs under the lock, so poisoning carries no torn state
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Store the handler, or hand it back if done was already emitted
    fn register(&self, handler: Handler) -> Result<u64, Handler> {
        let mut state = self.lock();
        if state.emitted {
            return Err(handler);
        }
        let id = state.next_id;
        state.next_id += 1;
        state.listeners.push(Listener { id, handler });
        Ok(id)
    }

    fn remove(&self, id: u64) {
        self.lock().listeners.retain(|l| l.id != id);
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some((parent, id)) = self.parent.take() {
            parent.remove(id);
        }
    }
}

/// Cloneable handle to a node of the cancellation tree
#[derive(Clone)]
pub struct Context {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("name", &self.inner.name)
            .field("done", &self.is_done())
            .finish()
    }
}

impl Context {
    /// Create a root context
    pub fn root(name: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(Inner {
                name: name.into(),
                token: CancellationToken::new(),
                state: Mutex::new(State::default()),
                parent: None,
            }),
        }
    }

    /// Create a child that goes done when this context does
    ///
    /// The parent only holds a weak reference to the child, and the child unsubscribes
    /// when its last handle is dropped, so short-lived per-job contexts do not pile up
    /// on long-lived parents.
    pub fn child(&self, name: impl Into<String>) -> Self {
        let name = name.into();
        let mut parent_already_done = false;

        let inner = Arc::new_cyclic(|weak: &Weak<Inner>| {
            let weak = weak.clone();
            let cascade: Handler = Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    Context { inner }.emit(ContextEvent::Done);
                }
            });

            let parent = match self.inner.register(cascade) {
                Ok(id) => Some((self.inner.clone(), id)),
                Err(_) => {
                    parent_already_done = true;
                    None
                }
            };

            Inner {
                name,
                token: CancellationToken::new(),
                state: Mutex::new(State::default()),
                parent,
            }
        });

        let child = Self { inner };
        if parent_already_done {
            child.emit(ContextEvent::Done);
        }
        child
    }

    /// Name used in log records
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Register a handler for `event`
    ///
    /// Done is one-shot, so a handler registered through `on` runs at most once just like
    /// one registered through [`once`](Self::once). Registering after done has been
    /// emitted runs the handler immediately on the caller's thread.
    pub fn on<F>(&self, event: ContextEvent, handler: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.once(event, handler);
    }

    /// Register a handler that runs at most once
    pub fn once<F>(&self, event: ContextEvent, handler: F)
    where
        F: FnOnce() + Send + 'static,
    {
        match event {
            ContextEvent::Done => {
                if let Err(handler) = self.inner.register(Box::new(handler)) {
                    self.invoke(handler);
                }
            }
        }
    }

    /// Emit `event`; returns true for the first emission only
    ///
    /// Handlers run synchronously in registration order. Later emissions are no-ops.
    /// A panicking handler is logged and does not stop the remaining handlers.
    pub fn emit(&self, event: ContextEvent) -> bool {
        match event {
            ContextEvent::Done => {
                let listeners = {
                    let mut state = self.inner.lock();
                    if state.emitted {
                        return false;
                    }
                    state.emitted = true;
                    std::mem::take(&mut state.listeners)
                };

                tracing::debug!(
                    context = %self.inner.name,
                    listeners = listeners.len(),
                    "context done"
                );

                self.inner.token.cancel();
                for listener in listeners {
                    self.invoke(listener.handler);
                }
                true
            }
        }
    }

    /// Whether done has been emitted
    pub fn is_done(&self) -> bool {
        self.inner.token.is_cancelled()
    }

    /// Resolves once done has been emitted
    pub async fn done(&self) {
        self.inner.token.cancelled().await
    }

    /// Token cancelled together with this context, for `select!` arms and agents
    pub fn token(&self) -> CancellationToken {
        self.inner.token.clone()
    }

    /// Number of handlers still waiting for done
    pub fn listener_count(&self) -> usize {
        self.inner.lock().listeners.len()
    }

    fn invoke(&self, handler: Handler) {
        if catch_unwind(AssertUnwindSafe(handler)).is_err() {
            tracing::error!(context = %self.inner.name, "done handler panicked");
        }
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn counter() -> Arc<AtomicUsize> {
        Arc::new(AtomicUsize::new(0))
    }

    fn count_on(ctx: &Context, hits: &Arc<AtomicUsize>) {
        let hits = hits.clone();
        ctx.once(ContextEvent::Done, move || {
            hits.fetch_add(1, Ordering::SeqCst);
        });
    }

    #[test]
    fn handlers_run_in_registration_order() {
        let ctx = Context::root("root");
        let order = Arc::new(Mutex::new(Vec::new()));

        for i in 0..5 {
            let order = order.clone();
            ctx.on(ContextEvent::Done, move || order.lock().unwrap().push(i));
        }

        assert!(ctx.emit(ContextEvent::Done));
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn repeated_emit_fires_each_handler_once() {
        let ctx = Context::root("root");
        let hits = counter();
        count_on(&ctx, &hits);

        assert!(ctx.emit(ContextEvent::Done));
        assert!(!ctx.emit(ContextEvent::Done));
        assert!(!ctx.emit(ContextEvent::Done));

        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(ctx.is_done());
    }

    #[test]
    fn cascade_reaches_every_descendant_exactly_once() {
        let root = Context::root("root");
        let queue = root.child("queue");
        let consumer_a = queue.child("consumer-a");
        let consumer_b = queue.child("consumer-b");
        let job = consumer_a.child("job");
        let transfer = job.child("transfer");

        let hits: Vec<_> = (0..6).map(|_| counter()).collect();
        for (ctx, hits) in [&root, &queue, &consumer_a, &consumer_b, &job, &transfer]
            .into_iter()
            .zip(&hits)
        {
            count_on(ctx, hits);
        }

        root.emit(ContextEvent::Done);
        root.emit(ContextEvent::Done);
        queue.emit(ContextEvent::Done);

        for (i, hits) in hits.iter().enumerate() {
            assert_eq!(hits.load(Ordering::SeqCst), 1, "context #{i}");
        }
        assert!(transfer.is_done());
    }

    #[test]
    fn child_done_does_not_reach_parent_or_siblings() {
        let parent = Context::root("consumer");
        let first = parent.child("job-1");
        let second = parent.child("job-2");

        let parent_hits = counter();
        let sibling_hits = counter();
        count_on(&parent, &parent_hits);
        count_on(&second, &sibling_hits);

        first.emit(ContextEvent::Done);

        assert!(first.is_done());
        assert!(!parent.is_done());
        assert!(!second.is_done());
        assert_eq!(parent_hits.load(Ordering::SeqCst), 0);
        assert_eq!(sibling_hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn late_registration_fires_immediately() {
        let ctx = Context::root("root");
        ctx.emit(ContextEvent::Done);

        let hits = counter();
        count_on(&ctx, &hits);
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        let child = ctx.child("late");
        assert!(child.is_done());
    }

    #[test]
    fn dropped_children_unsubscribe_from_parent() {
        let parent = Context::root("consumer");
        for i in 0..100 {
            let job = parent.child(format!("job-{i}"));
            job.emit(ContextEvent::Done);
        }
        assert_eq!(parent.listener_count(), 0);

        let alive = parent.child("alive");
        assert_eq!(parent.listener_count(), 1);
        drop(alive);
        assert_eq!(parent.listener_count(), 0);
    }

    #[test]
    fn panicking_handler_does_not_stop_the_rest() {
        let ctx = Context::root("root");
        let hits = counter();
        ctx.once(ContextEvent::Done, || panic!("handler failure"));
        count_on(&ctx, &hits);

        ctx.emit(ContextEvent::Done);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn done_future_resolves_on_cascade() {
        let root = Context::root("root");
        let job = root.child("queue").child("job");

        let waiter = {
            let job = job.clone();
            tokio::spawn(async move { job.done().await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        root.emit(ContextEvent::Done);

        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("job context should go done")
            .unwrap();
    }
}
