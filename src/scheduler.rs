use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::Context;

use futures::future::BoxFuture;
use futures::task::noop_waker;
use futures::FutureExt;
use parking_lot::Mutex;

use crate::result::AsyncResult;
use crate::Error;

/// A coroutine stored in the scheduler.
struct Coroutine {
    future: BoxFuture<'static, ()>,
    /// False once the coroutine's cell is done, e.g. cancelled from outside.
    alive: Box<dyn Fn() -> bool + Send>,
}

struct Inner {
    tasks: Mutex<Vec<Coroutine>>,
    /// Coroutines started since the last tick, including from inside one.
    incoming: Mutex<Vec<Coroutine>>,
    pending: AtomicUsize,
}

/// Frame-stepped cooperative scheduler.
///
/// Coroutines are polled with a noop waker, once each per [`tick`](Self::tick).
/// The host calls `tick` once per frame. A coroutine suspends by returning
/// `Pending` (see [`yield_now`](crate::yield_now), [`delay`](crate::delay),
/// [`wait_until`](crate::wait_until), [`AsyncResult::wait`]) and is simply
/// polled again on the next tick; the thread is never blocked.
///
/// # Example
///
/// ```
/// use async_result::{yield_now, CoroutineScheduler};
///
/// let scheduler = CoroutineScheduler::new();
/// let result = scheduler.start(async {
///     yield_now().await;
///     Ok(42u32)
/// });
///
/// scheduler.tick();
/// assert!(!result.is_done());
/// scheduler.tick();
/// assert_eq!(result.result(), Some(42));
/// ```
#[derive(Clone)]
pub struct CoroutineScheduler {
    inner: Arc<Inner>,
}

impl CoroutineScheduler {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                tasks: Mutex::new(Vec::new()),
                incoming: Mutex::new(Vec::new()),
                pending: AtomicUsize::new(0),
            }),
        }
    }

    /// Starts a coroutine. The returned cell is cancelable; cancelling it
    /// drops the coroutine at the next tick.
    ///
    /// A coroutine that panics fails its cell with [`Error::Panicked`].
    pub fn start<T, F>(&self, future: F) -> AsyncResult<T>
    where
        T: Send + 'static,
        F: Future<Output = Result<T, Error>> + Send + 'static,
    {
        let result = AsyncResult::cancelable();
        self.spawn_for(result.clone(), future);
        result
    }

    /// Starts a coroutine that receives its own cell, so it can poll
    /// [`AsyncResult::is_cancellation_requested`] between steps.
    pub fn start_coroutine<T, F, Fut>(&self, f: F) -> AsyncResult<T>
    where
        T: Send + 'static,
        F: FnOnce(AsyncResult<T>) -> Fut,
        Fut: Future<Output = Result<T, Error>> + Send + 'static,
    {
        let result = AsyncResult::cancelable();
        let future = f(result.clone());
        self.spawn_for(result.clone(), future);
        result
    }

    /// Drives `future` and settles `result` with its output.
    pub(crate) fn spawn_for<T, F>(&self, result: AsyncResult<T>, future: F)
    where
        T: Send + 'static,
        F: Future<Output = Result<T, Error>> + Send + 'static,
    {
        let watch = result.clone();
        let wrapped = async move {
            let body = AssertUnwindSafe(future).catch_unwind().await;
            crate::settle(&result, body);
        };
        self.inner.pending.fetch_add(1, Ordering::AcqRel);
        self.inner.incoming.lock().push(Coroutine {
            future: wrapped.boxed(),
            alive: Box::new(move || !watch.is_done()),
        });
    }

    /// Polls every live coroutine once, in start order.
    ///
    /// Returns the number of coroutines polled. Must not be called from
    /// inside a coroutine of the same scheduler.
    pub fn tick(&self) -> usize {
        let mut tasks = self.inner.tasks.lock();
        tasks.append(&mut self.inner.incoming.lock());
        if tasks.is_empty() {
            return 0;
        }

        let waker = noop_waker();
        let mut cx = Context::from_waker(&waker);
        let mut polled = 0;
        let mut finished = 0;
        tasks.retain_mut(|task| {
            if !(task.alive)() {
                log::debug!("dropping coroutine whose result is already done");
                finished += 1;
                return false;
            }
            polled += 1;
            let pending = task.future.as_mut().poll(&mut cx).is_pending();
            if !pending {
                finished += 1;
            }
            pending
        });
        self.inner.pending.fetch_sub(finished, Ordering::AcqRel);
        polled
    }

    /// Ticks until nothing is pending or `max_ticks` is reached. Returns the
    /// number of ticks run.
    pub fn run_until_idle(&self, max_ticks: usize) -> usize {
        let mut ticks = 0;
        while ticks < max_ticks && self.pending_count() > 0 {
            self.tick();
            ticks += 1;
        }
        ticks
    }

    /// Number of coroutines not yet finished or dropped.
    pub fn pending_count(&self) -> usize {
        self.inner.pending.load(Ordering::Acquire)
    }
}

impl Default for CoroutineScheduler {
    fn default() -> Self {
        Self::new()
    }
}
