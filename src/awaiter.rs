//! Bridges between result cells and suspend/resume style awaiting.
//!
//! [`Awaitable`] is the minimal contract a suspension mechanism needs:
//! completion check, result retrieval, and a single continuation. Every
//! awaitable here is also a [`Future`], so it works both inside the
//! noop-waker [`CoroutineScheduler`](crate::CoroutineScheduler) and under a
//! real executor.
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};

use parking_lot::Mutex;

use crate::callbackable::isolate;
use crate::executor::Job;
use crate::result::{AsyncResult, Outcome};
use crate::Error;

/// Awaiter contract.
pub trait Awaitable {
    type Output;

    fn is_completed(&self) -> bool;

    /// The outcome of a completed awaiter.
    ///
    /// # Errors
    ///
    /// The stored failure, [`Error::Cancelled`] for a cancelled source, or
    /// [`Error::NotSupported`] if called before completion.
    fn get_result(&self) -> Result<Self::Output, Error>;

    /// Runs `continuation` once on completion, or right away if already
    /// completed.
    fn on_completed(&self, continuation: Job);
}

struct CompletionState<T> {
    outcome: Option<Result<T, Error>>,
    continuation: Option<Job>,
    waker: Option<Waker>,
}

/// A standalone single-continuation awaiter.
///
/// Completed once with [`set_result`](Self::set_result) or
/// [`set_exception`](Self::set_exception); later completions are ignored.
pub struct Completion<T> {
    state: Arc<Mutex<CompletionState<T>>>,
}

impl<T> Clone for Completion<T> {
    fn clone(&self) -> Self {
        Self {
            state: self.state.clone(),
        }
    }
}

impl<T> Default for Completion<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Completion<T> {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(CompletionState {
                outcome: None,
                continuation: None,
                waker: None,
            })),
        }
    }

    pub fn set_result(&self, value: T) -> bool {
        self.complete(Ok(value))
    }

    pub fn set_exception(&self, err: Error) -> bool {
        self.complete(Err(err))
    }

    fn complete(&self, outcome: Result<T, Error>) -> bool {
        let (continuation, waker) = {
            let mut state = self.state.lock();
            if state.outcome.is_some() {
                return false;
            }
            state.outcome = Some(outcome);
            (state.continuation.take(), state.waker.take())
        };
        if let Some(waker) = waker {
            waker.wake();
        }
        if let Some(continuation) = continuation {
            isolate("awaiter continuation", continuation);
        }
        true
    }
}

impl<T: Clone> Awaitable for Completion<T> {
    type Output = T;

    fn is_completed(&self) -> bool {
        self.state.lock().outcome.is_some()
    }

    fn get_result(&self) -> Result<T, Error> {
        match &self.state.lock().outcome {
            Some(outcome) => outcome.clone(),
            None => Err(Error::NotSupported("awaiter is not completed")),
        }
    }

    fn on_completed(&self, continuation: Job) {
        let mut state = self.state.lock();
        if state.outcome.is_some() {
            drop(state);
            isolate("awaiter continuation", continuation);
            return;
        }
        // A second registration runs after the first instead of replacing it.
        let chained: Job = match state.continuation.take() {
            Some(first) => Box::new(move || {
                isolate("awaiter continuation", first);
                continuation();
            }),
            None => continuation,
        };
        state.continuation = Some(chained);
    }
}

impl<T: Clone> Future for Completion<T> {
    type Output = Result<T, Error>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut state = self.state.lock();
        match &state.outcome {
            Some(outcome) => Poll::Ready(outcome.clone()),
            None => {
                state.waker = Some(cx.waker().clone());
                Poll::Pending
            }
        }
    }
}

/// Awaiter view of an [`AsyncResult`], returned by
/// [`AsyncResult::awaiter`].
pub struct ResultAwaiter<T> {
    result: AsyncResult<T>,
}

impl<T> ResultAwaiter<T> {
    pub(crate) fn new(result: AsyncResult<T>) -> Self {
        Self { result }
    }
}

impl<T: Clone + 'static> Awaitable for ResultAwaiter<T> {
    type Output = T;

    fn is_completed(&self) -> bool {
        self.result.is_done()
    }

    fn get_result(&self) -> Result<T, Error> {
        self.result
            .outcome()
            .map(Outcome::into_result)
            .unwrap_or(Err(Error::NotSupported("awaiter is not completed")))
    }

    fn on_completed(&self, continuation: Job) {
        self.result
            .callbackable()
            .on_callback(move |_| continuation());
    }
}

impl<T: Clone> Future for ResultAwaiter<T> {
    type Output = Result<T, Error>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if !self.result.register_waker(cx.waker()) {
            return Poll::Pending;
        }
        match self.result.outcome() {
            Some(outcome) => Poll::Ready(outcome.into_result()),
            None => Poll::Pending,
        }
    }
}

/// Turns any [`Awaitable`] into a future.
pub fn await_completion<A: Awaitable>(awaitable: A) -> AwaitFuture<A> {
    AwaitFuture {
        awaitable,
        waker: Arc::new(Mutex::new(None)),
        registered: false,
    }
}

/// Future returned by [`await_completion`].
pub struct AwaitFuture<A> {
    awaitable: A,
    waker: Arc<Mutex<Option<Waker>>>,
    registered: bool,
}

impl<A: Awaitable + Unpin> Future for AwaitFuture<A> {
    type Output = Result<A::Output, Error>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if self.awaitable.is_completed() {
            return Poll::Ready(self.awaitable.get_result());
        }
        *self.waker.lock() = Some(cx.waker().clone());
        if !self.registered {
            self.registered = true;
            let slot = self.waker.clone();
            self.awaitable.on_completed(Box::new(move || {
                if let Some(waker) = slot.lock().take() {
                    waker.wake();
                }
            }));
        }
        // The continuation may have fired during registration.
        if self.awaitable.is_completed() {
            Poll::Ready(self.awaitable.get_result())
        } else {
            Poll::Pending
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::executor::block_on;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    #[test]
    fn continuation_before_completion_fires_once() {
        let awaiter = Completion::<u32>::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        awaiter.on_completed(Box::new(move || {
            h.fetch_add(1, Ordering::SeqCst);
        }));
        assert!(!awaiter.is_completed());
        assert!(matches!(awaiter.get_result(), Err(Error::NotSupported(_))));

        assert!(awaiter.set_result(1));
        assert!(!awaiter.set_exception(Error::msg("late")));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(awaiter.get_result().unwrap(), 1);
    }

    #[test]
    fn continuation_after_completion_fires_immediately() {
        let awaiter = Completion::<u32>::new();
        awaiter.set_exception(Error::msg("nope"));
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        awaiter.on_completed(Box::new(move || {
            h.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(awaiter.get_result().is_err());
    }

    #[test]
    fn two_continuations_both_run() {
        let awaiter = Completion::<()>::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        for tag in [1, 2] {
            let order = order.clone();
            awaiter.on_completed(Box::new(move || order.lock().push(tag)));
        }
        awaiter.set_result(());
        assert_eq!(*order.lock(), vec![1, 2]);
    }

    #[test]
    fn completion_awaited_across_threads() {
        let awaiter = Completion::<String>::new();
        let producer = awaiter.clone();
        let task = thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            producer.set_result(String::from("🍓"));
        });
        assert_eq!(block_on(awaiter).unwrap(), "🍓");
        task.join().expect("The producer thread has panicked");
    }

    #[test]
    fn result_awaiter_reports_cancellation() {
        let result = AsyncResult::<u32>::cancelable();
        let awaiter = result.awaiter();
        assert!(!awaiter.is_completed());
        result.cancel().unwrap();
        assert!(awaiter.is_completed());
        assert!(matches!(awaiter.get_result(), Err(Error::Cancelled)));
        assert!(matches!(block_on(result.awaiter()), Err(Error::Cancelled)));
    }

    #[test]
    fn await_completion_wraps_any_awaitable() {
        let result = AsyncResult::<u32>::new();
        let producer = result.clone();
        let task = thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            producer.set_result(9);
        });
        assert_eq!(block_on(await_completion(result.awaiter())).unwrap(), 9);
        task.join().expect("The producer thread has panicked");
    }
}
