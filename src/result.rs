//! The single-assignment result cell.
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll, Waker};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::awaiter::ResultAwaiter;
use crate::callbackable::{self, Callback, CallbackRegistry, Callbackable};
use crate::{Error, Promise};

/// Terminal state of a cell.
#[derive(Debug, Clone)]
pub enum Outcome<T> {
    Success(T),
    Failure(Error),
    Cancelled,
}

impl<T> Outcome<T> {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success(_))
    }

    /// The error a consumer observes: the failure itself, or the
    /// cancellation marker.
    pub fn exception(&self) -> Option<Error> {
        match self {
            Outcome::Success(_) => None,
            Outcome::Failure(err) => Some(err.clone()),
            Outcome::Cancelled => Some(Error::Cancelled),
        }
    }

    pub fn into_result(self) -> Result<T, Error> {
        match self {
            Outcome::Success(value) => Ok(value),
            Outcome::Failure(err) => Err(err),
            Outcome::Cancelled => Err(Error::Cancelled),
        }
    }
}

struct State<T> {
    outcome: Option<Outcome<T>>,
    callbacks: CallbackRegistry<AsyncResult<T>>,
    wakers: Vec<Waker>,
}

struct Shared<T> {
    state: Mutex<State<T>>,
    done: Condvar,
    cancelable: bool,
    cancellation_requested: AtomicBool,
}

/// A thread-safe single-assignment result.
///
/// Clones share the same cell. Exactly one of [`set_result`](Self::set_result),
/// [`set_exception`](Self::set_exception) or [`set_cancelled`](Self::set_cancelled)
/// takes effect; the rest are silent no-ops.
pub struct AsyncResult<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for AsyncResult<T> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<T> Default for AsyncResult<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for AsyncResult<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.state.lock();
        let status = match &state.outcome {
            None => "pending",
            Some(Outcome::Success(_)) => "succeeded",
            Some(Outcome::Failure(_)) => "failed",
            Some(Outcome::Cancelled) => "cancelled",
        };
        f.debug_struct("AsyncResult")
            .field("status", &status)
            .field("cancelable", &self.shared.cancelable)
            .field("pending_callbacks", &state.callbacks.len())
            .finish()
    }
}

impl<T> AsyncResult<T> {
    /// A pending cell that rejects [`cancel`](Self::cancel).
    pub fn new() -> Self {
        Self::with_cancelable(false)
    }

    /// A pending cell that accepts [`cancel`](Self::cancel).
    pub fn cancelable() -> Self {
        Self::with_cancelable(true)
    }

    fn with_cancelable(cancelable: bool) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State {
                    outcome: None,
                    callbacks: CallbackRegistry::new(),
                    wakers: Vec::new(),
                }),
                done: Condvar::new(),
                cancelable,
                cancellation_requested: AtomicBool::new(false),
            }),
        }
    }

    /// An already-succeeded cell.
    pub fn ready(value: T) -> Self {
        let result = Self::new();
        result.set_result(value);
        result
    }

    /// An already-failed cell.
    pub fn from_error(err: Error) -> Self {
        let result = Self::new();
        result.set_exception(err);
        result
    }

    pub fn is_done(&self) -> bool {
        self.shared.state.lock().outcome.is_some()
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.shared.state.lock().outcome, Some(Outcome::Cancelled))
    }

    pub fn is_cancelable(&self) -> bool {
        self.shared.cancelable
    }

    pub fn is_cancellation_requested(&self) -> bool {
        self.shared.cancellation_requested.load(Ordering::Acquire)
    }

    /// The error of a failed or cancelled cell.
    pub fn exception(&self) -> Option<Error> {
        self.shared
            .state
            .lock()
            .outcome
            .as_ref()
            .and_then(Outcome::exception)
    }

    pub fn set_result(&self, value: T) -> bool {
        self.complete(Outcome::Success(value))
    }

    pub fn set_exception(&self, err: Error) -> bool {
        self.complete(Outcome::Failure(err))
    }

    /// Completes the cell as cancelled. No-op on a non-cancelable cell.
    pub fn set_cancelled(&self) -> bool {
        if !self.shared.cancelable {
            return false;
        }
        self.complete(Outcome::Cancelled)
    }

    /// Requests cancellation and completes the cell as cancelled.
    ///
    /// Returns `Ok(false)` if the cell was already done.
    ///
    /// # Errors
    ///
    /// [`Error::NotSupported`] if the cell was created with [`new`](Self::new).
    pub fn cancel(&self) -> Result<bool, Error> {
        if !self.shared.cancelable {
            return Err(Error::NotSupported("this result is not cancelable"));
        }
        if self.is_done() {
            return Ok(false);
        }
        self.shared.cancellation_requested.store(true, Ordering::Release);
        Ok(self.set_cancelled())
    }

    /// Blocks the calling thread until the cell is done.
    pub fn wait_for_done(&self) {
        let mut state = self.shared.state.lock();
        while state.outcome.is_none() {
            self.shared.done.wait(&mut state);
        }
    }

    /// Blocks for at most `timeout`. Returns whether the cell is done.
    /// Timing out leaves the cell untouched.
    pub fn wait_for_done_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.shared.state.lock();
        while state.outcome.is_none() {
            if self.shared.done.wait_until(&mut state, deadline).timed_out() {
                return state.outcome.is_some();
            }
        }
        true
    }

    /// A future that resolves once the cell is done, without blocking the
    /// thread that polls it.
    pub fn wait(&self) -> WaitForDone<T> {
        WaitForDone {
            result: self.clone(),
        }
    }

    pub fn callbackable(&self) -> Callbackable<'_, T> {
        Callbackable::new(self)
    }

    pub fn synchronized(&self) -> Synchronized<'_, T> {
        Synchronized { result: self }
    }

    pub fn awaiter(&self) -> ResultAwaiter<T> {
        ResultAwaiter::new(self.clone())
    }

    fn complete(&self, outcome: Outcome<T>) -> bool {
        let (callbacks, wakers) = {
            let mut state = self.shared.state.lock();
            if state.outcome.is_some() {
                return false;
            }
            state.outcome = Some(outcome);
            self.shared.done.notify_all();
            (state.callbacks.take(), std::mem::take(&mut state.wakers))
        };
        for waker in wakers {
            waker.wake();
        }
        callbackable::fire(callbacks, self);
        true
    }

    pub(crate) fn add_callback(&self, callback: Callback<AsyncResult<T>>) {
        {
            let mut state = self.shared.state.lock();
            if state.outcome.is_none() {
                state.callbacks.push(callback);
                return;
            }
        }
        callbackable::fire(vec![callback], self);
    }

    /// Registers `waker` unless the cell is already done. Returns `true`
    /// when done.
    pub(crate) fn register_waker(&self, waker: &Waker) -> bool {
        let mut state = self.shared.state.lock();
        if state.outcome.is_some() {
            return true;
        }
        if !state.wakers.iter().any(|w| w.will_wake(waker)) {
            state.wakers.push(waker.clone());
        }
        false
    }

    /// Runs `f` under the cell lock if the cell is still pending, so that
    /// `f` cannot interleave with a terminal transition.
    pub(crate) fn with_pending<R>(&self, f: impl FnOnce() -> R) -> Option<R> {
        let state = self.shared.state.lock();
        if state.outcome.is_some() {
            return None;
        }
        let out = f();
        drop(state);
        Some(out)
    }
}

impl<T: Clone> AsyncResult<T> {
    /// The value of a succeeded cell.
    pub fn result(&self) -> Option<T> {
        match &self.shared.state.lock().outcome {
            Some(Outcome::Success(value)) => Some(value.clone()),
            _ => None,
        }
    }

    pub fn outcome(&self) -> Option<Outcome<T>> {
        self.shared.state.lock().outcome.clone()
    }
}

impl<T> Promise<T> for AsyncResult<T> {
    fn set_result(&self, value: T) -> bool {
        AsyncResult::set_result(self, value)
    }

    fn set_exception(&self, err: Error) -> bool {
        AsyncResult::set_exception(self, err)
    }

    fn set_cancelled(&self) -> bool {
        AsyncResult::set_cancelled(self)
    }

    fn is_cancellation_requested(&self) -> bool {
        AsyncResult::is_cancellation_requested(self)
    }
}

/// Blocking accessors returned by [`AsyncResult::synchronized`].
pub struct Synchronized<'a, T> {
    result: &'a AsyncResult<T>,
}

impl<T: Clone> Synchronized<'_, T> {
    /// Waits for the cell and unwraps it. A cancelled cell yields
    /// [`Error::Cancelled`].
    pub fn wait_for_result(&self) -> Result<T, Error> {
        self.result.wait_for_done();
        self.outcome()
    }

    /// The unwrapped outcome, or `None` while pending.
    pub fn try_result(&self) -> Option<Result<T, Error>> {
        self.result.outcome().map(Outcome::into_result)
    }

    fn outcome(&self) -> Result<T, Error> {
        match self.result.outcome() {
            Some(outcome) => outcome.into_result(),
            None => unreachable!("wait_for_done returned on a pending cell"),
        }
    }
}

/// Future returned by [`AsyncResult::wait`].
///
/// Safe to poll from a noop-waker scheduler: each poll simply re-checks the
/// cell. Under a real executor the task waker is woken on completion.
pub struct WaitForDone<T> {
    result: AsyncResult<T>,
}

impl<T> Future for WaitForDone<T> {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        if self.result.register_waker(cx.waker()) {
            Poll::Ready(())
        } else {
            Poll::Pending
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::executor::block_on;
    use std::sync::atomic::AtomicUsize;
    use std::thread;

    #[test]
    fn single_terminal_transition_under_contention() {
        for _ in 0..50 {
            let result = AsyncResult::<usize>::cancelable();
            let wins = Arc::new(AtomicUsize::new(0));
            let handles: Vec<_> = (0..6)
                .map(|i| {
                    let r = result.clone();
                    let wins = wins.clone();
                    thread::spawn(move || {
                        let won = match i % 3 {
                            0 => r.set_result(i),
                            1 => r.set_exception(Error::msg("lost")),
                            _ => r.set_cancelled(),
                        };
                        if won {
                            wins.fetch_add(1, Ordering::SeqCst);
                        }
                    })
                })
                .collect();
            for h in handles {
                h.join().expect("The setter thread has panicked");
            }
            assert_eq!(wins.load(Ordering::SeqCst), 1);
            assert!(result.is_done());
        }
    }

    #[test]
    fn cancel_before_completion() {
        let result = AsyncResult::<i32>::cancelable();
        assert!(result.cancel().unwrap());
        assert!(result.is_cancelled());
        assert!(result.is_done());
        assert!(result.is_cancellation_requested());
        assert!(matches!(result.exception(), Some(Error::Cancelled)));

        assert!(!result.set_result(5));
        assert_eq!(result.result(), None);
        assert!(!result.cancel().unwrap());
    }

    #[test]
    fn cancel_rejected_on_non_cancelable() {
        let result = AsyncResult::<i32>::new();
        assert!(matches!(result.cancel(), Err(Error::NotSupported(_))));
        assert!(!result.is_done());
        assert!(!result.is_cancellation_requested());
        assert!(!result.set_cancelled());
        assert!(!result.is_done());
    }

    #[test]
    fn callbacks_fire_in_order_on_exception() {
        let result = AsyncResult::<i32>::new();
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        for tag in ["first", "second"] {
            let seen = seen.clone();
            result.callbackable().on_callback(move |r| {
                assert!(r.is_done());
                let err = r.exception().expect("exception set before callbacks");
                seen.lock().push((tag, err.to_string()));
            });
        }
        assert!(result.set_exception(Error::msg("💥")));
        assert!(!result.set_exception(Error::msg("again")));
        assert_eq!(
            *seen.lock(),
            vec![("first", "💥".to_string()), ("second", "💥".to_string())]
        );
    }

    #[test]
    fn late_callback_fires_synchronously() {
        let result = AsyncResult::ready(3);
        let hit = Arc::new(AtomicBool::new(false));
        let flag = hit.clone();
        result.callbackable().on_callback(move |r| {
            assert_eq!(r.result(), Some(3));
            flag.store(true, Ordering::SeqCst);
        });
        assert!(hit.load(Ordering::SeqCst));
    }

    #[test]
    fn panicking_callback_does_not_block_others() {
        crate::init_test_logger();
        let result = AsyncResult::<()>::new();
        let hits = Arc::new(AtomicUsize::new(0));
        result.callbackable().on_callback(|_| panic!("bad callback"));
        let h = hits.clone();
        result.callbackable().on_callback(move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        });
        assert!(result.set_result(()));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(result.result(), Some(()));
    }

    #[test]
    fn wait_for_done_wakes_blocked_thread() {
        let result = AsyncResult::<String>::new();
        let consumer = result.clone();
        let waiter = thread::spawn(move || consumer.synchronized().wait_for_result());
        thread::sleep(Duration::from_millis(20));
        result.set_result(String::from("🍓"));
        let value = waiter.join().expect("The waiter thread has panicked");
        assert_eq!(value.unwrap(), "🍓");
    }

    #[test]
    fn wait_for_done_timeout_leaves_cell_pending() {
        let result = AsyncResult::<u8>::new();
        assert!(!result.wait_for_done_timeout(Duration::from_millis(10)));
        assert!(!result.is_done());
        result.set_result(1);
        assert!(result.wait_for_done_timeout(Duration::from_millis(10)));
    }

    #[test]
    fn wait_future_resolves_under_block_on() {
        let result = AsyncResult::<u32>::new();
        let producer = result.clone();
        let task = thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            producer.set_result(42);
        });
        block_on(result.wait());
        assert_eq!(result.result(), Some(42));
        task.join().expect("The producer thread has panicked");
    }

    #[test]
    fn synchronized_maps_cancellation() {
        let result = AsyncResult::<u32>::cancelable();
        assert!(result.synchronized().try_result().is_none());
        result.cancel().unwrap();
        assert!(matches!(
            result.synchronized().wait_for_result(),
            Err(Error::Cancelled)
        ));
    }
}
