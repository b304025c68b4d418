//! One-shot completion callbacks and repeating progress callbacks.
//!
//! A [`Callbackable`] is a borrowed registration handle onto a result cell.
//! Callbacks added before completion are queued and fire exactly once, in
//! registration order; callbacks added after completion fire immediately,
//! inside the registering call.
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use crate::progress::ProgressResult;
use crate::result::AsyncResult;

pub(crate) type Callback<A> = Box<dyn FnOnce(&A) + Send>;
pub(crate) type ProgressCallback<P> = Arc<dyn Fn(&P) + Send + Sync>;

/// Pending completion callbacks of one cell.
pub(crate) struct CallbackRegistry<A> {
    pending: Vec<Callback<A>>,
}

impl<A> CallbackRegistry<A> {
    pub fn new() -> Self {
        Self { pending: Vec::new() }
    }

    pub fn push(&mut self, callback: Callback<A>) {
        self.pending.push(callback);
    }

    /// Snapshots and clears the queue. The caller fires the batch after
    /// releasing the cell lock.
    pub fn take(&mut self) -> Vec<Callback<A>> {
        std::mem::take(&mut self.pending)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }
}

/// Invokes a batch in order. A panicking callback is logged and skipped.
pub(crate) fn fire<A>(batch: Vec<Callback<A>>, arg: &A) {
    for callback in batch {
        isolate("completion callback", || callback(arg));
    }
}

/// Runs `f`, containing any panic. Returns whether `f` completed normally.
pub(crate) fn isolate(what: &str, f: impl FnOnce()) -> bool {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(()) => true,
        Err(payload) => {
            log::error!("{what} panicked: {}", crate::panic_message(payload.as_ref()));
            false
        }
    }
}

/// Registration handle returned by [`AsyncResult::callbackable`].
pub struct Callbackable<'a, T> {
    result: &'a AsyncResult<T>,
}

impl<'a, T> Callbackable<'a, T> {
    pub(crate) fn new(result: &'a AsyncResult<T>) -> Self {
        Self { result }
    }

    /// Registers a completion callback.
    ///
    /// # Examples
    ///
    /// ```
    /// use async_result::AsyncResult;
    /// use std::sync::{Arc, Mutex};
    ///
    /// let result = AsyncResult::<u32>::new();
    /// let seen = Arc::new(Mutex::new(None));
    /// let sink = seen.clone();
    /// result.callbackable().on_callback(move |r| {
    ///     *sink.lock().unwrap() = r.result();
    /// });
    /// result.set_result(7);
    /// assert_eq!(*seen.lock().unwrap(), Some(7));
    /// ```
    pub fn on_callback<F>(&self, callback: F)
    where
        F: FnOnce(&AsyncResult<T>) + Send + 'static,
    {
        self.result.add_callback(Box::new(callback));
    }
}

/// Registration handle returned by [`ProgressResult::callbackable`].
pub struct ProgressCallbackable<'a, P, T> {
    result: &'a ProgressResult<P, T>,
}

impl<'a, P, T> ProgressCallbackable<'a, P, T>
where
    P: Clone + Send + Sync + 'static,
    T: Send + 'static,
{
    pub(crate) fn new(result: &'a ProgressResult<P, T>) -> Self {
        Self { result }
    }

    /// Registers a one-shot completion callback.
    pub fn on_callback<F>(&self, callback: F)
    where
        F: FnOnce(&ProgressResult<P, T>) + Send + 'static,
    {
        self.result.add_callback(Box::new(callback));
    }

    /// Registers a callback fired on every progress update until completion.
    pub fn on_progress_callback<F>(&self, callback: F)
    where
        F: Fn(&P) + Send + Sync + 'static,
    {
        self.result.add_progress_callback(Arc::new(callback));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn take_clears_registry() {
        let mut registry = CallbackRegistry::<u32>::new();
        registry.push(Box::new(|_| {}));
        registry.push(Box::new(|_| {}));
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.take().len(), 2);
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn fire_runs_in_order_past_a_panic() {
        crate::init_test_logger();
        let order = Arc::new(Mutex::new(Vec::new()));
        let mut registry = CallbackRegistry::<u32>::new();
        let o1 = order.clone();
        registry.push(Box::new(move |v| o1.lock().unwrap().push(*v)));
        registry.push(Box::new(|_| panic!("callback failure")));
        let o3 = order.clone();
        registry.push(Box::new(move |v| o3.lock().unwrap().push(*v + 1)));

        fire(registry.take(), &10);
        assert_eq!(*order.lock().unwrap(), vec![10, 11]);
    }

    #[test]
    fn isolate_reports_outcome() {
        crate::init_test_logger();
        assert!(isolate("ok", || {}));
        assert!(!isolate("boom", || panic!("boom")));
    }
}
