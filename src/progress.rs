//! A result cell that also carries a progress value.
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::callbackable::{Callback, ProgressCallback, ProgressCallbackable};
use crate::result::{AsyncResult, Outcome, Synchronized, WaitForDone};
use crate::{Error, ProgressPromise, Promise};

struct ProgressState<P> {
    progress: P,
    callbacks: Vec<ProgressCallback<P>>,
}

/// An [`AsyncResult`] with a progress value `P`.
///
/// Progress updates are accepted only while the cell is pending. Once done,
/// [`progress`](Self::progress) stays frozen at the last accepted value and
/// further updates are dropped.
///
/// # Examples
///
/// ```
/// use async_result::ProgressResult;
///
/// let result = ProgressResult::<f32, &str>::new();
/// result.update_progress(0.5);
/// result.set_result("done");
/// assert!(!result.update_progress(0.9));
/// assert_eq!(result.progress(), 0.5);
/// ```
pub struct ProgressResult<P, T> {
    result: AsyncResult<T>,
    state: Arc<Mutex<ProgressState<P>>>,
}

impl<P, T> Clone for ProgressResult<P, T> {
    fn clone(&self) -> Self {
        Self {
            result: self.result.clone(),
            state: self.state.clone(),
        }
    }
}

impl<P: Default, T> Default for ProgressResult<P, T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P, T> fmt::Debug for ProgressResult<P, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProgressResult")
            .field("result", &self.result)
            .finish_non_exhaustive()
    }
}

impl<P: Default, T> ProgressResult<P, T> {
    pub fn new() -> Self {
        Self::from_result(AsyncResult::new())
    }

    pub fn cancelable() -> Self {
        Self::from_result(AsyncResult::cancelable())
    }

    fn from_result(result: AsyncResult<T>) -> Self {
        Self {
            result,
            state: Arc::new(Mutex::new(ProgressState {
                progress: P::default(),
                callbacks: Vec::new(),
            })),
        }
    }
}

impl<P, T> ProgressResult<P, T> {
    /// The underlying completion cell.
    pub fn as_result(&self) -> &AsyncResult<T> {
        &self.result
    }

    pub fn is_done(&self) -> bool {
        self.result.is_done()
    }

    pub fn is_cancelled(&self) -> bool {
        self.result.is_cancelled()
    }

    pub fn is_cancellation_requested(&self) -> bool {
        self.result.is_cancellation_requested()
    }

    pub fn exception(&self) -> Option<Error> {
        self.result.exception()
    }

    pub fn set_result(&self, value: T) -> bool {
        self.result.set_result(value)
    }

    pub fn set_exception(&self, err: Error) -> bool {
        self.result.set_exception(err)
    }

    pub fn set_cancelled(&self) -> bool {
        self.result.set_cancelled()
    }

    pub fn cancel(&self) -> Result<bool, Error> {
        self.result.cancel()
    }

    pub fn wait_for_done(&self) {
        self.result.wait_for_done()
    }

    pub fn wait_for_done_timeout(&self, timeout: Duration) -> bool {
        self.result.wait_for_done_timeout(timeout)
    }

    pub fn wait(&self) -> WaitForDone<T> {
        self.result.wait()
    }

    pub fn synchronized(&self) -> Synchronized<'_, T> {
        self.result.synchronized()
    }
}

impl<P, T> ProgressResult<P, T>
where
    P: Clone + Send + Sync + 'static,
    T: Send + 'static,
{
    pub fn callbackable(&self) -> ProgressCallbackable<'_, P, T> {
        ProgressCallbackable::new(self)
    }

    pub fn progress(&self) -> P {
        self.state.lock().progress.clone()
    }

    /// Stores `progress` and notifies progress callbacks.
    ///
    /// Returns `false` without touching the stored value if the cell is
    /// already done.
    pub fn update_progress(&self, progress: P) -> bool {
        let snapshot = self.result.with_pending(|| {
            let mut state = self.state.lock();
            state.progress = progress.clone();
            state.callbacks.clone()
        });
        match snapshot {
            Some(callbacks) => {
                for callback in callbacks {
                    crate::callbackable::isolate("progress callback", || callback(&progress));
                }
                true
            }
            None => {
                log::debug!("progress update ignored: result already done");
                false
            }
        }
    }

    pub(crate) fn add_callback(&self, callback: Callback<ProgressResult<P, T>>) {
        let state = self.state.clone();
        self.result.add_callback(Box::new(move |result| {
            let this = ProgressResult {
                result: result.clone(),
                state,
            };
            callback(&this);
        }));
    }

    pub(crate) fn add_progress_callback(&self, callback: ProgressCallback<P>) {
        self.state.lock().callbacks.push(callback);
    }
}

impl<P, T: Clone> ProgressResult<P, T> {
    pub fn result(&self) -> Option<T> {
        self.result.result()
    }

    pub fn outcome(&self) -> Option<Outcome<T>> {
        self.result.outcome()
    }
}

impl<P, T> Promise<T> for ProgressResult<P, T> {
    fn set_result(&self, value: T) -> bool {
        self.result.set_result(value)
    }

    fn set_exception(&self, err: Error) -> bool {
        self.result.set_exception(err)
    }

    fn set_cancelled(&self) -> bool {
        self.result.set_cancelled()
    }

    fn is_cancellation_requested(&self) -> bool {
        self.result.is_cancellation_requested()
    }
}

impl<P, T> ProgressPromise<P, T> for ProgressResult<P, T>
where
    P: Clone + Send + Sync + 'static,
    T: Send + 'static,
{
    fn update_progress(&self, progress: P) -> bool {
        ProgressResult::update_progress(self, progress)
    }
}
