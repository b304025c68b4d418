//! Thread-safe asynchronous results for rust.
//!
//! An [`AsyncResult`] is a single-assignment cell shared between one producer
//! and any number of consumers. The producer completes it exactly once with a
//! value, an error or a cancellation; consumers block on it, poll it, register
//! callbacks, or await it from a cooperative [`CoroutineScheduler`].
//!
//! ```
//! use async_result::AsyncResult;
//! use std::thread;
//!
//! let result = AsyncResult::<String>::new();
//! let producer = result.clone();
//! let worker = thread::spawn(move || {
//!     producer.set_result("🍓".into());
//! });
//! assert_eq!(result.synchronized().wait_for_result().unwrap(), "🍓");
//! worker.join().expect("The worker thread has panicked");
//! ```
use std::sync::Arc;

pub mod awaiter;
pub mod callbackable;
pub mod executor;
pub mod progress;
pub mod progress_task;
pub mod result;
pub mod scheduler;
pub mod task;
pub mod wait;

pub use awaiter::{await_completion, AwaitFuture, Awaitable, Completion, ResultAwaiter};
pub use callbackable::{Callbackable, ProgressCallbackable};
pub use executor::{Executor, Executors, Job, MainThreadExecutor, Target, WorkerPool, WorkerPoolConfig};
pub use progress::ProgressResult;
pub use progress_task::ProgressTask;
pub use result::{AsyncResult, Outcome, Synchronized, WaitForDone};
pub use scheduler::CoroutineScheduler;
pub use task::AsyncTask;
pub use wait::{delay, wait_until, yield_now};

/// Errors surfaced through a result cell or returned by usage checks.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    #[error("operation not supported: {0}")]
    NotSupported(&'static str),
    #[error("the operation was cancelled")]
    Cancelled,
    #[error("{0}")]
    Failed(Arc<dyn std::error::Error + Send + Sync>),
    #[error("the task panicked: {0}")]
    Panicked(String),
}

#[derive(Debug, thiserror::Error)]
#[error("{0}")]
struct Message(String);

impl Error {
    /// Wraps a producer error.
    pub fn failed<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Error::Failed(Arc::new(err))
    }

    /// A producer failure carrying only a message.
    pub fn msg(text: impl Into<String>) -> Self {
        Error::failed(Message(text.into()))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }

    pub(crate) fn from_panic(payload: Box<dyn std::any::Any + Send>) -> Self {
        Error::Panicked(panic_message(payload.as_ref()))
    }
}

pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_owned()
    }
}

/// The producer side of a result cell.
///
/// Every terminal transition returns `true` only for the call that actually
/// completed the cell; racing or repeated calls are silent no-ops.
pub trait Promise<T> {
    fn set_result(&self, value: T) -> bool;

    fn set_exception(&self, err: Error) -> bool;

    fn set_cancelled(&self) -> bool;

    /// Whether a consumer asked for cancellation. Long-running producers
    /// should poll this and call [`set_cancelled`](Promise::set_cancelled).
    fn is_cancellation_requested(&self) -> bool;
}

/// Completes `promise` from the caught result of a producer body.
///
/// `Err(Cancelled)` from the body becomes a cancellation when the cell
/// allows it, and a plain failure otherwise.
pub(crate) fn settle<T>(promise: &impl Promise<T>, body: std::thread::Result<Result<T, Error>>) {
    match body {
        Ok(Ok(value)) => {
            promise.set_result(value);
        }
        Ok(Err(Error::Cancelled)) => {
            if !promise.set_cancelled() {
                promise.set_exception(Error::Cancelled);
            }
        }
        Ok(Err(err)) => {
            promise.set_exception(err);
        }
        Err(payload) => {
            promise.set_exception(Error::from_panic(payload));
        }
    }
}

/// A producer that also reports progress.
pub trait ProgressPromise<P, T>: Promise<T> {
    /// Returns `false` when the update was dropped because the cell is done.
    fn update_progress(&self, progress: P) -> bool;
}

#[cfg(test)]
pub(crate) fn init_test_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn msg_error_displays_text() {
        let err = Error::msg("💥");
        assert_eq!(err.to_string(), "💥");
        assert!(!err.is_cancelled());
        assert!(Error::Cancelled.is_cancelled());
    }

    #[test]
    fn panic_message_extracts_str_and_string() {
        let payload: Box<dyn std::any::Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "boom");
        let payload: Box<dyn std::any::Any + Send> = Box::new(String::from("bang"));
        assert!(matches!(Error::from_panic(payload), Error::Panicked(m) if m == "bang"));
    }
}
