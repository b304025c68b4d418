use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::executor::{Executors, Target};
use crate::progress::ProgressResult;
use crate::scheduler::CoroutineScheduler;
use crate::task::{Body, TaskCore};
use crate::Error;

/// An [`AsyncTask`](crate::AsyncTask) over a [`ProgressResult`].
///
/// Besides the usual lifecycle hooks, progress-update hooks are dispatched
/// to their target on every accepted [`ProgressResult::update_progress`].
///
/// # Examples
///
/// ```
/// use async_result::{Executors, MainThreadExecutor, ProgressResult, ProgressTask, Target};
///
/// let main = MainThreadExecutor::new();
/// let executors = Executors::new(main.clone(), main);
/// let task = ProgressTask::from_fn(&executors, Target::Worker, |r: &ProgressResult<u32, &str>| {
///     for step in 1..=4 {
///         r.update_progress(step * 25);
///     }
///     Ok("loaded")
/// });
/// task.start();
/// assert_eq!(task.progress(), 100);
/// assert_eq!(task.result(), Some("loaded"));
/// ```
pub struct ProgressTask<P, T> {
    core: Arc<TaskCore<ProgressResult<P, T>, T>>,
}

impl<P, T> Clone for ProgressTask<P, T> {
    fn clone(&self) -> Self {
        Self {
            core: self.core.clone(),
        }
    }
}

impl<P, T> ProgressTask<P, T>
where
    P: Clone + Default + Send + Sync + 'static,
    T: Clone + Send + 'static,
{
    pub fn from_fn<F>(executors: &Executors, target: Target, body: F) -> Self
    where
        F: FnOnce(&ProgressResult<P, T>) -> Result<T, Error> + Send + 'static,
    {
        Self::with_body(executors, Body::Function(target, Box::new(body)))
    }

    pub fn from_promise<F>(executors: &Executors, target: Target, body: F) -> Self
    where
        F: FnOnce(&ProgressResult<P, T>) + Send + 'static,
    {
        Self::with_body(executors, Body::Promise(target, Box::new(body)))
    }

    pub fn from_coroutine<F, Fut>(executors: &Executors, scheduler: &CoroutineScheduler, body: F) -> Self
    where
        F: FnOnce(ProgressResult<P, T>) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, Error>> + Send + 'static,
    {
        Self::with_body(executors, Body::coroutine(scheduler, body))
    }

    fn with_body(executors: &Executors, body: Body<ProgressResult<P, T>, T>) -> Self {
        Self {
            core: TaskCore::new(ProgressResult::cancelable(), executors, body),
        }
    }

    pub fn on_pre_execute<F>(&self, target: Target, hook: F) -> &Self
    where
        F: FnOnce() + Send + 'static,
    {
        self.core.on_pre_execute(target, Box::new(hook));
        self
    }

    pub fn on_post_execute<F>(&self, target: Target, hook: F) -> &Self
    where
        F: FnOnce(&T) + Send + 'static,
    {
        self.core.on_post_execute(target, Box::new(hook));
        self
    }

    pub fn on_error<F>(&self, target: Target, hook: F) -> &Self
    where
        F: FnOnce(&Error) + Send + 'static,
    {
        self.core.on_error(target, Box::new(hook));
        self
    }

    pub fn on_finish<F>(&self, target: Target, hook: F) -> &Self
    where
        F: FnOnce() + Send + 'static,
    {
        self.core.on_finish(target, Box::new(hook));
        self
    }

    /// Dispatches `hook` to `target` on every progress update.
    pub fn on_progress_update<F>(&self, target: Target, hook: F) -> &Self
    where
        F: Fn(&P) + Send + Sync + 'static,
    {
        let hook = Arc::new(hook);
        let executors = self.core.executors().clone();
        self.core
            .handle()
            .callbackable()
            .on_progress_callback(move |progress| {
                let hook = hook.clone();
                let progress = progress.clone();
                executors.run(target, Box::new(move || hook(&progress)));
            });
        self
    }

    pub fn start(&self) -> &Self {
        self.core.start();
        self
    }

    pub fn start_after(&self, delay: Duration) -> &Self {
        self.core.start_after(delay);
        self
    }

    pub fn cancel(&self) -> Result<bool, Error> {
        self.core.handle().cancel()
    }

    pub fn is_done(&self) -> bool {
        self.core.handle().is_done()
    }

    pub fn is_running(&self) -> bool {
        self.core.is_running()
    }

    pub fn progress(&self) -> P {
        self.core.handle().progress()
    }

    pub fn result(&self) -> Option<T> {
        self.core.handle().result()
    }

    pub fn exception(&self) -> Option<Error> {
        self.core.handle().exception()
    }

    pub fn wait_for_done(&self) {
        self.core.handle().wait_for_done()
    }

    pub fn as_result(&self) -> &ProgressResult<P, T> {
        self.core.handle()
    }
}
