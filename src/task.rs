//! Task wrappers: a body, a result cell and lifecycle hooks.
//!
//! A task runs its body at most once. `pre-execute` hooks run before the
//! body; on completion either the `post-execute` hooks (success) or the
//! `error` hooks (failure or cancellation) run, followed by the `finish`
//! hooks. Every hook is dispatched to its own [`Target`] and the whole
//! sequence is chained, so ordering holds even when consecutive hooks run on
//! different threads. A panicking hook is logged and the chain continues.
use std::collections::VecDeque;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;

use crate::callbackable::isolate;
use crate::executor::{Executors, Job, Target};
use crate::progress::ProgressResult;
use crate::result::{AsyncResult, Outcome};
use crate::scheduler::CoroutineScheduler;
use crate::{Error, Promise};

/// A cell a task body can be handed: an [`AsyncResult`] or a
/// [`ProgressResult`].
pub(crate) trait TaskHandle<T>: Promise<T> + Clone + Send + Sync + 'static {
    fn cell(&self) -> &AsyncResult<T>;
}

impl<T: Send + 'static> TaskHandle<T> for AsyncResult<T> {
    fn cell(&self) -> &AsyncResult<T> {
        self
    }
}

impl<P, T> TaskHandle<T> for ProgressResult<P, T>
where
    P: Send + 'static,
    T: Send + 'static,
{
    fn cell(&self) -> &AsyncResult<T> {
        self.as_result()
    }
}

pub(crate) enum Body<H, T> {
    /// Returns the value; `Err(Cancelled)` cancels the cell.
    Function(Target, Box<dyn FnOnce(&H) -> Result<T, Error> + Send>),
    /// Completes the cell itself, possibly later from elsewhere.
    Promise(Target, Box<dyn FnOnce(&H) + Send>),
    /// A future driven by a cooperative scheduler.
    Coroutine(
        CoroutineScheduler,
        Box<dyn FnOnce(H) -> BoxFuture<'static, Result<T, Error>> + Send>,
    ),
}

impl<H: TaskHandle<T>, T: Send + 'static> Body<H, T> {
    pub fn coroutine<F, Fut>(scheduler: &CoroutineScheduler, f: F) -> Self
    where
        F: FnOnce(H) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, Error>> + Send + 'static,
    {
        Body::Coroutine(scheduler.clone(), Box::new(move |handle| f(handle).boxed()))
    }

    fn into_job(self, handle: H) -> (Target, Job) {
        match self {
            Body::Function(target, f) => (
                target,
                Box::new(move || {
                    if handle.cell().is_done() {
                        return;
                    }
                    let out = panic::catch_unwind(AssertUnwindSafe(|| f(&handle)));
                    crate::settle(&handle, out);
                }),
            ),
            Body::Promise(target, f) => (
                target,
                Box::new(move || {
                    if handle.cell().is_done() {
                        return;
                    }
                    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| f(&handle))) {
                        handle.set_exception(Error::from_panic(payload));
                    }
                }),
            ),
            Body::Coroutine(scheduler, f) => (
                Target::MainThread,
                Box::new(move || {
                    if handle.cell().is_done() {
                        return;
                    }
                    let cell = handle.cell().clone();
                    match panic::catch_unwind(AssertUnwindSafe(|| f(handle))) {
                        Ok(future) => scheduler.spawn_for(cell, future),
                        Err(payload) => {
                            cell.set_exception(Error::from_panic(payload));
                        }
                    }
                }),
            ),
        }
    }
}

type Hook<A> = Box<dyn FnOnce(&A) + Send>;

struct Hooks<T> {
    pre: Vec<(Target, Job)>,
    post: Vec<(Target, Hook<T>)>,
    error: Vec<(Target, Hook<Error>)>,
    finish: Vec<(Target, Job)>,
    fired: bool,
}

/// State shared by [`AsyncTask`] and [`ProgressTask`](crate::ProgressTask).
pub(crate) struct TaskCore<H, T> {
    handle: H,
    executors: Executors,
    body: Mutex<Option<Body<H, T>>>,
    hooks: Mutex<Hooks<T>>,
    running: AtomicBool,
    // Strong self reference held from start until completion.
    in_flight: Mutex<Option<Arc<TaskCore<H, T>>>>,
}

impl<H, T> TaskCore<H, T>
where
    H: TaskHandle<T>,
    T: Clone + Send + 'static,
{
    pub fn new(handle: H, executors: &Executors, body: Body<H, T>) -> Arc<Self> {
        let core = Arc::new(Self {
            handle,
            executors: executors.clone(),
            body: Mutex::new(Some(body)),
            hooks: Mutex::new(Hooks {
                pre: Vec::new(),
                post: Vec::new(),
                error: Vec::new(),
                finish: Vec::new(),
                fired: false,
            }),
            running: AtomicBool::new(false),
            in_flight: Mutex::new(None),
        });
        let weak: Weak<Self> = Arc::downgrade(&core);
        core.handle.cell().callbackable().on_callback(move |result| {
            if let Some(core) = weak.upgrade() {
                core.completed(result);
            }
        });
        core
    }

    pub fn handle(&self) -> &H {
        &self.handle
    }

    pub fn executors(&self) -> &Executors {
        &self.executors
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn start(self: &Arc<Self>) {
        let cell = self.handle.cell();
        if cell.is_done() {
            log::debug!("task start ignored: already done");
            return;
        }
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            log::debug!("task start ignored: already running");
            return;
        }
        *self.in_flight.lock() = Some(self.clone());
        // The cell may have completed between the check above and the swap.
        if cell.is_done() {
            log::debug!("task start ignored: completed while starting");
            self.release();
            return;
        }
        let Some(body) = self.body.lock().take() else {
            log::debug!("task start ignored: body already consumed");
            self.release();
            return;
        };
        let mut chain: VecDeque<(Target, Job)> = std::mem::take(&mut self.hooks.lock().pre).into();
        chain.push_back(body.into_job(self.handle.clone()));
        run_chain(self.executors.clone(), chain);
    }

    pub fn start_after(self: &Arc<Self>, delay: Duration) {
        let core = self.clone();
        let spawned = thread::Builder::new()
            .name("async-task-delay".to_owned())
            .spawn(move || {
                thread::sleep(delay);
                core.start();
            });
        if let Err(err) = spawned {
            log::error!("failed to arm delayed task start: {err}");
        }
    }

    pub fn on_pre_execute(&self, target: Target, hook: Job) {
        let mut hooks = self.hooks.lock();
        if self.is_running() || hooks.fired {
            log::debug!("pre-execute hook registered after start; ignored");
            return;
        }
        hooks.pre.push((target, hook));
    }

    pub fn on_post_execute(&self, target: Target, hook: Hook<T>) {
        {
            let mut hooks = self.hooks.lock();
            if !hooks.fired {
                hooks.post.push((target, hook));
                return;
            }
        }
        if let Some(Outcome::Success(value)) = self.handle.cell().outcome() {
            self.executors
                .run(target, guarded("post-execute hook", move || hook(&value)));
        }
    }

    pub fn on_error(&self, target: Target, hook: Hook<Error>) {
        {
            let mut hooks = self.hooks.lock();
            if !hooks.fired {
                hooks.error.push((target, hook));
                return;
            }
        }
        if let Some(err) = self.handle.cell().exception() {
            self.executors
                .run(target, guarded("error hook", move || hook(&err)));
        }
    }

    pub fn on_finish(&self, target: Target, hook: Job) {
        {
            let mut hooks = self.hooks.lock();
            if !hooks.fired {
                hooks.finish.push((target, hook));
                return;
            }
        }
        self.executors.run(target, guarded("finish hook", hook));
    }

    fn release(&self) {
        self.running.store(false, Ordering::Release);
        let released = self.in_flight.lock().take();
        drop(released);
    }

    fn completed(&self, result: &AsyncResult<T>) {
        let _in_flight = self.in_flight.lock().take();
        self.running.store(false, Ordering::Release);
        let hooks = {
            let mut hooks = self.hooks.lock();
            hooks.fired = true;
            hooks.pre.clear();
            Hooks {
                pre: Vec::new(),
                post: std::mem::take(&mut hooks.post),
                error: std::mem::take(&mut hooks.error),
                finish: std::mem::take(&mut hooks.finish),
                fired: true,
            }
        };
        let mut chain: VecDeque<(Target, Job)> = VecDeque::new();
        match result.outcome() {
            Some(Outcome::Success(value)) => {
                for (target, hook) in hooks.post {
                    let value = value.clone();
                    chain.push_back((target, Box::new(move || hook(&value))));
                }
            }
            Some(outcome) => {
                let err = outcome.exception().unwrap_or(Error::Cancelled);
                for (target, hook) in hooks.error {
                    let err = err.clone();
                    chain.push_back((target, Box::new(move || hook(&err))));
                }
            }
            None => {}
        }
        chain.extend(hooks.finish);
        run_chain(self.executors.clone(), chain);
    }
}

fn guarded(what: &'static str, job: impl FnOnce() + Send + 'static) -> Job {
    Box::new(move || {
        isolate(what, job);
    })
}

/// Runs each job on its target, starting the next one only after the
/// previous returned.
fn run_chain(executors: Executors, mut chain: VecDeque<(Target, Job)>) {
    let Some((target, job)) = chain.pop_front() else {
        return;
    };
    let next = executors.clone();
    executors.run(
        target,
        Box::new(move || {
            isolate("task hook", job);
            run_chain(next, chain);
        }),
    );
}

/// A unit of work bound to an [`AsyncResult`] with lifecycle hooks.
///
/// # Examples
///
/// ```
/// use async_result::{AsyncTask, Executors, MainThreadExecutor, Target, WorkerPool, WorkerPoolConfig};
///
/// let executors = Executors::new(
///     MainThreadExecutor::new(),
///     WorkerPool::new(WorkerPoolConfig::default()).unwrap(),
/// );
/// let task = AsyncTask::from_fn(&executors, Target::Worker, |_| Ok(6 * 7));
/// task.on_post_execute(Target::Worker, |value| assert_eq!(*value, 42))
///     .start();
/// assert_eq!(task.as_result().synchronized().wait_for_result().unwrap(), 42);
/// ```
pub struct AsyncTask<T> {
    core: Arc<TaskCore<AsyncResult<T>, T>>,
}

impl<T> Clone for AsyncTask<T> {
    fn clone(&self) -> Self {
        Self {
            core: self.core.clone(),
        }
    }
}

impl<T: Clone + Send + 'static> AsyncTask<T> {
    /// A task whose body returns its value. The body receives the cell so
    /// it can poll [`AsyncResult::is_cancellation_requested`].
    pub fn from_fn<F>(executors: &Executors, target: Target, body: F) -> Self
    where
        F: FnOnce(&AsyncResult<T>) -> Result<T, Error> + Send + 'static,
    {
        Self::with_body(executors, Body::Function(target, Box::new(body)))
    }

    /// A task whose body completes the cell itself.
    pub fn from_promise<F>(executors: &Executors, target: Target, body: F) -> Self
    where
        F: FnOnce(&AsyncResult<T>) + Send + 'static,
    {
        Self::with_body(executors, Body::Promise(target, Box::new(body)))
    }

    /// A task whose body is a coroutine started on `scheduler`.
    pub fn from_coroutine<F, Fut>(executors: &Executors, scheduler: &CoroutineScheduler, body: F) -> Self
    where
        F: FnOnce(AsyncResult<T>) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, Error>> + Send + 'static,
    {
        Self::with_body(executors, Body::coroutine(scheduler, body))
    }

    fn with_body(executors: &Executors, body: Body<AsyncResult<T>, T>) -> Self {
        Self {
            core: TaskCore::new(AsyncResult::cancelable(), executors, body),
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

    /// Runs the task unless it is already running or done.
    pub fn start(&self) -> &Self {
        self.core.start();
        self
    }

    /// Starts the task after `delay` if by then it is neither running nor done.
    pub fn start_after(&self, delay: Duration) -> &Self {
        self.core.start_after(delay);
        self
    }

    /// Requests cancellation; the body must observe it to stop early.
    pub fn cancel(&self) -> Result<bool, Error> {
        self.core.handle().cancel()
    }

    pub fn is_done(&self) -> bool {
        self.core.handle().is_done()
    }

    pub fn is_running(&self) -> bool {
        self.core.is_running()
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

    pub fn as_result(&self) -> &AsyncResult<T> {
        self.core.handle()
    }

    pub fn executors(&self) -> &Executors {
        self.core.executors()
    }
}
