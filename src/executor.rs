//! Named executors that continuations and task hooks are dispatched to.
//!
//! Two targets exist: the main thread, serviced by the host calling
//! [`MainThreadExecutor::pump`] once per frame, and a [`WorkerPool`] of
//! background threads. Hopping between them is an explicit
//! [`Executors::run`] call rather than anything hidden in an await.
use std::sync::{mpsc, Arc};
use std::thread::{self, ThreadId};

use parking_lot::Mutex;

use crate::callbackable::isolate;
use crate::result::AsyncResult;
use crate::Error;

/// Type-erased unit of work sent to an executor.
pub type Job = Box<dyn FnOnce() + Send>;

/// Something that runs jobs.
pub trait Executor: Send + Sync {
    fn execute(&self, job: Job);
}

/// Where a body or hook runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Target {
    MainThread,
    Worker,
}

struct MainQueue {
    owner: ThreadId,
    sender: Mutex<mpsc::Sender<Job>>,
    receiver: Mutex<mpsc::Receiver<Job>>,
}

/// Queue of jobs for the thread that created it.
///
/// Jobs submitted from the owner thread run inline; jobs submitted from
/// any other thread wait until the owner calls [`pump`](Self::pump).
///
/// # Example
///
/// ```
/// use async_result::{Executor, MainThreadExecutor};
/// use std::sync::atomic::{AtomicU32, Ordering};
/// use std::sync::Arc;
///
/// let main = MainThreadExecutor::new();
/// let hits = Arc::new(AtomicU32::new(0));
/// let remote = main.clone();
/// let h = hits.clone();
/// std::thread::spawn(move || {
///     remote.execute(Box::new(move || {
///         h.fetch_add(1, Ordering::SeqCst);
///     }));
/// })
/// .join()
/// .unwrap();
///
/// assert_eq!(hits.load(Ordering::SeqCst), 0);
/// main.pump();
/// assert_eq!(hits.load(Ordering::SeqCst), 1);
/// ```
#[derive(Clone)]
pub struct MainThreadExecutor {
    queue: Arc<MainQueue>,
}

impl MainThreadExecutor {
    /// Creates an executor owned by the calling thread.
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::channel();
        Self {
            queue: Arc::new(MainQueue {
                owner: thread::current().id(),
                sender: Mutex::new(sender),
                receiver: Mutex::new(receiver),
            }),
        }
    }

    pub fn is_owner_thread(&self) -> bool {
        thread::current().id() == self.queue.owner
    }

    /// Runs every queued job. Returns the number of jobs run.
    ///
    /// Must be called from the owner thread; elsewhere it does nothing.
    pub fn pump(&self) -> usize {
        if !self.is_owner_thread() {
            log::warn!("MainThreadExecutor::pump called off the owner thread; ignored");
            return 0;
        }
        let mut count = 0;
        loop {
            // Release the receiver before running, jobs may enqueue more work.
            let job = self.queue.receiver.lock().try_recv();
            match job {
                Ok(job) => {
                    isolate("main thread job", job);
                    count += 1;
                }
                Err(_) => break,
            }
        }
        count
    }

    /// Runs `f` on the owner thread and blocks until it returns.
    ///
    /// # Errors
    ///
    /// [`Error::Panicked`] if `f` panicked, [`Error::Cancelled`] if the queue
    /// was dropped before the job ran.
    pub fn run_blocking<R, F>(&self, f: F) -> Result<R, Error>
    where
        R: Send + 'static,
        F: FnOnce() -> R + Send + 'static,
    {
        if self.is_owner_thread() {
            return std::panic::catch_unwind(std::panic::AssertUnwindSafe(f))
                .map_err(Error::from_panic);
        }
        let (result_tx, result_rx) = mpsc::sync_channel(1);
        self.execute(Box::new(move || {
            let out = std::panic::catch_unwind(std::panic::AssertUnwindSafe(f))
                .map_err(Error::from_panic);
            let _ = result_tx.send(out);
        }));
        result_rx.recv().unwrap_or(Err(Error::Cancelled))
    }
}

impl Default for MainThreadExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl Executor for MainThreadExecutor {
    fn execute(&self, job: Job) {
        if self.is_owner_thread() {
            isolate("main thread job", job);
            return;
        }
        if self.queue.sender.lock().send(job).is_err() {
            log::warn!("main thread queue is closed; job dropped");
        }
    }
}

/// Sizing and naming for a [`WorkerPool`].
#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    pub threads: usize,
    pub thread_name: String,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            threads: thread::available_parallelism().map_or(1, |n| n.get()),
            thread_name: "async-result-worker".to_owned(),
        }
    }
}

struct PoolShared {
    sender: Mutex<mpsc::Sender<Job>>,
    threads: usize,
}

/// A fixed set of background threads sharing one job queue.
///
/// Worker threads exit once every handle to the pool is dropped and the
/// queue is drained.
#[derive(Clone)]
pub struct WorkerPool {
    shared: Arc<PoolShared>,
}

impl WorkerPool {
    /// Spawns the worker threads.
    ///
    /// # Errors
    ///
    /// [`Error::Failed`] if the OS refuses to spawn a thread.
    pub fn new(config: WorkerPoolConfig) -> Result<Self, Error> {
        let threads = config.threads.max(1);
        let (sender, receiver) = mpsc::channel::<Job>();
        let receiver = Arc::new(Mutex::new(receiver));
        for index in 0..threads {
            let receiver = receiver.clone();
            thread::Builder::new()
                .name(format!("{}-{index}", config.thread_name))
                .spawn(move || worker_loop(&receiver))
                .map_err(Error::failed)?;
        }
        log::trace!("worker pool started with {threads} threads");
        Ok(Self {
            shared: Arc::new(PoolShared {
                sender: Mutex::new(sender),
                threads,
            }),
        })
    }

    pub fn threads(&self) -> usize {
        self.shared.threads
    }
}

fn worker_loop(receiver: &Mutex<mpsc::Receiver<Job>>) {
    loop {
        let job = receiver.lock().recv();
        match job {
            Ok(job) => {
                isolate("worker job", job);
            }
            Err(_) => break,
        }
    }
    log::trace!("worker thread exiting");
}

impl Executor for WorkerPool {
    fn execute(&self, job: Job) {
        if self.shared.sender.lock().send(job).is_err() {
            log::warn!("worker pool is shut down; job dropped");
        }
    }
}

/// The pair of executors tasks dispatch to.
#[derive(Clone)]
pub struct Executors {
    main: Arc<dyn Executor>,
    worker: Arc<dyn Executor>,
}

impl Executors {
    pub fn new(main: impl Executor + 'static, worker: impl Executor + 'static) -> Self {
        Self {
            main: Arc::new(main),
            worker: Arc::new(worker),
        }
    }

    pub fn get(&self, target: Target) -> &dyn Executor {
        match target {
            Target::MainThread => self.main.as_ref(),
            Target::Worker => self.worker.as_ref(),
        }
    }

    pub fn run(&self, target: Target, job: Job) {
        self.get(target).execute(job);
    }

    /// Runs `f` on `target` and exposes its outcome as a result cell.
    /// A panic in `f` fails the cell with [`Error::Panicked`].
    pub fn spawn_result<R, F>(&self, target: Target, f: F) -> AsyncResult<R>
    where
        R: Send + 'static,
        F: FnOnce() -> Result<R, Error> + Send + 'static,
    {
        let result = AsyncResult::new();
        let producer = result.clone();
        self.run(
            target,
            Box::new(move || {
                match std::panic::catch_unwind(std::panic::AssertUnwindSafe(f)) {
                    Ok(Ok(value)) => producer.set_result(value),
                    Ok(Err(err)) => producer.set_exception(err),
                    Err(payload) => producer.set_exception(Error::from_panic(payload)),
                };
            }),
        );
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    #[test]
    fn main_executor_runs_inline_on_owner() {
        let main = MainThreadExecutor::new();
        let hits = Arc::new(AtomicU32::new(0));
        let h = hits.clone();
        main.execute(Box::new(move || {
            h.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(main.pump(), 0);
    }

    #[test]
    fn dispatch_runs_on_owner_thread() {
        let main = MainThreadExecutor::new();
        let remote = main.clone();
        let owner = thread::current().id();

        let handle = thread::spawn(move || remote.run_blocking(move || thread::current().id()));

        while main.pump() == 0 {
            thread::sleep(Duration::from_millis(1));
        }
        let ran_on = handle.join().expect("The worker thread has panicked");
        assert_eq!(ran_on.unwrap(), owner);
    }

    #[test]
    fn pump_off_owner_thread_is_ignored() {
        crate::init_test_logger();
        let main = MainThreadExecutor::new();
        let remote = main.clone();
        let pumped = thread::spawn(move || remote.pump())
            .join()
            .expect("The pump thread has panicked");
        assert_eq!(pumped, 0);
    }

    #[test]
    fn worker_pool_runs_jobs_off_thread() {
        let pool = WorkerPool::new(WorkerPoolConfig {
            threads: 2,
            ..Default::default()
        })
        .unwrap();
        assert_eq!(pool.threads(), 2);
        let executors = Executors::new(MainThreadExecutor::new(), pool);
        let caller = thread::current().id();
        let result = executors.spawn_result(Target::Worker, move || {
            Ok(thread::current().id() != caller)
        });
        assert!(result.synchronized().wait_for_result().unwrap());
    }

    #[test]
    fn spawn_result_captures_panics() {
        crate::init_test_logger();
        let pool = WorkerPool::new(WorkerPoolConfig {
            threads: 1,
            ..Default::default()
        })
        .unwrap();
        let executors = Executors::new(MainThreadExecutor::new(), pool);
        let result: AsyncResult<u32> =
            executors.spawn_result(Target::Worker, || panic!("worker exploded"));
        assert!(matches!(
            result.synchronized().wait_for_result(),
            Err(Error::Panicked(msg)) if msg == "worker exploded"
        ));
    }

    #[test]
    fn worker_pool_survives_panicking_job() {
        crate::init_test_logger();
        let pool = WorkerPool::new(WorkerPoolConfig {
            threads: 1,
            ..Default::default()
        })
        .unwrap();
        pool.execute(Box::new(|| panic!("bad job")));
        let executors = Executors::new(MainThreadExecutor::new(), pool);
        let result = executors.spawn_result(Target::Worker, || Ok(5u8));
        assert_eq!(result.synchronized().wait_for_result().unwrap(), 5);
    }
}
