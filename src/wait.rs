//! Waits for the cooperative scheduler.
//!
//! None of these block the thread. Each poll re-checks its condition and,
//! if unmet, requests a re-poll and returns `Pending`, so the scheduler can
//! step other coroutines before coming back on the next tick.
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

/// Suspends for exactly one scheduling step.
///
/// # Example
///
/// ```ignore
/// scheduler.start(async move {
///     for chunk in data.chunks(256) {
///         process(chunk);
///         yield_now().await;
///     }
///     Ok(())
/// });
/// ```
pub fn yield_now() -> YieldNow {
    YieldNow { yielded: false }
}

/// Future returned by [`yield_now`].
pub struct YieldNow {
    yielded: bool,
}

impl Future for YieldNow {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        if self.yielded {
            return Poll::Ready(());
        }
        self.yielded = true;
        cx.waker().wake_by_ref();
        Poll::Pending
    }
}

/// Resolves on the first step at which `predicate` holds.
pub fn wait_until<F>(predicate: F) -> WaitUntil<F>
where
    F: FnMut() -> bool + Unpin,
{
    WaitUntil { predicate }
}

/// Future returned by [`wait_until`].
pub struct WaitUntil<F> {
    predicate: F,
}

impl<F> Future for WaitUntil<F>
where
    F: FnMut() -> bool + Unpin,
{
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        if (self.predicate)() {
            Poll::Ready(())
        } else {
            cx.waker().wake_by_ref();
            Poll::Pending
        }
    }
}

/// Resolves on the first step at or after `duration` from the first poll.
pub fn delay(duration: Duration) -> Delay {
    Delay {
        duration,
        deadline: None,
    }
}

/// Future returned by [`delay`].
pub struct Delay {
    duration: Duration,
    deadline: Option<Instant>,
}

impl Future for Delay {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        let duration = self.duration;
        let deadline = *self.deadline.get_or_insert_with(|| Instant::now() + duration);
        if Instant::now() >= deadline {
            Poll::Ready(())
        } else {
            cx.waker().wake_by_ref();
            Poll::Pending
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::task::noop_waker;
    use std::cell::Cell;
    use std::rc::Rc;

    #[test]
    fn yields_once_then_ready() {
        let waker = noop_waker();
        let mut cx = Context::from_waker(&waker);

        let mut fut = yield_now();
        let mut pinned = Pin::new(&mut fut);
        assert_eq!(pinned.as_mut().poll(&mut cx), Poll::Pending);
        assert_eq!(pinned.as_mut().poll(&mut cx), Poll::Ready(()));
    }

    #[test]
    fn wait_until_checks_once_per_poll() {
        let waker = noop_waker();
        let mut cx = Context::from_waker(&waker);
        let checks = Rc::new(Cell::new(0));
        let c = checks.clone();
        let mut fut = wait_until(move || {
            c.set(c.get() + 1);
            c.get() >= 3
        });
        assert_eq!(Pin::new(&mut fut).poll(&mut cx), Poll::Pending);
        assert_eq!(Pin::new(&mut fut).poll(&mut cx), Poll::Pending);
        assert_eq!(Pin::new(&mut fut).poll(&mut cx), Poll::Ready(()));
        assert_eq!(checks.get(), 3);
    }

    #[test]
    fn delay_elapses() {
        let waker = noop_waker();
        let mut cx = Context::from_waker(&waker);
        let mut fut = delay(Duration::from_millis(5));
        assert_eq!(Pin::new(&mut fut).poll(&mut cx), Poll::Pending);
        std::thread::sleep(Duration::from_millis(10));
        assert_eq!(Pin::new(&mut fut).poll(&mut cx), Poll::Ready(()));
    }

    #[test]
    fn zero_delay_is_ready_immediately() {
        let waker = noop_waker();
        let mut cx = Context::from_waker(&waker);
        let mut fut = delay(Duration::ZERO);
        assert_eq!(Pin::new(&mut fut).poll(&mut cx), Poll::Ready(()));
    }
}
