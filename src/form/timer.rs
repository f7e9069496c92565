use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Context, Poll, Waker};
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use futures_timer::Delay;

/// Source of delays for debounced validation.
///
/// A delay starts counting when it is created, not when it is first polled.
pub trait Timer: Send + Sync {
    fn delay(&self, duration: Duration) -> BoxFuture<'static, ()>;
}

/// Wall-clock timer backed by `futures-timer`.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemTimer;

impl Timer for SystemTimer {
    fn delay(&self, duration: Duration) -> BoxFuture<'static, ()> {
        Delay::new(duration).boxed()
    }
}

#[derive(Default)]
struct Sleeper {
    fired: bool,
    waker: Option<Waker>,
}

struct PendingSleep {
    deadline: Duration,
    sleeper: Arc<Mutex<Sleeper>>,
}

impl PendingSleep {
    /// The delay awaiting this sleep was dropped, e.g. by an aborted debounce.
    fn is_orphaned(&self) -> bool {
        Arc::strong_count(&self.sleeper) == 1
    }
}

#[derive(Default)]
struct Clock {
    now: Duration,
    pending: Vec<PendingSleep>,
}

/// Virtual-time timer. Delays only elapse when [`ManualTimer::advance`] moves
/// the clock past their deadline.
#[derive(Clone, Default)]
pub struct ManualTimer {
    clock: Arc<Mutex<Clock>>,
}

impl ManualTimer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn now(&self) -> Duration {
        guard(&self.clock).now
    }

    /// Sleeps still awaited by a live delay.
    pub fn pending(&self) -> usize {
        guard(&self.clock)
            .pending
            .iter()
            .filter(|sleep| !sleep.is_orphaned())
            .count()
    }

    pub fn advance(&self, by: Duration) {
        let due = {
            let mut clock = guard(&self.clock);
            clock.now += by;
            let now = clock.now;
            let (due, pending): (Vec<_>, Vec<_>) = std::mem::take(&mut clock.pending)
                .into_iter()
                .filter(|sleep| !sleep.is_orphaned())
                .partition(|sleep| sleep.deadline <= now);
            clock.pending = pending;
            due
        };
        for sleep in due {
            let waker = {
                let mut sleeper = guard(&sleep.sleeper);
                sleeper.fired = true;
                sleeper.waker.take()
            };
            if let Some(waker) = waker {
                waker.wake();
            }
        }
    }

    pub fn advance_millis(&self, millis: u64) {
        self.advance(Duration::from_millis(millis));
    }
}

impl Timer for ManualTimer {
    fn delay(&self, duration: Duration) -> BoxFuture<'static, ()> {
        let sleeper = Arc::new(Mutex::new(Sleeper::default()));
        if duration.is_zero() {
            guard(&sleeper).fired = true;
        } else {
            let mut clock = guard(&self.clock);
            let deadline = clock.now + duration;
            clock.pending.push(PendingSleep {
                deadline,
                sleeper: sleeper.clone(),
            });
        }
        ManualDelay { sleeper }.boxed()
    }
}

struct ManualDelay {
    sleeper: Arc<Mutex<Sleeper>>,
}

impl Future for ManualDelay {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        let mut sleeper = guard(&self.sleeper);
        if sleeper.fired {
            return Poll::Ready(());
        }
        sleeper.waker = Some(cx.waker().clone());
        Poll::Pending
    }
}

fn guard<T>(lock: &Mutex<T>) -> MutexGuard<'_, T> {
    match lock.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
