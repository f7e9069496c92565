use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Context, Poll};

use futures::StreamExt;
use futures::future::BoxFuture;
use futures::stream::FuturesUnordered;
use futures::task::{ArcWake, waker};

use super::root::{FormError, FormResult};
use super::scheduler::Scheduler;
use super::timer::{SystemTimer, Timer};

/// Set when an async result or an edit needs the tree rendered again.
#[derive(Clone, Debug, Default)]
pub struct RenderSignal(Arc<AtomicBool>);

impl RenderSignal {
    pub fn request(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn take(&self) -> bool {
        self.0.swap(false, Ordering::SeqCst)
    }

    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Validation tasks driven by the host loop. Stands in for `LocalPool`, whose
/// `!Send` spawner cannot live in the `Send + Sync` runtime shared with fields.
#[derive(Clone, Default)]
pub(crate) struct TaskQueue(Arc<Mutex<FuturesUnordered<BoxFuture<'static, ()>>>>);

impl TaskQueue {
    pub(crate) fn spawn(&self, task: BoxFuture<'static, ()>) -> FormResult<()> {
        lock(&self.0, "queueing validation task")?.push(task);
        Ok(())
    }

    fn len(&self) -> FormResult<usize> {
        Ok(lock(&self.0, "counting validation tasks")?.len())
    }

    fn run_until_stalled(&self) -> FormResult<usize> {
        let flag = Arc::new(WakeFlag(AtomicBool::new(false)));
        let waker = waker(flag.clone());
        let mut cx = Context::from_waker(&waker);
        let mut tasks = lock(&self.0, "running validation tasks")?;
        let mut completed = 0;
        loop {
            flag.0.store(false, Ordering::SeqCst);
            match tasks.poll_next_unpin(&mut cx) {
                Poll::Ready(Some(())) => completed += 1,
                Poll::Ready(None) => break,
                Poll::Pending if flag.0.load(Ordering::SeqCst) => continue,
                Poll::Pending => break,
            }
        }
        Ok(completed)
    }
}

struct WakeFlag(AtomicBool);

impl ArcWake for WakeFlag {
    fn wake_by_ref(arc_self: &Arc<Self>) {
        arc_self.0.store(true, Ordering::SeqCst);
    }
}

/// Cooperative executor shared by every field of a form.
///
/// The host drives it from its event loop: [`Runtime::run_until_stalled`]
/// advances queued validations, and [`Runtime::take_render_request`] reports
/// whether a settled validation or an edit asked for a new render pass.
#[derive(Clone)]
pub struct Runtime {
    timer: Arc<dyn Timer>,
    scheduler: Scheduler,
    tasks: TaskQueue,
    render: RenderSignal,
}

impl Runtime {
    pub fn new(timer: Arc<dyn Timer>) -> Self {
        Self {
            scheduler: Scheduler::new(timer.clone()),
            timer,
            tasks: TaskQueue::default(),
            render: RenderSignal::default(),
        }
    }

    pub fn system() -> Self {
        Self::new(Arc::new(SystemTimer))
    }

    pub fn timer(&self) -> &Arc<dyn Timer> {
        &self.timer
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn render_signal(&self) -> &RenderSignal {
        &self.render
    }

    pub(crate) fn tasks(&self) -> &TaskQueue {
        &self.tasks
    }

    /// Polls queued validations until none can make progress. Returns how
    /// many finished.
    pub fn run_until_stalled(&self) -> FormResult<usize> {
        self.tasks.run_until_stalled()
    }

    pub fn pending_tasks(&self) -> FormResult<usize> {
        self.tasks.len()
    }

    pub fn take_render_request(&self) -> bool {
        self.render.take()
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::system()
    }
}

fn lock<'a, T>(lock: &'a Mutex<T>, context: &'static str) -> FormResult<MutexGuard<'a, T>> {
    lock.lock().map_err(|_| FormError::StatePoisoned(context))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::form::ManualTimer;
    use futures::FutureExt;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[test]
    fn queued_tasks_run_when_driven() {
        let runtime = Runtime::new(Arc::new(ManualTimer::new()));
        let finished = Arc::new(AtomicUsize::new(0));
        for _ in 0..40 {
            let finished = finished.clone();
            runtime
                .tasks()
                .spawn(
                    async move {
                        finished.fetch_add(1, Ordering::SeqCst);
                    }
                    .boxed(),
                )
                .expect("spawn");
        }

        assert_eq!(runtime.pending_tasks().expect("len"), 40);
        assert_eq!(runtime.run_until_stalled().expect("run"), 40);
        assert_eq!(finished.load(Ordering::SeqCst), 40);
        assert_eq!(runtime.pending_tasks().expect("len"), 0);
    }

    #[test]
    fn timed_tasks_wait_for_timer() {
        let timer = ManualTimer::new();
        let runtime = Runtime::new(Arc::new(timer.clone()));
        let delay = runtime.timer().delay(Duration::from_millis(50));
        let signal = runtime.render_signal().clone();
        runtime
            .tasks()
            .spawn(
                async move {
                    delay.await;
                    signal.request();
                }
                .boxed(),
            )
            .expect("spawn");

        assert_eq!(runtime.run_until_stalled().expect("run"), 0);
        assert!(!runtime.take_render_request());

        timer.advance_millis(50);
        assert_eq!(runtime.run_until_stalled().expect("run"), 1);
        assert!(runtime.take_render_request());
        assert!(!runtime.take_render_request());
    }
}
