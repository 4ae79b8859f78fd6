//! An eagerly-started task primitive.
//!
//! A [`Task`] runs a future immediately on the spawning thread up to its
//! first suspension point. Afterwards, every wake-up polls the future inline
//! on the waking thread, so a task suspended on a completion resumes on the
//! executor worker that routed the completion, and a task suspended on a
//! socket resumes on the event-loop thread.
//!
//! A task that has not been detached joins in its destructor: dropping the
//! handle blocks until the body finished, so no suspended frame outlives the
//! handle that owns it. [`Task::detach`] transfers ownership to the runtime
//! instead; the task tears itself down when it completes and its result is
//! discarded (a panic is logged, not propagated).

use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::{Arc, Condvar, Mutex};
use std::task::{Context, Poll, Wake, Waker};
use std::thread;

type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send + 'static>>;

#[derive(Clone, Copy, PartialEq, Eq)]
enum RunState {
    /// Not being polled; `future` is parked in the state.
    Idle,
    /// A thread is polling the future right now.
    Polling,
    /// A wake-up arrived while polling; poll again before going idle.
    Notified,
}

struct State<T> {
    future: Option<BoxFuture<T>>,
    run: RunState,
    finished: bool,
    result: Option<thread::Result<T>>,
    awaiter: Option<Waker>,
    detached: bool,
}

struct Core<T> {
    state: Mutex<State<T>>,
    done_cv: Condvar,
}

struct CoreWaker<T>(Arc<Core<T>>);

impl<T: Send + 'static> Wake for CoreWaker<T> {
    fn wake(self: Arc<Self>) {
        Core::schedule(&self.0);
    }

    fn wake_by_ref(self: &Arc<Self>) {
        Core::schedule(&self.0);
    }
}

impl<T: Send + 'static> Core<T> {
    /// Poll the future on the current thread. At most one thread polls at a
    /// time; wake-ups that race with an active poll coalesce into one more
    /// round.
    fn schedule(this: &Arc<Self>) {
        let mut future = {
            let mut state = this.state.lock().unwrap();
            match state.run {
                RunState::Polling => {
                    state.run = RunState::Notified;
                    return;
                }
                RunState::Notified => return,
                RunState::Idle => {}
            }
            let Some(future) = state.future.take() else {
                return;
            };
            state.run = RunState::Polling;
            future
        };

        let waker = Waker::from(Arc::new(CoreWaker(this.clone())));
        loop {
            let mut cx = Context::from_waker(&waker);
            let polled =
                panic::catch_unwind(AssertUnwindSafe(|| future.as_mut().poll(&mut cx)));
            let mut state = this.state.lock().unwrap();
            match polled {
                Ok(Poll::Pending) => {
                    if state.run == RunState::Notified {
                        state.run = RunState::Polling;
                        drop(state);
                        continue;
                    }
                    state.future = Some(future);
                    state.run = RunState::Idle;
                    return;
                }
                Ok(Poll::Ready(value)) => {
                    this.finish(state, Ok(value));
                    return;
                }
                Err(payload) => {
                    this.finish(state, Err(payload));
                    return;
                }
            }
        }
    }

    fn finish(&self, mut state: std::sync::MutexGuard<'_, State<T>>, result: thread::Result<T>) {
        state.run = RunState::Idle;
        state.finished = true;
        if state.detached {
            if result.is_err() {
                log::error!("detached task panicked; dropping the panic");
            }
        } else {
            state.result = Some(result);
        }
        let awaiter = state.awaiter.take();
        drop(state);
        self.done_cv.notify_all();
        if let Some(waker) = awaiter {
            waker.wake();
        }
    }
}

/// Handle to a suspendable computation. See the module docs for the
/// ownership rules.
pub struct Task<T> {
    core: Arc<Core<T>>,
    consumed: bool,
    detached: bool,
}

impl<T: Send + 'static> Task<T> {
    /// Start a task. The body runs on the calling thread up to its first
    /// suspension point before this returns.
    pub fn spawn<F>(future: F) -> Self
    where
        F: Future<Output = T> + Send + 'static,
    {
        let core = Arc::new(Core {
            state: Mutex::new(State {
                future: Some(Box::pin(future)),
                run: RunState::Idle,
                finished: false,
                result: None,
                awaiter: None,
                detached: false,
            }),
            done_cv: Condvar::new(),
        });
        Core::schedule(&core);
        Task {
            core,
            consumed: false,
            detached: false,
        }
    }

    /// Whether the body has run to completion (or panicked).
    pub fn is_done(&self) -> bool {
        self.core.state.lock().unwrap().finished
    }

    /// Transfer ownership to the runtime. The task keeps running, its result
    /// is discarded when it completes, and a panic is logged instead of
    /// propagated. Detaching consumes the handle, so it is one-shot and the
    /// task can no longer be joined.
    pub fn detach(mut self) {
        self.detached = true;
        let mut state = self.core.state.lock().unwrap();
        state.detached = true;
        if state.finished {
            if let Some(Err(_)) = state.result.take() {
                log::error!("detached task panicked; dropping the panic");
            }
        }
    }

    /// Block the current thread until the task completes and return its
    /// value. A panicking body is re-raised here.
    ///
    /// Must not be called from a thread the task needs in order to make
    /// progress (an executor worker or the event-loop thread).
    pub fn join(mut self) -> T {
        let mut state = self.core.state.lock().unwrap();
        while !state.finished {
            state = self.core.done_cv.wait(state).unwrap();
        }
        self.consumed = true;
        let result = state.result.take().expect("task result already taken");
        drop(state);
        match result {
            Ok(value) => value,
            Err(payload) => panic::resume_unwind(payload),
        }
    }
}

impl<T: Send + 'static> Future for Task<T> {
    type Output = T;

    /// Awaiting a task suspends the awaiter iff the task is not yet
    /// complete; otherwise the value (or panic) is delivered synchronously.
    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<T> {
        let this = self.get_mut();
        let mut state = this.core.state.lock().unwrap();
        if state.finished {
            let result = state.result.take().expect("task awaited twice");
            this.consumed = true;
            drop(state);
            return Poll::Ready(match result {
                Ok(value) => value,
                Err(payload) => panic::resume_unwind(payload),
            });
        }
        state.awaiter = Some(cx.waker().clone());
        Poll::Pending
    }
}

impl<T> Drop for Task<T> {
    fn drop(&mut self) {
        if self.detached || self.consumed {
            return;
        }
        let mut state = self.core.state.lock().unwrap();
        while !state.finished {
            state = self.core.done_cv.wait(state).unwrap();
        }
        if let Some(Err(_)) = state.result.take() {
            log::error!("task panicked and was dropped without being awaited");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;

    /// A future that stays pending until an external thread wakes it.
    struct Gate {
        open: Arc<AtomicBool>,
        waker_slot: Arc<Mutex<Option<Waker>>>,
    }

    impl Future for Gate {
        type Output = ();

        fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
            if self.open.load(Ordering::Acquire) {
                Poll::Ready(())
            } else {
                *self.waker_slot.lock().unwrap() = Some(cx.waker().clone());
                Poll::Pending
            }
        }
    }

    fn gate() -> (Gate, impl FnOnce()) {
        let open = Arc::new(AtomicBool::new(false));
        let waker_slot = Arc::new(Mutex::new(None::<Waker>));
        let release = {
            let open = open.clone();
            let waker_slot = waker_slot.clone();
            move || {
                open.store(true, Ordering::Release);
                if let Some(waker) = waker_slot.lock().unwrap().take() {
                    waker.wake();
                }
            }
        };
        (Gate { open, waker_slot }, release)
    }

    #[test]
    fn body_runs_eagerly_to_first_suspension() {
        let progress = Arc::new(AtomicUsize::new(0));
        let (gate, release) = gate();
        let task = {
            let progress = progress.clone();
            Task::spawn(async move {
                progress.store(1, Ordering::SeqCst);
                gate.await;
                progress.store(2, Ordering::SeqCst);
            })
        };
        // The initial burst already ran.
        assert_eq!(progress.load(Ordering::SeqCst), 1);
        assert!(!task.is_done());
        release();
        task.join();
        assert_eq!(progress.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn join_returns_the_value() {
        let task = Task::spawn(async { 6 * 7 });
        assert!(task.is_done());
        assert_eq!(task.join(), 42);
    }

    #[test]
    fn drop_joins_the_task() {
        let done = Arc::new(AtomicBool::new(false));
        let (gate, release) = gate();
        let task = {
            let done = done.clone();
            Task::spawn(async move {
                gate.await;
                done.store(true, Ordering::SeqCst);
            })
        };
        let releaser = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            release();
        });
        drop(task);
        // Join-on-drop implies the body finished before drop returned.
        assert!(done.load(Ordering::SeqCst));
        releaser.join().unwrap();
    }

    #[test]
    fn detached_task_completes_on_its_own() {
        let done = Arc::new(AtomicBool::new(false));
        let (gate, release) = gate();
        {
            let done = done.clone();
            Task::spawn(async move {
                gate.await;
                done.store(true, Ordering::SeqCst);
            })
            .detach();
        }
        assert!(!done.load(Ordering::SeqCst));
        release();
        // The release wake polled the task inline on this thread.
        assert!(done.load(Ordering::SeqCst));
    }

    #[test]
    fn awaiting_a_task_from_a_task() {
        let inner = Task::spawn(async { 7 });
        let outer = Task::spawn(async move { inner.await + 1 });
        assert_eq!(outer.join(), 8);
    }

    #[test]
    #[should_panic(expected = "boom")]
    fn join_propagates_panics() {
        let task = Task::spawn(async { panic!("boom") });
        task.join();
    }
}
