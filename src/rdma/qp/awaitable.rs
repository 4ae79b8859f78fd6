//! Suspension plumbing shared by every data operation.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll, Waker};

use crate::verbs::types::Wc;

#[derive(Default)]
struct SlotInner {
    wc: Option<Wc>,
    waker: Option<Waker>,
}

/// One-shot rendezvous between a posted work request and its completion.
///
/// The posting task holds one reference and awaits [`wait`]; the callback
/// registered under the work request's `wr_id` holds the other and fills the
/// slot from an executor worker.
///
/// [`wait`]: CompletionSlot::wait
#[derive(Default)]
pub(crate) struct CompletionSlot {
    inner: Mutex<SlotInner>,
}

impl CompletionSlot {
    /// Deliver the completion and resume the waiting task, if any.
    pub(crate) fn complete(&self, wc: Wc) {
        let waker = {
            let mut inner = self.inner.lock().unwrap();
            inner.wc = Some(wc);
            inner.waker.take()
        };
        if let Some(waker) = waker {
            waker.wake();
        }
    }

    /// Await the completion entry, consuming the posting side's reference.
    pub(crate) fn wait(self: Arc<Self>) -> WcFuture {
        WcFuture { slot: self }
    }
}

pub(crate) struct WcFuture {
    slot: Arc<CompletionSlot>,
}

impl Future for WcFuture {
    type Output = Wc;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Wc> {
        let mut inner = self.slot.inner.lock().unwrap();
        match inner.wc.take() {
            Some(wc) => Poll::Ready(wc),
            None => {
                inner.waker = Some(cx.waker().clone());
                Poll::Pending
            }
        }
    }
}
