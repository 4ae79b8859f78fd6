//! Completion dispatch: the CQ poller thread and the executor worker pool.

mod cq_poller;
mod executor;

pub use cq_poller::CqPoller;
pub use executor::Executor;

use crate::verbs::types::{Wc, WrId};

/// The per-request callback invoked with the matching completion entry.
pub(crate) type CompletionCallback = Box<dyn FnOnce(&Wc) + Send + 'static>;

/// Move a callback to the heap and return its address for use as a `wr_id`.
///
/// Ownership transfers to whoever later observes the completion: exactly one
/// executor worker reclaims it with [`callback_from_wr_id`], or the poster
/// reclaims it itself when the post fails synchronously.
pub(crate) fn callback_into_wr_id(callback: CompletionCallback) -> WrId {
    Box::into_raw(Box::new(callback)) as usize as WrId
}

/// Reclaim a callback from a `wr_id` produced by [`callback_into_wr_id`].
///
/// # Safety
///
/// `wr_id` must come from [`callback_into_wr_id`] and must not have been
/// reclaimed before.
pub(crate) unsafe fn callback_from_wr_id(wr_id: WrId) -> CompletionCallback {
    *Box::from_raw(wr_id as usize as *mut CompletionCallback)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;

    use super::*;
    use crate::verbs::types::Wc;

    #[test]
    fn wr_id_round_trip_invokes_once() {
        let seen = Arc::new(AtomicU64::new(0));
        let callback: CompletionCallback = {
            let seen = seen.clone();
            Box::new(move |wc| {
                seen.store(wc.wr_id(), Ordering::SeqCst);
            })
        };
        let wr_id = callback_into_wr_id(callback);
        let wc = Wc {
            wr_id,
            ..Wc::default()
        };
        let callback = unsafe { callback_from_wr_id(wr_id) };
        callback(&wc);
        // The callback observed the wr_id it was registered under.
        assert_eq!(seen.load(Ordering::SeqCst), wr_id);
    }
}
