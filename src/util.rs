//! Utility functions and helper types.

use std::cell::Cell;
use std::rc::Rc;

use crate::handle::Handle;

thread_local! {
    static CALLBACK_ID: Cell<u64> = const { Cell::new(0) };
}

/// Next identity for an item callback. Callbacks are removed from
/// `on_item` lists by this identity, never by position.
pub(crate) fn next_callback_id() -> u64 {
    CALLBACK_ID.with(|c| {
        let id = c.get() + 1;
        c.set(id);
        id
    })
}

/// A handle settling with the first of `handles` to become ready,
/// adopting that handle's terminal state.
pub fn needs_any(handles: &[Handle]) -> Handle {
    let out = Handle::new("needs_any");
    for h in handles {
        let target = out.clone();
        h.on_ready(move |h| target.adopt(h));
    }
    out
}

/// A handle settling when every one of `handles` is ready: the first
/// failure fails it immediately; otherwise it is done once all have
/// settled (cancelled upstreams count as settled; if every upstream was
/// cancelled, the aggregate is cancelled too). An empty set is done.
pub fn needs_all(handles: &[Handle]) -> Handle {
    let out = Handle::new("needs_all");
    if handles.is_empty() {
        let _ = out.done();
        return out;
    }
    let remaining = Rc::new(Cell::new(handles.len()));
    let any_done = Rc::new(Cell::new(false));
    for h in handles {
        let target = out.clone();
        let remaining = remaining.clone();
        let any_done = any_done.clone();
        h.on_ready(move |h| {
            if target.is_ready() {
                return;
            }
            if let Some(failure) = h.failure() {
                let _ = target.fail_tagged(failure.error, failure.tags);
                return;
            }
            if h.is_done() {
                any_done.set(true);
            }
            remaining.set(remaining.get() - 1);
            if remaining.get() == 0 {
                if any_done.get() {
                    let _ = target.done();
                } else {
                    let _ = target.cancel();
                }
            }
        });
    }
    out
}
