//! Reusable formatting buffer for plain log calls.

use std::cell::RefCell;

/// Buffers that grew past this are released instead of kept.
const MAX_RETAINED_CAPACITY: usize = 64 << 10;

thread_local! {
    static BUFFER: RefCell<String> = RefCell::new(String::with_capacity(256));
}

/// Runs `f` with a cleared per-thread buffer.
///
/// Re-entrant calls (a `Display` impl that logs) get a fresh buffer.
pub(crate) fn with_buffer<R>(f: impl FnOnce(&mut String) -> R) -> R {
    BUFFER.with(|cell| match cell.try_borrow_mut() {
        Ok(mut buf) => {
            buf.clear();
            let out = f(&mut buf);
            if buf.capacity() > MAX_RETAINED_CAPACITY {
                *buf = String::new();
            }
            out
        }
        Err(_) => f(&mut String::new()),
    })
}
