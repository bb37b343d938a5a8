//! Process-scoped crypto engine lifecycle
//!
//! Multiple call-session managers can coexist in one process, so engine
//! init/teardown is reference counted rather than a bare boolean. Both
//! operations are idempotent from the caller's perspective: acquiring an
//! already-initialized engine only bumps the count, and an unbalanced
//! teardown is reported at warn level instead of crashing the process.

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use tracing::{debug, warn};

struct EngineState {
    refs: usize,
    initialized: bool,
}

static ENGINE: Lazy<Mutex<EngineState>> = Lazy::new(|| {
    Mutex::new(EngineState {
        refs: 0,
        initialized: false,
    })
});

/// Acquire a reference on the process-wide crypto engine, initializing it
/// on the first acquisition.
pub fn ensure_initialized() {
    let mut st = ENGINE.lock();
    st.refs += 1;
    if !st.initialized {
        st.initialized = true;
        debug!("crypto engine initialized");
    }
}

/// Release one reference; the engine is torn down when the last reference
/// goes away.
pub fn teardown() {
    release()
}

pub(crate) fn release() {
    let mut st = ENGINE.lock();
    if st.refs == 0 {
        warn!("crypto engine teardown without matching initialization");
        return;
    }
    st.refs -= 1;
    if st.refs == 0 {
        st.initialized = false;
        debug!("crypto engine torn down");
    }
}

/// Whether the engine currently holds any references.
pub fn is_initialized() -> bool {
    ENGINE.lock().initialized
}

#[cfg(test)]
mod tests {
    use super::*;

    // One test only: the engine state is process-global, and parallel
    // tests poking at the refcount would observe each other.
    #[test]
    fn refcounted_init_and_teardown() {
        ensure_initialized();
        ensure_initialized();
        assert!(is_initialized());
        teardown();
        assert!(is_initialized());
        teardown();
        // Over-releasing must warn, never panic or underflow.
        teardown();
        ensure_initialized();
        assert!(is_initialized());
        teardown();
    }
}
