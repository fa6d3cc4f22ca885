//! Cooperative shutdown signal shared by every pipeline thread.

use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

/// Cloneable, one-way shutdown flag.
///
/// Threads poll [`Shutdown::is_triggered`] between units of work and use
/// [`Shutdown::wait`] instead of `thread::sleep` so that idle waits end as
/// soon as shutdown is requested.
#[derive(Debug, Clone, Default)]
pub struct Shutdown {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl Shutdown {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request shutdown and wake every waiter.
    pub fn trigger(&self) {
        let (flag, cvar) = &*self.inner;
        let mut triggered = flag.lock().unwrap_or_else(|e| e.into_inner());
        *triggered = true;
        cvar.notify_all();
    }

    pub fn is_triggered(&self) -> bool {
        let (flag, _) = &*self.inner;
        *flag.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Sleep for up to `timeout`; returns `true` if shutdown was requested.
    pub fn wait(&self, timeout: Duration) -> bool {
        let (flag, cvar) = &*self.inner;
        let guard = flag.lock().unwrap_or_else(|e| e.into_inner());
        let (guard, _) = cvar
            .wait_timeout_while(guard, timeout, |triggered| !*triggered)
            .unwrap_or_else(|e| e.into_inner());
        *guard
    }
}
