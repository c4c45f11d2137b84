//! Cooperative cancellation for the monitor loop.

use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

#[derive(Clone, Default)]
pub struct Shutdown {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl Shutdown {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        let (lock, cvar) = &*self.inner;
        if let Ok(mut triggered) = lock.lock() {
            *triggered = true;
        }
        cvar.notify_all();
    }

    #[cfg(test)]
    pub fn is_triggered(&self) -> bool {
        let (lock, _) = &*self.inner;
        lock.lock().map(|triggered| *triggered).unwrap_or(true)
    }

    /// Sleeps up to `timeout`; returns true as soon as shutdown is triggered.
    ///
    /// A timeout too large to represent as a deadline waits for the trigger.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let (lock, cvar) = &*self.inner;
        let deadline = Instant::now().checked_add(timeout);
        let Ok(mut triggered) = lock.lock() else {
            return true;
        };
        while !*triggered {
            triggered = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return false;
                    }
                    match cvar.wait_timeout(triggered, deadline - now) {
                        Ok((guard, _)) => guard,
                        Err(_) => return true,
                    }
                }
                None => match cvar.wait(triggered) {
                    Ok(guard) => guard,
                    Err(_) => return true,
                },
            };
        }
        true
    }
}

/// Routes SIGINT and SIGTERM to `shutdown`.
///
/// Must run before any other thread is spawned so every thread inherits the
/// blocked mask and only the dedicated waiter receives the signals.
#[cfg(unix)]
pub fn install_signal_handler(shutdown: Shutdown) -> Result<(), String> {
    use tracing::info;

    // SAFETY: `sigset_t` is plain data; it is zeroed then initialized by
    // `sigemptyset` before use.
    let mut set: libc::sigset_t = unsafe { std::mem::zeroed() };
    // SAFETY: `set` is a valid, exclusively borrowed sigset.
    unsafe {
        libc::sigemptyset(&mut set);
        libc::sigaddset(&mut set, libc::SIGINT);
        libc::sigaddset(&mut set, libc::SIGTERM);
    }

    // SAFETY: `set` is initialized; a null old-mask pointer is allowed.
    let rc = unsafe { libc::pthread_sigmask(libc::SIG_BLOCK, &set, std::ptr::null_mut()) };
    if rc != 0 {
        return Err(format!("Failed to block termination signals: errno {}", rc));
    }

    std::thread::Builder::new()
        .name("signal-wait".to_string())
        .spawn(move || loop {
            let mut signal: libc::c_int = 0;
            // SAFETY: `set` was initialized above and is moved into this
            // thread; `signal` is a valid out pointer.
            let rc = unsafe { libc::sigwait(&set, &mut signal) };
            if rc != 0 {
                continue;
            }
            info!(signal, "Termination signal received");
            shutdown.trigger();
            break;
        })
        .map_err(|err| format!("Failed to spawn signal thread: {}", err))?;

    Ok(())
}

#[cfg(not(unix))]
pub fn install_signal_handler(_shutdown: Shutdown) -> Result<(), String> {
    Ok(())
}
