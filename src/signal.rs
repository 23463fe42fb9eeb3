//! Ctrl-C handling
//!
//! The first SIGINT cancels the run: nothing new is started and waits end
//! early. The handler then restores the default disposition, so a second
//! Ctrl-C terminates the process.

use atlaskit::CancelToken;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

static INTERRUPTED: AtomicBool = AtomicBool::new(false);

const WATCH_INTERVAL: Duration = Duration::from_millis(100);

/// Cancel `token` when the user presses Ctrl-C.
pub fn cancel_on_interrupt(token: &CancelToken) {
    install_handler();

    // The handler may only touch the atomic; cancelling takes a lock.
    let token = token.clone();
    let spawned = thread::Builder::new()
        .name("sigint-watch".to_string())
        .spawn(move || {
            while !token.is_cancelled() {
                if INTERRUPTED.load(Ordering::SeqCst) {
                    log::warn!("Interrupted, finishing in-flight operations");
                    token.cancel();
                    break;
                }
                thread::sleep(WATCH_INTERVAL);
            }
        });
    if let Err(e) = spawned {
        log::warn!("Ctrl-C handling unavailable: {e}");
    }
}

#[cfg(unix)]
extern "C" fn on_sigint(_signal: libc::c_int) {
    INTERRUPTED.store(true, Ordering::SeqCst);
    // SAFETY: signal() is async-signal-safe
    unsafe {
        libc::signal(libc::SIGINT, libc::SIG_DFL);
    }
}

#[cfg(unix)]
fn install_handler() {
    let handler = on_sigint as extern "C" fn(libc::c_int) as libc::sighandler_t;
    // SAFETY: on_sigint only stores to an atomic and calls signal()
    let previous = unsafe { libc::signal(libc::SIGINT, handler) };
    if previous == libc::SIG_ERR {
        log::warn!("Could not install SIGINT handler");
    }
}

#[cfg(not(unix))]
fn install_handler() {
    log::debug!("SIGINT handling is only available on Unix");
}
