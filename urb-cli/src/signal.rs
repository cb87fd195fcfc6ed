//! Process lifecycle signals
//!
//! SIGINT and SIGTERM only set a flag; the main thread polls it, stops the
//! stack and writes the output.

use std::sync::atomic::{AtomicBool, Ordering};

/// Set once a termination signal arrived; never cleared
static SHUTDOWN: AtomicBool = AtomicBool::new(false);

extern "C" fn signal_handler(_sig: libc::c_int) {
    SHUTDOWN.store(true, Ordering::Relaxed);
}

/// Route SIGINT and SIGTERM to the shutdown flag
pub fn install() {
    #[cfg(unix)]
    unsafe {
        libc::signal(libc::SIGTERM, signal_handler as *const () as libc::sighandler_t);
        libc::signal(libc::SIGINT, signal_handler as *const () as libc::sighandler_t);
    }
}

/// Whether shutdown was requested
pub fn requested() -> bool {
    SHUTDOWN.load(Ordering::Relaxed)
}

/// Request shutdown from inside the process
pub fn request() {
    SHUTDOWN.store(true, Ordering::Relaxed);
}
