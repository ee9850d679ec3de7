//! SIGINT/SIGTERM handling for the replay loop.
//!
//! The handler only raises a flag. The replay loop polls it between events and
//! returns normally, so the session finalizes its sink once on the main thread.
//!
//! The handlers are installed without `SA_RESTART`, so a read blocked on an idle
//! pipe fails with `EINTR` and the replay loop gets to see the flag. They reset
//! to the default action after the first delivery: a second Ctrl-C terminates.

use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Result;

static STOP_REQUESTED: AtomicBool = AtomicBool::new(false);

/// True once SIGINT or SIGTERM has been received.
pub fn stop_requested() -> bool {
    STOP_REQUESTED.load(Ordering::SeqCst)
}

#[cfg(unix)]
extern "C" fn request_stop(_signal: nix::libc::c_int) {
    STOP_REQUESTED.store(true, Ordering::SeqCst);
}

#[cfg(unix)]
pub fn install_stop_handlers() -> Result<()> {
    use anyhow::Context;
    use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};

    let action =
        SigAction::new(SigHandler::Handler(request_stop), SaFlags::SA_RESETHAND, SigSet::empty());
    for signal in [Signal::SIGINT, Signal::SIGTERM] {
        // SAFETY: the handler only stores to an atomic, which is async-signal-safe.
        unsafe { sigaction(signal, &action) }
            .with_context(|| format!("Failed to install {signal} handler"))?;
    }
    Ok(())
}

#[cfg(not(unix))]
pub fn install_stop_handlers() -> Result<()> {
    Ok(())
}
