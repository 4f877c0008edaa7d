/// Scoped SIGHUP/SIGTERM handling for the child-wait window
///
/// While a [`SignalGuard`] is alive, SIGHUP and SIGTERM are caught instead
/// of killing rschroot, so the session can forward them to the user command
/// and still tear the chroot down. Handlers are installed without
/// `SA_RESTART` so a blocking `waitpid` returns `EINTR` when they fire.
///
/// Guards are reference counted: the first guard installs the handlers and
/// clears any previously recorded signal, the last one dropped restores the
/// original dispositions.
use crate::config::types::{SessionError, SessionResult};
use log::{debug, warn};
use nix::sys::signal::{self, SaFlags, SigAction, SigHandler, SigSet, Signal};
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Mutex;

/// Last signal received while a guard was installed (0 = none)
static CAUGHT_SIGNAL: AtomicI32 = AtomicI32::new(0);

struct GuardState {
    depth: usize,
    saved: Option<(SigAction, SigAction)>,
}

static GUARD_STATE: Mutex<GuardState> = Mutex::new(GuardState {
    depth: 0,
    saved: None,
});

/// Async-safe handler: record the signal and return
extern "C" fn record_signal(signal: libc::c_int) {
    CAUGHT_SIGNAL.store(signal, Ordering::SeqCst);
}

/// Live SIGHUP/SIGTERM interception scope
#[derive(Debug)]
pub struct SignalGuard {
    _private: (),
}

impl SignalGuard {
    pub fn install() -> SessionResult<Self> {
        let mut state = GUARD_STATE.lock().unwrap_or_else(|e| e.into_inner());

        if state.depth == 0 {
            CAUGHT_SIGNAL.store(0, Ordering::SeqCst);

            let action = SigAction::new(
                SigHandler::Handler(record_signal),
                SaFlags::empty(),
                SigSet::empty(),
            );

            // SAFETY: the handler only performs an atomic store.
            let old_hup = unsafe { signal::sigaction(Signal::SIGHUP, &action) }
                .map_err(SessionError::SignalSet)?;
            // SAFETY: as above.
            let old_term = match unsafe { signal::sigaction(Signal::SIGTERM, &action) } {
                Ok(old) => old,
                Err(e) => {
                    // SAFETY: restoring the disposition returned by the kernel.
                    let _ = unsafe { signal::sigaction(Signal::SIGHUP, &old_hup) };
                    return Err(SessionError::SignalSet(e));
                }
            };

            state.saved = Some((old_hup, old_term));
            debug!("SIGHUP/SIGTERM handlers installed");
        }

        state.depth += 1;
        Ok(Self { _private: () })
    }

    /// Signal recorded since the first live guard was installed
    pub fn caught(&self) -> Option<Signal> {
        caught_signal()
    }
}

impl Drop for SignalGuard {
    fn drop(&mut self) {
        let mut state = GUARD_STATE.lock().unwrap_or_else(|e| e.into_inner());
        state.depth = state.depth.saturating_sub(1);
        if state.depth > 0 {
            return;
        }
        if let Some((old_hup, old_term)) = state.saved.take() {
            // SAFETY: restoring dispositions previously returned by sigaction.
            unsafe {
                if let Err(e) = signal::sigaction(Signal::SIGHUP, &old_hup) {
                    warn!("failed to restore SIGHUP handler: {}", e);
                }
                if let Err(e) = signal::sigaction(Signal::SIGTERM, &old_term) {
                    warn!("failed to restore SIGTERM handler: {}", e);
                }
            }
            debug!("SIGHUP/SIGTERM handlers restored");
        }
    }
}

/// Signal recorded by the guard handlers, if any
pub fn caught_signal() -> Option<Signal> {
    match CAUGHT_SIGNAL.load(Ordering::SeqCst) {
        0 => None,
        raw => Signal::try_from(raw).ok(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nested_guards_share_installation() {
        let outer = SignalGuard::install().unwrap();
        let inner = SignalGuard::install().unwrap();
        assert_eq!(GUARD_STATE.lock().unwrap().depth, 2);
        drop(inner);
        assert!(GUARD_STATE.lock().unwrap().saved.is_some());
        drop(outer);
        let state = GUARD_STATE.lock().unwrap();
        assert_eq!(state.depth, 0);
        assert!(state.saved.is_none());
    }
}
