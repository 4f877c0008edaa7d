//! Waiting for the session child.

use crate::config::types::{SessionError, SessionResult};
use crate::kernel::signal::caught_signal;
use nix::errno::Errno;
use nix::sys::signal::kill;
use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::Pid;

/// Wait for `child` to terminate and return its exit status
///
/// A SIGHUP or SIGTERM recorded by the signal guard is forwarded to the
/// child once; once the child has been reaped the recorded signal is
/// reported as [`SessionError::SignalCatch`]. A non-zero exit status is an
/// error only when `fail_on_status` is set.
pub fn wait_for_child(child: Pid, fail_on_status: bool) -> SessionResult<i32> {
    let mut forwarded = false;

    let status = loop {
        if !forwarded {
            if let Some(signal) = caught_signal() {
                log::info!("Forwarding {} to child {}", signal, child);
                if let Err(e) = kill(child, signal) {
                    log::warn!("failed to forward {} to child {}: {}", signal, child, e);
                }
                forwarded = true;
            }
        }

        match waitpid(child, None) {
            Ok(status @ (WaitStatus::Exited(..) | WaitStatus::Signaled(..))) => break status,
            Ok(_) => continue,
            Err(Errno::EINTR) => continue,
            Err(e) => return Err(SessionError::ChildWait(e)),
        }
    };

    if let Some(signal) = caught_signal() {
        return Err(SessionError::SignalCatch(signal.as_str().to_string()));
    }

    match status {
        WaitStatus::Signaled(_, signal, true) => {
            Err(SessionError::ChildCore(signal.as_str().to_string()))
        }
        WaitStatus::Signaled(_, signal, false) => {
            Err(SessionError::ChildSignal(signal.as_str().to_string()))
        }
        WaitStatus::Exited(_, code) if code != 0 && fail_on_status => {
            Err(SessionError::ChildFail(code))
        }
        WaitStatus::Exited(_, code) => Ok(code),
        _ => Ok(0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::sys::signal::Signal;
    use nix::unistd::{fork, ForkResult};

    fn spawn(exit: impl FnOnce() -> i32) -> Pid {
        // SAFETY: the child only calls _exit or raises a signal.
        match unsafe { fork() }.unwrap() {
            ForkResult::Child => {
                let code = exit();
                unsafe { libc::_exit(code) }
            }
            ForkResult::Parent { child } => child,
        }
    }

    #[test]
    fn exit_status_is_returned() {
        assert_eq!(wait_for_child(spawn(|| 0), false).unwrap(), 0);
        assert_eq!(wait_for_child(spawn(|| 7), false).unwrap(), 7);
        assert!(matches!(
            wait_for_child(spawn(|| 7), true),
            Err(SessionError::ChildFail(7))
        ));
    }

    #[test]
    fn signalled_child_is_an_error() {
        let child = spawn(|| {
            let _ = nix::sys::signal::raise(Signal::SIGKILL);
            0
        });
        assert!(matches!(
            wait_for_child(child, false),
            Err(SessionError::ChildSignal(ref s)) if s == "SIGKILL"
        ));
    }
}
