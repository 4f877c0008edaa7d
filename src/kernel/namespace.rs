/// Optional `unshare(2)` of per-session namespaces
///
/// Only the toggles carried by the `unshare` facet are supported; rschroot
/// is not a container runtime.
use crate::config::types::{SessionError, SessionResult};
use nix::sched::{unshare, CloneFlags};

/// Namespaces to detach from before entering the chroot
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct UnshareSet {
    /// Network namespace
    pub net: bool,
    /// System V IPC namespace
    pub sysvipc: bool,
    /// System V semaphore adjustment values
    pub sysvsem: bool,
    /// Hostname and domain name
    pub uts: bool,
}

impl UnshareSet {
    pub fn is_empty(&self) -> bool {
        !(self.net || self.sysvipc || self.sysvsem || self.uts)
    }

    pub fn clone_flags(&self) -> CloneFlags {
        let mut flags = CloneFlags::empty();
        if self.net {
            flags |= CloneFlags::CLONE_NEWNET;
        }
        if self.sysvipc {
            flags |= CloneFlags::CLONE_NEWIPC;
        }
        if self.sysvsem {
            flags |= CloneFlags::CLONE_SYSVSEM;
        }
        if self.uts {
            flags |= CloneFlags::CLONE_NEWUTS;
        }
        flags
    }

    /// Names of the enabled namespaces, for error messages
    pub fn describe(&self) -> String {
        [
            (self.net, "net"),
            (self.sysvipc, "sysvipc"),
            (self.sysvsem, "sysvsem"),
            (self.uts, "uts"),
        ]
        .iter()
        .filter(|(enabled, _)| *enabled)
        .map(|(_, name)| *name)
        .collect::<Vec<_>>()
        .join(",")
    }

    /// Apply to the calling process
    pub fn apply(&self) -> SessionResult<()> {
        if self.is_empty() {
            return Ok(());
        }
        unshare(self.clone_flags()).map_err(|source| SessionError::Unshare {
            what: self.describe(),
            source,
        })?;
        log::debug!("Unshared namespaces: {}", self.describe());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_follow_toggles() {
        let set = UnshareSet {
            net: true,
            uts: true,
            ..Default::default()
        };
        let flags = set.clone_flags();
        assert!(flags.contains(CloneFlags::CLONE_NEWNET));
        assert!(flags.contains(CloneFlags::CLONE_NEWUTS));
        assert!(!flags.contains(CloneFlags::CLONE_NEWIPC));
        assert_eq!(set.describe(), "net,uts");
    }

    #[test]
    fn empty_set_is_noop() {
        assert!(UnshareSet::default().is_empty());
        assert!(UnshareSet::default().apply().is_ok());
    }
}
