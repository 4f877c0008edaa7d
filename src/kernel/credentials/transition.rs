//! Switching to the target user inside the session child.
//!
//! CRITICAL: setgid and initgroups MUST run before setuid, since dropping
//! the user identity first removes the right to change groups.

use crate::config::types::{SessionError, SessionResult};
use nix::unistd::{initgroups, setgid, setuid, Gid, Uid};
use std::ffi::CString;

/// Set primary group and initialise supplementary groups for `user`
pub fn set_groups(user: &str, gid: u32) -> SessionResult<()> {
    setgid(Gid::from_raw(gid)).map_err(|source| SessionError::GroupSet { gid, source })?;

    let name = CString::new(user).map_err(|_| SessionError::Argument(user.to_string()))?;
    initgroups(&name, Gid::from_raw(gid)).map_err(|source| SessionError::GroupSetSup {
        user: user.to_string(),
        source,
    })?;

    log::debug!("Set GID to {} with groups of {}", gid, user);
    Ok(())
}

/// Set the user identity, then verify root cannot be regained
///
/// MUST be called AFTER [`set_groups`].
pub fn set_user(uid: u32) -> SessionResult<()> {
    setuid(Uid::from_raw(uid)).map_err(|source| SessionError::UserSet { uid, source })?;

    if uid != 0 && setuid(Uid::from_raw(0)).is_ok() {
        return Err(SessionError::RootDrop);
    }

    log::debug!("Set UID to {}", uid);
    Ok(())
}

/// Reset to uid 0/gid 0 for setup scripts when running as effective root
///
/// A no-op for unprivileged callers, which is how the test suite runs.
pub fn reset_to_root() -> SessionResult<()> {
    if !nix::unistd::geteuid().is_root() {
        return Ok(());
    }
    setgid(Gid::from_raw(0)).map_err(|source| SessionError::GroupSet { gid: 0, source })?;
    nix::unistd::setgroups(&[]).map_err(|source| SessionError::GroupSetSup {
        user: "root".to_string(),
        source,
    })?;
    setuid(Uid::from_raw(0)).map_err(|source| SessionError::UserSet { uid: 0, source })?;
    Ok(())
}
