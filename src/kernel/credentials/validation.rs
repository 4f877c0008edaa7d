//! Group membership checks used by chroot access control.

use crate::config::types::{AuthError, AuthResult};
use nix::unistd::{getegid, getgid, getgroups, Group};

/// Whether the calling process is a member of `group`
///
/// Checks the real and effective GIDs and the supplementary group list.
/// Unknown groups are reported and treated as non-membership.
pub fn is_group_member(group: &str) -> AuthResult<bool> {
    let Some(entry) = Group::from_name(group).map_err(AuthError::Lookup)? else {
        log::warn!("{}", AuthError::GroupUnknown(group.to_string()));
        return Ok(false);
    };

    if entry.gid == getgid() || entry.gid == getegid() {
        return Ok(true);
    }

    let groups = getgroups().map_err(AuthError::Lookup)?;
    Ok(groups.contains(&entry.gid))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn member_of_own_primary_group() {
        let gid = getgid();
        if let Ok(Some(group)) = Group::from_gid(gid) {
            assert!(is_group_member(&group.name).unwrap());
        }
    }

    #[test]
    fn unknown_group_is_not_membership() {
        assert!(!is_group_member("no-such-group-rschroot").unwrap());
    }
}
