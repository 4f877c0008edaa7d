//! UID/GID transitions for the session child and script runners.
//!
//! CRITICAL: the group identity MUST be set BEFORE the user identity.

mod transition;
mod validation;

pub use transition::{reset_to_root, set_groups, set_user};
pub use validation::is_group_member;
