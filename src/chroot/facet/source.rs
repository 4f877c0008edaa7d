use crate::chroot::keys::KeyReader;
use crate::config::keyfile::{Keyfile, Priority};
use crate::config::types::ChrootResult;
use crate::utils::environment::Environment;

/// Marks the maintenance view of a chroot
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SourceFacet;

impl SourceFacet {
    pub(super) fn setup_env(&self, env: &mut Environment) {
        env.set("CHROOT_SESSION_SOURCE", "true");
    }
}

/// Allows a source chroot to be derived, with its own access lists
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SourceClonable {
    pub source_clone: bool,
    pub source_users: Vec<String>,
    pub source_groups: Vec<String>,
    pub source_root_users: Vec<String>,
    pub source_root_groups: Vec<String>,
}

impl Default for SourceClonable {
    fn default() -> Self {
        Self {
            source_clone: true,
            source_users: Vec::new(),
            source_groups: Vec::new(),
            source_root_users: Vec::new(),
            source_root_groups: Vec::new(),
        }
    }
}

impl SourceClonable {
    pub const KEYS: &'static [&'static str] = &[
        "source-clone",
        "source-users",
        "source-groups",
        "source-root-users",
        "source-root-groups",
    ];

    pub(super) fn keyfile_get(&self, keyfile: &mut Keyfile, group: &str) {
        keyfile.set_bool(group, "source-clone", self.source_clone);
        for (key, list) in [
            ("source-users", &self.source_users),
            ("source-groups", &self.source_groups),
            ("source-root-users", &self.source_root_users),
            ("source-root-groups", &self.source_root_groups),
        ] {
            if !list.is_empty() {
                keyfile.set_list(group, key, list);
            }
        }
    }

    pub(super) fn keyfile_set(&mut self, reader: &KeyReader<'_>) -> ChrootResult<()> {
        if let Some(clone) = reader.bool("source-clone", Priority::Optional)? {
            self.source_clone = clone;
        }
        if let Some(users) = reader.list("source-users", Priority::Optional)? {
            self.source_users = users;
        }
        if let Some(groups) = reader.list("source-groups", Priority::Optional)? {
            self.source_groups = groups;
        }
        if let Some(users) = reader.list("source-root-users", Priority::Optional)? {
            self.source_root_users = users;
        }
        if let Some(groups) = reader.list("source-root-groups", Priority::Optional)? {
            self.source_root_groups = groups;
        }
        Ok(())
    }
}
