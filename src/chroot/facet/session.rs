use crate::chroot::keys::KeyReader;
use crate::config::keyfile::{Keyfile, Priority};
use crate::config::types::ChrootResult;
use crate::utils::environment::Environment;

/// Marks an active session and remembers where it came from
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SessionFacet {
    /// Name of the chroot the session was cloned from
    pub original_name: String,
    /// Name or alias the user selected
    pub selected_name: String,
}

impl SessionFacet {
    pub const KEYS: &'static [&'static str] = &["original-name", "selected-name"];

    pub fn new(original_name: impl Into<String>, selected_name: impl Into<String>) -> Self {
        Self {
            original_name: original_name.into(),
            selected_name: selected_name.into(),
        }
    }

    pub(super) fn setup_env(&self, env: &mut Environment) {
        let alias = if self.selected_name.is_empty() {
            &self.original_name
        } else {
            &self.selected_name
        };
        env.set("CHROOT_ALIAS", alias);
    }

    pub(super) fn keyfile_get(&self, keyfile: &mut Keyfile, group: &str) {
        if !self.original_name.is_empty() {
            keyfile.set_value(group, "original-name", &self.original_name);
        }
        if !self.selected_name.is_empty() {
            keyfile.set_value(group, "selected-name", &self.selected_name);
        }
    }

    pub(super) fn keyfile_set(&mut self, reader: &KeyReader<'_>) -> ChrootResult<()> {
        if let Some(name) = reader.string("original-name", Priority::Optional)? {
            self.original_name = name;
        }
        if let Some(name) = reader.string("selected-name", Priority::Optional)? {
            self.selected_name = name;
        }
        Ok(())
    }
}

/// Allows sessions to be cloned from the chroot
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SessionClonable;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alias_falls_back_to_original_name() {
        let mut env = Environment::new();
        SessionFacet::new("sid", "").setup_env(&mut env);
        assert_eq!(env.get("CHROOT_ALIAS"), Some("sid"));

        SessionFacet::new("sid", "unstable").setup_env(&mut env);
        assert_eq!(env.get("CHROOT_ALIAS"), Some("unstable"));
    }
}
