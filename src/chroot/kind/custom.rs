use super::Storage;
use crate::chroot::keys::KeyReader;
use crate::config::keyfile::{Keyfile, Priority};
use crate::config::types::{ChrootResult, SessionFlags};
use crate::utils::environment::Environment;

/// Storage managed entirely by setup scripts through userdata keys
///
/// The cloneable flags only record intent; `Chroot` keeps the matching
/// facets in sync with them.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Custom {
    pub session_cloneable: bool,
    pub session_purgeable: bool,
    pub source_cloneable: bool,
}

impl Default for Custom {
    fn default() -> Self {
        Self {
            session_cloneable: true,
            session_purgeable: false,
            source_cloneable: false,
        }
    }
}

impl Storage for Custom {
    fn type_name(&self) -> &'static str {
        "custom"
    }

    fn session_flags(&self, active: bool) -> SessionFlags {
        let mut flags = SessionFlags::NOFLAGS;
        if self.session_cloneable {
            flags |= SessionFlags::CREATE;
            if active && self.session_purgeable {
                flags |= SessionFlags::PURGE;
            }
        }
        flags
    }

    fn setup_env(&self, _env: &mut Environment) {}

    fn keyfile_get(&self, keyfile: &mut Keyfile, group: &str, _session: bool) {
        keyfile.set_bool(group, "custom-session-cloneable", self.session_cloneable);
        keyfile.set_bool(group, "custom-session-purgeable", self.session_purgeable);
        keyfile.set_bool(group, "custom-source-cloneable", self.source_cloneable);
    }

    fn keyfile_set(&mut self, reader: &KeyReader<'_>, _session: bool) -> ChrootResult<()> {
        if let Some(value) = reader.bool("custom-session-cloneable", Priority::Optional)? {
            self.session_cloneable = value;
        }
        if let Some(value) = reader.bool("custom-session-purgeable", Priority::Optional)? {
            self.session_purgeable = value;
        }
        if let Some(value) = reader.bool("custom-source-cloneable", Priority::Optional)? {
            self.source_cloneable = value;
        }
        Ok(())
    }

    fn used_keys(&self) -> &'static [&'static str] {
        &[
            "custom-session-cloneable",
            "custom-session-purgeable",
            "custom-source-cloneable",
        ]
    }
}
