use crate::chroot::keys::KeyReader;
use crate::config::keyfile::{Keyfile, Priority};
use crate::config::types::ChrootResult;
use crate::kernel::namespace::UnshareSet;

/// Namespaces the session child detaches from
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct UnshareFacet {
    pub unshare: UnshareSet,
}

impl UnshareFacet {
    pub const KEYS: &'static [&'static str] =
        &["unshare.net", "unshare.sysvipc", "unshare.sysvsem", "unshare.uts"];

    pub(super) fn keyfile_get(&self, keyfile: &mut Keyfile, group: &str) {
        keyfile.set_bool(group, "unshare.net", self.unshare.net);
        keyfile.set_bool(group, "unshare.sysvipc", self.unshare.sysvipc);
        keyfile.set_bool(group, "unshare.sysvsem", self.unshare.sysvsem);
        keyfile.set_bool(group, "unshare.uts", self.unshare.uts);
    }

    pub(super) fn keyfile_set(&mut self, reader: &KeyReader<'_>) -> ChrootResult<()> {
        let toggles = [
            ("unshare.net", &mut self.unshare.net),
            ("unshare.sysvipc", &mut self.unshare.sysvipc),
            ("unshare.sysvsem", &mut self.unshare.sysvsem),
            ("unshare.uts", &mut self.unshare.uts),
        ];
        for (key, slot) in toggles {
            if let Some(value) = reader.bool(key, Priority::Optional)? {
                *slot = value;
            }
        }
        Ok(())
    }
}
