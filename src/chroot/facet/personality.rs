use crate::chroot::keys::KeyReader;
use crate::config::keyfile::{Keyfile, Priority};
use crate::config::types::ChrootResult;
use crate::kernel::personality::Personality;
use crate::utils::environment::Environment;

/// Execution domain the session child switches to
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PersonalityFacet {
    pub personality: Personality,
}

impl PersonalityFacet {
    pub const KEYS: &'static [&'static str] = &["personality"];

    pub(super) fn setup_env(&self, env: &mut Environment) {
        env.set("CHROOT_PERSONALITY", self.personality);
    }

    pub(super) fn keyfile_get(&self, keyfile: &mut Keyfile, group: &str) {
        keyfile.set_value(group, "personality", self.personality.name());
    }

    pub(super) fn keyfile_set(&mut self, reader: &KeyReader<'_>) -> ChrootResult<()> {
        let parsed = reader.parse("personality", Priority::Optional, |v| {
            v.parse::<Personality>()
        })?;
        if let Some(personality) = parsed {
            self.personality = personality;
        }
        Ok(())
    }
}
