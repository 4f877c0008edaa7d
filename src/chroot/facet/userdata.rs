//! Namespaced key/value data passed through to setup scripts.
//!
//! Any key of the form `<namespace>.<key>` which no other part of the chroot
//! claims is kept here and exported to scripts as an upper-cased environment
//! variable (`setup.fstab` becomes `SETUP_FSTAB`). Users may override keys
//! listed in `user-modifiable-keys` with `--option`; root may also override
//! `root-modifiable-keys`.

use crate::chroot::keys::KeyReader;
use crate::config::keyfile::{split_list, Keyfile, Priority};
use crate::config::types::{ChrootError, ChrootResult};
use crate::utils::environment::Environment;
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::OnceLock;

fn key_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^([a-z][a-z0-9]*\.)+[a-z][a-z0-9_-]*$")
            .expect("static userdata pattern is valid")
    })
}

/// Namespace reserved for the unshare facet
const RESERVED_NAMESPACES: &[&str] = &["unshare."];

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Userdata {
    data: BTreeMap<String, String>,
    user_modifiable_keys: BTreeSet<String>,
    root_modifiable_keys: BTreeSet<String>,
}

impl Userdata {
    pub const KEYS: &'static [&'static str] = &["user-modifiable-keys", "root-modifiable-keys"];

    pub fn is_valid_key(key: &str) -> bool {
        key_pattern().is_match(key)
            && !RESERVED_NAMESPACES
                .iter()
                .any(|ns| key.starts_with(ns))
    }

    /// Environment variable name for a data key
    pub fn env_name(key: &str) -> String {
        key.chars()
            .map(|c| match c {
                '.' | '-' => '_',
                other => other.to_ascii_uppercase(),
            })
            .collect()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.data.get(key).map(String::as_str)
    }

    pub fn data(&self) -> &BTreeMap<String, String> {
        &self.data
    }

    /// Set a value from configuration
    pub fn set(&mut self, key: &str, value: impl Into<String>) -> ChrootResult<()> {
        if !Self::is_valid_key(key) {
            return Err(ChrootError::UserdataKeyInvalid(key.to_string()));
        }
        self.data.insert(key.to_string(), value.into());
        Ok(())
    }

    /// Set a value supplied by the invoking user
    ///
    /// Only keys listed as user modifiable (or, for root, root modifiable)
    /// may be changed.
    pub fn set_from_user(&mut self, key: &str, value: &str, root: bool) -> ChrootResult<()> {
        if !Self::is_valid_key(key) {
            return Err(ChrootError::UserdataKeyInvalid(key.to_string()));
        }
        let permitted = self.user_modifiable_keys.contains(key)
            || (root && self.root_modifiable_keys.contains(key));
        if !permitted {
            return Err(ChrootError::UserdataKeyUnmodifiable(key.to_string()));
        }
        self.data.insert(key.to_string(), value.to_string());
        Ok(())
    }

    pub fn set_user_modifiable_keys<I: IntoIterator<Item = String>>(&mut self, keys: I) {
        self.user_modifiable_keys = keys.into_iter().collect();
    }

    pub fn set_root_modifiable_keys<I: IntoIterator<Item = String>>(&mut self, keys: I) {
        self.root_modifiable_keys = keys.into_iter().collect();
    }

    pub(super) fn setup_env(&self, env: &mut Environment) {
        for (key, value) in &self.data {
            env.set(Self::env_name(key), value);
        }
    }

    pub(super) fn keyfile_get(&self, keyfile: &mut Keyfile, group: &str) {
        if !self.user_modifiable_keys.is_empty() {
            let keys: Vec<&String> = self.user_modifiable_keys.iter().collect();
            keyfile.set_list(group, "user-modifiable-keys", &keys);
        }
        if !self.root_modifiable_keys.is_empty() {
            let keys: Vec<&String> = self.root_modifiable_keys.iter().collect();
            keyfile.set_list(group, "root-modifiable-keys", &keys);
        }
        for (key, value) in &self.data {
            keyfile.set_value(group, key, value);
        }
    }

    pub(super) fn keyfile_set(&mut self, reader: &KeyReader<'_>) -> ChrootResult<()> {
        if let Some(keys) = reader.raw("user-modifiable-keys", Priority::Optional)? {
            self.set_user_modifiable_keys(split_list(keys));
        }
        if let Some(keys) = reader.raw("root-modifiable-keys", Priority::Optional)? {
            self.set_root_modifiable_keys(split_list(keys));
        }
        Ok(())
    }

    /// Absorb every namespaced key not claimed elsewhere
    ///
    /// Returns the keys which were taken.
    pub fn absorb_unclaimed<'a>(
        &mut self,
        reader: &KeyReader<'a>,
        claimed: &BTreeSet<&str>,
    ) -> ChrootResult<Vec<&'a str>> {
        let mut taken = Vec::new();
        for key in reader.keys() {
            if claimed.contains(key) || !key.contains('.') {
                continue;
            }
            if let Some(value) = reader.raw(key, Priority::Optional)? {
                self.set(key, value).map_err(|e| reader.wrap(key, e))?;
                taken.push(key);
            }
        }
        Ok(taken)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn environment_names() {
        assert_eq!(Userdata::env_name("setup.fstab"), "SETUP_FSTAB");
        assert_eq!(Userdata::env_name("sbuild.build-dep"), "SBUILD_BUILD_DEP");
    }

    #[test]
    fn key_validation() {
        assert!(Userdata::is_valid_key("setup.fstab"));
        assert!(Userdata::is_valid_key("a.b.c"));
        assert!(!Userdata::is_valid_key("fstab"));
        assert!(!Userdata::is_valid_key("Setup.fstab"));
        assert!(!Userdata::is_valid_key("unshare.net"));
    }

    #[test]
    fn user_modification_is_restricted() {
        let mut data = Userdata::default();
        data.set_user_modifiable_keys(["sbuild.resolver".to_string()]);
        data.set_root_modifiable_keys(["setup.fstab".to_string()]);

        data.set_from_user("sbuild.resolver", "aptitude", false).unwrap();
        assert_eq!(data.get("sbuild.resolver"), Some("aptitude"));

        assert!(matches!(
            data.set_from_user("setup.fstab", "/tmp/fstab", false),
            Err(ChrootError::UserdataKeyUnmodifiable(_))
        ));
        data.set_from_user("setup.fstab", "/tmp/fstab", true).unwrap();
        assert!(matches!(
            data.set_from_user("bogus", "x", true),
            Err(ChrootError::UserdataKeyInvalid(_))
        ));
    }

    #[test]
    fn absorbs_only_unclaimed_namespaced_keys() {
        let kf = Keyfile::parse(
            "[sid]\ntype=directory\nsetup.fstab=default/fstab\nunshare.net=true\n",
            None,
        )
        .unwrap();
        let reader = KeyReader::new(&kf, "sid");
        let claimed: BTreeSet<&str> = ["type", "unshare.net"].into_iter().collect();

        let mut data = Userdata::default();
        let taken = data.absorb_unclaimed(&reader, &claimed).unwrap();
        assert_eq!(taken, vec!["setup.fstab"]);

        let mut env = Environment::new();
        data.setup_env(&mut env);
        assert_eq!(env.get("SETUP_FSTAB"), Some("default/fstab"));
    }
}
