//! Chroot configuration registry.
//!
//! Chroots live in three namespaces: `chroot` for configured definitions,
//! `source` for the maintenance views generated from source-clonable
//! chroots, and `session` for live sessions read back from their
//! descriptors. Names are looked up as `namespace:name`; a bare name is
//! resolved in the caller's default namespace.

use crate::chroot::Chroot;
use crate::config::keyfile::Keyfile;
use crate::config::paths::Paths;
use crate::config::types::{
    ChrootError, ChrootResult, KeyfileError, SessionError, SessionFlags, SessionResult,
};
use crate::run_parts::is_valid_name;
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Separator between a namespace and a chroot name
pub const NAMESPACE_SEPARATOR: char = ':';

/// Chroot namespace
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Namespace {
    Chroot,
    Source,
    Session,
}

impl Namespace {
    pub const ALL: [Namespace; 3] = [Self::Chroot, Self::Source, Self::Session];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Chroot => "chroot",
            Self::Source => "source",
            Self::Session => "session",
        }
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Namespace {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "chroot" => Ok(Self::Chroot),
            "source" => Ok(Self::Source),
            "session" => Ok(Self::Session),
            other => Err(other.to_string()),
        }
    }
}

/// Split `namespace:name`; a bare name takes `default`
///
/// Returns `None` when the namespace is not known.
pub fn split_qualified(name: &str, default: Namespace) -> Option<(Namespace, &str)> {
    match name.split_once(NAMESPACE_SEPARATOR) {
        Some((ns, rest)) => ns.parse().ok().map(|ns| (ns, rest)),
        None => Some((default, name)),
    }
}

/// All configured chroots, sources and sessions
#[derive(Debug, Default)]
pub struct ChrootConfig {
    chroots: BTreeMap<Namespace, BTreeMap<String, Chroot>>,
    /// (namespace, alias) to (namespace, real name); every chroot is its own alias
    aliases: BTreeMap<(Namespace, String), (Namespace, String)>,
    sysconf_dir: Option<PathBuf>,
}

impl ChrootConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load the standard configuration described by `paths`
    ///
    /// `files` replaces the main configuration file and chroot.d when not
    /// empty. Sessions are read from the session directory when
    /// `with_sessions` is set.
    pub fn load(paths: &Paths, files: &[PathBuf], with_sessions: bool) -> ChrootResult<Self> {
        let mut config = Self::new();
        config.sysconf_dir = Some(paths.sysconf_dir.clone());

        if files.is_empty() {
            if paths.conf_file.exists() {
                config.add_file(&paths.conf_file, Namespace::Chroot)?;
            } else {
                log::debug!("{}: no configuration file", paths.conf_file.display());
            }
            config.add_dir(&paths.chroot_d_dir, Namespace::Chroot)?;
        } else {
            for file in files {
                config.add_file(file, Namespace::Chroot)?;
            }
        }

        if with_sessions {
            config.add_dir(&paths.session_dir, Namespace::Session)?;
        }
        Ok(config)
    }

    /// Add every valid file in `dir`; a missing directory is empty
    pub fn add_dir(&mut self, dir: &Path, namespace: Namespace) -> ChrootResult<()> {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::debug!("{}: directory does not exist", dir.display());
                return Ok(());
            }
            Err(source) => {
                return Err(KeyfileError::Read {
                    path: dir.to_path_buf(),
                    source,
                }
                .into())
            }
        };

        let mut files: Vec<PathBuf> = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            let name = entry.file_name().to_string_lossy().into_owned();
            let valid = match namespace {
                Namespace::Session => crate::chroot::validate_name(&name).is_ok(),
                _ => is_valid_name(&name, true),
            };
            if !valid {
                log::debug!("{}: ignoring file with invalid name", path.display());
                continue;
            }
            if !path.is_file() {
                log::debug!("{}: ignoring non-regular file", path.display());
                continue;
            }
            files.push(path);
        }
        files.sort();

        for file in files {
            self.add_file(&file, namespace)?;
        }
        Ok(())
    }

    /// Add every group of a keyfile on disk
    pub fn add_file(&mut self, path: &Path, namespace: Namespace) -> ChrootResult<()> {
        log::debug!("Loading {} chroots from {}", namespace, path.display());
        let keyfile = Keyfile::read(path)?;
        self.add_keyfile(&keyfile, namespace)
    }

    /// Add every group of a parsed keyfile
    pub fn add_keyfile(&mut self, keyfile: &Keyfile, namespace: Namespace) -> ChrootResult<()> {
        let session = namespace == Namespace::Session;
        let groups: Vec<&str> = keyfile.groups().collect();
        for group in groups {
            let mut chroot = Chroot::from_keyfile(keyfile, group, session)?;
            if let Some(dir) = &self.sysconf_dir {
                chroot.resolve_script_config(dir);
            }
            self.add(namespace, chroot)?;
        }
        Ok(())
    }

    /// Register a chroot and its aliases
    ///
    /// A chroot which can be source-cloned also gets a `source:` view under
    /// the same name and aliases, reachable from the chroot namespace as
    /// `<name>-source`.
    pub fn add(&mut self, namespace: Namespace, chroot: Chroot) -> ChrootResult<()> {
        let name = chroot.name().to_string();
        self.check_free(namespace, &name)?;
        for alias in chroot.aliases() {
            self.check_free(namespace, alias)?;
        }

        let target = (namespace, name.clone());
        self.aliases
            .insert((namespace, name.clone()), target.clone());
        for alias in chroot.aliases() {
            self.aliases
                .insert((namespace, alias.clone()), target.clone());
        }

        let source = if namespace == Namespace::Chroot
            && chroot.session_flags().contains(SessionFlags::CLONE)
        {
            Some(chroot.clone_source()?)
        } else {
            None
        };

        self.chroots
            .entry(namespace)
            .or_default()
            .insert(name.clone(), chroot);

        if let Some(source) = source {
            let compat: Vec<String> = std::iter::once(name.clone())
                .chain(source.aliases().iter().cloned())
                .map(|n| format!("{}-source", n))
                .collect();
            self.add(Namespace::Source, source)?;
            for alias in compat {
                let key = (Namespace::Chroot, alias);
                if self.aliases.contains_key(&key) {
                    log::warn!(
                        "{}:{}: already defined; source alias not added",
                        key.0,
                        key.1
                    );
                    continue;
                }
                self.aliases.insert(key, (Namespace::Source, name.clone()));
            }
        }
        Ok(())
    }

    fn check_free(&self, namespace: Namespace, name: &str) -> ChrootResult<()> {
        if self
            .aliases
            .contains_key(&(namespace, name.to_string()))
        {
            return Err(ChrootError::Duplicate {
                namespace: namespace.to_string(),
                name: name.to_string(),
            });
        }
        Ok(())
    }

    /// Fully-qualified `namespace:name` of the chroot `name` refers to
    pub fn find_alias(&self, default: Namespace, name: &str) -> Option<String> {
        let (ns, name) = split_qualified(name, default)?;
        self.aliases
            .get(&(ns, name.to_string()))
            .map(|(ns, real)| format!("{}{}{}", ns, NAMESPACE_SEPARATOR, real))
    }

    /// Chroot by name or alias
    pub fn find_chroot(&self, default: Namespace, name: &str) -> Option<&Chroot> {
        let (ns, name) = split_qualified(name, default)?;
        let (real_ns, real) = self.aliases.get(&(ns, name.to_string()))?;
        self.chroots.get(real_ns)?.get(real)
    }

    /// Qualified names of every chroot in `namespace`, sorted
    pub fn chroot_list(&self, namespace: Namespace) -> Vec<String> {
        self.chroots
            .get(&namespace)
            .map(|chroots| {
                chroots
                    .keys()
                    .map(|name| format!("{}{}{}", namespace, NAMESPACE_SEPARATOR, name))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Aliases (other than the name itself) pointing at a qualified chroot
    pub fn aliases_of(&self, qualified: &str) -> Vec<String> {
        self.aliases
            .iter()
            .filter(|((ns, alias), (real_ns, real))| {
                format!("{}{}{}", real_ns, NAMESPACE_SEPARATOR, real) == qualified
                    && !(ns == real_ns && alias == real)
            })
            .map(|((ns, alias), _)| format!("{}{}{}", ns, NAMESPACE_SEPARATOR, alias))
            .collect()
    }

    /// Resolve every requested name, failing on the first unknown one
    pub fn validate_chroots(&self, default: Namespace, names: &[String]) -> SessionResult<Vec<String>> {
        names
            .iter()
            .map(|name| {
                self.find_alias(default, name)
                    .ok_or_else(|| SessionError::ChrootUnknown(name.clone()))
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.chroots.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    const CONF: &str = "\
[sid]
type=directory
directory=/srv/chroot/sid
aliases=unstable

[lvm]
type=lvm-snapshot
device=/dev/vg0/lvm
lvm-snapshot-options=--size 1G
source-root-users=admin
";

    fn config() -> ChrootConfig {
        let mut config = ChrootConfig::new();
        let kf = Keyfile::parse(CONF, None).unwrap();
        config.add_keyfile(&kf, Namespace::Chroot).unwrap();
        config
    }

    #[test]
    fn qualified_names() {
        assert_eq!(
            split_qualified("source:sid", Namespace::Chroot),
            Some((Namespace::Source, "sid"))
        );
        assert_eq!(
            split_qualified("sid", Namespace::Session),
            Some((Namespace::Session, "sid"))
        );
        assert_eq!(split_qualified("bogus:sid", Namespace::Chroot), None);
    }

    #[test]
    fn aliases_resolve_to_real_names() {
        let config = config();
        assert_eq!(
            config.find_alias(Namespace::Chroot, "unstable"),
            Some("chroot:sid".to_string())
        );
        assert_eq!(
            config.find_alias(Namespace::Chroot, "chroot:sid"),
            Some("chroot:sid".to_string())
        );
        assert!(config.find_alias(Namespace::Chroot, "stable").is_none());
        assert_eq!(
            config.find_chroot(Namespace::Chroot, "unstable").unwrap().name(),
            "sid"
        );
    }

    #[test]
    fn source_chroots_are_generated() {
        let config = config();
        assert_eq!(config.chroot_list(Namespace::Source), vec!["source:lvm"]);
        assert_eq!(
            config.find_alias(Namespace::Chroot, "lvm-source"),
            Some("source:lvm".to_string())
        );
        let source = config.find_chroot(Namespace::Source, "lvm").unwrap();
        assert_eq!(source.type_name(), "block-device");
        assert_eq!(source.root_users(), ["admin".to_string()]);
        // Directory chroots are not source-clonable
        assert!(config.find_chroot(Namespace::Source, "sid").is_none());
        assert_eq!(config.len(), 3);
    }

    #[test]
    fn validation_names_the_unknown_chroot() {
        let config = config();
        let names = vec!["unstable".to_string(), "source:lvm".to_string()];
        assert_eq!(
            config.validate_chroots(Namespace::Chroot, &names).unwrap(),
            ["chroot:sid", "source:lvm"]
        );

        let names = vec!["sid".to_string(), "stable".to_string()];
        assert!(matches!(
            config.validate_chroots(Namespace::Chroot, &names),
            Err(SessionError::ChrootUnknown(ref name)) if name == "stable"
        ));
    }

    #[test]
    fn duplicate_names_rejected() {
        let mut config = config();
        let kf = Keyfile::parse("[testing]\ntype=directory\ndirectory=/x\naliases=unstable\n", None)
            .unwrap();
        assert!(matches!(
            config.add_keyfile(&kf, Namespace::Chroot),
            Err(ChrootError::Duplicate { .. })
        ));
    }

    #[test]
    fn load_reads_conf_chroot_d_and_sessions() {
        let dir = TempDir::new().unwrap();
        let paths = Paths::with_root(dir.path());
        fs::create_dir_all(&paths.chroot_d_dir).unwrap();
        fs::create_dir_all(&paths.session_dir).unwrap();
        fs::write(&paths.conf_file, "[sid]\ntype=directory\ndirectory=/srv/sid\n").unwrap();
        fs::write(
            paths.chroot_d_dir.join("buster"),
            "[buster]\ntype=plain\ndirectory=/srv/buster\n",
        )
        .unwrap();
        // Backup files are skipped
        fs::write(paths.chroot_d_dir.join("buster.dpkg-old"), "garbage").unwrap();
        fs::write(
            paths.session_dir.join("sid-1"),
            "[sid-1]\ntype=directory\ndirectory=/srv/sid\nmount-location=/mnt/sid-1\nactive=true\n",
        )
        .unwrap();

        let config = ChrootConfig::load(&paths, &[], true).unwrap();
        assert_eq!(
            config.chroot_list(Namespace::Chroot),
            vec!["chroot:buster", "chroot:sid"]
        );
        let session = config.find_chroot(Namespace::Session, "sid-1").unwrap();
        assert!(session.active());
        assert_eq!(
            session.script_config(),
            paths.sysconf_dir.join("script-defaults")
        );

        let without = ChrootConfig::load(&paths, &[], false).unwrap();
        assert!(without.chroot_list(Namespace::Session).is_empty());
    }
}
