//! Chroot definitions.
//!
//! A [`Chroot`] combines the settings common to every chroot (access lists,
//! script flags, environment policy) with a storage [`ChrootKind`] and a set
//! of [`facet`]s. Sessions and source chroots are produced by cloning a
//! configured chroot and adjusting the copy.

pub mod facet;
pub mod keys;
pub mod kind;

use crate::config::keyfile::{Keyfile, Priority};
use crate::config::paths::Paths;
use crate::config::types::{ChrootError, ChrootResult, LockType, SessionFlags, SetupType, Verbosity};
use crate::kernel::lock::FileLock;
use crate::utils::environment::{compile_filter, Environment, DEFAULT_ENVIRONMENT_FILTER};
use facet::{
    FacetSet, PersonalityFacet, SessionClonable, SessionFacet, SourceClonable, SourceFacet,
    UnshareFacet, Userdata,
};
use keys::{path_string, KeyReader};
use kind::{ChrootKind, FILE_LOCK_TIMEOUT};
use regex::Regex;
use std::collections::BTreeSet;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

/// Default `script-config`, relative to the configuration directory
pub const DEFAULT_SCRIPT_CONFIG: &str = "script-defaults";

const BASE_KEYS: &[&str] = &[
    "type",
    "description",
    "aliases",
    "users",
    "groups",
    "root-users",
    "root-groups",
    "run-setup-scripts",
    "run-exec-scripts",
    "script-config",
    "command-prefix",
    "message-verbosity",
    "preserve-environment",
    "environment-filter",
    "priority",
];

const SESSION_KEYS: &[&str] = &["active", "mount-location", "name"];

fn name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[^:/,.][^:/,]*$").expect("static name pattern is valid"))
}

fn dpkg_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"dpkg-(old|dist|new|tmp)$").expect("static dpkg pattern is valid"))
}

/// Validate a chroot, alias or session name
pub fn validate_name(name: &str) -> ChrootResult<()> {
    let invalid = |reason| ChrootError::NameInvalid {
        name: name.to_string(),
        reason,
    };
    if name.is_empty() {
        return Err(invalid("name is empty"));
    }
    if name.contains(':') {
        return Err(invalid("namespace separator ':' may not be used"));
    }
    if !name_pattern().is_match(name) {
        return Err(invalid("must not start with '.' or contain '/' or ','"));
    }
    if name.ends_with('~') {
        return Err(invalid("must not end with '~'"));
    }
    if dpkg_pattern().is_match(name) {
        return Err(invalid("must not end with a dpkg backup suffix"));
    }
    Ok(())
}

/// A chroot definition or live session
#[derive(Clone, Debug)]
pub struct Chroot {
    name: String,
    description: String,
    aliases: Vec<String>,
    mount_location: Option<PathBuf>,
    users: Vec<String>,
    groups: Vec<String>,
    root_users: Vec<String>,
    root_groups: Vec<String>,
    preserve_environment: bool,
    environment_filter: Regex,
    run_setup_scripts: bool,
    run_exec_scripts: bool,
    script_config: PathBuf,
    command_prefix: Vec<String>,
    message_verbosity: Verbosity,
    active: bool,
    original: bool,
    kind: ChrootKind,
    facets: FacetSet,
}

impl PartialEq for Chroot {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.description == other.description
            && self.aliases == other.aliases
            && self.mount_location == other.mount_location
            && self.users == other.users
            && self.groups == other.groups
            && self.root_users == other.root_users
            && self.root_groups == other.root_groups
            && self.preserve_environment == other.preserve_environment
            && self.environment_filter.as_str() == other.environment_filter.as_str()
            && self.run_setup_scripts == other.run_setup_scripts
            && self.run_exec_scripts == other.run_exec_scripts
            && self.script_config == other.script_config
            && self.command_prefix == other.command_prefix
            && self.message_verbosity == other.message_verbosity
            && self.active == other.active
            && self.original == other.original
            && self.kind == other.kind
            && self.facets == other.facets
    }
}

impl Chroot {
    /// New chroot of the given kind with default settings and facets
    pub fn new(name: &str, kind: ChrootKind) -> ChrootResult<Self> {
        validate_name(name)?;
        let run_scripts = kind.default_run_scripts();
        let mut chroot = Self {
            name: name.to_string(),
            description: String::new(),
            aliases: Vec::new(),
            mount_location: None,
            users: Vec::new(),
            groups: Vec::new(),
            root_users: Vec::new(),
            root_groups: Vec::new(),
            preserve_environment: false,
            environment_filter: compile_filter(DEFAULT_ENVIRONMENT_FILTER)?,
            run_setup_scripts: run_scripts,
            run_exec_scripts: run_scripts,
            script_config: PathBuf::from(DEFAULT_SCRIPT_CONFIG),
            command_prefix: Vec::new(),
            message_verbosity: Verbosity::Normal,
            active: false,
            original: true,
            kind,
            facets: FacetSet::new(),
        };
        chroot.sync_kind_facets();
        chroot.facets.add(PersonalityFacet::default())?;
        chroot.facets.add(Userdata::default())?;
        chroot.facets.add(UnshareFacet::default())?;
        Ok(chroot)
    }

    /// Keep the clonable facets in line with what the kind supports
    fn sync_kind_facets(&mut self) {
        if self.kind.default_session_clonable() {
            if !self.facets.contains::<SessionClonable>() {
                self.facets.replace(SessionClonable);
            }
        } else {
            self.facets.remove::<SessionClonable>();
        }
        if self.kind.default_source_clonable() {
            if !self.facets.contains::<SourceClonable>() {
                self.facets.replace(SourceClonable::default());
            }
        } else {
            self.facets.remove::<SourceClonable>();
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: &str) -> ChrootResult<()> {
        validate_name(name)?;
        self.name = name.to_string();
        Ok(())
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn set_description(&mut self, description: impl Into<String>) {
        self.description = description.into();
    }

    pub fn aliases(&self) -> &[String] {
        &self.aliases
    }

    pub fn set_aliases(&mut self, aliases: Vec<String>) -> ChrootResult<()> {
        for alias in &aliases {
            validate_name(alias)?;
        }
        self.aliases = aliases;
        Ok(())
    }

    pub fn mount_location(&self) -> Option<&Path> {
        self.mount_location.as_deref()
    }

    pub fn set_mount_location(&mut self, location: Option<PathBuf>) -> ChrootResult<()> {
        if let Some(path) = &location {
            if !path.is_absolute() {
                return Err(ChrootError::MountLocationAbs(path.display().to_string()));
            }
        }
        self.mount_location = location;
        Ok(())
    }

    /// Path of the chroot tree on the host
    pub fn path(&self) -> Option<PathBuf> {
        self.kind.storage().path(self.mount_location.as_deref())
    }

    pub fn users(&self) -> &[String] {
        &self.users
    }

    pub fn set_users(&mut self, users: Vec<String>) {
        self.users = users;
    }

    pub fn groups(&self) -> &[String] {
        &self.groups
    }

    pub fn set_groups(&mut self, groups: Vec<String>) {
        self.groups = groups;
    }

    pub fn root_users(&self) -> &[String] {
        &self.root_users
    }

    pub fn set_root_users(&mut self, users: Vec<String>) {
        self.root_users = users;
    }

    pub fn root_groups(&self) -> &[String] {
        &self.root_groups
    }

    pub fn set_root_groups(&mut self, groups: Vec<String>) {
        self.root_groups = groups;
    }

    pub fn preserve_environment(&self) -> bool {
        self.preserve_environment
    }

    pub fn set_preserve_environment(&mut self, preserve: bool) {
        self.preserve_environment = preserve;
    }

    pub fn environment_filter(&self) -> &Regex {
        &self.environment_filter
    }

    pub fn set_environment_filter(&mut self, expr: &str) -> ChrootResult<()> {
        self.environment_filter = compile_filter(expr)?;
        Ok(())
    }

    pub fn run_setup_scripts(&self) -> bool {
        self.run_setup_scripts
    }

    pub fn set_run_setup_scripts(&mut self, run: bool) {
        self.run_setup_scripts = run;
    }

    pub fn run_exec_scripts(&self) -> bool {
        self.run_exec_scripts
    }

    pub fn set_run_exec_scripts(&mut self, run: bool) {
        self.run_exec_scripts = run;
    }

    pub fn script_config(&self) -> &Path {
        &self.script_config
    }

    /// Resolve a relative `script-config` against the configuration directory
    pub fn resolve_script_config(&mut self, sysconf_dir: &Path) {
        if self.script_config.is_relative() {
            self.script_config = sysconf_dir.join(&self.script_config);
        }
    }

    pub fn command_prefix(&self) -> &[String] {
        &self.command_prefix
    }

    pub fn set_command_prefix(&mut self, prefix: Vec<String>) {
        self.command_prefix = prefix;
    }

    pub fn message_verbosity(&self) -> Verbosity {
        self.message_verbosity
    }

    pub fn set_message_verbosity(&mut self, verbosity: Verbosity) {
        self.message_verbosity = verbosity;
    }

    pub fn active(&self) -> bool {
        self.active
    }

    pub fn set_active(&mut self, active: bool) {
        self.active = active;
    }

    pub fn original(&self) -> bool {
        self.original
    }

    pub fn set_original(&mut self, original: bool) {
        self.original = original;
    }

    pub fn kind(&self) -> &ChrootKind {
        &self.kind
    }

    pub fn kind_mut(&mut self) -> &mut ChrootKind {
        &mut self.kind
    }

    pub fn type_name(&self) -> &'static str {
        self.kind.type_name()
    }

    pub fn facets(&self) -> &FacetSet {
        &self.facets
    }

    pub fn facets_mut(&mut self) -> &mut FacetSet {
        &mut self.facets
    }

    /// Session capabilities of the kind plus those contributed by facets
    pub fn session_flags(&self) -> SessionFlags {
        self.kind.storage().session_flags(self.active) | self.facets.session_flags()
    }

    /// Clone a live session from this chroot
    ///
    /// The invoking `user` is granted access to the session, as a root user
    /// when `root` is set.
    pub fn clone_session(
        &self,
        session_id: &str,
        alias: &str,
        user: &str,
        root: bool,
    ) -> ChrootResult<Chroot> {
        if !self.facets.contains::<SessionClonable>() {
            return Err(ChrootError::FacetMissing {
                chroot: self.name.clone(),
                facet: "session-clonable",
            });
        }

        let mut session = self.clone();
        session.set_name(session_id)?;
        session.description = format!("{} (session chroot)", self.description)
            .trim_start()
            .to_string();
        session.aliases.clear();
        session.original = false;

        session
            .facets
            .replace(SessionFacet::new(self.name.clone(), alias));
        session.facets.remove::<SessionClonable>();
        session.facets.remove::<SourceClonable>();

        if !user.is_empty() {
            let list = if root {
                &mut session.root_users
            } else {
                &mut session.users
            };
            if !list.iter().any(|u| u == user) {
                list.push(user.to_string());
            }
        }

        let source = session.facets.contains::<SourceFacet>();
        session
            .kind
            .storage_mut()
            .clone_session(session_id, source);
        Ok(session)
    }

    /// Derive the maintenance view of this chroot
    pub fn clone_source(&self) -> ChrootResult<Chroot> {
        let source_clonable = self
            .facets
            .get::<SourceClonable>()
            .ok_or_else(|| ChrootError::FacetMissing {
                chroot: self.name.clone(),
                facet: "source-clonable",
            })?
            .clone();

        let mut source = self.clone();
        source.kind = self.kind.clone_source();
        source.description = format!("{} (source chroot)", self.description)
            .trim_start()
            .to_string();
        source.original = false;
        source.users = source_clonable.source_users;
        source.groups = source_clonable.source_groups;
        source.root_users = source_clonable.source_root_users;
        source.root_groups = source_clonable.source_root_groups;

        source.facets.remove::<SessionFacet>();
        source.facets.remove::<SourceClonable>();
        source.facets.replace(SourceFacet);
        if source.kind.default_session_clonable() && !source.facets.contains::<SessionClonable>() {
            source.facets.replace(SessionClonable);
        }
        Ok(source)
    }

    /// Rename snapshot storage after the session, for kinds which have it
    ///
    /// Returns false when the kind has no snapshot.
    pub fn rename_snapshot_device(&mut self, session_id: &str) -> bool {
        match self.kind.storage_mut().snapshot() {
            Some(snapshot) => {
                snapshot.name_snapshot(session_id);
                true
            }
            None => false,
        }
    }

    /// Override a userdata key on behalf of the invoking user
    pub fn set_user_option(&mut self, key: &str, value: &str, root: bool) -> ChrootResult<()> {
        match self.facets.get_mut::<Userdata>() {
            Some(userdata) => userdata.set_from_user(key, value, root),
            None => Err(ChrootError::FacetMissing {
                chroot: self.name.clone(),
                facet: "userdata",
            }),
        }
    }

    /// Personality of the session child
    pub fn personality(&self) -> crate::kernel::personality::Personality {
        self.facets
            .get::<PersonalityFacet>()
            .map(|f| f.personality)
            .unwrap_or_default()
    }

    /// Namespaces the session child unshares
    pub fn unshare(&self) -> crate::kernel::namespace::UnshareSet {
        self.facets
            .get::<UnshareFacet>()
            .map(|f| f.unshare)
            .unwrap_or_default()
    }

    /// Environment describing this chroot to setup scripts
    pub fn setup_env(&self, env: &mut Environment) {
        let flags = self.session_flags();
        env.set("CHROOT_TYPE", self.type_name());
        env.set("CHROOT_NAME", &self.name);
        env.set("CHROOT_DESCRIPTION", &self.description);
        env.set(
            "CHROOT_MOUNT_LOCATION",
            path_string(self.mount_location.as_deref()),
        );
        env.set("CHROOT_PATH", path_string(self.path().as_deref()));
        env.set("CHROOT_SCRIPT_CONFIG", self.script_config.display());
        env.set(
            "CHROOT_SESSION_CREATE",
            flags.contains(SessionFlags::CREATE),
        );
        env.set("CHROOT_SESSION_CLONE", flags.contains(SessionFlags::CLONE));
        env.set("CHROOT_SESSION_PURGE", flags.contains(SessionFlags::PURGE));

        self.kind.storage().setup_env(env);
        for facet in self.facets.iter() {
            facet.setup_env(env);
        }
    }

    /// Lock or unlock the chroot around a stage's scripts
    ///
    /// Session-capable chroots also write their descriptor when a session
    /// starts and remove it when the session is successfully stopped.
    pub fn setup_lock(
        &mut self,
        paths: &Paths,
        setup_type: SetupType,
        lock: bool,
        status: i32,
    ) -> ChrootResult<()> {
        self.kind
            .storage_mut()
            .setup_lock(paths, setup_type, lock, status)?;

        if self.session_flags().contains(SessionFlags::CREATE) {
            match (setup_type, lock) {
                (SetupType::SetupStart, true) => self.setup_session_info(paths, true)?,
                (SetupType::SetupStop, false) if status == 0 => {
                    self.setup_session_info(paths, false)?
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Write (`start`) or remove the session descriptor
    pub fn setup_session_info(&self, paths: &Paths, start: bool) -> ChrootResult<()> {
        let file = paths.session_file(&self.name);
        let name = file.display().to_string();

        if !start {
            return match fs::remove_file(&file) {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    log::warn!("{}: session file already removed", name);
                    Ok(())
                }
                Err(source) => Err(ChrootError::SessionUnlink { path: name, source }),
            };
        }

        // Written in full under a hidden name, then linked into place: the
        // link fails if the session exists, and readers never see a partial
        // descriptor.
        let temp = file.with_file_name(format!(".{}.{}", self.name, std::process::id()));
        let handle = OpenOptions::new()
            .write(true)
            .create_new(true)
            .mode(0o664)
            .open(&temp)
            .map_err(|source| ChrootError::SessionWrite {
                path: temp.display().to_string(),
                source,
            })?;

        let written = self.write_session_info(handle, &temp).and_then(|()| {
            fs::hard_link(&temp, &file).map_err(|source| ChrootError::SessionWrite {
                path: name,
                source,
            })
        });
        if let Err(e) = fs::remove_file(&temp) {
            log::warn!("{}: failed to remove: {}", temp.display(), e);
        }
        written
    }

    fn write_session_info(&self, handle: fs::File, path: &Path) -> ChrootResult<()> {
        let name = path.display().to_string();
        let mut lock = FileLock::new(handle, path);
        lock.set_lock(LockType::Exclusive, FILE_LOCK_TIMEOUT)
            .map_err(|source| ChrootError::FileLock {
                path: name.clone(),
                source,
            })?;

        let mut keyfile = Keyfile::new();
        self.keyfile_get(&mut keyfile);
        lock.file_mut()
            .write_all(keyfile.to_string().as_bytes())
            .and_then(|()| lock.file_mut().sync_all())
            .map_err(|source| ChrootError::SessionWrite {
                path: name.clone(),
                source,
            })?;

        lock.unset_lock()
            .map_err(|source| ChrootError::FileUnlock { path: name, source })?;
        Ok(())
    }

    /// Serialise into `keyfile` under a group named after the chroot
    pub fn keyfile_get(&self, keyfile: &mut Keyfile) {
        let group = self.name.as_str();
        keyfile.set_value(group, "type", self.type_name());
        if self.active {
            keyfile.set_bool(group, "active", true);
            keyfile.set_value(group, "name", &self.name);
        }
        if !self.description.is_empty() {
            keyfile.set_value(group, "description", &self.description);
        }
        for (key, list) in [
            ("aliases", &self.aliases),
            ("users", &self.users),
            ("groups", &self.groups),
            ("root-users", &self.root_users),
            ("root-groups", &self.root_groups),
            ("command-prefix", &self.command_prefix),
        ] {
            if !list.is_empty() {
                keyfile.set_list(group, key, list);
            }
        }
        keyfile.set_bool(group, "run-setup-scripts", self.run_setup_scripts);
        keyfile.set_bool(group, "run-exec-scripts", self.run_exec_scripts);
        keyfile.set_value(
            group,
            "script-config",
            self.script_config.display().to_string(),
        );
        keyfile.set_value(group, "message-verbosity", self.message_verbosity.as_str());
        keyfile.set_bool(group, "preserve-environment", self.preserve_environment);
        keyfile.set_value(group, "environment-filter", self.environment_filter.as_str());
        if self.active {
            if let Some(location) = &self.mount_location {
                keyfile.set_value(group, "mount-location", location.display().to_string());
            }
        }

        self.kind.storage().keyfile_get(keyfile, group, self.active);
        for facet in self.facets.iter() {
            facet.keyfile_get(keyfile, group);
        }
    }

    /// Build a chroot from a keyfile group
    ///
    /// `session` selects the rules for session descriptors, where keys such
    /// as `mount-location` are required rather than disallowed. Unknown keys
    /// are reported with a warning.
    pub fn from_keyfile(keyfile: &Keyfile, group: &str, session: bool) -> ChrootResult<Chroot> {
        let reader = KeyReader::new(keyfile, group);
        let type_name = reader
            .string("type", Priority::Required)?
            .unwrap_or_default();
        let kind = ChrootKind::from_type(&type_name).map_err(|e| reader.wrap("type", e))?;

        let mut chroot = Chroot::new(group, kind).map_err(|e| match e {
            ChrootError::NameInvalid { .. } => ChrootError::Key {
                pos: keyfile.position(group, None),
                group: group.to_string(),
                key: "name".to_string(),
                source: Box::new(e),
            },
            other => other,
        })?;
        if session {
            chroot.active = true;
            chroot.original = false;
            chroot.facets.add(SessionFacet::default())?;
        }
        chroot.keyfile_set(&reader, session)?;
        if session {
            chroot.facets.remove::<SessionClonable>();
            chroot.facets.remove::<SourceClonable>();
        }
        Ok(chroot)
    }

    fn keyfile_set(&mut self, reader: &KeyReader<'_>, session: bool) -> ChrootResult<()> {
        let session_only = if session {
            Priority::Optional
        } else {
            Priority::Disallowed
        };

        if let Some(active) = reader.bool("active", session_only)? {
            self.active = active;
        }
        if let Some(name) = reader.string("name", session_only)? {
            if name != self.name {
                log::warn!(
                    "{}[{}]: name: '{}' does not match the session id",
                    reader.keyfile().position(reader.group(), Some("name")),
                    reader.group(),
                    name
                );
            }
        }
        if let Some(description) = reader.string("description", Priority::Optional)? {
            self.description = description;
        }
        if let Some(aliases) = reader.list("aliases", Priority::Optional)? {
            self.set_aliases(aliases)
                .map_err(|e| reader.wrap("aliases", e))?;
        }
        if let Some(users) = reader.list("users", Priority::Optional)? {
            self.users = users;
        }
        if let Some(groups) = reader.list("groups", Priority::Optional)? {
            self.groups = groups;
        }
        if let Some(users) = reader.list("root-users", Priority::Optional)? {
            self.root_users = users;
        }
        if let Some(groups) = reader.list("root-groups", Priority::Optional)? {
            self.root_groups = groups;
        }
        if let Some(run) = reader.bool("run-setup-scripts", Priority::Optional)? {
            self.run_setup_scripts = run;
        }
        if let Some(run) = reader.bool("run-exec-scripts", Priority::Optional)? {
            self.run_exec_scripts = run;
        }
        if let Some(config) = reader.string("script-config", Priority::Optional)? {
            self.script_config = PathBuf::from(config);
        }
        if let Some(prefix) = reader.list("command-prefix", Priority::Optional)? {
            self.command_prefix = prefix;
        }
        if let Some(verbosity) =
            reader.parse("message-verbosity", Priority::Optional, |v| v.parse::<Verbosity>())?
        {
            self.message_verbosity = verbosity;
        }
        if let Some(preserve) = reader.bool("preserve-environment", Priority::Optional)? {
            self.preserve_environment = preserve;
        }
        if let Some(filter) =
            reader.parse("environment-filter", Priority::Optional, compile_filter)?
        {
            self.environment_filter = filter;
        }
        reader.raw("priority", Priority::Obsolete)?;

        let mount_priority = if session {
            Priority::Required
        } else {
            Priority::Disallowed
        };
        if let Some(location) = reader.absolute_path(
            "mount-location",
            mount_priority,
            ChrootError::MountLocationAbs,
        )? {
            self.mount_location = Some(location);
        }

        self.kind.storage_mut().keyfile_set(reader, session)?;
        if !session {
            self.sync_kind_facets();
        }

        for facet in self.facets.iter_mut() {
            facet.keyfile_set(reader)?;
        }

        let claimed: BTreeSet<&str> = self.used_keys().into_iter().collect();
        if let Some(userdata) = self.facets.get_mut::<Userdata>() {
            let taken = userdata.absorb_unclaimed(reader, &claimed)?;
            for key in reader.keys() {
                if !claimed.contains(key) && !taken.contains(&key) {
                    log::warn!(
                        "{}[{}]: {}: unknown key",
                        reader.keyfile().position(reader.group(), Some(key)),
                        reader.group(),
                        key
                    );
                }
            }
        }
        Ok(())
    }

    /// Every key this chroot's base settings, kind and facets understand
    pub fn used_keys(&self) -> Vec<&'static str> {
        let mut keys: Vec<&'static str> = BASE_KEYS.to_vec();
        keys.extend_from_slice(SESSION_KEYS);
        keys.extend_from_slice(self.kind.storage().used_keys());
        for facet in self.facets.iter() {
            keys.extend_from_slice(facet.used_keys());
        }
        keys
    }

    /// Human-readable summary for `--info`
    pub fn details(&self) -> Vec<(&'static str, String)> {
        let flags = self.session_flags();
        let mut details = vec![
            ("Name", self.name.clone()),
            ("Description", self.description.clone()),
            ("Type", self.type_name().to_string()),
            ("Message Verbosity", self.message_verbosity.as_str().to_string()),
            ("Users", self.users.join(" ")),
            ("Groups", self.groups.join(" ")),
            ("Root Users", self.root_users.join(" ")),
            ("Root Groups", self.root_groups.join(" ")),
            ("Aliases", self.aliases.join(" ")),
            ("Preserve Environment", self.preserve_environment.to_string()),
            ("Environment Filter", self.environment_filter.as_str().to_string()),
            ("Run Setup Scripts", self.run_setup_scripts.to_string()),
            ("Run Exec Scripts", self.run_exec_scripts.to_string()),
            ("Script Configuration", self.script_config.display().to_string()),
            ("Session Managed", flags.contains(SessionFlags::CREATE).to_string()),
            ("Session Cloned", flags.contains(SessionFlags::CLONE).to_string()),
            ("Session Purged", flags.contains(SessionFlags::PURGE).to_string()),
            ("Personality", self.personality().to_string()),
        ];
        if !self.command_prefix.is_empty() {
            details.push(("Command Prefix", self.command_prefix.join(" ")));
        }
        if let Some(location) = &self.mount_location {
            details.push(("Mount Location", location.display().to_string()));
        }
        if let Some(path) = self.path() {
            details.push(("Path", path.display().to_string()));
        }
        if let Some(session) = self.facets.get::<SessionFacet>() {
            details.push(("Original Chroot Name", session.original_name.clone()));
            details.push(("Selected Chroot Name", session.selected_name.clone()));
        }
        details
    }
}
