/// Core types and error taxonomy shared by every rschroot layer
use std::fmt;
use std::ops::{BitOr, BitOrAssign};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Requested lock state for a file or device lock
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LockType {
    /// No lock (release)
    None,
    /// Shared (read) lock
    Shared,
    /// Exclusive (write) lock
    Exclusive,
}

/// Lifecycle stage a chroot is being taken through
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SetupType {
    SetupStart,
    SetupRecover,
    SetupStop,
    ExecStart,
    ExecStop,
}

impl SetupType {
    /// Stage name passed as the first argument to setup scripts
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SetupStart => "setup-start",
            Self::SetupRecover => "setup-recover",
            Self::SetupStop => "setup-stop",
            Self::ExecStart => "exec-start",
            Self::ExecStop => "exec-stop",
        }
    }

    /// Setup stages use setup.d and the run-setup-scripts flag
    pub fn is_setup(self) -> bool {
        matches!(self, Self::SetupStart | Self::SetupRecover | Self::SetupStop)
    }

    /// Teardown stages run their scripts in reverse order
    pub fn is_teardown(self) -> bool {
        matches!(self, Self::SetupStop | Self::ExecStop)
    }
}

impl fmt::Display for SetupType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Session operation requested by the caller
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Operation {
    /// Begin, run and end a session in one go
    Automatic,
    /// Begin a session and print its id
    Begin,
    /// Recover an existing session (e.g. after reboot)
    Recover,
    /// Run a command in an existing session
    Run,
    /// End an existing session
    End,
}

impl Operation {
    /// Whether this operation permits the given stage to execute
    pub fn permits(self, setup_type: SetupType) -> bool {
        match self {
            Self::Begin => setup_type == SetupType::SetupStart,
            Self::Recover => setup_type == SetupType::SetupRecover,
            Self::End => setup_type == SetupType::SetupStop,
            Self::Run => matches!(setup_type, SetupType::ExecStart | SetupType::ExecStop),
            Self::Automatic => setup_type != SetupType::SetupRecover,
        }
    }

    /// Operations which act on already-running sessions
    pub fn uses_existing_session(self) -> bool {
        matches!(self, Self::Recover | Self::Run | Self::End)
    }

    /// Operations which fork the user's command or shell
    pub fn runs_command(self) -> bool {
        matches!(self, Self::Automatic | Self::Run)
    }
}

/// Message verbosity
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum Verbosity {
    Quiet,
    #[default]
    Normal,
    Verbose,
}

impl Verbosity {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Quiet => "quiet",
            Self::Normal => "normal",
            Self::Verbose => "verbose",
        }
    }
}

impl FromStr for Verbosity {
    type Err = ChrootError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "quiet" => Ok(Self::Quiet),
            "normal" => Ok(Self::Normal),
            "verbose" => Ok(Self::Verbose),
            other => Err(ChrootError::VerbosityInvalid(other.to_string())),
        }
    }
}

/// Session capability bitmask of a chroot
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct SessionFlags(u8);

impl SessionFlags {
    pub const NOFLAGS: Self = Self(0);
    /// A session may be created from this chroot
    pub const CREATE: Self = Self(1 << 0);
    /// A source chroot may be cloned from this chroot
    pub const CLONE: Self = Self(1 << 1);
    /// The session's storage is deleted when the session ends
    pub const PURGE: Self = Self(1 << 2);

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for SessionFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for SessionFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

/// Source position of a keyfile entry, rendered as an error prefix
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Position {
    pub file: Option<PathBuf>,
    pub line: Option<usize>,
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.file, self.line) {
            (Some(file), Some(line)) => write!(f, "{}:{}: ", file.display(), line),
            (Some(file), None) => write!(f, "{}: ", file.display()),
            (None, Some(line)) => write!(f, "line {}: ", line),
            (None, None) => Ok(()),
        }
    }
}

/// Keyfile (configuration store) errors
#[derive(Error, Debug)]
pub enum KeyfileError {
    #[error("{path}: failed to read keyfile: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("{pos}invalid line: {text}")]
    InvalidLine { pos: Position, text: String },

    #[error("{pos}invalid group name: {group}")]
    InvalidGroup { pos: Position, group: String },

    #[error("{pos}invalid key name: {key}")]
    InvalidKey { pos: Position, key: String },

    #[error("{pos}{key}: no group specified")]
    NoGroup { pos: Position, key: String },

    #[error("{pos}[{group}]: duplicate group")]
    DuplicateGroup { pos: Position, group: String },

    #[error("{pos}[{group}]: {key}: duplicate key")]
    DuplicateKey {
        pos: Position,
        group: String,
        key: String,
    },

    #[error("{pos}[{group}]: required key '{key}' is missing")]
    MissingKey {
        pos: Position,
        group: String,
        key: String,
    },

    #[error("{pos}[{group}]: {key}: key is not permitted here")]
    DisallowedKey {
        pos: Position,
        group: String,
        key: String,
    },

    #[error("{pos}[{group}]: {key}: invalid value '{value}'")]
    InvalidValue {
        pos: Position,
        group: String,
        key: String,
        value: String,
    },
}

/// Lock primitive errors
#[derive(Error, Debug)]
pub enum LockError {
    #[error("{path}: lock is held by another process")]
    Busy { path: String },

    #[error("{path}: failed to acquire lock (timed out after {waited:?})")]
    Timeout { path: String, waited: Duration },

    #[error("{path}: failed to release lock (timed out after {waited:?})")]
    UnlockTimeout { path: String, waited: Duration },

    #[error("{path}: failed to acquire lock: {source}")]
    Os {
        path: String,
        source: nix::errno::Errno,
    },

    #[error("{path}: failed to release lock: {source}")]
    UnlockOs {
        path: String,
        source: nix::errno::Errno,
    },

    #[error("{path}: failed to access lock file: {source}")]
    LockFile {
        path: String,
        source: std::io::Error,
    },
}

/// Convert lock errors to exit codes
impl From<&LockError> for i32 {
    fn from(err: &LockError) -> i32 {
        match err {
            LockError::Busy { .. } => 2,
            LockError::Timeout { .. } | LockError::UnlockTimeout { .. } => 3,
            LockError::Os { .. } | LockError::UnlockOs { .. } => 1,
            LockError::LockFile { .. } => 74,
        }
    }
}

/// Chroot definition errors
#[derive(Error, Debug)]
pub enum ChrootError {
    #[error("{name}: invalid chroot name: {reason}")]
    NameInvalid { name: String, reason: &'static str },

    #[error("{0}: chroot type is unknown")]
    TypeUnknown(String),

    #[error("{0}: file must have an absolute path")]
    FileAbs(String),

    #[error("{0}: location must have an absolute path")]
    LocationAbs(String),

    #[error("{0}: mount location must have an absolute path")]
    MountLocationAbs(String),

    #[error("{0}: directory must have an absolute path")]
    DirectoryAbs(String),

    #[error("{0}: device must have an absolute path")]
    DeviceAbs(String),

    #[error("{0}: snapshot device must have an absolute path")]
    SnapshotDeviceAbs(String),

    #[error("{0}: btrfs source subvolume must have an absolute path")]
    SubvolumeAbs(String),

    #[error("{0}: btrfs snapshot directory must have an absolute path")]
    SnapshotDirAbs(String),

    #[error("{0}: btrfs snapshot name must have an absolute path")]
    SnapshotNameAbs(String),

    #[error("{0}: facet is already present")]
    FacetPresent(&'static str),

    #[error("{chroot}: chroot does not support {facet}")]
    FacetMissing { chroot: String, facet: &'static str },

    #[error("device name not set")]
    DeviceUnset,

    #[error("{path}: failed to stat device: {source}")]
    DeviceStat {
        path: String,
        source: std::io::Error,
    },

    #[error("{0}: file is not a block device")]
    DeviceNotBlock(String),

    #[error("{path}: failed to lock device: {source}")]
    DeviceLock { path: String, source: LockError },

    #[error("{path}: failed to unlock device: {source}")]
    DeviceUnlock { path: String, source: LockError },

    #[error("file name not set")]
    FileUnset,

    #[error("{path}: failed to stat file: {source}")]
    FileStat {
        path: String,
        source: std::io::Error,
    },

    #[error("{0}: file is not a regular file")]
    FileNotReg(String),

    #[error("{0}: file is not owned by user root")]
    FileOwner(String),

    #[error("{0}: file has write permissions for others")]
    FilePerms(String),

    #[error("{path}: failed to lock file: {source}")]
    FileLock { path: String, source: LockError },

    #[error("{path}: failed to unlock file: {source}")]
    FileUnlock { path: String, source: LockError },

    #[error("{path}: failed to write session file: {source}")]
    SessionWrite {
        path: String,
        source: std::io::Error,
    },

    #[error("{path}: failed to unlink session file: {source}")]
    SessionUnlink {
        path: String,
        source: std::io::Error,
    },

    #[error("{0}: unknown personality")]
    PersonalityUnknown(String),

    #[error("{0}: invalid message verbosity")]
    VerbosityInvalid(String),

    #[error("{regex}: invalid environment filter: {source}")]
    FilterInvalid { regex: String, source: regex::Error },

    #[error("{0}: invalid user data key")]
    UserdataKeyInvalid(String),

    #[error("{0}: user data key may not be modified")]
    UserdataKeyUnmodifiable(String),

    #[error("{namespace}:{name}: a chroot or alias already exists with this name")]
    Duplicate { namespace: String, name: String },

    #[error("{pos}[{group}]: {key}: {source}")]
    Key {
        pos: Position,
        group: String,
        key: String,
        source: Box<ChrootError>,
    },

    #[error(transparent)]
    Keyfile(#[from] KeyfileError),
}

/// Authentication errors
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("{0}: user not found")]
    UserUnknown(String),

    #[error("uid {0}: user not found")]
    UidUnknown(u32),

    #[error("{0}: group not found")]
    GroupUnknown(String),

    #[error("{ruser}: access not authorised for user {user}")]
    AccessDenied { ruser: String, user: String },

    #[error("{ruser}: authentication as {user} requires a password, which the {backend} backend cannot check")]
    AuthenticationUnavailable {
        ruser: String,
        user: String,
        backend: &'static str,
    },

    #[error("{operation}: authentication called out of order (state {state})")]
    OutOfOrder {
        operation: &'static str,
        state: &'static str,
    },

    #[error("failed to look up user database: {0}")]
    Lookup(nix::errno::Errno),
}

/// run-parts errors
#[derive(Error, Debug)]
pub enum RunPartsError {
    #[error("{path}: failed to read script directory: {source}")]
    DirOpen {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("{path}: failed to fork script: {source}")]
    Fork {
        path: PathBuf,
        source: nix::errno::Errno,
    },

    #[error("{path}: failed to wait for script: {source}")]
    Wait {
        path: PathBuf,
        source: nix::errno::Errno,
    },

    #[error("{path}: script terminated by signal {signal}")]
    Signal { path: PathBuf, signal: String },
}

/// Session orchestration errors
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("{0}: chroot not found")]
    ChrootUnknown(String),

    #[error("{0}: chroot alias not found")]
    ChrootAlias(String),

    #[error("{chroot}: failed to lock chroot: {source}")]
    ChrootLock {
        chroot: String,
        source: Box<ChrootError>,
    },

    #[error("{chroot}: failed to unlock chroot: {source}")]
    ChrootUnlock {
        chroot: String,
        source: Box<ChrootError>,
    },

    #[error("{chroot}: chroot setup failed during {stage}")]
    ChrootSetup { chroot: String, stage: SetupType },

    #[error("{chroot}: {source}")]
    Chroot {
        chroot: String,
        source: Box<ChrootError>,
    },

    #[error("{chroot}: {source}")]
    Scripts {
        chroot: String,
        source: RunPartsError,
    },

    #[error("failed to fork child: {0}")]
    ChildFork(nix::errno::Errno),

    #[error("failed to wait for child: {0}")]
    ChildWait(nix::errno::Errno),

    #[error("child terminated by signal {0}")]
    ChildSignal(String),

    #[error("child dumped core (signal {0})")]
    ChildCore(String),

    #[error("child exited with status {0}")]
    ChildFail(i32),

    #[error("caught signal {0}")]
    SignalCatch(String),

    #[error("failed to install signal handlers: {0}")]
    SignalSet(nix::errno::Errno),

    #[error("{gid}: failed to set group: {source}")]
    GroupSet { gid: u32, source: nix::errno::Errno },

    #[error("{user}: failed to set supplementary groups: {source}")]
    GroupSetSup {
        user: String,
        source: nix::errno::Errno,
    },

    #[error("{uid}: failed to set user: {source}")]
    UserSet { uid: u32, source: nix::errno::Errno },

    #[error("failed to drop root permissions")]
    RootDrop,

    #[error("{path}: failed to change to directory: {source}")]
    Chdir {
        path: PathBuf,
        source: nix::errno::Errno,
    },

    #[error("{path}: failed to change root to directory: {source}")]
    ChrootEnter {
        path: PathBuf,
        source: nix::errno::Errno,
    },

    #[error("{0}: chroot has no usable path")]
    ChrootPath(String),

    #[error("{name}: failed to set personality: {source}")]
    Personality {
        name: String,
        source: nix::errno::Errno,
    },

    #[error("failed to unshare {what}: {source}")]
    Unshare {
        what: String,
        source: nix::errno::Errno,
    },

    #[error("{file}: failed to execute: {source}")]
    Exec {
        file: String,
        source: nix::errno::Errno,
    },

    #[error("{0}: argument contains a NUL byte")]
    Argument(String),

    #[error(transparent)]
    Auth(#[from] AuthError),
}

/// Top-level error for rschroot
#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Keyfile(#[from] KeyfileError),

    #[error(transparent)]
    Lock(#[from] LockError),

    #[error(transparent)]
    Chroot(#[from] ChrootError),

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    RunParts(#[from] RunPartsError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
pub type LockResult<T> = std::result::Result<T, LockError>;
pub type ChrootResult<T> = std::result::Result<T, ChrootError>;
pub type AuthResult<T> = std::result::Result<T, AuthError>;
pub type RunPartsResult<T> = std::result::Result<T, RunPartsError>;
pub type SessionResult<T> = std::result::Result<T, SessionError>;
