//! rschroot: a chroot session manager
//!
//! Chroots are described in keyfile configuration; a session clones a chroot
//! definition, runs setup scripts to make it usable, runs a command or login
//! shell inside it as the requested user and runs the scripts again to tear
//! it down.
//!
//! # Architecture
//!
//! ## Configuration ([`config`])
//! - [`config::keyfile`]: INI-style keyfile store with key priorities
//! - [`config::chroots`]: Chroot registry over the chroot/source/session namespaces
//! - [`config::paths`]: Well-known directories
//! - [`config::types`]: Shared enums and the error taxonomy
//!
//! ## Chroots ([`chroot`])
//! - [`chroot::kind`]: Storage kinds (plain, directory, file, block-device, lvm-snapshot, btrfs-snapshot, custom)
//! - [`chroot::facet`]: Optional capabilities (session, source, userdata, personality, unshare)
//!
//! ## Kernel Primitives ([`kernel`])
//! - [`kernel::lock`]: fcntl file locks and device locks with deadlines
//! - [`kernel::credentials`]: Group membership and privilege transitions
//! - [`kernel::signal`]: Scoped SIGHUP/SIGTERM guard
//! - [`kernel::personality`], [`kernel::namespace`], [`kernel::tty`]
//!
//! ## Sessions ([`session`], [`exec`], [`auth`], [`run_parts`])
//! - [`auth`]: Authorisation against chroot ACLs and the authentication backend
//! - [`run_parts`]: Ordered execution of setup and exec scripts
//! - [`exec::preexec`]: Type-state enforced child setup ordering
//! - [`session`]: Stage orchestration with guaranteed teardown

// Kernel Primitives
pub mod kernel;

// Configuration
pub mod config;

// Chroot definitions
pub mod chroot;

// Authentication
pub mod auth;

// Script execution
pub mod run_parts;

// Session child execution
pub mod exec;

// Session orchestration
pub mod session;

// Utilities
pub mod utils;

// CLI entrypoint for the rschroot binary.
pub mod cli;

pub use config::types::*;
