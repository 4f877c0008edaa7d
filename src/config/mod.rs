//! Configuration
//!
//! Keyfile parsing, the chroot registry, well-known paths and the shared
//! error taxonomy.

pub mod chroots;
pub mod keyfile;
pub mod paths;
pub mod types;
