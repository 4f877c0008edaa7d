//! Thin wrappers around Linux kernel primitives.
//!
//! All `unsafe` code is concentrated here with explicit SAFETY comments.

pub mod credentials;
pub mod lock;
pub mod namespace;
pub mod personality;
pub mod signal;
pub mod tty;
