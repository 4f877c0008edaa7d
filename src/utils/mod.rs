//! Utilities
//!
//! Environment handling and FD closure for forked children.

pub mod environment;
pub mod fd_closure;
