//! Execution of the session child
//!
//! Command construction happens in the parent; the type-state pre-exec
//! chain and the wait loop are the only code that touches the child.

pub mod command;
pub mod preexec;
pub mod wait;
