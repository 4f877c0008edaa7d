//! Terminal attribute save/restore around interactive shells.

use nix::sys::termios::{tcgetattr, tcsetattr, SetArg, Termios};
use std::io::IsTerminal;

/// Saved attributes of the controlling terminal on stdin
#[derive(Clone, Default)]
pub struct TerminalState {
    saved: Option<Termios>,
}

impl TerminalState {
    /// Save the attributes of stdin when it is a terminal
    pub fn save() -> Self {
        let stdin = std::io::stdin();
        if !stdin.is_terminal() {
            return Self::default();
        }
        match tcgetattr(&stdin) {
            Ok(termios) => Self {
                saved: Some(termios),
            },
            Err(e) => {
                log::warn!("failed to get terminal settings: {}", e);
                Self::default()
            }
        }
    }

    pub fn is_saved(&self) -> bool {
        self.saved.is_some()
    }

    /// Restore previously saved attributes; failures only warn
    pub fn restore(&self) {
        if let Some(termios) = &self.saved {
            if let Err(e) = tcsetattr(std::io::stdin(), SetArg::TCSANOW, termios) {
                log::warn!("failed to set terminal settings: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_state_restores_nothing() {
        let state = TerminalState::default();
        assert!(!state.is_saved());
        state.restore();
    }
}
