//! Process environments for setup scripts and the session child.

use crate::config::types::{ChrootError, ChrootResult, SessionError, SessionResult};
use regex::Regex;
use std::collections::BTreeMap;
use std::ffi::CString;

/// Variables removed from a preserved caller environment unless the chroot
/// configures its own filter
pub const DEFAULT_ENVIRONMENT_FILTER: &str = "^(BASH_ENV|CDPATH|ENV|HOSTALIASES|IFS|KRB5_CONFIG|KRBCONFDIR|KRBTKFILE|KRB_CONF|LD_.*|LOCALDOMAIN|NLSPATH|PATH_LOCALE|RES_OPTIONS|TERMINFO|TERMINFO_DIRS|TERMPATH)$";

/// Compile an environment filter expression
pub fn compile_filter(expr: &str) -> ChrootResult<Regex> {
    Regex::new(expr).map_err(|source| ChrootError::FilterInvalid {
        regex: expr.to_string(),
        source,
    })
}

/// Ordered set of environment variables
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Environment {
    vars: BTreeMap<String, String>,
}

impl Environment {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the current process environment
    pub fn from_process() -> Self {
        Self {
            vars: std::env::vars().collect(),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.vars.contains_key(key)
    }

    /// Set a variable, replacing any existing value
    pub fn set(&mut self, key: impl Into<String>, value: impl ToString) {
        self.vars.insert(key.into(), value.to_string());
    }

    /// Set a variable only when it is not already present
    pub fn set_default(&mut self, key: impl Into<String>, value: impl ToString) {
        self.vars.entry(key.into()).or_insert_with(|| value.to_string());
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.vars.remove(key)
    }

    /// Overlay every variable of `other`, replacing existing values
    pub fn merge(&mut self, other: &Environment) {
        for (key, value) in &other.vars {
            self.vars.insert(key.clone(), value.clone());
        }
    }

    /// Drop every variable whose name matches `filter`
    pub fn filter(&mut self, filter: &Regex) {
        self.vars.retain(|key, _| {
            let keep = !filter.is_match(key);
            if !keep {
                log::debug!("Filtered environment variable: {}", key);
            }
            keep
        });
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.vars.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    /// `KEY=value` strings for execve
    pub fn to_envp(&self) -> SessionResult<Vec<CString>> {
        self.vars
            .iter()
            .map(|(key, value)| {
                let entry = format!("{}={}", key, value);
                CString::new(entry).map_err(|_| SessionError::Argument(key.clone()))
            })
            .collect()
    }
}

impl FromIterator<(String, String)> for Environment {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self {
            vars: iter.into_iter().collect(),
        }
    }
}
