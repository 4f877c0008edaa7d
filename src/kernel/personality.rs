//! Execution domains for `personality(2)`.

use crate::config::types::{ChrootError, ChrootResult, SessionError, SessionResult};
use std::fmt;
use std::str::FromStr;

/// Name/value pairs understood by the `personality` key
const PERSONALITIES: &[(&str, u32)] = &[
    ("undefined", 0xffff_ffff),
    ("linux", 0x0000_0000),
    ("linux_32bit", 0x0080_0000),
    ("svr4", 0x0410_0001),
    ("svr3", 0x0500_0002),
    ("scosvr3", 0x0700_0003),
    ("osr5", 0x0600_0003),
    ("wysev386", 0x0500_0004),
    ("iscr4", 0x0400_0005),
    ("bsd", 0x0000_0006),
    ("sunos", 0x0400_0006),
    ("xenix", 0x0500_0007),
    ("linux32", 0x0000_0008),
    ("linux32_3gb", 0x0800_0008),
    ("irix32", 0x0400_0009),
    ("irixn32", 0x0400_000a),
    ("irix64", 0x0400_000b),
    ("riscos", 0x0000_000c),
    ("solaris", 0x0400_000d),
    ("uw7", 0x0410_000e),
    ("osf4", 0x0000_000f),
    ("hpux", 0x0000_0010),
];

/// A named execution domain
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Personality {
    name: &'static str,
    value: u32,
}

impl Default for Personality {
    fn default() -> Self {
        Self {
            name: "undefined",
            value: 0xffff_ffff,
        }
    }
}

impl Personality {
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn value(&self) -> u32 {
        self.value
    }

    pub fn is_undefined(&self) -> bool {
        self.name == "undefined"
    }

    /// All known personality names, for `--info` and error hints
    pub fn names() -> impl Iterator<Item = &'static str> {
        PERSONALITIES.iter().map(|(name, _)| *name)
    }

    /// Switch the calling process to this execution domain
    ///
    /// The undefined personality leaves the current domain untouched.
    pub fn set(&self) -> SessionResult<()> {
        if self.is_undefined() {
            return Ok(());
        }
        // SAFETY: personality(2) only affects the calling process.
        let rc = unsafe { libc::personality(self.value as libc::c_ulong) };
        if rc == -1 {
            return Err(SessionError::Personality {
                name: self.name.to_string(),
                source: nix::errno::Errno::last(),
            });
        }
        log::debug!("Set personality to {}", self.name);
        Ok(())
    }
}

impl FromStr for Personality {
    type Err = ChrootError;

    fn from_str(s: &str) -> ChrootResult<Self> {
        PERSONALITIES
            .iter()
            .find(|(name, _)| *name == s)
            .map(|&(name, value)| Personality { name, value })
            .ok_or_else(|| ChrootError::PersonalityUnknown(s.to_string()))
    }
}

impl fmt::Display for Personality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}
