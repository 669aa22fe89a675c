use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// On-disk format revision (`major.minor.patch`). Not a release number.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct FormatVersion {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
}

impl FormatVersion {
    pub const fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// Same major version means the on-disk layout can be read without migration.
    pub fn is_compatible_with(&self, other: &FormatVersion) -> bool {
        self.major == other.major && (self.major != 0 || self.minor == other.minor)
    }
}

impl fmt::Display for FormatVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("invalid format version {input:?}: expected major.minor.patch")]
pub struct ParseVersionError {
    input: String,
}

impl FromStr for FormatVersion {
    type Err = ParseVersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseVersionError {
            input: s.to_string(),
        };
        let mut parts = s.trim().trim_start_matches('v').split('.');
        let mut next = || -> Result<u64, ParseVersionError> {
            parts
                .next()
                .ok_or_else(err)?
                .parse::<u64>()
                .map_err(|_| err())
        };
        let version = FormatVersion::new(next()?, next()?, next()?);
        if parts.next().is_some() {
            return Err(err());
        }
        Ok(version)
    }
}
