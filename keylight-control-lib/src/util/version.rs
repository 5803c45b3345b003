use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// A dotted version such as `3.36` or `1.0.3`.
///
/// Versions with a different number of components compare as if the shorter
/// one was padded with zeros, so `3.36` equals `3.36.0`.
#[derive(Debug, Clone)]
pub struct Version {
    components: Vec<u64>,
}

impl Version {
    pub fn parse(s: &str) -> Result<Self> {
        s.parse()
    }

    pub fn components(&self) -> &[u64] {
        &self.components
    }

    pub fn equal(&self, other: &Version) -> bool {
        self.cmp(other) == Ordering::Equal
    }

    pub fn greater(&self, other: &Version) -> bool {
        self.cmp(other) == Ordering::Greater
    }

    pub fn smaller(&self, other: &Version) -> bool {
        self.cmp(other) == Ordering::Less
    }

    pub fn greater_or_equal(&self, other: &Version) -> bool {
        !self.smaller(other)
    }

    pub fn smaller_or_equal(&self, other: &Version) -> bool {
        !self.greater(other)
    }

    fn padded(&self, index: usize) -> u64 {
        self.components.get(index).copied().unwrap_or(0)
    }
}

impl FromStr for Version {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let components = s
            .trim()
            .split('.')
            .map(|segment| segment.parse::<u64>())
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|_| Error::InvalidVersion(s.to_string()))?;
        Ok(Version { components })
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.components.iter().map(u64::to_string).collect();
        write!(f, "{}", parts.join("."))
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        let len = self.components.len().max(other.components.len());
        (0..len)
            .map(|i| self.padded(i).cmp(&other.padded(i)))
            .find(|ord| ord.is_ne())
            .unwrap_or(Ordering::Equal)
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Version {}

/// Compares two version strings, rejecting non-numeric segments.
pub fn compare(a: &str, b: &str) -> Result<Ordering> {
    Ok(Version::parse(a)?.cmp(&Version::parse(b)?))
}
