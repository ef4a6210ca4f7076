//! Monotonic counters that order operations and views.

use std::fmt;
use std::str::FromStr;

/// The view a replica currently believes it is in. The primary of view `v`
/// is replica `v mod N` (§2).
#[derive(Copy, Clone, Debug, Default, Ord, PartialOrd, Eq, PartialEq, Hash)]
#[repr(transparent)]
pub struct View(u64);

impl View {
    pub fn as_u64(self) -> u64 {
        self.0
    }

    /// The index, within a cluster of `replicas` members, of the primary of
    /// this view.
    pub fn primary_index(self, replicas: usize) -> usize {
        (self.0 % (replicas as u64)) as usize
    }

    pub fn increment(&mut self) {
        self.0 += 1;
    }

    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }

    pub fn previous(self) -> Self {
        Self(self.0.saturating_sub(1))
    }
}

impl From<u64> for View {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl fmt::Display for View {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for View {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}

/// The highest operation assigned a position in the log (§3, invariant 1:
/// `op_number == log.len()`).
#[derive(Copy, Clone, Debug, Default, Ord, PartialOrd, Eq, PartialEq, Hash)]
#[repr(transparent)]
pub struct OpNumber(u64);

impl OpNumber {
    pub fn as_u64(self) -> u64 {
        self.0
    }

    pub fn increment(&mut self) {
        self.0 += 1;
    }

    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl From<u64> for OpNumber {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl fmt::Display for OpNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for OpNumber {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}
