//! Pod selection modes
//!
//! A mode decides how many of the filtered candidates an experiment run
//! targets, and which ones. Modes are parsed once at ingestion so an invalid
//! mode/value pair never reaches resolution.

use std::fmt;

use rand::seq::index;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::SelectionError;

/// How many targets to choose from the filtered candidate set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mode {
    /// Exactly one, picked at random
    One,
    /// Every candidate
    All,
    /// A random subset of this size
    Fixed(usize),
    /// This percentage of the candidates, rounded, at least one when nonzero
    FixedPercent(u8),
    /// A random count between zero and this percentage of the candidates
    RandomMaxPercent(u8),
}

impl Mode {
    /// Parse a mode name and its value.
    ///
    /// `value` is ignored for `one` and `all` and required for the others.
    pub fn parse(mode: &str, value: Option<&str>) -> Result<Self, SelectionError> {
        let mode = mode.trim();
        match mode {
            "one" => Ok(Self::One),
            "all" => Ok(Self::All),
            "fixed" => {
                let raw = required_value(mode, value)?;
                raw.parse::<usize>()
                    .map(Self::Fixed)
                    .map_err(|_| invalid(mode, raw, "expected a non-negative integer"))
            }
            "fixed-percent" => percent(mode, value).map(Self::FixedPercent),
            "random-max-percent" => percent(mode, value).map(Self::RandomMaxPercent),
            other => Err(SelectionError::UnknownMode(other.to_string())),
        }
    }

    /// Mode name as written in manifests
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::One => "one",
            Self::All => "all",
            Self::Fixed(_) => "fixed",
            Self::FixedPercent(_) => "fixed-percent",
            Self::RandomMaxPercent(_) => "random-max-percent",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::One | Self::All => f.write_str(self.name()),
            Self::Fixed(n) => write!(f, "{}({n})", self.name()),
            Self::FixedPercent(p) | Self::RandomMaxPercent(p) => {
                write!(f, "{}({p}%)", self.name())
            }
        }
    }
}

fn invalid(mode: &str, value: &str, reason: &str) -> SelectionError {
    SelectionError::InvalidValue {
        mode: mode.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

fn required_value<'a>(mode: &str, value: Option<&'a str>) -> Result<&'a str, SelectionError> {
    match value.map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(invalid(mode, "", "a value is required for this mode")),
    }
}

fn percent(mode: &str, value: Option<&str>) -> Result<u8, SelectionError> {
    let raw = required_value(mode, value)?;
    match raw.parse::<u8>() {
        Ok(p) if p <= 100 => Ok(p),
        _ => Err(invalid(mode, raw, "expected an integer between 0 and 100")),
    }
}

/// What `fixed` does when it asks for more targets than matched
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverflowPolicy {
    /// Take every candidate and carry on
    #[default]
    Cap,
    /// Fail selection with `InsufficientCandidates`
    Reject,
}

/// `round(percent / 100 * n)`, halves rounded up
const fn percent_of(percent: u8, n: usize) -> usize {
    (percent as usize * n + 50) / 100
}

/// Resolves a [`Mode`] against a filtered candidate set
#[derive(Debug, Clone, Copy, Default)]
pub struct ModeResolver {
    overflow: OverflowPolicy,
}

impl ModeResolver {
    /// Resolver with the given `fixed` overflow policy
    #[must_use]
    pub const fn new(overflow: OverflowPolicy) -> Self {
        Self { overflow }
    }

    /// Number of targets the mode asks for out of `available`.
    ///
    /// Random modes draw from `rng`.
    pub fn count<R: Rng + ?Sized>(
        &self,
        mode: Mode,
        available: usize,
        rng: &mut R,
    ) -> Result<usize, SelectionError> {
        match mode {
            Mode::One => {
                if available == 0 {
                    Err(SelectionError::EmptyCandidateSet)
                } else {
                    Ok(1)
                }
            }
            Mode::All => Ok(available),
            Mode::Fixed(n) => {
                if n > available && self.overflow == OverflowPolicy::Reject {
                    Err(SelectionError::InsufficientCandidates {
                        requested: n,
                        available,
                    })
                } else {
                    Ok(n.min(available))
                }
            }
            Mode::FixedPercent(p) => {
                let n = percent_of(p, available);
                Ok(if n == 0 && p > 0 && available > 0 { 1 } else { n })
            }
            Mode::RandomMaxPercent(p) => Ok(rng.gen_range(0..=percent_of(p, available))),
        }
    }

    /// Choose the targets for one run.
    ///
    /// The result is a subset of `candidates` in their original order.
    pub fn resolve<T: Clone, R: Rng + ?Sized>(
        &self,
        candidates: &[T],
        mode: Mode,
        rng: &mut R,
    ) -> Result<Vec<T>, SelectionError> {
        let count = self.count(mode, candidates.len(), rng)?;
        if count == candidates.len() {
            return Ok(candidates.to_vec());
        }

        let mut picked = index::sample(rng, candidates.len(), count).into_vec();
        picked.sort_unstable();
        Ok(picked.into_iter().map(|i| candidates[i].clone()).collect())
    }
}
