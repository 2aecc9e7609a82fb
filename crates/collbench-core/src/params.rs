//! Sweeps of the variable test parameter (message count, process count).

use alloc::string::{String, ToString};
use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};

/// How a sequence advances from one value to the next.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Step {
    /// `value += n`
    Add(usize),
    /// `value *= n`
    Mul(usize),
}

/// Error parsing a size literal or step expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    /// The offending input.
    pub input: String,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid size or step: {:?}", self.input)
    }
}

#[cfg(feature = "std")]
impl std::error::Error for ParseError {}

impl Step {
    /// Whether the step makes progress (would not loop forever).
    pub fn is_progressive(self) -> bool {
        match self {
            Step::Add(n) => n > 0,
            Step::Mul(n) => n > 1,
        }
    }

    fn apply(self, value: usize) -> Option<usize> {
        match self {
            Step::Add(n) => value.checked_add(n),
            Step::Mul(n) => value.checked_mul(n),
        }
    }
}

impl FromStr for Step {
    type Err = ParseError;

    /// `*N` or `xN` for multiplicative steps, `+N` or a bare `N` for additive.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Some(rest) = s.strip_prefix('*').or_else(|| s.strip_prefix('x')) {
            parse_size(rest).map(Step::Mul)
        } else {
            parse_size(s.strip_prefix('+').unwrap_or(s)).map(Step::Add)
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Step::Add(n) => write!(f, "+{}", n),
            Step::Mul(n) => write!(f, "*{}", n),
        }
    }
}

/// Inclusive sequence `min, min ∘ step, ...` up to `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParamSequence {
    /// First value.
    pub min: usize,
    /// Largest value allowed.
    pub max: usize,
    /// Progression rule.
    pub step: Step,
}

impl ParamSequence {
    /// Create a sequence.
    pub fn new(min: usize, max: usize, step: Step) -> Self {
        Self { min, max, step }
    }

    /// A sequence with exactly one value.
    pub fn single(value: usize) -> Self {
        Self::new(value, value, Step::Add(1))
    }

    /// Iterate over the values.
    ///
    /// A non-progressive step yields only `min`.
    pub fn iter(&self) -> ParamIter {
        ParamIter {
            next: if self.min <= self.max { Some(self.min) } else { None },
            max: self.max,
            step: self.step,
        }
    }

    /// Number of values in the sequence.
    pub fn len(&self) -> usize {
        self.iter().count()
    }

    /// Whether the sequence has no values.
    pub fn is_empty(&self) -> bool {
        self.min > self.max
    }
}

impl<'a> IntoIterator for &'a ParamSequence {
    type Item = usize;
    type IntoIter = ParamIter;

    fn into_iter(self) -> ParamIter {
        self.iter()
    }
}

/// Iterator over a [`ParamSequence`].
#[derive(Debug, Clone)]
pub struct ParamIter {
    next: Option<usize>,
    max: usize,
    step: Step,
}

impl Iterator for ParamIter {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        let current = self.next?;
        self.next = if self.step.is_progressive() {
            self.step.apply(current).filter(|&v| v > current && v <= self.max)
        } else {
            None
        };
        Some(current)
    }
}

/// Parse an integer with an optional binary suffix.
///
/// Accepts `KiB`/`MiB`/`GiB` and the short forms `k`/`m`/`g` (any case).
///
/// ```
/// use collbench_core::parse_size;
///
/// assert_eq!(parse_size("64KiB"), Ok(65536));
/// assert_eq!(parse_size("2m"), Ok(2 * 1024 * 1024));
/// assert_eq!(parse_size("17"), Ok(17));
/// ```
pub fn parse_size(input: &str) -> Result<usize, ParseError> {
    let err = || ParseError {
        input: input.to_string(),
    };
    let s = input.trim();
    let digits_end = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
    let (digits, suffix) = s.split_at(digits_end);
    let value: usize = digits.parse().map_err(|_| err())?;

    let shift = match suffix.to_ascii_lowercase().as_str() {
        "" => 0,
        "k" | "kib" => 10,
        "m" | "mib" => 20,
        "g" | "gib" => 30,
        _ => return Err(err()),
    };
    value.checked_mul(1usize << shift).ok_or_else(err)
}
