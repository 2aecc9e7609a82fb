//! Run classification and report units.

use core::fmt;

use serde::{Deserialize, Serialize};

/// Validity of one scheduled run.
///
/// The numeric codes are ordered by severity so that an element-wise MAX
/// reduction across the process group yields the worst status any
/// participant observed for that run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[repr(u32)]
pub enum RunStatus {
    /// Started on schedule and finished inside its slot.
    #[default]
    Valid = 0,
    /// The scheduled start instant had already passed; the payload was skipped.
    StartedLate = 1,
    /// The payload ran past the end of its slot.
    Overran = 2,
    /// The operation under test reported a failure.
    TransportFailure = 3,
}

impl RunStatus {
    /// Wire code used when reducing statuses across processes.
    pub fn code(self) -> u32 {
        self as u32
    }

    /// Decode a reduced wire code. Unknown codes are treated as transport failures.
    pub fn from_code(code: u32) -> Self {
        match code {
            0 => RunStatus::Valid,
            1 => RunStatus::StartedLate,
            2 => RunStatus::Overran,
            _ => RunStatus::TransportFailure,
        }
    }

    /// Whether the run counts toward the statistical sample.
    pub fn is_valid(self) -> bool {
        self == RunStatus::Valid
    }

    /// Combine two observations of the same run, keeping the more severe.
    pub fn worst(self, other: RunStatus) -> RunStatus {
        self.max(other)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunStatus::Valid => "valid",
            RunStatus::StartedLate => "started-late",
            RunStatus::Overran => "overran",
            RunStatus::TransportFailure => "transport-failure",
        };
        f.write_str(s)
    }
}

/// Unit used for times in reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeScale {
    /// Seconds.
    Sec,
    /// Microseconds.
    #[default]
    Usec,
}

impl TimeScale {
    /// Factor converting seconds into this unit.
    pub fn factor(self) -> f64 {
        match self {
            TimeScale::Sec => 1.0,
            TimeScale::Usec => 1e6,
        }
    }

    /// Human readable unit name for report headers.
    pub fn label(self) -> &'static str {
        match self {
            TimeScale::Sec => "seconds",
            TimeScale::Usec => "microseconds",
        }
    }
}
