//! Batch removal of extreme values from a finished dataset.

use alloc::vec::Vec;
use core::fmt;

use crate::math;

/// Error returned when trimming percentages are inconsistent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrimError {
    /// Requested lower percentage.
    pub lower: u32,
    /// Requested upper percentage.
    pub upper: u32,
}

impl fmt::Display for TrimError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "cannot trim {}% + {}% of a dataset (sum exceeds 100%)",
            self.lower, self.upper
        )
    }
}

#[cfg(feature = "std")]
impl std::error::Error for TrimError {}

/// Sort `data` and drop the lowest `lower`% and highest `upper`% of it.
///
/// The number of dropped elements on each side is `floor(len / 100 * pct)`.
/// Percentages summing to exactly 100 (or an empty input) yield an empty
/// result; percentages summing above 100 are rejected.
///
/// ```
/// use collbench_core::statistics::trim_extremes;
///
/// let data: Vec<f64> = (0..100).map(f64::from).collect();
/// let kept = trim_extremes(&data, 25, 25).unwrap();
/// assert_eq!(kept.len(), 50);
/// assert_eq!(kept[0], 25.0);
/// ```
pub fn trim_extremes(data: &[f64], lower: u32, upper: u32) -> Result<Vec<f64>, TrimError> {
    let total = match lower.checked_add(upper) {
        Some(total) if total <= 100 => total,
        _ => return Err(TrimError { lower, upper }),
    };
    if data.is_empty() || total == 100 {
        return Ok(Vec::new());
    }

    let mut sorted = data.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));

    let len = sorted.len() as f64;
    let nmin = math::floor(len / 100.0 * lower as f64) as usize;
    let nmax = math::floor(len / 100.0 * upper as f64) as usize;
    let end = sorted.len() - nmax;

    sorted.truncate(end);
    sorted.drain(..nmin);
    Ok(sorted)
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(200))]

        /// Output length follows the floor formula and stays sorted.
        #[test]
        fn prop_trim_length(
            data in prop::collection::vec(0.0f64..1.0, 0..400),
            lower in 0u32..=60,
            upper in 0u32..=40,
        ) {
            let kept = trim_extremes(&data, lower, upper).unwrap();
            let n = data.len();
            let expected = if n == 0 || lower + upper == 100 {
                0
            } else {
                n - (n as f64 / 100.0 * lower as f64).floor() as usize
                    - (n as f64 / 100.0 * upper as f64).floor() as usize
            };
            prop_assert_eq!(kept.len(), expected);
            prop_assert!(kept.windows(2).all(|w| w[0] <= w[1]));
        }

        #[test]
        fn prop_trim_rejects_over_hundred(lower in 0u32..=100, extra in 1u32..50) {
            let upper = 101 - lower.min(100) + extra - 1;
            prop_assert!(trim_extremes(&[1.0], lower, upper).is_err());
        }
    }
}
