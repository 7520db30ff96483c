//! Replica split computation.
//!
//! Given the total desired replica count and a step fraction, decides how
//! many replicas the old and new deployments should run.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{Result, RolloutError, StepwiseError};

/// A step fraction `numerator/denominator` with `0 <= numerator <= denominator`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fraction {
    numerator: u64,
    denominator: u64,
}

impl Fraction {
    /// Creates a validated fraction.
    ///
    /// # Errors
    ///
    /// Returns `InvalidRatio` if the denominator is zero or the numerator
    /// exceeds the denominator.
    pub fn new(numerator: u64, denominator: u64) -> Result<Self> {
        if denominator == 0 {
            return Err(RolloutError::invalid_ratio(
                numerator,
                denominator,
                "denominator must be at least 1",
            )
            .into());
        }
        if numerator > denominator {
            return Err(RolloutError::invalid_ratio(
                numerator,
                denominator,
                "numerator must not exceed denominator",
            )
            .into());
        }
        Ok(Self {
            numerator,
            denominator,
        })
    }

    /// Returns the numerator.
    #[must_use]
    pub const fn numerator(&self) -> u64 {
        self.numerator
    }

    /// Returns the denominator.
    #[must_use]
    pub const fn denominator(&self) -> u64 {
        self.denominator
    }

    /// Returns true for `d/d`.
    #[must_use]
    pub const fn is_final(&self) -> bool {
        self.numerator == self.denominator
    }
}

impl FromStr for Fraction {
    type Err = StepwiseError;

    fn from_str(s: &str) -> Result<Self> {
        let malformed = || {
            StepwiseError::Rollout(RolloutError::invalid_ratio(
                0,
                0,
                format!("expected <numerator>/<denominator>, got '{s}'"),
            ))
        };

        let (num, den) = s.trim().split_once('/').ok_or_else(malformed)?;
        let numerator = num.trim().parse::<u64>().map_err(|_| malformed())?;
        let denominator = den.trim().parse::<u64>().map_err(|_| malformed())?;

        Self::new(numerator, denominator)
    }
}

impl fmt::Display for Fraction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.numerator, self.denominator)
    }
}

/// Replica counts for one rollout step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicaSplit {
    /// Replicas for the deployment being replaced.
    pub old_replicas: u32,
    /// Replicas for the deployment being rolled out.
    pub new_replicas: u32,
}

impl ReplicaSplit {
    /// Total replicas across both deployments.
    #[must_use]
    pub const fn total(&self) -> u32 {
        self.old_replicas + self.new_replicas
    }
}

/// Splits `total_desired` replicas at `numerator/denominator`.
///
/// The new side is `total * numerator / denominator` rounded half up; the
/// old side gets the remainder.
///
/// # Errors
///
/// Returns `InvalidRatio` if the fraction is out of range.
pub fn compute_split(total_desired: u32, numerator: u64, denominator: u64) -> Result<ReplicaSplit> {
    let fraction = Fraction::new(numerator, denominator)?;

    let total = u128::from(total_desired);
    let num = u128::from(fraction.numerator);
    let den = u128::from(fraction.denominator);

    // floor((2 * total * num + den) / (2 * den)) == round_half_up(total * num / den)
    let rounded = (2 * total * num + den) / (2 * den);
    let new_replicas = u32::try_from(rounded.min(total)).unwrap_or(total_desired);

    Ok(ReplicaSplit {
        old_replicas: total_desired - new_replicas,
        new_replicas,
    })
}

/// Position of a rollout: step `current_step` of `total_steps`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RolloutPlan {
    /// Steps completed so far.
    pub current_step: u64,
    /// Number of steps in the rollout.
    pub total_steps: u64,
}

impl RolloutPlan {
    /// Returns true at the last step.
    #[must_use]
    pub const fn is_final(&self) -> bool {
        self.current_step == self.total_steps
    }

    /// Computes the split for this step; the last step leaves nothing on the
    /// old side.
    ///
    /// # Errors
    ///
    /// Returns `InvalidRatio` if the plan is out of range.
    pub fn split(&self, total_desired: u32) -> Result<ReplicaSplit> {
        let split = compute_split(total_desired, self.current_step, self.total_steps)?;
        if self.is_final() {
            return Ok(ReplicaSplit {
                old_replicas: 0,
                new_replicas: total_desired,
            });
        }
        Ok(split)
    }
}

impl From<Fraction> for RolloutPlan {
    fn from(fraction: Fraction) -> Self {
        Self {
            current_step: fraction.numerator,
            total_steps: fraction.denominator,
        }
    }
}

impl fmt::Display for RolloutPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "step {}/{}", self.current_step, self.total_steps)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_three_tenths_of_ten() {
        let split = compute_split(10, 3, 10).unwrap();
        assert_eq!(split, ReplicaSplit { old_replicas: 7, new_replicas: 3 });
    }

    #[test]
    fn test_rounding_half_up() {
        // 7 * 7 / 10 = 4.9
        let split = compute_split(7, 7, 10).unwrap();
        assert_eq!(split.new_replicas, 5);
        assert_eq!(split.old_replicas, 2);

        // 1 * 1 / 2 = 0.5
        assert_eq!(compute_split(1, 1, 2).unwrap().new_replicas, 1);
        // 3 * 1 / 10 = 0.3
        assert_eq!(compute_split(3, 1, 10).unwrap().new_replicas, 0);
    }

    #[test]
    fn test_boundaries() {
        assert_eq!(
            compute_split(10, 10, 10).unwrap(),
            ReplicaSplit { old_replicas: 0, new_replicas: 10 }
        );
        assert_eq!(
            compute_split(10, 0, 4).unwrap(),
            ReplicaSplit { old_replicas: 10, new_replicas: 0 }
        );
        assert_eq!(
            compute_split(0, 1, 2).unwrap(),
            ReplicaSplit { old_replicas: 0, new_replicas: 0 }
        );
    }

    #[test]
    fn test_sums_to_total() {
        for total in 0..25 {
            for den in 1..12 {
                for num in 0..=den {
                    let split = compute_split(total, num, den).unwrap();
                    assert_eq!(split.total(), total);
                    assert!(split.new_replicas <= total);
                }
            }
        }
    }

    #[test]
    fn test_large_totals_do_not_overflow() {
        let split = compute_split(u32::MAX, u64::MAX - 1, u64::MAX).unwrap();
        assert_eq!(split.total(), u32::MAX);
    }

    #[test]
    fn test_invalid_ratios() {
        assert!(matches!(
            compute_split(10, 11, 10).unwrap_err(),
            StepwiseError::Rollout(RolloutError::InvalidRatio { numerator: 11, denominator: 10, .. })
        ));
        assert!(compute_split(10, 0, 0).is_err());
    }

    #[test]
    fn test_parse_fraction() {
        let fraction: Fraction = "3/10".parse().unwrap();
        assert_eq!(fraction.numerator(), 3);
        assert_eq!(fraction.denominator(), 10);
        assert_eq!(fraction.to_string(), "3/10");

        assert!(" 1 / 2 ".parse::<Fraction>().is_ok());
        assert!("3".parse::<Fraction>().is_err());
        assert!("a/b".parse::<Fraction>().is_err());
        assert!("-1/2".parse::<Fraction>().is_err());
        assert!("5/4".parse::<Fraction>().is_err());
        assert!("1/0".parse::<Fraction>().is_err());
    }

    #[test]
    fn test_plan_final_step() {
        let plan = RolloutPlan::from(Fraction::new(4, 4).unwrap());
        assert!(plan.is_final());
        assert_eq!(plan.split(9).unwrap(), ReplicaSplit { old_replicas: 0, new_replicas: 9 });
        assert_eq!(plan.to_string(), "step 4/4");

        let plan = RolloutPlan { current_step: 1, total_steps: 4 };
        assert!(!plan.is_final());
        assert_eq!(plan.split(8).unwrap().new_replicas, 2);
        assert_eq!(RolloutPlan::from(Fraction::new(1, 4).unwrap()), plan);
    }
}
