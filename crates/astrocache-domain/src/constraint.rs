//! Remote fetch constraints for full and incremental catalog queries.

use std::fmt;

use crate::catalog::{parallax_for_distance_ly, QueryMode};

/// Constraint on the remote query. Parallaxes are in milliarcseconds.
///
/// Ranges are inclusive on both ends; overlap with already cached rows is
/// removed by deduplication after the fetch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FetchConstraint {
    ParallaxAtLeast { min_mas: f64 },
    ParallaxBetween { min_mas: f64, max_mas: f64 },
    MagnitudeAtMost { max: f64 },
    MagnitudeBetween { min: f64, max: f64 },
}

impl FetchConstraint {
    /// Constraint selecting everything within `limit`.
    #[must_use]
    pub fn full(mode: QueryMode, limit: f64) -> Self {
        match mode {
            QueryMode::Distance => FetchConstraint::ParallaxAtLeast {
                min_mas: parallax_for_distance_ly(limit),
            },
            QueryMode::Magnitude => FetchConstraint::MagnitudeAtMost { max: limit },
        }
    }

    /// Constraint selecting only what lies between a cached limit and a larger requested one.
    #[must_use]
    pub fn delta(mode: QueryMode, cached_limit: f64, requested_limit: f64) -> Self {
        let (lower, upper) = if cached_limit <= requested_limit {
            (cached_limit, requested_limit)
        } else {
            (requested_limit, cached_limit)
        };
        match mode {
            // farther objects have smaller parallaxes
            QueryMode::Distance => FetchConstraint::ParallaxBetween {
                min_mas: parallax_for_distance_ly(upper),
                max_mas: parallax_for_distance_ly(lower),
            },
            QueryMode::Magnitude => FetchConstraint::MagnitudeBetween {
                min: lower,
                max: upper,
            },
        }
    }

    #[must_use]
    pub fn mode(&self) -> QueryMode {
        match self {
            FetchConstraint::ParallaxAtLeast { .. } | FetchConstraint::ParallaxBetween { .. } => {
                QueryMode::Distance
            }
            FetchConstraint::MagnitudeAtMost { .. } | FetchConstraint::MagnitudeBetween { .. } => {
                QueryMode::Magnitude
            }
        }
    }

    /// Whether `value` (parallax or magnitude) satisfies the constraint.
    #[must_use]
    pub fn admits(&self, value: f64) -> bool {
        match *self {
            FetchConstraint::ParallaxAtLeast { min_mas } => value >= min_mas,
            FetchConstraint::ParallaxBetween { min_mas, max_mas } => {
                (min_mas..=max_mas).contains(&value)
            }
            FetchConstraint::MagnitudeAtMost { max } => value <= max,
            FetchConstraint::MagnitudeBetween { min, max } => (min..=max).contains(&value),
        }
    }
}

/// Query-string rendering: `>=12.3456`, `<=6.000`, `4.000..6.000`.
impl fmt::Display for FetchConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchConstraint::ParallaxAtLeast { min_mas } => write!(f, ">={min_mas:.4}"),
            FetchConstraint::ParallaxBetween { min_mas, max_mas } => {
                write!(f, "{min_mas:.4}..{max_mas:.4}")
            }
            FetchConstraint::MagnitudeAtMost { max } => write!(f, "<={max:.3}"),
            FetchConstraint::MagnitudeBetween { min, max } => write!(f, "{min:.3}..{max:.3}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::LY_PER_PARSEC;

    #[test]
    fn magnitude_delta_spans_old_and_new_limits() {
        let constraint = FetchConstraint::delta(QueryMode::Magnitude, 4.0, 6.0);
        assert_eq!(
            constraint,
            FetchConstraint::MagnitudeBetween { min: 4.0, max: 6.0 }
        );
        assert_eq!(constraint.to_string(), "4.000..6.000");
        assert!(constraint.admits(5.2));
        assert!(!constraint.admits(6.5));
    }

    #[test]
    fn distance_delta_inverts_into_parallax_bounds() {
        let constraint = FetchConstraint::delta(QueryMode::Distance, 10.0 * LY_PER_PARSEC, 20.0 * LY_PER_PARSEC);
        match constraint {
            FetchConstraint::ParallaxBetween { min_mas, max_mas } => {
                assert!((min_mas - 50.0).abs() < 1e-9);
                assert!((max_mas - 100.0).abs() < 1e-9);
            }
            other => panic!("unexpected constraint {other:?}"),
        }
    }

    #[test]
    fn full_constraints_render_as_bounds() {
        let distance = FetchConstraint::full(QueryMode::Distance, 10.0 * LY_PER_PARSEC);
        assert_eq!(distance.to_string(), ">=100.0000");
        assert_eq!(distance.mode(), QueryMode::Distance);
        let magnitude = FetchConstraint::full(QueryMode::Magnitude, 6.5);
        assert_eq!(magnitude.to_string(), "<=6.500");
    }
}
