//! Trapezoidal speed profile over distance-to-goal

use std::fmt;

/// Value used when the configured profile percent is unusable
pub const FALLBACK_PROFILE_PERCENT: f64 = 0.5;

/// Phase of the speed profile for a given remaining distance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProfilePhase {
    Accelerate,
    Cruise,
    Decelerate,
}

impl fmt::Display for ProfilePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProfilePhase::Accelerate => "Accelerate",
            ProfilePhase::Cruise => "Uniform Velocity",
            ProfilePhase::Decelerate => "Decelerate",
        };
        f.write_str(name)
    }
}

/// Returns the replacement when `percent` lies outside (0, 0.5]
pub fn corrected_profile_percent(percent: f64) -> Option<f64> {
    if percent > 0.0 && percent <= 0.5 {
        None
    } else {
        Some(FALLBACK_PROFILE_PERCENT)
    }
}

/// Docking distance and acceleration latched at the start of an attempt
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrapezoidalProfile {
    pub docking_distance: f64,
    pub acceleration: f64,
}

impl TrapezoidalProfile {
    /// Acceleration that reaches `max_velocity` after covering
    /// `profile_percent` of `docking_distance`
    pub fn latch(docking_distance: f64, max_velocity: f64, profile_percent: f64) -> Self {
        TrapezoidalProfile {
            docking_distance,
            acceleration: max_velocity.powi(2) / (2.0 * profile_percent * docking_distance),
        }
    }

    /// Remaining distance above which the base is still accelerating
    pub fn cruise_start(&self, profile_percent: f64) -> f64 {
        (1.0 - profile_percent) * self.docking_distance
    }

    /// Remaining distance below which the base decelerates
    pub fn cruise_end(&self, profile_percent: f64) -> f64 {
        profile_percent * self.docking_distance
    }

    /// Phase for the remaining distance; `None` when it falls in no band,
    /// which only happens for non-finite input.
    pub fn phase_for(&self, distance: f64, profile_percent: f64) -> Option<ProfilePhase> {
        let upper = self.cruise_start(profile_percent);
        let lower = self.cruise_end(profile_percent);

        if distance > upper {
            Some(ProfilePhase::Accelerate)
        } else if distance <= upper && distance >= lower {
            Some(ProfilePhase::Cruise)
        } else if distance < lower {
            Some(ProfilePhase::Decelerate)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn latch_matches_closed_form() {
        let profile = TrapezoidalProfile::latch(1.0, 0.3, 0.2);
        assert!((profile.acceleration - 0.225).abs() < 1e-12);
        assert_eq!(profile.docking_distance, 1.0);
    }

    #[rstest]
    #[case(0.95, Some(ProfilePhase::Accelerate))]
    #[case(0.8, Some(ProfilePhase::Cruise))]
    #[case(0.5, Some(ProfilePhase::Cruise))]
    #[case(0.2, Some(ProfilePhase::Cruise))]
    #[case(0.1, Some(ProfilePhase::Decelerate))]
    #[case(0.0, Some(ProfilePhase::Decelerate))]
    #[case(f64::NAN, None)]
    fn bands(#[case] distance: f64, #[case] expected: Option<ProfilePhase>) {
        let profile = TrapezoidalProfile::latch(1.0, 0.3, 0.2);
        assert_eq!(profile.phase_for(distance, 0.2), expected);
    }

    #[test]
    fn half_percent_has_no_cruise_interior() {
        let profile = TrapezoidalProfile::latch(2.0, 0.3, 0.5);
        assert_eq!(profile.phase_for(1.5, 0.5), Some(ProfilePhase::Accelerate));
        assert_eq!(profile.phase_for(1.0, 0.5), Some(ProfilePhase::Cruise));
        assert_eq!(profile.phase_for(0.5, 0.5), Some(ProfilePhase::Decelerate));
    }

    #[rstest]
    #[case(0.2, None)]
    #[case(0.5, None)]
    #[case(0.0, Some(0.5))]
    #[case(-0.1, Some(0.5))]
    #[case(0.8, Some(0.5))]
    #[case(f64::NAN, Some(0.5))]
    fn profile_percent_correction(#[case] percent: f64, #[case] expected: Option<f64>) {
        assert_eq!(corrected_profile_percent(percent), expected);
    }
}
