//! Common utilities and types shared by the nodes
pub mod clock;

pub use self::clock::{Clock, ManualClock, MonotonicClock};
pub use self::types::{normalize_angle, Pose2D, Velocity2D};

/// Planar geometry types used across the codebase
pub mod types {
    use std::f64::consts::PI;

    /// Wrap an angle into (-pi, pi]
    pub fn normalize_angle(angle: f64) -> f64 {
        let wrapped = angle.rem_euclid(2.0 * PI);
        if wrapped > PI {
            wrapped - 2.0 * PI
        } else {
            wrapped
        }
    }

    /// A pose in the shared planar frame (x, y, yaw)
    #[derive(Debug, Clone, Copy, Default, PartialEq)]
    pub struct Pose2D {
        pub x: f64,
        pub y: f64,
        pub yaw: f64,
    }

    impl Pose2D {
        pub fn new(x: f64, y: f64, yaw: f64) -> Self {
            Pose2D {
                x,
                y,
                yaw: normalize_angle(yaw),
            }
        }

        /// Straight-line distance between the positions of two poses
        pub fn distance_to(&self, other: &Pose2D) -> f64 {
            (other.x - self.x).hypot(other.y - self.y)
        }
    }

    /// Robot-frame velocity command
    #[derive(Debug, Clone, Copy, Default, PartialEq)]
    pub struct Velocity2D {
        pub vx: f64,
        pub vy: f64,
        pub wz: f64,
    }

    impl Velocity2D {
        pub const ZERO: Velocity2D = Velocity2D {
            vx: 0.0,
            vy: 0.0,
            wz: 0.0,
        };

        /// Magnitude of the linear part
        pub fn speed(&self) -> f64 {
            self.vx.hypot(self.vy)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    #[test]
    fn normalize_angle_wraps_into_half_open_range() {
        assert!((normalize_angle(3.0 * PI) - PI).abs() < 1e-12);
        assert!((normalize_angle(-PI) - PI).abs() < 1e-12);
        assert!((normalize_angle(-0.5) + 0.5).abs() < 1e-12);
        assert!((normalize_angle(2.0 * PI + 0.25) - 0.25).abs() < 1e-12);
    }

    #[test]
    fn pose_distance_ignores_heading() {
        let a = Pose2D::new(0.0, 0.0, 1.0);
        let b = Pose2D::new(3.0, 4.0, -2.0);
        assert!((a.distance_to(&b) - 5.0).abs() < 1e-12);
    }
}
