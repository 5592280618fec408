//! Message types carried on the bus
//!
//! These mirror the layout of the geometry_msgs / nav_msgs / std_msgs
//! messages the nodes exchange, so a bridge to a real middleware only has
//! to copy fields.

use crate::common::{Pose2D, Velocity2D};
use nalgebra::{Quaternion as NaQuaternion, UnitQuaternion};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Header {
    /// Seconds on the publisher's clock
    pub stamp: f64,
    pub frame_id: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Point {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quaternion {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub w: f64,
}

impl Default for Quaternion {
    fn default() -> Self {
        Quaternion {
            x: 0.0,
            y: 0.0,
            z: 0.0,
            w: 1.0,
        }
    }
}

impl Quaternion {
    /// Rotation about z only
    pub fn from_yaw(yaw: f64) -> Self {
        let q = UnitQuaternion::from_euler_angles(0.0, 0.0, yaw);
        Quaternion {
            x: q.i,
            y: q.j,
            z: q.k,
            w: q.w,
        }
    }

    /// Yaw of the (normalized) rotation; a zero quaternion yields 0
    pub fn yaw(&self) -> f64 {
        let raw = NaQuaternion::new(self.w, self.x, self.y, self.z);
        if raw.norm() <= f64::EPSILON {
            return 0.0;
        }
        let (_, _, yaw) = UnitQuaternion::from_quaternion(raw).euler_angles();
        yaw
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Pose {
    pub position: Point,
    pub orientation: Quaternion,
}

impl Pose {
    pub fn to_pose2d(&self) -> Pose2D {
        Pose2D::new(self.position.x, self.position.y, self.orientation.yaw())
    }
}

impl From<Pose2D> for Pose {
    fn from(pose: Pose2D) -> Self {
        Pose {
            position: Point {
                x: pose.x,
                y: pose.y,
                z: 0.0,
            },
            orientation: Quaternion::from_yaw(pose.yaw),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PoseStamped {
    pub header: Header,
    pub pose: Pose,
}

impl PoseStamped {
    pub fn new(frame_id: &str, stamp: f64, pose: Pose2D) -> Self {
        PoseStamped {
            header: Header {
                stamp,
                frame_id: frame_id.to_string(),
            },
            pose: pose.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PoseWithCovariance {
    pub pose: Pose,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Vector3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Twist {
    pub linear: Vector3,
    pub angular: Vector3,
}

impl From<Velocity2D> for Twist {
    fn from(vel: Velocity2D) -> Self {
        Twist {
            linear: Vector3 {
                x: vel.vx,
                y: vel.vy,
                z: 0.0,
            },
            angular: Vector3 {
                x: 0.0,
                y: 0.0,
                z: vel.wz,
            },
        }
    }
}

impl Twist {
    pub fn to_velocity2d(&self) -> Velocity2D {
        Velocity2D {
            vx: self.linear.x,
            vy: self.linear.y,
            wz: self.angular.z,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TwistWithCovariance {
    pub twist: Twist,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Odometry {
    pub header: Header,
    pub child_frame_id: String,
    pub pose: PoseWithCovariance,
    pub twist: TwistWithCovariance,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Path {
    pub header: Header,
    pub poses: Vec<PoseStamped>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Bool {
    pub data: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::FRAC_PI_2;

    #[test]
    fn yaw_survives_quaternion_conversion() {
        for yaw in [0.0, 0.3, -1.2, FRAC_PI_2, 3.0] {
            let q = Quaternion::from_yaw(yaw);
            assert!((q.yaw() - yaw).abs() < 1e-9, "yaw {}", yaw);
        }
    }

    #[test]
    fn unnormalized_quaternion_still_gives_yaw() {
        let q = Quaternion::from_yaw(0.7);
        let scaled = Quaternion {
            x: q.x * 3.0,
            y: q.y * 3.0,
            z: q.z * 3.0,
            w: q.w * 3.0,
        };
        assert!((scaled.yaw() - 0.7).abs() < 1e-9);
    }

    #[test]
    fn zero_quaternion_is_treated_as_no_rotation() {
        let q = Quaternion {
            x: 0.0,
            y: 0.0,
            z: 0.0,
            w: 0.0,
        };
        assert_eq!(q.yaw(), 0.0);
    }
}
