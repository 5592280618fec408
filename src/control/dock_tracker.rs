//! Docking approach controller
//!
//! Drives the base toward a fixed docking pose with a trapezoidal speed
//! profile. The profile is laid out over the distance to the goal latched
//! on the first tick of an attempt: the first and last `profile_percent`
//! of that distance accelerate and decelerate, the middle cruises at
//! `linear_max_velocity`. The command is expressed in the robot frame and
//! never rotates the base.

use super::profile::{corrected_profile_percent, ProfilePhase, TrapezoidalProfile};
use crate::common::{Pose2D, Velocity2D};
use crate::config::ParamNamespace;
use log::{debug, info, warn};

/// Tunables of the docking controller
#[derive(Debug, Clone, PartialEq)]
pub struct ControllerConfig {
    pub active: bool,
    /// Control loop rate in Hz
    pub control_frequency: f64,
    pub linear_max_velocity: f64,
    /// Share of the docking distance used to accelerate and to decelerate
    pub profile_percent: f64,
    pub stop_tolerance: f64,
    /// Maximum pose age in seconds before ticks stop commanding; 0 disables
    pub pose_timeout: f64,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        ControllerConfig {
            active: true,
            control_frequency: 50.0,
            linear_max_velocity: 0.3,
            profile_percent: 0.2,
            stop_tolerance: 0.005,
            pose_timeout: 0.0,
        }
    }
}

impl ControllerConfig {
    /// Read the configuration, falling back to defaults for anything
    /// missing or out of range. The flag is false if any fallback was used.
    pub fn fetch(params: &ParamNamespace) -> (Self, bool) {
        let defaults = ControllerConfig::default();
        let mut fetch = params.fetch();
        let mut config = ControllerConfig {
            active: fetch.get("active", defaults.active),
            control_frequency: fetch.get("control_frequency", defaults.control_frequency),
            linear_max_velocity: fetch.get("linear_max_velocity", defaults.linear_max_velocity),
            profile_percent: fetch.get("profile_percent", defaults.profile_percent),
            stop_tolerance: fetch.get("stop_tolerance", defaults.stop_tolerance),
            pose_timeout: fetch.get("pose_timeout", defaults.pose_timeout),
        };
        let mut ok = fetch.ok();

        if !(config.control_frequency > 0.0 && config.control_frequency.is_finite()) {
            warn!(
                "[Dock Tracker]: control_frequency {} invalid, using {}",
                config.control_frequency, defaults.control_frequency
            );
            config.control_frequency = defaults.control_frequency;
            ok = false;
        }
        if !(config.linear_max_velocity > 0.0) {
            warn!(
                "[Dock Tracker]: linear_max_velocity {} invalid, using {}",
                config.linear_max_velocity, defaults.linear_max_velocity
            );
            config.linear_max_velocity = defaults.linear_max_velocity;
            ok = false;
        }
        if !(config.stop_tolerance > 0.0) {
            warn!(
                "[Dock Tracker]: stop_tolerance {} invalid, using {}",
                config.stop_tolerance, defaults.stop_tolerance
            );
            config.stop_tolerance = defaults.stop_tolerance;
            ok = false;
        }
        if !(config.pose_timeout >= 0.0) {
            warn!(
                "[Dock Tracker]: pose_timeout {} invalid, using {}",
                config.pose_timeout, defaults.pose_timeout
            );
            config.pose_timeout = defaults.pose_timeout;
            ok = false;
        }
        // profile_percent is checked and corrected by every tick

        (config, ok)
    }
}

/// Everything the controller remembers between ticks
#[derive(Debug, Clone, PartialEq)]
pub struct ControllerState {
    pub goal: Pose2D,
    pub pose: Pose2D,
    pub velocity: Velocity2D,
    pub docking_distance: f64,
    pub acceleration: f64,
    pub has_goal: bool,
    pub distance_locked: bool,
    pub last_update_time: f64,
    /// Time the current pose was received
    pub pose_stamp: f64,
}

impl Default for ControllerState {
    fn default() -> Self {
        ControllerState {
            goal: Pose2D::default(),
            pose: Pose2D::default(),
            velocity: Velocity2D::ZERO,
            docking_distance: 0.0,
            acceleration: 0.0,
            has_goal: false,
            distance_locked: false,
            last_update_time: 0.0,
            pose_stamp: 0.0,
        }
    }
}

/// Docking velocity-profile state machine
#[derive(Debug)]
pub struct DockApproachController {
    config: ControllerConfig,
    state: ControllerState,
    phase: Option<ProfilePhase>,
}

impl DockApproachController {
    pub fn new(config: ControllerConfig) -> Self {
        DockApproachController {
            config,
            state: ControllerState::default(),
            phase: None,
        }
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    /// Replace the configuration. Takes effect on the next tick.
    pub fn set_config(&mut self, config: ControllerConfig) {
        self.config = config;
    }

    pub fn state(&self) -> &ControllerState {
        &self.state
    }

    /// Phase applied by the most recent tick, `None` when idle or docked
    pub fn phase(&self) -> Option<ProfilePhase> {
        self.phase
    }

    pub fn on_goal_received(&mut self, goal: Pose2D, now: f64) {
        self.state.goal = goal;
        self.state.has_goal = true;
        self.state.distance_locked = false;
        self.state.last_update_time = now;
        self.phase = None;
        info!(
            "[Dock Tracker]: Dock goal received! ({:.3}, {:.3}, {:.3})",
            goal.x, goal.y, goal.yaw
        );
    }

    pub fn on_pose_updated(&mut self, pose: Pose2D, now: f64) {
        self.state.pose = pose;
        self.state.pose_stamp = now;
    }

    /// Move the integration time reference to `now` so the next tick does
    /// not integrate over a pause in ticking.
    pub fn reset_time_reference(&mut self, now: f64) {
        self.state.last_update_time = now;
    }

    /// One control step. Returns the command to publish, or `None` when
    /// there is nothing to command.
    pub fn tick(&mut self, now: f64) -> Option<Velocity2D> {
        if !self.state.has_goal {
            return None;
        }

        if self.config.pose_timeout > 0.0 && now - self.state.pose_stamp > self.config.pose_timeout
        {
            warn!(
                "[Dock Tracker]: Pose is {:.3}s old, holding command",
                now - self.state.pose_stamp
            );
            self.state.last_update_time = now;
            return None;
        }

        let goal = self.state.goal;
        let pose = self.state.pose;
        let dx = goal.x - pose.x;
        let dy = goal.y - pose.y;
        let dist = dx.hypot(dy);

        if !dist.is_finite() {
            warn!(
                "[Dock Tracker]: Docking distance goes wrong(dist, px, py, gx, gy): {} {} {} {} {}",
                dist, pose.x, pose.y, goal.x, goal.y
            );
            self.state.last_update_time = now;
            return None;
        }

        if dist <= f64::EPSILON {
            info!("[Dock Tracker]: Already on the dock goal, stopping");
            self.finish(now);
            return Some(self.state.velocity);
        }

        // Direction to the goal in the robot frame
        let (sin_yaw, cos_yaw) = pose.yaw.sin_cos();
        let cosx = (dx * cos_yaw + dy * sin_yaw) / dist;
        let mut sinx = (1.0 - cosx * cosx).max(0.0).sqrt();
        if cos_yaw * dy - sin_yaw * dx < 0.0 {
            sinx = -sinx;
        }

        if let Some(corrected) = corrected_profile_percent(self.config.profile_percent) {
            warn!(
                "[Dock Tracker]: Profile percent {} out of range, using {}!",
                self.config.profile_percent, corrected
            );
            self.config.profile_percent = corrected;
        }
        let percent = self.config.profile_percent;
        let max_velocity = self.config.linear_max_velocity;

        if !self.state.distance_locked {
            let profile = TrapezoidalProfile::latch(dist, max_velocity, percent);
            self.state.docking_distance = profile.docking_distance;
            self.state.acceleration = profile.acceleration;
            self.state.distance_locked = true;
            debug!(
                "[Dock Tracker]: Docking distance {:.4}, acceleration {:.4}",
                profile.docking_distance, profile.acceleration
            );
        }
        let profile = TrapezoidalProfile {
            docking_distance: self.state.docking_distance,
            acceleration: self.state.acceleration,
        };

        let dt = now - self.state.last_update_time;
        let step = profile.acceleration * dt;
        let velocity = &mut self.state.velocity;

        match profile.phase_for(dist, percent) {
            Some(phase) => {
                match phase {
                    ProfilePhase::Accelerate => {
                        velocity.vx += step * cosx;
                        velocity.vy += step * sinx;
                    }
                    ProfilePhase::Cruise => {
                        velocity.vx = max_velocity * cosx;
                        velocity.vy = max_velocity * sinx;
                    }
                    ProfilePhase::Decelerate => {
                        velocity.vx -= step * cosx;
                        velocity.vy -= step * sinx;
                    }
                }
                velocity.wz = 0.0;

                if self.phase != Some(phase) {
                    info!(
                        "[Dock Tracker]: {}!(v, dist): {:.4} {:.4}",
                        phase,
                        velocity.speed(),
                        dist
                    );
                } else {
                    debug!(
                        "[Dock Tracker]: {}!(v, dist): {:.4} {:.4}",
                        phase,
                        velocity.speed(),
                        dist
                    );
                }
                self.phase = Some(phase);
            }
            None => {
                warn!(
                    "[Dock Tracker]: Docking distance goes wrong(dist, px, py, gx, gy): {} {} {} {} {}",
                    dist, pose.x, pose.y, goal.x, goal.y
                );
            }
        }

        if dist < self.config.stop_tolerance {
            info!("[Dock Tracker]: Successfully docked!");
            self.finish(now);
            return Some(self.state.velocity);
        }

        self.state.last_update_time = now;
        Some(self.state.velocity)
    }

    fn finish(&mut self, now: f64) {
        self.state.velocity = Velocity2D::ZERO;
        self.state.has_goal = false;
        self.state.last_update_time = now;
        self.phase = None;
    }
}
