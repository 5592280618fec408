//! Kinematic stand-in for the robot base
//!
//! Follows the last `cmd_vel` command exactly, with no dynamics, and
//! reports its pose on `odom`.

use crate::common::{normalize_angle, Clock, Pose2D, Velocity2D};
use crate::config::ParamNamespace;
use crate::error::Result;
use crate::transport::msgs::{Header, Odometry, Pose, PoseWithCovariance, Twist, TwistWithCovariance};
use crate::transport::{Node, Publisher, Subscription};
use log::info;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

#[derive(Debug, Clone, PartialEq)]
pub struct SimConfig {
    pub rate: f64,
    pub initial_x: f64,
    pub initial_y: f64,
    pub initial_yaw: f64,
    pub cmd_vel_topic: String,
    pub odom_topic: String,
}

impl Default for SimConfig {
    fn default() -> Self {
        SimConfig {
            rate: 100.0,
            initial_x: 0.0,
            initial_y: 0.0,
            initial_yaw: 0.0,
            cmd_vel_topic: "cmd_vel".to_string(),
            odom_topic: "odom".to_string(),
        }
    }
}

impl SimConfig {
    pub fn fetch(params: &ParamNamespace) -> Self {
        let d = SimConfig::default();
        let rate = params.param("rate", d.rate).0;
        SimConfig {
            rate: if rate > 0.0 && rate.is_finite() { rate } else { d.rate },
            initial_x: params.param("initial_x", d.initial_x).0,
            initial_y: params.param("initial_y", d.initial_y).0,
            initial_yaw: params.param("initial_yaw", d.initial_yaw).0,
            cmd_vel_topic: params.param("cmd_vel_topic", d.cmd_vel_topic).0,
            odom_topic: params.param("odom_topic", d.odom_topic).0,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct BaseState {
    pose: Pose2D,
    /// Robot-frame command being followed
    velocity: Velocity2D,
}

pub struct SimulatedBase {
    config: SimConfig,
    clock: Arc<dyn Clock>,
    state: Arc<Mutex<BaseState>>,
    odom: Arc<Publisher<Odometry>>,
    _cmd_vel: Arc<Subscription>,
}

impl SimulatedBase {
    pub fn new(node: &Node, config: SimConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        let state = Arc::new(Mutex::new(BaseState {
            pose: Pose2D::new(config.initial_x, config.initial_y, config.initial_yaw),
            velocity: Velocity2D::ZERO,
        }));

        let commanded = Arc::clone(&state);
        let cmd_vel = node.create_subscription(&config.cmd_vel_topic, move |msg: Twist| {
            commanded.lock().unwrap_or_else(|e| e.into_inner()).velocity = msg.to_velocity2d();
        })?;
        let odom = node.create_publisher::<Odometry>(&config.odom_topic)?;

        Ok(SimulatedBase {
            config,
            clock,
            state,
            odom,
            _cmd_vel: cmd_vel,
        })
    }

    pub fn pose(&self) -> Pose2D {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).pose
    }

    /// Advance the pose by `dt` seconds under the current command
    pub fn integrate(&self, dt: f64) -> Pose2D {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let BaseState { pose, velocity } = *state;
        let (sin, cos) = pose.yaw.sin_cos();
        state.pose = Pose2D {
            x: pose.x + (velocity.vx * cos - velocity.vy * sin) * dt,
            y: pose.y + (velocity.vx * sin + velocity.vy * cos) * dt,
            yaw: normalize_angle(pose.yaw + velocity.wz * dt),
        };
        state.pose
    }

    /// Publish the current pose on the odometry topic
    pub fn publish_odom(&self) {
        let BaseState { pose, velocity } = *self.state.lock().unwrap_or_else(|e| e.into_inner());
        self.odom.publish(Odometry {
            header: Header {
                stamp: self.clock.now(),
                frame_id: "odom".to_string(),
            },
            child_frame_id: "base_link".to_string(),
            pose: PoseWithCovariance {
                pose: Pose::from(pose),
            },
            twist: TwistWithCovariance {
                twist: Twist::from(velocity),
            },
        });
    }

    /// Integrate and publish at `rate` until `shutdown` turns true
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        info!(
            "[sim]: Base at ({:.3}, {:.3}, {:.3}), {} Hz",
            self.config.initial_x, self.config.initial_y, self.config.initial_yaw, self.config.rate
        );
        let dt = 1.0 / self.config.rate;
        let mut interval = tokio::time::interval(Duration::from_secs_f64(dt));
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        self.publish_odom();
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.integrate(dt);
                    self.publish_odom();
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        return Ok(());
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::ManualClock;
    use crate::config::ParamStore;
    use crate::transport::Bus;
    use std::f64::consts::FRAC_PI_2;
    use tokio::sync::mpsc;

    fn base(bus: &Arc<Bus>, yaw: f64) -> SimulatedBase {
        let config = SimConfig {
            initial_yaw: yaw,
            ..SimConfig::default()
        };
        SimulatedBase::new(
            &Node::new(bus, "sim"),
            config,
            Arc::new(ManualClock::new(0.0)),
        )
        .unwrap()
    }

    #[test]
    fn config_rejects_bad_rate() {
        let store = ParamStore::from_yaml_str("sim:\n  rate: -5.0\n  initial_x: 1.5\n").unwrap();
        let config = SimConfig::fetch(&store.namespace("sim"));
        assert_eq!(config.rate, 100.0);
        assert_eq!(config.initial_x, 1.5);
    }

    #[tokio::test]
    async fn integrates_robot_frame_command() {
        let bus = Arc::new(Bus::new());
        let sim = base(&bus, FRAC_PI_2);
        sim.state.lock().unwrap().velocity = Velocity2D {
            vx: 1.0,
            vy: 0.5,
            wz: 0.0,
        };

        let pose = sim.integrate(0.1);
        assert!((pose.x - -0.05).abs() < 1e-9);
        assert!((pose.y - 0.1).abs() < 1e-9);
        assert!((pose.yaw - FRAC_PI_2).abs() < 1e-9);
    }

    #[tokio::test]
    async fn follows_cmd_vel_and_reports_odom() {
        let bus = Arc::new(Bus::new());
        let sim = base(&bus, 0.0);

        let listener = Node::new(&bus, "listener");
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _sub = listener
            .create_subscription("odom", move |msg: Odometry| {
                let _ = tx.send(msg);
            })
            .unwrap();
        let cmd = listener.create_publisher::<Twist>("cmd_vel").unwrap();
        cmd.publish(Twist::from(Velocity2D {
            vx: 0.2,
            vy: 0.0,
            wz: 0.0,
        }));

        let deadline = tokio::time::Instant::now() + Duration::from_secs(1);
        while sim.state.lock().unwrap().velocity.vx == 0.0 {
            assert!(tokio::time::Instant::now() < deadline);
            tokio::task::yield_now().await;
        }

        sim.integrate(0.5);
        sim.publish_odom();
        let odom = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!((odom.pose.pose.position.x - 0.1).abs() < 1e-9);
        assert!((odom.twist.twist.linear.x - 0.2).abs() < 1e-9);
    }
}
