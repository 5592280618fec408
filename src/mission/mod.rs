//! Mission node: forwards goals to the robot and reports how they end
//!
//! A mission starts when a goal arrives on the main mission topic. The goal
//! is forwarded to the robot and a timeout is derived from the distance to
//! cover. The node then waits for the robot to report success on its
//! mission state topic, and reports `true` (reached) or `false` (timed out)
//! back on the main mission state topic.
pub mod supervisor;

use crate::common::{Clock, Pose2D};
use crate::config::ParamNamespace;
use crate::error::Result;
use crate::transport::msgs::{Bool, Odometry, PoseStamped};
use crate::transport::{Node, Publisher, Subscription};
use log::{debug, info, warn};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

#[derive(Debug, Clone, PartialEq)]
pub struct NavigationMainConfig {
    pub active: bool,
    pub publish: bool,
    /// Re-read parameters on every loop iteration
    pub update_params: bool,
    pub use_dynamic_reconfigure: bool,
    pub update_frequency: f64,
    pub timeout_a: f64,
    pub timeout_b: f64,
    pub timeout_min: f64,
    pub timeout_max: f64,
    pub robot_odom_topic: String,
    pub robot_mission_state_topic: String,
    pub robot_goal_topic: String,
    pub main_mission_topic: String,
    pub main_mission_state_topic: String,
}

impl Default for NavigationMainConfig {
    fn default() -> Self {
        NavigationMainConfig {
            active: true,
            publish: true,
            update_params: false,
            use_dynamic_reconfigure: true,
            update_frequency: 10.0,
            timeout_a: 1.0,
            timeout_b: 5.0,
            timeout_min: 5.0,
            timeout_max: 30.0,
            robot_odom_topic: "odom".to_string(),
            robot_mission_state_topic: "finishornot".to_string(),
            robot_goal_topic: "nav_goal".to_string(),
            main_mission_topic: "mission".to_string(),
            main_mission_state_topic: "is_mission_finished".to_string(),
        }
    }
}

impl NavigationMainConfig {
    /// Read every parameter; the flag is false if any default was used
    pub fn fetch(params: &ParamNamespace) -> (Self, bool) {
        let d = NavigationMainConfig::default();
        let mut fetch = params.fetch();
        let mut config = NavigationMainConfig {
            active: fetch.get("active", d.active),
            publish: fetch.get("publish", d.publish),
            update_params: fetch.get("update_params", d.update_params),
            use_dynamic_reconfigure: fetch.get("use_dynamic_reconfigure", d.use_dynamic_reconfigure),
            update_frequency: fetch.get("update_frequency", d.update_frequency),
            timeout_a: fetch.get("timeout_a", d.timeout_a),
            timeout_b: fetch.get("timeout_b", d.timeout_b),
            timeout_min: fetch.get("timeout_min", d.timeout_min),
            timeout_max: fetch.get("timeout_max", d.timeout_max),
            robot_odom_topic: fetch.get("robot_odom_topic", d.robot_odom_topic),
            robot_mission_state_topic: fetch
                .get("robot_mission_state_topic", d.robot_mission_state_topic),
            robot_goal_topic: fetch.get("robot_goal_topic", d.robot_goal_topic),
            main_mission_topic: fetch.get("main_mission_topic", d.main_mission_topic),
            main_mission_state_topic: fetch
                .get("main_mission_state_topic", d.main_mission_state_topic),
        };

        if !(config.update_frequency > 0.0 && config.update_frequency.is_finite()) {
            warn!(
                "[navigation_main]: update_frequency {} invalid, using {}",
                config.update_frequency, d.update_frequency
            );
            config.update_frequency = d.update_frequency;
        }
        (config, fetch.ok())
    }

    fn same_wiring(&self, other: &NavigationMainConfig) -> bool {
        self.active == other.active
            && self.robot_odom_topic == other.robot_odom_topic
            && self.robot_mission_state_topic == other.robot_mission_state_topic
            && self.robot_goal_topic == other.robot_goal_topic
            && self.main_mission_topic == other.main_mission_topic
            && self.main_mission_state_topic == other.main_mission_state_topic
    }
}

/// Values that may change at runtime without a parameter reload
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DynamicParams {
    pub publish: bool,
    pub timeout_a: f64,
    pub timeout_b: f64,
    pub timeout_min: f64,
    pub timeout_max: f64,
}

/// How a mission ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissionOutcome {
    Reached,
    TimedOut,
}

impl MissionOutcome {
    /// Value reported on the main mission state topic
    pub fn as_bool(self) -> bool {
        self == MissionOutcome::Reached
    }
}

/// Seconds allowed for a mission covering `distance` meters:
/// `a * distance + b`, held within `[min, max]`
pub fn timeout_for(distance: f64, a: f64, b: f64, min: f64, max: f64) -> f64 {
    (a * distance + b).max(min).min(max)
}

#[derive(Debug, Default)]
struct MissionState {
    started: bool,
    reached: bool,
    start_time: f64,
    timeout: f64,
    goal: Pose2D,
    robot: Pose2D,
}

struct MissionWiring {
    subscriptions: Vec<Arc<Subscription>>,
    robot_goal: Arc<Publisher<PoseStamped>>,
    mission_state: Arc<Publisher<Bool>>,
}

impl MissionWiring {
    fn shutdown(self) {
        for subscription in self.subscriptions {
            subscription.shutdown();
        }
    }
}

pub struct NavigationMain {
    this: Weak<NavigationMain>,
    node: Arc<Node>,
    params: ParamNamespace,
    clock: Arc<dyn Clock>,
    config: Mutex<NavigationMainConfig>,
    state: Mutex<MissionState>,
    wiring: Mutex<Option<MissionWiring>>,
}

impl NavigationMain {
    /// Read parameters and, when active, subscribe and advertise.
    /// Must be called from within a tokio runtime.
    pub fn new(node: Arc<Node>, params: ParamNamespace, clock: Arc<dyn Clock>) -> Result<Arc<Self>> {
        let (config, ok) = NavigationMainConfig::fetch(&params);
        report_fetch(ok);

        let main = Arc::new_cyclic(|this| NavigationMain {
            this: this.clone(),
            node,
            params,
            clock,
            config: Mutex::new(config.clone()),
            state: Mutex::new(MissionState::default()),
            wiring: Mutex::new(None),
        });
        if config.active {
            main.wire(&config)?;
        }
        Ok(main)
    }

    pub fn config(&self) -> NavigationMainConfig {
        lock(&self.config).clone()
    }

    pub fn is_wired(&self) -> bool {
        lock(&self.wiring).is_some()
    }

    /// True while a mission is running
    pub fn mission_running(&self) -> bool {
        lock(&self.state).started
    }

    /// Timeout of the current or last mission, in seconds
    pub fn current_timeout(&self) -> f64 {
        lock(&self.state).timeout
    }

    /// Start a mission towards `msg` and forward it to the robot
    pub fn on_main_mission(&self, msg: PoseStamped) {
        let goal = msg.pose.to_pose2d();
        let now = self.clock.now();
        let config = self.config();
        let timeout = {
            let mut state = lock(&self.state);
            let timeout = timeout_for(
                state.robot.distance_to(&goal),
                config.timeout_a,
                config.timeout_b,
                config.timeout_min,
                config.timeout_max,
            );
            state.goal = goal;
            state.started = true;
            state.reached = false;
            state.start_time = now;
            state.timeout = timeout;
            timeout
        };
        info!(
            "[navigation_main]: Mission to ({:.3}, {:.3}) with timeout {:.2}s",
            goal.x, goal.y, timeout
        );

        if let Some(wiring) = lock(&self.wiring).as_ref() {
            wiring.robot_goal.publish(msg);
        }
    }

    pub fn on_odom(&self, msg: Odometry) {
        lock(&self.state).robot = msg.pose.pose.to_pose2d();
    }

    pub fn on_robot_mission_state(&self, msg: Bool) {
        let mut state = lock(&self.state);
        if msg.data && state.started {
            state.reached = true;
        }
    }

    /// Check the running mission; returns the outcome once it ends
    pub fn step(&self, now: f64) -> Option<MissionOutcome> {
        if lock(&self.config).update_params {
            self.update_params();
        }

        let outcome = {
            let mut state = lock(&self.state);
            if !state.started {
                return None;
            }
            let outcome = if state.reached {
                MissionOutcome::Reached
            } else if now - state.start_time > state.timeout {
                MissionOutcome::TimedOut
            } else {
                return None;
            };
            state.started = false;
            state.reached = false;
            outcome
        };

        match outcome {
            MissionOutcome::Reached => info!("[navigation_main]: Goal reached"),
            MissionOutcome::TimedOut => warn!("[navigation_main]: Mission timed out"),
        }
        if lock(&self.config).publish {
            if let Some(wiring) = lock(&self.wiring).as_ref() {
                wiring.mission_state.publish(Bool {
                    data: outcome.as_bool(),
                });
            }
        }
        Some(outcome)
    }

    /// Re-read parameters, rewiring topics if they changed
    pub fn update_params(&self) -> bool {
        let (config, ok) = NavigationMainConfig::fetch(&self.params);
        report_fetch(ok);

        let rewire = !lock(&self.config).same_wiring(&config);
        *lock(&self.config) = config.clone();
        if rewire {
            self.unwire();
            if config.active {
                if let Err(e) = self.wire(&config) {
                    warn!("[navigation_main]: Failed to rewire: {}", e);
                }
            }
        }
        true
    }

    /// Apply a live update; ignored unless dynamic reconfigure is enabled
    pub fn on_dynamic_param(&self, update: DynamicParams) -> bool {
        let mut config = lock(&self.config);
        if !config.use_dynamic_reconfigure {
            debug!("[navigation_main]: Dynamic reconfigure disabled, ignoring update");
            return false;
        }
        config.publish = update.publish;
        config.timeout_a = update.timeout_a;
        config.timeout_b = update.timeout_b;
        config.timeout_min = update.timeout_min;
        config.timeout_max = update.timeout_max;
        info!(
            "[navigation_main]: Reconfigured timeout {}*d + {} in [{}, {}]",
            update.timeout_a, update.timeout_b, update.timeout_min, update.timeout_max
        );
        true
    }

    /// Step at `update_frequency` until `shutdown` turns true
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        info!("[navigation_main]: Initializing ...");
        let mut frequency = self.config().update_frequency;
        let mut interval = new_interval(frequency);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.step(self.clock.now());
                    let wanted = self.config().update_frequency;
                    if wanted != frequency {
                        frequency = wanted;
                        interval = new_interval(frequency);
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        self.unwire();
        Ok(())
    }

    fn wire(&self, config: &NavigationMainConfig) -> Result<()> {
        let weak = self.this.clone();
        let odom = self
            .node
            .create_subscription(&config.robot_odom_topic, move |msg: Odometry| {
                if let Some(main) = weak.upgrade() {
                    main.on_odom(msg);
                }
            })?;
        let weak = self.this.clone();
        let robot_state = self.node.create_subscription(
            &config.robot_mission_state_topic,
            move |msg: Bool| {
                if let Some(main) = weak.upgrade() {
                    main.on_robot_mission_state(msg);
                }
            },
        )?;
        let weak = self.this.clone();
        let mission = self
            .node
            .create_subscription(&config.main_mission_topic, move |msg: PoseStamped| {
                if let Some(main) = weak.upgrade() {
                    main.on_main_mission(msg);
                }
            })?;

        let robot_goal = self
            .node
            .create_publisher::<PoseStamped>(&config.robot_goal_topic)?;
        let mission_state = self
            .node
            .create_publisher::<Bool>(&config.main_mission_state_topic)?;

        *lock(&self.wiring) = Some(MissionWiring {
            subscriptions: vec![odom, robot_state, mission],
            robot_goal,
            mission_state,
        });
        Ok(())
    }

    fn unwire(&self) {
        if let Some(wiring) = lock(&self.wiring).take() {
            wiring.shutdown();
        }
    }
}

fn new_interval(frequency: f64) -> tokio::time::Interval {
    let mut interval = tokio::time::interval(Duration::from_secs_f64(1.0 / frequency));
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    interval
}

fn report_fetch(ok: bool) {
    if ok {
        info!("[navigation_main]: Set params ok");
    } else {
        warn!("[navigation_main]: Set params failed");
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::ManualClock;
    use crate::config::ParamStore;
    use crate::transport::Bus;
    use rstest::rstest;
    use tokio::sync::mpsc;

    #[rstest]
    #[case(0.0, 5.0)]
    #[case(3.0, 8.0)]
    #[case(40.0, 30.0)]
    fn timeout_is_clamped(#[case] distance: f64, #[case] expected: f64) {
        assert_eq!(timeout_for(distance, 1.0, 5.0, 5.0, 30.0), expected);
    }

    #[test]
    fn inverted_limits_do_not_panic() {
        assert_eq!(timeout_for(1.0, 1.0, 0.0, 10.0, 2.0), 2.0);
    }

    fn setup(yaml: &str) -> (Arc<Bus>, Arc<ManualClock>, Arc<NavigationMain>) {
        let bus = Arc::new(Bus::new());
        let clock = Arc::new(ManualClock::new(100.0));
        let store = ParamStore::from_yaml_str(yaml).unwrap();
        let main = NavigationMain::new(
            Node::new(&bus, "navigation_main"),
            store.namespace("navigation_main"),
            Arc::clone(&clock) as Arc<dyn Clock>,
        )
        .unwrap();
        (bus, clock, main)
    }

    fn goal(x: f64, y: f64) -> PoseStamped {
        PoseStamped::new("map", 0.0, Pose2D::new(x, y, 0.0))
    }

    #[tokio::test]
    async fn reached_mission_reports_true() {
        let (bus, clock, main) = setup("navigation_main: {}\n");
        let (tx, mut rx) = mpsc::unbounded_channel();
        let listener = Node::new(&bus, "listener");
        let _sub = listener
            .create_subscription("is_mission_finished", move |msg: Bool| {
                let _ = tx.send(msg.data);
            })
            .unwrap();

        main.on_main_mission(goal(3.0, 4.0));
        assert!(main.mission_running());
        assert_eq!(main.current_timeout(), 10.0);

        clock.advance(2.0);
        assert_eq!(main.step(clock.now()), None);

        main.on_robot_mission_state(Bool { data: true });
        assert_eq!(main.step(clock.now()), Some(MissionOutcome::Reached));
        assert!(!main.mission_running());
        assert_eq!(main.step(clock.now()), None);

        let reported = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap();
        assert_eq!(reported, Some(true));
    }

    #[tokio::test]
    async fn mission_times_out() {
        let (_bus, clock, main) = setup("navigation_main:\n  timeout_b: 0.0\n  timeout_min: 1.0\n");
        main.on_odom(Odometry::default());
        main.on_main_mission(goal(2.0, 0.0));
        assert_eq!(main.current_timeout(), 2.0);

        clock.advance(2.0);
        assert_eq!(main.step(clock.now()), None);
        clock.advance(0.1);
        assert_eq!(main.step(clock.now()), Some(MissionOutcome::TimedOut));
    }

    #[tokio::test]
    async fn robot_state_before_mission_is_ignored() {
        let (_bus, clock, main) = setup("navigation_main: {}\n");
        main.on_robot_mission_state(Bool { data: true });
        main.on_main_mission(goal(1.0, 0.0));
        assert_eq!(main.step(clock.now()), None);
    }

    #[tokio::test]
    async fn goal_is_forwarded_to_robot() {
        let (bus, _clock, main) = setup("navigation_main:\n  robot_goal_topic: dock_goal\n");
        let (tx, mut rx) = mpsc::unbounded_channel();
        let listener = Node::new(&bus, "listener");
        let _sub = listener
            .create_subscription("dock_goal", move |msg: PoseStamped| {
                let _ = tx.send(msg);
            })
            .unwrap();

        let mission_pub = listener.create_publisher::<PoseStamped>("mission").unwrap();
        mission_pub.publish(goal(1.5, -0.5));

        let forwarded = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(forwarded.pose.position.x, 1.5);
        assert!(main.mission_running());
    }

    #[tokio::test]
    async fn dynamic_params_respect_switch() {
        let update = DynamicParams {
            publish: false,
            timeout_a: 2.0,
            timeout_b: 1.0,
            timeout_min: 0.0,
            timeout_max: 100.0,
        };

        let (_bus, _clock, main) = setup("navigation_main: {}\n");
        assert!(main.on_dynamic_param(update));
        main.on_main_mission(goal(3.0, 4.0));
        assert_eq!(main.current_timeout(), 11.0);
        assert!(!main.config().publish);

        let (_bus, _clock, main) =
            setup("navigation_main:\n  use_dynamic_reconfigure: false\n");
        assert!(!main.on_dynamic_param(update));
        assert_eq!(main.config().timeout_a, 1.0);
    }

    #[tokio::test]
    async fn update_params_unwires_when_deactivated() {
        let (_bus, _clock, main) = setup("navigation_main: {}\n");
        assert!(main.is_wired());
        main.params.store().set("navigation_main", "active", false).unwrap();
        assert!(main.update_params());
        assert!(!main.is_wired());
        assert!(!main.config().active);
    }

    #[tokio::test(start_paused = true)]
    async fn run_returns_on_shutdown() {
        let (_bus, _clock, main) = setup("navigation_main: {}\n");
        let (tx, rx) = watch::channel(false);
        let task = tokio::spawn(Arc::clone(&main).run(rx));
        tokio::time::sleep(Duration::from_millis(350)).await;
        tx.send(true).unwrap();
        task.await.unwrap().unwrap();
        assert!(!main.is_wired());
    }
}
