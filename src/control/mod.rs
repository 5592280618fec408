//! Docking tracker node
pub mod dock_tracker;
pub mod profile;

use self::dock_tracker::{ControllerConfig, DockApproachController};
use crate::common::Clock;
use crate::config::ParamNamespace;
use crate::error::{NavError, Result};
use crate::lifecycle::{LifecycleNode, LifecycleNodeBase, State};
use crate::transport::msgs::{Bool, Odometry, PoseStamped, Twist};
use crate::transport::{Node, Publisher, Subscription};
use log::{error, info, warn};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Topic names used by the tracker
#[derive(Debug, Clone)]
pub struct DockTopics {
    pub goal: String,
    pub odom: String,
    pub cmd_vel: String,
    /// Latched `true` when an attempt finishes
    pub finished: String,
}

impl Default for DockTopics {
    fn default() -> Self {
        DockTopics {
            goal: "dock_goal".to_string(),
            odom: "odom".to_string(),
            cmd_vel: "cmd_vel".to_string(),
            finished: "dock_finished".to_string(),
        }
    }
}

impl DockTopics {
    pub fn fetch(params: &ParamNamespace) -> Self {
        let defaults = DockTopics::default();
        DockTopics {
            goal: params.param("goal_topic", defaults.goal).0,
            odom: params.param("odom_topic", defaults.odom).0,
            cmd_vel: params.param("cmd_vel_topic", defaults.cmd_vel).0,
            finished: params.param("finished_topic", defaults.finished).0,
        }
    }
}

/// Subscriptions and publishers that exist only while the tracker is active
struct Wiring {
    goal_subscription: Arc<Subscription>,
    pose_subscription: Arc<Subscription>,
    cmd_vel_publisher: Arc<Publisher<Twist>>,
    finished_publisher: Arc<Publisher<Bool>>,
}

impl Wiring {
    fn shutdown(self) {
        self.goal_subscription.shutdown();
        self.pose_subscription.shutdown();
    }
}

/// Node wrapping [`DockApproachController`] with its timer and topics
pub struct DockTracker {
    base: LifecycleNodeBase,
    this: Weak<DockTracker>,
    node: Arc<Node>,
    params: ParamNamespace,
    topics: DockTopics,
    clock: Arc<dyn Clock>,
    controller: Arc<Mutex<DockApproachController>>,
    wiring: Mutex<Option<Wiring>>,
    timer: Mutex<Option<(f64, JoinHandle<()>)>>,
}

impl DockTracker {
    pub fn new(node: Arc<Node>, params: ParamNamespace, clock: Arc<dyn Clock>) -> Arc<Self> {
        let topics = DockTopics::fetch(&params);
        let config = ControllerConfig {
            active: false,
            ..ControllerConfig::default()
        };

        Arc::new_cyclic(|this| DockTracker {
            base: LifecycleNodeBase::new(node.name()),
            this: this.clone(),
            node,
            params,
            topics,
            clock,
            controller: Arc::new(Mutex::new(DockApproachController::new(config))),
            wiring: Mutex::new(None),
            timer: Mutex::new(None),
        })
    }

    /// Shared handle to the controller, e.g. for status reporting
    pub fn controller(&self) -> Arc<Mutex<DockApproachController>> {
        Arc::clone(&self.controller)
    }

    pub fn topics(&self) -> &DockTopics {
        &self.topics
    }

    /// True while subscriptions and the command publisher exist
    pub fn is_wired(&self) -> bool {
        lock(&self.wiring).is_some()
    }

    /// Re-read parameters and apply them between two ticks.
    ///
    /// Wires or unwires the topics when `active` changes and restarts the
    /// timer when the control frequency changes. Problems are logged; the
    /// call itself always succeeds.
    pub fn initialize_params(&self) -> bool {
        let (config, ok) = ControllerConfig::fetch(&self.params);
        let want_active = config.active;
        let frequency = config.control_frequency;

        lock(&self.controller).set_config(config);

        let wired = self.is_wired();
        if want_active && !wired {
            match self.wire() {
                Ok(()) => {
                    lock(&self.controller).reset_time_reference(self.clock.now());
                    self.start_timer(frequency);
                }
                Err(e) => error!("[Dock Tracker]: Failed to activate: {}", e),
            }
        } else if !want_active && wired {
            self.unwire();
        } else if want_active && self.timer_frequency() != Some(frequency) {
            self.start_timer(frequency);
        }

        if ok {
            info!("[Dock Tracker]: Set params ok");
        } else {
            warn!("[Dock Tracker]: Set params failed");
        }
        true
    }

    fn wire(&self) -> Result<()> {
        let weak = self.this.clone();
        let goal_subscription = self.node.create_subscription::<PoseStamped, _>(
            &self.topics.goal,
            move |msg: PoseStamped| {
                if let Some(tracker) = weak.upgrade() {
                    tracker.goal_callback(msg);
                }
            },
        )?;

        let weak = self.this.clone();
        let pose_subscription = self.node.create_subscription::<Odometry, _>(
            &self.topics.odom,
            move |msg: Odometry| {
                if let Some(tracker) = weak.upgrade() {
                    tracker.pose_callback(msg);
                }
            },
        )?;

        let cmd_vel_publisher = self.node.create_publisher::<Twist>(&self.topics.cmd_vel)?;
        let finished_publisher = self.node.create_publisher::<Bool>(&self.topics.finished)?;

        *lock(&self.wiring) = Some(Wiring {
            goal_subscription,
            pose_subscription,
            cmd_vel_publisher,
            finished_publisher,
        });
        info!(
            "[Dock Tracker]: Listening on {} and {}, commanding {}",
            self.topics.goal, self.topics.odom, self.topics.cmd_vel
        );
        Ok(())
    }

    fn unwire(&self) {
        self.stop_timer();
        if let Some(wiring) = lock(&self.wiring).take() {
            wiring.shutdown();
            info!("[Dock Tracker]: Deactivated");
        }
    }

    fn timer_frequency(&self) -> Option<f64> {
        lock(&self.timer).as_ref().map(|(frequency, _)| *frequency)
    }

    fn start_timer(&self, frequency: f64) {
        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(e) => {
                error!("[Dock Tracker]: Cannot start control timer: {}", e);
                return;
            }
        };

        let weak = self.this.clone();
        let period = Duration::from_secs_f64(1.0 / frequency);
        let handle = runtime.spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                match weak.upgrade() {
                    Some(tracker) => tracker.timer_callback(),
                    None => break,
                }
            }
        });

        if let Some((_, old)) = lock(&self.timer).replace((frequency, handle)) {
            old.abort();
        }
    }

    fn stop_timer(&self) {
        if let Some((_, handle)) = lock(&self.timer).take() {
            handle.abort();
        }
    }

    fn goal_callback(&self, msg: PoseStamped) {
        let goal = msg.pose.to_pose2d();
        lock(&self.controller).on_goal_received(goal, self.clock.now());
    }

    fn pose_callback(&self, msg: Odometry) {
        let pose = msg.pose.pose.to_pose2d();
        lock(&self.controller).on_pose_updated(pose, self.clock.now());
    }

    /// One control period: tick under the lock, then publish
    pub fn timer_callback(&self) {
        let now = self.clock.now();
        let (command, docked) = {
            let mut controller = lock(&self.controller);
            let had_goal = controller.state().has_goal;
            let command = controller.tick(now);
            (command, had_goal && !controller.state().has_goal)
        };

        let Some(velocity) = command else { return };
        let wiring = lock(&self.wiring);
        if let Some(wiring) = wiring.as_ref() {
            wiring.cmd_vel_publisher.publish(Twist::from(velocity));
            if docked {
                wiring.finished_publisher.publish(Bool { data: true });
            }
        }
    }
}

impl Drop for DockTracker {
    fn drop(&mut self) {
        self.unwire();
    }
}

impl LifecycleNode for DockTracker {
    fn name(&self) -> &str {
        &self.base.name
    }

    fn on_configure(&self) -> Result<()> {
        let (config, _) = ControllerConfig::fetch(&self.params);
        info!(
            "[Dock Tracker]: Configuring (vmax={}, profile={}, tolerance={}, rate={}Hz)",
            config.linear_max_velocity,
            config.profile_percent,
            config.stop_tolerance,
            config.control_frequency
        );
        self.base.set_state(State::Inactive);
        Ok(())
    }

    fn on_activate(&self) -> Result<()> {
        if self.base.get_state() == State::Unconfigured {
            return Err(NavError::lifecycle(self.name(), "activated before configure"));
        }
        self.initialize_params();
        self.base.set_state(State::Active);
        Ok(())
    }

    fn on_deactivate(&self) -> Result<()> {
        self.unwire();
        self.base.set_state(State::Inactive);
        Ok(())
    }

    fn on_cleanup(&self) -> Result<()> {
        self.base.set_state(State::Unconfigured);
        Ok(())
    }

    fn state(&self) -> State {
        self.base.get_state()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::{ManualClock, Pose2D};
    use crate::config::ParamStore;
    use crate::transport::Bus;
    use tokio::sync::mpsc;

    fn tracker(yaml: &str, clock: Arc<ManualClock>) -> (Arc<Bus>, Arc<DockTracker>) {
        let bus = Arc::new(Bus::new());
        let store = ParamStore::from_yaml_str(yaml).unwrap();
        let tracker = DockTracker::new(
            Node::new(&bus, "dock_tracker"),
            store.namespace("dock_tracker"),
            clock,
        );
        (bus, tracker)
    }

    #[tokio::test]
    async fn inactive_param_leaves_topics_unwired() {
        let clock = Arc::new(ManualClock::new(0.0));
        let (_bus, tracker) = tracker("dock_tracker:\n  active: false\n", clock);
        assert!(tracker.initialize_params());
        assert!(!tracker.is_wired());
    }

    #[tokio::test]
    async fn activate_requires_configure() {
        let clock = Arc::new(ManualClock::new(0.0));
        let (_bus, tracker) = tracker("dock_tracker: {}\n", clock);
        assert!(tracker.on_activate().is_err());
        tracker.on_configure().unwrap();
        tracker.on_activate().unwrap();
        assert!(tracker.is_wired());
        assert_eq!(tracker.state(), State::Active);
        tracker.on_deactivate().unwrap();
        assert!(!tracker.is_wired());
    }

    #[tokio::test]
    async fn timer_callback_publishes_while_goal_is_active() {
        let clock = Arc::new(ManualClock::new(0.0));
        let (bus, tracker) = tracker(
            "dock_tracker:\n  control_frequency: 0.001\n",
            Arc::clone(&clock),
        );
        tracker.initialize_params();
        assert!(tracker.is_wired());

        let (tx, mut rx) = mpsc::unbounded_channel();
        let listener = Node::new(&bus, "listener");
        let _sub = listener
            .create_subscription::<Twist, _>("cmd_vel", move |msg| {
                let _ = tx.send(msg);
            })
            .unwrap();

        // No goal yet: nothing goes out
        tracker.timer_callback();

        {
            let controller = tracker.controller();
            let mut ctrl = lock(&controller);
            ctrl.on_pose_updated(Pose2D::new(0.0, 0.0, 0.0), 0.0);
            ctrl.on_goal_received(Pose2D::new(1.0, 0.0, 0.0), 0.0);
        }
        clock.set(0.1);
        tracker.timer_callback();

        let twist = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!((twist.linear.x - 0.0225).abs() < 1e-9);
        assert_eq!(twist.angular.z, 0.0);
    }

    #[tokio::test]
    async fn docking_publishes_finished_flag() {
        let clock = Arc::new(ManualClock::new(0.0));
        let (bus, tracker) = tracker(
            "dock_tracker:\n  control_frequency: 0.001\n",
            Arc::clone(&clock),
        );
        tracker.initialize_params();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let listener = Node::new(&bus, "listener");
        let _sub = listener
            .create_subscription::<Bool, _>("dock_finished", move |msg| {
                let _ = tx.send(msg.data);
            })
            .unwrap();

        {
            let controller = tracker.controller();
            let mut ctrl = lock(&controller);
            ctrl.on_pose_updated(Pose2D::new(0.999, 0.0, 0.0), 0.0);
            ctrl.on_goal_received(Pose2D::new(1.0, 0.0, 0.0), 0.0);
        }
        tracker.timer_callback();

        let finished = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap();
        assert_eq!(finished, Some(true));
        assert!(!lock(&tracker.controller()).state().has_goal);
    }
}
