use anyhow::{Context, Result};
use clap::Parser;
use dockbot_core::common::{Clock, MonotonicClock, Pose2D};
use dockbot_core::config::ParamStore;
use dockbot_core::control::DockTracker;
use dockbot_core::mission::supervisor::run_supervised;
use dockbot_core::mission::{NavigationMain, NavigationMainConfig};
use dockbot_core::navigation::{Costmap, CostmapManager, RivalPathLayer};
use dockbot_core::sim::{SimConfig, SimulatedBase};
use dockbot_core::transport::msgs::{Bool, Odometry, PoseStamped};
use dockbot_core::transport::{Bus, Node};
use dockbot_core::DockbotCore;
use log::{error, info, warn};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch};

#[derive(Parser, Debug)]
#[command(name = "hub", about = "Run the docking stack against a simulated base")]
struct Args {
    /// Parameter file
    #[arg(long, default_value = "config/hub.yaml")]
    config: PathBuf,

    /// Send a docking mission to this x coordinate on startup
    #[arg(long)]
    dock_x: Option<f64>,

    #[arg(long, default_value_t = 0.0)]
    dock_y: f64,

    #[arg(long, default_value_t = 0.0)]
    dock_yaw: f64,

    /// Exit once the first mission reports its outcome
    #[arg(long)]
    exit_on_finish: bool,
}

type MissionSlot = Arc<Mutex<Option<Arc<NavigationMain>>>>;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let store = ParamStore::from_file(&args.config)
        .with_context(|| format!("failed to load {}", args.config.display()))?;
    let bus = Arc::new(Bus::new());
    let clock: Arc<dyn Clock> = Arc::new(MonotonicClock::new());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let sim = SimulatedBase::new(
        &Node::new(&bus, "sim"),
        SimConfig::fetch(&store.namespace("sim")),
        Arc::clone(&clock),
    )
    .context("failed to start the simulated base")?;
    let sim_task = tokio::spawn(sim.run(shutdown_rx.clone()));

    let tracker = DockTracker::new(
        Node::new(&bus, "dock_tracker"),
        store.namespace("dock_tracker"),
        Arc::clone(&clock),
    );
    let mut core = DockbotCore::new();
    core.register(Arc::clone(&tracker));
    core.init().context("failed to bring up the dock tracker")?;

    let costmap = start_costmap(&bus, &store, &clock, shutdown_rx.clone())?;

    let mission_slot: MissionSlot = Arc::new(Mutex::new(None));
    let supervisor = {
        let bus = Arc::clone(&bus);
        let store = Arc::clone(&store);
        let clock = Arc::clone(&clock);
        let slot = Arc::clone(&mission_slot);
        let shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            run_supervised(
                "navigation_main",
                shutdown.clone(),
                Duration::from_secs(1),
                move || {
                    let node = Node::new(&bus, "navigation_main");
                    let params = store.namespace("navigation_main");
                    let clock = Arc::clone(&clock);
                    let slot = Arc::clone(&slot);
                    let shutdown = shutdown.clone();
                    async move {
                        let main = NavigationMain::new(node, params, clock)
                            .context("failed to start navigation_main")?;
                        *slot.lock().unwrap_or_else(|e| e.into_inner()) = Some(Arc::clone(&main));
                        main.run(shutdown).await?;
                        Ok(())
                    }
                },
            )
            .await
        })
    };

    let (mission_config, _) = NavigationMainConfig::fetch(&store.namespace("navigation_main"));
    let hub = Node::new(&bus, "hub");
    let (finished_tx, mut finished_rx) = mpsc::unbounded_channel();
    let _finished_sub = hub.create_subscription(
        &mission_config.main_mission_state_topic,
        move |msg: Bool| {
            let _ = finished_tx.send(msg.data);
        },
    )?;

    if let Some(x) = args.dock_x {
        let mission = hub.create_publisher::<PoseStamped>(&mission_config.main_mission_topic)?;
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while mission.subscriber_count() == 0 {
            if tokio::time::Instant::now() > deadline {
                anyhow::bail!("nobody is listening on {}", mission.topic());
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let goal = Pose2D::new(x, args.dock_y, args.dock_yaw);
        info!("[hub]: Sending dock mission to ({:.3}, {:.3}, {:.3})", goal.x, goal.y, goal.yaw);
        mission.publish(PoseStamped::new("map", clock.now(), goal));
    }

    let mut hangup = Hangup::new()?;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("[hub]: Interrupted");
                break;
            }
            _ = hangup.recv() => {
                info!("[hub]: Reloading {}", args.config.display());
                if let Err(e) = store.reload() {
                    warn!("[hub]: Reload failed, keeping current parameters: {}", e);
                    continue;
                }
                tracker.initialize_params();
                if let Some(main) = mission_slot.lock().unwrap_or_else(|e| e.into_inner()).as_ref() {
                    main.update_params();
                }
                let enabled = store.namespace("path_layer").param("enabled", true).0;
                costmap.set_layer_enabled("path_layer", enabled);
            }
            Some(reached) = finished_rx.recv() => {
                if reached {
                    info!("[hub]: Mission finished, dock reached");
                } else {
                    warn!("[hub]: Mission finished, timed out");
                }
                if args.exit_on_finish {
                    break;
                }
            }
        }
    }

    let _ = shutdown_tx.send(true);
    core.shutdown().context("failed to shut down the dock tracker")?;
    let restarts = supervisor.await.context("supervisor task failed")?;
    if restarts > 0 {
        warn!("[hub]: navigation_main was restarted {} times", restarts);
    }
    if let Err(e) = sim_task.await.context("sim task failed")? {
        error!("[hub]: Simulated base stopped with an error: {}", e);
    }
    Ok(())
}

/// Build the costmap with the rival path layer and keep it updated
fn start_costmap(
    bus: &Arc<Bus>,
    store: &Arc<ParamStore>,
    clock: &Arc<dyn Clock>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<Arc<CostmapManager>> {
    let mut master = Costmap::new(100, 100, 0.05, -2.5, -2.5);
    master.configure(&store.namespace("costmap"))?;
    let manager = Arc::new(CostmapManager::new(master));

    let node = Node::new(bus, "costmap");
    let layer = RivalPathLayer::on_initialize(
        "path_layer",
        &node,
        &store.namespace("path_layer"),
        Arc::clone(clock),
    )?;
    let period = Duration::from_secs_f64(1.0 / layer.config().update_frequency.max(0.1));
    manager.add_layer(Box::new(layer))?;

    let robot = Arc::new(Mutex::new(Pose2D::default()));
    let latest = Arc::clone(&robot);
    let odom = node.create_subscription("odom", move |msg: Odometry| {
        *latest.lock().unwrap_or_else(|e| e.into_inner()) = msg.pose.pose.to_pose2d();
    })?;

    let updater = Arc::clone(&manager);
    let clock = Arc::clone(clock);
    tokio::spawn(async move {
        let _odom = odom;
        let mut interval = tokio::time::interval(period);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let pose = *robot.lock().unwrap_or_else(|e| e.into_inner());
                    if let Err(e) = updater.update_map(clock.now(), pose) {
                        error!("[costmap]: Update failed: {}", e);
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    });
    Ok(manager)
}

#[cfg(unix)]
struct Hangup(tokio::signal::unix::Signal);

#[cfg(unix)]
impl Hangup {
    fn new() -> Result<Self> {
        use tokio::signal::unix::{signal, SignalKind};
        Ok(Hangup(
            signal(SignalKind::hangup()).context("failed to install SIGHUP handler")?,
        ))
    }

    async fn recv(&mut self) {
        if self.0.recv().await.is_none() {
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
struct Hangup;

#[cfg(not(unix))]
impl Hangup {
    fn new() -> Result<Self> {
        Ok(Hangup)
    }

    async fn recv(&mut self) {
        std::future::pending::<()>().await;
    }
}
