//! Costmap layer marking the rival robot's predicted path as lethal

use super::costmap::{cost_values, Bounds, Costmap, CostmapLayer};
use crate::common::{Clock, Pose2D};
use crate::config::ParamNamespace;
use crate::error::Result;
use crate::transport::msgs::Path;
use crate::transport::{Node, Subscription};
use log::{debug, info};
use std::sync::{Arc, Mutex};

/// Margin added around the marked poses, in meters
pub const BOUNDS_PADDING: f64 = 3.0;

#[derive(Debug, Clone, PartialEq)]
pub struct PathLayerConfig {
    pub update_frequency: f64,
    pub enabled: bool,
    /// Seconds after which a received path is ignored
    pub rival_path_timeout: f64,
    /// Number of leading path poses to mark
    pub rival_predict_length: usize,
    pub rival_path_topic: String,
}

impl Default for PathLayerConfig {
    fn default() -> Self {
        PathLayerConfig {
            update_frequency: 10.0,
            enabled: true,
            rival_path_timeout: 1.0,
            rival_predict_length: 1,
            rival_path_topic: "RivalPath".to_string(),
        }
    }
}

impl PathLayerConfig {
    pub fn fetch(params: &ParamNamespace) -> Self {
        let defaults = PathLayerConfig::default();
        PathLayerConfig {
            update_frequency: params.param("update_frequency", defaults.update_frequency).0,
            enabled: params.param("enabled", defaults.enabled).0,
            rival_path_timeout: params
                .param("rival_path_timeout", defaults.rival_path_timeout)
                .0,
            rival_predict_length: params
                .param("rival_predict_length", defaults.rival_predict_length)
                .0,
            rival_path_topic: params.param("rival_path_topic", defaults.rival_path_topic).0,
        }
    }
}

/// Latest rival path and when it arrived
#[derive(Debug, Default)]
struct RivalPathState {
    path: Option<Path>,
    received_at: f64,
}

pub struct RivalPathLayer {
    name: String,
    config: PathLayerConfig,
    grid: Costmap,
    state: Arc<Mutex<RivalPathState>>,
    /// Padded region painted by the last update, cleared by the next one
    marked: Option<Bounds>,
    subscription: Option<Arc<Subscription>>,
}

impl RivalPathLayer {
    pub fn new(name: &str, config: PathLayerConfig) -> Self {
        RivalPathLayer {
            name: name.to_string(),
            config,
            grid: Costmap::with_default(0, 0, 1.0, 0.0, 0.0, cost_values::NO_INFORMATION),
            state: Arc::new(Mutex::new(RivalPathState::default())),
            marked: None,
            subscription: None,
        }
    }

    /// Read parameters and subscribe to the rival path topic
    pub fn on_initialize(
        name: &str,
        node: &Node,
        params: &ParamNamespace,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let mut layer = RivalPathLayer::new(name, PathLayerConfig::fetch(params));
        let state = Arc::clone(&layer.state);
        let subscription =
            node.create_subscription(&layer.config.rival_path_topic, move |path: Path| {
                store_path(&state, path, clock.now());
            })?;
        info!(
            "[{}]: Listening for rival paths on `{}`",
            layer.name, layer.config.rival_path_topic
        );
        layer.subscription = Some(subscription);
        Ok(layer)
    }

    pub fn config(&self) -> &PathLayerConfig {
        &self.config
    }

    /// Record a received path
    pub fn on_rival_path(&self, path: Path, now: f64) {
        store_path(&self.state, path, now);
    }

    /// Whether a path is currently held
    pub fn has_rival_path(&self) -> bool {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .path
            .is_some()
    }

    pub fn grid(&self) -> &Costmap {
        &self.grid
    }
}

fn store_path(state: &Mutex<RivalPathState>, path: Path, now: f64) {
    let mut state = state.lock().unwrap_or_else(|e| e.into_inner());
    state.path = Some(path);
    state.received_at = now;
}

impl CostmapLayer for RivalPathLayer {
    fn name(&self) -> &str {
        &self.name
    }

    fn match_size(&mut self, master: &Costmap) {
        self.grid.resize(
            master.width,
            master.height,
            master.resolution,
            master.origin_x,
            master.origin_y,
        );
    }

    fn update_bounds(&mut self, now: f64, _robot: Pose2D, bounds: &mut Bounds) {
        if let Some(previous) = self.marked.take() {
            bounds.merge(&previous);
        }
        self.grid.reset_region(0, 0, self.grid.width, self.grid.height);
        if !self.config.enabled {
            return;
        }
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if state.path.is_some() && now - state.received_at > self.config.rival_path_timeout {
            debug!("[{}]: Rival path is stale", self.name);
            state.path = None;
        }
        let Some(path) = state.path.as_ref() else {
            return;
        };

        let mut touched = Bounds::empty();
        for stamped in path.poses.iter().take(self.config.rival_predict_length) {
            let x = stamped.pose.position.x;
            let y = stamped.pose.position.y;
            if let Some((mx, my)) = self.grid.world_to_map(x, y) {
                touched.expand(x, y);
                self.grid.set_cost(mx, my, cost_values::LETHAL_OBSTACLE);
            }
        }
        if touched.is_empty() {
            return;
        }

        touched.pad(BOUNDS_PADDING);
        bounds.merge(&touched);
        self.marked = Some(touched);
    }

    fn update_costs(&mut self, master: &mut Costmap, _bounds: &Bounds) {
        if !self.config.enabled || !self.has_rival_path() {
            return;
        }
        self.grid
            .update_with_overwrite(master, 0, 0, self.grid.width, self.grid.height);
    }

    fn set_enabled(&mut self, enabled: bool) {
        self.config.enabled = enabled;
    }

    fn is_enabled(&self) -> bool {
        self.config.enabled
    }
}
