//! Costmap for navigation
//!
//! A single occupancy grid plus the layers that paint into it. Layers keep
//! their own grid of the same geometry and copy it onto the master grid
//! during an update, in two passes: every layer first grows the region to
//! refresh (`update_bounds`), then every layer writes its costs.

use crate::common::Pose2D;
use crate::config::ParamNamespace;
use crate::error::{NavError, Result};
use std::sync::{Arc, Mutex, RwLock};

/// Cost values for different types of cells
pub mod cost_values {
    pub const NO_INFORMATION: u8 = 255;
    pub const LETHAL_OBSTACLE: u8 = 254;
    pub const INSCRIBED_INFLATED_OBSTACLE: u8 = 253;
    pub const FREE_SPACE: u8 = 0;
}

/// An occupancy grid
#[derive(Debug, Clone)]
pub struct Costmap {
    pub width: usize,
    pub height: usize,
    pub resolution: f64,
    pub origin_x: f64,
    pub origin_y: f64,
    pub data: Vec<u8>,
    default_value: u8,
}

impl Costmap {
    pub fn new(width: usize, height: usize, resolution: f64, origin_x: f64, origin_y: f64) -> Self {
        Self::with_default(
            width,
            height,
            resolution,
            origin_x,
            origin_y,
            cost_values::FREE_SPACE,
        )
    }

    pub fn with_default(
        width: usize,
        height: usize,
        resolution: f64,
        origin_x: f64,
        origin_y: f64,
        default_value: u8,
    ) -> Self {
        Costmap {
            width,
            height,
            resolution,
            origin_x,
            origin_y,
            data: vec![default_value; width * height],
            default_value,
        }
    }

    /// Configure the geometry from parameters; unset keys keep their value
    pub fn configure(&mut self, params: &ParamNamespace) -> Result<()> {
        let resolution = params.param("resolution", self.resolution).0;
        if resolution <= 0.0 {
            return Err(NavError::Config("Resolution must be positive".to_string()));
        }
        let width = params.param("width", self.width).0;
        if width == 0 {
            return Err(NavError::Config("Width must be positive".to_string()));
        }
        let height = params.param("height", self.height).0;
        if height == 0 {
            return Err(NavError::Config("Height must be positive".to_string()));
        }
        let origin_x = params.param("origin_x", self.origin_x).0;
        let origin_y = params.param("origin_y", self.origin_y).0;

        self.resize(width, height, resolution, origin_x, origin_y);
        Ok(())
    }

    /// Change the geometry and clear every cell
    pub fn resize(
        &mut self,
        width: usize,
        height: usize,
        resolution: f64,
        origin_x: f64,
        origin_y: f64,
    ) {
        self.width = width;
        self.height = height;
        self.resolution = resolution;
        self.origin_x = origin_x;
        self.origin_y = origin_y;
        self.data = vec![self.default_value; width * height];
    }

    /// Reset the cells in `[x0, xn) x [y0, yn)` to the default value
    pub fn reset_region(&mut self, x0: usize, y0: usize, xn: usize, yn: usize) {
        let xn = xn.min(self.width);
        let yn = yn.min(self.height);
        for y in y0..yn {
            let row = y * self.width;
            for x in x0.min(xn)..xn {
                self.data[row + x] = self.default_value;
            }
        }
    }

    /// Reset every cell touched by the world-frame `bounds`
    pub fn reset_bounds(&mut self, bounds: &Bounds) {
        if bounds.is_empty() {
            return;
        }
        let (x0, xn) = cell_span(bounds.min_x, bounds.max_x, self.origin_x, self.resolution, self.width);
        let (y0, yn) = cell_span(bounds.min_y, bounds.max_y, self.origin_y, self.resolution, self.height);
        self.reset_region(x0, y0, xn, yn);
    }

    /// Convert world coordinates to a cell, `None` when off the map
    pub fn world_to_map(&self, x: f64, y: f64) -> Option<(usize, usize)> {
        if !(x >= self.origin_x && y >= self.origin_y) {
            return None;
        }
        let mx = ((x - self.origin_x) / self.resolution) as usize;
        let my = ((y - self.origin_y) / self.resolution) as usize;
        (mx < self.width && my < self.height).then_some((mx, my))
    }

    /// Convert map coordinates to world coordinates (cell center)
    pub fn map_to_world(&self, mx: usize, my: usize) -> (f64, f64) {
        let x = self.origin_x + (mx as f64 + 0.5) * self.resolution;
        let y = self.origin_y + (my as f64 + 0.5) * self.resolution;
        (x, y)
    }

    pub fn cost(&self, mx: usize, my: usize) -> u8 {
        if mx < self.width && my < self.height {
            self.data[my * self.width + mx]
        } else {
            cost_values::NO_INFORMATION
        }
    }

    pub fn set_cost(&mut self, mx: usize, my: usize, cost: u8) {
        if mx < self.width && my < self.height {
            self.data[my * self.width + mx] = cost;
        }
    }

    /// Get the cost at a specific position in world coordinates
    pub fn get_cost(&self, x: f64, y: f64) -> u8 {
        match self.world_to_map(x, y) {
            Some((mx, my)) => self.cost(mx, my),
            None => cost_values::NO_INFORMATION,
        }
    }

    /// Check if a point is an obstacle
    pub fn is_obstacle(&self, x: f64, y: f64) -> bool {
        let cost = self.get_cost(x, y);
        cost != cost_values::NO_INFORMATION && cost >= cost_values::INSCRIBED_INFLATED_OBSTACLE
    }

    /// Copy every known cell of this grid in `[x0, xn) x [y0, yn)` onto
    /// `master`. Both grids must share a geometry.
    pub fn update_with_overwrite(
        &self,
        master: &mut Costmap,
        x0: usize,
        y0: usize,
        xn: usize,
        yn: usize,
    ) {
        let xn = xn.min(self.width).min(master.width);
        let yn = yn.min(self.height).min(master.height);
        for y in y0..yn {
            for x in x0.min(xn)..xn {
                let cost = self.data[y * self.width + x];
                if cost != cost_values::NO_INFORMATION {
                    master.data[y * master.width + x] = cost;
                }
            }
        }
    }

    pub fn count_cells(&self, cost: u8) -> usize {
        self.data.iter().filter(|&&c| c == cost).count()
    }
}

/// Half-open cell range covering `[min, max]` along one axis, clamped to
/// the grid
fn cell_span(min: f64, max: f64, origin: f64, resolution: f64, limit: usize) -> (usize, usize) {
    let lo = ((min - origin) / resolution).floor().max(0.0);
    let hi = (((max - origin) / resolution).floor() + 1.0).min(limit as f64);
    if hi > lo {
        (lo as usize, hi as usize)
    } else {
        (0, 0)
    }
}

/// World-frame rectangle a layer update touches
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl Bounds {
    /// Bounds that contain nothing; expanding them yields the added point
    pub fn empty() -> Self {
        Bounds {
            min_x: f64::INFINITY,
            min_y: f64::INFINITY,
            max_x: f64::NEG_INFINITY,
            max_y: f64::NEG_INFINITY,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.min_x > self.max_x || self.min_y > self.max_y
    }

    pub fn expand(&mut self, x: f64, y: f64) {
        self.min_x = self.min_x.min(x);
        self.min_y = self.min_y.min(y);
        self.max_x = self.max_x.max(x);
        self.max_y = self.max_y.max(y);
    }

    pub fn merge(&mut self, other: &Bounds) {
        if !other.is_empty() {
            self.expand(other.min_x, other.min_y);
            self.expand(other.max_x, other.max_y);
        }
    }

    pub fn pad(&mut self, margin: f64) {
        self.min_x -= margin;
        self.min_y -= margin;
        self.max_x += margin;
        self.max_y += margin;
    }
}

/// A plugin that contributes costs to the master grid
pub trait CostmapLayer: Send {
    fn name(&self) -> &str;

    /// Adopt the geometry of the master grid
    fn match_size(&mut self, master: &Costmap);

    /// Grow `bounds` to cover whatever this layer wants to refresh
    fn update_bounds(&mut self, now: f64, robot: Pose2D, bounds: &mut Bounds);

    /// Write this layer's costs into `master`
    fn update_costs(&mut self, master: &mut Costmap, bounds: &Bounds);

    fn set_enabled(&mut self, enabled: bool);

    fn is_enabled(&self) -> bool;
}

/// Owns the master grid and runs the layers over it
pub struct CostmapManager {
    master: Arc<RwLock<Costmap>>,
    layers: Mutex<Vec<Box<dyn CostmapLayer>>>,
}

impl CostmapManager {
    pub fn new(master: Costmap) -> Self {
        CostmapManager {
            master: Arc::new(RwLock::new(master)),
            layers: Mutex::new(Vec::new()),
        }
    }

    /// Get a reference to the master costmap
    pub fn master(&self) -> Arc<RwLock<Costmap>> {
        Arc::clone(&self.master)
    }

    pub fn add_layer(&self, mut layer: Box<dyn CostmapLayer>) -> Result<()> {
        {
            let master = self
                .master
                .read()
                .map_err(|_| NavError::Config("Failed to lock costmap".to_string()))?;
            layer.match_size(&master);
        }
        self.layers
            .lock()
            .map_err(|_| NavError::Config("Failed to lock costmap layers".to_string()))?
            .push(layer);
        Ok(())
    }

    /// Enable or disable a layer by name; false when no layer matches
    pub fn set_layer_enabled(&self, name: &str, enabled: bool) -> bool {
        let mut layers = self.layers.lock().unwrap_or_else(|e| e.into_inner());
        match layers.iter_mut().find(|layer| layer.name() == name) {
            Some(layer) => {
                layer.set_enabled(enabled);
                true
            }
            None => false,
        }
    }

    /// Run one update over every layer and return the refreshed bounds
    pub fn update_map(&self, now: f64, robot: Pose2D) -> Result<Bounds> {
        let mut layers = self
            .layers
            .lock()
            .map_err(|_| NavError::Config("Failed to lock costmap layers".to_string()))?;

        let mut bounds = Bounds::empty();
        for layer in layers.iter_mut() {
            layer.update_bounds(now, robot, &mut bounds);
        }

        let mut master = self
            .master
            .write()
            .map_err(|_| NavError::Config("Failed to lock costmap".to_string()))?;
        master.reset_bounds(&bounds);
        for layer in layers.iter_mut() {
            layer.update_costs(&mut master, &bounds);
        }
        Ok(bounds)
    }

    /// Check if a point is an obstacle on the master grid
    pub fn is_obstacle(&self, x: f64, y: f64) -> Result<bool> {
        let master = self
            .master
            .read()
            .map_err(|_| NavError::Config("Failed to lock costmap".to_string()))?;
        Ok(master.is_obstacle(x, y))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ParamStore;

    #[test]
    fn world_to_map_rejects_points_off_the_grid() {
        let map = Costmap::new(10, 5, 0.1, -0.5, 0.0);
        assert_eq!(map.world_to_map(-0.5, 0.0), Some((0, 0)));
        assert_eq!(map.world_to_map(0.44, 0.44), Some((9, 4)));
        assert_eq!(map.world_to_map(-0.51, 0.2), None);
        assert_eq!(map.world_to_map(0.51, 0.2), None);
        assert_eq!(map.world_to_map(0.0, 0.51), None);
        assert_eq!(map.world_to_map(f64::NAN, 0.0), None);
    }

    #[test]
    fn map_to_world_returns_cell_center() {
        let map = Costmap::new(10, 10, 0.5, 1.0, 2.0);
        assert_eq!(map.map_to_world(0, 0), (1.25, 2.25));
        assert_eq!(map.world_to_map(1.25, 2.25), Some((0, 0)));
    }

    #[test]
    fn overwrite_skips_unknown_cells() {
        let mut layer =
            Costmap::with_default(4, 4, 1.0, 0.0, 0.0, cost_values::NO_INFORMATION);
        layer.set_cost(1, 2, cost_values::LETHAL_OBSTACLE);
        let mut master = Costmap::new(4, 4, 1.0, 0.0, 0.0);
        master.set_cost(3, 3, 100);

        layer.update_with_overwrite(&mut master, 0, 0, 4, 4);
        assert_eq!(master.cost(1, 2), cost_values::LETHAL_OBSTACLE);
        assert_eq!(master.cost(3, 3), 100);
        assert_eq!(master.count_cells(cost_values::LETHAL_OBSTACLE), 1);
        assert!(master.is_obstacle(1.5, 2.5));
    }

    #[test]
    fn reset_region_is_clamped() {
        let mut map = Costmap::new(3, 3, 1.0, 0.0, 0.0);
        map.data.iter_mut().for_each(|c| *c = 7);
        map.reset_region(1, 1, 10, 10);
        assert_eq!(map.cost(0, 0), 7);
        assert_eq!(map.cost(2, 2), cost_values::FREE_SPACE);
        assert_eq!(map.count_cells(7), 5);
    }

    #[test]
    fn reset_bounds_clears_only_covered_cells() {
        let mut map = Costmap::new(10, 10, 0.5, -1.0, -1.0);
        map.data.iter_mut().for_each(|c| *c = cost_values::LETHAL_OBSTACLE);

        let mut bounds = Bounds::empty();
        bounds.expand(-0.9, -0.9);
        bounds.expand(0.1, 0.1);
        map.reset_bounds(&bounds);
        assert_eq!(map.cost(0, 0), cost_values::FREE_SPACE);
        assert_eq!(map.cost(2, 2), cost_values::FREE_SPACE);
        assert_eq!(map.cost(3, 3), cost_values::LETHAL_OBSTACLE);
        assert_eq!(map.count_cells(cost_values::FREE_SPACE), 9);

        let mut off_map = Bounds::empty();
        off_map.expand(-20.0, -20.0);
        off_map.expand(-10.0, -10.0);
        map.reset_bounds(&off_map);
        map.reset_bounds(&Bounds::empty());
        assert_eq!(map.count_cells(cost_values::FREE_SPACE), 9);

        let mut everything = Bounds::empty();
        everything.expand(-50.0, -50.0);
        everything.expand(50.0, 50.0);
        map.reset_bounds(&everything);
        assert_eq!(map.count_cells(cost_values::FREE_SPACE), 100);
    }

    #[test]
    fn configure_validates_geometry() {
        let store = ParamStore::from_yaml_str(
            "costmap:\n  width: 20\n  height: 10\n  resolution: 0.25\n  origin_x: -1.0\n",
        )
        .unwrap();
        let mut map = Costmap::new(1, 1, 1.0, 0.0, 0.0);
        map.configure(&store.namespace("costmap")).unwrap();
        assert_eq!((map.width, map.height), (20, 10));
        assert_eq!(map.data.len(), 200);
        assert_eq!(map.origin_x, -1.0);

        store.set("costmap", "resolution", 0.0).unwrap();
        assert!(map.configure(&store.namespace("costmap")).is_err());
    }

    #[test]
    fn bounds_expand_and_pad() {
        let mut bounds = Bounds::empty();
        assert!(bounds.is_empty());
        bounds.expand(1.0, -2.0);
        bounds.expand(-1.0, 0.5);
        bounds.pad(3.0);
        assert_eq!(
            bounds,
            Bounds {
                min_x: -4.0,
                min_y: -5.0,
                max_x: 4.0,
                max_y: 3.5
            }
        );
    }
}
