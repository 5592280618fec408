//! Costmap and its layers
pub mod costmap;
pub mod path_layer;

pub use self::costmap::{Bounds, Costmap, CostmapLayer, CostmapManager};
pub use self::path_layer::{PathLayerConfig, RivalPathLayer};
