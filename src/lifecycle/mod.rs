//! Lifecycle management for the nodes

use crate::error::Result;
use std::sync::RwLock;

/// Trait for components that follow a lifecycle pattern.
///
/// Nodes are shared behind `Arc` with their callbacks, so transitions
/// take `&self` and use interior mutability.
pub trait LifecycleNode: Send + Sync {
    fn name(&self) -> &str;

    /// Configure the node
    fn on_configure(&self) -> Result<()>;

    /// Activate the node
    fn on_activate(&self) -> Result<()>;

    /// Deactivate the node
    fn on_deactivate(&self) -> Result<()>;

    /// Clean up the node
    fn on_cleanup(&self) -> Result<()>;

    fn state(&self) -> State;
}

/// Base implementation for lifecycle nodes
#[derive(Debug)]
pub struct LifecycleNodeBase {
    pub name: String,
    state: RwLock<State>,
}

/// State of a lifecycle node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Unconfigured,
    Inactive,
    Active,
}

impl LifecycleNodeBase {
    pub fn new(name: &str) -> Self {
        LifecycleNodeBase {
            name: name.to_string(),
            state: RwLock::new(State::Unconfigured),
        }
    }

    /// Get the current state
    pub fn get_state(&self) -> State {
        *self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    /// Set the state
    pub fn set_state(&self, state: State) {
        *self.state.write().unwrap_or_else(|e| e.into_inner()) = state;
    }
}
