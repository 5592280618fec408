pub mod common;
pub mod config;
pub mod control;
pub mod error;
pub mod lifecycle;
pub mod mission;
pub mod navigation;
pub mod sim;
pub mod transport;

use crate::error::Result;
use crate::lifecycle::LifecycleNode;
use log::info;
use std::sync::Arc;

/// Core functionality for the docking robot
#[derive(Default)]
pub struct DockbotCore {
    components: Vec<Arc<dyn LifecycleNode>>,
}

impl DockbotCore {
    /// Create a new instance of DockbotCore
    pub fn new() -> Self {
        DockbotCore {
            components: Vec::new(),
        }
    }

    /// Register a component with the core
    pub fn register<T: LifecycleNode + 'static>(&mut self, component: Arc<T>) {
        self.components.push(component);
    }

    /// Configure then activate all registered components
    pub fn init(&self) -> Result<()> {
        for component in &self.components {
            component.on_configure()?;
            component.on_activate()?;
            info!("[core]: {} is {:?}", component.name(), component.state());
        }
        Ok(())
    }

    /// Deactivate then clean up all registered components, last first
    pub fn shutdown(&self) -> Result<()> {
        for component in self.components.iter().rev() {
            component.on_deactivate()?;
            component.on_cleanup()?;
        }
        Ok(())
    }

    /// Look up a registered component by name
    pub fn component(&self, name: &str) -> Option<&Arc<dyn LifecycleNode>> {
        self.components.iter().find(|c| c.name() == name)
    }
}
