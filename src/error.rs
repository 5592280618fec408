//! Error types shared by every node in the crate

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by the navigation nodes and their plumbing
#[derive(Debug, Error)]
pub enum NavError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("parameter `{key}` could not be read: {reason}")]
    Param { key: String, reason: String },

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse parameters: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("transport error on `{topic}`: {reason}")]
    Transport { topic: String, reason: String },

    #[error("lifecycle error in {node}: {reason}")]
    Lifecycle { node: String, reason: String },
}

impl NavError {
    pub(crate) fn transport(topic: &str, reason: impl Into<String>) -> Self {
        NavError::Transport {
            topic: topic.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn lifecycle(node: &str, reason: impl Into<String>) -> Self {
        NavError::Lifecycle {
            node: node.to_string(),
            reason: reason.into(),
        }
    }
}

pub type Result<T, E = NavError> = std::result::Result<T, E>;
