//! Runtime configuration for the presence server.
//!
//! The binary builds a [`ServerConfig`] from its command line arguments; tests
//! construct one directly. Clustering knobs live in [`ClusterConfig`] so the
//! clustering engine can be driven without any networking around it.

use shared::{EXIT_RADIUS, PROX_RADIUS};
use thiserror::Error;

/// How cluster ids are minted on each clustering pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClusterIdMode {
    /// `c1`, `c2`, ... numbered afresh on every pass. Every multi-member
    /// cluster is announced on every pass, even when its membership is unchanged.
    #[default]
    Sequential,
    /// Id derived from the membership set. A cluster is announced only when
    /// that exact membership did not exist on the previous pass.
    Stable,
}

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("proximity radius must be positive, got {0}")]
    InvalidProxRadius(f64),
    #[error("exit radius ({exit}) must not be smaller than the proximity radius ({prox})")]
    ExitBelowProx { prox: f64, exit: f64 },
    #[error("outbound queue capacity must be at least 1")]
    ZeroQueueCapacity,
}

/// Clustering parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterConfig {
    /// Distance within which a lone player can start a cluster.
    pub prox_radius: f64,
    /// Distance within which existing members keep or extend a cluster.
    pub exit_radius: f64,
    pub id_mode: ClusterIdMode,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            prox_radius: PROX_RADIUS,
            exit_radius: EXIT_RADIUS,
            id_mode: ClusterIdMode::Sequential,
        }
    }
}

impl ClusterConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.prox_radius.is_nan() || self.prox_radius <= 0.0 {
            return Err(ConfigError::InvalidProxRadius(self.prox_radius));
        }
        if self.exit_radius.is_nan() || self.exit_radius < self.prox_radius {
            return Err(ConfigError::ExitBelowProx {
                prox: self.prox_radius,
                exit: self.exit_radius,
            });
        }
        Ok(())
    }
}

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// `host:port` to listen on.
    pub bind_addr: String,
    /// Maximum number of simultaneously registered connections.
    pub max_clients: usize,
    /// Per-connection outbound queue length; frames beyond it are dropped.
    pub queue_capacity: usize,
    pub cluster: ClusterConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8080".to_string(),
            max_clients: 256,
            queue_capacity: 256,
            cluster: ClusterConfig::default(),
        }
    }
}

impl ServerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.queue_capacity == 0 {
            return Err(ConfigError::ZeroQueueCapacity);
        }
        self.cluster.validate()
    }
}
