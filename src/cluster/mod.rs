//! Cluster Adapters
//!
//! Implementations of the [`ClusterLister`](crate::domain::ports::ClusterLister)
//! and [`ClusterApi`](crate::domain::ports::ClusterApi) ports.

pub mod kubernetes;
#[cfg(test)]
pub mod memory;

pub use kubernetes::{KubeCluster, KubeListers};
