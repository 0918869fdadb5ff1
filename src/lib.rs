//! Hybrid CSI Provisioner
//!
//! A Kubernetes provisioner that serves "hybrid" StorageClasses by
//! delegating each claim to the first backing StorageClass usable from the
//! node the workload was scheduled to.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                          Claim Controller                             │
//! │        (watches claims, selected-node annotation, backoff)            │
//! ├──────────────────────────────────────────────────────────────────────┤
//! │                         Hybrid Provisioner                            │
//! │  ┌────────────────┐  ┌──────────────────┐  ┌──────────────────────┐  │
//! │  │   Selection    │  │   Proxy claim /  │  │  Release + rebind    │  │
//! │  │  (topology)    │  │  placeholder pod │  │  (merge patches)     │  │
//! │  └────────────────┘  └──────────────────┘  └──────────────────────┘  │
//! ├──────────────────────────────────────────────────────────────────────┤
//! │                 Cluster ports (listers + API client)                  │
//! │         kube-rs reflectors / client    │    in-memory (tests)         │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`topology`]: Allowed topology flattening and matching
//! - [`provisioner`]: Backing class selection and the provisioning engine
//! - [`controller`]: Claim controller driving the engine
//! - [`cluster`]: Cluster access adapters
//! - [`csi`]: Identity, controller and node services
//! - [`domain`]: Core domain types and traits
//! - [`metrics`]: Prometheus provisioning metrics
//! - [`error`]: Error types and handling

pub mod cluster;
pub mod controller;
pub mod csi;
pub mod domain;
pub mod error;
pub mod metrics;
pub mod provisioner;
pub mod topology;

// Re-export commonly used types
pub use cluster::{KubeCluster, KubeListers};

pub use controller::{Context, ControllerConfig, Outcome};

pub use domain::ports::{
    ClaimEvent, ClusterApi, ClusterLister, ProvisionFailure, ProvisionOptions, Provisioner,
    ProvisioningState,
};

pub use error::{Error, ErrorAction, Result};

pub use metrics::ProvisionMetrics;

pub use provisioner::{
    HybridProvisioner, ProvisionMethod, ProvisionerConfig, RetryPolicy, DEFAULT_DRIVER_NAME,
    DRIVER_VERSION,
};

pub use topology::{TopologySegment, TopologyTerm};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
