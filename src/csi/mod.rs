//! CSI Services
//!
//! Typed identity, controller and node services for the hybrid driver.
//! The driver never serves volumes itself: controller calls other than
//! capability discovery are unimplemented and node calls succeed without
//! doing anything.
//!
//! These are a library surface: no transport is bound in this crate, an
//! external gRPC server wraps them to expose a CSI endpoint.

pub mod controller;
pub mod identity;
pub mod node;

pub use controller::ControllerService;
pub use identity::IdentityService;
pub use node::{NodeInfo, NodeService};

/// Upper bound reported for volumes attachable to a node
pub const MAX_VOLUMES_PER_NODE: i64 = 100;

pub const LABEL_TOPOLOGY_REGION: &str = "topology.kubernetes.io/region";
pub const LABEL_TOPOLOGY_ZONE: &str = "topology.kubernetes.io/zone";

/// Plugin level capabilities
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PluginCapability {
    ControllerService,
    VolumeAccessibilityConstraints,
}

/// Controller RPC capabilities
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerCapability {
    CreateDeleteVolume,
    PublishUnpublishVolume,
    GetCapacity,
    ExpandVolume,
    GetVolume,
    SingleNodeMultiWriter,
}

/// Node RPC capabilities
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeCapability {
    StageUnstageVolume,
    ExpandVolume,
    GetVolumeStats,
}

/// Volume access modes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    SingleNodeWriter,
    SingleNodeReaderOnly,
    SingleNodeSingleWriter,
    SingleNodeMultiWriter,
}
