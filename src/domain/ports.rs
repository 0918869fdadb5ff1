//! Domain Ports - Core trait definitions for the provisioner
//!
//! These traits define the boundaries between the provisioning engine and
//! the cluster it drives. Adapters implement these traits to provide
//! concrete functionality (kube-rs in production, in-memory in tests).

use crate::error::{Error, Result};
use async_trait::async_trait;
use futures::stream::BoxStream;
use k8s_openapi::api::core::v1::{Node, PersistentVolume, PersistentVolumeClaim, Pod};
use k8s_openapi::api::storage::v1::{CSIDriver, CSINode, StorageClass};
use std::fmt;
use std::sync::Arc;

// =============================================================================
// Provisioning Contract
// =============================================================================

/// Everything the engine needs to provision one claim
#[derive(Debug, Clone)]
pub struct ProvisionOptions {
    /// Name of the volume to create, also the proxy claim name
    pub pv_name: String,
    /// The claim being provisioned
    pub claim: PersistentVolumeClaim,
    /// The hybrid StorageClass the claim asked for
    pub storage_class: Option<StorageClass>,
    /// Node the workload was scheduled to
    pub selected_node: Option<Node>,
}

/// Disposition returned alongside a provisioning error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisioningState {
    /// Final outcome, do not retry
    Finished,
    /// Node selection cannot be satisfied, pick another node
    Reschedule,
    /// Objects may exist in the cluster; call again with the same options
    InBackground,
}

impl fmt::Display for ProvisioningState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProvisioningState::Finished => write!(f, "finished"),
            ProvisioningState::Reschedule => write!(f, "reschedule"),
            ProvisioningState::InBackground => write!(f, "in_background"),
        }
    }
}

/// A failed provision call
#[derive(Debug)]
pub struct ProvisionFailure {
    pub state: ProvisioningState,
    pub error: Error,
}

impl ProvisionFailure {
    pub fn finished(error: Error) -> Self {
        Self {
            state: ProvisioningState::Finished,
            error,
        }
    }

    pub fn reschedule(error: Error) -> Self {
        Self {
            state: ProvisioningState::Reschedule,
            error,
        }
    }

    pub fn in_background(error: Error) -> Self {
        Self {
            state: ProvisioningState::InBackground,
            error,
        }
    }
}

impl fmt::Display for ProvisionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.error, self.state)
    }
}

impl std::error::Error for ProvisionFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

/// Port invoked by the scheduling harness
#[async_trait]
pub trait Provisioner: Send + Sync {
    /// Provision a volume for the claim
    async fn provision(
        &self,
        options: ProvisionOptions,
    ) -> std::result::Result<PersistentVolume, ProvisionFailure>;

    /// Release the storage behind a volume
    async fn delete(&self, volume: &PersistentVolume) -> Result<()>;
}

// =============================================================================
// Cluster Ports
// =============================================================================

/// Read-only cached views of cluster objects.
///
/// Snapshots are eventually consistent; never base a write on them.
pub trait ClusterLister: Send + Sync {
    fn storage_class(&self, name: &str) -> Option<Arc<StorageClass>>;

    fn csi_node(&self, name: &str) -> Option<Arc<CSINode>>;

    fn csi_driver(&self, name: &str) -> Option<Arc<CSIDriver>>;

    fn node(&self, name: &str) -> Option<Arc<Node>>;

    fn claim(&self, namespace: &str, name: &str) -> Option<Arc<PersistentVolumeClaim>>;
}

/// Change seen on a watched claim
#[derive(Debug, Clone)]
pub enum ClaimEvent {
    /// Claim was created or modified
    Applied(PersistentVolumeClaim),
    /// Claim was removed
    Deleted,
}

pub type ClaimEventStream = BoxStream<'static, Result<ClaimEvent>>;

/// Mutating cluster calls.
///
/// Implementations report `404` as [`Error::ResourceNotFound`] and
/// "already exists" as [`Error::ResourceExists`].
#[async_trait]
pub trait ClusterApi: Send + Sync {
    async fn create_claim(&self, claim: &PersistentVolumeClaim) -> Result<PersistentVolumeClaim>;

    async fn patch_claim(
        &self,
        namespace: &str,
        name: &str,
        patch: &serde_json::Value,
    ) -> Result<PersistentVolumeClaim>;

    /// Delete with foreground propagation
    async fn delete_claim(&self, namespace: &str, name: &str) -> Result<()>;

    /// Subscribe to changes of a single claim.
    ///
    /// The current state, if any, is delivered first.
    async fn watch_claim(&self, namespace: &str, name: &str) -> Result<ClaimEventStream>;

    async fn create_pod(&self, pod: &Pod) -> Result<Pod>;

    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<()>;

    async fn create_volume(&self, volume: &PersistentVolume) -> Result<PersistentVolume>;

    async fn patch_volume(&self, name: &str, patch: &serde_json::Value) -> Result<PersistentVolume>;

    async fn get_node(&self, name: &str) -> Result<Node>;
}

// =============================================================================
// Type Aliases for Arc'd Traits
// =============================================================================

pub type ClusterListerRef = Arc<dyn ClusterLister>;
pub type ClusterApiRef = Arc<dyn ClusterApi>;
pub type ProvisionerRef = Arc<dyn Provisioner>;
