//! Hybrid Provisioner
//!
//! Selects a backing StorageClass usable from the scheduled node, lets that
//! class' own provisioner bind a volume to a proxy claim, then hands the
//! volume over to the real claim.

pub mod hybrid;
pub mod objects;
pub mod patches;
pub mod retry;
pub mod selection;
pub mod wait;

pub use hybrid::HybridProvisioner;
pub use retry::RetryPolicy;
pub use selection::{parse_candidates, select_storage_class};

use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

// =============================================================================
// Constants
// =============================================================================

/// Default name the provisioner registers under
pub const DEFAULT_DRIVER_NAME: &str = "csi.hybrid.sinextra.dev";

/// Provisioner version
pub const DRIVER_VERSION: &str = "0.1.0";

/// StorageClass parameter listing candidate classes, highest priority first
pub const STORAGE_CLASSES_PARAMETER: &str = "storageClasses";

pub const ANN_STORAGE_PROVISIONER: &str = "volume.kubernetes.io/storage-provisioner";
pub const ANN_BETA_STORAGE_PROVISIONER: &str = "volume.beta.kubernetes.io/storage-provisioner";
pub const ANN_SELECTED_NODE: &str = "volume.kubernetes.io/selected-node";
pub const ANN_BIND_COMPLETED: &str = "pv.kubernetes.io/bind-completed";
pub const ANN_BOUND_BY_CONTROLLER: &str = "pv.kubernetes.io/bound-by-controller";
pub const ANN_BETA_STORAGE_CLASS: &str = "volume.beta.kubernetes.io/storage-class";

pub const PVC_PROTECTION_FINALIZER: &str = "kubernetes.io/pvc-protection";
pub const LABEL_HOSTNAME: &str = "kubernetes.io/hostname";

pub const CLAIM_BOUND: &str = "Bound";
pub const RECLAIM_RETAIN: &str = "Retain";
pub const RECLAIM_DELETE: &str = "Delete";

const DEFAULT_BIND_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_PAUSE_IMAGE: &str = "registry.k8s.io/pause:3.10";

// =============================================================================
// Provision Method
// =============================================================================

/// How the backing claim gets its volume
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProvisionMethod {
    /// Proxy claim carries provisioner and selected-node annotations
    #[default]
    Annotation,
    /// Proxy claim is mounted by a placeholder pod pinned to the node
    Pod,
}

impl FromStr for ProvisionMethod {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "auto" | "annotation" => Ok(ProvisionMethod::Annotation),
            "pod" => Ok(ProvisionMethod::Pod),
            other => Err(format!("unknown provision method {:?}", other)),
        }
    }
}

impl ProvisionMethod {
    /// Parse a method flag, falling back to the default on unknown values
    pub fn from_flag(value: &str) -> Self {
        value.parse().unwrap_or_else(|e| {
            let method = ProvisionMethod::default();
            warn!("{}, using {}", e, method);
            method
        })
    }
}

impl fmt::Display for ProvisionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProvisionMethod::Annotation => write!(f, "annotation"),
            ProvisionMethod::Pod => write!(f, "pod"),
        }
    }
}

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the hybrid provisioner
#[derive(Debug, Clone)]
pub struct ProvisionerConfig {
    /// Provisioner name hybrid StorageClasses refer to
    pub driver_name: String,
    /// Backing claim strategy
    pub method: ProvisionMethod,
    /// How long to wait for the backend to bind the proxy claim
    pub bind_timeout: Duration,
    /// Retry policy for pod and proxy claim deletion
    pub cleanup_retry: RetryPolicy,
    /// Image of the placeholder pod
    pub pause_image: String,
}

impl Default for ProvisionerConfig {
    fn default() -> Self {
        Self {
            driver_name: DEFAULT_DRIVER_NAME.to_string(),
            method: ProvisionMethod::default(),
            bind_timeout: DEFAULT_BIND_TIMEOUT,
            cleanup_retry: RetryPolicy::default(),
            pause_image: DEFAULT_PAUSE_IMAGE.to_string(),
        }
    }
}
