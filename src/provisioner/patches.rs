//! Merge patches applied while handing a volume over
//!
//! All patches are JSON merge patches; `null` removes a field.

use super::{
    ANN_BETA_STORAGE_PROVISIONER, ANN_BIND_COMPLETED, ANN_BOUND_BY_CONTROLLER,
    ANN_SELECTED_NODE, ANN_STORAGE_PROVISIONER, PVC_PROTECTION_FINALIZER,
};
use k8s_openapi::api::core::v1::PersistentVolumeClaim;
use kube::ResourceExt;
use serde_json::{json, Value};

const CLAIM_API_VERSION: &str = "v1";
const CLAIM_KIND: &str = "PersistentVolumeClaim";

/// Set the volume's reclaim policy
pub fn reclaim_policy(policy: &str) -> Value {
    json!({ "spec": { "persistentVolumeReclaimPolicy": policy } })
}

/// Drop the pvc-protection finalizer, keeping any others
pub fn strip_protection_finalizer(finalizers: &[String]) -> Value {
    let remaining: Vec<&String> = finalizers
        .iter()
        .filter(|f| f.as_str() != PVC_PROTECTION_FINALIZER)
        .collect();

    if remaining.is_empty() {
        json!({ "metadata": { "finalizers": null } })
    } else {
        json!({ "metadata": { "finalizers": remaining } })
    }
}

/// Detach the volume from whatever claim it was bound to
pub fn clear_claim_ref() -> Value {
    json!({ "spec": { "claimRef": null } })
}

/// Point the claim at an existing volume, marked as bound by the controller
pub fn bind_claim(provisioner: &str, volume_name: &str) -> Value {
    json!({
        "metadata": {
            "annotations": {
                ANN_STORAGE_PROVISIONER: provisioner,
                ANN_BETA_STORAGE_PROVISIONER: provisioner,
                ANN_BIND_COMPLETED: "yes",
                ANN_BOUND_BY_CONTROLLER: "yes",
            }
        },
        "spec": { "volumeName": volume_name }
    })
}

/// Reclaim policy plus a full reference back to `claim`
pub fn reclaim_policy_with_claim_ref(policy: &str, claim: &PersistentVolumeClaim) -> Value {
    json!({
        "spec": {
            "persistentVolumeReclaimPolicy": policy,
            "claimRef": {
                "apiVersion": CLAIM_API_VERSION,
                "kind": CLAIM_KIND,
                "name": claim.name_any(),
                "namespace": claim.namespace(),
                "uid": claim.uid(),
            }
        }
    })
}

/// Remove the scheduler's node choice so another node gets picked
pub fn clear_selected_node() -> Value {
    json!({ "metadata": { "annotations": { ANN_SELECTED_NODE: null } } })
}
