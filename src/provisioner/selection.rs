//! Backing StorageClass selection
//!
//! First-match over the candidate list: order expresses priority.

use crate::domain::ports::ClusterLister;
use crate::error::{Error, Result};
use crate::topology;
use k8s_openapi::api::core::v1::Node;
use k8s_openapi::api::storage::v1::StorageClass;
use kube::ResourceExt;
use std::sync::Arc;
use tracing::debug;

/// Split the comma separated candidate list
pub fn parse_candidates(value: &str) -> Result<Vec<String>> {
    let candidates: Vec<String> = value
        .split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect();

    if candidates.is_empty() {
        return Err(Error::Configuration(format!(
            "no storage classes listed in {:?}",
            value
        )));
    }
    Ok(candidates)
}

/// Pick the first candidate class usable from `node`.
///
/// A class is usable when its allowed topologies cover the node's position
/// for the class' driver, and its provisioner is either not a registered
/// CSI driver or is installed on the node.
pub fn select_storage_class(
    lister: &dyn ClusterLister,
    node: &Node,
    candidates: &[String],
) -> Result<Arc<StorageClass>> {
    let node_name = node.name_any();

    let csi_node = lister.csi_node(&node_name).ok_or_else(|| Error::CsiNodeNotFound {
        node: node_name.clone(),
    })?;

    for candidate in candidates {
        let Some(class) = lister.storage_class(candidate) else {
            debug!(node = %node_name, storage_class = %candidate, "storage class is not found");
            continue;
        };

        let allowed = class.allowed_topologies.as_deref().unwrap_or(&[]);
        if !allowed.is_empty() {
            let keys = topology::topology_keys(&csi_node, &class.provisioner);

            let Some(node_term) = topology::node_topology_of(node, keys) else {
                debug!(node = %node_name, storage_class = %candidate, "node is missing a topology key");
                continue;
            };

            let terms = topology::flatten(allowed);
            if !terms.iter().any(|term| term.subset(&node_term)) {
                debug!(
                    node = %node_name,
                    storage_class = %candidate,
                    topology = %node_term,
                    "topology is not allowed"
                );
                continue;
            }
        }

        // Not a CSI driver: handled in-tree, nothing to check on the node
        if lister.csi_driver(&class.provisioner).is_none() {
            return Ok(class);
        }

        if topology::has_driver(&csi_node, &class.provisioner) {
            return Ok(class);
        }

        debug!(
            node = %node_name,
            storage_class = %candidate,
            driver = %class.provisioner,
            "driver is not installed on node"
        );
    }

    Err(Error::NoMatchingStorageClass { node: node_name })
}
