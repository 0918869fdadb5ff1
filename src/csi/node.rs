//! Node service
//!
//! Backing drivers stage and publish the volumes, so the per-volume calls
//! only acknowledge. Node info reports the region/zone of the node.

use super::{
    AccessMode, NodeCapability, LABEL_TOPOLOGY_REGION, LABEL_TOPOLOGY_ZONE,
    MAX_VOLUMES_PER_NODE,
};
use crate::domain::ports::ClusterApiRef;
use crate::error::{Error, Result};
use crate::topology::{self, TopologyTerm};
use kube::ResourceExt;
use std::collections::BTreeMap;
use tracing::debug;

/// Access modes volumes of this driver support
pub const SUPPORTED_ACCESS_MODES: [AccessMode; 4] = [
    AccessMode::SingleNodeWriter,
    AccessMode::SingleNodeReaderOnly,
    AccessMode::SingleNodeSingleWriter,
    AccessMode::SingleNodeMultiWriter,
];

/// Identity and placement of a node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeInfo {
    pub node_id: String,
    pub max_volumes_per_node: i64,
    pub accessible_topology: BTreeMap<String, String>,
}

/// CSI node service, served by an external transport.
///
/// The provisioner binary only calls [`NodeService::get_info`] at startup.
pub struct NodeService {
    node_id: String,
    api: ClusterApiRef,
}

impl NodeService {
    pub fn new(node_id: impl Into<String>, api: ClusterApiRef) -> Self {
        Self {
            node_id: node_id.into(),
            api,
        }
    }

    pub fn stage_volume(&self, volume_id: &str) -> Result<()> {
        debug!(volume_id, "NodeStageVolume called");
        Ok(())
    }

    pub fn unstage_volume(&self, volume_id: &str) -> Result<()> {
        debug!(volume_id, "NodeUnstageVolume called");
        Ok(())
    }

    pub fn publish_volume(&self, volume_id: &str) -> Result<()> {
        debug!(volume_id, "NodePublishVolume called");
        Ok(())
    }

    pub fn unpublish_volume(&self, volume_id: &str) -> Result<()> {
        debug!(volume_id, "NodeUnpublishVolume called");
        Ok(())
    }

    pub fn get_volume_stats(&self, volume_id: &str) -> Result<()> {
        debug!(volume_id, "NodeGetVolumeStats called");
        Ok(())
    }

    pub fn expand_volume(&self, volume_id: &str) -> Result<()> {
        debug!(volume_id, "NodeExpandVolume called");
        Ok(())
    }

    pub fn get_capabilities(&self) -> Vec<NodeCapability> {
        debug!("NodeGetCapabilities called");

        vec![
            NodeCapability::StageUnstageVolume,
            NodeCapability::ExpandVolume,
            NodeCapability::GetVolumeStats,
        ]
    }

    /// Look the node up and report its region and zone
    pub async fn get_info(&self) -> Result<NodeInfo> {
        debug!(node = %self.node_id, "NodeGetInfo called");

        let node = self.api.get_node(&self.node_id).await?;
        let labels = node.labels();

        let label = |key: &str| {
            labels
                .get(key)
                .filter(|value| !value.is_empty())
                .cloned()
                .ok_or_else(|| Error::MissingNodeLabel {
                    node: self.node_id.clone(),
                    label: key.to_string(),
                })
        };

        let region = label(LABEL_TOPOLOGY_REGION)?;
        let zone = label(LABEL_TOPOLOGY_ZONE)?;

        let term = TopologyTerm::from_pairs([(LABEL_TOPOLOGY_REGION, region), (LABEL_TOPOLOGY_ZONE, zone)]);
        let accessible_topology = topology::to_csi_topology(&[term])
            .pop()
            .unwrap_or_default();

        Ok(NodeInfo {
            node_id: self.node_id.clone(),
            max_volumes_per_node: MAX_VOLUMES_PER_NODE,
            accessible_topology,
        })
    }
}
