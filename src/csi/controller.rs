//! Controller service
//!
//! Volumes are created by the claim controller through backing classes,
//! so only capability discovery answers here.

use super::ControllerCapability;
use crate::error::{Error, Result};
use tracing::debug;

const CAPABILITIES: [ControllerCapability; 6] = [
    ControllerCapability::CreateDeleteVolume,
    ControllerCapability::PublishUnpublishVolume,
    ControllerCapability::GetCapacity,
    ControllerCapability::ExpandVolume,
    ControllerCapability::GetVolume,
    ControllerCapability::SingleNodeMultiWriter,
];

/// CSI controller service, served by an external transport
#[derive(Debug, Default)]
pub struct ControllerService;

impl ControllerService {
    pub fn new() -> Self {
        Self
    }

    pub fn get_capabilities(&self) -> Vec<ControllerCapability> {
        debug!("ControllerGetCapabilities called");
        CAPABILITIES.to_vec()
    }

    pub fn create_volume(&self, name: &str) -> Result<()> {
        unimplemented("CreateVolume", name)
    }

    pub fn delete_volume(&self, volume_id: &str) -> Result<()> {
        unimplemented("DeleteVolume", volume_id)
    }

    pub fn publish_volume(&self, volume_id: &str) -> Result<()> {
        unimplemented("ControllerPublishVolume", volume_id)
    }

    pub fn unpublish_volume(&self, volume_id: &str) -> Result<()> {
        unimplemented("ControllerUnpublishVolume", volume_id)
    }

    pub fn validate_volume_capabilities(&self, volume_id: &str) -> Result<()> {
        unimplemented("ValidateVolumeCapabilities", volume_id)
    }

    pub fn list_volumes(&self) -> Result<()> {
        unimplemented("ListVolumes", "")
    }

    pub fn get_capacity(&self) -> Result<()> {
        unimplemented("GetCapacity", "")
    }

    pub fn create_snapshot(&self, name: &str) -> Result<()> {
        unimplemented("CreateSnapshot", name)
    }

    pub fn delete_snapshot(&self, snapshot_id: &str) -> Result<()> {
        unimplemented("DeleteSnapshot", snapshot_id)
    }

    pub fn list_snapshots(&self) -> Result<()> {
        unimplemented("ListSnapshots", "")
    }

    pub fn expand_volume(&self, volume_id: &str) -> Result<()> {
        unimplemented("ControllerExpandVolume", volume_id)
    }

    pub fn get_volume(&self, volume_id: &str) -> Result<()> {
        unimplemented("ControllerGetVolume", volume_id)
    }

    pub fn modify_volume(&self, volume_id: &str) -> Result<()> {
        unimplemented("ControllerModifyVolume", volume_id)
    }
}

fn unimplemented(method: &'static str, target: &str) -> Result<()> {
    debug!(method, target, "called");
    Err(Error::Unimplemented { method })
}
