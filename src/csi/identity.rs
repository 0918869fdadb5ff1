//! Identity service

use super::PluginCapability;
use crate::provisioner::DRIVER_VERSION;
use tracing::debug;

/// Name and version the plugin reports
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginInfo {
    pub name: String,
    pub vendor_version: String,
}

pub struct IdentityService {
    driver_name: String,
}

impl IdentityService {
    pub fn new(driver_name: impl Into<String>) -> Self {
        Self {
            driver_name: driver_name.into(),
        }
    }

    pub fn get_plugin_info(&self) -> PluginInfo {
        debug!("GetPluginInfo called");

        PluginInfo {
            name: self.driver_name.clone(),
            vendor_version: DRIVER_VERSION.to_string(),
        }
    }

    pub fn get_plugin_capabilities(&self) -> Vec<PluginCapability> {
        debug!("GetPluginCapabilities called");

        vec![
            PluginCapability::ControllerService,
            PluginCapability::VolumeAccessibilityConstraints,
        ]
    }

    /// Always ready
    pub fn probe(&self) -> bool {
        true
    }
}
