//! Transient objects created by the provisioner

use super::{
    ANN_BETA_STORAGE_PROVISIONER, ANN_SELECTED_NODE, ANN_STORAGE_PROVISIONER, LABEL_HOSTNAME,
};
use k8s_openapi::api::core::v1::{
    Container, PersistentVolumeClaim, PersistentVolumeClaimSpec,
    PersistentVolumeClaimVolumeSource, Pod, PodSpec, ResourceRequirements, Toleration, Volume,
};
use k8s_openapi::api::storage::v1::StorageClass;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::ResourceExt;
use std::collections::BTreeMap;

const POD_NAME_PREFIX: &str = "provisioner-";
const POD_CONTAINER_NAME: &str = "provisioner";
const POD_CPU: &str = "10m";
const POD_MEMORY: &str = "10Mi";

/// Name of the placeholder pod for a volume
pub fn pod_name(pv_name: &str) -> String {
    format!("{}{}", POD_NAME_PREFIX, pv_name)
}

/// Claim impersonating `claim` against the backing `storage_class`.
///
/// With `selected_node` set, the claim carries the provisioner annotations
/// so the backend provisions it without a consumer pod.
pub fn proxy_claim(
    pv_name: &str,
    claim: &PersistentVolumeClaim,
    storage_class: &StorageClass,
    selected_node: Option<&str>,
) -> PersistentVolumeClaim {
    let annotations = selected_node.map(|node| {
        BTreeMap::from([
            (ANN_STORAGE_PROVISIONER.to_string(), storage_class.provisioner.clone()),
            (ANN_BETA_STORAGE_PROVISIONER.to_string(), storage_class.provisioner.clone()),
            (ANN_SELECTED_NODE.to_string(), node.to_string()),
        ])
    });

    let spec = claim.spec.clone().unwrap_or_default();

    PersistentVolumeClaim {
        metadata: ObjectMeta {
            name: Some(pv_name.to_string()),
            namespace: claim.namespace(),
            annotations,
            ..Default::default()
        },
        spec: Some(PersistentVolumeClaimSpec {
            access_modes: spec.access_modes,
            storage_class_name: Some(storage_class.name_any()),
            resources: spec.resources,
            volume_mode: spec.volume_mode,
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Pod pinned to `node_name` that mounts the proxy claim
pub fn placeholder_pod(proxy: &PersistentVolumeClaim, node_name: &str, image: &str) -> Pod {
    let claim_name = proxy.name_any();
    let resources = BTreeMap::from([
        ("cpu".to_string(), Quantity(POD_CPU.to_string())),
        ("memory".to_string(), Quantity(POD_MEMORY.to_string())),
    ]);

    Pod {
        metadata: ObjectMeta {
            name: Some(pod_name(&claim_name)),
            namespace: proxy.namespace(),
            ..Default::default()
        },
        spec: Some(PodSpec {
            restart_policy: Some("Never".to_string()),
            containers: vec![Container {
                name: POD_CONTAINER_NAME.to_string(),
                image: Some(image.to_string()),
                resources: Some(ResourceRequirements {
                    requests: Some(resources.clone()),
                    limits: Some(resources),
                    ..Default::default()
                }),
                ..Default::default()
            }],
            tolerations: Some(vec![Toleration {
                operator: Some("Exists".to_string()),
                ..Default::default()
            }]),
            node_selector: Some(BTreeMap::from([(
                LABEL_HOSTNAME.to_string(),
                node_name.to_string(),
            )])),
            volumes: Some(vec![Volume {
                name: POD_CONTAINER_NAME.to_string(),
                persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
                    claim_name,
                    read_only: None,
                }),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}
