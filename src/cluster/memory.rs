//! In-memory cluster for tests
//!
//! Implements both ports over plain maps. Claim and volume patches are
//! applied as JSON merge patches, every mutating call is recorded, and a
//! few switches emulate backend behavior (binding, failing deletes, closed
//! watches).

use crate::domain::ports::{ClaimEvent, ClaimEventStream, ClusterApi, ClusterLister};
use crate::error::{Error, Result};
use crate::provisioner::{CLAIM_BOUND, PVC_PROTECTION_FINALIZER, RECLAIM_DELETE};
use async_trait::async_trait;
use futures::{stream, StreamExt};
use k8s_openapi::api::core::v1::{
    Node, ObjectReference, PersistentVolume, PersistentVolumeClaim, PersistentVolumeClaimStatus,
    PersistentVolumeSpec, Pod,
};
use k8s_openapi::api::storage::v1::{CSIDriver, CSINode, StorageClass};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::error::ErrorResponse;
use kube::ResourceExt;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::broadcast;

/// A recorded mutating call, keyed by `namespace/name` or `name`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    CreateClaim(String),
    PatchClaim(String),
    DeleteClaim(String),
    CreatePod(String),
    DeletePod(String),
    CreateVolume(String),
    PatchVolume(String),
}

#[derive(Default)]
struct State {
    storage_classes: BTreeMap<String, Arc<StorageClass>>,
    csi_nodes: BTreeMap<String, Arc<CSINode>>,
    csi_drivers: BTreeMap<String, Arc<CSIDriver>>,
    nodes: BTreeMap<String, Arc<Node>>,
    claims: BTreeMap<String, PersistentVolumeClaim>,
    pods: BTreeMap<String, Pod>,
    volumes: BTreeMap<String, PersistentVolume>,

    calls: Vec<Call>,
    created_claims: Vec<PersistentVolumeClaim>,
    claim_patches: BTreeMap<String, Vec<Value>>,
    deleted_claim_finalizers: BTreeMap<String, Vec<String>>,

    bind_on_create: bool,
    close_watches: bool,
    pod_delete_failures: u32,
    claim_delete_failures: u32,
}

/// In-memory cluster
pub struct MemoryCluster {
    state: Mutex<State>,
    events: broadcast::Sender<(String, ClaimEvent)>,
}

impl Default for MemoryCluster {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryCluster {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            state: Mutex::new(State::default()),
            events,
        }
    }

    // =========================================================================
    // Seeding
    // =========================================================================

    pub fn add_storage_class(&self, class: StorageClass) {
        self.state
            .lock()
            .storage_classes
            .insert(class.name_any(), Arc::new(class));
    }

    pub fn add_csi_node(&self, csi_node: CSINode) {
        self.state
            .lock()
            .csi_nodes
            .insert(csi_node.name_any(), Arc::new(csi_node));
    }

    pub fn add_csi_driver(&self, driver: CSIDriver) {
        self.state
            .lock()
            .csi_drivers
            .insert(driver.name_any(), Arc::new(driver));
    }

    pub fn add_node(&self, node: Node) {
        self.state.lock().nodes.insert(node.name_any(), Arc::new(node));
    }

    /// Insert a claim without recording a call
    pub fn add_claim(&self, claim: PersistentVolumeClaim) {
        let key = claim_key(&claim);
        self.state.lock().claims.insert(key, claim);
    }

    // =========================================================================
    // Behavior
    // =========================================================================

    /// Bind claims synchronously when they are created
    pub fn bind_on_create(&self, enabled: bool) {
        self.state.lock().bind_on_create = enabled;
    }

    /// Watches end right after delivering the current state
    pub fn close_watches(&self, enabled: bool) {
        self.state.lock().close_watches = enabled;
    }

    /// Fail the next `count` pod deletions with a conflict
    pub fn fail_pod_deletes(&self, count: u32) {
        self.state.lock().pod_delete_failures = count;
    }

    /// Fail the next `count` claim deletions with a conflict
    pub fn fail_claim_deletes(&self, count: u32) {
        self.state.lock().claim_delete_failures = count;
    }

    /// Act as the backend: create a volume and bind the claim to it
    pub fn bind_claim(&self, namespace: &str, name: &str) {
        let mut state = self.state.lock();
        let key = format!("{}/{}", namespace, name);
        if let Some(claim) = bind(&mut state, &key) {
            let _ = self.events.send((key, ClaimEvent::Applied(claim)));
        }
    }

    // =========================================================================
    // Inspection
    // =========================================================================

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().calls.clone()
    }

    /// Claims as they were submitted to `create_claim`
    pub fn created_claims(&self) -> Vec<PersistentVolumeClaim> {
        self.state.lock().created_claims.clone()
    }

    pub fn claim_patches(&self, key: &str) -> Vec<Value> {
        self.state
            .lock()
            .claim_patches
            .get(key)
            .cloned()
            .unwrap_or_default()
    }

    /// Finalizers the claim carried when it was deleted
    pub fn deleted_claim_finalizers(&self, key: &str) -> Option<Vec<String>> {
        self.state.lock().deleted_claim_finalizers.get(key).cloned()
    }

    pub fn storage_class_object(&self, name: &str) -> Option<StorageClass> {
        self.state
            .lock()
            .storage_classes
            .get(name)
            .map(|c| c.as_ref().clone())
    }

    pub fn node_object(&self, name: &str) -> Option<Node> {
        self.state.lock().nodes.get(name).map(|n| n.as_ref().clone())
    }

    pub fn claim_object(&self, namespace: &str, name: &str) -> Option<PersistentVolumeClaim> {
        self.state
            .lock()
            .claims
            .get(&format!("{}/{}", namespace, name))
            .cloned()
    }

    pub fn pod_object(&self, namespace: &str, name: &str) -> Option<Pod> {
        self.state
            .lock()
            .pods
            .get(&format!("{}/{}", namespace, name))
            .cloned()
    }

    pub fn volume_object(&self, name: &str) -> Option<PersistentVolume> {
        self.state.lock().volumes.get(name).cloned()
    }
}

fn claim_key(claim: &PersistentVolumeClaim) -> String {
    format!("{}/{}", claim.namespace().unwrap_or_default(), claim.name_any())
}

fn api_error(code: u16, reason: &str) -> kube::Error {
    kube::Error::Api(ErrorResponse {
        status: "Failure".into(),
        message: format!("{} error", reason),
        reason: reason.into(),
        code,
    })
}

fn not_found(operation: &'static str, kind: &'static str, name: &str) -> Error {
    Error::api(operation, kind, name, api_error(404, "NotFound"))
}

fn already_exists(kind: &'static str, name: &str) -> Error {
    Error::api("create", kind, name, api_error(409, "AlreadyExists"))
}

fn conflict(operation: &'static str, kind: &'static str, name: &str) -> Error {
    Error::api(operation, kind, name, api_error(409, "Conflict"))
}

/// Bind the claim at `key` to a fresh `pv-<name>` volume
fn bind(state: &mut State, key: &str) -> Option<PersistentVolumeClaim> {
    let claim = state.claims.get_mut(key)?;
    let volume_name = format!("pv-{}", claim.name_any());

    let spec = claim.spec.get_or_insert_with(Default::default);
    spec.volume_name = Some(volume_name.clone());
    let storage_class_name = spec.storage_class_name.clone();

    claim.status = Some(PersistentVolumeClaimStatus {
        phase: Some(CLAIM_BOUND.to_string()),
        ..Default::default()
    });
    claim
        .finalizers_mut()
        .push(PVC_PROTECTION_FINALIZER.to_string());

    let volume = PersistentVolume {
        metadata: ObjectMeta {
            name: Some(volume_name.clone()),
            resource_version: Some("1".into()),
            ..Default::default()
        },
        spec: Some(PersistentVolumeSpec {
            storage_class_name,
            persistent_volume_reclaim_policy: Some(RECLAIM_DELETE.to_string()),
            claim_ref: Some(ObjectReference {
                name: claim.metadata.name.clone(),
                namespace: claim.metadata.namespace.clone(),
                uid: claim.metadata.uid.clone(),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    };

    let claim = claim.clone();
    state.volumes.insert(volume_name, volume);
    Some(claim)
}

/// Apply a JSON merge patch; `null` removes a field
fn merge(target: &mut Value, patch: &Value) {
    let Value::Object(patch) = patch else {
        *target = patch.clone();
        return;
    };

    if !target.is_object() {
        *target = Value::Object(Map::new());
    }
    if let Value::Object(target) = target {
        for (key, value) in patch {
            if value.is_null() {
                target.remove(key);
            } else {
                merge(target.entry(key.clone()).or_insert(Value::Null), value);
            }
        }
    }
}

fn patched<K: Serialize + DeserializeOwned>(object: &K, patch: &Value) -> Result<K> {
    let mut value = serde_json::to_value(object)?;
    merge(&mut value, patch);
    Ok(serde_json::from_value(value)?)
}

impl ClusterLister for MemoryCluster {
    fn storage_class(&self, name: &str) -> Option<Arc<StorageClass>> {
        self.state.lock().storage_classes.get(name).cloned()
    }

    fn csi_node(&self, name: &str) -> Option<Arc<CSINode>> {
        self.state.lock().csi_nodes.get(name).cloned()
    }

    fn csi_driver(&self, name: &str) -> Option<Arc<CSIDriver>> {
        self.state.lock().csi_drivers.get(name).cloned()
    }

    fn node(&self, name: &str) -> Option<Arc<Node>> {
        self.state.lock().nodes.get(name).cloned()
    }

    fn claim(&self, namespace: &str, name: &str) -> Option<Arc<PersistentVolumeClaim>> {
        self.state
            .lock()
            .claims
            .get(&format!("{}/{}", namespace, name))
            .cloned()
            .map(Arc::new)
    }
}

#[async_trait]
impl ClusterApi for MemoryCluster {
    async fn create_claim(&self, claim: &PersistentVolumeClaim) -> Result<PersistentVolumeClaim> {
        let key = claim_key(claim);
        let mut state = self.state.lock();
        state.calls.push(Call::CreateClaim(key.clone()));

        if state.claims.contains_key(&key) {
            return Err(already_exists("PersistentVolumeClaim", &claim.name_any()));
        }
        state.created_claims.push(claim.clone());
        state.claims.insert(key.clone(), claim.clone());

        let bound = if state.bind_on_create {
            bind(&mut state, &key)
        } else {
            None
        };
        let created = bound.unwrap_or_else(|| claim.clone());

        let _ = self.events.send((key, ClaimEvent::Applied(created.clone())));
        Ok(created)
    }

    async fn patch_claim(
        &self,
        namespace: &str,
        name: &str,
        patch: &Value,
    ) -> Result<PersistentVolumeClaim> {
        let key = format!("{}/{}", namespace, name);
        let mut state = self.state.lock();
        state.calls.push(Call::PatchClaim(key.clone()));
        state
            .claim_patches
            .entry(key.clone())
            .or_default()
            .push(patch.clone());

        let claim = state
            .claims
            .get(&key)
            .ok_or_else(|| not_found("patch", "PersistentVolumeClaim", name))?;
        let claim = patched(claim, patch)?;
        state.claims.insert(key.clone(), claim.clone());

        let _ = self.events.send((key, ClaimEvent::Applied(claim.clone())));
        Ok(claim)
    }

    async fn delete_claim(&self, namespace: &str, name: &str) -> Result<()> {
        let key = format!("{}/{}", namespace, name);
        let mut state = self.state.lock();
        state.calls.push(Call::DeleteClaim(key.clone()));

        if state.claim_delete_failures > 0 {
            state.claim_delete_failures -= 1;
            return Err(conflict("delete", "PersistentVolumeClaim", name));
        }

        let claim = state
            .claims
            .remove(&key)
            .ok_or_else(|| not_found("delete", "PersistentVolumeClaim", name))?;
        state
            .deleted_claim_finalizers
            .insert(key.clone(), claim.finalizers().to_vec());

        let _ = self.events.send((key, ClaimEvent::Deleted));
        Ok(())
    }

    async fn watch_claim(&self, namespace: &str, name: &str) -> Result<ClaimEventStream> {
        let key = format!("{}/{}", namespace, name);
        let state = self.state.lock();

        let current: Vec<Result<ClaimEvent>> = state
            .claims
            .get(&key)
            .map(|claim| Ok(ClaimEvent::Applied(claim.clone())))
            .into_iter()
            .collect();

        if state.close_watches {
            return Ok(stream::iter(current).boxed());
        }

        let receiver = self.events.subscribe();
        let updates = stream::unfold((receiver, key), |(mut receiver, key)| async move {
            loop {
                match receiver.recv().await {
                    Ok((event_key, event)) if event_key == key => {
                        return Some((Ok::<_, Error>(event), (receiver, key)))
                    }
                    Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        });

        Ok(stream::iter(current).chain(updates).boxed())
    }

    async fn create_pod(&self, pod: &Pod) -> Result<Pod> {
        let key = format!("{}/{}", pod.namespace().unwrap_or_default(), pod.name_any());
        let mut state = self.state.lock();
        state.calls.push(Call::CreatePod(key.clone()));

        if state.pods.contains_key(&key) {
            return Err(already_exists("Pod", &pod.name_any()));
        }
        state.pods.insert(key, pod.clone());
        Ok(pod.clone())
    }

    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<()> {
        let key = format!("{}/{}", namespace, name);
        let mut state = self.state.lock();
        state.calls.push(Call::DeletePod(key.clone()));

        if state.pod_delete_failures > 0 {
            state.pod_delete_failures -= 1;
            return Err(conflict("delete", "Pod", name));
        }

        state
            .pods
            .remove(&key)
            .map(|_| ())
            .ok_or_else(|| not_found("delete", "Pod", name))
    }

    async fn create_volume(&self, volume: &PersistentVolume) -> Result<PersistentVolume> {
        let name = volume.name_any();
        let mut state = self.state.lock();
        state.calls.push(Call::CreateVolume(name.clone()));

        if state.volumes.contains_key(&name) {
            return Err(already_exists("PersistentVolume", &name));
        }
        state.volumes.insert(name, volume.clone());
        Ok(volume.clone())
    }

    async fn patch_volume(&self, name: &str, patch: &Value) -> Result<PersistentVolume> {
        let mut state = self.state.lock();
        state.calls.push(Call::PatchVolume(name.to_string()));

        let volume = state
            .volumes
            .get(name)
            .ok_or_else(|| not_found("patch", "PersistentVolume", name))?;
        let volume = patched(volume, patch)?;
        state.volumes.insert(name.to_string(), volume.clone());
        Ok(volume)
    }

    async fn get_node(&self, name: &str) -> Result<Node> {
        self.state
            .lock()
            .nodes
            .get(name)
            .map(|n| n.as_ref().clone())
            .ok_or_else(|| not_found("get", "Node", name))
    }
}

/// Object builders for tests
pub mod fixtures {
    use crate::provisioner::{DEFAULT_DRIVER_NAME, STORAGE_CLASSES_PARAMETER};
    use k8s_openapi::api::core::v1::{
        Node, PersistentVolumeClaim, PersistentVolumeClaimSpec, TopologySelectorLabelRequirement,
        TopologySelectorTerm, VolumeResourceRequirements,
    };
    use k8s_openapi::api::storage::v1::{
        CSIDriver, CSIDriverSpec, CSINode, CSINodeDriver, CSINodeSpec, StorageClass,
    };
    use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use std::collections::BTreeMap;

    fn meta(name: &str) -> ObjectMeta {
        ObjectMeta {
            name: Some(name.to_string()),
            ..Default::default()
        }
    }

    pub fn node(name: &str, labels: &[(&str, &str)]) -> Node {
        let mut metadata = meta(name);
        metadata.labels = Some(
            labels
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        );
        Node {
            metadata,
            ..Default::default()
        }
    }

    /// CSINode listing `(driver, topology keys)` pairs
    pub fn csi_node(name: &str, drivers: &[(&str, &[&str])]) -> CSINode {
        CSINode {
            metadata: meta(name),
            spec: CSINodeSpec {
                drivers: drivers
                    .iter()
                    .map(|(driver, keys)| CSINodeDriver {
                        name: driver.to_string(),
                        node_id: name.to_string(),
                        topology_keys: Some(keys.iter().map(|k| k.to_string()).collect()),
                        allocatable: None,
                    })
                    .collect(),
            },
        }
    }

    pub fn csi_driver(name: &str) -> CSIDriver {
        CSIDriver {
            metadata: meta(name),
            spec: CSIDriverSpec::default(),
        }
    }

    /// StorageClass with one allowed topology term built from `(key, values)`
    pub fn storage_class(
        name: &str,
        provisioner: &str,
        reclaim_policy: &str,
        topology: &[(&str, &[&str])],
    ) -> StorageClass {
        let allowed_topologies = (!topology.is_empty()).then(|| {
            vec![TopologySelectorTerm {
                match_label_expressions: Some(
                    topology
                        .iter()
                        .map(|(key, values)| TopologySelectorLabelRequirement {
                            key: key.to_string(),
                            values: values.iter().map(|v| v.to_string()).collect(),
                        })
                        .collect(),
                ),
            }]
        });

        StorageClass {
            metadata: meta(name),
            provisioner: provisioner.to_string(),
            reclaim_policy: Some(reclaim_policy.to_string()),
            allowed_topologies,
            ..Default::default()
        }
    }

    /// StorageClass served by this provisioner, delegating to `classes`
    pub fn hybrid_class(name: &str, classes: &str) -> StorageClass {
        StorageClass {
            metadata: meta(name),
            provisioner: DEFAULT_DRIVER_NAME.to_string(),
            parameters: Some(BTreeMap::from([(
                STORAGE_CLASSES_PARAMETER.to_string(),
                classes.to_string(),
            )])),
            volume_binding_mode: Some("WaitForFirstConsumer".to_string()),
            ..Default::default()
        }
    }

    pub fn claim(namespace: &str, name: &str, uid: &str, storage_class: &str) -> PersistentVolumeClaim {
        PersistentVolumeClaim {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(namespace.to_string()),
                uid: Some(uid.to_string()),
                ..Default::default()
            },
            spec: Some(PersistentVolumeClaimSpec {
                access_modes: Some(vec!["ReadWriteOnce".to_string()]),
                storage_class_name: Some(storage_class.to_string()),
                resources: Some(VolumeResourceRequirements {
                    requests: Some(BTreeMap::from([(
                        "storage".to_string(),
                        Quantity("1Gi".to_string()),
                    )])),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_merge_patch() {
        let mut target = json!({"a": 1, "b": {"c": 2, "d": 3}});
        merge(&mut target, &json!({"b": {"c": null, "e": 4}, "f": [1]}));
        assert_eq!(target, json!({"a": 1, "b": {"d": 3, "e": 4}, "f": [1]}));
    }

    #[tokio::test]
    async fn test_watch_delivers_current_state_then_updates() {
        let cluster = MemoryCluster::new();
        cluster.add_claim(fixtures::claim("apps", "data", "uid-1", "hybrid"));

        let mut events = cluster.watch_claim("apps", "data").await.unwrap();
        assert!(matches!(events.next().await, Some(Ok(ClaimEvent::Applied(_)))));

        cluster.bind_claim("apps", "data");
        match events.next().await {
            Some(Ok(ClaimEvent::Applied(claim))) => {
                assert_eq!(claim.spec.unwrap().volume_name.as_deref(), Some("pv-data"))
            }
            other => panic!("unexpected event {:?}", other),
        }
        assert!(cluster.volume_object("pv-data").is_some());
    }
}
