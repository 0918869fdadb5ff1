//! kube-rs backed cluster access
//!
//! [`KubeCluster`] issues API calls directly. [`KubeListers`] serves reads
//! from reflector caches kept current by background watches.

use crate::domain::ports::{ClaimEvent, ClaimEventStream, ClusterApi, ClusterLister};
use crate::error::{Error, Result};
use async_trait::async_trait;
use futures::{future, StreamExt, TryStreamExt};
use k8s_openapi::api::core::v1::{Node, PersistentVolume, PersistentVolumeClaim, Pod};
use k8s_openapi::api::storage::v1::{CSIDriver, CSINode, StorageClass};
use kube::api::{Api, DeleteParams, Patch, PatchParams, PostParams};
use kube::runtime::reflector::{self, ObjectRef, Store};
use kube::runtime::{watcher, WatchStreamExt};
use kube::{Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;
use tracing::{debug, info, warn};

const CLAIM: &str = "PersistentVolumeClaim";
const POD: &str = "Pod";
const VOLUME: &str = "PersistentVolume";
const NODE: &str = "Node";

// =============================================================================
// API Client
// =============================================================================

/// Direct Kubernetes API access
#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
}

impl KubeCluster {
    pub fn new(client: Client) -> Arc<Self> {
        Arc::new(Self { client })
    }

    fn claims(&self, namespace: &str) -> Api<PersistentVolumeClaim> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn pods(&self, namespace: &str) -> Api<Pod> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn volumes(&self) -> Api<PersistentVolume> {
        Api::all(self.client.clone())
    }
}

#[async_trait]
impl ClusterApi for KubeCluster {
    async fn create_claim(&self, claim: &PersistentVolumeClaim) -> Result<PersistentVolumeClaim> {
        let namespace = claim.namespace().unwrap_or_default();
        self.claims(&namespace)
            .create(&PostParams::default(), claim)
            .await
            .map_err(|e| Error::api("create", CLAIM, claim.name_any(), e))
    }

    async fn patch_claim(
        &self,
        namespace: &str,
        name: &str,
        patch: &serde_json::Value,
    ) -> Result<PersistentVolumeClaim> {
        self.claims(namespace)
            .patch(name, &PatchParams::default(), &Patch::Merge(patch))
            .await
            .map_err(|e| Error::api("patch", CLAIM, name, e))
    }

    async fn delete_claim(&self, namespace: &str, name: &str) -> Result<()> {
        self.claims(namespace)
            .delete(name, &DeleteParams::foreground())
            .await
            .map(|_| ())
            .map_err(|e| Error::api("delete", CLAIM, name, e))
    }

    async fn watch_claim(&self, namespace: &str, name: &str) -> Result<ClaimEventStream> {
        let events = watcher::watch_object(self.claims(namespace), name)
            .map_ok(|claim| match claim {
                Some(claim) => ClaimEvent::Applied(claim),
                None => ClaimEvent::Deleted,
            })
            .map_err(Error::from);

        Ok(events.boxed())
    }

    async fn create_pod(&self, pod: &Pod) -> Result<Pod> {
        let namespace = pod.namespace().unwrap_or_default();
        self.pods(&namespace)
            .create(&PostParams::default(), pod)
            .await
            .map_err(|e| Error::api("create", POD, pod.name_any(), e))
    }

    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<()> {
        self.pods(namespace)
            .delete(name, &DeleteParams::default())
            .await
            .map(|_| ())
            .map_err(|e| Error::api("delete", POD, name, e))
    }

    async fn create_volume(&self, volume: &PersistentVolume) -> Result<PersistentVolume> {
        self.volumes()
            .create(&PostParams::default(), volume)
            .await
            .map_err(|e| Error::api("create", VOLUME, volume.name_any(), e))
    }

    async fn patch_volume(&self, name: &str, patch: &serde_json::Value) -> Result<PersistentVolume> {
        self.volumes()
            .patch(name, &PatchParams::default(), &Patch::Merge(patch))
            .await
            .map_err(|e| Error::api("patch", VOLUME, name, e))
    }

    async fn get_node(&self, name: &str) -> Result<Node> {
        Api::<Node>::all(self.client.clone())
            .get(name)
            .await
            .map_err(|e| Error::api("get", NODE, name, e))
    }
}

// =============================================================================
// Cached Listers
// =============================================================================

/// Reflector caches for the objects the provisioner reads
#[derive(Clone)]
pub struct KubeListers {
    storage_classes: Store<StorageClass>,
    csi_nodes: Store<CSINode>,
    csi_drivers: Store<CSIDriver>,
    nodes: Store<Node>,
    claims: Store<PersistentVolumeClaim>,
}

impl KubeListers {
    /// Start the reflectors and wait for their initial lists
    pub async fn start(client: Client) -> Result<Arc<Self>> {
        let listers = Self {
            storage_classes: spawn_reflector(Api::all(client.clone())),
            csi_nodes: spawn_reflector(Api::all(client.clone())),
            csi_drivers: spawn_reflector(Api::all(client.clone())),
            nodes: spawn_reflector(Api::all(client.clone())),
            claims: spawn_reflector(Api::all(client)),
        };

        listers.wait_until_ready().await?;
        info!("cluster caches synced");

        Ok(Arc::new(listers))
    }

    async fn wait_until_ready(&self) -> Result<()> {
        let synced = tokio::try_join!(
            self.storage_classes.wait_until_ready(),
            self.csi_nodes.wait_until_ready(),
            self.csi_drivers.wait_until_ready(),
            self.nodes.wait_until_ready(),
            self.claims.wait_until_ready(),
        );

        synced
            .map(|_| ())
            .map_err(|e| Error::Internal(format!("cache writer dropped before sync: {}", e)))
    }
}

fn spawn_reflector<K>(api: Api<K>) -> Store<K>
where
    K: Resource + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
    K::DynamicType: Default + Eq + Hash + Clone + Send + Sync + 'static,
{
    let (reader, writer) = reflector::store();
    let kind = K::kind(&Default::default()).to_string();

    let stream = reflector::reflector(writer, watcher(api, watcher::Config::default()))
        .default_backoff()
        .applied_objects()
        .for_each(move |result| {
            if let Err(e) = result {
                warn!(kind = %kind, error = %e, "watch error");
            }
            future::ready(())
        });

    tokio::spawn(async move {
        stream.await;
        debug!("reflector stopped");
    });

    reader
}

impl ClusterLister for KubeListers {
    fn storage_class(&self, name: &str) -> Option<Arc<StorageClass>> {
        self.storage_classes.get(&ObjectRef::new(name))
    }

    fn csi_node(&self, name: &str) -> Option<Arc<CSINode>> {
        self.csi_nodes.get(&ObjectRef::new(name))
    }

    fn csi_driver(&self, name: &str) -> Option<Arc<CSIDriver>> {
        self.csi_drivers.get(&ObjectRef::new(name))
    }

    fn node(&self, name: &str) -> Option<Arc<Node>> {
        self.nodes.get(&ObjectRef::new(name))
    }

    fn claim(&self, namespace: &str, name: &str) -> Option<Arc<PersistentVolumeClaim>> {
        self.claims.get(&ObjectRef::new(name).within(namespace))
    }
}
