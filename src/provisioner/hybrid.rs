//! Hybrid Provisioning Engine
//!
//! Drives one claim through
//! `NotStarted -> ProxyCreated -> ProxyBound -> (PodCleanedUp) -> VolumeReleased -> RebindCompleted`.
//!
//! Nothing is rolled back on failure. Creates treat "already exists" as
//! success and deletes treat "not found" as success, so calling
//! [`HybridProvisioner::provision`] again with the same options resumes
//! from whatever the previous attempt left behind.

use super::{
    objects, patches, selection, wait, ProvisionMethod, ProvisionerConfig, RECLAIM_DELETE,
    RECLAIM_RETAIN, STORAGE_CLASSES_PARAMETER,
};
use crate::domain::ports::{
    ClusterApiRef, ClusterListerRef, ProvisionFailure, ProvisionOptions, Provisioner,
};
use crate::error::{Error, Result};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Node, PersistentVolume, PersistentVolumeClaim};
use k8s_openapi::api::storage::v1::StorageClass;
use kube::ResourceExt;
use std::sync::Arc;
use tracing::{debug, error, info};

/// Provisioner that delegates to a node-usable backing StorageClass
pub struct HybridProvisioner {
    config: ProvisionerConfig,
    lister: ClusterListerRef,
    api: ClusterApiRef,
}

impl HybridProvisioner {
    /// Create a new hybrid provisioner
    pub fn new(config: ProvisionerConfig, lister: ClusterListerRef, api: ClusterApiRef) -> Arc<Self> {
        info!(
            driver = %config.driver_name,
            method = %config.method,
            "hybrid provisioner configured"
        );

        Arc::new(Self {
            config,
            lister,
            api,
        })
    }

    pub fn config(&self) -> &ProvisionerConfig {
        &self.config
    }

    /// Provision a volume for `options.claim`.
    ///
    /// The returned volume has its resource version cleared: it is an
    /// adopted object, not one to update in place.
    pub async fn provision(
        &self,
        options: ProvisionOptions,
    ) -> std::result::Result<PersistentVolume, ProvisionFailure> {
        debug!(
            pv = %options.pv_name,
            claim = %options.claim.name_any(),
            node = ?options.selected_node.as_ref().map(|n| n.name_any()),
            storage_class = ?options.storage_class.as_ref().map(|c| c.name_any()),
            "provision called"
        );

        let hybrid_class = options
            .storage_class
            .as_ref()
            .ok_or_else(|| ProvisionFailure::finished(Error::MissingStorageClass))?;

        let node = options
            .selected_node
            .as_ref()
            .ok_or_else(|| ProvisionFailure::finished(Error::MissingSelectedNode))?;

        let classes = hybrid_class
            .parameters
            .as_ref()
            .and_then(|params| params.get(STORAGE_CLASSES_PARAMETER))
            .ok_or_else(|| {
                ProvisionFailure::finished(Error::MissingParameter {
                    parameter: STORAGE_CLASSES_PARAMETER.to_string(),
                })
            })?;

        let candidates = selection::parse_candidates(classes).map_err(ProvisionFailure::finished)?;

        let storage_class = selection::select_storage_class(self.lister.as_ref(), node, &candidates)
            .map_err(ProvisionFailure::reschedule)?;

        info!(
            claim = %options.claim.name_any(),
            node = %node.name_any(),
            storage_class = %storage_class.name_any(),
            "selected backing storage class"
        );

        let mut volume = self
            .provision_with(&options, &storage_class, node)
            .await
            .map_err(|e| {
                error!(
                    pv = %options.pv_name,
                    storage_class = %storage_class.name_any(),
                    error = %e,
                    "provisioning failed"
                );
                ProvisionFailure::in_background(e)
            })?;

        volume.metadata.resource_version = None;
        Ok(volume)
    }

    /// Volumes belong to their backend once handed over
    pub async fn delete(&self, volume: &PersistentVolume) -> Result<()> {
        debug!(pv = %volume.name_any(), "delete called");
        Ok(())
    }

    async fn provision_with(
        &self,
        options: &ProvisionOptions,
        storage_class: &StorageClass,
        node: &Node,
    ) -> Result<PersistentVolume> {
        let bound = self.create_backing_claim(options, storage_class, node).await?;

        let volume = self.release_volume(&bound).await?;
        info!(
            pv = %volume.name_any(),
            storage_class = ?volume.spec.as_ref().and_then(|s| s.storage_class_name.as_deref()),
            "persistent volume released"
        );

        self.rebind_claim(&options.claim, volume, storage_class).await
    }

    /// Create the proxy claim and return it once the backend bound it
    async fn create_backing_claim(
        &self,
        options: &ProvisionOptions,
        storage_class: &StorageClass,
        node: &Node,
    ) -> Result<PersistentVolumeClaim> {
        let node_name = node.name_any();

        match self.config.method {
            ProvisionMethod::Annotation => {
                let proxy = objects::proxy_claim(
                    &options.pv_name,
                    &options.claim,
                    storage_class,
                    Some(&node_name),
                );
                self.ensure_claim(&proxy).await?;
                self.wait_bound(&proxy).await
            }
            ProvisionMethod::Pod => {
                let proxy = objects::proxy_claim(&options.pv_name, &options.claim, storage_class, None);
                self.ensure_claim(&proxy).await?;

                let pod = objects::placeholder_pod(&proxy, &node_name, &self.config.pause_image);
                match self.api.create_pod(&pod).await {
                    Ok(_) => debug!(pod = %pod.name_any(), "placeholder pod created"),
                    Err(e) if e.is_already_exists() => {}
                    Err(e) => return Err(e),
                }

                let bound = self.wait_bound(&proxy).await?;
                self.delete_pod(&pod.namespace().unwrap_or_default(), &pod.name_any())
                    .await?;
                Ok(bound)
            }
        }
    }

    /// Create the claim unless it already exists
    async fn ensure_claim(&self, claim: &PersistentVolumeClaim) -> Result<()> {
        let namespace = claim_namespace(claim)?;
        let name = claim.name_any();

        if self.lister.claim(&namespace, &name).is_some() {
            debug!(claim = %name, namespace = %namespace, "proxy claim already exists");
            return Ok(());
        }

        match self.api.create_claim(claim).await {
            Ok(_) => {
                debug!(claim = %name, namespace = %namespace, "proxy claim created");
                Ok(())
            }
            Err(e) if e.is_already_exists() => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn wait_bound(&self, claim: &PersistentVolumeClaim) -> Result<PersistentVolumeClaim> {
        let namespace = claim_namespace(claim)?;
        let name = claim.name_any();

        let events = self.api.watch_claim(&namespace, &name).await?;
        wait::wait_for_bound(events, &name, self.config.bind_timeout)
            .await
            .map_err(|e| {
                error!(claim = %name, namespace = %namespace, error = %e, "error to bind persistent volume");
                e
            })
    }

    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<()> {
        self.config
            .cleanup_retry
            .run("delete pod", |_| async move {
                debug!(pod = %name, "trying to delete pod");
                match self.api.delete_pod(namespace, name).await {
                    Err(e) if !e.is_not_found() => Err(e),
                    _ => Ok(()),
                }
            })
            .await
            .map_err(|e| {
                error!(pod = %name, error = %e, "error to delete pod");
                e
            })
    }

    /// Detach the volume from the proxy claim without losing it.
    ///
    /// Retain first so deleting the proxy claim keeps the volume, drop the
    /// pvc-protection finalizer so the delete is not deferred, delete the
    /// claim, then clear the volume's claim reference.
    async fn release_volume(&self, proxy: &PersistentVolumeClaim) -> Result<PersistentVolume> {
        let namespace = claim_namespace(proxy)?;
        let name = proxy.name_any();
        let volume_name = proxy
            .spec
            .as_ref()
            .and_then(|spec| spec.volume_name.clone())
            .filter(|v| !v.is_empty())
            .ok_or_else(|| Error::Internal(format!("bound claim {} has no volume name", name)))?;

        self.api
            .patch_volume(&volume_name, &patches::reclaim_policy(RECLAIM_RETAIN))
            .await?;

        self.api
            .patch_claim(&namespace, &name, &patches::strip_protection_finalizer(proxy.finalizers()))
            .await?;

        self.config
            .cleanup_retry
            .run("delete persistent volume claim", |_| {
                let (namespace, name) = (&namespace, &name);
                async move {
                    debug!(claim = %name, "trying to delete persistent volume claim");
                    match self.api.delete_claim(namespace, name).await {
                        Err(e) if !e.is_not_found() => Err(e),
                        _ => Ok(()),
                    }
                }
            })
            .await
            .map_err(|e| {
                error!(claim = %name, error = %e, "error to delete persistent volume claim");
                e
            })?;

        self.api
            .patch_volume(&volume_name, &patches::clear_claim_ref())
            .await
    }

    /// Bind the caller's claim to the released volume.
    ///
    /// Backends built on the generic provisioning framework cannot adopt an
    /// existing volume, so the claim is patched directly.
    async fn rebind_claim(
        &self,
        claim: &PersistentVolumeClaim,
        volume: PersistentVolume,
        storage_class: &StorageClass,
    ) -> Result<PersistentVolume> {
        let namespace = claim_namespace(claim)?;
        let volume_name = volume.name_any();

        self.api
            .patch_claim(
                &namespace,
                &claim.name_any(),
                &patches::bind_claim(&storage_class.provisioner, &volume_name),
            )
            .await?;

        if storage_class.reclaim_policy.as_deref() != Some(RECLAIM_DELETE) {
            return Ok(volume);
        }

        let patch = match self.config.method {
            ProvisionMethod::Annotation => patches::reclaim_policy_with_claim_ref(RECLAIM_DELETE, claim),
            ProvisionMethod::Pod => patches::reclaim_policy(RECLAIM_DELETE),
        };
        self.api.patch_volume(&volume_name, &patch).await
    }
}

#[async_trait]
impl Provisioner for HybridProvisioner {
    async fn provision(
        &self,
        options: ProvisionOptions,
    ) -> std::result::Result<PersistentVolume, ProvisionFailure> {
        HybridProvisioner::provision(self, options).await
    }

    async fn delete(&self, volume: &PersistentVolume) -> Result<()> {
        HybridProvisioner::delete(self, volume).await
    }
}

fn claim_namespace(claim: &PersistentVolumeClaim) -> Result<String> {
    claim
        .namespace()
        .ok_or_else(|| Error::Internal(format!("claim {} has no namespace", claim.name_any())))
}
