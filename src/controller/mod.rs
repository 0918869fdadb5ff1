//! Claim Controller
//!
//! Watches PersistentVolumeClaims of hybrid StorageClasses and drives the
//! provisioner once the scheduler picked a node:
//!
//! 1. Skip claims already bound or being deleted
//! 2. Skip claims whose class is served by another provisioner
//! 3. Wait for the selected-node annotation
//! 4. Provision `pvc-<uid>` and create the returned volume
//! 5. On failure, finish, reschedule or retry with backoff

use crate::domain::ports::{
    ClusterApiRef, ClusterListerRef, ProvisionOptions, ProvisionerRef, ProvisioningState,
};
use crate::error::{Error, ErrorAction, Result};
use crate::metrics::{
    ProvisionMetrics, RESULT_FAILED, RESULT_IN_BACKGROUND, RESULT_RESCHEDULED, RESULT_SUCCESS,
};
use crate::provisioner::{patches, ANN_BETA_STORAGE_CLASS, ANN_SELECTED_NODE};
use backoff::backoff::Backoff;
use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use dashmap::DashMap;
use futures::StreamExt;
use k8s_openapi::api::core::v1::PersistentVolumeClaim;
use kube::api::Api;
use kube::runtime::controller::{Action, Controller};
use kube::runtime::watcher;
use kube::{Client, ResourceExt};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

// =============================================================================
// Configuration
// =============================================================================

/// Requeue backoff for claims whose provisioning continues in the background
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(300),
        }
    }
}

// =============================================================================
// Outcome
// =============================================================================

/// What a reconcile pass did with a claim
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Not ours to act on
    Ignored(&'static str),
    /// Volume created and bound
    Provisioned(String),
    /// Final failure, wait for the claim to change
    AwaitChange,
    /// Selected node cleared for the scheduler to retry
    Rescheduled,
    /// Provisioning continues, come back later
    RequeueAfter(Duration),
}

impl Outcome {
    fn action(&self) -> Action {
        match self {
            Outcome::RequeueAfter(delay) => Action::requeue(*delay),
            _ => Action::await_change(),
        }
    }
}

// =============================================================================
// Context
// =============================================================================

/// Shared state for reconciles
pub struct Context {
    provisioner: ProvisionerRef,
    lister: ClusterListerRef,
    api: ClusterApiRef,
    driver_name: String,
    metrics: ProvisionMetrics,
    config: ControllerConfig,
    /// Per-claim requeue backoff, keyed by claim uid
    backoffs: DashMap<String, ExponentialBackoff>,
}

impl Context {
    pub fn new(
        provisioner: ProvisionerRef,
        lister: ClusterListerRef,
        api: ClusterApiRef,
        driver_name: impl Into<String>,
        metrics: ProvisionMetrics,
        config: ControllerConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            provisioner,
            lister,
            api,
            driver_name: driver_name.into(),
            metrics,
            config,
            backoffs: DashMap::new(),
        })
    }

    fn next_backoff(&self, key: &str) -> Duration {
        let mut backoff = self.backoffs.entry(key.to_string()).or_insert_with(|| {
            ExponentialBackoffBuilder::new()
                .with_initial_interval(self.config.initial_backoff)
                .with_max_interval(self.config.max_backoff)
                .with_randomization_factor(0.0)
                .with_max_elapsed_time(None)
                .build()
        });
        backoff.next_backoff().unwrap_or(self.config.max_backoff)
    }

    fn reset_backoff(&self, key: &str) {
        self.backoffs.remove(key);
    }
}

// =============================================================================
// Reconcile
// =============================================================================

/// Name of the volume provisioned for `claim`
pub fn volume_name(claim: &PersistentVolumeClaim) -> Result<String> {
    claim
        .uid()
        .map(|uid| format!("pvc-{}", uid))
        .ok_or_else(|| Error::Internal(format!("claim {} has no uid", claim.name_any())))
}

/// The beta annotation wins over `spec.storageClassName`, as in Kubernetes
fn storage_class_name(claim: &PersistentVolumeClaim) -> Option<String> {
    claim
        .annotations()
        .get(ANN_BETA_STORAGE_CLASS)
        .cloned()
        .or_else(|| claim.spec.as_ref().and_then(|spec| spec.storage_class_name.clone()))
        .filter(|name| !name.is_empty())
}

/// Run one pass over `claim`
pub async fn reconcile_claim(claim: &PersistentVolumeClaim, ctx: &Context) -> Result<Outcome> {
    let name = claim.name_any();
    let namespace = claim.namespace().unwrap_or_default();

    let backoff_key = claim.uid().unwrap_or_default();

    let bound = claim
        .spec
        .as_ref()
        .and_then(|spec| spec.volume_name.as_deref())
        .is_some_and(|v| !v.is_empty());
    if bound {
        ctx.reset_backoff(&backoff_key);
        return Ok(Outcome::Ignored("claim is bound"));
    }
    if claim.metadata.deletion_timestamp.is_some() {
        ctx.reset_backoff(&backoff_key);
        return Ok(Outcome::Ignored("claim is being deleted"));
    }

    let Some(class_name) = storage_class_name(claim) else {
        return Ok(Outcome::Ignored("claim has no storage class"));
    };
    let Some(storage_class) = ctx.lister.storage_class(&class_name) else {
        return Ok(Outcome::Ignored("storage class not found"));
    };
    if storage_class.provisioner != ctx.driver_name {
        return Ok(Outcome::Ignored("storage class served by another provisioner"));
    }

    let Some(node_name) = claim.annotations().get(ANN_SELECTED_NODE).cloned() else {
        return Ok(Outcome::Ignored("no node selected yet"));
    };
    let node = ctx
        .lister
        .node(&node_name)
        .ok_or_else(|| Error::ResourceNotFound {
            kind: "Node".to_string(),
            name: node_name.clone(),
        })?;

    let pv_name = volume_name(claim)?;

    info!(
        claim = %name,
        namespace = %namespace,
        node = %node_name,
        storage_class = %class_name,
        pv = %pv_name,
        "provisioning claim"
    );

    let options = ProvisionOptions {
        pv_name: pv_name.clone(),
        claim: claim.clone(),
        storage_class: Some(storage_class.as_ref().clone()),
        selected_node: Some(node.as_ref().clone()),
    };

    let started = Instant::now();
    let result = ctx.provisioner.provision(options).await;
    let elapsed = started.elapsed();

    match result {
        Ok(volume) => {
            match ctx.api.create_volume(&volume).await {
                Ok(_) => {}
                Err(e) if e.is_already_exists() => {
                    debug!(pv = %volume.name_any(), "persistent volume already exists")
                }
                Err(e) => {
                    ctx.metrics.observe(RESULT_IN_BACKGROUND, elapsed);
                    return Err(e);
                }
            }

            ctx.reset_backoff(&backoff_key);
            ctx.metrics.observe(RESULT_SUCCESS, elapsed);
            let volume_name = volume.name_any();
            info!(claim = %name, namespace = %namespace, pv = %volume_name, "claim provisioned");
            Ok(Outcome::Provisioned(volume_name))
        }
        Err(failure) => match failure.state {
            ProvisioningState::Finished => {
                ctx.reset_backoff(&backoff_key);
                ctx.metrics.observe(RESULT_FAILED, elapsed);
                warn!(claim = %name, namespace = %namespace, error = %failure.error, "provisioning failed");
                Ok(Outcome::AwaitChange)
            }
            ProvisioningState::Reschedule => {
                ctx.reset_backoff(&backoff_key);
                ctx.metrics.observe(RESULT_RESCHEDULED, elapsed);
                warn!(
                    claim = %name,
                    namespace = %namespace,
                    node = %node_name,
                    error = %failure.error,
                    "rescheduling claim"
                );
                ctx.api
                    .patch_claim(&namespace, &name, &patches::clear_selected_node())
                    .await?;
                Ok(Outcome::Rescheduled)
            }
            ProvisioningState::InBackground => {
                ctx.metrics.observe(RESULT_IN_BACKGROUND, elapsed);
                let delay = ctx.next_backoff(&backoff_key);
                warn!(
                    claim = %name,
                    namespace = %namespace,
                    error = %failure.error,
                    retry_in = ?delay,
                    "provisioning continues in background"
                );
                Ok(Outcome::RequeueAfter(delay))
            }
        },
    }
}

async fn reconcile(claim: Arc<PersistentVolumeClaim>, ctx: Arc<Context>) -> Result<Action> {
    let outcome = reconcile_claim(&claim, &ctx).await?;
    if let Outcome::Ignored(reason) = &outcome {
        debug!(claim = %claim.name_any(), reason, "claim ignored");
    }
    Ok(outcome.action())
}

fn error_policy(claim: Arc<PersistentVolumeClaim>, error: &Error, ctx: Arc<Context>) -> Action {
    let action = match error.action() {
        ErrorAction::RequeueWithBackoff => {
            Action::requeue(ctx.next_backoff(&claim.uid().unwrap_or_default()))
        }
        ErrorAction::RequeueAfter(delay) => Action::requeue(delay),
        ErrorAction::NoRequeue => Action::await_change(),
    };

    error!(
        claim = %claim.name_any(),
        namespace = ?claim.namespace(),
        error = %error,
        "reconcile failed"
    );
    action
}

// =============================================================================
// Controller
// =============================================================================

/// Run the controller over all claims until a shutdown signal arrives
pub async fn run(client: Client, ctx: Arc<Context>) {
    let claims: Api<PersistentVolumeClaim> = Api::all(client);

    info!(driver = %ctx.driver_name, "starting claim controller");

    Controller::new(claims, watcher::Config::default())
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .for_each(|result| async move {
            match result {
                Ok((claim, _)) => debug!(claim = %claim, "reconciled"),
                Err(e) => warn!(error = %e, "controller error"),
            }
        })
        .await;

    info!("claim controller stopped");
}
