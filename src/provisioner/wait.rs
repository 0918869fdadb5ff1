//! Waiting for a claim to be bound

use super::CLAIM_BOUND;
use crate::domain::ports::{ClaimEvent, ClaimEventStream};
use crate::error::{Error, Result};
use futures::StreamExt;
use k8s_openapi::api::core::v1::PersistentVolumeClaim;
use std::time::Duration;
use tracing::trace;

/// Whether the claim reached the Bound phase
pub fn is_bound(claim: &PersistentVolumeClaim) -> bool {
    claim
        .status
        .as_ref()
        .and_then(|status| status.phase.as_deref())
        == Some(CLAIM_BOUND)
}

/// Consume claim events until the claim is bound or `timeout` elapses.
///
/// Dropping the returned future cancels the wait and the subscription.
pub async fn wait_for_bound(
    events: ClaimEventStream,
    name: &str,
    timeout: Duration,
) -> Result<PersistentVolumeClaim> {
    tokio::time::timeout(timeout, next_bound(events, name))
        .await
        .map_err(|_| Error::BindTimeout {
            name: name.to_string(),
            timeout,
        })?
}

async fn next_bound(mut events: ClaimEventStream, name: &str) -> Result<PersistentVolumeClaim> {
    while let Some(event) = events.next().await {
        match event? {
            ClaimEvent::Applied(claim) if is_bound(&claim) => return Ok(claim),
            ClaimEvent::Applied(_) => trace!(claim = name, "claim not bound yet"),
            ClaimEvent::Deleted => {
                return Err(Error::ClaimDeleted {
                    name: name.to_string(),
                })
            }
        }
    }

    Err(Error::WatchClosed {
        name: name.to_string(),
    })
}
