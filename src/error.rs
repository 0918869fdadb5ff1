//! Error types for the hybrid provisioner
//!
//! Provides structured error types for topology matching, the provisioning
//! state machine, the claim controller and the protocol services.

use std::time::Duration;
use thiserror::Error;

/// Unified error type for the provisioner
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Internal Errors
    // =========================================================================
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    // =========================================================================
    // Kubernetes Errors
    // =========================================================================
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("failed to {operation} {kind} {name}: {source}")]
    Api {
        operation: &'static str,
        kind: &'static str,
        name: String,
        #[source]
        source: kube::Error,
    },

    #[error("Watch error: {0}")]
    Watch(#[from] kube::runtime::watcher::Error),

    #[error("Resource not found: {kind}/{name}")]
    ResourceNotFound { kind: String, name: String },

    #[error("Resource already exists: {kind}/{name}")]
    ResourceExists { kind: String, name: String },

    // =========================================================================
    // Provisioning Errors
    // =========================================================================
    #[error("storageClass is required")]
    MissingStorageClass,

    #[error("selected node is required")]
    MissingSelectedNode,

    #[error("{parameter} parameter is required")]
    MissingParameter { parameter: String },

    #[error("CSINode for selected node {node:?} not found")]
    CsiNodeNotFound { node: String },

    #[error("no matching storage class found for selected node {node:?}")]
    NoMatchingStorageClass { node: String },

    #[error("timeout waiting for PersistentVolumeClaim {name} to be bound after {timeout:?}")]
    BindTimeout { name: String, timeout: Duration },

    #[error("watch on PersistentVolumeClaim {name} closed unexpectedly")]
    WatchClosed { name: String },

    #[error("PersistentVolumeClaim {name} was deleted while waiting for it to be bound")]
    ClaimDeleted { name: String },

    #[error("gave up to {operation} after {attempts} attempts: {last_error}")]
    RetryExhausted {
        operation: String,
        attempts: u32,
        last_error: String,
    },

    // =========================================================================
    // Protocol Errors
    // =========================================================================
    #[error("{method} is not implemented")]
    Unimplemented { method: &'static str },

    #[error("failed to get {label} for node {node}")]
    MissingNodeLabel { node: String, label: String },

    // =========================================================================
    // Parse Errors
    // =========================================================================
    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    // =========================================================================
    // IO Errors
    // =========================================================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Action to take on error during reconciliation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorAction {
    /// Requeue with exponential backoff
    RequeueWithBackoff,
    /// Requeue after specific duration
    RequeueAfter(Duration),
    /// Don't requeue, wait for changes
    NoRequeue,
}

impl Error {
    /// Wrap a Kubernetes API error with the operation and object it concerns.
    ///
    /// `404` becomes [`Error::ResourceNotFound`] and `409 AlreadyExists`
    /// becomes [`Error::ResourceExists`] so callers can treat them as
    /// idempotent outcomes.
    pub fn api(
        operation: &'static str,
        kind: &'static str,
        name: impl Into<String>,
        source: kube::Error,
    ) -> Self {
        let name = name.into();
        match &source {
            kube::Error::Api(resp) if resp.code == 404 => Error::ResourceNotFound {
                kind: kind.to_string(),
                name,
            },
            kube::Error::Api(resp) if resp.code == 409 && resp.reason == "AlreadyExists" => {
                Error::ResourceExists {
                    kind: kind.to_string(),
                    name,
                }
            }
            _ => Error::Api {
                operation,
                kind,
                name,
                source,
            },
        }
    }

    /// Determine what action to take for this error
    pub fn action(&self) -> ErrorAction {
        match self {
            // Transient errors - retry with backoff
            Error::Kube(_)
            | Error::Api { .. }
            | Error::Watch(_)
            | Error::WatchClosed { .. }
            | Error::ClaimDeleted { .. }
            | Error::RetryExhausted { .. } => ErrorAction::RequeueWithBackoff,

            // Backend did not bind in time - give it a moment
            Error::BindTimeout { .. } => ErrorAction::RequeueAfter(Duration::from_secs(10)),

            // Node topology or driver registration has not converged yet
            Error::CsiNodeNotFound { .. } | Error::NoMatchingStorageClass { .. } => {
                ErrorAction::RequeueAfter(Duration::from_secs(30))
            }

            // Configuration errors - don't retry automatically
            Error::Configuration(_)
            | Error::MissingStorageClass
            | Error::MissingSelectedNode
            | Error::MissingParameter { .. }
            | Error::Unimplemented { .. } => ErrorAction::NoRequeue,

            // All other errors - retry with backoff
            _ => ErrorAction::RequeueWithBackoff,
        }
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        !matches!(self.action(), ErrorAction::NoRequeue)
    }

    /// Check if this error is an "already exists" response
    pub fn is_already_exists(&self) -> bool {
        matches!(self, Error::ResourceExists { .. })
    }

    /// Check if this error is a "not found" response
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::ResourceNotFound { .. })
    }
}

/// Result type alias for the provisioner
pub type Result<T> = std::result::Result<T, Error>;
