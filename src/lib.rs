use std::time::Duration;

use thiserror::Error;

use argocd::ServiceError;
use engine::Operation;

#[derive(Error, Debug)]
pub enum Error {
    #[error("SerializationError: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Kube Error: {0}")]
    KubeError(#[from] kube::Error),

    #[error("Finalizer Error: {0}")]
    // NB: awkward type because finalizer::Error embeds the reconciler error (which is this)
    // so boxing this error to break cycles
    FinalizerError(#[from] Box<kube::runtime::finalizer::Error<Error>>),

    #[error("cannot {operation} {kind}: {source}")]
    External {
        kind: &'static str,
        operation: Operation,
        #[source]
        source: ServiceError,
    },

    // Raised by the per-kind capability code; the engine rewraps it as `External`
    #[error(transparent)]
    Service(#[from] ServiceError),

    #[error("The Secret {1} in namespace {0} does not exist")]
    SecretNotFound(String, String),

    #[error("The Secret key {2} in {0}/{1} does not exist")]
    SecretKeyNotFound(String, String, String),

    #[error("The Secret key {2} in {0}/{1} is not valid UTF-8")]
    InvalidSecretData(String, String, String),

    #[error("Invalid {kind} parameters: {message}")]
    InvalidParameters { kind: &'static str, message: String },

    #[error("{kind} {name} has no external name; it has not been created yet")]
    MissingExternalName { kind: &'static str, name: String },

    #[error("Reconcile did not complete within {0:?}")]
    Timeout(Duration),

    #[error("Invalid ArgoCD server address: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    pub fn metric_label(&self) -> &'static str {
        match self {
            Error::SerializationError(_) => "SerializationError",
            Error::KubeError(_) => "KubeError",
            Error::FinalizerError(_) => "FinalizerError",
            Error::External { source, .. } | Error::Service(source) => source.metric_label(),
            Error::SecretNotFound(..) => "SecretNotFound",
            Error::SecretKeyNotFound(..) => "SecretKeyNotFound",
            Error::InvalidSecretData(..) => "InvalidSecretData",
            Error::InvalidParameters { .. } => "InvalidParameters",
            Error::MissingExternalName { .. } => "MissingExternalName",
            Error::Timeout(_) => "Timeout",
            Error::InvalidUrl(_) => "InvalidUrl",
        }
    }

    /// Whether the scheduler's backoff may resolve the failure without a spec change.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::External { source, .. } | Error::Service(source) => source.is_retryable(),
            Error::KubeError(_) | Error::Timeout(_) | Error::FinalizerError(_) => true,
            // the secret may be created or rotated in later
            Error::SecretNotFound(..) | Error::SecretKeyNotFound(..) => true,
            Error::SerializationError(_)
            | Error::InvalidSecretData(..)
            | Error::InvalidParameters { .. }
            | Error::MissingExternalName { .. }
            | Error::InvalidUrl(_) => false,
        }
    }

    pub(crate) fn invalid(kind: &'static str, message: impl Into<String>) -> Self {
        Error::InvalidParameters {
            kind,
            message: message.into(),
        }
    }
}

/// ArgoCD API client and wire types
pub mod argocd;

/// Generic reconciliation state machine
pub mod engine;

pub mod controllers;
pub use controllers::{run, State};

/// Secret lookups for credential references
pub mod secrets;

/// Log and trace integrations
pub mod telemetry;

/// Metrics
mod metrics;

pub use metrics::Metrics;

/// Managed resource CRDs
pub mod resources;
