use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::argocd::ServiceError;
use crate::resources::{Condition, ManagedStatus};
use crate::secrets::SecretData;
use crate::{Error, Result};

pub mod compare;

/// The external operation that failed
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Operation {
    Observe,
    Create,
    Update,
    Delete,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Operation::Observe => "observe",
            Operation::Create => "create",
            Operation::Update => "update",
            Operation::Delete => "delete",
        })
    }
}

/// Credentials or other details produced by the external service, keyed for a Secret
pub type ConnectionDetails = SecretData;

/// Result of comparing the desired state with what ArgoCD has
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Observation {
    pub exists: bool,
    /// Always false when the object does not exist
    pub up_to_date: bool,
    /// Late-initialization filled in desired fields that must be persisted
    pub late_initialized: bool,
}

impl Observation {
    pub fn absent() -> Self {
        Self::default()
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Creation {
    /// Identifier assigned by the service; the resource name is used when `None`
    pub external_name: Option<String>,
    pub connection_details: ConnectionDetails,
}

/// The engine's view of a managed resource, independent of its CRD
#[derive(Clone, Debug)]
pub struct Managed<P, O> {
    pub name: String,
    pub uid: Option<String>,
    pub external_name: Option<String>,
    /// Deletion was requested
    pub deleting: bool,
    pub parameters: P,
    pub status: ManagedStatus<O>,
}

pub type ManagedOf<K> =
    Managed<<K as ExternalKind>::Parameters, <K as ExternalKind>::Observation>;

/// What a kind must provide for the engine to reconcile it.
///
/// `get`, `create`, `update` and `delete` return service failures as `Error::Service`;
/// the engine classifies them and attaches the kind and operation. The remaining methods
/// are pure.
#[async_trait]
pub trait ExternalKind: Send + Sync + Sized {
    const KIND: &'static str;

    type Parameters: Clone + PartialEq + Send + Sync;
    type Observation: Send + Sync;
    type Remote: Send + Sync;

    /// Fetch the external object. `Ok(None)` when the kind itself can tell it is absent.
    async fn get(&self, resource: &ManagedOf<Self>, external_name: &str)
        -> Result<Option<Self::Remote>>;

    /// Copy observed values into unset desired fields
    fn late_initialize(&self, parameters: &mut Self::Parameters, remote: &Self::Remote);

    /// `None` yields the default observation
    fn observe(&self, remote: Option<&Self::Remote>) -> Self::Observation;

    fn is_available(&self, _remote: &Self::Remote) -> bool {
        true
    }

    fn is_up_to_date(&self, parameters: &Self::Parameters, remote: &Self::Remote) -> bool;

    async fn create(&self, resource: &ManagedOf<Self>) -> Result<Creation>;

    async fn update(
        &self,
        resource: &ManagedOf<Self>,
        external_name: &str,
    ) -> Result<ConnectionDetails>;

    async fn delete(&self, resource: &ManagedOf<Self>, external_name: &str) -> Result<()>;
}

/// What a reconcile pass did
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Step {
    Unchanged,
    Created,
    Updated,
    Deleted,
    /// Deletion requested and nothing left externally
    Gone,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Outcome {
    pub observation: Observation,
    pub step: Step,
    pub connection_details: ConnectionDetails,
}

/// Drives one kind from observation to the single corrective action it needs.
///
/// Calls within a pass are sequential and nothing is retried here; failures go back to
/// the caller, whose scheduler owns the backoff.
pub struct Engine<K> {
    kind: K,
}

impl<K: ExternalKind> Engine<K> {
    pub fn new(kind: K) -> Self {
        Self { kind }
    }

    pub fn kind(&self) -> &K {
        &self.kind
    }

    pub async fn observe(&self, resource: &mut ManagedOf<K>) -> Result<Observation> {
        let Some(external_name) = resource.external_name.clone() else {
            return Ok(Observation::absent());
        };

        debug!("Observing {} {external_name}", K::KIND);

        let remote = match self.kind.get(resource, &external_name).await {
            Ok(Some(remote)) => remote,
            Ok(None) | Err(Error::Service(ServiceError::NotFound(_))) => {
                resource.status.at_provider = Some(self.kind.observe(None));
                return Ok(Observation::absent());
            }
            // ArgoCD answers PermissionDenied for objects that are already gone, which is
            // indistinguishable from a real denial. Only trust it while deleting.
            Err(Error::Service(ServiceError::PermissionDenied(_))) if resource.deleting => {
                return Ok(Observation::absent());
            }
            Err(err) => return Err(external(K::KIND, Operation::Observe, err)),
        };

        let before = resource.parameters.clone();
        self.kind.late_initialize(&mut resource.parameters, &remote);
        let late_initialized = resource.parameters != before;

        resource.status.at_provider = Some(self.kind.observe(Some(&remote)));
        resource
            .status
            .set_condition(if self.kind.is_available(&remote) {
                Condition::available()
            } else {
                Condition::unavailable()
            });

        Ok(Observation {
            exists: true,
            up_to_date: self.kind.is_up_to_date(&resource.parameters, &remote),
            late_initialized,
        })
    }

    /// Create the external object and record its external name
    pub async fn create(&self, resource: &mut ManagedOf<K>) -> Result<ConnectionDetails> {
        info!("Creating {} {}", K::KIND, resource.name);

        let creation = self
            .kind
            .create(resource)
            .await
            .map_err(|err| external(K::KIND, Operation::Create, err))?;

        resource.external_name = Some(
            creation
                .external_name
                .unwrap_or_else(|| resource.name.clone()),
        );
        resource.status.set_condition(Condition::creating());
        Ok(creation.connection_details)
    }

    pub async fn update(&self, resource: &ManagedOf<K>) -> Result<ConnectionDetails> {
        let external_name = self.external_name(resource)?;
        info!("Updating {} {external_name}", K::KIND);

        self.kind
            .update(resource, external_name)
            .await
            .map_err(|err| external(K::KIND, Operation::Update, err))
    }

    /// Delete the external object. An object that is already gone counts as deleted.
    pub async fn delete(&self, resource: &mut ManagedOf<K>) -> Result<()> {
        resource.status.set_condition(Condition::deleting());
        let Some(external_name) = resource.external_name.as_deref() else {
            return Ok(());
        };
        info!("Deleting {} {external_name}", K::KIND);

        match self.kind.delete(resource, external_name).await {
            Ok(()) | Err(Error::Service(ServiceError::NotFound(_))) => Ok(()),
            Err(Error::Service(ServiceError::PermissionDenied(_))) if resource.deleting => Ok(()),
            Err(err) => Err(external(K::KIND, Operation::Delete, err)),
        }
    }

    /// One full pass: observe, then create, update or delete as needed
    pub async fn reconcile(&self, resource: &mut ManagedOf<K>) -> Result<Outcome> {
        let observation = self.observe(resource).await?;
        let mut connection_details = ConnectionDetails::new();

        let step = if resource.deleting {
            if observation.exists {
                self.delete(resource).await?;
                Step::Deleted
            } else {
                resource.status.set_condition(Condition::deleting());
                Step::Gone
            }
        } else if !observation.exists {
            connection_details = self.create(resource).await?;
            Step::Created
        } else if !observation.up_to_date {
            connection_details = self.update(resource).await?;
            Step::Updated
        } else {
            Step::Unchanged
        };

        Ok(Outcome {
            observation,
            step,
            connection_details,
        })
    }

    /// [`Engine::reconcile`] bounded by `timeout`; a stalled pass is retried later
    pub async fn reconcile_within(
        &self,
        resource: &mut ManagedOf<K>,
        timeout: Duration,
    ) -> Result<Outcome> {
        tokio::time::timeout(timeout, self.reconcile(resource))
            .await
            .map_err(|_| Error::Timeout(timeout))?
    }

    fn external_name<'a>(&self, resource: &'a ManagedOf<K>) -> Result<&'a str> {
        resource
            .external_name
            .as_deref()
            .ok_or_else(|| Error::MissingExternalName {
                kind: K::KIND,
                name: resource.name.clone(),
            })
    }
}

/// Attach kind and operation to service failures; other errors pass through untouched
fn external(kind: &'static str, operation: Operation, err: Error) -> Error {
    match err {
        Error::Service(source) => Error::External {
            kind,
            operation,
            source,
        },
        err => err,
    }
}


#[cfg(test)]
mod tests {
    use super::fake::*;
    use super::*;
    use crate::resources::READY;

    fn remote(size: i64) -> Remote {
        Remote {
            size,
            labels: vec!["a".into(), "b".into(), "c".into()],
            healthy: true,
        }
    }

    #[tokio::test]
    async fn observe_without_external_name_is_absent_and_calls_nothing() {
        let engine = Engine::new(FakeKind::with_remote(remote(1)));
        let mut mr = managed(Params::default(), None);

        let observation = engine.observe(&mut mr).await.unwrap();
        assert_eq!(observation, Observation::absent());
        assert!(engine.kind().calls().is_empty());
    }

    #[tokio::test]
    async fn not_found_is_absent() {
        let kind = FakeKind::default();
        *kind.get_error.lock().unwrap() = Some(ServiceError::NotFound("gone".into()));
        let engine = Engine::new(kind);
        let mut mr = managed(Params::default(), Some("example"));

        let observation = engine.observe(&mut mr).await.unwrap();
        assert!(!observation.exists);
        assert!(!observation.up_to_date);
    }

    #[tokio::test]
    async fn permission_denied_is_absent_only_while_deleting() {
        let kind = FakeKind::default();
        *kind.get_error.lock().unwrap() = Some(ServiceError::PermissionDenied("no".into()));
        let engine = Engine::new(kind);
        let mut mr = managed(Params::default(), Some("example"));

        let err = engine.observe(&mut mr).await.unwrap_err();
        assert!(matches!(
            err,
            Error::External {
                kind: "Fake",
                operation: Operation::Observe,
                source: ServiceError::PermissionDenied(_)
            }
        ));
        assert_eq!(err.to_string(), "cannot observe Fake: permission denied: no");

        *engine.kind().get_error.lock().unwrap() =
            Some(ServiceError::PermissionDenied("no".into()));
        mr.deleting = true;
        assert!(!engine.observe(&mut mr).await.unwrap().exists);
    }

    #[tokio::test]
    async fn observe_late_initializes_and_sets_ready() {
        let engine = Engine::new(FakeKind::with_remote(Remote {
            healthy: false,
            ..remote(3)
        }));
        let mut mr = managed(Params::default(), Some("example"));

        let observation = engine.observe(&mut mr).await.unwrap();
        assert!(observation.exists);
        assert!(observation.late_initialized);
        assert!(observation.up_to_date);
        assert_eq!(mr.parameters.size, Some(3));
        assert_eq!(mr.status.at_provider, Some(3));
        let ready = mr.status.condition(READY).unwrap();
        assert_eq!(ready.reason, "Unavailable");

        // a second pass has nothing left to fill in
        let observation = engine.observe(&mut mr).await.unwrap();
        assert!(!observation.late_initialized);
    }

    #[tokio::test]
    async fn drift_in_third_list_element_is_detected() {
        let engine = Engine::new(FakeKind::with_remote(remote(1)));
        let mut mr = managed(
            Params {
                size: Some(1),
                labels: Some(vec!["a".into(), "b".into(), "x".into()]),
            },
            Some("example"),
        );

        let outcome = engine.reconcile(&mut mr).await.unwrap();
        assert!(!outcome.observation.up_to_date);
        assert_eq!(outcome.step, Step::Updated);
        assert_eq!(engine.kind().calls(), vec!["get", "update"]);
    }

    #[tokio::test]
    async fn reconcile_creates_and_assigns_external_name() {
        let engine = Engine::new(FakeKind::default());
        let mut mr = managed(Params::default(), None);

        let outcome = engine.reconcile(&mut mr).await.unwrap();
        assert_eq!(outcome.step, Step::Created);
        assert_eq!(mr.external_name.as_deref(), Some("example"));
        assert_eq!(mr.status.condition(READY).unwrap().reason, "Creating");

        let engine = Engine::new(FakeKind {
            assigned_name: Some("https://kubernetes.default.svc".into()),
            ..Default::default()
        });
        let mut mr = managed(Params::default(), None);
        engine.reconcile(&mut mr).await.unwrap();
        assert_eq!(
            mr.external_name.as_deref(),
            Some("https://kubernetes.default.svc")
        );
    }

    #[tokio::test]
    async fn reconcile_leaves_up_to_date_objects_alone() {
        let engine = Engine::new(FakeKind::with_remote(remote(1)));
        let mut mr = managed(Params::default(), Some("example"));

        let outcome = engine.reconcile(&mut mr).await.unwrap();
        assert_eq!(outcome.step, Step::Unchanged);
        assert_eq!(engine.kind().calls(), vec!["get"]);
    }

    #[tokio::test]
    async fn stalled_pass_times_out_and_is_retried() {
        let kind = FakeKind {
            get_delay: Some(Duration::from_millis(200)),
            ..FakeKind::with_remote(remote(1))
        };
        let engine = Engine::new(kind);
        let mut mr = managed(Params::default(), Some("example"));

        let err = engine
            .reconcile_within(&mut mr, Duration::from_millis(10))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Timeout(t) if t == Duration::from_millis(10)));
        assert!(err.is_retryable());
        assert_eq!(engine.kind().calls(), vec!["get"]);
    }

    #[tokio::test]
    async fn pass_within_timeout_completes() {
        let kind = FakeKind {
            get_delay: Some(Duration::from_millis(1)),
            ..FakeKind::with_remote(remote(1))
        };
        let engine = Engine::new(kind);
        let mut mr = managed(Params::default(), Some("example"));

        let outcome = engine
            .reconcile_within(&mut mr, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(outcome.step, Step::Unchanged);
    }

    #[tokio::test]
    async fn deletion_tolerates_objects_already_gone() {
        let kind = FakeKind::with_remote(remote(1));
        *kind.delete_error.lock().unwrap() = Some(ServiceError::NotFound("gone".into()));
        let engine = Engine::new(kind);
        let mut mr = managed(Params::default(), Some("example"));
        mr.deleting = true;

        let outcome = engine.reconcile(&mut mr).await.unwrap();
        assert_eq!(outcome.step, Step::Deleted);
        assert_eq!(mr.status.condition(READY).unwrap().reason, "Deleting");

        let engine = Engine::new(FakeKind::default());
        let outcome = engine.reconcile(&mut mr).await.unwrap();
        assert_eq!(outcome.step, Step::Gone);
        assert_eq!(engine.kind().calls(), vec!["get"]);
    }

    #[tokio::test]
    async fn delete_failures_carry_kind_and_operation() {
        let kind = FakeKind::with_remote(remote(1));
        *kind.delete_error.lock().unwrap() = Some(ServiceError::Unavailable("down".into()));
        let engine = Engine::new(kind);
        let mut mr = managed(Params::default(), Some("example"));
        mr.deleting = true;

        let err = engine.reconcile(&mut mr).await.unwrap_err();
        assert!(matches!(
            err,
            Error::External {
                operation: Operation::Delete,
                ..
            }
        ));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn update_requires_external_name() {
        let engine = Engine::new(FakeKind::default());
        let mr = managed(Params::default(), None);
        assert!(matches!(
            engine.update(&mr).await,
            Err(Error::MissingExternalName { kind: "Fake", .. })
        ));
        assert!(engine.kind().calls().is_empty());
    }
}
