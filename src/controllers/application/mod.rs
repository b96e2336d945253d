use std::sync::Arc;

use async_trait::async_trait;

use crate::argocd::applications::{
    self as argo, ApplicationCreateRequest, ApplicationDeleteRequest, ApplicationQuery,
    ApplicationService, ApplicationUpdateRequest,
};
use crate::argocd::{ArgoClient, ObjectMeta};
use crate::controllers::managed::{ManagedResource, ParametersOf};
use crate::engine::{ConnectionDetails, Creation, ExternalKind, ManagedOf};
use crate::resources::applications::{
    Application, ApplicationObservation, ApplicationParameters, ApplicationStatus,
    APPLICATION_FINALIZER,
};
use crate::secrets::SecretResolver;
use crate::Result;

pub mod compare;
pub mod convert;

pub struct ApplicationKind {
    service: Arc<dyn ApplicationService>,
}

impl ApplicationKind {
    pub fn new(service: Arc<dyn ApplicationService>) -> Self {
        Self { service }
    }

    fn to_wire(&self, name: &str, parameters: &ApplicationParameters) -> argo::Application {
        argo::Application {
            metadata: ObjectMeta {
                name: name.into(),
                namespace: parameters.app_namespace.clone().unwrap_or_default(),
                ..Default::default()
            },
            spec: convert::spec_to_wire(&parameters.spec),
            ..Default::default()
        }
    }
}

/// Healthy, and the last sync operation (if any) succeeded
fn is_available(app: &argo::Application) -> bool {
    let operation_ok = app
        .status
        .operation_state
        .as_ref()
        .is_none_or(|op| op.phase == "Succeeded");
    let health = app.status.health.status.as_str();
    operation_ok && (health.is_empty() || health == "Healthy")
}

#[async_trait]
impl ExternalKind for ApplicationKind {
    const KIND: &'static str = "Application";

    type Parameters = ApplicationParameters;
    type Observation = ApplicationObservation;
    type Remote = argo::Application;

    async fn get(
        &self,
        resource: &ManagedOf<Self>,
        external_name: &str,
    ) -> Result<Option<argo::Application>> {
        let app = self
            .service
            .get(&ApplicationQuery {
                name: external_name.into(),
                app_namespace: resource.parameters.app_namespace.clone(),
            })
            .await?;
        Ok(Some(app))
    }

    fn late_initialize(&self, parameters: &mut ApplicationParameters, remote: &argo::Application) {
        compare::late_initialize(&mut parameters.spec, &remote.spec);
    }

    fn observe(&self, remote: Option<&argo::Application>) -> ApplicationObservation {
        convert::observation(remote.map(|app| &app.status))
    }

    fn is_available(&self, remote: &argo::Application) -> bool {
        is_available(remote)
    }

    fn is_up_to_date(
        &self,
        parameters: &ApplicationParameters,
        remote: &argo::Application,
    ) -> bool {
        compare::is_up_to_date(&parameters.spec, &remote.spec)
    }

    async fn create(&self, resource: &ManagedOf<Self>) -> Result<Creation> {
        self.service
            .create(&ApplicationCreateRequest {
                application: self.to_wire(&resource.name, &resource.parameters),
                upsert: false,
                validate: true,
            })
            .await?;
        Ok(Creation::default())
    }

    async fn update(
        &self,
        resource: &ManagedOf<Self>,
        external_name: &str,
    ) -> Result<ConnectionDetails> {
        self.service
            .update(&ApplicationUpdateRequest {
                application: self.to_wire(external_name, &resource.parameters),
                validate: true,
            })
            .await?;
        Ok(ConnectionDetails::new())
    }

    async fn delete(&self, resource: &ManagedOf<Self>, external_name: &str) -> Result<()> {
        self.service
            .delete(&ApplicationDeleteRequest {
                name: external_name.into(),
                app_namespace: resource.parameters.app_namespace.clone(),
                cascade: Some(true),
            })
            .await?;
        Ok(())
    }
}

impl ManagedResource for Application {
    type Kind = ApplicationKind;

    const FINALIZER: &'static str = APPLICATION_FINALIZER;

    fn parameters(&self) -> &ParametersOf<Self> {
        &self.spec.for_provider
    }

    fn status(&self) -> Option<&ApplicationStatus> {
        self.status.as_ref()
    }

    fn connect(client: ArgoClient, _secrets: SecretResolver) -> ApplicationKind {
        ApplicationKind::new(Arc::new(client))
    }
}

#[cfg(test)]
pub(crate) mod fake {
    use std::sync::Mutex;

    use super::*;
    use crate::argocd::{ServiceError, ServiceResult};

    /// Applications keyed by name, with a log of every write
    #[derive(Default)]
    pub struct FakeApplicationService {
        pub apps: Mutex<Vec<argo::Application>>,
        pub writes: Mutex<Vec<(&'static str, argo::Application)>>,
    }

    impl FakeApplicationService {
        pub fn with_app(self, app: argo::Application) -> Self {
            self.apps.lock().unwrap().push(app);
            self
        }

        fn store(&self, app: &argo::Application) {
            let mut apps = self.apps.lock().unwrap();
            apps.retain(|a| a.metadata.name != app.metadata.name);
            apps.push(app.clone());
        }
    }

    #[async_trait]
    impl ApplicationService for FakeApplicationService {
        async fn get(&self, query: &ApplicationQuery) -> ServiceResult<argo::Application> {
            self.apps
                .lock()
                .unwrap()
                .iter()
                .find(|a| a.metadata.name == query.name)
                .cloned()
                .ok_or_else(|| ServiceError::NotFound(format!("application {}", query.name)))
        }

        async fn create(
            &self,
            request: &ApplicationCreateRequest,
        ) -> ServiceResult<argo::Application> {
            self.writes
                .lock()
                .unwrap()
                .push(("create", request.application.clone()));
            self.store(&request.application);
            Ok(request.application.clone())
        }

        async fn update(
            &self,
            request: &ApplicationUpdateRequest,
        ) -> ServiceResult<argo::Application> {
            self.writes
                .lock()
                .unwrap()
                .push(("update", request.application.clone()));
            self.store(&request.application);
            Ok(request.application.clone())
        }

        async fn delete(&self, request: &ApplicationDeleteRequest) -> ServiceResult<()> {
            let mut apps = self.apps.lock().unwrap();
            let before = apps.len();
            apps.retain(|a| a.metadata.name != request.name);
            if apps.len() == before {
                return Err(ServiceError::NotFound(request.name.clone()));
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fake::FakeApplicationService;
    use super::*;
    use crate::engine::{Engine, Managed, Step};
    use crate::resources::applications::{SyncPolicy, SyncPolicyAutomated};
    use crate::resources::READY;

    fn managed(
        parameters: ApplicationParameters,
        external_name: Option<&str>,
    ) -> ManagedOf<ApplicationKind> {
        Managed {
            name: "guestbook".into(),
            uid: Some("0b5c6a1e".into()),
            external_name: external_name.map(Into::into),
            deleting: false,
            parameters,
            status: Default::default(),
        }
    }

    fn remote(spec: argo::ApplicationSpec) -> argo::Application {
        argo::Application {
            metadata: ObjectMeta {
                name: "guestbook".into(),
                ..Default::default()
            },
            spec,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn no_external_name_means_absent() {
        let service =
            Arc::new(FakeApplicationService::default().with_app(remote(Default::default())));
        let engine = Engine::new(ApplicationKind::new(service));
        let observation = engine
            .observe(&mut managed(Default::default(), None))
            .await
            .unwrap();
        assert!(!observation.exists);
    }

    #[tokio::test]
    async fn enabling_self_heal_sends_full_sync_policy() {
        let observed = argo::ApplicationSpec {
            project: "default".into(),
            sync_policy: None,
            ..Default::default()
        };
        let service = Arc::new(FakeApplicationService::default().with_app(remote(observed)));
        let engine = Engine::new(ApplicationKind::new(service.clone()));

        let mut resource = managed(
            ApplicationParameters {
                spec: crate::resources::applications::ApplicationSpecParameters {
                    sync_policy: Some(SyncPolicy {
                        automated: Some(SyncPolicyAutomated {
                            self_heal: Some(true),
                            ..Default::default()
                        }),
                        ..Default::default()
                    }),
                    ..Default::default()
                },
                ..Default::default()
            },
            Some("guestbook"),
        );

        let outcome = engine.reconcile(&mut resource).await.unwrap();
        assert_eq!(outcome.step, Step::Updated);
        // project was filled in from ArgoCD's default
        assert!(outcome.observation.late_initialized);
        assert_eq!(resource.parameters.spec.project.as_deref(), Some("default"));

        let writes = service.writes.lock().unwrap();
        let (op, sent) = &writes[0];
        assert_eq!(*op, "update");
        assert_eq!(sent.metadata.name, "guestbook");
        assert_eq!(sent.spec.project, "default");
        assert!(sent.spec.sync_policy.as_ref().unwrap().automated.as_ref().unwrap().self_heal);
    }

    #[tokio::test]
    async fn create_uses_resource_name() {
        let service = Arc::new(FakeApplicationService::default());
        let engine = Engine::new(ApplicationKind::new(service.clone()));
        let mut resource = managed(Default::default(), None);

        let outcome = engine.reconcile(&mut resource).await.unwrap();
        assert_eq!(outcome.step, Step::Created);
        assert_eq!(resource.external_name.as_deref(), Some("guestbook"));
        assert_eq!(service.writes.lock().unwrap()[0].0, "create");
    }

    #[tokio::test]
    async fn failed_sync_operation_is_unavailable() {
        let mut app = remote(Default::default());
        app.status.health.status = "Healthy".into();
        app.status.operation_state = Some(argo::OperationState {
            phase: "Failed".into(),
            ..Default::default()
        });
        let service = Arc::new(FakeApplicationService::default().with_app(app));
        let engine = Engine::new(ApplicationKind::new(service));

        let mut resource = managed(Default::default(), Some("guestbook"));
        let observation = engine.observe(&mut resource).await.unwrap();
        assert!(observation.exists);
        assert!(observation.up_to_date);
        assert!(!resource.status.condition(READY).unwrap().is_true());
    }

    #[test]
    fn availability_needs_health_and_successful_operation() {
        let mut app = remote(Default::default());
        assert!(is_available(&app));

        app.status.health.status = "Degraded".into();
        assert!(!is_available(&app));

        app.status.health.status = "Healthy".into();
        app.status.operation_state = Some(argo::OperationState {
            phase: "Succeeded".into(),
            ..Default::default()
        });
        assert!(is_available(&app));
    }

    #[tokio::test]
    async fn deleting_missing_application_is_gone() {
        let engine = Engine::new(ApplicationKind::new(Arc::new(
            FakeApplicationService::default(),
        )));
        let mut resource = managed(Default::default(), Some("guestbook"));
        resource.deleting = true;
        let outcome = engine.reconcile(&mut resource).await.unwrap();
        assert_eq!(outcome.step, Step::Gone);
    }
}
