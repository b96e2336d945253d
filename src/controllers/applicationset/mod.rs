use std::sync::Arc;

use async_trait::async_trait;

use crate::argocd::applicationsets::{
    self as argo, ApplicationSetCreateRequest, ApplicationSetDeleteRequest,
    ApplicationSetGetQuery, ApplicationSetService,
};
use crate::argocd::{ArgoClient, ObjectMeta};
use crate::controllers::application::compare as application;
use crate::controllers::managed::{ManagedResource, ParametersOf};
use crate::engine::compare::{
    late_init, matches, matches_list, matches_map, matches_nested, matches_str,
};
use crate::engine::{ConnectionDetails, Creation, ExternalKind, ManagedOf};
use crate::resources::applicationsets::*;
use crate::secrets::SecretResolver;
use crate::Result;

pub mod convert;

pub struct ApplicationSetKind {
    service: Arc<dyn ApplicationSetService>,
}

impl ApplicationSetKind {
    pub fn new(service: Arc<dyn ApplicationSetService>) -> Self {
        Self { service }
    }

    /// ApplicationSets have no separate update call: create and update both upsert
    async fn upsert(&self, name: &str, parameters: &ApplicationSetParameters) -> Result<()> {
        self.service
            .create(&ApplicationSetCreateRequest {
                applicationset: argo::ApplicationSet {
                    metadata: ObjectMeta {
                        name: name.into(),
                        namespace: parameters.app_namespace.clone().unwrap_or_default(),
                        ..Default::default()
                    },
                    spec: convert::spec_to_wire(parameters),
                    ..Default::default()
                },
                upsert: true,
            })
            .await?;
        Ok(())
    }
}

#[async_trait]
impl ExternalKind for ApplicationSetKind {
    const KIND: &'static str = "ApplicationSet";

    type Parameters = ApplicationSetParameters;
    type Observation = ApplicationSetObservation;
    type Remote = argo::ApplicationSet;

    async fn get(
        &self,
        resource: &ManagedOf<Self>,
        external_name: &str,
    ) -> Result<Option<argo::ApplicationSet>> {
        let appset = self
            .service
            .get(&ApplicationSetGetQuery {
                name: external_name.into(),
                appset_namespace: resource.parameters.app_namespace.clone(),
            })
            .await?;
        Ok(Some(appset))
    }

    fn late_initialize(
        &self,
        parameters: &mut ApplicationSetParameters,
        remote: &argo::ApplicationSet,
    ) {
        let observed = convert::spec_from_wire(&remote.spec);
        late_init(&mut parameters.go_template_options, observed.go_template_options);
        late_init(&mut parameters.sync_policy, observed.sync_policy);
    }

    fn observe(&self, remote: Option<&argo::ApplicationSet>) -> ApplicationSetObservation {
        convert::observation(remote.map(|appset| &appset.status))
    }

    fn is_up_to_date(
        &self,
        parameters: &ApplicationSetParameters,
        remote: &argo::ApplicationSet,
    ) -> bool {
        is_up_to_date(parameters, &remote.spec)
    }

    async fn create(&self, resource: &ManagedOf<Self>) -> Result<Creation> {
        self.upsert(&resource.name, &resource.parameters).await?;
        Ok(Creation::default())
    }

    async fn update(
        &self,
        resource: &ManagedOf<Self>,
        external_name: &str,
    ) -> Result<ConnectionDetails> {
        self.upsert(external_name, &resource.parameters).await?;
        Ok(ConnectionDetails::new())
    }

    async fn delete(&self, resource: &ManagedOf<Self>, external_name: &str) -> Result<()> {
        self.service
            .delete(&ApplicationSetDeleteRequest {
                name: external_name.into(),
                appset_namespace: resource.parameters.app_namespace.clone(),
            })
            .await?;
        Ok(())
    }
}

pub fn is_up_to_date(
    desired: &ApplicationSetParameters,
    observed: &argo::ApplicationSetSpec,
) -> bool {
    matches(&desired.go_template, &observed.go_template)
        && matches_list(
            &desired.go_template_options,
            &observed.go_template_options,
            |d, o| d == o,
        )
        && desired.generators.len() == observed.generators.len()
        && desired
            .generators
            .iter()
            .zip(&observed.generators)
            .all(|(d, o)| generator_matches(d, o))
        && template_matches(&desired.template, &observed.template)
        && matches_nested(&desired.sync_policy, observed.sync_policy.as_ref(), |d, o| {
            matches(&d.preserve_resources_on_deletion, &o.preserve_resources_on_deletion)
                && d
                    .applications_sync
                    .is_none_or(|p| o.applications_sync.as_deref() == Some(p.as_str()))
        })
        && opaque_matches(&desired.strategy, &observed.strategy)
        && matches_nested(
            &desired.preserved_fields,
            observed.preserved_fields.as_ref(),
            |d, o| {
                matches_list(&d.annotations, &o.annotations, |d, o| d == o)
                    && matches_list(&d.labels, &o.labels, |d, o| d == o)
            },
        )
        && matches_list(
            &desired.ignore_application_differences,
            &observed.ignore_application_differences,
            |d, o| {
                matches_str(&d.name, &o.name)
                    && matches_list(&d.json_pointers, &o.json_pointers, |d, o| d == o)
                    && matches_list(&d.jq_path_expressions, &o.jq_path_expressions, |d, o| d == o)
            },
        )
        && desired
            .template_patch
            .as_ref()
            .is_none_or(|d| observed.template_patch.as_ref() == Some(d))
}

fn opaque_matches(
    desired: &Option<serde_json::Value>,
    observed: &Option<serde_json::Value>,
) -> bool {
    desired.is_none() || desired == observed
}

fn template_matches(d: &ApplicationSetTemplate, o: &argo::ApplicationSetTemplate) -> bool {
    d.metadata.name == o.metadata.name
        && matches_str(&d.metadata.namespace, &o.metadata.namespace)
        && matches_map(&d.metadata.labels, &o.metadata.labels)
        && matches_map(&d.metadata.annotations, &o.metadata.annotations)
        && matches_list(&d.metadata.finalizers, &o.metadata.finalizers, |d, o| d == o)
        && application::is_up_to_date(&d.spec, &o.spec)
}

fn nested_template_matches(
    d: &Option<ApplicationSetTemplate>,
    o: &Option<argo::ApplicationSetTemplate>,
) -> bool {
    matches_nested(d, o.as_ref(), template_matches)
}

fn generator_matches(d: &ApplicationSetGenerator, o: &argo::ApplicationSetGenerator) -> bool {
    matches_nested(&d.list, o.list.as_ref(), |d, o| {
        d.elements == o.elements
            && d.elements_yaml
                .as_ref()
                .is_none_or(|y| o.elements_yaml.as_ref() == Some(y))
            && nested_template_matches(&d.template, &o.template)
    }) && matches_nested(&d.clusters, o.clusters.as_ref(), |d, o| {
        d.selector
            .as_ref()
            .is_none_or(|s| o.selector.as_ref() == Some(&convert::selector_to_wire(s)))
            && nested_template_matches(&d.template, &o.template)
            && matches_map(&d.values, &o.values)
    }) && matches_nested(&d.git, o.git.as_ref(), |d, o| {
        d.repo_url == o.repo_url
            && d.revision == o.revision
            && matches_list(&d.directories, &o.directories, |d, o| {
                d.path == o.path && matches(&d.exclude, &o.exclude)
            })
            && matches_list(&d.files, &o.files, |d, o| d.path == o.path)
            && d.requeue_after_seconds
                .is_none_or(|s| o.requeue_after_seconds == Some(s))
            && nested_template_matches(&d.template, &o.template)
            && matches_str(&d.path_param_prefix, &o.path_param_prefix)
    }) && opaque_matches(&d.matrix, &o.matrix)
        && opaque_matches(&d.merge, &o.merge)
        && opaque_matches(&d.scm_provider, &o.scm_provider)
        && opaque_matches(&d.pull_request, &o.pull_request)
        && opaque_matches(&d.plugin, &o.plugin)
        && d.selector
            .as_ref()
            .is_none_or(|s| o.selector.as_ref() == Some(&convert::selector_to_wire(s)))
}

impl ManagedResource for ApplicationSet {
    type Kind = ApplicationSetKind;

    const FINALIZER: &'static str = APPLICATION_SET_FINALIZER;

    fn parameters(&self) -> &ParametersOf<Self> {
        &self.spec.for_provider
    }

    fn status(&self) -> Option<&ApplicationSetStatus> {
        self.status.as_ref()
    }

    fn connect(client: ArgoClient, _secrets: SecretResolver) -> ApplicationSetKind {
        ApplicationSetKind::new(Arc::new(client))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
    use serde_json::json;

    use super::*;
    use crate::argocd::{ServiceError, ServiceResult};
    use crate::engine::{Engine, Managed, Step};
    use crate::resources::applications::{
        ApplicationDestination, ApplicationSource, ApplicationSpecParameters,
    };

    #[derive(Default)]
    struct FakeApplicationSetService {
        appsets: Mutex<Vec<argo::ApplicationSet>>,
        upserts: Mutex<Vec<bool>>,
    }

    #[async_trait]
    impl ApplicationSetService for FakeApplicationSetService {
        async fn get(&self, query: &ApplicationSetGetQuery) -> ServiceResult<argo::ApplicationSet> {
            self.appsets
                .lock()
                .unwrap()
                .iter()
                .find(|a| a.metadata.name == query.name)
                .cloned()
                .ok_or_else(|| ServiceError::NotFound(query.name.clone()))
        }

        async fn create(
            &self,
            request: &ApplicationSetCreateRequest,
        ) -> ServiceResult<argo::ApplicationSet> {
            self.upserts.lock().unwrap().push(request.upsert);
            let mut appsets = self.appsets.lock().unwrap();
            appsets.retain(|a| a.metadata.name != request.applicationset.metadata.name);
            appsets.push(request.applicationset.clone());
            Ok(request.applicationset.clone())
        }

        async fn delete(&self, request: &ApplicationSetDeleteRequest) -> ServiceResult<()> {
            self.appsets
                .lock()
                .unwrap()
                .retain(|a| a.metadata.name != request.name);
            Ok(())
        }
    }

    fn parameters() -> ApplicationSetParameters {
        ApplicationSetParameters {
            go_template: Some(true),
            go_template_options: Some(vec!["missingkey=error".into()]),
            generators: vec![
                ApplicationSetGenerator {
                    list: Some(ListGenerator {
                        elements: vec![
                            json!({"cluster": "prod", "url": "https://prod.example.com"}),
                        ],
                        ..Default::default()
                    }),
                    ..Default::default()
                },
                ApplicationSetGenerator {
                    clusters: Some(ClusterGenerator {
                        selector: Some(LabelSelector {
                            match_labels: Some(BTreeMap::from([("env".into(), "prod".into())])),
                            ..Default::default()
                        }),
                        ..Default::default()
                    }),
                    ..Default::default()
                },
                ApplicationSetGenerator {
                    matrix: Some(json!({
                        "generators": [{"git": {"repoURL": "https://github.com/org/apps.git"}}]
                    })),
                    ..Default::default()
                },
            ],
            template: ApplicationSetTemplate {
                metadata: ApplicationSetTemplateMeta {
                    name: "{{.cluster}}-guestbook".into(),
                    ..Default::default()
                },
                spec: ApplicationSpecParameters {
                    project: Some("default".into()),
                    source: Some(ApplicationSource {
                        repo_url: "https://github.com/argoproj/argocd-example-apps.git".into(),
                        path: Some("guestbook".into()),
                        ..Default::default()
                    }),
                    destination: ApplicationDestination {
                        server: Some("{{.url}}".into()),
                        namespace: Some("guestbook".into()),
                        name: None,
                    },
                    ..Default::default()
                },
            },
            sync_policy: Some(ApplicationSetSyncPolicy {
                preserve_resources_on_deletion: Some(true),
                applications_sync: Some(ApplicationsSyncPolicy::CreateUpdate),
            }),
            ..Default::default()
        }
    }

    fn managed(
        parameters: ApplicationSetParameters,
        external_name: Option<&str>,
    ) -> ManagedOf<ApplicationSetKind> {
        Managed {
            name: "guestbook".into(),
            uid: Some("7d1e".into()),
            external_name: external_name.map(Into::into),
            deleting: false,
            parameters,
            status: Default::default(),
        }
    }

    #[test]
    fn desired_state_matches_its_own_conversion() {
        let params = parameters();
        assert!(is_up_to_date(&params, &convert::spec_to_wire(&params)));
    }

    #[test]
    fn drift_in_third_generator_is_detected() {
        let params = parameters();
        let mut observed = convert::spec_to_wire(&params);
        observed.generators[2].matrix = Some(json!({"generators": []}));
        assert!(!is_up_to_date(&params, &observed));
    }

    #[test]
    fn unknown_applications_sync_policy_is_dropped() {
        let policy = convert::sync_policy_from_wire(&argo::ApplicationSetSyncPolicy {
            preserve_resources_on_deletion: false,
            applications_sync: Some("sometimes".into()),
        });
        assert_eq!(policy, ApplicationSetSyncPolicy::default());
    }

    #[tokio::test]
    async fn create_and_update_both_upsert() {
        let service = Arc::new(FakeApplicationSetService::default());
        let engine = Engine::new(ApplicationSetKind::new(service.clone()));

        let mut resource = managed(parameters(), None);
        assert_eq!(engine.reconcile(&mut resource).await.unwrap().step, Step::Created);

        resource.parameters.template.metadata.name = "{{.cluster}}-guestbook-v2".into();
        assert_eq!(engine.reconcile(&mut resource).await.unwrap().step, Step::Updated);

        let stored = service.appsets.lock().unwrap()[0].clone();
        assert_eq!(stored.spec.template.metadata.name, "{{.cluster}}-guestbook-v2");
        assert_eq!(*service.upserts.lock().unwrap(), vec![true, true]);
    }

    #[tokio::test]
    async fn late_init_copies_sync_policy_once() {
        let mut remote = argo::ApplicationSet {
            metadata: ObjectMeta {
                name: "guestbook".into(),
                ..Default::default()
            },
            ..Default::default()
        };
        remote.spec.go_template_options = vec!["missingkey=error".into()];
        remote.spec.sync_policy = Some(argo::ApplicationSetSyncPolicy {
            preserve_resources_on_deletion: true,
            applications_sync: Some("create-only".into()),
        });
        let service = FakeApplicationSetService::default();
        service.appsets.lock().unwrap().push(remote);
        let engine = Engine::new(ApplicationSetKind::new(Arc::new(service)));

        let mut resource = managed(Default::default(), Some("guestbook"));
        assert!(engine.observe(&mut resource).await.unwrap().late_initialized);
        assert_eq!(
            resource.parameters.sync_policy.as_ref().unwrap().applications_sync,
            Some(ApplicationsSyncPolicy::CreateOnly)
        );
        assert!(!engine.observe(&mut resource).await.unwrap().late_initialized);
    }

    #[tokio::test]
    async fn no_external_name_means_absent() {
        let engine = Engine::new(ApplicationSetKind::new(Arc::new(
            FakeApplicationSetService::default(),
        )));
        let observation = engine
            .observe(&mut managed(parameters(), None))
            .await
            .unwrap();
        assert!(!observation.exists);
    }
}
