use std::sync::Arc;

use async_trait::async_trait;

use crate::argocd::projects::{
    self as argo, AppProject, ProjectCreateRequest, ProjectService, ProjectUpdateRequest,
};
use crate::argocd::{ArgoClient, ObjectMeta};
use crate::controllers::managed::{ManagedResource, ParametersOf};
use crate::engine::compare::{
    late_init, matches, matches_list, matches_nested, matches_str, non_empty, non_empty_list,
    non_false,
};
use crate::engine::{ConnectionDetails, Creation, ExternalKind, ManagedOf};
use crate::resources::projects::*;
use crate::secrets::SecretResolver;
use crate::Result;

pub struct ProjectKind {
    service: Arc<dyn ProjectService>,
}

impl ProjectKind {
    pub fn new(service: Arc<dyn ProjectService>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl ExternalKind for ProjectKind {
    const KIND: &'static str = "Project";

    type Parameters = ProjectParameters;
    type Observation = ProjectObservation;
    type Remote = AppProject;

    async fn get(
        &self,
        _resource: &ManagedOf<Self>,
        external_name: &str,
    ) -> Result<Option<AppProject>> {
        Ok(Some(self.service.get(external_name).await?))
    }

    fn late_initialize(&self, parameters: &mut ProjectParameters, remote: &AppProject) {
        let spec = &remote.spec;
        late_init(&mut parameters.description, non_empty(&spec.description));
        late_init(
            &mut parameters.orphaned_resources,
            spec.orphaned_resources.as_ref().map(orphaned_resources_from_wire),
        );
        late_init(
            &mut parameters.source_namespaces,
            non_empty_list(&spec.source_namespaces),
        );
    }

    fn observe(&self, remote: Option<&AppProject>) -> ProjectObservation {
        remote.map(observation).unwrap_or_default()
    }

    fn is_up_to_date(&self, parameters: &ProjectParameters, remote: &AppProject) -> bool {
        is_up_to_date(parameters, &remote.spec)
    }

    async fn create(&self, resource: &ManagedOf<Self>) -> Result<Creation> {
        let parameters = &resource.parameters;
        self.service
            .create(&ProjectCreateRequest {
                project: AppProject {
                    metadata: ObjectMeta {
                        name: resource.name.clone(),
                        labels: parameters.project_labels.clone().unwrap_or_default(),
                        ..Default::default()
                    },
                    spec: spec_to_wire(parameters),
                    ..Default::default()
                },
                upsert: false,
            })
            .await?;
        Ok(Creation::default())
    }

    async fn update(
        &self,
        resource: &ManagedOf<Self>,
        external_name: &str,
    ) -> Result<ConnectionDetails> {
        // The PUT needs the current resourceVersion, and must carry issued tokens over
        let current = self.service.get(external_name).await?;

        let mut spec = spec_to_wire(&resource.parameters);
        for role in &mut spec.roles {
            if let Some(existing) = current.spec.roles.iter().find(|r| r.name == role.name) {
                role.jwt_tokens = existing.jwt_tokens.clone();
            }
        }

        self.service
            .update(&ProjectUpdateRequest {
                project: AppProject {
                    metadata: current.metadata,
                    spec,
                    ..Default::default()
                },
            })
            .await?;
        Ok(ConnectionDetails::new())
    }

    async fn delete(&self, _resource: &ManagedOf<Self>, external_name: &str) -> Result<()> {
        self.service.delete(external_name).await?;
        Ok(())
    }
}

impl ManagedResource for Project {
    type Kind = ProjectKind;

    const FINALIZER: &'static str = PROJECT_FINALIZER;

    fn parameters(&self) -> &ParametersOf<Self> {
        &self.spec.for_provider
    }

    fn status(&self) -> Option<&ProjectStatus> {
        self.status.as_ref()
    }

    fn connect(client: ArgoClient, _secrets: SecretResolver) -> ProjectKind {
        ProjectKind::new(Arc::new(client))
    }
}

/// Labels and role tokens are not compared: labels are only applied at creation and
/// tokens belong to `Token` resources.
pub fn is_up_to_date(desired: &ProjectParameters, observed: &argo::AppProjectSpec) -> bool {
    matches_str(&desired.description, &observed.description)
        && matches_list(&desired.source_repos, &observed.source_repos, |d, o| d == o)
        && matches_list(
            &desired.source_namespaces,
            &observed.source_namespaces,
            |d, o| d == o,
        )
        && matches_list(&desired.destinations, &observed.destinations, |d, o| {
            matches_str(&d.server, &o.server)
                && matches_str(&d.namespace, &o.namespace)
                && matches_str(&d.name, &o.name)
        })
        && matches_list(
            &desired.cluster_resource_whitelist,
            &observed.cluster_resource_whitelist,
            group_kind_matches,
        )
        && matches_list(
            &desired.cluster_resource_blacklist,
            &observed.cluster_resource_blacklist,
            group_kind_matches,
        )
        && matches_list(
            &desired.namespace_resource_whitelist,
            &observed.namespace_resource_whitelist,
            group_kind_matches,
        )
        && matches_list(
            &desired.namespace_resource_blacklist,
            &observed.namespace_resource_blacklist,
            group_kind_matches,
        )
        && matches_list(&desired.roles, &observed.roles, |d, o| {
            d.name == o.name
                && matches_str(&d.description, &o.description)
                && matches_list(&d.policies, &o.policies, |d, o| d == o)
                && matches_list(&d.groups, &o.groups, |d, o| d == o)
        })
        && matches_list(&desired.sync_windows, &observed.sync_windows, |d, o| {
            d.kind.is_none_or(|k| k.as_str() == o.kind)
                && d.schedule == o.schedule
                && matches_str(&d.duration, &o.duration)
                && matches_list(&d.applications, &o.applications, |d, o| d == o)
                && matches_list(&d.namespaces, &o.namespaces, |d, o| d == o)
                && matches_list(&d.clusters, &o.clusters, |d, o| d == o)
                && matches(&d.manual_sync, &o.manual_sync)
                && matches_str(&d.time_zone, &o.time_zone)
        })
        && matches_nested(
            &desired.orphaned_resources,
            observed.orphaned_resources.as_ref(),
            |d, o| {
                d.warn.is_none_or(|w| o.warn == Some(w))
                    && matches_list(&d.ignore, &o.ignore, |d, o| {
                        matches_str(&d.group, &o.group)
                            && matches_str(&d.kind, &o.kind)
                            && matches_str(&d.name, &o.name)
                    })
            },
        )
        && matches_list(&desired.signature_keys, &observed.signature_keys, |d, o| {
            d.key_id == o.key_id
        })
        && matches(
            &desired.permit_only_project_scoped_clusters,
            &observed.permit_only_project_scoped_clusters,
        )
}

fn group_kind_matches(d: &GroupKind, o: &argo::GroupKind) -> bool {
    d.group == o.group && d.kind == o.kind
}

fn group_kinds_to_wire(list: &Option<Vec<GroupKind>>) -> Vec<argo::GroupKind> {
    list.iter()
        .flatten()
        .map(|gk| argo::GroupKind {
            group: gk.group.clone(),
            kind: gk.kind.clone(),
        })
        .collect()
}

fn group_kinds_from_wire(list: &[argo::GroupKind]) -> Option<Vec<GroupKind>> {
    (!list.is_empty()).then(|| {
        list.iter()
            .map(|gk| GroupKind {
                group: gk.group.clone(),
                kind: gk.kind.clone(),
            })
            .collect()
    })
}

pub fn spec_to_wire(params: &ProjectParameters) -> argo::AppProjectSpec {
    argo::AppProjectSpec {
        source_repos: params.source_repos.clone().unwrap_or_default(),
        destinations: params
            .destinations
            .iter()
            .flatten()
            .map(|d| argo::ApplicationDestination {
                server: d.server.clone().unwrap_or_default(),
                namespace: d.namespace.clone().unwrap_or_default(),
                name: d.name.clone().unwrap_or_default(),
            })
            .collect(),
        description: params.description.clone().unwrap_or_default(),
        roles: params
            .roles
            .iter()
            .flatten()
            .map(|r| argo::ProjectRole {
                name: r.name.clone(),
                description: r.description.clone().unwrap_or_default(),
                policies: r.policies.clone().unwrap_or_default(),
                jwt_tokens: Vec::new(),
                groups: r.groups.clone().unwrap_or_default(),
            })
            .collect(),
        cluster_resource_whitelist: group_kinds_to_wire(&params.cluster_resource_whitelist),
        cluster_resource_blacklist: group_kinds_to_wire(&params.cluster_resource_blacklist),
        namespace_resource_blacklist: group_kinds_to_wire(&params.namespace_resource_blacklist),
        namespace_resource_whitelist: group_kinds_to_wire(&params.namespace_resource_whitelist),
        orphaned_resources: params.orphaned_resources.as_ref().map(|o| {
            argo::OrphanedResourcesMonitorSettings {
                warn: o.warn,
                ignore: o
                    .ignore
                    .iter()
                    .flatten()
                    .map(|k| argo::OrphanedResourceKey {
                        group: k.group.clone().unwrap_or_default(),
                        kind: k.kind.clone().unwrap_or_default(),
                        name: k.name.clone().unwrap_or_default(),
                    })
                    .collect(),
            }
        }),
        sync_windows: params
            .sync_windows
            .iter()
            .flatten()
            .map(|w| argo::SyncWindow {
                kind: w.kind.map(|k| k.as_str().to_string()).unwrap_or_default(),
                schedule: w.schedule.clone(),
                duration: w.duration.clone().unwrap_or_default(),
                applications: w.applications.clone().unwrap_or_default(),
                namespaces: w.namespaces.clone().unwrap_or_default(),
                clusters: w.clusters.clone().unwrap_or_default(),
                manual_sync: w.manual_sync.unwrap_or_default(),
                time_zone: w.time_zone.clone().unwrap_or_default(),
            })
            .collect(),
        signature_keys: params
            .signature_keys
            .iter()
            .flatten()
            .map(|k| argo::SignatureKey {
                key_id: k.key_id.clone(),
            })
            .collect(),
        source_namespaces: params.source_namespaces.clone().unwrap_or_default(),
        permit_only_project_scoped_clusters: params
            .permit_only_project_scoped_clusters
            .unwrap_or_default(),
    }
}

/// `projectLabels` live in metadata and are not recovered
pub fn spec_from_wire(spec: &argo::AppProjectSpec) -> ProjectParameters {
    ProjectParameters {
        description: non_empty(&spec.description),
        source_repos: non_empty_list(&spec.source_repos),
        source_namespaces: non_empty_list(&spec.source_namespaces),
        destinations: (!spec.destinations.is_empty()).then(|| {
            spec.destinations
                .iter()
                .map(|d| ProjectDestination {
                    server: non_empty(&d.server),
                    namespace: non_empty(&d.namespace),
                    name: non_empty(&d.name),
                })
                .collect()
        }),
        cluster_resource_whitelist: group_kinds_from_wire(&spec.cluster_resource_whitelist),
        cluster_resource_blacklist: group_kinds_from_wire(&spec.cluster_resource_blacklist),
        namespace_resource_whitelist: group_kinds_from_wire(&spec.namespace_resource_whitelist),
        namespace_resource_blacklist: group_kinds_from_wire(&spec.namespace_resource_blacklist),
        roles: (!spec.roles.is_empty()).then(|| {
            spec.roles
                .iter()
                .map(|r| ProjectRole {
                    name: r.name.clone(),
                    description: non_empty(&r.description),
                    policies: non_empty_list(&r.policies),
                    groups: non_empty_list(&r.groups),
                })
                .collect()
        }),
        sync_windows: (!spec.sync_windows.is_empty()).then(|| {
            spec.sync_windows
                .iter()
                .map(|w| SyncWindow {
                    kind: SyncWindowKind::parse(&w.kind),
                    schedule: w.schedule.clone(),
                    duration: non_empty(&w.duration),
                    applications: non_empty_list(&w.applications),
                    namespaces: non_empty_list(&w.namespaces),
                    clusters: non_empty_list(&w.clusters),
                    manual_sync: non_false(w.manual_sync),
                    time_zone: non_empty(&w.time_zone),
                })
                .collect()
        }),
        orphaned_resources: spec
            .orphaned_resources
            .as_ref()
            .map(orphaned_resources_from_wire),
        signature_keys: (!spec.signature_keys.is_empty()).then(|| {
            spec.signature_keys
                .iter()
                .map(|k| SignatureKey {
                    key_id: k.key_id.clone(),
                })
                .collect()
        }),
        permit_only_project_scoped_clusters: non_false(spec.permit_only_project_scoped_clusters),
        project_labels: None,
    }
}

fn orphaned_resources_from_wire(o: &argo::OrphanedResourcesMonitorSettings) -> OrphanedResources {
    OrphanedResources {
        warn: o.warn,
        ignore: (!o.ignore.is_empty()).then(|| {
            o.ignore
                .iter()
                .map(|k| OrphanedResourceKey {
                    group: non_empty(&k.group),
                    kind: non_empty(&k.kind),
                    name: non_empty(&k.name),
                })
                .collect()
        }),
    }
}

fn observation(project: &AppProject) -> ProjectObservation {
    // Older servers keep tokens on the role, newer ones in status
    let mut jwt_tokens_by_role = std::collections::BTreeMap::new();
    for role in &project.spec.roles {
        if !role.jwt_tokens.is_empty() {
            jwt_tokens_by_role.insert(
                role.name.clone(),
                role.jwt_tokens.iter().map(jwt_token).collect(),
            );
        }
    }
    for (role, tokens) in &project.status.jwt_tokens_by_role {
        jwt_tokens_by_role.insert(role.clone(), tokens.items.iter().map(jwt_token).collect());
    }

    ProjectObservation {
        jwt_tokens_by_role,
        sync_windows: project.spec.sync_windows.len(),
    }
}

fn jwt_token(token: &argo::JwtToken) -> JwtToken {
    JwtToken {
        id: non_empty(&token.id),
        iat: token.iat,
        exp: (token.exp != 0).then_some(token.exp),
    }
}

#[cfg(test)]
pub(crate) mod fake {
    use std::sync::Mutex;

    use super::*;
    use crate::argocd::projects::{
        ProjectTokenCreateRequest, ProjectTokenDeleteRequest, ProjectTokenResponse,
    };
    use crate::argocd::{ServiceError, ServiceResult};

    /// Projects keyed by name. Issued tokens are recorded on the role.
    #[derive(Default)]
    pub struct FakeProjectService {
        pub projects: Mutex<Vec<AppProject>>,
        pub calls: Mutex<Vec<String>>,
        /// Clock used for `iat` of issued tokens
        pub now: i64,
    }

    impl FakeProjectService {
        pub fn with_project(self, project: AppProject) -> Self {
            self.projects.lock().unwrap().push(project);
            self
        }

        pub fn project(&self, name: &str) -> Option<AppProject> {
            self.projects
                .lock()
                .unwrap()
                .iter()
                .find(|p| p.metadata.name == name)
                .cloned()
        }

        fn with_role<T>(
            &self,
            project: &str,
            role: &str,
            f: impl FnOnce(&mut argo::ProjectRole) -> T,
        ) -> ServiceResult<T> {
            let mut projects = self.projects.lock().unwrap();
            let project = projects
                .iter_mut()
                .find(|p| p.metadata.name == project)
                .ok_or_else(|| ServiceError::NotFound(project.to_string()))?;
            let role = project
                .spec
                .roles
                .iter_mut()
                .find(|r| r.name == role)
                .ok_or_else(|| ServiceError::NotFound(role.to_string()))?;
            Ok(f(role))
        }
    }

    #[async_trait]
    impl ProjectService for FakeProjectService {
        async fn get(&self, name: &str) -> ServiceResult<AppProject> {
            self.calls.lock().unwrap().push(format!("get {name}"));
            self.project(name)
                .ok_or_else(|| ServiceError::NotFound(format!("project {name}")))
        }

        async fn create(&self, request: &ProjectCreateRequest) -> ServiceResult<AppProject> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("create {}", request.project.metadata.name));
            self.projects.lock().unwrap().push(request.project.clone());
            Ok(request.project.clone())
        }

        async fn update(&self, request: &ProjectUpdateRequest) -> ServiceResult<AppProject> {
            let name = &request.project.metadata.name;
            self.calls.lock().unwrap().push(format!("update {name}"));
            let mut projects = self.projects.lock().unwrap();
            let existing = projects
                .iter_mut()
                .find(|p| &p.metadata.name == name)
                .ok_or_else(|| ServiceError::NotFound(name.clone()))?;
            if existing.metadata.resource_version != request.project.metadata.resource_version {
                return Err(ServiceError::Rejected {
                    status: 409,
                    message: "stale resourceVersion".into(),
                });
            }
            *existing = request.project.clone();
            Ok(existing.clone())
        }

        async fn delete(&self, name: &str) -> ServiceResult<()> {
            self.calls.lock().unwrap().push(format!("delete {name}"));
            self.projects
                .lock()
                .unwrap()
                .retain(|p| p.metadata.name != name);
            Ok(())
        }

        async fn create_token(
            &self,
            request: &ProjectTokenCreateRequest,
        ) -> ServiceResult<ProjectTokenResponse> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("create_token {}", request.id));
            let iat = self.now;
            let exp = if request.expires_in > 0 {
                iat + request.expires_in
            } else {
                0
            };
            self.with_role(&request.project, &request.role, |role| {
                role.jwt_tokens.push(argo::JwtToken {
                    iat,
                    exp,
                    id: request.id.clone(),
                })
            })?;
            Ok(ProjectTokenResponse {
                token: format!("jwt-{}-{iat}", request.id),
            })
        }

        async fn delete_token(&self, request: &ProjectTokenDeleteRequest) -> ServiceResult<()> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("delete_token {}", request.id));
            self.with_role(&request.project, &request.role, |role| {
                role.jwt_tokens
                    .retain(|t| !(t.id == request.id && t.iat == request.iat))
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::fake::FakeProjectService;
    use super::*;
    use crate::engine::{Engine, Managed, Step};

    fn managed(
        parameters: ProjectParameters,
        external_name: Option<&str>,
    ) -> ManagedOf<ProjectKind> {
        Managed {
            name: "team-a".into(),
            uid: Some("93c4".into()),
            external_name: external_name.map(Into::into),
            deleting: false,
            parameters,
            status: Default::default(),
        }
    }

    fn project(spec: argo::AppProjectSpec) -> AppProject {
        AppProject {
            metadata: ObjectMeta {
                name: "team-a".into(),
                resource_version: "17".into(),
                labels: BTreeMap::from([("l".into(), "v".into())]),
                ..Default::default()
            },
            spec,
            ..Default::default()
        }
    }

    fn full_parameters() -> ProjectParameters {
        ProjectParameters {
            description: Some("Team A".into()),
            source_repos: Some(vec!["https://github.com/org/*".into()]),
            source_namespaces: Some(vec!["team-a-*".into()]),
            destinations: Some(vec![ProjectDestination {
                server: Some("https://kubernetes.default.svc".into()),
                namespace: Some("team-a".into()),
                name: None,
            }]),
            cluster_resource_whitelist: Some(vec![GroupKind {
                group: "".into(),
                kind: "Namespace".into(),
            }]),
            cluster_resource_blacklist: None,
            namespace_resource_whitelist: None,
            namespace_resource_blacklist: Some(vec![GroupKind {
                group: "".into(),
                kind: "ResourceQuota".into(),
            }]),
            roles: Some(vec![ProjectRole {
                name: "ci".into(),
                description: Some("CI pipeline".into()),
                policies: Some(vec![
                    "p, proj:team-a:ci, applications, sync, team-a/*, allow".into(),
                ]),
                groups: Some(vec!["org:ci".into()]),
            }]),
            sync_windows: Some(vec![SyncWindow {
                kind: Some(SyncWindowKind::Deny),
                schedule: "0 22 * * *".into(),
                duration: Some("8h".into()),
                applications: Some(vec!["*".into()]),
                namespaces: None,
                clusters: None,
                manual_sync: Some(true),
                time_zone: Some("Europe/Berlin".into()),
            }]),
            orphaned_resources: Some(OrphanedResources {
                warn: Some(false),
                ignore: Some(vec![OrphanedResourceKey {
                    group: None,
                    kind: Some("ConfigMap".into()),
                    name: Some("kube-root-ca.crt".into()),
                }]),
            }),
            signature_keys: Some(vec![SignatureKey {
                key_id: "4AEE18F83AFDEB23".into(),
            }]),
            permit_only_project_scoped_clusters: Some(true),
            project_labels: None,
        }
    }

    #[test]
    fn round_trip_preserves_set_fields() {
        let params = full_parameters();
        assert_eq!(spec_from_wire(&spec_to_wire(&params)), params);
    }

    #[test]
    fn desired_state_matches_its_own_conversion() {
        let params = full_parameters();
        assert!(is_up_to_date(&params, &spec_to_wire(&params)));
    }

    #[test]
    fn drift_in_third_role_is_detected() {
        let role = |name: &str| ProjectRole {
            name: name.into(),
            ..Default::default()
        };
        let params = ProjectParameters {
            roles: Some(vec![role("a"), role("b"), role("c")]),
            ..Default::default()
        };
        let mut observed = spec_to_wire(&params);
        observed.roles[2].policies = vec!["p, proj:x:c, applications, get, x/*, allow".into()];
        assert!(is_up_to_date(&params, &observed));

        let mut params = params;
        params.roles.as_mut().unwrap()[2].policies = Some(vec![]);
        assert!(!is_up_to_date(&params, &observed));
    }

    #[test]
    fn issued_tokens_do_not_count_as_drift() {
        let params = full_parameters();
        let mut observed = spec_to_wire(&params);
        observed.roles[0].jwt_tokens.push(argo::JwtToken {
            iat: 1_700_000_000,
            exp: 0,
            id: "93c4".into(),
        });
        assert!(is_up_to_date(&params, &observed));
    }

    #[tokio::test]
    async fn matching_project_with_labels_is_up_to_date() {
        let service = FakeProjectService::default().with_project(project(argo::AppProjectSpec {
            description: "A".into(),
            ..Default::default()
        }));
        let engine = Engine::new(ProjectKind::new(Arc::new(service)));

        let mut resource = managed(
            ProjectParameters {
                description: Some("A".into()),
                project_labels: Some(BTreeMap::from([("l".into(), "v".into())])),
                ..Default::default()
            },
            Some("team-a"),
        );
        let observation = engine.observe(&mut resource).await.unwrap();
        assert!(observation.exists);
        assert!(observation.up_to_date);
        assert!(!observation.late_initialized);
    }

    #[tokio::test]
    async fn late_init_fills_description_and_orphaned_resources() {
        let service = FakeProjectService::default().with_project(project(argo::AppProjectSpec {
            description: "from argocd".into(),
            orphaned_resources: Some(argo::OrphanedResourcesMonitorSettings {
                warn: Some(true),
                ignore: vec![],
            }),
            ..Default::default()
        }));
        let engine = Engine::new(ProjectKind::new(Arc::new(service)));

        let mut resource = managed(Default::default(), Some("team-a"));
        assert!(engine.observe(&mut resource).await.unwrap().late_initialized);
        assert_eq!(resource.parameters.description.as_deref(), Some("from argocd"));
        assert_eq!(resource.parameters.orphaned_resources.as_ref().unwrap().warn, Some(true));

        let again = engine.observe(&mut resource).await.unwrap();
        assert!(!again.late_initialized);
        assert!(again.up_to_date);
    }

    #[tokio::test]
    async fn create_applies_project_labels() {
        let service = Arc::new(FakeProjectService::default());
        let engine = Engine::new(ProjectKind::new(service.clone()));
        let mut resource = managed(
            ProjectParameters {
                project_labels: Some(BTreeMap::from([("team".into(), "a".into())])),
                ..Default::default()
            },
            None,
        );
        assert_eq!(engine.reconcile(&mut resource).await.unwrap().step, Step::Created);
        let created = service.project("team-a").unwrap();
        assert_eq!(created.metadata.labels["team"], "a");
    }

    #[tokio::test]
    async fn update_keeps_resource_version_and_tokens() {
        let mut existing = project(argo::AppProjectSpec {
            description: "old".into(),
            roles: vec![argo::ProjectRole {
                name: "ci".into(),
                jwt_tokens: vec![argo::JwtToken {
                    iat: 1_700_000_000,
                    exp: 0,
                    id: "93c4".into(),
                }],
                ..Default::default()
            }],
            ..Default::default()
        });
        existing.metadata.resource_version = "42".into();
        let service = Arc::new(FakeProjectService::default().with_project(existing));
        let engine = Engine::new(ProjectKind::new(service.clone()));

        let mut resource = managed(
            ProjectParameters {
                description: Some("new".into()),
                roles: Some(vec![ProjectRole {
                    name: "ci".into(),
                    policies: Some(vec![
                        "p, proj:team-a:ci, applications, get, team-a/*, allow".into(),
                    ]),
                    ..Default::default()
                }]),
                ..Default::default()
            },
            Some("team-a"),
        );
        assert_eq!(engine.reconcile(&mut resource).await.unwrap().step, Step::Updated);

        let updated = service.project("team-a").unwrap();
        assert_eq!(updated.spec.description, "new");
        assert_eq!(updated.spec.roles[0].jwt_tokens.len(), 1);
        assert_eq!(updated.metadata.labels["l"], "v");
    }

    #[test]
    fn observation_reports_tokens_by_role() {
        let mut remote = project(argo::AppProjectSpec::default());
        remote.status.jwt_tokens_by_role.insert(
            "ci".into(),
            argo::JwtTokens {
                items: vec![argo::JwtToken {
                    iat: 1_700_000_000,
                    exp: 1_700_003_600,
                    id: "93c4".into(),
                }],
            },
        );
        let kind = ProjectKind::new(Arc::new(FakeProjectService::default()));
        let observed = kind.observe(Some(&remote));
        let tokens = &observed.jwt_tokens_by_role["ci"];
        assert_eq!(tokens[0].id.as_deref(), Some("93c4"));
        assert_eq!(tokens[0].exp, Some(1_700_003_600));
    }

    #[tokio::test]
    async fn no_external_name_means_absent() {
        let engine = Engine::new(ProjectKind::new(Arc::new(FakeProjectService::default())));
        let observation = engine
            .observe(&mut managed(Default::default(), None))
            .await
            .unwrap();
        assert!(!observation.exists);
    }
}
