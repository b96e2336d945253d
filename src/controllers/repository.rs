use std::sync::Arc;

use async_trait::async_trait;

use crate::argocd::repositories::{
    self as argo, RepoCreateRequest, RepoQuery, RepoUpdateRequest, RepositoryService,
};
use crate::argocd::ArgoClient;
use crate::controllers::managed::{ManagedResource, ParametersOf};
use crate::engine::compare::{late_init, matches, matches_str, non_empty, non_false};
use crate::engine::{ConnectionDetails, Creation, ExternalKind, ManagedOf};
use crate::resources::repositories::*;
use crate::secrets::SecretResolver;
use crate::Result;

pub struct RepositoryKind {
    service: Arc<dyn RepositoryService>,
    secrets: SecretResolver,
}

impl RepositoryKind {
    pub fn new(service: Arc<dyn RepositoryService>, secrets: SecretResolver) -> Self {
        Self { service, secrets }
    }

    /// Resolve every credential reference first so a missing secret fails the pass
    /// before anything is sent
    async fn to_wire(&self, repo: &str, params: &RepositoryParameters) -> Result<argo::Repository> {
        let credentials = RepositoryCredentials {
            password: self.secrets.resolve_optional(params.password_ref.as_ref()).await?,
            ssh_private_key: self
                .secrets
                .resolve_optional(params.ssh_private_key_ref.as_ref())
                .await?,
            tls_client_cert_key: self
                .secrets
                .resolve_optional(params.tls_client_cert_key_ref.as_ref())
                .await?,
            github_app_private_key: self
                .secrets
                .resolve_optional(params.github_app_private_key_secret_ref.as_ref())
                .await?,
        };
        Ok(spec_to_wire(repo, params, credentials))
    }
}

/// Resolved secret values for the `*Ref` parameters
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RepositoryCredentials {
    pub password: String,
    pub ssh_private_key: String,
    pub tls_client_cert_key: String,
    pub github_app_private_key: String,
}

pub fn spec_to_wire(
    repo: &str,
    params: &RepositoryParameters,
    credentials: RepositoryCredentials,
) -> argo::Repository {
    argo::Repository {
        repo: repo.into(),
        username: params.username.clone().unwrap_or_default(),
        password: credentials.password,
        ssh_private_key: credentials.ssh_private_key,
        insecure: params.insecure.unwrap_or_default(),
        enable_lfs: params.enable_lfs.unwrap_or_default(),
        tls_client_cert_data: params.tls_client_cert_data.clone().unwrap_or_default(),
        tls_client_cert_key: credentials.tls_client_cert_key,
        r#type: params
            .r#type
            .map(|t| t.as_str().to_string())
            .unwrap_or_default(),
        name: params.name.clone().unwrap_or_default(),
        enable_oci: params.enable_oci.unwrap_or_default(),
        github_app_private_key: credentials.github_app_private_key,
        github_app_id: params.github_app_id,
        github_app_installation_id: params.github_app_installation_id,
        github_app_enterprise_base_url: params
            .github_app_enterprise_base_url
            .clone()
            .unwrap_or_default(),
        proxy: params.proxy.clone().unwrap_or_default(),
        project: params.project.clone().unwrap_or_default(),
        force_http_basic_auth: params.force_http_basic_auth.unwrap_or_default(),
        ..Default::default()
    }
}

/// Secret references cannot be recovered from the wire and stay unset
pub fn spec_from_wire(remote: &argo::Repository) -> RepositoryParameters {
    RepositoryParameters {
        repo: remote.repo.clone(),
        r#type: RepositoryType::parse(&remote.r#type),
        name: non_empty(&remote.name),
        project: non_empty(&remote.project),
        username: non_empty(&remote.username),
        tls_client_cert_data: non_empty(&remote.tls_client_cert_data),
        insecure: non_false(remote.insecure),
        enable_lfs: non_false(remote.enable_lfs),
        enable_oci: non_false(remote.enable_oci),
        proxy: non_empty(&remote.proxy),
        github_app_id: remote.github_app_id,
        github_app_installation_id: remote.github_app_installation_id,
        github_app_enterprise_base_url: non_empty(&remote.github_app_enterprise_base_url),
        force_http_basic_auth: non_false(remote.force_http_basic_auth),
        ..Default::default()
    }
}

#[async_trait]
impl ExternalKind for RepositoryKind {
    const KIND: &'static str = "Repository";

    type Parameters = RepositoryParameters;
    type Observation = RepositoryObservation;
    type Remote = argo::Repository;

    async fn get(
        &self,
        resource: &ManagedOf<Self>,
        external_name: &str,
    ) -> Result<Option<argo::Repository>> {
        let repo = self
            .service
            .get(&RepoQuery {
                repo: external_name.into(),
                app_project: resource.parameters.project.clone(),
            })
            .await?;
        Ok(Some(repo))
    }

    fn late_initialize(&self, params: &mut RepositoryParameters, remote: &argo::Repository) {
        let observed = spec_from_wire(remote);
        late_init(&mut params.r#type, observed.r#type);
        late_init(&mut params.name, observed.name);
        late_init(&mut params.project, observed.project);
        late_init(&mut params.insecure, observed.insecure);
        late_init(&mut params.enable_lfs, observed.enable_lfs);
        late_init(&mut params.enable_oci, observed.enable_oci);
    }

    fn observe(&self, remote: Option<&argo::Repository>) -> RepositoryObservation {
        let Some(remote) = remote else {
            return RepositoryObservation::default();
        };
        let state = &remote.connection_state;
        RepositoryObservation {
            connection_state: (!state.status.is_empty()).then(|| ConnectionState {
                status: state.status.clone(),
                message: non_empty(&state.message),
                attempted_at: state.attempted_at.clone(),
            }),
            inherited_creds: remote.inherited_creds,
        }
    }

    fn is_available(&self, remote: &argo::Repository) -> bool {
        remote.connection_state.status != "Failed"
    }

    fn is_up_to_date(&self, params: &RepositoryParameters, remote: &argo::Repository) -> bool {
        is_up_to_date(params, remote)
    }

    async fn create(&self, resource: &ManagedOf<Self>) -> Result<Creation> {
        let repo = self
            .to_wire(&resource.parameters.repo, &resource.parameters)
            .await?;
        let created = self
            .service
            .create(&RepoCreateRequest { repo, upsert: false })
            .await?;
        Ok(Creation {
            external_name: Some(created.repo),
            ..Default::default()
        })
    }

    async fn update(
        &self,
        resource: &ManagedOf<Self>,
        external_name: &str,
    ) -> Result<ConnectionDetails> {
        let repo = self.to_wire(external_name, &resource.parameters).await?;
        self.service.update(&RepoUpdateRequest { repo }).await?;
        Ok(ConnectionDetails::new())
    }

    async fn delete(&self, resource: &ManagedOf<Self>, external_name: &str) -> Result<()> {
        self.service
            .delete(&RepoQuery {
                repo: external_name.into(),
                app_project: resource.parameters.project.clone(),
            })
            .await?;
        Ok(())
    }
}

/// Credentials are write-only on the server and never compared. `repo` is fixed at creation.
pub fn is_up_to_date(desired: &RepositoryParameters, observed: &argo::Repository) -> bool {
    desired
        .r#type
        .is_none_or(|t| t.as_str() == observed.r#type)
        && matches_str(&desired.name, &observed.name)
        && matches_str(&desired.project, &observed.project)
        && matches_str(&desired.username, &observed.username)
        && matches(&desired.insecure, &observed.insecure)
        && matches(&desired.enable_lfs, &observed.enable_lfs)
        && matches(&desired.enable_oci, &observed.enable_oci)
        && matches_str(&desired.proxy, &observed.proxy)
        && desired
            .github_app_id
            .is_none_or(|id| observed.github_app_id == Some(id))
        && desired
            .github_app_installation_id
            .is_none_or(|id| observed.github_app_installation_id == Some(id))
        && matches_str(
            &desired.github_app_enterprise_base_url,
            &observed.github_app_enterprise_base_url,
        )
        && matches(&desired.force_http_basic_auth, &observed.force_http_basic_auth)
}

impl ManagedResource for Repository {
    type Kind = RepositoryKind;

    const FINALIZER: &'static str = REPOSITORY_FINALIZER;

    fn parameters(&self) -> &ParametersOf<Self> {
        &self.spec.for_provider
    }

    fn status(&self) -> Option<&RepositoryStatus> {
        self.status.as_ref()
    }

    fn connect(client: ArgoClient, secrets: SecretResolver) -> RepositoryKind {
        RepositoryKind::new(Arc::new(client), secrets)
    }
}
