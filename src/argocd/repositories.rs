use async_trait::async_trait;
use reqwest::Method;
use serde::{Deserialize, Serialize};

use super::{ArgoClient, ServiceResult};

/// A repository as registered with ArgoCD. Credential fields are write-only: the
/// server never returns them.
#[derive(Serialize, Deserialize, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Repository {
    #[serde(default)]
    pub repo: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub username: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub password: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub ssh_private_key: String,
    #[serde(default, skip_serializing)]
    pub connection_state: ConnectionState,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub insecure: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub enable_lfs: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub tls_client_cert_data: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub tls_client_cert_key: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub r#type: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default, skip_serializing)]
    pub inherited_creds: bool,
    #[serde(rename = "enableOCI", default, skip_serializing_if = "std::ops::Not::not")]
    pub enable_oci: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub github_app_private_key: String,
    #[serde(
        rename = "githubAppID",
        default,
        with = "crate::argocd::int64::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub github_app_id: Option<i64>,
    #[serde(
        rename = "githubAppInstallationID",
        default,
        with = "crate::argocd::int64::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub github_app_installation_id: Option<i64>,
    #[serde(
        rename = "githubAppEnterpriseBaseUrl",
        default,
        skip_serializing_if = "String::is_empty"
    )]
    pub github_app_enterprise_base_url: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub proxy: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub project: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub force_http_basic_auth: bool,
}

// Hand-written so credentials never end up in logs
impl std::fmt::Debug for Repository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repository")
            .field("repo", &self.repo)
            .field("type", &self.r#type)
            .field("name", &self.name)
            .field("project", &self.project)
            .field("username", &self.username)
            .field("connection_state", &self.connection_state)
            .finish_non_exhaustive()
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionState {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub attempted_at: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct RepoQuery {
    pub repo: String,
    pub app_project: Option<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct RepoCreateRequest {
    pub repo: Repository,
    pub upsert: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct RepoUpdateRequest {
    pub repo: Repository,
}

#[async_trait]
pub trait RepositoryService: Send + Sync {
    async fn get(&self, query: &RepoQuery) -> ServiceResult<Repository>;
    async fn create(&self, request: &RepoCreateRequest) -> ServiceResult<Repository>;
    async fn update(&self, request: &RepoUpdateRequest) -> ServiceResult<Repository>;
    async fn delete(&self, query: &RepoQuery) -> ServiceResult<()>;
}

#[async_trait]
impl RepositoryService for ArgoClient {
    async fn get(&self, query: &RepoQuery) -> ServiceResult<Repository> {
        let mut builder = self.request(Method::GET, &["repositories", &query.repo]);
        if let Some(project) = &query.app_project {
            builder = builder.query(&[("appProject", project)]);
        }
        self.send(builder).await
    }

    async fn create(&self, request: &RepoCreateRequest) -> ServiceResult<Repository> {
        let builder = self
            .request(Method::POST, &["repositories"])
            .query(&[("upsert", request.upsert)])
            .json(&request.repo);
        self.send(builder).await
    }

    async fn update(&self, request: &RepoUpdateRequest) -> ServiceResult<Repository> {
        let builder = self
            .request(Method::PUT, &["repositories", &request.repo.repo])
            .json(&request.repo);
        self.send(builder).await
    }

    async fn delete(&self, query: &RepoQuery) -> ServiceResult<()> {
        let mut builder = self.request(Method::DELETE, &["repositories", &query.repo]);
        if let Some(project) = &query.app_project {
            builder = builder.query(&[("appProject", project)]);
        }
        self.send_empty(builder).await
    }
}
