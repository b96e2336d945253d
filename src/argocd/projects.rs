use std::collections::BTreeMap;

use async_trait::async_trait;
use reqwest::Method;
use serde::{Deserialize, Serialize};

use super::{ArgoClient, ObjectMeta, ServiceResult};

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct AppProject {
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: AppProjectSpec,
    #[serde(default, skip_serializing)]
    pub status: AppProjectStatus,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AppProjectSpec {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub source_repos: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub destinations: Vec<ApplicationDestination>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub roles: Vec<ProjectRole>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cluster_resource_whitelist: Vec<GroupKind>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cluster_resource_blacklist: Vec<GroupKind>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub namespace_resource_blacklist: Vec<GroupKind>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub namespace_resource_whitelist: Vec<GroupKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub orphaned_resources: Option<OrphanedResourcesMonitorSettings>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sync_windows: Vec<SyncWindow>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub signature_keys: Vec<SignatureKey>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub source_namespaces: Vec<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub permit_only_project_scoped_clusters: bool,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct ApplicationDestination {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub server: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProjectRole {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub policies: Vec<String>,
    /// Issued by the server; carried through updates untouched
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub jwt_tokens: Vec<JwtToken>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub groups: Vec<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct JwtToken {
    #[serde(default, with = "crate::argocd::int64")]
    pub iat: i64,
    #[serde(default, with = "crate::argocd::int64", skip_serializing_if = "is_zero")]
    pub exp: i64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
}

fn is_zero(value: &i64) -> bool {
    *value == 0
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct GroupKind {
    #[serde(default)]
    pub group: String,
    #[serde(default)]
    pub kind: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct OrphanedResourcesMonitorSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warn: Option<bool>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ignore: Vec<OrphanedResourceKey>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct OrphanedResourceKey {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub group: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SyncWindow {
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub schedule: String,
    #[serde(default)]
    pub duration: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub applications: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub namespaces: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub clusters: Vec<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub manual_sync: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub time_zone: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct SignatureKey {
    #[serde(rename = "keyID", default)]
    pub key_id: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AppProjectStatus {
    #[serde(default)]
    pub jwt_tokens_by_role: BTreeMap<String, JwtTokens>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct JwtTokens {
    #[serde(default)]
    pub items: Vec<JwtToken>,
}

#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct ProjectCreateRequest {
    pub project: AppProject,
    pub upsert: bool,
}

#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct ProjectUpdateRequest {
    pub project: AppProject,
}

#[derive(Serialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProjectTokenCreateRequest {
    pub project: String,
    pub role: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub description: String,
    /// Seconds; zero issues a token that never expires
    #[serde(with = "crate::argocd::int64")]
    pub expires_in: i64,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub id: String,
}

#[derive(Deserialize, Clone, Debug, Default, PartialEq)]
pub struct ProjectTokenResponse {
    #[serde(default)]
    pub token: String,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ProjectTokenDeleteRequest {
    pub project: String,
    pub role: String,
    pub iat: i64,
    pub id: String,
}

/// Project operations, including the role tokens that live inside a project
#[async_trait]
pub trait ProjectService: Send + Sync {
    async fn get(&self, name: &str) -> ServiceResult<AppProject>;
    async fn create(&self, request: &ProjectCreateRequest) -> ServiceResult<AppProject>;
    async fn update(&self, request: &ProjectUpdateRequest) -> ServiceResult<AppProject>;
    async fn delete(&self, name: &str) -> ServiceResult<()>;
    async fn create_token(
        &self,
        request: &ProjectTokenCreateRequest,
    ) -> ServiceResult<ProjectTokenResponse>;
    async fn delete_token(&self, request: &ProjectTokenDeleteRequest) -> ServiceResult<()>;
}

#[async_trait]
impl ProjectService for ArgoClient {
    async fn get(&self, name: &str) -> ServiceResult<AppProject> {
        self.send(self.request(Method::GET, &["projects", name]))
            .await
    }

    async fn create(&self, request: &ProjectCreateRequest) -> ServiceResult<AppProject> {
        self.send(self.request(Method::POST, &["projects"]).json(request))
            .await
    }

    async fn update(&self, request: &ProjectUpdateRequest) -> ServiceResult<AppProject> {
        let builder = self
            .request(Method::PUT, &["projects", &request.project.metadata.name])
            .json(request);
        self.send(builder).await
    }

    async fn delete(&self, name: &str) -> ServiceResult<()> {
        self.send_empty(self.request(Method::DELETE, &["projects", name]))
            .await
    }

    async fn create_token(
        &self,
        request: &ProjectTokenCreateRequest,
    ) -> ServiceResult<ProjectTokenResponse> {
        let builder = self
            .request(
                Method::POST,
                &["projects", &request.project, "roles", &request.role, "token"],
            )
            .json(request);
        self.send(builder).await
    }

    async fn delete_token(&self, request: &ProjectTokenDeleteRequest) -> ServiceResult<()> {
        let iat = request.iat.to_string();
        let builder = self
            .request(
                Method::DELETE,
                &["projects", &request.project, "roles", &request.role, "token", &iat],
            )
            .query(&[("id", &request.id)]);
        self.send_empty(builder).await
    }
}
