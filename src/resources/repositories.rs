use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::{ManagedStatus, SecretKeySelector};

pub static REPOSITORY_FINALIZER: &str = "repositories.argocd.gitops.dev";

/// A repository registered with ArgoCD. Its external name is the repository URL.
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, JsonSchema)]
#[kube(
    kind = "Repository",
    group = "argocd.gitops.dev",
    version = "v1alpha1",
    status = "RepositoryStatus",
    shortname = "argorepo",
    category = "argocd",
    printcolumn = r#"{"name":"Ready", "type":"string", "jsonPath":".status.conditions[?(@.type==\"Ready\")].status"}"#,
    printcolumn = r#"{"name":"Synced", "type":"string", "jsonPath":".status.conditions[?(@.type==\"Synced\")].status"}"#,
    printcolumn = r#"{"name":"Connection", "priority": 1, "type":"string", "jsonPath":".status.atProvider.connectionState.status"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct RepositorySpec {
    pub for_provider: RepositoryParameters,
}

pub type RepositoryStatus = ManagedStatus<RepositoryObservation>;

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RepositoryParameters {
    /// URL of the repository. Only used on creation.
    pub repo: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub r#type: Option<RepositoryType>,

    /// Name of the repository, required for Helm repositories
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Scope the repository to a project
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_ref: Option<SecretKeySelector>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssh_private_key_ref: Option<SecretKeySelector>,

    /// PEM client certificate for TLS client authentication
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls_client_cert_data: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls_client_cert_key_ref: Option<SecretKeySelector>,

    /// Skip server verification
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub insecure: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enable_lfs: Option<bool>,

    #[serde(
        default,
        rename = "enableOCI",
        skip_serializing_if = "Option::is_none"
    )]
    pub enable_oci: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy: Option<String>,

    #[serde(default, rename = "githubAppID", skip_serializing_if = "Option::is_none")]
    pub github_app_id: Option<i64>,

    #[serde(
        default,
        rename = "githubAppInstallationID",
        skip_serializing_if = "Option::is_none"
    )]
    pub github_app_installation_id: Option<i64>,

    #[serde(
        default,
        rename = "githubAppEnterpriseBaseURL",
        skip_serializing_if = "Option::is_none"
    )]
    pub github_app_enterprise_base_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub github_app_private_key_secret_ref: Option<SecretKeySelector>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub force_http_basic_auth: Option<bool>,
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RepositoryType {
    Git,
    Helm,
}

impl RepositoryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RepositoryType::Git => "git",
            RepositoryType::Helm => "helm",
        }
    }

    /// Unknown values map to `None`
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "git" => Some(RepositoryType::Git),
            "helm" => Some(RepositoryType::Helm),
            _ => None,
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RepositoryObservation {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_state: Option<ConnectionState>,
    /// Credentials come from a matching repository credential template
    #[serde(default)]
    pub inherited_creds: bool,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionState {
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attempted_at: Option<String>,
}
