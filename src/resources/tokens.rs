use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::{ConnectionSecretReference, ManagedStatus};

pub static TOKEN_FINALIZER: &str = "tokens.argocd.gitops.dev";

/// Connection detail key holding the issued JWT
pub static TOKEN_CONNECTION_KEY: &str = "attribute.token";

/// A JWT issued for an ArgoCD project role
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, JsonSchema)]
#[kube(
    kind = "Token",
    group = "argocd.gitops.dev",
    version = "v1alpha1",
    status = "TokenStatus",
    shortname = "argotoken",
    category = "argocd",
    printcolumn = r#"{"name":"Ready", "type":"string", "jsonPath":".status.conditions[?(@.type==\"Ready\")].status"}"#,
    printcolumn = r#"{"name":"Synced", "type":"string", "jsonPath":".status.conditions[?(@.type==\"Synced\")].status"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct TokenSpec {
    pub for_provider: TokenParameters,

    /// Secret the issued token is written to, under `attribute.token`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub write_connection_secret_to_ref: Option<ConnectionSecretReference>,
}

pub type TokenStatus = ManagedStatus<TokenObservation>;

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TokenParameters {
    pub project: String,

    pub role: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Lifetime of the token as a duration such as `720h`. Tokens without it never expire.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<String>,

    /// Re-issue the token once it is older than this duration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub renew_after: Option<String>,

    /// Re-issue the token once it expires within this duration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub renew_before: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TokenObservation {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Unix seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issued_at: Option<i64>,
    /// Unix seconds; unset for tokens that never expire
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
}
