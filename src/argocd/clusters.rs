use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::ByteString;
use reqwest::Method;
use serde::{Deserialize, Serialize};

use super::repositories::ConnectionState;
use super::{ArgoClient, ServiceResult};

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Cluster {
    #[serde(default)]
    pub server: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default)]
    pub config: ClusterConfig,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub namespaces: Vec<String>,
    #[serde(
        default,
        with = "crate::argocd::int64::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub shard: Option<i64>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub cluster_resources: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub project: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
    #[serde(default, skip_serializing)]
    pub server_version: String,
    #[serde(default, skip_serializing)]
    pub info: ClusterInfo,
}

/// Connection settings. Secrets are write-only and come back empty.
#[derive(Serialize, Deserialize, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClusterConfig {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub username: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub password: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub bearer_token: String,
    #[serde(default)]
    pub tls_client_config: TlsClientConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aws_auth_config: Option<AwsAuthConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exec_provider_config: Option<ExecProviderConfig>,
}

impl std::fmt::Debug for ClusterConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterConfig")
            .field("username", &self.username)
            .field("tls_client_config", &self.tls_client_config)
            .field("aws_auth_config", &self.aws_auth_config)
            .field("exec_provider_config", &self.exec_provider_config)
            .finish_non_exhaustive()
    }
}

#[derive(Serialize, Deserialize, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TlsClientConfig {
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub insecure: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub server_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cert_data: Option<ByteString>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_data: Option<ByteString>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca_data: Option<ByteString>,
}

impl std::fmt::Debug for TlsClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsClientConfig")
            .field("insecure", &self.insecure)
            .field("server_name", &self.server_name)
            .finish_non_exhaustive()
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AwsAuthConfig {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub cluster_name: String,
    #[serde(rename = "roleARN", default, skip_serializing_if = "String::is_empty")]
    pub role_arn: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub profile: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExecProviderConfig {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub command: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
    #[serde(rename = "apiVersion", default, skip_serializing_if = "String::is_empty")]
    pub api_version: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub install_hint: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClusterInfo {
    #[serde(default)]
    pub connection_state: ConnectionState,
    #[serde(default)]
    pub server_version: String,
    #[serde(default)]
    pub cache_info: ClusterCacheInfo,
    #[serde(default, with = "crate::argocd::int64")]
    pub applications_count: i64,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClusterCacheInfo {
    #[serde(default, with = "crate::argocd::int64::option")]
    pub resources_count: Option<i64>,
    #[serde(default, with = "crate::argocd::int64::option")]
    pub apis_count: Option<i64>,
    #[serde(default)]
    pub last_cache_sync_time: Option<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ClusterCreateRequest {
    pub cluster: Cluster,
    pub upsert: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ClusterUpdateRequest {
    pub cluster: Cluster,
}

/// Clusters are addressed by their API server URL
#[async_trait]
pub trait ClusterService: Send + Sync {
    async fn get(&self, server: &str) -> ServiceResult<Cluster>;
    async fn create(&self, request: &ClusterCreateRequest) -> ServiceResult<Cluster>;
    async fn update(&self, request: &ClusterUpdateRequest) -> ServiceResult<Cluster>;
    async fn delete(&self, server: &str) -> ServiceResult<()>;
}

#[async_trait]
impl ClusterService for ArgoClient {
    async fn get(&self, server: &str) -> ServiceResult<Cluster> {
        self.send(self.request(Method::GET, &["clusters", server]))
            .await
    }

    async fn create(&self, request: &ClusterCreateRequest) -> ServiceResult<Cluster> {
        let builder = self
            .request(Method::POST, &["clusters"])
            .query(&[("upsert", request.upsert)])
            .json(&request.cluster);
        self.send(builder).await
    }

    async fn update(&self, request: &ClusterUpdateRequest) -> ServiceResult<Cluster> {
        let builder = self
            .request(Method::PUT, &["clusters", &request.cluster.server])
            .json(&request.cluster);
        self.send(builder).await
    }

    async fn delete(&self, server: &str) -> ServiceResult<()> {
        self.send_empty(self.request(Method::DELETE, &["clusters", server]))
            .await
    }
}
