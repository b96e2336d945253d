use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::ByteString;

use crate::argocd::clusters::{
    self as argo, ClusterCreateRequest, ClusterService, ClusterUpdateRequest,
};
use crate::argocd::ArgoClient;
use crate::controllers::managed::{ManagedResource, ParametersOf};
use crate::engine::compare::{
    late_init, matches, matches_list, matches_map, matches_nested, matches_str, non_empty,
    non_empty_list, non_empty_map, non_false,
};
use crate::engine::{ConnectionDetails, Creation, ExternalKind, ManagedOf};
use crate::resources::clusters::*;
use crate::resources::repositories::ConnectionState;
use crate::secrets::SecretResolver;
use crate::Result;

pub struct ClusterKind {
    service: Arc<dyn ClusterService>,
    secrets: SecretResolver,
}

impl ClusterKind {
    pub fn new(service: Arc<dyn ClusterService>, secrets: SecretResolver) -> Self {
        Self { service, secrets }
    }

    /// Resolve every credential reference before anything is sent
    async fn to_wire(&self, server: &str, params: &ClusterParameters) -> Result<argo::Cluster> {
        let config = &params.config;
        let tls = config.tls_client_config.as_ref();
        let credentials = ClusterCredentials {
            password: self
                .secrets
                .resolve_optional(config.password_secret_ref.as_ref())
                .await?,
            bearer_token: self
                .secrets
                .resolve_optional(config.bearer_token_secret_ref.as_ref())
                .await?,
            key_data: match tls.and_then(|tls| tls.key_data_secret_ref.as_ref()) {
                Some(selector) => Some(self.secrets.resolve(selector).await?),
                None => None,
            },
        };
        Ok(spec_to_wire(server, params, credentials))
    }
}

/// Resolved secret values for the `*SecretRef` parameters
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ClusterCredentials {
    pub password: String,
    pub bearer_token: String,
    pub key_data: Option<Vec<u8>>,
}

pub fn spec_to_wire(
    server: &str,
    params: &ClusterParameters,
    credentials: ClusterCredentials,
) -> argo::Cluster {
    let config = &params.config;
    let tls = config.tls_client_config.clone().unwrap_or_default();
    argo::Cluster {
        server: server.into(),
        name: params.name.clone().unwrap_or_default(),
        config: argo::ClusterConfig {
            username: config.username.clone().unwrap_or_default(),
            password: credentials.password,
            bearer_token: credentials.bearer_token,
            tls_client_config: argo::TlsClientConfig {
                insecure: tls.insecure.unwrap_or_default(),
                server_name: tls.server_name.unwrap_or_default(),
                cert_data: tls.cert_data.map(|pem| ByteString(pem.into_bytes())),
                key_data: credentials.key_data.map(ByteString),
                ca_data: tls.ca_data.map(|pem| ByteString(pem.into_bytes())),
            },
            aws_auth_config: config
                .aws_auth_config
                .as_ref()
                .map(|aws| argo::AwsAuthConfig {
                    cluster_name: aws.cluster_name.clone(),
                    role_arn: aws.role_arn.clone().unwrap_or_default(),
                    profile: String::new(),
                }),
            exec_provider_config: config.exec_provider_config.as_ref().map(|exec| {
                argo::ExecProviderConfig {
                    command: exec.command.clone(),
                    args: exec.args.clone().unwrap_or_default(),
                    env: exec.env.clone().unwrap_or_default(),
                    api_version: exec.api_version.clone().unwrap_or_default(),
                    install_hint: exec.install_hint.clone().unwrap_or_default(),
                }
            }),
        },
        namespaces: params.namespaces.clone().unwrap_or_default(),
        shard: params.shard,
        cluster_resources: params.cluster_resources.unwrap_or_default(),
        project: params.project.clone().unwrap_or_default(),
        labels: params.labels.clone().unwrap_or_default(),
        annotations: params.annotations.clone().unwrap_or_default(),
        ..Default::default()
    }
}

/// Secret references cannot be recovered from the wire and stay unset. The server
/// does not echo `caData`, `certData` or exec `env` either, but they convert back when
/// present.
pub fn spec_from_wire(remote: &argo::Cluster) -> ClusterParameters {
    let config = &remote.config;
    let tls = &config.tls_client_config;
    let pem = |data: &Option<ByteString>| {
        data.as_ref()
            .and_then(|d| String::from_utf8(d.0.clone()).ok())
            .filter(|s| !s.is_empty())
    };
    let tls_client_config = TlsClientConfig {
        insecure: non_false(tls.insecure),
        server_name: non_empty(&tls.server_name),
        ca_data: pem(&tls.ca_data),
        cert_data: pem(&tls.cert_data),
        key_data_secret_ref: None,
    };

    ClusterParameters {
        server: remote.server.clone(),
        name: non_empty(&remote.name),
        namespaces: non_empty_list(&remote.namespaces),
        shard: remote.shard,
        project: non_empty(&remote.project),
        labels: non_empty_map(&remote.labels),
        annotations: non_empty_map(&remote.annotations),
        cluster_resources: non_false(remote.cluster_resources),
        config: ClusterConfig {
            username: non_empty(&config.username),
            password_secret_ref: None,
            bearer_token_secret_ref: None,
            tls_client_config: (tls_client_config != TlsClientConfig::default())
                .then_some(tls_client_config),
            aws_auth_config: config.aws_auth_config.as_ref().map(|aws| AwsAuthConfig {
                cluster_name: aws.cluster_name.clone(),
                role_arn: non_empty(&aws.role_arn),
            }),
            exec_provider_config: config.exec_provider_config.as_ref().map(|exec| {
                ExecProviderConfig {
                    command: exec.command.clone(),
                    args: non_empty_list(&exec.args),
                    env: non_empty_map(&exec.env),
                    api_version: non_empty(&exec.api_version),
                    install_hint: non_empty(&exec.install_hint),
                }
            }),
        },
    }
}

#[async_trait]
impl ExternalKind for ClusterKind {
    const KIND: &'static str = "Cluster";

    type Parameters = ClusterParameters;
    type Observation = ClusterObservation;
    type Remote = argo::Cluster;

    async fn get(
        &self,
        _resource: &ManagedOf<Self>,
        external_name: &str,
    ) -> Result<Option<argo::Cluster>> {
        Ok(Some(self.service.get(external_name).await?))
    }

    fn late_initialize(&self, params: &mut ClusterParameters, remote: &argo::Cluster) {
        let observed = spec_from_wire(remote);
        late_init(&mut params.name, observed.name);
        late_init(&mut params.project, observed.project);
        late_init(&mut params.shard, observed.shard);
        late_init(&mut params.namespaces, observed.namespaces);
    }

    fn observe(&self, remote: Option<&argo::Cluster>) -> ClusterObservation {
        let Some(remote) = remote else {
            return ClusterObservation::default();
        };
        let info = &remote.info;
        let state = &info.connection_state;
        let cache = &info.cache_info;
        ClusterObservation {
            server_version: non_empty(&info.server_version)
                .or_else(|| non_empty(&remote.server_version)),
            connection_state: (!state.status.is_empty()).then(|| ConnectionState {
                status: state.status.clone(),
                message: non_empty(&state.message),
                attempted_at: state.attempted_at.clone(),
            }),
            info: Some(ClusterInfo {
                applications_count: info.applications_count,
                cache_info: (cache.apis_count.is_some()
                    || cache.resources_count.is_some()
                    || cache.last_cache_sync_time.is_some())
                .then(|| ClusterCacheInfo {
                    apis_count: cache.apis_count,
                    resources_count: cache.resources_count,
                    last_cache_sync_time: cache.last_cache_sync_time.clone(),
                }),
            }),
        }
    }

    fn is_available(&self, remote: &argo::Cluster) -> bool {
        remote.info.connection_state.status != "Failed"
    }

    fn is_up_to_date(&self, params: &ClusterParameters, remote: &argo::Cluster) -> bool {
        is_up_to_date(params, remote)
    }

    async fn create(&self, resource: &ManagedOf<Self>) -> Result<Creation> {
        let cluster = self
            .to_wire(&resource.parameters.server, &resource.parameters)
            .await?;
        let created = self
            .service
            .create(&ClusterCreateRequest {
                cluster,
                upsert: false,
            })
            .await?;
        Ok(Creation {
            external_name: Some(created.server),
            ..Default::default()
        })
    }

    async fn update(
        &self,
        resource: &ManagedOf<Self>,
        external_name: &str,
    ) -> Result<ConnectionDetails> {
        let cluster = self.to_wire(external_name, &resource.parameters).await?;
        self.service.update(&ClusterUpdateRequest { cluster }).await?;
        Ok(ConnectionDetails::new())
    }

    async fn delete(&self, _resource: &ManagedOf<Self>, external_name: &str) -> Result<()> {
        self.service.delete(external_name).await?;
        Ok(())
    }
}

/// Secrets and key material are never returned by the server, so they take no part in
/// the comparison. `server` is fixed at creation.
pub fn is_up_to_date(desired: &ClusterParameters, observed: &argo::Cluster) -> bool {
    let config = &desired.config;
    let observed_config = &observed.config;

    matches_str(&desired.name, &observed.name)
        && matches_list(&desired.namespaces, &observed.namespaces, |d, o| d == o)
        && desired.shard.is_none_or(|s| observed.shard == Some(s))
        && matches_str(&desired.project, &observed.project)
        && matches_map(&desired.labels, &observed.labels)
        && matches_map(&desired.annotations, &observed.annotations)
        && matches(&desired.cluster_resources, &observed.cluster_resources)
        && matches_str(&config.username, &observed_config.username)
        && matches_nested(
            &config.tls_client_config,
            Some(&observed_config.tls_client_config),
            |d, o| matches(&d.insecure, &o.insecure) && matches_str(&d.server_name, &o.server_name),
        )
        && matches_nested(
            &config.aws_auth_config,
            observed_config.aws_auth_config.as_ref(),
            |d, o| d.cluster_name == o.cluster_name && matches_str(&d.role_arn, &o.role_arn),
        )
        && matches_nested(
            &config.exec_provider_config,
            observed_config.exec_provider_config.as_ref(),
            |d, o| {
                d.command == o.command
                    && matches_list(&d.args, &o.args, |d, o| d == o)
                    && matches_str(&d.api_version, &o.api_version)
                    && matches_str(&d.install_hint, &o.install_hint)
            },
        )
}

impl ManagedResource for Cluster {
    type Kind = ClusterKind;

    const FINALIZER: &'static str = CLUSTER_FINALIZER;

    fn parameters(&self) -> &ParametersOf<Self> {
        &self.spec.for_provider
    }

    fn status(&self) -> Option<&ClusterStatus> {
        self.status.as_ref()
    }

    fn connect(client: ArgoClient, secrets: SecretResolver) -> ClusterKind {
        ClusterKind::new(Arc::new(client), secrets)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    use super::*;
    use crate::argocd::{ServiceError, ServiceResult};
    use crate::engine::{Engine, Managed, Step};
    use crate::resources::SecretKeySelector;
    use crate::secrets::fake::FakeSecretStore;
    use crate::Error;

    #[derive(Default)]
    struct FakeClusterService {
        clusters: Mutex<Vec<argo::Cluster>>,
        writes: Mutex<Vec<argo::Cluster>>,
    }

    impl FakeClusterService {
        /// The server drops credentials before storing what it returns
        fn sanitize(cluster: &argo::Cluster) -> argo::Cluster {
            let mut cluster = cluster.clone();
            cluster.config.password.clear();
            cluster.config.bearer_token.clear();
            cluster.config.tls_client_config.key_data = None;
            cluster
        }
    }

    #[async_trait]
    impl ClusterService for FakeClusterService {
        async fn get(&self, server: &str) -> ServiceResult<argo::Cluster> {
            self.clusters
                .lock()
                .unwrap()
                .iter()
                .find(|c| c.server == server)
                .cloned()
                .ok_or_else(|| ServiceError::NotFound(server.to_string()))
        }

        async fn create(&self, request: &ClusterCreateRequest) -> ServiceResult<argo::Cluster> {
            self.writes.lock().unwrap().push(request.cluster.clone());
            let mut stored = Self::sanitize(&request.cluster);
            stored.shard.get_or_insert(0);
            self.clusters.lock().unwrap().push(stored.clone());
            Ok(stored)
        }

        async fn update(&self, request: &ClusterUpdateRequest) -> ServiceResult<argo::Cluster> {
            self.writes.lock().unwrap().push(request.cluster.clone());
            let stored = Self::sanitize(&request.cluster);
            let mut clusters = self.clusters.lock().unwrap();
            clusters.retain(|c| c.server != stored.server);
            clusters.push(stored.clone());
            Ok(stored)
        }

        async fn delete(&self, server: &str) -> ServiceResult<()> {
            self.clusters.lock().unwrap().retain(|c| c.server != server);
            Ok(())
        }
    }

    fn secret_ref(key: &str) -> SecretKeySelector {
        SecretKeySelector {
            name: "prod-cluster".into(),
            namespace: "argocd".into(),
            key: key.into(),
        }
    }

    fn parameters() -> ClusterParameters {
        ClusterParameters {
            server: "https://prod.example.com:6443".into(),
            name: Some("prod".into()),
            labels: Some(BTreeMap::from([("env".into(), "prod".into())])),
            config: ClusterConfig {
                bearer_token_secret_ref: Some(secret_ref("token")),
                tls_client_config: Some(TlsClientConfig {
                    ca_data: Some("-----BEGIN CERTIFICATE-----".into()),
                    key_data_secret_ref: Some(secret_ref("tls.key")),
                    ..Default::default()
                }),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn managed(
        parameters: ClusterParameters,
        external_name: Option<&str>,
    ) -> ManagedOf<ClusterKind> {
        Managed {
            name: "prod".into(),
            uid: Some("c2a8".into()),
            external_name: external_name.map(Into::into),
            deleting: false,
            parameters,
            status: Default::default(),
        }
    }

    #[tokio::test]
    async fn create_resolves_credentials_and_keys_by_server() {
        let (_, secrets) = FakeSecretStore::default()
            .with_secret("argocd", "prod-cluster", &[("token", "sa-token"), ("tls.key", "KEY")])
            .resolver();
        let service = Arc::new(FakeClusterService::default());
        let engine = Engine::new(ClusterKind::new(service.clone(), secrets));

        let mut resource = managed(parameters(), None);
        assert_eq!(engine.reconcile(&mut resource).await.unwrap().step, Step::Created);
        assert_eq!(
            resource.external_name.as_deref(),
            Some("https://prod.example.com:6443")
        );

        let sent = service.writes.lock().unwrap()[0].clone();
        assert_eq!(sent.config.bearer_token, "sa-token");
        assert_eq!(
            sent.config.tls_client_config.key_data,
            Some(ByteString(b"KEY".to_vec()))
        );

        // server-assigned shard is late-initialized, credentials are not drift
        let observation = engine.observe(&mut resource).await.unwrap();
        assert!(observation.up_to_date);
        assert!(observation.late_initialized);
        assert_eq!(resource.parameters.shard, Some(0));
    }

    #[tokio::test]
    async fn missing_secret_fails_without_calls() {
        let (_, secrets) = FakeSecretStore::default().resolver();
        let service = Arc::new(FakeClusterService::default());
        let engine = Engine::new(ClusterKind::new(service.clone(), secrets));

        let err = engine
            .reconcile(&mut managed(parameters(), None))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::SecretNotFound(..)));
        assert!(service.writes.lock().unwrap().is_empty());
    }

    #[test]
    fn round_trip_preserves_set_fields() {
        let params = ClusterParameters {
            server: "https://prod.example.com:6443".into(),
            name: Some("prod".into()),
            namespaces: Some(vec!["apps".into(), "infra".into()]),
            shard: Some(2),
            project: Some("platform".into()),
            labels: Some(BTreeMap::from([("env".into(), "prod".into())])),
            annotations: Some(BTreeMap::from([("owner".into(), "sre".into())])),
            cluster_resources: Some(true),
            config: ClusterConfig {
                username: Some("admin".into()),
                tls_client_config: Some(TlsClientConfig {
                    insecure: Some(true),
                    server_name: Some("kubernetes.default".into()),
                    ca_data: Some("-----BEGIN CERTIFICATE-----".into()),
                    cert_data: Some("-----BEGIN CERTIFICATE-----".into()),
                    key_data_secret_ref: None,
                }),
                aws_auth_config: Some(AwsAuthConfig {
                    cluster_name: "prod-eks".into(),
                    role_arn: Some("arn:aws:iam::123456789012:role/argocd".into()),
                }),
                exec_provider_config: Some(ExecProviderConfig {
                    command: "argocd-k8s-auth".into(),
                    args: Some(vec!["gcp".into()]),
                    env: Some(BTreeMap::from([("HOME".into(), "/tmp".into())])),
                    api_version: Some("client.authentication.k8s.io/v1beta1".into()),
                    install_hint: Some("install gke-gcloud-auth-plugin".into()),
                }),
                ..Default::default()
            },
        };
        let wire = spec_to_wire(&params.server, &params, ClusterCredentials::default());
        assert_eq!(spec_from_wire(&wire), params);
        assert!(is_up_to_date(&params, &wire));
    }

    #[test]
    fn secret_references_do_not_survive_the_wire() {
        let credentials = ClusterCredentials {
            bearer_token: "sa-token".into(),
            key_data: Some(b"KEY".to_vec()),
            ..Default::default()
        };
        let wire = spec_to_wire("https://prod.example.com:6443", &parameters(), credentials);
        assert_eq!(wire.config.bearer_token, "sa-token");

        let back = spec_from_wire(&wire);
        assert_eq!(back.config.bearer_token_secret_ref, None);
        assert_eq!(
            back.config.tls_client_config.and_then(|tls| tls.key_data_secret_ref),
            None
        );
    }

    #[test]
    fn label_drift_is_detected() {
        let mut observed = argo::Cluster {
            server: "https://prod.example.com:6443".into(),
            name: "prod".into(),
            labels: BTreeMap::from([("env".into(), "prod".into())]),
            ..Default::default()
        };
        let params = ClusterParameters {
            config: ClusterConfig::default(),
            ..parameters()
        };
        assert!(is_up_to_date(&params, &observed));

        observed.labels.insert("team".into(), "a".into());
        assert!(!is_up_to_date(&params, &observed));
    }

    #[test]
    fn observation_reports_connection_and_cache() {
        let (_, secrets) = FakeSecretStore::default().resolver();
        let kind = ClusterKind::new(Arc::new(FakeClusterService::default()), secrets);
        let remote: argo::Cluster = serde_json::from_value(serde_json::json!({
            "server": "https://prod.example.com:6443",
            "info": {
                "connectionState": {"status": "Successful", "attemptedAt": "2024-05-01T10:00:00Z"},
                "serverVersion": "1.29",
                "cacheInfo": {"resourcesCount": "812", "apisCount": "96"},
                "applicationsCount": "4"
            }
        }))
        .unwrap();

        let observed = kind.observe(Some(&remote));
        assert_eq!(observed.server_version.as_deref(), Some("1.29"));
        assert_eq!(observed.connection_state.unwrap().status, "Successful");
        let info = observed.info.unwrap();
        assert_eq!(info.applications_count, 4);
        assert_eq!(info.cache_info.unwrap().resources_count, Some(812));
        assert!(kind.is_available(&remote));
    }

    #[tokio::test]
    async fn no_external_name_means_absent() {
        let (_, secrets) = FakeSecretStore::default().resolver();
        let service = Arc::new(FakeClusterService::default());
        let engine = Engine::new(ClusterKind::new(service, secrets));
        assert!(!engine
            .observe(&mut managed(parameters(), None))
            .await
            .unwrap()
            .exists);
    }
}
