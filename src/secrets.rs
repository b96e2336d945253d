use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::ByteString;
use kube::api::{Api, ObjectMeta, Patch, PatchParams};
use kube::Client;
use tracing::debug;

use crate::resources::{ConnectionSecretReference, SecretKeySelector};
use crate::{Error, Result};

pub type SecretData = BTreeMap<String, Vec<u8>>;

/// Read and write access to Secrets
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// `None` when the Secret does not exist
    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<SecretData>>;

    /// Create or replace the Secret's data
    async fn apply_secret(&self, namespace: &str, name: &str, data: SecretData) -> Result<()>;
}

pub struct KubeSecretStore {
    client: Client,
}

impl KubeSecretStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SecretStore for KubeSecretStore {
    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<SecretData>> {
        let secrets: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        let secret = secrets.get_opt(name).await?;
        Ok(secret.map(|s| {
            s.data
                .unwrap_or_default()
                .into_iter()
                .map(|(k, v)| (k, v.0))
                .collect()
        }))
    }

    async fn apply_secret(&self, namespace: &str, name: &str, data: SecretData) -> Result<()> {
        let secrets: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        let secret = Secret {
            metadata: ObjectMeta {
                name: Some(name.into()),
                namespace: Some(namespace.into()),
                labels: Some(BTreeMap::from([(
                    "app.kubernetes.io/managed-by".to_string(),
                    "argocd-operator".to_string(),
                )])),
                ..Default::default()
            },
            data: Some(data.into_iter().map(|(k, v)| (k, ByteString(v))).collect()),
            ..Default::default()
        };

        debug!("Applying Secret {name} in namespace {namespace}");

        let params = PatchParams::apply("argocd-operator").force();
        secrets.patch(name, &params, &Patch::Apply(&secret)).await?;
        Ok(())
    }
}

/// Resolves secret key references. Nothing is cached: each call reads the Secret afresh.
#[derive(Clone)]
pub struct SecretResolver {
    store: Arc<dyn SecretStore>,
}

impl SecretResolver {
    pub fn new(store: Arc<dyn SecretStore>) -> Self {
        Self { store }
    }

    pub async fn resolve(&self, selector: &SecretKeySelector) -> Result<Vec<u8>> {
        let SecretKeySelector {
            name,
            namespace,
            key,
        } = selector;

        let mut data = self
            .store
            .get_secret(namespace, name)
            .await?
            .ok_or_else(|| Error::SecretNotFound(namespace.clone(), name.clone()))?;

        data.remove(key)
            .ok_or_else(|| Error::SecretKeyNotFound(namespace.clone(), name.clone(), key.clone()))
    }

    pub async fn resolve_string(&self, selector: &SecretKeySelector) -> Result<String> {
        let bytes = self.resolve(selector).await?;
        String::from_utf8(bytes).map_err(|_| {
            Error::InvalidSecretData(
                selector.namespace.clone(),
                selector.name.clone(),
                selector.key.clone(),
            )
        })
    }

    /// Resolve a reference if one is given; an empty string stands for "unset" on the wire
    pub async fn resolve_optional(&self, selector: Option<&SecretKeySelector>) -> Result<String> {
        match selector {
            Some(selector) => self.resolve_string(selector).await,
            None => Ok(String::new()),
        }
    }

    /// Write connection details (such as an issued token) to the referenced Secret
    pub async fn publish(
        &self,
        reference: &ConnectionSecretReference,
        details: SecretData,
    ) -> Result<()> {
        self.store
            .apply_secret(&reference.namespace, &reference.name, details)
            .await
    }
}

#[cfg(test)]
pub(crate) mod fake {
    use std::sync::Mutex;

    use super::*;

    /// In-memory secrets keyed by (namespace, name)
    #[derive(Default)]
    pub struct FakeSecretStore {
        pub secrets: Mutex<BTreeMap<(String, String), SecretData>>,
    }

    impl FakeSecretStore {
        pub fn with_secret(self, namespace: &str, name: &str, data: &[(&str, &str)]) -> Self {
            self.secrets.lock().unwrap().insert(
                (namespace.into(), name.into()),
                data.iter()
                    .map(|(k, v)| (k.to_string(), v.as_bytes().to_vec()))
                    .collect(),
            );
            self
        }

        pub fn resolver(self) -> (Arc<Self>, SecretResolver) {
            let store = Arc::new(self);
            (store.clone(), SecretResolver::new(store))
        }
    }

    #[async_trait]
    impl SecretStore for FakeSecretStore {
        async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<SecretData>> {
            Ok(self
                .secrets
                .lock()
                .unwrap()
                .get(&(namespace.to_string(), name.to_string()))
                .cloned())
        }

        async fn apply_secret(&self, namespace: &str, name: &str, data: SecretData) -> Result<()> {
            self.secrets
                .lock()
                .unwrap()
                .insert((namespace.into(), name.into()), data);
            Ok(())
        }
    }
}
