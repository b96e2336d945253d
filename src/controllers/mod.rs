use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use kube::client::Client;
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::info;

use crate::argocd::ClientConfig;
use crate::metrics::Metrics;
use crate::resources::applications::Application;
use crate::resources::applicationsets::ApplicationSet;
use crate::resources::clusters::Cluster;
use crate::resources::projects::Project;
use crate::resources::repositories::Repository;
use crate::resources::tokens::Token;
use crate::resources::SecretKeySelector;

pub mod application;
pub mod applicationset;
pub mod cluster;
pub mod managed;
pub mod project;
pub mod repository;
pub mod token;

use managed::ArgoConnection;

/// Diagnostics to be exposed by the web server
#[derive(Clone, Serialize)]
pub struct Diagnostics {
    pub last_event: DateTime<Utc>,
}

impl Default for Diagnostics {
    fn default() -> Self {
        Self {
            last_event: Utc::now(),
        }
    }
}

/// State shared between the controllers and the web server
#[derive(Clone)]
pub struct State {
    /// Diagnostics populated by the reconcilers
    pub diagnostics: Arc<RwLock<Diagnostics>>,
    /// Metrics registry
    pub registry: prometheus::Registry,

    /// How to reach the ArgoCD API server
    argocd: ClientConfig,
    /// Secret in the operator namespace holding the ArgoCD auth token
    token_secret: String,
    token_key: String,
    /// Our namespace, needed for reading the auth token secret
    operator_namespace: String,

    pub(crate) reconcile_timeout: Duration,
    pub(crate) poll_interval: Duration,
}

/// State wrapper around the controller outputs for the web server
impl State {
    pub fn new(
        argocd: ClientConfig,
        token_secret: String,
        token_key: String,
        operator_namespace: String,
        reconcile_timeout: Duration,
        poll_interval: Duration,
    ) -> Self {
        Self {
            diagnostics: Arc::new(RwLock::new(Diagnostics::default())),
            registry: prometheus::Registry::default(),
            argocd,
            token_secret,
            token_key,
            operator_namespace,
            reconcile_timeout,
            poll_interval,
        }
    }

    /// Metrics getter
    pub fn metrics(&self) -> Vec<prometheus::proto::MetricFamily> {
        self.registry.gather()
    }

    /// State getter
    pub async fn diagnostics(&self) -> Diagnostics {
        self.diagnostics.read().await.clone()
    }

    fn connection(&self) -> anyhow::Result<ArgoConnection> {
        Ok(ArgoConnection {
            http: self.argocd.http_client()?,
            base_url: self.argocd.base_url()?,
            token: SecretKeySelector {
                name: self.token_secret.clone(),
                namespace: self.operator_namespace.clone(),
                key: self.token_key.clone(),
            },
        })
    }
}

/// Run the controllers for every managed kind until shutdown
pub async fn run(state: State, client: Client) -> anyhow::Result<()> {
    let argocd = state.connection()?;
    let metrics = Metrics::new()?.register(&state.registry)?;

    info!("Reconciling against ArgoCD at {}", argocd.base_url);

    tokio::join!(
        managed::run::<Application>(client.clone(), metrics.clone(), state.clone(), argocd.clone()),
        managed::run::<ApplicationSet>(
            client.clone(),
            metrics.clone(),
            state.clone(),
            argocd.clone(),
        ),
        managed::run::<Project>(client.clone(), metrics.clone(), state.clone(), argocd.clone()),
        managed::run::<Repository>(client.clone(), metrics.clone(), state.clone(), argocd.clone()),
        managed::run::<Cluster>(client.clone(), metrics.clone(), state.clone(), argocd.clone()),
        managed::run::<Token>(client, metrics, state, argocd),
    );
    Ok(())
}
