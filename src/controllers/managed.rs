use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::StreamExt;
use kube::api::{Api, ListParams, Patch, PatchParams};
use kube::client::Client;
use kube::core::ClusterResourceScope;
use kube::runtime::controller::{self, Action};
use kube::runtime::events::{Event, EventType, Recorder};
use kube::runtime::finalizer::{finalizer, Event as Finalizer};
use kube::runtime::watcher::Config;
use kube::{Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;
use tokio::sync::RwLock;
use tracing::*;
use url::Url;

use crate::argocd::ArgoClient;
use crate::controllers::{Diagnostics, State};
use crate::engine::{Engine, ExternalKind, Managed, ManagedOf, Outcome, Step};
use crate::metrics::Metrics;
use crate::resources::{
    Condition, ConnectionSecretReference, ManagedStatus, SecretKeySelector,
    EXTERNAL_NAME_ANNOTATION,
};
use crate::secrets::{KubeSecretStore, SecretResolver};
use crate::telemetry;
use crate::{Error, Result};

pub type ParametersOf<R> = <<R as ManagedResource>::Kind as ExternalKind>::Parameters;
pub type ObservationOf<R> = <<R as ManagedResource>::Kind as ExternalKind>::Observation;

/// Binds a cluster-scoped CRD to the engine kind that reconciles it
pub trait ManagedResource:
    Resource<DynamicType = (), Scope = ClusterResourceScope>
    + Clone
    + Debug
    + Serialize
    + DeserializeOwned
    + Send
    + Sync
    + 'static
{
    type Kind: ExternalKind;

    const FINALIZER: &'static str;

    fn parameters(&self) -> &ParametersOf<Self>;

    fn status(&self) -> Option<&ManagedStatus<ObservationOf<Self>>>;

    /// Where connection details are published, for kinds that produce any
    fn connection_secret(&self) -> Option<&ConnectionSecretReference> {
        None
    }

    fn connect(client: ArgoClient, secrets: SecretResolver) -> Self::Kind;
}

/// Build the engine's view of a resource
pub fn managed<R>(resource: &R) -> ManagedOf<R::Kind>
where
    R: ManagedResource,
    ObservationOf<R>: Clone,
{
    Managed {
        name: resource.name_any(),
        uid: resource.uid(),
        external_name: resource
            .annotations()
            .get(EXTERNAL_NAME_ANNOTATION)
            .filter(|name| !name.is_empty())
            .cloned(),
        deleting: resource.meta().deletion_timestamp.is_some(),
        parameters: resource.parameters().clone(),
        status: resource.status().cloned().unwrap_or_default(),
    }
}

/// Where the ArgoCD API lives and how to authenticate against it
#[derive(Clone)]
pub struct ArgoConnection {
    pub http: reqwest::Client,
    pub base_url: Url,
    /// The auth token is read on every pass so rotation needs no restart
    pub token: SecretKeySelector,
}

pub(crate) struct Context {
    /// Kubernetes client
    pub client: Client,
    /// Kubernetes event recorder
    pub recorder: Recorder,
    pub argocd: ArgoConnection,
    pub secrets: SecretResolver,
    /// Upper bound for one pass against ArgoCD
    pub reconcile_timeout: Duration,
    /// Requeue interval after a successful pass, to detect drift made in ArgoCD
    pub poll_interval: Duration,
    /// Diagnostics read by the web server
    pub diagnostics: Arc<RwLock<Diagnostics>>,
    /// Prometheus metrics
    pub metrics: Metrics,
}

impl Context {
    pub fn new(
        client: Client,
        metrics: Metrics,
        state: &State,
        argocd: ArgoConnection,
    ) -> Arc<Context> {
        Arc::new(Context {
            client: client.clone(),
            recorder: Recorder::new(client.clone(), "argocd-operator".into()),
            argocd,
            secrets: SecretResolver::new(Arc::new(KubeSecretStore::new(client))),
            reconcile_timeout: state.reconcile_timeout,
            poll_interval: state.poll_interval,
            metrics,
            diagnostics: state.diagnostics.clone(),
        })
    }

    async fn connect<R: ManagedResource>(&self) -> Result<R::Kind> {
        let token = self.secrets.resolve_string(&self.argocd.token).await?;
        let client = ArgoClient::new(
            self.argocd.http.clone(),
            self.argocd.base_url.clone(),
            Some(token),
        );
        Ok(R::connect(client, self.secrets.clone()))
    }
}

#[instrument(skip(ctx, resource), fields(trace_id))]
async fn reconcile<R>(resource: Arc<R>, ctx: Arc<Context>) -> Result<Action>
where
    R: ManagedResource,
    ParametersOf<R>: Serialize,
    ObservationOf<R>: Clone + Serialize,
{
    if let Some(trace_id) = telemetry::get_trace_id() {
        Span::current().record("trace_id", field::display(&trace_id));
    }
    let _timer = ctx.metrics.count_and_measure::<R>();
    ctx.diagnostics.write().await.last_event = Utc::now();

    let api: Api<R> = Api::all(ctx.client.clone());

    info!("Reconciling {} {}", R::kind(&()), resource.name_any());
    match finalizer(&api, R::FINALIZER, resource.clone(), |event| async {
        match event {
            Finalizer::Apply(resource) | Finalizer::Cleanup(resource) => {
                sync(&api, &resource, &ctx).await
            }
        }
    })
    .await
    {
        Ok(action) => Ok(action),
        Err(err) => {
            warn!("reconcile failed: {:?}", err);

            ctx.recorder
                .publish(
                    &Event {
                        type_: EventType::Warning,
                        reason: "FailedReconcile".into(),
                        note: Some(err.to_string()),
                        action: "Reconcile".into(),
                        secondary: None,
                    },
                    &resource.object_ref(&()),
                )
                .await?;

            let err = Error::FinalizerError(Box::new(err));
            ctx.metrics.reconcile_failure(resource.as_ref(), &err);
            Err(err)
        }
    }
}

fn error_policy<K, C>(_resource: Arc<K>, _: &Error, _ctx: C) -> Action {
    Action::requeue(Duration::from_secs(30))
}

/// One engine pass for a resource, persisting whatever it learned on the way
async fn sync<R>(api: &Api<R>, resource: &R, ctx: &Context) -> Result<Action>
where
    R: ManagedResource,
    ParametersOf<R>: Serialize,
    ObservationOf<R>: Clone + Serialize,
{
    let name = resource.name_any();
    let mut managed = managed(resource);
    let had_external_name = managed.external_name.is_some();

    let result = run_engine::<R>(&mut managed, ctx).await;

    if let Ok(outcome) = &result {
        if !had_external_name && outcome.step == Step::Created {
            if let Some(external_name) = &managed.external_name {
                annotate_external_name(api, resource, external_name).await?;
            }
        }

        if outcome.observation.late_initialized {
            debug!("Persisting late-initialized parameters of {name}");
            let patch = json!({ "spec": { "forProvider": &managed.parameters } });
            api.patch(&name, &PatchParams::default(), &Patch::Merge(&patch))
                .await?;
        }

        if let Some(reference) = resource.connection_secret() {
            if !outcome.connection_details.is_empty() {
                ctx.secrets
                    .publish(reference, outcome.connection_details.clone())
                    .await?;
            }
        }
    }

    managed.status.set_condition(match &result {
        Ok(_) => Condition::reconcile_success(),
        Err(err) => Condition::reconcile_error(err),
    });

    // Nothing left to write to once the finalizer is about to go
    let gone = matches!(
        &result,
        Ok(Outcome {
            step: Step::Deleted | Step::Gone,
            ..
        })
    );
    if !gone {
        let status = Patch::Apply(json!({
            "apiVersion": R::api_version(&()),
            "kind": R::kind(&()),
            "status": managed.status,
        }));
        let ps = PatchParams::apply("argocd-operator").force();
        api.patch_status(&name, &ps, &status).await?;
    }

    let outcome = result?;
    ctx.metrics.external_step::<R>(outcome.step);
    if outcome.step != Step::Unchanged {
        publish_step(ctx, resource, outcome.step).await?;
    }

    Ok(match outcome.step {
        Step::Deleted | Step::Gone => Action::await_change(),
        // Check back soon so the Ready condition reflects the new object
        Step::Created | Step::Updated => Action::requeue(Duration::from_secs(10)),
        Step::Unchanged => Action::requeue(ctx.poll_interval),
    })
}

async fn run_engine<R: ManagedResource>(
    managed: &mut ManagedOf<R::Kind>,
    ctx: &Context,
) -> Result<Outcome> {
    let engine = Engine::new(ctx.connect::<R>().await?);
    engine.reconcile_within(managed, ctx.reconcile_timeout).await
}

async fn annotate_external_name<R: ManagedResource>(
    api: &Api<R>,
    resource: &R,
    external_name: &str,
) -> Result<()> {
    debug!(
        "Recording external name {external_name} on {}",
        resource.name_any()
    );
    let params = PatchParams::apply("argocd-operator/external-name").force();
    api.patch_metadata(
        &resource.name_any(),
        &params,
        &Patch::Apply(json!({
            "apiVersion": R::api_version(&()),
            "kind": R::kind(&()),
            "metadata": {
                "annotations": {
                    EXTERNAL_NAME_ANNOTATION: external_name,
                }
            }
        })),
    )
    .await?;
    Ok(())
}

async fn publish_step<R: ManagedResource>(ctx: &Context, resource: &R, step: Step) -> Result<()> {
    let (reason, action) = match step {
        Step::Created => ("CreatedExternalResource", "Creating"),
        Step::Updated => ("UpdatedExternalResource", "Updating"),
        Step::Deleted => ("DeletedExternalResource", "Deleting"),
        Step::Gone | Step::Unchanged => return Ok(()),
    };
    ctx.recorder
        .publish(
            &Event {
                type_: EventType::Normal,
                reason: reason.into(),
                note: Some(format!("{action} {} `{}`", R::kind(&()), resource.name_any())),
                action: action.into(),
                secondary: None,
            },
            &resource.object_ref(&()),
        )
        .await?;
    Ok(())
}

/// Run the controller for one managed kind
pub async fn run<R>(client: Client, metrics: Metrics, state: State, argocd: ArgoConnection)
where
    R: ManagedResource,
    ParametersOf<R>: Serialize,
    ObservationOf<R>: Clone + Serialize,
{
    let api: Api<R> = Api::all(client.clone());

    if let Err(e) = api.list(&ListParams::default().limit(1)).await {
        error!(
            "{} is not queryable; {e:?}. Is the CRD installed?",
            R::kind(&())
        );
        std::process::exit(1);
    }

    controller::Controller::new(api, Config::default())
        .shutdown_on_signal()
        .run(
            reconcile::<R>,
            error_policy,
            Context::new(client, metrics, &state, argocd),
        )
        .filter_map(|x| async move { Result::ok(x) })
        .for_each(|_| futures::future::ready(()))
        .await;
}
