use std::time::Duration;

use actix_web::{
    get, middleware, web::Data, App, HttpRequest, HttpResponse, HttpServer, Responder,
};
use clap::Parser;
use prometheus::{Encoder, TextEncoder};

pub use argocd_operator::{self, argocd::ClientConfig, telemetry, State};

#[derive(Debug, clap::Parser)]
struct Arguments {
    /// ArgoCD API server, as host[:port] or a full URL
    #[arg(long = "argocd-server", env = "ARGOCD_SERVER", value_name = "ADDRESS")]
    argocd_server: String,

    /// Secret in the operator namespace holding the ArgoCD auth token
    #[arg(
        long = "argocd-token-secret",
        env = "ARGOCD_TOKEN_SECRET",
        default_value = "argocd-operator-token"
    )]
    argocd_token_secret: String,

    #[arg(
        long = "argocd-token-key",
        env = "ARGOCD_TOKEN_KEY",
        default_value = "authToken"
    )]
    argocd_token_key: String,

    /// Skip TLS certificate verification
    #[arg(long = "argocd-insecure", env = "ARGOCD_INSECURE")]
    argocd_insecure: bool,

    /// Talk to ArgoCD over plain http
    #[arg(long = "argocd-plaintext", env = "ARGOCD_PLAINTEXT")]
    argocd_plaintext: bool,

    #[arg(
        long = "operator-namespace",
        env = "OPERATOR_NAMESPACE",
        default_value = "argocd-operator"
    )]
    operator_namespace: String,

    /// Upper bound in seconds for one reconcile pass
    #[arg(long = "reconcile-timeout", env = "RECONCILE_TIMEOUT", default_value_t = 120)]
    reconcile_timeout: u64,

    /// Seconds between drift checks of resources that are in sync
    #[arg(long = "poll-interval", env = "POLL_INTERVAL", default_value_t = 300)]
    poll_interval: u64,

    #[arg(long = "bind-address", env = "BIND_ADDRESS", default_value = "0.0.0.0:8080")]
    bind_address: String,
}

#[get("/metrics")]
async fn metrics(c: Data<State>, _req: HttpRequest) -> impl Responder {
    let metrics = c.metrics();
    let encoder = TextEncoder::new();
    let mut buffer = vec![];
    match encoder.encode(&metrics, &mut buffer) {
        Ok(()) => HttpResponse::Ok().body(buffer),
        Err(e) => HttpResponse::InternalServerError().body(e.to_string()),
    }
}

#[get("/health")]
async fn health(_: HttpRequest) -> impl Responder {
    HttpResponse::Ok().json("healthy")
}

#[get("/")]
async fn index(c: Data<State>, _req: HttpRequest) -> impl Responder {
    let d = c.diagnostics().await;
    HttpResponse::Ok().json(&d)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    telemetry::init()?;

    let args: Arguments = Arguments::parse();

    // Initialize Kubernetes controller state
    let state = State::new(
        ClientConfig {
            server: args.argocd_server,
            plaintext: args.argocd_plaintext,
            insecure: args.argocd_insecure,
        },
        args.argocd_token_secret,
        args.argocd_token_key,
        args.operator_namespace,
        Duration::from_secs(args.reconcile_timeout),
        Duration::from_secs(args.poll_interval),
    );

    let client = kube::Client::try_default().await?;
    let controller = argocd_operator::run(state.clone(), client);
    tokio::pin!(controller);

    // Start web server
    let server = HttpServer::new(move || {
        App::new()
            .app_data(Data::new(state.clone()))
            .wrap(middleware::Logger::default().exclude("/health"))
            .service(index)
            .service(health)
            .service(metrics)
    })
    .bind(&args.bind_address)?
    .shutdown_timeout(5)
    .run();

    tokio::pin!(server);

    // Both runtimes implement graceful shutdown, so poll until both are done
    let (controller, server) = tokio::join!(controller, server);
    controller?;
    server?;
    Ok(())
}
