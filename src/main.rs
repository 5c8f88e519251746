//! Platform controller entrypoint
//!
//! Starts the metrics/probe HTTP server and the three controller loops
//! (Platform, GitRepository, CustomPackage) against the cluster from the
//! ambient kubeconfig or in-cluster config.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use anyhow::{Context as _, Result};
use futures::StreamExt;
use kube::{Api, Client};
use kube_runtime::{watcher, Controller};
use tracing::{error, info};

use platform_controller::controller::{self, custom_package, git_repository, platform};
use platform_controller::crd::{CustomPackage, GitRepository, Platform};
use platform_controller::observability::metrics;
use platform_controller::repo_lock::RepoLock;
use platform_controller::server::{start_server, ServerState};

#[tokio::main]
async fn main() -> Result<()> {
    // rustls 0.23+ needs a process-wide crypto provider before any TLS use.
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "platform_controller=info".into()),
        )
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        built = env!("BUILD_DATETIME"),
        commit = env!("BUILD_GIT_HASH"),
        "Starting adhar platform controller"
    );

    metrics::register_metrics().context("Failed to register metrics")?;

    let server_state = Arc::new(ServerState {
        is_ready: Arc::new(std::sync::atomic::AtomicBool::new(false)),
    });

    let server_port = std::env::var("METRICS_PORT")
        .unwrap_or_else(|_| "8080".to_string())
        .parse::<u16>()
        .unwrap_or(8080);

    let probe_state = server_state.clone();
    tokio::spawn(async move {
        if let Err(e) = start_server(server_port, probe_state).await {
            error!("HTTP server error: {}", e);
        }
    });

    let client = Client::try_default()
        .await
        .context("Failed to create Kubernetes client")?;

    // One shared lock registry serializes git work per repository across all
    // controller loops.
    let ctx = controller::Context::new(client.clone(), RepoLock::new());

    // Watch all namespaces so platform resources can live anywhere.
    let platforms: Api<Platform> = Api::all(client.clone());
    let repositories: Api<GitRepository> = Api::all(client.clone());
    let packages: Api<CustomPackage> = Api::all(client.clone());

    server_state.is_ready.store(true, Ordering::Relaxed);

    let platform_loop = Controller::new(platforms, watcher::Config::default())
        .shutdown_on_signal()
        .run(platform::reconcile, platform::error_policy, ctx.clone())
        .for_each(|_| std::future::ready(()));

    let repository_loop = Controller::new(repositories, watcher::Config::default())
        .shutdown_on_signal()
        .run(
            git_repository::reconcile,
            git_repository::error_policy,
            ctx.clone(),
        )
        .for_each(|_| std::future::ready(()));

    let package_loop = Controller::new(packages, watcher::Config::default())
        .shutdown_on_signal()
        .run(
            custom_package::reconcile,
            custom_package::error_policy,
            ctx.clone(),
        )
        .for_each(|_| std::future::ready(()));

    tokio::join!(platform_loop, repository_loop, package_loop);

    info!("Controller stopped");
    Ok(())
}
