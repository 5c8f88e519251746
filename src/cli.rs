//! # adhar CLI
//!
//! Command-line interface for the adhar platform.
//!
//! ## Usage
//!
//! ```bash
//! # Bring up the platform and wait for every package to sync
//! adhar up
//!
//! # Bring up without waiting
//! adhar up --no-wait
//!
//! # Show platform and repository status
//! adhar status
//!
//! # Trigger an immediate reconcile of one resource
//! adhar reconcile gitrepository localdev-argocd
//!
//! # Tear the platform down (children are garbage-collected)
//! adhar down
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use kube::api::{DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::{Api, Client};
use serde_json::json;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::time::sleep;

use platform_controller::controller::backoff::FibonacciBackoff;
use platform_controller::crd::{
    CustomPackage, GitRepository, Platform, PlatformSpec, ProviderName, RECONCILE_ANNOTATION,
};

/// adhar platform CLI
#[derive(Parser)]
#[command(name = "adhar")]
#[command(
    about = "adhar platform CLI",
    long_about = None,
    after_help = "\
Examples:
  adhar up
  adhar up --name staging --port 9443 --no-wait
  adhar status
  adhar reconcile gitrepository localdev-argocd
  adhar down
"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Kubernetes namespace for the Platform resource
    #[arg(short, long, global = true, default_value = "adhar-system")]
    namespace: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Create (or update) the Platform resource and wait for it to come up
    Up {
        /// Name of the Platform resource
        #[arg(long, default_value = "localdev")]
        name: String,
        /// Base host for ingress URLs
        #[arg(long, default_value = "adhar.localtest.me")]
        host: String,
        /// Ingress port
        #[arg(long, default_value_t = 8443)]
        port: u16,
        /// Route core services by path instead of subdomain
        #[arg(long)]
        use_path_routing: bool,
        /// Use the well-known development password
        #[arg(long)]
        static_password: bool,
        /// Return immediately instead of waiting for packages to sync
        #[arg(long)]
        no_wait: bool,
    },
    /// Delete the Platform resource; owned repositories are garbage-collected
    Down {
        /// Name of the Platform resource
        #[arg(long, default_value = "localdev")]
        name: String,
    },
    /// Show platform, repository and package status
    Status {
        /// Name of the Platform resource
        #[arg(long, default_value = "localdev")]
        name: String,
    },
    /// Trigger an immediate reconcile of one resource
    Reconcile {
        /// Resource type
        #[arg(value_enum, value_name = "RESOURCE_TYPE")]
        resource_type: ResourceType,
        /// Name of the resource
        #[arg(value_name = "NAME")]
        name: String,
    },
}

/// Resource types supported by `adhar reconcile`
#[derive(Clone, Copy, ValueEnum)]
enum ResourceType {
    #[value(name = "platform")]
    Platform,
    #[value(name = "gitrepository", alias = "repo")]
    GitRepository,
    #[value(name = "custompackage", alias = "pkg")]
    CustomPackage,
}

#[tokio::main]
async fn main() -> Result<()> {
    // rustls 0.23+ needs a process-wide crypto provider before any TLS use.
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "adhar=info".into()),
        )
        .init();

    let cli = Cli::parse();

    let client = Client::try_default()
        .await
        .context("Failed to create Kubernetes client. Ensure kubeconfig is configured.")?;

    match cli.command {
        Commands::Up {
            name,
            host,
            port,
            use_path_routing,
            static_password,
            no_wait,
        } => {
            let spec = PlatformSpec {
                git_provider: ProviderName::Gitea,
                protocol: "https".to_string(),
                host,
                port,
                use_path_routing,
                static_password,
            };
            up_command(client, &cli.namespace, &name, spec, no_wait).await
        }
        Commands::Down { name } => down_command(client, &cli.namespace, &name).await,
        Commands::Status { name } => status_command(client, &cli.namespace, &name).await,
        Commands::Reconcile {
            resource_type,
            name,
        } => reconcile_command(client, &cli.namespace, resource_type, &name).await,
    }
}

async fn up_command(
    client: Client,
    namespace: &str,
    name: &str,
    spec: PlatformSpec,
    no_wait: bool,
) -> Result<()> {
    let api: Api<Platform> = Api::namespaced(client.clone(), namespace);

    match api.get_opt(name).await? {
        Some(_) => {
            println!("Platform '{namespace}/{name}' already exists, updating spec...");
            let patch = json!({ "spec": spec });
            api.patch(name, &PatchParams::apply("adhar"), &Patch::Merge(patch))
                .await
                .with_context(|| format!("Failed to update Platform '{namespace}/{name}'"))?;
        }
        None => {
            println!("Creating Platform '{namespace}/{name}'...");
            let mut platform = Platform::new(name, spec);
            platform.metadata.namespace = Some(namespace.to_string());
            api.create(&PostParams::default(), &platform)
                .await
                .with_context(|| format!("Failed to create Platform '{namespace}/{name}'"))?;
        }
    }

    if no_wait {
        println!("Platform resource applied. Run 'adhar status' to follow progress.");
        return Ok(());
    }

    println!("Waiting for core packages and repositories to sync...");
    let mut backoff = FibonacciBackoff::readiness();
    let timeout = Duration::from_secs(900);
    let start = SystemTime::now();

    loop {
        if start.elapsed().unwrap_or(Duration::MAX) > timeout {
            anyhow::bail!(
                "Timed out waiting for platform '{namespace}/{name}'. \
                 Run 'adhar status' to inspect where it is stuck."
            );
        }

        let platform = api
            .get(name)
            .await
            .with_context(|| format!("Failed to get Platform '{namespace}/{name}'"))?;
        let available = platform
            .status
            .as_ref()
            .is_some_and(|s| s.all_available());

        if available && repositories_synced(&client, namespace).await? {
            println!("Platform '{namespace}/{name}' is up.");
            return Ok(());
        }

        let wait = backoff.next_backoff();
        println!("  still waiting ({}s until next check)...", wait.as_secs());
        sleep(wait).await;
    }
}

/// True when every GitRepository in the namespace reports synced.
async fn repositories_synced(client: &Client, namespace: &str) -> Result<bool> {
    let api: Api<GitRepository> = Api::namespaced(client.clone(), namespace);
    let repos = api.list(&ListParams::default()).await?;
    if repos.items.is_empty() {
        // The Platform controller has not seeded them yet.
        return Ok(false);
    }
    Ok(repos
        .items
        .iter()
        .all(|r| r.status.as_ref().is_some_and(|s| s.synced)))
}

async fn down_command(client: Client, namespace: &str, name: &str) -> Result<()> {
    let api: Api<Platform> = Api::namespaced(client, namespace);
    match api.delete(name, &DeleteParams::default()).await {
        Ok(_) => {
            println!("Platform '{namespace}/{name}' deleted.");
            println!("Owned GitRepository objects will be garbage-collected.");
            Ok(())
        }
        Err(kube::Error::Api(api_err)) if api_err.code == 404 => {
            println!("Platform '{namespace}/{name}' does not exist.");
            Ok(())
        }
        Err(e) => Err(e).with_context(|| format!("Failed to delete Platform '{namespace}/{name}'")),
    }
}

async fn status_command(client: Client, namespace: &str, name: &str) -> Result<()> {
    let platforms: Api<Platform> = Api::namespaced(client.clone(), namespace);
    let Some(platform) = platforms.get_opt(name).await? else {
        println!("Platform '{namespace}/{name}' does not exist. Run 'adhar up' first.");
        return Ok(());
    };

    let status = platform.status.unwrap_or_default();
    println!("Platform: {namespace}/{name}");
    println!("  gitea:  {}", availability(status.gitea_available));
    println!("  nginx:  {}", availability(status.nginx_available));
    println!("  argocd: {}", availability(status.argocd_available));
    for condition in &status.conditions {
        if let (Some(reason), Some(message)) = (&condition.reason, &condition.message) {
            println!("  {}: {} ({reason}: {message})", condition.r#type, condition.status);
        }
    }

    let repos: Api<GitRepository> = Api::namespaced(client.clone(), namespace);
    let repos = repos.list(&ListParams::default()).await?;
    if !repos.items.is_empty() {
        println!("\n{:<30} {:<8} {:<16}", "REPOSITORY", "SYNCED", "COMMIT");
        for repo in repos.items {
            let name = repo.metadata.name.as_deref().unwrap_or("<unknown>");
            let (synced, commit) = repo
                .status
                .as_ref()
                .map(|s| {
                    (
                        if s.synced { "True" } else { "False" },
                        s.commit.hash.as_deref().unwrap_or("-"),
                    )
                })
                .unwrap_or(("Unknown", "-"));
            let short = &commit[..commit.len().min(12)];
            println!("{name:<30} {synced:<8} {short:<16}");
        }
    }

    let packages: Api<CustomPackage> = Api::namespaced(client, namespace);
    let packages = packages.list(&ListParams::default()).await?;
    if !packages.items.is_empty() {
        println!("\n{:<30} {:<8} {:<12}", "PACKAGE", "SYNCED", "REPOSITORIES");
        for pkg in packages.items {
            let name = pkg.metadata.name.as_deref().unwrap_or("<unknown>");
            let (synced, refs) = pkg
                .status
                .as_ref()
                .map(|s| {
                    (
                        if s.synced { "True" } else { "False" },
                        s.git_repository_refs.len(),
                    )
                })
                .unwrap_or(("Unknown", 0));
            println!("{name:<30} {synced:<8} {refs:<12}");
        }
    }

    Ok(())
}

fn availability(available: bool) -> &'static str {
    if available {
        "available"
    } else {
        "pending"
    }
}

/// Trigger reconciliation by bumping an annotation the controller watches.
async fn reconcile_command(
    client: Client,
    namespace: &str,
    resource_type: ResourceType,
    name: &str,
) -> Result<()> {
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    let patch = json!({
        "metadata": {
            "annotations": {
                RECONCILE_ANNOTATION: timestamp.to_string()
            }
        }
    });
    let params = PatchParams::apply("adhar");

    match resource_type {
        ResourceType::Platform => {
            let api: Api<Platform> = Api::namespaced(client, namespace);
            api.patch(name, &params, &Patch::Merge(patch)).await?;
        }
        ResourceType::GitRepository => {
            let api: Api<GitRepository> = Api::namespaced(client, namespace);
            api.patch(name, &params, &Patch::Merge(patch)).await?;
        }
        ResourceType::CustomPackage => {
            let api: Api<CustomPackage> = Api::namespaced(client, namespace);
            api.patch(name, &params, &Patch::Merge(patch)).await?;
        }
    }

    println!("Reconciliation triggered for '{namespace}/{name}'.");
    println!("  annotation: {RECONCILE_ANNOTATION}={timestamp}");
    Ok(())
}
