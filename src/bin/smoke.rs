//! Smoke test runner.
//!
//! Brings up a local Kubernetes cluster (minikube by default, selected
//! via `LOCAL_K8S_PROVIDER`), installs the chart under various
//! configurations, and verifies each deployment.
//!
//! Usage:
//!   cargo run --bin smoke                          # all scenarios
//!   cargo run --bin smoke -- --feature check_version

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use clickhouse_helm_e2e::scenarios::{smoke, Env};
use clickhouse_helm_e2e::{cluster, helm};

#[derive(Parser, Debug)]
#[command(name = "smoke", about = "ClickHouse Helm chart smoke tests")]
struct Args {
    /// Run only scenarios whose name contains this string.
    #[arg(long)]
    feature: Option<String>,

    /// Chart reference: local directory or repo chart.
    #[arg(long, default_value = "altinity/clickhouse", env = "CHART_PATH", hide = true)]
    chart: String,

    /// Chart repository URL for remote installs.
    #[arg(long, default_value = helm::ALTINITY_REPO, env = "CHART_REPO", hide = true)]
    repo_url: String,

    /// Expected ClickHouse server version.
    #[arg(
        long,
        default_value = "25.3.6.10034.altinitystable",
        env = "CLICKHOUSE_VERSION",
        hide = true
    )]
    version: String,

    /// Keep releases and namespaces after scenarios finish.
    #[arg(long, env = "KEEP_RELEASES", hide = true)]
    keep: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,clickhouse_helm_e2e=debug")),
        )
        .init();

    let args = Args::parse();
    let env = Env {
        chart: args.chart,
        repo_url: args.repo_url,
        version: args.version,
        keep_releases: args.keep,
    };

    let selected: Vec<&str> = smoke::SCENARIOS
        .iter()
        .copied()
        .filter(|name| {
            args.feature
                .as_deref()
                .map_or(true, |f| name.contains(f))
        })
        .collect();
    if selected.is_empty() {
        anyhow::bail!(
            "no scenario matches --feature {:?}; known scenarios: {}",
            args.feature,
            smoke::SCENARIOS.join(", ")
        );
    }

    let provider = cluster::from_env()?;
    info!(provider = provider.context_name(), "setting up local cluster");
    provider.setup().await?;
    env.prepare().await?;

    let mut failed = 0usize;
    for name in &selected {
        info!(scenario = name, "running scenario");
        match smoke::run(name, &env).await {
            Ok(()) => info!(scenario = name, "scenario passed"),
            Err(e) => {
                error!(scenario = name, error = %e, "scenario failed");
                failed += 1;
            }
        }
    }

    if !env.keep_releases {
        provider.teardown().await;
    }

    if failed > 0 {
        anyhow::bail!("{failed}/{} scenarios failed", selected.len());
    }
    info!("all {} scenarios passed", selected.len());
    Ok(())
}
