//! Chart validation runner.
//!
//! Verifies that `helm template` rejects invalid value combinations
//! with the documented error messages. Needs `helm` and a chart path,
//! nothing else.
//!
//! Usage:
//!   CHART_PATH=charts/clickhouse cargo run --bin validation
//!   cargo run --bin validation -- --feature keeper

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use clickhouse_helm_e2e::cmd;
use clickhouse_helm_e2e::scenarios::validation;

#[derive(Parser, Debug)]
#[command(name = "validation", about = "ClickHouse Helm chart validation tests")]
struct Args {
    /// Run only checks whose name contains this string.
    #[arg(long)]
    feature: Option<String>,

    /// Path to the chart directory.
    #[arg(long, default_value = "charts/clickhouse", env = "CHART_PATH", hide = true)]
    chart: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let helm = cmd::run("helm", &["version", "--short"]).await?;
    info!(version = %helm.stdout.trim(), "using helm");

    anyhow::ensure!(
        std::path::Path::new(&args.chart).exists(),
        "chart not found at {}",
        args.chart
    );

    let selected: Vec<&str> = validation::CHECKS
        .iter()
        .copied()
        .filter(|name| {
            args.feature
                .as_deref()
                .map_or(true, |f| name.contains(f))
        })
        .collect();

    let mut failed = 0usize;
    for name in &selected {
        match validation::run(name, &args.chart).await {
            Ok(()) => info!(check = name, "passed"),
            Err(e) => {
                error!(check = name, error = %e, "failed");
                failed += 1;
            }
        }
    }

    if failed > 0 {
        anyhow::bail!("{failed}/{} validation checks failed", selected.len());
    }
    info!("all {} validation checks passed", selected.len());
    Ok(())
}
