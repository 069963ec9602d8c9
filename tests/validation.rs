//! Chart validation via `helm template`.
//!
//! These tests shell out to helm and assert on rendering failures.
//! Skipped automatically when `helm` is not on PATH or `CHART_PATH`
//! does not point at a chart directory.

use clickhouse_helm_e2e::cmd;
use clickhouse_helm_e2e::scenarios::validation;

async fn chart() -> Option<String> {
    let has_helm = cmd::run_unchecked("helm", &["version", "--short"])
        .await
        .map(|o| o.success())
        .unwrap_or(false);
    if !has_helm {
        eprintln!("SKIPPED: helm not found on PATH");
        return None;
    }
    let chart = std::env::var("CHART_PATH").unwrap_or_else(|_| "charts/clickhouse".into());
    if !std::path::Path::new(&chart).is_dir() {
        eprintln!("SKIPPED: chart not found at {chart}");
        return None;
    }
    Some(chart)
}

#[tokio::test]
async fn keeper_required_for_replication() -> anyhow::Result<()> {
    let Some(chart) = chart().await else {
        return Ok(());
    };
    validation::keeper_required(&chart).await?;
    Ok(())
}

#[tokio::test]
async fn keeper_replica_count_must_be_odd() -> anyhow::Result<()> {
    let Some(chart) = chart().await else {
        return Ok(());
    };
    validation::keeper_odd_replica_count(&chart).await?;
    Ok(())
}

#[tokio::test]
async fn shards_count_must_be_at_least_one() -> anyhow::Result<()> {
    let Some(chart) = chart().await else {
        return Ok(());
    };
    validation::shards_count_minimum(&chart).await?;
    Ok(())
}

#[tokio::test]
async fn validation_errors_are_aggregated() -> anyhow::Result<()> {
    let Some(chart) = chart().await else {
        return Ok(());
    };
    validation::aggregated_errors(&chart).await?;
    Ok(())
}
