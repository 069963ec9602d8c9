//! Chart validation checks: `helm template` must reject invalid value
//! combinations with the documented error messages. These run against
//! the chart alone, no cluster required.

use crate::ensure_check;
use crate::error::{Error, Result};
use crate::helm;

pub const CHECKS: &[&str] = &[
    "keeper_required",
    "keeper_odd_replica_count",
    "shards_count_minimum",
    "aggregated_errors",
];

pub async fn run(name: &str, chart: &str) -> Result<()> {
    match name {
        "keeper_required" => keeper_required(chart).await,
        "keeper_odd_replica_count" => keeper_odd_replica_count(chart).await,
        "shards_count_minimum" => shards_count_minimum(chart).await,
        "aggregated_errors" => aggregated_errors(chart).await,
        other => Err(Error::fixture(format!("unknown validation check: {other}"))),
    }
}

/// Replication needs coordination: `replicasCount > 1` requires the
/// bundled keeper or an external keeper host.
pub async fn keeper_required(chart: &str) -> Result<()> {
    let out = helm::template(
        chart,
        &["clickhouse.replicasCount=2", "keeper.enabled=false"],
    )
    .await?;
    ensure_check!(!out.success(), "expected helm template to fail");
    ensure_check!(
        out.stderr.contains("keeper.enabled"),
        "expected error about keeper.enabled, got: {}",
        out.stderr
    );
    ensure_check!(
        out.stderr.contains("replicasCount") || out.stderr.contains("clickhouse.zones"),
        "expected mention of replicasCount or zones: {}",
        out.stderr
    );

    let out = helm::template(
        chart,
        &[
            "clickhouse.replicasCount=2",
            "keeper.enabled=true",
            "keeper.replicaCount=3",
        ],
    )
    .await?;
    ensure_check!(
        out.success(),
        "expected helm template to succeed with keeper enabled, got: {}",
        out.stderr
    );

    let out = helm::template(
        chart,
        &[
            "clickhouse.replicasCount=2",
            "keeper.enabled=false",
            "clickhouse.keeper.host=external-keeper",
        ],
    )
    .await?;
    ensure_check!(
        out.success(),
        "expected helm template to succeed with external keeper host, got: {}",
        out.stderr
    );
    Ok(())
}

/// Keeper quorum needs an odd member count.
pub async fn keeper_odd_replica_count(chart: &str) -> Result<()> {
    for even in ["2", "4"] {
        let set = format!("keeper.replicaCount={even}");
        let out = helm::template(chart, &["keeper.enabled=true", set.as_str()]).await?;
        ensure_check!(
            !out.success(),
            "expected helm template to fail with replicaCount={even}"
        );
        ensure_check!(
            out.stderr.to_lowercase().contains("odd"),
            "expected error about odd number, got: {}",
            out.stderr
        );
        ensure_check!(
            out.stderr.contains(even),
            "expected current value {even} in error: {}",
            out.stderr
        );
    }

    for odd in ["1", "3", "5"] {
        let set = format!("keeper.replicaCount={odd}");
        let out = helm::template(chart, &["keeper.enabled=true", set.as_str()]).await?;
        ensure_check!(
            out.success(),
            "expected helm template to succeed with replicaCount={odd}, got: {}",
            out.stderr
        );
    }
    Ok(())
}

/// A cluster has at least one shard.
pub async fn shards_count_minimum(chart: &str) -> Result<()> {
    let out = helm::template(chart, &["clickhouse.shardsCount=0"]).await?;
    ensure_check!(!out.success(), "expected helm template to fail");
    ensure_check!(
        out.stderr.contains("shardsCount must be at least 1"),
        "expected shardsCount error, got: {}",
        out.stderr
    );
    Ok(())
}

/// Multiple violations surface together in one rendering failure.
pub async fn aggregated_errors(chart: &str) -> Result<()> {
    let out = helm::template(
        chart,
        &[
            "clickhouse.replicasCount=2",
            "keeper.enabled=true",
            "keeper.replicaCount=2",
            "clickhouse.keeper.host=",
        ],
    )
    .await?;
    ensure_check!(!out.success(), "expected helm template to fail");
    // keeper.enabled satisfies the keeper-required rule, so the odd
    // replica count is the error that must surface.
    ensure_check!(
        out.stderr.to_lowercase().contains("odd"),
        "expected odd replicas error: {}",
        out.stderr
    );
    Ok(())
}
