//! Bounded sleep-poll loops.
//!
//! Everything the harness waits for goes through [`wait_until`]: a fixed
//! interval, a hard timeout, and a descriptive name that ends up in the
//! timeout error.

use std::future::Future;
use std::time::{Duration, Instant};

use k8s_openapi::api::core::v1::Pod;
use tracing::debug;

use crate::clickhouse;
use crate::error::{Error, Result};
use crate::kubectl;

/// Default timeout for cluster state to converge.
pub const TIMEOUT: Duration = Duration::from_secs(300);
/// Interval for cheap count polls.
pub const POLL: Duration = Duration::from_secs(5);
/// Interval for the heavier all-pods-running polls.
pub const POLL_SLOW: Duration = Duration::from_secs(10);

/// Poll `check` until it yields a value or `timeout` elapses.
///
/// `check` returns `Ok(Some(v))` when the condition holds, `Ok(None)` to
/// keep polling. Errors from the check propagate immediately: a failing
/// kubectl call is a harness problem, not something to wait out.
pub async fn wait_until<T, F, Fut>(
    what: &str,
    timeout: Duration,
    interval: Duration,
    mut check: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>>>,
{
    let start = Instant::now();
    loop {
        if let Some(v) = check().await? {
            return Ok(v);
        }
        if start.elapsed() > timeout {
            return Err(Error::timeout(what, timeout));
        }
        debug!(what, elapsed = ?start.elapsed(), "still waiting");
        tokio::time::sleep(interval).await;
    }
}

/// Wait until the namespace holds exactly `expected` pods.
pub async fn wait_for_pod_count(ns: &str, expected: usize) -> Result<Vec<Pod>> {
    wait_until(
        &format!("{expected} pods in namespace {ns}"),
        TIMEOUT,
        POLL,
        || async {
            let pods = kubectl::get_pods(ns).await?;
            Ok((pods.len() == expected).then_some(pods))
        },
    )
    .await
}

/// Wait until every pod in the namespace is running and ready.
/// The timeout error lists each pod's current phase.
pub async fn wait_for_pods_running(ns: &str) -> Result<Vec<Pod>> {
    wait_for_running(ns, None, |_| true, "all pods").await
}

/// Wait for the ClickHouse server pods specifically, optionally pinning
/// the expected count.
pub async fn wait_for_clickhouse_pods_running(
    ns: &str,
    expected: Option<usize>,
) -> Result<Vec<Pod>> {
    wait_for_running(ns, expected, clickhouse::is_clickhouse_pod, "ClickHouse pods").await
}

async fn wait_for_running(
    ns: &str,
    expected: Option<usize>,
    filter: impl Fn(&Pod) -> bool,
    what: &str,
) -> Result<Vec<Pod>> {
    let start = Instant::now();
    loop {
        let pods: Vec<Pod> = kubectl::get_pods(ns)
            .await?
            .into_iter()
            .filter(&filter)
            .collect();

        let count_ok = match expected {
            Some(n) => pods.len() == n,
            None => !pods.is_empty(),
        };
        if count_ok && pods.iter().all(kubectl::is_ready) {
            return Ok(pods);
        }

        if start.elapsed() > TIMEOUT {
            let statuses: Vec<String> = pods
                .iter()
                .map(|p| format!("{}: {}", kubectl::name(&p.metadata), kubectl::phase(p)))
                .collect();
            return Err(Error::timeout(
                format!(
                    "{what} running in namespace {ns} (expected {}, statuses: [{}])",
                    expected.map_or_else(|| "any".to_string(), |n| n.to_string()),
                    statuses.join(", "),
                ),
                TIMEOUT,
            ));
        }
        tokio::time::sleep(POLL_SLOW).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn wait_until_returns_value_once_condition_holds() -> anyhow::Result<()> {
        let calls = AtomicU32::new(0);
        let v = wait_until(
            "three polls",
            Duration::from_secs(5),
            Duration::from_millis(1),
            || async {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                Ok((n >= 3).then_some(n))
            },
        )
        .await?;
        assert_eq!(v, 3);
        Ok(())
    }

    #[tokio::test]
    async fn wait_until_times_out_with_description() {
        let err = wait_until::<(), _, _>(
            "a condition that never holds",
            Duration::from_millis(5),
            Duration::from_millis(1),
            || async { Ok(None) },
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("a condition that never holds"));
    }

    #[tokio::test]
    async fn wait_until_propagates_check_errors() {
        let err = wait_until::<(), _, _>(
            "a broken check",
            Duration::from_secs(5),
            Duration::from_millis(1),
            || async { Err(Error::check("kubectl exploded")) },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::Check(_)));
    }
}
