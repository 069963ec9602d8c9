//! ClickHouse-specific cluster inspection: CHI/CHK custom resources,
//! pod classification, live queries through `clickhouse-client`, and the
//! verification checks built on them.
//!
//! CHI (ClickHouseInstallation) and CHK (ClickHouseKeeperInstallation)
//! are operator-managed custom resources; they are read as raw JSON
//! since the harness only inspects a handful of paths.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::Pod;
use serde_json::Value;
use tracing::info;

use crate::cmd::CmdOutput;
use crate::ensure_check;
use crate::error::{Error, Result};
use crate::kubectl;
use crate::values::KeeperResources;

// ── Pod classification ───────────────────────────────────────────────────────

/// ClickHouse server pods carry the operator's `chi-` name prefix; the
/// operator's own pod is excluded.
pub fn is_clickhouse_pod(pod: &Pod) -> bool {
    let name = kubectl::name(&pod.metadata);
    name.contains("chi-") && !name.contains("operator")
}

/// Bundled keeper pods carry the `chk-` prefix.
pub fn is_keeper_pod(pod: &Pod) -> bool {
    kubectl::name(&pod.metadata).contains("chk-")
}

pub async fn clickhouse_pods(ns: &str) -> Result<Vec<Pod>> {
    Ok(kubectl::get_pods(ns)
        .await?
        .into_iter()
        .filter(is_clickhouse_pod)
        .collect())
}

pub async fn keeper_pods(ns: &str) -> Result<Vec<Pod>> {
    Ok(kubectl::get_pods(ns)
        .await?
        .into_iter()
        .filter(is_keeper_pod)
        .collect())
}

/// First ClickHouse pod in the namespace, for single-pod queries.
pub async fn any_clickhouse_pod(ns: &str) -> Result<Pod> {
    clickhouse_pods(ns)
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| Error::check(format!("no ClickHouse pods found in namespace {ns}")))
}

// ── Custom resources ─────────────────────────────────────────────────────────

async fn get_cr(kind: &str, ns: &str) -> Result<Option<Value>> {
    let out = crate::cmd::run("kubectl", &["get", kind, "-n", ns, "-o", "json"]).await?;
    let parsed: Value = serde_json::from_str(&out.stdout)?;
    Ok(parsed
        .get("items")
        .and_then(Value::as_array)
        .and_then(|items| items.first())
        .cloned())
}

/// The ClickHouseInstallation in the namespace, if the operator has
/// created one yet.
pub async fn get_chi(ns: &str) -> Result<Option<Value>> {
    get_cr("chi", ns).await
}

/// The ClickHouseKeeperInstallation, if any.
pub async fn get_chk(ns: &str) -> Result<Option<Value>> {
    get_cr("chk", ns).await
}

pub async fn chi_name(ns: &str) -> Result<Option<String>> {
    Ok(get_chi(ns).await?.and_then(|chi| {
        chi.pointer("/metadata/name")
            .and_then(Value::as_str)
            .map(str::to_string)
    }))
}

fn require_chi(chi: Option<Value>) -> Result<Value> {
    chi.ok_or_else(|| Error::check("ClickHouseInstallation not found"))
}

// ── Queries ──────────────────────────────────────────────────────────────────

/// Run a query through `clickhouse-client` inside a server pod.
/// The exit status is surfaced, not checked: permission probes rely on
/// seeing failures.
pub async fn query(
    ns: &str,
    pod: &str,
    sql: &str,
    user: &str,
    password: &str,
) -> Result<CmdOutput> {
    kubectl::exec(
        ns,
        pod,
        &[
            "clickhouse-client",
            "-u",
            user,
            "--password",
            password,
            "-q",
            sql,
        ],
    )
    .await
}

/// `SELECT version()` as the default user.
pub async fn get_version(ns: &str, pod: &str) -> Result<String> {
    let out = query(ns, pod, "SELECT version()", "default", "").await?;
    ensure_check!(
        out.success(),
        "version query failed in pod {pod}: {}",
        out.stderr.trim()
    );
    Ok(out.stdout.trim().to_string())
}

/// Whether the given credentials can run `SELECT 1`.
pub async fn can_connect(ns: &str, pod: &str, user: &str, password: &str) -> Result<bool> {
    Ok(query(ns, pod, "SELECT 1", user, password).await?.success())
}

// ── Verifiers ────────────────────────────────────────────────────────────────

pub async fn verify_version(ns: &str, expected: &str) -> Result<()> {
    let pod = any_clickhouse_pod(ns).await?;
    let version = get_version(ns, kubectl::name(&pod.metadata)).await?;
    info!(ns, %version, "ClickHouse version");
    ensure_check!(
        version == expected,
        "expected ClickHouse version {expected}, got {version}"
    );
    Ok(())
}

/// The nameOverride must show up in the CHI name, and server pods must
/// exist under it.
pub async fn verify_custom_name(ns: &str, custom_name: &str) -> Result<()> {
    let chi = chi_name(ns)
        .await?
        .ok_or_else(|| Error::check("ClickHouseInstallation not found"))?;
    ensure_check!(
        chi.contains(custom_name),
        "custom name '{custom_name}' not found in CHI name '{chi}'"
    );
    let pods = clickhouse_pods(ns).await?;
    ensure_check!(!pods.is_empty(), "no ClickHouse pods found in namespace {ns}");
    Ok(())
}

/// Replica/shard layout in the CHI must match the fixture.
pub async fn verify_cluster_topology(ns: &str, replicas: u32, shards: u32) -> Result<()> {
    let chi = require_chi(get_chi(ns).await?)?;
    let clusters = chi
        .pointer("/spec/configuration/clusters")
        .and_then(Value::as_array)
        .filter(|c| !c.is_empty())
        .ok_or_else(|| Error::check("no clusters found in CHI"))?;

    let layout = &clusters[0]["layout"];
    let actual_replicas = layout["replicasCount"].as_u64();
    let actual_shards = layout["shardsCount"].as_u64();

    ensure_check!(
        actual_replicas == Some(replicas as u64),
        "expected {replicas} replicas, got {actual_replicas:?}"
    );
    ensure_check!(
        actual_shards == Some(shards as u64),
        "expected {shards} shards, got {actual_shards:?}"
    );
    info!(ns, replicas, shards, "cluster topology verified");
    Ok(())
}

/// The CHI's data volume claim template must request the expected size.
pub async fn verify_persistence_configuration(ns: &str, expected_size: &str) -> Result<()> {
    let chi = require_chi(get_chi(ns).await?)?;
    let templates = chi
        .pointer("/spec/templates/volumeClaimTemplates")
        .and_then(Value::as_array)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| Error::check("no volumeClaimTemplates found in CHI"))?;

    let data = templates
        .iter()
        .find(|t| t["name"].as_str().unwrap_or_default().contains("data"))
        .ok_or_else(|| Error::check("data volume claim template not found in CHI"))?;

    let size = data
        .pointer("/spec/resources/requests/storage")
        .and_then(Value::as_str);
    ensure_check!(
        size == Some(expected_size),
        "expected storage size {expected_size}, got {size:?}"
    );
    Ok(())
}

/// At least one ClickHouse data PVC must request the expected size.
pub async fn verify_pvc_size(ns: &str, expected_size: &str) -> Result<()> {
    let pvcs = kubectl::get_pvcs(ns).await?;
    ensure_check!(!pvcs.is_empty(), "no PVCs found in namespace {ns}");

    for pvc in &pvcs {
        let size = pvc
            .spec
            .as_ref()
            .and_then(|s| s.resources.as_ref())
            .and_then(|r| r.requests.as_ref())
            .and_then(|req| req.get("storage"))
            .map(|q| q.0.as_str());
        if size == Some(expected_size) {
            info!(pvc = kubectl::name(&pvc.metadata), size = expected_size, "PVC size verified");
            return Ok(());
        }
    }
    Err(Error::check(format!(
        "no PVC found with expected storage size {expected_size}"
    )))
}

/// Find a ClickHouse PVC whose name marks it as the given type
/// ("data" / "logs") and check its access mode.
pub async fn verify_pvc_access_mode(ns: &str, expected_mode: &str, pvc_type: &str) -> Result<()> {
    let pvcs = kubectl::get_pvcs(ns).await?;
    for pvc in &pvcs {
        let name = kubectl::name(&pvc.metadata);
        if !name.to_lowercase().contains(pvc_type) || !name.contains("chi-") {
            continue;
        }
        let modes = pvc
            .spec
            .as_ref()
            .and_then(|s| s.access_modes.clone())
            .unwrap_or_default();
        ensure_check!(
            modes.iter().any(|m| m.as_str() == expected_mode),
            "expected accessMode {expected_mode} in PVC {name}, got {modes:?}"
        );
        return Ok(());
    }
    Err(Error::check(format!(
        "no {pvc_type} PVC found for verification in namespace {ns}"
    )))
}

/// Every server pod must run an image containing the expected tag.
pub async fn verify_image_tag(ns: &str, expected_tag: &str) -> Result<()> {
    let pods = clickhouse_pods(ns).await?;
    ensure_check!(!pods.is_empty(), "no ClickHouse pods found in namespace {ns}");
    for pod in &pods {
        let name = kubectl::name(&pod.metadata);
        let image = kubectl::pod_image(pod).unwrap_or_default();
        ensure_check!(
            image.contains(expected_tag),
            "expected image tag {expected_tag} in pod {name}, got {image}"
        );
    }
    Ok(())
}

fn pod_metadata_map<'a>(pod: &'a Pod, which: &str) -> Option<&'a BTreeMap<String, String>> {
    match which {
        "annotations" => pod.metadata.annotations.as_ref(),
        _ => pod.metadata.labels.as_ref(),
    }
}

async fn verify_pod_metadata(
    ns: &str,
    expected: &BTreeMap<String, String>,
    which: &str,
    filter: fn(&Pod) -> bool,
) -> Result<()> {
    let pods: Vec<Pod> = kubectl::get_pods(ns)
        .await?
        .into_iter()
        .filter(filter)
        .collect();
    ensure_check!(!pods.is_empty(), "no matching pods found in namespace {ns}");

    for pod in &pods {
        let name = kubectl::name(&pod.metadata);
        let actual = pod_metadata_map(pod, which);
        for (k, v) in expected {
            let got = actual.and_then(|m| m.get(k));
            ensure_check!(
                got == Some(v),
                "pod {name}: expected {which} {k}={v}, got {got:?}"
            );
        }
    }
    Ok(())
}

pub async fn verify_pod_annotations(ns: &str, expected: &BTreeMap<String, String>) -> Result<()> {
    verify_pod_metadata(ns, expected, "annotations", is_clickhouse_pod).await
}

pub async fn verify_pod_labels(ns: &str, expected: &BTreeMap<String, String>) -> Result<()> {
    verify_pod_metadata(ns, expected, "labels", is_clickhouse_pod).await
}

pub async fn verify_keeper_annotations(
    ns: &str,
    expected: &BTreeMap<String, String>,
) -> Result<()> {
    verify_pod_metadata(ns, expected, "annotations", is_keeper_pod).await
}

/// Find the service of the given type and check its annotations/labels.
async fn service_metadata(
    ns: &str,
    service_type: &str,
) -> Result<k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta> {
    let services = kubectl::get_services(ns).await?;
    services
        .into_iter()
        .find(|s| kubectl::service_type(s) == service_type)
        .map(|s| s.metadata)
        .ok_or_else(|| Error::check(format!("no {service_type} service found in namespace {ns}")))
}

pub async fn verify_service_annotations(
    ns: &str,
    expected: &BTreeMap<String, String>,
    service_type: &str,
) -> Result<()> {
    let meta = service_metadata(ns, service_type).await?;
    let actual = meta.annotations.unwrap_or_default();
    for (k, v) in expected {
        let got = actual.get(k);
        ensure_check!(
            got == Some(v),
            "service: expected annotation {k}={v}, got {got:?}"
        );
    }
    Ok(())
}

pub async fn verify_service_labels(
    ns: &str,
    expected: &BTreeMap<String, String>,
    service_type: &str,
) -> Result<()> {
    let meta = service_metadata(ns, service_type).await?;
    let actual = meta.labels.unwrap_or_default();
    for (k, v) in expected {
        let got = actual.get(k);
        ensure_check!(got == Some(v), "service: expected label {k}={v}, got {got:?}");
    }
    Ok(())
}

/// Keys extracted from an extraConfig XML blob that the CHI must carry.
/// The harness only checks for the settings it knows the chart forwards.
pub fn extra_config_keys(extra_config: &str) -> Vec<&'static str> {
    const KNOWN: [&str; 4] = [
        "max_connections",
        "max_concurrent_queries",
        "logger",
        "max_table_size_to_drop",
    ];
    KNOWN
        .into_iter()
        .filter(|key| extra_config.contains(key))
        .collect()
}

/// The CHI configuration must mention each extracted extraConfig key,
/// either under `files` or `settings`.
pub async fn verify_extra_config(ns: &str, expected_keys: &[&str]) -> Result<()> {
    let chi = require_chi(get_chi(ns).await?)?;
    let configuration = chi
        .pointer("/spec/configuration")
        .map(Value::to_string)
        .unwrap_or_default();
    for key in expected_keys {
        ensure_check!(
            configuration.contains(key),
            "extraConfig key '{key}' not found in CHI configuration"
        );
    }
    Ok(())
}

/// The bundled keeper must be running with exactly the expected count.
pub async fn verify_keeper_pods_running(ns: &str, expected: usize) -> Result<()> {
    let pods = keeper_pods(ns).await?;
    ensure_check!(
        pods.len() == expected,
        "expected {expected} keeper pods, got {}",
        pods.len()
    );
    for pod in &pods {
        ensure_check!(
            kubectl::is_ready(pod),
            "keeper pod {} is not running",
            kubectl::name(&pod.metadata)
        );
    }
    Ok(())
}

/// Keeper PVCs must request the configured local storage size.
pub async fn verify_keeper_storage(ns: &str, expected_size: &str) -> Result<()> {
    let pvcs = kubectl::get_pvcs(ns).await?;
    let keeper_pvcs: Vec<_> = pvcs
        .iter()
        .filter(|p| kubectl::name(&p.metadata).contains("chk-"))
        .collect();
    ensure_check!(!keeper_pvcs.is_empty(), "no keeper PVCs found in namespace {ns}");

    for pvc in keeper_pvcs {
        let name = kubectl::name(&pvc.metadata);
        let size = pvc
            .spec
            .as_ref()
            .and_then(|s| s.resources.as_ref())
            .and_then(|r| r.requests.as_ref())
            .and_then(|req| req.get("storage"))
            .map(|q| q.0.as_str());
        ensure_check!(
            size == Some(expected_size),
            "expected keeper storage {expected_size} in PVC {name}, got {size:?}"
        );
    }
    Ok(())
}

/// Keeper pods must carry the requests/limits from the fixture.
pub async fn verify_keeper_resources(ns: &str, expected: &KeeperResources) -> Result<()> {
    let pods = keeper_pods(ns).await?;
    ensure_check!(!pods.is_empty(), "no keeper pods found in namespace {ns}");
    let expected = expected.to_k8s();

    for pod in &pods {
        let name = kubectl::name(&pod.metadata);
        let resources = pod
            .spec
            .as_ref()
            .and_then(|s| s.containers.first())
            .and_then(|c| c.resources.as_ref())
            .ok_or_else(|| Error::check(format!("keeper pod {name} has no resources")))?;

        for (section, entries) in &expected {
            let actual = match section.as_str() {
                "requests" => resources.requests.as_ref(),
                _ => resources.limits.as_ref(),
            };
            for (k, v) in entries {
                let got = actual.and_then(|m| m.get(k)).map(|q| q.0.as_str());
                ensure_check!(
                    got == Some(v.as_str()),
                    "keeper pod {name}: expected {section}.{k}={v}, got {got:?}"
                );
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn pod(name: &str) -> Pod {
        serde_json::from_value(json!({ "metadata": { "name": name } })).unwrap()
    }

    #[test]
    fn classifies_pods_by_operator_prefix() {
        assert!(is_clickhouse_pod(&pod("chi-demo-cluster-0-0-0")));
        assert!(!is_clickhouse_pod(&pod("clickhouse-operator-5b8f9-x2x")));
        assert!(!is_clickhouse_pod(&pod("chk-demo-keeper-0")));
        assert!(is_keeper_pod(&pod("chk-demo-keeper-0")));
        assert!(!is_keeper_pod(&pod("chi-demo-cluster-0-0-0")));
    }

    #[test]
    fn extracts_known_extra_config_keys() {
        let xml = r#"
<clickhouse>
  <max_connections>4096</max_connections>
  <logger><level>warning</level></logger>
</clickhouse>
"#;
        assert_eq!(extra_config_keys(xml), vec!["max_connections", "logger"]);
        assert!(extra_config_keys("<clickhouse/>").is_empty());
    }
}
