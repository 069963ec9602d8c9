//! Typed wrappers around `kubectl`.
//!
//! Everything here shells out to `kubectl ... -o json` and deserializes
//! the output into `k8s-openapi` types. The harness deliberately drives
//! the CLI instead of talking to the API server directly, so that tests
//! observe the cluster exactly the way an operator of the chart would.

use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::{PersistentVolumeClaim, Pod, Service};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::cmd::{self, CmdOutput};
use crate::error::Result;

/// Envelope for `kubectl get <kind> -o json` list output.
#[derive(Deserialize)]
struct List<T> {
    items: Vec<T>,
}

async fn get_list<T: DeserializeOwned>(kind: &str, ns: &str) -> Result<Vec<T>> {
    let out = cmd::run("kubectl", &["get", kind, "-n", ns, "-o", "json"]).await?;
    let list: List<T> = serde_json::from_str(&out.stdout)?;
    Ok(list.items)
}

async fn get_one<T: DeserializeOwned>(kind: &str, name: &str, ns: &str) -> Result<T> {
    let out = cmd::run("kubectl", &["get", kind, name, "-n", ns, "-o", "json"]).await?;
    Ok(serde_json::from_str(&out.stdout)?)
}

pub async fn get_pods(ns: &str) -> Result<Vec<Pod>> {
    get_list("pods", ns).await
}

pub async fn get_pod(ns: &str, name: &str) -> Result<Pod> {
    get_one("pod", name, ns).await
}

pub async fn get_pvcs(ns: &str) -> Result<Vec<PersistentVolumeClaim>> {
    get_list("pvc", ns).await
}

pub async fn get_pvc(ns: &str, name: &str) -> Result<PersistentVolumeClaim> {
    get_one("pvc", name, ns).await
}

pub async fn get_services(ns: &str) -> Result<Vec<Service>> {
    get_list("svc", ns).await
}

pub async fn get_service(ns: &str, name: &str) -> Result<Service> {
    get_one("svc", name, ns).await
}

pub async fn get_statefulsets(ns: &str) -> Result<Vec<StatefulSet>> {
    get_list("statefulsets", ns).await
}

/// Object name, or "" for objects that somehow lack one.
pub fn name(meta: &k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta) -> &str {
    meta.name.as_deref().unwrap_or_default()
}

/// A pod counts as ready when its phase is Running and the Ready
/// condition is True.
pub fn is_ready(pod: &Pod) -> bool {
    let Some(status) = &pod.status else {
        return false;
    };
    if status.phase.as_deref() != Some("Running") {
        return false;
    }
    status
        .conditions
        .iter()
        .flatten()
        .any(|c| c.type_ == "Ready" && c.status == "True")
}

/// Current phase string, for timeout diagnostics.
pub fn phase(pod: &Pod) -> &str {
    pod.status
        .as_ref()
        .and_then(|s| s.phase.as_deref())
        .unwrap_or("Unknown")
}

/// Image of the first container.
pub fn pod_image(pod: &Pod) -> Option<&str> {
    pod.spec
        .as_ref()
        .and_then(|s| s.containers.first())
        .and_then(|c| c.image.as_deref())
}

/// Node the pod was scheduled onto.
pub fn pod_node(pod: &Pod) -> Option<&str> {
    pod.spec.as_ref().and_then(|s| s.node_name.as_deref())
}

pub fn service_type(svc: &Service) -> &str {
    svc.spec
        .as_ref()
        .and_then(|s| s.type_.as_deref())
        .unwrap_or("ClusterIP")
}

/// Switch the active kubectl context.
pub async fn use_context(context: &str) -> Result<()> {
    cmd::run("kubectl", &["config", "use-context", context]).await?;
    Ok(())
}

/// Create a namespace, tolerating one that already exists.
pub async fn create_namespace(ns: &str) -> Result<()> {
    let out = cmd::run_unchecked("kubectl", &["create", "namespace", ns]).await?;
    if !out.success() && !out.stderr.contains("AlreadyExists") {
        debug!(namespace = ns, stderr = %out.stderr.trim(), "namespace create failed");
    }
    Ok(())
}

/// Best-effort namespace deletion for scenario cleanup.
pub async fn delete_namespace(ns: &str) {
    if let Ok(out) =
        cmd::run_unchecked("kubectl", &["delete", "namespace", ns, "--wait=false"]).await
    {
        if !out.success() {
            warn!(namespace = ns, stderr = %out.stderr.trim(), "namespace delete failed");
        }
    }
}

/// Create a generic secret from files, deleting a stale one first so the
/// step stays idempotent across reruns.
pub async fn create_secret_from_files(
    ns: &str,
    secret: &str,
    files: &[(&str, &str)],
) -> Result<()> {
    create_namespace(ns).await?;
    let _ = cmd::run_unchecked("kubectl", &["delete", "secret", secret, "-n", ns]).await?;

    let mut args = vec![
        "create".to_string(),
        "secret".to_string(),
        "generic".to_string(),
        secret.to_string(),
        "-n".to_string(),
        ns.to_string(),
    ];
    for (key, path) in files {
        args.push(format!("--from-file={key}={path}"));
    }
    let args: Vec<&str> = args.iter().map(String::as_str).collect();
    cmd::run("kubectl", &args).await?;
    Ok(())
}

/// `kubectl exec` into a pod; the exit status is returned, not checked.
pub async fn exec(ns: &str, pod: &str, argv: &[&str]) -> Result<CmdOutput> {
    let mut args = vec!["exec", "-n", ns, pod, "--"];
    args.extend_from_slice(argv);
    cmd::run_unchecked("kubectl", &args).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn pod(value: serde_json::Value) -> Pod {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn ready_requires_running_phase_and_ready_condition() {
        let ready = pod(json!({
            "metadata": { "name": "chi-demo-0-0-0" },
            "status": {
                "phase": "Running",
                "conditions": [{ "type": "Ready", "status": "True" }]
            }
        }));
        assert!(is_ready(&ready));

        let pending = pod(json!({
            "metadata": { "name": "chi-demo-0-0-0" },
            "status": { "phase": "Pending" }
        }));
        assert!(!is_ready(&pending));

        let running_not_ready = pod(json!({
            "metadata": { "name": "chi-demo-0-0-0" },
            "status": {
                "phase": "Running",
                "conditions": [{ "type": "Ready", "status": "False" }]
            }
        }));
        assert!(!is_ready(&running_not_ready));
    }

    #[test]
    fn pod_accessors_read_spec_fields() {
        let p = pod(json!({
            "metadata": { "name": "chi-demo-0-0-0" },
            "spec": {
                "nodeName": "minikube",
                "containers": [{ "name": "clickhouse", "image": "altinity/clickhouse-server:25.3" }]
            }
        }));
        assert_eq!(pod_image(&p), Some("altinity/clickhouse-server:25.3"));
        assert_eq!(pod_node(&p), Some("minikube"));
        assert_eq!(phase(&p), "Unknown");
    }

    #[test]
    fn list_envelope_parses_kubectl_output() {
        let raw = json!({
            "apiVersion": "v1",
            "kind": "List",
            "items": [
                { "metadata": { "name": "a" } },
                { "metadata": { "name": "b" } }
            ]
        })
        .to_string();
        let list: List<Pod> = serde_json::from_str(&raw).unwrap();
        let names: Vec<&str> = list.items.iter().map(|p| name(&p.metadata)).collect();
        assert_eq!(names, ["a", "b"]);
    }
}
