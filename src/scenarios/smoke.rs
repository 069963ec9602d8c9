//! Smoke scenarios: install the chart with a specific configuration,
//! wait for the deployment to converge, and verify rendered resources
//! and live database behavior.
//!
//! Each scenario is isolated in its own namespace and release; the
//! [`helm::Release`] guard uninstalls both when the scenario ends,
//! pass or fail.

use std::collections::BTreeMap;
use std::path::PathBuf;

use tracing::info;

use crate::clickhouse;
use crate::ensure_check;
use crate::error::{Error, Result};
use crate::helm::{self, ValuesSource};
use crate::kubectl;
use crate::state::HelmState;
use crate::tls;
use crate::users;
use crate::values::HelmValues;
use crate::wait;

use super::Env;

/// Scenario names, in execution order.
pub const SCENARIOS: &[&str] = &[
    "check_version",
    "check_basic_configuration",
    "check_replicas_and_shards",
    "check_persistence_configuration",
    "check_service_configuration",
    "check_user_configuration",
    "check_keeper_configuration",
    "check_image_configuration",
    "check_upgrade",
    "check_tls_configuration",
    "check_error_handling",
];

/// Run one scenario by name.
pub async fn run(name: &str, env: &Env) -> Result<()> {
    match name {
        "check_version" => check_version(env).await,
        "check_basic_configuration" => check_basic_configuration(env).await,
        "check_replicas_and_shards" => check_replicas_and_shards(env).await,
        "check_persistence_configuration" => check_persistence_configuration(env).await,
        "check_service_configuration" => check_service_configuration(env).await,
        "check_user_configuration" => check_user_configuration(env).await,
        "check_keeper_configuration" => check_keeper_configuration(env).await,
        "check_image_configuration" => check_image_configuration(env).await,
        "check_upgrade" => check_upgrade(env).await,
        "check_tls_configuration" => check_tls_configuration(env).await,
        "check_error_handling" => check_error_handling(env).await,
        other => Err(Error::fixture(format!("unknown scenario: {other}"))),
    }
}

async fn install(
    env: &Env,
    release: &str,
    ns: &str,
    values: ValuesSource,
) -> Result<helm::Release> {
    let mut release = helm::install(release, ns, &env.chart, &values).await?;
    if env.keep_releases {
        release.keep();
    }
    Ok(release)
}

/// Default install must come up and report the expected server version.
pub async fn check_version(env: &Env) -> Result<()> {
    let ns = "check-version";
    let _release = install(env, "my-clickhouse", ns, ValuesSource::None).await?;

    // Default chart: one server pod plus the operator.
    wait::wait_for_pod_count(ns, 2).await?;
    wait::wait_for_clickhouse_pods_running(ns, None).await?;
    clickhouse::verify_version(ns, &env.version).await
}

/// nameOverride must flow through to the CHI and its resources.
pub async fn check_basic_configuration(env: &Env) -> Result<()> {
    let ns = "check-basic-config";
    let custom_name = "custom-clickhouse";

    let mut values = HelmValues::default();
    values.name_override = Some(custom_name.to_string());
    let _release = install(env, "config-test", ns, ValuesSource::Inline(values)).await?;

    wait::wait_for_pod_count(ns, 2).await?;
    clickhouse::verify_custom_name(ns, custom_name).await
}

/// Replicas × shards topology with the bundled keeper.
pub async fn check_replicas_and_shards(env: &Env) -> Result<()> {
    let ns = "check-replicas-shards";

    let mut values = HelmValues::default();
    values.clickhouse.replicas_count = 2;
    values.clickhouse.shards_count = 2;
    values.keeper.enabled = true;
    let state = HelmState::from_values(values.clone());

    let _release = install(env, "replicas-test", ns, ValuesSource::Inline(values)).await?;

    state.verify_deployment(ns).await?;
    clickhouse::verify_cluster_topology(ns, 2, 2).await
}

/// Persistence fixture must produce a CHI volume claim template and PVCs
/// of the requested size.
pub async fn check_persistence_configuration(env: &Env) -> Result<()> {
    let ns = "check-persistence";
    let size = "10Gi";

    let mut values = HelmValues::default();
    values.clickhouse.persistence.enabled = true;
    values.clickhouse.persistence.size = Some(size.to_string());
    let _release = install(env, "persistence", ns, ValuesSource::Inline(values)).await?;

    wait::wait_for_pod_count(ns, 2).await?;
    wait::wait_for_clickhouse_pods_running(ns, None).await?;
    clickhouse::verify_persistence_configuration(ns, size).await?;
    clickhouse::verify_pvc_size(ns, size).await
}

/// LoadBalancer service with source ranges and the standard ports.
pub async fn check_service_configuration(env: &Env) -> Result<()> {
    let ns = "check-service";

    let mut values = HelmValues::default();
    values.clickhouse.lb_service.enabled = true;
    values.clickhouse.lb_service.load_balancer_source_ranges = vec!["0.0.0.0/0".into()];
    let _release = install(env, "service-test", ns, ValuesSource::Inline(values)).await?;

    wait::wait_for_pod_count(ns, 2).await?;

    let services = kubectl::get_services(ns).await?;
    let lb = services
        .iter()
        .find(|s| kubectl::service_type(s) == "LoadBalancer")
        .ok_or_else(|| Error::check("LoadBalancer service not found"))?;
    let spec = lb
        .spec
        .as_ref()
        .ok_or_else(|| Error::check("LoadBalancer service has no spec"))?;

    let ranges = spec.load_balancer_source_ranges.clone().unwrap_or_default();
    ensure_check!(
        ranges == ["0.0.0.0/0"],
        "expected source ranges [\"0.0.0.0/0\"], got {ranges:?}"
    );

    let ports = spec.ports.clone().unwrap_or_default();
    for (name, number) in [("http", 8123), ("tcp", 9000)] {
        let port = ports
            .iter()
            .find(|p| p.name.as_deref() == Some(name))
            .ok_or_else(|| Error::check(format!("expected {name} port on LoadBalancer")))?;
        ensure_check!(
            port.port == number,
            "expected {name} port {number}, got {}",
            port.port
        );
    }
    Ok(())
}

/// Default user plus an additional sha256-authenticated user must both
/// be able to connect.
pub async fn check_user_configuration(env: &Env) -> Result<()> {
    let ns = "check-user";
    let analytics_password = "AnalyticsPassword123";

    let mut values = HelmValues::default();
    values.clickhouse.default_user = Some(crate::values::DefaultUser {
        password: Some("SuperSecret".into()),
        allow_external_access: true,
        host_ip: Some("0.0.0.0/0".into()),
    });
    values.clickhouse.users = vec![crate::values::UserValues {
        name: "analytics".into(),
        password_sha256_hex: Some(users::sha256_hex(analytics_password)),
        grants: vec!["GRANT SELECT ON default.*".into()],
        ..Default::default()
    }];
    let _release = install(env, "user-test", ns, ValuesSource::Inline(values)).await?;

    wait::wait_for_pod_count(ns, 2).await?;
    let pods = wait::wait_for_clickhouse_pods_running(ns, None).await?;
    let pod = kubectl::name(&pods[0].metadata);

    ensure_check!(
        clickhouse::can_connect(ns, pod, "default", "SuperSecret").await?,
        "failed to connect with default user"
    );
    ensure_check!(
        clickhouse::can_connect(ns, pod, "analytics", analytics_password).await?,
        "failed to connect with analytics user"
    );
    users::verify_user_grants(ns, "analytics", &["GRANT SELECT ON default.*".into()], "SuperSecret")
        .await
}

/// Bundled keeper with local storage.
pub async fn check_keeper_configuration(env: &Env) -> Result<()> {
    let ns = "check-keeper";

    let mut values = HelmValues::default();
    values.clickhouse.replicas_count = 3;
    values.keeper.enabled = true;
    values.keeper.replica_count = 3;
    values.keeper.local_storage.size = Some("5Gi".into());
    let state = HelmState::from_values(values.clone());

    let _release = install(env, "keeper-test", ns, ValuesSource::Inline(values)).await?;

    state.verify_deployment(ns).await?;
    clickhouse::verify_keeper_pods_running(ns, 3).await?;
    clickhouse::verify_keeper_storage(ns, "5Gi").await
}

/// Custom image tag must reach the server pods.
pub async fn check_image_configuration(env: &Env) -> Result<()> {
    let ns = "check-image";
    let tag = &env.version;

    let mut values = HelmValues::default();
    values.clickhouse.image = Some(crate::values::Image {
        repository: Some("altinity/clickhouse-server".into()),
        tag: Some(tag.to_string()),
        pull_policy: Some("IfNotPresent".into()),
    });
    let _release = install(env, "image-test", ns, ValuesSource::Inline(values)).await?;

    wait::wait_for_pod_count(ns, 2).await?;
    wait::wait_for_clickhouse_pods_running(ns, None).await?;
    clickhouse::verify_image_tag(ns, tag).await
}

/// `helm upgrade` with a changed shard count must reshape the cluster.
pub async fn check_upgrade(env: &Env) -> Result<()> {
    let ns = "check-upgrade";

    let values = HelmValues::default();
    let state = HelmState::from_values(values.clone());
    let _release = install(env, "upgrade-test", ns, ValuesSource::Inline(values)).await?;
    state.verify_deployment(ns).await?;

    let mut upgraded = HelmValues::default();
    upgraded.clickhouse.shards_count = 2;
    let upgraded_state = HelmState::from_values(upgraded.clone());
    helm::upgrade("upgrade-test", ns, &env.chart, &ValuesSource::Inline(upgraded)).await?;

    upgraded_state.verify_deployment(ns).await?;
    clickhouse::verify_cluster_topology(ns, 1, 2).await
}

/// TLS fixture: certificates mounted from a secret must appear in the
/// CHI configuration files. Needs local cert fixtures; skipped when
/// `TLS_FIXTURES_DIR` is not set.
pub async fn check_tls_configuration(env: &Env) -> Result<()> {
    let Ok(dir) = std::env::var("TLS_FIXTURES_DIR") else {
        info!("TLS_FIXTURES_DIR not set, skipping TLS scenario");
        return Ok(());
    };
    let dir = PathBuf::from(dir);
    let ns = "check-tls";

    tls::create_tls_secret(
        ns,
        &dir.join("server.crt"),
        &dir.join("server.key"),
        &dir.join("dhparam.pem"),
    )
    .await?;

    let mut values = HelmValues::default();
    let mut annotations = BTreeMap::new();
    annotations.insert("tls-enabled".to_string(), "true".to_string());
    values.clickhouse.pod_annotations = annotations;
    values.clickhouse.extra_config = Some(TLS_EXTRA_CONFIG.to_string());
    let _release = install(env, "tls-test", ns, ValuesSource::Inline(values)).await?;

    wait::wait_for_pod_count(ns, 2).await?;
    tls::verify_openssl_config(ns).await?;
    tls::verify_tls_secret_references(
        ns,
        &[("server.key", tls::TLS_SECRET), ("dhparam.pem", tls::TLS_SECRET)],
    )
    .await
}

const TLS_EXTRA_CONFIG: &str = r#"<clickhouse>
  <openSSL>
    <server>
      <certificateFile>/etc/clickhouse-server/secrets.d/server.crt</certificateFile>
      <privateKeyFile>/etc/clickhouse-server/secrets.d/server.key</privateKeyFile>
    </server>
  </openSSL>
</clickhouse>
"#;

/// Installing with `shardsCount=0` must fail chart validation.
pub async fn check_error_handling(env: &Env) -> Result<()> {
    let ns = "check-error";

    let mut values = HelmValues::default();
    values.clickhouse.shards_count = 0;
    let out = helm::try_install("error-test", ns, &env.chart, &ValuesSource::Inline(values))
        .await?;

    // Whatever happened, don't leave a half-installed release around.
    helm::uninstall("error-test", ns).await;
    kubectl::delete_namespace(ns).await;

    ensure_check!(
        !out.success(),
        "installation should have failed with shardsCount=0"
    );
    info!(status = out.status, "installation failed as expected");
    Ok(())
}
