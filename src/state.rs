//! Fixture-driven deployment verification.
//!
//! [`HelmState`] reads a values fixture and runs every verification
//! check the configuration calls for: waits for the deployment to
//! converge, then compares rendered resources and live behavior against
//! the fixture. Which checks run is a pure function of the fixture
//! ([`HelmState::enabled_checks`]), so the dispatch is testable without
//! a cluster.

use std::path::{Path, PathBuf};

use tracing::info;

use crate::clickhouse;
use crate::ensure_check;
use crate::error::Result;
use crate::kubectl;
use crate::users;
use crate::values::HelmValues;
use crate::wait;

/// One verification the fixture enables.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Check {
    Deployment,
    ClusterTopology,
    NameOverride,
    Persistence,
    LogPersistence,
    LbService,
    Users,
    PodAnnotations,
    PodLabels,
    ServiceAnnotations,
    ServiceLabels,
    ExtraConfig,
    Keeper,
    KeeperStorage,
    KeeperAnnotations,
    KeeperResources,
    Image,
}

/// Orchestrator for verifying a release against its values fixture.
pub struct HelmState {
    pub values: HelmValues,
    pub fixture: PathBuf,
}

impl HelmState {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        Ok(Self {
            values: HelmValues::from_file(path)?,
            fixture: path.to_path_buf(),
        })
    }

    pub fn from_values(values: HelmValues) -> Self {
        Self {
            values,
            fixture: PathBuf::new(),
        }
    }

    /// Which checks this fixture enables, in execution order.
    /// Deployment readiness and topology always run.
    pub fn enabled_checks(&self) -> Vec<Check> {
        let ch = &self.values.clickhouse;
        let keeper = &self.values.keeper;
        let mut checks = vec![Check::Deployment, Check::ClusterTopology];

        if self.values.name_override.is_some() {
            checks.push(Check::NameOverride);
        }
        if ch.persistence.enabled {
            checks.push(Check::Persistence);
            if ch.persistence.logs.enabled {
                checks.push(Check::LogPersistence);
            }
        }
        if ch.lb_service.enabled {
            checks.push(Check::LbService);
        }
        if ch.default_user.is_some() || !ch.users.is_empty() {
            checks.push(Check::Users);
        }
        if !ch.pod_annotations.is_empty() {
            checks.push(Check::PodAnnotations);
        }
        if !ch.pod_labels.is_empty() {
            checks.push(Check::PodLabels);
        }
        if !ch.service.service_annotations.is_empty() {
            checks.push(Check::ServiceAnnotations);
        }
        if !ch.service.service_labels.is_empty() {
            checks.push(Check::ServiceLabels);
        }
        if ch.extra_config.is_some() {
            checks.push(Check::ExtraConfig);
        }
        if keeper.enabled {
            checks.push(Check::Keeper);
            if keeper.local_storage.size.is_some() {
                checks.push(Check::KeeperStorage);
            }
            if !keeper.pod_annotations.is_empty() {
                checks.push(Check::KeeperAnnotations);
            }
            if keeper.resources.is_some() {
                checks.push(Check::KeeperResources);
            }
        }
        if ch.image.as_ref().is_some_and(|i| i.tag.is_some()) {
            checks.push(Check::Image);
        }
        checks
    }

    /// Run every enabled check against the namespace.
    pub async fn verify_all(&self, ns: &str) -> Result<()> {
        info!(
            fixture = %self.fixture.display(),
            "verifying deployment state"
        );
        for check in self.enabled_checks() {
            info!(?check, "running check");
            self.run_check(check, ns).await?;
        }
        Ok(())
    }

    async fn run_check(&self, check: Check, ns: &str) -> Result<()> {
        let ch = &self.values.clickhouse;
        match check {
            Check::Deployment => self.verify_deployment(ns).await,
            Check::ClusterTopology => {
                clickhouse::verify_cluster_topology(ns, ch.replicas_count, ch.shards_count).await
            }
            Check::NameOverride => {
                let name = self.values.name_override.as_deref().unwrap_or_default();
                clickhouse::verify_custom_name(ns, name).await
            }
            Check::Persistence => self.verify_persistence(ns).await,
            Check::LogPersistence => self.verify_log_persistence(ns).await,
            Check::LbService => self.verify_lb_service(ns).await,
            Check::Users => {
                users::verify_all_users(ns, ch.default_user.as_ref(), &ch.users).await?;
                if let Some(host_ip) = ch.default_user.as_ref().and_then(|d| d.host_ip.as_deref())
                {
                    users::verify_user_host_ip(ns, "default", host_ip).await?;
                }
                Ok(())
            }
            Check::PodAnnotations => {
                clickhouse::verify_pod_annotations(ns, &ch.pod_annotations).await
            }
            Check::PodLabels => clickhouse::verify_pod_labels(ns, &ch.pod_labels).await,
            Check::ServiceAnnotations => {
                clickhouse::verify_service_annotations(
                    ns,
                    &ch.service.service_annotations,
                    &ch.service.type_,
                )
                .await
            }
            Check::ServiceLabels => {
                clickhouse::verify_service_labels(ns, &ch.service.service_labels, &ch.service.type_)
                    .await
            }
            Check::ExtraConfig => {
                let config = ch.extra_config.as_deref().unwrap_or_default();
                let keys = clickhouse::extra_config_keys(config);
                clickhouse::verify_extra_config(ns, &keys).await
            }
            Check::Keeper => {
                clickhouse::verify_keeper_pods_running(
                    ns,
                    self.values.expected_keeper_pods() as usize,
                )
                .await
            }
            Check::KeeperStorage => {
                let size = self
                    .values
                    .keeper
                    .local_storage
                    .size
                    .as_deref()
                    .unwrap_or_default();
                clickhouse::verify_keeper_storage(ns, size).await
            }
            Check::KeeperAnnotations => {
                clickhouse::verify_keeper_annotations(ns, &self.values.keeper.pod_annotations)
                    .await
            }
            Check::KeeperResources => match self.values.keeper.resources.as_ref() {
                Some(resources) => clickhouse::verify_keeper_resources(ns, resources).await,
                None => Ok(()),
            },
            Check::Image => {
                let tag = ch
                    .image
                    .as_ref()
                    .and_then(|i| i.tag.as_deref())
                    .unwrap_or_default();
                clickhouse::verify_image_tag(ns, tag).await
            }
        }
    }

    /// Wait for the deployment to converge, then confirm pod counts.
    pub async fn verify_deployment(&self, ns: &str) -> Result<()> {
        let total = self.values.expected_total_pods() as usize;
        let ch_pods = self.values.expected_clickhouse_pods() as usize;
        let keeper = self.values.expected_keeper_pods() as usize;
        info!(total, clickhouse = ch_pods, keeper, "expected pods");

        wait::wait_for_pod_count(ns, total).await?;
        let pods = wait::wait_for_pods_running(ns).await?;
        info!(count = pods.len(), "all pods running and ready");
        wait::wait_for_clickhouse_pods_running(ns, Some(ch_pods)).await?;

        let actual_ch = clickhouse::clickhouse_pods(ns).await?.len();
        ensure_check!(
            actual_ch == ch_pods,
            "expected {ch_pods} ClickHouse pods, got {actual_ch}"
        );
        if keeper > 0 {
            clickhouse::verify_keeper_pods_running(ns, keeper).await?;
        }
        Ok(())
    }

    async fn verify_persistence(&self, ns: &str) -> Result<()> {
        let persistence = &self.values.clickhouse.persistence;
        let size = persistence.size.as_deref().unwrap_or_default();
        clickhouse::verify_persistence_configuration(ns, size).await?;
        clickhouse::verify_pvc_size(ns, size).await?;
        clickhouse::verify_pvc_access_mode(ns, &persistence.access_mode, "data").await
    }

    async fn verify_log_persistence(&self, ns: &str) -> Result<()> {
        let logs = &self.values.clickhouse.persistence.logs;
        let size = logs.size.as_deref().unwrap_or_default();
        clickhouse::verify_pvc_size(ns, size).await?;
        clickhouse::verify_pvc_access_mode(ns, &logs.access_mode, "logs").await
    }

    /// A LoadBalancer service must exist with the fixture's source ranges.
    async fn verify_lb_service(&self, ns: &str) -> Result<()> {
        let services = kubectl::get_services(ns).await?;
        let lb = services
            .iter()
            .find(|s| kubectl::service_type(s) == "LoadBalancer")
            .ok_or_else(|| crate::error::Error::check("LoadBalancer service not found"))?;

        let expected = &self.values.clickhouse.lb_service.load_balancer_source_ranges;
        if !expected.is_empty() {
            let actual = lb
                .spec
                .as_ref()
                .and_then(|s| s.load_balancer_source_ranges.clone())
                .unwrap_or_default();
            ensure_check!(
                &actual == expected,
                "expected source ranges {expected:?}, got {actual:?}"
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_fixture_enables_only_base_checks() {
        let state = HelmState::from_values(HelmValues::from_yaml("{}").unwrap());
        assert_eq!(
            state.enabled_checks(),
            vec![Check::Deployment, Check::ClusterTopology]
        );
    }

    #[test]
    fn full_fixture_enables_conditional_checks_in_order() {
        let values = HelmValues::from_yaml(
            r#"
nameOverride: custom
clickhouse:
  replicasCount: 2
  shardsCount: 2
  persistence:
    enabled: true
    size: 10Gi
    logs:
      enabled: true
      size: 1Gi
  lbService:
    enabled: true
  defaultUser:
    password: secret
  podAnnotations:
    a: b
  extraConfig: "<clickhouse><max_connections>100</max_connections></clickhouse>"
  image:
    tag: 25.3.6.10034.altinitystable
keeper:
  enabled: true
  replicaCount: 3
  localStorage:
    size: 5Gi
  resources:
    cpuRequestsMs: 500
"#,
        )
        .unwrap();
        let state = HelmState::from_values(values);
        assert_eq!(
            state.enabled_checks(),
            vec![
                Check::Deployment,
                Check::ClusterTopology,
                Check::NameOverride,
                Check::Persistence,
                Check::LogPersistence,
                Check::LbService,
                Check::Users,
                Check::PodAnnotations,
                Check::ExtraConfig,
                Check::Keeper,
                Check::KeeperStorage,
                Check::KeeperResources,
                Check::Image,
            ]
        );
    }

    #[test]
    fn log_persistence_requires_data_persistence() {
        // logs.enabled without persistence.enabled has no effect.
        let values = HelmValues::from_yaml(
            "clickhouse:\n  persistence:\n    logs:\n      enabled: true\n",
        )
        .unwrap();
        let state = HelmState::from_values(values);
        assert!(!state.enabled_checks().contains(&Check::LogPersistence));
    }

    #[test]
    fn image_without_tag_is_not_checked() {
        let values =
            HelmValues::from_yaml("clickhouse:\n  image:\n    repository: foo\n").unwrap();
        let state = HelmState::from_values(values);
        assert!(!state.enabled_checks().contains(&Check::Image));
    }
}
