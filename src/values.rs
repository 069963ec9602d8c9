//! Typed model of the chart's `values.yaml`.
//!
//! A fixture is read once per scenario and used to compute expectations:
//! pod counts, topology, and which verification checks apply. The same
//! model serializes back to a temporary values file for `helm --values`.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use crate::error::Result;

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HelmValues {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name_override: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fullname_override: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace_domain_pattern: Option<String>,
    pub clickhouse: ClickhouseValues,
    pub keeper: KeeperValues,
    pub operator: OperatorValues,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClickhouseValues {
    pub replicas_count: u32,
    pub shards_count: u32,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub zones: Vec<String>,
    pub anti_affinity: bool,
    /// External keeper endpoint (used instead of the bundled keeper).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keeper: Option<ExternalKeeper>,
    pub persistence: Persistence,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<Image>,
    pub service: ServiceValues,
    pub lb_service: LbService,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_user: Option<DefaultUser>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub users: Vec<UserValues>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub pod_annotations: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub pod_labels: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extra_config: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub init_scripts: Vec<String>,
}

impl Default for ClickhouseValues {
    fn default() -> Self {
        Self {
            replicas_count: 1,
            shards_count: 1,
            zones: Vec::new(),
            anti_affinity: false,
            keeper: None,
            persistence: Persistence::default(),
            image: None,
            service: ServiceValues::default(),
            lb_service: LbService::default(),
            default_user: None,
            users: Vec::new(),
            pod_annotations: BTreeMap::new(),
            pod_labels: BTreeMap::new(),
            extra_config: None,
            init_scripts: Vec::new(),
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExternalKeeper {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Persistence {
    pub enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<String>,
    pub access_mode: String,
    pub logs: LogPersistence,
}

impl Default for Persistence {
    fn default() -> Self {
        Self {
            enabled: false,
            size: None,
            access_mode: "ReadWriteOnce".into(),
            logs: LogPersistence::default(),
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LogPersistence {
    pub enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<String>,
    pub access_mode: String,
}

impl Default for LogPersistence {
    fn default() -> Self {
        Self {
            enabled: false,
            size: None,
            access_mode: "ReadWriteOnce".into(),
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Image {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repository: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pull_policy: Option<String>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServiceValues {
    #[serde(rename = "type")]
    pub type_: String,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub service_annotations: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub service_labels: BTreeMap<String, String>,
}

impl Default for ServiceValues {
    fn default() -> Self {
        Self {
            type_: "ClusterIP".into(),
            service_annotations: BTreeMap::new(),
            service_labels: BTreeMap::new(),
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LbService {
    pub enabled: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub load_balancer_source_ranges: Vec<String>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DefaultUser {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    pub allow_external_access: bool,
    #[serde(rename = "hostIP", skip_serializing_if = "Option::is_none")]
    pub host_ip: Option<String>,
}

/// Additional user entry. Field names follow the chart's values schema,
/// which mixes camelCase with ClickHouse's own snake_case keys.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct UserValues {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password_sha256_hex: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password_secret_name: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub grants: Vec<String>,
    #[serde(rename = "accessManagement", skip_serializing_if = "Option::is_none")]
    pub access_management: Option<u8>,
    #[serde(rename = "hostIP", skip_serializing_if = "Option::is_none")]
    pub host_ip: Option<String>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct KeeperValues {
    pub enabled: bool,
    pub replica_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<Image>,
    pub local_storage: KeeperStorage,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub pod_annotations: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resources: Option<KeeperResources>,
}

impl Default for KeeperValues {
    fn default() -> Self {
        Self {
            enabled: false,
            replica_count: 3,
            image: None,
            local_storage: KeeperStorage::default(),
            pod_annotations: BTreeMap::new(),
            resources: None,
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct KeeperStorage {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<String>,
}

/// Keeper resource knobs in the chart's units (milli-CPU, MiB strings).
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct KeeperResources {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpu_requests_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_requests_mi_b: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpu_limits_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_limits_mi_b: Option<String>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OperatorValues {
    pub enabled: bool,
}

impl Default for OperatorValues {
    fn default() -> Self {
        Self { enabled: true }
    }
}

impl HelmValues {
    /// Read a fixture file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_yaml::from_str(&raw)?)
    }

    pub fn from_yaml(raw: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(raw)?)
    }

    /// ClickHouse pods = replicas × shards.
    pub fn expected_clickhouse_pods(&self) -> u32 {
        self.clickhouse.replicas_count * self.clickhouse.shards_count
    }

    /// Keeper pods, zero when the bundled keeper is disabled.
    pub fn expected_keeper_pods(&self) -> u32 {
        if self.keeper.enabled {
            self.keeper.replica_count
        } else {
            0
        }
    }

    /// Total pods in the release namespace, including the operator pod.
    pub fn expected_total_pods(&self) -> u32 {
        let operator = if self.operator.enabled { 1 } else { 0 };
        self.expected_clickhouse_pods() + self.expected_keeper_pods() + operator
    }

    /// Write the values out as a temporary file for `helm --values`.
    /// The file is removed when the returned handle drops.
    pub fn to_temp_file(&self) -> Result<NamedTempFile> {
        let mut file = NamedTempFile::new()?;
        let yaml = serde_yaml::to_string(self)?;
        file.write_all(yaml.as_bytes())?;
        file.flush()?;
        Ok(file)
    }
}

impl KeeperResources {
    /// Convert the chart's units into Kubernetes resource maps,
    /// e.g. `cpuRequestsMs: 500` becomes `requests.cpu = "500m"`.
    pub fn to_k8s(&self) -> BTreeMap<String, BTreeMap<String, String>> {
        let mut out = BTreeMap::new();

        let mut requests = BTreeMap::new();
        if let Some(cpu) = self.cpu_requests_ms {
            requests.insert("cpu".to_string(), format!("{cpu}m"));
        }
        if let Some(ref mem) = self.memory_requests_mi_b {
            requests.insert("memory".to_string(), mem.clone());
        }
        if !requests.is_empty() {
            out.insert("requests".to_string(), requests);
        }

        let mut limits = BTreeMap::new();
        if let Some(cpu) = self.cpu_limits_ms {
            limits.insert("cpu".to_string(), format!("{cpu}m"));
        }
        if let Some(ref mem) = self.memory_limits_mi_b {
            limits.insert("memory".to_string(), mem.clone());
        }
        if !limits.is_empty() {
            out.insert("limits".to_string(), limits);
        }

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_fixture_uses_defaults() {
        let v = HelmValues::from_yaml("{}").unwrap();
        assert_eq!(v.clickhouse.replicas_count, 1);
        assert_eq!(v.clickhouse.shards_count, 1);
        assert!(!v.keeper.enabled);
        assert_eq!(v.keeper.replica_count, 3);
        assert!(v.operator.enabled);
        assert_eq!(v.clickhouse.persistence.access_mode, "ReadWriteOnce");
        assert_eq!(v.clickhouse.service.type_, "ClusterIP");
    }

    #[test]
    fn topology_is_replicas_times_shards_plus_keeper() {
        let v = HelmValues::from_yaml(
            r#"
clickhouse:
  replicasCount: 2
  shardsCount: 3
keeper:
  enabled: true
  replicaCount: 3
"#,
        )
        .unwrap();
        assert_eq!(v.expected_clickhouse_pods(), 6);
        assert_eq!(v.expected_keeper_pods(), 3);
        // 6 clickhouse + 3 keeper + 1 operator
        assert_eq!(v.expected_total_pods(), 10);
    }

    #[test]
    fn disabled_keeper_contributes_no_pods() {
        let v = HelmValues::from_yaml("keeper:\n  replicaCount: 5\n").unwrap();
        assert_eq!(v.expected_keeper_pods(), 0);
        assert_eq!(v.expected_total_pods(), 2);
    }

    #[test]
    fn disabled_operator_is_excluded_from_total() {
        let v = HelmValues::from_yaml("operator:\n  enabled: false\n").unwrap();
        assert_eq!(v.expected_total_pods(), 1);
    }

    #[test]
    fn parses_user_and_persistence_sections() {
        let v = HelmValues::from_yaml(
            r#"
nameOverride: custom-clickhouse
clickhouse:
  defaultUser:
    password: SuperSecret
    allowExternalAccess: true
    hostIP: "0.0.0.0/0"
  users:
    - name: analytics
      password_sha256_hex: a085c76ed0e7818e8a5c106cc01ea81d8b6a46500ee98c3be432297f47d7b99f
      grants:
        - "GRANT SELECT ON default.*"
      accessManagement: 1
  persistence:
    enabled: true
    size: 10Gi
    logs:
      enabled: true
      size: 2Gi
"#,
        )
        .unwrap();

        assert_eq!(v.name_override.as_deref(), Some("custom-clickhouse"));
        let du = v.clickhouse.default_user.as_ref().unwrap();
        assert_eq!(du.password.as_deref(), Some("SuperSecret"));
        assert!(du.allow_external_access);
        assert_eq!(du.host_ip.as_deref(), Some("0.0.0.0/0"));

        assert_eq!(v.clickhouse.users.len(), 1);
        let user = &v.clickhouse.users[0];
        assert_eq!(user.name, "analytics");
        assert_eq!(user.grants, vec!["GRANT SELECT ON default.*"]);
        assert_eq!(user.access_management, Some(1));

        assert!(v.clickhouse.persistence.enabled);
        assert_eq!(v.clickhouse.persistence.size.as_deref(), Some("10Gi"));
        assert!(v.clickhouse.persistence.logs.enabled);
        assert_eq!(v.clickhouse.persistence.logs.size.as_deref(), Some("2Gi"));
    }

    #[test]
    fn keeper_resources_convert_to_k8s_units() {
        let r = KeeperResources {
            cpu_requests_ms: Some(500),
            memory_requests_mi_b: Some("512Mi".into()),
            cpu_limits_ms: Some(1000),
            memory_limits_mi_b: None,
        };
        let k8s = r.to_k8s();
        assert_eq!(k8s["requests"]["cpu"], "500m");
        assert_eq!(k8s["requests"]["memory"], "512Mi");
        assert_eq!(k8s["limits"]["cpu"], "1000m");
        assert!(!k8s["limits"].contains_key("memory"));
    }

    #[test]
    fn roundtrips_through_values_file() -> anyhow::Result<()> {
        let mut v = HelmValues::default();
        v.clickhouse.replicas_count = 2;
        v.keeper.enabled = true;

        let file = v.to_temp_file()?;
        let parsed = HelmValues::from_file(file.path())?;
        assert_eq!(parsed.clickhouse.replicas_count, 2);
        assert!(parsed.keeper.enabled);
        Ok(())
    }
}
