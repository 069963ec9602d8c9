//! Executable test scenarios, sequenced by the `smoke` and `validation`
//! binaries.

pub mod smoke;
pub mod validation;

use crate::helm;

/// Shared settings for a scenario run. Everything here comes from the
/// runner's CLI/environment, not from fixtures.
#[derive(Clone, Debug)]
pub struct Env {
    /// Chart reference: a local chart directory or `altinity/clickhouse`.
    pub chart: String,
    /// Chart repository URL, registered when the chart is not local.
    pub repo_url: String,
    /// Expected ClickHouse server version for the version scenario.
    pub version: String,
    /// Keep releases and namespaces after scenarios, for debugging.
    pub keep_releases: bool,
}

impl Env {
    /// Whether `chart` points at a local directory rather than a repo ref.
    pub fn is_local_chart(&self) -> bool {
        std::path::Path::new(&self.chart).is_dir()
    }

    /// Register the chart repo when installing from a remote reference.
    pub async fn prepare(&self) -> crate::error::Result<()> {
        if !self.is_local_chart() {
            helm::repo_add("altinity", &self.repo_url).await?;
        }
        Ok(())
    }
}

impl Default for Env {
    fn default() -> Self {
        Self {
            chart: "altinity/clickhouse".into(),
            repo_url: helm::ALTINITY_REPO.into(),
            version: "25.3.6.10034.altinitystable".into(),
            keep_releases: false,
        }
    }
}
