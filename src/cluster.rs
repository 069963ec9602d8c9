//! Local Kubernetes cluster providers.
//!
//! The smoke runner needs a cluster to install into. Minikube is fully
//! managed (started before the feature, deleted after); OrbStack's
//! lifecycle is owned by the developer, so teardown is a no-op.

use async_trait::async_trait;
use tracing::info;

use crate::cmd;
use crate::error::{Error, Result};
use crate::kubectl;

pub const MINIKUBE: &str = "minikube";
pub const ORBSTACK: &str = "orbstack";

/// Environment variable selecting the provider.
pub const PROVIDER_ENV: &str = "LOCAL_K8S_PROVIDER";

/// A local cluster the harness can set up and point kubectl at.
#[async_trait]
pub trait ClusterProvider: Send + Sync + std::fmt::Debug {
    /// kubectl context name; coupled to the provider name.
    fn context_name(&self) -> &str;

    async fn running(&self) -> bool;

    /// Bring the cluster up and switch the kubectl context to it.
    async fn setup(&self) -> Result<()>;

    /// Best-effort teardown after the feature finishes.
    async fn teardown(&self);
}

/// Resolve the provider from `LOCAL_K8S_PROVIDER` (default: minikube).
pub fn from_env() -> Result<Box<dyn ClusterProvider>> {
    let provider = std::env::var(PROVIDER_ENV)
        .unwrap_or_else(|_| MINIKUBE.to_string())
        .to_lowercase();
    match provider.as_str() {
        MINIKUBE => Ok(Box::new(Minikube::default())),
        ORBSTACK => Ok(Box::new(Orbstack)),
        other => Err(Error::fixture(format!(
            "unknown {PROVIDER_ENV}: {other}. Supported values: '{MINIKUBE}', '{ORBSTACK}'"
        ))),
    }
}

/// Docker-driver minikube cluster.
#[derive(Debug)]
pub struct Minikube {
    pub cpus: u32,
    pub memory: String,
}

impl Default for Minikube {
    fn default() -> Self {
        Self {
            cpus: 4,
            memory: "6g".into(),
        }
    }
}

#[async_trait]
impl ClusterProvider for Minikube {
    fn context_name(&self) -> &str {
        MINIKUBE
    }

    async fn running(&self) -> bool {
        cmd::run_unchecked("minikube", &["status"])
            .await
            .map(|out| out.success() && out.stdout.contains("Running"))
            .unwrap_or(false)
    }

    async fn setup(&self) -> Result<()> {
        // A leftover cluster may carry stale state; start fresh.
        if self.running().await {
            info!("stopping leftover minikube cluster");
            cmd::run("minikube", &["stop"]).await?;
        }
        let cpus = format!("--cpus={}", self.cpus);
        let memory = format!("--memory={}", self.memory);
        cmd::run(
            "minikube",
            &["start", "--driver=docker", &cpus, &memory],
        )
        .await?;
        kubectl::use_context(MINIKUBE).await?;
        info!("minikube cluster ready");
        Ok(())
    }

    async fn teardown(&self) {
        if let Err(e) = cmd::run("minikube", &["delete"]).await {
            tracing::warn!(error = %e, "minikube delete failed");
        }
    }
}

/// OrbStack's built-in Kubernetes.
#[derive(Debug)]
pub struct Orbstack;

#[async_trait]
impl ClusterProvider for Orbstack {
    fn context_name(&self) -> &str {
        ORBSTACK
    }

    async fn running(&self) -> bool {
        cmd::run_unchecked("orbctl", &["status"])
            .await
            .map(|out| out.success() && out.stdout.contains("Running"))
            .unwrap_or(false)
    }

    async fn setup(&self) -> Result<()> {
        if !self.running().await {
            cmd::run("orbctl", &["start"]).await?;
        }
        kubectl::use_context(ORBSTACK).await?;
        Ok(())
    }

    async fn teardown(&self) {
        info!("OrbStack lifecycle is managed outside of this harness");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Env-var reads are process-global; keep these in one test to avoid
    // interleaving with parallel tests.
    #[test]
    fn provider_resolution_from_env() {
        std::env::remove_var(PROVIDER_ENV);
        assert_eq!(from_env().unwrap().context_name(), MINIKUBE);

        std::env::set_var(PROVIDER_ENV, "OrbStack");
        assert_eq!(from_env().unwrap().context_name(), ORBSTACK);

        std::env::set_var(PROVIDER_ENV, "kind");
        let err = from_env().unwrap_err();
        assert!(err.to_string().contains("kind"));
        assert!(err.to_string().contains(MINIKUBE));

        std::env::remove_var(PROVIDER_ENV);
    }
}
