//! Helm release lifecycle: install, upgrade, uninstall, template.

use std::path::PathBuf;

use tracing::{info, warn};

use crate::cmd::{self, CmdOutput};
use crate::error::Result;
use crate::values::HelmValues;

/// Default chart repository for remote installs.
pub const ALTINITY_REPO: &str = "https://altinity.github.io/helm-charts/";

/// Where the chart's values come from for an install/upgrade.
pub enum ValuesSource {
    /// `--values <path>` pointing at a fixture file.
    File(PathBuf),
    /// Inline values serialized to a temporary file.
    Inline(HelmValues),
    /// Chart defaults only.
    None,
}

impl ValuesSource {
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self::File(path.into())
    }
}

/// Register and refresh the Altinity chart repo (for non-local installs).
pub async fn repo_add(name: &str, url: &str) -> Result<()> {
    let out = cmd::run_unchecked("helm", &["repo", "add", name, url]).await?;
    if !out.success() && !out.stderr.contains("already exists") {
        warn!(repo = name, stderr = %out.stderr.trim(), "helm repo add failed");
    }
    cmd::run("helm", &["repo", "update"]).await?;
    Ok(())
}

/// `helm install` with `--create-namespace`. Returns a guard that
/// uninstalls the release and deletes the namespace when dropped.
pub async fn install(
    release: &str,
    ns: &str,
    chart: &str,
    values: &ValuesSource,
) -> Result<Release> {
    let base = vec![
        "install".to_string(),
        release.to_string(),
        chart.to_string(),
        "--namespace".to_string(),
        ns.to_string(),
        "--create-namespace".to_string(),
    ];
    run_with_values("install", base, values).await?;
    info!(release, namespace = ns, chart, "helm release installed");
    Ok(Release {
        name: release.to_string(),
        namespace: ns.to_string(),
        cleanup: true,
    })
}

/// Like [`install`] but the exit status is returned instead of checked,
/// for scenarios that expect installation to fail.
pub async fn try_install(
    release: &str,
    ns: &str,
    chart: &str,
    values: &ValuesSource,
) -> Result<CmdOutput> {
    let base = vec![
        "install".to_string(),
        release.to_string(),
        chart.to_string(),
        "--namespace".to_string(),
        ns.to_string(),
        "--create-namespace".to_string(),
    ];
    run_with_values_unchecked(base, values).await
}

/// `helm upgrade` an existing release.
pub async fn upgrade(release: &str, ns: &str, chart: &str, values: &ValuesSource) -> Result<()> {
    let base = vec![
        "upgrade".to_string(),
        release.to_string(),
        chart.to_string(),
        "--namespace".to_string(),
        ns.to_string(),
    ];
    run_with_values("upgrade", base, values).await?;
    info!(release, namespace = ns, "helm release upgraded");
    Ok(())
}

/// Best-effort `helm uninstall`.
pub async fn uninstall(release: &str, ns: &str) {
    match cmd::run_unchecked("helm", &["uninstall", release, "-n", ns]).await {
        Ok(out) if !out.success() => {
            warn!(release, stderr = %out.stderr.trim(), "helm uninstall failed");
        }
        Err(e) => warn!(release, error = %e, "helm uninstall failed"),
        _ => {}
    }
}

/// `helm template` with `--set` overrides. The exit status is returned,
/// not checked: validation scenarios assert on failure output.
pub async fn template(chart: &str, set_values: &[&str]) -> Result<CmdOutput> {
    let mut args = vec!["template", "test", chart];
    for v in set_values {
        args.push("--set");
        args.push(v);
    }
    cmd::run_unchecked("helm", &args).await
}

async fn run_with_values(op: &str, base: Vec<String>, values: &ValuesSource) -> Result<()> {
    let out = run_with_values_unchecked(base.clone(), values).await?;
    if !out.success() {
        return Err(crate::error::Error::Command {
            cmd: format!("helm {op}"),
            status: out.status,
            stderr: out.stderr,
        });
    }
    Ok(())
}

async fn run_with_values_unchecked(
    mut args: Vec<String>,
    values: &ValuesSource,
) -> Result<CmdOutput> {
    // The temp file must outlive the helm invocation.
    let _tmp;
    match values {
        ValuesSource::File(path) => {
            args.push("--values".to_string());
            args.push(path.display().to_string());
        }
        ValuesSource::Inline(v) => {
            let file = v.to_temp_file()?;
            args.push("--values".to_string());
            args.push(file.path().display().to_string());
            _tmp = file;
        }
        ValuesSource::None => {}
    }
    let argv: Vec<&str> = args.iter().map(String::as_str).collect();
    cmd::run_unchecked("helm", &argv).await
}

/// A live helm release. Dropping the guard uninstalls the release and
/// deletes its namespace, replacing the try/finally cleanup a scripted
/// harness would use. Cleanup is synchronous and best-effort.
pub struct Release {
    pub name: String,
    pub namespace: String,
    cleanup: bool,
}

impl Release {
    /// Keep the release after the scenario, e.g. for debugging.
    pub fn keep(&mut self) {
        self.cleanup = false;
    }
}

impl Drop for Release {
    fn drop(&mut self) {
        if !self.cleanup {
            return;
        }
        // Drop can't await; shell out synchronously.
        let _ = std::process::Command::new("helm")
            .args(["uninstall", &self.name, "-n", &self.namespace])
            .status();
        let _ = std::process::Command::new("kubectl")
            .args(["delete", "namespace", &self.namespace, "--wait=false"])
            .status();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn template_builds_set_arguments() -> anyhow::Result<()> {
        // Points at a nonexistent chart: we only care that helm was
        // invoked and reported failure through the unchecked path.
        if !cmd::run_unchecked("helm", &["version", "--short"])
            .await
            .map(|o| o.success())
            .unwrap_or(false)
        {
            eprintln!("SKIPPED: helm not found on PATH");
            return Ok(());
        }
        let out = template("/nonexistent/chart", &["keeper.enabled=true"]).await?;
        assert!(!out.success());
        Ok(())
    }

    #[test]
    fn release_keep_disables_cleanup() {
        let mut release = Release {
            name: "doomed".into(),
            namespace: "nowhere".into(),
            cleanup: true,
        };
        release.keep();
        assert!(!release.cleanup);
        // Dropping must not shell out now.
    }
}
