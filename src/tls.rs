//! TLS configuration checks: certificate secrets and the TLS-related
//! entries the chart renders into the CHI's `configuration.files`.

use std::path::Path;

use serde_json::Value;
use tracing::info;

use crate::clickhouse;
use crate::ensure_check;
use crate::error::{Error, Result};
use crate::kubectl;

/// Name of the secret the TLS fixtures install into the namespace.
pub const TLS_SECRET: &str = "clickhouse-certs";

/// Create the TLS secret from local certificate files. The namespace may
/// not exist yet and the secret may be left over from a previous run.
pub async fn create_tls_secret(
    ns: &str,
    cert: &Path,
    key: &Path,
    dhparam: &Path,
) -> Result<()> {
    let cert = cert.display().to_string();
    let key = key.display().to_string();
    let dhparam = dhparam.display().to_string();
    kubectl::create_secret_from_files(
        ns,
        TLS_SECRET,
        &[
            ("server.crt", cert.as_str()),
            ("server.key", key.as_str()),
            ("dhparam.pem", dhparam.as_str()),
        ],
    )
    .await?;
    info!(namespace = ns, secret = TLS_SECRET, "created TLS secret");
    Ok(())
}

async fn chi_files(ns: &str) -> Result<Value> {
    let chi = clickhouse::get_chi(ns)
        .await?
        .ok_or_else(|| Error::check("ClickHouseInstallation not found"))?;
    chi.pointer("/spec/configuration/files")
        .cloned()
        .ok_or_else(|| Error::check("no configuration files found in CHI"))
}

/// Every expected TLS file key must be present in the CHI.
pub async fn verify_tls_files_in_chi(ns: &str, expected_files: &[&str]) -> Result<()> {
    let files = chi_files(ns).await?;
    for file in expected_files {
        ensure_check!(
            files.get(*file).is_some(),
            "expected TLS file '{file}' not found in CHI"
        );
    }
    Ok(())
}

/// File entries that reference secrets must point at the expected secret
/// through `valueFrom.secretKeyRef`.
pub async fn verify_tls_secret_references(
    ns: &str,
    expected: &[(&str, &str)],
) -> Result<()> {
    let files = chi_files(ns).await?;
    for (file, secret) in expected {
        let entry = files
            .get(*file)
            .ok_or_else(|| Error::check(format!("file '{file}' not found in CHI")))?;
        let actual = entry
            .pointer("/valueFrom/secretKeyRef/name")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::check(format!("no secretKeyRef in CHI file '{file}'")))?;
        ensure_check!(
            actual == *secret,
            "expected secret '{secret}' for '{file}', got '{actual}'"
        );
    }
    Ok(())
}

/// The rendered openssl.xml must carry the server TLS configuration.
pub async fn verify_openssl_config(ns: &str) -> Result<()> {
    let files = chi_files(ns).await?;
    let content = files
        .get("openssl.xml")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::check("openssl.xml not found in CHI"))?;
    ensure_check!(
        content.contains("<openSSL>"),
        "openssl.xml missing <openSSL> tag"
    );
    ensure_check!(
        content.contains("<server>"),
        "openssl.xml missing <server> tag"
    );
    Ok(())
}
