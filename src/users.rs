//! User configuration checks: connectivity, grants, password hashes,
//! access management, and network restrictions.
//!
//! Grants and auth types come from live queries against `system.users`;
//! access management and hostIP restrictions are declared in the CHI's
//! `configuration.users` map and are checked there.

use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::clickhouse;
use crate::ensure_check;
use crate::error::{Error, Result};
use crate::kubectl;
use crate::values::{DefaultUser, UserValues};

/// SHA-256 hash of a string, returned as hex. Used to check fixture
/// `password_sha256_hex` values against their plaintext counterparts.
pub fn sha256_hex(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}

/// Collapse whitespace for grant-string comparison.
fn normalize_grant(grant: &str) -> String {
    grant.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// A fixture grant matches when its normalized form appears inside any
/// actual grant, case-insensitively.
pub fn grant_matches(expected: &str, actual: &str) -> bool {
    normalize_grant(actual)
        .to_lowercase()
        .contains(&normalize_grant(expected).to_lowercase())
}

/// `SHOW GRANTS FOR <user>` as the admin, parsed from FORMAT JSON output.
pub async fn get_user_grants(
    ns: &str,
    pod: &str,
    user: &str,
    admin_password: &str,
) -> Result<Vec<String>> {
    let sql = format!("SHOW GRANTS FOR {user} FORMAT JSON");
    let out = clickhouse::query(ns, pod, &sql, "default", admin_password).await?;
    if !out.success() || out.stdout.is_empty() {
        warn!(user, stderr = %out.stderr.trim(), "failed to get grants");
        return Ok(Vec::new());
    }

    let data: Value = serde_json::from_str(&out.stdout)?;
    // ClickHouse names the result column after the full query text.
    let Some(col) = data
        .pointer("/meta/0/name")
        .and_then(Value::as_str)
        .map(str::to_string)
    else {
        return Ok(Vec::new());
    };
    Ok(data
        .get("data")
        .and_then(Value::as_array)
        .map(|rows| {
            rows.iter()
                .filter_map(|row| row.get(&col).and_then(Value::as_str))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default())
}

/// The user must appear in `system.users`.
pub async fn verify_user_exists(ns: &str, user: &str, admin_password: &str) -> Result<()> {
    let pod = clickhouse::any_clickhouse_pod(ns).await?;
    let pod = kubectl::name(&pod.metadata);
    let sql = format!("SELECT name FROM system.users WHERE name = '{user}'");
    let out = clickhouse::query(ns, pod, &sql, "default", admin_password).await?;
    ensure_check!(
        out.success(),
        "failed to query system.users: {}",
        out.stderr.trim()
    );
    ensure_check!(
        out.stdout.contains(user),
        "user '{user}' not found in system.users"
    );
    Ok(())
}

/// The user must be able to log in and run `SELECT 1`.
pub async fn verify_user_connectivity(ns: &str, user: &str, password: &str) -> Result<()> {
    let pod = clickhouse::any_clickhouse_pod(ns).await?;
    let pod = kubectl::name(&pod.metadata);
    ensure_check!(
        clickhouse::can_connect(ns, pod, user, password).await?,
        "failed to connect to ClickHouse with user '{user}'"
    );
    info!(user, "user connection verified");
    Ok(())
}

/// The user must be configured with sha256 authentication, and the
/// fixture's plaintext password must hash to the fixture's hex digest.
/// ClickHouse does not expose the stored hash, so the connectivity check
/// that precedes this is what proves the server accepted it.
pub async fn verify_user_password_hash(
    ns: &str,
    user: &str,
    expected_hash: &str,
    plaintext: &str,
    admin_password: &str,
) -> Result<()> {
    let pod = clickhouse::any_clickhouse_pod(ns).await?;
    let pod = kubectl::name(&pod.metadata);
    let sql = format!("SELECT name, auth_type FROM system.users WHERE name = '{user}' FORMAT JSON");
    let out = clickhouse::query(ns, pod, &sql, "default", admin_password).await?;
    ensure_check!(
        out.success(),
        "failed to query auth type for user '{user}': {}",
        out.stderr.trim()
    );

    let data: Value = serde_json::from_str(&out.stdout)?;
    let row = data
        .pointer("/data/0")
        .ok_or_else(|| Error::check(format!("user '{user}' not found in system.users")))?;
    let auth_types = row["auth_type"].to_string();
    ensure_check!(
        auth_types.contains("sha256_password"),
        "user '{user}' is not configured with SHA256 authentication, auth types: {auth_types}"
    );

    let computed = sha256_hex(plaintext);
    ensure_check!(
        computed.eq_ignore_ascii_case(expected_hash),
        "computed hash from password doesn't match fixture hash for user '{user}': \
         expected {expected_hash}, computed {computed}"
    );
    Ok(())
}

/// Every fixture grant must be present in the user's live grants.
pub async fn verify_user_grants(
    ns: &str,
    user: &str,
    expected: &[String],
    admin_password: &str,
) -> Result<()> {
    let pod = clickhouse::any_clickhouse_pod(ns).await?;
    let pod = kubectl::name(&pod.metadata);
    let actual = get_user_grants(ns, pod, user, admin_password).await?;
    ensure_check!(
        !actual.is_empty(),
        "failed to retrieve grants for user '{user}'"
    );

    for grant in expected {
        ensure_check!(
            actual.iter().any(|a| grant_matches(grant, a)),
            "grant '{grant}' not found for user '{user}', actual grants: {actual:?}"
        );
    }
    Ok(())
}

/// `<user>/access_management` in the CHI users map must match.
pub async fn verify_user_access_management(ns: &str, user: &str, expected: u8) -> Result<()> {
    let chi = clickhouse::get_chi(ns)
        .await?
        .ok_or_else(|| Error::check("ClickHouseInstallation not found"))?;
    let key = format!("{user}/access_management");
    let actual = chi
        .pointer("/spec/configuration/users")
        .and_then(|users| users.get(&key))
        .and_then(Value::as_u64)
        .ok_or_else(|| {
            Error::check(format!("access_management not configured for user '{user}' in CHI"))
        })?;
    ensure_check!(
        actual == expected as u64,
        "expected access_management={expected} for user '{user}', got {actual}"
    );
    Ok(())
}

/// `<user>/networks/ip` in the CHI users map must match the fixture.
pub async fn verify_user_host_ip(ns: &str, user: &str, expected: &str) -> Result<()> {
    let chi = clickhouse::get_chi(ns)
        .await?
        .ok_or_else(|| Error::check("ClickHouseInstallation not found"))?;
    let key = format!("{user}/networks/ip");
    let actual = chi
        .pointer("/spec/configuration/users")
        .and_then(|users| users.get(&key))
        .ok_or_else(|| Error::check(format!("hostIP not configured for user '{user}' in CHI")))?;

    // The chart may emit a scalar or a single-element list.
    let matches = match actual {
        Value::String(s) => s == expected,
        Value::Array(items) => {
            items.len() == 1 && items[0].as_str() == Some(expected)
        }
        _ => false,
    };
    ensure_check!(
        matches,
        "expected hostIP={expected} for user '{user}', got {actual}"
    );
    Ok(())
}

/// A read-only user must be able to SELECT but not INSERT.
pub async fn verify_readonly_user(ns: &str, user: &str, password: &str) -> Result<()> {
    let pod = clickhouse::any_clickhouse_pod(ns).await?;
    let pod = kubectl::name(&pod.metadata);

    let can_select = clickhouse::query(
        ns,
        pod,
        "SELECT 1 FROM system.tables LIMIT 1",
        user,
        password,
    )
    .await?
    .success();
    ensure_check!(can_select, "user '{user}' cannot perform SELECT queries");

    let can_insert = clickhouse::query(
        ns,
        pod,
        "INSERT INTO system.query_log VALUES ()",
        user,
        password,
    )
    .await?
    .success();
    ensure_check!(
        !can_insert,
        "user '{user}' has INSERT permissions, expected read-only"
    );
    Ok(())
}

/// Run every applicable check for the fixture's user configuration.
pub async fn verify_all_users(
    ns: &str,
    default_user: Option<&DefaultUser>,
    users: &[UserValues],
) -> Result<()> {
    if clickhouse::clickhouse_pods(ns).await?.is_empty() {
        warn!(ns, "no ClickHouse pods found, skipping user verification");
        return Ok(());
    }

    let admin_password = default_user
        .and_then(|du| du.password.as_deref())
        .unwrap_or_default();

    if let Some(du) = default_user {
        if let Some(ref password) = du.password {
            verify_user_connectivity(ns, "default", password).await?;
        }
    }

    for user in users {
        info!(user = %user.name, "verifying user");
        verify_user_exists(ns, &user.name, admin_password).await?;

        if let Some(ref password) = user.password {
            verify_user_connectivity(ns, &user.name, password).await?;
            if let Some(ref hash) = user.password_sha256_hex {
                verify_user_password_hash(ns, &user.name, hash, password, admin_password).await?;
            }
        } else if user.password_sha256_hex.is_some() {
            info!(
                user = %user.name,
                "user has hashed password but no plaintext, skipping connectivity"
            );
        }

        if let Some(am) = user.access_management {
            verify_user_access_management(ns, &user.name, am).await?;
        }
        if let Some(ref host_ip) = user.host_ip {
            verify_user_host_ip(ns, &user.name, host_ip).await?;
        }
        if !user.grants.is_empty() {
            verify_user_grants(ns, &user.name, &user.grants, admin_password).await?;
        }
        if user.name.to_lowercase().contains("readonly") {
            if let Some(ref password) = user.password {
                verify_readonly_user(ns, &user.name, password).await?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256_hex_matches_known_digest() {
        // sha256("AnalyticsPassword123"), the hash used by the user fixtures.
        assert_eq!(
            sha256_hex("AnalyticsPassword123"),
            "a085c76ed0e7818e8a5c106cc01ea81d8b6a46500ee98c3be432297f47d7b99f"
        );
        assert_eq!(
            sha256_hex(""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn grant_matching_ignores_case_and_whitespace() {
        assert!(grant_matches(
            "GRANT SELECT ON default.*",
            "grant  select on default.* to analytics"
        ));
        assert!(!grant_matches(
            "GRANT INSERT ON default.*",
            "GRANT SELECT ON default.* TO analytics"
        ));
    }

    #[test]
    fn normalize_grant_collapses_whitespace() {
        assert_eq!(
            normalize_grant("GRANT   SELECT\n ON default.*"),
            "GRANT SELECT ON default.*"
        );
    }
}
