//! The shipped values fixtures must parse and drive the expected
//! verification plan.

use std::path::PathBuf;

use clickhouse_helm_e2e::state::{Check, HelmState};

fn fixture(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("fixtures/values")
        .join(name)
}

#[test]
fn smoke_fixture_is_a_single_server_with_operator() -> anyhow::Result<()> {
    let state = HelmState::from_file(fixture("smoke.yaml"))?;
    assert_eq!(state.values.expected_clickhouse_pods(), 1);
    assert_eq!(state.values.expected_keeper_pods(), 0);
    assert_eq!(state.values.expected_total_pods(), 2);
    assert!(state.enabled_checks().contains(&Check::Users));
    assert!(!state.enabled_checks().contains(&Check::Persistence));
    Ok(())
}

#[test]
fn topology_fixture_counts_keeper_pods() -> anyhow::Result<()> {
    let state = HelmState::from_file(fixture("topology.yaml"))?;
    assert_eq!(state.values.expected_clickhouse_pods(), 4);
    assert_eq!(state.values.expected_keeper_pods(), 3);
    assert_eq!(state.values.expected_total_pods(), 8);

    let checks = state.enabled_checks();
    assert!(checks.contains(&Check::Keeper));
    assert!(checks.contains(&Check::KeeperStorage));
    assert!(!checks.contains(&Check::KeeperResources));
    Ok(())
}

#[test]
fn full_fixture_enables_every_conditional_check() -> anyhow::Result<()> {
    let state = HelmState::from_file(fixture("full.yaml"))?;
    let checks = state.enabled_checks();

    for check in [
        Check::Deployment,
        Check::ClusterTopology,
        Check::NameOverride,
        Check::Persistence,
        Check::LogPersistence,
        Check::Users,
        Check::PodAnnotations,
        Check::PodLabels,
        Check::ServiceAnnotations,
        Check::ExtraConfig,
        Check::Keeper,
        Check::KeeperStorage,
        Check::KeeperAnnotations,
        Check::KeeperResources,
        Check::Image,
    ] {
        assert!(checks.contains(&check), "missing {check:?}");
    }
    // No LoadBalancer in this fixture.
    assert!(!checks.contains(&Check::LbService));
    Ok(())
}

#[test]
fn full_fixture_keeper_resources_convert() -> anyhow::Result<()> {
    let state = HelmState::from_file(fixture("full.yaml"))?;
    let resources = state.values.keeper.resources.as_ref().unwrap().to_k8s();
    assert_eq!(resources["requests"]["cpu"], "500m");
    assert_eq!(resources["requests"]["memory"], "512Mi");
    assert_eq!(resources["limits"]["cpu"], "1000m");
    assert_eq!(resources["limits"]["memory"], "1Gi");
    Ok(())
}

#[test]
fn full_fixture_user_hash_matches_plaintext() -> anyhow::Result<()> {
    let state = HelmState::from_file(fixture("full.yaml"))?;
    let user = &state.values.clickhouse.users[0];
    assert_eq!(
        user.password_sha256_hex.as_deref().unwrap(),
        clickhouse_helm_e2e::users::sha256_hex("AnalyticsPassword123")
    );
    Ok(())
}
