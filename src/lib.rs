//! End-to-end test harness for the ClickHouse Helm chart.
//!
//! The harness drives `helm`, `kubectl`, and `clickhouse-client` (via
//! `kubectl exec`), polls cluster state until it converges, and verifies
//! that rendered Kubernetes resources and live database behavior match
//! declared values fixtures.
//!
//! Entry points are the `smoke` and `validation` binaries; the library
//! modules hold the reusable steps they sequence.

pub mod clickhouse;
pub mod cluster;
pub mod cmd;
pub mod error;
pub mod helm;
pub mod kubectl;
pub mod scenarios;
pub mod state;
pub mod tls;
pub mod users;
pub mod values;
pub mod wait;

pub use error::{Error, Result};
