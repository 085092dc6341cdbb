//! Poll-driven verification actions and per-test context.
//!
//! Every wait here is a condition plus a [`PollSpec`](pkg_poll::PollSpec);
//! objects a test creates are released by its [`Session`] when the test
//! scope ends.

pub mod config;
pub mod context;
pub mod session;
pub mod verify;
pub mod workloads;

pub use config::SuiteConfig;
pub use context::TestContext;
pub use session::Session;
pub use verify::{
    cluster_machines_by_role, update_with_conflict_retry, verify_cluster_pods, verify_ready_daemonset,
    wait_for_deletion,
};
pub use workloads::{install_chart_and_wait, scale_and_wait};
