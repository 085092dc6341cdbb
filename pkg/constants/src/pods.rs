//! Pod classification constants.

/// Pods whose name contains this substring are managed by helm jobs and
/// are skipped by the cluster pod check.
pub const HELM_PREFIX: &str = "helm";

/// Fallback reason for a container that is not ready and reports neither a
/// waiting nor a terminated reason.
pub const NOT_READY: &str = "NotReady";

/// Annotation written onto bad objects by annotated classification.
pub const POD_STATE_ANNOTATION: &str = "podState";

pub const ERR_IMAGE_PULL: &str = "ErrImagePull";
pub const IMAGE_PULL_BACK_OFF: &str = "ImagePullBackOff";
pub const CRASH_LOOP_BACK_OFF: &str = "CrashLoopBackOff";

// ─── Well-known system workloads ──────────────────────────────────────────

pub const WEBHOOK: &str = "rancher-webhook";
pub const FLEET_AGENT: &str = "fleet-agent";
pub const CLUSTER_AGENT: &str = "cattle-cluster-agent";
