//! Resource quota keys and error taxonomy.

/// Namespace annotation holding the namespace's quota limits as JSON.
pub const RESOURCE_QUOTA_ANNOTATION: &str = "field.cattle.io/resourceQuota";

/// Built-in pod count key.
pub const PODS: &str = "pods";

pub const EPHEMERAL_STORAGE: &str = "ephemeral-storage";
pub const REQUESTS_EPHEMERAL_STORAGE: &str = "requests.ephemeral-storage";
pub const LIMITS_EPHEMERAL_STORAGE: &str = "limits.ephemeral-storage";

/// Keys that expand into a `requests.` and a `limits.` sub-key.
pub const SHORTHAND_RESOURCES: &[&str] = &["cpu", "memory", EPHEMERAL_STORAGE];

pub const REQUESTS_PREFIX: &str = "requests.";
pub const LIMITS_PREFIX: &str = "limits.";

/// Message fragment of an admission denial.
pub const EXCEEDED_QUOTA_MESSAGE: &str = "exceeded quota";

/// Message fragment of a namespace quota that does not fit its project.
pub const EXCEEDS_PROJECT_LIMIT_MESSAGE: &str = "exceeds project limit";
