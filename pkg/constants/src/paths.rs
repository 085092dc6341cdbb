//! Filesystem path constants.

/// Default config file path for convergectl.
pub const DEFAULT_CONFIG: &str = "/etc/converge/config.yaml";

/// Key prefix for objects held by the in-memory state store.
/// Full key = `REGISTRY_PREFIX + kind + "/" + namespace + "/" + name`.
pub const REGISTRY_PREFIX: &str = "/registry/";
