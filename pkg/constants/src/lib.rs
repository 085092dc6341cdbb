//! Centralized constants for the converge workspace.
//!
//! Timeouts, pod-state reasons, quota resource keys and the error-message
//! taxonomy callers match on all live here.

pub mod labels;
pub mod paths;
pub mod poll;
pub mod pods;
pub mod quota;
