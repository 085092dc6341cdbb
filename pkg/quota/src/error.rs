use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use pkg_types::quota::Quantity;

use crate::naming::NameProblem;

/// Scope at which an admission was denied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QuotaLevel {
    Namespace,
    Project,
}

impl fmt::Display for QuotaLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QuotaLevel::Namespace => write!(f, "namespace"),
            QuotaLevel::Project => write!(f, "project"),
        }
    }
}

/// Stable machine-readable classification of a [`QuotaError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QuotaErrorCode {
    HierarchyViolation,
    Exceeded,
    NegativeUsage,
    AlreadyExists,
    NotFound,
    NoProjectQuota,
    InvalidName,
    InvalidResource,
    InvalidQuantity,
    InvariantViolation,
    Encoding,
}

#[derive(Debug, Error)]
pub enum QuotaError {
    /// Message contains "exceeds project limit".
    #[error("namespace quota {resource}={requested} exceeds project limit ({limit} available)")]
    HierarchyViolation {
        resource: String,
        requested: Quantity,
        limit: Quantity,
    },

    /// Message contains "exceeded quota".
    #[error(
        "exceeded quota: {level} {name}, requested: {resource}={requested}, used: {resource}={used}, limited: {resource}={limit}"
    )]
    Exceeded {
        level: QuotaLevel,
        name: String,
        resource: String,
        requested: Quantity,
        used: Quantity,
        limit: Quantity,
    },

    #[error("usage of {resource} in {scope} would become negative ({value})")]
    NegativeUsage {
        scope: String,
        resource: String,
        value: Quantity,
    },

    #[error("{kind} {name} already exists")]
    AlreadyExists { kind: &'static str, name: String },

    #[error("{kind} {name} not found")]
    NotFound { kind: &'static str, name: String },

    #[error("project {0} has no resource quota")]
    NoProjectQuota(String),

    #[error("invalid {kind} name '{name}': {problem}")]
    InvalidName {
        kind: &'static str,
        name: String,
        problem: NameProblem,
    },

    #[error("invalid resource key: {0}")]
    InvalidResource(String),

    #[error("invalid quantity: {0}")]
    InvalidQuantity(#[from] pkg_types::quota::QuantityError),

    #[error("quota invariant violated: {0}")]
    InvariantViolation(String),

    #[error("failed to encode quota annotation: {0}")]
    Encoding(#[from] serde_json::Error),
}

impl QuotaError {
    pub fn code(&self) -> QuotaErrorCode {
        match self {
            QuotaError::HierarchyViolation { .. } => QuotaErrorCode::HierarchyViolation,
            QuotaError::Exceeded { .. } => QuotaErrorCode::Exceeded,
            QuotaError::NegativeUsage { .. } => QuotaErrorCode::NegativeUsage,
            QuotaError::AlreadyExists { .. } => QuotaErrorCode::AlreadyExists,
            QuotaError::NotFound { .. } => QuotaErrorCode::NotFound,
            QuotaError::NoProjectQuota(_) => QuotaErrorCode::NoProjectQuota,
            QuotaError::InvalidName { .. } => QuotaErrorCode::InvalidName,
            QuotaError::InvalidResource(_) => QuotaErrorCode::InvalidResource,
            QuotaError::InvalidQuantity(_) => QuotaErrorCode::InvalidQuantity,
            QuotaError::InvariantViolation(_) => QuotaErrorCode::InvariantViolation,
            QuotaError::Encoding(_) => QuotaErrorCode::Encoding,
        }
    }

    pub(crate) fn namespace_not_found(name: &str) -> Self {
        QuotaError::NotFound {
            kind: "namespace",
            name: name.to_string(),
        }
    }

    pub(crate) fn project_not_found(name: &str) -> Self {
        QuotaError::NotFound {
            kind: "project",
            name: name.to_string(),
        }
    }
}
