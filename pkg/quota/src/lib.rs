//! Project and namespace resource quota bookkeeping.
//!
//! [`ResourceQuotaAggregator`] owns the two-level hierarchy: a project
//! bounds the quotas provisioned into its namespaces, namespaces record
//! workload usage, and project usage is always the sum of its namespaces.

pub mod aggregator;
pub mod error;
pub mod naming;
pub mod scenario;

pub use aggregator::{
    NamespaceQuotaState, NamespaceReport, ProjectQuota, ProjectReport, QuotaTemplate,
    ResourceQuotaAggregator,
};
pub use error::{QuotaError, QuotaErrorCode, QuotaLevel};
pub use naming::{NameProblem, name_problem};
pub use scenario::{Operation, Scenario, Step};
