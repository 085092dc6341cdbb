use anyhow::{Context, Result, bail};
use serde::Deserialize;
use tracing::info;

use pkg_types::pod::PodResources;
use pkg_types::quota::{QuotaLimit, ResourceList};

use crate::aggregator::{ProjectQuota, QuotaTemplate, ResourceQuotaAggregator};
use crate::error::{QuotaError, QuotaErrorCode};

/// One quota operation in a scenario file.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Operation {
    CreateProject {
        name: String,
        #[serde(default)]
        quota: Option<ProjectQuota>,
    },
    Apply(QuotaTemplate),
    CreateNamespace {
        project: String,
        namespace: String,
    },
    Admit {
        namespace: String,
        resources: ResourceList,
    },
    Release {
        namespace: String,
        resources: ResourceList,
    },
    Record {
        namespace: String,
        deltas: ResourceList,
    },
    /// Pod creation: one `pods` plus the pod's requests and limits.
    CreatePod {
        namespace: String,
        #[serde(default)]
        resources: PodResources,
    },
    DeletePod {
        namespace: String,
        #[serde(default)]
        resources: PodResources,
    },
    Move {
        namespace: String,
        project: String,
    },
    Override {
        namespace: String,
        limit: QuotaLimit,
    },
    RemoveProjectQuota {
        project: String,
    },
    DeleteNamespace {
        namespace: String,
    },
    DeleteProject {
        project: String,
    },
}

impl Operation {
    pub fn name(&self) -> &'static str {
        match self {
            Operation::CreateProject { .. } => "create_project",
            Operation::Apply(_) => "apply",
            Operation::CreateNamespace { .. } => "create_namespace",
            Operation::Admit { .. } => "admit",
            Operation::Release { .. } => "release",
            Operation::Record { .. } => "record",
            Operation::CreatePod { .. } => "create_pod",
            Operation::DeletePod { .. } => "delete_pod",
            Operation::Move { .. } => "move",
            Operation::Override { .. } => "override",
            Operation::RemoveProjectQuota { .. } => "remove_project_quota",
            Operation::DeleteNamespace { .. } => "delete_namespace",
            Operation::DeleteProject { .. } => "delete_project",
        }
    }

    pub fn apply(&self, agg: &mut ResourceQuotaAggregator) -> Result<(), QuotaError> {
        match self {
            Operation::CreateProject { name, quota } => agg.create_project(name, quota.clone()),
            Operation::Apply(template) => agg.apply_quotas(template.clone()),
            Operation::CreateNamespace { project, namespace } => agg.create_namespace(project, namespace),
            Operation::Admit {
                namespace,
                resources,
            } => agg.admit(namespace, resources),
            Operation::Release {
                namespace,
                resources,
            } => agg.release(namespace, resources),
            Operation::Record { namespace, deltas } => agg.record_consumption(namespace, deltas),
            Operation::CreatePod {
                namespace,
                resources,
            } => agg.admit(namespace, &resources.consumption()),
            Operation::DeletePod {
                namespace,
                resources,
            } => agg.release(namespace, &resources.consumption()),
            Operation::Move { namespace, project } => agg.move_namespace(namespace, project),
            Operation::Override { namespace, limit } => {
                agg.override_namespace_quota(namespace, limit.clone())
            }
            Operation::RemoveProjectQuota { project } => agg.remove_project_quota(project),
            Operation::DeleteNamespace { namespace } => agg.delete_namespace(namespace),
            Operation::DeleteProject { project } => agg.delete_project(project),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Step {
    #[serde(flatten)]
    pub operation: Operation,
    /// Error code the step must fail with; the step must succeed when unset.
    #[serde(default)]
    pub expect: Option<QuotaErrorCode>,
}

/// A replayable sequence of quota operations, loaded from YAML:
///
/// ```yaml
/// steps:
///   - op: apply
///     project: p1
///     namespace: ns-1
///     project_quota: { limit: { pods: "2" } }
///     namespace_quota: { limit: { pods: "1" } }
///   - op: admit
///     namespace: ns-1
///     resources: { pods: "2" }
///     expect: Exceeded
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Scenario {
    #[serde(default)]
    pub steps: Vec<Step>,
}

impl Scenario {
    pub fn from_yaml(content: &str) -> Result<Self> {
        serde_yaml::from_str(content).context("failed to parse quota scenario")
    }

    pub fn load(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read scenario file: {}", path))?;
        Self::from_yaml(&content)
    }

    /// Run every step against `agg`, checking each outcome against its
    /// expectation, then check the aggregate invariants.
    pub fn replay(&self, agg: &mut ResourceQuotaAggregator) -> Result<()> {
        for (i, step) in self.steps.iter().enumerate() {
            let op = step.operation.name();
            match (step.operation.apply(agg), step.expect) {
                (Ok(()), None) => {}
                (Ok(()), Some(code)) => {
                    bail!("step {} ({}) succeeded but was expected to fail with {:?}", i + 1, op, code)
                }
                (Err(err), None) => {
                    return Err(err).with_context(|| format!("step {} ({}) failed", i + 1, op));
                }
                (Err(err), Some(code)) if err.code() == code => {
                    info!(step = i + 1, op = op, error = %err, "Step failed as expected");
                }
                (Err(err), Some(code)) => {
                    bail!("step {} ({}) failed with {:?} instead of {:?}: {}", i + 1, op, err.code(), code, err)
                }
            }
        }
        agg.check_invariants()
            .context("quota invariants violated after replay")?;
        info!(steps = self.steps.len(), "Quota scenario replayed");
        Ok(())
    }
}
