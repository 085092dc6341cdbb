use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, warn};

use pkg_constants::quota::RESOURCE_QUOTA_ANNOTATION;
use pkg_types::namespace::{Namespace, Project};
use pkg_types::quota::{Quantity, QuotaLimit, ResourceList, ResourceQuota};
use pkg_types::validate::validate_resource_key;

use crate::error::{QuotaError, QuotaLevel};
use crate::naming::check_name;

// --- Public model ---

/// Lifecycle of the quota object inside one namespace.
///
/// `Unset -> Provisioned -> {Removed, Overridden}`, and a move into a
/// project with quota provisions again from any state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum NamespaceQuotaState {
    #[default]
    Unset,
    Provisioned,
    Overridden,
    Removed,
}

/// Project-level limit plus the default provisioned into each namespace.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectQuota {
    #[serde(default)]
    pub project: QuotaLimit,
    #[serde(default)]
    pub namespace_default: QuotaLimit,
}

/// A project and its first namespace, created together.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaTemplate {
    pub project: String,
    pub namespace: String,
    #[serde(default)]
    pub project_quota: QuotaLimit,
    #[serde(default)]
    pub namespace_quota: QuotaLimit,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NamespaceReport {
    pub name: String,
    pub state: NamespaceQuotaState,
    pub hard: Option<ResourceList>,
    pub used: ResourceList,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validation_status: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProjectReport {
    pub name: String,
    pub limit: Option<ResourceList>,
    pub used: ResourceList,
    pub allocated: ResourceList,
    pub namespaces: Vec<NamespaceReport>,
}

// --- Internal entries ---

#[derive(Debug, Clone)]
struct ProjectEntry {
    project: Project,
    namespaces: BTreeSet<String>,
    used: ResourceList,
    /// Sum of the limits provisioned into member namespaces.
    allocated: ResourceList,
}

impl ProjectEntry {
    fn new(project: Project) -> Self {
        Self {
            project,
            namespaces: BTreeSet::new(),
            used: ResourceList::new(),
            allocated: ResourceList::new(),
        }
    }

    fn limit(&self) -> Option<ResourceList> {
        if !self.project.has_quota() {
            return None;
        }
        self.project.resource_quota.as_ref().map(QuotaLimit::effective)
    }
}

#[derive(Debug, Clone)]
struct NamespaceEntry {
    namespace: Namespace,
    state: NamespaceQuotaState,
    limit: Option<QuotaLimit>,
    quota: Option<ResourceQuota>,
    used: ResourceList,
    /// This namespace's share of the project's `allocated`.
    allocated: ResourceList,
    validation_status: Option<String>,
}

impl NamespaceEntry {
    fn new(namespace: Namespace) -> Self {
        Self {
            namespace,
            state: NamespaceQuotaState::Unset,
            limit: None,
            quota: None,
            used: ResourceList::new(),
            allocated: ResourceList::new(),
            validation_status: None,
        }
    }

    fn project(&self) -> Option<&str> {
        self.namespace.project.as_deref()
    }

    fn sync_quota_used(&mut self) {
        if let Some(quota) = &mut self.quota {
            quota.used = quota
                .hard
                .keys()
                .map(|k| (k.to_string(), self.used.value(k)))
                .collect();
        }
    }

    fn install_quota(
        &mut self,
        limit: QuotaLimit,
        hard: ResourceList,
        allocated: ResourceList,
        state: NamespaceQuotaState,
        validation_status: Option<String>,
    ) -> Result<(), QuotaError> {
        let annotation = serde_json::to_string(&limit)?;
        self.namespace
            .annotations
            .insert(RESOURCE_QUOTA_ANNOTATION.to_string(), annotation);
        self.quota = Some(ResourceQuota {
            name: format!("default-{}", self.namespace.name),
            namespace: self.namespace.name.clone(),
            hard,
            used: ResourceList::new(),
            created_at: Utc::now(),
        });
        self.limit = Some(limit);
        self.allocated = allocated;
        self.state = state;
        self.validation_status = validation_status;
        self.sync_quota_used();
        Ok(())
    }

    fn clear_quota(&mut self) {
        self.namespace.annotations.remove(RESOURCE_QUOTA_ANNOTATION);
        self.quota = None;
        self.limit = None;
        self.allocated = ResourceList::new();
        self.validation_status = None;
    }
}

/// Every key of `wanted` that `limit` bounds must fit in what is left of
/// the limit after `allocated`.
fn fit(limit: &ResourceList, allocated: &ResourceList, wanted: &ResourceList) -> Result<(), QuotaError> {
    for (resource, requested) in wanted.iter() {
        let Some(cap) = limit.get(resource) else {
            continue;
        };
        let available = cap.checked_sub(allocated.value(resource));
        match available {
            Some(available) if requested <= available => {}
            _ => {
                return Err(QuotaError::HierarchyViolation {
                    resource: resource.to_string(),
                    requested,
                    limit: available.unwrap_or(Quantity::ZERO),
                });
            }
        }
    }
    Ok(())
}

fn check_keys(limit: &QuotaLimit) -> Result<(), QuotaError> {
    for key in limit.existing.keys().chain(limit.extended.keys()) {
        validate_resource_key(key).map_err(|e| QuotaError::InvalidResource(format!("{:#}", e)))?;
    }
    Ok(())
}

/// Provision the project's namespace default into `ns`. A default that no
/// longer fits the project still yields a quota object, with zero hard
/// limits and the failure recorded as the validation status.
fn provision_default(project: &mut ProjectEntry, ns: &mut NamespaceEntry) -> Result<(), QuotaError> {
    let Some(limit) = project.limit() else {
        return Ok(());
    };
    let default = project.project.namespace_default_quota.clone().unwrap_or_default();
    let wanted = default.effective();
    let fitted = fit(&limit, &project.allocated, &wanted).and_then(|()| {
        let mut allocated = project.allocated.clone();
        allocated.add(&wanted)?;
        Ok(allocated)
    });
    match fitted {
        Ok(allocated) => {
            ns.install_quota(
                default,
                wanted.clone(),
                wanted.clone(),
                NamespaceQuotaState::Provisioned,
                None,
            )?;
            project.allocated = allocated;
            info!(namespace = %ns.namespace.name, project = %project.project.name, hard = %wanted, "Provisioned namespace quota");
        }
        Err(err) => {
            let zero: ResourceList = wanted.keys().map(|k| (k.to_string(), Quantity::ZERO)).collect();
            ns.install_quota(
                default,
                zero,
                ResourceList::new(),
                NamespaceQuotaState::Provisioned,
                Some(err.to_string()),
            )?;
            warn!(namespace = %ns.namespace.name, project = %project.project.name, error = %err, "Namespace quota does not fit project");
        }
    }
    Ok(())
}

// --- Aggregator ---

/// Two-level quota bookkeeping: projects own namespaces, namespaces own
/// usage, and project usage is always the sum of its namespaces' usage.
#[derive(Debug, Clone, Default)]
pub struct ResourceQuotaAggregator {
    projects: BTreeMap<String, ProjectEntry>,
    namespaces: BTreeMap<String, NamespaceEntry>,
}

impl ResourceQuotaAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a project, optionally with quota. The namespace default must
    /// fit inside the project limit.
    pub fn create_project(&mut self, name: &str, quota: Option<ProjectQuota>) -> Result<(), QuotaError> {
        check_name("project", name)?;
        if self.projects.contains_key(name) {
            return Err(QuotaError::AlreadyExists {
                kind: "project",
                name: name.to_string(),
            });
        }
        let mut project = Project::new(name);
        if let Some(quota) = quota {
            check_keys(&quota.project)?;
            check_keys(&quota.namespace_default)?;
            fit(
                &quota.project.effective(),
                &ResourceList::new(),
                &quota.namespace_default.effective(),
            )?;
            project.resource_quota = Some(quota.project);
            project.namespace_default_quota = Some(quota.namespace_default);
        }
        info!(project = %name, quota = project.has_quota(), "Created project");
        self.projects.insert(name.to_string(), ProjectEntry::new(project));
        Ok(())
    }

    /// Create a project with quota and its first namespace. On any error
    /// neither object exists afterwards.
    pub fn apply_quotas(&mut self, template: QuotaTemplate) -> Result<(), QuotaError> {
        check_name("project", &template.project)?;
        check_name("namespace", &template.namespace)?;
        if self.namespaces.contains_key(&template.namespace) {
            return Err(QuotaError::AlreadyExists {
                kind: "namespace",
                name: template.namespace.clone(),
            });
        }
        self.create_project(
            &template.project,
            Some(ProjectQuota {
                project: template.project_quota,
                namespace_default: template.namespace_quota,
            }),
        )?;
        if let Err(err) = self.create_namespace(&template.project, &template.namespace) {
            self.projects.remove(&template.project);
            return Err(err);
        }
        Ok(())
    }

    pub fn create_namespace(&mut self, project: &str, namespace: &str) -> Result<(), QuotaError> {
        check_name("namespace", namespace)?;
        if self.namespaces.contains_key(namespace) {
            return Err(QuotaError::AlreadyExists {
                kind: "namespace",
                name: namespace.to_string(),
            });
        }
        let owner = self
            .projects
            .get_mut(project)
            .ok_or_else(|| QuotaError::project_not_found(project))?;

        let mut entry = NamespaceEntry::new(Namespace::new(namespace, Some(project)));
        provision_default(owner, &mut entry)?;
        owner.namespaces.insert(namespace.to_string());
        debug!(namespace = %namespace, project = %project, state = ?entry.state, "Created namespace");
        self.namespaces.insert(namespace.to_string(), entry);
        Ok(())
    }

    /// Apply signed usage deltas to a namespace and its project. Nothing
    /// changes if any counter would go negative.
    pub fn record_consumption(&mut self, namespace: &str, deltas: &ResourceList) -> Result<(), QuotaError> {
        let ns = self
            .namespaces
            .get_mut(namespace)
            .ok_or_else(|| QuotaError::namespace_not_found(namespace))?;

        let mut ns_used = ns.used.clone();
        ns_used.add(deltas)?;
        if let Some((resource, value)) = ns_used.first_negative() {
            return Err(QuotaError::NegativeUsage {
                scope: format!("namespace {}", namespace),
                resource: resource.to_string(),
                value,
            });
        }

        let mut project_used = None;
        if let Some(owner) = ns.project().and_then(|p| self.projects.get(p)) {
            let mut used = owner.used.clone();
            used.add(deltas)?;
            if let Some((resource, value)) = used.first_negative() {
                return Err(QuotaError::NegativeUsage {
                    scope: format!("project {}", owner.project.name),
                    resource: resource.to_string(),
                    value,
                });
            }
            project_used = Some((owner.project.name.clone(), used));
        }

        ns.used = ns_used;
        ns.sync_quota_used();
        if let Some((name, used)) = project_used {
            if let Some(owner) = self.projects.get_mut(&name) {
                owner.used = used;
            }
        }
        debug!(namespace = %namespace, deltas = %deltas, "Recorded consumption");
        Ok(())
    }

    /// Would `requested` fit? The namespace quota is checked first, then
    /// the project limit.
    pub fn check_admission(&self, namespace: &str, requested: &ResourceList) -> Result<(), QuotaError> {
        let ns = self
            .namespaces
            .get(namespace)
            .ok_or_else(|| QuotaError::namespace_not_found(namespace))?;

        if let Some(quota) = &ns.quota {
            Self::check_level(QuotaLevel::Namespace, namespace, &quota.hard, &ns.used, requested)?;
        }
        if let Some(owner) = ns.project().and_then(|p| self.projects.get(p)) {
            if let Some(limit) = owner.limit() {
                Self::check_level(QuotaLevel::Project, &owner.project.name, &limit, &owner.used, requested)?;
            }
        }
        Ok(())
    }

    fn check_level(
        level: QuotaLevel,
        name: &str,
        limit: &ResourceList,
        used: &ResourceList,
        requested: &ResourceList,
    ) -> Result<(), QuotaError> {
        for (resource, req) in requested.iter() {
            if req.is_zero() {
                continue;
            }
            let Some(hard) = limit.get(resource) else {
                continue;
            };
            let current = used.value(resource);
            let fits = current.checked_add(req).is_some_and(|total| total <= hard);
            if !fits {
                return Err(QuotaError::Exceeded {
                    level,
                    name: name.to_string(),
                    resource: resource.to_string(),
                    requested: req,
                    used: current,
                    limit: hard,
                });
            }
        }
        Ok(())
    }

    /// Admit a workload: check, then charge its usage.
    pub fn admit(&mut self, namespace: &str, requested: &ResourceList) -> Result<(), QuotaError> {
        if let Err(err) = self.check_admission(namespace, requested) {
            info!(namespace = %namespace, error = %err, "Admission denied");
            return Err(err);
        }
        self.record_consumption(namespace, requested)
    }

    /// Release the usage of a deleted workload.
    pub fn release(&mut self, namespace: &str, requested: &ResourceList) -> Result<(), QuotaError> {
        self.record_consumption(namespace, &requested.negated()?)
    }

    /// Move a namespace with its usage to another project. The namespace
    /// takes on the destination's default quota, or loses its quota when
    /// the destination has none.
    pub fn move_namespace(&mut self, namespace: &str, project: &str) -> Result<(), QuotaError> {
        if !self.projects.contains_key(project) {
            return Err(QuotaError::project_not_found(project));
        }
        let ns = self
            .namespaces
            .get_mut(namespace)
            .ok_or_else(|| QuotaError::namespace_not_found(namespace))?;
        let source = ns.namespace.project.clone();
        if source.as_deref() == Some(project) {
            return Ok(());
        }

        let mut dest_used = self
            .projects
            .get(project)
            .map(|p| p.used.clone())
            .unwrap_or_default();
        dest_used.add(&ns.used)?;
        let mut source_totals = None;
        if let Some(old) = source.as_deref().and_then(|p| self.projects.get(p)) {
            let mut used = old.used.clone();
            used.sub(&ns.used)?;
            let mut allocated = old.allocated.clone();
            allocated.sub(&ns.allocated)?;
            source_totals = Some((used, allocated));
        }

        if let Some(old) = source.as_deref().and_then(|p| self.projects.get_mut(p)) {
            if let Some((used, allocated)) = source_totals {
                old.used = used;
                old.allocated = allocated;
            }
            old.namespaces.remove(namespace);
        }
        let had_quota = ns.state != NamespaceQuotaState::Unset;
        ns.clear_quota();
        ns.namespace.project = Some(project.to_string());

        let dest = self
            .projects
            .get_mut(project)
            .ok_or_else(|| QuotaError::project_not_found(project))?;
        dest.used = dest_used;
        dest.namespaces.insert(namespace.to_string());

        if dest.limit().is_some() {
            provision_default(dest, ns)?;
        } else if had_quota {
            ns.state = NamespaceQuotaState::Removed;
        }
        info!(
            namespace = %namespace,
            from = %source.as_deref().unwrap_or("-"),
            to = %project,
            state = ?ns.state,
            "Moved namespace"
        );
        Ok(())
    }

    /// Replace a namespace's quota. Limits that do not fit the project
    /// leave the quota untouched and only record the validation failure.
    pub fn override_namespace_quota(&mut self, namespace: &str, limit: QuotaLimit) -> Result<(), QuotaError> {
        let ns = self
            .namespaces
            .get_mut(namespace)
            .ok_or_else(|| QuotaError::namespace_not_found(namespace))?;
        let project_name = ns.project().unwrap_or_default().to_string();
        let owner = self
            .projects
            .get_mut(&project_name)
            .ok_or_else(|| QuotaError::project_not_found(&project_name))?;
        let Some(project_limit) = owner.limit() else {
            return Err(QuotaError::NoProjectQuota(project_name));
        };

        check_keys(&limit)?;
        let wanted = limit.effective();
        let mut others = owner.allocated.clone();
        others.sub(&ns.allocated)?;
        if let Err(err) = fit(&project_limit, &others, &wanted) {
            warn!(namespace = %namespace, error = %err, "Rejected namespace quota override");
            ns.validation_status = Some(err.to_string());
            return Err(err);
        }

        others.add(&wanted)?;
        ns.install_quota(
            limit,
            wanted.clone(),
            wanted.clone(),
            NamespaceQuotaState::Overridden,
            None,
        )?;
        owner.allocated = others;
        info!(namespace = %namespace, hard = %wanted, "Overrode namespace quota");
        Ok(())
    }

    /// Drop the project's quota; every member namespace loses its quota.
    pub fn remove_project_quota(&mut self, project: &str) -> Result<(), QuotaError> {
        let owner = self
            .projects
            .get_mut(project)
            .ok_or_else(|| QuotaError::project_not_found(project))?;
        owner.project.resource_quota = None;
        owner.project.namespace_default_quota = None;
        owner.allocated = ResourceList::new();
        for name in &owner.namespaces {
            if let Some(ns) = self.namespaces.get_mut(name) {
                ns.clear_quota();
                ns.state = NamespaceQuotaState::Removed;
            }
        }
        info!(project = %project, "Removed project quota");
        Ok(())
    }

    /// Delete a namespace, returning its usage and allocation to the project.
    pub fn delete_namespace(&mut self, namespace: &str) -> Result<(), QuotaError> {
        let ns = self
            .namespaces
            .get(namespace)
            .ok_or_else(|| QuotaError::namespace_not_found(namespace))?;
        if let Some(owner) = ns.project().and_then(|p| self.projects.get_mut(p)) {
            let mut used = owner.used.clone();
            used.sub(&ns.used)?;
            let mut allocated = owner.allocated.clone();
            allocated.sub(&ns.allocated)?;
            owner.used = used;
            owner.allocated = allocated;
            owner.namespaces.remove(namespace);
        }
        self.namespaces.remove(namespace);
        debug!(namespace = %namespace, "Deleted namespace");
        Ok(())
    }

    /// Delete a project together with its namespaces.
    pub fn delete_project(&mut self, project: &str) -> Result<(), QuotaError> {
        let owner = self
            .projects
            .remove(project)
            .ok_or_else(|| QuotaError::project_not_found(project))?;
        for name in &owner.namespaces {
            self.namespaces.remove(name);
        }
        info!(project = %project, namespaces = owner.namespaces.len(), "Deleted project");
        Ok(())
    }

    // --- Queries ---

    /// JSON quota annotation of the namespace, present while it has a quota.
    pub fn annotation(&self, namespace: &str) -> Option<&str> {
        self.namespaces
            .get(namespace)?
            .namespace
            .annotations
            .get(RESOURCE_QUOTA_ANNOTATION)
            .map(String::as_str)
    }

    pub fn namespace(&self, namespace: &str) -> Option<&Namespace> {
        self.namespaces.get(namespace).map(|e| &e.namespace)
    }

    pub fn project(&self, project: &str) -> Option<&Project> {
        self.projects.get(project).map(|e| &e.project)
    }

    pub fn namespace_state(&self, namespace: &str) -> Option<NamespaceQuotaState> {
        self.namespaces.get(namespace).map(|e| e.state)
    }

    pub fn namespace_used(&self, namespace: &str) -> Option<&ResourceList> {
        self.namespaces.get(namespace).map(|e| &e.used)
    }

    pub fn namespace_limit(&self, namespace: &str) -> Option<&QuotaLimit> {
        self.namespaces.get(namespace)?.limit.as_ref()
    }

    pub fn resource_quota(&self, namespace: &str) -> Option<&ResourceQuota> {
        self.namespaces.get(namespace)?.quota.as_ref()
    }

    pub fn validation_status(&self, namespace: &str) -> Option<&str> {
        self.namespaces.get(namespace)?.validation_status.as_deref()
    }

    pub fn project_used(&self, project: &str) -> Option<&ResourceList> {
        self.projects.get(project).map(|e| &e.used)
    }

    pub fn project_allocated(&self, project: &str) -> Option<&ResourceList> {
        self.projects.get(project).map(|e| &e.allocated)
    }

    pub fn project_limit(&self, project: &str) -> Option<ResourceList> {
        self.projects.get(project)?.limit()
    }

    pub fn project_namespaces(&self, project: &str) -> Vec<&str> {
        self.projects
            .get(project)
            .map(|e| e.namespaces.iter().map(String::as_str).collect())
            .unwrap_or_default()
    }

    pub fn report(&self) -> Vec<ProjectReport> {
        self.projects
            .values()
            .map(|p| ProjectReport {
                name: p.project.name.clone(),
                limit: p.limit(),
                used: p.used.pruned(),
                allocated: p.allocated.pruned(),
                namespaces: p
                    .namespaces
                    .iter()
                    .filter_map(|n| self.namespaces.get(n))
                    .map(|n| NamespaceReport {
                        name: n.namespace.name.clone(),
                        state: n.state,
                        hard: n.quota.as_ref().map(|q| q.hard.clone()),
                        used: n.used.pruned(),
                        validation_status: n.validation_status.clone(),
                    })
                    .collect(),
            })
            .collect()
    }

    /// Conservation and non-negativity of usage, consistency of
    /// allocations and membership.
    pub fn check_invariants(&self) -> Result<(), QuotaError> {
        let violation = |msg: String| Err(QuotaError::InvariantViolation(msg));

        for (name, project) in &self.projects {
            let mut used = ResourceList::new();
            let mut allocated = ResourceList::new();
            for ns_name in &project.namespaces {
                let Some(ns) = self.namespaces.get(ns_name) else {
                    return violation(format!("project {} lists unknown namespace {}", name, ns_name));
                };
                if ns.project() != Some(name.as_str()) {
                    return violation(format!(
                        "namespace {} is listed by project {} but belongs to {}",
                        ns_name,
                        name,
                        ns.project().unwrap_or("-")
                    ));
                }
                used.add(&ns.used)?;
                allocated.add(&ns.allocated)?;
            }
            if let Some((resource, value)) = project.used.first_negative() {
                return violation(format!("project {} has negative {}={}", name, resource, value));
            }
            if used.pruned() != project.used.pruned() {
                return violation(format!(
                    "project {} used {} differs from its namespaces' sum {}",
                    name,
                    project.used.pruned(),
                    used.pruned()
                ));
            }
            if allocated.pruned() != project.allocated.pruned() {
                return violation(format!(
                    "project {} allocated {} differs from its namespaces' sum {}",
                    name,
                    project.allocated.pruned(),
                    allocated.pruned()
                ));
            }
            if let Some(limit) = project.limit() {
                if let Err(err) = fit(&limit, &ResourceList::new(), &project.allocated) {
                    return violation(format!("project {} over-allocated: {}", name, err));
                }
            }
        }

        for (name, ns) in &self.namespaces {
            if let Some((resource, value)) = ns.used.first_negative() {
                return violation(format!("namespace {} has negative {}={}", name, resource, value));
            }
            let listed = ns
                .project()
                .and_then(|p| self.projects.get(p))
                .is_some_and(|p| p.namespaces.contains(name));
            if !listed {
                return violation(format!("namespace {} is not listed by its project", name));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::QuotaErrorCode;
    use pkg_constants::quota::{
        EXCEEDED_QUOTA_MESSAGE, EXCEEDS_PROJECT_LIMIT_MESSAGE, LIMITS_EPHEMERAL_STORAGE, PODS,
        REQUESTS_EPHEMERAL_STORAGE,
    };

    fn list(pairs: &[(&str, &str)]) -> ResourceList {
        ResourceList::parse(pairs.iter().copied()).unwrap()
    }

    fn extended(pairs: &[(&str, &str)]) -> QuotaLimit {
        QuotaLimit::new(ResourceList::new(), list(pairs))
    }

    fn existing(pairs: &[(&str, &str)]) -> QuotaLimit {
        QuotaLimit::new(list(pairs), ResourceList::new())
    }

    fn q(s: &str) -> Quantity {
        s.parse().unwrap()
    }

    fn storage(request: &str, limit: &str) -> ResourceList {
        list(&[(REQUESTS_EPHEMERAL_STORAGE, request), (LIMITS_EPHEMERAL_STORAGE, limit)])
    }

    fn template(project: &str, namespace: &str, p: QuotaLimit, n: QuotaLimit) -> QuotaTemplate {
        QuotaTemplate {
            project: project.to_string(),
            namespace: namespace.to_string(),
            project_quota: p,
            namespace_quota: n,
        }
    }

    #[test]
    fn project_level_extended_quota() {
        let mut agg = ResourceQuotaAggregator::new();
        agg.apply_quotas(template(
            "p1",
            "ns-1",
            extended(&[(REQUESTS_EPHEMERAL_STORAGE, "100Mi"), (LIMITS_EPHEMERAL_STORAGE, "200Mi")]),
            extended(&[(REQUESTS_EPHEMERAL_STORAGE, "60Mi"), (LIMITS_EPHEMERAL_STORAGE, "120Mi")]),
        ))
        .unwrap();

        assert!(agg.annotation("ns-1").is_some());
        assert_eq!(agg.namespace_state("ns-1"), Some(NamespaceQuotaState::Provisioned));
        assert_eq!(agg.resource_quota("ns-1").unwrap().hard, storage("60Mi", "120Mi"));
        assert_eq!(agg.resource_quota("ns-1").unwrap().used.value(REQUESTS_EPHEMERAL_STORAGE), Quantity::ZERO);

        agg.admit("ns-1", &storage("60Mi", "120Mi")).unwrap();
        assert_eq!(agg.namespace_used("ns-1").unwrap(), &storage("60Mi", "120Mi"));
        assert_eq!(agg.project_used("p1").unwrap(), &storage("60Mi", "120Mi"));

        agg.create_namespace("p1", "ns-2").unwrap();
        assert!(agg
            .validation_status("ns-2")
            .unwrap()
            .contains(EXCEEDS_PROJECT_LIMIT_MESSAGE));

        let err = agg.admit("ns-2", &storage("60Mi", "120Mi")).unwrap_err();
        assert_eq!(err.code(), QuotaErrorCode::Exceeded);
        assert!(err.to_string().contains(EXCEEDED_QUOTA_MESSAGE));
        assert_eq!(agg.namespace_used("ns-2").unwrap().value(REQUESTS_EPHEMERAL_STORAGE), Quantity::ZERO);
        assert_eq!(agg.project_used("p1").unwrap(), &storage("60Mi", "120Mi"));
        agg.check_invariants().unwrap();
    }

    #[test]
    fn hierarchy_violation_creates_nothing() {
        let mut agg = ResourceQuotaAggregator::new();
        let err = agg
            .apply_quotas(template("p1", "ns-1", existing(&[(PODS, "2")]), existing(&[(PODS, "5")])))
            .unwrap_err();
        assert_eq!(err.code(), QuotaErrorCode::HierarchyViolation);
        assert!(err.to_string().contains(EXCEEDS_PROJECT_LIMIT_MESSAGE));
        assert!(agg.project("p1").is_none());
        assert!(agg.namespace("ns-1").is_none());
    }

    #[test]
    fn duplicates_are_rejected_without_partial_state() {
        let mut agg = ResourceQuotaAggregator::new();
        agg.apply_quotas(template("p1", "ns-1", existing(&[(PODS, "4")]), existing(&[(PODS, "2")])))
            .unwrap();

        let err = agg
            .apply_quotas(template("p2", "ns-1", existing(&[(PODS, "4")]), existing(&[(PODS, "2")])))
            .unwrap_err();
        assert_eq!(err.code(), QuotaErrorCode::AlreadyExists);
        assert!(agg.project("p2").is_none());

        let err = agg
            .apply_quotas(template("p1", "ns-9", existing(&[(PODS, "4")]), existing(&[(PODS, "2")])))
            .unwrap_err();
        assert_eq!(err.code(), QuotaErrorCode::AlreadyExists);
        assert!(agg.namespace("ns-9").is_none());
        assert_eq!(agg.project_namespaces("p1"), vec!["ns-1"]);
    }

    #[test]
    fn usage_is_conserved_across_deletion() {
        let mut agg = ResourceQuotaAggregator::new();
        agg.apply_quotas(template(
            "p1",
            "ns-1",
            extended(&[(REQUESTS_EPHEMERAL_STORAGE, "200Mi")]),
            extended(&[(REQUESTS_EPHEMERAL_STORAGE, "100Mi")]),
        ))
        .unwrap();
        agg.create_namespace("p1", "ns-2").unwrap();
        assert!(agg.validation_status("ns-2").is_none());

        let pod = list(&[(REQUESTS_EPHEMERAL_STORAGE, "50Mi")]);
        agg.admit("ns-1", &pod).unwrap();
        agg.admit("ns-2", &pod).unwrap();
        assert_eq!(agg.project_used("p1").unwrap().value(REQUESTS_EPHEMERAL_STORAGE), q("100Mi"));

        agg.delete_namespace("ns-1").unwrap();
        assert_eq!(agg.project_used("p1").unwrap().value(REQUESTS_EPHEMERAL_STORAGE), q("50Mi"));
        assert_eq!(agg.project_allocated("p1").unwrap().value(REQUESTS_EPHEMERAL_STORAGE), q("100Mi"));
        agg.check_invariants().unwrap();

        agg.release("ns-2", &pod).unwrap();
        assert!(agg.project_used("p1").unwrap().is_zero());
    }

    #[test]
    fn move_between_quota_projects_and_to_quota_free_project() {
        let mut agg = ResourceQuotaAggregator::new();
        let project = || extended(&[(REQUESTS_EPHEMERAL_STORAGE, "20Gi")]);
        let ns_default = || extended(&[(REQUESTS_EPHEMERAL_STORAGE, "10Gi")]);
        agg.apply_quotas(template("p1", "ns-a", project(), ns_default())).unwrap();
        agg.apply_quotas(template("p2", "ns-b", project(), ns_default())).unwrap();
        agg.create_project("p3", None).unwrap();

        agg.admit("ns-a", &list(&[(REQUESTS_EPHEMERAL_STORAGE, "10Gi")])).unwrap();
        agg.move_namespace("ns-a", "p2").unwrap();

        assert!(agg.project_used("p1").unwrap().is_zero());
        assert!(agg.project_allocated("p1").unwrap().is_zero());
        assert_eq!(agg.project_used("p2").unwrap().value(REQUESTS_EPHEMERAL_STORAGE), q("10Gi"));
        assert_eq!(agg.project_allocated("p2").unwrap().value(REQUESTS_EPHEMERAL_STORAGE), q("20Gi"));
        assert_eq!(agg.namespace_state("ns-a"), Some(NamespaceQuotaState::Provisioned));
        assert!(agg.annotation("ns-a").is_some());
        agg.check_invariants().unwrap();

        agg.move_namespace("ns-a", "p3").unwrap();
        assert_eq!(agg.namespace_state("ns-a"), Some(NamespaceQuotaState::Removed));
        assert!(agg.annotation("ns-a").is_none());
        assert!(agg.resource_quota("ns-a").is_none());
        assert_eq!(agg.project_used("p3").unwrap().value(REQUESTS_EPHEMERAL_STORAGE), q("10Gi"));
        assert_eq!(agg.project_allocated("p2").unwrap().value(REQUESTS_EPHEMERAL_STORAGE), q("10Gi"));
        agg.check_invariants().unwrap();
    }

    #[test]
    fn move_carries_requests_and_limits() {
        let mut agg = ResourceQuotaAggregator::new();
        let project = || extended(&[(REQUESTS_EPHEMERAL_STORAGE, "20Gi"), (LIMITS_EPHEMERAL_STORAGE, "40Gi")]);
        let ns_default = || extended(&[(REQUESTS_EPHEMERAL_STORAGE, "10Gi"), (LIMITS_EPHEMERAL_STORAGE, "20Gi")]);
        agg.apply_quotas(template("p1", "ns-a", project(), ns_default())).unwrap();
        agg.apply_quotas(template("p2", "ns-b", project(), ns_default())).unwrap();

        agg.admit("ns-a", &storage("10Gi", "20Gi")).unwrap();
        assert_eq!(agg.project_used("p1").unwrap(), &storage("10Gi", "20Gi"));
        assert_eq!(agg.project_allocated("p1").unwrap(), &storage("10Gi", "20Gi"));

        agg.move_namespace("ns-a", "p2").unwrap();

        for key in [REQUESTS_EPHEMERAL_STORAGE, LIMITS_EPHEMERAL_STORAGE] {
            assert!(agg.project_used("p1").unwrap().value(key).is_zero(), "{}", key);
            assert!(agg.project_allocated("p1").unwrap().value(key).is_zero(), "{}", key);
        }
        assert_eq!(agg.project_used("p2").unwrap(), &storage("10Gi", "20Gi"));
        assert_eq!(agg.project_allocated("p2").unwrap(), &storage("20Gi", "40Gi"));
        assert_eq!(agg.namespace_used("ns-a").unwrap(), &storage("10Gi", "20Gi"));
        assert_eq!(agg.resource_quota("ns-a").unwrap().hard, storage("10Gi", "20Gi"));
        agg.check_invariants().unwrap();
    }

    #[test]
    fn huge_quantities_are_rejected_not_wrapped() {
        let huge = list(&[(PODS, "100000000000000000E")]);

        let mut agg = ResourceQuotaAggregator::new();
        agg.create_project("p1", None).unwrap();
        agg.create_namespace("p1", "ns").unwrap();
        agg.record_consumption("ns", &huge).unwrap();
        let err = agg.record_consumption("ns", &huge).unwrap_err();
        assert_eq!(err.code(), QuotaErrorCode::InvalidQuantity);
        assert_eq!(agg.namespace_used("ns").unwrap(), &huge);
        assert_eq!(agg.project_used("p1").unwrap(), &huge);
        agg.check_invariants().unwrap();

        let mut agg = ResourceQuotaAggregator::new();
        let ceiling = || existing(&[(PODS, "100000000000000000E")]);
        agg.apply_quotas(template("p2", "ns-q", ceiling(), ceiling())).unwrap();
        agg.admit("ns-q", &huge).unwrap();
        let err = agg.admit("ns-q", &huge).unwrap_err();
        assert_eq!(err.code(), QuotaErrorCode::Exceeded);
        assert_eq!(agg.namespace_used("ns-q").unwrap(), &huge);
        agg.release("ns-q", &huge).unwrap();
        assert!(agg.project_used("p2").unwrap().is_zero());
        agg.check_invariants().unwrap();
    }

    #[test]
    fn namespace_level_is_checked_before_project_level() {
        let mut agg = ResourceQuotaAggregator::new();
        agg.apply_quotas(template(
            "p1",
            "ns-1",
            QuotaLimit::new(list(&[(PODS, "2")]), list(&[(REQUESTS_EPHEMERAL_STORAGE, "1Gi")])),
            extended(&[(REQUESTS_EPHEMERAL_STORAGE, "512Mi")]),
        ))
        .unwrap();

        let err = agg
            .check_admission("ns-1", &list(&[(PODS, "1"), (REQUESTS_EPHEMERAL_STORAGE, "600Mi")]))
            .unwrap_err();
        assert!(matches!(err, QuotaError::Exceeded { level: QuotaLevel::Namespace, .. }));

        let pod = list(&[(PODS, "1")]);
        agg.admit("ns-1", &pod).unwrap();
        agg.admit("ns-1", &pod).unwrap();
        match agg.admit("ns-1", &pod).unwrap_err() {
            QuotaError::Exceeded {
                level,
                resource,
                used,
                limit,
                ..
            } => {
                assert_eq!(level, QuotaLevel::Project);
                assert_eq!(resource, PODS);
                assert_eq!(used, Quantity::from_units(2));
                assert_eq!(limit, Quantity::from_units(2));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(agg.namespace_used("ns-1").unwrap().value(PODS), Quantity::from_units(2));
    }

    #[test]
    fn shorthand_expands_and_explicit_sub_key_wins() {
        let mut agg = ResourceQuotaAggregator::new();
        agg.apply_quotas(template(
            "p1",
            "ns-1",
            extended(&[("ephemeral-storage", "2Gi"), (LIMITS_EPHEMERAL_STORAGE, "3Gi")]),
            extended(&[("ephemeral-storage", "1Gi")]),
        ))
        .unwrap();

        let limit = agg.project_limit("p1").unwrap();
        assert_eq!(limit.get(REQUESTS_EPHEMERAL_STORAGE), Some(q("2Gi")));
        assert_eq!(limit.get(LIMITS_EPHEMERAL_STORAGE), Some(q("3Gi")));
        assert!(!limit.contains("ephemeral-storage"));

        let hard = &agg.resource_quota("ns-1").unwrap().hard;
        assert_eq!(hard, &storage("1Gi", "1Gi"));
    }

    #[test]
    fn existing_limit_overrides_extended() {
        let mut agg = ResourceQuotaAggregator::new();
        agg.apply_quotas(template(
            "p1",
            "ns-1",
            QuotaLimit::new(list(&[(PODS, "2")]), list(&[(PODS, "5")])),
            QuotaLimit::new(list(&[(PODS, "1")]), list(&[(PODS, "3")])),
        ))
        .unwrap();
        assert_eq!(agg.project_limit("p1").unwrap().get(PODS), Some(Quantity::from_units(2)));
        assert_eq!(
            agg.resource_quota("ns-1").unwrap().hard.get(PODS),
            Some(Quantity::from_units(1))
        );
        agg.admit("ns-1", &list(&[(PODS, "1")])).unwrap();
        assert!(agg.admit("ns-1", &list(&[(PODS, "1")])).is_err());
    }

    #[test]
    fn override_within_bounds_and_invalid_override() {
        let mut agg = ResourceQuotaAggregator::new();
        agg.apply_quotas(template("p1", "ns-1", existing(&[(PODS, "10")]), existing(&[(PODS, "2")])))
            .unwrap();
        agg.create_namespace("p1", "ns-2").unwrap();

        agg.override_namespace_quota("ns-1", existing(&[(PODS, "6")])).unwrap();
        assert_eq!(agg.namespace_state("ns-1"), Some(NamespaceQuotaState::Overridden));
        assert_eq!(agg.project_allocated("p1").unwrap().get(PODS), Some(Quantity::from_units(8)));

        let err = agg
            .override_namespace_quota("ns-2", existing(&[(PODS, "5")]))
            .unwrap_err();
        assert_eq!(err.code(), QuotaErrorCode::HierarchyViolation);
        assert_eq!(agg.namespace_state("ns-2"), Some(NamespaceQuotaState::Provisioned));
        assert_eq!(
            agg.resource_quota("ns-2").unwrap().hard.get(PODS),
            Some(Quantity::from_units(2))
        );
        assert!(agg
            .validation_status("ns-2")
            .unwrap()
            .contains(EXCEEDS_PROJECT_LIMIT_MESSAGE));
        agg.check_invariants().unwrap();
    }

    #[test]
    fn override_requires_project_quota() {
        let mut agg = ResourceQuotaAggregator::new();
        agg.create_project("p1", None).unwrap();
        agg.create_namespace("p1", "ns-1").unwrap();
        assert_eq!(agg.namespace_state("ns-1"), Some(NamespaceQuotaState::Unset));
        let err = agg
            .override_namespace_quota("ns-1", existing(&[(PODS, "1")]))
            .unwrap_err();
        assert_eq!(err.code(), QuotaErrorCode::NoProjectQuota);
    }

    #[test]
    fn negative_usage_changes_nothing() {
        let mut agg = ResourceQuotaAggregator::new();
        agg.apply_quotas(template("p1", "ns-1", existing(&[(PODS, "4")]), existing(&[(PODS, "2")])))
            .unwrap();
        agg.admit("ns-1", &list(&[(PODS, "1")])).unwrap();

        let err = agg.release("ns-1", &list(&[(PODS, "2")])).unwrap_err();
        assert_eq!(err.code(), QuotaErrorCode::NegativeUsage);
        assert_eq!(agg.namespace_used("ns-1").unwrap().value(PODS), Quantity::from_units(1));
        assert_eq!(agg.project_used("p1").unwrap().value(PODS), Quantity::from_units(1));
    }

    #[test]
    fn removing_project_quota_removes_namespace_quotas() {
        let mut agg = ResourceQuotaAggregator::new();
        agg.apply_quotas(template("p1", "ns-1", existing(&[(PODS, "2")]), existing(&[(PODS, "1")])))
            .unwrap();
        agg.remove_project_quota("p1").unwrap();
        assert_eq!(agg.namespace_state("ns-1"), Some(NamespaceQuotaState::Removed));
        assert!(agg.annotation("ns-1").is_none());
        for _ in 0..5 {
            agg.admit("ns-1", &list(&[(PODS, "1")])).unwrap();
        }
        agg.check_invariants().unwrap();
    }

    #[test]
    fn annotation_is_quota_limit_json() {
        let mut agg = ResourceQuotaAggregator::new();
        agg.apply_quotas(template("p1", "ns-1", existing(&[(PODS, "4")]), existing(&[(PODS, "2")])))
            .unwrap();
        let parsed: QuotaLimit = serde_json::from_str(agg.annotation("ns-1").unwrap()).unwrap();
        assert_eq!(parsed, existing(&[(PODS, "2")]));
    }

    #[test]
    fn invariant_check_detects_drift() {
        let mut agg = ResourceQuotaAggregator::new();
        agg.apply_quotas(template("p1", "ns-1", existing(&[(PODS, "4")]), existing(&[(PODS, "2")])))
            .unwrap();
        agg.check_invariants().unwrap();
        if let Some(p) = agg.projects.get_mut("p1") {
            p.used.insert(PODS, Quantity::from_units(7));
        }
        let err = agg.check_invariants().unwrap_err();
        assert_eq!(err.code(), QuotaErrorCode::InvariantViolation);
    }

    #[test]
    fn invalid_names_and_keys_are_rejected() {
        let mut agg = ResourceQuotaAggregator::new();
        let err = agg.create_project("Not_Valid", None).unwrap_err();
        assert_eq!(err.code(), QuotaErrorCode::InvalidName);

        let err = agg
            .apply_quotas(template("p1", "ns-1", existing(&[("Pods", "2")]), existing(&[])))
            .unwrap_err();
        assert_eq!(err.code(), QuotaErrorCode::InvalidResource);
        assert!(agg.project("p1").is_none());
    }
}
