use std::collections::BTreeMap;

use pkg_constants::pods::{HELM_PREFIX, NOT_READY, POD_STATE_ANNOTATION};
use pkg_types::object::{ObjectKind, ObjectState, ObservedObject};
use tracing::debug;

use crate::bad::{BadObject, BadObjectKey, BadObjectSet};

/// Readiness predicate for a non-pod kind: `None` when ready, otherwise the
/// reason to report.
pub type ReadinessCheck = fn(&ObservedObject) -> Option<String>;

/// Name substrings of objects the classifier ignores.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExclusionRules {
    substrings: Vec<String>,
}

impl Default for ExclusionRules {
    fn default() -> Self {
        Self::new([HELM_PREFIX])
    }
}

impl ExclusionRules {
    pub fn new<S: Into<String>>(substrings: impl IntoIterator<Item = S>) -> Self {
        Self {
            substrings: substrings
                .into_iter()
                .map(Into::into)
                .filter(|s: &String| !s.is_empty())
                .collect(),
        }
    }

    pub fn none() -> Self {
        Self {
            substrings: Vec::new(),
        }
    }

    pub fn excludes(&self, name: &str) -> bool {
        self.substrings.iter().any(|s| name.contains(s.as_str()))
    }
}

/// DaemonSet: every scheduled pod is available.
pub fn daemonset_ready(object: &ObservedObject) -> Option<String> {
    match object.replicas {
        Some(r) if r.desired == r.available => None,
        _ => Some(NOT_READY.to_string()),
    }
}

/// Deployment: ready replicas match the desired count.
pub fn deployment_ready(object: &ObservedObject) -> Option<String> {
    match object.replicas {
        Some(r) if r.ready == r.desired => None,
        _ => Some(NOT_READY.to_string()),
    }
}

/// Machines and other kinds: phase is Running or Ready.
pub fn state_ready(object: &ObservedObject) -> Option<String> {
    match &object.state {
        ObjectState::Running | ObjectState::Ready => None,
        other => Some(other.to_string()),
    }
}

/// First container that is not ready, with its reason.
fn pod_failure(pod: &ObservedObject) -> Option<(&str, String)> {
    let container = pod.container_statuses.iter().find(|c| !c.ready)?;
    let reason = container.reason().unwrap_or(NOT_READY).to_string();
    Some((container.name.as_str(), reason))
}

/// Classifies a snapshot of observed objects into the set currently failing
/// readiness. Classification is pure: the result depends only on the
/// snapshot, so a pod that recovers simply drops out of the next result.
#[derive(Debug, Clone)]
pub struct StateClassifier {
    exclusions: ExclusionRules,
    checks: BTreeMap<ObjectKind, ReadinessCheck>,
}

impl Default for StateClassifier {
    fn default() -> Self {
        Self::new(ExclusionRules::default())
    }
}

impl StateClassifier {
    pub fn new(exclusions: ExclusionRules) -> Self {
        let mut checks: BTreeMap<ObjectKind, ReadinessCheck> = BTreeMap::new();
        checks.insert(ObjectKind::DaemonSet, daemonset_ready);
        checks.insert(ObjectKind::Deployment, deployment_ready);
        checks.insert(ObjectKind::Machine, state_ready);
        Self { exclusions, checks }
    }

    /// Replace the readiness predicate for a non-pod kind.
    pub fn with_check(mut self, kind: ObjectKind, check: ReadinessCheck) -> Self {
        self.checks.insert(kind, check);
        self
    }

    pub fn exclusions(&self) -> &ExclusionRules {
        &self.exclusions
    }

    pub fn classify(&self, snapshot: &[ObservedObject]) -> BadObjectSet {
        let mut bad = BadObjectSet::new();
        for object in snapshot {
            if let Some((key, entry)) = self.evaluate(object) {
                bad.insert(key, entry);
            }
        }
        bad
    }

    /// Like [`classify`](Self::classify), and also records each failure
    /// reason in the object's `podState` annotation. Objects that are fine
    /// have a stale annotation removed.
    pub fn classify_annotated(&self, snapshot: &mut [ObservedObject]) -> BadObjectSet {
        let mut bad = BadObjectSet::new();
        for object in snapshot.iter_mut() {
            match self.evaluate(object) {
                Some((key, entry)) => {
                    object
                        .annotations
                        .insert(POD_STATE_ANNOTATION.to_string(), entry.reason.clone());
                    bad.insert(key, entry);
                }
                None => {
                    object.annotations.remove(POD_STATE_ANNOTATION);
                }
            }
        }
        bad
    }

    fn evaluate(&self, object: &ObservedObject) -> Option<(BadObjectKey, BadObject)> {
        if self.exclusions.excludes(object.name()) {
            debug!(object = %object.id, "Skipping excluded object");
            return None;
        }

        let (container, reason) = match object.kind() {
            ObjectKind::Pod => {
                let (container, reason) = pod_failure(object)?;
                (Some(container), reason)
            }
            kind => {
                let check = self.checks.get(&kind).copied().unwrap_or(state_ready);
                (None, check(object)?)
            }
        };

        debug!(object = %object.id, reason = %reason, "Object not ready");
        Some((
            BadObjectKey::new(object.namespace(), object.name(), container),
            BadObject {
                kind: object.kind(),
                reason,
                images: object.images(),
            },
        ))
    }
}
