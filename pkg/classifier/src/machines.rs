use serde::{Deserialize, Serialize};
use std::str::FromStr;

use pkg_constants::labels::{CONTROL_PLANE_ROLE_LABEL, ETCD_ROLE_LABEL, WORKER_ROLE_LABEL};
use pkg_types::object::{ObjectKind, ObservedObject};

/// Roles a machine must carry. Unset roles are not checked.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeRoles {
    #[serde(default)]
    pub etcd: bool,
    #[serde(default)]
    pub control_plane: bool,
    #[serde(default)]
    pub worker: bool,
}

impl FromStr for NodeRoles {
    type Err = String;

    /// Comma-separated role names, e.g. `etcd,controlplane`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut roles = NodeRoles::default();
        for role in s.split(',').map(str::trim).filter(|r| !r.is_empty()) {
            match role {
                "etcd" => roles.etcd = true,
                "controlplane" | "control-plane" => roles.control_plane = true,
                "worker" => roles.worker = true,
                other => return Err(format!("unknown node role '{}'", other)),
            }
        }
        Ok(roles)
    }
}

fn has_role(machine: &ObservedObject, label: &str) -> bool {
    machine.labels.get(label).is_some_and(|v| v == "true")
}

/// Machines carrying every requested role label set to `"true"`.
/// Unlabelled machines never match.
pub fn machines_by_role(machines: &[ObservedObject], roles: NodeRoles) -> Vec<&ObservedObject> {
    machines
        .iter()
        .filter(|m| m.kind() == ObjectKind::Machine && !m.labels.is_empty())
        .filter(|m| !roles.etcd || has_role(m, ETCD_ROLE_LABEL))
        .filter(|m| !roles.control_plane || has_role(m, CONTROL_PLANE_ROLE_LABEL))
        .filter(|m| !roles.worker || has_role(m, WORKER_ROLE_LABEL))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pkg_types::object::{ObjectId, ObjectState};

    fn make_machine(name: &str, labels: &[&str]) -> ObservedObject {
        let mut m = ObservedObject::new(
            ObjectId::new(ObjectKind::Machine, "fleet-default", name),
            ObjectState::Running,
        );
        for label in labels {
            m.labels.insert(label.to_string(), "true".to_string());
        }
        m
    }

    #[test]
    fn filters_by_role() {
        let machines = vec![
            make_machine("etcd-cp-1", &[ETCD_ROLE_LABEL, CONTROL_PLANE_ROLE_LABEL]),
            make_machine("etcd-1", &[ETCD_ROLE_LABEL]),
            make_machine("worker-1", &[WORKER_ROLE_LABEL]),
            make_machine("bare", &[]),
        ];
        let names = |roles: NodeRoles| -> Vec<String> {
            machines_by_role(&machines, roles)
                .into_iter()
                .map(|m| m.name().to_string())
                .collect()
        };
        assert_eq!(names("etcd".parse().unwrap()), vec!["etcd-cp-1", "etcd-1"]);
        assert_eq!(names("etcd,controlplane".parse().unwrap()), vec!["etcd-cp-1"]);
        assert_eq!(names("worker".parse().unwrap()), vec!["worker-1"]);
        assert_eq!(names(NodeRoles::default()).len(), 3);
    }

    #[test]
    fn label_must_be_true() {
        let mut m = make_machine("w", &[]);
        m.labels.insert(WORKER_ROLE_LABEL.to_string(), "false".to_string());
        let roles = NodeRoles {
            worker: true,
            ..Default::default()
        };
        assert!(machines_by_role(&[m], roles).is_empty());
    }

    #[test]
    fn unknown_role_is_rejected() {
        assert!("etcd,gpu".parse::<NodeRoles>().is_err());
    }
}
