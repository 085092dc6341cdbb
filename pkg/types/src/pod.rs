use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::fields::{self, FieldError};
use crate::quota::{Quantity, QuantityError, ResourceList};

// --- Container state ---

/// State of one container as last reported by the kubelet.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum ContainerState {
    Waiting { reason: Option<String> },
    Running,
    Terminated {
        reason: Option<String>,
        exit_code: Option<i64>,
    },
    Unknown,
}

impl ContainerState {
    /// Parse the `state` object of a container status. Exactly one of
    /// `waiting`, `running`, `terminated` is expected; `waiting` wins if the
    /// API reports more than one.
    pub fn from_value(state: Option<&Value>) -> Result<Self, FieldError> {
        let Some(state) = state else {
            return Ok(ContainerState::Unknown);
        };
        if fields::get_object(state, "waiting")?.is_some() {
            let reason = fields::get_str(state, "waiting.reason")?.map(str::to_string);
            return Ok(ContainerState::Waiting { reason });
        }
        if fields::get_object(state, "terminated")?.is_some() {
            let reason = fields::get_str(state, "terminated.reason")?.map(str::to_string);
            let exit_code = match fields::lookup(state, "terminated.exitCode")? {
                None => None,
                Some(Value::Number(n)) => n.as_i64(),
                Some(_) => {
                    return Err(FieldError::WrongType {
                        path: "terminated.exitCode".to_string(),
                        expected: "an integer",
                        found: "a non-number",
                    });
                }
            };
            return Ok(ContainerState::Terminated { reason, exit_code });
        }
        if fields::get_object(state, "running")?.is_some() {
            return Ok(ContainerState::Running);
        }
        Ok(ContainerState::Unknown)
    }
}

// --- Container status ---

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ContainerStatus {
    pub name: String,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub ready: bool,
    pub state: ContainerState,
}

impl ContainerStatus {
    pub fn from_value(value: &Value) -> Result<Self, FieldError> {
        Ok(Self {
            name: fields::require_str(value, "name")?.to_string(),
            image: fields::get_str(value, "image")?
                .filter(|s| !s.is_empty())
                .map(str::to_string),
            ready: fields::get_bool(value, "ready")?.unwrap_or(false),
            state: ContainerState::from_value(fields::lookup(value, "state")?)?,
        })
    }

    /// Most specific reason for a container that is not ready: a waiting
    /// reason, then a terminated reason. Empty reasons do not count.
    pub fn reason(&self) -> Option<&str> {
        match &self.state {
            ContainerState::Waiting { reason } | ContainerState::Terminated { reason, .. } => {
                reason.as_deref().filter(|r| !r.is_empty())
            }
            _ => None,
        }
    }
}

// --- Pod resources ---

/// Requests and limits of a workload keyed by bare resource name
/// (`ephemeral-storage`, `cpu`, `memory`).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PodResources {
    #[serde(default)]
    pub requests: BTreeMap<String, Quantity>,
    #[serde(default)]
    pub limits: BTreeMap<String, Quantity>,
}

impl PodResources {
    pub fn parse(
        requests: &BTreeMap<String, String>,
        limits: &BTreeMap<String, String>,
    ) -> Result<Self, QuantityError> {
        let parse = |m: &BTreeMap<String, String>| -> Result<BTreeMap<String, Quantity>, QuantityError> {
            m.iter()
                .map(|(k, v)| Ok((k.clone(), v.parse::<Quantity>()?)))
                .collect()
        };
        Ok(Self {
            requests: parse(requests)?,
            limits: parse(limits)?,
        })
    }

    /// Quota usage charged for one pod with these resources: one `pods`
    /// count plus a `requests.<name>` / `limits.<name>` entry per resource.
    pub fn consumption(&self) -> ResourceList {
        let mut list = ResourceList::new();
        list.insert(pkg_constants::quota::PODS, Quantity::from_units(1));
        for (name, q) in &self.requests {
            list.insert(&format!("{}{}", pkg_constants::quota::REQUESTS_PREFIX, name), *q);
        }
        for (name, q) in &self.limits {
            list.insert(&format!("{}{}", pkg_constants::quota::LIMITS_PREFIX, name), *q);
        }
        list
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn waiting_reason_is_preferred() {
        let cs = ContainerStatus::from_value(&json!({
            "name": "app",
            "image": "nginx:1.27",
            "ready": false,
            "state": {"waiting": {"reason": "ImagePullBackOff"}}
        }))
        .unwrap();
        assert_eq!(cs.reason(), Some("ImagePullBackOff"));
        assert_eq!(cs.image.as_deref(), Some("nginx:1.27"));
    }

    #[test]
    fn terminated_reason_and_exit_code() {
        let cs = ContainerStatus::from_value(&json!({
            "name": "job",
            "state": {"terminated": {"reason": "Error", "exitCode": 137}}
        }))
        .unwrap();
        assert_eq!(
            cs.state,
            ContainerState::Terminated {
                reason: Some("Error".to_string()),
                exit_code: Some(137)
            }
        );
        assert_eq!(cs.reason(), Some("Error"));
        assert!(!cs.ready);
    }

    #[test]
    fn empty_reason_is_no_reason() {
        let cs = ContainerStatus::from_value(&json!({
            "name": "app",
            "state": {"waiting": {"reason": ""}}
        }))
        .unwrap();
        assert_eq!(cs.reason(), None);
    }

    #[test]
    fn malformed_ready_flag_is_rejected() {
        let err = ContainerStatus::from_value(&json!({"name": "app", "ready": "yes"}));
        assert!(err.is_err());
    }

    #[test]
    fn consumption_counts_pod_and_resources() {
        let requests = BTreeMap::from([("ephemeral-storage".to_string(), "60Mi".to_string())]);
        let limits = BTreeMap::from([("ephemeral-storage".to_string(), "120Mi".to_string())]);
        let res = PodResources::parse(&requests, &limits).unwrap();
        let used = res.consumption();
        assert_eq!(used.get("pods"), Some(Quantity::from_units(1)));
        assert_eq!(
            used.get("requests.ephemeral-storage"),
            Some("60Mi".parse().unwrap())
        );
        assert_eq!(
            used.get("limits.ephemeral-storage"),
            Some("120Mi".parse().unwrap())
        );
    }
}
