use anyhow::{Context, Result, anyhow};
use tracing::{debug, info};

use pkg_classifier::classify::daemonset_ready;
use pkg_classifier::{NodeRoles, StateClassifier, machines_by_role};
use pkg_constants::labels::MACHINE_NAMESPACE;
use pkg_poll::{ConditionError, PollSpec, poll_until, poll_value};
use pkg_state::{ApiError, ListFilter, ObjectApi, StoredObject};
use pkg_types::object::{ObjectId, ObjectKind, ObservedObject};

fn observe_all(objects: &[StoredObject]) -> Result<Vec<ObservedObject>, ConditionError> {
    objects
        .iter()
        .map(|o| o.observe().map_err(ConditionError::fatal))
        .collect()
}

/// Wait until every pod in the cluster passes readiness.
///
/// List failures are retried. On timeout the error carries the last set of
/// failing pods, keyed `namespace/pod/container`.
pub async fn verify_cluster_pods(
    api: &dyn ObjectApi,
    classifier: &StateClassifier,
    spec: &PollSpec,
) -> Result<()> {
    poll_until("all cluster pods ready", spec, move || async move {
        let pods = api
            .list(ObjectKind::Pod, None, &ListFilter::all())
            .await
            .map_err(ConditionError::retryable)?;
        let bad = classifier.classify(&observe_all(&pods)?);
        if bad.is_empty() {
            info!(pods = pods.len(), "All cluster pods ready");
            return Ok(true);
        }
        debug!(bad = bad.len(), "Pods not ready yet");
        Err(ConditionError::retryable(anyhow!(
            "{} pod(s) not ready: {}",
            bad.len(),
            bad
        )))
    })
    .await
    .context("cluster pods did not become ready")
}

/// Wait until a daemonset has every scheduled pod available.
pub async fn verify_ready_daemonset(
    api: &dyn ObjectApi,
    namespace: &str,
    name: &str,
    spec: &PollSpec,
) -> Result<()> {
    let id = ObjectId::new(ObjectKind::DaemonSet, namespace, name);
    let id = &id;
    poll_until(&format!("daemonset {}/{} ready", namespace, name), spec, move || async move {
        let daemonset = api.get(id).await?.observe().map_err(ConditionError::fatal)?;
        match daemonset_ready(&daemonset) {
            None => Ok(true),
            Some(_) => {
                let counts = daemonset.replicas.unwrap_or_default();
                Err(ConditionError::retryable(anyhow!(
                    "{} of {} pods available",
                    counts.available,
                    counts.desired
                )))
            }
        }
    })
    .await
    .with_context(|| format!("daemonset {}/{} did not become ready", namespace, name))
}

/// Read-modify-write an object, re-reading and retrying whenever the write
/// hits a version conflict. Errors from `mutate` are not retried.
pub async fn update_with_conflict_retry<F>(
    api: &dyn ObjectApi,
    id: &ObjectId,
    spec: &PollSpec,
    mutate: F,
) -> Result<StoredObject>
where
    F: Fn(&mut StoredObject) -> Result<()>,
{
    let mutate = &mutate;
    poll_value(&format!("update of {}", id), spec, move || async move {
        let mut object = api.get(id).await?;
        mutate(&mut object).map_err(ConditionError::Fatal)?;
        match api.update(&object).await {
            Ok(updated) => Ok(Some(updated)),
            Err(e @ ApiError::Conflict { .. }) => {
                debug!(object = %id, error = %e, "Update conflicted, retrying");
                Err(ConditionError::retryable(e))
            }
            Err(e) => Err(e.into()),
        }
    })
    .await
    .with_context(|| format!("failed to update {}", id))
}

/// Wait until an object no longer exists.
pub async fn wait_for_deletion(api: &dyn ObjectApi, id: &ObjectId, spec: &PollSpec) -> Result<()> {
    poll_until(&format!("deletion of {}", id), spec, move || async move {
        match api.get(id).await {
            Err(ApiError::NotFound(_)) => Ok(true),
            Err(e) => Err(e.into()),
            Ok(object) => {
                debug!(object = %id, terminating = object.is_terminating(), "Still present");
                Ok(false)
            }
        }
    })
    .await
    .with_context(|| format!("{} was not deleted", id))
}

/// Machines of `cluster` carrying every role in `roles`.
pub async fn cluster_machines_by_role(
    api: &dyn ObjectApi,
    cluster: &str,
    roles: NodeRoles,
) -> Result<Vec<ObservedObject>> {
    let filter = ListFilter::all().field("spec.clusterName", cluster);
    let machines = api
        .list(ObjectKind::Machine, Some(MACHINE_NAMESPACE), &filter)
        .await
        .with_context(|| format!("failed to list machines of cluster {}", cluster))?;
    let observed = machines
        .iter()
        .map(StoredObject::observe)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(machines_by_role(&observed, roles).into_iter().cloned().collect())
}
