use anyhow::{Context, Result};
use tracing::info;

use pkg_poll::{ConditionError, PollSpec, poll_until, poll_value};
use pkg_state::{ChartInstaller, ChartSpec, ClusterHandle, ClusterProvisioner, RoleDelta};

/// Install a chart and wait until its deployments are ready.
pub async fn install_chart_and_wait(
    installer: &dyn ChartInstaller,
    chart: &ChartSpec,
    spec: &PollSpec,
) -> Result<()> {
    installer
        .install(chart)
        .await
        .with_context(|| format!("failed to install chart {}", chart.name))?;
    let name = chart.name.as_str();
    poll_until(&format!("chart {} ready", name), spec, move || async move {
        Ok(installer.is_ready(name).await?)
    })
    .await
    .with_context(|| format!("chart {} did not become ready", name))?;
    info!(chart = %name, "Chart ready");
    Ok(())
}

/// Scale one machine pool and wait until the cluster reports `expected_ready`
/// booted machines.
pub async fn scale_and_wait(
    provisioner: &dyn ClusterProvisioner,
    handle: &ClusterHandle,
    delta: &RoleDelta,
    expected_ready: usize,
    spec: &PollSpec,
) -> Result<ClusterHandle> {
    let scaled = provisioner
        .scale(handle, delta)
        .await
        .with_context(|| format!("failed to scale pool {} of {}", delta.pool, handle.name))?;
    let target = &scaled;
    let nodes = poll_value(
        &format!("{} ready nodes in {}", expected_ready, scaled.name),
        spec,
        move || async move {
            let ready = provisioner.ready_nodes(target).await.map_err(ConditionError::from)?;
            Ok((ready.len() == expected_ready).then_some(ready.len()))
        },
    )
    .await
    .with_context(|| format!("cluster {} did not settle after scaling", scaled.name))?;
    info!(cluster = %scaled.name, generation = scaled.generation, nodes, "Cluster scaled and ready");
    Ok(scaled)
}
