use anyhow::{Context, Result};
use serde_json::Value;
use std::sync::Arc;

use pkg_poll::PollSpec;
use pkg_state::{ObjectApi, StoredObject};
use pkg_types::object::{ObjectId, ObjectKind};

use crate::config::SuiteConfig;
use crate::session::Session;
use crate::verify;

/// Everything a test case needs: the API it drives, the resolved suite
/// config and the session collecting its cleanups.
#[derive(Clone)]
pub struct TestContext {
    pub api: Arc<dyn ObjectApi>,
    pub config: SuiteConfig,
    pub session: Session,
}

impl TestContext {
    pub fn new(name: &str, api: Arc<dyn ObjectApi>, config: SuiteConfig) -> Self {
        Self {
            api,
            config,
            session: Session::new(name),
        }
    }

    /// A context sharing the API and config, with a child session.
    pub fn child(&self, name: &str) -> Self {
        Self {
            api: self.api.clone(),
            config: self.config.clone(),
            session: self.session.child(name),
        }
    }

    /// Create an object and register its deletion with the session.
    pub async fn create(
        &self,
        kind: ObjectKind,
        namespace: &str,
        name: &str,
        body: Value,
    ) -> Result<StoredObject> {
        let created = self
            .api
            .create(kind, namespace, name, body)
            .await
            .with_context(|| format!("failed to create {} {}/{}", kind, namespace, name))?;
        let api = self.api.clone();
        let id = created.id.clone();
        self.session
            .register(&format!("delete {}", id), move || async move {
                match api.delete(&id).await {
                    Ok(()) => Ok(()),
                    Err(e) if e.is_not_found() => Ok(()),
                    Err(e) => Err(e.into()),
                }
            });
        Ok(created)
    }

    /// Cluster-wide pod readiness with the configured poll settings and
    /// exclusions.
    pub async fn verify_cluster_pods(&self) -> Result<()> {
        verify::verify_cluster_pods(self.api.as_ref(), &self.config.classifier(), &self.config.poll).await
    }

    /// Read-modify-write with the default conflict retry policy.
    pub async fn update<F>(&self, id: &ObjectId, mutate: F) -> Result<StoredObject>
    where
        F: Fn(&mut StoredObject) -> Result<()>,
    {
        verify::update_with_conflict_retry(self.api.as_ref(), id, &PollSpec::conflict_retry(), mutate).await
    }

    /// Wait up to a minute for a deleted object to disappear.
    pub async fn wait_for_deletion(&self, id: &ObjectId) -> Result<()> {
        verify::wait_for_deletion(self.api.as_ref(), id, &PollSpec::deletion()).await
    }
}
