use anyhow::{Result, anyhow};
use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};

type Cleanup = Box<dyn FnOnce() -> BoxFuture<'static, Result<()>> + Send>;

struct SessionInner {
    name: String,
    cleanups: Mutex<Vec<(String, Cleanup)>>,
}

/// Cleanup registry for one test. Release callbacks run in reverse
/// registration order when the session's [`scope`](Session::scope) ends.
///
/// Cloning yields a handle to the same session.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl Session {
    pub fn new(name: &str) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                name: name.to_string(),
                cleanups: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    fn cleanups(&self) -> MutexGuard<'_, Vec<(String, Cleanup)>> {
        // A panicking cleanup must not stop the rest from running.
        self.inner
            .cleanups
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register a release callback, e.g. deleting an object the test created.
    pub fn register<F, Fut>(&self, what: &str, cleanup: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        debug!(session = %self.name(), cleanup = %what, "Registered cleanup");
        self.cleanups()
            .push((what.to_string(), Box::new(move || cleanup().boxed())));
    }

    pub fn pending(&self) -> usize {
        self.cleanups().len()
    }

    /// A nested session. Its cleanups run when its own scope ends, and at
    /// the latest just before the parent runs the cleanups registered
    /// before the child was created.
    pub fn child(&self, name: &str) -> Session {
        let child = Session::new(&format!("{}/{}", self.name(), name));
        let handle = child.clone();
        self.register(&format!("session {}", child.name()), move || async move {
            handle.cleanup().await
        });
        child
    }

    /// Run every pending cleanup, newest first. All cleanups run even when
    /// some fail; the failures are reported together.
    pub async fn cleanup(&self) -> Result<()> {
        let pending = std::mem::take(&mut *self.cleanups());
        if pending.is_empty() {
            return Ok(());
        }
        info!(session = %self.name(), count = pending.len(), "Running cleanups");

        let mut failures = Vec::new();
        for (what, cleanup) in pending.into_iter().rev() {
            match AssertUnwindSafe(cleanup()).catch_unwind().await {
                Ok(Ok(())) => debug!(session = %self.name(), cleanup = %what, "Cleanup done"),
                Ok(Err(e)) => {
                    warn!(session = %self.name(), cleanup = %what, error = %e, "Cleanup failed");
                    failures.push(format!("{}: {:#}", what, e));
                }
                Err(_) => {
                    warn!(session = %self.name(), cleanup = %what, "Cleanup panicked");
                    failures.push(format!("{}: panicked", what));
                }
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(anyhow!(
                "session {}: {} cleanup(s) failed: {}",
                self.name(),
                failures.len(),
                failures.join("; ")
            ))
        }
    }

    /// Run `body`, then the session's cleanups, whether `body` succeeded,
    /// failed or panicked. A panic is resumed after cleanup. The body's
    /// error wins over a cleanup error.
    pub async fn scope<T, F, Fut>(&self, body: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let outcome = AssertUnwindSafe(body()).catch_unwind().await;
        let cleaned = self.cleanup().await;
        match outcome {
            Ok(Ok(value)) => cleaned.map(|()| value),
            Ok(Err(e)) => {
                if let Err(cleanup_err) = cleaned {
                    warn!(session = %self.name(), error = %cleanup_err, "Cleanup failed after test error");
                }
                Err(e)
            }
            Err(panic) => {
                if let Err(cleanup_err) = cleaned {
                    warn!(session = %self.name(), error = %cleanup_err, "Cleanup failed after panic");
                }
                std::panic::resume_unwind(panic)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::bail;

    fn recorder() -> (Arc<Mutex<Vec<String>>>, impl Fn(&Session, &str)) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = log.clone();
        let register = move |session: &Session, what: &str| {
            let sink = sink.clone();
            let what = what.to_string();
            session.register(&what.clone(), move || async move {
                sink.lock().unwrap().push(what);
                Ok(())
            });
        };
        (log, register)
    }

    #[tokio::test]
    async fn cleanups_run_in_reverse_order() {
        let (log, register) = recorder();
        let session = Session::new("test");
        session
            .scope(|| async {
                register(&session, "project");
                register(&session, "namespace");
                Ok(())
            })
            .await
            .unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["namespace", "project"]);
        assert_eq!(session.pending(), 0);
    }

    #[tokio::test]
    async fn cleanups_run_on_error() {
        let (log, register) = recorder();
        let session = Session::new("test");
        let err = session
            .scope(|| async {
                register(&session, "cluster");
                Err::<(), _>(anyhow!("assertion failed"))
            })
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "assertion failed");
        assert_eq!(*log.lock().unwrap(), vec!["cluster"]);
    }

    #[tokio::test]
    async fn cleanups_run_on_panic() {
        let (log, register) = recorder();
        let session = Session::new("test");
        let inner = session.clone();
        let result = tokio::spawn(async move {
            inner
                .scope(|| async {
                    register(&inner, "chart");
                    if inner.pending() > 0 {
                        panic!("boom");
                    }
                    Ok::<(), anyhow::Error>(())
                })
                .await
        })
        .await;
        assert!(result.unwrap_err().is_panic());
        assert_eq!(*log.lock().unwrap(), vec!["chart"]);
    }

    #[tokio::test]
    async fn child_cleans_up_before_parent() {
        let (log, register) = recorder();
        let parent = Session::new("parent");
        parent
            .scope(|| async {
                register(&parent, "parent-first");
                let child = parent.child("child");
                register(&child, "child-resource");
                register(&parent, "parent-last");
                Ok(())
            })
            .await
            .unwrap();
        assert_eq!(
            *log.lock().unwrap(),
            vec!["parent-last", "child-resource", "parent-first"]
        );
    }

    #[tokio::test]
    async fn failing_cleanup_does_not_stop_the_rest() {
        let (log, register) = recorder();
        let session = Session::new("test");
        register(&session, "first");
        session.register("broken", || async { bail!("api unavailable") });
        register(&session, "last");

        let err = session.cleanup().await.unwrap_err();
        assert!(err.to_string().contains("broken: api unavailable"));
        assert_eq!(*log.lock().unwrap(), vec!["last", "first"]);
    }
}
