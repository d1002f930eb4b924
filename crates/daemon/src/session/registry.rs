//! Registry of live sessions keyed by client-supplied identifier.
//!
//! The registry is the only place sessions are created or destroyed. A
//! single lock covers lookup, construction and insertion, so concurrent
//! requests for the same unseen identifier spawn exactly one backend.
//! Construction runs on the blocking pool since spawning a process forks.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;

use super::backend::{BackendFactory, SessionError, SessionId};
use super::handle::Session;

/// Map of session identifier to session.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<SessionId, Arc<Session>>>,
}

impl SessionRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the session for `id`, creating it with `factory` if absent.
    ///
    /// If the factory fails the error is returned and nothing is registered.
    pub async fn get_or_create(
        &self,
        id: &str,
        factory: Arc<dyn BackendFactory>,
    ) -> Result<Arc<Session>, SessionError> {
        let mut sessions = self.sessions.lock().await;

        if let Some(session) = sessions.get(id) {
            tracing::debug!(session_id = %id, "Attaching to existing session");
            return Ok(Arc::clone(session));
        }

        let backend = tokio::task::spawn_blocking(move || factory.create())
            .await
            .map_err(|e| SessionError::SpawnFailed(e.to_string()))??;
        let session = Arc::new(Session::new(id.to_string(), backend));
        sessions.insert(id.to_string(), Arc::clone(&session));

        tracing::info!(session_id = %id, "Created new session");
        Ok(session)
    }

    /// Returns the session for `id`, if registered.
    pub async fn get(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions.lock().await.get(id).cloned()
    }

    /// Checks whether a session is registered under `id`.
    pub async fn has(&self, id: &str) -> bool {
        self.sessions.lock().await.contains_key(id)
    }

    /// Closes and unregisters the session for `id`. Absent ids are a no-op.
    pub async fn remove(&self, id: &str) -> Result<(), SessionError> {
        let mut sessions = self.sessions.lock().await;

        let Some(session) = sessions.remove(id) else {
            tracing::debug!(session_id = %id, "Remove requested for unknown session");
            return Ok(());
        };

        let result = session.close().await;
        match &result {
            Ok(()) => tracing::info!(session_id = %id, "Removed session"),
            Err(e) => tracing::warn!(session_id = %id, error = %e, "Removed session, close failed"),
        }
        result
    }

    /// Returns the number of registered sessions.
    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.lock().await.is_empty()
    }

    /// Returns a snapshot of the registered identifiers.
    pub async fn ids(&self) -> Vec<SessionId> {
        self.sessions.lock().await.keys().cloned().collect()
    }

    /// Unregisters and closes every session.
    pub async fn shutdown(&self) {
        let mut sessions = self.sessions.lock().await;
        let count = sessions.len();

        for (id, session) in sessions.drain() {
            if let Err(e) = session.close().await {
                tracing::warn!(session_id = %id, error = %e, "Failed to close session on shutdown");
            }
        }

        tracing::info!(count, "Session registry shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::backend::Backend;
    use crate::session::testing::MockBackend;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn mock_factory(calls: Arc<AtomicUsize>) -> Arc<dyn BackendFactory> {
        Arc::new(move || -> Result<Box<dyn Backend>, SessionError> {
            calls.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(10));
            Ok(Box::new(MockBackend::new()))
        })
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_get_or_create_spawns_once() {
        let registry = Arc::new(SessionRegistry::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let factory = mock_factory(Arc::clone(&calls));

        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let registry = Arc::clone(&registry);
                let factory = Arc::clone(&factory);
                tokio::spawn(async move { registry.get_or_create("shared", factory).await })
            })
            .collect();

        let mut sessions = Vec::new();
        for task in tasks {
            sessions.push(task.await.unwrap().unwrap());
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(sessions.iter().all(|s| Arc::ptr_eq(s, &sessions[0])));
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_slow_factory_does_not_stall_runtime() {
        let registry = SessionRegistry::new();
        let slow: Arc<dyn BackendFactory> =
            Arc::new(|| -> Result<Box<dyn Backend>, SessionError> {
                std::thread::sleep(Duration::from_millis(200));
                Ok(Box::new(MockBackend::new()))
            });

        // Single-threaded runtime: the ticker only runs if the worker is free.
        let ticks = Arc::new(AtomicUsize::new(0));
        let ticker = {
            let ticks = Arc::clone(&ticks);
            tokio::spawn(async move {
                loop {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    ticks.fetch_add(1, Ordering::SeqCst);
                }
            })
        };

        registry.get_or_create("slow", slow).await.unwrap();
        ticker.abort();
        assert!(ticks.load(Ordering::SeqCst) >= 5);
    }

    #[tokio::test]
    async fn test_factory_failure_registers_nothing() {
        let registry = SessionRegistry::new();
        let failing: Arc<dyn BackendFactory> =
            Arc::new(|| -> Result<Box<dyn Backend>, SessionError> {
                Err(SessionError::SpawnFailed("boom".to_string()))
            });

        let err = registry.get_or_create("a", failing).await.unwrap_err();
        assert!(matches!(err, SessionError::SpawnFailed(_)));
        assert!(!registry.has("a").await);
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_remove_unknown_is_noop() {
        let registry = SessionRegistry::new();
        let calls = Arc::new(AtomicUsize::new(0));
        registry
            .get_or_create("kept", mock_factory(calls))
            .await
            .unwrap();

        registry.remove("missing").await.unwrap();
        assert_eq!(registry.ids().await, vec!["kept".to_string()]);
    }

    #[tokio::test]
    async fn test_remove_closes_backend() {
        let registry = SessionRegistry::new();
        let backend = MockBackend::new();
        let closes = Arc::clone(&backend.close_calls);
        let exited = backend.exit_token();
        let slot = std::sync::Mutex::new(Some(backend));
        let factory: Arc<dyn BackendFactory> =
            Arc::new(move || -> Result<Box<dyn Backend>, SessionError> {
                let backend = slot.lock().unwrap().take().unwrap();
                Ok(Box::new(backend))
            });

        let session = registry.get_or_create("a", factory).await.unwrap();
        registry.remove("a").await.unwrap();

        assert!(!registry.has("a").await);
        assert_eq!(closes.load(Ordering::SeqCst), 1);
        assert!(exited.is_cancelled());
        assert!(session.is_terminated());
    }

    #[tokio::test]
    async fn test_get_returns_same_session() {
        let registry = SessionRegistry::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let factory = mock_factory(Arc::clone(&calls));

        let first = registry
            .get_or_create("a", Arc::clone(&factory))
            .await
            .unwrap();
        let second = registry.get_or_create("a", factory).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert!(Arc::ptr_eq(&first, &registry.get("a").await.unwrap()));
        assert!(registry.get("b").await.is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_shutdown_closes_all() {
        let registry = SessionRegistry::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let factory = mock_factory(calls);

        let a = registry
            .get_or_create("a", Arc::clone(&factory))
            .await
            .unwrap();
        let b = registry.get_or_create("b", factory).await.unwrap();
        registry.shutdown().await;

        assert!(registry.is_empty().await);
        assert!(a.is_terminated());
        assert!(b.is_terminated());
    }
}
