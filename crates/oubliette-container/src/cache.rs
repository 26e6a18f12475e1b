//! TTL cache around status reads.
//!
//! Status is the only hot read against the driver, so it is the only thing
//! cached. Every mutating call invalidates the entry for its container.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::errors::ContainerError;
use crate::runtime::{
    ContainerRuntime, ContainerSpec, ContainerState, ExecOutput, ExecSpec, InteractiveExec,
};

struct CacheEntry {
    state: ContainerState,
    fetched_at: Instant,
}

/// Wraps any [`ContainerRuntime`] with a short-TTL status cache.
pub struct CachedRuntime {
    inner: Arc<dyn ContainerRuntime>,
    ttl: Duration,
    cache: Mutex<HashMap<String, CacheEntry>>,
}

impl CachedRuntime {
    /// Wrap a runtime with the default TTL.
    #[must_use]
    pub fn new(inner: Arc<dyn ContainerRuntime>) -> Self {
        Self::with_ttl(
            inner,
            Duration::from_secs(oubliette_core::constants::STATUS_CACHE_TTL_SECS),
        )
    }

    /// Wrap a runtime with an explicit TTL.
    #[must_use]
    pub fn with_ttl(inner: Arc<dyn ContainerRuntime>, ttl: Duration) -> Self {
        Self {
            inner,
            ttl,
            cache: Mutex::new(HashMap::new()),
        }
    }

    fn invalidate(&self, name: &str) {
        let _ = self.cache.lock().remove(name);
    }

    fn cached(&self, name: &str) -> Option<ContainerState> {
        let cache = self.cache.lock();
        let entry = cache.get(name)?;
        (entry.fetched_at.elapsed() < self.ttl).then(|| entry.state.clone())
    }

    fn store(&self, name: &str, state: &ContainerState) {
        let _ = self.cache.lock().insert(
            name.to_owned(),
            CacheEntry {
                state: state.clone(),
                fetched_at: Instant::now(),
            },
        );
    }
}

#[async_trait]
impl ContainerRuntime for CachedRuntime {
    async fn create(&self, spec: &ContainerSpec) -> Result<(), ContainerError> {
        self.invalidate(&spec.name);
        self.inner.create(spec).await
    }

    async fn start(&self, name: &str) -> Result<(), ContainerError> {
        self.invalidate(name);
        self.inner.start(name).await
    }

    async fn stop(&self, name: &str) -> Result<(), ContainerError> {
        self.invalidate(name);
        self.inner.stop(name).await
    }

    async fn remove(&self, name: &str) -> Result<(), ContainerError> {
        self.invalidate(name);
        self.inner.remove(name).await
    }

    async fn exec(&self, name: &str, spec: &ExecSpec) -> Result<ExecOutput, ContainerError> {
        self.inner.exec(name, spec).await
    }

    async fn exec_interactive(
        &self,
        name: &str,
        spec: &ExecSpec,
    ) -> Result<InteractiveExec, ContainerError> {
        self.inner.exec_interactive(name, spec).await
    }

    async fn status(&self, name: &str) -> Result<ContainerState, ContainerError> {
        if let Some(state) = self.cached(name) {
            return Ok(state);
        }
        let state = self.inner.status(name).await?;
        self.store(name, &state);
        Ok(state)
    }

    async fn image_exists(&self, image: &str) -> Result<bool, ContainerError> {
        self.inner.image_exists(image).await
    }

    async fn pull(&self, image: &str) -> Result<(), ContainerError> {
        self.inner.pull(image).await
    }

    async fn build(
        &self,
        image: &str,
        context_dir: &std::path::Path,
    ) -> Result<(), ContainerError> {
        self.inner.build(image, context_dir).await
    }

    async fn inspect(&self, name: &str) -> Result<serde_json::Value, ContainerError> {
        self.inner.inspect(name).await
    }

    async fn logs(&self, name: &str, tail: usize) -> Result<String, ContainerError> {
        self.inner.logs(name, tail).await
    }

    async fn ping(&self) -> Result<(), ContainerError> {
        self.inner.ping().await
    }

    async fn close(&self) -> Result<(), ContainerError> {
        self.inner.close().await
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::FakeRuntime;
    use crate::runtime::ContainerStatus;
    use std::collections::HashMap;

    fn spec(name: &str) -> ContainerSpec {
        ContainerSpec {
            name: name.into(),
            image: "img:latest".into(),
            mounts: Vec::new(),
            env: HashMap::new(),
            working_dir: "/workspace".into(),
        }
    }

    #[tokio::test]
    async fn status_is_cached_within_ttl() {
        let fake = Arc::new(FakeRuntime::new());
        let cached = CachedRuntime::with_ttl(fake.clone(), Duration::from_secs(60));

        cached.create(&spec("c1")).await.unwrap();
        cached.start("c1").await.unwrap();

        let _ = cached.status("c1").await.unwrap();
        let _ = cached.status("c1").await.unwrap();
        let _ = cached.status("c1").await.unwrap();
        assert_eq!(fake.status_calls(), 1);
    }

    #[tokio::test]
    async fn mutating_calls_invalidate() {
        let fake = Arc::new(FakeRuntime::new());
        let cached = CachedRuntime::with_ttl(fake.clone(), Duration::from_secs(60));

        cached.create(&spec("c1")).await.unwrap();
        cached.start("c1").await.unwrap();
        let running = cached.status("c1").await.unwrap();
        assert_eq!(running.status, ContainerStatus::Running);

        cached.stop("c1").await.unwrap();
        let stopped = cached.status("c1").await.unwrap();
        assert_eq!(stopped.status, ContainerStatus::Stopped);
        assert_eq!(fake.status_calls(), 2);
    }

    #[tokio::test]
    async fn ttl_expiry_refetches() {
        let fake = Arc::new(FakeRuntime::new());
        let cached = CachedRuntime::with_ttl(fake.clone(), Duration::from_millis(1));

        cached.create(&spec("c1")).await.unwrap();
        let _ = cached.status("c1").await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        let _ = cached.status("c1").await.unwrap();
        assert_eq!(fake.status_calls(), 2);
    }

    #[tokio::test]
    async fn missing_container_not_cached() {
        let fake = Arc::new(FakeRuntime::new());
        let cached = CachedRuntime::with_ttl(fake.clone(), Duration::from_secs(60));
        assert!(cached.status("ghost").await.is_err());
        assert!(cached.status("ghost").await.is_err());
        assert_eq!(fake.status_calls(), 2);
    }
}
