//! In-memory runtime for tests and local development.
//!
//! Tracks container lifecycle in a map, records call counts, and returns
//! scripted exec output. `exec_interactive` wires duplex pipes so callers
//! can drive a fake in-container process.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::errors::ContainerError;
use crate::runtime::{
    ContainerRuntime, ContainerSpec, ContainerState, ContainerStatus, ExecOutput, ExecSpec,
    InteractiveExec,
};

#[derive(Clone)]
struct FakeContainer {
    spec: ContainerSpec,
    status: ContainerStatus,
}

/// In-memory [`ContainerRuntime`].
#[derive(Default)]
pub struct FakeRuntime {
    containers: Mutex<HashMap<String, FakeContainer>>,
    images: Mutex<Vec<String>>,
    exec_script: Mutex<HashMap<String, ExecOutput>>,
    status_calls: AtomicUsize,
    pull_calls: AtomicUsize,
    unavailable: Mutex<bool>,
}

impl FakeRuntime {
    /// Create an empty fake.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Script the output for a command (matched on argv[0]).
    pub fn script_exec(&self, command: &str, output: ExecOutput) {
        let _ = self.exec_script.lock().insert(command.to_owned(), output);
    }

    /// Pretend the daemon is down; every call fails `Unavailable`.
    pub fn set_unavailable(&self, down: bool) {
        *self.unavailable.lock() = down;
    }

    /// Number of `status` calls that reached the fake (not the cache).
    pub fn status_calls(&self) -> usize {
        self.status_calls.load(Ordering::SeqCst)
    }

    /// Number of `pull` calls.
    pub fn pull_calls(&self) -> usize {
        self.pull_calls.load(Ordering::SeqCst)
    }

    /// Mark an image as present.
    pub fn add_image(&self, image: &str) {
        self.images.lock().push(image.to_owned());
    }

    /// The spec a container was created with.
    pub fn spec_of(&self, name: &str) -> Option<ContainerSpec> {
        self.containers.lock().get(name).map(|c| c.spec.clone())
    }

    fn check_up(&self) -> Result<(), ContainerError> {
        if *self.unavailable.lock() {
            return Err(ContainerError::Unavailable("fake daemon down".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn create(&self, spec: &ContainerSpec) -> Result<(), ContainerError> {
        self.check_up()?;
        let _ = self.containers.lock().insert(
            spec.name.clone(),
            FakeContainer {
                spec: spec.clone(),
                status: ContainerStatus::Created,
            },
        );
        Ok(())
    }

    async fn start(&self, name: &str) -> Result<(), ContainerError> {
        self.check_up()?;
        let mut containers = self.containers.lock();
        let container = containers
            .get_mut(name)
            .ok_or_else(|| ContainerError::NotFound(name.to_owned()))?;
        container.status = ContainerStatus::Running;
        Ok(())
    }

    async fn stop(&self, name: &str) -> Result<(), ContainerError> {
        self.check_up()?;
        let mut containers = self.containers.lock();
        let container = containers
            .get_mut(name)
            .ok_or_else(|| ContainerError::NotFound(name.to_owned()))?;
        container.status = ContainerStatus::Stopped;
        Ok(())
    }

    async fn remove(&self, name: &str) -> Result<(), ContainerError> {
        self.check_up()?;
        let removed = self.containers.lock().remove(name);
        if removed.is_none() {
            return Err(ContainerError::NotFound(name.to_owned()));
        }
        Ok(())
    }

    async fn exec(&self, name: &str, spec: &ExecSpec) -> Result<ExecOutput, ContainerError> {
        self.check_up()?;
        if !self.containers.lock().contains_key(name) {
            return Err(ContainerError::NotFound(name.to_owned()));
        }
        let argv0 = spec.command.first().cloned().unwrap_or_default();
        Ok(self
            .exec_script
            .lock()
            .get(&argv0)
            .cloned()
            .unwrap_or(ExecOutput {
                exit_code: 0,
                stdout: String::new(),
                stderr: String::new(),
            }))
    }

    async fn exec_interactive(
        &self,
        name: &str,
        _spec: &ExecSpec,
    ) -> Result<InteractiveExec, ContainerError> {
        self.check_up()?;
        if !self.containers.lock().contains_key(name) {
            return Err(ContainerError::NotFound(name.to_owned()));
        }
        let (stdin_w, _stdin_r) = tokio::io::duplex(4096);
        let (_out_w, out_r) = tokio::io::duplex(4096);
        let (_err_w, err_r) = tokio::io::duplex(4096);
        Ok(InteractiveExec {
            stdin: Box::pin(stdin_w),
            stdout: Box::pin(out_r),
            stderr: Box::pin(err_r),
            wait: Box::pin(async { Ok(0) }),
        })
    }

    async fn status(&self, name: &str) -> Result<ContainerState, ContainerError> {
        self.check_up()?;
        let _ = self.status_calls.fetch_add(1, Ordering::SeqCst);
        let containers = self.containers.lock();
        let container = containers
            .get(name)
            .ok_or_else(|| ContainerError::NotFound(name.to_owned()))?;
        Ok(ContainerState {
            status: container.status,
            detail: serde_json::Value::Null,
        })
    }

    async fn image_exists(&self, image: &str) -> Result<bool, ContainerError> {
        self.check_up()?;
        Ok(self.images.lock().iter().any(|i| i == image))
    }

    async fn pull(&self, image: &str) -> Result<(), ContainerError> {
        self.check_up()?;
        let _ = self.pull_calls.fetch_add(1, Ordering::SeqCst);
        self.add_image(image);
        Ok(())
    }

    async fn build(
        &self,
        image: &str,
        _context_dir: &std::path::Path,
    ) -> Result<(), ContainerError> {
        self.check_up()?;
        self.add_image(image);
        Ok(())
    }

    async fn inspect(&self, name: &str) -> Result<serde_json::Value, ContainerError> {
        self.check_up()?;
        let containers = self.containers.lock();
        let container = containers
            .get(name)
            .ok_or_else(|| ContainerError::NotFound(name.to_owned()))?;
        Ok(serde_json::json!({
            "name": name,
            "image": container.spec.image,
            "status": container.status,
        }))
    }

    async fn logs(&self, name: &str, _tail: usize) -> Result<String, ContainerError> {
        self.check_up()?;
        if !self.containers.lock().contains_key(name) {
            return Err(ContainerError::NotFound(name.to_owned()));
        }
        Ok(String::new())
    }

    async fn ping(&self) -> Result<(), ContainerError> {
        self.check_up()
    }

    async fn close(&self) -> Result<(), ContainerError> {
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
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
    async fn lifecycle() {
        let rt = FakeRuntime::new();
        rt.create(&spec("c1")).await.unwrap();
        assert_eq!(rt.status("c1").await.unwrap().status, ContainerStatus::Created);

        rt.start("c1").await.unwrap();
        assert_eq!(rt.status("c1").await.unwrap().status, ContainerStatus::Running);

        rt.stop("c1").await.unwrap();
        assert_eq!(rt.status("c1").await.unwrap().status, ContainerStatus::Stopped);

        rt.remove("c1").await.unwrap();
        assert_matches!(rt.status("c1").await.unwrap_err(), ContainerError::NotFound(_));
    }

    #[tokio::test]
    async fn scripted_exec() {
        let rt = FakeRuntime::new();
        rt.create(&spec("c1")).await.unwrap();
        rt.script_exec(
            "echo",
            ExecOutput {
                exit_code: 0,
                stdout: "hello\n".into(),
                stderr: String::new(),
            },
        );
        let out = rt
            .exec(
                "c1",
                &ExecSpec {
                    command: vec!["echo".into(), "hello".into()],
                    env: HashMap::new(),
                    working_dir: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(out.stdout, "hello\n");
    }

    #[tokio::test]
    async fn unavailable_mode() {
        let rt = FakeRuntime::new();
        rt.set_unavailable(true);
        assert_matches!(rt.ping().await.unwrap_err(), ContainerError::Unavailable(_));
        rt.set_unavailable(false);
        assert!(rt.ping().await.is_ok());
    }

    #[tokio::test]
    async fn pull_adds_image() {
        let rt = FakeRuntime::new();
        assert!(!rt.image_exists("img:latest").await.unwrap());
        rt.pull("img:latest").await.unwrap();
        assert!(rt.image_exists("img:latest").await.unwrap());
        assert_eq!(rt.pull_calls(), 1);
    }
}
