//! The `ContainerRuntime` contract.
//!
//! The control plane consumes exactly this method set. Drivers are expected
//! to mount (i) the project filesystem read-write at the working dir,
//! (ii) generated runtime config read-only, and (iii) the relay socket
//! directory read-write, as described by the [`ContainerSpec`] mounts.

use std::collections::HashMap;
use std::path::PathBuf;
use std::pin::Pin;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncWrite};

use crate::errors::ContainerError;

/// A bind mount from host to container.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mount {
    /// Host path.
    pub host_path: PathBuf,
    /// Path inside the container.
    pub container_path: PathBuf,
    /// Mounted read-only.
    pub read_only: bool,
}

/// Everything needed to create a container.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ContainerSpec {
    /// Container name; one per project.
    pub name: String,
    /// Image reference.
    pub image: String,
    /// Bind mounts.
    pub mounts: Vec<Mount>,
    /// Environment variables.
    pub env: HashMap<String, String>,
    /// Working directory inside the container.
    pub working_dir: PathBuf,
}

/// Observed container lifecycle state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContainerStatus {
    /// Created but not started.
    Created,
    /// Running.
    Running,
    /// Stopped or exited.
    Stopped,
}

/// Status plus driver detail.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ContainerState {
    /// Lifecycle state.
    pub status: ContainerStatus,
    /// Driver-specific detail (exit code, health), opaque to the core.
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub detail: serde_json::Value,
}

/// A non-interactive exec request.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExecSpec {
    /// Command argv.
    pub command: Vec<String>,
    /// Extra environment for this exec.
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Working directory override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<PathBuf>,
}

/// Captured output of a finished exec.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecOutput {
    /// Process exit code.
    pub exit_code: i32,
    /// Captured stdout.
    pub stdout: String,
    /// Captured stderr.
    pub stderr: String,
}

/// Boxed async writer for interactive stdin.
pub type StdinWriter = Pin<Box<dyn AsyncWrite + Send>>;
/// Boxed async reader for interactive stdout/stderr.
pub type OutputReader = Pin<Box<dyn AsyncRead + Send>>;
/// Boxed future resolving to the process exit code.
pub type WaitHandle =
    Pin<Box<dyn std::future::Future<Output = Result<i32, ContainerError>> + Send>>;

/// Handles for a long-lived in-container process.
pub struct InteractiveExec {
    /// Write end of the process stdin.
    pub stdin: StdinWriter,
    /// Read end of the process stdout.
    pub stdout: OutputReader,
    /// Read end of the process stderr.
    pub stderr: OutputReader,
    /// Resolves when the process exits.
    pub wait: WaitHandle,
}

/// The runtime contract. One implementation per driver; the fake in
/// [`crate::fake`] covers tests.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Create a container from a spec. Idempotent on name conflicts is
    /// driver-defined; callers remove before re-creating.
    async fn create(&self, spec: &ContainerSpec) -> Result<(), ContainerError>;

    /// Start a created container.
    async fn start(&self, name: &str) -> Result<(), ContainerError>;

    /// Stop a running container.
    async fn stop(&self, name: &str) -> Result<(), ContainerError>;

    /// Remove a container.
    async fn remove(&self, name: &str) -> Result<(), ContainerError>;

    /// Run a command to completion and capture output.
    async fn exec(&self, name: &str, spec: &ExecSpec) -> Result<ExecOutput, ContainerError>;

    /// Start a long-lived process with piped stdio.
    async fn exec_interactive(
        &self,
        name: &str,
        spec: &ExecSpec,
    ) -> Result<InteractiveExec, ContainerError>;

    /// Observe container state.
    async fn status(&self, name: &str) -> Result<ContainerState, ContainerError>;

    /// Whether an image exists locally.
    async fn image_exists(&self, image: &str) -> Result<bool, ContainerError>;

    /// Pull an image.
    async fn pull(&self, image: &str) -> Result<(), ContainerError>;

    /// Build an image from a context directory.
    async fn build(&self, image: &str, context_dir: &std::path::Path)
        -> Result<(), ContainerError>;

    /// Driver-specific inspect payload, opaque to the core.
    async fn inspect(&self, name: &str) -> Result<serde_json::Value, ContainerError>;

    /// Recent log lines.
    async fn logs(&self, name: &str, tail: usize) -> Result<String, ContainerError>;

    /// Driver health check.
    async fn ping(&self) -> Result<(), ContainerError>;

    /// Release driver resources.
    async fn close(&self) -> Result<(), ContainerError>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spec_serializes() {
        let spec = ContainerSpec {
            name: "oubliette-proj_a".into(),
            image: "oubliette/base:latest".into(),
            mounts: vec![Mount {
                host_path: "/srv/projects/proj_a".into(),
                container_path: "/workspace".into(),
                read_only: false,
            }],
            env: HashMap::new(),
            working_dir: "/workspace".into(),
        };
        let v = serde_json::to_value(&spec).unwrap();
        assert_eq!(v["name"], "oubliette-proj_a");
        assert_eq!(v["mounts"][0]["read_only"], false);
    }

    #[test]
    fn status_snake_case() {
        assert_eq!(
            serde_json::to_string(&ContainerStatus::Running).unwrap(),
            "\"running\""
        );
    }
}
