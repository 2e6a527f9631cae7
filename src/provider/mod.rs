//! Worker provisioning seam.
//!
//! A [`Provider`] brings remote workers up and down and exposes the
//! minimal observation/file-exchange surface the rest of the system
//! needs. The rest of the crate only ever talks to `dyn Provider`, so a
//! Docker daemon ([`docker::DockerProvider`]), a cloud API, or an
//! in-memory mock can back the same pools.

pub mod docker;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ProvisionError;

pub use docker::DockerProvider;

/// Lifecycle status of one remote worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    /// Requested but not yet being set up.
    Pending,
    /// Being set up, not yet able to serve.
    Starting,
    /// Ready to serve requests.
    Running,
    /// Died or became unreachable.
    Failed,
    /// Deliberately shut down.
    Stopped,
}

impl WorkerStatus {
    /// Returns whether the worker is expected to become `Running`
    /// without intervention.
    pub fn is_transitional(self) -> bool {
        matches!(self, WorkerStatus::Pending | WorkerStatus::Starting)
    }

    /// Returns whether the worker is gone for good.
    pub fn is_terminal(self) -> bool {
        matches!(self, WorkerStatus::Failed | WorkerStatus::Stopped)
    }
}

impl std::fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkerStatus::Pending => write!(f, "pending"),
            WorkerStatus::Starting => write!(f, "starting"),
            WorkerStatus::Running => write!(f, "running"),
            WorkerStatus::Failed => write!(f, "failed"),
            WorkerStatus::Stopped => write!(f, "stopped"),
        }
    }
}

/// How to bring a worker up: the software image to boot plus post-boot
/// commands. Passed unchanged from session configuration into every
/// acquisition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchSpec {
    /// Image reference understood by the provider (e.g. a Docker image).
    pub image: String,
    /// Entrypoint command run when the worker boots.
    #[serde(default)]
    pub entrypoint: Vec<String>,
    /// Environment variables in `KEY=value` form.
    #[serde(default)]
    pub env: Vec<String>,
}

impl LaunchSpec {
    /// Creates a launch spec for the given image.
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            entrypoint: Vec::new(),
            env: Vec::new(),
        }
    }

    /// Sets the entrypoint command.
    pub fn with_entrypoint(mut self, entrypoint: Vec<String>) -> Self {
        self.entrypoint = entrypoint;
        self
    }

    /// Sets the environment variables.
    pub fn with_env(mut self, env: Vec<String>) -> Self {
        self.env = env;
        self
    }
}

/// Handle to one provisioned worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerHandle {
    /// Pool-side identity, stable across status polls.
    pub id: Uuid,
    /// Provider-native identifier (container id, instance id, ...).
    pub provider_id: String,
    /// `host:port` the tunnel channel connects to.
    pub endpoint: String,
}

impl WorkerHandle {
    /// Creates a handle with a fresh pool-side identity.
    pub fn new(provider_id: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            provider_id: provider_id.into(),
            endpoint: endpoint.into(),
        }
    }
}

/// Handle to the session-wide virtual network tunnel workers join.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkHandle {
    pub id: String,
    pub cidr: String,
}

/// Captured output of a command executed on a worker.
#[derive(Debug, Clone)]
pub struct ExecOutput {
    pub exit_code: i64,
    pub stdout: Vec<u8>,
    pub stderr: String,
}

impl ExecOutput {
    /// Returns whether the command exited cleanly.
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Acquires, observes, and tears down remote workers.
///
/// `upload`/`exec`/`download` make up the file-exchange surface used by
/// the script channel; providers that only serve tunnel pools may
/// return [`ProvisionError::Unsupported`] from them.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Provisions a new worker from the launch spec.
    async fn acquire(&self, spec: &LaunchSpec) -> Result<WorkerHandle, ProvisionError>;

    /// Reports the worker's current lifecycle status.
    async fn status(&self, handle: &WorkerHandle) -> Result<WorkerStatus, ProvisionError>;

    /// Tears the worker down. Safe to call on an already-dead worker.
    async fn release(&self, handle: &WorkerHandle) -> Result<(), ProvisionError>;

    /// Creates (or returns the existing) session network. Idempotent:
    /// repeated calls return the same network.
    async fn create_network(&self, cidr: &str) -> Result<NetworkHandle, ProvisionError>;

    /// Removes the session network.
    async fn release_network(&self, network: &NetworkHandle) -> Result<(), ProvisionError>;

    /// Writes `bytes` to `path` on the worker's filesystem.
    async fn upload(
        &self,
        handle: &WorkerHandle,
        path: &str,
        bytes: &[u8],
    ) -> Result<(), ProvisionError>;

    /// Runs a command on the worker and collects its output.
    async fn exec(&self, handle: &WorkerHandle, cmd: &[String])
        -> Result<ExecOutput, ProvisionError>;

    /// Reads the contents of `path` on the worker's filesystem.
    async fn download(&self, handle: &WorkerHandle, path: &str) -> Result<Vec<u8>, ProvisionError>;
}

/// Inert provider for tests that only need a `dyn Provider`.
#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    pub(crate) struct NullProvider;

    #[async_trait]
    impl Provider for NullProvider {
        async fn acquire(&self, _spec: &LaunchSpec) -> Result<WorkerHandle, ProvisionError> {
            Err(ProvisionError::Unsupported("null provider".to_string()))
        }

        async fn status(&self, _handle: &WorkerHandle) -> Result<WorkerStatus, ProvisionError> {
            Ok(WorkerStatus::Stopped)
        }

        async fn release(&self, _handle: &WorkerHandle) -> Result<(), ProvisionError> {
            Ok(())
        }

        async fn create_network(&self, cidr: &str) -> Result<NetworkHandle, ProvisionError> {
            Ok(NetworkHandle {
                id: "null-net".to_string(),
                cidr: cidr.to_string(),
            })
        }

        async fn release_network(&self, _network: &NetworkHandle) -> Result<(), ProvisionError> {
            Ok(())
        }

        async fn upload(
            &self,
            _handle: &WorkerHandle,
            _path: &str,
            _bytes: &[u8],
        ) -> Result<(), ProvisionError> {
            Ok(())
        }

        async fn exec(
            &self,
            _handle: &WorkerHandle,
            _cmd: &[String],
        ) -> Result<ExecOutput, ProvisionError> {
            Ok(ExecOutput {
                exit_code: 0,
                stdout: Vec::new(),
                stderr: String::new(),
            })
        }

        async fn download(
            &self,
            _handle: &WorkerHandle,
            _path: &str,
        ) -> Result<Vec<u8>, ProvisionError> {
            Ok(Vec::new())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_launch_spec_builder() {
        let spec = LaunchSpec::new("echo-server:1.2")
            .with_entrypoint(vec!["gunicorn".to_string(), "-b".to_string(), "0.0.0.0:80".to_string()])
            .with_env(vec!["WORKERS=2".to_string()]);

        assert_eq!(spec.image, "echo-server:1.2");
        assert_eq!(spec.entrypoint.len(), 3);
        assert_eq!(spec.env, vec!["WORKERS=2".to_string()]);
    }

    #[test]
    fn test_launch_spec_serde_defaults() {
        let spec: LaunchSpec =
            serde_json::from_str(r#"{"image": "echo-server:1.2"}"#).expect("should parse");
        assert!(spec.entrypoint.is_empty());
        assert!(spec.env.is_empty());
    }

    #[test]
    fn test_worker_status_classification() {
        assert!(WorkerStatus::Pending.is_transitional());
        assert!(WorkerStatus::Starting.is_transitional());
        assert!(!WorkerStatus::Running.is_transitional());
        assert!(WorkerStatus::Failed.is_terminal());
        assert!(WorkerStatus::Stopped.is_terminal());
        assert!(!WorkerStatus::Running.is_terminal());
    }

    #[test]
    fn test_worker_status_display() {
        assert_eq!(WorkerStatus::Running.to_string(), "running");
        assert_eq!(WorkerStatus::Pending.to_string(), "pending");
    }

    #[test]
    fn test_worker_handle_identity_is_unique() {
        let a = WorkerHandle::new("c-1", "10.0.0.2:80");
        let b = WorkerHandle::new("c-1", "10.0.0.2:80");
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_exec_output_success() {
        let ok = ExecOutput {
            exit_code: 0,
            stdout: b"done".to_vec(),
            stderr: String::new(),
        };
        assert!(ok.success());

        let failed = ExecOutput {
            exit_code: 1,
            stdout: Vec::new(),
            stderr: "boom".to_string(),
        };
        assert!(!failed.success());
    }
}
