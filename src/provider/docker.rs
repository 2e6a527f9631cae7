//! Docker-backed provider using the bollard crate.
//!
//! Workers are containers: `acquire` creates and starts one from the
//! launch spec, `status` maps container state onto [`WorkerStatus`],
//! and the file-exchange surface is implemented with tar uploads and
//! `exec`. One bridge network per session backs the tunnel channel.

use std::path::Path;

use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, InspectContainerOptions, LogOutput, RemoveContainerOptions,
    StartContainerOptions, StopContainerOptions, UploadToContainerOptions,
};
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::image::CreateImageOptions;
use bollard::models::{HostConfig, Ipam, IpamConfig};
use bollard::network::{CreateNetworkOptions, InspectNetworkOptions};
use bollard::Docker;
use futures::StreamExt;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::ProvisionError;
use crate::provider::{
    ExecOutput, LaunchSpec, NetworkHandle, Provider, WorkerHandle, WorkerStatus,
};

/// Name of the session network created for tunnel workers.
const NETWORK_NAME: &str = "relaypool";

/// Port workers are expected to serve on inside the container.
const DEFAULT_WORKER_PORT: u16 = 80;

/// Provider that provisions workers as local Docker containers.
pub struct DockerProvider {
    docker: Docker,
    worker_port: u16,
    network: Mutex<Option<NetworkHandle>>,
}

impl DockerProvider {
    /// Connects to the local Docker daemon.
    ///
    /// # Errors
    ///
    /// Returns `ProvisionError::DaemonUnavailable` if the daemon is not
    /// accessible.
    pub fn new() -> Result<Self, ProvisionError> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| ProvisionError::DaemonUnavailable(format!("Failed to connect: {e}")))?;
        Ok(Self {
            docker,
            worker_port: DEFAULT_WORKER_PORT,
            network: Mutex::new(None),
        })
    }

    /// Creates a provider from an existing bollard Docker instance.
    pub fn from_docker(docker: Docker) -> Self {
        Self {
            docker,
            worker_port: DEFAULT_WORKER_PORT,
            network: Mutex::new(None),
        }
    }

    /// Sets the port workers serve on.
    pub fn with_worker_port(mut self, port: u16) -> Self {
        self.worker_port = port;
        self
    }

    /// Pulls the image if it is not present locally.
    async fn ensure_image(&self, image: &str) -> Result<(), ProvisionError> {
        if self.docker.inspect_image(image).await.is_ok() {
            return Ok(());
        }

        let options = CreateImageOptions {
            from_image: image,
            ..Default::default()
        };
        let mut stream = self.docker.create_image(Some(options), None, None);
        while let Some(result) = stream.next().await {
            result
                .map_err(|e| ProvisionError::AcquireFailed(format!("Failed to pull image: {e}")))?;
        }
        Ok(())
    }

    /// Returns the container's address on its first attached network.
    async fn container_ip(&self, container_id: &str) -> Result<String, ProvisionError> {
        let info = self
            .docker
            .inspect_container(container_id, None::<InspectContainerOptions>)
            .await
            .map_err(|e| {
                ProvisionError::AcquireFailed(format!("Failed to inspect container: {e}"))
            })?;

        info.network_settings
            .and_then(|settings| settings.networks)
            .and_then(|networks| {
                networks
                    .into_values()
                    .filter_map(|n| n.ip_address)
                    .find(|ip| !ip.is_empty())
            })
            .ok_or_else(|| {
                ProvisionError::AcquireFailed("Container has no network address".to_string())
            })
    }

    /// Runs a command in the container, capturing raw stdout bytes.
    async fn exec_collect(
        &self,
        container_id: &str,
        cmd: Vec<String>,
    ) -> Result<ExecOutput, ProvisionError> {
        let exec_options = CreateExecOptions {
            cmd: Some(cmd),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            tty: Some(false),
            ..Default::default()
        };

        let exec = self
            .docker
            .create_exec(container_id, exec_options)
            .await
            .map_err(|e| ProvisionError::ExecFailed(format!("Failed to create exec: {e}")))?;

        let start_result = self
            .docker
            .start_exec(&exec.id, None)
            .await
            .map_err(|e| ProvisionError::ExecFailed(format!("Failed to start exec: {e}")))?;

        let mut stdout = Vec::new();
        let mut stderr = String::new();

        if let StartExecResults::Attached { mut output, .. } = start_result {
            while let Some(chunk) = output.next().await {
                match chunk {
                    Ok(LogOutput::StdOut { message }) => stdout.extend_from_slice(&message),
                    Ok(LogOutput::StdErr { message }) => {
                        stderr.push_str(&String::from_utf8_lossy(&message));
                    }
                    Ok(_) => {}
                    Err(e) => {
                        return Err(ProvisionError::ExecFailed(format!(
                            "Error reading output: {e}"
                        )));
                    }
                }
            }
        }

        let exec_info = self
            .docker
            .inspect_exec(&exec.id)
            .await
            .map_err(|e| ProvisionError::ExecFailed(format!("Failed to inspect exec: {e}")))?;

        Ok(ExecOutput {
            exit_code: exec_info.exit_code.unwrap_or(-1),
            stdout,
            stderr,
        })
    }
}

/// Maps a Docker container state string onto a worker status.
fn map_container_state(state: &str) -> WorkerStatus {
    match state {
        "created" | "restarting" => WorkerStatus::Starting,
        "running" => WorkerStatus::Running,
        "removing" => WorkerStatus::Stopped,
        // paused/exited/dead containers cannot serve requests
        _ => WorkerStatus::Failed,
    }
}

#[async_trait]
impl Provider for DockerProvider {
    async fn acquire(&self, spec: &LaunchSpec) -> Result<WorkerHandle, ProvisionError> {
        self.ensure_image(&spec.image).await?;

        let name = format!("relaypool-worker-{}", Uuid::new_v4());
        let network_mode = self.network.lock().await.as_ref().map(|n| n.id.clone());

        let host_config = HostConfig {
            network_mode,
            ..Default::default()
        };
        let config = Config {
            image: Some(spec.image.clone()),
            cmd: if spec.entrypoint.is_empty() {
                None
            } else {
                Some(spec.entrypoint.clone())
            },
            env: if spec.env.is_empty() {
                None
            } else {
                Some(spec.env.clone())
            },
            host_config: Some(host_config),
            ..Default::default()
        };
        let options = CreateContainerOptions {
            name: name.clone(),
            platform: None,
        };

        let created = self
            .docker
            .create_container(Some(options), config)
            .await
            .map_err(|e| ProvisionError::AcquireFailed(format!("Failed to create container: {e}")))?;

        self.docker
            .start_container(&created.id, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| ProvisionError::AcquireFailed(format!("Failed to start container: {e}")))?;

        let ip = self.container_ip(&created.id).await?;
        Ok(WorkerHandle::new(
            created.id,
            format!("{}:{}", ip, self.worker_port),
        ))
    }

    async fn status(&self, handle: &WorkerHandle) -> Result<WorkerStatus, ProvisionError> {
        let info = self
            .docker
            .inspect_container(&handle.provider_id, None::<InspectContainerOptions>)
            .await
            .map_err(|e| {
                if e.to_string().contains("No such container") {
                    ProvisionError::WorkerNotFound {
                        id: handle.provider_id.clone(),
                    }
                } else {
                    ProvisionError::StatusUnavailable(format!("Failed to inspect container: {e}"))
                }
            })?;

        let state = info
            .state
            .and_then(|s| s.status)
            .map(|s| s.to_string())
            .unwrap_or_default();
        Ok(map_container_state(&state))
    }

    async fn release(&self, handle: &WorkerHandle) -> Result<(), ProvisionError> {
        // Stop may fail if the container already exited; removal is what matters.
        let _ = self
            .docker
            .stop_container(&handle.provider_id, Some(StopContainerOptions { t: 10 }))
            .await;

        let options = RemoveContainerOptions {
            force: true,
            v: true,
            ..Default::default()
        };
        self.docker
            .remove_container(&handle.provider_id, Some(options))
            .await
            .map_err(|e| ProvisionError::ReleaseFailed(format!("Failed to remove container: {e}")))
    }

    async fn create_network(&self, cidr: &str) -> Result<NetworkHandle, ProvisionError> {
        let mut cached = self.network.lock().await;
        if let Some(network) = cached.as_ref() {
            return Ok(network.clone());
        }

        let options = CreateNetworkOptions {
            name: NETWORK_NAME.to_string(),
            driver: "bridge".to_string(),
            ipam: Ipam {
                config: Some(vec![IpamConfig {
                    subnet: Some(cidr.to_string()),
                    ..Default::default()
                }]),
                ..Default::default()
            },
            ..Default::default()
        };

        match self.docker.create_network(options).await {
            Ok(_) => {}
            Err(e) if e.to_string().contains("already exists") => {}
            Err(e) => {
                return Err(ProvisionError::NetworkFailed(format!(
                    "Failed to create network: {e}"
                )));
            }
        }

        let inspected = self
            .docker
            .inspect_network(NETWORK_NAME, None::<InspectNetworkOptions<String>>)
            .await
            .map_err(|e| ProvisionError::NetworkFailed(format!("Failed to inspect network: {e}")))?;

        let handle = NetworkHandle {
            id: inspected.id.unwrap_or_else(|| NETWORK_NAME.to_string()),
            cidr: cidr.to_string(),
        };
        *cached = Some(handle.clone());
        Ok(handle)
    }

    async fn release_network(&self, network: &NetworkHandle) -> Result<(), ProvisionError> {
        self.docker
            .remove_network(&network.id)
            .await
            .map_err(|e| ProvisionError::NetworkFailed(format!("Failed to remove network: {e}")))?;
        *self.network.lock().await = None;
        Ok(())
    }

    async fn upload(
        &self,
        handle: &WorkerHandle,
        path: &str,
        bytes: &[u8],
    ) -> Result<(), ProvisionError> {
        let target = Path::new(path);
        let file_name = target
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| ProvisionError::TransferFailed(format!("Invalid path '{path}'")))?;
        let parent = target
            .parent()
            .and_then(|p| p.to_str())
            .filter(|p| !p.is_empty())
            .unwrap_or("/");

        let mut builder = tar::Builder::new(Vec::new());
        let mut header = tar::Header::new_gnu();
        header.set_size(bytes.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, file_name, bytes)?;
        let archive = builder.into_inner()?;

        let options = UploadToContainerOptions {
            path: parent.to_string(),
            ..Default::default()
        };
        self.docker
            .upload_to_container(&handle.provider_id, Some(options), archive.into())
            .await
            .map_err(|e| ProvisionError::TransferFailed(format!("Upload failed: {e}")))
    }

    async fn exec(
        &self,
        handle: &WorkerHandle,
        cmd: &[String],
    ) -> Result<ExecOutput, ProvisionError> {
        self.exec_collect(&handle.provider_id, cmd.to_vec()).await
    }

    async fn download(&self, handle: &WorkerHandle, path: &str) -> Result<Vec<u8>, ProvisionError> {
        let output = self
            .exec_collect(
                &handle.provider_id,
                vec!["cat".to_string(), path.to_string()],
            )
            .await?;
        if !output.success() {
            return Err(ProvisionError::TransferFailed(format!(
                "Failed to read '{}': {}",
                path, output.stderr
            )));
        }
        Ok(output.stdout)
    }
}
