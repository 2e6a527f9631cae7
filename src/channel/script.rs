//! Script transport: one-shot file exchange through the provider.
//!
//! The request envelope is written to a fixed path on the worker, a
//! fixed command (by default the crate's own `relay` subcommand) reads
//! it, performs the call against the worker-local server, and writes
//! the response envelope back; the response file is then downloaded and
//! decoded. Every delivery is a full provisioning round trip, so this
//! is strictly slower than the tunnel, but it needs no network path to
//! the worker.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::channel::Channel;
use crate::envelope::{Request, Response};
use crate::error::ChannelError;
use crate::provider::{Provider, WorkerHandle};

/// Remote paths and command driving one file-exchange delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptChannelConfig {
    /// Where the request envelope is written on the worker.
    #[serde(default = "default_request_path")]
    pub request_path: String,
    /// Where the worker-side command writes the response envelope.
    #[serde(default = "default_response_path")]
    pub response_path: String,
    /// Command executed on the worker after the request file lands.
    /// Its `--url` flag rewrites the mount base to the local server.
    #[serde(default = "default_command")]
    pub command: Vec<String>,
}

fn default_request_path() -> String {
    "/work/req.json".to_string()
}

fn default_response_path() -> String {
    "/work/res.json".to_string()
}

fn default_command() -> Vec<String> {
    vec![
        "/bin/sh".to_string(),
        "-c".to_string(),
        "relaypool relay /work/req.json /work/res.json --url http://127.0.0.1:80".to_string(),
    ]
}

impl Default for ScriptChannelConfig {
    fn default() -> Self {
        Self {
            request_path: default_request_path(),
            response_path: default_response_path(),
            command: default_command(),
        }
    }
}

/// Channel that delivers via upload / remote command / download.
pub struct ScriptChannel {
    provider: Arc<dyn Provider>,
    config: ScriptChannelConfig,
}

impl ScriptChannel {
    pub fn new(provider: Arc<dyn Provider>, config: ScriptChannelConfig) -> Self {
        Self { provider, config }
    }
}

#[async_trait]
impl Channel for ScriptChannel {
    async fn deliver(
        &self,
        request: &Request,
        worker: &WorkerHandle,
    ) -> Result<Response, ChannelError> {
        let wire = request.to_wire_json()?;
        self.provider
            .upload(worker, &self.config.request_path, wire.as_bytes())
            .await?;

        let output = self.provider.exec(worker, &self.config.command).await?;
        if !output.success() {
            return Err(ChannelError::RemoteCommand {
                exit_code: output.exit_code,
                stderr: output.stderr,
            });
        }
        debug!(worker_id = %worker.id, "Remote relay command completed");

        let bytes = self
            .provider
            .download(worker, &self.config.response_path)
            .await?;
        Ok(Response::from_wire_json_slice(&bytes)?)
    }
}
