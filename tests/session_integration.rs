//! Session-level tests over the script channel.
//!
//! The provider here emulates a worker that runs the relay command:
//! exec reads the uploaded request file, computes the answer, and
//! writes the response file. That exercises the whole caller path,
//! `Session` -> `Ingress` -> queue -> supervisor -> `ScriptChannel`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use relaypool::channel::ChannelKind;
use relaypool::envelope::{Request, Response};
use relaypool::error::{ProvisionError, QueueError};
use relaypool::pool::PoolConfig;
use relaypool::provider::{
    ExecOutput, LaunchSpec, NetworkHandle, Provider, WorkerHandle, WorkerStatus,
};
use relaypool::Session;

/// Worker emulator: sums the numeric path segments of the uploaded
/// request and answers through the response file.
struct CalcProvider {
    files: Mutex<HashMap<String, Vec<u8>>>,
}

impl CalcProvider {
    fn new() -> Self {
        Self {
            files: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl Provider for CalcProvider {
    async fn acquire(&self, _spec: &LaunchSpec) -> Result<WorkerHandle, ProvisionError> {
        Ok(WorkerHandle::new("calc-0", "10.0.0.2:80"))
    }

    async fn status(&self, _handle: &WorkerHandle) -> Result<WorkerStatus, ProvisionError> {
        Ok(WorkerStatus::Running)
    }

    async fn release(&self, _handle: &WorkerHandle) -> Result<(), ProvisionError> {
        Ok(())
    }

    async fn create_network(&self, cidr: &str) -> Result<NetworkHandle, ProvisionError> {
        Ok(NetworkHandle {
            id: "calc-net".to_string(),
            cidr: cidr.to_string(),
        })
    }

    async fn release_network(&self, _network: &NetworkHandle) -> Result<(), ProvisionError> {
        Ok(())
    }

    async fn upload(
        &self,
        _handle: &WorkerHandle,
        path: &str,
        bytes: &[u8],
    ) -> Result<(), ProvisionError> {
        self.files
            .lock()
            .await
            .insert(path.to_string(), bytes.to_vec());
        Ok(())
    }

    async fn exec(
        &self,
        _handle: &WorkerHandle,
        _cmd: &[String],
    ) -> Result<ExecOutput, ProvisionError> {
        let mut files = self.files.lock().await;
        let raw = files
            .get("/work/req.json")
            .ok_or_else(|| ProvisionError::ExecFailed("request file missing".to_string()))?;
        let raw = String::from_utf8_lossy(raw).into_owned();
        let request = Request::from_wire_json(&raw)
            .map_err(|err| ProvisionError::ExecFailed(err.to_string()))?;

        let sum: i64 = request
            .url
            .split('/')
            .filter_map(|segment| segment.parse::<i64>().ok())
            .sum();
        let response = Response::new(200).with_body(sum.to_string());
        let wire = response
            .to_wire_json()
            .map_err(|err| ProvisionError::ExecFailed(err.to_string()))?;
        files.insert("/work/res.json".to_string(), wire.into_bytes());

        Ok(ExecOutput {
            exit_code: 0,
            stdout: Vec::new(),
            stderr: String::new(),
        })
    }

    async fn download(
        &self,
        _handle: &WorkerHandle,
        path: &str,
    ) -> Result<Vec<u8>, ProvisionError> {
        self.files
            .lock()
            .await
            .get(path)
            .cloned()
            .ok_or_else(|| ProvisionError::TransferFailed(format!("No such file '{path}'")))
    }
}

fn script_config() -> PoolConfig {
    PoolConfig::new(LaunchSpec::new("calculator:latest"))
        .with_channel(ChannelKind::Script)
        .with_initial_size(1)
        .with_poll_interval(Duration::from_millis(10))
        .with_reconcile_interval(Duration::from_millis(10))
}

#[tokio::test]
async fn test_request_roundtrip_through_session() {
    let session = Session::new(Arc::new(CalcProvider::new()));
    session
        .register("http://calculator", script_config())
        .await
        .expect("mount registered");
    session.start_all().await;

    let ingress = session.ingress("http://calculator").await.expect("mounted");
    let response = ingress
        .send(Request::get("http://calculator/add/2/3"))
        .await
        .expect("answered");
    assert_eq!(response.status, 200);
    assert_eq!(response.text(), "5");

    session.close().await;
}

#[tokio::test]
async fn test_send_after_close_fails() {
    let session = Session::new(Arc::new(CalcProvider::new()));
    session
        .register("http://calculator", script_config())
        .await
        .expect("mount registered");
    session.start_all().await;

    let ingress = session.ingress("http://calculator").await.expect("mounted");
    session.close().await;

    let outcome = ingress.send(Request::get("http://calculator/add/1/1")).await;
    assert_eq!(outcome.unwrap_err(), QueueError::Closed);
}

#[tokio::test]
async fn test_two_mounts_are_isolated() {
    let session = Session::new(Arc::new(CalcProvider::new()));
    session
        .register("http://alpha", script_config())
        .await
        .expect("alpha registered");
    session
        .register("http://beta", script_config())
        .await
        .expect("beta registered");
    session.start_all().await;

    let alpha = session.ingress("http://alpha").await.expect("alpha");
    let beta = session.ingress("http://beta").await.expect("beta");
    assert_eq!(alpha.mount_url(), "http://alpha");

    let a = alpha.send(Request::get("http://alpha/add/1/2")).await;
    let b = beta.send(Request::get("http://beta/add/10/20")).await;
    assert_eq!(a.expect("alpha answered").text(), "3");
    assert_eq!(b.expect("beta answered").text(), "30");

    session.close().await;
}
