//! CLI command definitions for relaypool.
//!
//! Two entry points share this binary: `serve` runs a full session
//! from a YAML config on the operator's machine, and `relay` is the
//! worker-side half of the script channel, executed inside the worker
//! to forward one request file to the local server.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::info;

use crate::envelope::{Request, Response};
use crate::provider::DockerProvider;
use crate::session::Session;

/// Default base URL for the worker-local server the relay talks to.
const DEFAULT_RELAY_URL: &str = "http://127.0.0.1:80";

/// Elastic worker-pool dispatcher over substitutable transports.
#[derive(Parser)]
#[command(name = "relaypool")]
#[command(about = "Dispatch HTTP requests to an elastic pool of provisioned workers")]
#[command(version)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Run a session from a YAML config until interrupted.
    Serve(ServeArgs),

    /// Forward one request file to a local server and write the
    /// response file. Runs inside a worker as the script-channel hop.
    Relay(RelayArgs),
}

/// Arguments for `relaypool serve`.
#[derive(Parser, Debug)]
pub struct ServeArgs {
    /// Session config file (mount URLs, images, pool sizes).
    #[arg(short, long)]
    pub config: PathBuf,
}

/// Arguments for `relaypool relay`.
#[derive(Parser, Debug)]
pub struct RelayArgs {
    /// Request envelope to forward (JSON).
    pub req_file: PathBuf,

    /// Where the response envelope is written (JSON).
    pub res_file: PathBuf,

    /// Base URL the request's mount URL is rewritten to.
    #[arg(long, default_value = DEFAULT_RELAY_URL)]
    pub url: String,
}

/// Parses CLI arguments without running any command.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Parses CLI arguments and runs the selected command.
pub async fn run() -> anyhow::Result<()> {
    run_with_cli(parse_cli()).await
}

/// Runs the selected command with already-parsed arguments.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Serve(args) => run_serve_command(args).await?,
        Commands::Relay(args) => run_relay_command(args).await?,
    }
    Ok(())
}

async fn run_serve_command(args: ServeArgs) -> anyhow::Result<()> {
    let provider = Arc::new(DockerProvider::new()?);
    let session = Session::from_config_file(provider, &args.config).await?;
    session.start_all().await;
    info!("Session running, press Ctrl-C to stop");

    tokio::signal::ctrl_c().await?;
    info!("Interrupt received, shutting down");
    session.close().await;
    Ok(())
}

async fn run_relay_command(args: RelayArgs) -> anyhow::Result<()> {
    let mut request = Request::from_file(&args.req_file)?;
    request.replace_base_url(&args.url)?;

    let response = forward(&request).await?;
    response.to_file(&args.res_file)?;
    Ok(())
}

/// Performs the rewritten request against the local server.
async fn forward(request: &Request) -> anyhow::Result<Response> {
    let client = reqwest::Client::new();
    let method = reqwest::Method::from_bytes(request.method.as_bytes())?;

    let mut builder = client.request(method, &request.url);
    for (name, value) in &request.headers {
        builder = builder.header(name.as_str(), value.as_str());
    }
    if !request.body.is_empty() {
        builder = builder.body(request.body.clone());
    }

    let upstream = builder.send().await?;
    let mut response = Response::new(upstream.status().as_u16());
    for (name, value) in upstream.headers() {
        response = response.with_header(name.as_str(), String::from_utf8_lossy(value.as_bytes()));
    }
    let body = upstream.bytes().await?;
    Ok(response.with_body(body.to_vec()))
}
