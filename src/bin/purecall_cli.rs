//! Command-line RPC client.
//!
//! Connects to a purecall server, issues one call and prints the returned
//! value as JSON. Any failure is printed to stderr and the process exits
//! nonzero.

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use purecall::{transport, ConnectionOptions, Result, Sandbox};

#[derive(Parser)]
#[command(name = "purecall-cli", about = "Issue one RPC call against a purecall server")]
struct Args {
    /// Host of the server.
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Port of the server.
    #[arg(long, default_value_t = 4231)]
    port: u16,

    /// Call timeout in seconds.
    #[arg(long, default_value_t = 300)]
    timeout: u64,

    /// Command text to execute remotely.
    #[arg(long, default_value = "[\"echo\", \"hello\"]")]
    code: String,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{err}");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<()> {
    let client = transport::connect(
        &args.host,
        args.port,
        Arc::new(Sandbox::new()),
        ConnectionOptions::default(),
    )
    .await?;

    let result = client
        .call(&args.code, Duration::from_secs(args.timeout))
        .await;
    client.close();

    let value = result?;
    println!("{}", serde_json::to_string(&value)?);
    Ok(())
}
