//! kerneld CLI entry point.
//!
//! Launched by a Jupyter front-end with the path to a connection file; runs
//! the kernel runloop with the built-in calc backend until a
//! shutdown_request arrives.

use std::path::PathBuf;

use clap::Parser;
use log::info;

use jupyter_wire::ConnectionInfo;
use kerneld::calc::CalcBackend;
use kerneld::Kernel;

#[derive(Parser, Debug)]
#[command(name = "kerneld")]
#[command(about = "Jupyter kernel runtime with a built-in calculator backend")]
struct Cli {
    /// Path to the Jupyter connection file
    connection_file: PathBuf,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Log every received message at info level
    #[arg(long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&cli.log_level))
        .init();

    let connection = ConnectionInfo::from_file(&cli.connection_file)?;
    info!("kerneld starting...");
    info!("  Transport: {}://{}", connection.transport, connection.ip);
    info!(
        "  Ports: shell={} control={} stdin={} iopub={} hb={}",
        connection.shell_port,
        connection.control_port,
        connection.stdin_port,
        connection.iopub_port,
        connection.hb_port
    );
    info!("  Signature scheme: {}", connection.signature_scheme);

    Kernel::new(connection, Box::new(CalcBackend::new()))
        .verbose(cli.verbose)
        .run()
        .await
}
