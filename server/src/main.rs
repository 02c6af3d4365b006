use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use anyhow::{Context, Result};
use clap::Parser;
use seclink_common::config::ServerSettings;
use seclink_server::EchoServer;

#[derive(Parser)]
#[command(name = "seclink-server")]
#[command(about = "TLS echo server")]
struct Args {
    /// Path to the JSON settings file
    #[arg(short, long, default_value = "server.json")]
    config: String,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let level: tracing::Level = args
        .log_level
        .parse()
        .with_context(|| format!("Invalid log level {:?}", args.log_level))?;
    tracing_subscriber::fmt().with_max_level(level).init();

    let settings = ServerSettings::load(&args.config)?;
    let server = EchoServer::new(settings).context("Failed to create server")?;

    let running = Arc::new(AtomicBool::new(true));
    let flag = running.clone();
    ctrlc::set_handler(move || flag.store(false, Ordering::SeqCst))
        .context("Failed to install shutdown handler")?;

    server.run_with_shutdown(running).context("Server error")?;
    Ok(())
}
