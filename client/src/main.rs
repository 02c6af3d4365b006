use std::io::{self, BufRead, Write};

use anyhow::{Context, Result};
use clap::Parser;
use seclink_client::EchoClient;
use seclink_common::config::ClientSettings;

#[derive(Parser)]
#[command(name = "seclink-client")]
#[command(about = "Interactive TLS echo client")]
struct Args {
    /// Path to the JSON settings file
    #[arg(short, long, default_value = "client.json")]
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

    let settings = ClientSettings::load(&args.config)?;
    let mut client = EchoClient::new(settings).context("Failed to create client")?;
    client
        .connect()
        .context("Failed to establish secure connection")?;

    println!("Connected. Type a line to send it; 'quit' or Ctrl-D to exit.");

    let stdin = io::stdin();
    let mut input = stdin.lock();
    loop {
        print!("Enter text to send: ");
        io::stdout().flush()?;

        let mut line = String::new();
        if input.read_line(&mut line)? == 0 {
            break;
        }
        let line = line.trim_end_matches(|c| c == '\r' || c == '\n');
        if line == "quit" || line == "exit" {
            break;
        }

        // Any transport error here ends the program; the client has no
        // reconnect path.
        match client.exchange(line)? {
            Some(reply) => println!("{reply}"),
            None => {
                println!("Server closed the connection");
                break;
            }
        }
    }

    client.disconnect()?;
    Ok(())
}
