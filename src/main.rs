//! remote-exec
//!
//! Runs the execution server, or talks to one as a client. Configuration
//! comes from the `REMOTE_EXEC_CONFIG` env var, with `--host`/`--port`
//! taking precedence.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;
use tracing_subscriber::EnvFilter;

use remote_exec::client::Client;
use remote_exec::config::Config;
use remote_exec::executor::ExecutorRegistry;
use remote_exec::protocol::{Gravity, Message, Payload, AUTO_EXECUTOR};
use remote_exec::server::Server;

#[derive(Parser, Debug)]
#[command(name = "remote-exec")]
#[command(about = "Run source files on a remote host over a text-framed TCP protocol")]
struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct Endpoint {
    /// Host to bind or connect to
    #[arg(long)]
    host: Option<String>,

    /// TCP port
    #[arg(long)]
    port: Option<u16>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Accept clients and execute their files
    Serve {
        #[command(flatten)]
        endpoint: Endpoint,
    },
    /// Send stdin lines as chat messages and print whatever comes back
    Chat {
        #[command(flatten)]
        endpoint: Endpoint,
    },
    /// Print the executors the server can run
    Capabilities {
        #[command(flatten)]
        endpoint: Endpoint,
    },
    /// Submit a file and print its output
    Run {
        /// Source file to execute
        file: PathBuf,

        /// Executor friendly name, or "auto" to pick by suffix
        #[arg(long, default_value = AUTO_EXECUTOR)]
        executor: String,

        #[command(flatten)]
        endpoint: Endpoint,
    },
}

impl Command {
    const fn endpoint(&self) -> &Endpoint {
        match self {
            Self::Serve { endpoint }
            | Self::Chat { endpoint }
            | Self::Capabilities { endpoint }
            | Self::Run { endpoint, .. } => endpoint,
        }
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    // Logs go to stderr; stdout carries execution output.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let endpoint = cli.command.endpoint();
    let config = Config::from_env()
        .context("Failed to load configuration")?
        .with_overrides(endpoint.host.clone(), endpoint.port);

    match cli.command {
        Command::Serve { .. } => serve(config).await,
        Command::Chat { .. } => chat(&config).await,
        Command::Capabilities { .. } => capabilities(&config).await,
        Command::Run { file, executor, .. } => run(&config, &file, &executor).await,
    }
}

async fn serve(config: Config) -> Result<ExitCode> {
    let executors = ExecutorRegistry::with_defaults();
    let server = Server::bind(config, executors).await?;

    server
        .run(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Cannot listen for Ctrl-C");
                std::future::pending::<()>().await;
            }
        })
        .await?;

    Ok(ExitCode::SUCCESS)
}

async fn chat(config: &Config) -> Result<ExitCode> {
    let mut client = Client::connect(config).await?;
    info!(peer = %client.peer(), "Connected, type messages and press enter");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("Failed to read stdin")? else {
                    break;
                };
                if !line.is_empty() {
                    client.send_text(&line).await?;
                }
            }
            message = client.next_message() => {
                let Some(message) = message else {
                    info!("Server closed the connection");
                    break;
                };
                print_message(&message);
            }
        }
    }

    client.close().await?;
    Ok(ExitCode::SUCCESS)
}

async fn capabilities(config: &Config) -> Result<ExitCode> {
    let mut client = Client::connect(config).await?;
    client.request_capabilities().await?;

    while let Some(message) = client.next_message().await {
        if let Payload::Capabilities(capabilities) = message.payload() {
            for (name, available) in capabilities {
                let state = if *available { "available" } else { "missing tools" };
                println!("{name}: {state}");
            }
            client.close().await?;
            return Ok(ExitCode::SUCCESS);
        }
        print_message(&message);
    }
    bail!("Connection closed before capabilities arrived")
}

async fn run(config: &Config, file: &std::path::Path, executor: &str) -> Result<ExitCode> {
    let mut client = Client::connect(config).await?;
    client.send_file(file, executor).await?;
    info!(file = %file.display(), executor, "Submitted");

    while let Some(message) = client.next_message().await {
        match message.payload() {
            Payload::Logs(logs) => {
                print!("{}", logs.output);
                client.close().await?;
                let code = u8::try_from(logs.status).unwrap_or(1);
                return Ok(ExitCode::from(code));
            }
            Payload::Error(report) if report.gravity != Gravity::Info => {
                eprintln!("{}: {}", report.gravity, report.message);
                client.close().await?;
                return Ok(ExitCode::FAILURE);
            }
            _ => print_message(&message),
        }
    }
    bail!("Connection closed before the execution finished")
}

fn print_message(message: &Message) {
    match message.payload() {
        Payload::Text(text) => println!("[server] {text}"),
        Payload::Logs(logs) => println!("[logs, status {}]\n{}", logs.status, logs.output),
        Payload::Capabilities(capabilities) => println!("[capabilities] {capabilities:?}"),
        Payload::Error(report) => eprintln!("[{}] {}", report.gravity, report.message),
        Payload::File(file) => println!("[file] {}", file.file_name),
    }
}
