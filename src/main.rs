use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use ssh_courier::commands::{self, Failure};
use ssh_courier::services::{AddKeyOptions, GenerateKeyOptions};
use ssh_courier::{CourierConfig, CourierResult};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

#[derive(Parser)]
#[command(
    name = "ssh-courier",
    about = "Named SSH keys, remote commands and file uploads",
    version
)]
struct Cli {
    /// Path to configuration file (default: ./ssh-courier.toml if present)
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Manage stored key pairs
    #[command(subcommand)]
    Keys(KeysCommand),
    /// Run a command on a remote host
    Exec(ExecArgs),
    /// Copy a local file to a remote host
    Upload(UploadArgs),
}

#[derive(Subcommand)]
enum KeysCommand {
    /// Generate a new key pair
    Generate {
        name: String,
        /// rsa or ed25519
        #[arg(long = "type", default_value = "rsa")]
        key_type: String,
        /// RSA modulus size
        #[arg(long)]
        bits: Option<usize>,
        #[arg(long)]
        description: Option<String>,
        /// Replace an existing pair with the same name
        #[arg(long)]
        overwrite: bool,
    },
    /// Import an existing key pair
    Add {
        name: String,
        #[arg(long, value_name = "FILE")]
        private_key: PathBuf,
        #[arg(long, value_name = "FILE")]
        public_key: PathBuf,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        overwrite: bool,
    },
    /// List stored keys (public halves only)
    List,
    /// Print the OpenSSH public key line
    Show { name: String },
    /// Delete a key pair
    Delete { name: String },
}

#[derive(Args)]
struct TargetArgs {
    /// host, host:port or [v6]:port
    #[arg(long)]
    host: String,
    #[arg(short, long)]
    user: String,
    /// Stored key name
    #[arg(short, long)]
    key: String,
    /// Seconds allowed for connect, handshake and authentication
    #[arg(long, value_name = "SECS")]
    connect_timeout: Option<u64>,
}

#[derive(Args)]
struct ExecArgs {
    #[command(flatten)]
    target: TargetArgs,
    /// Execution timeout in seconds, 0 disables it
    #[arg(long, value_name = "SECS")]
    timeout: Option<u64>,
    /// Command passed to the remote shell as-is
    #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
    command: Vec<String>,
}

#[derive(Args)]
struct UploadArgs {
    #[command(flatten)]
    target: TargetArgs,
    local_path: PathBuf,
    remote_path: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    let log_level = if cli.debug { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let config = CourierConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;
    let store = config.key_store()?;

    match cli.command {
        Command::Keys(command) => {
            let (value, ok) = match command {
                KeysCommand::Generate {
                    name,
                    key_type,
                    bits,
                    description,
                    overwrite,
                } => {
                    let request = commands::GenerateKeyRequest {
                        name,
                        options: GenerateKeyOptions {
                            key_type: Some(key_type),
                            bits,
                            description,
                            overwrite,
                        },
                    };
                    to_json(commands::generate_ssh_key(&store, request).await)?
                }
                KeysCommand::Add {
                    name,
                    private_key,
                    public_key,
                    description,
                    overwrite,
                } => {
                    let request = commands::AddKeyRequest {
                        name,
                        private_key: read_file(&private_key).await?,
                        public_key: read_file(&public_key).await?,
                        options: AddKeyOptions {
                            description,
                            overwrite,
                        },
                    };
                    to_json(commands::add_ssh_key(&store, request).await)?
                }
                KeysCommand::List => to_json(commands::list_ssh_keys(&store).await)?,
                KeysCommand::Show { name } => match commands::read_public_key(&store, &name).await {
                    Ok(line) => {
                        println!("{}", line);
                        return Ok(ExitCode::SUCCESS);
                    }
                    Err(e) => to_json::<()>(Err(e))?,
                },
                KeysCommand::Delete { name } => {
                    to_json(commands::delete_ssh_key(&store, &name).await)?
                }
            };
            print_json(&value)?;
            Ok(if ok { ExitCode::SUCCESS } else { ExitCode::from(1) })
        }
        Command::Exec(args) => {
            let engine = config.remote_engine(store)?;
            let request = commands::ExecuteRequest {
                host: args.target.host,
                username: args.target.user,
                key_name: args.target.key,
                command: args.command.join(" "),
                connect_timeout_secs: args.target.connect_timeout,
                timeout_secs: args.timeout,
            };
            let response = commands::execute_ssh_command(&engine, request).await;
            print_json(&response)?;
            Ok(match response {
                commands::ExecuteResponse::Completed(report) if report.success => ExitCode::SUCCESS,
                commands::ExecuteResponse::Completed(_) => ExitCode::from(2),
                commands::ExecuteResponse::Failed(_) => ExitCode::from(1),
            })
        }
        Command::Upload(args) => {
            let engine = config.remote_engine(store)?;
            let request = commands::UploadRequest {
                host: args.target.host,
                username: args.target.user,
                key_name: args.target.key,
                local_path: args.local_path,
                remote_path: args.remote_path,
                connect_timeout_secs: args.target.connect_timeout,
            };
            let response = commands::upload_file(&engine, request).await;
            print_json(&response)?;
            Ok(if response.success() { ExitCode::SUCCESS } else { ExitCode::from(1) })
        }
    }
}

/// Result as JSON plus whether it succeeded.
fn to_json<T: Serialize>(result: CourierResult<T>) -> anyhow::Result<(serde_json::Value, bool)> {
    Ok(match result {
        Ok(value) => (serde_json::to_value(value)?, true),
        Err(e) => (serde_json::to_value(Failure::from(e))?, false),
    })
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn read_file(path: &Path) -> anyhow::Result<String> {
    tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))
}
