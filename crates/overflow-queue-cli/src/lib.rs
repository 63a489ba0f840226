//! # Overflow-Queue CLI
//!
//! Command-line front end for a queue manager backed by a filesystem
//! storage account.
//!
//! This module provides CLI commands for:
//! - Sending, receiving and deleting messages (large ones are offloaded)
//! - Inspecting raw queue contents
//! - Queue metadata, stored access policies and access tokens
//! - Configuration validation

use clap::{CommandFactory, Parser, Subcommand};
use overflow_queue_core::adapters::FilesystemStorageAccount;
use overflow_queue_core::manager::operations;
use overflow_queue_core::{
    BlobName, CallOptions, JsonSerializer, MessageContent, MessageId, PopReceipt,
    QueueAccessRights, QueueManager, QueueManagerError, QueuedMessage, ReceiveOptions,
    SendOptions, SharedAccessPolicy, StorageAccount, Timestamp,
};
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::io::{Read, Write};
use std::path::PathBuf;
use std::str::FromStr;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

pub mod config;

pub use config::{
    initialize_logging, load_configuration, CliConfig, ConfigError, LogFormat, LoggingConfig,
    StorageConfig,
};

// ============================================================================
// CLI Structure
// ============================================================================

/// Overflow-Queue CLI - queue messages of any size
#[derive(Parser)]
#[command(name = "overflow-queue")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Queue messages of any size, offloading large ones to blob storage")]
#[command(
    long_about = "Sends and receives queue messages over a filesystem storage account. \
                  Payloads too large for the queue are stored as blobs and replaced by an envelope."
)]
pub struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "OVERFLOW_QUEUE_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Logging level (overrides configuration)
    #[arg(short, long, global = true)]
    pub log_level: Option<String>,

    /// Enable JSON logging
    #[arg(long, global = true)]
    pub json_logs: bool,

    /// Storage account root directory (overrides configuration)
    #[arg(long, global = true)]
    pub root: Option<PathBuf>,

    /// Queue name (overrides configuration)
    #[arg(short, long, global = true)]
    pub queue: Option<String>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Send a message, offloading it to blob storage when too large
    Send {
        /// Message text; read from --file or stdin when omitted
        #[arg(conflicts_with = "file")]
        message: Option<String>,

        /// Read the message from a file
        #[arg(short, long)]
        file: Option<PathBuf>,

        /// Parse the input as a JSON value instead of sending it as a string
        #[arg(long, conflicts_with = "raw")]
        json: bool,

        /// Enqueue the input bytes verbatim, bypassing framing and offload
        #[arg(long)]
        raw: bool,

        /// Time-to-live in seconds
        #[arg(long)]
        ttl: Option<i64>,

        /// Initial visibility delay in seconds
        #[arg(long)]
        delay: Option<i64>,

        /// Output format
        #[arg(short = 'o', long, default_value = "text")]
        format: OutputFormat,
    },

    /// Receive the next message, resolving offloaded payloads
    Receive {
        /// Visibility timeout in seconds
        #[arg(short, long)]
        visibility: Option<i64>,

        /// Delete the message after printing it
        #[arg(short, long)]
        delete: bool,

        /// Output format
        #[arg(short = 'o', long, default_value = "json")]
        format: OutputFormat,
    },

    /// Delete a received message and its backing blob
    Delete {
        /// Message ID
        #[arg(long)]
        id: String,

        /// Pop receipt from the receive that returned the message
        #[arg(long)]
        pop_receipt: String,

        /// Backing blob of an offloaded message
        #[arg(long)]
        blob: Option<String>,
    },

    /// Peek at raw messages without dequeuing them
    Peek {
        /// Number of messages
        #[arg(short = 'n', long, default_value = "1")]
        count: u32,

        /// Output format
        #[arg(short = 'o', long, default_value = "json")]
        format: OutputFormat,
    },

    /// Dequeue raw messages without resolving envelopes
    Get {
        /// Number of messages
        #[arg(short = 'n', long, default_value = "1")]
        count: u32,

        /// Visibility timeout in seconds
        #[arg(short, long)]
        visibility: Option<i64>,

        /// Output format
        #[arg(short = 'o', long, default_value = "json")]
        format: OutputFormat,
    },

    /// Remove every message from the queue
    Clear,

    /// Show queue attributes and offload settings
    Info {
        /// Output format
        #[arg(short = 'o', long, default_value = "text")]
        format: OutputFormat,
    },

    /// Show or replace queue metadata
    Metadata {
        /// Replace metadata with these KEY=VALUE pairs
        #[arg(short, long = "set", value_name = "KEY=VALUE")]
        set: Vec<String>,
    },

    /// Stored access policy commands
    Policy {
        #[command(subcommand)]
        action: PolicyCommands,
    },

    /// Generate a shared access signature for the queue
    Sas {
        /// Permissions, any of r (read), a (add), u (update), p (process)
        #[arg(short, long)]
        permissions: Option<String>,

        /// Seconds until the token expires
        #[arg(short, long)]
        expires_in: Option<i64>,

        /// Stored access policy the token refers to
        #[arg(long)]
        policy_id: Option<String>,
    },

    /// Validate configuration
    Config {
        /// Show resolved configuration
        #[arg(short, long)]
        show: bool,

        /// Output format for configuration
        #[arg(short = 'f', long, default_value = "yaml")]
        format: ConfigFormat,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

/// Stored access policy subcommands
#[derive(Subcommand)]
pub enum PolicyCommands {
    /// List stored access policies
    List,

    /// Add or replace a stored access policy
    Set {
        /// Policy identifier
        id: String,

        /// Permissions, any of r, a, u, p
        #[arg(short, long)]
        permissions: String,

        /// Seconds until the policy expires
        #[arg(short, long)]
        expires_in: Option<i64>,
    },

    /// Remove a stored access policy
    Remove {
        /// Policy identifier
        id: String,
    },
}

/// Output format options
#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text
    Text,
    /// JSON output
    Json,
}

/// Configuration format options
#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum ConfigFormat {
    /// YAML format
    Yaml,
    /// JSON format
    Json,
    /// TOML format
    Toml,
}

// ============================================================================
// CLI Error Types
// ============================================================================

/// CLI-specific errors
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueManagerError),

    #[error("Command failed: {message}")]
    CommandFailed { message: String },

    #[error("Invalid argument: {arg} - {message}")]
    InvalidArgument { arg: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CliError {
    fn invalid(arg: &str, message: impl std::fmt::Display) -> Self {
        Self::InvalidArgument {
            arg: arg.to_string(),
            message: message.to_string(),
        }
    }

    fn failed(message: impl std::fmt::Display) -> Self {
        Self::CommandFailed {
            message: message.to_string(),
        }
    }
}

// ============================================================================
// Output Views
// ============================================================================

/// Printable form of a raw queue message
#[derive(Debug, Serialize)]
struct RawMessage {
    id: MessageId,
    pop_receipt: Option<PopReceipt>,
    dequeue_count: u32,
    insertion_time: Timestamp,
    expiration_time: Option<Timestamp>,
    next_visible_time: Option<Timestamp>,
    body: String,
}

impl From<QueuedMessage> for RawMessage {
    fn from(message: QueuedMessage) -> Self {
        let body = message.body_text();
        Self {
            id: message.id,
            pop_receipt: message.pop_receipt,
            dequeue_count: message.dequeue_count,
            insertion_time: message.insertion_time,
            expiration_time: message.expiration_time,
            next_visible_time: message.next_visible_time,
            body,
        }
    }
}

/// Queue summary printed by `info`
#[derive(Debug, Serialize)]
struct QueueInfo {
    queue: String,
    container: String,
    threshold_bytes: usize,
    approximate_message_count: u64,
    metadata: BTreeMap<String, String>,
}

// ============================================================================
// Main Entry Point
// ============================================================================

/// Main CLI entry point
pub async fn run_cli() -> Result<(), CliError> {
    let cli = Cli::parse();

    // Load configuration
    let config = load_configuration(cli.config.as_deref())?;

    // Initialize logging
    let level = cli
        .log_level
        .clone()
        .unwrap_or_else(|| config.logging.level.clone());
    let format = if cli.json_logs {
        LogFormat::Json
    } else {
        config.logging.format
    };
    initialize_logging(&level, format)?;

    let mut stdout = std::io::stdout().lock();
    execute(cli, config, &mut stdout).await
}

/// Execute a parsed command against a loaded configuration
///
/// Command output is written to `out`; diagnostics go through `tracing`.
pub async fn execute<W: Write>(
    cli: Cli,
    mut config: CliConfig,
    out: &mut W,
) -> Result<(), CliError> {
    if let Some(root) = cli.root {
        config.storage.root = Some(root);
    }
    if let Some(queue) = cli.queue {
        config.manager.queue_name = queue;
    }

    match cli.command {
        Commands::Config { show, format } => execute_config_command(&config, show, format, out),
        Commands::Completions { shell } => execute_completions_command(shell, out),
        command => {
            let session = Session::open(&config).await?;
            session.execute(command, out).await
        }
    }
}

// ============================================================================
// Command Implementations
// ============================================================================

/// Execute config command
fn execute_config_command<W: Write>(
    config: &CliConfig,
    show: bool,
    format: ConfigFormat,
    out: &mut W,
) -> Result<(), CliError> {
    info!(show, format = ?format, "Processing config command");

    config.validate()?;

    if !show {
        writeln!(out, "Configuration is valid")?;
        return Ok(());
    }

    let redacted = config.redacted();
    let rendered = match format {
        ConfigFormat::Yaml => serde_yaml::to_string(&redacted).map_err(CliError::failed)?,
        ConfigFormat::Json => serde_json::to_string_pretty(&redacted).map_err(CliError::failed)?,
        ConfigFormat::Toml => toml::to_string_pretty(&redacted).map_err(CliError::failed)?,
    };
    writeln!(out, "{}", rendered.trim_end())?;
    Ok(())
}

/// Execute completions command
fn execute_completions_command<W: Write>(
    shell: clap_complete::Shell,
    out: &mut W,
) -> Result<(), CliError> {
    info!(shell = ?shell, "Generating shell completions");

    let mut command = Cli::command();
    clap_complete::generate(shell, &mut command, "overflow-queue", out);
    Ok(())
}

/// A connected manager plus what commands need around it
struct Session {
    account: FilesystemStorageAccount,
    manager: QueueManager,
    call: CallOptions,
}

impl Session {
    async fn open(config: &CliConfig) -> Result<Self, CliError> {
        config.validate()?;

        let root = config.storage.root_dir()?;
        let key = config.storage.account_key()?;
        debug!(root = %root.display(), queue = %config.manager.queue_name, "Opening storage account");
        let account = FilesystemStorageAccount::new(root, &config.storage.account_name, key);

        let mut call = CallOptions::new().with_cancellation(ctrl_c_token());
        if let Some(timeout) = config.storage.server_timeout() {
            call = call.with_server_timeout(timeout);
        }

        let manager =
            QueueManager::connect(&account, config.manager.clone(), JsonSerializer, &call).await?;

        Ok(Self {
            account,
            manager,
            call,
        })
    }

    async fn execute<W: Write>(&self, command: Commands, out: &mut W) -> Result<(), CliError> {
        match command {
            Commands::Send {
                message,
                file,
                json,
                raw,
                ttl,
                delay,
                format,
            } => {
                let input = read_input(message, file)?;
                let mut options = SendOptions::new().with_call_options(self.call.clone());
                if let Some(ttl) = ttl {
                    options = options.with_time_to_live(seconds("--ttl", ttl)?);
                }
                if let Some(delay) = delay {
                    options = options.with_initial_visibility_delay(seconds("--delay", delay)?);
                }

                if raw {
                    return self.send_raw(input, &options, format, out).await;
                }

                let payload = if json {
                    serde_json::from_str::<Value>(&input).map_err(|e| CliError::invalid("--json", e))?
                } else {
                    Value::String(input)
                };

                let sent = self.manager.send(&payload, &options).await?;
                match format {
                    OutputFormat::Json => write_json(out, &sent)?,
                    OutputFormat::Text => match &sent.blob_name {
                        Some(blob) => writeln!(out, "Sent message {} (offloaded to blob {})", sent.id, blob)?,
                        None => writeln!(out, "Sent message {}", sent.id)?,
                    },
                }
                Ok(())
            }

            Commands::Receive {
                visibility,
                delete,
                format,
            } => {
                let mut options = ReceiveOptions::new().with_call_options(self.call.clone());
                if let Some(visibility) = visibility {
                    options = options.with_visibility_timeout(seconds("--visibility", visibility)?);
                }

                let Some(message) = self.manager.receive::<Value>(&options).await? else {
                    match format {
                        OutputFormat::Json => writeln!(out, "null")?,
                        OutputFormat::Text => writeln!(out, "Queue is empty")?,
                    }
                    return Ok(());
                };

                match format {
                    OutputFormat::Json => write_json(out, &message)?,
                    OutputFormat::Text => {
                        writeln!(out, "id:            {}", message.id)?;
                        writeln!(out, "pop receipt:   {}", message.pop_receipt)?;
                        writeln!(out, "dequeue count: {}", message.dequeue_count)?;
                        if let Some(blob) = &message.blob_name {
                            writeln!(out, "blob:          {}", blob)?;
                        }
                        let content = match &message.content {
                            MessageContent::Payload(Value::String(text))
                            | MessageContent::Text(text) => text.clone(),
                            MessageContent::Payload(value) => value.to_string(),
                        };
                        writeln!(out, "{}", content)?;
                    }
                }

                if delete {
                    self.manager.delete(&message, &self.call).await?;
                    info!(message_id = %message.id, "Deleted received message");
                }
                Ok(())
            }

            Commands::Delete {
                id,
                pop_receipt,
                blob,
            } => {
                let id = MessageId::from_str(&id).map_err(|e| CliError::invalid("--id", e))?;
                let pop_receipt = PopReceipt::from_str(&pop_receipt)
                    .map_err(|e| CliError::invalid("--pop-receipt", e))?;
                let blob = blob
                    .map(BlobName::new)
                    .transpose()
                    .map_err(|e| CliError::invalid("--blob", e))?;

                self.manager
                    .delete_by_receipt(&id, &pop_receipt, blob.as_ref(), &self.call)
                    .await?;
                writeln!(out, "Deleted message {}", id)?;
                Ok(())
            }

            Commands::Peek { count, format } => {
                let messages = self.manager.peek_messages(count, &self.call).await?;
                write_raw_messages(out, messages, format)
            }

            Commands::Get {
                count,
                visibility,
                format,
            } => {
                let visibility = visibility
                    .map(|v| seconds("--visibility", v))
                    .transpose()?;
                let messages = self
                    .manager
                    .get_messages(count, visibility, &self.call)
                    .await?;
                write_raw_messages(out, messages, format)
            }

            Commands::Clear => {
                self.manager.clear(&self.call).await?;
                writeln!(out, "Cleared queue {}", self.manager.queue_name())?;
                Ok(())
            }

            Commands::Info { format } => {
                let attributes = self.manager.fetch_attributes(&self.call).await?;
                let info = QueueInfo {
                    queue: self.manager.queue_name().to_string(),
                    container: self.manager.container_name().to_string(),
                    threshold_bytes: self.manager.threshold().bytes(),
                    approximate_message_count: attributes.approximate_message_count,
                    metadata: attributes.metadata.into_iter().collect(),
                };
                match format {
                    OutputFormat::Json => write_json(out, &info)?,
                    OutputFormat::Text => {
                        writeln!(out, "queue:     {}", info.queue)?;
                        writeln!(out, "container: {}", info.container)?;
                        writeln!(out, "threshold: {} bytes", info.threshold_bytes)?;
                        writeln!(out, "messages:  {}", info.approximate_message_count)?;
                        for (key, value) in &info.metadata {
                            writeln!(out, "metadata:  {}={}", key, value)?;
                        }
                    }
                }
                Ok(())
            }

            Commands::Metadata { set } => {
                if !set.is_empty() {
                    let metadata = parse_metadata(&set)?;
                    self.manager.set_metadata(metadata, &self.call).await?;
                }
                let attributes = self.manager.fetch_attributes(&self.call).await?;
                let sorted: BTreeMap<_, _> = attributes.metadata.into_iter().collect();
                for (key, value) in sorted {
                    writeln!(out, "{}={}", key, value)?;
                }
                Ok(())
            }

            Commands::Policy { action } => self.execute_policy(action, out).await,

            Commands::Sas {
                permissions,
                expires_in,
                policy_id,
            } => {
                let policy = SharedAccessPolicy {
                    permissions: permissions
                        .as_deref()
                        .map(QueueAccessRights::parse)
                        .transpose()
                        .map_err(|e| CliError::invalid("--permissions", e))?
                        .unwrap_or_default(),
                    starts_at: None,
                    expires_at: expires_in
                        .map(|s| seconds("--expires-in", s).map(|d| Timestamp::now().offset(d)))
                        .transpose()?,
                };
                let token = self
                    .manager
                    .shared_access_signature(&policy, policy_id.as_deref())?;
                writeln!(out, "{}", token)?;
                Ok(())
            }

            Commands::Config { .. } | Commands::Completions { .. } => {
                Err(CliError::failed("command does not use the storage account"))
            }
        }
    }

    async fn execute_policy<W: Write>(
        &self,
        action: PolicyCommands,
        out: &mut W,
    ) -> Result<(), CliError> {
        let mut permissions = self.manager.get_permissions(&self.call).await?;

        match action {
            PolicyCommands::List => {}
            PolicyCommands::Set {
                id,
                permissions: rights,
                expires_in,
            } => {
                let policy = SharedAccessPolicy {
                    permissions: QueueAccessRights::parse(&rights)
                        .map_err(|e| CliError::invalid("--permissions", e))?,
                    starts_at: None,
                    expires_at: expires_in
                        .map(|s| seconds("--expires-in", s).map(|d| Timestamp::now().offset(d)))
                        .transpose()?,
                };
                permissions.policies.insert(id, policy);
                self.manager
                    .set_permissions(permissions.clone(), &self.call)
                    .await?;
            }
            PolicyCommands::Remove { id } => {
                if permissions.policies.remove(&id).is_none() {
                    return Err(CliError::invalid("id", format!("no policy named '{}'", id)));
                }
                self.manager
                    .set_permissions(permissions.clone(), &self.call)
                    .await?;
            }
        }

        for (id, policy) in &permissions.policies {
            let expiry = policy
                .expires_at
                .map(|t| t.to_rfc3339())
                .unwrap_or_else(|| "-".to_string());
            writeln!(out, "{}\t{}\t{}", id, policy.permissions, expiry)?;
        }
        Ok(())
    }

    async fn send_raw<W: Write>(
        &self,
        input: String,
        options: &SendOptions,
        format: OutputFormat,
        out: &mut W,
    ) -> Result<(), CliError> {
        let queue = self.account.queue_client(self.manager.queue_name());
        let queued = queue
            .add_message(
                input.into_bytes().into(),
                options.time_to_live,
                options.initial_visibility_delay,
                &options.call.context,
            )
            .await
            .map_err(|source| QueueManagerError::Queue {
                operation: operations::QUEUE_ADD_MESSAGE,
                source,
            })?;

        match format {
            OutputFormat::Json => write_json(out, &RawMessage::from(queued))?,
            OutputFormat::Text => writeln!(out, "Sent raw message {}", queued.id)?,
        }
        Ok(())
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Cancel in-flight storage calls on Ctrl-C
fn ctrl_c_token() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received, cancelling");
            trigger.cancel();
        }
    });
    token
}

fn read_input(message: Option<String>, file: Option<PathBuf>) -> Result<String, CliError> {
    if let Some(message) = message {
        return Ok(message);
    }

    if let Some(path) = file {
        let data = std::fs::read(&path)?;
        return String::from_utf8(data)
            .map_err(|_| CliError::invalid("--file", format!("{} is not UTF-8", path.display())));
    }

    let mut input = String::new();
    std::io::stdin().read_to_string(&mut input)?;
    Ok(input)
}

fn seconds(arg: &str, value: i64) -> Result<chrono::Duration, CliError> {
    if value < 0 {
        return Err(CliError::invalid(arg, "must not be negative"));
    }
    chrono::Duration::try_seconds(value).ok_or_else(|| CliError::invalid(arg, "out of range"))
}

fn parse_metadata(pairs: &[String]) -> Result<HashMap<String, String>, CliError> {
    pairs
        .iter()
        .map(|pair| match pair.split_once('=') {
            Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
            _ => Err(CliError::invalid("--set", format!("expected KEY=VALUE, got '{}'", pair))),
        })
        .collect()
}

fn write_json<W: Write, T: Serialize>(out: &mut W, value: &T) -> Result<(), CliError> {
    let rendered = serde_json::to_string_pretty(value).map_err(CliError::failed)?;
    writeln!(out, "{}", rendered)?;
    Ok(())
}

fn write_raw_messages<W: Write>(
    out: &mut W,
    messages: Vec<QueuedMessage>,
    format: OutputFormat,
) -> Result<(), CliError> {
    match format {
        OutputFormat::Json => {
            let views: Vec<RawMessage> = messages.into_iter().map(RawMessage::from).collect();
            write_json(out, &views)
        }
        OutputFormat::Text => {
            for message in messages {
                writeln!(
                    out,
                    "{}\t{}\t{}",
                    message.id,
                    message.dequeue_count,
                    message.body_text()
                )?;
            }
            Ok(())
        }
    }
}

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
