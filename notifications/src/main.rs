//! Check notification configuration and send test events

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use notifications::{
    Action, ActorRecord, Descriptor, NotificationsConfig, Notifier, RequestRecord,
    RouteUrlBuilder, SourceRecord,
};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Registry event notification tool
#[derive(Debug, Parser)]
#[command(name = "registry-notify", version, about, long_about = None)]
struct Args {
    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Plain, global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormat {
    Plain,
    Json,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Parse and validate a configuration file
    Check {
        /// Path to the notifications config
        config: PathBuf,
    },

    /// Send one event to every enabled endpoint
    Send {
        /// Path to the notifications config
        config: PathBuf,

        /// Repository the event is about
        #[arg(long)]
        repository: String,

        /// Digest of the target
        #[arg(long)]
        digest: String,

        /// Event action
        #[arg(long, default_value = "push")]
        action: Action,

        /// Tag to delete, with `--action delete`
        #[arg(long)]
        tag: Option<String>,

        /// Repository a blob is mounted from, with `--action mount`
        #[arg(long, required_if_eq("action", "mount"))]
        from_repository: Option<String>,

        /// Media type of the target
        #[arg(long, default_value = "application/octet-stream")]
        media_type: String,

        /// Size of the target in bytes
        #[arg(long, default_value_t = 0)]
        size: u64,

        /// Registry address placed in the event source
        #[arg(long, default_value = "localhost:5000")]
        source: String,
    },
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Plain => registry.with(tracing_subscriber::fmt::layer()).init(),
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_tracing(args.log_format);

    let result = match args.command {
        Command::Check { config } => check(config).await,
        Command::Send {
            config,
            repository,
            digest,
            action,
            tag,
            media_type,
            size,
            from_repository,
            source,
        } => {
            let blob = Descriptor {
                media_type,
                digest,
                size,
            };
            let target = Target {
                repository,
                tag,
                from_repository,
            };
            send(config, source, action, blob, target).await
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            tracing::error!("{error}");
            ExitCode::FAILURE
        }
    }
}

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug)]
struct Target {
    repository: String,
    tag: Option<String>,
    from_repository: Option<String>,
}

async fn check(path: PathBuf) -> Result<(), BoxError> {
    let config = NotificationsConfig::load(&path).await?;

    let lines = enabled_endpoints(&config);
    for line in &lines {
        println!("{line}");
    }

    let enabled = lines.len();
    tracing::info!(
        path = %path.display(),
        enabled,
        disabled = config.endpoints.len() - enabled,
        "config is valid"
    );
    Ok(())
}

fn enabled_endpoints(config: &NotificationsConfig) -> Vec<String> {
    config
        .enabled()
        .map(|endpoint| format!("{}\t{}", endpoint.name, endpoint.url))
        .collect()
}

async fn send(
    path: PathBuf,
    source: String,
    action: Action,
    blob: Descriptor,
    target: Target,
) -> Result<(), BoxError> {
    let config = NotificationsConfig::load(&path).await?;
    let notifier = Notifier::from_config(
        &config,
        SourceRecord::new(source),
        Arc::new(RouteUrlBuilder::new()),
    )?;

    let request = RequestRecord {
        id: uuid::Uuid::new_v4().to_string(),
        method: "POST".into(),
        user_agent: concat!("registry-notify/", env!("CARGO_PKG_VERSION")).into(),
        ..Default::default()
    };
    let bridge = notifier.bridge(ActorRecord::new("registry-notify"), request);

    let repository = target.repository.as_str();
    let sent = match (action, target.tag.as_deref()) {
        (Action::Delete, Some(tag)) => bridge.tag_deleted(repository, tag).await,
        (Action::Delete, None) => bridge.blob_deleted(repository, &blob.digest).await,
        (Action::Push, _) => bridge.blob_pushed(repository, &blob).await,
        (Action::Pull, _) => bridge.blob_pulled(repository, &blob).await,
        (Action::Mount, _) => {
            let from = target.from_repository.as_deref().unwrap_or_default();
            bridge.blob_mounted(repository, &blob, from).await
        }
    };
    if let Err(error) = &sent {
        tracing::warn!(%error, "event was not sent");
    }

    notifier.close().await?;

    let metrics: serde_json::Map<String, serde_json::Value> = notifier
        .endpoints()
        .map(|endpoint| {
            serde_json::to_value(endpoint.metrics()).map(|m| (endpoint.name().to_owned(), m))
        })
        .collect::<Result<_, _>>()?;
    println!("{}", serde_json::to_string_pretty(&metrics)?);

    sent.map_err(Into::into)
}
