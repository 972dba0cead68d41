//! gatesyncd: the gatesync control-plane binary.
//!
//! Opens the control-plane store and the data-plane registry named in
//! `gatesync.toml`, then runs one release operation.
//!
//! # Usage
//!
//! ```text
//! gatesyncd --config /etc/gatesync/gatesync.toml publish --gateway 1 --stage prod --version-id 7
//! gatesyncd --config /etc/gatesync/gatesync.toml status --publish-id 42
//! ```

use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser, Debug)]
#[command(name = "gatesyncd", about = "gatesync release and runtime-config sync", version)]
struct Cli {
    /// Path to gatesync.toml. Defaults apply when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Emit logs as JSON.
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Publish a resource version to one or more stages and wait for the jobs.
    Publish {
        #[arg(long)]
        gateway: u64,
        /// Stage name. Repeat for several stages.
        #[arg(long = "stage", required = true)]
        stages: Vec<String>,
        #[arg(long)]
        version_id: u64,
        #[arg(long, default_value = "admin")]
        user: String,
        #[arg(long, default_value = "")]
        comment: String,
    },
    /// Show the events of one publish.
    Status {
        #[arg(long)]
        publish_id: u64,
    },
    /// Remove a stage's resources from its clusters.
    Revoke {
        #[arg(long)]
        gateway: u64,
        #[arg(long)]
        stage: String,
        #[arg(long, default_value = "admin")]
        user: String,
        #[arg(long, default_value = "")]
        comment: String,
    },
    /// Wipe every registry key of a micro-gateway.
    Decommission {
        #[arg(long)]
        micro_gateway: String,
    },
    /// Drop unreleased resource versions beyond the retention limit.
    Cleanup {
        #[arg(long)]
        gateway: u64,
    },
    /// Reconcile plugin bindings with a YAML declaration.
    SyncPlugins {
        #[arg(long)]
        gateway: u64,
        /// YAML list of `{scope, scope_id, plugins: [{type_code, yaml}]}`.
        #[arg(long)]
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new("info,gatesync=debug"))?;
    if cli.json_logs {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    let ctx = commands::Context::open(cli.config.as_deref())?;

    match cli.command {
        Command::Publish {
            gateway,
            stages,
            version_id,
            user,
            comment,
        } => commands::release::publish(&ctx, gateway, &stages, version_id, user, comment).await,
        Command::Status { publish_id } => commands::release::status(&ctx, publish_id),
        Command::Revoke {
            gateway,
            stage,
            user,
            comment,
        } => commands::release::revoke(&ctx, gateway, &stage, user, comment).await,
        Command::Decommission { micro_gateway } => {
            commands::cluster::decommission(&ctx, &micro_gateway)
        }
        Command::Cleanup { gateway } => commands::cluster::cleanup(&ctx, gateway),
        Command::SyncPlugins { gateway, file } => commands::plugins::sync(&ctx, gateway, &file),
    }
}
