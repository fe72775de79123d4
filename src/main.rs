// src/main.rs

use airlift::config::Config;
use airlift::oci::RemoteOptions;
use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::warn;

mod cli;
mod commands;

use cli::{Cli, Commands};
use commands::Session;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing subscriber for logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let config = Config::load(cli.config.as_deref()).context("Failed to load configuration")?;
    let session = Session {
        remote: RemoteOptions {
            plain_http: cli.plain_http || config.plain_http,
            insecure_skip_tls_verify: cli.insecure_skip_tls_verify,
        },
        config,
    };

    // Ctrl-C cancels in-flight transfers and removals
    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling");
            on_signal.cancel();
        }
    });

    match cli.command {
        Commands::Create {
            source_dir,
            output,
            architecture,
            signing_key,
        } => commands::cmd_create(
            &source_dir,
            &output,
            architecture.as_deref(),
            signing_key.as_deref(),
        ),
        Commands::Sign {
            package,
            key,
            output,
        } => commands::cmd_sign(&package, &key, output.as_deref()),
        Commands::Keygen {
            output,
            name,
            key_id,
            seal,
        } => commands::cmd_keygen(&output, &name, key_id.as_deref(), seal),
        Commands::Publish {
            package,
            location,
            key,
            skeleton,
            architecture,
        } => {
            commands::cmd_publish(
                &session,
                &package,
                &location,
                key.as_deref(),
                skeleton,
                architecture,
                &cancel,
            )
            .await
        }
        Commands::Pull {
            reference,
            output,
            key,
            components,
            architecture,
        } => {
            commands::cmd_pull(
                &session,
                &reference,
                &output,
                key.as_deref(),
                components,
                architecture,
                &cancel,
            )
            .await
        }
        Commands::Copy {
            source,
            destination,
            architecture,
        } => commands::cmd_copy(&session, &source, &destination, architecture, &cancel).await,
        Commands::Inspect {
            package,
            key,
            skip_signature_validation,
            list_images,
        } => commands::cmd_inspect(&package, key.as_deref(), skip_signature_validation, list_images),
        Commands::Sbom {
            package,
            output,
            key,
        } => commands::cmd_sbom(&package, &output, key.as_deref()),
        Commands::Remove {
            package,
            key,
            components,
            helm,
        } => {
            commands::cmd_remove(&session, &package, key.as_deref(), components, helm, &cancel)
                .await
        }
        Commands::List => commands::cmd_list(&session).await,
    }
}
