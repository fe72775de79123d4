// src/commands/remove.rs
//! Deployment commands: remove, list

use super::Session;
use airlift::layout::LayoutOptions;
use airlift::ledger::{DirSecretStore, Ledger};
use airlift::lifecycle::{HelmUninstaller, RemoveOptions, Remover, ShellActionRunner};
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;

fn ledger(session: &Session) -> Ledger<DirSecretStore> {
    Ledger::new(DirSecretStore::new(&session.config.ledger_dir))
}

/// Remove a deployed package, or some of its components
///
/// `package` is a package archive or layout directory when such a path
/// exists, and otherwise the name of a package recorded in the ledger.
pub async fn cmd_remove(
    session: &Session,
    package: &str,
    key: Option<&Path>,
    components: Vec<String>,
    helm: PathBuf,
    cancel: &CancellationToken,
) -> Result<()> {
    let remover = Remover::new(
        ledger(session),
        HelmUninstaller::with_binary(helm),
        ShellActionRunner::new(),
    )
    .with_chart_timeout(Duration::from_secs(session.config.chart_timeout_secs));
    let options = RemoveOptions {
        components,
        ..Default::default()
    };

    let path = Path::new(package);
    let report = if path.exists() {
        let layout_options = LayoutOptions {
            public_key_path: key.map(Path::to_path_buf),
            ..Default::default()
        };
        info!("Removing package from {}", path.display());
        remover
            .remove_layout(path, &layout_options, &options, cancel)
            .await
            .with_context(|| format!("Failed to remove package {}", path.display()))?
    } else {
        let definition = remover
            .ledger()
            .get(package)
            .await
            .with_context(|| format!("Failed to read the ledger record for {}", package))?
            .map(|record| record.data)
            .with_context(|| format!("Package {} is not deployed", package))?;
        info!("Removing package {}", definition.metadata.name);
        remover.remove(&definition, &options, cancel).await?
    };

    if report.removed_components.is_empty() {
        println!("Nothing to remove for {}", package);
    } else {
        println!(
            "Removed {} from {}",
            report.removed_components.join(", "),
            package
        );
    }
    if report.record_deleted {
        println!("Package {} is no longer deployed", package);
    }
    Ok(())
}

/// List packages recorded in the ledger
pub async fn cmd_list(session: &Session) -> Result<()> {
    let records = ledger(session)
        .list()
        .await
        .context("Failed to read the ledger")?;
    if records.is_empty() {
        println!("No packages deployed");
        return Ok(());
    }
    for record in records {
        let components: Vec<&str> = record
            .deployed_components
            .iter()
            .map(|c| c.name.as_str())
            .collect();
        println!(
            "{} {} [{}]",
            record.name,
            record.data.metadata.version,
            components.join(", ")
        );
    }
    Ok(())
}
