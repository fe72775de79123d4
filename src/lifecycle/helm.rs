// src/lifecycle/helm.rs
//! Chart release removal

use crate::error::{Error, Result};
use crate::ledger::InstalledChart;
use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Uninstalls chart releases
///
/// A release that no longer exists must be reported as
/// [`Error::ReleaseNotFound`] so removal can treat it as already done.
#[async_trait]
pub trait ReleaseUninstaller: Send + Sync {
    async fn uninstall(
        &self,
        chart: &InstalledChart,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<()>;
}

/// Uninstalls releases with the `helm` binary
#[derive(Debug, Clone)]
pub struct HelmUninstaller {
    binary: PathBuf,
}

impl Default for HelmUninstaller {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("helm"),
        }
    }
}

impl HelmUninstaller {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a specific helm binary
    pub fn with_binary(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

/// Map helm's stderr to an error kind
fn classify_failure(chart: &InstalledChart, stderr: &str) -> Error {
    let lower = stderr.to_lowercase();
    if lower.contains("kubernetes cluster unreachable") {
        Error::ClusterUnavailable(stderr.trim().to_string())
    } else if lower.contains("release: not found") {
        Error::ReleaseNotFound {
            namespace: chart.namespace.clone(),
            release: chart.chart_name.clone(),
        }
    } else {
        Error::Uninstall {
            namespace: chart.namespace.clone(),
            release: chart.chart_name.clone(),
            message: stderr.trim().to_string(),
        }
    }
}

#[async_trait]
impl ReleaseUninstaller for HelmUninstaller {
    async fn uninstall(
        &self,
        chart: &InstalledChart,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<()> {
        info!(
            "Uninstalling release {} in namespace {}",
            chart.chart_name, chart.namespace
        );
        let child = Command::new(&self.binary)
            .arg("uninstall")
            .arg(&chart.chart_name)
            .arg("--namespace")
            .arg(&chart.namespace)
            .arg("--wait")
            .arg("--timeout")
            .arg(format!("{}s", timeout.as_secs()))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                Error::ClusterUnavailable(format!("failed to run {}: {}", self.binary.display(), e))
            })?;

        let output = tokio::select! {
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            output = child.wait_with_output() => output?,
        };

        if output.status.success() {
            debug!("{}", String::from_utf8_lossy(&output.stdout).trim());
            Ok(())
        } else {
            Err(classify_failure(chart, &String::from_utf8_lossy(&output.stderr)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_failure() {
        let chart = InstalledChart::new("podinfo", "podinfo");

        let err = classify_failure(&chart, "Error: uninstall: Release not loaded: podinfo: release: not found\n");
        assert!(err.is_release_not_found());

        let err = classify_failure(&chart, "Error: Kubernetes cluster unreachable: connection refused");
        assert!(err.is_cluster_unavailable());

        let err = classify_failure(&chart, "Error: timed out waiting for the condition");
        assert_eq!(
            err.to_string(),
            "unable to uninstall the chart podinfo in the namespace podinfo: Error: timed out waiting for the condition"
        );

        let err = classify_failure(&chart, "Error: kubeconfig not found at /root/.kube/config");
        assert!(matches!(err, Error::Uninstall { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_missing_binary_is_unavailable() {
        let helm = HelmUninstaller::with_binary("/nonexistent/helm");
        let err = helm
            .uninstall(
                &InstalledChart::new("podinfo", "podinfo"),
                Duration::from_secs(5),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(err.is_cluster_unavailable());
    }
}
