// src/lifecycle/mod.rs
//! Component removal
//!
//! Each component moves through a fixed sequence of states:
//!
//! ```text
//! Pending -> BeforeHooksRun -> ChartsRemoving -> AfterHooksRun -> SuccessHooksRun -> Finalized
//! ```
//!
//! A failure in any state runs the component's on-failure hooks (their own
//! errors are only logged) and stops the removal. Progress made so far stays
//! in the ledger: every uninstalled chart is persisted as soon as it is gone,
//! and a component only leaves the ledger once it reaches `Finalized`. Running
//! the removal again resumes from what the ledger still lists.
//!
//! Two removals of the same package at once are not supported; nothing here
//! locks the ledger record.

mod actions;
mod helm;

pub use actions::{ActionRunner, ShellActionRunner};
pub use helm::{HelmUninstaller, ReleaseUninstaller};

use crate::error::{Error, HookStage, Result};
use crate::layout::{LayoutOptions, PackageLayout};
use crate::ledger::{DeployedComponent, DeployedPackage, Ledger, SecretStore};
use crate::package::{ActionSet, ComponentFilter, Package};
use std::collections::HashSet;
use std::fmt;
use std::path::Path;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Per-component removal state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RemovalState {
    Pending,
    BeforeHooksRun,
    ChartsRemoving,
    AfterHooksRun,
    SuccessHooksRun,
    Finalized,
}

/// Successful transitions; any failure leaves the state machine
const TRANSITIONS: [(RemovalState, RemovalState); 5] = [
    (RemovalState::Pending, RemovalState::BeforeHooksRun),
    (RemovalState::BeforeHooksRun, RemovalState::ChartsRemoving),
    (RemovalState::ChartsRemoving, RemovalState::AfterHooksRun),
    (RemovalState::AfterHooksRun, RemovalState::SuccessHooksRun),
    (RemovalState::SuccessHooksRun, RemovalState::Finalized),
];

impl RemovalState {
    /// State entered when the work of this state succeeds
    pub fn next(self) -> Option<Self> {
        TRANSITIONS
            .iter()
            .find(|(from, _)| *from == self)
            .map(|(_, to)| *to)
    }

    /// Hook stage run in this state, if it is a hook state
    pub fn hook_stage(self) -> Option<HookStage> {
        match self {
            Self::BeforeHooksRun => Some(HookStage::Before),
            Self::AfterHooksRun => Some(HookStage::After),
            Self::SuccessHooksRun => Some(HookStage::OnSuccess),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        self.next().is_none()
    }
}

impl fmt::Display for RemovalState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Pending => "pending",
            Self::BeforeHooksRun => "before-hooks",
            Self::ChartsRemoving => "charts-removing",
            Self::AfterHooksRun => "after-hooks",
            Self::SuccessHooksRun => "success-hooks",
            Self::Finalized => "finalized",
        };
        f.write_str(name)
    }
}

/// Options for a removal
#[derive(Debug, Clone)]
pub struct RemoveOptions {
    /// Components to remove; empty removes every deployed component
    pub components: Vec<String>,
    /// OS used for `only.local_os` filtering
    pub local_os: String,
}

impl Default for RemoveOptions {
    fn default() -> Self {
        Self {
            components: Vec::new(),
            local_os: std::env::consts::OS.to_string(),
        }
    }
}

/// What a removal did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoveReport {
    /// Components finalized, in removal order
    pub removed_components: Vec<String>,
    /// Whether the package's ledger record was deleted
    pub record_deleted: bool,
}

/// Removes deployed components
pub struct Remover<S, U, A> {
    ledger: Ledger<S>,
    uninstaller: U,
    actions: A,
    chart_timeout: Duration,
}

/// Default per-chart uninstall timeout
pub const DEFAULT_CHART_TIMEOUT: Duration = Duration::from_secs(300);

impl<S, U, A> Remover<S, U, A>
where
    S: SecretStore,
    U: ReleaseUninstaller,
    A: ActionRunner,
{
    pub fn new(ledger: Ledger<S>, uninstaller: U, actions: A) -> Self {
        Self {
            ledger,
            uninstaller,
            actions,
            chart_timeout: DEFAULT_CHART_TIMEOUT,
        }
    }

    pub fn with_chart_timeout(mut self, timeout: Duration) -> Self {
        self.chart_timeout = timeout;
        self
    }

    pub fn ledger(&self) -> &Ledger<S> {
        &self.ledger
    }

    pub fn uninstaller(&self) -> &U {
        &self.uninstaller
    }

    pub fn actions(&self) -> &A {
        &self.actions
    }

    /// Remove the package at `path` (layout directory or archive)
    ///
    /// The definition goes through full layout validation first, so a signed
    /// package cannot drive removal hooks without its key.
    pub async fn remove_layout(
        &self,
        path: &Path,
        layout_options: &LayoutOptions,
        options: &RemoveOptions,
        cancel: &CancellationToken,
    ) -> Result<RemoveReport> {
        let layout = PackageLayout::open(path, layout_options)?;
        self.remove(&layout.package, options, cancel).await
    }

    /// Remove a package, or the requested subset of its components
    ///
    /// Components are removed in reverse installation order. Requested names
    /// that are not deployed are ignored.
    pub async fn remove(
        &self,
        package: &Package,
        options: &RemoveOptions,
        cancel: &CancellationToken,
    ) -> Result<RemoveReport> {
        let name = &package.metadata.name;
        let filter = ComponentFilter::by_local_os(&options.local_os)
            .with_requested(options.components.iter().cloned());
        let included = filter.apply(package);
        let requested: HashSet<&str> = included.iter().map(|c| c.name.as_str()).collect();
        let requires_cluster = included.iter().any(|c| c.requires_cluster());

        let mut record = if requires_cluster {
            match self.ledger.get(name).await {
                Ok(Some(record)) => record,
                Ok(None) => {
                    info!("Package {} has no ledger record, nothing to remove", name);
                    return Ok(RemoveReport::default());
                }
                Err(e) => {
                    return Err(Error::Ledger(format!(
                        "unable to load the record for the package we are attempting to remove: {}",
                        e
                    )));
                }
            }
        } else {
            let mut record = DeployedPackage::new(package.clone());
            record.deployed_components = included
                .iter()
                .map(|c| DeployedComponent::new(&c.name))
                .collect();
            record
        };

        let order: Vec<String> = record
            .deployed_components
            .iter()
            .rev()
            .map(|c| c.name.clone())
            .filter(|c| requested.contains(c.as_str()))
            .collect();
        debug!("Removal order for {}: {:?}", name, order);

        let mut report = RemoveReport::default();
        for component in order {
            let deleted = self
                .remove_component(&mut record, package, &component, requires_cluster, cancel)
                .await
                .map_err(|e| match e {
                    Error::Cancelled => Error::Cancelled,
                    e => Error::ComponentRemoval {
                        component: component.clone(),
                        source: Box::new(e),
                    },
                })?;
            info!("Removed component {} from {}", component, name);
            report.removed_components.push(component);
            report.record_deleted |= deleted;
        }
        Ok(report)
    }

    /// Drive one component to `Finalized`
    ///
    /// Returns whether the package record was deleted.
    async fn remove_component(
        &self,
        record: &mut DeployedPackage,
        package: &Package,
        component: &str,
        connected: bool,
        cancel: &CancellationToken,
    ) -> Result<bool> {
        let hooks = record
            .data
            .component(component)
            .or_else(|| package.component(component))
            .map(|c| c.actions.on_remove.clone())
            .unwrap_or_default();

        let mut state = RemovalState::Pending;
        loop {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            debug!("Component {} is {}", component, state);

            let outcome = match state {
                RemovalState::Pending => Ok(()),
                RemovalState::BeforeHooksRun
                | RemovalState::AfterHooksRun
                | RemovalState::SuccessHooksRun => self.run_hooks(state, &hooks, component, cancel).await,
                RemovalState::ChartsRemoving => {
                    self.remove_charts(record, component, connected, cancel).await
                }
                RemovalState::Finalized => {
                    return Ok(self.finalize(record, component, connected).await);
                }
            };

            if let Err(e) = outcome {
                if !matches!(e, Error::Cancelled) {
                    self.run_failure_hooks(&hooks, component, cancel).await;
                }
                return Err(e);
            }
            state = match state.next() {
                Some(next) => next,
                None => return Ok(false),
            };
        }
    }

    async fn run_hooks(
        &self,
        state: RemovalState,
        hooks: &ActionSet,
        component: &str,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let (stage, actions) = match state.hook_stage() {
            Some(HookStage::Before) => (HookStage::Before, &hooks.before),
            Some(HookStage::After) => (HookStage::After, &hooks.after),
            Some(HookStage::OnSuccess) => (HookStage::OnSuccess, &hooks.on_success),
            _ => return Ok(()),
        };
        if actions.is_empty() {
            return Ok(());
        }
        self.actions
            .run(&hooks.defaults, actions, cancel)
            .await
            .map_err(|e| match e {
                Error::Cancelled => Error::Cancelled,
                e => Error::Hook {
                    stage,
                    component: component.to_string(),
                    source: Box::new(e),
                },
            })
    }

    async fn run_failure_hooks(&self, hooks: &ActionSet, component: &str, cancel: &CancellationToken) {
        if hooks.on_failure.is_empty() {
            return;
        }
        if let Err(e) = self
            .actions
            .run(&hooks.defaults, &hooks.on_failure, cancel)
            .await
        {
            debug!(
                "Unable to run the {} action for component {}: {}",
                HookStage::OnFailure,
                component,
                e
            );
        }
    }

    /// Uninstall the component's charts, newest first, persisting after each
    async fn remove_charts(
        &self,
        record: &mut DeployedPackage,
        component: &str,
        connected: bool,
        cancel: &CancellationToken,
    ) -> Result<()> {
        loop {
            let Some(chart) = record
                .component(component)
                .and_then(|c| c.installed_charts.last().cloned())
            else {
                return Ok(());
            };

            match self
                .uninstaller
                .uninstall(&chart, self.chart_timeout, cancel)
                .await
            {
                Ok(()) => {}
                Err(e) if e.is_release_not_found() => {
                    warn!(
                        chart = %chart.chart_name,
                        namespace = %chart.namespace,
                        "Release for chart was not found"
                    );
                }
                Err(e) => return Err(e),
            }

            if let Some(deployed) = record.component_mut(component) {
                deployed.installed_charts.retain(|c| c != &chart);
            }
            if connected {
                self.ledger.persist(record).await;
            }
        }
    }

    /// Drop the component from the record and store or delete the record
    async fn finalize(&self, record: &mut DeployedPackage, component: &str, connected: bool) -> bool {
        record.remove_component(component);
        if !connected {
            return false;
        }
        if record.deployed_components.is_empty() {
            self.ledger.forget(&record.name).await
        } else {
            self.ledger.persist(record).await;
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transition_table_is_linear() {
        let mut state = RemovalState::Pending;
        let mut visited = vec![state];
        while let Some(next) = state.next() {
            visited.push(next);
            state = next;
        }
        assert_eq!(
            visited,
            vec![
                RemovalState::Pending,
                RemovalState::BeforeHooksRun,
                RemovalState::ChartsRemoving,
                RemovalState::AfterHooksRun,
                RemovalState::SuccessHooksRun,
                RemovalState::Finalized,
            ]
        );
        assert!(RemovalState::Finalized.is_terminal());
        assert!(!RemovalState::ChartsRemoving.is_terminal());
    }

    #[test]
    fn test_hook_stages() {
        assert_eq!(RemovalState::BeforeHooksRun.hook_stage(), Some(HookStage::Before));
        assert_eq!(RemovalState::AfterHooksRun.hook_stage(), Some(HookStage::After));
        assert_eq!(
            RemovalState::SuccessHooksRun.hook_stage(),
            Some(HookStage::OnSuccess)
        );
        assert_eq!(RemovalState::ChartsRemoving.hook_stage(), None);
    }
}
