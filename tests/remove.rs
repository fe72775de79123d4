// tests/remove.rs

//! Component removal against an in-memory ledger.

mod common;

use airlift::Error;
use airlift::layout::LayoutOptions;
use airlift::ledger::{DATA_KEY, DeployedPackage, Ledger, MemorySecretStore};
use airlift::lifecycle::{RemoveOptions, RemoveReport, Remover};
use airlift::package::{Component, FileSpec, Package};
use airlift::signing;
use common::{FakeUninstaller, ScriptedActions, action, deployed, remover, two_component_package};
use tokio_util::sync::CancellationToken;

fn options(components: &[&str]) -> RemoveOptions {
    RemoveOptions {
        components: components.iter().map(|c| c.to_string()).collect(),
        local_os: "linux".to_string(),
    }
}

/// Component names and chart counts of a record
fn shape(record: &DeployedPackage) -> Vec<(String, usize)> {
    record
        .deployed_components
        .iter()
        .map(|c| (c.name.clone(), c.installed_charts.len()))
        .collect()
}

/// Every record written to the store, decoded
fn written(store: &MemorySecretStore) -> Vec<DeployedPackage> {
    store
        .history()
        .iter()
        .map(|secret| serde_json::from_slice(&secret.data[DATA_KEY]).unwrap())
        .collect()
}

#[tokio::test]
async fn test_removes_in_reverse_order_and_deletes_record() {
    let package = two_component_package();
    let remover = remover(FakeUninstaller::new());
    remover.ledger().put(&deployed(&package)).await.unwrap();

    let report = remover
        .remove(&package, &options(&[]), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(
        report,
        RemoveReport {
            removed_components: vec!["b".to_string(), "a".to_string()],
            record_deleted: true,
        }
    );
    assert_eq!(remover.uninstaller().calls(), vec!["b-chart", "a-chart"]);
    assert!(remover.ledger().get("demo").await.unwrap().is_none());

    // Every step was persisted before the record went away
    let history: Vec<_> = written(remover.ledger().store()).iter().map(shape).collect();
    assert_eq!(
        history,
        vec![
            vec![("a".to_string(), 1), ("b".to_string(), 1)],
            vec![("a".to_string(), 1), ("b".to_string(), 0)],
            vec![("a".to_string(), 1)],
            vec![("a".to_string(), 0)],
        ]
    );
}

#[tokio::test]
async fn test_removes_only_requested_components() {
    let package = two_component_package();
    let remover = remover(FakeUninstaller::new());
    remover.ledger().put(&deployed(&package)).await.unwrap();

    let report = remover
        .remove(&package, &options(&["a"]), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.removed_components, vec!["a"]);
    assert!(!report.record_deleted);
    assert_eq!(remover.uninstaller().calls(), vec!["a-chart"]);

    let record = remover.ledger().get("demo").await.unwrap().unwrap();
    assert_eq!(shape(&record), vec![("b".to_string(), 1)]);
}

#[tokio::test]
async fn test_missing_release_is_not_fatal() {
    let package = two_component_package();
    let remover = remover(FakeUninstaller::new().with_missing("b-chart"));
    remover.ledger().put(&deployed(&package)).await.unwrap();

    let report = remover
        .remove(&package, &options(&[]), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(report.removed_components, vec!["b", "a"]);
    assert!(report.record_deleted);
}

#[tokio::test]
async fn test_uninstall_failure_keeps_the_chart_recorded() {
    let mut package = two_component_package();
    package.components[0].actions.on_remove.on_failure = vec![action("cleanup-a")];
    let remover = remover(FakeUninstaller::new().with_failing("a-chart"));
    remover.ledger().put(&deployed(&package)).await.unwrap();

    let err = remover
        .remove(&package, &options(&[]), &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(&err, Error::ComponentRemoval { component, .. } if component == "a"));
    assert!(err.to_string().starts_with("unable to remove the component 'a': "));
    assert_eq!(remover.actions().ran(), vec!["cleanup-a"]);

    let record = remover.ledger().get("demo").await.unwrap().unwrap();
    assert_eq!(shape(&record), vec![("a".to_string(), 1)]);
}

#[tokio::test]
async fn test_after_hook_failure_is_resumable() {
    let mut package = two_component_package();
    package.components[0].actions.on_remove.before = vec![action("before-a")];
    package.components[0].actions.on_remove.after = vec![action("after-a")];
    package.components[0].actions.on_remove.on_success = vec![action("success-a")];
    package.components[0].actions.on_remove.on_failure = vec![action("cleanup-a")];
    let remover = remover(FakeUninstaller::new());
    remover.ledger().put(&deployed(&package)).await.unwrap();
    remover.actions().fail("after-a");
    let cancel = CancellationToken::new();

    let err = remover
        .remove(&package, &options(&[]), &cancel)
        .await
        .unwrap_err();
    assert_eq!(
        err.to_string(),
        "unable to remove the component 'a': unable to run the after action for component (a): \
         action failed: command \"after-a\" failed with exit code 1"
    );
    assert_eq!(remover.actions().ran(), vec!["before-a", "after-a", "cleanup-a"]);

    // The charts are gone but the component stays until its hooks pass
    let record = remover.ledger().get("demo").await.unwrap().unwrap();
    assert_eq!(shape(&record), vec![("a".to_string(), 0)]);

    remover.actions().heal("after-a");
    let report = remover.remove(&package, &options(&[]), &cancel).await.unwrap();
    assert_eq!(report.removed_components, vec!["a"]);
    assert!(report.record_deleted);
    assert_eq!(remover.uninstaller().calls(), vec!["b-chart", "a-chart"]);
    assert_eq!(
        remover.actions().ran(),
        vec!["before-a", "after-a", "cleanup-a", "before-a", "after-a", "success-a"]
    );
}

#[tokio::test]
async fn test_hooks_come_from_the_deployed_definition() {
    let mut snapshot = two_component_package();
    snapshot.components[1].actions.on_remove.before = vec![action("before-b")];
    let remover = remover(FakeUninstaller::new());
    remover.ledger().put(&deployed(&snapshot)).await.unwrap();

    // The caller's copy of the package has no hooks
    remover
        .remove(&two_component_package(), &options(&["b"]), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(remover.actions().ran(), vec!["before-b"]);
}

#[tokio::test]
async fn test_unknown_components_are_ignored() {
    let package = two_component_package();
    let remover = remover(FakeUninstaller::new());
    remover.ledger().put(&deployed(&package)).await.unwrap();

    let report = remover
        .remove(&package, &options(&["nope"]), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(report, RemoveReport::default());
    assert!(remover.uninstaller().calls().is_empty());
    assert!(remover.ledger().get("demo").await.unwrap().is_some());
}

#[tokio::test]
async fn test_missing_record_is_a_no_op() {
    let remover = remover(FakeUninstaller::new());
    let report = remover
        .remove(&two_component_package(), &options(&[]), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(report, RemoveReport::default());
    assert!(remover.uninstaller().calls().is_empty());
}

#[tokio::test]
async fn test_unreadable_ledger_is_fatal() {
    let remover = remover(FakeUninstaller::new());
    remover.ledger().store().set_offline(true);

    let err = remover
        .remove(&two_component_package(), &options(&[]), &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Ledger(_)));
    assert!(err.to_string().contains("unable to load the record"));
    assert!(remover.uninstaller().calls().is_empty());
}

#[tokio::test]
async fn test_local_only_package_skips_the_ledger() {
    let mut package = Package::new("tools", "1.0.0");
    let mut component = Component {
        name: "cli".to_string(),
        files: vec![FileSpec {
            source: "bin/tool".to_string(),
            target: "/usr/local/bin/tool".to_string(),
            executable: true,
        }],
        ..Default::default()
    };
    component.actions.on_remove.before = vec![action("rm /usr/local/bin/tool")];
    package.components.push(component);

    let remover = Remover::new(
        Ledger::new(MemorySecretStore::new()),
        FakeUninstaller::new(),
        ScriptedActions::new(),
    );
    // Offline store proves nothing is read or written
    remover.ledger().store().set_offline(true);

    let report = remover
        .remove(&package, &options(&[]), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(report.removed_components, vec!["cli"]);
    assert!(!report.record_deleted);
    assert_eq!(remover.actions().ran(), vec!["rm /usr/local/bin/tool"]);
    assert!(remover.ledger().store().history().is_empty());
}

#[tokio::test]
async fn test_cancelled_removal_leaves_record_untouched() {
    let package = two_component_package();
    let remover = remover(FakeUninstaller::new());
    remover.ledger().put(&deployed(&package)).await.unwrap();

    let cancel = CancellationToken::new();
    cancel.cancel();
    let err = remover
        .remove(&package, &options(&[]), &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Cancelled));

    let record = remover.ledger().get("demo").await.unwrap().unwrap();
    assert_eq!(shape(&record), vec![("a".to_string(), 1), ("b".to_string(), 1)]);
}

#[tokio::test]
async fn test_os_restricted_components_are_left_alone() {
    let mut package = two_component_package();
    package.components[1].only.local_os = Some("windows".to_string());
    let remover = remover(FakeUninstaller::new());
    remover.ledger().put(&deployed(&package)).await.unwrap();

    let report = remover
        .remove(&package, &options(&[]), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(report.removed_components, vec!["a"]);
    assert!(!report.record_deleted);
    assert_eq!(remover.uninstaller().calls(), vec!["a-chart"]);
}

#[tokio::test]
async fn test_ledger_write_failures_do_not_stop_removal() {
    let package = two_component_package();
    let remover = remover(FakeUninstaller::new());
    remover.ledger().put(&deployed(&package)).await.unwrap();
    remover.ledger().store().set_read_only(true);

    let report = remover
        .remove(&package, &options(&[]), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(report.removed_components, vec!["b", "a"]);
    assert!(!report.record_deleted);
    assert_eq!(remover.uninstaller().calls(), vec!["b-chart", "a-chart"]);

    // Only the initial deploy ever reached the store
    assert_eq!(remover.ledger().store().history().len(), 1);
    let record = remover.ledger().get("demo").await.unwrap().unwrap();
    assert_eq!(shape(&record), vec![("a".to_string(), 1), ("b".to_string(), 1)]);
}

#[tokio::test]
async fn test_signed_package_needs_the_key_to_remove() {
    let (_src, mut layout) = common::build_layout("amd64");
    let (_keys, private, public) = common::signing_keys();
    signing::sign_layout(&mut layout, &private, None).unwrap();

    let remover = remover(FakeUninstaller::new());
    remover.ledger().put(&deployed(&layout.package)).await.unwrap();
    let cancel = CancellationToken::new();

    let err = remover
        .remove_layout(layout.dir(), &LayoutOptions::default(), &options(&[]), &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::SignedWithoutKey));
    assert!(remover.uninstaller().calls().is_empty());
    assert!(remover.ledger().get("podinfo").await.unwrap().is_some());

    let keyed = LayoutOptions {
        public_key_path: Some(public),
        ..Default::default()
    };
    let report = remover
        .remove_layout(layout.dir(), &keyed, &options(&[]), &cancel)
        .await
        .unwrap();
    assert_eq!(report.removed_components, vec!["podinfo"]);
    assert!(report.record_deleted);
    assert_eq!(remover.uninstaller().calls(), vec!["podinfo"]);
    assert!(remover.ledger().get("podinfo").await.unwrap().is_none());
}
