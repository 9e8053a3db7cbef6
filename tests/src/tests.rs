use std::{fs, sync::Arc, time::Duration};

use migrator::{
    discovery::discover,
    registry::{DirectoryRegistry, MemoryRegistry},
    simulation::SimulatedDeployer,
    store::{FileStateStore, MigrationStateStore},
    ConfigurationError, DeploymentError, MigrateError, MigrationRunner, MigrationSet,
    MigrationUnit, RunOptions,
};
use migrator_deployments::{all_migrations, deploy_ledger, deploy_registry, LEDGER_CAPACITY};
use serde_json::json;

use crate::support::*;

#[tokio::test]
async fn test_bootstrap_applies_everything_in_order() {
    let harness = Harness::new();
    let network = network("test");
    let report = harness
        .runner
        .run(&network, vec![deploy(3, "C"), deploy(1, "A"), deploy(2, "B")])
        .await
        .expect("run");

    assert_eq!(report.previously_completed, 0);
    assert_eq!(report.applied, vec![1, 2, 3]);
    assert_eq!(report.completed_through, 3);
    assert_eq!(harness.deployed(), vec!["A", "B", "C"]);
    assert_eq!(harness.completed_through("test").await, 3);
}

#[tokio::test]
async fn test_rerun_is_a_no_op() {
    let harness = Harness::new();
    let network = network("test");
    let units = || vec![deploy(1, "A"), deploy(2, "B")];
    harness.runner.run(&network, units()).await.expect("first run");
    let calls = harness.deployer.calls().len();

    let report = harness.runner.run(&network, units()).await.expect("second run");
    assert!(report.applied.is_empty());
    assert_eq!(report.completed_through, 2);
    assert_eq!(harness.deployer.calls().len(), calls);
    assert_eq!(harness.completed_through("test").await, 2);
}

#[tokio::test]
async fn test_registry_then_ledger_scenario() {
    let harness = Harness::new();
    let network = network("test");
    let units = || vec![deploy_registry(1), deploy_ledger(2)];

    let report = harness.runner.run(&network, units()).await.expect("first run");
    let calls = harness.deployer.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].artifact, "Registry");
    assert_eq!(calls[1].artifact, "Ledger");
    let registry_address = calls[0].address.clone().expect("registry deployed");
    assert_eq!(calls[1].args, vec![json!(registry_address), json!(LEDGER_CAPACITY)]);
    assert_eq!(report.deployments.len(), 2);
    assert_eq!(harness.completed_through("test").await, 2);

    harness.runner.run(&network, units()).await.expect("second run");
    assert_eq!(harness.deployer.calls().len(), 2);
    assert_eq!(harness.completed_through("test").await, 2);
}

#[tokio::test]
async fn test_failed_unit_stops_the_run() {
    let harness = Harness::new();
    harness.deployer.reject("B");
    let network = network("test");
    let units = || vec![deploy(1, "A"), deploy(2, "B"), deploy(3, "C")];

    let err = harness.runner.run(&network, units()).await.unwrap_err();
    match &err {
        MigrateError::MigrationFailed {
            network,
            sequence,
            cause: DeploymentError::Rejected { artifact, .. },
        } => {
            assert_eq!(network, "test");
            assert_eq!(*sequence, 2);
            assert_eq!(artifact, "B");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(err.sequence(), Some(2));
    assert!(!harness.deployer.calls().iter().any(|call| call.artifact == "C"));
    assert_eq!(harness.completed_through("test").await, 1);

    // the next run retries only the failed unit onwards
    harness.deployer.heal();
    let report = harness.runner.run(&network, units()).await.expect("resume");
    assert_eq!(report.previously_completed, 1);
    assert_eq!(report.applied, vec![2, 3]);
    assert_eq!(harness.deployed(), vec!["A", "B", "C"]);
}

#[tokio::test]
async fn test_marker_never_decreases_under_failures() {
    let harness = Harness::new();
    let network = network("test");
    let units = || {
        ["A", "B", "C", "D"]
            .iter()
            .zip(1..)
            .map(|(artifact, sequence)| deploy(sequence, artifact))
            .collect::<Vec<_>>()
    };

    let mut markers = vec![];
    for reject_from in [1, 3, 0, usize::MAX] {
        harness.deployer.heal();
        harness.deployer.reject_from_call(reject_from);
        let _ = harness.runner.run(&network, units()).await;
        markers.push(harness.completed_through("test").await);
    }
    assert!(markers.windows(2).all(|pair| pair[0] <= pair[1]), "{markers:?}");
    assert_eq!(markers.last(), Some(&4));
}

#[tokio::test]
async fn test_duplicate_sequence_rejected_before_any_io() {
    let harness = Harness::new();
    FlakyStore::set(&harness.store.fail_load, true);
    let err = harness
        .runner
        .run(&network("test"), vec![deploy(1, "A"), deploy(1, "B")])
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        MigrateError::Configuration(ConfigurationError::DuplicateSequence { sequence: 1, .. })
    ));
    assert!(harness.deployer.calls().is_empty());
}

#[tokio::test]
async fn test_retroactive_insert_is_rejected() {
    let harness = Harness::new();
    let network = network("test");
    harness
        .runner
        .run(&network, vec![deploy(1, "A"), deploy(3, "C")])
        .await
        .expect("run");

    let err = harness
        .runner
        .run(&network, vec![deploy(1, "A"), deploy(2, "B"), deploy(3, "C")])
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        MigrateError::Configuration(ConfigurationError::RetroactiveInsert { sequence: 2, .. })
    ));

    // appending above the marker is fine
    let report = harness
        .runner
        .run(&network, vec![deploy(1, "A"), deploy(3, "C"), deploy(4, "D")])
        .await
        .expect("append");
    assert_eq!(report.applied, vec![4]);
    assert_eq!(harness.deployed(), vec!["A", "C", "D"]);
}

#[tokio::test]
async fn test_store_unavailable_makes_no_progress() {
    let harness = Harness::new();
    FlakyStore::set(&harness.store.fail_load, true);
    let err = harness
        .runner
        .run(&network("test"), vec![deploy(1, "A")])
        .await
        .unwrap_err();
    assert!(matches!(err, MigrateError::StoreUnavailable { .. }));
    assert!(harness.deployer.calls().is_empty());
}

#[tokio::test]
async fn test_unrecorded_progress_is_distinguished_and_reapplied() {
    let harness = Harness::new();
    let network = network("test");
    let units = || vec![deploy(1, "A"), deploy(2, "B")];
    FlakyStore::set(&harness.store.fail_advance, true);

    let err = harness.runner.run(&network, units()).await.unwrap_err();
    assert!(matches!(
        err,
        MigrateError::ProgressNotRecorded { sequence: 1, .. }
    ));
    assert_eq!(harness.deployed(), vec!["A"]);
    assert_eq!(harness.completed_through("test").await, 0);

    // the ambiguous unit runs again once the store is back
    FlakyStore::set(&harness.store.fail_advance, false);
    let report = harness.runner.run(&network, units()).await.expect("resume");
    assert_eq!(report.applied, vec![1, 2]);
    assert_eq!(harness.deployed(), vec!["A", "A", "B"]);
}

#[tokio::test]
async fn test_concurrent_advance_is_an_invariant_violation() {
    let harness = Harness::new();
    let network = network("test");
    let store = harness.store.clone();
    // another writer moves the marker while unit 1 is running
    let racing = MigrationUnit::from_fn(1, "race", move |cx| {
        let store = store.clone();
        Box::pin(async move {
            cx.deploy("A", vec![]).await?;
            store.advance("test", 5).await.expect("racing advance");
            Ok::<(), DeploymentError>(())
        })
    });
    let err = harness.runner.run(&network, vec![racing]).await.unwrap_err();
    assert!(matches!(
        err,
        MigrateError::InvariantViolation { sequence: 1, .. }
    ));
    assert_eq!(harness.completed_through("test").await, 5);
}

#[tokio::test]
async fn test_unit_timeout_is_a_migration_failure() {
    let deployer = SimulatedDeployer::new().with_latency(Duration::from_millis(200));
    let mut harness = Harness::with_deployer(deployer);
    harness.runner = MigrationRunner::new(
        harness.deployer.clone(),
        Arc::new(registry()),
        harness.store.clone(),
    )
    .with_options(RunOptions {
        unit_timeout: Some(Duration::from_millis(20)),
        target: None,
    });
    let err = harness
        .runner
        .run(&network("test"), vec![deploy(1, "A")])
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        MigrateError::MigrationFailed {
            sequence: 1,
            cause: DeploymentError::Timeout(_),
            ..
        }
    ));
    assert_eq!(harness.completed_through("test").await, 0);
}

#[tokio::test]
async fn test_cancelled_run_resumes_from_last_marker() {
    let deployer = SimulatedDeployer::new().with_latency(Duration::from_millis(100));
    let harness = Harness::with_deployer(deployer);
    let network = network("test");
    let set = MigrationSet::new(vec![deploy(1, "A"), deploy(2, "B"), deploy(3, "C")]).unwrap();

    // long enough for the first unit, not for the second
    let cancel = tokio::time::sleep(Duration::from_millis(150));
    let err = harness
        .runner
        .run_set_until(&network, &set, cancel)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        MigrateError::Cancelled {
            sequence: Some(2),
            ..
        }
    ));
    assert_eq!(harness.completed_through("test").await, 1);

    let report = harness.runner.run_set(&network, &set).await.expect("resume");
    assert_eq!(report.applied, vec![2, 3]);
}

#[tokio::test]
async fn test_target_stops_early() {
    let harness = Harness::new();
    let network = network("test");
    let runner = MigrationRunner::new(
        harness.deployer.clone(),
        Arc::new(registry()),
        harness.store.clone(),
    )
    .with_options(RunOptions {
        unit_timeout: None,
        target: Some(2),
    });
    let report = runner
        .run(&network, vec![deploy(1, "A"), deploy(2, "B"), deploy(3, "C")])
        .await
        .expect("run");
    assert_eq!(report.applied, vec![1, 2]);

    let plan = harness
        .runner
        .plan(
            &network,
            &MigrationSet::new(vec![deploy(1, "A"), deploy(2, "B"), deploy(3, "C")]).unwrap(),
        )
        .await
        .expect("plan");
    assert_eq!(plan.completed_through, 2);
    assert_eq!(plan.pending, vec![(3, "deploy C".to_string())]);
}

#[tokio::test]
async fn test_networks_are_migrated_independently() {
    let harness = Harness::new();
    let main = network("main");
    let test = network("test");
    let (main_report, test_report) = tokio::join!(
        harness.runner.run(&main, all_migrations()),
        harness.runner.run(&test, vec![deploy_registry(2)]),
    );
    assert_eq!(main_report.expect("main").applied, vec![1, 2, 3]);
    assert_eq!(test_report.expect("test").applied, vec![2]);
    assert_eq!(harness.completed_through("main").await, 3);
    assert_eq!(harness.completed_through("test").await, 2);
}

#[tokio::test]
async fn test_handles_survive_between_runs() {
    let harness = Harness::new();
    let network = network("test");
    harness
        .runner
        .run(&network, vec![deploy_registry(1)])
        .await
        .expect("first run");
    let report = harness
        .runner
        .run(&network, vec![deploy_registry(1), deploy_ledger(2)])
        .await
        .expect("second run");
    assert_eq!(report.applied, vec![2]);

    let calls = harness.deployer.calls();
    assert_eq!(calls[1].args[0], json!(calls[0].address.clone().unwrap()));
}

#[tokio::test]
async fn test_missing_handle_fails_the_unit() {
    let harness = Harness::new();
    let err = harness
        .runner
        .run(&network("test"), vec![deploy_ledger(1)])
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        MigrateError::MigrationFailed {
            cause: DeploymentError::UnknownHandle(_),
            ..
        }
    ));
    assert!(harness.deployer.calls().is_empty());
}

#[tokio::test]
async fn test_discovered_migrations_against_file_state() {
    let workspace = tempfile::tempdir().unwrap();
    let migrations = workspace.path().join("migrations");
    let artifacts = workspace.path().join("build");
    let state = workspace.path().join("migration");
    fs::create_dir_all(&migrations).unwrap();
    fs::create_dir_all(&artifacts).unwrap();
    fs::write(artifacts.join("Registry"), b"registry").unwrap();
    fs::write(artifacts.join("Ledger"), b"ledger").unwrap();
    fs::write(
        migrations.join("1_deploy_registry.json"),
        r#"{"steps": [{"deploy": "Registry"}]}"#,
    )
    .unwrap();
    fs::write(
        migrations.join("2_deploy_ledger.json"),
        r#"{"steps": [{"deploy": "Ledger", "args": [{"ref": "Registry"}, 10], "from": 1}]}"#,
    )
    .unwrap();

    let network = network("test");
    let deployer = Arc::new(SimulatedDeployer::new());
    let runner = || {
        MigrationRunner::new(
            deployer.clone(),
            Arc::new(DirectoryRegistry::new(&artifacts)),
            Arc::new(FileStateStore::new(&state)),
        )
    };

    let set = discover(&migrations).expect("discover");
    let report = runner().run_set(&network, &set).await.expect("run");
    assert_eq!(report.applied, vec![1, 2]);
    let calls = deployer.calls();
    assert_eq!(calls[1].from.as_str(), "0xoperator");
    assert_eq!(calls[1].args, vec![json!(calls[0].address.clone().unwrap()), json!(10)]);

    // a fresh runner over the same directory sees the completed marker
    let set = discover(&migrations).expect("rediscover");
    let report = runner().run_set(&network, &set).await.expect("rerun");
    assert!(report.applied.is_empty());
    assert_eq!(deployer.calls().len(), 2);

    let ledger = migrator::load_latest_deployment(&state, &"testnet".parse().unwrap(), "Ledger")
        .expect("read records");
    assert!(ledger.is_none(), "records are per network");
    let store = FileStateStore::new(&state);
    assert_eq!(store.completed_through("test").await.unwrap(), 2);
    assert_eq!(store.deployments("test").await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_awkward_handle_names_keep_file_state_usable() {
    let workspace = tempfile::tempdir().unwrap();
    let state = workspace.path().join("migration");
    let network = network("test");
    let deployer = Arc::new(SimulatedDeployer::new());
    let runner = || {
        let registry = ["state", "State", "tokens/ERC20", "Ledger"]
            .into_iter()
            .fold(MemoryRegistry::new(), |registry, name| {
                registry.with_artifact(name, name.as_bytes().to_vec())
            });
        MigrationRunner::new(
            deployer.clone(),
            Arc::new(registry),
            Arc::new(FileStateStore::new(&state)),
        )
    };
    let units = || {
        vec![
            deploy(1, "state"),
            deploy(2, "State"),
            deploy(3, "tokens/ERC20"),
            MigrationUnit::from_fn(4, "deploy ledger for the token", |cx| {
                Box::pin(async move {
                    let token = cx.address_of("tokens/ERC20")?.to_string();
                    cx.deploy("Ledger", vec![json!(token)]).await?;
                    Ok::<(), DeploymentError>(())
                })
            }),
        ]
    };

    let report = runner().run(&network, units()[..3].to_vec()).await.expect("first run");
    assert_eq!(report.completed_through, 3);

    // the token handle comes back from disk for a fresh runner
    let report = runner().run(&network, units()).await.expect("second run");
    assert_eq!(report.previously_completed, 3);
    assert_eq!(report.applied, vec![4]);
    let calls = deployer.calls();
    assert_eq!(calls[3].args, vec![json!(calls[2].address.clone().unwrap())]);

    let store = FileStateStore::new(&state);
    assert_eq!(store.completed_through("test").await.unwrap(), 4);
    assert_eq!(store.deployments("test").await.unwrap().len(), 4);
}
