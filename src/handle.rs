use std::{path::PathBuf, sync::Arc, time::Duration};

use eyre::WrapErr;

use crate::{
    deployer::{Deployer, RpcDeployer},
    discovery::discover,
    object::NetworkContext,
    registry::DirectoryRegistry,
    runner::{MigrationRunner, RunOptions},
    simulation::SimulatedDeployer,
    store::{FileStateStore, MigrationStateStore},
};

/// Everything a command needs, resolved once from the command line and config.
pub struct Settings {
    pub network: NetworkContext,
    pub state_dir: PathBuf,
    pub migrations_dir: PathBuf,
    pub artifacts_dir: PathBuf,
    pub timeout: Option<Duration>,
}

fn create_deployer(settings: &Settings) -> eyre::Result<Arc<dyn Deployer>> {
    match settings.network.endpoint() {
        Some(endpoint) => Ok(Arc::new(RpcDeployer::new(
            endpoint.clone(),
            settings.timeout,
        )?)),
        None if settings.network.name() == "local" => {
            log::warn!("No endpoint configured for network local, deploying to an in-process simulator");
            Ok(Arc::new(SimulatedDeployer::new()))
        }
        None => Err(eyre::eyre!(
            "no endpoint configured for network {}, set one in the networks file or pass --endpoint",
            settings.network.name()
        )),
    }
}

fn create_runner(settings: &Settings, target: Option<u64>) -> eyre::Result<MigrationRunner> {
    let store = Arc::new(FileStateStore::new(&settings.state_dir));
    let registry = Arc::new(DirectoryRegistry::new(&settings.artifacts_dir));
    Ok(MigrationRunner::new(create_deployer(settings)?, registry, store).with_options(
        RunOptions {
            unit_timeout: settings.timeout,
            target,
        },
    ))
}

async fn interrupted() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        log::warn!("Cannot listen for interrupts: {e}");
        std::future::pending::<()>().await
    }
}

pub async fn migrate(
    settings: Settings,
    to: Option<u64>,
    dry_run: bool,
    write_report: bool,
) -> eyre::Result<()> {
    let set = discover(&settings.migrations_dir)?;
    let network = &settings.network;
    if let Some(account) = network.default_account() {
        log::info!("Migrating network {} with {}", network.name(), account);
    }

    if dry_run {
        let store = Arc::new(FileStateStore::new(&settings.state_dir));
        let registry = Arc::new(DirectoryRegistry::new(&settings.artifacts_dir));
        let runner = MigrationRunner::new(Arc::new(SimulatedDeployer::new()), registry, store)
            .with_options(RunOptions {
                unit_timeout: None,
                target: to,
            });
        let plan = runner.plan(network, &set).await?;
        println!(
            "Network {} completed through {}, {} pending",
            plan.network,
            plan.completed_through,
            plan.pending.len()
        );
        for (sequence, label) in plan.pending {
            println!("  would apply {sequence}: {label}");
        }
        return Ok(());
    }

    let runner = create_runner(&settings, to)?;
    let report = runner.run_set_until(network, &set, interrupted()).await?;
    if report.applied.is_empty() {
        println!(
            "Network {} is up to date (completed through {})",
            report.network, report.completed_through
        );
    } else {
        println!(
            "Applied migrations {:?} to network {}, completed through {}",
            report.applied, report.network, report.completed_through
        );
        for handle in &report.deployments {
            println!("  {} at {} (tx {})", handle.name, handle.address, handle.receipt.tx_hash);
        }
    }
    if write_report {
        report
            .write_to_json()
            .wrap_err("failed to write migration report")?;
    }
    Ok(())
}

pub async fn status(settings: Settings) -> eyre::Result<()> {
    let set = discover(&settings.migrations_dir)?;
    let store = FileStateStore::new(&settings.state_dir);
    let network = settings.network.name();
    match store.load(network).await? {
        Some(state) => {
            println!(
                "Network {} completed through {} (updated {})",
                network, state.completed_through, state.updated_at
            );
            for applied in &state.history {
                println!("  applied {} at {}", applied.sequence, applied.applied_at);
            }
            set.check_against(&state)?;
        }
        None => println!("Network {} has no migration record", network),
    }
    let completed_through = store.completed_through(network).await?;
    for unit in set.pending(completed_through, None) {
        println!("  pending {}: {}", unit.sequence(), unit.label());
    }
    Ok(())
}

pub async fn list_deployments(settings: Settings, name: Option<String>) -> eyre::Result<()> {
    let store = FileStateStore::new(&settings.state_dir);
    let network = settings.network.name();
    let records = store.deployments(network).await?;
    if let Some(name) = name {
        let record = records
            .iter()
            .rev()
            .find(|record| record.handle.name == name)
            .ok_or(eyre::eyre!("no deployment named {name} on network {network}"))?;
        println!("{}", serde_json::to_string_pretty(record)?);
        return Ok(());
    }
    if records.is_empty() {
        println!("No deployments recorded for network {}", network);
    }
    for record in records {
        println!(
            "{:>4}  {:<24} {}  from {}  {}",
            record.sequence, record.handle.name, record.handle.address, record.from, record.date
        );
    }
    Ok(())
}
