use std::{path::Path, sync::Arc};

use migrator::{
    registry::MemoryRegistry, simulation::SimulatedDeployer, store::FileStateStore, Identity,
    MigrationRunner, Network, NetworkContext,
};
use migrator_deployments::{
    all_migrations, ledger_address, LEDGER_NAME, REGISTRY_NAME, SOCIAL_FINANCE_NAME,
};

#[tokio::main]
async fn main() {
    let mut args = std::env::args();
    // Skip the program name
    args.next();
    let state_dir = args.next().unwrap_or_else(|| "migration".to_string());

    let registry = MemoryRegistry::new()
        .with_artifact(SOCIAL_FINANCE_NAME, b"social-finance".to_vec())
        .with_artifact(REGISTRY_NAME, b"registry".to_vec())
        .with_artifact(LEDGER_NAME, b"ledger".to_vec());
    let runner = MigrationRunner::new(
        Arc::new(SimulatedDeployer::new()),
        Arc::new(registry),
        Arc::new(FileStateStore::new(&state_dir)),
    );
    let network = NetworkContext::new("local", vec![Identity::new("0xdev")], None);

    let report = runner
        .run(&network, all_migrations())
        .await
        .expect("run migrations");
    println!("Applied {:?}, completed through {}", report.applied, report.completed_through);

    let ledger = ledger_address(Path::new(&state_dir), &Network::Local).expect("read deployments");
    println!("Ledger address: {}", ledger.unwrap_or_default());
}
