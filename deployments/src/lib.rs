use std::path::Path;

use migrator::{
    load_latest_deployment, DeployRequest, DeploymentError, MigrationUnit, Network, StoreError,
};
use serde_json::json;

mod social;
pub use social::*;

pub const REGISTRY_NAME: &str = "Registry";
pub const LEDGER_NAME: &str = "Ledger";
pub const LEDGER_CAPACITY: u64 = 1_000;

// Deploys the registry every later contract registers itself with
//
// Handles produced:
//   - Registry
pub fn deploy_registry(sequence: u64) -> MigrationUnit {
    MigrationUnit::from_fn(sequence, "deploy registry", |cx| {
        Box::pin(async move {
            cx.deploy(REGISTRY_NAME, vec![]).await?;
            Ok::<(), DeploymentError>(())
        })
    })
}

// Deploys the ledger, wired to the registry deployed by an earlier migration
//
// Constructor arguments:
//   - address of the Registry handle
//   - ledger capacity
pub fn deploy_ledger(sequence: u64) -> MigrationUnit {
    MigrationUnit::from_fn(sequence, "deploy ledger", |cx| {
        Box::pin(async move {
            let registry = cx.address_of(REGISTRY_NAME)?.to_string();
            cx.deploy_with(DeployRequest::new(
                LEDGER_NAME,
                vec![json!(registry), json!(LEDGER_CAPACITY)],
            ))
            .await?;
            Ok::<(), DeploymentError>(())
        })
    })
}

/// Every migration of the project, in order.
pub fn all_migrations() -> Vec<MigrationUnit> {
    vec![deploy_social_finance(1), deploy_registry(2), deploy_ledger(3)]
}

/// Address of the ledger deployed on `network`, if any migration deployed it
pub fn ledger_address(state_dir: &Path, network: &Network) -> Result<Option<String>, StoreError> {
    Ok(load_latest_deployment(state_dir, network, LEDGER_NAME)?.map(|record| record.handle.address))
}
