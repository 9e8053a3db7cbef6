pub mod config;
pub mod deployer;
pub mod discovery;
pub mod error;
pub mod handle;
pub mod object;
pub mod registry;
pub mod runner;
pub mod simulation;
pub mod store;
pub mod unit;

use std::path::Path;

pub use deployer::Deployer;
pub use error::{ConfigurationError, DeploymentError, MigrateError, RegistryError, StoreError};
pub use object::{
    ArtifactDescriptor, DeployOutcome, DeployedHandle, DeploymentRecord, Identity,
    MigrationStateRecord, Network, NetworkContext, Receipt,
};
pub use registry::ArtifactRegistry;
pub use runner::{MigrationRunner, Plan, RunOptions, RunReport};
pub use store::MigrationStateStore;
pub use unit::{AccountRef, DeployRequest, MigrationSet, MigrationUnit, UnitContext};

/// Load the latest deployment of `name` from a migration state directory
pub fn load_latest_deployment(
    state_dir: &Path,
    network: &Network,
    name: &str,
) -> Result<Option<DeploymentRecord>, StoreError> {
    let records = store::load_deployment_records(state_dir, &network.key())?;
    Ok(records
        .into_iter()
        .rev()
        .find(|record| record.handle.name == name))
}
