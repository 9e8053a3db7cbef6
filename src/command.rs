use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// The network to migrate, options are `mainnet`, `testnet`, `local` or an endpoint url
    /// like `http://localhost:8114`
    #[arg(
        short,
        long,
        env = "MIGRATOR_NETWORK",
        default_value_t = String::from("testnet"),
        global = true
    )]
    pub network: String,

    /// Networks file describing endpoints and accounts per network
    #[arg(long, env = "MIGRATOR_CONFIG", default_value = "networks.json", global = true)]
    pub config: PathBuf,

    /// Directory holding the per-network migration state and deployment records
    #[arg(long, env = "MIGRATOR_STATE_DIR", default_value = "migration", global = true)]
    pub state_dir: PathBuf,

    /// Directory of `<sequence>_<label>.json` migration definitions
    #[arg(long, env = "MIGRATOR_MIGRATIONS_DIR", default_value = "migrations", global = true)]
    pub migrations_dir: PathBuf,

    /// Directory of compiled artifacts
    #[arg(long, env = "MIGRATOR_ARTIFACTS_DIR", default_value = "build/release", global = true)]
    pub artifacts_dir: PathBuf,

    /// Deploying account, repeat to give several; the first one is the default deployer.
    /// Overrides the accounts from the networks file
    #[arg(long = "account", env = "MIGRATOR_ACCOUNTS", value_delimiter = ',', global = true)]
    pub accounts: Vec<String>,

    /// Endpoint of the deployment service, overrides the networks file
    #[arg(long, env = "MIGRATOR_ENDPOINT", global = true)]
    pub endpoint: Option<String>,

    /// Give up on a single migration after this many seconds
    #[arg(long, env = "MIGRATOR_TIMEOUT", global = true)]
    pub timeout: Option<u64>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Apply every pending migration to the selected network
    Migrate {
        /// Stop after this migration sequence
        #[arg(long)]
        to: Option<u64>,
        /// Only print the migrations that would run
        #[arg(long, default_value_t = false)]
        dry_run: bool,
        /// Write a `<network>_migration.json` report of the run
        #[arg(long, default_value_t = false)]
        report: bool,
    },
    /// Show the completed marker and the pending migrations of the selected network
    Status,
    /// List the deployments recorded for the selected network
    Deployments {
        /// Only show the latest deployment of this name
        #[arg(long)]
        name: Option<String>,
    },
}
