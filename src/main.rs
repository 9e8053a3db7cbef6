use std::time::Duration;

use clap::Parser;
use migrator::{config::NetworksConfig, handle::*, Identity, Network};
use reqwest::Url;

mod command;

use command::{Cli, Commands};

#[tokio::main]
async fn main() -> eyre::Result<()> {
    dotenv::dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let network: Network = cli.network.parse()?;
    let endpoint = cli.endpoint.map(|url| url.parse::<Url>()).transpose()?;
    let accounts = cli.accounts.into_iter().map(Identity::new).collect();
    let network = NetworksConfig::load(&cli.config)?.resolve(&network, accounts, endpoint)?;
    let settings = Settings {
        network,
        state_dir: cli.state_dir,
        migrations_dir: cli.migrations_dir,
        artifacts_dir: cli.artifacts_dir,
        timeout: cli.timeout.map(Duration::from_secs),
    };

    match cli.command {
        Commands::Migrate {
            to,
            dry_run,
            report,
        } => migrate(settings, to, dry_run, report).await,
        Commands::Status => status(settings).await,
        Commands::Deployments { name } => list_deployments(settings, name).await,
    }
}
