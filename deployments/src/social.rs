use migrator::{DeploymentError, MigrationUnit};

pub const SOCIAL_FINANCE_NAME: &str = "SocialFinance";

// The first migration of the project: a bare SocialFinance deployment from the
// network's default account, without constructor arguments
pub fn deploy_social_finance(sequence: u64) -> MigrationUnit {
    MigrationUnit::from_fn(sequence, "deploy contract", |cx| {
        Box::pin(async move {
            if let Some(account) = cx.network().default_account() {
                log::info!("Deploying on network {} with {}", cx.network().name(), account);
            }
            cx.deploy(SOCIAL_FINANCE_NAME, vec![]).await?;
            Ok::<(), DeploymentError>(())
        })
    })
}
