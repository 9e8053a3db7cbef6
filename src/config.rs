use std::{collections::BTreeMap, fs, path::Path};

use eyre::WrapErr;
use reqwest::Url;
use serde::Deserialize;

use crate::object::{Identity, Network, NetworkContext};

#[derive(Deserialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct NetworkConfig {
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub accounts: Vec<Identity>,
}

/// Contents of the networks file, keyed by network name.
#[derive(Deserialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(transparent)]
pub struct NetworksConfig {
    pub networks: BTreeMap<String, NetworkConfig>,
}

impl NetworksConfig {
    /// A missing file is an empty configuration.
    pub fn load(path: &Path) -> eyre::Result<Self> {
        if !path.exists() {
            log::debug!("no networks file at {}", path.display());
            return Ok(Self::default());
        }
        let content = fs::read(path)?;
        serde_json::from_slice(&content)
            .wrap_err_with(|| format!("invalid networks file {}", path.display()))
    }

    /// Build the context for `network`. Accounts and endpoint given on the command line win
    /// over the file.
    pub fn resolve(
        &self,
        network: &Network,
        accounts: Vec<Identity>,
        endpoint: Option<Url>,
    ) -> eyre::Result<NetworkContext> {
        let name = network.key();
        let configured = self
            .networks
            .get(&name)
            .or_else(|| self.networks.get(&network.to_string()))
            .cloned()
            .unwrap_or_default();
        let accounts = if accounts.is_empty() {
            configured.accounts
        } else {
            accounts
        };
        let endpoint = match endpoint {
            Some(endpoint) => Some(endpoint),
            None => match configured.endpoint {
                Some(endpoint) => Some(
                    endpoint
                        .parse()
                        .wrap_err_with(|| format!("invalid endpoint for network {name}"))?,
                ),
                None => network.endpoint(),
            },
        };
        Ok(NetworkContext::new(name, accounts, endpoint))
    }
}
