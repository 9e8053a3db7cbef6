use std::{fmt::Display, str::FromStr};

use reqwest::Url;
use sha2::{Digest, Sha256};

/// Filesystem-safe stem for `value`: a lowercased readable part plus a hash of the exact
/// value, so distinct values never share a file even on case-insensitive filesystems.
pub(crate) fn file_key(readable: &str, value: &str) -> String {
    let readable = readable
        .chars()
        .map(|c| match c {
            'a'..='z' | '0'..='9' | '-' => c,
            'A'..='Z' => c.to_ascii_lowercase(),
            _ => '_',
        })
        .collect::<String>();
    let digest = hex::encode(Sha256::digest(value.as_bytes()));
    format!("{readable}_{}", &digest[..12])
}

#[derive(PartialEq, Eq, Debug, Clone)]
pub enum Network {
    Mainnet,
    Testnet,
    Local,
    Custom(Url),
}

impl Network {
    /// Key under which the network's migration state is stored, safe to use as a
    /// directory name. Custom endpoints are keyed by their whole URL and always carry a
    /// `custom_` prefix, so they never share state with each other or a named network.
    pub fn key(&self) -> String {
        match self {
            Network::Custom(url) => {
                let host = url.host_str().unwrap_or("custom");
                let readable = match url.port() {
                    Some(port) => format!("{host}_{port}"),
                    None => host.to_string(),
                };
                format!("custom_{}", file_key(&readable, url.as_str()))
            }
            other => other.to_string(),
        }
    }

    pub fn endpoint(&self) -> Option<Url> {
        match self {
            Network::Custom(url) => Some(url.clone()),
            _ => None,
        }
    }
}

impl Display for Network {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Network::Mainnet => write!(f, "mainnet"),
            Network::Testnet => write!(f, "testnet"),
            Network::Local => write!(f, "local"),
            Network::Custom(url) => write!(f, "{}", url),
        }
    }
}

impl FromStr for Network {
    type Err = eyre::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "mainnet" => Ok(Network::Mainnet),
            "testnet" => Ok(Network::Testnet),
            "local" => Ok(Network::Local),
            _ => Ok(Network::Custom(value.parse()?)),
        }
    }
}

impl TryFrom<String> for Network {
    type Error = eyre::Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// A signer identity available for deployment on a network.
#[derive(serde::Serialize, serde::Deserialize, Clone, Debug, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct Identity(String);

impl Identity {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// The network a run targets. Resolved once per run and never mutated afterwards.
#[derive(Clone, Debug)]
pub struct NetworkContext {
    name: String,
    accounts: Vec<Identity>,
    endpoint: Option<Url>,
}

impl NetworkContext {
    pub fn new(name: impl Into<String>, accounts: Vec<Identity>, endpoint: Option<Url>) -> Self {
        Self {
            name: name.into(),
            accounts,
            endpoint,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn accounts(&self) -> &[Identity] {
        &self.accounts
    }

    pub fn endpoint(&self) -> Option<&Url> {
        self.endpoint.as_ref()
    }

    /// `accounts[0]`, the identity units deploy from unless they pick another.
    pub fn default_account(&self) -> Option<&Identity> {
        self.accounts.first()
    }
}

#[derive(serde::Serialize, serde::Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct AppliedMigration {
    pub sequence: u64,
    pub applied_at: String,
}

/// Progress of one network, as kept by a migration state store.
#[derive(serde::Serialize, serde::Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct MigrationStateRecord {
    pub network: String,
    pub completed_through: u64,
    #[serde(default)]
    pub history: Vec<AppliedMigration>,
    pub updated_at: String,
}

impl MigrationStateRecord {
    pub fn applied_sequences(&self) -> impl Iterator<Item = u64> + '_ {
        self.history.iter().map(|applied| applied.sequence)
    }
}

/// A compiled deployable unit as resolved by an artifact registry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArtifactDescriptor {
    pub name: String,
    pub bytecode: Vec<u8>,
    pub data_hash: [u8; 32],
    pub interface: Option<serde_json::Value>,
}

#[derive(serde::Serialize, serde::Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct Receipt {
    pub tx_hash: String,
    #[serde(default)]
    pub block_number: Option<u64>,
}

/// What a deployer hands back once a deployment is confirmed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeployOutcome {
    pub address: String,
    pub receipt: Receipt,
}

/// A deployed artifact, addressable by `name` from later migration bodies.
#[derive(serde::Serialize, serde::Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct DeployedHandle {
    pub name: String,
    pub artifact: String,
    pub address: String,
    pub receipt: Receipt,
    pub data_hash: String,
}

#[derive(serde::Serialize, serde::Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct DeploymentRecord {
    pub network: String,
    pub sequence: u64,
    pub date: String,
    pub from: Identity,
    #[serde(flatten)]
    pub handle: DeployedHandle,
    // Not written by the migrator, can be added by hand in the record file for cooperation
    #[serde(default)]
    pub comment: Option<String>,
}
