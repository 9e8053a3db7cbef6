//! Loading migration units from a directory of JSON definitions.
//!
//! Each file is named `<sequence>_<label>.json`, for example `1_deploy_contract.json`:
//!
//! ```json
//! {
//!   "description": "deploy the registry and the ledger",
//!   "steps": [
//!     { "deploy": "Registry" },
//!     { "deploy": "Ledger", "as": "ledger", "args": [{ "ref": "Registry" }, 100], "from": 1 }
//!   ]
//! }
//! ```

use std::{
    fs,
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use crate::{
    error::{ConfigurationError, DeploymentError},
    unit::{AccountRef, DeployRequest, MigrationBody, MigrationSet, MigrationUnit, UnitContext},
};

#[derive(Deserialize, Clone, Debug)]
#[serde(deny_unknown_fields)]
pub struct MigrationDefinition {
    #[serde(default)]
    pub description: Option<String>,
    pub steps: Vec<DeployStep>,
}

#[derive(Deserialize, Clone, Debug)]
#[serde(deny_unknown_fields)]
pub struct DeployStep {
    pub deploy: String,
    #[serde(default, rename = "as")]
    pub alias: Option<String>,
    #[serde(default)]
    pub args: Vec<Argument>,
    #[serde(default)]
    pub from: Option<AccountRef>,
}

/// A constructor argument: a literal JSON value, or `{"ref": "<name>"}` for the address
/// of a previously deployed handle.
#[derive(Deserialize, Clone, Debug, PartialEq)]
#[serde(untagged)]
pub enum Argument {
    Ref {
        #[serde(rename = "ref")]
        name: String,
    },
    Literal(Value),
}

#[async_trait]
impl MigrationBody for MigrationDefinition {
    async fn apply(&self, cx: &mut UnitContext) -> Result<(), DeploymentError> {
        if let Some(description) = &self.description {
            log::info!("{}", description);
        }
        for step in &self.steps {
            let args = step
                .args
                .iter()
                .map(|arg| match arg {
                    Argument::Ref { name } => cx.address_of(name).map(Value::from),
                    Argument::Literal(value) => Ok(value.clone()),
                })
                .collect::<Result<Vec<_>, _>>()?;
            let mut request = DeployRequest::new(step.deploy.clone(), args);
            request.alias = step.alias.clone();
            request.from = step.from.clone();
            cx.deploy_with(request).await?;
        }
        Ok(())
    }
}

/// Split `<sequence>_<label>.json` into its parts.
fn parse_file_name(path: &Path) -> Result<(u64, String), ConfigurationError> {
    let invalid = || ConfigurationError::InvalidFileName(path.to_path_buf());
    let stem = path.file_stem().and_then(|s| s.to_str()).ok_or_else(invalid)?;
    let (sequence, label) = match stem.split_once('_') {
        Some((sequence, label)) => (sequence, label),
        None => (stem, ""),
    };
    if sequence.is_empty() || !sequence.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }
    let sequence = sequence.parse::<u64>().map_err(|_| invalid())?;
    let label = if label.is_empty() {
        stem.to_string()
    } else {
        label.replace('_', " ")
    };
    Ok((sequence, label))
}

pub fn load_definition(path: &Path) -> Result<MigrationDefinition, ConfigurationError> {
    let content = fs::read(path).map_err(|cause| ConfigurationError::Unreadable {
        path: path.to_path_buf(),
        cause,
    })?;
    serde_json::from_slice(&content).map_err(|cause| ConfigurationError::Malformed {
        path: path.to_path_buf(),
        cause,
    })
}

/// Discover every `*.json` migration under `dir`, validated and in sequence order.
///
/// Files with other extensions are ignored. Nothing here touches the network.
pub fn discover(dir: &Path) -> Result<MigrationSet, ConfigurationError> {
    let unreadable = |cause| ConfigurationError::Unreadable {
        path: dir.to_path_buf(),
        cause,
    };
    let mut paths = fs::read_dir(dir)
        .map_err(unreadable)?
        .map(|entry| entry.map(|entry| entry.path()))
        .collect::<Result<Vec<PathBuf>, _>>()
        .map_err(unreadable)?;
    paths.retain(|path| path.is_file() && path.extension().is_some_and(|ext| ext == "json"));
    paths.sort();

    let mut units = Vec::with_capacity(paths.len());
    for path in paths {
        let (sequence, label) = parse_file_name(&path)?;
        let definition = load_definition(&path)?;
        log::debug!("discovered migration {} ({}) at {}", sequence, label, path.display());
        units.push(MigrationUnit::new(sequence, label, definition));
    }
    MigrationSet::new(units)
}
