use std::{
    collections::HashMap,
    fs,
    io::Write,
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;

use crate::{
    error::StoreError,
    object::{file_key, AppliedMigration, DeploymentRecord, MigrationStateRecord},
};

const STATE_FILE: &str = "state.json";
const DEPLOYMENTS_DIR: &str = "deployments";

/// Durable, network-scoped record of migration progress.
///
/// A store only ever moves `completed_through` forward: `advance` rejects any sequence
/// that is not strictly above the current marker.
#[async_trait]
pub trait MigrationStateStore: Send + Sync {
    /// `None` if the network has never been migrated.
    async fn load(&self, network: &str) -> Result<Option<MigrationStateRecord>, StoreError>;

    async fn advance(&self, network: &str, sequence: u64) -> Result<(), StoreError>;

    async fn record_deployments(
        &self,
        network: &str,
        records: &[DeploymentRecord],
    ) -> Result<(), StoreError>;

    /// Every deployment recorded for the network, oldest first.
    async fn deployments(&self, network: &str) -> Result<Vec<DeploymentRecord>, StoreError>;

    async fn completed_through(&self, network: &str) -> Result<u64, StoreError> {
        Ok(self
            .load(network)
            .await?
            .map(|record| record.completed_through)
            .unwrap_or(0))
    }
}

fn advanced(
    current: Option<MigrationStateRecord>,
    network: &str,
    sequence: u64,
) -> Result<MigrationStateRecord, StoreError> {
    let now = Utc::now().to_rfc3339();
    let mut record = current.unwrap_or_else(|| MigrationStateRecord {
        network: network.to_string(),
        completed_through: 0,
        history: Vec::new(),
        updated_at: now.clone(),
    });
    if sequence <= record.completed_through {
        return Err(StoreError::NotIncreasing {
            current: record.completed_through,
            requested: sequence,
        });
    }
    record.completed_through = sequence;
    record.history.push(AppliedMigration {
        sequence,
        applied_at: now.clone(),
    });
    record.updated_at = now;
    Ok(record)
}

/// Keeps state under `<root>/<network>/`: `state.json` for the marker and, under
/// `deployments/`, one list of deployment records per deployed name. Record files are
/// named by [`record_file_name`], so no handle name can reach the marker file.
pub struct FileStateStore {
    root: PathBuf,
    // serializes read-modify-write cycles from this process
    lock: Mutex<()>,
}

impl FileStateStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn network_dir(&self, network: &str) -> PathBuf {
        self.root.join(network)
    }

    fn record_path(&self, network: &str, name: &str) -> PathBuf {
        self.network_dir(network)
            .join(DEPLOYMENTS_DIR)
            .join(record_file_name(name))
    }

    fn read_state(&self, network: &str) -> Result<Option<MigrationStateRecord>, StoreError> {
        let path = self.network_dir(network).join(STATE_FILE);
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read(&path)?;
        serde_json::from_slice(&content)
            .map(Some)
            .map_err(|cause| StoreError::Corrupt { path, cause })
    }
}

/// Flat file name holding the records of the handle `name`, e.g. `tokens/ERC20` is kept
/// in `tokens_erc20_<hash>.json`.
pub fn record_file_name(name: &str) -> String {
    format!("{}.json", file_key(name, name))
}

/// Load every deployment record kept for `network` under `root`.
pub fn load_deployment_records(
    root: &Path,
    network: &str,
) -> Result<Vec<DeploymentRecord>, StoreError> {
    let dir = root.join(network).join(DEPLOYMENTS_DIR);
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut paths = fs::read_dir(&dir)?
        .map(|entry| entry.map(|entry| entry.path()))
        .collect::<Result<Vec<_>, _>>()?;
    paths.sort();
    let mut records = Vec::new();
    for path in paths {
        if path.is_file() && path.extension().is_some_and(|ext| ext == "json") {
            records.extend(read_record_file(&path)?);
        }
    }
    records.sort_by(|a, b| a.sequence.cmp(&b.sequence).then(a.date.cmp(&b.date)));
    Ok(records)
}

fn read_record_file(path: &Path) -> Result<Vec<DeploymentRecord>, StoreError> {
    let file = fs::File::open(path)?;
    serde_json::from_reader(file).map_err(|cause| StoreError::Corrupt {
        path: path.to_path_buf(),
        cause,
    })
}

/// Write `content` to `path` atomically: temp file, fsync, rename.
fn write_atomic(path: &Path, content: &[u8]) -> Result<(), StoreError> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)?;
    }
    let tmp_path = path.with_extension("json.tmp");
    {
        let mut file = fs::File::create(&tmp_path)?;
        file.write_all(content)?;
        file.sync_all()?;
    }
    fs::rename(&tmp_path, path)?;
    Ok(())
}

#[async_trait]
impl MigrationStateStore for FileStateStore {
    async fn load(&self, network: &str) -> Result<Option<MigrationStateRecord>, StoreError> {
        let _guard = self.lock.lock().await;
        self.read_state(network)
    }

    async fn advance(&self, network: &str, sequence: u64) -> Result<(), StoreError> {
        let _guard = self.lock.lock().await;
        let record = advanced(self.read_state(network)?, network, sequence)?;
        let content = serde_json::to_vec_pretty(&record)?;
        write_atomic(&self.network_dir(network).join(STATE_FILE), &content)
    }

    async fn record_deployments(
        &self,
        network: &str,
        records: &[DeploymentRecord],
    ) -> Result<(), StoreError> {
        let _guard = self.lock.lock().await;
        for record in records {
            let path = self.record_path(network, &record.handle.name);
            let mut existing = if path.exists() {
                read_record_file(&path)?
            } else {
                Vec::new()
            };
            existing.push(record.clone());
            write_atomic(&path, &serde_json::to_vec_pretty(&existing)?)?;
        }
        Ok(())
    }

    async fn deployments(&self, network: &str) -> Result<Vec<DeploymentRecord>, StoreError> {
        let _guard = self.lock.lock().await;
        load_deployment_records(&self.root, network)
    }
}

#[derive(Default)]
struct NetworkState {
    record: Option<MigrationStateRecord>,
    deployments: Vec<DeploymentRecord>,
}

/// Process-local store, for tests and dry runs.
#[derive(Default)]
pub struct MemoryStateStore {
    networks: Mutex<HashMap<String, NetworkState>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MigrationStateStore for MemoryStateStore {
    async fn load(&self, network: &str) -> Result<Option<MigrationStateRecord>, StoreError> {
        let networks = self.networks.lock().await;
        Ok(networks.get(network).and_then(|state| state.record.clone()))
    }

    async fn advance(&self, network: &str, sequence: u64) -> Result<(), StoreError> {
        let mut networks = self.networks.lock().await;
        let state = networks.entry(network.to_string()).or_default();
        state.record = Some(advanced(state.record.take(), network, sequence)?);
        Ok(())
    }

    async fn record_deployments(
        &self,
        network: &str,
        records: &[DeploymentRecord],
    ) -> Result<(), StoreError> {
        let mut networks = self.networks.lock().await;
        networks
            .entry(network.to_string())
            .or_default()
            .deployments
            .extend_from_slice(records);
        Ok(())
    }

    async fn deployments(&self, network: &str) -> Result<Vec<DeploymentRecord>, StoreError> {
        let networks = self.networks.lock().await;
        Ok(networks
            .get(network)
            .map(|state| state.deployments.clone())
            .unwrap_or_default())
    }
}
