use std::{collections::BTreeMap, fmt, sync::Arc};

use async_trait::async_trait;
use chrono::Utc;
use futures::future::BoxFuture;
use serde_json::Value;

use crate::{
    deployer::Deployer,
    error::{ConfigurationError, DeploymentError},
    object::{DeployedHandle, DeploymentRecord, Identity, MigrationStateRecord, NetworkContext},
    registry::ArtifactRegistry,
};

/// Deployed handles by name, latest deployment wins.
pub type Handles = BTreeMap<String, DeployedHandle>;

/// The action of one migration unit.
#[async_trait]
pub trait MigrationBody: Send + Sync {
    async fn apply(&self, cx: &mut UnitContext) -> Result<(), DeploymentError>;
}

struct FnBody<F>(F);

#[async_trait]
impl<F> MigrationBody for FnBody<F>
where
    F: for<'a> Fn(&'a mut UnitContext) -> BoxFuture<'a, Result<(), DeploymentError>> + Send + Sync,
{
    async fn apply(&self, cx: &mut UnitContext) -> Result<(), DeploymentError> {
        (self.0)(cx).await
    }
}

/// One ordered deployment step.
#[derive(Clone)]
pub struct MigrationUnit {
    sequence: u64,
    label: String,
    body: Arc<dyn MigrationBody>,
}

impl fmt::Debug for MigrationUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MigrationUnit")
            .field("sequence", &self.sequence)
            .field("label", &self.label)
            .finish()
    }
}

impl MigrationUnit {
    pub fn new(
        sequence: u64,
        label: impl Into<String>,
        body: impl MigrationBody + 'static,
    ) -> Self {
        Self {
            sequence,
            label: label.into(),
            body: Arc::new(body),
        }
    }

    /// Build a unit from a closure:
    ///
    /// ```ignore
    /// MigrationUnit::from_fn(1, "deploy registry", |cx| Box::pin(async move {
    ///     cx.deploy("Registry", vec![]).await?;
    ///     Ok::<(), DeploymentError>(())
    /// }));
    /// ```
    pub fn from_fn<F>(sequence: u64, label: impl Into<String>, body: F) -> Self
    where
        F: for<'a> Fn(&'a mut UnitContext) -> BoxFuture<'a, Result<(), DeploymentError>>
            + Send
            + Sync
            + 'static,
    {
        Self::new(sequence, label, FnBody(body))
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub(crate) async fn apply(&self, cx: &mut UnitContext) -> Result<(), DeploymentError> {
        self.body.apply(cx).await
    }
}

/// Units in strictly ascending sequence order, each sequence positive and unique.
#[derive(Clone, Debug, Default)]
pub struct MigrationSet {
    units: Vec<MigrationUnit>,
}

impl MigrationSet {
    pub fn new(mut units: Vec<MigrationUnit>) -> Result<Self, ConfigurationError> {
        units.sort_by_key(|unit| unit.sequence);
        if let Some(unit) = units.iter().find(|unit| unit.sequence == 0) {
            return Err(ConfigurationError::ZeroSequence {
                label: unit.label.clone(),
            });
        }
        if let Some(pair) = units.windows(2).find(|pair| pair[0].sequence == pair[1].sequence) {
            return Err(ConfigurationError::DuplicateSequence {
                sequence: pair[0].sequence,
                first: pair[0].label.clone(),
                second: pair[1].label.clone(),
            });
        }
        Ok(Self { units })
    }

    pub fn units(&self) -> &[MigrationUnit] {
        &self.units
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    pub fn highest(&self) -> u64 {
        self.units.last().map(|unit| unit.sequence).unwrap_or(0)
    }

    fn contains(&self, sequence: u64) -> bool {
        self.units
            .binary_search_by_key(&sequence, |unit| unit.sequence)
            .is_ok()
    }

    /// Reject sets that rewrite history the network has already seen: an applied unit
    /// that disappeared, or a unit inserted at or below the completed marker.
    pub fn check_against(&self, state: &MigrationStateRecord) -> Result<(), ConfigurationError> {
        let completed_through = state.completed_through;
        if completed_through == 0 {
            return Ok(());
        }
        if let Some(sequence) = state
            .applied_sequences()
            .chain(std::iter::once(completed_through))
            .find(|sequence| !self.contains(*sequence))
        {
            return Err(ConfigurationError::MissingAppliedUnit {
                network: state.network.clone(),
                sequence,
            });
        }
        // history is only authoritative when it accounts for the marker
        let history_complete = state.applied_sequences().any(|s| s == completed_through);
        if history_complete {
            if let Some(unit) = self.units.iter().find(|unit| {
                unit.sequence <= completed_through
                    && !state.applied_sequences().any(|s| s == unit.sequence)
            }) {
                return Err(ConfigurationError::RetroactiveInsert {
                    network: state.network.clone(),
                    sequence: unit.sequence,
                    completed_through,
                });
            }
        }
        Ok(())
    }

    /// Units above `completed_through`, up to and including `target` when given.
    pub fn pending(&self, completed_through: u64, target: Option<u64>) -> &[MigrationUnit] {
        let start = self
            .units
            .partition_point(|unit| unit.sequence <= completed_through);
        let end = match target {
            Some(target) => self.units.partition_point(|unit| unit.sequence <= target),
            None => self.units.len(),
        };
        if start >= end {
            &[]
        } else {
            &self.units[start..end]
        }
    }
}

/// Which account a deployment is sent from.
#[derive(serde::Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(untagged)]
pub enum AccountRef {
    Index(usize),
    Identity(Identity),
}

#[derive(Clone, Debug)]
pub struct DeployRequest {
    pub artifact: String,
    /// Name later bodies use to find the handle, defaults to the artifact name.
    pub alias: Option<String>,
    pub args: Vec<Value>,
    pub from: Option<AccountRef>,
}

impl DeployRequest {
    pub fn new(artifact: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            artifact: artifact.into(),
            alias: None,
            args,
            from: None,
        }
    }

    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    pub fn from_account(mut self, account: AccountRef) -> Self {
        self.from = Some(account);
        self
    }
}

/// Everything a migration body may touch while it runs.
pub struct UnitContext {
    network: Arc<NetworkContext>,
    sequence: u64,
    deployer: Arc<dyn Deployer>,
    registry: Arc<dyn ArtifactRegistry>,
    prior: Arc<Handles>,
    produced: Vec<(Identity, DeployedHandle)>,
}

impl UnitContext {
    pub(crate) fn new(
        network: Arc<NetworkContext>,
        sequence: u64,
        deployer: Arc<dyn Deployer>,
        registry: Arc<dyn ArtifactRegistry>,
        prior: Arc<Handles>,
    ) -> Self {
        Self {
            network,
            sequence,
            deployer,
            registry,
            prior,
            produced: Vec::new(),
        }
    }

    pub fn network(&self) -> &NetworkContext {
        &self.network
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// A handle deployed earlier in this unit or by a previously applied unit.
    pub fn handle(&self, name: &str) -> Option<&DeployedHandle> {
        self.produced
            .iter()
            .rev()
            .map(|(_, handle)| handle)
            .find(|handle| handle.name == name)
            .or_else(|| self.prior.get(name))
    }

    pub fn address_of(&self, name: &str) -> Result<&str, DeploymentError> {
        self.handle(name)
            .map(|handle| handle.address.as_str())
            .ok_or_else(|| DeploymentError::UnknownHandle(name.to_string()))
    }

    pub async fn deploy(
        &mut self,
        artifact: &str,
        args: Vec<Value>,
    ) -> Result<DeployedHandle, DeploymentError> {
        self.deploy_with(DeployRequest::new(artifact, args)).await
    }

    pub async fn deploy_with(
        &mut self,
        request: DeployRequest,
    ) -> Result<DeployedHandle, DeploymentError> {
        let from = self.resolve_account(request.from.as_ref())?;
        let descriptor = self.registry.resolve(&request.artifact)?;
        log::info!(
            "Deploying {} on network {} with {}",
            request.artifact,
            self.network.name(),
            from
        );
        let outcome = self
            .deployer
            .deploy(&descriptor, &request.args, &from)
            .await?;
        let handle = DeployedHandle {
            name: request.alias.unwrap_or(request.artifact),
            artifact: descriptor.name,
            address: outcome.address,
            receipt: outcome.receipt,
            data_hash: hex::encode(descriptor.data_hash),
        };
        log::info!("{} deployed at {}", handle.name, handle.address);
        self.produced.push((from, handle.clone()));
        Ok(handle)
    }

    fn resolve_account(&self, account: Option<&AccountRef>) -> Result<Identity, DeploymentError> {
        match account {
            None => self
                .network
                .default_account()
                .cloned()
                .ok_or_else(|| DeploymentError::NoAccount(self.network.name().to_string())),
            Some(AccountRef::Index(index)) => self
                .network
                .accounts()
                .get(*index)
                .cloned()
                .ok_or_else(|| DeploymentError::AccountOutOfRange {
                    network: self.network.name().to_string(),
                    index: *index,
                    available: self.network.accounts().len(),
                }),
            Some(AccountRef::Identity(identity)) => Ok(identity.clone()),
        }
    }

    pub(crate) fn into_records(self) -> Vec<DeploymentRecord> {
        let date = Utc::now().to_rfc3339();
        let network = self.network.name().to_string();
        let sequence = self.sequence;
        self.produced
            .into_iter()
            .map(|(from, handle)| DeploymentRecord {
                network: network.clone(),
                sequence,
                date: date.clone(),
                from,
                handle,
                comment: None,
            })
            .collect()
    }
}
