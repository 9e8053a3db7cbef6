use std::{future::Future, sync::Arc, time::Duration};

use serde::Serialize;

use crate::{
    deployer::Deployer,
    error::{DeploymentError, MigrateError, StoreError},
    object::{DeployedHandle, DeploymentRecord, NetworkContext},
    registry::ArtifactRegistry,
    store::MigrationStateStore,
    unit::{Handles, MigrationSet, MigrationUnit, UnitContext},
};

/// Where a run currently is. `Done` and `Failed` end an invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Idle,
    Loading,
    Pending,
    Executing(u64),
    Advancing(u64),
    Done,
    Failed(u64),
}

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Upper bound on a single unit's body, including every deployer call it makes.
    pub unit_timeout: Option<Duration>,
    /// Stop after this sequence even if later units are pending.
    pub target: Option<u64>,
}

/// What a run would do, computed without touching the deployer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Plan {
    pub network: String,
    pub completed_through: u64,
    pub pending: Vec<(u64, String)>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub network: String,
    pub previously_completed: u64,
    pub completed_through: u64,
    /// Sequences applied by this run, in order. Empty when nothing was pending.
    pub applied: Vec<u64>,
    pub deployments: Vec<DeployedHandle>,
}

impl RunReport {
    pub fn write_to_json(&self) -> Result<(), std::io::Error> {
        let file_name = format!("{}_migration.json", self.network);
        let json_data = serde_json::to_string_pretty(&self)?;
        std::fs::write(file_name, json_data)?;
        Ok(())
    }
}

/// Applies pending migration units to one network, in order, one at a time.
pub struct MigrationRunner {
    deployer: Arc<dyn Deployer>,
    registry: Arc<dyn ArtifactRegistry>,
    store: Arc<dyn MigrationStateStore>,
    options: RunOptions,
}

impl MigrationRunner {
    pub fn new(
        deployer: Arc<dyn Deployer>,
        registry: Arc<dyn ArtifactRegistry>,
        store: Arc<dyn MigrationStateStore>,
    ) -> Self {
        Self {
            deployer,
            registry,
            store,
            options: RunOptions::default(),
        }
    }

    pub fn with_options(mut self, options: RunOptions) -> Self {
        self.options = options;
        self
    }

    fn enter(&self, network: &NetworkContext, phase: RunPhase) {
        log::debug!("[{}] {:?}", network.name(), phase);
    }

    fn unavailable(network: &NetworkContext) -> impl FnOnce(StoreError) -> MigrateError + '_ {
        move |cause| MigrateError::StoreUnavailable {
            network: network.name().to_string(),
            cause,
        }
    }

    /// Read the marker, check the set against the network's history and compute the
    /// pending units.
    async fn load<'s>(
        &self,
        network: &NetworkContext,
        set: &'s MigrationSet,
    ) -> Result<(u64, &'s [MigrationUnit]), MigrateError> {
        self.enter(network, RunPhase::Loading);
        let state = self
            .store
            .load(network.name())
            .await
            .map_err(Self::unavailable(network))?;
        let completed_through = match &state {
            Some(state) => {
                set.check_against(state)?;
                state.completed_through
            }
            None => 0,
        };
        self.enter(network, RunPhase::Pending);
        Ok((completed_through, set.pending(completed_through, self.options.target)))
    }

    pub async fn plan(
        &self,
        network: &NetworkContext,
        set: &MigrationSet,
    ) -> Result<Plan, MigrateError> {
        let (completed_through, pending) = self.load(network, set).await?;
        Ok(Plan {
            network: network.name().to_string(),
            completed_through,
            pending: pending
                .iter()
                .map(|unit| (unit.sequence(), unit.label().to_string()))
                .collect(),
        })
    }

    /// Validate `units` and apply the pending ones.
    pub async fn run(
        &self,
        network: &NetworkContext,
        units: Vec<MigrationUnit>,
    ) -> Result<RunReport, MigrateError> {
        let set = MigrationSet::new(units)?;
        self.run_set(network, &set).await
    }

    pub async fn run_set(
        &self,
        network: &NetworkContext,
        set: &MigrationSet,
    ) -> Result<RunReport, MigrateError> {
        self.run_set_until(network, set, std::future::pending::<()>())
            .await
    }

    /// Like [`run_set`](Self::run_set), but gives up as soon as `cancel` resolves.
    ///
    /// A unit body in flight at that point is dropped and its unit stays pending.
    /// Recording progress for a unit whose body already succeeded is never interrupted.
    pub async fn run_set_until<C>(
        &self,
        network: &NetworkContext,
        set: &MigrationSet,
        cancel: C,
    ) -> Result<RunReport, MigrateError>
    where
        C: Future<Output = ()>,
    {
        tokio::pin!(cancel);
        self.enter(network, RunPhase::Idle);
        let (previously_completed, pending) = self.load(network, set).await?;
        let mut report = RunReport {
            network: network.name().to_string(),
            previously_completed,
            completed_through: previously_completed,
            applied: Vec::new(),
            deployments: Vec::new(),
        };
        if pending.is_empty() {
            log::info!(
                "Network {} is up to date at migration {}",
                network.name(),
                previously_completed
            );
            self.enter(network, RunPhase::Done);
            return Ok(report);
        }

        let mut handles = Handles::new();
        for record in self
            .store
            .deployments(network.name())
            .await
            .map_err(Self::unavailable(network))?
        {
            handles.insert(record.handle.name.clone(), record.handle);
        }
        let mut handles = Arc::new(handles);
        let context = Arc::new(network.clone());

        for unit in pending {
            let sequence = unit.sequence();
            self.enter(network, RunPhase::Executing(sequence));
            log::info!(
                "Applying migration {} ({}) on network {}",
                sequence,
                unit.label(),
                network.name()
            );
            let mut cx = UnitContext::new(
                context.clone(),
                sequence,
                self.deployer.clone(),
                self.registry.clone(),
                handles.clone(),
            );
            let outcome = tokio::select! {
                biased;
                _ = &mut cancel => {
                    log::warn!("Migration {} on network {} cancelled", sequence, network.name());
                    self.enter(network, RunPhase::Failed(sequence));
                    return Err(MigrateError::Cancelled {
                        network: network.name().to_string(),
                        sequence: Some(sequence),
                    });
                }
                outcome = self.apply(unit, &mut cx) => outcome,
            };
            if let Err(cause) = outcome {
                log::error!(
                    "Migration {} failed on network {}: {}",
                    sequence,
                    network.name(),
                    cause
                );
                self.enter(network, RunPhase::Failed(sequence));
                return Err(MigrateError::MigrationFailed {
                    network: network.name().to_string(),
                    sequence,
                    cause,
                });
            }

            self.enter(network, RunPhase::Advancing(sequence));
            let records = cx.into_records();
            self.advance(network, sequence, &records).await.inspect_err(|_| {
                self.enter(network, RunPhase::Failed(sequence));
            })?;

            let produced = Arc::make_mut(&mut handles);
            for record in records {
                produced.insert(record.handle.name.clone(), record.handle.clone());
                report.deployments.push(record.handle);
            }
            report.applied.push(sequence);
            report.completed_through = sequence;
            log::info!("Migration {} completed on network {}", sequence, network.name());
        }

        self.enter(network, RunPhase::Done);
        Ok(report)
    }

    async fn apply(
        &self,
        unit: &MigrationUnit,
        cx: &mut UnitContext,
    ) -> Result<(), DeploymentError> {
        match self.options.unit_timeout {
            Some(limit) => match tokio::time::timeout(limit, unit.apply(cx)).await {
                Ok(outcome) => outcome,
                Err(_) => Err(DeploymentError::Timeout(limit)),
            },
            None => unit.apply(cx).await,
        }
    }

    async fn advance(
        &self,
        network: &NetworkContext,
        sequence: u64,
        records: &[DeploymentRecord],
    ) -> Result<(), MigrateError> {
        let not_recorded = |cause| MigrateError::ProgressNotRecorded {
            network: network.name().to_string(),
            sequence,
            cause,
        };
        if !records.is_empty() {
            self.store
                .record_deployments(network.name(), records)
                .await
                .map_err(not_recorded)?;
        }
        match self.store.advance(network.name(), sequence).await {
            Ok(()) => Ok(()),
            Err(cause @ StoreError::NotIncreasing { .. }) => Err(MigrateError::InvariantViolation {
                network: network.name().to_string(),
                sequence,
                cause,
            }),
            Err(cause) => Err(not_recorded(cause)),
        }
    }
}
