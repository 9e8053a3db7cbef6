//! In-process stand-ins for a real network, used for the `local` network and in tests.

use std::{
    collections::HashSet,
    sync::{Mutex, MutexGuard},
    time::Duration,
};

use async_trait::async_trait;
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::{
    deployer::Deployer,
    error::DeploymentError,
    object::{ArtifactDescriptor, DeployOutcome, Identity, Receipt},
};

/// One call the simulated deployer received.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeployCall {
    pub artifact: String,
    pub args: Vec<Value>,
    pub from: Identity,
    pub address: Option<String>,
}

#[derive(Default)]
struct SimulatedChain {
    nonce: u64,
    calls: Vec<DeployCall>,
    rejected: HashSet<String>,
    reject_from_call: Option<usize>,
}

/// Deployer that confirms every deployment instantly at a deterministic address.
///
/// Addresses derive from the sender, the artifact hash, the arguments and a running
/// nonce, so two runs against fresh simulators hand out the same addresses.
#[derive(Default)]
pub struct SimulatedDeployer {
    chain: Mutex<SimulatedChain>,
    latency: Option<Duration>,
}

impl SimulatedDeployer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every confirmation, to exercise timeouts and cancellation.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Reject every deployment of `artifact`.
    pub fn reject(&self, artifact: &str) {
        self.chain().rejected.insert(artifact.to_string());
    }

    /// Reject the `index`-th call (0-based) and everything after it.
    pub fn reject_from_call(&self, index: usize) {
        self.chain().reject_from_call = Some(index);
    }

    /// Accept everything again.
    pub fn heal(&self) {
        let mut chain = self.chain();
        chain.rejected.clear();
        chain.reject_from_call = None;
    }

    pub fn calls(&self) -> Vec<DeployCall> {
        self.chain().calls.clone()
    }

    pub fn deployed_artifacts(&self) -> Vec<String> {
        self.chain()
            .calls
            .iter()
            .filter(|call| call.address.is_some())
            .map(|call| call.artifact.clone())
            .collect()
    }

    fn chain(&self) -> MutexGuard<'_, SimulatedChain> {
        // a poisoned simulator only means a test panicked mid-call
        self.chain.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl Deployer for SimulatedDeployer {
    async fn deploy(
        &self,
        descriptor: &ArtifactDescriptor,
        args: &[Value],
        from: &Identity,
    ) -> Result<DeployOutcome, DeploymentError> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        let mut chain = self.chain();
        let index = chain.calls.len();
        let mut call = DeployCall {
            artifact: descriptor.name.clone(),
            args: args.to_vec(),
            from: from.clone(),
            address: None,
        };
        let rejected = chain.rejected.contains(&descriptor.name)
            || chain.reject_from_call.is_some_and(|from_call| index >= from_call);
        if rejected {
            chain.calls.push(call);
            return Err(DeploymentError::Rejected {
                artifact: descriptor.name.clone(),
                reason: "rejected by simulator".to_string(),
            });
        }

        chain.nonce += 1;
        let mut hasher = Sha256::new();
        hasher.update(from.as_str().as_bytes());
        hasher.update(descriptor.data_hash);
        hasher.update(serde_json::to_vec(args).unwrap_or_default());
        hasher.update(chain.nonce.to_le_bytes());
        let digest = hasher.finalize();
        let address = format!("0x{}", hex::encode(&digest[..20]));
        let tx_hash = format!("0x{}", hex::encode(Sha256::digest(address.as_bytes())));

        call.address = Some(address.clone());
        chain.calls.push(call);
        Ok(DeployOutcome {
            address,
            receipt: Receipt {
                tx_hash,
                block_number: Some(chain.nonce),
            },
        })
    }
}
