use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::{
    error::DeploymentError,
    object::{ArtifactDescriptor, DeployOutcome, Identity, Receipt},
};

/// Submits deployable units to a network.
///
/// `deploy` resolves only once the deployment is confirmed or definitively rejected.
#[async_trait]
pub trait Deployer: Send + Sync {
    async fn deploy(
        &self,
        descriptor: &ArtifactDescriptor,
        args: &[Value],
        from: &Identity,
    ) -> Result<DeployOutcome, DeploymentError>;
}

/// Deploys through a JSON-RPC 2.0 `deploy` method exposed by the network endpoint.
///
/// Request params: `{ name, bytecode (hex), data_hash (hex), args, from }`.
/// Expected result: `{ address, tx_hash, block_number? }`, returned after confirmation.
pub struct RpcDeployer {
    client: Client,
    endpoint: Url,
    next_id: AtomicU64,
}

#[derive(Deserialize)]
struct RpcResponse {
    result: Option<DeployResult>,
    error: Option<RpcErrorObject>,
}

#[derive(Deserialize)]
struct DeployResult {
    address: String,
    tx_hash: String,
    #[serde(default)]
    block_number: Option<u64>,
}

#[derive(Deserialize)]
struct RpcErrorObject {
    code: i64,
    message: String,
}

impl RpcDeployer {
    pub fn new(endpoint: Url, timeout: Option<Duration>) -> Result<Self, DeploymentError> {
        let mut builder = Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder
            .build()
            .map_err(|e| DeploymentError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            endpoint,
            next_id: AtomicU64::new(1),
        })
    }
}

#[async_trait]
impl Deployer for RpcDeployer {
    async fn deploy(
        &self,
        descriptor: &ArtifactDescriptor,
        args: &[Value],
        from: &Identity,
    ) -> Result<DeployOutcome, DeploymentError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": "deploy",
            "params": {
                "name": descriptor.name,
                "bytecode": hex::encode(&descriptor.bytecode),
                "data_hash": hex::encode(descriptor.data_hash),
                "args": args,
                "from": from,
            }
        });
        log::debug!("deploy request #{id} for {} to {}", descriptor.name, self.endpoint);
        let response = self
            .client
            .post(self.endpoint.clone())
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    DeploymentError::Transport(format!("request timed out: {e}"))
                } else {
                    DeploymentError::Transport(e.to_string())
                }
            })?
            .error_for_status()
            .map_err(|e| DeploymentError::Transport(e.to_string()))?
            .json::<RpcResponse>()
            .await
            .map_err(|e| DeploymentError::Transport(e.to_string()))?;

        match (response.result, response.error) {
            (_, Some(error)) => Err(DeploymentError::Rejected {
                artifact: descriptor.name.clone(),
                reason: format!("{} (code {})", error.message, error.code),
            }),
            (Some(result), None) => Ok(DeployOutcome {
                address: result.address,
                receipt: Receipt {
                    tx_hash: result.tx_hash,
                    block_number: result.block_number,
                },
            }),
            (None, None) => Err(DeploymentError::Transport(
                "response carries neither result nor error".to_string(),
            )),
        }
    }
}
