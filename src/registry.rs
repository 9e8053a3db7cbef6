use std::{collections::HashMap, fs, io::ErrorKind, path::PathBuf};

use sha2::{Digest, Sha256};

use crate::{error::RegistryError, object::ArtifactDescriptor};

/// Resolves a named deployable unit to its compiled descriptor.
pub trait ArtifactRegistry: Send + Sync {
    fn resolve(&self, name: &str) -> Result<ArtifactDescriptor, RegistryError>;
}

pub fn data_hash(bytecode: &[u8]) -> [u8; 32] {
    Sha256::digest(bytecode).into()
}

/// Reads artifacts from a build output directory: `<root>/<name>` holds the binary and an
/// optional `<root>/<name>.json` its interface.
pub struct DirectoryRegistry {
    root: PathBuf,
}

impl DirectoryRegistry {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl ArtifactRegistry for DirectoryRegistry {
    fn resolve(&self, name: &str) -> Result<ArtifactDescriptor, RegistryError> {
        let binary_path = self.root.join(name);
        let bytecode = fs::read(&binary_path).map_err(|cause| match cause.kind() {
            ErrorKind::NotFound => RegistryError::NotFound(name.to_string()),
            _ => RegistryError::Io {
                name: name.to_string(),
                cause,
            },
        })?;
        let interface_path = self.root.join(format!("{name}.json"));
        let interface = if interface_path.exists() {
            let content = fs::read(&interface_path).map_err(|cause| RegistryError::Io {
                name: name.to_string(),
                cause,
            })?;
            let value = serde_json::from_slice(&content).map_err(|cause| {
                RegistryError::Interface {
                    name: name.to_string(),
                    cause,
                }
            })?;
            Some(value)
        } else {
            None
        };
        Ok(ArtifactDescriptor {
            name: name.to_string(),
            data_hash: data_hash(&bytecode),
            bytecode,
            interface,
        })
    }
}

/// Registry over artifacts held in memory.
#[derive(Default)]
pub struct MemoryRegistry {
    artifacts: HashMap<String, Vec<u8>>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_artifact(mut self, name: &str, bytecode: impl Into<Vec<u8>>) -> Self {
        self.insert(name, bytecode);
        self
    }

    pub fn insert(&mut self, name: &str, bytecode: impl Into<Vec<u8>>) {
        self.artifacts.insert(name.to_string(), bytecode.into());
    }
}

impl ArtifactRegistry for MemoryRegistry {
    fn resolve(&self, name: &str) -> Result<ArtifactDescriptor, RegistryError> {
        let bytecode = self
            .artifacts
            .get(name)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))?;
        Ok(ArtifactDescriptor {
            name: name.to_string(),
            data_hash: data_hash(&bytecode),
            bytecode,
            interface: None,
        })
    }
}
