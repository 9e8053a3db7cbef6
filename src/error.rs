use std::{path::PathBuf, time::Duration};

use thiserror::Error;

/// Everything a migration run can surface to its caller.
#[derive(Error, Debug)]
pub enum MigrateError {
    #[error("{0}")]
    Configuration(#[from] ConfigurationError),
    #[error("migration state store unavailable for network `{network}`: {cause}")]
    StoreUnavailable {
        network: String,
        #[source]
        cause: StoreError,
    },
    #[error("migration {sequence} failed on network `{network}`: {cause}")]
    MigrationFailed {
        network: String,
        sequence: u64,
        #[source]
        cause: DeploymentError,
    },
    /// The unit's body succeeded but its progress could not be persisted. The next run
    /// will execute the same unit again.
    #[error("migration {sequence} succeeded on network `{network}` but progress was not recorded: {cause}")]
    ProgressNotRecorded {
        network: String,
        sequence: u64,
        #[source]
        cause: StoreError,
    },
    #[error("migration store refused to advance network `{network}` to {sequence}: {cause}")]
    InvariantViolation {
        network: String,
        sequence: u64,
        #[source]
        cause: StoreError,
    },
    #[error("migration run on network `{network}` cancelled{}", cancelled_at(.sequence))]
    Cancelled {
        network: String,
        sequence: Option<u64>,
    },
}

impl MigrateError {
    /// The sequence number that halted progress, if any.
    pub fn sequence(&self) -> Option<u64> {
        match self {
            MigrateError::MigrationFailed { sequence, .. }
            | MigrateError::ProgressNotRecorded { sequence, .. }
            | MigrateError::InvariantViolation { sequence, .. } => Some(*sequence),
            MigrateError::Cancelled { sequence, .. } => *sequence,
            MigrateError::Configuration(_) | MigrateError::StoreUnavailable { .. } => None,
        }
    }
}

/// A malformed or ambiguous migration set.
#[derive(Error, Debug)]
pub enum ConfigurationError {
    #[error("duplicate migration sequence {sequence} (`{first}` and `{second}`)")]
    DuplicateSequence {
        sequence: u64,
        first: String,
        second: String,
    },
    #[error("migration `{label}` has sequence 0, sequences start at 1")]
    ZeroSequence { label: String },
    #[error("migration {sequence} was applied to network `{network}` but is missing from the migration set")]
    MissingAppliedUnit { network: String, sequence: u64 },
    #[error("migration {sequence} is below the completed marker {completed_through} of network `{network}` but was never applied there")]
    RetroactiveInsert {
        network: String,
        sequence: u64,
        completed_through: u64,
    },
    #[error("invalid migration file name `{}`, expected `<sequence>_<label>.json`", .0.display())]
    InvalidFileName(PathBuf),
    #[error("failed to read migration definition `{}`: {cause}", .path.display())]
    Unreadable {
        path: PathBuf,
        #[source]
        cause: std::io::Error,
    },
    #[error("malformed migration definition `{}`: {cause}", .path.display())]
    Malformed {
        path: PathBuf,
        #[source]
        cause: serde_json::Error,
    },
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("{0}")]
    Io(#[from] std::io::Error),
    #[error("corrupt migration state `{}`: {cause}", .path.display())]
    Corrupt {
        path: PathBuf,
        #[source]
        cause: serde_json::Error,
    },
    #[error("{0}")]
    Encode(#[from] serde_json::Error),
    #[error("sequence {requested} is not above the completed marker {current}")]
    NotIncreasing { current: u64, requested: u64 },
}

/// Failure of a unit's body: rejected transaction, timeout, bad arguments.
#[derive(Error, Debug)]
pub enum DeploymentError {
    #[error("deployment of `{artifact}` rejected: {reason}")]
    Rejected { artifact: String, reason: String },
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("invalid constructor arguments: {0}")]
    InvalidArguments(String),
    #[error("no deployed handle named `{0}`")]
    UnknownHandle(String),
    #[error("network `{0}` has no accounts to deploy from")]
    NoAccount(String),
    #[error("account index {index} out of range, network `{network}` has {available}")]
    AccountOutOfRange {
        network: String,
        index: usize,
        available: usize,
    },
    #[error("{0}")]
    Artifact(#[from] RegistryError),
    #[error("transport error: {0}")]
    Transport(String),
}

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("artifact `{0}` not found")]
    NotFound(String),
    #[error("failed to read artifact `{name}`: {cause}")]
    Io {
        name: String,
        #[source]
        cause: std::io::Error,
    },
    #[error("malformed interface for artifact `{name}`: {cause}")]
    Interface {
        name: String,
        #[source]
        cause: serde_json::Error,
    },
}

fn cancelled_at(sequence: &Option<u64>) -> String {
    match sequence {
        Some(sequence) => format!(" during migration {sequence}"),
        None => String::new(),
    }
}
