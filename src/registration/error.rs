use std::{fmt, time::Duration};

use serde::Serialize;
use thiserror::Error;

use super::tx::{DependentKind, FaultClass, StatementFailed, TxError};

/// Request data rejected before any transaction is opened.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    #[error("Invalid email")]
    InvalidEmail,

    #[error("Password too short (minimum {0} characters)")]
    PasswordTooShort(usize),

    #[error("Invalid JSON in {field}: {detail}")]
    MalformedJson { field: &'static str, detail: String },

    #[error("Too many documents (maximum {0})")]
    TooManyDocuments(usize),

    #[error("Malformed multipart body: {0}")]
    MalformedMultipart(String),
}

/// Who caused a failure: the caller's data or the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Attribution {
    Client,
    Server,
}

impl From<FaultClass> for Attribution {
    fn from(class: FaultClass) -> Self {
        match class {
            FaultClass::Constraint(_) => Self::Client,
            FaultClass::Connectivity | FaultClass::Other => Self::Server,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InfraStage {
    Begin,
    Commit,
    Rollback,
    FanOut,
}

impl fmt::Display for InfraStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Begin => write!(f, "begin"),
            Self::Commit => write!(f, "commit"),
            Self::Rollback => write!(f, "rollback"),
            Self::FanOut => write!(f, "fan-out"),
        }
    }
}

/// Every way a registration can end without being committed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistrationError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("user insert failed: {detail}")]
    PrimaryInsertFailed {
        class: FaultClass,
        constraint: Option<String>,
        detail: String,
    },

    #[error("{kind} insert #{index} failed: {detail}")]
    DependentInsertFailed {
        kind: DependentKind,
        index: usize,
        class: FaultClass,
        detail: String,
    },

    #[error("transaction {stage} failed: {detail}")]
    Infrastructure { stage: InfraStage, detail: String },

    #[error("registration exceeded its {budget:?} time budget")]
    TimedOut { budget: Duration },
}

impl RegistrationError {
    pub fn primary(err: StatementFailed) -> Self {
        Self::PrimaryInsertFailed {
            class: err.class,
            constraint: err.constraint,
            detail: err.detail,
        }
    }

    pub fn dependent(kind: DependentKind, index: usize, err: StatementFailed) -> Self {
        Self::DependentInsertFailed {
            kind,
            index,
            class: err.class,
            detail: err.detail,
        }
    }

    /// False when the store may still hold the rows, i.e. a commit whose result
    /// never came back.
    pub fn rows_discarded(&self) -> bool {
        !matches!(
            self,
            Self::Infrastructure {
                stage: InfraStage::Commit,
                ..
            }
        )
    }

    pub fn attribution(&self) -> Attribution {
        match self {
            Self::Validation(_) => Attribution::Client,
            Self::PrimaryInsertFailed { class, .. } => (*class).into(),
            Self::DependentInsertFailed { class, .. } => (*class).into(),
            Self::Infrastructure { .. } | Self::TimedOut { .. } => Attribution::Server,
        }
    }
}

impl From<TxError> for RegistrationError {
    fn from(err: TxError) -> Self {
        let (stage, detail) = match err {
            TxError::TransactionStartFailed(d) => (InfraStage::Begin, d),
            TxError::CommitFailed(d) => (InfraStage::Commit, d),
            TxError::RollbackFailed(d) => (InfraStage::Rollback, d),
        };
        Self::Infrastructure { stage, detail }
    }
}
