//! Transaction seam between the coordinator and the relational store.
//!
//! A handle is obtained from a [`TransactionSource`] and owned by exactly one
//! coordination run. `commit` and `rollback` take the handle by value, so a run
//! can perform at most one terminal action and never both.

use std::fmt;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use super::request::{DocumentRef, NewUser, ProjectRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DependentKind {
    Skill,
    Project,
    Document,
}

impl fmt::Display for DependentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Skill => write!(f, "skill"),
            Self::Project => write!(f, "project"),
            Self::Document => write!(f, "document"),
        }
    }
}

/// One row written inside the registration transaction.
#[derive(Debug, Clone, Copy)]
pub enum Insert<'a> {
    User(&'a NewUser),
    Skill { user_id: Uuid, name: &'a str },
    Project { user_id: Uuid, project: &'a ProjectRecord },
    Document { user_id: Uuid, document: &'a DocumentRef },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstraintKind {
    Unique,
    ForeignKey,
    NotNull,
    Check,
    Other,
}

/// Coarse classification of a failed statement, independent of the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultClass {
    Constraint(ConstraintKind),
    Connectivity,
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("statement failed: {detail}")]
pub struct StatementFailed {
    pub class: FaultClass,
    pub detail: String,
    /// Name of the violated constraint, when the store reports one.
    pub constraint: Option<String>,
}

impl StatementFailed {
    pub fn new(class: FaultClass, detail: impl Into<String>) -> Self {
        Self {
            class,
            detail: detail.into(),
            constraint: None,
        }
    }

    pub fn with_constraint(mut self, name: impl Into<String>) -> Self {
        self.constraint = Some(name.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TxError {
    #[error("transaction start failed: {0}")]
    TransactionStartFailed(String),

    #[error("commit failed: {0}")]
    CommitFailed(String),

    #[error("rollback failed: {0}")]
    RollbackFailed(String),
}

#[async_trait]
pub trait TransactionHandle: Send + Sync + Sized {
    /// Executes one insert and returns the generated row id.
    async fn query(&self, stmt: Insert<'_>) -> Result<Uuid, StatementFailed>;

    async fn commit(self) -> Result<(), TxError>;

    async fn rollback(self) -> Result<(), TxError>;
}

#[async_trait]
pub trait TransactionSource: Send + Sync {
    type Handle: TransactionHandle;

    async fn begin(&self) -> Result<Self::Handle, TxError>;
}
