//! Turns a registration outcome into a transport-agnostic report.
//!
//! Client-attributable failures keep a specific message. Server-attributable
//! failures get a generic message; their detail only goes to the log.

use serde::Serialize;
use tracing::{error, warn};
use uuid::Uuid;

use super::{
    coordinator::Outcome,
    error::{Attribution, InfraStage, RegistrationError},
    repo::USERS_EMAIL_KEY,
    tx::{ConstraintKind, FaultClass},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusClass {
    Success,
    ClientError,
    ServerError,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportCode {
    Registered,
    InvalidInput,
    DuplicateEmail,
    ConstraintViolation,
    StoreUnavailable,
    Timeout,
    Internal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Report {
    pub class: StatusClass,
    pub code: ReportCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<Uuid>,
}

impl Report {
    fn client(code: ReportCode, message: impl Into<String>) -> Self {
        Self {
            class: StatusClass::ClientError,
            code,
            message: message.into(),
            user_id: None,
        }
    }

    fn server(code: ReportCode) -> Self {
        let message = match code {
            ReportCode::StoreUnavailable => "Service temporarily unavailable, please retry later",
            ReportCode::Timeout => "Registration timed out, please retry later",
            _ => "Internal Server Error",
        };
        Self {
            class: StatusClass::ServerError,
            code,
            message: message.into(),
            user_id: None,
        }
    }
}

pub fn report(outcome: &Outcome) -> Report {
    match outcome {
        Outcome::Committed(user_id) => Report {
            class: StatusClass::Success,
            code: ReportCode::Registered,
            message: "User registered successfully".into(),
            user_id: Some(*user_id),
        },
        Outcome::RolledBack(err) => report_error(err),
    }
}

pub fn report_error(err: &RegistrationError) -> Report {
    let report = match err {
        RegistrationError::Validation(v) => Report::client(ReportCode::InvalidInput, v.to_string()),
        RegistrationError::PrimaryInsertFailed {
            class, constraint, ..
        } => match class {
            FaultClass::Constraint(ConstraintKind::Unique)
                if constraint.as_deref() == Some(USERS_EMAIL_KEY) =>
            {
                Report::client(ReportCode::DuplicateEmail, "Email already registered")
            }
            FaultClass::Constraint(_) => {
                Report::client(ReportCode::ConstraintViolation, "User details were rejected")
            }
            FaultClass::Connectivity => Report::server(ReportCode::StoreUnavailable),
            FaultClass::Other => Report::server(ReportCode::Internal),
        },
        RegistrationError::DependentInsertFailed {
            kind, index, class, ..
        } => match class {
            FaultClass::Constraint(_) => Report::client(
                ReportCode::ConstraintViolation,
                format!("Invalid {} at position {}", kind, index + 1),
            ),
            FaultClass::Connectivity => Report::server(ReportCode::StoreUnavailable),
            FaultClass::Other => Report::server(ReportCode::Internal),
        },
        RegistrationError::Infrastructure { stage, .. } => match stage {
            InfraStage::Begin | InfraStage::Commit => Report::server(ReportCode::StoreUnavailable),
            InfraStage::Rollback | InfraStage::FanOut => Report::server(ReportCode::Internal),
        },
        RegistrationError::TimedOut { .. } => Report::server(ReportCode::Timeout),
    };

    match err.attribution() {
        Attribution::Server => error!(error = %err, code = ?report.code, "registration failed"),
        Attribution::Client => warn!(error = %err, code = ?report.code, "registration rejected"),
    }
    report
}
