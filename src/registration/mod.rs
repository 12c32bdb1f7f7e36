//! Student registration: a user row plus its skills, projects and documents,
//! written as one all-or-nothing transaction.

pub mod coordinator;
mod dto;
pub mod error;
pub mod handlers;
pub mod repo;
mod repo_types;
pub mod report;
pub mod request;
pub mod tx;
mod uploads;

#[cfg(test)]
pub(crate) mod testing;

use crate::state::AppState;
use axum::Router;

pub fn router() -> Router<AppState> {
    Router::new()
        .merge(handlers::signup_routes())
        .merge(handlers::profile_routes())
}
