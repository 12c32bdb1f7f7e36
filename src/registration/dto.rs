use serde::Serialize;
use time::OffsetDateTime;
use uuid::Uuid;

use super::{report::ReportCode, repo_types::ProjectRow};

/// Response body for a committed registration.
#[derive(Debug, Serialize)]
pub struct RegisteredResponse {
    pub message: String,
    pub user_id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<ReportCode>,
}

#[derive(Debug, Serialize)]
pub struct DocumentView {
    pub name: String,
    pub file: String, // presigned URL
}

#[derive(Debug, Serialize)]
pub struct ProfileResponse {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub roll_number: String,
    pub department: Option<String>,
    pub year_of_study: Option<String>,
    pub phone_number: Option<String>,
    pub profile_picture: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    pub skills: Vec<String>,
    pub projects: Vec<ProjectRow>,
    pub documents: Vec<DocumentView>,
}
