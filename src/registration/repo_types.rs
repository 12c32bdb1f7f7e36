use serde::Serialize;
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

/// User record in the database.
#[derive(Debug, Clone, FromRow)]
pub struct UserRow {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub roll_number: String,
    pub department: Option<String>,
    pub year_of_study: Option<String>,
    pub phone_number: Option<String>,
    pub profile_picture: Option<String>, // object key, presigned on read
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct ProjectRow {
    pub project_name: String,
    pub project_description: String,
    pub links: Option<String>,
}

#[derive(Debug, Clone, FromRow)]
pub struct DocumentRow {
    pub document_name: String,
    pub file_path: String,
}

/// A user with all of its dependent rows.
#[derive(Debug, Clone)]
pub struct ProfileRows {
    pub user: UserRow,
    pub skills: Vec<String>,
    pub projects: Vec<ProjectRow>,
    pub documents: Vec<DocumentRow>,
}
