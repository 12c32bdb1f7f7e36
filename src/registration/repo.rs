use anyhow::Context;
use async_trait::async_trait;
use sqlx::{PgConnection, PgPool, Postgres, Transaction};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{
    repo_types::{DocumentRow, ProfileRows, ProjectRow, UserRow},
    request::{DocumentRef, NewUser, ProjectRecord},
    tx::{
        ConstraintKind, FaultClass, Insert, StatementFailed, TransactionHandle,
        TransactionSource, TxError,
    },
};

/// Unique constraint on `users.email`, named in the migration.
pub const USERS_EMAIL_KEY: &str = "users_email_key";

/// A Postgres transaction checked out of the pool for one registration.
///
/// Statements share the transaction's single connection, so concurrent inserts
/// take turns on it behind the mutex.
pub struct PgTransactionHandle {
    tx: Mutex<Transaction<'static, Postgres>>,
}

#[async_trait]
impl TransactionSource for PgPool {
    type Handle = PgTransactionHandle;

    async fn begin(&self) -> Result<PgTransactionHandle, TxError> {
        let tx = sqlx::Pool::begin(self)
            .await
            .map_err(|e| TxError::TransactionStartFailed(e.to_string()))?;
        Ok(PgTransactionHandle { tx: Mutex::new(tx) })
    }
}

#[async_trait]
impl TransactionHandle for PgTransactionHandle {
    async fn query(&self, stmt: Insert<'_>) -> Result<Uuid, StatementFailed> {
        let mut tx = self.tx.lock().await;
        let conn: &mut PgConnection = &mut tx;
        let inserted = match stmt {
            Insert::User(user) => insert_user_tx(conn, user).await,
            Insert::Skill { user_id, name } => insert_skill_tx(conn, user_id, name).await,
            Insert::Project { user_id, project } => insert_project_tx(conn, user_id, project).await,
            Insert::Document { user_id, document } => {
                insert_document_tx(conn, user_id, document).await
            }
        };
        inserted.map_err(classify)
    }

    async fn commit(self) -> Result<(), TxError> {
        self.tx
            .into_inner()
            .commit()
            .await
            .map_err(|e| TxError::CommitFailed(e.to_string()))
    }

    async fn rollback(self) -> Result<(), TxError> {
        self.tx
            .into_inner()
            .rollback()
            .await
            .map_err(|e| TxError::RollbackFailed(e.to_string()))
    }
}

async fn insert_user_tx(conn: &mut PgConnection, user: &NewUser) -> Result<Uuid, sqlx::Error> {
    sqlx::query_scalar::<_, Uuid>(
        r#"
        INSERT INTO users
            (name, email, password_hash, roll_number, department,
             year_of_study, phone_number, profile_picture)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        RETURNING id
        "#,
    )
    .bind(&user.name)
    .bind(&user.email)
    .bind(&user.password_hash)
    .bind(&user.roll_number)
    .bind(user.department.as_deref())
    .bind(user.year_of_study.as_deref())
    .bind(user.phone_number.as_deref())
    .bind(user.profile_picture.as_deref())
    .fetch_one(conn)
    .await
}

async fn insert_skill_tx(
    conn: &mut PgConnection,
    user_id: Uuid,
    name: &str,
) -> Result<Uuid, sqlx::Error> {
    sqlx::query_scalar::<_, Uuid>(
        r#"INSERT INTO skills (user_id, skill_name) VALUES ($1, $2) RETURNING id"#,
    )
    .bind(user_id)
    .bind(name)
    .fetch_one(conn)
    .await
}

async fn insert_project_tx(
    conn: &mut PgConnection,
    user_id: Uuid,
    project: &ProjectRecord,
) -> Result<Uuid, sqlx::Error> {
    sqlx::query_scalar::<_, Uuid>(
        r#"
        INSERT INTO projects (user_id, project_name, project_description, links)
        VALUES ($1, $2, $3, $4)
        RETURNING id
        "#,
    )
    .bind(user_id)
    .bind(&project.name)
    .bind(&project.description)
    .bind(project.link.as_deref())
    .fetch_one(conn)
    .await
}

async fn insert_document_tx(
    conn: &mut PgConnection,
    user_id: Uuid,
    document: &DocumentRef,
) -> Result<Uuid, sqlx::Error> {
    sqlx::query_scalar::<_, Uuid>(
        r#"
        INSERT INTO documents (user_id, document_name, file_path)
        VALUES ($1, $2, $3)
        RETURNING id
        "#,
    )
    .bind(user_id)
    .bind(&document.display_name)
    .bind(&document.stored_reference)
    .fetch_one(conn)
    .await
}

/// Normalizes a driver error; nothing sqlx-specific leaves this module.
fn classify(err: sqlx::Error) -> StatementFailed {
    match &err {
        sqlx::Error::Database(db) => {
            let class = db
                .code()
                .map(|code| classify_sqlstate(&code))
                .unwrap_or(FaultClass::Other);
            match db.constraint() {
                Some(constraint) => {
                    StatementFailed::new(class, format!("{} ({})", db.message(), constraint))
                        .with_constraint(constraint)
                }
                None => StatementFailed::new(class, db.message()),
            }
        }
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::Protocol(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => StatementFailed::new(FaultClass::Connectivity, err.to_string()),
        _ => StatementFailed::new(FaultClass::Other, err.to_string()),
    }
}

fn classify_sqlstate(code: &str) -> FaultClass {
    match code {
        "23505" => FaultClass::Constraint(ConstraintKind::Unique),
        "23503" => FaultClass::Constraint(ConstraintKind::ForeignKey),
        "23502" => FaultClass::Constraint(ConstraintKind::NotNull),
        "23514" => FaultClass::Constraint(ConstraintKind::Check),
        // integrity (23) and data exceptions (22) come from the submitted values
        c if c.starts_with("23") || c.starts_with("22") => {
            FaultClass::Constraint(ConstraintKind::Other)
        }
        // connection exception, insufficient resources, operator intervention
        c if c.starts_with("08") || c.starts_with("53") || c.starts_with("57P") => {
            FaultClass::Connectivity
        }
        _ => FaultClass::Other,
    }
}

// ---- Queries ----

/// Load a user and all of its dependent rows.
pub async fn load_profile(db: &PgPool, user_id: Uuid) -> anyhow::Result<Option<ProfileRows>> {
    let user = sqlx::query_as::<_, UserRow>(
        r#"
        SELECT id, name, email, roll_number, department, year_of_study,
               phone_number, profile_picture, created_at
          FROM users
         WHERE id = $1
        "#,
    )
    .bind(user_id)
    .fetch_optional(db)
    .await
    .context("load user")?;

    let Some(user) = user else {
        return Ok(None);
    };

    let skills = sqlx::query_scalar::<_, String>(
        r#"SELECT skill_name FROM skills WHERE user_id = $1 ORDER BY created_at, id"#,
    )
    .bind(user_id)
    .fetch_all(db)
    .await
    .context("list skills by user")?;

    let projects = sqlx::query_as::<_, ProjectRow>(
        r#"
        SELECT project_name, project_description, links
          FROM projects
         WHERE user_id = $1
         ORDER BY created_at, id
        "#,
    )
    .bind(user_id)
    .fetch_all(db)
    .await
    .context("list projects by user")?;

    let documents = sqlx::query_as::<_, DocumentRow>(
        r#"
        SELECT document_name, file_path
          FROM documents
         WHERE user_id = $1
         ORDER BY created_at, id
        "#,
    )
    .bind(user_id)
    .fetch_all(db)
    .await
    .context("list documents by user")?;

    Ok(Some(ProfileRows {
        user,
        skills,
        projects,
        documents,
    }))
}
