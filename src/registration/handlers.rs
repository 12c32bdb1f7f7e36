use axum::{
    extract::{multipart::Field, DefaultBodyLimit, Multipart, Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use tracing::{debug, error, info, instrument};
use uuid::Uuid;

use super::{
    coordinator::{FanOutCoordinator, Outcome},
    dto::{DocumentView, ErrorBody, ProfileResponse, RegisteredResponse},
    error::ValidationError,
    repo::load_profile,
    report::{report, report_error, Report, ReportCode},
    request::{RegistrationDraft, RegistrationForm},
    tx::TransactionSource,
    uploads::{discard_uploads, store_uploads, PendingUpload},
};
use crate::{password::hash_password, state::AppState, storage::StorageClient};

type Rejection = (StatusCode, Json<ErrorBody>);
type Registered = (StatusCode, Json<RegisteredResponse>);

pub fn signup_routes() -> Router<AppState> {
    Router::new()
        .route("/signup", post(signup))
        .layer(DefaultBodyLimit::max(20 * 1024 * 1024)) // 20MB
}

pub fn profile_routes() -> Router<AppState> {
    Router::new().route("/profile/:user_id", get(get_profile))
}

/// POST /signup (multipart)
/// Text fields plus `documents` files and an optional `profilePicture`.
/// Skills and projects arrive as JSON strings.
#[instrument(skip(state, mp))]
pub async fn signup(
    State(state): State<AppState>,
    mp: Multipart,
) -> Result<Registered, Rejection> {
    let form = read_signup_form(mp, state.config.registration.max_documents)
        .await
        .map_err(invalid)?;
    let draft = form.fields.validate().map_err(invalid)?;

    let password = draft.password.clone();
    let password_hash = tokio::task::spawn_blocking(move || hash_password(&password))
        .await
        .map_err(anyhow::Error::from)
        .and_then(|hashed| hashed)
        .map_err(|e| {
            error!(error = %e, "hash_password failed");
            message(StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error")
        })?;

    let coordinator = FanOutCoordinator::new(&state.config.registration);
    complete_signup(
        &state.db,
        state.storage.as_ref(),
        &coordinator,
        draft,
        password_hash,
        form.files,
    )
    .await
}

/// Stores the uploaded files, registers the user through `source` and settles
/// the stored objects according to the outcome.
async fn complete_signup<S: TransactionSource>(
    source: &S,
    storage: &dyn StorageClient,
    coordinator: &FanOutCoordinator,
    draft: RegistrationDraft,
    password_hash: String,
    files: SignupFiles,
) -> Result<Registered, Rejection> {
    let has_picture = files.profile_picture.is_some();
    let mut uploads = files.documents;
    uploads.extend(files.profile_picture);
    let mut stored = store_uploads(storage, uploads).await.map_err(|e| {
        error!(error = %e, "storing uploads failed");
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ErrorBody {
                error: "File storage unavailable, please retry later".into(),
                code: Some(ReportCode::StoreUnavailable),
            }),
        )
    })?;
    let uploaded_keys: Vec<String> = stored.iter().map(|d| d.stored_reference.clone()).collect();
    let profile_picture = if has_picture {
        stored.pop().map(|d| d.stored_reference)
    } else {
        None
    };

    let registration = draft.into_registration(password_hash, stored, profile_picture);
    let outcome = coordinator.register(source, &registration).await;

    if let Outcome::RolledBack(err) = &outcome {
        if err.rows_discarded() {
            discard_uploads(storage, &uploaded_keys).await;
        } else if !uploaded_keys.is_empty() {
            // The rows may have been committed; their files must stay.
            error!(keys = ?uploaded_keys, "commit result unknown; uploads kept for reconciliation");
        }
    }

    let summary = report(&outcome);
    match outcome.into_result() {
        Ok(user_id) => {
            info!(%user_id, email = %registration.user.email, "user registered");
            Ok((
                StatusCode::CREATED,
                Json(RegisteredResponse {
                    message: summary.message,
                    user_id,
                }),
            ))
        }
        Err(_) => Err(reject(&summary)),
    }
}

#[instrument(skip(state))]
pub async fn get_profile(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> Result<Json<ProfileResponse>, Rejection> {
    let rows = match load_profile(&state.db, user_id).await {
        Ok(Some(rows)) => rows,
        Ok(None) => return Err(message(StatusCode::NOT_FOUND, "User not found")),
        Err(e) => {
            error!(error = %e, %user_id, "load_profile failed");
            return Err(message(StatusCode::INTERNAL_SERVER_ERROR, "Error fetching user"));
        }
    };

    let ttl = state.config.storage.presign_ttl_secs;
    let presign = |key: String| {
        let storage = state.storage.clone();
        async move {
            storage.presign_get(&key, ttl).await.map_err(|e| {
                error!(error = %e, %key, "presign failed");
                message(StatusCode::INTERNAL_SERVER_ERROR, "Error fetching documents")
            })
        }
    };

    let profile_picture = match rows.user.profile_picture {
        Some(key) => Some(presign(key).await?),
        None => None,
    };
    let mut documents = Vec::with_capacity(rows.documents.len());
    for doc in rows.documents {
        documents.push(DocumentView {
            name: doc.document_name,
            file: presign(doc.file_path).await?,
        });
    }

    Ok(Json(ProfileResponse {
        id: rows.user.id,
        name: rows.user.name,
        email: rows.user.email,
        roll_number: rows.user.roll_number,
        department: rows.user.department,
        year_of_study: rows.user.year_of_study,
        phone_number: rows.user.phone_number,
        profile_picture,
        created_at: rows.user.created_at,
        skills: rows.skills,
        projects: rows.projects,
        documents,
    }))
}

// --- multipart ---

struct SignupForm {
    fields: RegistrationForm,
    files: SignupFiles,
}

#[derive(Default)]
struct SignupFiles {
    documents: Vec<PendingUpload>,
    profile_picture: Option<PendingUpload>,
}

async fn read_signup_form(
    mut mp: Multipart,
    max_documents: usize,
) -> Result<SignupForm, ValidationError> {
    let mut form = SignupForm {
        fields: RegistrationForm::default(),
        files: SignupFiles::default(),
    };

    while let Some(field) = mp.next_field().await.map_err(malformed)? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "documents" | "documents[]" => {
                let Some(upload) = read_file(field).await? else {
                    continue;
                };
                if form.files.documents.len() == max_documents {
                    return Err(ValidationError::TooManyDocuments(max_documents));
                }
                form.files.documents.push(upload);
            }
            "profilePicture" | "profile_picture" => {
                let Some(upload) = read_file(field).await? else {
                    continue;
                };
                if form.files.profile_picture.is_some() {
                    return Err(ValidationError::MalformedMultipart(
                        "only one profilePicture is allowed".into(),
                    ));
                }
                form.files.profile_picture = Some(upload);
            }
            _ => {
                let value = field.text().await.map_err(malformed)?;
                if !form.fields.set(&name, value) {
                    debug!(field = %name, "ignoring unknown form field");
                }
            }
        }
    }
    Ok(form)
}

// Browsers send an empty, unnamed part for a file input left blank.
async fn read_file(field: Field<'_>) -> Result<Option<PendingUpload>, ValidationError> {
    let file_name = field.file_name().unwrap_or_default().to_string();
    let content_type = field
        .content_type()
        .map(|s| s.to_string())
        .unwrap_or_else(|| "application/octet-stream".into());
    let body = field.bytes().await.map_err(malformed)?;
    if file_name.is_empty() && body.is_empty() {
        return Ok(None);
    }
    Ok(Some(PendingUpload {
        file_name: if file_name.is_empty() { "upload".into() } else { file_name },
        content_type,
        body,
    }))
}

fn malformed(e: axum::extract::multipart::MultipartError) -> ValidationError {
    ValidationError::MalformedMultipart(e.body_text())
}

// --- responses ---

fn status_for(code: ReportCode) -> StatusCode {
    match code {
        ReportCode::Registered => StatusCode::CREATED,
        ReportCode::InvalidInput => StatusCode::BAD_REQUEST,
        ReportCode::DuplicateEmail => StatusCode::CONFLICT,
        ReportCode::ConstraintViolation => StatusCode::UNPROCESSABLE_ENTITY,
        ReportCode::StoreUnavailable | ReportCode::Timeout => StatusCode::SERVICE_UNAVAILABLE,
        ReportCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn reject(report: &Report) -> Rejection {
    (
        status_for(report.code),
        Json(ErrorBody {
            error: report.message.clone(),
            code: Some(report.code),
        }),
    )
}

fn invalid(e: ValidationError) -> Rejection {
    reject(&report_error(&e.into()))
}

fn message(status: StatusCode, msg: &str) -> Rejection {
    (
        status,
        Json(ErrorBody {
            error: msg.into(),
            code: None,
        }),
    )
}
