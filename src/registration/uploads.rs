use anyhow::Context;
use bytes::Bytes;
use tracing::{debug, warn};
use uuid::Uuid;

use super::request::DocumentRef;
use crate::storage::StorageClient;

/// A file received in the signup form, not yet written to storage.
pub struct PendingUpload {
    pub file_name: String,
    pub content_type: String,
    pub body: Bytes,
}

/// Writes every upload to object storage. On failure the objects already
/// written are removed again before the error is returned.
pub async fn store_uploads(
    storage: &dyn StorageClient,
    uploads: Vec<PendingUpload>,
) -> anyhow::Result<Vec<DocumentRef>> {
    let mut stored: Vec<DocumentRef> = Vec::with_capacity(uploads.len());
    for upload in uploads {
        let key = object_key(&upload.file_name, &upload.content_type);
        let put = storage
            .put_object(&key, upload.body, &upload.content_type)
            .await
            .with_context(|| format!("put_object {}", key));
        if let Err(e) = put {
            let keys: Vec<String> = stored.into_iter().map(|d| d.stored_reference).collect();
            discard_uploads(storage, &keys).await;
            return Err(e);
        }
        debug!(%key, file_name = %upload.file_name, "upload stored");
        stored.push(DocumentRef {
            display_name: upload.file_name,
            stored_reference: key,
        });
    }
    Ok(stored)
}

/// Best-effort removal of objects whose registration did not commit.
pub async fn discard_uploads(storage: &dyn StorageClient, keys: &[String]) {
    for key in keys {
        if let Err(e) = storage.delete_object(key).await {
            warn!(error = %e, %key, "failed to delete orphaned upload");
        }
    }
}

fn object_key(file_name: &str, content_type: &str) -> String {
    let ext = ext_from_mime(content_type)
        .map(str::to_string)
        .or_else(|| ext_from_name(file_name))
        .unwrap_or_else(|| "bin".into());
    format!("uploads/{}.{}", Uuid::new_v4(), ext)
}

fn ext_from_mime(ct: &str) -> Option<&'static str> {
    match ct {
        "image/jpeg" | "image/jpg" => Some("jpg"),
        "image/png" => Some("png"),
        "image/webp" => Some("webp"),
        "image/heic" => Some("heic"),
        "application/pdf" => Some("pdf"),
        "application/msword" => Some("doc"),
        "application/vnd.openxmlformats-officedocument.wordprocessingml.document" => Some("docx"),
        "text/plain" => Some("txt"),
        _ => None,
    }
}

fn ext_from_name(file_name: &str) -> Option<String> {
    let (_, ext) = file_name.rsplit_once('.')?;
    let valid = !ext.is_empty() && ext.len() <= 8 && ext.chars().all(|c| c.is_ascii_alphanumeric());
    valid.then(|| ext.to_ascii_lowercase())
}
