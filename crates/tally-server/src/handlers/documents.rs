//! Document upload and processing handlers

use std::path::Path as FsPath;
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{FromRequest, Multipart, Path, Query, Request, State},
    http::StatusCode,
    Json,
};
use tracing::{info, warn};

use super::PageQuery;
use crate::{current_user, AppError, AppState, MAX_UPLOAD_SIZE};
use tally_core::db::content_hash;
use tally_core::models::{Document, DocumentStatus, NewDocument, Proposal};

/// A file pulled out of the multipart body
struct UploadedFile {
    filename: String,
    content_type: Option<String>,
    data: Bytes,
}

/// POST /api/documents/upload - Upload a receipt or statement
///
/// Multipart fields: `file` (required) and `user_note` (optional). The
/// document is stored as `{uuid}.{ext}` and processed in the background; the
/// response is the freshly `UPLOADED` record.
pub async fn upload_document(
    State(state): State<Arc<AppState>>,
    request: Request,
) -> Result<Json<Document>, AppError> {
    let user = current_user(&request)?;
    let mut multipart = Multipart::from_request(request, &state)
        .await
        .map_err(|e| AppError::bad_request(&format!("Invalid multipart body: {}", e)))?;

    let mut file: Option<UploadedFile> = None;
    let mut user_note: Option<String> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|_| AppError::bad_request("Invalid upload or file too large (max 10MB)"))?
    {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("file") => {
                let filename = field.file_name().unwrap_or("upload").to_string();
                let content_type = field.content_type().map(str::to_string);
                let data = field.bytes().await.map_err(|_| {
                    AppError::bad_request("Invalid upload or file too large (max 10MB)")
                })?;
                file = Some(UploadedFile {
                    filename,
                    content_type,
                    data,
                });
            }
            Some("user_note") => {
                let text = field
                    .text()
                    .await
                    .map_err(|_| AppError::bad_request("Invalid user_note field"))?;
                user_note = Some(text.trim().to_string()).filter(|s| !s.is_empty());
            }
            _ => {}
        }
    }

    let file = file.ok_or_else(|| AppError::bad_request("Missing file field"))?;
    if file.data.is_empty() {
        return Err(AppError::bad_request("Uploaded file is empty"));
    }
    if file.data.len() > MAX_UPLOAD_SIZE {
        return Err(AppError::bad_request("File too large (max 10MB)"));
    }

    let hash = content_hash(&file.data);
    if let Some(existing) = state.db.find_document_by_hash(user.id(), &hash)? {
        return Err(AppError::conflict(&format!(
            "This document has already been uploaded (document {})",
            existing.id
        )));
    }

    let mime_type = resolve_mime(file.content_type.as_deref(), &file.filename);
    let id = uuid::Uuid::new_v4().to_string();
    let stored_name = format!("{}.{}", id, stored_extension(&file.filename, &mime_type));

    tokio::fs::create_dir_all(&state.config.upload_dir).await?;
    let path = state.config.upload_dir.join(&stored_name);
    tokio::fs::write(&path, &file.data).await?;

    let new_doc = NewDocument {
        id: Some(id),
        original_filename: file.filename.clone(),
        file_path: path.to_string_lossy().to_string(),
        mime_type,
        user_note,
        content_hash: Some(hash),
    };
    let doc = match state.db.create_document(user.id(), &new_doc) {
        Ok(doc) => doc,
        Err(e) => {
            // Don't leave an orphaned file behind
            let _ = tokio::fs::remove_file(&path).await;
            return Err(e.into());
        }
    };

    state.db.log_audit(
        user.email(),
        "upload",
        Some("document"),
        Some(&doc.id),
        Some(&format!(
            "filename={}, size={}, mime={}",
            doc.original_filename,
            file.data.len(),
            doc.mime_type
        )),
    )?;

    info!(document_id = %doc.id, filename = %doc.original_filename, "Document uploaded");
    state.spawn_processing(doc.id.clone());

    Ok(Json(doc))
}

/// GET /api/documents - List the caller's documents, newest first
pub async fn list_documents(
    State(state): State<Arc<AppState>>,
    Query(page): Query<PageQuery>,
    request: Request,
) -> Result<Json<Vec<Document>>, AppError> {
    let user = current_user(&request)?;
    Ok(Json(state.db.list_documents(user.id(), page.skip, page.limit)?))
}

/// GET /api/documents/:id - Get a document and its processing status
pub async fn get_document(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    request: Request,
) -> Result<Json<Document>, AppError> {
    let user = current_user(&request)?;

    let doc = state
        .db
        .get_document(user.id(), &id)?
        .ok_or_else(|| AppError::not_found(&format!("Document {} not found", id)))?;

    Ok(Json(doc))
}

/// DELETE /api/documents/:id - Delete a document, its proposals and its file
pub async fn delete_document(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    request: Request,
) -> Result<StatusCode, AppError> {
    let user = current_user(&request)?;

    let doc = state.db.delete_document(user.id(), &id)?;
    remove_stored_file(&doc.file_path, &state.config.upload_dir);

    state.db.log_audit(
        user.email(),
        "delete",
        Some("document"),
        Some(&id),
        Some(&format!("filename={}", doc.original_filename)),
    )?;

    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/documents/:id/process - Run processing again
///
/// Pending proposals are refreshed rather than duplicated. Returns 202 with
/// the document as it was before the run started.
pub async fn process_document(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    request: Request,
) -> Result<(StatusCode, Json<Document>), AppError> {
    let user = current_user(&request)?;

    let doc = state
        .db
        .get_document(user.id(), &id)?
        .ok_or_else(|| AppError::not_found(&format!("Document {} not found", id)))?;

    if doc.status == DocumentStatus::Parsing {
        return Err(AppError::conflict("Document is already being processed"));
    }

    state
        .db
        .log_audit(user.email(), "process", Some("document"), Some(&id), None)?;

    state.spawn_processing(id);

    Ok((StatusCode::ACCEPTED, Json(doc)))
}

/// GET /api/documents/:id/proposals - Every proposal produced from a document
pub async fn list_document_proposals(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    request: Request,
) -> Result<Json<Vec<Proposal>>, AppError> {
    let user = current_user(&request)?;

    state
        .db
        .get_document(user.id(), &id)?
        .ok_or_else(|| AppError::not_found(&format!("Document {} not found", id)))?;

    Ok(Json(state.db.list_document_proposals(user.id(), &id)?))
}

/// Delete a stored upload, but only if it lives inside the upload directory
fn remove_stored_file(file_path: &str, upload_dir: &FsPath) {
    let path = FsPath::new(file_path);
    match (std::fs::canonicalize(path), std::fs::canonicalize(upload_dir)) {
        (Ok(canonical_file), Ok(canonical_dir)) => {
            if canonical_file.starts_with(&canonical_dir) {
                if let Err(e) = std::fs::remove_file(&canonical_file) {
                    warn!(path = %file_path, error = %e, "Failed to remove document file");
                }
            } else {
                warn!(
                    "Document path outside upload directory, skipping delete: {}",
                    file_path
                );
            }
        }
        _ => warn!(path = %file_path, "Document file already gone"),
    }
}

/// The client's content type, or a guess from the file extension
fn resolve_mime(content_type: Option<&str>, filename: &str) -> String {
    if let Some(ct) = content_type {
        let ct = ct.split(';').next().unwrap_or(ct).trim().to_lowercase();
        if !ct.is_empty() && ct != "application/octet-stream" {
            return ct;
        }
    }

    let ext = FsPath::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_lowercase);
    match ext.as_deref() {
        Some("pdf") => "application/pdf",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("heic") => "image/heic",
        _ => "application/octet-stream",
    }
    .to_string()
}

/// Extension for the stored file
///
/// Taken from the original name when it is short and alphanumeric, so a
/// crafted filename can never steer the stored path.
fn stored_extension(filename: &str, mime_type: &str) -> String {
    let from_name = FsPath::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .filter(|e| !e.is_empty() && e.len() <= 8 && e.chars().all(|c| c.is_ascii_alphanumeric()))
        .map(str::to_lowercase);
    if let Some(ext) = from_name {
        return ext;
    }

    match mime_type {
        "application/pdf" => "pdf",
        "image/jpeg" => "jpg",
        "image/png" => "png",
        "image/gif" => "gif",
        "image/webp" => "webp",
        _ => "bin",
    }
    .to_string()
}
