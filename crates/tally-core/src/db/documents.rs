//! Uploaded document records and processing status

use rusqlite::{params, OptionalExtension, Row};
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use super::{new_id, page, parse_datetime, Database};
use crate::error::{Error, Result};
use crate::models::{Document, DocumentStatus, NewDocument};

pub(crate) const DOCUMENT_COLUMNS: &str = "id, user_id, original_filename, file_path, mime_type, user_note, status, error_message, content_hash, created_at";

/// SHA-256 of a file's contents, hex encoded
pub fn content_hash(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

pub(crate) fn row_to_document(row: &Row) -> rusqlite::Result<Document> {
    let status: String = row.get(6)?;
    let created_at: String = row.get(9)?;
    Ok(Document {
        id: row.get(0)?,
        user_id: row.get(1)?,
        original_filename: row.get(2)?,
        file_path: row.get(3)?,
        mime_type: row.get(4)?,
        user_note: row.get(5)?,
        status: status.parse().unwrap_or_default(),
        error_message: row.get(7)?,
        content_hash: row.get(8)?,
        created_at: parse_datetime(&created_at),
    })
}

impl Database {
    /// Record an uploaded document in `UPLOADED` state
    pub fn create_document(&self, user_id: &str, doc: &NewDocument) -> Result<Document> {
        let id = doc.id.clone().unwrap_or_else(new_id);
        let conn = self.conn()?;
        conn.execute(
            r#"
            INSERT INTO documents (id, user_id, original_filename, file_path, mime_type,
                                   user_note, content_hash)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
            params![
                id,
                user_id,
                doc.original_filename,
                doc.file_path,
                doc.mime_type,
                doc.user_note,
                doc.content_hash,
            ],
        )?;
        drop(conn);

        self.get_document(user_id, &id)?
            .ok_or_else(|| Error::NotFound(format!("Document {}", id)))
    }

    /// Get a user's document by ID
    pub fn get_document(&self, user_id: &str, id: &str) -> Result<Option<Document>> {
        let conn = self.conn()?;
        let doc = conn
            .query_row(
                &format!(
                    "SELECT {} FROM documents WHERE id = ? AND user_id = ?",
                    DOCUMENT_COLUMNS
                ),
                params![id, user_id],
                row_to_document,
            )
            .optional()?;
        Ok(doc)
    }

    /// Get a document by ID regardless of owner (background processing)
    pub fn load_document(&self, id: &str) -> Result<Option<Document>> {
        let conn = self.conn()?;
        let doc = conn
            .query_row(
                &format!("SELECT {} FROM documents WHERE id = ?", DOCUMENT_COLUMNS),
                params![id],
                row_to_document,
            )
            .optional()?;
        Ok(doc)
    }

    /// List a user's documents, newest first
    pub fn list_documents(&self, user_id: &str, skip: i64, limit: Option<i64>) -> Result<Vec<Document>> {
        let (skip, limit) = page(skip, limit);
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM documents WHERE user_id = ? ORDER BY created_at DESC, rowid DESC LIMIT ? OFFSET ?",
            DOCUMENT_COLUMNS
        ))?;

        let docs = stmt
            .query_map(params![user_id, limit, skip], row_to_document)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(docs)
    }

    /// Find a user's document with the given content hash
    pub fn find_document_by_hash(&self, user_id: &str, hash: &str) -> Result<Option<Document>> {
        let conn = self.conn()?;
        let doc = conn
            .query_row(
                &format!(
                    "SELECT {} FROM documents WHERE user_id = ? AND content_hash = ? LIMIT 1",
                    DOCUMENT_COLUMNS
                ),
                params![user_id, hash],
                row_to_document,
            )
            .optional()?;
        Ok(doc)
    }

    /// Set a document's processing status
    ///
    /// `error_message` is only kept in `ERROR`.
    pub fn set_document_status(
        &self,
        id: &str,
        status: DocumentStatus,
        error_message: Option<&str>,
    ) -> Result<()> {
        let error_message = if status == DocumentStatus::Error {
            error_message
        } else {
            None
        };
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE documents SET status = ?, error_message = ? WHERE id = ?",
            params![status.as_str(), error_message, id],
        )?;
        if updated == 0 {
            return Err(Error::NotFound(format!("Document {}", id)));
        }
        Ok(())
    }

    /// Move a document into `PARSING` unless it is already there
    ///
    /// Returns `Error::Conflict` when another run holds the document.
    pub fn begin_parsing(&self, id: &str) -> Result<()> {
        let conn = self.conn()?;
        let claimed = conn.execute(
            "UPDATE documents SET status = 'PARSING', error_message = NULL WHERE id = ? AND status != 'PARSING'",
            params![id],
        )?;
        if claimed == 0 {
            let exists: Option<i64> = conn
                .query_row("SELECT 1 FROM documents WHERE id = ?", params![id], |row| {
                    row.get(0)
                })
                .optional()?;
            return Err(match exists {
                Some(_) => Error::Conflict(format!("Document {} is already being processed", id)),
                None => Error::NotFound(format!("Document {}", id)),
            });
        }
        Ok(())
    }

    /// Delete a document record, returning it so the caller can remove the file
    ///
    /// Its proposals and transaction links go with it.
    pub fn delete_document(&self, user_id: &str, id: &str) -> Result<Document> {
        let doc = self
            .get_document(user_id, id)?
            .ok_or_else(|| Error::NotFound(format!("Document {}", id)))?;

        let conn = self.conn()?;
        conn.execute(
            "DELETE FROM documents WHERE id = ? AND user_id = ?",
            params![id, user_id],
        )?;
        Ok(doc)
    }

    /// Fail documents left in `PARSING` by a previous run
    pub fn reset_stale_documents(&self) -> Result<usize> {
        let conn = self.conn()?;
        let reset = conn.execute(
            r#"
            UPDATE documents
            SET status = 'ERROR', error_message = 'Processing interrupted by a server restart'
            WHERE status = 'PARSING'
            "#,
            [],
        )?;
        if reset > 0 {
            warn!(count = reset, "Reset documents stuck in PARSING");
        } else {
            info!("No stale documents");
        }
        Ok(reset)
    }

    /// Count all documents by status
    pub fn count_documents_by_status(&self) -> Result<Vec<(DocumentStatus, i64)>> {
        let conn = self.conn()?;
        let mut stmt =
            conn.prepare("SELECT status, COUNT(*) FROM documents GROUP BY status ORDER BY status")?;

        let counts = stmt
            .query_map([], |row| {
                let status: String = row.get(0)?;
                Ok((status.parse().unwrap_or_default(), row.get(1)?))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(counts)
    }
}
