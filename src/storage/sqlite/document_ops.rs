//! Connection-level project, document, and chunk operations.

use super::map_sqlite_err;
use crate::models::{
    Chunk, CodeChunkMeta, Document, DocumentStatus, DocumentType, ProjectId,
};
use crate::storage::traits::DocumentCounts;
use crate::{Error, Result};
use rusqlite::{Connection, OptionalExtension, params};
use uuid::Uuid;

pub(crate) fn create_project(conn: &Connection, project: ProjectId) -> Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO projects (id, created_at) VALUES (?1, ?2)",
        params![project.to_string(), crate::current_timestamp()],
    )
    .map_err(|e| map_sqlite_err("create_project", &e))?;
    Ok(())
}

pub(crate) fn project_exists(conn: &Connection, project: ProjectId) -> Result<bool> {
    let count: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM projects WHERE id = ?1",
            [project.to_string()],
            |row| row.get(0),
        )
        .map_err(|e| map_sqlite_err("project_exists", &e))?;
    Ok(count > 0)
}

pub(crate) fn delete_project(conn: &Connection, project: ProjectId) -> Result<()> {
    // Foreign keys cascade documents, chunks, vectors, cache rows, and
    // the graph namespace with its vertices/edges.
    conn.execute(
        "DELETE FROM projects WHERE id = ?1",
        [project.to_string()],
    )
    .map_err(|e| map_sqlite_err("delete_project", &e))?;
    Ok(())
}

pub(crate) fn insert_document(conn: &Connection, document: &Document) -> Result<()> {
    conn.execute(
        "INSERT INTO documents
             (id, project_id, doc_type, status, file_name, content, metadata,
              created_at, updated_at, attempts, claimed_by)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, NULL)",
        params![
            document.id.to_string(),
            document.project_id.to_string(),
            document.doc_type.as_str(),
            document.status.as_str(),
            document.file_name,
            document.content,
            document.metadata.to_string(),
            document.created_at,
            document.updated_at,
            document.attempts,
        ],
    )
    .map_err(|e| map_sqlite_err("insert_document", &e))?;
    Ok(())
}

fn document_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Document> {
    let id: String = row.get("id")?;
    let project_id: String = row.get("project_id")?;
    let doc_type: String = row.get("doc_type")?;
    let status: String = row.get("status")?;
    let metadata: String = row.get("metadata")?;
    Ok(Document {
        id: Uuid::parse_str(&id).unwrap_or_default(),
        project_id: ProjectId::from_uuid(Uuid::parse_str(&project_id).unwrap_or_default()),
        doc_type: DocumentType::parse(&doc_type).unwrap_or(DocumentType::Text),
        status: DocumentStatus::parse(&status).unwrap_or(DocumentStatus::NotProcessed),
        file_name: row.get("file_name")?,
        content: row.get("content")?,
        metadata: serde_json::from_str(&metadata).unwrap_or(serde_json::Value::Null),
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
        attempts: row.get("attempts")?,
    })
}

const DOCUMENT_COLUMNS: &str = "id, project_id, doc_type, status, file_name, content, metadata, \
                                created_at, updated_at, attempts";

pub(crate) fn get_document(
    conn: &Connection,
    project: ProjectId,
    id: Uuid,
) -> Result<Option<Document>> {
    conn.query_row(
        &format!("SELECT {DOCUMENT_COLUMNS} FROM documents WHERE project_id = ?1 AND id = ?2"),
        params![project.to_string(), id.to_string()],
        document_from_row,
    )
    .optional()
    .map_err(|e| map_sqlite_err("get_document", &e))
}

pub(crate) fn list_documents(conn: &Connection, project: ProjectId) -> Result<Vec<Document>> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {DOCUMENT_COLUMNS} FROM documents WHERE project_id = ?1
             ORDER BY created_at DESC, id DESC"
        ))
        .map_err(|e| map_sqlite_err("list_documents", &e))?;
    let rows = stmt
        .query_map([project.to_string()], document_from_row)
        .map_err(|e| map_sqlite_err("list_documents", &e))?;
    rows.collect::<rusqlite::Result<Vec<_>>>()
        .map_err(|e| map_sqlite_err("list_documents", &e))
}

/// Selects and claims pending documents under the enclosing transaction.
/// The caller must run this inside `BEGIN IMMEDIATE` for the lease to be
/// exclusive.
pub(crate) fn claim_pending(
    conn: &Connection,
    batch_size: usize,
    worker: &str,
    max_attempts: u32,
) -> Result<Vec<Document>> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {DOCUMENT_COLUMNS} FROM documents
             WHERE status = 'NOT_PROCESSED' AND attempts < ?1
             ORDER BY created_at ASC, id ASC LIMIT ?2"
        ))
        .map_err(|e| map_sqlite_err("claim_pending", &e))?;
    let rows = stmt
        .query_map(
            params![max_attempts, batch_size as i64],
            document_from_row,
        )
        .map_err(|e| map_sqlite_err("claim_pending", &e))?;
    let mut claimed: Vec<Document> =
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| map_sqlite_err("claim_pending", &e))?;

    let now = crate::current_timestamp();
    for document in &mut claimed {
        conn.execute(
            "UPDATE documents
             SET status = 'PROCESSING', claimed_by = ?2, updated_at = ?3
             WHERE id = ?1 AND status = 'NOT_PROCESSED'",
            params![document.id.to_string(), worker, now],
        )
        .map_err(|e| map_sqlite_err("claim_pending", &e))?;
        document.status = DocumentStatus::Processing;
        document.updated_at = now;
    }
    Ok(claimed)
}

pub(crate) fn list_processing(
    conn: &Connection,
    worker: Option<&str>,
) -> Result<Vec<Document>> {
    let (sql, owner);
    if let Some(w) = worker {
        sql = format!(
            "SELECT {DOCUMENT_COLUMNS} FROM documents
             WHERE status = 'PROCESSING' AND claimed_by = ?1
             ORDER BY created_at ASC, id ASC"
        );
        owner = w.to_string();
    } else {
        sql = format!(
            "SELECT {DOCUMENT_COLUMNS} FROM documents
             WHERE status = 'PROCESSING' ORDER BY created_at ASC, id ASC"
        );
        owner = String::new();
    }
    let mut stmt = conn
        .prepare(&sql)
        .map_err(|e| map_sqlite_err("list_processing", &e))?;
    let rows = if worker.is_some() {
        stmt.query_map([owner], document_from_row)
    } else {
        stmt.query_map([], document_from_row)
    }
    .map_err(|e| map_sqlite_err("list_processing", &e))?;
    rows.collect::<rusqlite::Result<Vec<_>>>()
        .map_err(|e| map_sqlite_err("list_processing", &e))
}

pub(crate) fn set_status(
    conn: &Connection,
    id: Uuid,
    from: DocumentStatus,
    to: DocumentStatus,
) -> Result<bool> {
    if !from.can_transition_to(to) {
        return Err(Error::StorageFatal {
            operation: "set_status".to_string(),
            cause: format!("illegal transition {from} -> {to}"),
        });
    }
    let updated = conn
        .execute(
            "UPDATE documents SET status = ?3, updated_at = ?4 WHERE id = ?1 AND status = ?2",
            params![
                id.to_string(),
                from.as_str(),
                to.as_str(),
                crate::current_timestamp()
            ],
        )
        .map_err(|e| map_sqlite_err("set_status", &e))?;
    Ok(updated > 0)
}

pub(crate) fn record_failure(conn: &Connection, id: Uuid) -> Result<()> {
    conn.execute(
        "UPDATE documents
         SET status = 'NOT_PROCESSED', attempts = attempts + 1, claimed_by = NULL,
             updated_at = ?2
         WHERE id = ?1 AND status = 'PROCESSING'",
        params![id.to_string(), crate::current_timestamp()],
    )
    .map_err(|e| map_sqlite_err("record_failure", &e))?;
    Ok(())
}

pub(crate) fn delete_document(
    conn: &Connection,
    project: ProjectId,
    id: Uuid,
) -> Result<bool> {
    let deleted = conn
        .execute(
            "DELETE FROM documents WHERE project_id = ?1 AND id = ?2",
            params![project.to_string(), id.to_string()],
        )
        .map_err(|e| map_sqlite_err("delete_document", &e))?;
    Ok(deleted > 0)
}

pub(crate) fn insert_chunks(conn: &Connection, chunks: &[Chunk]) -> Result<()> {
    for chunk in chunks {
        let code_meta = chunk
            .code_meta
            .as_ref()
            .map(|m| serde_json::to_string(m).unwrap_or_default());
        let cache_ids = serde_json::to_string(
            &chunk
                .cache_ids
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>(),
        )
        .unwrap_or_else(|_| "[]".to_string());
        conn.execute(
            "INSERT INTO chunks
                 (id, document_id, project_id, content, order_index, tokens, code_meta, cache_ids)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                chunk.id.to_string(),
                chunk.document_id.to_string(),
                chunk.project_id.to_string(),
                chunk.content,
                chunk.order_index as i64,
                chunk.tokens as i64,
                code_meta,
                cache_ids,
            ],
        )
        .map_err(|e| map_sqlite_err("insert_chunks", &e))?;
    }
    Ok(())
}

fn chunk_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Chunk> {
    let id: String = row.get("id")?;
    let document_id: String = row.get("document_id")?;
    let project_id: String = row.get("project_id")?;
    let order_index: i64 = row.get("order_index")?;
    let tokens: i64 = row.get("tokens")?;
    let code_meta: Option<String> = row.get("code_meta")?;
    let cache_ids: String = row.get("cache_ids")?;
    Ok(Chunk {
        id: Uuid::parse_str(&id).unwrap_or_default(),
        document_id: Uuid::parse_str(&document_id).unwrap_or_default(),
        project_id: ProjectId::from_uuid(Uuid::parse_str(&project_id).unwrap_or_default()),
        content: row.get("content")?,
        order_index: usize::try_from(order_index).unwrap_or(0),
        tokens: usize::try_from(tokens).unwrap_or(0),
        code_meta: code_meta.and_then(|m| serde_json::from_str::<CodeChunkMeta>(&m).ok()),
        cache_ids: serde_json::from_str::<Vec<String>>(&cache_ids)
            .map(|ids| ids.iter().filter_map(|s| Uuid::parse_str(s).ok()).collect())
            .unwrap_or_default(),
    })
}

const CHUNK_COLUMNS: &str =
    "id, document_id, project_id, content, order_index, tokens, code_meta, cache_ids";

pub(crate) fn get_chunks_by_document(
    conn: &Connection,
    project: ProjectId,
    document_id: Uuid,
) -> Result<Vec<Chunk>> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {CHUNK_COLUMNS} FROM chunks
             WHERE project_id = ?1 AND document_id = ?2 ORDER BY order_index ASC"
        ))
        .map_err(|e| map_sqlite_err("get_chunks_by_document", &e))?;
    let rows = stmt
        .query_map(
            params![project.to_string(), document_id.to_string()],
            chunk_from_row,
        )
        .map_err(|e| map_sqlite_err("get_chunks_by_document", &e))?;
    rows.collect::<rusqlite::Result<Vec<_>>>()
        .map_err(|e| map_sqlite_err("get_chunks_by_document", &e))
}

pub(crate) fn get_chunks_by_ids(
    conn: &Connection,
    project: ProjectId,
    ids: &[Uuid],
) -> Result<Vec<Chunk>> {
    let mut chunks = Vec::new();
    for id in ids {
        let chunk = conn
            .query_row(
                &format!("SELECT {CHUNK_COLUMNS} FROM chunks WHERE project_id = ?1 AND id = ?2"),
                params![project.to_string(), id.to_string()],
                chunk_from_row,
            )
            .optional()
            .map_err(|e| map_sqlite_err("get_chunks_by_ids", &e))?;
        if let Some(chunk) = chunk {
            chunks.push(chunk);
        }
    }
    Ok(chunks)
}

pub(crate) fn delete_chunks(
    conn: &Connection,
    project: ProjectId,
    ids: &[Uuid],
) -> Result<usize> {
    let p = project.to_string();
    let mut deleted = 0usize;
    for id in ids {
        deleted += conn
            .execute(
                "DELETE FROM chunks WHERE project_id = ?1 AND id = ?2",
                params![p, id.to_string()],
            )
            .map_err(|e| map_sqlite_err("delete_chunks", &e))?;
    }
    Ok(deleted)
}

pub(crate) fn attach_cache_id(conn: &Connection, chunk_id: Uuid, cache_id: Uuid) -> Result<()> {
    let current: Option<String> = conn
        .query_row(
            "SELECT cache_ids FROM chunks WHERE id = ?1",
            [chunk_id.to_string()],
            |row| row.get(0),
        )
        .optional()
        .map_err(|e| map_sqlite_err("attach_cache_id", &e))?;
    let Some(current) = current else {
        return Ok(());
    };
    let mut ids: Vec<String> = serde_json::from_str(&current).unwrap_or_default();
    let cache_id = cache_id.to_string();
    if !ids.contains(&cache_id) {
        ids.push(cache_id);
    }
    conn.execute(
        "UPDATE chunks SET cache_ids = ?2 WHERE id = ?1",
        params![
            chunk_id.to_string(),
            serde_json::to_string(&ids).unwrap_or_else(|_| "[]".to_string())
        ],
    )
    .map_err(|e| map_sqlite_err("attach_cache_id", &e))?;
    Ok(())
}

pub(crate) fn counts(conn: &Connection, project: ProjectId) -> Result<DocumentCounts> {
    let p = project.to_string();
    let mut counts = DocumentCounts::default();
    let mut stmt = conn
        .prepare("SELECT status, COUNT(*) FROM documents WHERE project_id = ?1 GROUP BY status")
        .map_err(|e| map_sqlite_err("counts", &e))?;
    let rows = stmt
        .query_map([&p], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })
        .map_err(|e| map_sqlite_err("counts", &e))?;
    for row in rows {
        let (status, count) = row.map_err(|e| map_sqlite_err("counts", &e))?;
        let count = usize::try_from(count).unwrap_or(0);
        match DocumentStatus::parse(&status) {
            Some(DocumentStatus::NotProcessed) => counts.not_processed = count,
            Some(DocumentStatus::Processing) => counts.processing = count,
            Some(DocumentStatus::Processed) => counts.processed = count,
            None => {}
        }
    }
    let chunks: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM chunks WHERE project_id = ?1",
            [&p],
            |row| row.get(0),
        )
        .map_err(|e| map_sqlite_err("counts", &e))?;
    counts.chunks = usize::try_from(chunks).unwrap_or(0);
    Ok(counts)
}
