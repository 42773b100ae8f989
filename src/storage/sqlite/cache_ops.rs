//! Connection-level extraction-cache operations.

use super::map_sqlite_err;
use crate::models::{CacheType, CachedExtraction, ProjectId};
use crate::{Error, Result};
use rusqlite::{Connection, OptionalExtension, params};
use uuid::Uuid;

pub(crate) fn put(conn: &Connection, entry: &CachedExtraction) -> Result<Uuid> {
    // The unique (project, type, hash) key makes concurrent inserts
    // idempotent: the loser of a race reads the winner's row back.
    let inserted = conn
        .execute(
            "INSERT INTO extraction_cache
                 (id, project_id, cache_type, chunk_id, content_hash, result, tokens_used, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(project_id, cache_type, content_hash) DO NOTHING",
            params![
                entry.id.to_string(),
                entry.project_id.to_string(),
                entry.cache_type.as_str(),
                entry.chunk_id.map(|id| id.to_string()),
                entry.content_hash,
                entry.result,
                i64::try_from(entry.tokens_used).unwrap_or(i64::MAX),
                entry.created_at,
            ],
        )
        .map_err(|e| map_sqlite_err("cache_put", &e))?;
    if inserted > 0 {
        return Ok(entry.id);
    }
    let existing: String = conn
        .query_row(
            "SELECT id FROM extraction_cache
             WHERE project_id = ?1 AND cache_type = ?2 AND content_hash = ?3",
            params![
                entry.project_id.to_string(),
                entry.cache_type.as_str(),
                entry.content_hash
            ],
            |row| row.get(0),
        )
        .map_err(|e| map_sqlite_err("cache_put", &e))?;
    Uuid::parse_str(&existing).map_err(|e| Error::StorageFatal {
        operation: "cache_put".to_string(),
        cause: format!("malformed cache row id: {e}"),
    })
}

fn entry_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<CachedExtraction> {
    let id: String = row.get("id")?;
    let project_id: String = row.get("project_id")?;
    let cache_type: String = row.get("cache_type")?;
    let chunk_id: Option<String> = row.get("chunk_id")?;
    Ok(CachedExtraction {
        id: Uuid::parse_str(&id).unwrap_or_default(),
        project_id: crate::models::ProjectId::from_uuid(
            Uuid::parse_str(&project_id).unwrap_or_default(),
        ),
        cache_type: CacheType::parse(&cache_type).unwrap_or(CacheType::EntityExtraction),
        chunk_id: chunk_id.and_then(|s| Uuid::parse_str(&s).ok()),
        content_hash: row.get("content_hash")?,
        result: row.get("result")?,
        tokens_used: {
            let v: i64 = row.get("tokens_used")?;
            u64::try_from(v).unwrap_or(0)
        },
        created_at: row.get("created_at")?,
    })
}

const CACHE_COLUMNS: &str =
    "id, project_id, cache_type, chunk_id, content_hash, result, tokens_used, created_at";

pub(crate) fn get(
    conn: &Connection,
    project: ProjectId,
    cache_type: CacheType,
    content_hash: &str,
) -> Result<Option<CachedExtraction>> {
    conn.query_row(
        &format!(
            "SELECT {CACHE_COLUMNS} FROM extraction_cache
             WHERE project_id = ?1 AND cache_type = ?2 AND content_hash = ?3"
        ),
        params![project.to_string(), cache_type.as_str(), content_hash],
        entry_from_row,
    )
    .optional()
    .map_err(|e| map_sqlite_err("cache_get", &e))
}

pub(crate) fn get_by_chunks(
    conn: &Connection,
    project: ProjectId,
    cache_types: &[CacheType],
    chunk_ids: &[Uuid],
) -> Result<Vec<CachedExtraction>> {
    if chunk_ids.is_empty() || cache_types.is_empty() {
        return Ok(Vec::new());
    }
    let type_placeholders = vec!["?"; cache_types.len()].join(", ");
    let chunk_placeholders = vec!["?"; chunk_ids.len()].join(", ");
    let sql = format!(
        "SELECT {CACHE_COLUMNS} FROM extraction_cache
         WHERE project_id = ? AND cache_type IN ({type_placeholders})
           AND chunk_id IN ({chunk_placeholders})
         ORDER BY created_at ASC, id ASC"
    );
    let mut stmt = conn
        .prepare(&sql)
        .map_err(|e| map_sqlite_err("cache_get_by_chunks", &e))?;
    let project_str = project.to_string();
    let type_strs: Vec<String> = cache_types.iter().map(|t| t.as_str().to_string()).collect();
    let chunk_strs: Vec<String> = chunk_ids.iter().map(ToString::to_string).collect();
    let mut sql_params: Vec<&dyn rusqlite::ToSql> = vec![&project_str];
    for t in &type_strs {
        sql_params.push(t);
    }
    for c in &chunk_strs {
        sql_params.push(c);
    }
    let rows = stmt
        .query_map(sql_params.as_slice(), entry_from_row)
        .map_err(|e| map_sqlite_err("cache_get_by_chunks", &e))?;
    rows.collect::<rusqlite::Result<Vec<_>>>()
        .map_err(|e| map_sqlite_err("cache_get_by_chunks", &e))
}

pub(crate) fn detach_chunks(
    conn: &Connection,
    project: ProjectId,
    chunk_ids: &[Uuid],
) -> Result<usize> {
    let p = project.to_string();
    let mut detached = 0usize;
    for chunk_id in chunk_ids {
        detached += conn
            .execute(
                "UPDATE extraction_cache SET chunk_id = NULL
                 WHERE project_id = ?1 AND chunk_id = ?2",
                params![p, chunk_id.to_string()],
            )
            .map_err(|e| map_sqlite_err("cache_detach_chunks", &e))?;
    }
    Ok(detached)
}

pub(crate) fn count(conn: &Connection, project: ProjectId) -> Result<usize> {
    let count: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM extraction_cache WHERE project_id = ?1",
            [project.to_string()],
            |row| row.get(0),
        )
        .map_err(|e| map_sqlite_err("cache_count", &e))?;
    Ok(usize::try_from(count).unwrap_or(0))
}
