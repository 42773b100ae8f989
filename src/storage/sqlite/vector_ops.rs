//! Connection-level vector operations.
//!
//! Embeddings are stored as little-endian f32 blobs. Queries scan the
//! project's slice and rank by cosine distance in process; ties break on
//! row id so a fixed snapshot always ranks the same way.

use super::map_sqlite_err;
use crate::models::ProjectId;
use crate::storage::traits::{ChunkEmbedding, EntityEmbedding, VectorFilter, VectorHit};
use crate::{Error, Result};
use rusqlite::{Connection, params};
use uuid::Uuid;

pub(crate) fn encode_embedding(embedding: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(embedding.len() * 4);
    for value in embedding {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

pub(crate) fn decode_embedding(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Cosine distance between two vectors (`1 - cosine similarity`).
pub(crate) fn cosine_distance(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 2.0;
    }
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += f64::from(*x) * f64::from(*y);
        norm_a += f64::from(*x) * f64::from(*x);
        norm_b += f64::from(*y) * f64::from(*y);
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 2.0;
    }
    1.0 - dot / (norm_a.sqrt() * norm_b.sqrt())
}

fn check_dimensions(operation: &str, expected: usize, actual: usize) -> Result<()> {
    if expected != 0 && actual != expected {
        return Err(Error::StorageFatal {
            operation: operation.to_string(),
            cause: format!("embedding has {actual} dimensions, index expects {expected}"),
        });
    }
    Ok(())
}

pub(crate) fn upsert_chunks(
    conn: &Connection,
    project: ProjectId,
    rows: &[ChunkEmbedding],
    dimensions: usize,
) -> Result<()> {
    let p = project.to_string();
    for row in rows {
        check_dimensions("upsert_chunk_vectors", dimensions, row.embedding.len())?;
        conn.execute(
            "INSERT INTO vectors
                 (id, project_id, document_id, chunk_id, entity_name, content, embedding, metadata)
             VALUES (?1, ?2, ?3, ?4, NULL, ?5, ?6, ?7)
             ON CONFLICT(id) DO UPDATE SET
                 content = excluded.content,
                 embedding = excluded.embedding,
                 metadata = excluded.metadata",
            params![
                row.chunk_id.to_string(),
                p,
                row.document_id.to_string(),
                row.chunk_id.to_string(),
                row.content,
                encode_embedding(&row.embedding),
                row.metadata.to_string(),
            ],
        )
        .map_err(|e| map_sqlite_err("upsert_chunk_vectors", &e))?;
    }
    Ok(())
}

pub(crate) fn upsert_entities(
    conn: &Connection,
    project: ProjectId,
    rows: &[EntityEmbedding],
    dimensions: usize,
) -> Result<()> {
    let p = project.to_string();
    for row in rows {
        check_dimensions("upsert_entity_vectors", dimensions, row.embedding.len())?;
        // Entity rows are keyed by (project, name); the row id is derived
        // so re-upserts overwrite in place.
        let row_id = format!("ent:{p}:{}", row.entity_name);
        conn.execute(
            "INSERT INTO vectors
                 (id, project_id, document_id, chunk_id, entity_name, content, embedding, metadata)
             VALUES (?1, ?2, NULL, NULL, ?3, ?4, ?5, '{}')
             ON CONFLICT(id) DO UPDATE SET
                 content = excluded.content,
                 embedding = excluded.embedding",
            params![
                row_id,
                p,
                row.entity_name,
                row.content,
                encode_embedding(&row.embedding),
            ],
        )
        .map_err(|e| map_sqlite_err("upsert_entity_vectors", &e))?;
    }
    Ok(())
}

pub(crate) fn query(
    conn: &Connection,
    project: ProjectId,
    embedding: &[f32],
    top_k: usize,
    filter: VectorFilter,
) -> Result<Vec<VectorHit>> {
    let clause = match filter {
        VectorFilter::Chunks => "AND chunk_id IS NOT NULL",
        VectorFilter::Entities => "AND entity_name IS NOT NULL",
        VectorFilter::Both => "",
    };
    let sql = format!(
        "SELECT id, chunk_id, document_id, entity_name, content, embedding
         FROM vectors WHERE project_id = ?1 {clause}"
    );
    let mut stmt = conn
        .prepare(&sql)
        .map_err(|e| map_sqlite_err("vector_query", &e))?;
    let rows = stmt
        .query_map([project.to_string()], |row| {
            let row_id: String = row.get(0)?;
            let chunk_id: Option<String> = row.get(1)?;
            let document_id: Option<String> = row.get(2)?;
            let entity_name: Option<String> = row.get(3)?;
            let content: String = row.get(4)?;
            let blob: Vec<u8> = row.get(5)?;
            Ok((row_id, chunk_id, document_id, entity_name, content, blob))
        })
        .map_err(|e| map_sqlite_err("vector_query", &e))?;

    let mut scored: Vec<(f64, String, VectorHit)> = Vec::new();
    for row in rows {
        let (row_id, chunk_id, document_id, entity_name, content, blob) =
            row.map_err(|e| map_sqlite_err("vector_query", &e))?;
        let stored = decode_embedding(&blob);
        let distance = cosine_distance(embedding, &stored);
        scored.push((
            distance,
            row_id,
            VectorHit {
                chunk_id: chunk_id.and_then(|s| Uuid::parse_str(&s).ok()),
                document_id: document_id.and_then(|s| Uuid::parse_str(&s).ok()),
                entity_name,
                content,
                distance,
            },
        ));
    }

    // Ascending distance; ties broken by row id for determinism.
    scored.sort_by(|a, b| {
        a.0.partial_cmp(&b.0)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.1.cmp(&b.1))
    });
    Ok(scored.into_iter().take(top_k).map(|(_, _, hit)| hit).collect())
}

pub(crate) fn delete_by_document(
    conn: &Connection,
    project: ProjectId,
    document_id: Uuid,
) -> Result<usize> {
    conn.execute(
        "DELETE FROM vectors WHERE project_id = ?1 AND document_id = ?2",
        params![project.to_string(), document_id.to_string()],
    )
    .map_err(|e| map_sqlite_err("delete_document_vectors", &e))
}

pub(crate) fn delete_entity_embeddings(
    conn: &Connection,
    project: ProjectId,
    names: &[String],
) -> Result<usize> {
    let p = project.to_string();
    let mut deleted = 0usize;
    for name in names {
        deleted += conn
            .execute(
                "DELETE FROM vectors WHERE project_id = ?1 AND entity_name = ?2",
                params![p, name],
            )
            .map_err(|e| map_sqlite_err("delete_entity_vectors", &e))?;
    }
    Ok(deleted)
}

pub(crate) fn delete_chunk_embeddings(
    conn: &Connection,
    project: ProjectId,
    chunk_ids: &[Uuid],
) -> Result<usize> {
    let p = project.to_string();
    let mut deleted = 0usize;
    for chunk_id in chunk_ids {
        deleted += conn
            .execute(
                "DELETE FROM vectors WHERE project_id = ?1 AND chunk_id = ?2",
                params![p, chunk_id.to_string()],
            )
            .map_err(|e| map_sqlite_err("delete_chunk_vectors", &e))?;
    }
    Ok(deleted)
}

pub(crate) fn has_document_vectors(
    conn: &Connection,
    project: ProjectId,
    document_id: Uuid,
) -> Result<bool> {
    let count: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM vectors WHERE project_id = ?1 AND document_id = ?2",
            params![project.to_string(), document_id.to_string()],
            |row| row.get(0),
        )
        .map_err(|e| map_sqlite_err("has_document_vectors", &e))?;
    Ok(count > 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedding_roundtrip() {
        let embedding = vec![0.5f32, -1.25, 3.0];
        assert_eq!(decode_embedding(&encode_embedding(&embedding)), embedding);
    }

    #[test]
    fn test_cosine_distance() {
        let a = [1.0f32, 0.0];
        let b = [1.0f32, 0.0];
        let c = [0.0f32, 1.0];
        let d = [-1.0f32, 0.0];
        assert!(cosine_distance(&a, &b).abs() < 1e-9);
        assert!((cosine_distance(&a, &c) - 1.0).abs() < 1e-9);
        assert!((cosine_distance(&a, &d) - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_mismatched_dimensions_distance() {
        assert!((cosine_distance(&[1.0], &[1.0, 2.0]) - 2.0).abs() < f64::EPSILON);
    }
}
