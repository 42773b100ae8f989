//! Connection-level graph operations.
//!
//! Free functions over `&Connection` so the same code serves both the
//! `GraphStore` trait impl (which locks per call) and multi-store
//! transactions (which lock once and thread the connection through).
//!
//! Every statement filters on `project_id`; the namespace registry row is
//! the existence witness required before any vertex/edge operation.

use super::map_sqlite_err;
use crate::models::{Entity, GraphStats, ProjectId, Relation, RelationKey};
use crate::storage::namespace;
use crate::{Error, Result};
use rusqlite::{Connection, OptionalExtension, params};
use std::collections::{BTreeSet, HashMap};
use uuid::Uuid;

fn encode_ids(ids: &[Uuid]) -> String {
    serde_json::to_string(&ids.iter().map(ToString::to_string).collect::<Vec<_>>())
        .unwrap_or_else(|_| "[]".to_string())
}

fn decode_ids(raw: &str) -> Vec<Uuid> {
    serde_json::from_str::<Vec<String>>(raw)
        .map(|strings| {
            strings
                .iter()
                .filter_map(|s| Uuid::parse_str(s).ok())
                .collect()
        })
        .unwrap_or_default()
}

fn encode_paths(paths: &[String]) -> String {
    serde_json::to_string(paths).unwrap_or_else(|_| "[]".to_string())
}

fn decode_paths(raw: &str) -> Vec<String> {
    serde_json::from_str(raw).unwrap_or_default()
}

/// Merges `fragment` into an accumulated description unless it is already
/// present.
fn merge_description(existing: &str, fragment: &str, separator: &str) -> String {
    if existing.is_empty() {
        return fragment.to_string();
    }
    if fragment.is_empty() || existing.split(separator).any(|part| part == fragment) {
        return existing.to_string();
    }
    format!("{existing}{separator}{fragment}")
}

fn merge_capped<T: PartialEq + Clone>(existing: &mut Vec<T>, incoming: &[T], cap: usize) {
    for item in incoming {
        crate::models::graph::push_capped(existing, item.clone(), cap);
    }
}

pub(crate) fn ensure_graph(conn: &Connection, project: ProjectId) -> Result<()> {
    // Pre-creation existence check: the underlying engine errors on
    // duplicate creation.
    if graph_exists(conn, project)? {
        return Ok(());
    }
    let name = namespace::graph_name(project);
    if !namespace::is_valid_graph_name(&name) {
        return Err(Error::StorageFatal {
            operation: "ensure_graph".to_string(),
            cause: format!("derived graph name '{name}' is malformed"),
        });
    }
    conn.execute(
        "INSERT OR IGNORE INTO graph_namespaces (project_id, graph_name, created_at)
         VALUES (?1, ?2, ?3)",
        params![project.to_string(), name, crate::current_timestamp()],
    )
    .map_err(|e| map_sqlite_err("ensure_graph", &e))?;
    tracing::debug!(project = %project, graph = %name, "graph namespace ensured");
    Ok(())
}

pub(crate) fn drop_graph(conn: &Connection, project: ProjectId) -> Result<()> {
    let p = project.to_string();
    conn.execute("DELETE FROM graph_relations WHERE project_id = ?1", [&p])
        .map_err(|e| map_sqlite_err("drop_graph", &e))?;
    conn.execute("DELETE FROM graph_entities WHERE project_id = ?1", [&p])
        .map_err(|e| map_sqlite_err("drop_graph", &e))?;
    conn.execute("DELETE FROM graph_namespaces WHERE project_id = ?1", [&p])
        .map_err(|e| map_sqlite_err("drop_graph", &e))?;
    Ok(())
}

pub(crate) fn graph_exists(conn: &Connection, project: ProjectId) -> Result<bool> {
    let count: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM graph_namespaces WHERE project_id = ?1",
            [project.to_string()],
            |row| row.get(0),
        )
        .map_err(|e| map_sqlite_err("graph_exists", &e))?;
    Ok(count > 0)
}

/// Fails with `GRAPH_NOT_FOUND` unless the namespace exists.
pub(crate) fn require_graph(conn: &Connection, project: ProjectId) -> Result<()> {
    if graph_exists(conn, project)? {
        Ok(())
    } else {
        Err(Error::GraphNotFound {
            project_id: project.to_string(),
        })
    }
}

pub(crate) fn upsert_entity(
    conn: &Connection,
    project: ProjectId,
    entity: &Entity,
    cap: usize,
    separator: &str,
) -> Result<()> {
    require_graph(conn, project)?;
    let existing = get_entity(conn, project, &entity.name)?;

    let merged = match existing {
        Some(mut current) => {
            current.description =
                merge_description(&current.description, &entity.description, separator);
            if current.entity_type.is_empty() {
                current.entity_type = entity.entity_type.clone();
            }
            merge_capped(&mut current.source_chunk_ids, &entity.source_chunk_ids, cap);
            merge_capped(
                &mut current.source_file_paths,
                &entity.source_file_paths,
                cap,
            );
            current
        }
        None => {
            let mut fresh = entity.clone();
            if cap > 0 && fresh.source_chunk_ids.len() > cap {
                let excess = fresh.source_chunk_ids.len() - cap;
                fresh.source_chunk_ids.drain(..excess);
            }
            if cap > 0 && fresh.source_file_paths.len() > cap {
                let excess = fresh.source_file_paths.len() - cap;
                fresh.source_file_paths.drain(..excess);
            }
            fresh
        }
    };

    conn.execute(
        "INSERT INTO graph_entities
             (project_id, name, entity_type, description, source_chunk_ids, source_file_paths)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT(project_id, name) DO UPDATE SET
             entity_type = excluded.entity_type,
             description = excluded.description,
             source_chunk_ids = excluded.source_chunk_ids,
             source_file_paths = excluded.source_file_paths",
        params![
            project.to_string(),
            merged.name,
            merged.entity_type,
            merged.description,
            encode_ids(&merged.source_chunk_ids),
            encode_paths(&merged.source_file_paths),
        ],
    )
    .map_err(|e| map_sqlite_err("upsert_entity", &e))?;
    Ok(())
}

/// Whole-entity replace used by the merge service (no merge-on-match).
pub(crate) fn put_entity(conn: &Connection, project: ProjectId, entity: &Entity) -> Result<()> {
    require_graph(conn, project)?;
    conn.execute(
        "INSERT OR REPLACE INTO graph_entities
             (project_id, name, entity_type, description, source_chunk_ids, source_file_paths)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            project.to_string(),
            entity.name,
            entity.entity_type,
            entity.description,
            encode_ids(&entity.source_chunk_ids),
            encode_paths(&entity.source_file_paths),
        ],
    )
    .map_err(|e| map_sqlite_err("put_entity", &e))?;
    Ok(())
}

fn entity_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Entity> {
    let source_chunk_ids: String = row.get("source_chunk_ids")?;
    let source_file_paths: String = row.get("source_file_paths")?;
    Ok(Entity {
        name: row.get("name")?,
        entity_type: row.get("entity_type")?,
        description: row.get("description")?,
        source_chunk_ids: decode_ids(&source_chunk_ids),
        source_file_paths: decode_paths(&source_file_paths),
    })
}

pub(crate) fn get_entity(
    conn: &Connection,
    project: ProjectId,
    name: &str,
) -> Result<Option<Entity>> {
    conn.query_row(
        "SELECT name, entity_type, description, source_chunk_ids, source_file_paths
         FROM graph_entities WHERE project_id = ?1 AND name = ?2",
        params![project.to_string(), name],
        entity_from_row,
    )
    .optional()
    .map_err(|e| map_sqlite_err("get_entity", &e))
}

pub(crate) fn get_entities_batch(
    conn: &Connection,
    project: ProjectId,
    names: &[String],
    batch_size: usize,
) -> Result<HashMap<String, Entity>> {
    let mut result = HashMap::new();
    let batch_size = batch_size.max(1);
    for batch in names.chunks(batch_size) {
        let placeholders = vec!["?"; batch.len()].join(", ");
        let sql = format!(
            "SELECT name, entity_type, description, source_chunk_ids, source_file_paths
             FROM graph_entities WHERE project_id = ? AND name IN ({placeholders})"
        );
        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| map_sqlite_err("get_entities_batch", &e))?;
        let mut sql_params: Vec<&dyn rusqlite::ToSql> = Vec::with_capacity(batch.len() + 1);
        let project_str = project.to_string();
        sql_params.push(&project_str);
        for name in batch {
            sql_params.push(name);
        }
        let rows = stmt
            .query_map(sql_params.as_slice(), entity_from_row)
            .map_err(|e| map_sqlite_err("get_entities_batch", &e))?;
        for row in rows {
            let entity = row.map_err(|e| map_sqlite_err("get_entities_batch", &e))?;
            result.insert(entity.name.clone(), entity);
        }
    }
    Ok(result)
}

pub(crate) fn get_entities_page(
    conn: &Connection,
    project: ProjectId,
    offset: usize,
    limit: usize,
) -> Result<Vec<Entity>> {
    let mut stmt = conn
        .prepare(
            "SELECT name, entity_type, description, source_chunk_ids, source_file_paths
             FROM graph_entities WHERE project_id = ?1
             ORDER BY name LIMIT ?2 OFFSET ?3",
        )
        .map_err(|e| map_sqlite_err("get_entities_page", &e))?;
    let rows = stmt
        .query_map(
            params![project.to_string(), limit as i64, offset as i64],
            entity_from_row,
        )
        .map_err(|e| map_sqlite_err("get_entities_page", &e))?;
    rows.collect::<rusqlite::Result<Vec<_>>>()
        .map_err(|e| map_sqlite_err("get_entities_page", &e))
}

pub(crate) fn delete_entities(
    conn: &Connection,
    project: ProjectId,
    names: &[String],
) -> Result<usize> {
    let p = project.to_string();
    let mut deleted = 0usize;
    for name in names {
        // Edges referencing a deleted vertex must not survive it.
        conn.execute(
            "DELETE FROM graph_relations
             WHERE project_id = ?1 AND (src = ?2 OR tgt = ?2)",
            params![p, name],
        )
        .map_err(|e| map_sqlite_err("delete_entities", &e))?;
        deleted += conn
            .execute(
                "DELETE FROM graph_entities WHERE project_id = ?1 AND name = ?2",
                params![p, name],
            )
            .map_err(|e| map_sqlite_err("delete_entities", &e))?;
    }
    Ok(deleted)
}

pub(crate) fn update_entity_description(
    conn: &Connection,
    project: ProjectId,
    name: &str,
    description: &str,
    source_chunk_ids: &[Uuid],
) -> Result<()> {
    let updated = conn
        .execute(
            "UPDATE graph_entities
             SET description = ?3, source_chunk_ids = ?4
             WHERE project_id = ?1 AND name = ?2",
            params![
                project.to_string(),
                name,
                description,
                encode_ids(source_chunk_ids)
            ],
        )
        .map_err(|e| map_sqlite_err("update_entity_description", &e))?;
    if updated == 0 {
        return Err(Error::StorageFatal {
            operation: "update_entity_description".to_string(),
            cause: format!("entity '{name}' not found"),
        });
    }
    Ok(())
}

/// Rebuild-time repair: replaces a relation's description and source
/// chunk list in place.
pub(crate) fn update_relation(
    conn: &Connection,
    project: ProjectId,
    key: &RelationKey,
    description: &str,
    source_chunk_ids: &[Uuid],
) -> Result<()> {
    let updated = conn
        .execute(
            "UPDATE graph_relations SET description = ?5, source_chunk_ids = ?6
             WHERE project_id = ?1 AND src = ?2 AND tgt = ?3 AND keywords = ?4",
            params![
                project.to_string(),
                key.src,
                key.tgt,
                key.keywords,
                description,
                encode_ids(source_chunk_ids)
            ],
        )
        .map_err(|e| map_sqlite_err("update_relation", &e))?;
    if updated == 0 {
        return Err(Error::StorageFatal {
            operation: "update_relation".to_string(),
            cause: format!("relation '{key}' not found"),
        });
    }
    Ok(())
}

pub(crate) fn upsert_relation(
    conn: &Connection,
    project: ProjectId,
    relation: &Relation,
    cap: usize,
    separator: &str,
) -> Result<()> {
    require_graph(conn, project)?;
    if relation.src == relation.tgt {
        return Err(Error::SelfLoopRelation {
            name: relation.src.clone(),
        });
    }
    for endpoint in [&relation.src, &relation.tgt] {
        if get_entity(conn, project, endpoint)?.is_none() {
            return Err(Error::InvalidInput(format!(
                "relation endpoint '{endpoint}' does not exist"
            )));
        }
    }

    let existing = get_relation(conn, project, &relation.key())?;
    let merged = match existing {
        Some(mut current) => {
            current.description =
                merge_description(&current.description, &relation.description, separator);
            current.weight += relation.weight;
            merge_capped(
                &mut current.source_chunk_ids,
                &relation.source_chunk_ids,
                cap,
            );
            merge_capped(
                &mut current.source_file_paths,
                &relation.source_file_paths,
                cap,
            );
            current
        }
        None => relation.clone(),
    };

    conn.execute(
        "INSERT INTO graph_relations
             (project_id, src, tgt, keywords, description, weight, source_chunk_ids, source_file_paths)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
         ON CONFLICT(project_id, src, tgt, keywords) DO UPDATE SET
             description = excluded.description,
             weight = excluded.weight,
             source_chunk_ids = excluded.source_chunk_ids,
             source_file_paths = excluded.source_file_paths",
        params![
            project.to_string(),
            merged.src,
            merged.tgt,
            merged.keywords,
            merged.description,
            merged.weight,
            encode_ids(&merged.source_chunk_ids),
            encode_paths(&merged.source_file_paths),
        ],
    )
    .map_err(|e| map_sqlite_err("upsert_relation", &e))?;
    Ok(())
}

fn relation_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Relation> {
    let source_chunk_ids: String = row.get("source_chunk_ids")?;
    let source_file_paths: String = row.get("source_file_paths")?;
    Ok(Relation {
        src: row.get("src")?,
        tgt: row.get("tgt")?,
        keywords: row.get("keywords")?,
        description: row.get("description")?,
        weight: row.get("weight")?,
        source_chunk_ids: decode_ids(&source_chunk_ids),
        source_file_paths: decode_paths(&source_file_paths),
    })
}

pub(crate) fn get_relation(
    conn: &Connection,
    project: ProjectId,
    key: &RelationKey,
) -> Result<Option<Relation>> {
    conn.query_row(
        "SELECT src, tgt, keywords, description, weight, source_chunk_ids, source_file_paths
         FROM graph_relations
         WHERE project_id = ?1 AND src = ?2 AND tgt = ?3 AND keywords = ?4",
        params![project.to_string(), key.src, key.tgt, key.keywords],
        relation_from_row,
    )
    .optional()
    .map_err(|e| map_sqlite_err("get_relation", &e))
}

pub(crate) fn get_relations_page(
    conn: &Connection,
    project: ProjectId,
    offset: usize,
    limit: usize,
) -> Result<Vec<Relation>> {
    let mut stmt = conn
        .prepare(
            "SELECT src, tgt, keywords, description, weight, source_chunk_ids, source_file_paths
             FROM graph_relations WHERE project_id = ?1
             ORDER BY src, tgt, keywords LIMIT ?2 OFFSET ?3",
        )
        .map_err(|e| map_sqlite_err("get_relations_page", &e))?;
    let rows = stmt
        .query_map(
            params![project.to_string(), limit as i64, offset as i64],
            relation_from_row,
        )
        .map_err(|e| map_sqlite_err("get_relations_page", &e))?;
    rows.collect::<rusqlite::Result<Vec<_>>>()
        .map_err(|e| map_sqlite_err("get_relations_page", &e))
}

pub(crate) fn get_relations_for_entity(
    conn: &Connection,
    project: ProjectId,
    name: &str,
) -> Result<Vec<Relation>> {
    let mut stmt = conn
        .prepare(
            "SELECT src, tgt, keywords, description, weight, source_chunk_ids, source_file_paths
             FROM graph_relations
             WHERE project_id = ?1 AND (src = ?2 OR tgt = ?2)
             ORDER BY weight DESC, src, tgt, keywords",
        )
        .map_err(|e| map_sqlite_err("get_relations_for_entity", &e))?;
    let rows = stmt
        .query_map(params![project.to_string(), name], relation_from_row)
        .map_err(|e| map_sqlite_err("get_relations_for_entity", &e))?;
    rows.collect::<rusqlite::Result<Vec<_>>>()
        .map_err(|e| map_sqlite_err("get_relations_for_entity", &e))
}

pub(crate) fn get_node_degrees_batch(
    conn: &Connection,
    project: ProjectId,
    names: &[String],
    batch_size: usize,
) -> Result<HashMap<String, usize>> {
    let mut result: HashMap<String, usize> = names.iter().map(|n| (n.clone(), 0)).collect();
    let batch_size = batch_size.max(1);
    for batch in names.chunks(batch_size) {
        let placeholders = vec!["?"; batch.len()].join(", ");
        let sql = format!(
            "SELECT endpoint, COUNT(*) FROM (
                 SELECT src AS endpoint FROM graph_relations WHERE project_id = ?
                 UNION ALL
                 SELECT tgt AS endpoint FROM graph_relations WHERE project_id = ?
             ) WHERE endpoint IN ({placeholders}) GROUP BY endpoint"
        );
        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| map_sqlite_err("get_node_degrees_batch", &e))?;
        let project_str = project.to_string();
        let mut sql_params: Vec<&dyn rusqlite::ToSql> = vec![&project_str, &project_str];
        for name in batch {
            sql_params.push(name);
        }
        let rows = stmt
            .query_map(sql_params.as_slice(), |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })
            .map_err(|e| map_sqlite_err("get_node_degrees_batch", &e))?;
        for row in rows {
            let (name, count) = row.map_err(|e| map_sqlite_err("get_node_degrees_batch", &e))?;
            result.insert(name, usize::try_from(count).unwrap_or(0));
        }
    }
    Ok(result)
}

pub(crate) fn delete_relations(
    conn: &Connection,
    project: ProjectId,
    keys: &[RelationKey],
) -> Result<usize> {
    let p = project.to_string();
    let mut deleted = 0usize;
    for key in keys {
        deleted += conn
            .execute(
                "DELETE FROM graph_relations
                 WHERE project_id = ?1 AND src = ?2 AND tgt = ?3 AND keywords = ?4",
                params![p, key.src, key.tgt, key.keywords],
            )
            .map_err(|e| map_sqlite_err("delete_relations", &e))?;
    }
    Ok(deleted)
}

pub(crate) fn get_entities_by_source_chunks(
    conn: &Connection,
    project: ProjectId,
    chunk_ids: &[Uuid],
) -> Result<BTreeSet<String>> {
    if chunk_ids.is_empty() {
        return Ok(BTreeSet::new());
    }
    let wanted: BTreeSet<String> = chunk_ids.iter().map(ToString::to_string).collect();
    let mut stmt = conn
        .prepare(
            "SELECT e.name, j.value
             FROM graph_entities e, json_each(e.source_chunk_ids) j
             WHERE e.project_id = ?1",
        )
        .map_err(|e| map_sqlite_err("get_entities_by_source_chunks", &e))?;
    let rows = stmt
        .query_map([project.to_string()], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })
        .map_err(|e| map_sqlite_err("get_entities_by_source_chunks", &e))?;
    let mut names = BTreeSet::new();
    for row in rows {
        let (name, chunk) = row.map_err(|e| map_sqlite_err("get_entities_by_source_chunks", &e))?;
        if wanted.contains(&chunk) {
            names.insert(name);
        }
    }
    Ok(names)
}

pub(crate) fn get_relations_by_source_chunks(
    conn: &Connection,
    project: ProjectId,
    chunk_ids: &[Uuid],
) -> Result<Vec<RelationKey>> {
    if chunk_ids.is_empty() {
        return Ok(Vec::new());
    }
    let wanted: BTreeSet<String> = chunk_ids.iter().map(ToString::to_string).collect();
    let mut stmt = conn
        .prepare(
            "SELECT r.src, r.tgt, r.keywords, j.value
             FROM graph_relations r, json_each(r.source_chunk_ids) j
             WHERE r.project_id = ?1",
        )
        .map_err(|e| map_sqlite_err("get_relations_by_source_chunks", &e))?;
    let rows = stmt
        .query_map([project.to_string()], |row| {
            Ok((
                RelationKey {
                    src: row.get(0)?,
                    tgt: row.get(1)?,
                    keywords: row.get(2)?,
                },
                row.get::<_, String>(3)?,
            ))
        })
        .map_err(|e| map_sqlite_err("get_relations_by_source_chunks", &e))?;
    let mut keys = Vec::new();
    let mut seen = BTreeSet::new();
    for row in rows {
        let (key, chunk) = row.map_err(|e| map_sqlite_err("get_relations_by_source_chunks", &e))?;
        if wanted.contains(&chunk) && seen.insert(key.to_string()) {
            keys.push(key);
        }
    }
    Ok(keys)
}

pub(crate) fn get_stats(conn: &Connection, project: ProjectId) -> Result<GraphStats> {
    let p = project.to_string();
    let entity_count: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM graph_entities WHERE project_id = ?1",
            [&p],
            |row| row.get(0),
        )
        .map_err(|e| map_sqlite_err("get_stats", &e))?;
    let relation_count: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM graph_relations WHERE project_id = ?1",
            [&p],
            |row| row.get(0),
        )
        .map_err(|e| map_sqlite_err("get_stats", &e))?;
    Ok(GraphStats {
        entity_count: usize::try_from(entity_count).unwrap_or(0),
        relation_count: usize::try_from(relation_count).unwrap_or(0),
    })
}
