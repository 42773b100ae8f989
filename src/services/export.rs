//! Batched graph export.
//!
//! Streams a project's entities and relations in pages so large graphs
//! never materialize in memory at once. JSON and CSV renderings are
//! supported; the content type travels with the format.

use crate::models::ProjectId;
use crate::storage::{GraphStore, SqliteStore};
use crate::{Error, Result};
use serde::Serialize;
use std::io::Write;
use std::sync::Arc;

/// Export rendering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    /// One JSON object with `entities` and `relations` arrays.
    Json,
    /// Flat CSV with a `record_type` discriminator column.
    Csv,
}

impl ExportFormat {
    /// Parses a format name.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Some(Self::Json),
            "csv" => Some(Self::Csv),
            _ => None,
        }
    }

    /// MIME type for the rendering.
    #[must_use]
    pub const fn content_type(&self) -> &'static str {
        match self {
            Self::Json => "application/json",
            Self::Csv => "text/csv",
        }
    }
}

/// Counts written by an export.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct ExportStats {
    /// Entities written.
    pub entities: usize,
    /// Relations written.
    pub relations: usize,
}

/// Export service.
pub struct ExportService {
    store: Arc<SqliteStore>,
    page_size: usize,
}

impl ExportService {
    /// Creates the service; `page_size` bounds each storage read.
    #[must_use]
    pub fn new(store: Arc<SqliteStore>, page_size: usize) -> Self {
        Self {
            store,
            page_size: page_size.max(1),
        }
    }

    /// Streams the project's graph to `writer`.
    ///
    /// # Errors
    ///
    /// Returns an error on storage or I/O failure.
    pub fn export(
        &self,
        project: ProjectId,
        format: ExportFormat,
        writer: &mut dyn Write,
    ) -> Result<ExportStats> {
        match format {
            ExportFormat::Json => self.export_json(project, writer),
            ExportFormat::Csv => self.export_csv(project, writer),
        }
    }

    fn export_json(&self, project: ProjectId, writer: &mut dyn Write) -> Result<ExportStats> {
        let mut stats = ExportStats::default();
        let io_err = |e: std::io::Error| Error::StorageFatal {
            operation: "export_json".to_string(),
            cause: e.to_string(),
        };
        let ser_err = |e: serde_json::Error| Error::StorageFatal {
            operation: "export_json".to_string(),
            cause: e.to_string(),
        };

        writer.write_all(b"{\"entities\":[").map_err(io_err)?;
        let mut offset = 0;
        loop {
            let page = self.store.get_entities_page(project, offset, self.page_size)?;
            if page.is_empty() {
                break;
            }
            for entity in &page {
                if stats.entities > 0 {
                    writer.write_all(b",").map_err(io_err)?;
                }
                let rendered = serde_json::to_vec(entity).map_err(ser_err)?;
                writer.write_all(&rendered).map_err(io_err)?;
                stats.entities += 1;
            }
            offset += page.len();
        }

        writer.write_all(b"],\"relations\":[").map_err(io_err)?;
        let mut offset = 0;
        loop {
            let page = self
                .store
                .get_relations_page(project, offset, self.page_size)?;
            if page.is_empty() {
                break;
            }
            for relation in &page {
                if stats.relations > 0 {
                    writer.write_all(b",").map_err(io_err)?;
                }
                let rendered = serde_json::to_vec(relation).map_err(ser_err)?;
                writer.write_all(&rendered).map_err(io_err)?;
                stats.relations += 1;
            }
            offset += page.len();
        }
        writer.write_all(b"]}").map_err(io_err)?;
        Ok(stats)
    }

    fn export_csv(&self, project: ProjectId, writer: &mut dyn Write) -> Result<ExportStats> {
        let mut stats = ExportStats::default();
        let mut csv = csv::Writer::from_writer(writer);
        let csv_err = |e: csv::Error| Error::StorageFatal {
            operation: "export_csv".to_string(),
            cause: e.to_string(),
        };

        csv.write_record([
            "record_type",
            "name_or_src",
            "type_or_tgt",
            "keywords",
            "description",
            "weight",
            "source_chunk_ids",
            "source_file_paths",
        ])
        .map_err(csv_err)?;

        let mut offset = 0;
        loop {
            let page = self.store.get_entities_page(project, offset, self.page_size)?;
            if page.is_empty() {
                break;
            }
            for entity in &page {
                let chunk_ids: Vec<String> =
                    entity.source_chunk_ids.iter().map(ToString::to_string).collect();
                csv.write_record([
                    "entity",
                    &entity.name,
                    &entity.entity_type,
                    "",
                    &entity.description,
                    "",
                    &chunk_ids.join(";"),
                    &entity.source_file_paths.join(";"),
                ])
                .map_err(csv_err)?;
                stats.entities += 1;
            }
            offset += page.len();
        }

        let mut offset = 0;
        loop {
            let page = self
                .store
                .get_relations_page(project, offset, self.page_size)?;
            if page.is_empty() {
                break;
            }
            for relation in &page {
                let chunk_ids: Vec<String> =
                    relation.source_chunk_ids.iter().map(ToString::to_string).collect();
                csv.write_record([
                    "relation",
                    &relation.src,
                    &relation.tgt,
                    &relation.keywords,
                    &relation.description,
                    &relation.weight.to_string(),
                    &chunk_ids.join(";"),
                    &relation.source_file_paths.join(";"),
                ])
                .map_err(csv_err)?;
                stats.relations += 1;
            }
            offset += page.len();
        }

        csv.flush().map_err(|e| Error::StorageFatal {
            operation: "export_csv".to_string(),
            cause: e.to_string(),
        })?;
        Ok(stats)
    }
}
