//! CLI command implementations.
//!
//! The CLI is a thin operational surface over the library API: project
//! lifecycle, document submission, scheduler runs, queries, deletion,
//! merge, export, and stats. No HTTP server lives here.

// CLI output goes to stdout by design.
#![allow(clippy::print_stdout)]

use crate::config::GraphLoomConfig;
use crate::models::{DocumentType, ProjectId, QueryMode};
use crate::services::{Engine, ExportFormat, MergeStrategy, TargetOverrides};
use crate::{Error, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Multi-tenant GraphRAG engine.
#[derive(Debug, Parser)]
#[command(name = "graphloom", version, about)]
pub struct Cli {
    /// Path to a TOML configuration file.
    #[arg(long, global = true, env = "GRAPHLOOM_CONFIG")]
    pub config: Option<PathBuf>,

    /// Subcommand to run.
    #[command(subcommand)]
    pub command: Command,
}

/// Top-level subcommands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Project lifecycle.
    Project {
        /// Project action.
        #[command(subcommand)]
        action: ProjectAction,
    },
    /// Submit files for ingestion.
    Ingest {
        /// Target project id.
        project: String,
        /// Files to submit.
        #[arg(required = true)]
        paths: Vec<PathBuf>,
        /// Declared document type (detected when omitted).
        #[arg(long)]
        doc_type: Option<String>,
    },
    /// Run ingestion passes.
    Process {
        /// Keep running on the configured schedule until interrupted.
        #[arg(long)]
        watch: bool,
    },
    /// Ask a question against a project.
    Query {
        /// Target project id.
        project: String,
        /// The question.
        question: String,
        /// Retrieval mode: LOCAL, GLOBAL, HYBRID, MIX, NAIVE.
        #[arg(long, default_value = "hybrid")]
        mode: QueryMode,
        /// Force reranking on or off for this query.
        #[arg(long)]
        rerank: Option<bool>,
    },
    /// Delete a document, rebuilding shared knowledge from cache.
    DeleteDoc {
        /// Target project id.
        project: String,
        /// Document id.
        document: String,
        /// Delete affected entities outright instead of rebuilding.
        #[arg(long)]
        skip_rebuild: bool,
    },
    /// Merge entities into a target.
    Merge {
        /// Target project id.
        project: String,
        /// Source entity names.
        #[arg(long = "source", required = true)]
        sources: Vec<String>,
        /// Target entity name.
        #[arg(long)]
        target: String,
        /// Merge strategy: CONCATENATE or LLM_SUMMARIZE.
        #[arg(long, default_value = "concatenate")]
        strategy: String,
        /// Override the target's entity type.
        #[arg(long)]
        entity_type: Option<String>,
    },
    /// Export a project's graph.
    Export {
        /// Target project id.
        project: String,
        /// Output format: json or csv.
        #[arg(long, default_value = "json")]
        format: String,
        /// Output path (stdout when omitted).
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Show per-project counters.
    Stats {
        /// Target project id.
        project: String,
    },
    /// Show a document's processing status.
    Status {
        /// Target project id.
        project: String,
        /// Document id.
        document: String,
    },
}

/// Project lifecycle actions.
#[derive(Debug, Subcommand)]
pub enum ProjectAction {
    /// Create a new project and print its id.
    Create,
    /// Drop a project and everything it owns.
    Drop {
        /// Project id.
        project: String,
    },
}

/// Runs the parsed CLI command.
///
/// # Errors
///
/// Propagates engine errors; the binary maps them to exit codes.
pub fn run(cli: Cli) -> Result<()> {
    let config = GraphLoomConfig::load(cli.config.as_deref())?;
    let engine = Engine::open(config)?;

    match cli.command {
        Command::Project { action } => run_project(&engine, action),
        Command::Ingest {
            project,
            paths,
            doc_type,
        } => run_ingest(&engine, &project, &paths, doc_type.as_deref()),
        Command::Process { watch } => run_process(&engine, watch),
        Command::Query {
            project,
            question,
            mode,
            rerank,
        } => run_query(&engine, &project, &question, mode, rerank),
        Command::DeleteDoc {
            project,
            document,
            skip_rebuild,
        } => run_delete(&engine, &project, &document, skip_rebuild),
        Command::Merge {
            project,
            sources,
            target,
            strategy,
            entity_type,
        } => run_merge(&engine, &project, sources, &target, &strategy, entity_type),
        Command::Export {
            project,
            format,
            output,
        } => run_export(&engine, &project, &format, output),
        Command::Stats { project } => run_stats(&engine, &project),
        Command::Status { project, document } => run_status(&engine, &project, &document),
    }
}

fn parse_uuid(s: &str) -> Result<uuid::Uuid> {
    uuid::Uuid::parse_str(s).map_err(|e| Error::InvalidInput(format!("invalid id '{s}': {e}")))
}

fn run_project(engine: &Engine, action: ProjectAction) -> Result<()> {
    match action {
        ProjectAction::Create => {
            let project = engine.create_project()?;
            println!("{project}");
        }
        ProjectAction::Drop { project } => {
            let project = ProjectId::parse(&project)?;
            engine.drop_project(project)?;
            println!("dropped {project}");
        }
    }
    Ok(())
}

fn run_ingest(
    engine: &Engine,
    project: &str,
    paths: &[PathBuf],
    doc_type: Option<&str>,
) -> Result<()> {
    let project = ProjectId::parse(project)?;
    let declared = match doc_type {
        Some(raw) => Some(
            DocumentType::parse(raw)
                .ok_or_else(|| Error::InvalidInput(format!("unknown document type '{raw}'")))?,
        ),
        None => None,
    };

    for path in paths {
        let bytes = std::fs::read(path).map_err(|e| {
            Error::InvalidInput(format!("cannot read {}: {e}", path.display()))
        })?;
        let file_name = path
            .file_name()
            .map_or_else(|| path.display().to_string(), |n| n.to_string_lossy().into_owned());
        match engine.submit_document(project, &file_name, &bytes, declared, serde_json::Value::Null)
        {
            Ok(id) => println!("{file_name}: submitted as {id}"),
            Err(err) => println!("{file_name}: rejected ({}: {err})", err.kind()),
        }
    }
    Ok(())
}

fn run_process(engine: &Engine, watch: bool) -> Result<()> {
    if watch {
        use std::sync::atomic::Ordering;
        let handle = engine.start_scheduler();
        let flag = handle.shutdown_flag();
        let handler_flag = std::sync::Arc::clone(&flag);
        ctrlc::set_handler(move || {
            handler_flag.store(true, Ordering::SeqCst);
        })
        .map_err(|e| Error::InvalidInput(format!("cannot install signal handler: {e}")))?;
        println!("scheduler running; press ctrl-c to stop");
        while !flag.load(Ordering::SeqCst) {
            std::thread::sleep(std::time::Duration::from_millis(200));
        }
        handle.stop();
        return Ok(());
    }

    let report = engine.process_pending()?;
    println!(
        "processed={} failed={} recovered={}",
        report.processed, report.failed, report.recovered
    );
    Ok(())
}

fn run_query(
    engine: &Engine,
    project: &str,
    question: &str,
    mode: QueryMode,
    rerank: Option<bool>,
) -> Result<()> {
    let project = ProjectId::parse(project)?;
    let (response, usage) = engine.query(Some(project), question, mode, rerank)?;

    if response.cancelled {
        println!("(cancelled before synthesis; partial context follows)");
    } else if let Some(answer) = &response.answer {
        println!("{answer}");
    }
    println!();
    for (i, source) in response.sources.iter().enumerate() {
        let preview: String = source.content.chars().take(120).collect();
        println!("[{}] ({}) {}", i + 1, source.source_label, preview);
    }
    println!();
    println!(
        "tokens: in={} out={} calls={}",
        usage.input_tokens, usage.output_tokens, usage.calls
    );
    Ok(())
}

fn run_delete(engine: &Engine, project: &str, document: &str, skip_rebuild: bool) -> Result<()> {
    let project = ProjectId::parse(project)?;
    let document = parse_uuid(document)?;
    let (report, _usage) = engine.delete_document(project, document, skip_rebuild)?;
    println!(
        "entities: deleted={} rebuilt={}; relations: deleted={} rebuilt={}; chunks deleted={}",
        report.entities_deleted.len(),
        report.entities_rebuilt.len(),
        report.relations_deleted,
        report.relations_rebuilt,
        report.chunks_deleted
    );
    for error in &report.errors {
        println!("warning: {error}");
    }
    Ok(())
}

fn run_merge(
    engine: &Engine,
    project: &str,
    sources: Vec<String>,
    target: &str,
    strategy: &str,
    entity_type: Option<String>,
) -> Result<()> {
    let project = ProjectId::parse(project)?;
    let strategy = MergeStrategy::parse(strategy)
        .ok_or_else(|| Error::InvalidInput(format!("unknown merge strategy '{strategy}'")))?;
    let overrides = TargetOverrides {
        entity_type,
        description_seed: None,
    };
    let (report, _usage) = engine.merge_entities(project, &sources, target, strategy, &overrides)?;
    println!(
        "merged into '{}': redirected={} deduped={} self_loops_dropped={} sources_deleted={}",
        report.target,
        report.relations_redirected,
        report.relations_deduped,
        report.self_loops_dropped,
        report.source_entities_deleted
    );
    Ok(())
}

fn run_export(
    engine: &Engine,
    project: &str,
    format: &str,
    output: Option<PathBuf>,
) -> Result<()> {
    let project = ProjectId::parse(project)?;
    let format = ExportFormat::parse(format)
        .ok_or_else(|| Error::InvalidInput(format!("unknown export format '{format}'")))?;

    let stats = match output {
        Some(path) => {
            let mut file = std::fs::File::create(&path).map_err(|e| {
                Error::InvalidInput(format!("cannot create {}: {e}", path.display()))
            })?;
            engine.export(project, format, &mut file)?
        }
        None => {
            let stdout = std::io::stdout();
            let mut lock = stdout.lock();
            let stats = engine.export(project, format, &mut lock)?;
            use std::io::Write;
            let _ = writeln!(lock);
            stats
        }
    };
    tracing::info!(
        entities = stats.entities,
        relations = stats.relations,
        "export complete"
    );
    Ok(())
}

fn run_stats(engine: &Engine, project: &str) -> Result<()> {
    let project = ProjectId::parse(project)?;
    let stats = engine.stats(project)?;
    println!(
        "documents: pending={} processing={} processed={} chunks={}",
        stats.documents.not_processed,
        stats.documents.processing,
        stats.documents.processed,
        stats.documents.chunks
    );
    println!(
        "graph: entities={} relations={}; cache entries={}",
        stats.graph.entity_count, stats.graph.relation_count, stats.cache_entries
    );
    Ok(())
}

fn run_status(engine: &Engine, project: &str, document: &str) -> Result<()> {
    use crate::storage::DocumentStore;
    use chrono::{TimeZone, Utc};

    let project = ProjectId::parse(project)?;
    let document = parse_uuid(document)?;
    match engine.store().get_document(project, document)? {
        Some(doc) => {
            let updated = Utc
                .timestamp_opt(doc.updated_at, 0)
                .single()
                .map_or_else(|| doc.updated_at.to_string(), |t| t.to_rfc3339());
            println!(
                "{} ({}; attempts={}; updated {updated})",
                doc.status, doc.file_name, doc.attempts
            );
        }
        None => println!("not found"),
    }
    Ok(())
}
