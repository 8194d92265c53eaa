use std::{
    fs,
    path::{Path, PathBuf},
    sync::Arc,
    time::Instant,
};

use anyhow::{Context, Result, bail};
use clap::Parser;
use rustydocs::{
    config::{self, IndexBackend},
    document::{SourceDocument, Statistics, WorkItem},
    logging,
    pipeline::{PipelineOrchestrator, Submission},
    qdrant::QdrantIndexer,
};
use serde::Serialize;
use walkdir::WalkDir;

#[derive(Parser)]
#[command(
    name = "batch-ingest",
    about = "Process every file under a directory as one batch and print a JSON summary"
)]
struct Cli {
    /// Directory to scan.
    directory: PathBuf,
    /// Maximum directory depth to descend into.
    #[arg(long)]
    max_depth: Option<usize>,
    /// Write the summary here instead of stdout.
    #[arg(long)]
    output: Option<PathBuf>,
    /// Include per-document results in the summary.
    #[arg(long)]
    details: bool,
}

#[derive(Serialize)]
struct Summary {
    directory: String,
    total: usize,
    completed: usize,
    failed: usize,
    total_entities: usize,
    average_processing_time: f64,
    elapsed_seconds: f64,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    documents: Vec<DocumentOutcome>,
}

#[derive(Serialize)]
struct DocumentOutcome {
    path: String,
    id: String,
    status: String,
    entity_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    logging::init_tracing();
    let config = config::init_config().context("Failed to load configuration")?;

    if !cli.directory.is_dir() {
        bail!("{} is not a directory", cli.directory.display());
    }
    let paths = collect_files(&cli.directory, cli.max_depth)?;
    if paths.is_empty() {
        bail!("no files found under {}", cli.directory.display());
    }

    let submissions = paths
        .iter()
        .map(|path| load_submission(path))
        .collect::<Result<Vec<_>>>()?;

    let mut builder = PipelineOrchestrator::builder(config.clone());
    if config.index_backend == IndexBackend::Qdrant {
        let indexer =
            QdrantIndexer::from_config(&config).context("Failed to configure Qdrant indexer")?;
        builder = builder.indexer(Arc::new(indexer));
    }
    let orchestrator = builder.build();

    let started = Instant::now();
    let items = orchestrator.process_batch(submissions).await;
    let summary = summarize(&cli, &paths, &items, started.elapsed().as_secs_f64());

    let rendered = serde_json::to_string_pretty(&summary)?;
    match &cli.output {
        Some(path) => fs::write(path, format!("{rendered}\n"))
            .with_context(|| format!("writing {}", path.display()))?,
        None => println!("{rendered}"),
    }
    Ok(())
}

fn collect_files(root: &Path, max_depth: Option<usize>) -> Result<Vec<PathBuf>> {
    let mut walker = WalkDir::new(root).sort_by_file_name();
    if let Some(depth) = max_depth {
        walker = walker.max_depth(depth);
    }
    let mut files = Vec::new();
    for entry in walker {
        let entry = entry.with_context(|| format!("walking {}", root.display()))?;
        if entry.file_type().is_file() {
            files.push(entry.into_path());
        }
    }
    Ok(files)
}

fn load_submission(path: &Path) -> Result<Submission> {
    let content = fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let filename = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    Ok(Submission::new(SourceDocument::new(filename, content)))
}

fn summarize(cli: &Cli, paths: &[PathBuf], items: &[WorkItem], elapsed_seconds: f64) -> Summary {
    let statistics = Statistics::from_items(items);
    let documents = if cli.details {
        paths
            .iter()
            .zip(items)
            .map(|(path, item)| DocumentOutcome {
                path: path.display().to_string(),
                id: item.id.clone(),
                status: item.status.to_string(),
                entity_count: item.entity_count,
                error: item.error_message.clone(),
            })
            .collect()
    } else {
        Vec::new()
    };
    Summary {
        directory: cli.directory.display().to_string(),
        total: statistics.total,
        completed: statistics.completed,
        failed: statistics.failed,
        total_entities: statistics.total_entities,
        average_processing_time: statistics.average_processing_time,
        elapsed_seconds,
        documents,
    }
}
