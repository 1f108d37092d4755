use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Deserialize;
use tracing_subscriber::EnvFilter;

use indication_core::config::PipelineConfig;
use indication_core::models::Concept;
use indication_core::recovery::{MethodSet, RecoveryAnalyzer};
use indication_core::terminology::{ConceptIndex, MappingCache, TerminologyMapper};
use indication_core::Database;

#[derive(Parser, Debug)]
#[command(about = "Drug indication evidence accumulation and recovery analysis", version)]
struct Cli {
    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Load concepts from a JSON array into a concept database
    Import {
        #[arg(long, value_name = "FILE")]
        db: PathBuf,
        #[arg(long, value_name = "FILE")]
        concepts: PathBuf,
    },

    /// Map condition strings to concepts, codes and chapters
    Map {
        #[arg(long, value_name = "FILE")]
        db: PathBuf,
        #[arg(long, value_name = "FILE")]
        config: Option<PathBuf>,
        #[arg(required = true)]
        terms: Vec<String>,
    },

    /// Compare extracted condition sets against a reference set
    Recover {
        #[arg(long, value_name = "FILE")]
        db: PathBuf,
        #[arg(long, value_name = "FILE")]
        config: Option<PathBuf>,
        /// JSON: {"substance": .., "reference": [..], "methods": [{"method": .., "conditions": [..]}]}
        #[arg(long, value_name = "FILE")]
        input: PathBuf,
    },

    /// Run the full pipeline against a remote inference endpoint
    #[cfg(feature = "http")]
    Run {
        #[arg(long, value_name = "FILE")]
        config: Option<PathBuf>,
        #[arg(long, value_name = "FILE")]
        db: PathBuf,
        /// JSONL corpus, one document per line with a "substance" field
        #[arg(long, value_name = "FILE")]
        corpus: PathBuf,
        /// JSON array of substance jobs
        #[arg(long, value_name = "FILE")]
        jobs: PathBuf,
        #[arg(long = "out", value_name = "DIR")]
        out_dir: PathBuf,
        #[arg(long, value_name = "URL")]
        endpoint: String,
    },
}

#[derive(Debug, Deserialize)]
struct RecoverInput {
    #[serde(default)]
    substance: Option<String>,
    reference: Vec<String>,
    methods: Vec<MethodSet>,
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn load_config(path: Option<&Path>) -> Result<PipelineConfig> {
    match path {
        Some(path) => PipelineConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display())),
        None => Ok(PipelineConfig::default()),
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let text = fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("Failed to parse {}", path.display()))
}

fn open_index(db: &Path) -> Result<(Database, ConceptIndex)> {
    let database = Database::open(db).with_context(|| format!("Failed to open {}", db.display()))?;
    let index = ConceptIndex::load(&database).context("Failed to load concepts")?;
    if index.is_empty() {
        tracing::warn!(db = %db.display(), "Concept database is empty; every term will be unmapped");
    }
    Ok((database, index))
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json);

    match cli.command {
        Command::Import { db, concepts } => {
            let concepts: Vec<Concept> = read_json(&concepts)?;
            let database = Database::open(&db).with_context(|| format!("Failed to open {}", db.display()))?;
            database.upsert_concepts(&concepts).context("Failed to import concepts")?;
            println!("Imported {} concepts ({} total)", concepts.len(), database.concept_count()?);
        }

        Command::Map { db, config, terms } => {
            let config = load_config(config.as_deref())?;
            let (database, index) = open_index(&db)?;
            let cache = MappingCache::load(&database).context("Failed to load mapping cache")?;
            let mapper = TerminologyMapper::with_config(&index, config.mapper).with_cache(&cache);
            let mappings = mapper.map_all(&terms[..]);
            cache.persist(&database).context("Failed to persist mapping cache")?;
            println!("{}", serde_json::to_string_pretty(&mappings)?);
        }

        Command::Recover { db, config, input } => {
            let config = load_config(config.as_deref())?;
            let input: RecoverInput = read_json(&input)?;
            let (_database, index) = open_index(&db)?;
            let mapper = TerminologyMapper::with_config(&index, config.mapper);
            let analyzer = RecoveryAnalyzer::new(mapper, config.recovery);
            let report = analyzer.analyze(input.substance.as_deref(), &input.reference, &input.methods);
            println!("{}", serde_json::to_string_pretty(&report)?);
        }

        #[cfg(feature = "http")]
        Command::Run {
            config,
            db,
            corpus,
            jobs,
            out_dir,
            endpoint,
        } => run(config.as_deref(), &db, &corpus, &jobs, &out_dir, endpoint)?,
    }

    Ok(())
}

#[cfg(feature = "http")]
fn run(config: Option<&Path>, db: &Path, corpus: &Path, jobs: &Path, out_dir: &Path, endpoint: String) -> Result<()> {
    use std::sync::Arc;

    use indication_core::accumulator::VecDocumentSource;
    use indication_core::export::recovery_csv;
    use indication_core::pipeline::{Pipeline, SubstanceJob};
    use indication_llm::{HttpInference, HttpInferenceConfig};

    let config = load_config(config)?;
    let jobs: Vec<SubstanceJob> = read_json(jobs)?;
    let source = VecDocumentSource::load_jsonl(corpus)
        .with_context(|| format!("Failed to load corpus {}", corpus.display()))?;
    let (database, index) = open_index(db)?;
    let cache = MappingCache::load(&database).context("Failed to load mapping cache")?;
    let service = HttpInference::new(HttpInferenceConfig {
        endpoint,
        ..HttpInferenceConfig::default()
    })?;

    let runtime = tokio::runtime::Runtime::new().context("Failed to start runtime")?;
    let output = runtime.block_on(async {
        let pipeline = Pipeline::with_cache(config, service, source, Arc::new(index), Arc::new(cache))?;
        let cancel = pipeline.cancellation_token();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("Interrupted; finishing with partial results");
                cancel.cancel();
            }
        });
        let output = pipeline.run(jobs).await;
        output.persist(&database, pipeline.cache())?;
        Ok::<_, anyhow::Error>(output)
    })?;

    fs::create_dir_all(out_dir).with_context(|| format!("Failed to create {}", out_dir.display()))?;
    for (i, report) in output.reports.iter().enumerate() {
        let path = out_dir.join(format!("{:04}-{}.json", i + 1, file_stem(&report.substance)));
        fs::write(&path, report.to_json()?).with_context(|| format!("Failed to write {}", path.display()))?;
    }
    fs::write(out_dir.join("recovery.csv"), recovery_csv(&output.reports))?;
    fs::write(out_dir.join("summary.json"), output.summary.to_json()?)?;

    println!(
        "Run {}: {} substances, {} confirmed conditions, {} failed substances. Reports in {}",
        output.run_id,
        output.summary.substances,
        output.summary.confirmed,
        output.summary.failed_substances.len(),
        out_dir.display()
    );
    Ok(())
}

#[cfg(feature = "http")]
fn file_stem(substance: &str) -> String {
    let stem: String = substance
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '_' })
        .collect();
    if stem.is_empty() {
        "blank".to_string()
    } else {
        stem
    }
}
