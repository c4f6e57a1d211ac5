mod analyzer;
mod config;
mod document;
mod heuristics;
mod llm_extract;
mod ocr;
mod pdf_extract;
mod server;
mod sink;

use std::error::Error;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::io::AsyncReadExt;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use analyzer::DocumentAnalyzer;
use config::Config;
use document::LogisticsDocumentResult;
use ocr::TesseractOcr;
use sink::{DocumentSink, Persistence, RecordStore, SheetsSink};

#[derive(Parser)]
#[command(name = "logx", version, about = "Extract structured fields from logistics documents")]
struct Cli {
    /// Path to the TOML config file
    #[arg(long, global = true, env = "LOGX_CONFIG", default_value = "logistics.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Analyze a PDF, image or text file and print the record
    Analyze {
        path: PathBuf,
        /// Name recorded with the row (defaults to the file's own name)
        #[arg(long)]
        file_name: Option<String>,
        /// Do not append the record to any sink
        #[arg(long)]
        no_persist: bool,
    },
    /// Analyze raw document text from a file, or stdin when omitted or `-`
    Text { input: Option<PathBuf> },
    /// Recover and coerce raw model output without calling a model
    Recover { input: Option<PathBuf> },
    /// Run the HTTP API
    Serve {
        #[arg(long)]
        host: Option<String>,
        #[arg(long)]
        port: Option<u16>,
    },
    /// Print recently stored records as JSON lines
    History {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Show the resolved backend, its availability and the enabled sinks
    Check,
    /// Edit the config file
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Set a dotted key, e.g. `llm.backend ollama`
    Set { key: String, value: String },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    // stdout carries the records; logs go to stderr
    tracing_subscriber::fmt()
        .with_target(true)
        .with_level(true)
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // Err only when a provider is already installed
    let _ = rustls::crypto::ring::default_provider().install_default();

    if let Err(e) = dotenvy::dotenv() {
        debug!(error = %e, "No .env file loaded");
    }

    let cli = Cli::parse();
    match cli.command {
        Command::Config {
            action: ConfigAction::Set { key, value },
        } => {
            Config::set_value(&cli.config, &key, &value)?;
            Ok(())
        }
        Command::Recover { input } => {
            let raw = read_input(input.as_deref()).await?;
            print_record(&LogisticsDocumentResult::from_model_output(&raw))
        }
        command => {
            let cfg = Config::load_or_default(&cli.config)?;
            run(command, cfg).await
        }
    }
}

async fn run(command: Command, mut cfg: Config) -> Result<(), Box<dyn Error>> {
    match command {
        Command::Analyze {
            path,
            file_name,
            no_persist,
        } => {
            let analyzer = build_analyzer(&cfg, !no_persist).await?;
            let record = analyzer.analyze_file(&path, file_name.as_deref()).await?;
            print_record(&record)?;
            analyzer.persistence().drain().await;
        }
        Command::Text { input } => {
            let analyzer = build_analyzer(&cfg, true).await?;
            let text = read_input(input.as_deref()).await?;
            let file_name = input
                .as_deref()
                .filter(|p| *p != Path::new("-"))
                .and_then(Path::file_name)
                .map(|n| n.to_string_lossy().into_owned());
            let record = analyzer.analyze_text(&text, file_name.as_deref()).await;
            print_record(&record)?;
            analyzer.persistence().drain().await;
        }
        Command::Serve { host, port } => {
            if let Some(host) = host {
                cfg.server.host = host;
            }
            if let Some(port) = port {
                cfg.server.port = port;
            }
            let analyzer = build_analyzer(&cfg, true).await?;
            if !analyzer.generator().is_available().await {
                warn!(
                    generator = %analyzer.generator().describe(),
                    "Generator not reachable, requests will return empty records"
                );
            }
            server::serve(Arc::new(analyzer), &cfg.server).await?;
        }
        Command::History { limit } => {
            let store = RecordStore::open(&cfg.store.db_path)?;
            for record in store.recent(limit)? {
                println!("{}", serde_json::to_string(&record)?);
            }
        }
        Command::Check => {
            let analyzer = build_analyzer(&cfg, true).await?;
            let generator = analyzer.generator();
            println!("generator: {}", generator.describe());
            println!("available: {}", generator.is_available().await);
            println!("ocr: {}", if cfg.ocr.enabled { "tesseract" } else { "disabled" });
            println!("sinks: {}", analyzer.persistence().sink_names().join(", "));
            if cfg.store.enabled {
                let stored = RecordStore::open(&cfg.store.db_path)?.count()?;
                println!("stored records: {stored}");
            }
        }
        Command::Recover { .. } | Command::Config { .. } => {}
    }
    Ok(())
}

async fn build_analyzer(cfg: &Config, persist: bool) -> Result<DocumentAnalyzer, Box<dyn Error>> {
    let generator = llm_extract::build_generator(&cfg.llm)?;
    info!(generator = %generator.describe(), "Text generator ready");

    let persistence = if persist {
        build_persistence(cfg).await
    } else {
        Persistence::default()
    };
    Ok(DocumentAnalyzer::new(
        generator,
        TesseractOcr::from_config(&cfg.ocr),
        persistence,
    ))
}

/// Sinks that fail to start are logged and left out.
async fn build_persistence(cfg: &Config) -> Persistence {
    let mut sinks: Vec<Arc<dyn DocumentSink>> = Vec::new();

    if cfg.store.enabled {
        match RecordStore::open(&cfg.store.db_path) {
            Ok(store) => sinks.push(Arc::new(store)),
            Err(e) => error!(path = %cfg.store.db_path, error = %e, "Record store disabled"),
        }
    }

    match SheetsSink::from_config(&cfg.sheets).await {
        Ok(Some(sheets)) => sinks.push(Arc::new(sheets)),
        Ok(None) => debug!("Google Sheets not configured"),
        Err(e) => error!(error = %e, "Google Sheets sink disabled"),
    }

    Persistence::new(sinks)
}

/// File contents, or stdin for `None` and `-`.
async fn read_input(input: Option<&Path>) -> std::io::Result<String> {
    match input {
        Some(path) if path != Path::new("-") => tokio::fs::read_to_string(path).await,
        _ => {
            let mut text = String::new();
            tokio::io::stdin().read_to_string(&mut text).await?;
            Ok(text)
        }
    }
}

fn print_record(record: &LogisticsDocumentResult) -> Result<(), Box<dyn Error>> {
    println!("{}", serde_json::to_string_pretty(record)?);
    Ok(())
}
