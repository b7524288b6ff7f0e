use std::io::{self, BufRead, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use docchat_ai::chat::{ChatPipeline, ChatResponse};
use docchat_core::config::PipelineConfig;
use docchat_core::exchange_log::Feedback;
use docchat_core::memory::DEFAULT_SESSION;

mod logging;

#[derive(Parser)]
#[command(name = "docchat")]
#[command(about = "Ask questions about your own documents", long_about = None)]
#[command(version)]
struct Cli {
    /// TOML configuration file; defaults and environment variables apply without one.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Conversation id for memory.
    #[arg(short, long, default_value = DEFAULT_SESSION)]
    session: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Index every supported file in a directory")]
    Ingest { dir: PathBuf },

    #[command(about = "Index a single file")]
    IngestFile { path: PathBuf },

    #[command(about = "Ask one question")]
    Ask {
        #[arg(required = true, num_args = 1..)]
        question: Vec<String>,
    },

    #[command(about = "Interactive conversation (/clear, /status, /up, /down, /exit)")]
    Chat,

    #[command(about = "Pipeline status as JSON")]
    Status,

    #[command(about = "Collection statistics as JSON")]
    Stats,

    #[command(about = "Delete every indexed fragment")]
    ClearCollection {
        #[arg(long, help = "Confirm the deletion")]
        yes: bool,
    },

    #[command(about = "Show the most recent logged exchanges")]
    History {
        #[arg(short = 'n', long, default_value_t = 10)]
        limit: usize,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let cfg = PipelineConfig::load(cli.config.as_deref()).context("Failed to load config")?;
    logging::init(&cfg.state_directory.join("logs"));
    let pipeline = ChatPipeline::from_config(cfg).context("Failed to start pipeline")?;
    tracing::debug!(session = %cli.session, "docchat started");

    match cli.command {
        Commands::Ingest { dir } => {
            let summary = pipeline.ingest_directory(&dir)?;
            println!(
                "{} fragments from {} files",
                summary.chunks_added, summary.files_loaded
            );
            for f in &summary.failures {
                eprintln!("skipped {}: {}", f.file, f.error);
            }
        }
        Commands::IngestFile { path } => {
            let n = pipeline.ingest_file(&path)?;
            println!("{n} fragments from {}", path.display());
        }
        Commands::Ask { question } => {
            let resp = pipeline.chat(&cli.session, &question.join(" "))?;
            print_response(&resp);
        }
        Commands::Chat => repl(&pipeline, &cli.session)?,
        Commands::Status => print_json(&pipeline.status(&cli.session))?,
        Commands::Stats => print_json(&pipeline.collection_stats())?,
        Commands::ClearCollection { yes } => {
            if !yes {
                anyhow::bail!("refusing to clear the collection without --yes");
            }
            pipeline.clear_collection()?;
            println!("collection cleared");
        }
        Commands::History { limit } => print_json(&pipeline.history(limit)?)?,
    }
    Ok(())
}

fn repl(pipeline: &ChatPipeline, session: &str) -> Result<()> {
    let stats = pipeline.collection_stats();
    if stats.document_count == 0 {
        eprintln!(
            "collection '{}' is empty; run `docchat ingest <dir>` first",
            stats.collection_name
        );
    }

    let mut last: Option<ChatResponse> = None;
    let stdin = io::stdin();
    let mut out = io::stdout();
    loop {
        write!(out, "> ")?;
        out.flush()?;
        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        match line.trim() {
            "" => continue,
            "/exit" | "/quit" => break,
            "/clear" => {
                pipeline.clear_memory(session);
                println!("memory cleared");
            }
            "/status" => print_json(&pipeline.status(session))?,
            cmd @ ("/up" | "/down") => match last.as_mut() {
                Some(resp) => {
                    let rating: Feedback = cmd.trim_start_matches('/').parse()?;
                    pipeline.record_feedback(session, resp, rating)?;
                    println!("thanks for the feedback");
                }
                None => eprintln!("nothing to rate yet"),
            },
            text => match pipeline.chat(session, text) {
                Ok(resp) => {
                    print_response(&resp);
                    last = Some(resp);
                }
                Err(e) => eprintln!("error: {e}"),
            },
        }
    }
    Ok(())
}

fn print_response(resp: &ChatResponse) {
    println!("{}", resp.answer);
    if !resp.sources.is_empty() {
        println!();
        for s in &resp.sources {
            println!(
                "  - {} (fragment {}, relevance {:.2})",
                s.source, s.chunk, s.relevance
            );
        }
    }
    let marker = if resp.is_confident { "" } else { " (low confidence)" };
    println!(
        "\nconfidence {:.2}{marker}, {} docs, {:.0} ms",
        resp.confidence, resp.docs_consulted, resp.response_time_ms
    );
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
