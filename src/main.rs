use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use hybridocs::config::load_config;
use hybridocs::engine::Engine;
use hybridocs::keyword_store::Filters;
use hybridocs::query_expand::expand_query;
use hybridocs::server::run_stdio_server;
use indicatif::{ProgressBar, ProgressStyle};
use serde_json::json;
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "hybridocs")]
#[command(version)]
#[command(about = "Hybrid keyword + semantic retrieval engine for versioned technical documentation")]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Index one or more paths
    Index {
        paths: Vec<PathBuf>,
        /// Reindex even if content is unchanged
        #[arg(long)]
        force: bool,
    },
    /// Run a hybrid search
    Search {
        query: String,
        #[arg(long, default_value_t = 10)]
        top_k: usize,
        #[arg(long)]
        tech: Option<String>,
        #[arg(long)]
        component: Option<String>,
        #[arg(long)]
        version: Option<String>,
        #[arg(long)]
        file_type: Option<String>,
        #[arg(long)]
        json: bool,
    },
    /// Fetch a single chunk by id
    Retrieve { chunk_id: String },
    /// Print cache and keyword-store counts
    Stats,
    /// List every indexed source path
    Sources,
    /// Remove indexed chunks
    Clear {
        #[arg(long)]
        tech: Option<String>,
        #[arg(long)]
        all: bool,
    },
    /// Start the MCP stdio server
    Mcp,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let repo_root = std::env::current_dir().context("Failed to get current dir")?;
    let config = load_config(&repo_root);
    let engine = Engine::open(repo_root, config).await.context("Failed to open engine")?;

    match cli.cmd {
        Command::Index { paths, force } => {
            let spinner = ProgressBar::new_spinner();
            spinner.set_style(
                ProgressStyle::with_template("{spinner} indexing...")
                    .unwrap()
                    .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
            );
            spinner.enable_steady_tick(std::time::Duration::from_millis(80));

            let stats = engine.index_paths(&paths, force).await?;
            spinner.finish_with_message(format!(
                "processed {} files ({} updated, {} errors)",
                stats.files_processed, stats.files_updated, stats.errors
            ));
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        Command::Search {
            query,
            top_k,
            tech,
            component,
            version,
            file_type,
            json: as_json,
        } => {
            let expanded = expand_query(&query);
            let filters = Filters {
                tech,
                component,
                version,
                file_type,
            };
            let results = engine.search(&expanded, top_k, filters).await;

            if as_json {
                let rows: Vec<_> = results
                    .iter()
                    .map(|r| {
                        json!({
                            "chunk_id": r.chunk_id,
                            "source_path": r.source_path,
                            "tech": r.tech,
                            "component": r.component,
                            "topic": r.topic,
                            "final_score": r.final_score,
                        })
                    })
                    .collect();
                println!("{}", serde_json::to_string_pretty(&rows)?);
            } else {
                for r in &results {
                    println!("{:.3}  {}  [{}/{}]  {}", r.final_score, r.source_path, r.tech, r.component, r.topic);
                }
            }
        }
        Command::Retrieve { chunk_id } => match engine.retrieve(&chunk_id).await {
            Some(chunk) => println!("{}", serde_json::to_string_pretty(&chunk)?),
            None => println!("null"),
        },
        Command::Stats => {
            let (cache_size, keyword_count) = engine.get_stats().await;
            println!("{}", json!({ "cache_size": cache_size, "keyword_store_count": keyword_count }));
        }
        Command::Sources => {
            for s in engine.list_sources().await {
                println!("{s}");
            }
        }
        Command::Clear { tech, all } => {
            if all {
                engine.clear_all().await?;
                println!("cleared everything");
            } else if let Some(tech) = tech {
                let removed = engine.clear_tech(&tech).await?;
                println!("removed {removed} chunks for tech={tech}");
            } else {
                anyhow::bail!("clear requires either --tech <TECH> or --all");
            }
        }
        Command::Mcp => {
            run_stdio_server(engine).await?;
        }
    }

    Ok(())
}
