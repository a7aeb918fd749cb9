#![forbid(unsafe_code)]
#![deny(
    warnings,
    dead_code,
    unused,
    unused_imports,
    unused_must_use,
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    clippy::cargo,
    clippy::nursery,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls,
    missing_docs
)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::multiple_crate_versions)]

//! Binary entrypoint: wires the catalog, torrent driver, and seed manager
//! together, and exposes the operational tool surface (search, extraction,
//! and the bulk import commands).

mod bootstrap;
mod commands;
mod ingest;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "shardex", about = "Mirrored-shard catalog, extractor, and seeder")]
struct Cli {
    /// Configuration file (YAML); defaults apply when omitted.
    #[arg(long, global = true, env = "SHARDEX_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the seed manager until interrupted.
    Run,
    /// Search the catalog and print matching records.
    Search {
        /// Full-text query.
        query: String,
        /// Restrict to a language code.
        #[arg(long)]
        language: Option<String>,
        /// Restrict to a publication year.
        #[arg(long)]
        year: Option<String>,
        /// Maximum number of results.
        #[arg(long, default_value_t = 10)]
        limit: i64,
    },
    /// Extract one file out of its archive shard by md5.
    Extract {
        /// MD5 of the catalog record.
        md5: String,
        /// Output path; defaults to `<md5>.<extension>`.
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Bulk-ingest catalog records from NDJSON on stdin.
    ImportFiles {
        /// Mark ingested records as journal articles.
        #[arg(long)]
        journals: bool,
    },
    /// Import the upstream torrent list (from a file, or fetched).
    ImportTorrents {
        /// Local JSON file; fetched from upstream when omitted.
        path: Option<PathBuf>,
    },
    /// Apply byte offsets from NDJSON on stdin to existing records.
    ImportByteoffsets,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    bootstrap::init_logging();

    let config = shardex_config::load(cli.config.as_deref())?;
    let context = bootstrap::build(config).await?;

    match cli.command {
        Command::Run => commands::run_daemon(context).await,
        Command::Search {
            query,
            language,
            year,
            limit,
        } => commands::search(&context, query, language, year, limit).await,
        Command::Extract { md5, output } => commands::extract(context, &md5, output).await,
        Command::ImportFiles { journals } => commands::import_files(&context, journals).await,
        Command::ImportTorrents { path } => commands::import_torrents(&context, path).await,
        Command::ImportByteoffsets => commands::import_byteoffsets(&context).await,
    }
}
