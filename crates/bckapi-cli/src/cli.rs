//! CLI argument definitions for bckapi.
//!
//! # Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `root` | Print the resource map discovered at the API root |
//! | `get` | Read one item by identifier |
//! | `list` | Sweep a paginated collection, streaming NDJSON batches |
//!
//! # Global Options
//!
//! | Option | Default | Description |
//! |--------|---------|-------------|
//! | `--origin` | `BCKAPI_ORIGIN` or `http://localhost:8000` | Backend origin |
//! | `--root` | `BCKAPI_ROOT` or `/api/` | Discovery document path |
//! | `--timeout-ms` | `BCKAPI_TIMEOUT_MS` or `3000` | Request timeout in ms |
//! | `--pretty` | `false` | Pretty-print JSON output |
//!
//! # Examples
//!
//! ```bash
//! bckapi root --pretty
//! bckapi get encargo 42
//! bckapi list encargo --filter estado=4 --max-items 200
//! bckapi list grupo --refresh-ms 60000 --partial
//! ```

use clap::{Args, Parser, Subcommand};

/// bckapi - client for self-describing paginated REST backends
#[derive(Debug, Parser)]
#[command(
    name = "bckapi",
    author,
    version,
    about = "Client for self-describing paginated REST backends"
)]
pub struct Cli {
    /// Backend origin, e.g. https://backend.example.
    #[arg(long, global = true)]
    pub origin: Option<String>,

    /// Path of the discovery document.
    #[arg(long, global = true)]
    pub root: Option<String>,

    /// Request timeout budget in milliseconds.
    #[arg(long, global = true)]
    pub timeout_ms: Option<u64>,

    /// Pretty-print JSON output with indentation.
    #[arg(long, global = true, default_value_t = false)]
    pub pretty: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Refresh the resource registry once and print it.
    Root,

    /// Read one item through the request pipeline.
    ///
    /// # Examples
    ///
    ///   bckapi get encargo 42
    ///   bckapi get grupo 3 --filter expand=activos
    Get(GetArgs),

    /// Sweep a paginated collection.
    ///
    /// Every published batch is written as an NDJSON `chunk` event. Without
    /// `--refresh-ms` the command ends after one sweep; with it the sweep
    /// repeats until interrupted.
    ///
    /// # Examples
    ///
    ///   bckapi list encargo --filter estado=4
    ///   bckapi list grupo --max-items 0 --page-interval-ms 250
    List(ListArgs),
}

#[derive(Debug, Args)]
pub struct GetArgs {
    /// Resource name as listed by `bckapi root`.
    pub name: String,

    /// Item identifier.
    pub id: String,

    /// Query filter as key=value. Repeatable.
    #[arg(long = "filter", value_parser = parse_filter)]
    pub filters: Vec<(String, String)>,
}

#[derive(Debug, Args)]
pub struct ListArgs {
    /// Resource name as listed by `bckapi root`.
    pub name: String,

    /// Query filter as key=value. Repeatable.
    #[arg(long = "filter", value_parser = parse_filter)]
    pub filters: Vec<(String, String)>,

    /// Items per sweep; 0 reads every page.
    #[arg(long, default_value_t = 1000)]
    pub max_items: usize,

    /// Pause between pages in milliseconds.
    #[arg(long, default_value_t = 0)]
    pub page_interval_ms: u64,

    /// Publish after every page, not only at the end of a sweep.
    #[arg(long, default_value_t = false)]
    pub partial: bool,

    /// Restart the sweep this long after it ends; 0 reads once.
    #[arg(long, default_value_t = 0)]
    pub refresh_ms: u64,
}

fn parse_filter(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_owned(), value.to_owned()))
        }
        _ => Err(format!("expected key=value, got '{raw}'")),
    }
}
