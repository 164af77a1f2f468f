use std::path::PathBuf;

use anyhow::{Context, Result};
use atelier_core::models::Collection;
use atelier_core::remote::document_id;
use atelier_core::{LocalCache, SyncConfig};
use clap::Parser;

/// Dump the local sync cache.
#[derive(Parser, Debug)]
#[command(name = "debug_cache")]
struct Args {
    /// Cache directory (defaults to ATELIER_CACHE_DIR or the platform data dir)
    #[arg(long)]
    dir: Option<PathBuf>,

    /// Only show this collection (projects, messages, files)
    #[arg(long)]
    collection: Option<Collection>,

    /// Only show items whose projectId matches
    #[arg(long)]
    scope: Option<String>,

    /// Print full documents instead of one line per item
    #[arg(long)]
    full: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let dir = match args.dir {
        Some(dir) => dir,
        None => SyncConfig::from_env()
            .cache_dir
            .context("no cache directory configured")?,
    };

    eprintln!("=== Atelier cache: {} ===\n", dir.display());
    let cache = LocalCache::open(&dir).with_context(|| format!("cannot open {}", dir.display()))?;

    let collections: Vec<Collection> = match args.collection {
        Some(collection) => vec![collection],
        None => Collection::ALL.to_vec(),
    };

    for collection in collections {
        let record = cache.snapshot(collection);
        let items: Vec<_> = record
            .items
            .iter()
            .filter(|item| match (&args.scope, collection.scope_field()) {
                (Some(scope), Some(field)) => item.get(field).and_then(|v| v.as_str()) == Some(scope.as_str()),
                _ => true,
            })
            .collect();

        eprintln!("------------------------------------------------------------");
        eprintln!(
            "{} ({} items, lastSync: {})",
            collection,
            items.len(),
            record
                .last_sync
                .map(|t| t.to_rfc3339())
                .unwrap_or_else(|| "never".to_string())
        );
        eprintln!("------------------------------------------------------------");

        for item in items {
            if args.full {
                println!("{}", serde_json::to_string_pretty(item)?);
            } else {
                let id = document_id(item).unwrap_or("<no id>");
                let pending = if id.starts_with(atelier_core::constants::TEMP_ID_PREFIX) {
                    " (pending)"
                } else {
                    ""
                };
                println!("  {}{}", id, pending);
            }
        }
        eprintln!();
    }

    Ok(())
}
