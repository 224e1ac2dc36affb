//! Command-line compiler for cohort identification configurations
//!
//! Reads a cohort definition file (a whole configuration or a single
//! aggregate leaf, JSON or YAML), compiles it and prints the SQL.

use std::path::{Path, PathBuf};
use std::process;

use anyhow::{bail, Context, Result};
use clap::Parser;
use serde::Deserialize;

use cic_cache::{CacheManager, MemoryStore};
use cic_compiler::{CohortQueryBuilder, Dialect, SelectMode};
use cic_model::{AggregateLeaf, CohortConfiguration, NodeId};

mod config;
mod logging;

use config::Config;

#[derive(Parser)]
#[command(
    name = "cic",
    about = "Compile a cohort identification configuration to SQL"
)]
struct Cli {
    /// Cohort definition file (.json or .yaml)
    definition: PathBuf,

    /// Configuration file (defaults to cic.yaml when present)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Target dialect, overriding the configuration file
    #[arg(long)]
    dialect: Option<Dialect>,

    /// Compile a single-leaf definition as a row preview with this many rows
    #[arg(long)]
    preview: Option<u32>,

    /// Stop compilation at this top-level node, e.g. "leaf:3" or "container:2"
    #[arg(long)]
    stop_at: Option<NodeId>,

    /// Emit only the query body, without the parameter declaration block
    #[arg(long)]
    no_parameters: bool,
}

/// A definition file holds either one leaf or a whole configuration
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Definition {
    Leaf(AggregateLeaf),
    Configuration(CohortConfiguration),
}

fn main() {
    let cli = Cli::parse();
    if let Err(error) = run(cli) {
        eprintln!("error: {error:#}");
        process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let config = load_config(cli.config.as_deref())?;
    config.apply_logging_env();
    logging::init();

    let definition = load_definition(&cli.definition)?;

    let dialect = cli.dialect.unwrap_or(config.dialect);
    let mut builder = CohortQueryBuilder::new(dialect);
    if config.cache.enabled {
        // dry-run store: shows which leaves would compile inline; real
        // deployments hand the builder a store bound to their cache server
        let cache = CacheManager::new(Box::new(MemoryStore::new()), config.cache.committer)
            .with_schema(config.cache.schema);
        builder.set_cache(Some(cache));
    }
    builder.set_include_parameters(!cli.no_parameters);

    let sql = match definition {
        Definition::Configuration(cohort) => {
            if cli.preview.is_some() {
                bail!("--preview applies to single-leaf definitions only");
            }
            tracing::info!(configuration = %cohort.id, name = %cohort.name, %dialect, "compiling");
            builder.compile_configuration(&cohort, cli.stop_at)?
        }
        Definition::Leaf(leaf) => {
            if cli.stop_at.is_some() {
                bail!("--stop-at applies to whole configurations only");
            }
            let mode = match cli.preview {
                Some(rows) => SelectMode::Preview { rows },
                None => SelectMode::DistinctIdentifiers,
            };
            tracing::info!(leaf = %leaf.id, name = %leaf.name, %dialect, "compiling standalone leaf");
            builder.compile_leaf(&leaf, mode)?
        }
    };

    println!("{sql}");
    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => {
            Config::load(path).with_context(|| format!("loading config {}", path.display()))
        }
        None => {
            let default_path = Path::new("cic.yaml");
            if default_path.exists() {
                Config::load(default_path).context("loading cic.yaml")
            } else {
                Config::from_env().context("reading configuration from environment")
            }
        }
    }
}

fn load_definition(path: &Path) -> Result<Definition> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("reading definition {}", path.display()))?;

    let is_yaml = matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yaml") | Some("yml")
    );
    let definition = if is_yaml {
        serde_yaml::from_str(&contents)
            .with_context(|| format!("parsing YAML definition {}", path.display()))?
    } else {
        serde_json::from_str(&contents)
            .with_context(|| format!("parsing JSON definition {}", path.display()))?
    };
    Ok(definition)
}
