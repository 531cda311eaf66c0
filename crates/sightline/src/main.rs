//! sightline: dataset exploration tools
//!
//! Documents annotated configuration defaults as tables, and builds an
//! embeddings table for a dataset so images can be searched by similarity,
//! filtered with SQL, and checked for near duplicates.

mod config;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde_json::Value;
use tracing::info;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use config::{CONFIG_FILE, Config, DEFAULT_CONFIG, SIGHTLINE_DIR};
use sightline_docs::{TableBuilder, tables_to_markdown};
use sightline_explorer::{
    DEFAULT_LIMIT, Explorer, HttpEmbedder, HttpEmbedderConfig, ImageInput, ResultTable,
    SharedEmbedder, SimilarityIndex,
};

/// Dataset exploration tools: config docs tables and image embedding search
#[derive(Parser)]
#[command(name = "sightline")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to .sightline directory or config file (default: search for .sightline/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Output format
    #[arg(long, global = true, value_enum, default_value_t = Format::Json)]
    format: Format,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Format {
    Json,
    Yaml,
    Markdown,
}

/// Options shared by every command that opens the explorer.
#[derive(Args, Debug, Clone, Default)]
struct ExplorerArgs {
    /// Dataset descriptor YAML
    #[arg(long)]
    data: Option<PathBuf>,

    /// Store directory, or ":memory:"
    #[arg(long)]
    uri: Option<String>,

    /// Dataset split to embed
    #[arg(long)]
    split: Option<String>,

    /// Embedding service base URL
    #[arg(long, env = "SIGHTLINE_EMBEDDER_URL")]
    base_url: Option<String>,

    /// Embedding model
    #[arg(long)]
    model: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize a new .sightline directory with config file
    Init {
        /// Force overwrite existing config
        #[arg(long)]
        force: bool,
    },

    /// Print documentation tables for an annotated defaults file
    Tables {
        /// Annotated defaults YAML (default: docs.config_path from config)
        path: Option<PathBuf>,

        /// Section to document; repeat for several (default: docs.sections from config)
        #[arg(long = "section")]
        sections: Vec<String>,
    },

    /// Build the embeddings table for a dataset split
    Embed {
        #[command(flatten)]
        explorer: ExplorerArgs,

        /// Rebuild even if the table already exists
        #[arg(long)]
        force: bool,
    },

    /// Find the rows most similar to one or more images
    Query {
        #[command(flatten)]
        explorer: ExplorerArgs,

        /// Query images; several are averaged into one query
        #[arg(required = true)]
        images: Vec<PathBuf>,

        /// Number of rows to return
        #[arg(long, default_value_t = DEFAULT_LIMIT)]
        limit: usize,

        /// Include embedding vectors in the output
        #[arg(long)]
        vectors: bool,
    },

    /// Filter the embeddings table with an SQL predicate
    Sql {
        #[command(flatten)]
        explorer: ExplorerArgs,

        /// Predicate, or a full `SELECT ... WHERE ...` statement
        query: String,

        /// Include embedding vectors in the output
        #[arg(long)]
        vectors: bool,
    },

    /// Find rows similar to images or to rows of the table
    Similar {
        #[command(flatten)]
        explorer: ExplorerArgs,

        /// Query images
        #[arg(long = "img")]
        images: Vec<PathBuf>,

        /// Row indexes to use as the query
        #[arg(long)]
        idx: Vec<usize>,

        /// Number of rows to return
        #[arg(long, default_value_t = DEFAULT_LIMIT)]
        limit: usize,

        /// Include embedding vectors in the output
        #[arg(long)]
        vectors: bool,
    },

    /// Build the near-duplicate similarity index
    #[command(name = "sim-index")]
    SimIndex {
        #[command(flatten)]
        explorer: ExplorerArgs,

        /// Maximum squared L2 distance between similar images
        #[arg(long)]
        max_dist: Option<f64>,

        /// Fraction of the table searched per image
        #[arg(long)]
        top_k: Option<f64>,

        /// Print only the per-image counts
        #[arg(long)]
        counts: bool,
    },
}

fn log_filter(verbose: bool) -> EnvFilter {
    if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    }
}

/// Initialize logging for interactive commands.
/// Logs to stderr so stdout stays clean for results.
fn init_logging(verbose: bool) {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(log_filter(verbose))
        .init();
}

/// Initialize logging for long-running commands.
/// Logs to stderr and to daily-rotated files in .sightline/logs/.
fn init_file_logging(sightline_dir: &Path, verbose: bool) {
    let logs_dir = sightline_dir.join("logs");

    if let Err(e) = std::fs::create_dir_all(&logs_dir) {
        eprintln!("Warning: Failed to create logs directory: {}", e);
        init_logging(verbose);
        return;
    }

    let file_appender = RollingFileAppender::new(Rotation::DAILY, &logs_dir, "sightline.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    // Dropping the guard stops the writer thread.
    static GUARD: std::sync::OnceLock<tracing_appender::non_blocking::WorkerGuard> =
        std::sync::OnceLock::new();
    let _ = GUARD.set(guard);

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(fmt::layer().with_writer(non_blocking).with_ansi(false))
        .with(log_filter(verbose))
        .init();
}

/// Load config from an explicit path or auto-discover `.sightline/config.toml`.
///
/// Returns the config and the `.sightline` directory it came from.
fn load_config(override_path: Option<&PathBuf>) -> Result<(Config, Option<PathBuf>)> {
    if let Some(path) = override_path {
        let config_file = if path.is_dir() {
            path.join(CONFIG_FILE)
        } else {
            path.clone()
        };
        let sightline_dir = config_file.parent().unwrap_or(path).to_path_buf();
        let config = Config::from_file(&config_file)?;
        return Ok((config, Some(sightline_dir)));
    }

    match Config::find_and_load() {
        Ok(Some((config, sightline_dir))) => Ok((config, Some(sightline_dir))),
        Ok(None) => Ok((Config::default(), None)),
        Err(e) => {
            eprintln!("Warning: Error searching for config: {}, using defaults", e);
            Ok((Config::default(), None))
        }
    }
}

fn open_explorer(
    args: &ExplorerArgs,
    config: &Config,
    sightline_dir: Option<&Path>,
) -> Result<Explorer> {
    let data = args.data.clone().or_else(|| {
        config
            .explorer
            .data
            .as_deref()
            .map(|p| Config::resolve_path(p, sightline_dir))
    });
    let uri = args.uri.as_deref().unwrap_or(&config.explorer.uri);

    let embedder_config = HttpEmbedderConfig::new()
        .with_base_url(args.base_url.as_deref().unwrap_or(&config.embedder.base_url))
        .with_model(args.model.as_deref().unwrap_or(&config.embedder.model));
    let embedder: SharedEmbedder = Arc::new(HttpEmbedder::new(embedder_config)?);

    let explorer = Explorer::new(data, embedder, uri)
        .with_context(|| format!("Failed to open store at {}", uri))?;
    Ok(explorer)
}

/// Open the explorer and load (or build) its embeddings table.
fn ready_explorer(
    args: &ExplorerArgs,
    config: &Config,
    sightline_dir: Option<&Path>,
    force: bool,
) -> Result<Explorer> {
    let mut explorer = open_explorer(args, config, sightline_dir)?;
    let split = args.split.as_deref().unwrap_or(&config.explorer.split);
    explorer
        .create_embeddings_table(force, split)
        .with_context(|| format!("Failed to load table {}", explorer.table_name()))?;
    Ok(explorer)
}

/// Print structured output. Callers render Markdown themselves.
fn print_value(value: &Value, format: Format) -> Result<()> {
    match format {
        Format::Json => println!("{}", serde_json::to_string_pretty(value)?),
        Format::Yaml => print!("{}", serde_yaml::to_string(value)?),
        Format::Markdown => anyhow::bail!("Markdown output is not available for this command"),
    }
    Ok(())
}

fn print_results(result: &ResultTable, format: Format, with_vectors: bool) -> Result<()> {
    if format == Format::Markdown {
        print!("{}", results_markdown(result));
        return Ok(());
    }

    let mut value = serde_json::to_value(result)?;
    if !with_vectors {
        if let Value::Array(rows) = &mut value {
            for row in rows {
                if let Value::Object(fields) = row {
                    fields.remove("vector");
                }
            }
        }
    }
    print_value(&value, format)
}

fn results_markdown(result: &ResultTable) -> String {
    let mut out = String::from("| idx | im_file | labels | _distance |\n|---|---|---|---|\n");
    for row in result.rows() {
        let distance = row
            .distance
            .map(|d| format!("{:.4}", d))
            .unwrap_or_default();
        out.push_str(&format!(
            "| {} | {} | {} | {} |\n",
            row.record.idx,
            row.record.im_file,
            row.record.meta.labels.join(", "),
            distance
        ));
    }
    out
}

fn print_sim_index(index: &SimilarityIndex, format: Format, counts_only: bool) -> Result<()> {
    if format == Format::Markdown {
        print!("{}", sim_index_markdown(index, counts_only));
        return Ok(());
    }
    if counts_only {
        return print_value(&serde_json::to_value(index.counts())?, format);
    }
    print_value(&serde_json::to_value(index)?, format)
}

fn sim_index_markdown(index: &SimilarityIndex, counts_only: bool) -> String {
    if counts_only {
        let mut out = String::from("| count |\n|---|\n");
        for count in index.counts() {
            out.push_str(&format!("| {} |\n", count));
        }
        return out;
    }
    let mut out = String::from("| idx | im_file | count |\n|---|---|---|\n");
    for row in index.rows() {
        out.push_str(&format!("| {} | {} | {} |\n", row.idx, row.im_file, row.count));
    }
    out
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let (config, sightline_dir) = load_config(cli.config.as_ref())?;
    let log_dir = sightline_dir
        .clone()
        .unwrap_or_else(|| PathBuf::from(SIGHTLINE_DIR));

    match &cli.command {
        Commands::Embed { .. } | Commands::SimIndex { .. } => {
            init_file_logging(&log_dir, cli.verbose)
        }
        _ => init_logging(cli.verbose),
    }

    match &sightline_dir {
        Some(dir) => info!("Loaded config from {}", dir.display()),
        None => tracing::debug!("No .sightline/config.toml found, using defaults"),
    }

    let errors = config.validate();
    if !errors.is_empty() {
        for e in &errors {
            tracing::error!("Invalid config: {}", e);
        }
        anyhow::bail!("Configuration has {} error(s)", errors.len());
    }

    let sightline_dir = sightline_dir.as_deref();

    match cli.command {
        Commands::Init { force } => {
            let dir = PathBuf::from(SIGHTLINE_DIR);
            let config_path = dir.join(CONFIG_FILE);

            if config_path.exists() && !force {
                anyhow::bail!(".sightline/config.toml already exists. Use --force to overwrite.");
            }

            if !dir.exists() {
                std::fs::create_dir_all(&dir)?;
                info!("Created {}/", dir.display());
            }

            std::fs::write(&config_path, DEFAULT_CONFIG)?;
            info!("Created {}", config_path.display());
            info!("Next steps:");
            info!("  1. Set [explorer] data in .sightline/config.toml");
            info!("  2. Run 'sightline embed' to build the embeddings table");
            info!("  3. Run 'sightline query <image>' to search it");
        }

        Commands::Tables { path, sections } => {
            let path = path
                .unwrap_or_else(|| Config::resolve_path(&config.docs.config_path, sightline_dir));
            let sections = if sections.is_empty() {
                config.docs.sections.clone()
            } else {
                sections
            };

            let tables = TableBuilder::new()
                .with_sections(sections)
                .build_file(&path)
                .with_context(|| format!("Failed to build tables from {}", path.display()))?;
            info!("Built {} tables from {}", tables.len(), path.display());

            match cli.format {
                Format::Markdown => print!("{}", tables_to_markdown(&tables)),
                format => print_value(&serde_json::to_value(&tables)?, format)?,
            }
        }

        Commands::Embed { explorer, force } => {
            let exp = ready_explorer(&explorer, &config, sightline_dir, force)?;
            info!(
                "Table {} has {} rows",
                exp.table_name(),
                exp.table_len()?
            );
        }

        Commands::Query {
            explorer,
            images,
            limit,
            vectors,
        } => {
            let exp = ready_explorer(&explorer, &config, sightline_dir, false)?;
            let result = exp.query(ImageInput::PathList(images), limit)?;
            print_results(&result, cli.format, vectors)?;
        }

        Commands::Sql {
            explorer,
            query,
            vectors,
        } => {
            let exp = ready_explorer(&explorer, &config, sightline_dir, false)?;
            let result = exp.sql_query(&query)?;
            print_results(&result, cli.format, vectors)?;
        }

        Commands::Similar {
            explorer,
            images,
            idx,
            limit,
            vectors,
        } => {
            let exp = ready_explorer(&explorer, &config, sightline_dir, false)?;
            let img = (!images.is_empty()).then(|| ImageInput::PathList(images));
            let idx = (!idx.is_empty()).then_some(idx);
            let result = exp.get_similar(img, idx, limit)?;
            print_results(&result, cli.format, vectors)?;
        }

        Commands::SimIndex {
            explorer,
            max_dist,
            top_k,
            counts,
        } => {
            let mut exp = ready_explorer(&explorer, &config, sightline_dir, false)?;
            let max_dist = max_dist.unwrap_or(config.similarity.max_dist);
            let top_k = top_k.or(config.similarity.top_k);
            let index = exp.similarity_index(max_dist, top_k, true)?;
            info!(
                "Wrote {} rows to {}",
                index.len(),
                exp.sim_idx_table_name()
            );
            print_sim_index(&index, cli.format, counts)?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_similar_by_index() {
        let cli = Cli::parse_from([
            "sightline", "--format", "yaml", "similar", "--idx", "3", "--idx", "7", "--limit", "5",
        ]);
        assert_eq!(cli.format, Format::Yaml);
        match cli.command {
            Commands::Similar {
                images, idx, limit, ..
            } => {
                assert!(images.is_empty());
                assert_eq!(idx, vec![3, 7]);
                assert_eq!(limit, 5);
            }
            _ => panic!("expected similar"),
        }
    }

    #[test]
    fn test_parse_sim_index() {
        let cli = Cli::parse_from([
            "sightline",
            "sim-index",
            "--data",
            "coco8.yaml",
            "--max-dist",
            "0.1",
            "--top-k",
            "0.5",
        ]);
        match cli.command {
            Commands::SimIndex {
                explorer,
                max_dist,
                top_k,
                counts,
            } => {
                assert_eq!(explorer.data, Some(PathBuf::from("coco8.yaml")));
                assert_eq!(max_dist, Some(0.1));
                assert_eq!(top_k, Some(0.5));
                assert!(!counts);
            }
            _ => panic!("expected sim-index"),
        }
    }

    #[test]
    fn test_open_explorer_prefers_flags() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.explorer.data = Some(PathBuf::from("from_config.yaml"));
        config.explorer.uri = dir.path().join("store").to_string_lossy().into_owned();

        let args = ExplorerArgs {
            data: Some(PathBuf::from("/sets/coco8.yaml")),
            uri: Some(":memory:".to_string()),
            ..Default::default()
        };
        let exp = open_explorer(&args, &config, None).unwrap();
        assert_eq!(exp.table_name(), "coco8");
        assert_eq!(exp.store().location(), ":memory:");

        let exp = open_explorer(&ExplorerArgs::default(), &config, Some(Path::new("/p/.sightline")))
            .unwrap();
        assert_eq!(exp.data(), Some(Path::new("/p/from_config.yaml")));
        assert!(exp.store().location().ends_with("explorer.db"));
    }

    #[test]
    fn test_results_markdown() {
        let md = results_markdown(&ResultTable::default());
        assert!(md.starts_with("| idx | im_file | labels | _distance |"));
        assert_eq!(md.lines().count(), 2);
    }

    #[test]
    fn test_sim_index_markdown() {
        let index = SimilarityIndex::new(vec![
            sightline_explorer::SimIndexRecord {
                idx: 0,
                im_file: "a.jpg".to_string(),
                count: 2,
                sim_im_files: vec!["a.jpg".to_string(), "b.jpg".to_string()],
            },
            sightline_explorer::SimIndexRecord {
                idx: 1,
                im_file: "b.jpg".to_string(),
                count: 1,
                sim_im_files: vec!["b.jpg".to_string()],
            },
        ]);

        let counts = sim_index_markdown(&index, true);
        assert_eq!(counts, "| count |\n|---|\n| 2 |\n| 1 |\n");

        let full = sim_index_markdown(&index, false);
        assert!(full.contains("| 1 | b.jpg | 1 |"));
    }

    #[test]
    fn test_print_value_rejects_markdown() {
        assert!(print_value(&Value::Null, Format::Markdown).is_err());
        assert!(print_value(&Value::Null, Format::Json).is_ok());
    }
}
