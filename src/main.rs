use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use homedir::my_home;
use serde_json::{Map, Value};
use tracing_subscriber::{fmt, EnvFilter};

use medcode::prepare;
use medcode::semantic::{EmbeddingModel, EmbeddingStorage};
use medcode::{Catalog, CodeFamily, CodeRegistry, Config, Suggestion};

mod cli;

use cli::{Args, Command};

/// Environment variable holding the log filter
const LOG_ENV: &str = "MEDCODE_LOG";

fn init_logging(verbose: u8) {
    let filter = match verbose {
        0 => EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info")),
        1 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };

    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// `MEDCODE_BASE_PATH`, or `~/.local/share/medcode`.
fn base_path() -> anyhow::Result<PathBuf> {
    if let Ok(path) = std::env::var("MEDCODE_BASE_PATH") {
        return Ok(PathBuf::from(path));
    }

    let home = my_home()
        .map_err(|e| anyhow::anyhow!("Could not determine home directory: {}", e))?
        .context("Home directory path is empty")?;
    Ok(home.join(".local").join("share").join("medcode"))
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    let base_path = base_path()?;
    let config = Config::load_with(&base_path)
        .with_context(|| format!("Failed to load config from {}", base_path.display()))?;

    match args.command {
        Command::Suggest {
            query,
            family,
            limit,
            method,
            json,
        } => {
            let registry = CodeRegistry::new(&config);
            let limit = limit.unwrap_or(config.default_limit);

            let mut results: Vec<(CodeFamily, Vec<Suggestion>)> = Vec::new();
            for family in family.families() {
                let suggestions = registry
                    .suggest(&query, family, limit, method)
                    .with_context(|| format!("Failed to suggest {} codes", family))?;
                results.push((family, suggestions));
            }

            if json {
                let mut out = Map::new();
                for (family, suggestions) in results {
                    out.insert(family.to_string(), serde_json::to_value(suggestions)?);
                }
                println!("{}", serde_json::to_string_pretty(&Value::Object(out))?);
            } else {
                for (family, suggestions) in results {
                    print_table(family, &suggestions);
                }
            }
        }

        Command::Import {
            family,
            format,
            input,
        } => {
            let output = config.catalog_path(family);
            let catalog = prepare::import_file(&input, &output, family, format)
                .with_context(|| format!("Failed to import {}", input.display()))?;
            println!(
                "Imported {} {} codes into {}",
                catalog.len(),
                family,
                output.display()
            );
        }

        Command::BuildIndex { family, quiet } => {
            let model = EmbeddingModel::new(
                &config.model,
                config.base_path().to_path_buf(),
                Some(Duration::from_secs(config.download_timeout_secs)),
            )?;
            let storage = EmbeddingStorage::new(config.data_path());

            for family in family.families() {
                let catalog = Catalog::load(&config.catalog_path(family), family.as_str())?;
                let matrix = prepare::build_index(
                    &catalog,
                    family,
                    &model,
                    &storage,
                    config.build_batch_size,
                    !quiet,
                )
                .with_context(|| format!("Failed to build {} embedding store", family))?;
                println!(
                    "Built {} embedding store: {} codes, {} dimensions",
                    family,
                    matrix.len(),
                    matrix.dimensions()
                );
            }
        }

        Command::Info { load } => {
            println!("Base path:  {}", config.base_path().display());
            println!("Data dir:   {}", config.data_path().display());
            println!("Model:      {}", config.model);
            println!(
                "Thresholds: diagnosis {:.2}, procedure {:.2}",
                config.thresholds.diagnosis, config.thresholds.procedure
            );

            let registry = CodeRegistry::new(&config);
            for family in CodeFamily::ALL {
                let catalog_path = config.catalog_path(family);
                println!();
                println!("[{}]", family);
                println!(
                    "  catalog: {} ({})",
                    catalog_path.display(),
                    status(catalog_path.exists())
                );
                println!(
                    "  store:   {} ({})",
                    registry.storage().matrix_path(family).display(),
                    status(registry.storage().exists(family))
                );

                if load {
                    match registry.catalog(family) {
                        Ok(catalog) => println!("  codes:   {}", catalog.len()),
                        Err(e) => println!("  codes:   {}", e),
                    }
                    match registry.matrix(family) {
                        Ok(matrix) => println!(
                            "  vectors: {} x {}",
                            matrix.len(),
                            matrix.dimensions()
                        ),
                        Err(e) => println!("  vectors: {}", e),
                    }
                }
            }
        }
    }

    Ok(())
}

fn status(present: bool) -> &'static str {
    if present {
        "present"
    } else {
        "missing"
    }
}

fn print_table(family: CodeFamily, suggestions: &[Suggestion]) {
    println!("{}:", family);
    if suggestions.is_empty() {
        println!("  no suggestions");
        return;
    }

    let width = suggestions
        .iter()
        .map(|s| s.code.len())
        .max()
        .unwrap_or(4)
        .max(4);

    println!("  {:<width$}  {:>6}  DESCRIPTION", "CODE", "SCORE", width = width);
    for suggestion in suggestions {
        println!(
            "  {:<width$}  {:>6}  {}",
            suggestion.code,
            suggestion.score.to_string(),
            suggestion.description,
            width = width
        );
    }
}
