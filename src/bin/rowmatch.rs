//! rowmatch command-line runner
//!
//! Resolves a JSON dataset against a directory of reference tables using a
//! mapping metadata file, and prints the resolved rows and failure records
//! as JSON on stdout.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use polars::prelude::DataFrame;
use rowmatch::{
    from_json_records, to_json_records, InMemoryCatalog, MappingMetadata, Resolver, ResolverConfig,
};

/// Runner configuration
struct Config {
    /// Dataset: JSON array of objects
    data: PathBuf,
    /// Mapping metadata JSON
    metadata: PathBuf,
    /// Directory of `<table>.json` reference tables
    catalog: PathBuf,
    resolver: ResolverConfig,
    exclude_failed: bool,
}

fn require_value(args: &[String], i: usize, flag: &str) -> String {
    if i + 1 < args.len() {
        args[i + 1].clone()
    } else {
        eprintln!("error: {flag} requires a value");
        std::process::exit(1);
    }
}

fn print_help() {
    println!("rowmatch - metadata-driven record resolution");
    println!();
    println!("USAGE:");
    println!("    rowmatch --data <FILE> --metadata <FILE> --catalog <DIR> [OPTIONS]");
    println!();
    println!("OPTIONS:");
    println!("    -d, --data <FILE>           Dataset as a JSON array of objects");
    println!("    -m, --metadata <FILE>       Mapping metadata JSON");
    println!("    -c, --catalog <DIR>         Directory of <table>.json reference tables");
    println!("    -e, --environment <NAME>    Table-name environment prefix [default: $ROWMATCH_ENVIRONMENT or dev]");
    println!("    -v, --verbose               Warn about normalised rule configuration");
    println!("        --exclude-failed        Drop rows with at least one failure from the output");
    println!("    -h, --help                  Print help information");
}

fn parse_args() -> Config {
    let args: Vec<String> = std::env::args().collect();
    let mut data = None;
    let mut metadata = None;
    let mut catalog = None;
    let mut resolver = ResolverConfig::from_env();
    let mut exclude_failed = false;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--data" | "-d" => {
                data = Some(PathBuf::from(require_value(&args, i, "--data")));
                i += 2;
            }
            "--metadata" | "-m" => {
                metadata = Some(PathBuf::from(require_value(&args, i, "--metadata")));
                i += 2;
            }
            "--catalog" | "-c" => {
                catalog = Some(PathBuf::from(require_value(&args, i, "--catalog")));
                i += 2;
            }
            "--environment" | "-e" => {
                resolver.environment = require_value(&args, i, "--environment");
                i += 2;
            }
            "--verbose" | "-v" => {
                resolver.verbose_logging = true;
                i += 1;
            }
            "--exclude-failed" => {
                exclude_failed = true;
                i += 1;
            }
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            arg => {
                eprintln!("error: unknown argument: {arg}");
                std::process::exit(1);
            }
        }
    }

    let (Some(data), Some(metadata), Some(catalog)) = (data, metadata, catalog) else {
        eprintln!("error: --data, --metadata and --catalog are required (see --help)");
        std::process::exit(1);
    };

    Config {
        data,
        metadata,
        catalog,
        resolver,
        exclude_failed,
    }
}

fn load_dataset(path: &Path) -> Result<DataFrame, Box<dyn std::error::Error>> {
    let raw = std::fs::read_to_string(path)?;
    let records: Vec<serde_json::Map<String, serde_json::Value>> = serde_json::from_str(&raw)?;
    Ok(from_json_records(&records)?)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = parse_args();

    let default_level = if config.resolver.verbose_logging {
        tracing::Level::DEBUG
    } else {
        tracing::Level::WARN
    };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .init();

    let dataset = load_dataset(&config.data)?;
    let metadata = MappingMetadata::from_json(&std::fs::read_to_string(&config.metadata)?)?;
    let catalog = InMemoryCatalog::load_dir(&config.catalog)?;

    tracing::info!(
        rows = dataset.height(),
        rules = metadata.rules.len(),
        environment = %config.resolver.environment,
        "starting resolution"
    );

    let resolver = Resolver::new(Arc::new(catalog), config.resolver);
    let mut resolved = resolver.run(&dataset, &metadata)?;
    if config.exclude_failed {
        resolved = resolver.exclude_failed(&resolved, &metadata.id_column)?;
    }

    let output = serde_json::json!({
        "rows": to_json_records(&resolved)?,
        "failures": resolver.failures(),
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
