//! schema-refs CLI
//!
//! Command-line interface for resolving, dereferencing and bundling JSON
//! Schema `$ref`s.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use schema_refs::{
    CircularMode, HttpOptions, RefError, RefParser, RefParserOptions, SourceKind,
};
use serde_json::{json, Map, Value};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "schema-refs")]
#[command(about = "Resolve, dereference and bundle JSON Schema $refs")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse the root schema without following any $ref
    Parse {
        #[command(flatten)]
        common: CommonArgs,
    },

    /// List every document reachable from the root schema
    Resolve {
        #[command(flatten)]
        common: CommonArgs,

        /// Only list documents of this kind (file, http, other); repeatable
        #[arg(long = "kind", value_parser = parse_kind)]
        kinds: Vec<SourceKind>,
    },

    /// Replace every $ref with the schema it points to
    Dereference {
        #[command(flatten)]
        common: CommonArgs,

        /// Circular $ref handling: allow, ignore or disallow
        #[arg(long, default_value = "allow", value_parser = parse_circular)]
        circular: CircularMode,
    },

    /// Inline external documents so only local $refs remain
    Bundle {
        #[command(flatten)]
        common: CommonArgs,
    },
}

#[derive(Args)]
struct CommonArgs {
    /// Schema source: file path or URL (http:// or https://)
    schema: String,

    /// Output file (stdout if not specified)
    #[arg(long)]
    output: Option<PathBuf>,

    /// Pretty-print JSON output
    #[arg(long)]
    pretty: bool,

    /// Record unreachable or malformed documents and keep going
    #[arg(long)]
    continue_on_error: bool,

    /// Leave $refs that cannot be resolved in place instead of failing
    #[arg(long)]
    allow_unresolved: bool,

    /// Only resolve $refs within the root document
    #[arg(long)]
    no_external: bool,

    /// Maximum number of documents loaded at once
    #[arg(long, default_value_t = 8)]
    max_concurrency: usize,

    /// HTTP request timeout in seconds
    #[arg(long, default_value_t = 10)]
    timeout_secs: u64,

    /// Extra HTTP header as NAME:VALUE; repeatable
    #[arg(long = "header", value_name = "NAME:VALUE")]
    headers: Vec<String>,
}

fn parse_kind(s: &str) -> Result<SourceKind, String> {
    SourceKind::parse(s).ok_or_else(|| format!("unknown kind \"{}\" (file, http, other)", s))
}

fn parse_circular(s: &str) -> Result<CircularMode, String> {
    CircularMode::parse(s)
        .ok_or_else(|| format!("unknown mode \"{}\" (allow, ignore, disallow)", s))
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Parse { common } => run_parse(common).await,
        Commands::Resolve { common, kinds } => run_resolve(common, kinds).await,
        Commands::Dereference { common, circular } => run_dereference(common, circular).await,
        Commands::Bundle { common } => run_bundle(common).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(code) => ExitCode::from(code),
    }
}

async fn run_parse(common: CommonArgs) -> Result<(), u8> {
    let parser = build_parser(&common, CircularMode::default())?;
    let value = parser.parse(common.schema.as_str()).await.map_err(report)?;
    write_output(&value, &common)
}

async fn run_resolve(common: CommonArgs, kinds: Vec<SourceKind>) -> Result<(), u8> {
    let parser = build_parser(&common, CircularMode::default())?;
    let resolution = parser
        .resolve(common.schema.as_str())
        .await
        .map_err(report)?;

    let registry = &resolution.registry;
    let paths = registry.paths(&kinds);
    let mut values = Map::new();
    for id in &paths {
        if let Some(entry) = registry.get(id) {
            values.insert(id.to_string(), entry.value.clone());
        }
    }

    let output = json!({
        "paths": paths,
        "values": values,
    });
    write_output(&output, &common)
}

async fn run_dereference(common: CommonArgs, circular: CircularMode) -> Result<(), u8> {
    let parser = build_parser(&common, circular)?;
    let dereferenced = parser
        .dereference(common.schema.as_str())
        .await
        .map_err(report)?;

    let value = dereferenced.to_value().map_err(|e| {
        eprintln!(
            "Error: {} (the dereferenced schema is cyclic; use --circular ignore or the bundle command)",
            e
        );
        e.exit_code() as u8
    })?;
    write_output(&value, &common)
}

async fn run_bundle(common: CommonArgs) -> Result<(), u8> {
    let parser = build_parser(&common, CircularMode::default())?;
    let bundled = parser.bundle(common.schema.as_str()).await.map_err(report)?;
    write_output(&bundled.value, &common)
}

fn build_parser(common: &CommonArgs, circular: CircularMode) -> Result<RefParser, u8> {
    let mut headers = Vec::with_capacity(common.headers.len());
    for header in &common.headers {
        let Some((name, value)) = header.split_once(':') else {
            eprintln!("Error: invalid header \"{}\": expected NAME:VALUE", header);
            return Err(2);
        };
        headers.push((name.trim().to_string(), value.trim().to_string()));
    }

    let http = HttpOptions {
        timeout: Duration::from_secs(common.timeout_secs),
        headers,
        ..HttpOptions::default()
    };
    let options = RefParserOptions::new()
        .external(!common.no_external)
        .continue_on_error(common.continue_on_error)
        .allow_unresolved(common.allow_unresolved)
        .circular(circular)
        .max_concurrency(common.max_concurrency)
        .http(http);

    Ok(RefParser::new(options))
}

fn report(e: RefError) -> u8 {
    eprintln!("Error: {}", e);
    e.exit_code() as u8
}

fn write_output(value: &Value, common: &CommonArgs) -> Result<(), u8> {
    let json_output = if common.pretty {
        serde_json::to_string_pretty(value)
    } else {
        serde_json::to_string(value)
    }
    .map_err(|e| {
        eprintln!("Error serializing output: {}", e);
        2u8
    })?;

    match &common.output {
        Some(path) => {
            std::fs::write(path, &json_output).map_err(|e| {
                eprintln!("Error writing to {}: {}", path.display(), e);
                3u8
            })?;
        }
        None => {
            println!("{}", json_output);
        }
    }

    Ok(())
}
