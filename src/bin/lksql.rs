//! lksql: the LabKey SQL compiler CLI
//!
//! # Usage
//!
//! ```bash
//! # Show the generated SQL
//! lksql compile "SELECT d, seven FROM R WHERE d > 3"
//!
//! # Relation tree, columns and parameters
//! lksql explain -f report.sql
//!
//! # Execute against the configured database
//! lksql run "PARAMETERS (lo INTEGER) SELECT d FROM R WHERE d > lo" --param lo=3
//! ```

use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use colored::*;
use lksql::prelude::*;
use lksql::fragment::SqlParam;
use lksql::method::aggregate;
use tokio::runtime::Handle;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "lksql")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "LabKey SQL compiler", long_about = None)]
#[command(after_help = "EXAMPLES:
    lksql compile 'SELECT d FROM R'
    lksql compile -f query.sql --dialect sqlserver
    lksql run 'SELECT * FROM R' --format json
    lksql functions --dialect oracle")]
struct Cli {
    /// Configuration file (default: ./lksql.toml, then the user config dir)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Target SQL dialect, overriding the configuration
    #[arg(short, long, global = true, value_enum)]
    dialect: Option<CliDialect>,

    /// Catalog file, overriding the configuration
    #[arg(long, global = true)]
    catalog: Option<PathBuf>,

    /// Schema unqualified table names resolve in
    #[arg(short, long, global = true)]
    schema: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum CliDialect {
    Postgres,
    Sqlserver,
    Oracle,
    Sqlite,
}

impl From<CliDialect> for Dialect {
    fn from(val: CliDialect) -> Self {
        match val {
            CliDialect::Postgres => Dialect::Postgres,
            CliDialect::Sqlserver => Dialect::SqlServer,
            CliDialect::Oracle => Dialect::Oracle,
            CliDialect::Sqlite => Dialect::Sqlite,
        }
    }
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

#[derive(Args)]
struct Source {
    /// The LabKey SQL text
    query: Option<String>,

    /// Read the query from a file
    #[arg(short, long, conflicts_with = "query")]
    file: Option<PathBuf>,
}

impl Source {
    fn read(&self) -> Result<(String, Option<String>)> {
        match (&self.query, &self.file) {
            (Some(q), _) => Ok((q.clone(), None)),
            (None, Some(path)) => {
                let sql = std::fs::read_to_string(path)
                    .with_context(|| format!("reading {}", path.display()))?;
                let name = path.file_stem().map(|s| s.to_string_lossy().into_owned());
                Ok((sql, name))
            }
            (None, None) => bail!("no query given; pass it as an argument or with --file"),
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Compile a query and print the generated SQL
    Compile {
        #[command(flatten)]
        source: Source,
    },
    /// Show the relation tree, output columns and parameters
    Explain {
        #[command(flatten)]
        source: Source,
    },
    /// Compile and execute a query
    Run {
        #[command(flatten)]
        source: Source,

        /// Parameter values as name=value
        #[arg(short, long = "param", value_parser = parse_param)]
        params: Vec<(String, String)>,

        /// Database connection URL
        #[arg(long, env = "LKSQL_DATABASE_URL")]
        database_url: Option<String>,

        /// Output format
        #[arg(long, value_enum, default_value = "table")]
        format: OutputFormat,
    },
    /// List the functions a dialect supports
    Functions,
}

fn parse_param(s: &str) -> Result<(String, String), String> {
    s.split_once('=')
        .map(|(k, v)| (k.trim().to_string(), v.to_string()))
        .ok_or_else(|| format!("expected name=value, got '{}'", s))
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    if let Err(e) = dispatch(cli).await {
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}

async fn dispatch(cli: Cli) -> Result<()> {
    let mut config = LksqlConfig::load(cli.config.as_deref())?;
    if let Some(d) = cli.dialect {
        config.dialect = d.into();
    }
    if let Some(c) = &cli.catalog {
        config.catalog = Some(c.clone());
    }
    if let Some(s) = &cli.schema {
        config.schema = Some(s.clone());
    }

    match &cli.command {
        Commands::Compile { source } => {
            let (sql, name) = source.read()?;
            let ctx = config.query_context(config.load_catalog()?);
            let mut query = Query::new(ctx, name.as_deref(), &sql);
            print_compiled(&query.compile()?);
        }
        Commands::Explain { source } => {
            let (sql, name) = source.read()?;
            let ctx = config.query_context(config.load_catalog()?);
            let mut query = Query::new(ctx, name.as_deref(), &sql);
            explain(&mut query)?;
        }
        Commands::Run {
            source,
            params,
            database_url,
            format,
        } => {
            let url = database_url
                .clone()
                .or_else(|| config.database_url.clone())
                .context("no database URL; use --database-url or set LKSQL_DATABASE_URL")?;
            run(&config, source, params, &url, format).await?;
        }
        Commands::Functions => show_functions(config.dialect),
    }
    Ok(())
}

fn print_compiled(compiled: &CompiledQuery) {
    for w in &compiled.warnings {
        eprintln!("{} {}", "warning:".yellow().bold(), w);
    }
    println!("{}", compiled.rendered());
    if !compiled.params().is_empty() {
        println!();
        println!("{}", "Bindings:".cyan());
        for (i, p) in compiled.params().iter().enumerate() {
            let shown = match p {
                SqlParam::Value(v) => v.display_name().yellow(),
                SqlParam::Named { name, jdbc_type } => format!("{} {}", name, jdbc_type).green(),
            };
            println!("  {:>3}  {}", i + 1, shown);
        }
    }
}

fn explain(query: &mut Query) -> Result<()> {
    println!("{}", "Relations:".green().bold());
    for line in query.explain().lines() {
        println!("  {}", line);
    }
    if !query.parameters().is_empty() {
        println!();
        println!("{}", "Parameters:".green().bold());
        for p in query.parameters() {
            let default = p
                .default
                .as_ref()
                .map(|d| format!(" DEFAULT {}", d.display_name()))
                .unwrap_or_default();
            println!("  {} {}{}", p.name.white(), p.jdbc_type, default.dimmed());
        }
    }
    if !query.resolved_tables().is_empty() {
        println!();
        println!("{}", "Tables:".green().bold());
        for t in query.resolved_tables() {
            println!("  {}", t);
        }
    }
    let compiled = query.compile()?;
    println!();
    println!("{}", "Columns:".green().bold());
    for c in &compiled.columns {
        let phi = if c.phi > PhiLevel::NotPhi {
            format!(" {}", c.phi).red().to_string()
        } else {
            String::new()
        };
        let hidden = if c.hidden { " (hidden)".dimmed().to_string() } else { String::new() };
        println!("  {} {}{}{}", c.name.white(), c.jdbc_type.to_string().dimmed(), phi, hidden);
    }
    println!();
    println!("{}", "SQL:".green().bold());
    print_compiled(&compiled);
    Ok(())
}

async fn run(
    config: &LksqlConfig,
    source: &Source,
    params: &[(String, String)],
    url: &str,
    format: &OutputFormat,
) -> Result<()> {
    let (sql, name) = source.read()?;
    let db = LkDb::connect(url).await?;
    let catalog = config.load_catalog()?;
    let ctx = config
        .query_context(catalog)
        .with_pivot_source(std::sync::Arc::new(db.value_source(Handle::current())));

    // PIVOT discovery blocks on the runtime, so compile off its workers.
    let compiled = tokio::task::spawn_blocking(move || {
        Query::new(ctx, name.as_deref(), &sql).compile()
    })
    .await??;

    let mut values = HashMap::new();
    for (name, text) in params {
        let Some(p) = compiled
            .parameters
            .iter()
            .find(|p| p.name.eq_ignore_ascii_case(name))
        else {
            bail!("query has no parameter named {}", name);
        };
        let value = Value::parse_as(text, p.jdbc_type).map_err(anyhow::Error::msg)?;
        values.insert(p.name.clone(), value);
    }

    let rows = db.fetch_all(&compiled, &values).await?;
    format_output(&compiled, &rows, format);
    Ok(())
}

fn format_output(
    compiled: &CompiledQuery,
    results: &[HashMap<String, serde_json::Value>],
    format: &OutputFormat,
) {
    if let OutputFormat::Json = format {
        println!("{}", serde_json::to_string_pretty(results).unwrap_or_default());
        return;
    }
    if results.is_empty() {
        println!("{}", "(no results)".dimmed());
        return;
    }

    // Output columns in select-list order; drivers may fold alias case.
    let columns: Vec<(&str, Option<&String>)> = compiled
        .columns
        .iter()
        .filter(|c| !c.hidden)
        .map(|c| {
            let key = results[0].keys().find(|k| k.eq_ignore_ascii_case(&c.alias));
            (c.name.as_str(), key)
        })
        .collect();

    let widths: Vec<usize> = columns
        .iter()
        .map(|(name, key)| {
            results
                .iter()
                .map(|row| key.and_then(|k| row.get(k)).map_or(4, |v| val_to_string(v).len()))
                .max()
                .unwrap_or(0)
                .max(name.len())
        })
        .collect();

    let header: Vec<String> = columns
        .iter()
        .zip(&widths)
        .map(|((name, _), w)| format!("{:width$}", name, width = w))
        .collect();
    println!("{}", header.join(" │ ").white().bold());
    let sep: Vec<String> = widths.iter().map(|w| "─".repeat(*w)).collect();
    println!("{}", sep.join("─┼─").dimmed());

    for row in results {
        let cells: Vec<String> = columns
            .iter()
            .zip(&widths)
            .map(|((_, key), w)| {
                let val = key
                    .and_then(|k| row.get(k))
                    .map(val_to_string)
                    .unwrap_or_else(|| "NULL".to_string());
                format!("{:width$}", val, width = w)
            })
            .collect();
        println!("{}", cells.join(" │ "));
    }

    println!();
    println!("{} row(s) returned", results.len().to_string().cyan());
}

fn val_to_string(val: &serde_json::Value) -> String {
    match val {
        serde_json::Value::Null => "NULL".to_string(),
        serde_json::Value::Bool(b) => b.to_string(),
        serde_json::Value::Number(n) => n.to_string(),
        serde_json::Value::String(s) => s.clone(),
        _ => val.to_string(),
    }
}

fn show_functions(dialect: Dialect) {
    println!("{} {}", "Functions for".cyan().bold(), dialect.to_string().cyan().bold());
    println!();
    println!("{:24} {}", "Name".white().bold(), "Arguments".white().bold());
    println!("{}", "─".repeat(40).dimmed());
    let registry = MethodRegistry::shared();
    for m in registry.methods(dialect) {
        println!("{:24} {}", m.name.yellow(), m.arity().dimmed());
    }
    println!();
    println!("{}", "Aggregates:".cyan().bold());
    let names: Vec<&str> = aggregate::names(dialect).collect();
    println!("  {}", names.join(", "));
}
