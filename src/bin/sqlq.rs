//! sqlq — run named SQL templates from the command line
//!
//! # Usage
//!
//! ```bash
//! # Execute a named query
//! sqlq exec get-one-state -p code=AZ
//!
//! # Dry run (show rendered SQL and binds)
//! sqlq render get-selected-states -p codes=[AZ,CA]
//!
//! # Several queries in one transaction
//! sqlq tx insert-row -p id=1 -p name=test --rollback
//! ```

use anyhow::{bail, Context};
use clap::{Parser, Subcommand, ValueEnum};
use colored::*;
use sqlq::prelude::*;
use std::collections::HashMap;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "sqlq")]
#[command(version)]
#[command(about = "Run named SQL templates with result caching", long_about = None)]
#[command(after_help = "EXAMPLES:
    sqlq exec get-all-states
    sqlq exec get-one-state -p code=AZ --format json
    sqlq render get-selected-states -p codes=[AZ,CA,VA]
    sqlq tx insert-row select-row -p id=7 -p name=seven --rollback")]
struct Cli {
    /// Configuration file (defaults to <config dir>/sqlq/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Database connection URL
    #[arg(long, env = "SQLQ_DATABASE_URL", global = true)]
    database_url: Option<String>,

    /// Template directory
    #[arg(long, global = true)]
    sql_dir: Option<PathBuf>,

    /// Verbose output (log queries and results)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a named query
    Exec {
        /// Query name (template file without .sql)
        name: String,

        /// Parameters as key=value
        #[arg(short, long = "param")]
        params: Vec<String>,

        /// Output format
        #[arg(short, long, value_enum, default_value = "table")]
        format: OutputFormat,

        /// Run the query this many times (later runs may be cache hits)
        #[arg(long, default_value_t = 1)]
        repeat: usize,
    },
    /// Show the rendered SQL and binds without executing
    Render {
        name: String,
        #[arg(short, long = "param")]
        params: Vec<String>,
    },
    /// Show the cache key for a query invocation
    Key {
        name: String,
        #[arg(short, long = "param")]
        params: Vec<String>,
    },
    /// Run several named queries in one transaction
    Tx {
        /// Query names, executed in order
        #[arg(required = true)]
        names: Vec<String>,

        /// Parameters shared by every query
        #[arg(short, long = "param")]
        params: Vec<String>,

        /// Roll back instead of committing
        #[arg(long)]
        rollback: bool,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}

fn parse_params(raw: &[String]) -> anyhow::Result<Params> {
    let mut params = Params::new();
    for pair in raw {
        let Some((key, value)) = pair.split_once('=') else {
            bail!("parameter '{}' is not key=value", pair);
        };
        params.insert(key.trim().to_string(), SqlqValue::parse(value));
    }
    Ok(params)
}

fn load_config(cli: &Cli) -> anyhow::Result<Config> {
    let mut config = Config::load(cli.config.as_deref()).context("loading configuration")?;
    if let Some(url) = &cli.database_url {
        config.database_url = url.clone();
    }
    if let Some(dir) = &cli.sql_dir {
        config.sql_directory = dir.clone();
    }
    if cli.verbose {
        config.log.queries = true;
        config.log.results = true;
    }
    Ok(config)
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = load_config(&cli)?;
    let verbose = cli.verbose;

    match &cli.command {
        Commands::Key { name, params } => {
            let params = parse_params(params)?;
            println!("{}", cache_key(name, &params));
            Ok(())
        }
        Commands::Render { name, params } => {
            let params = parse_params(params)?;
            let db = SqlqDB::connect(config)?;
            let rendered = db.render(name, &params)?;
            println!("{}", "Rendered SQL:".green().bold());
            println!("{}", rendered.sql.white());
            if !rendered.binds.is_empty() {
                println!();
                println!("{}", "Bindings:".cyan());
                for (i, b) in rendered.binds.iter().enumerate() {
                    println!("  ${} = {}", i + 1, b.to_string().yellow());
                }
            }
            Ok(())
        }
        Commands::Exec {
            name,
            params,
            format,
            repeat,
        } => {
            let params = parse_params(params)?;
            let db = connect(config, verbose)?;
            let mut rows = Vec::new();
            for _ in 0..(*repeat).max(1) {
                rows = db.execute(name, &params, true, None).await?;
            }
            format_output(&rows, format);
            if *repeat > 1 {
                if let CacheReport::Stats(stats) = db.cache_command("stats")? {
                    println!(
                        "{} {} hits, {} misses ({:.0}%)",
                        "Cache:".dimmed(),
                        stats.hits,
                        stats.misses,
                        stats.hit_rate()
                    );
                }
            }
            db.exit().await;
            Ok(())
        }
        Commands::Tx {
            names,
            params,
            rollback,
        } => {
            let params = parse_params(params)?;
            let db = connect(config, verbose)?;
            let mut tx = db.begin_transaction(true).await?;

            for name in names {
                match db.execute(name, &params, true, tx.as_mut()).await {
                    Ok(rows) => {
                        println!("{} {}", "▶".cyan(), name.white().bold());
                        format_output(&rows, &OutputFormat::Table);
                    }
                    Err(e) => {
                        db.rollback_transaction(tx, false).await?;
                        db.exit().await;
                        return Err(e).with_context(|| format!("query '{}'", name));
                    }
                }
            }

            if *rollback {
                db.rollback_transaction(tx, true).await?;
                println!("{} rolled back", "↺".yellow());
            } else {
                db.commit_transaction(tx, true).await?;
                println!("{} committed", "✓".green());
            }
            db.exit().await;
            Ok(())
        }
    }
}

fn connect(config: Config, verbose: bool) -> anyhow::Result<SqlqDB> {
    let db = SqlqDB::connect(config).context("initialising sqlq")?;
    Ok(if verbose {
        db.with_reporter(|err, message| match err {
            Some(e) => eprintln!("{} {} ({})", "•".red(), message.dimmed(), e),
            None => eprintln!("{} {}", "•".dimmed(), message.dimmed()),
        })
    } else {
        db
    })
}

fn format_output(results: &[Row], format: &OutputFormat) {
    if results.is_empty() {
        println!("{}", "(no results)".dimmed());
        return;
    }

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(results).unwrap_or_default());
        }
        OutputFormat::Table => {
            let mut columns: Vec<&String> = results[0].keys().collect();
            columns.sort();

            let mut widths: HashMap<&String, usize> = columns.iter().map(|c| (*c, c.len())).collect();
            for row in results {
                for (col, val) in row {
                    let len = val_to_string(val).chars().count();
                    if let Some(w) = widths.get_mut(col) {
                        *w = (*w).max(len);
                    }
                }
            }

            let header: Vec<String> = columns
                .iter()
                .map(|c| format!("{:width$}", c, width = widths[*c]))
                .collect();
            println!("{}", header.join(" │ ").white().bold());

            let sep: Vec<String> = columns.iter().map(|c| "─".repeat(widths[*c])).collect();
            println!("{}", sep.join("─┼─").dimmed());

            for row in results {
                let cells: Vec<String> = columns
                    .iter()
                    .map(|c| {
                        let val = row.get(*c).map(val_to_string).unwrap_or_default();
                        format!("{:width$}", val, width = widths[*c])
                    })
                    .collect();
                println!("{}", cells.join(" │ "));
            }

            println!();
            println!("{} row(s) returned", results.len().to_string().cyan());
        }
    }
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
