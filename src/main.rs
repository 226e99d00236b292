// Main entry point for the MiniSQL CLI
// This provides an interactive shell to query a directory of CSV tables

use anyhow::Result;
use clap::{Parser as ClapParser, ValueEnum};
use minisql::{CsvTableSource, QueryExecutor, ResultSet};
use std::io::{self, Write};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// MiniSQL - SELECT queries over CSV files
#[derive(ClapParser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Directory holding one `<table>.csv` file per table
    #[arg(short, long, default_value = ".")]
    data_dir: PathBuf,

    /// Execute a single SQL query and exit
    #[arg(short, long)]
    execute: Option<String>,

    /// How results are printed
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Table)]
    format: OutputFormat,

    /// Log every execution stage (same as RUST_LOG=debug)
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    let executor = QueryExecutor::new(CsvTableSource::new(args.data_dir.clone()));

    // If a query was provided, execute it and exit
    if let Some(sql) = args.execute {
        return execute_query(&executor, &sql, args.format).await;
    }

    // Interactive REPL (Read-Eval-Print Loop)
    println!("MiniSQL interactive shell");
    println!("Reading tables from {}", args.data_dir.display());
    println!("Type SQL queries or '.help' for help");
    println!("Type '.exit' to quit");
    println!();

    repl(&executor, args.format).await
}

/// Read queries from stdin until `.exit` or end of input
async fn repl(executor: &QueryExecutor<CsvTableSource>, format: OutputFormat) -> Result<()> {
    let stdin = io::stdin();
    let mut stdout = io::stdout();

    loop {
        print!("minisql> ");
        stdout.flush()?;

        let mut input = String::new();
        if stdin.read_line(&mut input)? == 0 {
            // EOF
            println!();
            break;
        }

        let input = input.trim();
        if input.is_empty() {
            continue;
        }

        // Handle special commands (starting with .)
        if input.starts_with('.') {
            match input {
                ".exit" | ".quit" => {
                    println!("Goodbye!");
                    break;
                }
                ".help" => {
                    print_help();
                    continue;
                }
                _ => {
                    println!("Unknown command: {}", input);
                    println!("Type '.help' for help");
                    continue;
                }
            }
        }

        if let Err(e) = execute_query(executor, input, format).await {
            eprintln!("Error: {}", e);
        }
    }

    Ok(())
}

async fn execute_query(
    executor: &QueryExecutor<CsvTableSource>,
    sql: &str,
    format: OutputFormat,
) -> Result<()> {
    let rows = executor.execute(sql).await?;
    let result = ResultSet::new(rows);
    match format {
        OutputFormat::Table => println!("{}", result.format()),
        OutputFormat::Json => println!("{}", result.to_json()?),
    }
    Ok(())
}

fn print_help() {
    println!("Special Commands:");
    println!("  .help              Show this help message");
    println!("  .exit, .quit       Exit the shell");
    println!();
    println!("Queries:");
    println!("  SELECT name, age FROM student WHERE age > 21");
    println!("  SELECT * FROM student");
    println!("  SELECT student.name, enrollment.course FROM student");
    println!("    INNER JOIN enrollment ON student.id = enrollment.student_id");
    println!("  SELECT course, COUNT(*) FROM enrollment GROUP BY course");
    println!();
    println!("Notes:");
    println!("  - Each table is read from <data-dir>/<table>.csv");
    println!("  - Joins: INNER, LEFT and RIGHT");
    println!("  - Aggregates: COUNT, SUM, AVG, MIN, MAX");
    println!("  - OR in WHERE is treated as AND");
    println!();
}
