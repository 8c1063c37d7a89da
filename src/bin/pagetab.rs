//! Thin CLI front-end over the `pagetab` library: dump a table to CSV,
//! list the tables (and indexes) in a database directory, or run a trie
//! search. All three subcommands are a few lines of plumbing over
//! `pagetab::table::Table`. The interesting logic lives in the library.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use itertools::Itertools;

use pagetab::record::FieldValue;
use pagetab::table::Table;
use pagetab::trie_index::SearchMode;

#[derive(Parser)]
#[command(name = "pagetab", about = "Inspect and query pagetab table stores", version)]
struct Cli {
    /// Database directory (holds one subdirectory per table).
    #[arg(long, global = true, default_value = ".")]
    db_dir: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write a table's records to stdout as CSV.
    Dump {
        table: String,
        /// First ordinal to dump (default 0).
        #[arg(short = 'f', long, default_value_t = 0)]
        from: usize,
        /// Number of rows to dump, starting at `-f`.
        #[arg(short = 'n', long, conflicts_with = "to")]
        n: Option<usize>,
        /// Last ordinal (exclusive) to dump.
        #[arg(short = 't', long, conflicts_with = "n")]
        to: Option<usize>,
    },
    /// List every table in the database directory, with record counts and
    /// any attribute indexes present.
    List,
    /// Search an attribute index and print matches as CSV.
    Search {
        /// Find keys that extend `value` (completions).
        #[arg(long, conflicts_with_all = ["prefixes", "exact"])]
        keys: bool,
        /// Find stored keys that are a prefix of `value`.
        #[arg(long, conflicts_with_all = ["keys", "exact"])]
        prefixes: bool,
        /// Find keys equal to `value` (the default mode).
        #[arg(long, conflicts_with_all = ["keys", "prefixes"])]
        exact: bool,
        table: String,
        attr: String,
        value: String,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> anyhow::Result<()> {
    env_logger::init();
    match &cli.command {
        Command::Dump { table, from, n, to } => cmd_dump(&cli.db_dir, table, *from, *n, *to),
        Command::List => cmd_list(&cli.db_dir),
        Command::Search { keys, prefixes, exact: _, table, attr, value } => {
            let mode = if *keys {
                SearchMode::CompletionsOfValue
            } else if *prefixes {
                SearchMode::PrefixesOfValue
            } else {
                SearchMode::Exact
            };
            cmd_search(&cli.db_dir, table, attr, value, mode)
        }
    }
}

fn cmd_dump(
    db_dir: &Path,
    table_name: &str,
    from: usize,
    n: Option<usize>,
    to: Option<usize>,
) -> anyhow::Result<()> {
    let table = Table::open(db_dir, table_name)?;
    let count = table.count();
    let end = match (n, to) {
        (Some(n), _) => from.saturating_add(n),
        (None, Some(to)) => to,
        (None, None) => count,
    }
    .min(count);

    let field_names: Vec<String> = table.fields().iter().map(|f| f.name.clone()).collect();
    let limit = end.saturating_sub(from);
    let rows = table.iterate(from, Some(limit)).map(|r| r.and_then(|rec| rec.to_map()));
    write_csv(std::io::stdout(), &field_names, rows)
}

fn cmd_list(db_dir: &Path) -> anyhow::Result<()> {
    let mut names: Vec<String> = std::fs::read_dir(db_dir)?
        .filter_map(|e| e.ok())
        .filter(|e| e.path().is_dir())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();

    for name in names {
        let dir = db_dir.join(&name);
        if !dir.join("config.json").exists() {
            continue;
        }
        let table = Table::open(db_dir, &name)?;
        println!("{name}\t{}", table.count());

        let mut indexes: Vec<String> = std::fs::read_dir(&dir)?
            .filter_map(|e| e.ok())
            .filter_map(|e| {
                let path = e.path();
                if path.extension().and_then(|s| s.to_str()) == Some("trie") {
                    path.file_stem().map(|s| s.to_string_lossy().into_owned())
                } else {
                    None
                }
            })
            .collect();
        indexes.sort();
        if !indexes.is_empty() {
            println!("  indexes: {}", indexes.iter().join(", "));
        }
    }
    Ok(())
}

fn cmd_search(
    db_dir: &Path,
    table_name: &str,
    attr: &str,
    value: &str,
    mode: SearchMode,
) -> anyhow::Result<()> {
    let table = Table::open(db_dir, table_name)?;
    let matches = table.search(attr, value, mode)?;
    let field_names: Vec<String> = table.fields().iter().map(|f| f.name.clone()).collect();
    let rows = matches.iter().map(|rec| rec.to_map());
    write_csv(std::io::stdout(), &field_names, rows)
}

fn write_csv<W, I>(writer: W, field_names: &[String], rows: I) -> anyhow::Result<()>
where
    W: std::io::Write,
    I: Iterator<Item = pagetab::Result<Vec<(String, FieldValue)>>>,
{
    let mut wtr = csv::Writer::from_writer(writer);
    wtr.write_record(field_names)?;
    for row in rows {
        let row = row?;
        let values: Vec<String> = row.into_iter().map(|(_, v)| v.to_string()).collect();
        wtr.write_record(&values)?;
    }
    wtr.flush()?;
    Ok(())
}
