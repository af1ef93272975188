//! micro-config CLI
//!
//! Entry point for the `micro-config` command-line tool, which reads and
//! writes the local config document on behalf of the user.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{ArgAction, Parser, Subcommand};
use micro_config::{split_key, Store, StorePaths};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "micro-config")]
#[command(about = "Manage the local micro config file", version)]
struct Cli {
    /// Directory holding the .micro file (default: home directory)
    #[arg(long, global = true, conflicts_with = "file")]
    home: Option<PathBuf>,

    /// Path to the config file, overriding the .micro location
    #[arg(long, short = 'f', global = true)]
    file: Option<PathBuf>,

    /// More log output (-v for debug, -vv for trace)
    #[arg(long, short = 'v', action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Get a value; micro-config get db.password
    Get {
        /// Dotted key
        key: String,
    },

    /// Set a value; micro-config set db.password secret
    Set {
        /// Dotted key
        key: String,

        /// Value to store
        value: String,
    },

    /// Delete a value or subtree; micro-config del db
    Del {
        /// Dotted key
        key: String,
    },

    /// Print the whole config document as JSON
    Dump,

    /// Print diagnostics recorded while opening the config
    Errors,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let paths = match (cli.home, cli.file) {
        (_, Some(file)) => Some(StorePaths::for_file(file)),
        (Some(home), None) => Some(StorePaths::in_dir(home)),
        (None, None) => None,
    };
    let mut store = match paths {
        Some(paths) => Store::open(paths),
        None => Store::open_default(),
    };

    match cli.command {
        Commands::Get { key } => run_get(&store, &key),
        Commands::Set { key, value } => run_set(&mut store, &key, &value),
        Commands::Del { key } => run_del(&mut store, &key),
        Commands::Dump => run_dump(&store),
        Commands::Errors => run_errors(&store),
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn run_get(store: &Store, key: &str) -> ExitCode {
    let path = match split_key(key) {
        Ok(path) => path,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match store.get(&path) {
        Ok(value) if value.is_empty() => {
            println!("not found");
            ExitCode::FAILURE
        }
        Ok(value) => {
            println!("{}", value);
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Error reading {}: {}", key, e);
            ExitCode::FAILURE
        }
    }
}

fn run_set(store: &mut Store, key: &str, value: &str) -> ExitCode {
    let path = match split_key(key) {
        Ok(path) => path,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match store.set(value, &path) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error setting {}: {}", key, e);
            ExitCode::FAILURE
        }
    }
}

fn run_del(store: &mut Store, key: &str) -> ExitCode {
    let path = match split_key(key) {
        Ok(path) => path,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match store.delete(&path) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => {
            println!("not found");
            ExitCode::FAILURE
        }
        Err(e) => {
            eprintln!("Error deleting {}: {}", key, e);
            ExitCode::FAILURE
        }
    }
}

fn run_dump(store: &Store) -> ExitCode {
    match serde_json::to_string_pretty(&store.tree().as_value()) {
        Ok(json) => {
            println!("{}", json);
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Error serializing config: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run_errors(store: &Store) -> ExitCode {
    for message in store.errors() {
        println!("{}", message);
    }
    ExitCode::SUCCESS
}
