use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand};
use jsondb_core::api::JsonDatabase;
use jsondb_core::storage::{StoreOptions, WriteMode};
use tracing_subscriber::EnvFilter;

mod commands;
mod display;
mod executor;
mod parser;

use commands::Command;
use display::OutputMode;

/// jsondb console: scriptable CLI for single-file JSON document stores.
#[derive(Parser, Debug)]
#[command(name = "jsondb", version)]
struct Cli {
    /// Path to the database JSON file (created if missing).
    #[arg(long)]
    path: PathBuf,

    /// Output results as machine-parseable JSON.
    #[arg(short, long)]
    json: bool,

    /// Write the file through a temporary file and rename.
    #[arg(long)]
    atomic: bool,

    /// Log filter (overrides RUST_LOG), e.g. `debug` or `jsondb_core=debug`.
    #[arg(long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Subcommand, Debug)]
enum CliCommand {
    /// List table names.
    Tables,
    /// Create a table, or get it if it already exists.
    Create {
        table: String,
        /// Primary-key fields of a new table.
        #[arg(long, num_args = 1..)]
        primary: Vec<String>,
    },
    /// Insert one document built from FIELD:VALUE:TYPE items.
    Add {
        table: String,
        #[arg(required = true)]
        fields: Vec<String>,
    },
    /// Register a primary-key field.
    Key { table: String, field: String },
    /// Print every document of a table.
    All { table: String },
    /// Print one document by id.
    Get { table: String, id: u64 },
    /// Print documents matching a query expression.
    Search {
        table: String,
        #[arg(required = true, allow_hyphen_values = true)]
        expr: Vec<String>,
    },
    /// Merge FIELD:VALUE:TYPE items into every matching document.
    Update {
        table: String,
        /// Query expression selecting the documents to update.
        #[arg(long = "where", allow_hyphen_values = true)]
        filter: String,
        #[arg(required = true)]
        fields: Vec<String>,
    },
    /// Delete documents matching a query expression.
    Delete {
        table: String,
        #[arg(required = true, allow_hyphen_values = true)]
        expr: Vec<String>,
    },
    /// Remove every document of a table.
    Reset { table: String },
    /// Drop one table.
    DropTable { table: String },
    /// Delete the database file.
    DropDatabase,
}

impl CliCommand {
    fn into_command(self) -> Result<Command, String> {
        let cmd = match self {
            CliCommand::Tables => Command::ListTables,
            CliCommand::Create { table, primary } => Command::CreateTable {
                name: table,
                primary,
            },
            CliCommand::Add { table, fields } => Command::Add {
                table,
                document: parser::parse_record(&fields)?,
            },
            CliCommand::Key { table, field } => Command::AddKey { table, field },
            CliCommand::All { table } => Command::All { table },
            CliCommand::Get { table, id } => Command::Get { table, id },
            CliCommand::Search { table, expr } => Command::Search {
                table,
                filter: parser::parse_query(&expr.join(" "))?,
            },
            CliCommand::Update {
                table,
                filter,
                fields,
            } => Command::Update {
                table,
                filter: parser::parse_query(&filter)?,
                changes: parser::parse_record(&fields)?,
            },
            CliCommand::Delete { table, expr } => Command::Delete {
                table,
                filter: parser::parse_query(&expr.join(" "))?,
            },
            CliCommand::Reset { table } => Command::Reset { table },
            CliCommand::DropTable { table } => Command::DropTable { name: table },
            CliCommand::DropDatabase => Command::DropDatabase,
        };
        Ok(cmd)
    }
}

fn init_logging(level: Option<&str>) {
    let filter = match level {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Parse, open, execute and render one command.
///
/// Returns exit code: 0 = success, 1 = any error.
fn run(cli: Cli) -> i32 {
    let mode = if cli.json {
        OutputMode::Json
    } else {
        OutputMode::Pretty
    };

    let cmd = match cli.command.into_command() {
        Ok(cmd) => cmd,
        Err(e) => {
            display::render_error(&e, &mode);
            return 1;
        }
    };

    let options = StoreOptions {
        write_mode: if cli.atomic {
            WriteMode::Atomic
        } else {
            WriteMode::Overwrite
        },
        ..StoreOptions::default()
    };
    let db = match JsonDatabase::open_with(&cli.path, options) {
        Ok(db) => db,
        Err(e) => {
            display::render_error(&e, &mode);
            return 1;
        }
    };

    match executor::execute(db, cmd) {
        Ok(result) => {
            display::render(&result, &mode);
            0
        }
        Err(e) => {
            display::render_error(&e, &mode);
            1
        }
    }
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.log_level.as_deref());
    process::exit(run(cli));
}
