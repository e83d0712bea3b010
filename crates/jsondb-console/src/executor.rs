use jsondb_core::api::JsonDatabase;
use jsondb_core::error::Error;
use jsondb_core::types::{DocId, Document};
use serde_json::Value;
use tracing::debug;

use crate::commands::Command;

/// Structured result from executing a command.
pub enum CommandResult {
    /// Mutation succeeded (create, key, reset, drops).
    Ok(String),
    /// Document inserted under this id.
    Inserted { table: String, id: DocId },
    /// Single document (get).
    Item(Option<Document>),
    /// Documents in stored order (all, search).
    Documents(Vec<Document>),
    /// Ids affected by an update or delete.
    Affected { action: &'static str, ids: Vec<DocId> },
    /// Table list.
    TableList(Vec<String>),
}

/// Execute a parsed command against the database.
///
/// Takes the database by value: `drop-database` consumes it.
pub fn execute(db: JsonDatabase, cmd: Command) -> Result<CommandResult, Error> {
    debug!(command = ?cmd, "executing");
    match cmd {
        Command::ListTables => Ok(CommandResult::TableList(db.table_names())),
        Command::CreateTable { name, primary } => exec_create_table(&db, &name, &primary),
        Command::Add { table, document } => exec_add(&db, table, document),
        Command::AddKey { table, field } => {
            db.table(&table)?;
            db.add_key(&table, &field)?;
            Ok(CommandResult::Ok(format!("Key '{field}' added to table '{table}'.")))
        }
        Command::All { table } => Ok(CommandResult::Documents(db.get_table(&table)?.get_all()?)),
        Command::Get { table, id } => Ok(CommandResult::Item(db.get_table(&table)?.get(id)?)),
        Command::Search { table, filter } => {
            Ok(CommandResult::Documents(db.get_table(&table)?.search(&filter)?))
        }
        Command::Update {
            table,
            filter,
            changes,
        } => exec_update(&db, &table, changes, &filter),
        Command::Delete { table, filter } => {
            let ids = db.get_table(&table)?.delete(&filter)?;
            Ok(CommandResult::Affected {
                action: "deleted",
                ids,
            })
        }
        Command::Reset { table } => {
            db.get_table(&table)?.reset()?;
            Ok(CommandResult::Ok(format!("Table '{table}' reset.")))
        }
        Command::DropTable { name } => {
            db.drop_table(&name)?;
            Ok(CommandResult::Ok(format!("Table '{name}' dropped.")))
        }
        Command::DropDatabase => {
            let path = db.path().display().to_string();
            db.destroy()?;
            Ok(CommandResult::Ok(format!("Database '{path}' dropped.")))
        }
    }
}

fn exec_create_table(db: &JsonDatabase, name: &str, primary: &[String]) -> Result<CommandResult, Error> {
    let keys: Vec<&str> = primary.iter().map(String::as_str).collect();
    let table = db.table_with_keys(name, &keys)?;
    let keys = table.keys();
    let msg = if keys.is_empty() {
        format!("Table '{name}' ready.")
    } else {
        format!("Table '{name}' ready (primary: {}).", keys.join(", "))
    };
    Ok(CommandResult::Ok(msg))
}

fn exec_add(db: &JsonDatabase, table: String, document: Value) -> Result<CommandResult, Error> {
    let id = db.table(&table)?.add(document)?;
    Ok(CommandResult::Inserted { table, id })
}

fn exec_update(
    db: &JsonDatabase,
    table: &str,
    changes: Value,
    filter: &jsondb_core::query::Predicate,
) -> Result<CommandResult, Error> {
    let ids = db.get_table(table)?.update(changes, filter)?;
    Ok(CommandResult::Affected {
        action: "updated",
        ids,
    })
}
