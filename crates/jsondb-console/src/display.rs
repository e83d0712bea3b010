use jsondb_core::types::Document;
use serde_json::{json, Value};

use crate::executor::CommandResult;

/// Output mode for rendering command results.
pub enum OutputMode {
    /// Human-readable pretty-printed output.
    Pretty,
    /// Machine-parseable JSON (one JSON object per result on stdout).
    Json,
}

/// Render a command result to stdout in the given mode.
pub fn render(result: &CommandResult, mode: &OutputMode) {
    match mode {
        OutputMode::Pretty => render_pretty(result),
        OutputMode::Json => println!("{}", to_json(result)),
    }
}

/// Render an error in the given mode (always to stderr).
pub fn render_error(err: &dyn std::fmt::Display, mode: &OutputMode) {
    match mode {
        OutputMode::Pretty => eprintln!("Error: {err}"),
        OutputMode::Json => eprintln!("{}", json!({"error": err.to_string()})),
    }
}

fn render_pretty(result: &CommandResult) {
    match result {
        CommandResult::Ok(msg) => println!("{msg}"),
        CommandResult::Inserted { table, id } => println!("Inserted document {id} into '{table}'."),
        CommandResult::Item(Some(doc)) => print_document(doc),
        CommandResult::Item(None) => println!("Document not found."),
        CommandResult::Documents(docs) => {
            for doc in docs {
                print_document(doc);
            }
            println!("Returned {} document(s).", docs.len());
        }
        CommandResult::Affected { action, ids } => {
            if ids.is_empty() {
                println!("No documents {action}.");
            } else {
                let list: Vec<String> = ids.iter().map(|id| id.to_string()).collect();
                println!("{} document(s) {action}: {}", ids.len(), list.join(", "));
            }
        }
        CommandResult::TableList(tables) => {
            if tables.is_empty() {
                println!("No tables.");
            } else {
                for name in tables {
                    println!("{name}");
                }
            }
        }
    }
}

/// Pretty-print one document under its id.
fn print_document(doc: &Document) {
    match serde_json::to_string_pretty(doc) {
        Ok(s) => println!("[{}] {s}", doc.id()),
        Err(e) => eprintln!("Error formatting document {}: {e}", doc.id()),
    }
}

fn document_json(doc: &Document) -> Value {
    json!({"id": doc.id(), "document": doc})
}

/// The JSON-mode output object for a result.
pub fn to_json(result: &CommandResult) -> Value {
    match result {
        CommandResult::Ok(msg) => json!({"ok": true, "message": msg}),
        CommandResult::Inserted { table, id } => json!({"ok": true, "table": table, "id": id}),
        CommandResult::Item(Some(doc)) => json!({"found": true, "item": document_json(doc)}),
        CommandResult::Item(None) => json!({"found": false}),
        CommandResult::Documents(docs) => json!({
            "items": docs.iter().map(document_json).collect::<Vec<_>>(),
            "count": docs.len(),
        }),
        CommandResult::Affected { action, ids } => {
            let mut out = json!({"ok": true});
            out[*action] = json!(ids);
            out
        }
        CommandResult::TableList(tables) => json!({"tables": tables}),
    }
}
