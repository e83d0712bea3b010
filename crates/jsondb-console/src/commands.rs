use jsondb_core::query::Predicate;
use jsondb_core::types::DocId;
use serde_json::Value;

/// A parsed console command.
#[derive(Debug)]
pub enum Command {
    ListTables,
    CreateTable {
        name: String,
        primary: Vec<String>,
    },
    Add {
        table: String,
        document: Value,
    },
    AddKey {
        table: String,
        field: String,
    },
    All {
        table: String,
    },
    Get {
        table: String,
        id: DocId,
    },
    Search {
        table: String,
        filter: Predicate,
    },
    Update {
        table: String,
        filter: Predicate,
        changes: Value,
    },
    Delete {
        table: String,
        filter: Predicate,
    },
    Reset {
        table: String,
    },
    DropTable {
        name: String,
    },
    DropDatabase,
}

/// Declared type of one `FIELD:VALUE:TYPE` record item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    Str,
    Int,
    Float,
    Bool,
    Null,
    Json,
}
