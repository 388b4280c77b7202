/// Query Execution Module
///
/// Runs one SQL statement on a connection and normalizes the outcome into a
/// `QueryResult`. Also classifies statements as read- or write-class, converts
/// bound parameters and validates the identifiers that have to be spliced
/// into SQL text (savepoints, pragmas, table names).
use crate::core::db::result::{QueryResult, ResultBuilder};
use crate::core::{ColdQueryError, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use rusqlite::types::Value as SqlValue;
use rusqlite::{params_from_iter, Connection};
use serde_json::Value;
use sqlparser::ast::Statement;
use sqlparser::dialect::SQLiteDialect;
use sqlparser::parser::Parser;
use tracing::debug;

static IDENTIFIER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]{0,62}$").expect("identifier pattern is valid"));

static DML_KEYWORD: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(INSERT|UPDATE|DELETE|REPLACE)\b").expect("dml pattern is valid")
});

/// Pragmas whose argument only selects what they report on
const REPORTING_PRAGMAS: &[&str] = &[
    "TABLE_INFO",
    "TABLE_XINFO",
    "TABLE_LIST",
    "INDEX_INFO",
    "INDEX_XINFO",
    "INDEX_LIST",
    "FOREIGN_KEY_LIST",
    "FOREIGN_KEY_CHECK",
    "INTEGRITY_CHECK",
    "QUICK_CHECK",
];

/// Pragmas that act on the database even without an argument
const ACTING_PRAGMAS: &[&str] = &["OPTIMIZE", "WAL_CHECKPOINT", "INCREMENTAL_VACUUM", "SHRINK_MEMORY"];

/// Classifies `PRAGMA [schema.]name ...` by its bare name and what follows it.
/// Expects upper-cased text starting at the PRAGMA keyword.
fn classify_pragma(sql_upper: &str) -> StatementType {
    let body = sql_upper.get("PRAGMA".len()..).unwrap_or("").trim_start();
    let end = body
        .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_' || c == '.'))
        .unwrap_or(body.len());
    let name = body[..end].rsplit('.').next().unwrap_or("");
    let rest = body[end..].trim_start();

    let assigns = rest.starts_with('=') || (rest.starts_with('(') && !REPORTING_PRAGMAS.contains(&name));
    if assigns || ACTING_PRAGMAS.contains(&name) {
        StatementType::PragmaWrite
    } else {
        StatementType::PragmaRead
    }
}

/// Represents different SQL statement types for introspection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementType {
    Select,
    /// Common table expression; may wrap DML
    With,
    Insert,
    Update,
    Delete,
    Replace,
    Create,
    Drop,
    Alter,
    Explain,
    /// PRAGMA without an assignment
    PragmaRead,
    /// PRAGMA that assigns, in either `= value` or `(value)` form, or acts
    PragmaWrite,
    /// VACUUM, ANALYZE, REINDEX
    Maintenance,
    /// BEGIN/COMMIT/ROLLBACK/SAVEPOINT/RELEASE/END
    Transaction,
    Other,
}

impl StatementType {
    /// Determines the statement type from the leading keyword of a SQL string
    pub fn from_sql(sql: &str) -> Self {
        let sql_upper = sql.trim_start().to_uppercase();
        let keyword = sql_upper
            .split(|c: char| !c.is_ascii_alphabetic())
            .next()
            .unwrap_or("");

        match keyword {
            "SELECT" | "VALUES" => StatementType::Select,
            "WITH" => StatementType::With,
            "INSERT" => StatementType::Insert,
            "UPDATE" => StatementType::Update,
            "DELETE" => StatementType::Delete,
            "REPLACE" => StatementType::Replace,
            "CREATE" => StatementType::Create,
            "DROP" => StatementType::Drop,
            "ALTER" => StatementType::Alter,
            "EXPLAIN" => StatementType::Explain,
            "PRAGMA" => classify_pragma(&sql_upper),
            "VACUUM" | "ANALYZE" | "REINDEX" => StatementType::Maintenance,
            "BEGIN" | "COMMIT" | "ROLLBACK" | "SAVEPOINT" | "RELEASE" | "END" => {
                StatementType::Transaction
            }
            _ => StatementType::Other,
        }
    }

    /// Whether the statement reports an affected-row count
    pub fn is_dml(self) -> bool {
        matches!(
            self,
            StatementType::Insert | StatementType::Update | StatementType::Delete | StatementType::Replace
        )
    }

    /// Keyword-level guess at whether the statement can mutate anything
    fn is_write(self, sql: &str) -> bool {
        match self {
            StatementType::Select | StatementType::Explain | StatementType::PragmaRead => false,
            StatementType::With => DML_KEYWORD.is_match(sql),
            _ => true,
        }
    }
}

/// Returns true when the statement may mutate data or schema.
///
/// The leading keyword decides first. Texts that look like queries are also
/// run through the SQL parser so that a trailing statement smuggled after a
/// SELECT still counts as a write.
pub fn is_write_statement(sql: &str) -> bool {
    let statement_type = StatementType::from_sql(sql);
    if statement_type.is_write(sql) {
        return true;
    }
    match statement_type {
        StatementType::Select | StatementType::With => match Parser::parse_sql(&SQLiteDialect {}, sql) {
            Ok(statements) => statements.iter().any(|s| !matches!(s, Statement::Query(_))),
            Err(_) => false,
        },
        _ => false,
    }
}

/// Rejects empty statement text.
pub(crate) fn require_sql(sql: &str) -> Result<String> {
    if sql.trim().is_empty() {
        return Err(ColdQueryError::Validation(
            "Cannot execute empty SQL statement - please provide a valid SQL statement".to_string(),
        ));
    }
    Ok(sql.to_string())
}

/// Converts positional JSON parameters into SQLite values.
///
/// Arrays and objects are bound as their JSON text, booleans as 0/1.
pub(crate) fn bind_params(params: &[Value]) -> Result<Vec<SqlValue>> {
    params
        .iter()
        .enumerate()
        .map(|(i, value)| match value {
            Value::Null => Ok(SqlValue::Null),
            Value::Bool(b) => Ok(SqlValue::Integer(i64::from(*b))),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Ok(SqlValue::Integer(i))
                } else if n.is_u64() {
                    Err(ColdQueryError::Validation(format!(
                        "parameter ${} is out of range for a 64-bit integer",
                        i + 1
                    )))
                } else {
                    n.as_f64().map(SqlValue::Real).ok_or_else(|| {
                        ColdQueryError::Validation(format!("parameter ${} is not a finite number", i + 1))
                    })
                }
            }
            Value::String(s) => Ok(SqlValue::Text(s.clone())),
            Value::Array(_) | Value::Object(_) => Ok(SqlValue::Text(value.to_string())),
        })
        .collect()
}

/// Prepares, binds and steps a single statement to completion.
pub(crate) fn run_statement(conn: &Connection, sql: &str, params: &[SqlValue]) -> Result<QueryResult> {
    let statement_type = StatementType::from_sql(sql);
    debug!(?statement_type, params = params.len(), "executing statement");

    let mut stmt = conn.prepare(sql)?;
    let columns: Vec<(String, Option<String>)> = stmt
        .columns()
        .iter()
        .map(|c| (c.name().to_string(), c.decl_type().map(str::to_string)))
        .collect();

    if columns.is_empty() {
        let changed = stmt.execute(params_from_iter(params.iter()))?;
        let row_count = if statement_type.is_dml() { changed as u64 } else { 0 };
        return Ok(QueryResult::affected(row_count));
    }

    let mut builder = ResultBuilder::new(columns);
    let mut rows = stmt.query(params_from_iter(params.iter()))?;
    while let Some(row) = rows.next()? {
        builder.push_row(row)?;
    }
    Ok(builder.finish(None))
}

/// Rolls back a transaction left open on a connection.
///
/// Returns true when there was something to roll back.
pub(crate) fn reset_transaction(conn: &Connection) -> Result<bool> {
    if conn.is_autocommit() {
        return Ok(false);
    }
    conn.execute_batch("ROLLBACK")?;
    Ok(true)
}

/// Checks that `name` is a plain SQL identifier.
pub fn validate_identifier(what: &str, name: &str) -> Result<()> {
    if IDENTIFIER.is_match(name) {
        Ok(())
    } else {
        Err(ColdQueryError::Validation(format!(
            "invalid {} name '{}': expected letters, digits and underscores, starting with a letter or underscore",
            what, name
        )))
    }
}

/// Validates and double-quotes an identifier for inclusion in SQL text.
pub fn quote_identifier(what: &str, name: &str) -> Result<String> {
    validate_identifier(what, name)?;
    Ok(format!("\"{}\"", name))
}
