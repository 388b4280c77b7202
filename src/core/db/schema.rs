/// Schema Introspection Module
///
/// Lists catalog objects and describes tables through SQLite's pragma
/// table-valued functions. Everything runs through a `QueryExecutor`, so a
/// session sees its own uncommitted DDL while the pool sees committed state.
use crate::core::db::result::QueryResult;
use crate::core::executor::QueryExecutor;
use crate::core::{ColdQueryError, Result};
use serde::Serialize;
use serde_json::{json, Map, Value};

pub const DEFAULT_LIST_LIMIT: u64 = 100;

/// Kind of catalog object a listing is restricted to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectKind {
    Table,
    View,
    Index,
    Trigger,
}

impl ObjectKind {
    /// Parses a listing target; absent means tables.
    pub fn parse(target: Option<&str>) -> Result<Self> {
        match target.map(|t| t.trim().to_ascii_lowercase()).as_deref() {
            None | Some("table") | Some("tables") => Ok(ObjectKind::Table),
            Some("view") | Some("views") => Ok(ObjectKind::View),
            Some("index") | Some("indexes") => Ok(ObjectKind::Index),
            Some("trigger") | Some("triggers") => Ok(ObjectKind::Trigger),
            Some(other) => Err(ColdQueryError::Validation(format!(
                "unknown schema target '{}': expected table, view, index or trigger",
                other
            ))),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ObjectKind::Table => "table",
            ObjectKind::View => "view",
            ObjectKind::Index => "index",
            ObjectKind::Trigger => "trigger",
        }
    }
}

/// Represents a foreign key relationship
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ForeignKey {
    /// The table this foreign key references
    pub referenced_table: String,
    /// The column in this table that is the foreign key
    pub from_column: String,
    /// The referenced column; absent when the key targets the primary key implicitly
    pub to_column: Option<String>,
}

/// Represents a table column with its metadata
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Column {
    pub name: String,
    /// Declared type, empty when the column has none
    pub type_name: String,
    pub notnull: bool,
    pub pk: bool,
    /// Default value expression (if any)
    pub dflt_value: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Index {
    pub name: String,
    pub unique: bool,
    pub columns: Vec<String>,
}

/// Structure of one table
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Table {
    #[serde(rename = "table")]
    pub name: String,
    pub columns: Vec<Column>,
    pub indexes: Vec<Index>,
    pub foreign_keys: Vec<ForeignKey>,
}

fn text(row: &Map<String, Value>, key: &str) -> String {
    match row.get(key) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    }
}

fn optional_text(row: &Map<String, Value>, key: &str) -> Option<String> {
    match row.get(key) {
        Some(Value::Null) | None => None,
        Some(_) => Some(text(row, key)),
    }
}

fn flag(row: &Map<String, Value>, key: &str) -> bool {
    row.get(key).and_then(Value::as_i64).map_or(false, |v| v != 0)
}

/// Lists user objects of one kind, paginated, ordered by name.
pub async fn list_objects<E>(executor: &E, kind: ObjectKind, limit: u64, offset: u64) -> Result<QueryResult>
where
    E: QueryExecutor + ?Sized,
{
    let limit = i64::try_from(limit).map_err(|_| ColdQueryError::Validation("limit is too large".to_string()))?;
    let offset = i64::try_from(offset).map_err(|_| ColdQueryError::Validation("offset is too large".to_string()))?;
    executor
        .execute(
            "SELECT name, type, tbl_name FROM sqlite_master \
             WHERE type = ?1 AND name NOT LIKE 'sqlite_%' \
             ORDER BY name LIMIT ?2 OFFSET ?3",
            &[json!(kind.as_str()), json!(limit), json!(offset)],
            None,
        )
        .await
}

/// Describes the columns, indexes and foreign keys of a table or view.
pub async fn describe_table<E>(executor: &E, table_name: &str) -> Result<Table>
where
    E: QueryExecutor + ?Sized,
{
    let name = [json!(table_name)];

    let columns: Vec<Column> = executor
        .execute("SELECT * FROM pragma_table_info(?1) ORDER BY cid", &name, None)
        .await?
        .rows()
        .iter()
        .map(|row| Column {
            name: text(row, "name"),
            type_name: text(row, "type"),
            notnull: flag(row, "notnull"),
            pk: row.get("pk").and_then(Value::as_i64).map_or(false, |v| v > 0),
            dflt_value: optional_text(row, "dflt_value"),
        })
        .collect();
    if columns.is_empty() {
        return Err(ColdQueryError::Validation(format!("table '{}' does not exist", table_name)));
    }

    let index_rows = executor
        .execute("SELECT name, \"unique\" FROM pragma_index_list(?1) ORDER BY name", &name, None)
        .await?;
    let mut indexes = Vec::with_capacity(index_rows.rows().len());
    for row in index_rows.rows() {
        let index_name = text(row, "name");
        let info = executor
            .execute(
                "SELECT name FROM pragma_index_info(?1) ORDER BY seqno",
                &[json!(index_name)],
                None,
            )
            .await?;
        indexes.push(Index {
            columns: info.rows().iter().map(|r| text(r, "name")).collect(),
            unique: flag(row, "unique"),
            name: index_name,
        });
    }

    let foreign_keys = executor
        .execute(
            "SELECT \"table\", \"from\", \"to\" FROM pragma_foreign_key_list(?1) ORDER BY id, seq",
            &name,
            None,
        )
        .await?
        .rows()
        .iter()
        .map(|row| ForeignKey {
            referenced_table: text(row, "table"),
            from_column: text(row, "from"),
            to_column: optional_text(row, "to"),
        })
        .collect();

    Ok(Table {
        name: table_name.to_string(),
        columns,
        indexes,
        foreign_keys,
    })
}
