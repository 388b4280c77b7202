/// Result Model
///
/// Every statement outcome, whether rows, an affected-row count or nothing
/// at all, is normalized into one `QueryResult`. Row mappings keep the
/// column order of the statement, and scalars are converted so that integers
/// and text survive JSON serialization unchanged.
use rusqlite::types::ValueRef;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};
use std::collections::HashSet;
use std::fmt::Write as _;

/// Column descriptor: name plus declared type (if the engine or the data knows one)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDescriptor {
    pub name: String,
    pub data_type: Option<String>,
}

impl FieldDescriptor {
    pub fn new(name: impl Into<String>, data_type: Option<&str>) -> Self {
        FieldDescriptor {
            name: name.into(),
            data_type: data_type.map(str::to_string),
        }
    }
}

/// Canonical outcome of one statement. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    rows: Vec<Map<String, Value>>,
    row_count: u64,
    fields: Vec<FieldDescriptor>,
}

impl QueryResult {
    /// Builds a result from positional row values.
    ///
    /// Each row is keyed by the field names, in field order. A repeated name
    /// gets a `:n` suffix in both the field and the row key, so no value is
    /// shadowed. Missing trailing values become `null`, surplus values are
    /// ignored.
    pub fn new(mut fields: Vec<FieldDescriptor>, rows: Vec<Vec<Value>>, row_count: u64) -> Self {
        distinct_names(&mut fields);
        let rows = rows
            .into_iter()
            .map(|values| {
                let mut values = values.into_iter();
                fields
                    .iter()
                    .map(|field| (field.name.clone(), values.next().unwrap_or(Value::Null)))
                    .collect::<Map<String, Value>>()
            })
            .collect();
        QueryResult {
            rows,
            row_count,
            fields,
        }
    }

    /// Result of a statement that returned no rows.
    pub fn affected(row_count: u64) -> Self {
        QueryResult {
            rows: Vec::new(),
            row_count,
            fields: Vec::new(),
        }
    }

    /// Convenience constructor for untyped columns; row_count is the row total.
    pub fn from_rows(columns: &[&str], rows: Vec<Vec<Value>>) -> Self {
        let fields = columns.iter().map(|c| FieldDescriptor::new(*c, None)).collect();
        let row_count = rows.len() as u64;
        QueryResult::new(fields, rows, row_count)
    }

    pub fn rows(&self) -> &[Map<String, Value>] {
        &self.rows
    }

    pub fn row_count(&self) -> u64 {
        self.row_count
    }

    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }

    /// Serializes into the outbound document shape.
    pub fn to_document(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

fn distinct_names(fields: &mut [FieldDescriptor]) {
    let mut seen = HashSet::with_capacity(fields.len());
    for field in fields.iter_mut() {
        if seen.insert(field.name.clone()) {
            continue;
        }
        let mut n = 1;
        while !seen.insert(format!("{}:{}", field.name, n)) {
            n += 1;
        }
        field.name = format!("{}:{}", field.name, n);
    }
}

/// Accumulates rows while a statement is being stepped.
pub(crate) struct ResultBuilder {
    names: Vec<String>,
    declared: Vec<Option<String>>,
    observed: Vec<Option<&'static str>>,
    rows: Vec<Vec<Value>>,
}

impl ResultBuilder {
    pub(crate) fn new(columns: Vec<(String, Option<String>)>) -> Self {
        let width = columns.len();
        let (names, declared) = columns.into_iter().unzip();
        ResultBuilder {
            names,
            declared,
            observed: vec![None; width],
            rows: Vec::new(),
        }
    }

    pub(crate) fn push_row(&mut self, row: &rusqlite::Row<'_>) -> rusqlite::Result<()> {
        let mut values = Vec::with_capacity(self.names.len());
        for i in 0..self.names.len() {
            let value = row.get_ref(i)?;
            if self.observed[i].is_none() {
                self.observed[i] = storage_class(value);
            }
            values.push(scalar_from_ref(value));
        }
        self.rows.push(values);
        Ok(())
    }

    /// Finishes the result. `affected` overrides the row total for DML.
    pub(crate) fn finish(self, affected: Option<u64>) -> QueryResult {
        let fields = self
            .names
            .into_iter()
            .zip(self.declared)
            .zip(self.observed)
            .map(|((name, declared), observed)| FieldDescriptor {
                name,
                data_type: declared.or_else(|| observed.map(str::to_string)),
            })
            .collect();
        let row_count = affected.unwrap_or(self.rows.len() as u64);
        QueryResult::new(fields, self.rows, row_count)
    }
}

/// Converts a SQLite value into its JSON form.
pub(crate) fn scalar_from_ref(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null),
        ValueRef::Text(t) => Value::String(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Value::String(hex_blob(b)),
    }
}

fn storage_class(value: ValueRef<'_>) -> Option<&'static str> {
    match value {
        ValueRef::Null => None,
        ValueRef::Integer(_) => Some("INTEGER"),
        ValueRef::Real(_) => Some("REAL"),
        ValueRef::Text(_) => Some("TEXT"),
        ValueRef::Blob(_) => Some("BLOB"),
    }
}

fn hex_blob(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(2 + bytes.len() * 2);
    out.push_str("\\x");
    for b in bytes {
        let _ = write!(out, "{:02x}", b);
    }
    out
}
