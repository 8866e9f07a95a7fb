//! The staging store and its fixed query shapes.

use std::collections::HashMap;
use std::path::Path;

use rusqlite::types::ValueRef;
use rusqlite::Connection;
use tracing::info;

use crate::error::StagingError;
use crate::value::{Lookup, RawRecord, Value};

/// How a secondary tablespace is joined into a select.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum JoinKind {
    /// LEFT join (the default).
    #[default]
    Left,
    /// INNER join.
    Inner,
}

impl JoinKind {
    fn sql(&self) -> &'static str {
        match self {
            JoinKind::Left => "LEFT",
            JoinKind::Inner => "INNER",
        }
    }
}

/// A join against a secondary tablespace:
/// `<kind> JOIN table ON (base.local_column = table.remote_column)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinSpec {
    /// The secondary tablespace name.
    pub table: String,
    /// Column on the primary tablespace.
    pub local_column: String,
    /// Column on the secondary tablespace.
    pub remote_column: String,
    /// Join kind, LEFT unless specified.
    pub kind: JoinKind,
}

impl JoinSpec {
    /// Create a LEFT join spec.
    pub fn left(
        table: impl Into<String>,
        local_column: impl Into<String>,
        remote_column: impl Into<String>,
    ) -> Self {
        Self {
            table: table.into(),
            local_column: local_column.into(),
            remote_column: remote_column.into(),
            kind: JoinKind::Left,
        }
    }

    /// Create an INNER join spec.
    pub fn inner(
        table: impl Into<String>,
        local_column: impl Into<String>,
        remote_column: impl Into<String>,
    ) -> Self {
        Self {
            table: table.into(),
            local_column: local_column.into(),
            remote_column: remote_column.into(),
            kind: JoinKind::Inner,
        }
    }
}

/// A typed-as-text table store over one SQLite database file.
///
/// The connection is opened once and reused for every read within a
/// migration run. Tables are always dropped and recreated on reload; the
/// staging schema itself is never migrated.
pub struct StagingStore {
    conn: Connection,
}

impl StagingStore {
    /// Open the backend database `<name>.sqlite3` in the working directory.
    pub fn open(db_name: &str) -> Result<Self, StagingError> {
        let conn = Connection::open(format!("{db_name}.sqlite3"))?;
        Ok(Self { conn })
    }

    /// Open a backend database at an explicit path.
    pub fn open_path(path: &Path) -> Result<Self, StagingError> {
        let conn = Connection::open(path)?;
        Ok(Self { conn })
    }

    /// Open an in-memory staging store.
    pub fn open_in_memory() -> Result<Self, StagingError> {
        let conn = Connection::open_in_memory()?;
        Ok(Self { conn })
    }

    /// Create a tablespace if absent; every column is declared TEXT.
    /// Idempotent.
    pub fn create_table(&self, name: &str, columns: &[String]) -> Result<(), StagingError> {
        let column_defs = columns
            .iter()
            .map(|c| format!("\"{c}\" TEXT"))
            .collect::<Vec<_>>()
            .join(", ");
        let statement = format!("CREATE TABLE IF NOT EXISTS \"{name}\" ({column_defs})");
        self.conn.execute(&statement, [])?;

        info!(tablespace = name, columns = columns.len(), "created tablespace");
        Ok(())
    }

    /// Drop a tablespace if present. Idempotent.
    pub fn drop_table(&self, name: &str) -> Result<(), StagingError> {
        self.conn
            .execute(&format!("DROP TABLE IF EXISTS \"{name}\""), [])?;

        info!(tablespace = name, "dropped tablespace");
        Ok(())
    }

    /// Create one index per named column, named `<table>__<column>`.
    pub fn create_indexes(&self, name: &str, columns: &[String]) -> Result<(), StagingError> {
        for column in columns {
            let statement = format!(
                "CREATE INDEX IF NOT EXISTS \"{name}__{column}\" ON \"{name}\" (\"{column}\")"
            );
            self.conn.execute(&statement, [])?;
        }

        info!(tablespace = name, indexes = ?columns, "created indexes");
        Ok(())
    }

    /// Insert every record in sequence order, inside one transaction.
    ///
    /// Each record must supply a value (possibly empty) for every declared
    /// column; a record missing a column fails the whole batch before any
    /// row commits.
    pub fn bulk_insert(
        &self,
        name: &str,
        columns: &[String],
        records: &[HashMap<String, String>],
    ) -> Result<(), StagingError> {
        // Completeness is the caller's contract; verify it before touching
        // the table so a bad batch leaves nothing behind.
        for (index, record) in records.iter().enumerate() {
            for column in columns {
                if !record.contains_key(column) {
                    return Err(StagingError::IncompleteRecord {
                        table: name.to_string(),
                        index,
                        column: column.clone(),
                    });
                }
            }
        }

        let column_list = columns
            .iter()
            .map(|c| format!("\"{c}\""))
            .collect::<Vec<_>>()
            .join(", ");
        let markers = (1..=columns.len())
            .map(|i| format!("?{i}"))
            .collect::<Vec<_>>()
            .join(", ");
        let statement = format!("INSERT INTO \"{name}\" ({column_list}) VALUES ({markers})");

        self.conn.execute("BEGIN TRANSACTION", [])?;
        let mut stmt = self.conn.prepare(&statement)?;
        for record in records {
            let values: Vec<&str> = columns.iter().map(|c| record[c].as_str()).collect();
            if let Err(e) = stmt.execute(rusqlite::params_from_iter(values)) {
                drop(stmt);
                let _ = self.conn.execute("ROLLBACK", []);
                return Err(e.into());
            }
        }
        drop(stmt);
        self.conn.execute("COMMIT", [])?;

        info!(tablespace = name, records = records.len(), "staged records");
        Ok(())
    }

    /// Fetch at most one row matching `lookup` (empty lookup ⇒ first row in
    /// store order).
    pub fn select_one(
        &self,
        name: &str,
        lookup: &Lookup,
        joins: &[JoinSpec],
    ) -> Result<Option<RawRecord>, StagingError> {
        let mut rows = self.select(name, lookup, joins, Some(1))?;
        Ok(rows.pop())
    }

    /// Fetch every row matching `conditions`, in store-defined order.
    pub fn select_all(
        &self,
        name: &str,
        conditions: &Lookup,
        joins: &[JoinSpec],
    ) -> Result<Vec<RawRecord>, StagingError> {
        self.select(name, conditions, joins, None)
    }

    fn select(
        &self,
        name: &str,
        conditions: &Lookup,
        joins: &[JoinSpec],
        limit: Option<usize>,
    ) -> Result<Vec<RawRecord>, StagingError> {
        let join_clause = joins
            .iter()
            .map(|j| {
                format!(
                    "{} JOIN \"{}\" ON (\"{}\".\"{}\" = \"{}\".\"{}\")",
                    j.kind.sql(),
                    j.table,
                    name,
                    j.local_column,
                    j.table,
                    j.remote_column,
                )
            })
            .collect::<Vec<_>>()
            .join(" ");

        let mut params: Vec<String> = Vec::new();
        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            let terms = conditions
                .iter()
                .map(|(key, value)| {
                    params.push(value.render());
                    format!("\"{}\" = ?{}", key, params.len())
                })
                .collect::<Vec<_>>()
                .join(" AND ");
            format!("WHERE {terms}")
        };

        let limit_clause = match limit {
            Some(n) => format!("LIMIT {n}"),
            None => String::new(),
        };

        let statement =
            format!("SELECT * FROM \"{name}\" {join_clause} {where_clause} {limit_clause}");

        let mut stmt = self.conn.prepare(&statement)?;
        let column_names: Vec<String> = stmt
            .column_names()
            .into_iter()
            .map(str::to_string)
            .collect();

        let mut out = Vec::new();
        let mut rows = stmt.query(rusqlite::params_from_iter(params.iter()))?;
        while let Some(row) = rows.next()? {
            let mut pairs: Vec<(String, Value)> = Vec::with_capacity(column_names.len());
            for (i, column) in column_names.iter().enumerate() {
                // Joined selects can repeat a column name; the first
                // occurrence wins, matching name-keyed row access.
                if pairs.iter().any(|(name, _)| name == column) {
                    continue;
                }
                let value = match row.get_ref(i)? {
                    ValueRef::Null => Value::Null,
                    ValueRef::Integer(n) => Value::Int(n),
                    ValueRef::Real(f) => Value::Text(f.to_string()),
                    ValueRef::Text(bytes) => {
                        Value::Text(String::from_utf8_lossy(bytes).into_owned())
                    }
                    ValueRef::Blob(_) => Value::Null,
                };
                pairs.push((column.clone(), value));
            }
            out.push(RawRecord::from_pairs(pairs));
        }

        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn columns(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    fn record(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_bulk_insert_round_trip() {
        let store = StagingStore::open_in_memory().unwrap();
        let cols = columns(&["id", "name", "city"]);
        store.create_table("people", &cols).unwrap();

        store
            .bulk_insert(
                "people",
                &cols,
                &[
                    record(&[("id", "1"), ("name", "Ada"), ("city", "London")]),
                    record(&[("id", "2"), ("name", "Grace"), ("city", "")]),
                ],
            )
            .unwrap();

        let rows = store.select_all("people", &Lookup::new(), &[]).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].get("name"), Some(&Value::Text("Ada".into())));
        assert_eq!(rows[1].get("city"), Some(&Value::Text(String::new())));
    }

    #[test]
    fn test_bulk_insert_incomplete_record_commits_nothing() {
        let store = StagingStore::open_in_memory().unwrap();
        let cols = columns(&["id", "name"]);
        store.create_table("people", &cols).unwrap();

        let err = store
            .bulk_insert(
                "people",
                &cols,
                &[
                    record(&[("id", "1"), ("name", "Ada")]),
                    record(&[("id", "2")]),
                ],
            )
            .unwrap_err();

        match err {
            StagingError::IncompleteRecord { index, column, .. } => {
                assert_eq!(index, 1);
                assert_eq!(column, "name");
            }
            other => panic!("unexpected error: {other}"),
        }

        let rows = store.select_all("people", &Lookup::new(), &[]).unwrap();
        assert!(rows.is_empty());
    }

    #[test]
    fn test_select_one_by_equality() {
        let store = StagingStore::open_in_memory().unwrap();
        let cols = columns(&["id", "name"]);
        store.create_table("people", &cols).unwrap();
        store
            .bulk_insert(
                "people",
                &cols,
                &[
                    record(&[("id", "1"), ("name", "Ada")]),
                    record(&[("id", "2"), ("name", "Grace")]),
                ],
            )
            .unwrap();

        let row = store
            .select_one("people", &Lookup::from_entry("id", Value::Text("2".into())), &[])
            .unwrap()
            .unwrap();
        assert_eq!(row.get("name"), Some(&Value::Text("Grace".into())));

        let missing = store
            .select_one("people", &Lookup::from_entry("id", Value::Text("9".into())), &[])
            .unwrap();
        assert!(missing.is_none());
    }

    #[test]
    fn test_left_join_pulls_secondary_columns() {
        let store = StagingStore::open_in_memory().unwrap();
        let books = columns(&["id", "title", "author_id"]);
        let authors = columns(&["author_id", "author_name"]);
        store.create_table("books", &books).unwrap();
        store.create_table("authors", &authors).unwrap();

        store
            .bulk_insert(
                "books",
                &books,
                &[
                    record(&[("id", "1"), ("title", "Sketches"), ("author_id", "10")]),
                    record(&[("id", "2"), ("title", "Orphan"), ("author_id", "99")]),
                ],
            )
            .unwrap();
        store
            .bulk_insert(
                "authors",
                &authors,
                &[record(&[("author_id", "10"), ("author_name", "Boole")])],
            )
            .unwrap();

        let rows = store
            .select_all(
                "books",
                &Lookup::new(),
                &[JoinSpec::left("authors", "author_id", "author_id")],
            )
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].get("author_name"), Some(&Value::Text("Boole".into())));
        assert_eq!(rows[1].get("author_name"), Some(&Value::Null));

        let inner = store
            .select_all(
                "books",
                &Lookup::new(),
                &[JoinSpec::inner("authors", "author_id", "author_id")],
            )
            .unwrap();
        assert_eq!(inner.len(), 1);
    }

    #[test]
    fn test_create_and_drop_are_idempotent() {
        let store = StagingStore::open_in_memory().unwrap();
        let cols = columns(&["id"]);
        store.create_table("t", &cols).unwrap();
        store.create_table("t", &cols).unwrap();
        store.create_indexes("t", &cols).unwrap();
        store.create_indexes("t", &cols).unwrap();
        store.drop_table("t").unwrap();
        store.drop_table("t").unwrap();
    }

    #[test]
    fn test_on_disk_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("legacy.sqlite3");
        let cols = columns(&["id"]);

        {
            let store = StagingStore::open_path(&path).unwrap();
            store.create_table("t", &cols).unwrap();
            store
                .bulk_insert("t", &cols, &[record(&[("id", "1")])])
                .unwrap();
        }

        let store = StagingStore::open_path(&path).unwrap();
        let rows = store.select_all("t", &Lookup::new(), &[]).unwrap();
        assert_eq!(rows.len(), 1);
    }
}
