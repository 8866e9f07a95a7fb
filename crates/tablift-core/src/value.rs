//! Dynamic values flowing through the migration pipeline.
//!
//! Staged columns are typed as text, so everything a conversion rule sees
//! starts out as `Text` or `Null`; rules upgrade values into the richer
//! variants (booleans, integers, date-times, lists) on the way to the
//! target store.

use chrono::NaiveDateTime;
use serde::Serialize;

/// A value read from the staging store or produced by a conversion rule.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    /// Absent / unparsed value.
    Null,
    /// Boolean value.
    Bool(bool),
    /// Integer value (primary keys, coerced foreign keys).
    Int(i64),
    /// Textual value (the staging store's native type).
    Text(String),
    /// Naive date-time produced by the date conversions.
    DateTime(NaiveDateTime),
    /// Ordered list (multi-valued relations, multiple-choice results).
    List(Vec<Value>),
}

impl Value {
    /// Check if this value is null.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Truthiness used by choice collection and shadow-field decisions:
    /// `Null`, `false`, `0`, the empty string, and the empty list are falsy.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Text(s) => !s.is_empty(),
            Value::DateTime(_) => true,
            Value::List(items) => !items.is_empty(),
        }
    }

    /// Borrow the textual content, if any.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Borrow the integer content, if any.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Coerce to an integer: `Int` passes through, `Text` is parsed after
    /// trimming. Anything else (or unparseable text) yields `None`.
    pub fn coerce_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Textual rendering used for concatenation, normalization, and SQL
    /// parameters. `Null` renders as the empty string.
    pub fn render(&self) -> String {
        match self {
            Value::Null => String::new(),
            Value::Bool(b) => b.to_string(),
            Value::Int(i) => i.to_string(),
            Value::Text(s) => s.clone(),
            Value::DateTime(dt) => dt.format("%Y-%m-%d %H:%M:%S").to_string(),
            Value::List(items) => items
                .iter()
                .map(Value::render)
                .collect::<Vec<_>>()
                .join(","),
        }
    }

    /// Equality across the text/integer boundary: staged values are text,
    /// coerced keys are integers, and lookups must match either form.
    pub fn loosely_equals(&self, other: &Value) -> bool {
        if self == other {
            return true;
        }
        match (self, other) {
            (Value::Int(i), Value::Text(s)) | (Value::Text(s), Value::Int(i)) => {
                s.trim().parse::<i64>().map(|p| p == *i).unwrap_or(false)
            }
            _ => false,
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

/// One staged row: ordered `(column, value)` pairs.
///
/// Read-only to the pipeline except for the shadow-field audit path, which
/// records unmatched choice inputs under a configured column name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawRecord {
    columns: Vec<(String, Value)>,
}

impl RawRecord {
    /// Create an empty record.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a record from `(column, value)` pairs, keeping their order.
    pub fn from_pairs(pairs: Vec<(String, Value)>) -> Self {
        Self { columns: pairs }
    }

    /// Look up a column by name.
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.columns
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, value)| value)
    }

    /// Set a column, replacing an existing value or appending a new column.
    pub fn set(&mut self, column: impl Into<String>, value: Value) {
        let column = column.into();
        match self.columns.iter_mut().find(|(name, _)| *name == column) {
            Some((_, slot)) => *slot = value,
            None => self.columns.push((column, value)),
        }
    }

    /// Iterate over `(column, value)` pairs in record order.
    pub fn iter(&self) -> impl Iterator<Item = &(String, Value)> {
        self.columns.iter()
    }

    /// Number of columns.
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    /// Check if the record has no columns.
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

/// The in-progress output of a migration: an ordered key/value map with
/// scalar insert and list-append semantics.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FormData {
    entries: Vec<(String, Value)>,
}

impl FormData {
    /// Create an empty form.
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up an entry by key.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries
            .iter()
            .find(|(name, _)| name == key)
            .map(|(_, value)| value)
    }

    /// Set a key, replacing an existing value or appending a new entry.
    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        let key = key.into();
        match self.entries.iter_mut().find(|(name, _)| *name == key) {
            Some((_, slot)) => *slot = value,
            None => self.entries.push((key, value)),
        }
    }

    /// Append to the list slot under `key`, turning any existing non-list
    /// value into a fresh list first.
    pub fn append(&mut self, key: impl Into<String>, value: Value) {
        let key = key.into();
        match self.entries.iter_mut().find(|(name, _)| *name == key) {
            Some((_, Value::List(items))) => items.push(value),
            Some((_, slot)) => *slot = Value::List(vec![value]),
            None => self.entries.push((key, Value::List(vec![value]))),
        }
    }

    /// Overlay every entry of `other` onto this form (other wins per key).
    pub fn extend(&mut self, other: &FormData) {
        for (key, value) in other.iter() {
            self.insert(key.clone(), value.clone());
        }
    }

    /// Iterate over `(key, value)` pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &(String, Value)> {
        self.entries.iter()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the form has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// View the form as a raw record, for postsave conversions that read
    /// from the persisted form data instead of the staged row.
    pub fn as_record(&self) -> RawRecord {
        RawRecord::from_pairs(self.entries.clone())
    }
}

/// An equality-conjunction filter: every `(key, value)` pair must match.
/// An empty lookup matches everything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Lookup {
    entries: Vec<(String, Value)>,
}

impl Lookup {
    /// Create an empty lookup.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a single-entry lookup.
    pub fn from_entry(key: impl Into<String>, value: Value) -> Self {
        let mut lookup = Self::new();
        lookup.insert(key, value);
        lookup
    }

    /// Set a key, replacing an existing value or appending a new entry.
    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        let key = key.into();
        match self.entries.iter_mut().find(|(name, _)| *name == key) {
            Some((_, slot)) => *slot = value,
            None => self.entries.push((key, value)),
        }
    }

    /// Look up an entry by key.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries
            .iter()
            .find(|(name, _)| name == key)
            .map(|(_, value)| value)
    }

    /// Overlay every entry of `other` onto this lookup (other wins per key).
    pub fn extend(&mut self, other: &Lookup) {
        for (key, value) in other.iter() {
            self.insert(key.clone(), value.clone());
        }
    }

    /// Iterate over `(key, value)` pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &(String, Value)> {
        self.entries.iter()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the lookup is unfiltered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
