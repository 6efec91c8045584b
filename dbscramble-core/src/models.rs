//! Core data models shared by the shuffle engine, page processor and stores.
//!
//! A page is held entirely in memory while it is shuffled. Rows are positional:
//! value `i` of a row belongs to column `i` of the page's column list, which
//! is the order returned by the [`crate::adapters::SchemaProbe`].

use serde::{Deserialize, Serialize};

/// A single cell as read from (and written back to) a store.
///
/// Stores that cannot describe their native types (PostgreSQL here) read every
/// value as `Text` and cast it back on write; SQLite keeps its storage class.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CellValue {
    /// SQL NULL
    Null,
    /// Integer storage class
    Integer(i64),
    /// Floating point storage class
    Real(f64),
    /// Text storage class
    Text(String),
    /// Boolean
    Boolean(bool),
    /// Binary data
    Blob(Vec<u8>),
}

impl CellValue {
    /// Returns true for SQL NULL.
    pub fn is_null(&self) -> bool {
        matches!(self, CellValue::Null)
    }

    /// Borrows the text content, if this is a text value.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            CellValue::Text(text) => Some(text),
            _ => None,
        }
    }

    /// Renders the value as text, `None` for NULL.
    ///
    /// Blobs are rendered as lowercase hex so they survive a text round trip.
    pub fn to_text(&self) -> Option<String> {
        match self {
            CellValue::Null => None,
            CellValue::Integer(v) => Some(v.to_string()),
            CellValue::Real(v) => Some(v.to_string()),
            CellValue::Text(v) => Some(v.clone()),
            CellValue::Boolean(v) => Some(v.to_string()),
            CellValue::Blob(bytes) => Some(bytes.iter().map(|b| format!("{:02x}", b)).collect()),
        }
    }
}

impl From<&str> for CellValue {
    fn from(value: &str) -> Self {
        CellValue::Text(value.to_string())
    }
}

impl From<String> for CellValue {
    fn from(value: String) -> Self {
        CellValue::Text(value)
    }
}

impl From<Option<String>> for CellValue {
    fn from(value: Option<String>) -> Self {
        value.map_or(CellValue::Null, CellValue::Text)
    }
}

impl From<i64> for CellValue {
    fn from(value: i64) -> Self {
        CellValue::Integer(value)
    }
}

impl std::fmt::Display for CellValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.to_text() {
            Some(text) => write!(f, "{}", text),
            None => write!(f, "NULL"),
        }
    }
}

static NULL_CELL: CellValue = CellValue::Null;

/// One row of a page, positional against [`Page::columns`].
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Row {
    pub values: Vec<CellValue>,
}

impl Row {
    /// Creates a row from its positional values.
    pub fn new(values: Vec<CellValue>) -> Self {
        Self { values }
    }

    /// Value at a column position, NULL if the row is shorter.
    pub fn get(&self, index: usize) -> &CellValue {
        self.values.get(index).unwrap_or(&NULL_CELL)
    }
}

/// An ordered batch of rows fetched at a given offset.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Page {
    /// Column names in row order
    pub columns: Vec<String>,
    /// Rows in stable key order
    pub rows: Vec<Row>,
}

impl Page {
    /// Creates a page.
    pub fn new(columns: Vec<String>, rows: Vec<Row>) -> Self {
        Self { columns, rows }
    }

    /// An empty page marks the end of a table.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Number of rows in the page.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Position of a column in the row tuples.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }
}

/// The stable sort key used to page through a table.
///
/// The first column is the primary key; audit tables add their revision
/// column so rows sharing a logical key keep a total order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderKey {
    pub columns: Vec<String>,
}

impl OrderKey {
    /// Key made of the primary key only.
    pub fn primary(column: impl Into<String>) -> Self {
        Self {
            columns: vec![column.into()],
        }
    }

    /// Key made of the primary key plus a revision column.
    pub fn with_revision(primary: impl Into<String>, revision: impl Into<String>) -> Self {
        Self {
            columns: vec![primary.into(), revision.into()],
        }
    }
}

/// Identifies a row for an UPDATE: `(column, value)` pairs matched with `=`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowKey {
    pub parts: Vec<(String, CellValue)>,
}

impl std::fmt::Display for RowKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let rendered: Vec<String> = self
            .parts
            .iter()
            .map(|(column, value)| format!("{}={}", column, value))
            .collect();
        write!(f, "{}", rendered.join(","))
    }
}

/// New values for the configured columns of one row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowUpdate {
    pub key: RowKey,
    pub assignments: Vec<(String, CellValue)>,
}

/// How a configured column is anonymized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ColumnKind {
    /// Raw values are permuted across rows
    Opaque,
    /// Local part is split on `.`/`_` and each token permuted; `@domain` stays
    Email,
    /// Split on whitespace or `.` and each token permuted
    PersonName,
    /// Member of a correlated block that moves as one tuple
    Grouped,
    /// Characters before the first `@` are shuffled inside the row
    CharacterScramble,
    /// The four groups of an IPv4 address are shuffled inside the row
    Ipv4Octets,
}

impl ColumnKind {
    /// Kinds that are decomposed into sub-field slots before shuffling.
    pub fn is_composite(&self) -> bool {
        matches!(self, ColumnKind::Email | ColumnKind::PersonName)
    }

    /// Kinds transformed inside their own row, without any cross-row movement.
    pub fn is_row_local(&self) -> bool {
        matches!(self, ColumnKind::CharacterScramble | ColumnKind::Ipv4Octets)
    }
}

impl std::fmt::Display for ColumnKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ColumnKind::Opaque => "opaque",
            ColumnKind::Email => "email",
            ColumnKind::PersonName => "person-name",
            ColumnKind::Grouped => "grouped",
            ColumnKind::CharacterScramble => "character-scramble",
            ColumnKind::Ipv4Octets => "ipv4-octets",
        };
        write!(f, "{}", name)
    }
}

/// A column name plus its anonymization kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnRule {
    pub name: String,
    pub kind: ColumnKind,
}

impl ColumnRule {
    /// Creates a column rule.
    pub fn new(name: impl Into<String>, kind: ColumnKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }
}
