use std::fmt;

use serde::{Deserialize, Serialize};

/// Kind of row mutation captured from the source database.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChangeOperation {
    #[serde(rename = "I")]
    Insert,
    #[serde(rename = "U")]
    Update,
    #[serde(rename = "D")]
    Delete,
}

impl ChangeOperation {
    pub fn code(&self) -> char {
        match self {
            Self::Insert => 'I',
            Self::Update => 'U',
            Self::Delete => 'D',
        }
    }

    pub fn from_code(code: char) -> Option<Self> {
        match code {
            'I' => Some(Self::Insert),
            'U' => Some(Self::Update),
            'D' => Some(Self::Delete),
            _ => None,
        }
    }
}

impl fmt::Display for ChangeOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// A captured row mutation of master data, shipped from the online web to
/// every facility.
///
/// `column_values[i]` is the value of `column_names[i]`; `None` is SQL NULL.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MasterDataEventRecord {
    pub schema: String,
    pub table: String,
    pub operation: ChangeOperation,
    pub column_names: Vec<String>,
    pub column_values: Vec<Option<String>>,
    /// Columns forming the row identity.
    #[serde(default)]
    pub primary_key: Vec<String>,
    /// Version of the master data snapshot this change belongs to. Receivers
    /// that were seeded from a newer snapshot skip older changes.
    #[serde(default)]
    pub snapshot_version: Option<u64>,
}

impl MasterDataEventRecord {
    /// `schema.table`.
    pub fn qualified_table(&self) -> String {
        format!("{}.{}", self.schema, self.table)
    }

    /// Value of a column. Outer `None` means the column is absent.
    pub fn value(&self, column: &str) -> Option<Option<&str>> {
        self.column_names
            .iter()
            .position(|c| c == column)
            .and_then(|i| self.column_values.get(i))
            .map(|v| v.as_deref())
    }

    /// Values of the primary key columns in key order, or `None` if a key
    /// column is missing or NULL.
    pub fn row_key(&self) -> Option<Vec<String>> {
        if self.primary_key.is_empty() {
            return None;
        }
        self.primary_key
            .iter()
            .map(|col| self.value(col).flatten().map(str::to_string))
            .collect()
    }

    /// Column names and values line up.
    pub fn is_well_formed(&self) -> bool {
        self.column_names.len() == self.column_values.len()
    }
}
