//! In-memory tabular data with per-column type inference.

use serde::{Deserialize, Serialize};

/// A single cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Empty,
    Int(i64),
    Float(f64),
    Text(String),
}

impl Value {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(v) => Some(*v as f64),
            Value::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Value::Empty)
    }
}

/// Inferred type of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnKind {
    Empty,
    Int,
    Float,
    Text,
}

impl ColumnKind {
    /// Infer the narrowest kind that fits every non-empty cell.
    pub fn infer<'a>(cells: impl IntoIterator<Item = &'a str>) -> Self {
        let mut kind = ColumnKind::Empty;
        for cell in cells {
            let cell = cell.trim();
            if cell.is_empty() {
                continue;
            }
            kind = match kind {
                ColumnKind::Empty | ColumnKind::Int if cell.parse::<i64>().is_ok() => {
                    ColumnKind::Int
                }
                ColumnKind::Empty | ColumnKind::Int | ColumnKind::Float
                    if cell.parse::<f64>().is_ok() =>
                {
                    ColumnKind::Float
                }
                _ => return ColumnKind::Text,
            };
        }
        kind
    }

    fn parse(self, cell: &str) -> Value {
        let trimmed = cell.trim();
        if trimmed.is_empty() {
            return Value::Empty;
        }
        match self {
            ColumnKind::Int => trimmed
                .parse()
                .map(Value::Int)
                .unwrap_or_else(|_| Value::Text(trimmed.to_string())),
            ColumnKind::Float => trimmed
                .parse()
                .map(Value::Float)
                .unwrap_or_else(|_| Value::Text(trimmed.to_string())),
            ColumnKind::Empty | ColumnKind::Text => Value::Text(trimmed.to_string()),
        }
    }
}

/// A 2-D table: optional row index, named columns, typed cells.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Table {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index_name: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub index: Vec<String>,
    pub columns: Vec<String>,
    pub kinds: Vec<ColumnKind>,
    pub rows: Vec<Vec<Value>>,
}

impl Table {
    /// Build a typed table from a header row and raw string rows.
    ///
    /// Ragged rows are padded with empty cells. When a row is wider than the
    /// header, extra columns are named `Unnamed: <n>`. With `index_col` the
    /// first column becomes the row index.
    pub fn from_records(header: Vec<String>, records: Vec<Vec<String>>, index_col: bool) -> Self {
        let width = records
            .iter()
            .map(Vec::len)
            .chain(std::iter::once(header.len()))
            .max()
            .unwrap_or(0);

        let mut header: Vec<String> = header.into_iter().map(|h| h.trim().to_string()).collect();
        for i in header.len()..width {
            header.push(format!("Unnamed: {}", i));
        }

        let mut records = records;
        for record in &mut records {
            record.resize(width, String::new());
        }

        let (index_name, index, data_start) = if index_col && width > 0 {
            let name = Some(header[0].clone()).filter(|n| !n.is_empty());
            let labels = records.iter().map(|r| r[0].trim().to_string()).collect();
            (name, labels, 1)
        } else {
            (None, Vec::new(), 0)
        };

        let columns: Vec<String> = header[data_start..].to_vec();
        let kinds: Vec<ColumnKind> = (data_start..width)
            .map(|col| ColumnKind::infer(records.iter().map(|r| r[col].as_str())))
            .collect();

        let rows = records
            .iter()
            .map(|record| {
                record[data_start..]
                    .iter()
                    .zip(&kinds)
                    .map(|(cell, kind)| kind.parse(cell))
                    .collect()
            })
            .collect();

        Self {
            index_name,
            index,
            columns,
            kinds,
            rows,
        }
    }

    /// (rows, columns), excluding the index.
    pub fn shape(&self) -> (usize, usize) {
        (self.rows.len(), self.columns.len())
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_position(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// All cells of a column, top to bottom.
    pub fn column(&self, name: &str) -> Option<Vec<&Value>> {
        let pos = self.column_position(name)?;
        Some(self.rows.iter().map(|row| &row[pos]).collect())
    }

    /// The row with the given index label.
    pub fn row(&self, label: &str) -> Option<&[Value]> {
        let pos = self.index.iter().position(|l| l == label)?;
        self.rows.get(pos).map(Vec::as_slice)
    }

    pub fn get(&self, label: &str, column: &str) -> Option<&Value> {
        let col = self.column_position(column)?;
        self.row(label).and_then(|row| row.get(col))
    }
}
