//! In-memory column-oriented tables.
//!
//! Every component exchanges data as a [`Table`]: named, typed, nullable
//! columns. There is no row index; filtering always yields fresh positions.

use std::collections::BTreeSet;
use std::fmt;

mod io;

pub use io::{read_table, write_table, write_table_as, TableFormat, TableWriter};

/// Table errors.
#[derive(Debug, thiserror::Error)]
pub enum TableError {
    #[error("column {name} has {actual} rows, expected {expected}")]
    LengthMismatch {
        name: String,
        expected: usize,
        actual: usize,
    },

    #[error("duplicate column: {name}")]
    DuplicateColumn { name: String },

    #[error("missing column: {name}")]
    MissingColumn { name: String },

    #[error("column {name} cannot be used as a key ({data_type})")]
    NotAKeyColumn { name: String, data_type: DataType },

    #[error("schema mismatch: {message}")]
    SchemaMismatch { message: String },

    #[error("unsupported type for column {name}: {data_type}")]
    UnsupportedType { name: String, data_type: String },

    #[error("unsupported table format: {path}")]
    UnsupportedFormat { path: String },

    #[error("io error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    #[error("parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),
}

pub type TableResult<T> = Result<T, TableError>;

/// Column value type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataType {
    Int64,
    Float64,
    Utf8,
    Boolean,
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DataType::Int64 => "int64",
            DataType::Float64 => "float64",
            DataType::Utf8 => "utf8",
            DataType::Boolean => "boolean",
        };
        f.write_str(name)
    }
}

/// A single value read out of a column.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Null,
    Int(i64),
    Float(f64),
    Text(String),
    Bool(bool),
}

impl Cell {
    pub fn is_null(&self) -> bool {
        matches!(self, Cell::Null)
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Cell::Int(v) => Some(*v as f64),
            Cell::Float(v) => Some(*v),
            _ => None,
        }
    }

    /// Bit-exact equality: floats compare by bit pattern, so NaN equals NaN.
    pub fn bitwise_eq(&self, other: &Cell) -> bool {
        match (self, other) {
            (Cell::Float(a), Cell::Float(b)) => a.to_bits() == b.to_bits(),
            (a, b) => a == b,
        }
    }

    pub(crate) fn to_csv_field(&self) -> String {
        match self {
            Cell::Null => String::new(),
            Cell::Int(v) => v.to_string(),
            // Debug keeps the fractional part, so `1.0` reads back as a float.
            Cell::Float(v) => format!("{:?}", v),
            Cell::Text(v) => v.clone(),
            Cell::Bool(v) => v.to_string(),
        }
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cell::Null => f.write_str("null"),
            Cell::Int(v) => write!(f, "{}", v),
            Cell::Float(v) => write!(f, "{}", v),
            Cell::Text(v) => f.write_str(v),
            Cell::Bool(v) => write!(f, "{}", v),
        }
    }
}

/// Typed, nullable column storage.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnData {
    Int64(Vec<Option<i64>>),
    Float64(Vec<Option<f64>>),
    Utf8(Vec<Option<String>>),
    Boolean(Vec<Option<bool>>),
}

impl ColumnData {
    pub fn empty(data_type: DataType) -> Self {
        match data_type {
            DataType::Int64 => ColumnData::Int64(Vec::new()),
            DataType::Float64 => ColumnData::Float64(Vec::new()),
            DataType::Utf8 => ColumnData::Utf8(Vec::new()),
            DataType::Boolean => ColumnData::Boolean(Vec::new()),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            ColumnData::Int64(v) => v.len(),
            ColumnData::Float64(v) => v.len(),
            ColumnData::Utf8(v) => v.len(),
            ColumnData::Boolean(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn data_type(&self) -> DataType {
        match self {
            ColumnData::Int64(_) => DataType::Int64,
            ColumnData::Float64(_) => DataType::Float64,
            ColumnData::Utf8(_) => DataType::Utf8,
            ColumnData::Boolean(_) => DataType::Boolean,
        }
    }

    fn cell(&self, row: usize) -> Cell {
        match self {
            ColumnData::Int64(v) => v[row].map_or(Cell::Null, Cell::Int),
            ColumnData::Float64(v) => v[row].map_or(Cell::Null, Cell::Float),
            ColumnData::Utf8(v) => v[row].clone().map_or(Cell::Null, Cell::Text),
            ColumnData::Boolean(v) => v[row].map_or(Cell::Null, Cell::Bool),
        }
    }

    fn filter(&self, mask: &[bool]) -> ColumnData {
        fn keep<T: Clone>(values: &[T], mask: &[bool]) -> Vec<T> {
            values
                .iter()
                .zip(mask)
                .filter(|(_, keep)| **keep)
                .map(|(v, _)| v.clone())
                .collect()
        }

        match self {
            ColumnData::Int64(v) => ColumnData::Int64(keep(v, mask)),
            ColumnData::Float64(v) => ColumnData::Float64(keep(v, mask)),
            ColumnData::Utf8(v) => ColumnData::Utf8(keep(v, mask)),
            ColumnData::Boolean(v) => ColumnData::Boolean(keep(v, mask)),
        }
    }

    /// Append `other`, promoting int64 to float64 when the two sides disagree.
    fn extend_from(&mut self, name: &str, other: &ColumnData) -> TableResult<()> {
        if let (ColumnData::Int64(values), ColumnData::Float64(_)) = (&*self, other) {
            *self = ColumnData::Float64(values.iter().map(|v| v.map(|v| v as f64)).collect());
        }

        match (self, other) {
            (ColumnData::Int64(a), ColumnData::Int64(b)) => a.extend_from_slice(b),
            (ColumnData::Float64(a), ColumnData::Float64(b)) => a.extend_from_slice(b),
            (ColumnData::Float64(a), ColumnData::Int64(b)) => {
                a.extend(b.iter().map(|v| v.map(|v| v as f64)))
            }
            (ColumnData::Utf8(a), ColumnData::Utf8(b)) => a.extend_from_slice(b),
            (ColumnData::Boolean(a), ColumnData::Boolean(b)) => a.extend_from_slice(b),
            (a, b) => {
                return Err(TableError::SchemaMismatch {
                    message: format!(
                        "column {} is {} in one table and {} in another",
                        name,
                        a.data_type(),
                        b.data_type()
                    ),
                })
            }
        }
        Ok(())
    }
}

/// A named column.
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    name: String,
    data: ColumnData,
}

impl Column {
    pub fn new(name: impl Into<String>, data: ColumnData) -> Self {
        Self {
            name: name.into(),
            data,
        }
    }

    pub fn int(name: impl Into<String>, values: impl IntoIterator<Item = i64>) -> Self {
        Self::new(
            name,
            ColumnData::Int64(values.into_iter().map(Some).collect()),
        )
    }

    pub fn float(name: impl Into<String>, values: impl IntoIterator<Item = f64>) -> Self {
        Self::new(
            name,
            ColumnData::Float64(values.into_iter().map(Some).collect()),
        )
    }

    pub fn text<S: Into<String>>(name: impl Into<String>, values: impl IntoIterator<Item = S>) -> Self {
        Self::new(
            name,
            ColumnData::Utf8(values.into_iter().map(|v| Some(v.into())).collect()),
        )
    }

    pub fn boolean(name: impl Into<String>, values: impl IntoIterator<Item = bool>) -> Self {
        Self::new(
            name,
            ColumnData::Boolean(values.into_iter().map(Some).collect()),
        )
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn data(&self) -> &ColumnData {
        &self.data
    }

    pub fn data_type(&self) -> DataType {
        self.data.data_type()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self.data_type(), DataType::Int64 | DataType::Float64)
    }

    /// Value at `row`. Panics when `row` is out of bounds.
    pub fn cell(&self, row: usize) -> Cell {
        self.data.cell(row)
    }

    pub fn cells(&self) -> impl Iterator<Item = Cell> + '_ {
        (0..self.len()).map(move |row| self.cell(row))
    }

    /// Numeric view of the column; `None` for text and boolean columns.
    pub fn numeric_values(&self) -> Option<Vec<Option<f64>>> {
        match &self.data {
            ColumnData::Int64(v) => Some(v.iter().map(|v| v.map(|v| v as f64)).collect()),
            ColumnData::Float64(v) => Some(v.clone()),
            _ => None,
        }
    }

    /// Interpret the column as integer keys. Float columns qualify when every
    /// value is integral.
    pub fn keys(&self) -> TableResult<Vec<Option<i64>>> {
        match &self.data {
            ColumnData::Int64(v) => Ok(v.clone()),
            ColumnData::Float64(v) if v.iter().flatten().all(|x| x.fract() == 0.0) => {
                Ok(v.iter().map(|v| v.map(|v| v as i64)).collect())
            }
            _ => Err(TableError::NotAKeyColumn {
                name: self.name.clone(),
                data_type: self.data_type(),
            }),
        }
    }
}

/// An ordered set of equally long, uniquely named columns.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    columns: Vec<Column>,
    num_rows: usize,
}

impl Table {
    pub fn new(columns: Vec<Column>) -> TableResult<Self> {
        let num_rows = columns.first().map(Column::len).unwrap_or(0);

        for (index, column) in columns.iter().enumerate() {
            if columns[..index].iter().any(|c| c.name == column.name) {
                return Err(TableError::DuplicateColumn {
                    name: column.name.clone(),
                });
            }
            if column.len() != num_rows {
                return Err(TableError::LengthMismatch {
                    name: column.name.clone(),
                    expected: num_rows,
                    actual: column.len(),
                });
            }
        }

        Ok(Self { columns, num_rows })
    }

    /// A table with the given schema and no rows.
    pub fn with_schema(schema: &[(String, DataType)]) -> Self {
        Self {
            columns: schema
                .iter()
                .map(|(name, data_type)| Column::new(name.clone(), ColumnData::empty(*data_type)))
                .collect(),
            num_rows: 0,
        }
    }

    pub fn num_rows(&self) -> usize {
        self.num_rows
    }

    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.num_rows == 0
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(Column::name).collect()
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn require_column(&self, name: &str) -> TableResult<&Column> {
        self.column(name).ok_or_else(|| TableError::MissingColumn {
            name: name.to_string(),
        })
    }

    pub fn schema(&self) -> Vec<(String, DataType)> {
        self.columns
            .iter()
            .map(|c| (c.name.clone(), c.data_type()))
            .collect()
    }

    /// Keep the rows whose mask entry is true.
    pub fn filter(&self, mask: &[bool]) -> Table {
        let columns: Vec<Column> = self
            .columns
            .iter()
            .map(|c| Column::new(c.name.clone(), c.data.filter(mask)))
            .collect();
        let num_rows = mask.iter().take(self.num_rows).filter(|keep| **keep).count();
        Table { columns, num_rows }
    }

    /// Keep the rows whose integer key satisfies `predicate`. Rows with a
    /// missing key are dropped.
    pub fn filter_keys(
        &self,
        key_column: &str,
        predicate: impl Fn(i64) -> bool,
    ) -> TableResult<Table> {
        let keys = self.require_column(key_column)?.keys()?;
        let mask: Vec<bool> = keys
            .iter()
            .map(|key| key.is_some_and(&predicate))
            .collect();
        Ok(self.filter(&mask))
    }

    pub fn distinct_keys(&self, key_column: &str) -> TableResult<BTreeSet<i64>> {
        Ok(self
            .require_column(key_column)?
            .keys()?
            .into_iter()
            .flatten()
            .collect())
    }

    /// Concatenate tables sharing the same column names, in order.
    pub fn concat(tables: &[Table]) -> TableResult<Table> {
        let Some(first) = tables.first() else {
            return Ok(Table::default());
        };

        let mut columns = first.columns.clone();
        for table in &tables[1..] {
            let expected = first.column_names();
            if table.column_names() != expected {
                return Err(TableError::SchemaMismatch {
                    message: format!(
                        "expected columns {:?}, got {:?}",
                        expected,
                        table.column_names()
                    ),
                });
            }
            for (column, other) in columns.iter_mut().zip(&table.columns) {
                let name = column.name.clone();
                column.data.extend_from(&name, &other.data)?;
            }
        }

        Table::new(columns)
    }

    /// This table in `schema`: same column names in order, each column either
    /// of the same type or int64 where `schema` has float64 (cast losslessly).
    pub fn conform_to(&self, schema: &[(String, DataType)]) -> TableResult<Table> {
        let mismatch = || TableError::SchemaMismatch {
            message: format!("expected {:?}, got {:?}", schema, self.schema()),
        };

        if self.columns.len() != schema.len() {
            return Err(mismatch());
        }

        let mut columns = Vec::with_capacity(self.columns.len());
        for (column, (name, data_type)) in self.columns.iter().zip(schema) {
            if &column.name != name {
                return Err(mismatch());
            }
            let data = match (&column.data, data_type) {
                (data, expected) if data.data_type() == *expected => data.clone(),
                (ColumnData::Int64(values), DataType::Float64) => {
                    ColumnData::Float64(values.iter().map(|v| v.map(|v| v as f64)).collect())
                }
                _ => return Err(mismatch()),
            };
            columns.push(Column::new(name.clone(), data));
        }

        Table::new(columns)
    }

    /// Bit-exact comparison of names, types and every cell.
    pub fn bitwise_eq(&self, other: &Table) -> bool {
        self.schema() == other.schema()
            && self.num_rows == other.num_rows
            && self.columns.iter().zip(&other.columns).all(|(a, b)| {
                a.cells()
                    .zip(b.cells())
                    .all(|(left, right)| left.bitwise_eq(&right))
            })
    }
}
