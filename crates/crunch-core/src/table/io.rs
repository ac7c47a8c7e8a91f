//! CSV and Parquet file I/O for tables.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arrow::array::{Array, ArrayRef, BooleanArray, Float64Array, Int64Array, StringArray};
use arrow::datatypes::{DataType as ArrowType, Field, Schema, SchemaRef};
use arrow::record_batch::RecordBatch;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;

use super::{Column, ColumnData, DataType, Table, TableError, TableResult};

/// Index column pandas leaves behind when a frame is saved with its index.
const PANDAS_INDEX_COLUMN: &str = "__index_level_0__";

/// On-disk table format, chosen by file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TableFormat {
    Csv,
    #[default]
    Parquet,
}

impl TableFormat {
    pub fn from_path(path: &Path) -> TableResult<Self> {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);

        match extension.as_deref() {
            Some("csv") => Ok(Self::Csv),
            Some("parquet") => Ok(Self::Parquet),
            _ => Err(TableError::UnsupportedFormat {
                path: path.display().to_string(),
            }),
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            Self::Csv => "csv",
            Self::Parquet => "parquet",
        }
    }
}

pub fn read_table(path: &Path) -> TableResult<Table> {
    match TableFormat::from_path(path)? {
        TableFormat::Csv => read_csv(path),
        TableFormat::Parquet => read_parquet(path),
    }
}

pub fn write_table(table: &Table, path: &Path) -> TableResult<()> {
    write_table_as(table, path, TableFormat::from_path(path)?)
}

/// Write with an explicit format, for temp paths whose extension is not the
/// final one.
pub fn write_table_as(table: &Table, path: &Path, format: TableFormat) -> TableResult<()> {
    let mut writer = TableWriter::create(path, format, &table.schema())?;
    writer.write(table)?;
    writer.finish()
}

/// Streaming writer: the schema is fixed at creation and every appended
/// table must match it exactly.
pub struct TableWriter {
    path: PathBuf,
    schema: Vec<(String, DataType)>,
    inner: WriterInner,
}

enum WriterInner {
    Csv(csv::Writer<File>),
    Parquet {
        writer: ArrowWriter<File>,
        schema: SchemaRef,
    },
}

impl std::fmt::Debug for TableWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TableWriter")
            .field("path", &self.path)
            .field("schema", &self.schema)
            .finish_non_exhaustive()
    }
}

impl TableWriter {
    pub fn create(
        path: &Path,
        format: TableFormat,
        schema: &[(String, DataType)],
    ) -> TableResult<Self> {
        let file = File::create(path).map_err(|source| TableError::Io {
            path: path.display().to_string(),
            source,
        })?;

        let inner = match format {
            TableFormat::Csv => {
                let mut writer = csv::Writer::from_writer(file);
                if !schema.is_empty() {
                    writer.write_record(schema.iter().map(|(name, _)| name.as_str()))?;
                }
                WriterInner::Csv(writer)
            }
            TableFormat::Parquet => {
                let schema = arrow_schema(schema);
                let writer = ArrowWriter::try_new(file, schema.clone(), None)?;
                WriterInner::Parquet { writer, schema }
            }
        };

        Ok(Self {
            path: path.to_path_buf(),
            schema: schema.to_vec(),
            inner,
        })
    }

    pub fn schema(&self) -> &[(String, DataType)] {
        &self.schema
    }

    pub fn write(&mut self, table: &Table) -> TableResult<()> {
        let table = &table.conform_to(&self.schema)?;

        match &mut self.inner {
            WriterInner::Csv(writer) => {
                for row in 0..table.num_rows() {
                    writer.write_record(table.columns().iter().map(|c| c.cell(row).to_csv_field()))?;
                }
            }
            WriterInner::Parquet { writer, schema } => {
                let batch = to_record_batch(table, schema.clone())?;
                writer.write(&batch)?;
            }
        }
        Ok(())
    }

    pub fn finish(self) -> TableResult<()> {
        match self.inner {
            WriterInner::Csv(mut writer) => writer.flush().map_err(|source| TableError::Io {
                path: self.path.display().to_string(),
                source,
            }),
            WriterInner::Parquet { writer, .. } => {
                writer.close()?;
                Ok(())
            }
        }
    }
}

fn read_csv(path: &Path) -> TableResult<Table> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_path(path)?;

    let headers: Vec<String> = reader.headers()?.iter().map(String::from).collect();
    let mut raw: Vec<Vec<String>> = vec![Vec::new(); headers.len()];
    for record in reader.records() {
        let record = record?;
        for (values, field) in raw.iter_mut().zip(record.iter()) {
            values.push(field.to_string());
        }
    }

    let columns = headers
        .into_iter()
        .zip(raw)
        // An unnamed leading column is a serialized row index.
        .filter(|(name, _)| !name.is_empty() && name != PANDAS_INDEX_COLUMN)
        .map(|(name, values)| Column::new(name, infer_column(values)))
        .collect();

    Table::new(columns)
}

/// Pick the narrowest type every non-empty field parses as.
fn infer_column(values: Vec<String>) -> ColumnData {
    let present = || values.iter().filter(|v| !v.is_empty());

    if present().next().is_none() {
        return ColumnData::Float64(vec![None; values.len()]);
    }

    if present().all(|v| v.parse::<i64>().is_ok()) {
        return ColumnData::Int64(values.iter().map(|v| v.parse().ok()).collect());
    }

    if present().all(|v| v.parse::<f64>().is_ok()) {
        return ColumnData::Float64(values.iter().map(|v| v.parse().ok()).collect());
    }

    if present().all(|v| parse_bool(v).is_some()) {
        return ColumnData::Boolean(values.iter().map(|v| parse_bool(v)).collect());
    }

    ColumnData::Utf8(
        values
            .into_iter()
            .map(|v| if v.is_empty() { None } else { Some(v) })
            .collect(),
    )
}

fn parse_bool(value: &str) -> Option<bool> {
    match value {
        "true" | "True" | "TRUE" => Some(true),
        "false" | "False" | "FALSE" => Some(false),
        _ => None,
    }
}

fn read_parquet(path: &Path) -> TableResult<Table> {
    let file = File::open(path).map_err(|source| TableError::Io {
        path: path.display().to_string(),
        source,
    })?;

    let builder = ParquetRecordBatchReaderBuilder::try_new(file)?;
    let arrow_schema = builder.schema().clone();
    let reader = builder.build()?;

    let mut tables = Vec::new();
    for batch in reader {
        tables.push(from_record_batch(&batch?)?);
    }

    if tables.is_empty() {
        let mut schema = Vec::new();
        for field in arrow_schema.fields() {
            if field.name() == PANDAS_INDEX_COLUMN {
                continue;
            }
            schema.push((field.name().clone(), table_type(field.name(), field.data_type())?));
        }
        return Ok(Table::with_schema(&schema));
    }

    Table::concat(&tables)
}

fn from_record_batch(batch: &RecordBatch) -> TableResult<Table> {
    let schema = batch.schema();
    let mut columns = Vec::with_capacity(batch.num_columns());

    for (field, array) in schema.fields().iter().zip(batch.columns()) {
        if field.name() == PANDAS_INDEX_COLUMN {
            continue;
        }
        let data = column_from_array(field.name(), array.as_ref())?;
        columns.push(Column::new(field.name().clone(), data));
    }

    Table::new(columns)
}

fn table_type(name: &str, data_type: &ArrowType) -> TableResult<DataType> {
    match data_type {
        ArrowType::Int8
        | ArrowType::Int16
        | ArrowType::Int32
        | ArrowType::Int64
        | ArrowType::UInt8
        | ArrowType::UInt16
        | ArrowType::UInt32
        | ArrowType::UInt64 => Ok(DataType::Int64),
        ArrowType::Float16 | ArrowType::Float32 | ArrowType::Float64 => Ok(DataType::Float64),
        ArrowType::Utf8 | ArrowType::LargeUtf8 | ArrowType::Dictionary(_, _) => Ok(DataType::Utf8),
        ArrowType::Boolean => Ok(DataType::Boolean),
        other => Err(TableError::UnsupportedType {
            name: name.to_string(),
            data_type: other.to_string(),
        }),
    }
}

fn column_from_array(name: &str, array: &dyn Array) -> TableResult<ColumnData> {
    let target = table_type(name, array.data_type())?;
    let array = arrow::compute::cast(array, &arrow_type(target))?;

    let unexpected = || TableError::UnsupportedType {
        name: name.to_string(),
        data_type: array.data_type().to_string(),
    };

    let data = match target {
        DataType::Int64 => ColumnData::Int64(
            array
                .as_any()
                .downcast_ref::<Int64Array>()
                .ok_or_else(unexpected)?
                .iter()
                .collect(),
        ),
        DataType::Float64 => ColumnData::Float64(
            array
                .as_any()
                .downcast_ref::<Float64Array>()
                .ok_or_else(unexpected)?
                .iter()
                .collect(),
        ),
        DataType::Utf8 => ColumnData::Utf8(
            array
                .as_any()
                .downcast_ref::<StringArray>()
                .ok_or_else(unexpected)?
                .iter()
                .map(|v| v.map(String::from))
                .collect(),
        ),
        DataType::Boolean => ColumnData::Boolean(
            array
                .as_any()
                .downcast_ref::<BooleanArray>()
                .ok_or_else(unexpected)?
                .iter()
                .collect(),
        ),
    };

    Ok(data)
}

fn arrow_type(data_type: DataType) -> ArrowType {
    match data_type {
        DataType::Int64 => ArrowType::Int64,
        DataType::Float64 => ArrowType::Float64,
        DataType::Utf8 => ArrowType::Utf8,
        DataType::Boolean => ArrowType::Boolean,
    }
}

fn arrow_schema(schema: &[(String, DataType)]) -> SchemaRef {
    Arc::new(Schema::new(
        schema
            .iter()
            .map(|(name, data_type)| Field::new(name.as_str(), arrow_type(*data_type), true))
            .collect::<Vec<_>>(),
    ))
}

fn to_record_batch(table: &Table, schema: SchemaRef) -> TableResult<RecordBatch> {
    let arrays: Vec<ArrayRef> = table
        .columns()
        .iter()
        .map(|column| -> ArrayRef {
            match column.data() {
                ColumnData::Int64(v) => Arc::new(Int64Array::from(v.clone())),
                ColumnData::Float64(v) => Arc::new(Float64Array::from(v.clone())),
                ColumnData::Utf8(v) => Arc::new(StringArray::from(v.clone())),
                ColumnData::Boolean(v) => Arc::new(BooleanArray::from(v.clone())),
            }
        })
        .collect();

    Ok(RecordBatch::try_new(schema, arrays)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::Cell;
    use tempfile::TempDir;

    fn sample() -> Table {
        Table::new(vec![
            Column::int("id", [1, 2]),
            Column::int("moon", [42, 42]),
            Column::float("prediction", [0.5, 1.0]),
            Column::text("side", ["long", "short"]),
        ])
        .unwrap()
    }

    #[test]
    fn test_format_from_extension() {
        assert_eq!(
            TableFormat::from_path(Path::new("data/X_train.PARQUET")).unwrap(),
            TableFormat::Parquet
        );
        assert_eq!(
            TableFormat::from_path(Path::new("prediction.csv")).unwrap(),
            TableFormat::Csv
        );
        assert!(TableFormat::from_path(Path::new("prediction.json")).is_err());
    }

    #[test]
    fn test_csv_keeps_float_type_for_integral_values() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("prediction.csv");
        write_table(&sample(), &path).unwrap();

        let table = read_table(&path).unwrap();
        assert_eq!(table.schema(), sample().schema());
        assert_eq!(
            table.column("prediction").unwrap().cell(1),
            Cell::Float(1.0)
        );
    }

    #[test]
    fn test_csv_reads_nan_and_empty_cells() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("x.csv");
        std::fs::write(&path, ",id,value\n0,1,NaN\n1,2,\n").unwrap();

        let table = read_table(&path).unwrap();
        assert_eq!(table.column_names(), vec!["id", "value"]);
        let value = table.column("value").unwrap();
        assert!(matches!(value.cell(0), Cell::Float(v) if v.is_nan()));
        assert_eq!(value.cell(1), Cell::Null);
    }

    #[test]
    fn test_parquet_streaming_writer() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("prediction.parquet");
        let table = sample();

        let mut writer = TableWriter::create(&path, TableFormat::Parquet, &table.schema()).unwrap();
        writer.write(&table).unwrap();
        writer.write(&table).unwrap();
        writer.finish().unwrap();

        let back = read_table(&path).unwrap();
        assert_eq!(back.num_rows(), 4);
        assert_eq!(back.schema(), table.schema());
        assert_eq!(back.column("side").unwrap().cell(3), Cell::Text("short".into()));
    }

    #[test]
    fn test_writer_rejects_schema_change() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("prediction.csv");
        let mut writer = TableWriter::create(&path, TableFormat::Csv, &sample().schema()).unwrap();

        let other = Table::new(vec![Column::int("id", [1])]).unwrap();
        assert!(matches!(
            writer.write(&other),
            Err(TableError::SchemaMismatch { .. })
        ));
    }
}
