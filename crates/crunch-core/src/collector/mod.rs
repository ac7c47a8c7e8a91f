//! Prediction collection.
//!
//! Collectors gather per-iteration prediction tables and write them as one
//! artifact. `persist` and `discard` consume the collector, so nothing can
//! be appended once it is done.

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::table::{write_table_as, Table, TableError, TableFormat, TableWriter};

/// Collector errors.
#[derive(Debug, thiserror::Error)]
pub enum CollectorError {
    #[error("no prediction was collected")]
    Empty,

    #[error("failed to collect prediction: {0}")]
    Table(#[from] TableError),

    #[error("io error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

pub type CollectorResult<T> = Result<T, CollectorError>;

pub trait PredictionCollector {
    fn append(&mut self, table: Table) -> CollectorResult<()>;

    /// Write everything to `path` atomically.
    fn persist(self, path: &Path) -> CollectorResult<()>
    where
        Self: Sized;

    fn discard(self)
    where
        Self: Sized;

    /// Whether the artifact carries a row index. Tables have none.
    fn is_write_index(&self) -> bool {
        false
    }
}

/// `<path>.tmp` next to `path`.
fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

fn rename(from: &Path, to: &Path) -> CollectorResult<()> {
    std::fs::rename(from, to).map_err(|source| CollectorError::Io {
        path: to.display().to_string(),
        source,
    })
}

fn ensure_parent(path: &Path) -> CollectorResult<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => {
            std::fs::create_dir_all(parent).map_err(|source| CollectorError::Io {
                path: parent.display().to_string(),
                source,
            })
        }
        _ => Ok(()),
    }
}

/// Keeps every table in memory and concatenates on persist.
///
/// Like [`FileCollector`], later tables must conform to the first one's
/// schema (see [`Table::conform_to`]).
#[derive(Debug, Default)]
pub struct MemoryCollector {
    tables: Vec<Table>,
}

impl MemoryCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

impl PredictionCollector for MemoryCollector {
    fn append(&mut self, table: Table) -> CollectorResult<()> {
        let table = match self.tables.first() {
            Some(first) => table.conform_to(&first.schema())?,
            None => table,
        };

        self.tables.push(table);
        Ok(())
    }

    fn persist(self, path: &Path) -> CollectorResult<()> {
        if self.tables.is_empty() {
            return Err(CollectorError::Empty);
        }

        let prediction = Table::concat(&self.tables)?;
        persist_table(&prediction, path)?;

        debug!(path = %path.display(), rows = prediction.num_rows(), "prediction persisted");
        Ok(())
    }

    fn discard(self) {
        debug!(tables = self.tables.len(), "prediction discarded");
    }
}

/// Streams every table into a temporary file next to the final path.
#[derive(Debug)]
pub struct FileCollector {
    path: PathBuf,
    writer: Option<TableWriter>,
}

impl FileCollector {
    /// `path` decides the format; the temporary file is written beside it.
    pub fn new(path: impl Into<PathBuf>) -> CollectorResult<Self> {
        let path = path.into();
        TableFormat::from_path(&path)?;
        Ok(Self { path, writer: None })
    }

    fn temp_path(&self) -> PathBuf {
        temp_path(&self.path)
    }
}

impl PredictionCollector for FileCollector {
    fn append(&mut self, table: Table) -> CollectorResult<()> {
        if self.writer.is_none() {
            ensure_parent(&self.path)?;
            let format = TableFormat::from_path(&self.path)?;
            self.writer = Some(TableWriter::create(&self.temp_path(), format, &table.schema())?);
        }

        if let Some(writer) = self.writer.as_mut() {
            writer.write(&table)?;
        }
        Ok(())
    }

    fn persist(self, path: &Path) -> CollectorResult<()> {
        let Some(writer) = self.writer else {
            return Err(CollectorError::Empty);
        };

        let temp = temp_path(&self.path);
        writer.finish()?;
        ensure_parent(path)?;
        rename(&temp, path)?;

        debug!(path = %path.display(), "prediction persisted");
        Ok(())
    }

    fn discard(self) {
        let temp = self.temp_path();
        if let Some(writer) = self.writer {
            let _ = writer.finish();
            let _ = std::fs::remove_file(temp);
        }
        debug!("prediction discarded");
    }
}

/// Collector chosen at runtime.
#[derive(Debug)]
pub enum Collector {
    Memory(MemoryCollector),
    File(FileCollector),
}

impl Collector {
    pub fn memory() -> Self {
        Self::Memory(MemoryCollector::new())
    }

    pub fn file(path: impl Into<PathBuf>) -> CollectorResult<Self> {
        FileCollector::new(path).map(Self::File)
    }
}

impl PredictionCollector for Collector {
    fn append(&mut self, table: Table) -> CollectorResult<()> {
        match self {
            Self::Memory(collector) => collector.append(table),
            Self::File(collector) => collector.append(table),
        }
    }

    fn persist(self, path: &Path) -> CollectorResult<()> {
        match self {
            Self::Memory(collector) => collector.persist(path),
            Self::File(collector) => collector.persist(path),
        }
    }

    fn discard(self) {
        match self {
            Self::Memory(collector) => collector.discard(),
            Self::File(collector) => collector.discard(),
        }
    }
}

/// Write a single table atomically.
pub fn persist_table(table: &Table, path: &Path) -> CollectorResult<()> {
    ensure_parent(path)?;
    let format = TableFormat::from_path(path)?;
    let temp = temp_path(path);
    write_table_as(table, &temp, format)?;
    rename(&temp, path)
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::table::{read_table, Column};

    fn prediction(moon: i64, value: f64) -> Table {
        Table::new(vec![
            Column::int("id", [1]),
            Column::int("moon", [moon]),
            Column::float("prediction", [value]),
        ])
        .unwrap()
    }

    fn assert_artifact(path: &Path) {
        let table = read_table(path).unwrap();
        let moons = table.column("moon").unwrap().keys().unwrap();
        assert_eq!(moons, vec![Some(10), Some(20)]);
        assert!(!temp_path(path).exists());
    }

    #[test]
    fn test_memory_collector_preserves_order() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("prediction.parquet");

        let mut collector = Collector::memory();
        collector.append(prediction(10, 1.0)).unwrap();
        collector.append(prediction(20, 2.0)).unwrap();
        assert!(!collector.is_write_index());
        collector.persist(&path).unwrap();

        assert_artifact(&path);
    }

    #[test]
    fn test_file_collector_streams() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out").join("prediction.csv");

        let mut collector = Collector::file(&path).unwrap();
        collector.append(prediction(10, 1.0)).unwrap();
        collector.append(prediction(20, 2.0)).unwrap();
        collector.persist(&path).unwrap();

        assert_artifact(&path);
    }

    #[test]
    fn test_schema_change_rejected() {
        let dir = TempDir::new().unwrap();
        let other = Table::new(vec![Column::int("id", [1])]).unwrap();

        let mut memory = MemoryCollector::new();
        memory.append(prediction(10, 1.0)).unwrap();
        assert!(memory.append(other.clone()).is_err());

        let mut file = FileCollector::new(dir.path().join("prediction.parquet")).unwrap();
        file.append(prediction(10, 1.0)).unwrap();
        assert!(file.append(other).is_err());
        file.discard();
        assert!(!dir.path().join("prediction.parquet.tmp").exists());
    }

    #[test]
    fn test_variants_agree_on_numeric_promotion() {
        let dir = TempDir::new().unwrap();
        let int_prediction = || {
            Table::new(vec![
                Column::int("id", [2]),
                Column::int("moon", [20]),
                Column::int("prediction", [1]),
            ])
            .unwrap()
        };

        let memory_path = dir.path().join("memory.csv");
        let mut memory = MemoryCollector::new();
        memory.append(prediction(10, 0.5)).unwrap();
        memory.append(int_prediction()).unwrap();
        memory.persist(&memory_path).unwrap();

        let file_path = dir.path().join("file.csv");
        let mut file = FileCollector::new(&file_path).unwrap();
        file.append(prediction(10, 0.5)).unwrap();
        file.append(int_prediction()).unwrap();
        file.persist(&file_path).unwrap();

        assert_eq!(
            std::fs::read_to_string(&memory_path).unwrap(),
            std::fs::read_to_string(&file_path).unwrap()
        );

        // Float after int cannot be narrowed by either variant.
        let mut memory = MemoryCollector::new();
        memory.append(int_prediction()).unwrap();
        assert!(memory.append(prediction(10, 0.5)).is_err());

        let mut file = FileCollector::new(dir.path().join("other.csv")).unwrap();
        file.append(int_prediction()).unwrap();
        assert!(file.append(prediction(10, 0.5)).is_err());
        file.discard();
    }

    #[test]
    fn test_persist_without_append_is_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("prediction.parquet");

        assert!(matches!(
            MemoryCollector::new().persist(&path),
            Err(CollectorError::Empty)
        ));
        assert!(matches!(
            FileCollector::new(&path).unwrap().persist(&path),
            Err(CollectorError::Empty)
        ));
        assert!(!path.exists());
    }

    #[test]
    fn test_unsupported_extension() {
        assert!(FileCollector::new("prediction.txt").is_err());
    }
}
