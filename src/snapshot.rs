//! Persisted artefacts: the post-linkage feature snapshot and the submission
//!
//! The snapshot goes to a CSV file or a SQLite table depending on the
//! `--backend` flag; both write the whole frame in one pass. The CSV backend
//! hands the frame to arrow's CSV writer as a single record batch.

use crate::config::BackendType;
use crate::frame::{DType, Frame, FrameError, Value};
use crate::loader::PredictionTemplate;
use arrow::csv::WriterBuilder;
use arrow::error::ArrowError;
use rusqlite::{params_from_iter, types::Value as SqlValue, Connection};
use serde::Serialize;
use std::fs::File;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const SNAPSHOT_TABLE: &str = "feature_snapshot";

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Arrow error: {0}")]
    Arrow(#[from] ArrowError),

    #[error(transparent)]
    Frame(#[from] FrameError),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
}

fn ensure_parent(path: &Path) -> Result<(), SnapshotError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    Ok(())
}

/// CSV backend: header row plus one line per frame row
pub struct CsvSnapshotWriter {
    path: PathBuf,
}

impl CsvSnapshotWriter {
    pub fn new(path: impl Into<PathBuf>) -> Result<Self, SnapshotError> {
        let path = path.into();
        ensure_parent(&path)?;
        Ok(Self { path })
    }

    pub fn write_frame(&mut self, frame: &Frame) -> Result<usize, SnapshotError> {
        let batch = frame.to_record_batch()?;
        let mut writer = WriterBuilder::new()
            .with_header(true)
            .build(File::create(&self.path)?);
        writer.write(&batch)?;
        Ok(batch.num_rows())
    }
}

fn sql_type(dtype: DType) -> &'static str {
    match dtype {
        DType::Bool | DType::Int8 | DType::Int16 | DType::Int32 | DType::Int64 => "INTEGER",
        DType::Float16 | DType::Float32 | DType::Float64 => "REAL",
        DType::Utf8 | DType::Categorical | DType::Timestamp | DType::Date => "TEXT",
    }
}

fn sql_value(value: Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(b)),
        Value::Int(x) => SqlValue::Integer(x),
        Value::Float(x) if x.is_nan() => SqlValue::Null,
        Value::Float(x) => SqlValue::Real(x),
        other @ (Value::Str(_) | Value::Timestamp(_) | Value::Date(_)) => {
            SqlValue::Text(other.to_string())
        }
    }
}

fn quote(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// SQLite backend: the snapshot table is recreated on every write
pub struct SqliteSnapshotWriter {
    conn: Connection,
}

impl SqliteSnapshotWriter {
    pub fn new(db_path: impl AsRef<Path>) -> Result<Self, SnapshotError> {
        ensure_parent(db_path.as_ref())?;
        let conn = Connection::open(db_path)?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |_| Ok(()))?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.pragma_update(None, "temp_store", "MEMORY")?;
        log::info!("✅ SQLite snapshot database initialized with WAL mode");
        Ok(Self { conn })
    }

    pub fn write_frame(&mut self, frame: &Frame) -> Result<usize, SnapshotError> {
        let columns: Vec<String> = frame
            .schema()
            .into_iter()
            .map(|(name, dtype)| format!("{} {}", quote(&name), sql_type(dtype)))
            .collect();
        let names: Vec<String> = frame.column_names().iter().map(|n| quote(n)).collect();
        let placeholders: Vec<String> = (1..=names.len()).map(|i| format!("?{}", i)).collect();

        let tx = self.conn.transaction()?;
        tx.execute(&format!("DROP TABLE IF EXISTS {}", SNAPSHOT_TABLE), [])?;
        tx.execute(
            &format!("CREATE TABLE {} ({})", SNAPSHOT_TABLE, columns.join(", ")),
            [],
        )?;
        {
            let mut insert = tx.prepare(&format!(
                "INSERT INTO {} ({}) VALUES ({})",
                SNAPSHOT_TABLE,
                names.join(", "),
                placeholders.join(", ")
            ))?;
            for i in 0..frame.height() {
                insert.execute(params_from_iter(frame.row(i).into_iter().map(sql_value)))?;
            }
        }
        tx.commit()?;

        log::debug!("✅ Flushed {} snapshot rows to SQLite", frame.height());
        Ok(frame.height())
    }
}

/// Snapshot writer routed by backend type
pub enum SnapshotWriter {
    Csv(CsvSnapshotWriter),
    Sqlite(SqliteSnapshotWriter),
}

impl SnapshotWriter {
    pub fn new(backend: BackendType, path: impl Into<PathBuf>) -> Result<Self, SnapshotError> {
        let path: PathBuf = path.into();
        match backend {
            BackendType::Csv => Ok(SnapshotWriter::Csv(CsvSnapshotWriter::new(path)?)),
            BackendType::Sqlite => Ok(SnapshotWriter::Sqlite(SqliteSnapshotWriter::new(path)?)),
        }
    }

    pub fn write_frame(&mut self, frame: &Frame) -> Result<usize, SnapshotError> {
        let rows = match self {
            SnapshotWriter::Csv(w) => w.write_frame(frame)?,
            SnapshotWriter::Sqlite(w) => w.write_frame(frame)?,
        };
        log::info!("📝 wrote {} snapshot rows ({})", rows, self.backend_type());
        Ok(rows)
    }

    pub fn backend_type(&self) -> &'static str {
        match self {
            SnapshotWriter::Csv(_) => "CSV",
            SnapshotWriter::Sqlite(_) => "SQLite",
        }
    }
}

#[derive(Serialize)]
struct SubmissionRow<'a> {
    time: String,
    #[serde(rename = "assetCode")]
    asset_code: &'a str,
    #[serde(rename = "confidenceValue")]
    confidence_value: f32,
}

/// Write every filled template as `time,assetCode,confidenceValue`
pub fn write_submission(path: &Path, templates: &[PredictionTemplate]) -> Result<usize, SnapshotError> {
    ensure_parent(path)?;
    let mut writer = csv::Writer::from_path(path)?;
    let mut rows = 0;
    for template in templates {
        let time = template.date.format("%Y-%m-%d").to_string();
        for (asset_code, confidence) in template.asset_codes.iter().zip(&template.confidence) {
            writer.serialize(SubmissionRow {
                time: time.clone(),
                asset_code,
                confidence_value: *confidence,
            })?;
            rows += 1;
        }
    }
    writer.flush()?;
    log::info!("📝 wrote {} predictions to {}", rows, path.display());
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::load_market;
    use crate::schema::{ASSET_CODE, TIME};
    use arrow::array::{ArrayRef, DictionaryArray, Float32Array, Int32Array, StringArray};
    use arrow::datatypes::Int32Type;
    use chrono::{NaiveDate, TimeZone, Utc};
    use std::sync::Arc;
    use tempfile::tempdir;

    fn frame() -> Frame {
        Frame::try_from_iter([
            ("id", Arc::new(Int32Array::from(vec![1, 2])) as ArrayRef),
            ("close", Arc::new(Float32Array::from(vec![1.5, f32::NAN])) as ArrayRef),
            ("headline", Arc::new(StringArray::from(vec![Some("a, b"), None])) as ArrayRef),
        ])
        .unwrap()
    }

    #[test]
    fn test_csv_snapshot() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out/feature_df.csv");
        let mut writer = SnapshotWriter::new(BackendType::Csv, &path).unwrap();
        assert_eq!(writer.write_frame(&frame()).unwrap(), 2);

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines, vec!["id,close,headline", "1,1.5,\"a, b\"", "2,,"]);
    }

    #[test]
    fn test_csv_snapshot_reloads() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("feature_df.csv");
        let t = Utc.with_ymd_and_hms(2010, 1, 4, 22, 0, 0).unwrap();
        let codes: DictionaryArray<Int32Type> = vec!["A.N", "B.N"].into_iter().collect();
        let frame = Frame::try_from_iter([
            (TIME, crate::frame::timestamp_array(&[Some(t), None])),
            (ASSET_CODE, Arc::new(codes) as ArrayRef),
            ("close", Arc::new(Float32Array::from(vec![Some(1.5), None])) as ArrayRef),
        ])
        .unwrap();

        CsvSnapshotWriter::new(&path).unwrap().write_frame(&frame).unwrap();
        let reloaded = load_market(&path).unwrap();

        assert_eq!(reloaded.column(TIME).unwrap().timestamps().unwrap(), vec![Some(t), None]);
        assert_eq!(
            reloaded.column(ASSET_CODE).unwrap().strs().unwrap(),
            vec![Some("A.N"), Some("B.N")]
        );
        assert_eq!(reloaded.column("close").unwrap().f64s().unwrap(), vec![Some(1.5), None]);
    }

    #[test]
    fn test_sqlite_snapshot_replaces_table() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("snapshot.db");
        let mut writer = SnapshotWriter::new(BackendType::Sqlite, &path).unwrap();
        writer.write_frame(&frame()).unwrap();
        writer.write_frame(&frame()).unwrap();
        assert_eq!(writer.backend_type(), "SQLite");

        let conn = Connection::open(&path).unwrap();
        let count: i64 = conn
            .query_row(&format!("SELECT COUNT(*) FROM {}", SNAPSHOT_TABLE), [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 2);

        let (close, headline): (Option<f64>, Option<String>) = conn
            .query_row(
                &format!("SELECT close, headline FROM {} WHERE id = 2", SNAPSHOT_TABLE),
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .unwrap();
        assert_eq!(close, None);
        assert_eq!(headline, None);
    }

    #[test]
    fn test_submission() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("submission.csv");
        let mut template = PredictionTemplate::new(
            NaiveDate::from_ymd_opt(2010, 1, 5).unwrap(),
            vec!["A.N".into(), "B.N".into()],
        );
        template.confidence = vec![0.5, -0.25];

        assert_eq!(write_submission(&path, &[template]).unwrap(), 2);
        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(
            text.lines().collect::<Vec<_>>(),
            vec!["time,assetCode,confidenceValue", "2010-01-05,A.N,0.5", "2010-01-05,B.N,-0.25"]
        );
    }
}
