use crate::error::SinkError;
use crate::predictor::PredictionResult;
use chrono::Utc;
use rusqlite::{params, Connection};
#[cfg(test)]
use rusqlite::OptionalExtension;
use std::sync::{Mutex, MutexGuard};

/// Destination for finished predictions and pipeline failures.
///
/// Called synchronously on the request thread once the response record is
/// assembled. Failures are reported back to the caller, which only logs them.
pub trait PredictionSink: Send + Sync {
    fn record(&self, prediction: &PredictionResult) -> Result<(), SinkError>;

    fn record_log(&self, log_type: &str, message: &str) -> Result<(), SinkError>;
}

#[cfg(test)]
#[derive(Debug, Clone, PartialEq)]
pub struct PredictionRecord {
    pub id: i64,
    pub timestamp: String,
    pub text_hash: u64,
    pub text: String,
    pub confidence: f64,
    pub nanosecond: i64,
}

#[cfg(test)]
#[derive(Debug, Clone, PartialEq)]
pub struct LogRecord {
    pub id: i64,
    pub timestamp: String,
    pub log_type: String,
    pub message: String,
}

/// SQLite-backed sink. The connection is not `Sync`, so it sits behind a mutex.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    pub fn new(db_path: &str) -> Result<Self, SinkError> {
        Self::from_connection(Connection::open(db_path)?)
    }

    #[cfg(test)]
    pub fn in_memory() -> Result<Self, SinkError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, SinkError> {
        let db = Database {
            conn: Mutex::new(conn),
        };
        db.create_tables()?;
        Ok(db)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, SinkError> {
        self.conn.lock().map_err(|_| SinkError::Poisoned)
    }

    fn create_tables(&self) -> Result<(), SinkError> {
        let conn = self.lock()?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS logs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                log_type TEXT NOT NULL,
                message TEXT NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS predictions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                text_hash INTEGER NOT NULL UNIQUE,
                text TEXT NOT NULL,
                confidence REAL NOT NULL,
                nanosecond INTEGER NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_logs_type ON logs(log_type)",
            [],
        )?;

        Ok(())
    }

    #[cfg(test)]
    pub fn get_prediction(&self, text_hash: u64) -> Result<Option<PredictionRecord>, SinkError> {
        let conn = self.lock()?;
        let record = conn
            .query_row(
                "SELECT id, timestamp, text_hash, text, confidence, nanosecond
                 FROM predictions WHERE text_hash = ?1",
                params![text_hash as i64],
                |row| {
                    Ok(PredictionRecord {
                        id: row.get(0)?,
                        timestamp: row.get(1)?,
                        text_hash: row.get::<_, i64>(2)? as u64,
                        text: row.get(3)?,
                        confidence: row.get(4)?,
                        nanosecond: row.get(5)?,
                    })
                },
            )
            .optional()?;
        Ok(record)
    }

    pub fn get_prediction_count(&self) -> Result<usize, SinkError> {
        let conn = self.lock()?;
        let count = conn.query_row("SELECT COUNT(*) FROM predictions", [], |row| row.get(0))?;
        Ok(count)
    }

    /// Most recent log rows first.
    #[cfg(test)]
    pub fn get_recent_logs(&self, limit: usize) -> Result<Vec<LogRecord>, SinkError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, timestamp, log_type, message FROM logs ORDER BY id DESC LIMIT ?1",
        )?;

        let logs = stmt.query_map(params![limit as i64], |row| {
            Ok(LogRecord {
                id: row.get(0)?,
                timestamp: row.get(1)?,
                log_type: row.get(2)?,
                message: row.get(3)?,
            })
        })?;

        Ok(logs.collect::<Result<Vec<_>, _>>()?)
    }
}

impl PredictionSink for Database {
    fn record(&self, prediction: &PredictionResult) -> Result<(), SinkError> {
        let timestamp = Utc::now().to_rfc3339();
        let nanosecond = i64::try_from(prediction.latency_ns).unwrap_or(i64::MAX);
        let conn = self.lock()?;

        // text_hash is stored bit-for-bit as a signed integer
        conn.execute(
            "INSERT INTO predictions (timestamp, text_hash, text, confidence, nanosecond)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(text_hash) DO UPDATE SET
                timestamp=excluded.timestamp,
                confidence=excluded.confidence,
                nanosecond=excluded.nanosecond",
            params![
                timestamp,
                prediction.text_hash as i64,
                prediction.text,
                f64::from(prediction.confidence),
                nanosecond
            ],
        )?;
        Ok(())
    }

    fn record_log(&self, log_type: &str, message: &str) -> Result<(), SinkError> {
        let timestamp = Utc::now().to_rfc3339();
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO logs (timestamp, log_type, message) VALUES (?1, ?2, ?3)",
            params![timestamp, log_type, message],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prediction(text: &str, text_hash: u64, confidence: f32) -> PredictionResult {
        PredictionResult {
            text_hash,
            text: text.to_string(),
            confidence,
            latency_ns: 1_500,
        }
    }

    #[test]
    fn records_and_reads_back_a_prediction() {
        let db = Database::in_memory().expect("in-memory database opens");
        db.record(&prediction("great day", 42, 0.25))
            .expect("insert succeeds");

        let stored = db
            .get_prediction(42)
            .expect("query succeeds")
            .expect("row exists");
        assert_eq!(stored.text, "great day");
        assert_eq!(stored.text_hash, 42);
        assert!((stored.confidence - 0.25).abs() < 1e-9);
        assert_eq!(stored.nanosecond, 1_500);
        assert_eq!(db.get_prediction_count().unwrap(), 1);
    }

    #[test]
    fn hashes_above_i64_max_round_trip() {
        let db = Database::in_memory().unwrap();
        let hash = u64::MAX - 7;
        db.record(&prediction("wide", hash, 0.9)).unwrap();
        let stored = db.get_prediction(hash).unwrap().expect("row exists");
        assert_eq!(stored.text_hash, hash);
    }

    #[test]
    fn recording_the_same_hash_twice_updates_in_place() {
        let db = Database::in_memory().unwrap();
        db.record(&prediction("same", 7, 0.1)).unwrap();
        db.record(&prediction("same", 7, 0.8)).unwrap();

        assert_eq!(db.get_prediction_count().unwrap(), 1);
        let stored = db.get_prediction(7).unwrap().expect("row exists");
        assert!((stored.confidence - 0.8).abs() < 1e-6);
    }

    #[test]
    fn unknown_hash_reads_as_none() {
        let db = Database::in_memory().unwrap();
        assert!(db.get_prediction(1).unwrap().is_none());
    }

    #[test]
    fn logs_are_returned_newest_first() {
        let db = Database::in_memory().unwrap();
        db.record_log("bad_input", "first").unwrap();
        db.record_log("inference_error", "second").unwrap();

        let logs = db.get_recent_logs(10).unwrap();
        assert_eq!(logs.len(), 2);
        assert_eq!(logs[0].log_type, "inference_error");
        assert_eq!(logs[1].message, "first");
    }
}
