use crate::error::DbError;
use crate::models::FailureReason;
use rusqlite::{params, Connection};
use std::path::PathBuf;
use std::sync::Mutex;

pub const STATUS_OK: &str = "ok";
pub const STATUS_FAILED: &str = "failed";

/// Run history: one row per run, one row per processed ticket.
pub struct Db {
    conn: Mutex<Connection>,
}

impl Db {
    pub fn new(db_path: PathBuf) -> Result<Self, DbError> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Self::init(Connection::open(&db_path)?)
    }

    pub fn open_in_memory() -> Result<Self, DbError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, DbError> {
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS runs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                created_at TEXT NOT NULL,
                kind TEXT NOT NULL,
                run_dir TEXT NOT NULL,
                start_date TEXT NOT NULL,
                end_date TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS ticket_results (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                run_id INTEGER NOT NULL,
                ticket TEXT NOT NULL,
                status TEXT NOT NULL,
                error_kind TEXT,
                error_message TEXT,
                recorded_at TEXT NOT NULL,
                FOREIGN KEY (run_id) REFERENCES runs(id)
            );
            CREATE INDEX IF NOT EXISTS idx_ticket_results_run ON ticket_results(run_id, status);
            ",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn start_run(
        &self,
        kind: &str,
        run_dir: &str,
        start_date: &str,
        end_date: &str,
    ) -> Result<i64, DbError> {
        let created_at = chrono::Utc::now().to_rfc3339();
        let conn = self.conn.lock().map_err(|_| DbError::Poisoned)?;
        conn.execute(
            "INSERT INTO runs (created_at, kind, run_dir, start_date, end_date) VALUES (?, ?, ?, ?, ?)",
            params![created_at, kind, run_dir, start_date, end_date],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn record_ticket(
        &self,
        run_id: i64,
        ticket: &str,
        failure: Option<&FailureReason>,
    ) -> Result<(), DbError> {
        let recorded_at = chrono::Utc::now().to_rfc3339();
        let status = if failure.is_some() { STATUS_FAILED } else { STATUS_OK };
        let conn = self.conn.lock().map_err(|_| DbError::Poisoned)?;
        conn.execute(
            "INSERT INTO ticket_results (run_id, ticket, status, error_kind, error_message, recorded_at) VALUES (?, ?, ?, ?, ?, ?)",
            params![
                run_id,
                ticket,
                status,
                failure.map(|f| f.kind()),
                failure.map(|f| f.detail()),
                recorded_at
            ],
        )?;
        Ok(())
    }

    /// Ticket numbers that failed in `run_id`, in processing order.
    pub fn failed_tickets(&self, run_id: i64) -> Result<Vec<String>, DbError> {
        let conn = self.conn.lock().map_err(|_| DbError::Poisoned)?;
        let mut stmt = conn.prepare(
            "SELECT ticket FROM ticket_results WHERE run_id = ? AND status = ? ORDER BY id",
        )?;
        let rows = stmt.query_map(params![run_id, STATUS_FAILED], |row| row.get(0))?;
        let tickets = rows.collect::<Result<Vec<String>, _>>()?;
        Ok(tickets)
    }

    pub fn run_exists(&self, run_id: i64) -> Result<bool, DbError> {
        let conn = self.conn.lock().map_err(|_| DbError::Poisoned)?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM runs WHERE id = ?",
            params![run_id],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failed_tickets_are_scoped_to_run() {
        let db = Db::open_in_memory().unwrap();
        let first = db.start_run("extract", "out/1_run", "2024-01-01", "2024-02-01").unwrap();
        let second = db.start_run("extract", "out/2_run", "2024-01-01", "2024-02-01").unwrap();
        assert_ne!(first, second);

        db.record_ticket(first, "CS1", None).unwrap();
        db.record_ticket(first, "CS2", Some(&FailureReason::Llm("429".into()))).unwrap();
        db.record_ticket(first, "CS3", Some(&FailureReason::MalformedOutput("eof".into()))).unwrap();
        db.record_ticket(second, "CS9", Some(&FailureReason::Attachments("404".into()))).unwrap();

        assert_eq!(db.failed_tickets(first).unwrap(), vec!["CS2", "CS3"]);
        assert_eq!(db.failed_tickets(second).unwrap(), vec!["CS9"]);
        assert!(db.failed_tickets(99).unwrap().is_empty());
    }

    #[test]
    fn run_existence() {
        let db = Db::open_in_memory().unwrap();
        let id = db.start_run("classify", "out/r", "2024-01-01", "2024-01-02").unwrap();
        assert!(db.run_exists(id).unwrap());
        assert!(!db.run_exists(id + 1).unwrap());
    }

    #[test]
    fn file_database_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("history.db");
        let id = {
            let db = Db::new(path.clone()).unwrap();
            let id = db.start_run("extract", "r", "a", "b").unwrap();
            db.record_ticket(id, "CS5", Some(&FailureReason::Llm("timeout".into()))).unwrap();
            id
        };
        let db = Db::new(path).unwrap();
        assert_eq!(db.failed_tickets(id).unwrap(), vec!["CS5"]);
    }
}
