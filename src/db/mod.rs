use crate::errors::{AppError, AppResult};
use crate::persistence::KvAdapter;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

const SCHEMA_SQL: &str = include_str!("schema.sql");

#[derive(Debug)]
pub struct Database {
    conn: Mutex<Connection>,
    db_path: PathBuf,
}

impl Database {
    pub fn new(path: &Path) -> AppResult<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|err| AppError::Io(err.to_string()))?;
        }
        let conn = Connection::open(path).map_err(AppError::from)?;
        conn.execute_batch(SCHEMA_SQL).map_err(AppError::from)?;

        Ok(Self {
            conn: Mutex::new(conn),
            db_path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    fn lock(&self) -> AppResult<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| AppError::Internal("database mutex poisoned".to_string()))
    }
}

impl KvAdapter for Database {
    fn get(&self, key: &str) -> AppResult<Option<String>> {
        let conn = self.lock()?;
        let raw = conn
            .query_row(
                "SELECT value FROM kv_blobs WHERE key = ?1",
                params![key],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(raw)
    }

    fn set(&self, key: &str, value: &str) -> AppResult<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO kv_blobs (key, value, updated_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            params![key, value, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    fn remove(&self, key: &str) -> AppResult<()> {
        let conn = self.lock()?;
        conn.execute("DELETE FROM kv_blobs WHERE key = ?1", params![key])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::Database;
    use crate::persistence::KvAdapter;

    #[test]
    fn database_can_write_and_read_blobs() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db_path = dir.path().join("nested").join("state.sqlite");
        let db = Database::new(&db_path).expect("db");

        db.set("tasks", "[]").expect("set");
        db.set("tasks", "[{\"id\":\"x\"}]").expect("overwrite");
        assert_eq!(db.get("tasks").expect("get").as_deref(), Some("[{\"id\":\"x\"}]"));

        db.remove("tasks").expect("remove");
        assert_eq!(db.get("tasks").expect("get"), None);
    }

    #[test]
    fn blobs_survive_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db_path = dir.path().join("state.sqlite");
        {
            let db = Database::new(&db_path).expect("db");
            db.set("notes", "[]").expect("set");
        }
        let reopened = Database::new(&db_path).expect("reopen");
        assert_eq!(reopened.get("notes").expect("get").as_deref(), Some("[]"));
        assert_eq!(reopened.path(), db_path.as_path());
    }
}
