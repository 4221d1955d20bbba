//! SQLite-backed document store.
//!
//! One table per collection, documents stored as JSON text keyed by id.
//! Writes are single-document upserts; there are no cross-document
//! transactions (last write wins, as in the upstream system).

use anyhow::Result;
use rusqlite::{params, Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::config::now_ts;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Collection {
    LifecycleState,
    ModelRegistry,
    TrainedModels,
    Forecasts,
}

impl Collection {
    pub fn table(&self) -> &'static str {
        match self {
            Collection::LifecycleState => "lifecycle_state",
            Collection::ModelRegistry => "model_registry",
            Collection::TrainedModels => "trained_models",
            Collection::Forecasts => "forecasts",
        }
    }

    pub const ALL: [Collection; 4] = [
        Collection::LifecycleState,
        Collection::ModelRegistry,
        Collection::TrainedModels,
        Collection::Forecasts,
    ];
}

pub struct DocStore {
    conn: Connection,
}

impl DocStore {
    pub fn new(path: &str) -> Result<Self> {
        Ok(Self { conn: Connection::open(path)? })
    }

    pub fn open_in_memory() -> Result<Self> {
        Ok(Self { conn: Connection::open_in_memory()? })
    }

    pub fn init(&mut self) -> Result<()> {
        let mut sql = String::from("BEGIN;");
        for col in Collection::ALL {
            sql.push_str(&format!(
                "CREATE TABLE IF NOT EXISTS {} (
                    id TEXT PRIMARY KEY,
                    doc TEXT NOT NULL,
                    updated_ts INTEGER NOT NULL
                );",
                col.table()
            ));
        }
        sql.push_str("COMMIT;");
        self.conn.execute_batch(&sql)?;
        Ok(())
    }

    pub fn upsert<T: Serialize>(&mut self, col: Collection, id: &str, doc: &T) -> Result<()> {
        let body = serde_json::to_string(doc)?;
        self.conn.execute(
            &format!(
                "INSERT INTO {} (id, doc, updated_ts) VALUES (?1, ?2, ?3)
                 ON CONFLICT(id) DO UPDATE SET doc = ?2, updated_ts = ?3",
                col.table()
            ),
            params![id, body, now_ts() as i64],
        )?;
        Ok(())
    }

    pub fn get<T: DeserializeOwned>(&self, col: Collection, id: &str) -> Result<Option<T>> {
        let body: Option<String> = self
            .conn
            .query_row(
                &format!("SELECT doc FROM {} WHERE id = ?1", col.table()),
                params![id],
                |row| row.get(0),
            )
            .optional()?;
        match body {
            Some(body) => Ok(Some(serde_json::from_str(&body)?)),
            None => Ok(None),
        }
    }

    /// Most recently updated documents first.
    pub fn list<T: DeserializeOwned>(&self, col: Collection, limit: usize) -> Result<Vec<T>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT doc FROM {} ORDER BY updated_ts DESC LIMIT ?1",
            col.table()
        ))?;
        let rows = stmt.query_map(params![limit as i64], |row| row.get::<_, String>(0))?;
        let mut out = Vec::new();
        for body in rows {
            out.push(serde_json::from_str(&body?)?);
        }
        Ok(out)
    }

    pub fn ids(&self, col: Collection) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT id FROM {} ORDER BY id", col.table()))?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut out = Vec::new();
        for id in rows {
            out.push(id?);
        }
        Ok(out)
    }

    pub fn delete(&mut self, col: Collection, id: &str) -> Result<bool> {
        let n = self.conn.execute(
            &format!("DELETE FROM {} WHERE id = ?1", col.table()),
            params![id],
        )?;
        Ok(n > 0)
    }

    pub fn count(&self, col: Collection) -> Result<u64> {
        let n: i64 = self.conn.query_row(
            &format!("SELECT COUNT(*) FROM {}", col.table()),
            [],
            |row| row.get(0),
        )?;
        Ok(n as u64)
    }
}
