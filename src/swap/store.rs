use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{Context as _, Result};
use rusqlite::{Connection, OptionalExtension as _, params};
use serde::de::DeserializeOwned;

use super::id::SwapId;
use super::requested::RequestedSwap;
use super::services::{RequestedSwapsStore, SwapStore};
use super::SwapRecord;

/// Swap records and rejected requests in one sqlite file. Each row holds
/// the JSON document of its record.
#[derive(Debug)]
pub struct SqliteSwapStore {
    conn: Mutex<Connection>,
    path: PathBuf,
}

impl SqliteSwapStore {
    pub fn open(path: PathBuf) -> Result<Self> {
        if let Some(dir) = path.parent()
            && !dir.as_os_str().is_empty()
        {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("create swap store dir {}", dir.display()))?;
        }

        let conn =
            Connection::open(&path).with_context(|| format!("open sqlite {}", path.display()))?;
        conn.busy_timeout(Duration::from_secs(5))
            .context("set sqlite busy_timeout")?;
        conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA foreign_keys = ON;")
            .context("configure sqlite pragmas")?;

        migrate(&conn).context("migrate sqlite schema")?;

        Ok(Self {
            conn: Mutex::new(conn),
            path,
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("open in-memory sqlite")?;
        migrate(&conn).context("migrate sqlite schema")?;
        Ok(Self {
            conn: Mutex::new(conn),
            path: PathBuf::from(":memory:"),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn query_records(&self, sql: &str, args: impl rusqlite::Params) -> Result<Vec<SwapRecord>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(sql).context("prepare list swaps")?;
        let rows = stmt
            .query_map(args, |row| document(row, 0))
            .context("query list swaps")?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row.context("read swap row")?);
        }
        Ok(out)
    }
}

impl SwapStore for SqliteSwapStore {
    fn update_data(&self, record: &SwapRecord) -> Result<()> {
        let doc = serde_json::to_string(record)
            .with_context(|| format!("encode swap {}", record.swap_id))?;
        self.conn()
            .execute(
                r#"
INSERT INTO swaps (swap_id, peer_node_id, current_state, document, updated_at)
VALUES (?1, ?2, ?3, ?4, ?5)
ON CONFLICT(swap_id) DO UPDATE SET
  current_state = excluded.current_state,
  document = excluded.document,
  updated_at = excluded.updated_at
"#,
                params![
                    record.swap_id.to_string(),
                    &record.data.peer_node_id,
                    record.current.as_str(),
                    doc,
                    unix_now(),
                ],
            )
            .with_context(|| format!("upsert swap {}", record.swap_id))?;
        Ok(())
    }

    fn get_data(&self, swap_id: &SwapId) -> Result<Option<SwapRecord>> {
        self.conn()
            .query_row(
                "SELECT document FROM swaps WHERE swap_id = ?1",
                params![swap_id.to_string()],
                |row| document(row, 0),
            )
            .optional()
            .with_context(|| format!("get swap {swap_id}"))
    }

    fn list_all(&self) -> Result<Vec<SwapRecord>> {
        self.query_records("SELECT document FROM swaps ORDER BY swap_id", [])
    }

    fn list_all_by_peer(&self, peer_id: &str) -> Result<Vec<SwapRecord>> {
        self.query_records(
            "SELECT document FROM swaps WHERE peer_node_id = ?1 ORDER BY swap_id",
            params![peer_id],
        )
    }
}

impl RequestedSwapsStore for SqliteSwapStore {
    fn add(&self, peer_id: &str, request: RequestedSwap) -> Result<()> {
        let doc = serde_json::to_string(&request).context("encode requested swap")?;
        self.conn()
            .execute(
                "INSERT INTO requested_swaps (peer_node_id, document) VALUES (?1, ?2)",
                params![peer_id, doc],
            )
            .with_context(|| format!("insert requested swap from {peer_id}"))?;
        Ok(())
    }

    fn get_all(&self) -> Result<BTreeMap<String, Vec<RequestedSwap>>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare("SELECT peer_node_id, document FROM requested_swaps ORDER BY id")
            .context("prepare list requested swaps")?;
        let rows = stmt
            .query_map([], |row| {
                let peer: String = row.get(0)?;
                Ok((peer, document::<RequestedSwap>(row, 1)?))
            })
            .context("query list requested swaps")?;

        let mut out: BTreeMap<String, Vec<RequestedSwap>> = BTreeMap::new();
        for row in rows {
            let (peer, request) = row.context("read requested swap row")?;
            out.entry(peer).or_default().push(request);
        }
        Ok(out)
    }
}

fn migrate(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
CREATE TABLE IF NOT EXISTS swaps (
  swap_id TEXT PRIMARY KEY,
  peer_node_id TEXT NOT NULL,
  current_state TEXT NOT NULL,
  document TEXT NOT NULL,
  updated_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS swaps_peer_idx ON swaps(peer_node_id);
CREATE TABLE IF NOT EXISTS requested_swaps (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  peer_node_id TEXT NOT NULL,
  document TEXT NOT NULL
);
"#,
    )
    .context("create tables")?;
    Ok(())
}

fn document<T: DeserializeOwned>(row: &rusqlite::Row<'_>, col: usize) -> rusqlite::Result<T> {
    let raw: String = row.get(col)?;
    serde_json::from_str(&raw).map_err(|err| {
        rusqlite::Error::FromSqlConversionFailure(col, rusqlite::types::Type::Text, err.into())
    })
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}
