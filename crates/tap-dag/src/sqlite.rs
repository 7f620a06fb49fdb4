// SPDX-License-Identifier: MIT OR Apache-2.0

//! SQLite persistence backend.

use crate::store::{DagStore, validate_node};
use rusqlite::{Connection, OptionalExtension, params};
use std::path::Path;
use std::sync::Mutex;
use tap_core::{Node, TapError};

/// Durable [`DagStore`] backed by a single SQLite database.
///
/// Idempotent insertion uses `INSERT OR IGNORE` keyed on the node hash,
/// and the `parent_hash` index serves `children_of` and the leaf
/// anti-join. The connection lives behind a mutex; independent handles
/// opened on the same path see each other's writes.
pub struct SqliteStore {
    conn: Mutex<Option<Connection>>,
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS nodes (
    hash        TEXT PRIMARY KEY,
    parent_hash TEXT,
    bucket      TEXT NOT NULL,
    stop_reason TEXT,
    usage       TEXT,
    project     TEXT
);
CREATE INDEX IF NOT EXISTS idx_nodes_parent ON nodes(parent_hash);
";

const NODE_COLUMNS: &str = "hash, parent_hash, bucket, stop_reason, usage, project";

type NodeRow = (
    String,
    Option<String>,
    String,
    Option<String>,
    Option<String>,
    Option<String>,
);

impl SqliteStore {
    /// Open (creating if needed) a store at `path`.
    ///
    /// # Errors
    ///
    /// [`TapError::Storage`] when the database cannot be opened or the
    /// schema cannot be created.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, TapError> {
        let conn = Connection::open(path).map_err(db_err)?;
        Self::with_connection(conn)
    }

    /// Open an ephemeral in-memory database. Used by tests.
    ///
    /// # Errors
    ///
    /// [`TapError::Storage`] when the database cannot be opened.
    pub fn open_in_memory() -> Result<Self, TapError> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self, TapError> {
        conn.execute_batch(SCHEMA).map_err(db_err)?;
        Ok(Self {
            conn: Mutex::new(Some(conn)),
        })
    }

    fn with_conn<T>(
        &self,
        f: impl FnOnce(&Connection) -> Result<T, TapError>,
    ) -> Result<T, TapError> {
        let guard = self.conn.lock().expect("store lock poisoned");
        match guard.as_ref() {
            Some(conn) => f(conn),
            None => Err(TapError::Storage("store is closed".to_string())),
        }
    }

    fn select_nodes(
        &self,
        where_clause: &str,
        args: &[&dyn rusqlite::ToSql],
    ) -> Result<Vec<Node>, TapError> {
        self.with_conn(|conn| {
            let sql =
                format!("SELECT {NODE_COLUMNS} FROM nodes {where_clause} ORDER BY rowid");
            let mut stmt = conn.prepare(&sql).map_err(db_err)?;
            let rows = stmt
                .query_map(args, row_to_tuple)
                .map_err(db_err)?
                .collect::<Result<Vec<NodeRow>, _>>()
                .map_err(db_err)?;
            rows.into_iter().map(tuple_to_node).collect()
        })
    }
}

impl DagStore for SqliteStore {
    fn put(&self, node: &Node) -> Result<bool, TapError> {
        validate_node(node)?;
        let bucket = serde_json::to_string(&node.bucket)
            .map_err(|e| TapError::Storage(format!("encode bucket: {e}")))?;
        let usage = node
            .usage
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| TapError::Storage(format!("encode usage: {e}")))?;
        self.with_conn(|conn| {
            let changed = conn
                .execute(
                    "INSERT OR IGNORE INTO nodes \
                     (hash, parent_hash, bucket, stop_reason, usage, project) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    params![
                        node.hash,
                        node.parent_hash,
                        bucket,
                        node.stop_reason,
                        usage,
                        node.project
                    ],
                )
                .map_err(db_err)?;
            Ok(changed > 0)
        })
    }

    fn get(&self, hash: &str) -> Result<Node, TapError> {
        let row = self.with_conn(|conn| {
            conn.query_row(
                &format!("SELECT {NODE_COLUMNS} FROM nodes WHERE hash = ?1"),
                params![hash],
                row_to_tuple,
            )
            .optional()
            .map_err(db_err)
        })?;
        match row {
            Some(row) => tuple_to_node(row),
            None => Err(TapError::NotFound(hash.to_string())),
        }
    }

    fn has(&self, hash: &str) -> Result<bool, TapError> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT 1 FROM nodes WHERE hash = ?1",
                params![hash],
                |_| Ok(()),
            )
            .optional()
            .map_err(db_err)
            .map(|found| found.is_some())
        })
    }

    fn children_of(&self, parent: Option<&str>) -> Result<Vec<Node>, TapError> {
        match parent {
            None => self.select_nodes("WHERE parent_hash IS NULL", &[]),
            Some(p) => self.select_nodes("WHERE parent_hash = ?1", &[&p]),
        }
    }

    fn list(&self) -> Result<Vec<Node>, TapError> {
        self.select_nodes("", &[])
    }

    fn leaves(&self) -> Result<Vec<Node>, TapError> {
        self.select_nodes(
            "WHERE hash NOT IN \
             (SELECT parent_hash FROM nodes WHERE parent_hash IS NOT NULL)",
            &[],
        )
    }

    fn close(&self) -> Result<(), TapError> {
        let mut guard = self.conn.lock().expect("store lock poisoned");
        if let Some(conn) = guard.take() {
            conn.close()
                .map_err(|(_, e)| TapError::Storage(format!("close: {e}")))?;
        }
        Ok(())
    }
}

fn db_err(err: rusqlite::Error) -> TapError {
    TapError::Storage(err.to_string())
}

fn row_to_tuple(row: &rusqlite::Row<'_>) -> rusqlite::Result<NodeRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
    ))
}

fn tuple_to_node(row: NodeRow) -> Result<Node, TapError> {
    let (hash, parent_hash, bucket, stop_reason, usage, project) = row;
    let bucket = serde_json::from_str(&bucket)
        .map_err(|e| TapError::Storage(format!("decode bucket: {e}")))?;
    let usage = usage
        .as_deref()
        .map(serde_json::from_str)
        .transpose()
        .map_err(|e| TapError::Storage(format!("decode usage: {e}")))?;
    Ok(Node {
        hash,
        parent_hash,
        bucket,
        stop_reason,
        usage,
        project,
    })
}
