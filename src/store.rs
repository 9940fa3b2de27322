//! Input-item store contract (C13, §4.12).
//!
//! Append-only log of a response's input and output items, keyed by response
//! id, ordered by an auto-increment sequence column scoped to that id. Uses
//! `rusqlite` with the `bundled` feature for a zero-external-dependency
//! embedded store; a production deployment may swap in a different
//! repository behind the same shape.

use std::sync::Arc;

use rusqlite::Connection;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task;

use crate::error::OrchestratorError;
use crate::model::InputItem;

/// Which half of a response's history a row belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ItemKind {
    Input,
    Output,
}

impl ItemKind {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Input => "input",
            Self::Output => "output",
        }
    }
}

/// sqlite-backed append-only log of input/output items per response id (C13).
pub struct ItemStore {
    conn: Arc<AsyncMutex<Connection>>,
}

impl ItemStore {
    /// Opens (creating if absent) the item-store table at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::Storage`] if the sqlite connection or
    /// schema migration fails.
    pub fn open(path: &str) -> Result<Self, OrchestratorError> {
        let conn = Connection::open(path)
            .map_err(|e| OrchestratorError::Storage(format!("opening item store: {e}")))?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS response_items (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                response_id TEXT NOT NULL,
                kind TEXT NOT NULL,
                payload TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_response_items_response
                ON response_items(response_id, kind, seq);",
        )
        .map_err(|e| OrchestratorError::Storage(format!("migrating item store schema: {e}")))?;
        Ok(Self {
            conn: Arc::new(AsyncMutex::new(conn)),
        })
    }

    /// Appends a response's input and output items (§4.12 `store`).
    ///
    /// Best-effort but durable: a failure here is surfaced to the caller as
    /// [`OrchestratorError::Storage`] without unwinding a response that has
    /// already been handed back (§7 `storage-failure`) — callers that set
    /// `store: true` should log and continue rather than fail the request.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::Storage`] if the write transaction fails.
    pub async fn store(
        &self,
        response_id: &str,
        input_items: &[InputItem],
        output_items: &[InputItem],
    ) -> Result<(), OrchestratorError> {
        let conn = Arc::clone(&self.conn);
        let response_id = response_id.to_string();
        let input_payloads = input_items
            .iter()
            .map(serde_json::to_string)
            .collect::<Result<Vec<_>, _>>()?;
        let output_payloads = output_items
            .iter()
            .map(serde_json::to_string)
            .collect::<Result<Vec<_>, _>>()?;

        task::spawn_blocking(move || -> Result<(), OrchestratorError> {
            let mut conn = conn.blocking_lock();
            let tx = conn
                .transaction()
                .map_err(|e| OrchestratorError::Storage(format!("begin transaction: {e}")))?;
            for payload in &input_payloads {
                insert_item(&tx, &response_id, ItemKind::Input, payload)?;
            }
            for payload in &output_payloads {
                insert_item(&tx, &response_id, ItemKind::Output, payload)?;
            }
            tx.commit()
                .map_err(|e| OrchestratorError::Storage(format!("committing transaction: {e}")))?;
            Ok(())
        })
        .await
        .map_err(|e| OrchestratorError::Storage(format!("store task panicked: {e}")))?
    }

    /// Returns `true` if any items have ever been stored under `response_id`.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::Storage`] on a read failure.
    pub async fn has_response(&self, response_id: &str) -> Result<bool, OrchestratorError> {
        let conn = Arc::clone(&self.conn);
        let response_id = response_id.to_string();
        task::spawn_blocking(move || -> Result<bool, OrchestratorError> {
            let conn = conn.blocking_lock();
            let count: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM response_items WHERE response_id = ?1",
                    [&response_id],
                    |row| row.get(0),
                )
                .map_err(|e| OrchestratorError::Storage(format!("checking response: {e}")))?;
            Ok(count > 0)
        })
        .await
        .map_err(|e| OrchestratorError::Storage(format!("lookup task panicked: {e}")))?
    }

    /// Fetches the ordered input items stored under `response_id` (§4.12 `getInputItems`).
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::PreviousResponseNotFound`] if no response
    /// with this id was ever stored, or [`OrchestratorError::Storage`] on a
    /// read failure.
    pub async fn get_input_items(&self, response_id: &str) -> Result<Vec<InputItem>, OrchestratorError> {
        self.get_items(response_id, ItemKind::Input).await
    }

    /// Fetches the ordered output items stored under `response_id` (§4.12 `getOutputItems`).
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::PreviousResponseNotFound`] if no response
    /// with this id was ever stored, or [`OrchestratorError::Storage`] on a
    /// read failure.
    pub async fn get_output_items(&self, response_id: &str) -> Result<Vec<InputItem>, OrchestratorError> {
        self.get_items(response_id, ItemKind::Output).await
    }

    async fn get_items(&self, response_id: &str, kind: ItemKind) -> Result<Vec<InputItem>, OrchestratorError> {
        if !self.has_response(response_id).await? {
            return Err(OrchestratorError::PreviousResponseNotFound(response_id.to_string()));
        }
        let conn = Arc::clone(&self.conn);
        let response_id = response_id.to_string();
        let payloads = task::spawn_blocking(move || -> Result<Vec<String>, OrchestratorError> {
            let conn = conn.blocking_lock();
            let mut stmt = conn
                .prepare(
                    "SELECT payload FROM response_items
                     WHERE response_id = ?1 AND kind = ?2
                     ORDER BY seq ASC",
                )
                .map_err(|e| OrchestratorError::Storage(format!("preparing item scan: {e}")))?;
            let rows = stmt
                .query_map(rusqlite::params![response_id, kind.as_str()], |row| row.get::<_, String>(0))
                .map_err(|e| OrchestratorError::Storage(format!("scanning items: {e}")))?;
            let mut payloads = Vec::new();
            for row in rows {
                payloads.push(row.map_err(|e| OrchestratorError::Storage(format!("reading item row: {e}")))?);
            }
            Ok(payloads)
        })
        .await
        .map_err(|e| OrchestratorError::Storage(format!("item scan task panicked: {e}")))??;

        payloads
            .into_iter()
            .map(|payload| serde_json::from_str(&payload).map_err(OrchestratorError::from))
            .collect()
    }
}

fn insert_item(
    tx: &rusqlite::Transaction<'_>,
    response_id: &str,
    kind: ItemKind,
    payload: &str,
) -> Result<(), OrchestratorError> {
    tx.execute(
        "INSERT INTO response_items (response_id, kind, payload) VALUES (?1, ?2, ?3)",
        rusqlite::params![response_id, kind.as_str(), payload],
    )
    .map_err(|e| OrchestratorError::Storage(format!("inserting item: {e}")))?;
    Ok(())
}
