use tokio_rusqlite::Connection;

use crate::error::StoreError;

use super::schema::SCHEMA;

/// Serializes every mutation of the persistent store. All writes go
/// through [`perform`](Self::perform), which wraps the closure in a
/// rusqlite transaction on the connection's single worker thread. The
/// worker drains calls in arrival order, so callers queue FIFO and
/// exactly one transaction body runs at a time.
pub struct TransactionCoordinator {
    conn: Connection,
}

impl TransactionCoordinator {
    pub async fn open(db_path: &str) -> Result<Self, StoreError> {
        let conn = Connection::open(db_path).await?;
        Self::init(conn).await
    }

    /// In-memory store, used by tests and throwaway hosts.
    pub async fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().await?;
        Self::init(conn).await
    }

    async fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.call(|conn| {
            conn.pragma_update(None, "foreign_keys", "ON")?;
            conn.execute_batch(SCHEMA)?;
            Ok(())
        })
        .await?;

        Ok(Self { conn })
    }

    /// Run `f` inside a transaction. Commits iff `f` returns Ok; any
    /// error rolls the store back to its last-committed state and is
    /// surfaced unchanged. Dropping the returned future does not wedge
    /// the worker: the transaction still runs to completion and its
    /// result is discarded.
    pub async fn perform<T, F>(&self, name: &'static str, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&rusqlite::Transaction<'_>) -> rusqlite::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let result = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                let value = f(&tx)?;
                tx.commit()?;
                Ok(value)
            })
            .await;

        match result {
            Ok(value) => Ok(value),
            Err(e) => {
                tracing::debug!("transaction {} rolled back: {}", name, e);
                Err(e.into())
            }
        }
    }

    /// Read-only access outside a transaction. Callers must tolerate
    /// not-yet-committed races; anything needing consistency goes
    /// through [`perform`](Self::perform).
    pub async fn read<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&rusqlite::Connection) -> rusqlite::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let value = self.conn.call(move |conn| Ok(f(conn)?)).await?;
        Ok(value)
    }
}
