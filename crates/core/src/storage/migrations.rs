//! Schema setup for the SQLite key/value table.
//!
//! The schema version is kept in SQLite's own `user_version` header field
//! rather than a bookkeeping table. A fresh file is stamped with the current
//! version; a file stamped by a newer build is refused.

use tokio_rusqlite::Connection;

use crate::Error;

pub const SCHEMA_VERSION: i64 = 1;

const KV_SCHEMA: &str = include_str!("../../migrations/001_kv_store.sql");

/// Create the `kv` table on a fresh database, or confirm an existing one.
pub async fn ensure_schema(conn: &Connection) -> Result<(), Error> {
    let created = conn
        .call(|conn| -> Result<bool, Error> {
            let found: i64 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
            match found {
                SCHEMA_VERSION => Ok(false),
                0 => {
                    let tx = conn.transaction()?;
                    tx.execute_batch(KV_SCHEMA).map_err(|e| Error::MigrationFailed(format!("kv schema: {e}")))?;
                    tx.pragma_update(None, "user_version", SCHEMA_VERSION)?;
                    tx.commit()?;
                    Ok(true)
                }
                newer => Err(Error::MigrationFailed(format!(
                    "store has schema v{newer}, this build understands up to v{SCHEMA_VERSION}"
                ))),
            }
        })
        .await?;

    if created {
        tracing::debug!(version = SCHEMA_VERSION, "created kv schema");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn user_version(conn: &Connection) -> i64 {
        conn.call(|conn| conn.pragma_query_value(None, "user_version", |row| row.get::<_, i64>(0)))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_fresh_database_is_stamped() {
        let conn = Connection::open_in_memory().await.unwrap();
        ensure_schema(&conn).await.unwrap();
        ensure_schema(&conn).await.unwrap();

        let has_kv: bool = conn
            .call(|conn| {
                conn.query_row("SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name='kv')", [], |row| {
                    row.get(0)
                })
            })
            .await
            .unwrap();
        assert!(has_kv);
        assert_eq!(user_version(&conn).await, SCHEMA_VERSION);
    }

    #[tokio::test]
    async fn test_newer_schema_is_refused() {
        let conn = Connection::open_in_memory().await.unwrap();
        conn.call(|conn| conn.pragma_update(None, "user_version", SCHEMA_VERSION + 1)).await.unwrap();

        assert!(matches!(ensure_schema(&conn).await, Err(Error::MigrationFailed(_))));
        assert_eq!(user_version(&conn).await, SCHEMA_VERSION + 1);
    }
}
