//! Relational persistence.
//!
//! Batches are rows of a single `persistence(id, data)` table, created on
//! startup if absent. Mutual exclusion across concurrent fetchers (including
//! other agent instances pointed at the same database) comes from the
//! `SELECT ... FOR UPDATE` row lock: the row is claimed and deleted inside a
//! SQL transaction that stays open until the publisher commits or rolls back.

use crate::config::DatabaseStoreConfig;
use crate::error::StoreError;
use crate::store::{Fetched, Persister, Transaction};
use async_trait::async_trait;
use sqlx::mysql::{MySqlConnectOptions, MySqlPool, MySqlPoolOptions};
use sqlx::{MySql, Row};

const CREATE_TABLE: &str = "CREATE TABLE IF NOT EXISTS persistence \
     (id INT NOT NULL AUTO_INCREMENT, data LONGTEXT NOT NULL, PRIMARY KEY (id))";

/// MySQL-backed batch store.
pub struct DatabasePersister {
    pool: MySqlPool,
}

impl DatabasePersister {
    /// Connect to the configured database and make sure the `persistence`
    /// table exists.
    pub async fn connect(config: &DatabaseStoreConfig) -> Result<Self, StoreError> {
        if config.protocol != "tcp" {
            return Err(StoreError::Database(sqlx::Error::Configuration(
                format!("unsupported database protocol {:?}", config.protocol).into(),
            )));
        }
        let options = MySqlConnectOptions::new()
            .host(&config.host)
            .port(config.port)
            .username(&config.username)
            .password(&config.password)
            .database(&config.name);
        let pool = MySqlPoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;
        sqlx::query(CREATE_TABLE).execute(&pool).await?;
        Ok(Self { pool })
    }

    /// Claim and delete one row inside `tx`, returning its payload. The
    /// delete only takes effect when the caller commits `tx`.
    async fn claim_row(
        tx: &mut sqlx::Transaction<'static, MySql>,
    ) -> Result<Option<String>, StoreError> {
        let row = sqlx::query("SELECT id, data FROM persistence LIMIT 1 FOR UPDATE")
            .fetch_optional(&mut **tx)
            .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        let id: i32 = row.try_get("id")?;
        let data: String = row.try_get("data")?;
        if data.is_empty() || data == "[]" {
            return Ok(None);
        }
        sqlx::query("DELETE FROM persistence WHERE id = ?")
            .bind(id)
            .execute(&mut **tx)
            .await?;
        Ok(Some(data))
    }
}

#[async_trait]
impl Persister for DatabasePersister {
    async fn write(&self, batch: &str) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("INSERT INTO persistence(data) VALUES (?)")
            .bind(batch)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn fetch(&self) -> Result<Option<Fetched>, StoreError> {
        let mut tx = self.pool.begin().await?;
        match Self::claim_row(&mut tx).await {
            Ok(Some(data)) => {
                let txn = DatabaseTransaction { tx };
                Ok(Some((data, Box::new(txn))))
            }
            // Nothing usable: release the row lock before reporting empty.
            Ok(None) => {
                tx.rollback().await?;
                Ok(None)
            }
            Err(err) => {
                if let Err(rollback_err) = tx.rollback().await {
                    tracing::warn!(%rollback_err, "could not roll back the fetch transaction");
                }
                Err(err)
            }
        }
    }
}

/// Wraps the open SQL transaction holding the row lock. Dropping it without
/// committing rolls back, which also covers a panicking caller.
struct DatabaseTransaction {
    tx: sqlx::Transaction<'static, MySql>,
}

#[async_trait]
impl Transaction for DatabaseTransaction {
    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.rollback().await?;
        Ok(())
    }
}
