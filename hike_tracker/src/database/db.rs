use std::{path::Path, str::FromStr};

use const_format::concatcp;
use serde::{de::DeserializeOwned, Serialize};
use sqlx::{
    query, query_as,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    Executor, Pool, Sqlite, SqlitePool,
};

use crate::TrackerError;

use super::constants::*;

/// Small persistent key-value store for app state that must survive restarts.
/// Values are stored as JSON text.
#[derive(Clone)]
pub struct KeyValueStore {
    pool: Pool<Sqlite>,
}

impl KeyValueStore {
    pub async fn connect(path: &Path) -> Result<Self, TrackerError> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);

        let pool = SqlitePool::connect_with(options)
            .await
            .map_err(|err| TrackerError::Storage(format!("Failed to open database {}: {err}", path.display())))?;

        let store = Self { pool };
        store.init().await?;

        Ok(store)
    }

    /// A throwaway store. The pool is pinned to a single connection, since
    /// every sqlite memory connection is its own database.
    pub async fn in_memory() -> Result<Self, TrackerError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.init().await?;

        Ok(store)
    }

    async fn init(&self) -> Result<(), TrackerError> {
        self.pool
            .execute(concatcp!(
                "CREATE TABLE IF NOT EXISTS ", KEY_VALUE_TABLE_NAME, "(",
                    KEY,   " TEXT PRIMARY KEY,",
                    VALUE, " TEXT NOT NULL)"
            ))
            .await
            .map_err(|err| TrackerError::Storage(format!("Failed to create key-value table: {err}")))?;
        Ok(())
    }

    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, TrackerError> {
        let row = query_as::<_, (String,)>(concatcp!("SELECT ", VALUE, " FROM ", KEY_VALUE_TABLE_NAME, " WHERE ", KEY, " = ?1"))
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(|err| TrackerError::Storage(format!("Failed to read {key}: {err}")))?;

        let Some((json,)) = row else {
            return Ok(None);
        };

        serde_json::from_str(&json)
            .map(Some)
            .map_err(|err| TrackerError::Storage(format!("Stored value for {key} is unreadable: {err}")))
    }

    pub async fn set<T: Serialize>(&self, key: &str, value: &T) -> Result<(), TrackerError> {
        let json = serde_json::to_string(value)
            .map_err(|err| TrackerError::Storage(format!("Failed to serialize {key}: {err}")))?;

        query(concatcp!(
            "INSERT INTO ", KEY_VALUE_TABLE_NAME, "(", KEY, ", ", VALUE, ") VALUES (?1, ?2)
            ON CONFLICT(", KEY, ") DO UPDATE SET ", VALUE, " = excluded.", VALUE
        ))
            .bind(key)
            .bind(json)
            .execute(&self.pool)
            .await
            .map_err(|err| TrackerError::Storage(format!("Failed to write {key}: {err}")))
            .map(|_| ())
    }

    pub async fn remove(&self, key: &str) -> Result<(), TrackerError> {
        query(concatcp!("DELETE FROM ", KEY_VALUE_TABLE_NAME, " WHERE ", KEY, " = ?1"))
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(|err| TrackerError::Storage(format!("Failed to remove {key}: {err}")))
            .map(|_| ())
    }
}
