//! PostgreSQL stores.
//!
//! Expected tables (provisioned outside this crate). `follow_events` is
//! written by the producers of the events; followers only read it.
//!
//! ```sql
//! CREATE TABLE follow_events (
//!     entity_id  TEXT   NOT NULL,
//!     version    BIGINT NOT NULL,
//!     timestamp  BIGINT NOT NULL,
//!     type_name  TEXT   NOT NULL,
//!     payload    BYTEA  NOT NULL,
//!     PRIMARY KEY (entity_id, version)
//! );
//!
//! CREATE TABLE follow_snapshots (
//!     entity_id  TEXT   PRIMARY KEY,
//!     version    BIGINT NOT NULL,
//!     timestamp  BIGINT NOT NULL,
//!     data       JSONB  NOT NULL
//! );
//! ```

use async_trait::async_trait;
use sqlx::{postgres::PgPoolOptions, PgPool, Row};
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use super::{EventStorage, SnapshotStorage};
use crate::config::DatabaseConfig;
use crate::error::{FollowError, Result};
use crate::events::{EntityId, Event, EventTypeRegistry, EventWrapper};
use crate::state::FollowState;

/// Create a connection pool from configuration.
pub async fn connect(config: &DatabaseConfig) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(Duration::from_secs(5))
        .connect(&config.url)
        .await?;

    tracing::info!(
        max_connections = config.max_connections,
        "Connected to PostgreSQL"
    );
    Ok(pool)
}

fn to_db_version(version: u64) -> Result<i64> {
    i64::try_from(version)
        .map_err(|_| FollowError::validation(format!("Version {} out of range", version)))
}

fn from_db_version(version: i64) -> Result<u64> {
    u64::try_from(version)
        .map_err(|_| FollowError::event_store(format!("Negative version {} in store", version)))
}

// =============================================================================
// Event Storage
// =============================================================================

/// Event log in `follow_events`; payloads are decoded through the type registry.
pub struct PgEventStorage<E> {
    pool: PgPool,
    registry: Arc<EventTypeRegistry<E>>,
    _event: PhantomData<fn() -> E>,
}

impl<E: Event> PgEventStorage<E> {
    pub fn new(pool: PgPool, registry: Arc<EventTypeRegistry<E>>) -> Self {
        Self {
            pool,
            registry,
            _event: PhantomData,
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl<E: Event> EventStorage<E> for PgEventStorage<E> {
    async fn get_list(
        &self,
        entity_id: &EntityId,
        from_exclusive: u64,
        to_inclusive: u64,
    ) -> Result<Vec<E>> {
        let rows = sqlx::query(
            r#"
            SELECT version, type_name, payload
            FROM follow_events
            WHERE entity_id = $1 AND version > $2 AND version <= $3
            ORDER BY version
            "#,
        )
        .bind(entity_id.as_str())
        .bind(to_db_version(from_exclusive)?)
        .bind(to_db_version(to_inclusive)?)
        .fetch_all(&self.pool)
        .await?;

        let mut events = Vec::with_capacity(rows.len());
        for row in rows {
            let version = from_db_version(row.try_get("version")?)?;
            let wrapper = EventWrapper::new(
                row.try_get::<String, _>("type_name")?,
                row.try_get::<Vec<u8>, _>("payload")?,
            );
            let event = self.registry.decode(&wrapper)?;
            if event.version() != version {
                return Err(FollowError::event_store(format!(
                    "Row version {} does not match payload version {} for entity {}",
                    version,
                    event.version(),
                    entity_id
                )));
            }
            events.push(event);
        }

        tracing::debug!(
            entity_id = %entity_id,
            from_exclusive,
            to_inclusive,
            count = events.len(),
            "Loaded events"
        );
        Ok(events)
    }
}

// =============================================================================
// Snapshot Storage
// =============================================================================

/// Snapshots in `follow_snapshots`, upserted on save.
#[derive(Clone)]
pub struct PgSnapshotStorage {
    pool: PgPool,
}

impl PgSnapshotStorage {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SnapshotStorage for PgSnapshotStorage {
    async fn get(&self, entity_id: &EntityId) -> Result<Option<FollowState>> {
        let row = sqlx::query("SELECT data FROM follow_snapshots WHERE entity_id = $1")
            .bind(entity_id.as_str())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let data: serde_json::Value = row.try_get("data")?;
                Ok(Some(serde_json::from_value(data)?))
            }
            None => Ok(None),
        }
    }

    async fn save(&self, state: &FollowState) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO follow_snapshots (entity_id, version, timestamp, data)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (entity_id) DO UPDATE
            SET version = EXCLUDED.version,
                timestamp = EXCLUDED.timestamp,
                data = EXCLUDED.data
            "#,
        )
        .bind(state.entity_id.as_str())
        .bind(to_db_version(state.version)?)
        .bind(to_db_version(state.timestamp)?)
        .bind(serde_json::to_value(state)?)
        .execute(&self.pool)
        .await
        .map_err(|e| FollowError::snapshot_store(e.to_string()).with_source(e))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_conversion_bounds() {
        assert_eq!(to_db_version(42).unwrap(), 42);
        assert!(to_db_version(u64::MAX).is_err());
        assert!(from_db_version(-1).is_err());
    }
}
