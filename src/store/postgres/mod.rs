use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::error::PersistenceError;
use crate::model::{AggregateId, CommittedEvent, GlobalPosition, UncommittedEvent};
use crate::store::contract::{validate_batch, AllCommittedEventsPage, EventPersistence};

// ============================================================================
// Relational Backend
// ============================================================================
//
// One append-only table. Postgres assigns the global order through a
// BIGSERIAL identity column, and a unique index over (aggregate_id,
// aggregate_sequence_number) arbitrates writers racing for the same stream
// slot: the batch insert of the loser violates the index and the whole
// statement rolls back. No in-process locking; commits to different
// streams run fully in parallel.
//
// ============================================================================

const TABLE: &str = "event_ledger";

/// One row of the event table.
#[derive(Debug, Clone)]
struct EventRow {
    global_sequence_number: i64,
    aggregate_id: String,
    aggregate_sequence_number: i64,
    data: String,
    metadata: String,
}

impl<'r> sqlx::FromRow<'r, PgRow> for EventRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(EventRow {
            global_sequence_number: row.try_get("global_sequence_number")?,
            aggregate_id: row.try_get("aggregate_id")?,
            aggregate_sequence_number: row.try_get("aggregate_sequence_number")?,
            data: row.try_get("data")?,
            metadata: row.try_get("metadata")?,
        })
    }
}

impl EventRow {
    fn into_committed(self) -> CommittedEvent {
        CommittedEvent {
            aggregate_id: AggregateId::new(self.aggregate_id),
            aggregate_sequence_number: self.aggregate_sequence_number as u64,
            global_sequence_number: Some(self.global_sequence_number as u64),
            data: self.data,
            metadata: self.metadata,
        }
    }
}

/// The batch id stamped on every row of one commit call: the caller's
/// `batch_id` metadata value when one was supplied, a fresh UUID otherwise.
fn batch_id_of(events: &[UncommittedEvent]) -> Uuid {
    events
        .first()
        .and_then(|e| e.metadata.batch_id())
        .unwrap_or_else(Uuid::new_v4)
}

/// Cursor to resume from after a page: one past the highest sequence
/// delivered, or the unchanged start when the page came back empty.
fn next_page_position(from: u64, rows: &[EventRow]) -> u64 {
    rows.iter()
        .map(|r| r.global_sequence_number as u64)
        .max()
        .map(|max| max + 1)
        .unwrap_or(from)
}

/// Event persistence over a single append-only Postgres table.
pub struct PostgresEventPersistence {
    pool: PgPool,
}

impl PostgresEventPersistence {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the event table and its stream-slot unique index if they do
    /// not exist yet. Call once at startup.
    pub async fn ensure_schema(&self) -> Result<(), PersistenceError> {
        sqlx::query(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS {TABLE} (
                global_sequence_number BIGSERIAL PRIMARY KEY,
                batch_id UUID NOT NULL,
                aggregate_id TEXT NOT NULL,
                aggregate_name TEXT NOT NULL,
                data TEXT NOT NULL,
                metadata TEXT NOT NULL,
                aggregate_sequence_number BIGINT NOT NULL
            )
            "#
        ))
        .execute(&self.pool)
        .await?;

        sqlx::query(&format!(
            r#"
            CREATE UNIQUE INDEX IF NOT EXISTS idx_{TABLE}_stream_slot
            ON {TABLE} (aggregate_id, aggregate_sequence_number)
            "#
        ))
        .execute(&self.pool)
        .await?;

        tracing::info!(table = TABLE, "Ensured event table schema");
        Ok(())
    }
}

#[async_trait::async_trait]
impl EventPersistence for PostgresEventPersistence {
    async fn commit_events(
        &self,
        id: &AggregateId,
        events: &[UncommittedEvent],
    ) -> Result<Vec<CommittedEvent>, PersistenceError> {
        if events.is_empty() {
            return Ok(Vec::new());
        }
        validate_batch(id, events)?;

        let batch_id = batch_id_of(events);
        // Present on every event after validation; the column stores the
        // first one, the batch shares a stream and therefore an aggregate.
        let aggregate_name = events[0].metadata.aggregate_name().unwrap_or_default().to_string();

        let mut pending = Vec::with_capacity(events.len());
        for event in events {
            pending.push((event, event.metadata.to_json()?));
        }

        let mut insert = sqlx::QueryBuilder::<sqlx::Postgres>::new(format!(
            "INSERT INTO {TABLE} \
             (batch_id, aggregate_id, aggregate_name, data, metadata, aggregate_sequence_number) "
        ));
        insert.push_values(&pending, |mut row, (event, metadata)| {
            row.push_bind(batch_id)
                .push_bind(id.as_str().to_string())
                .push_bind(aggregate_name.clone())
                .push_bind(event.data.clone())
                .push_bind(metadata.clone())
                .push_bind(event.aggregate_sequence_number as i64);
        });
        insert.push(" RETURNING global_sequence_number");

        // Generated identities come back in input order.
        let assigned: Vec<(i64,)> = match insert.build_query_as().fetch_all(&self.pool).await {
            Ok(rows) => rows,
            Err(sqlx::Error::Database(db_error)) if db_error.is_unique_violation() => {
                tracing::debug!(
                    aggregate_id = %id,
                    "Insert hit the stream-slot unique index, another writer won"
                );
                return Err(PersistenceError::OptimisticConcurrency {
                    aggregate_id: id.to_string(),
                    details: db_error.to_string(),
                });
            }
            Err(error) => return Err(error.into()),
        };

        let committed: Vec<CommittedEvent> = pending
            .into_iter()
            .zip(assigned)
            .map(|((event, metadata), (global,))| CommittedEvent {
                aggregate_id: id.clone(),
                aggregate_sequence_number: event.aggregate_sequence_number,
                global_sequence_number: Some(global as u64),
                data: event.data.clone(),
                metadata,
            })
            .collect();

        tracing::debug!(
            aggregate_id = %id,
            event_count = committed.len(),
            batch_id = %batch_id,
            "Committed events to relational store"
        );

        Ok(committed)
    }

    async fn load_events(&self, id: &AggregateId) -> Result<Vec<CommittedEvent>, PersistenceError> {
        let rows: Vec<EventRow> = sqlx::query_as(&format!(
            "SELECT global_sequence_number, aggregate_id, aggregate_sequence_number, data, metadata \
             FROM {TABLE} \
             WHERE aggregate_id = $1 \
             ORDER BY aggregate_sequence_number ASC"
        ))
        .bind(id.as_str())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(EventRow::into_committed).collect())
    }

    async fn load_all_committed_events(
        &self,
        position: &GlobalPosition,
        page_size: usize,
    ) -> Result<AllCommittedEventsPage, PersistenceError> {
        let from = position.to_sequence(1)?;

        // Keyset pagination rather than a fixed [from, from + page_size)
        // window: stream deletion leaves permanent holes in the identity
        // keyspace, and a window landing inside one would return an empty
        // page with an unadvanced cursor.
        let rows: Vec<EventRow> = sqlx::query_as(&format!(
            "SELECT global_sequence_number, aggregate_id, aggregate_sequence_number, data, metadata \
             FROM {TABLE} \
             WHERE global_sequence_number >= $1 \
             ORDER BY global_sequence_number ASC \
             LIMIT $2"
        ))
        .bind(from as i64)
        .bind(page_size as i64)
        .fetch_all(&self.pool)
        .await?;

        let next = next_page_position(from, &rows);
        let events = rows.into_iter().map(EventRow::into_committed).collect();
        Ok(AllCommittedEventsPage::new(GlobalPosition::from(next), events))
    }

    async fn delete_events(&self, id: &AggregateId) -> Result<(), PersistenceError> {
        let result = sqlx::query(&format!("DELETE FROM {TABLE} WHERE aggregate_id = $1"))
            .bind(id.as_str())
            .execute(&self.pool)
            .await?;

        tracing::debug!(
            aggregate_id = %id,
            event_count = result.rows_affected(),
            "Deleted stream from relational store"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::EventMetadata;

    fn metadata() -> EventMetadata {
        EventMetadata::new()
            .with_event_id(Uuid::new_v4())
            .with_event_name("ThingHappened")
            .with_event_version(1)
            .with_aggregate_name("Thing")
    }

    fn row(global: i64) -> EventRow {
        EventRow {
            global_sequence_number: global,
            aggregate_id: "a".to_string(),
            aggregate_sequence_number: 1,
            data: "{}".to_string(),
            metadata: "{}".to_string(),
        }
    }

    #[test]
    fn test_supplied_batch_id_is_kept() {
        let batch_id = Uuid::new_v4();
        let events = vec![UncommittedEvent::new(1, "{}", metadata().with_batch_id(batch_id))];
        assert_eq!(batch_id_of(&events), batch_id);
    }

    #[test]
    fn test_missing_batch_id_gets_generated() {
        let events = vec![UncommittedEvent::new(1, "{}", metadata())];
        let generated = batch_id_of(&events);
        assert!(!generated.is_nil());
    }

    #[test]
    fn test_next_position_is_one_past_the_highest_row() {
        assert_eq!(next_page_position(1, &[row(4), row(7), row(9)]), 10);
    }

    #[test]
    fn test_empty_page_keeps_the_start_position() {
        assert_eq!(next_page_position(23, &[]), 23);
    }

    #[test]
    fn test_row_maps_onto_a_committed_event() {
        let committed = EventRow {
            global_sequence_number: 12,
            aggregate_id: "order-1".to_string(),
            aggregate_sequence_number: 3,
            data: r#"{"qty":2}"#.to_string(),
            metadata: "{}".to_string(),
        }
        .into_committed();

        assert_eq!(committed.aggregate_id, AggregateId::new("order-1"));
        assert_eq!(committed.aggregate_sequence_number, 3);
        assert_eq!(committed.global_sequence_number, Some(12));
        assert_eq!(committed.data, r#"{"qty":2}"#);
    }

    // Commit, load and delete against a live database are integration
    // scope: they need a running Postgres instance and are exercised by the
    // cross-backend contract suite when EVENTLEDGER_POSTGRES_URL is set.
}
