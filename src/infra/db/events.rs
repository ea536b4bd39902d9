use async_trait::async_trait;
use serde_json::Value;
use sqlx::{QueryBuilder, types::Json};
use time::OffsetDateTime;

use crate::{
    application::pagination::{CursorPage, EventCursor, PageRequest},
    application::repos::{
        EventQueryFilter, EventsRepo, InsertOutcome, RepoError, next_event_cursor,
    },
    domain::events::{DedupKey, EventRecord},
};

use super::{PostgresRepositories, map_sqlx_error};

const EVENT_COLUMNS: &str =
    "dedup_key, source_id, external_id, sequence, payload, payload_digest, received_at";

#[derive(sqlx::FromRow)]
struct EventRow {
    dedup_key: String,
    source_id: String,
    external_id: String,
    sequence: i64,
    payload: Json<Value>,
    payload_digest: String,
    received_at: OffsetDateTime,
}

impl From<EventRow> for EventRecord {
    fn from(row: EventRow) -> Self {
        Self {
            dedup_key: DedupKey::new(row.dedup_key),
            source_id: row.source_id,
            external_id: row.external_id,
            sequence: row.sequence,
            payload: row.payload.0,
            payload_digest: row.payload_digest,
            received_at: row.received_at,
        }
    }
}

#[async_trait]
impl EventsRepo for PostgresRepositories {
    async fn insert_if_absent(&self, record: &EventRecord) -> Result<InsertOutcome, RepoError> {
        let inserted: Option<String> = sqlx::query_scalar(
            r#"
            INSERT INTO events (dedup_key, source_id, external_id, sequence, payload, payload_digest, received_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (dedup_key) DO NOTHING
            RETURNING dedup_key
            "#,
        )
        .bind(record.dedup_key.as_str())
        .bind(&record.source_id)
        .bind(&record.external_id)
        .bind(record.sequence)
        .bind(Json(&record.payload))
        .bind(&record.payload_digest)
        .bind(record.received_at)
        .fetch_optional(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(match inserted {
            Some(_) => InsertOutcome::Accepted,
            None => InsertOutcome::Conflict,
        })
    }

    async fn find_event(&self, key: &DedupKey) -> Result<Option<EventRecord>, RepoError> {
        let sql = format!("SELECT {EVENT_COLUMNS} FROM events WHERE dedup_key = $1");
        let row = sqlx::query_as::<_, EventRow>(&sql)
            .bind(key.as_str())
            .fetch_optional(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        Ok(row.map(EventRecord::from))
    }

    async fn list_events(
        &self,
        filter: &EventQueryFilter,
        page: PageRequest<EventCursor>,
    ) -> Result<CursorPage<EventRecord>, RepoError> {
        let limit = page.limit.max(1);
        let mut qb = QueryBuilder::new("SELECT ");
        qb.push(EVENT_COLUMNS);
        qb.push(" FROM events WHERE source_id = ");
        qb.push_bind(&filter.source_id);

        if let Some(after) = filter.after_sequence {
            qb.push(" AND sequence > ");
            qb.push_bind(after);
        }

        if let Some(up_to) = filter.up_to_sequence {
            qb.push(" AND sequence <= ");
            qb.push_bind(up_to);
        }

        if let Some(cursor) = page.cursor.as_ref() {
            qb.push(" AND (sequence, dedup_key) > (");
            qb.push_bind(cursor.sequence());
            qb.push(", ");
            qb.push_bind(cursor.dedup_key().as_str());
            qb.push(")");
        }

        qb.push(" ORDER BY sequence ASC, dedup_key ASC LIMIT ");
        qb.push_bind(limit as i64);

        let rows = qb
            .build_query_as::<EventRow>()
            .fetch_all(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        let records: Vec<EventRecord> = rows.into_iter().map(EventRecord::from).collect();
        let next_cursor = next_event_cursor(&records, limit);

        Ok(CursorPage::new(records, next_cursor))
    }

    async fn max_sequence(&self, source_id: &str) -> Result<Option<i64>, RepoError> {
        sqlx::query_scalar::<_, Option<i64>>("SELECT MAX(sequence) FROM events WHERE source_id = $1")
            .bind(source_id)
            .fetch_one(self.pool())
            .await
            .map_err(map_sqlx_error)
    }

    async fn health_check(&self) -> Result<(), RepoError> {
        self.ping().await.map_err(map_sqlx_error)
    }

    fn backend_name(&self) -> &'static str {
        "postgres"
    }
}
