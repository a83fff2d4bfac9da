//! SQLite [`TrackerStore`]
//!
//! Reads go straight to the pool and are retried while another importer
//! holds the write lock. A transaction owns one pooled connection; writes are
//! buffered in memory and executed on `flush`.

use super::rows::{
    enrollment_from_row, event_from_row, execute_write, metadata_from_row, program_owner_from_row,
    relationship_from_row, tracked_entity_from_row, user_from_row, ENROLLMENT_COLUMNS, EVENT_COLUMNS,
    RELATIONSHIP_COLUMNS, TRACKED_ENTITY_COLUMNS,
};
use super::schema::create_tables;
use crate::identifier::{IdScheme, IdSchemeParam};
use crate::models::{
    CategoryOptionCombo, EnrollmentRecord, EventRecord, Metadata, MetadataType, ProgramOwner,
    RelationshipRecord, TrackedEntityRecord, User,
};
use crate::store::{StoreTransaction, TrackerStore, Write};
use crate::utils::retry_on_lock;
use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool, Transaction};
use std::collections::{BTreeSet, HashSet};
use tracing::debug;
use tracker_common::Result;

/// Values per IN list; a query binding its list twice stays under SQLite's
/// default limit of 999 parameters
const IN_CHUNK_SIZE: usize = 450;

/// Append `(?, ?, ...)` binding every value
fn push_in<'a, T>(query: &mut QueryBuilder<'a, Sqlite>, values: &[T])
where
    T: Clone + 'a + sqlx::Encode<'a, Sqlite> + sqlx::Type<Sqlite>,
{
    query.push("(");
    let mut separated = query.separated(", ");
    for value in values {
        separated.push_bind(value.clone());
    }
    separated.push_unseparated(")");
}

#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
    max_lock_wait_ms: u64,
}

impl SqliteStore {
    /// Wrap `pool`, creating the tracker tables if needed
    pub async fn open(pool: SqlitePool, max_lock_wait_ms: u64) -> Result<Self> {
        create_tables(&pool).await?;
        Ok(Self {
            pool,
            max_lock_wait_ms,
        })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Insert or replace a metadata object and its attribute values
    pub async fn save_metadata(&self, metadata: &Metadata) -> Result<()> {
        let base = metadata.base();
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO metadata (id, kind, uid, code, name, body)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                kind = excluded.kind,
                uid = excluded.uid,
                code = excluded.code,
                name = excluded.name,
                body = excluded.body
            "#,
        )
        .bind(base.id)
        .bind(metadata.kind().as_str())
        .bind(&base.uid)
        .bind(&base.code)
        .bind(&base.name)
        .bind(serde_json::to_string(metadata)?)
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM metadata_attribute_values WHERE metadata_id = ?")
            .bind(base.id)
            .execute(&mut *tx)
            .await?;
        for (attribute, value) in &base.attribute_values {
            sqlx::query("INSERT INTO metadata_attribute_values (metadata_id, attribute, value) VALUES (?, ?, ?)")
                .bind(base.id)
                .bind(attribute)
                .bind(value)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    pub async fn save_user(&self, user: &User) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO users (id, uid, username) VALUES (?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET uid = excluded.uid, username = excluded.username
            "#,
        )
        .bind(user.id)
        .bind(&user.uid)
        .bind(&user.username)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Run a read built by `build`, retrying on lock contention
    async fn fetch<F>(&self, operation: &str, build: F) -> Result<Vec<SqliteRow>>
    where
        F: Fn() -> QueryBuilder<'static, Sqlite> + Sync,
    {
        let pool = &self.pool;
        let build = &build;
        let rows = retry_on_lock(operation, self.max_lock_wait_ms, move || async move {
            let mut query = build();
            Ok(query.build().fetch_all(pool).await?)
        })
        .await?;
        debug!(operation, rows = rows.len(), "Query finished");
        Ok(rows)
    }

    /// Run `build` once per chunk of `values` and concatenate the rows
    async fn fetch_chunked<T, F>(&self, operation: &str, values: &[T], build: F) -> Result<Vec<SqliteRow>>
    where
        T: Sync,
        F: Fn(&[T]) -> QueryBuilder<'static, Sqlite> + Sync,
    {
        let mut rows = Vec::new();
        for chunk in values.chunks(IN_CHUNK_SIZE) {
            rows.extend(self.fetch(operation, || build(chunk)).await?);
        }
        Ok(rows)
    }

    /// Live rows of `table` whose `column` is in `values`
    async fn fetch_live(&self, operation: &str, columns: &str, table: &str, values: &[String]) -> Result<Vec<SqliteRow>> {
        if values.is_empty() {
            return Ok(Vec::new());
        }
        let head = format!("SELECT {} FROM {} WHERE deleted = 0 AND uid IN ", columns, table);
        self.fetch_chunked(operation, values, |chunk| {
            let mut query = QueryBuilder::new(head.clone());
            push_in(&mut query, chunk);
            query
        })
        .await
    }
}

#[async_trait]
impl TrackerStore for SqliteStore {
    async fn find_defaults(&self) -> Result<Vec<Metadata>> {
        let rows = self
            .fetch("find defaults", || {
                QueryBuilder::new(
                    "SELECT body FROM metadata WHERE name = 'default' \
                     AND kind IN ('CATEGORY_COMBO', 'CATEGORY_OPTION', 'CATEGORY_OPTION_COMBO')",
                )
            })
            .await?;
        rows.iter().map(metadata_from_row).collect()
    }

    async fn find_metadata(
        &self,
        kind: MetadataType,
        scheme: &IdSchemeParam,
        values: &[String],
    ) -> Result<Vec<Metadata>> {
        if values.is_empty() {
            return Ok(Vec::new());
        }
        let head = match scheme.id_scheme {
            IdScheme::Uid => format!("SELECT body FROM metadata WHERE kind = '{}' AND uid IN ", kind.as_str()),
            IdScheme::Code => format!("SELECT body FROM metadata WHERE kind = '{}' AND code IN ", kind.as_str()),
            IdScheme::Name => format!("SELECT body FROM metadata WHERE kind = '{}' AND name IN ", kind.as_str()),
            IdScheme::Attribute => format!(
                "SELECT m.body, av.attribute FROM metadata m \
                 JOIN metadata_attribute_values av ON av.metadata_id = m.id \
                 WHERE m.kind = '{}' AND av.value IN ",
                kind.as_str()
            ),
        };
        let rows = self
            .fetch_chunked("find metadata", values, |chunk| {
                let mut query = QueryBuilder::new(head.clone());
                push_in(&mut query, chunk);
                query
            })
            .await?;

        let attribute = scheme.attribute.as_deref();
        rows.iter()
            .filter(|row| match scheme.id_scheme {
                IdScheme::Attribute => attribute == Some(row.get::<String, _>("attribute").as_str()),
                _ => true,
            })
            .map(metadata_from_row)
            .collect()
    }

    async fn find_category_option_combo(
        &self,
        category_combo: &str,
        options: &BTreeSet<String>,
    ) -> Result<Option<CategoryOptionCombo>> {
        let category_combo = category_combo.to_string();
        let rows = self
            .fetch("find category option combo", || {
                let mut query = QueryBuilder::new(
                    "SELECT body FROM metadata WHERE kind = 'CATEGORY_OPTION_COMBO' \
                     AND json_extract(body, '$.categoryCombo') = ",
                );
                query.push_bind(category_combo.clone());
                query
            })
            .await?;

        for row in &rows {
            if let Metadata::CategoryOptionCombo(coc) = metadata_from_row(row)? {
                if &coc.category_options == options {
                    return Ok(Some(coc));
                }
            }
        }
        Ok(None)
    }

    async fn find_users(&self, usernames: &[String]) -> Result<Vec<User>> {
        if usernames.is_empty() {
            return Ok(Vec::new());
        }
        let rows = self
            .fetch_chunked("find users", usernames, |chunk| {
                let mut query = QueryBuilder::new("SELECT id, uid, username FROM users WHERE username IN ");
                push_in(&mut query, chunk);
                query
            })
            .await?;
        Ok(rows.iter().map(user_from_row).collect())
    }

    async fn find_tracked_entities(&self, uids: &[String]) -> Result<Vec<TrackedEntityRecord>> {
        let rows = self
            .fetch_live("find tracked entities", TRACKED_ENTITY_COLUMNS, "tracked_entities", uids)
            .await?;
        rows.iter().map(tracked_entity_from_row).collect()
    }

    async fn find_enrollments(&self, uids: &[String]) -> Result<Vec<EnrollmentRecord>> {
        let rows = self
            .fetch_live("find enrollments", ENROLLMENT_COLUMNS, "enrollments", uids)
            .await?;
        rows.iter().map(enrollment_from_row).collect()
    }

    async fn find_events(&self, uids: &[String]) -> Result<Vec<EventRecord>> {
        let rows = self.fetch_live("find events", EVENT_COLUMNS, "events", uids).await?;
        rows.iter().map(event_from_row).collect()
    }

    async fn find_relationships(&self, uids: &[String]) -> Result<Vec<RelationshipRecord>> {
        let rows = self
            .fetch_live("find relationships", RELATIONSHIP_COLUMNS, "relationships", uids)
            .await?;
        rows.iter().map(relationship_from_row).collect()
    }

    async fn find_relationships_by_keys(&self, keys: &[String]) -> Result<Vec<RelationshipRecord>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let rows = self
            .fetch_chunked("find relationships by keys", keys, |chunk| {
                let mut query = QueryBuilder::new(format!(
                    "SELECT {} FROM relationships WHERE deleted = 0 AND (key IN ",
                    RELATIONSHIP_COLUMNS
                ));
                push_in(&mut query, chunk);
                query.push(" OR inverted_key IN ");
                push_in(&mut query, chunk);
                query.push(")");
                query
            })
            .await?;
        // A row can match keys of two chunks
        let mut seen = HashSet::new();
        rows.iter()
            .map(relationship_from_row)
            .filter(|record| record.as_ref().map_or(true, |r| seen.insert(r.uid.clone())))
            .collect()
    }

    async fn find_program_owners(&self, tracked_entities: &[String]) -> Result<Vec<ProgramOwner>> {
        if tracked_entities.is_empty() {
            return Ok(Vec::new());
        }
        let rows = self
            .fetch_chunked("find program owners", tracked_entities, |chunk| {
                let mut query = QueryBuilder::new(
                    "SELECT tracked_entity, program, org_unit FROM program_owners WHERE tracked_entity IN ",
                );
                push_in(&mut query, chunk);
                query
            })
            .await?;
        Ok(rows.iter().map(program_owner_from_row).collect())
    }

    async fn find_enrollments_without_registration(&self, program_ids: &[i64]) -> Result<Vec<EnrollmentRecord>> {
        if program_ids.is_empty() {
            return Ok(Vec::new());
        }
        let rows = self
            .fetch_chunked("find enrollments without registration", program_ids, |chunk| {
                let mut query = QueryBuilder::new(format!(
                    "SELECT {} FROM enrollments WHERE deleted = 0 AND program_id IN ",
                    ENROLLMENT_COLUMNS
                ));
                push_in(&mut query, chunk);
                query.push(" ORDER BY created");
                query
            })
            .await?;

        let mut seen = HashSet::new();
        let mut enrollments = Vec::new();
        for row in &rows {
            let record = enrollment_from_row(row)?;
            if seen.insert(record.program_id) {
                enrollments.push(record);
            }
        }
        Ok(enrollments)
    }

    async fn begin(&self) -> Result<Box<dyn StoreTransaction>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(SqliteTransaction {
            tx,
            pending: Vec::new(),
        }))
    }
}

struct SqliteTransaction {
    tx: Transaction<'static, Sqlite>,
    pending: Vec<Write>,
}

#[async_trait]
impl StoreTransaction for SqliteTransaction {
    async fn persist(&mut self, write: Write) -> Result<()> {
        self.pending.push(write);
        Ok(())
    }

    async fn flush(&mut self) -> Result<()> {
        let pending = std::mem::take(&mut self.pending);
        for write in &pending {
            execute_write(&mut self.tx, write).await?;
        }
        debug!(writes = pending.len(), "Flushed buffered writes");
        Ok(())
    }

    async fn commit(mut self: Box<Self>) -> Result<()> {
        self.flush().await?;
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}
