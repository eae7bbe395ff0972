//! SQLite backend.
//!
//! Every collection lives in one `records` table as a JSON body keyed by
//! `(collection, id)`. Filters and sort keys are evaluated with
//! `json_extract`, and updates are merged in place with `json_patch`.
//! The `seq` column keeps insertion order so ties sort deterministically.

use async_trait::async_trait;
use kenning_core::error::StoreError;
use kenning_core::record::Collection;
use kenning_core::store::{ChangeKind, Filter, Query, SortDirection, Store, StoreChange};
use serde_json::Value;
use sqlx::sqlite::{SqliteArguments, SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, Sqlite, SqlitePool};
use std::str::FromStr;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// A SQLite record store.
pub struct SqliteStore {
    pool: SqlitePool,
    changes: broadcast::Sender<StoreChange>,
}

/// A bound parameter for a filter value.
#[derive(Debug, Clone, PartialEq)]
enum Param {
    Text(String),
    Int(i64),
    Real(f64),
}

impl SqliteStore {
    /// Open (or create) a SQLite store.
    ///
    /// Pass `":memory:"` for an in-process ephemeral database (useful for tests).
    pub async fn new(path: &str) -> Result<Self, StoreError> {
        let ephemeral = path.contains(":memory:");
        let options = SqliteConnectOptions::from_str(path)
            .map_err(|e| StoreError::Storage(format!("Invalid SQLite path: {e}")))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal);

        // An in-memory database lives only as long as its connection.
        let max_connections = if ephemeral { 1 } else { 4 };
        let mut pool_options = SqlitePoolOptions::new().max_connections(max_connections);
        if ephemeral {
            pool_options = pool_options.min_connections(1).idle_timeout(None).max_lifetime(None);
        }

        let pool = pool_options
            .connect_with(options)
            .await
            .map_err(|e| StoreError::Storage(format!("Failed to open SQLite: {e}")))?;

        let store = Self::from_pool(pool).await?;
        info!("SQLite store initialized at {path}");
        Ok(store)
    }

    /// Create from an existing pool (useful for testing).
    pub async fn from_pool(pool: SqlitePool) -> Result<Self, StoreError> {
        let (changes, _) = broadcast::channel(1024);
        let store = Self { pool, changes };
        store.run_migrations().await?;
        Ok(store)
    }

    /// Run schema migrations: create the records table and its indexes.
    async fn run_migrations(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS records (
                seq          INTEGER PRIMARY KEY AUTOINCREMENT,
                collection   TEXT NOT NULL,
                id           TEXT NOT NULL,
                body         TEXT NOT NULL,
                UNIQUE(collection, id)
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::MigrationFailed(format!("records table: {e}")))?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_records_collection ON records(collection, seq)")
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::MigrationFailed(format!("collection index: {e}")))?;

        // Hot lookups: spans/propositions/mentions by unit, tasks by status.
        for field in ["unit_id", "status", "proposition_id", "claim_id"] {
            let sql = format!(
                "CREATE INDEX IF NOT EXISTS idx_records_{field} ON records(collection, json_extract(body, '$.{field}'))"
            );
            sqlx::query(&sql)
                .execute(&self.pool)
                .await
                .map_err(|e| StoreError::MigrationFailed(format!("{field} index: {e}")))?;
        }

        debug!("SQLite migrations complete");
        Ok(())
    }

    fn notify(&self, collection: Collection, id: &str, kind: ChangeKind) {
        let _ = self.changes.send(StoreChange {
            collection,
            id: id.to_string(),
            kind,
        });
    }

    /// Build the WHERE/ORDER/LIMIT tail of a query with its parameters.
    ///
    /// Field names are validated before they are spliced into a JSON path.
    fn compile(query: &Query, with_order: bool) -> Result<(String, Vec<Param>), StoreError> {
        if let Some(field) = query.fields().find(|f| !Query::is_valid_field(f)) {
            return Err(StoreError::QueryFailed(format!("invalid field name '{field}'")));
        }

        let mut sql = String::from(" WHERE collection = ?");
        let mut params = Vec::new();

        for filter in &query.filters {
            match filter {
                Filter::Eq { field, value } => match to_param(value) {
                    Some(param) => {
                        sql.push_str(&format!(" AND json_extract(body, '$.{field}') = ?"));
                        params.push(param);
                    }
                    None => sql.push_str(&format!(" AND json_extract(body, '$.{field}') IS NULL")),
                },
                Filter::IsNull { field } => {
                    sql.push_str(&format!(" AND json_extract(body, '$.{field}') IS NULL"));
                }
                Filter::NotNull { field } => {
                    sql.push_str(&format!(" AND json_extract(body, '$.{field}') IS NOT NULL"));
                }
            }
        }

        if with_order {
            match &query.sort {
                Some(sort) => {
                    let direction = match sort.direction {
                        SortDirection::Asc => "ASC",
                        SortDirection::Desc => "DESC",
                    };
                    sql.push_str(&format!(
                        " ORDER BY json_extract(body, '$.{}') {direction}, seq ASC",
                        sort.field
                    ));
                }
                None => sql.push_str(" ORDER BY seq ASC"),
            }
            if let Some(limit) = query.limit {
                sql.push_str(&format!(" LIMIT {}", limit.min(i64::MAX as usize)));
            }
        }

        Ok((sql, params))
    }
}

/// Map a JSON filter value to the SQLite value `json_extract` would yield.
fn to_param(value: &Value) -> Option<Param> {
    match value {
        Value::Null => None,
        Value::Bool(b) => Some(Param::Int(i64::from(*b))),
        Value::Number(n) => Some(match n.as_i64() {
            Some(i) => Param::Int(i),
            None => Param::Real(n.as_f64().unwrap_or(0.0)),
        }),
        Value::String(s) => Some(Param::Text(s.clone())),
        other => Some(Param::Text(other.to_string())),
    }
}

fn bind_all<'q>(
    mut query: sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>>,
    collection: &'q str,
    params: &'q [Param],
) -> sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>> {
    query = query.bind(collection);
    for param in params {
        query = match param {
            Param::Text(s) => query.bind(s.as_str()),
            Param::Int(i) => query.bind(*i),
            Param::Real(f) => query.bind(*f),
        };
    }
    query
}

fn parse_body(collection: Collection, body: &str) -> Result<Value, StoreError> {
    serde_json::from_str(body).map_err(|e| StoreError::Serialization {
        collection: collection.to_string(),
        reason: e.to_string(),
    })
}

#[async_trait]
impl Store for SqliteStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn get_document(&self, collection: Collection, id: &str) -> Result<Option<Value>, StoreError> {
        let row = sqlx::query("SELECT body FROM records WHERE collection = ?1 AND id = ?2")
            .bind(collection.as_str())
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::QueryFailed(format!("GET by ID: {e}")))?;

        match row {
            Some(ref r) => {
                let body: String = r
                    .try_get("body")
                    .map_err(|e| StoreError::QueryFailed(format!("body column: {e}")))?;
                Ok(Some(parse_body(collection, &body)?))
            }
            None => Ok(None),
        }
    }

    async fn insert_document(&self, collection: Collection, id: &str, document: Value) -> Result<(), StoreError> {
        let body = serde_json::to_string(&document).map_err(|e| StoreError::Serialization {
            collection: collection.to_string(),
            reason: e.to_string(),
        })?;

        let result = sqlx::query("INSERT INTO records (collection, id, body) VALUES (?1, ?2, ?3)")
            .bind(collection.as_str())
            .bind(id)
            .bind(&body)
            .execute(&self.pool)
            .await;

        match result {
            Ok(_) => {
                self.notify(collection, id, ChangeKind::Created);
                Ok(())
            }
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => Err(StoreError::Duplicate {
                collection: collection.to_string(),
                id: id.to_string(),
            }),
            Err(e) => Err(StoreError::Storage(format!("INSERT failed: {e}"))),
        }
    }

    async fn patch_document(&self, collection: Collection, id: &str, patch: Value) -> Result<bool, StoreError> {
        if !patch.is_object() {
            return Err(StoreError::Storage("patch must be a JSON object".into()));
        }
        let patch = serde_json::to_string(&patch).map_err(|e| StoreError::Serialization {
            collection: collection.to_string(),
            reason: e.to_string(),
        })?;

        let result = sqlx::query("UPDATE records SET body = json_patch(body, ?3) WHERE collection = ?1 AND id = ?2")
            .bind(collection.as_str())
            .bind(id)
            .bind(&patch)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Storage(format!("UPDATE failed: {e}")))?;

        let updated = result.rows_affected() > 0;
        if updated {
            self.notify(collection, id, ChangeKind::Updated);
        }
        Ok(updated)
    }

    async fn delete_document(&self, collection: Collection, id: &str) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM records WHERE collection = ?1 AND id = ?2")
            .bind(collection.as_str())
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Storage(format!("DELETE failed: {e}")))?;

        let deleted = result.rows_affected() > 0;
        if deleted {
            self.notify(collection, id, ChangeKind::Deleted);
        }
        Ok(deleted)
    }

    async fn query_documents(&self, collection: Collection, query: &Query) -> Result<Vec<Value>, StoreError> {
        let (tail, params) = Self::compile(query, true)?;
        let sql = format!("SELECT body FROM records{tail}");

        let rows = bind_all(sqlx::query(&sql), collection.as_str(), &params)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StoreError::QueryFailed(format!("{collection} query: {e}")))?;

        let mut documents = Vec::with_capacity(rows.len());
        for row in &rows {
            let body: String = row
                .try_get("body")
                .map_err(|e| StoreError::QueryFailed(format!("body column: {e}")))?;
            match parse_body(collection, &body) {
                Ok(doc) => documents.push(doc),
                Err(e) => warn!(%collection, error = %e, "Skipping corrupt record body"),
            }
        }
        Ok(documents)
    }

    async fn count_documents(&self, collection: Collection, query: &Query) -> Result<usize, StoreError> {
        let (tail, params) = Self::compile(query, false)?;
        let sql = format!("SELECT COUNT(*) AS cnt FROM records{tail}");

        let row = bind_all(sqlx::query(&sql), collection.as_str(), &params)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| StoreError::QueryFailed(format!("COUNT: {e}")))?;

        let cnt: i64 = row
            .try_get("cnt")
            .map_err(|e| StoreError::QueryFailed(format!("cnt column: {e}")))?;

        let cnt = cnt.max(0) as usize;
        Ok(query.limit.map_or(cnt, |limit| cnt.min(limit)))
    }

    fn subscribe(&self) -> broadcast::Receiver<StoreChange> {
        self.changes.subscribe()
    }
}
