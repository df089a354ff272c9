use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::{migrate::MigrateError, sqlite::SqlitePoolOptions, Row, SqlitePool};
use thiserror::Error;
use uuid::Uuid;

use recdesk_core::{CandidateDraft, PersistBackend, PersistError};

/// Top-level database handle that owns the SQLite connection pool.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Establishes a new SQLite connection pool for the provided connection string.
    pub async fn connect(database_url: &str) -> Result<Self, StorageError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
            .map_err(StorageError::Connect)?;

        apply_pragmas(&pool).await?;

        Ok(Self { pool })
    }

    /// Applies migrations located under `migrations/`.
    pub async fn run_migrations(&self) -> Result<(), StorageError> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(StorageError::Migration)?;
        Ok(())
    }

    /// Returns a handle for interacting with candidate records.
    pub fn candidates(&self) -> CandidateRepository {
        CandidateRepository {
            pool: self.pool.clone(),
        }
    }

    /// Returns a handle for interacting with record drafts.
    pub fn drafts(&self) -> DraftRepository {
        DraftRepository {
            pool: self.pool.clone(),
        }
    }

    /// Returns a handle for the persist-attempt log.
    pub fn save_log(&self) -> SaveLogRepository {
        SaveLogRepository {
            pool: self.pool.clone(),
        }
    }

    /// Exposes the inner pool when lower level access is required.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

async fn apply_pragmas(pool: &SqlitePool) -> Result<(), StorageError> {
    sqlx::query("PRAGMA foreign_keys = ON;")
        .execute(pool)
        .await
        .map_err(StorageError::Pragma)?;

    sqlx::query("PRAGMA journal_mode = WAL;")
        .fetch_one(pool)
        .await
        .map_err(StorageError::Pragma)?;

    sqlx::query("PRAGMA synchronous = NORMAL;")
        .execute(pool)
        .await
        .map_err(StorageError::Pragma)?;

    sqlx::query("PRAGMA busy_timeout = 5000;")
        .execute(pool)
        .await
        .map_err(StorageError::Pragma)?;

    Ok(())
}

/// General storage level errors.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("failed to connect to sqlite: {0}")]
    Connect(sqlx::Error),
    #[error("failed to apply pragma: {0}")]
    Pragma(sqlx::Error),
    #[error("failed to run database migrations: {0}")]
    Migration(MigrateError),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Repository for candidate master records.
#[derive(Clone)]
pub struct CandidateRepository {
    pool: SqlitePool,
}

impl CandidateRepository {
    /// Inserts a candidate created from the provided draft and returns its id.
    pub async fn insert(&self, draft: &CandidateDraft) -> Result<String, CandidateError> {
        let id = Uuid::new_v4().to_string();
        let now = to_rfc3339(Utc::now());
        sqlx::query(
            "INSERT INTO candidates \
             (id, full_name, email, phone, current_title, notes, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(&draft.full_name)
        .bind(&draft.email)
        .bind(&draft.phone)
        .bind(&draft.current_title)
        .bind(&draft.notes)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        Ok(id)
    }

    /// Fetches a candidate by id.
    pub async fn fetch(&self, id: &str) -> Result<Option<CandidateRow>, CandidateError> {
        let row = sqlx::query_as::<_, CandidateRow>(
            "SELECT id, full_name, email, phone, current_title, notes, \
                    created_at, updated_at \
               FROM candidates WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    /// Lists candidates ordered by name.
    pub async fn list(&self) -> Result<Vec<CandidateRow>, CandidateError> {
        let rows = sqlx::query_as::<_, CandidateRow>(
            "SELECT id, full_name, email, phone, current_title, notes, \
                    created_at, updated_at \
               FROM candidates ORDER BY full_name, id",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }
}

/// Candidate row as stored.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct CandidateRow {
    pub id: String,
    pub full_name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub current_title: Option<String>,
    pub notes: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CandidateRow {
    /// Converts the row back into an editable draft.
    pub fn into_draft(self) -> CandidateDraft {
        CandidateDraft {
            full_name: self.full_name,
            email: self.email,
            phone: self.phone,
            current_title: self.current_title,
            notes: self.notes,
        }
    }
}

/// Errors that can occur while accessing candidates.
#[derive(Debug, Error)]
pub enum CandidateError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Repository for in-progress edit buffers, one row per record.
#[derive(Clone)]
pub struct DraftRepository {
    pool: SqlitePool,
}

impl DraftRepository {
    /// Writes the draft payload for a record, replacing any previous one.
    pub async fn upsert(
        &self,
        record_id: &str,
        payload_json: &str,
        updated_at: DateTime<Utc>,
    ) -> Result<(), DraftError> {
        sqlx::query(
            "INSERT INTO record_drafts (record_id, payload_json, updated_at) \
             VALUES (?, ?, ?) \
             ON CONFLICT(record_id) DO UPDATE \
             SET payload_json = excluded.payload_json, updated_at = excluded.updated_at",
        )
        .bind(record_id)
        .bind(payload_json)
        .bind(to_rfc3339(updated_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Fetches the stored draft for a record, if any.
    pub async fn fetch(&self, record_id: &str) -> Result<Option<DraftRow>, DraftError> {
        let row = sqlx::query(
            "SELECT record_id, payload_json, updated_at FROM record_drafts WHERE record_id = ?",
        )
        .bind(record_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        Ok(Some(DraftRow {
            record_id: row.get("record_id"),
            payload_json: row.get("payload_json"),
            updated_at: row.get("updated_at"),
        }))
    }

    /// Removes the draft for a record (e.g. on discard).
    pub async fn delete(&self, record_id: &str) -> Result<bool, DraftError> {
        let result = sqlx::query("DELETE FROM record_drafts WHERE record_id = ?")
            .bind(record_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

/// Stored draft row.
#[derive(Debug, Clone)]
pub struct DraftRow {
    pub record_id: String,
    pub payload_json: String,
    pub updated_at: DateTime<Utc>,
}

impl DraftRow {
    /// Decodes the payload back into a draft.
    pub fn into_draft(self) -> Result<CandidateDraft, DraftError> {
        let draft = serde_json::from_str(&self.payload_json)?;
        Ok(draft)
    }
}

/// Errors that can occur while reading or writing drafts.
#[derive(Debug, Error)]
pub enum DraftError {
    #[error("failed to decode draft payload: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Repository for the append-only persist-attempt log.
#[derive(Clone)]
pub struct SaveLogRepository {
    pool: SqlitePool,
}

impl SaveLogRepository {
    /// Appends one persist attempt.
    pub async fn append(
        &self,
        record_id: &str,
        success: bool,
        error: Option<&str>,
        created_at: DateTime<Utc>,
    ) -> Result<(), SaveLogError> {
        sqlx::query(
            "INSERT INTO save_log (record_id, success, error, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(record_id)
        .bind(if success { 1 } else { 0 })
        .bind(error)
        .bind(to_rfc3339(created_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Lists attempts for a record, oldest first.
    pub async fn list_for_record(&self, record_id: &str) -> Result<Vec<SaveLogRow>, SaveLogError> {
        let rows = sqlx::query_as::<_, SaveLogRow>(
            "SELECT record_id, success, error, created_at \
               FROM save_log WHERE record_id = ? ORDER BY id",
        )
        .bind(record_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }
}

/// Persist-attempt log row.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct SaveLogRow {
    pub record_id: String,
    pub success: i64,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Errors that can occur while touching the save log.
#[derive(Debug, Error)]
pub enum SaveLogError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Production persistence backend: serializes a draft and upserts it.
///
/// Bound to one record id, mirroring the one-session-one-record ownership of
/// the scheduler that drives it. Every attempt is also appended to the save
/// log; log failures never mask the outcome of the write itself.
#[derive(Clone)]
pub struct DraftStore {
    drafts: DraftRepository,
    save_log: SaveLogRepository,
    record_id: String,
}

impl DraftStore {
    pub fn new(database: &Database, record_id: impl Into<String>) -> Self {
        Self {
            drafts: database.drafts(),
            save_log: database.save_log(),
            record_id: record_id.into(),
        }
    }

    pub fn record_id(&self) -> &str {
        &self.record_id
    }
}

#[async_trait]
impl PersistBackend<CandidateDraft> for DraftStore {
    async fn persist(&self, snapshot: &CandidateDraft) -> Result<(), PersistError> {
        let now = Utc::now();
        let payload = serde_json::to_string(snapshot)
            .map_err(|err| PersistError::new(format!("failed to encode draft: {err}")))?;

        let result = self
            .drafts
            .upsert(&self.record_id, &payload, now)
            .await
            .map_err(|err| PersistError::new(err.to_string()));

        let _ = self
            .save_log
            .append(
                &self.record_id,
                result.is_ok(),
                result.as_ref().err().map(|err| err.0.as_str()),
                now,
            )
            .await;

        result
    }
}

fn to_rfc3339(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn setup_db(name: &str) -> Database {
        let url = format!("sqlite:file:{name}?mode=memory&cache=shared");
        let db = Database::connect(&url).await.expect("connect");
        db.run_migrations().await.expect("migrations");
        db
    }

    fn draft(name: &str, notes: &str) -> CandidateDraft {
        CandidateDraft {
            full_name: name.to_string(),
            email: Some(format!("{}@example.com", name.to_lowercase())),
            phone: None,
            current_title: Some("Backend Engineer".to_string()),
            notes: notes.to_string(),
        }
    }

    #[tokio::test]
    async fn migrations_apply() {
        let db = setup_db("migrations_apply").await;

        let tables: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM sqlite_master WHERE type = 'table'")
                .fetch_one(db.pool())
                .await
                .expect("fetch tables");
        assert!(tables.0 >= 3, "expected core tables to be created");
    }

    #[tokio::test]
    async fn candidate_roundtrip() {
        let db = setup_db("candidate_roundtrip").await;
        let repo = db.candidates();

        let id = repo.insert(&draft("Ada", "strong sql")).await.expect("insert");
        let row = repo
            .fetch(&id)
            .await
            .expect("fetch")
            .expect("candidate exists");
        assert_eq!(row.full_name, "Ada");
        assert_eq!(row.into_draft().notes, "strong sql");

        let all = repo.list().await.expect("list");
        assert_eq!(all.len(), 1);
    }

    #[tokio::test]
    async fn draft_upsert_replaces_previous_payload() {
        let db = setup_db("draft_upsert").await;
        let repo = db.drafts();

        repo.upsert("rec-1", r#"{"full_name":"A","notes":""}"#, Utc::now())
            .await
            .expect("first upsert");
        repo.upsert("rec-1", r#"{"full_name":"AB","notes":""}"#, Utc::now())
            .await
            .expect("second upsert");

        let row = repo
            .fetch("rec-1")
            .await
            .expect("fetch")
            .expect("draft exists");
        let decoded = row.into_draft().expect("decode");
        assert_eq!(decoded.full_name, "AB");
    }

    #[tokio::test]
    async fn draft_delete_reports_presence() {
        let db = setup_db("draft_delete").await;
        let repo = db.drafts();

        repo.upsert("rec-1", r#"{"full_name":"A","notes":""}"#, Utc::now())
            .await
            .expect("upsert");

        assert!(repo.delete("rec-1").await.expect("delete"));
        assert!(!repo.delete("rec-1").await.expect("second delete"));
        assert!(repo.fetch("rec-1").await.expect("fetch").is_none());
    }

    #[tokio::test]
    async fn draft_store_persists_and_logs() {
        let db = setup_db("draft_store").await;
        let store = DraftStore::new(&db, "rec-9");

        let snapshot = draft("Grace", "compiler background");
        store.persist(&snapshot).await.expect("persist");

        let stored = db
            .drafts()
            .fetch("rec-9")
            .await
            .expect("fetch")
            .expect("draft exists")
            .into_draft()
            .expect("decode");
        assert_eq!(stored, snapshot);

        let log = db
            .save_log()
            .list_for_record("rec-9")
            .await
            .expect("save log");
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].success, 1);
        assert!(log[0].error.is_none());
    }
}
