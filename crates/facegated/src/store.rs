//! Enrollment store: SQLite-backed face descriptors, one per identity.
//!
//! The `identity_id` column carries a unique index. The pre-insert lookup only
//! produces a friendlier error; a racing insert is caught by the index and
//! reported the same way.

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use facegate_core::quality::check_threshold;
use facegate_core::{Descriptor, DescriptorError, GalleryEntry, DESCRIPTOR_DIM};
use rusqlite::types::Type;
use rusqlite::{params, OptionalExtension, TransactionBehavior};
use serde::Serialize;
use std::path::Path;
use thiserror::Error;
use tokio_rusqlite::Connection;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("invalid descriptor: {0}")]
    InvalidDescriptor(#[from] DescriptorError),
    #[error("quality score {score} is outside [0, 1]")]
    InvalidQuality { score: f32 },
    #[error("quality score {score:.3} is below the enrollment threshold {threshold:.3}")]
    QualityTooLow { score: f32, threshold: f32 },
    #[error("identity already enrolled at {registered_at}")]
    AlreadyEnrolled { registered_at: DateTime<Utc> },
    #[error("face descriptor {0} not found")]
    NotFound(String),
    #[error("database error: {0}")]
    Database(#[from] tokio_rusqlite::Error),
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Database(tokio_rusqlite::Error::Rusqlite(e))
    }
}

/// A persisted face descriptor.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FaceDescriptorRecord {
    pub id: String,
    #[serde(rename = "userId")]
    pub identity_id: String,
    pub descriptor: Descriptor,
    pub quality_score: f32,
    pub source_image_ref: Option<String>,
    pub created_at: DateTime<Utc>,
    pub is_primary: bool,
}

/// Input to [`EnrollmentStore::enroll`]. The vector is validated on write.
#[derive(Debug, Clone)]
pub struct NewEnrollment {
    pub identity_id: String,
    pub vector: Vec<f32>,
    pub quality_score: f32,
    pub source_image_ref: Option<String>,
}

const SCHEMA_SQL: &str = r"
CREATE TABLE IF NOT EXISTS face_descriptors (
    id TEXT PRIMARY KEY,
    identity_id TEXT NOT NULL,
    vector BLOB NOT NULL,
    dimension INTEGER NOT NULL CHECK(dimension = 128),
    quality_score REAL NOT NULL,
    source_image_ref TEXT,
    created_at TEXT NOT NULL,
    is_primary INTEGER NOT NULL DEFAULT 1
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_face_descriptors_identity
    ON face_descriptors(identity_id);

CREATE TABLE IF NOT EXISTS members (
    user_id TEXT PRIMARY KEY,
    display_name TEXT NOT NULL,
    email TEXT
);
";

const RECORD_COLUMNS: &str =
    "id, identity_id, vector, dimension, quality_score, source_image_ref, created_at, is_primary";

/// Async handle to the descriptor database. Cheap to clone; all clones share
/// one connection thread.
#[derive(Clone)]
pub struct EnrollmentStore {
    conn: Connection,
    enroll_threshold: f32,
}

impl EnrollmentStore {
    /// Open (or create) the database at `path`.
    pub async fn open(path: &Path, enroll_threshold: f32) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| StoreError::Database(tokio_rusqlite::Error::Other(Box::new(e))))?;
        }
        let conn = Connection::open(path).await?;
        let journal = conn
            .call(|conn| {
                let mode: String = conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
                Ok(mode)
            })
            .await?;
        tracing::info!(path = %path.display(), journal = %journal, "enrollment store opened");
        Self::init(conn, enroll_threshold).await
    }

    pub async fn open_in_memory(enroll_threshold: f32) -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().await?;
        Self::init(conn, enroll_threshold).await
    }

    async fn init(conn: Connection, enroll_threshold: f32) -> Result<Self, StoreError> {
        conn.call(|conn| {
            conn.busy_timeout(std::time::Duration::from_secs(5))?;
            conn.execute_batch(SCHEMA_SQL)?;
            Ok(())
        })
        .await?;
        Ok(Self { conn, enroll_threshold })
    }

    /// The underlying connection, shared with the member directory.
    pub fn connection(&self) -> Connection {
        self.conn.clone()
    }

    pub fn enroll_threshold(&self) -> f32 {
        self.enroll_threshold
    }

    /// Validate and persist one descriptor for `identity_id`.
    ///
    /// At most one enrollment per identity ever succeeds; the rest get
    /// `AlreadyEnrolled` carrying the winner's timestamp.
    pub async fn enroll(&self, new: NewEnrollment) -> Result<FaceDescriptorRecord, StoreError> {
        let descriptor = Descriptor::new(new.vector)?;
        if !(new.quality_score.is_finite() && (0.0..=1.0).contains(&new.quality_score)) {
            return Err(StoreError::InvalidQuality {
                score: new.quality_score,
            });
        }
        check_threshold(new.quality_score, self.enroll_threshold).map_err(|_| StoreError::QualityTooLow {
            score: new.quality_score,
            threshold: self.enroll_threshold,
        })?;

        let record = FaceDescriptorRecord {
            id: uuid::Uuid::new_v4().to_string(),
            identity_id: new.identity_id,
            descriptor,
            quality_score: new.quality_score,
            source_image_ref: new.source_image_ref,
            // Stored at microsecond precision; keep the in-memory copy identical.
            created_at: Utc::now().trunc_subsecs(6),
            is_primary: true,
        };

        let result = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                let outcome = insert_unique(&tx, &record)?;
                if outcome.is_ok() {
                    tx.commit()?;
                }
                Ok(outcome.map(|()| record))
            })
            .await?;

        match &result {
            Ok(record) => tracing::info!(
                user_id = %record.identity_id,
                id = %record.id,
                quality = record.quality_score,
                "face descriptor enrolled"
            ),
            Err(StoreError::AlreadyEnrolled { registered_at }) => {
                tracing::info!(%registered_at, "enrollment refused: identity already enrolled")
            }
            Err(_) => {}
        }
        result
    }

    /// The descriptor enrolled for `identity_id`, if any.
    pub async fn find_by_identity(&self, identity_id: &str) -> Result<Option<FaceDescriptorRecord>, StoreError> {
        let identity_id = identity_id.to_string();
        Ok(self
            .conn
            .call(move |conn| {
                let sql = format!("SELECT {RECORD_COLUMNS} FROM face_descriptors WHERE identity_id = ?1");
                Ok(conn.query_row(&sql, params![identity_id], decode_record).optional()?)
            })
            .await?)
    }

    pub async fn get(&self, id: &str) -> Result<Option<FaceDescriptorRecord>, StoreError> {
        let id = id.to_string();
        Ok(self
            .conn
            .call(move |conn| {
                let sql = format!("SELECT {RECORD_COLUMNS} FROM face_descriptors WHERE id = ?1");
                Ok(conn.query_row(&sql, params![id], decode_record).optional()?)
            })
            .await?)
    }

    /// Every enrolled descriptor, for matching.
    pub async fn gallery(&self) -> Result<Vec<GalleryEntry>, StoreError> {
        Ok(self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare("SELECT id, identity_id, vector FROM face_descriptors ORDER BY created_at")?;
                let rows = stmt.query_map([], |row| {
                    let blob: Vec<u8> = row.get(2)?;
                    Ok(GalleryEntry {
                        descriptor_id: row.get(0)?,
                        identity_id: row.get(1)?,
                        descriptor: decode_vector(&blob, 2)?,
                    })
                })?;
                Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
            })
            .await?)
    }

    pub async fn count(&self) -> Result<usize, StoreError> {
        let n: i64 = self
            .conn
            .call(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM face_descriptors", [], |row| row.get(0))?))
            .await?;
        Ok(usize::try_from(n).unwrap_or(0))
    }

    /// Remove a descriptor by id, freeing its identity to enroll again.
    pub async fn delete(&self, id: &str) -> Result<(), StoreError> {
        let owned = id.to_string();
        let removed = self
            .conn
            .call(move |conn| Ok(conn.execute("DELETE FROM face_descriptors WHERE id = ?1", params![owned])?))
            .await?;
        if removed == 0 {
            return Err(StoreError::NotFound(id.to_string()));
        }
        tracing::info!(id, "face descriptor deleted");
        Ok(())
    }
}

/// Insert `record` unless its identity already holds a descriptor.
///
/// Domain refusals come back as the inner `Err`; only database faults use the
/// outer one.
fn insert_unique(
    conn: &rusqlite::Connection,
    record: &FaceDescriptorRecord,
) -> rusqlite::Result<Result<(), StoreError>> {
    if let Some(registered_at) = registered_at(conn, &record.identity_id)? {
        return Ok(Err(StoreError::AlreadyEnrolled { registered_at }));
    }

    let inserted = conn.execute(
        "INSERT INTO face_descriptors
             (id, identity_id, vector, dimension, quality_score, source_image_ref, created_at, is_primary)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            record.id,
            record.identity_id,
            encode_vector(record.descriptor.as_slice()),
            DESCRIPTOR_DIM as i64,
            f64::from(record.quality_score),
            record.source_image_ref,
            record.created_at.to_rfc3339_opts(SecondsFormat::Micros, true),
            record.is_primary,
        ],
    );

    match inserted {
        Ok(_) => Ok(Ok(())),
        Err(e) if is_unique_violation(&e) => {
            let registered_at = registered_at(conn, &record.identity_id)?.unwrap_or(record.created_at);
            Ok(Err(StoreError::AlreadyEnrolled { registered_at }))
        }
        Err(e) => Err(e),
    }
}

fn registered_at(conn: &rusqlite::Connection, identity_id: &str) -> rusqlite::Result<Option<DateTime<Utc>>> {
    conn.query_row(
        "SELECT created_at FROM face_descriptors WHERE identity_id = ?1",
        params![identity_id],
        |row| parse_timestamp(&row.get::<_, String>(0)?, 0),
    )
    .optional()
}

fn is_unique_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(err, _)
            if err.code == rusqlite::ErrorCode::ConstraintViolation
                && (err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                    || err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY)
    )
}

fn decode_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<FaceDescriptorRecord> {
    let blob: Vec<u8> = row.get(2)?;
    let dimension: i64 = row.get(3)?;
    if dimension != DESCRIPTOR_DIM as i64 {
        return Err(rusqlite::Error::IntegralValueOutOfRange(3, dimension));
    }
    let quality: f64 = row.get(4)?;
    Ok(FaceDescriptorRecord {
        id: row.get(0)?,
        identity_id: row.get(1)?,
        descriptor: decode_vector(&blob, 2)?,
        quality_score: quality as f32,
        source_image_ref: row.get(5)?,
        created_at: parse_timestamp(&row.get::<_, String>(6)?, 6)?,
        is_primary: row.get(7)?,
    })
}

fn parse_timestamp(raw: &str, column: usize) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(column, Type::Text, Box::new(e)))
}

fn encode_vector(values: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(std::mem::size_of_val(values));
    for v in values {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Little-endian f32 blob back to a validated descriptor.
fn decode_vector(blob: &[u8], column: usize) -> rusqlite::Result<Descriptor> {
    let fail = |e: DescriptorError| rusqlite::Error::FromSqlConversionFailure(column, Type::Blob, Box::new(e));
    if blob.len() % 4 != 0 {
        return Err(fail(DescriptorError::InvalidLength {
            expected: DESCRIPTOR_DIM,
            actual: blob.len() / 4,
        }));
    }
    let values = blob
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect();
    Descriptor::new(values).map_err(fail)
}
