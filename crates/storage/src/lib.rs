use std::borrow::Cow;
use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::{migrate::MigrateError, sqlite::SqlitePoolOptions, Row, SqlitePool};
use thiserror::Error;
use uuid::Uuid;

use ht_hooks_core::aggregate::DeliveryRecord;
use ht_hooks_core::event::{Direction, EventType, Outcome};

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

    /// Returns a handle to interact with partner rows.
    pub fn partners(&self) -> PartnerRepository {
        PartnerRepository {
            pool: self.pool.clone(),
        }
    }

    /// Returns a handle for manipulating webhook configurations.
    pub fn webhook_configs(&self) -> WebhookConfigRepository {
        WebhookConfigRepository {
            pool: self.pool.clone(),
        }
    }

    /// Returns a handle for the append-only delivery log.
    pub fn delivery_log(&self) -> DeliveryLogRepository {
        DeliveryLogRepository {
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

/// Repository used to query partner metadata.
#[derive(Clone)]
pub struct PartnerRepository {
    pool: SqlitePool,
}

impl PartnerRepository {
    /// Loads a partner row by id.
    pub async fn fetch(&self, partner_id: &str) -> Result<Partner, PartnerError> {
        let row = sqlx::query("SELECT id, display_name, active FROM partners WHERE id = ?")
            .bind(partner_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(PartnerError::NotFound)?;

        Ok(Partner {
            id: row.get("id"),
            display_name: row.get("display_name"),
            active: row.get::<i64, _>("active") != 0,
        })
    }

    /// Provisions a partner row. Registration itself is handled by the
    /// external partner-onboarding system; this only persists the outcome.
    pub async fn insert(&self, partner: &NewPartner<'_>) -> Result<(), PartnerError> {
        let stamp = to_rfc3339(partner.created_at);
        sqlx::query(
            "INSERT INTO partners (id, display_name, active, created_at, updated_at) \
             VALUES (?, ?, 1, ?, ?)",
        )
        .bind(partner.id)
        .bind(partner.display_name)
        .bind(&stamp)
        .bind(&stamp)
        .execute(&self.pool)
        .await
        .map_err(|err| match err {
            sqlx::Error::Database(db_err) if db_err.code().as_deref() == Some("1555") => {
                PartnerError::AlreadyExists
            }
            other => PartnerError::Database(other),
        })?;
        Ok(())
    }
}

/// Partner row as stored.
#[derive(Debug, Clone)]
pub struct Partner {
    pub id: String,
    pub display_name: String,
    pub active: bool,
}

/// Data required to provision a partner.
pub struct NewPartner<'a> {
    pub id: &'a str,
    pub display_name: &'a str,
    pub created_at: DateTime<Utc>,
}

/// Errors for partner lookups.
#[derive(Debug, Error)]
pub enum PartnerError {
    #[error("partner not found")]
    NotFound,
    #[error("partner already exists")]
    AlreadyExists,
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Repository managing per-partner webhook configuration and signing secrets.
#[derive(Clone)]
pub struct WebhookConfigRepository {
    pool: SqlitePool,
}

impl WebhookConfigRepository {
    /// Loads the configuration for the provided partner, secret included.
    ///
    /// Callers are responsible for never logging the secret field.
    pub async fn fetch(&self, partner_id: &str) -> Result<WebhookConfig, ConfigError> {
        let row = sqlx::query(
            "SELECT partner_id, target_url, secret, disabled, rotated_at \
             FROM webhook_configs WHERE partner_id = ?",
        )
        .bind(partner_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(ConfigError::NotFound)?;

        Ok(WebhookConfig {
            partner_id: row.get("partner_id"),
            target_url: row.get("target_url"),
            secret: row.get("secret"),
            disabled: row.get::<i64, _>("disabled") != 0,
            rotated_at: row.get("rotated_at"),
        })
    }

    /// Sets the target URL, creating the configuration on first call.
    ///
    /// `initial_secret` is only used when the row does not exist yet; an
    /// existing secret is never overwritten by a URL update.
    pub async fn upsert_url(
        &self,
        partner_id: &str,
        target_url: &str,
        initial_secret: &str,
        now: DateTime<Utc>,
    ) -> Result<WebhookConfig, ConfigError> {
        let stamp = to_rfc3339(now);
        let row = sqlx::query(
            "INSERT INTO webhook_configs \
             (partner_id, target_url, secret, disabled, rotated_at, created_at, updated_at) \
             VALUES (?, ?, ?, 0, ?, ?, ?) \
             ON CONFLICT(partner_id) DO UPDATE \
             SET target_url = excluded.target_url, updated_at = excluded.updated_at \
             RETURNING partner_id, target_url, secret, disabled, rotated_at",
        )
        .bind(partner_id)
        .bind(target_url)
        .bind(initial_secret)
        .bind(&stamp)
        .bind(&stamp)
        .bind(&stamp)
        .fetch_one(&self.pool)
        .await
        .map_err(|err| match err {
            sqlx::Error::Database(db_err) if db_err.code().as_deref() == Some("787") => {
                ConfigError::MissingPartner
            }
            other => ConfigError::Database(other),
        })?;

        Ok(WebhookConfig {
            partner_id: row.get("partner_id"),
            target_url: row.get("target_url"),
            secret: row.get("secret"),
            disabled: row.get::<i64, _>("disabled") != 0,
            rotated_at: row.get("rotated_at"),
        })
    }

    /// Atomically replaces the active signing secret.
    ///
    /// The single-row UPDATE runs in its own write transaction, so a
    /// concurrent verification reads either the old or the new secret and
    /// never a partially rotated state. Records written under the old secret
    /// are untouched.
    pub async fn rotate_secret(
        &self,
        partner_id: &str,
        new_secret: &str,
        now: DateTime<Utc>,
    ) -> Result<WebhookConfig, ConfigError> {
        let stamp = to_rfc3339(now);
        let row = sqlx::query(
            "UPDATE webhook_configs \
             SET secret = ?, rotated_at = ?, updated_at = ? \
             WHERE partner_id = ? AND disabled = 0 \
             RETURNING partner_id, target_url, secret, disabled, rotated_at",
        )
        .bind(new_secret)
        .bind(&stamp)
        .bind(&stamp)
        .bind(partner_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(ConfigError::NotFound)?;

        Ok(WebhookConfig {
            partner_id: row.get("partner_id"),
            target_url: row.get("target_url"),
            secret: row.get("secret"),
            disabled: row.get::<i64, _>("disabled") != 0,
            rotated_at: row.get("rotated_at"),
        })
    }

    /// Soft-disables the configuration on partner deactivation.
    ///
    /// The row is kept so historic delivery records stay attributable.
    pub async fn disable(&self, partner_id: &str, now: DateTime<Utc>) -> Result<(), ConfigError> {
        let result = sqlx::query(
            "UPDATE webhook_configs SET disabled = 1, updated_at = ? WHERE partner_id = ?",
        )
        .bind(to_rfc3339(now))
        .bind(partner_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(ConfigError::NotFound);
        }
        Ok(())
    }
}

/// Webhook configuration row, one per partner.
#[derive(Debug, Clone)]
pub struct WebhookConfig {
    pub partner_id: String,
    pub target_url: String,
    pub secret: String,
    pub disabled: bool,
    pub rotated_at: DateTime<Utc>,
}

/// Errors that can occur while reading or mutating webhook configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("webhook configuration not found")]
    NotFound,
    #[error("partner is missing for webhook configuration")]
    MissingPartner,
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Repository for the append-only `delivery_log` table.
///
/// Rows are immutable once written; there are no UPDATE or DELETE paths.
#[derive(Clone)]
pub struct DeliveryLogRepository {
    pool: SqlitePool,
}

impl DeliveryLogRepository {
    /// Appends one delivery attempt. All-or-nothing: a failed insert leaves
    /// no partial row behind, and the error is surfaced so the HTTP caller
    /// can report it to the sender.
    pub async fn insert(&self, record: NewDeliveryRecord<'_>) -> Result<(), DeliveryLogError> {
        let result = sqlx::query(
            "INSERT INTO delivery_log \
             (id, partner_id, event_type, payload_json, direction, outcome, \
              status_code, error_detail, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&record.id)
        .bind(&record.partner_id)
        .bind(&record.event_type)
        .bind(&record.payload_json)
        .bind(record.direction.as_str())
        .bind(record.outcome.as_str())
        .bind(record.status_code.map(|code| code as i64))
        .bind(&record.error_detail)
        .bind(to_rfc3339(record.created_at))
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db_err)) => {
                if db_err.code().as_deref() == Some("787") {
                    return Err(DeliveryLogError::MissingPartner);
                }
                Err(DeliveryLogError::Database(sqlx::Error::Database(db_err)))
            }
            Err(err) => Err(DeliveryLogError::Database(err)),
        }
    }

    /// Lists all records for a partner in ascending creation order, the shape
    /// the aggregation engine folds over.
    pub async fn list_for_partner(
        &self,
        partner_id: &str,
    ) -> Result<Vec<DeliveryRecord>, DeliveryLogError> {
        let rows = sqlx::query_as::<_, DeliveryRow>(
            "SELECT id, partner_id, event_type, payload_json, direction, outcome, \
                    status_code, error_detail, created_at \
             FROM delivery_log WHERE partner_id = ? \
             ORDER BY created_at ASC, id ASC",
        )
        .bind(partner_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(DeliveryRow::into_domain).collect())
    }

    /// Returns one reverse-chronological page of records plus the total count.
    pub async fn list_page(
        &self,
        partner_id: &str,
        limit: u32,
        offset: u32,
    ) -> Result<DeliveryPage, DeliveryLogError> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM delivery_log WHERE partner_id = ?")
            .bind(partner_id)
            .fetch_one(&self.pool)
            .await?;

        let rows = sqlx::query_as::<_, DeliveryRow>(
            "SELECT id, partner_id, event_type, payload_json, direction, outcome, \
                    status_code, error_detail, created_at \
             FROM delivery_log WHERE partner_id = ? \
             ORDER BY created_at DESC, id DESC \
             LIMIT ? OFFSET ?",
        )
        .bind(partner_id)
        .bind(limit as i64)
        .bind(offset as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(DeliveryPage {
            records: rows.into_iter().map(DeliveryRow::into_domain).collect(),
            total: total as u64,
        })
    }
}

/// One page of the delivery log.
#[derive(Debug, Clone)]
pub struct DeliveryPage {
    pub records: Vec<DeliveryRecord>,
    pub total: u64,
}

/// Data required to append one delivery attempt.
#[derive(Clone)]
pub struct NewDeliveryRecord<'a> {
    pub id: Cow<'a, str>,
    pub partner_id: Cow<'a, str>,
    pub event_type: Cow<'a, str>,
    pub payload_json: Cow<'a, str>,
    pub direction: Direction,
    pub outcome: Outcome,
    pub status_code: Option<u16>,
    pub error_detail: Option<Cow<'a, str>>,
    pub created_at: DateTime<Utc>,
}

impl<'a> NewDeliveryRecord<'a> {
    pub fn with_generated_id(self) -> Self {
        Self {
            id: Cow::Owned(Uuid::new_v4().to_string()),
            ..self
        }
    }
}

/// Error type for operations on the delivery log.
#[derive(Debug, Error)]
pub enum DeliveryLogError {
    #[error("partner is missing for delivery record")]
    MissingPartner,
    #[error("database error: {0}")]
    Database(sqlx::Error),
}

impl From<sqlx::Error> for DeliveryLogError {
    fn from(err: sqlx::Error) -> Self {
        Self::Database(err)
    }
}

#[derive(Debug, sqlx::FromRow)]
struct DeliveryRow {
    id: String,
    partner_id: String,
    event_type: String,
    payload_json: String,
    direction: String,
    outcome: String,
    status_code: Option<i64>,
    error_detail: Option<String>,
    created_at: DateTime<Utc>,
}

impl DeliveryRow {
    fn into_domain(self) -> DeliveryRecord {
        DeliveryRecord {
            id: self.id,
            partner_id: self.partner_id,
            event_type: EventType::parse(&self.event_type),
            payload_json: self.payload_json,
            direction: Direction::from_str(&self.direction).unwrap_or(Direction::Inbound),
            outcome: Outcome::from_str(&self.outcome).unwrap_or(Outcome::Failure),
            status_code: self.status_code.map(|code| code as u16),
            error_detail: self.error_detail,
            created_at: self.created_at,
        }
    }
}

fn to_rfc3339(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Millis, true)
}
