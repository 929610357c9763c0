//! Identity persistence: the store the Authenticator consults to resolve and
//! provision principals.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::{mapref::entry::Entry, DashMap};
use sqlx::{postgres::PgPool, FromRow};
use thiserror::Error;
use uuid::Uuid;

use crate::models::{Identity, NewIdentity, Role};

#[derive(Debug, Error)]
pub enum StoreError {
    /// Another writer created the same subject first.
    #[error("Identity already exists for subject {0}")]
    Conflict(String),

    #[error("Identity store unavailable: {0}")]
    Unavailable(#[from] anyhow::Error),
}

#[async_trait]
pub trait IdentityStore: Send + Sync {
    async fn find_by_subject(&self, subject_id: &str) -> Result<Option<Identity>, StoreError>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Identity>, StoreError>;

    /// Insert a new identity. Fails with [`StoreError::Conflict`] when the
    /// subject id is already present.
    async fn create(&self, new: NewIdentity) -> Result<Identity, StoreError>;

    /// Record a successful authentication and return the updated record.
    async fn touch_last_login(
        &self,
        id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<Identity, StoreError>;

    /// Liveness probe for health reporting.
    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

// ==================== PostgreSQL ====================

#[derive(Debug, FromRow)]
struct IdentityRow {
    id: Uuid,
    subject_id: String,
    email: String,
    first_name: String,
    last_name: String,
    role_code: String,
    last_login_at: DateTime<Utc>,
    created_at: DateTime<Utc>,
}

impl TryFrom<IdentityRow> for Identity {
    type Error = StoreError;

    fn try_from(row: IdentityRow) -> Result<Self, Self::Error> {
        let role: Role = row
            .role_code
            .parse()
            .map_err(|e: String| StoreError::Unavailable(anyhow::anyhow!(e)))?;

        Ok(Identity {
            id: row.id,
            subject_id: row.subject_id,
            email: row.email,
            first_name: row.first_name,
            last_name: row.last_name,
            role,
            last_login_at: row.last_login_at,
            created_at: row.created_at,
        })
    }
}

fn db_error(e: sqlx::Error) -> StoreError {
    StoreError::Unavailable(anyhow::anyhow!(e))
}

/// PostgreSQL-backed identity store. Uniqueness of `subject_id` is enforced
/// by the schema, so concurrent first logins surface as `Conflict`.
#[derive(Clone)]
pub struct PgIdentityStore {
    pool: PgPool,
}

impl PgIdentityStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl IdentityStore for PgIdentityStore {
    async fn find_by_subject(&self, subject_id: &str) -> Result<Option<Identity>, StoreError> {
        sqlx::query_as::<_, IdentityRow>("SELECT * FROM identities WHERE subject_id = $1")
            .bind(subject_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?
            .map(Identity::try_from)
            .transpose()
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Identity>, StoreError> {
        sqlx::query_as::<_, IdentityRow>("SELECT * FROM identities WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?
            .map(Identity::try_from)
            .transpose()
    }

    async fn create(&self, new: NewIdentity) -> Result<Identity, StoreError> {
        let identity = Identity::new(new);

        let result = sqlx::query(
            r#"
            INSERT INTO identities (id, subject_id, email, first_name, last_name, role_code, last_login_at, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(identity.id)
        .bind(&identity.subject_id)
        .bind(&identity.email)
        .bind(&identity.first_name)
        .bind(&identity.last_name)
        .bind(identity.role.as_str())
        .bind(identity.last_login_at)
        .bind(identity.created_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(identity),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                Err(StoreError::Conflict(identity.subject_id))
            }
            Err(e) => Err(db_error(e)),
        }
    }

    async fn touch_last_login(
        &self,
        id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<Identity, StoreError> {
        let row = sqlx::query_as::<_, IdentityRow>(
            "UPDATE identities SET last_login_at = $1 WHERE id = $2 RETURNING *",
        )
        .bind(at)
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?
        .ok_or_else(|| StoreError::Unavailable(anyhow::anyhow!("Identity {} vanished", id)))?;

        Identity::try_from(row)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        crate::db::ping(&self.pool).await.map_err(db_error)
    }
}

// ==================== In-memory ====================

/// Process-local identity store keyed by subject id. Used by tests and by the
/// binary when no database is configured.
#[derive(Default)]
pub struct InMemoryIdentityStore {
    by_subject: DashMap<String, Identity>,
}

impl InMemoryIdentityStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.by_subject.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_subject.is_empty()
    }
}

#[async_trait]
impl IdentityStore for InMemoryIdentityStore {
    async fn find_by_subject(&self, subject_id: &str) -> Result<Option<Identity>, StoreError> {
        Ok(self.by_subject.get(subject_id).map(|e| e.value().clone()))
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Identity>, StoreError> {
        Ok(self
            .by_subject
            .iter()
            .find(|e| e.value().id == id)
            .map(|e| e.value().clone()))
    }

    async fn create(&self, new: NewIdentity) -> Result<Identity, StoreError> {
        match self.by_subject.entry(new.subject_id.clone()) {
            Entry::Occupied(_) => Err(StoreError::Conflict(new.subject_id)),
            Entry::Vacant(slot) => {
                let identity = Identity::new(new);
                slot.insert(identity.clone());
                Ok(identity)
            }
        }
    }

    async fn touch_last_login(
        &self,
        id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<Identity, StoreError> {
        let mut entry = self
            .by_subject
            .iter_mut()
            .find(|e| e.value().id == id)
            .ok_or_else(|| StoreError::Unavailable(anyhow::anyhow!("Identity {} vanished", id)))?;

        entry.value_mut().last_login_at = at;
        Ok(entry.value().clone())
    }
}
