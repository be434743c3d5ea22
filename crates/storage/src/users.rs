use chrono::{DateTime, Utc};
use jobboard_core::{Role, UserAccount};
use sqlx::{Sqlite, SqlitePool, Transaction};
use thiserror::Error;

use crate::{is_unique_violation, to_rfc3339};

/// Repository for the platform users the workflow reads and links.
#[derive(Clone)]
pub struct UserRepository {
    pool: SqlitePool,
}

impl UserRepository {
    pub(crate) fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Loads a user by id.
    pub async fn fetch(&self, user_id: &str) -> Result<UserAccount, UserError> {
        let row = sqlx::query_as::<_, UserRow>(
            "SELECT id, email, role, company_id FROM users WHERE id = ?",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(UserError::NotFound)?;

        row.into_domain()
    }

    /// Inserts a user record. Accounts are owned by the identity layer; this
    /// exists for provisioning fixtures and local development.
    pub async fn insert(&self, user: &NewUser<'_>) -> Result<(), UserError> {
        let created_at = to_rfc3339(user.created_at);
        sqlx::query(
            "INSERT INTO users (id, email, role, company_id, created_at, updated_at) \
             VALUES (?, ?, ?, NULL, ?, ?)",
        )
        .bind(user.id)
        .bind(user.email)
        .bind(user.role.as_str())
        .bind(&created_at)
        .bind(&created_at)
        .execute(&self.pool)
        .await
        .map_err(|err| {
            if is_unique_violation(&err) {
                UserError::Duplicate
            } else {
                UserError::Database(err)
            }
        })?;
        Ok(())
    }
}

/// Payload required to create a user.
pub struct NewUser<'a> {
    pub id: &'a str,
    pub email: &'a str,
    pub role: Role,
    pub created_at: DateTime<Utc>,
}

/// Links an unlinked user to `company_id` and promotes them to employer.
pub(crate) async fn link_company(
    tx: &mut Transaction<'_, Sqlite>,
    user_id: &str,
    company_id: &str,
    at: DateTime<Utc>,
) -> Result<(), UserError> {
    let result = sqlx::query(
        "UPDATE users SET company_id = ?, role = ?, updated_at = ? \
         WHERE id = ? AND company_id IS NULL",
    )
    .bind(company_id)
    .bind(Role::Employer.as_str())
    .bind(to_rfc3339(at))
    .bind(user_id)
    .execute(&mut **tx)
    .await?;

    if result.rows_affected() == 1 {
        return Ok(());
    }

    let existing: Option<Option<String>> =
        sqlx::query_scalar("SELECT company_id FROM users WHERE id = ?")
            .bind(user_id)
            .fetch_optional(&mut **tx)
            .await?;
    match existing {
        None => Err(UserError::NotFound),
        Some(_) => Err(UserError::AlreadyLinked),
    }
}

#[derive(Debug, sqlx::FromRow)]
struct UserRow {
    id: String,
    email: String,
    role: String,
    company_id: Option<String>,
}

impl UserRow {
    fn into_domain(self) -> Result<UserAccount, UserError> {
        let role = self
            .role
            .parse::<Role>()
            .map_err(|err| UserError::Corrupt(err.to_string()))?;
        Ok(UserAccount {
            id: self.id,
            email: self.email,
            role,
            company_id: self.company_id,
        })
    }
}

/// Errors that can occur while reading or linking users.
#[derive(Debug, Error)]
pub enum UserError {
    #[error("user not found")]
    NotFound,
    #[error("user already exists")]
    Duplicate,
    #[error("user is already linked to a company")]
    AlreadyLinked,
    #[error("stored user is invalid: {0}")]
    Corrupt(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}
