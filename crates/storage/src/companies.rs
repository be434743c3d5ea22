use chrono::{DateTime, Utc};
use jobboard_core::{Company, CompanyDraft};
use sqlx::{Sqlite, SqlitePool, Transaction};
use thiserror::Error;

use crate::{is_unique_violation, to_rfc3339};

const COMPANY_COLUMNS: &str = "id, registration_id, name, contact_email, phone, website, \
     logo_url, cover_url, description, size, address, city, country, industry_id, \
     is_verified, created_at";

/// Repository for companies provisioned by approved registrations.
#[derive(Clone)]
pub struct CompanyRepository {
    pool: SqlitePool,
}

impl CompanyRepository {
    pub(crate) fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Loads a company by id.
    pub async fn fetch(&self, company_id: &str) -> Result<Company, CompanyError> {
        let row = sqlx::query_as::<_, CompanyRow>(&format!(
            "SELECT {COMPANY_COLUMNS} FROM companies WHERE id = ?"
        ))
        .bind(company_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(CompanyError::NotFound)?;

        Ok(row.into_domain())
    }

    /// Returns the company provisioned from `registration_id`, if any.
    pub async fn find_by_registration(
        &self,
        registration_id: &str,
    ) -> Result<Option<Company>, CompanyError> {
        let row = sqlx::query_as::<_, CompanyRow>(&format!(
            "SELECT {COMPANY_COLUMNS} FROM companies WHERE registration_id = ?"
        ))
        .bind(registration_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(CompanyRow::into_domain))
    }
}

/// Inserts a company inside the approval transaction.
pub(crate) async fn insert(
    tx: &mut Transaction<'_, Sqlite>,
    company_id: &str,
    draft: &CompanyDraft,
    created_at: DateTime<Utc>,
) -> Result<Company, CompanyError> {
    let row = sqlx::query_as::<_, CompanyRow>(&format!(
        "INSERT INTO companies ({COMPANY_COLUMNS}) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
         RETURNING {COMPANY_COLUMNS}"
    ))
    .bind(company_id)
    .bind(&draft.registration_id)
    .bind(&draft.name)
    .bind(&draft.contact_email)
    .bind(&draft.phone)
    .bind(&draft.website)
    .bind(&draft.logo_url)
    .bind(&draft.cover_url)
    .bind(&draft.description)
    .bind(&draft.size)
    .bind(&draft.address)
    .bind(&draft.city)
    .bind(&draft.country)
    .bind(draft.industry_id)
    .bind(draft.is_verified)
    .bind(to_rfc3339(created_at))
    .fetch_one(&mut **tx)
    .await
    .map_err(|err| {
        if is_unique_violation(&err) {
            CompanyError::AlreadyProvisioned
        } else {
            CompanyError::Database(err)
        }
    })?;

    Ok(row.into_domain())
}

#[derive(Debug, sqlx::FromRow)]
struct CompanyRow {
    id: String,
    registration_id: String,
    name: String,
    contact_email: String,
    phone: Option<String>,
    website: Option<String>,
    logo_url: Option<String>,
    cover_url: Option<String>,
    description: Option<String>,
    size: Option<String>,
    address: Option<String>,
    city: Option<String>,
    country: Option<String>,
    industry_id: Option<i64>,
    is_verified: bool,
    created_at: DateTime<Utc>,
}

impl CompanyRow {
    fn into_domain(self) -> Company {
        Company {
            id: self.id,
            registration_id: self.registration_id,
            name: self.name,
            contact_email: self.contact_email,
            phone: self.phone,
            website: self.website,
            logo_url: self.logo_url,
            cover_url: self.cover_url,
            description: self.description,
            size: self.size,
            address: self.address,
            city: self.city,
            country: self.country,
            industry_id: self.industry_id,
            is_verified: self.is_verified,
            created_at: self.created_at,
        }
    }
}

/// Errors that can occur while reading or provisioning companies.
#[derive(Debug, Error)]
pub enum CompanyError {
    #[error("company not found")]
    NotFound,
    #[error("a company already exists for this registration")]
    AlreadyProvisioned,
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::setup_db;

    #[tokio::test]
    async fn fetch_errors_for_unknown_company() {
        let db = setup_db().await;
        let err = db.companies().fetch("missing").await.unwrap_err();
        assert!(matches!(err, CompanyError::NotFound));
        assert!(db
            .companies()
            .find_by_registration("missing")
            .await
            .expect("lookup")
            .is_none());
    }
}
