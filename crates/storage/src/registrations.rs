use chrono::{DateTime, Utc};
use jobboard_core::{
    Company, CompanyDraft, CompanyRegistration, RegistrationDetails, RegistrationStatus,
    ReviewDecision, TransitionError,
};
use sqlx::SqlitePool;
use thiserror::Error;
use uuid::Uuid;

use crate::companies::{self, CompanyError};
use crate::users::{self, UserError};
use crate::{industries, is_foreign_key_violation, is_unique_violation, to_rfc3339};

const REGISTRATION_COLUMNS: &str = "id, requester_id, company_name, website, phone, address, \
     city, country, industry_id, tax_code, description, company_size, logo_url, cover_url, \
     contact_person_name, contact_person_email, contact_person_phone, status, requested_at, \
     reviewed_by_admin_id, reviewed_at, admin_notes, company_id";

/// Repository for company registration requests and their review.
#[derive(Clone)]
pub struct RegistrationRepository {
    pool: SqlitePool,
}

impl RegistrationRepository {
    pub(crate) fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Inserts a new pending registration for `requester_id`.
    pub async fn insert(
        &self,
        requester_id: &str,
        details: &RegistrationDetails,
        requested_at: DateTime<Utc>,
    ) -> Result<CompanyRegistration, RegistrationError> {
        let mut tx = self.pool.begin().await?;

        if let Some(industry_id) = details.industry_id {
            if !industries::exists_in(&mut tx, industry_id).await? {
                return Err(RegistrationError::UnknownIndustry(industry_id));
            }
        }

        let row = sqlx::query_as::<_, RegistrationRow>(&format!(
            "INSERT INTO company_registrations \
             (id, requester_id, company_name, website, phone, address, city, country, \
              industry_id, tax_code, description, company_size, logo_url, cover_url, \
              contact_person_name, contact_person_email, contact_person_phone, status, requested_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
             RETURNING {REGISTRATION_COLUMNS}"
        ))
        .bind(Uuid::new_v4().to_string())
        .bind(requester_id)
        .bind(&details.company_name)
        .bind(&details.website)
        .bind(&details.phone)
        .bind(&details.address)
        .bind(&details.city)
        .bind(&details.country)
        .bind(details.industry_id)
        .bind(&details.tax_code)
        .bind(&details.description)
        .bind(&details.company_size)
        .bind(&details.logo_url)
        .bind(&details.cover_url)
        .bind(&details.contact_person_name)
        .bind(&details.contact_person_email)
        .bind(&details.contact_person_phone)
        .bind(RegistrationStatus::Pending.as_str())
        .bind(to_rfc3339(requested_at))
        .fetch_one(&mut *tx)
        .await
        .map_err(|err| {
            if is_unique_violation(&err) {
                RegistrationError::DuplicatePending
            } else if is_foreign_key_violation(&err) {
                RegistrationError::MissingRequester
            } else {
                RegistrationError::Database(err)
            }
        })?;

        tx.commit().await?;
        row.into_domain()
    }

    /// Loads a registration by id.
    pub async fn fetch(&self, id: &str) -> Result<CompanyRegistration, RegistrationError> {
        sqlx::query_as::<_, RegistrationRow>(&format!(
            "SELECT {REGISTRATION_COLUMNS} FROM company_registrations WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(RegistrationError::NotFound)?
        .into_domain()
    }

    /// Returns the most recent registration submitted by `requester_id`.
    pub async fn latest_for_requester(
        &self,
        requester_id: &str,
    ) -> Result<Option<CompanyRegistration>, RegistrationError> {
        let row = sqlx::query_as::<_, RegistrationRow>(&format!(
            "SELECT {REGISTRATION_COLUMNS} FROM company_registrations \
             WHERE requester_id = ? \
             ORDER BY requested_at DESC, id DESC \
             LIMIT 1"
        ))
        .bind(requester_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(RegistrationRow::into_domain).transpose()
    }

    /// Returns `true` when `requester_id` has an undecided registration.
    pub async fn has_pending(&self, requester_id: &str) -> Result<bool, RegistrationError> {
        let found: Option<String> = sqlx::query_scalar(
            "SELECT id FROM company_registrations WHERE requester_id = ? AND status = ? LIMIT 1",
        )
        .bind(requester_id)
        .bind(RegistrationStatus::Pending.as_str())
        .fetch_optional(&self.pool)
        .await?;
        Ok(found.is_some())
    }

    /// Lists registrations, optionally restricted to one status, newest first.
    pub async fn list(
        &self,
        status: Option<RegistrationStatus>,
    ) -> Result<Vec<CompanyRegistration>, RegistrationError> {
        let rows = match status {
            Some(status) => {
                sqlx::query_as::<_, RegistrationRow>(&format!(
                    "SELECT {REGISTRATION_COLUMNS} FROM company_registrations \
                     WHERE status = ? \
                     ORDER BY requested_at DESC, id DESC"
                ))
                .bind(status.as_str())
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as::<_, RegistrationRow>(&format!(
                    "SELECT {REGISTRATION_COLUMNS} FROM company_registrations \
                     ORDER BY requested_at DESC, id DESC"
                ))
                .fetch_all(&self.pool)
                .await?
            }
        };

        rows.into_iter().map(RegistrationRow::into_domain).collect()
    }

    /// Applies an admin decision to a pending registration.
    ///
    /// The status update is conditional on the row still being pending, so of
    /// two concurrent reviews only one can win. On approval the company insert
    /// and the requester link run in the same transaction; any failure rolls
    /// everything back and the registration stays pending.
    pub async fn decide(
        &self,
        id: &str,
        decision: &ReviewDecision,
        admin_id: &str,
        reviewed_at: DateTime<Utc>,
    ) -> Result<DecisionOutcome, RegistrationError> {
        let mut tx = self.pool.begin().await?;
        let company_id = decision
            .provisions_company()
            .then(|| Uuid::new_v4().to_string());

        let updated = sqlx::query_as::<_, RegistrationRow>(&format!(
            "UPDATE company_registrations \
             SET status = ?, reviewed_by_admin_id = ?, reviewed_at = ?, admin_notes = ?, company_id = ? \
             WHERE id = ? AND status = ? \
             RETURNING {REGISTRATION_COLUMNS}"
        ))
        .bind(decision.target_status().as_str())
        .bind(admin_id)
        .bind(to_rfc3339(reviewed_at))
        .bind(decision.notes())
        .bind(company_id.as_deref())
        .bind(id)
        .bind(RegistrationStatus::Pending.as_str())
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = updated else {
            let current: Option<String> =
                sqlx::query_scalar("SELECT status FROM company_registrations WHERE id = ?")
                    .bind(id)
                    .fetch_optional(&mut *tx)
                    .await?;
            let Some(current) = current else {
                return Err(RegistrationError::NotFound);
            };
            let current = parse_status(&current)?;
            return Err(match current.apply(decision) {
                Err(err) => RegistrationError::Transition(err),
                // Still pending yet unmatched: treat like a lost race.
                Ok(_) => RegistrationError::Transition(TransitionError::AlreadyDecided { current }),
            });
        };

        let registration = row.into_domain()?;

        let company = match company_id {
            Some(company_id) => {
                let draft = CompanyDraft::from_registration(&registration);
                let company = companies::insert(&mut tx, &company_id, &draft, reviewed_at).await?;
                users::link_company(&mut tx, &registration.requester_id, &company.id, reviewed_at)
                    .await?;
                Some(company)
            }
            None => None,
        };

        tx.commit().await?;
        Ok(DecisionOutcome {
            registration,
            company,
        })
    }
}

/// Result of a successful review.
#[derive(Debug, Clone)]
pub struct DecisionOutcome {
    pub registration: CompanyRegistration,
    /// Present only for approvals.
    pub company: Option<Company>,
}

#[derive(Debug, sqlx::FromRow)]
struct RegistrationRow {
    id: String,
    requester_id: String,
    company_name: String,
    website: Option<String>,
    phone: Option<String>,
    address: Option<String>,
    city: Option<String>,
    country: Option<String>,
    industry_id: Option<i64>,
    tax_code: Option<String>,
    description: Option<String>,
    company_size: Option<String>,
    logo_url: Option<String>,
    cover_url: Option<String>,
    contact_person_name: String,
    contact_person_email: String,
    contact_person_phone: Option<String>,
    status: String,
    requested_at: DateTime<Utc>,
    reviewed_by_admin_id: Option<String>,
    reviewed_at: Option<DateTime<Utc>>,
    admin_notes: Option<String>,
    company_id: Option<String>,
}

impl RegistrationRow {
    fn into_domain(self) -> Result<CompanyRegistration, RegistrationError> {
        let status = parse_status(&self.status)?;
        Ok(CompanyRegistration {
            id: self.id,
            requester_id: self.requester_id,
            details: RegistrationDetails {
                company_name: self.company_name,
                website: self.website,
                phone: self.phone,
                address: self.address,
                city: self.city,
                country: self.country,
                industry_id: self.industry_id,
                tax_code: self.tax_code,
                description: self.description,
                company_size: self.company_size,
                logo_url: self.logo_url,
                cover_url: self.cover_url,
                contact_person_name: self.contact_person_name,
                contact_person_email: self.contact_person_email,
                contact_person_phone: self.contact_person_phone,
            },
            status,
            requested_at: self.requested_at,
            reviewed_by_admin_id: self.reviewed_by_admin_id,
            reviewed_at: self.reviewed_at,
            admin_notes: self.admin_notes,
            company_id: self.company_id,
        })
    }
}

fn parse_status(value: &str) -> Result<RegistrationStatus, RegistrationError> {
    value
        .parse()
        .map_err(|_| RegistrationError::CorruptStatus(value.to_string()))
}

/// Errors that can occur while reading or mutating registrations.
#[derive(Debug, Error)]
pub enum RegistrationError {
    #[error("registration not found")]
    NotFound,
    #[error("requester already has a pending registration")]
    DuplicatePending,
    #[error("requester does not exist")]
    MissingRequester,
    #[error("requester is already linked to a company")]
    RequesterAlreadyLinked,
    #[error("requester record is invalid: {0}")]
    CorruptRequester(String),
    #[error("unknown industry: {0}")]
    UnknownIndustry(i64),
    #[error(transparent)]
    Transition(#[from] TransitionError),
    #[error("stored registration has an unknown status: {0}")]
    CorruptStatus(String),
    #[error("company provisioning failed: {0}")]
    Provisioning(CompanyError),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl From<CompanyError> for RegistrationError {
    fn from(err: CompanyError) -> Self {
        match err {
            CompanyError::Database(inner) => Self::Database(inner),
            other => Self::Provisioning(other),
        }
    }
}

impl From<UserError> for RegistrationError {
    fn from(err: UserError) -> Self {
        match err {
            UserError::NotFound => Self::MissingRequester,
            UserError::AlreadyLinked => Self::RequesterAlreadyLinked,
            UserError::Database(inner) => Self::Database(inner),
            UserError::Duplicate | UserError::Corrupt(_) => Self::CorruptRequester(err.to_string()),
        }
    }
}
