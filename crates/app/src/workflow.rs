use std::sync::Arc;

use chrono::{DateTime, Utc};
use metrics::counter;
use thiserror::Error;
use tracing::{info, warn};

use jobboard_core::{
    Company, CompanyRegistration, FieldErrors, RegistrationForm, RegistrationQuery,
    ReviewDecision, ReviewError, TransitionError,
};
use jobboard_storage::{
    CompanyError, Database, DecisionOutcome, RegistrationError, UserError,
};

use crate::auth::Caller;

pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Registration intake, admin review and provisioning.
///
/// Every operation takes the caller explicitly; nothing is read from
/// ambient request state.
#[derive(Clone)]
pub struct RegistrationWorkflow {
    database: Database,
    clock: Clock,
}

impl RegistrationWorkflow {
    pub fn new(database: Database, clock: Clock) -> Self {
        Self { database, clock }
    }

    fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }

    /// Validates and stores a new pending registration for the caller.
    pub async fn submit(
        &self,
        caller: &Caller,
        form: RegistrationForm,
    ) -> Result<CompanyRegistration, WorkflowError> {
        let result = self.submit_inner(caller, form).await;
        counter!("registration_submissions_total", "result" => outcome_label(&result))
            .increment(1);
        result
    }

    async fn submit_inner(
        &self,
        caller: &Caller,
        form: RegistrationForm,
    ) -> Result<CompanyRegistration, WorkflowError> {
        let details = form.validate_form().map_err(WorkflowError::Validation)?;

        if let Some(industry_id) = details.industry_id {
            if !self.database.industries().exists(industry_id).await? {
                return Err(unknown_industry());
            }
        }

        let requester = self
            .database
            .users()
            .fetch(&caller.user_id)
            .await
            .map_err(|err| match err {
                UserError::NotFound => WorkflowError::UserNotFound,
                other => WorkflowError::persistence(other),
            })?;
        if requester.company_id.is_some() {
            return Err(WorkflowError::AlreadyEmployer);
        }

        let registrations = self.database.registrations();
        if registrations.has_pending(&requester.id).await? {
            return Err(WorkflowError::PendingExists);
        }

        let registration = registrations
            .insert(&requester.id, &details, self.now())
            .await?;

        info!(
            stage = "registration",
            request_id = %registration.id,
            requester = %registration.requester_id,
            company = %registration.details.company_name,
            "registration submitted"
        );
        Ok(registration)
    }

    /// Lists registrations for admins, newest first.
    pub async fn list(
        &self,
        caller: &Caller,
        query: &RegistrationQuery,
    ) -> Result<Vec<CompanyRegistration>, WorkflowError> {
        require_admin(caller)?;
        let registrations = self.database.registrations().list(query.status).await?;
        Ok(query.apply(registrations))
    }

    /// Loads one registration; visible to admins and to its requester.
    ///
    /// Non-admins get `Forbidden` for unknown ids too, so ids of other
    /// requesters cannot be enumerated.
    pub async fn get(
        &self,
        caller: &Caller,
        request_id: &str,
    ) -> Result<CompanyRegistration, WorkflowError> {
        const NOT_VISIBLE: &str = "registrations are visible to admins and their requester only";

        let registration = match self.database.registrations().fetch(request_id).await {
            Err(RegistrationError::NotFound) if !caller.is_admin() => {
                return Err(WorkflowError::Forbidden(NOT_VISIBLE));
            }
            other => other?,
        };
        if !caller.is_admin() && registration.requester_id != caller.user_id {
            return Err(WorkflowError::Forbidden(NOT_VISIBLE));
        }
        Ok(registration)
    }

    /// Returns the caller's most recent registration, if any.
    pub async fn mine(&self, caller: &Caller) -> Result<Option<CompanyRegistration>, WorkflowError> {
        Ok(self
            .database
            .registrations()
            .latest_for_requester(&caller.user_id)
            .await?)
    }

    /// Approves a pending registration, provisioning its company.
    pub async fn approve(
        &self,
        caller: &Caller,
        request_id: &str,
        notes: Option<String>,
    ) -> Result<DecisionOutcome, WorkflowError> {
        require_admin(caller)?;
        let decision = ReviewDecision::approve(notes).map_err(WorkflowError::Review)?;
        self.review(caller, request_id, decision).await
    }

    /// Rejects a pending registration; a reason is mandatory.
    pub async fn reject(
        &self,
        caller: &Caller,
        request_id: &str,
        notes: Option<String>,
    ) -> Result<DecisionOutcome, WorkflowError> {
        require_admin(caller)?;
        let decision = ReviewDecision::reject(notes).map_err(WorkflowError::Review)?;
        self.review(caller, request_id, decision).await
    }

    async fn review(
        &self,
        caller: &Caller,
        request_id: &str,
        decision: ReviewDecision,
    ) -> Result<DecisionOutcome, WorkflowError> {
        let result = self
            .database
            .registrations()
            .decide(request_id, &decision, &caller.user_id, self.now())
            .await
            .map_err(WorkflowError::from);

        counter!(
            "registration_reviews_total",
            "decision" => decision.kind_str(),
            "result" => outcome_label(&result)
        )
        .increment(1);

        match &result {
            Ok(outcome) => info!(
                stage = "review",
                request_id,
                admin = %caller.user_id,
                decision = decision.kind_str(),
                company_id = outcome.company.as_ref().map(|company| company.id.as_str()),
                "registration reviewed"
            ),
            Err(err) => warn!(
                stage = "review",
                request_id,
                admin = %caller.user_id,
                decision = decision.kind_str(),
                error = %err,
                "registration review failed"
            ),
        }
        result
    }

    /// Loads a provisioned company.
    pub async fn company(&self, company_id: &str) -> Result<Company, WorkflowError> {
        self.database
            .companies()
            .fetch(company_id)
            .await
            .map_err(|err| match err {
                CompanyError::NotFound => WorkflowError::CompanyNotFound,
                other => WorkflowError::persistence(other),
            })
    }
}

fn require_admin(caller: &Caller) -> Result<(), WorkflowError> {
    if caller.is_admin() {
        Ok(())
    } else {
        Err(WorkflowError::Forbidden("admin role required"))
    }
}

fn unknown_industry() -> WorkflowError {
    let mut errors = FieldErrors::default();
    errors.insert("industry_id", "does not refer to a known industry");
    WorkflowError::Validation(errors)
}

fn outcome_label<T>(result: &Result<T, WorkflowError>) -> &'static str {
    match result {
        Ok(_) => "ok",
        Err(err) => err.kind_str(),
    }
}

#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("invalid registration: {0}")]
    Validation(FieldErrors),
    #[error("{0}")]
    Review(ReviewError),
    #[error("forbidden: {0}")]
    Forbidden(&'static str),
    #[error("requesting user does not exist")]
    UserNotFound,
    #[error("registration not found")]
    RegistrationNotFound,
    #[error("company not found")]
    CompanyNotFound,
    #[error("user is already linked to a company")]
    AlreadyEmployer,
    #[error("user already has a pending registration")]
    PendingExists,
    #[error(transparent)]
    Conflict(TransitionError),
    #[error("persistence failure: {0}")]
    Persistence(String),
}

impl WorkflowError {
    fn persistence(err: impl std::fmt::Display) -> Self {
        Self::Persistence(err.to_string())
    }

    /// Label used for metrics.
    pub fn kind_str(&self) -> &'static str {
        match self {
            Self::Validation(_) | Self::Review(_) => "invalid",
            Self::Forbidden(_) => "forbidden",
            Self::UserNotFound | Self::RegistrationNotFound | Self::CompanyNotFound => "not_found",
            Self::AlreadyEmployer | Self::PendingExists | Self::Conflict(_) => "conflict",
            Self::Persistence(_) => "error",
        }
    }
}

impl From<RegistrationError> for WorkflowError {
    fn from(err: RegistrationError) -> Self {
        match err {
            RegistrationError::NotFound => Self::RegistrationNotFound,
            RegistrationError::DuplicatePending => Self::PendingExists,
            RegistrationError::MissingRequester => Self::UserNotFound,
            RegistrationError::RequesterAlreadyLinked => Self::AlreadyEmployer,
            RegistrationError::UnknownIndustry(_) => unknown_industry(),
            RegistrationError::Transition(err) => Self::Conflict(err),
            other @ (RegistrationError::CorruptRequester(_)
            | RegistrationError::CorruptStatus(_)
            | RegistrationError::Provisioning(_)
            | RegistrationError::Database(_)) => Self::persistence(other),
        }
    }
}

impl From<sqlx::Error> for WorkflowError {
    fn from(err: sqlx::Error) -> Self {
        Self::persistence(err)
    }
}
