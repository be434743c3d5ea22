use std::{collections::BTreeMap, fmt};

use serde::Deserialize;
use thiserror::Error;
use validator::Validate;

use crate::types::{CompanyRegistration, RegistrationDetails, RegistrationStatus};

/// Maximum length accepted for admin notes and rejection reasons.
pub const MAX_NOTES_LEN: usize = 2000;

/// Raw submission payload for a company registration.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationForm {
    #[serde(default)]
    #[validate(length(max = 200, message = "must be at most 200 characters"))]
    pub company_name: String,
    #[validate(
        url(message = "must be a valid URL"),
        length(max = 2048, message = "must be at most 2048 characters")
    )]
    pub website: Option<String>,
    #[validate(length(max = 32, message = "must be at most 32 characters"))]
    pub phone: Option<String>,
    #[validate(length(max = 500, message = "must be at most 500 characters"))]
    pub address: Option<String>,
    #[validate(length(max = 100, message = "must be at most 100 characters"))]
    pub city: Option<String>,
    #[validate(length(max = 100, message = "must be at most 100 characters"))]
    pub country: Option<String>,
    #[validate(range(min = 1, message = "must be a positive identifier"))]
    pub industry_id: Option<i64>,
    #[validate(length(max = 32, message = "must be at most 32 characters"))]
    pub tax_code: Option<String>,
    #[validate(length(max = 4000, message = "must be at most 4000 characters"))]
    pub description: Option<String>,
    #[validate(length(max = 64, message = "must be at most 64 characters"))]
    pub company_size: Option<String>,
    #[validate(
        url(message = "must be a valid URL"),
        length(max = 2048, message = "must be at most 2048 characters")
    )]
    pub logo_url: Option<String>,
    #[validate(
        url(message = "must be a valid URL"),
        length(max = 2048, message = "must be at most 2048 characters")
    )]
    pub cover_url: Option<String>,
    #[serde(default)]
    #[validate(length(max = 200, message = "must be at most 200 characters"))]
    pub contact_person_name: String,
    #[serde(default)]
    #[validate(
        email(message = "must be a valid email address"),
        length(max = 254, message = "must be at most 254 characters")
    )]
    pub contact_person_email: String,
    #[validate(length(max = 32, message = "must be at most 32 characters"))]
    pub contact_person_phone: Option<String>,
}

impl RegistrationForm {
    /// Trims every field, drops blank optionals, and checks the result.
    ///
    /// Errors are keyed by the camelCase field name used on the wire.
    pub fn validate_form(self) -> Result<RegistrationDetails, FieldErrors> {
        let form = self.normalized();
        let mut errors = FieldErrors::default();

        if form.company_name.is_empty() {
            errors.insert("company_name", "is required");
        }
        if form.contact_person_name.is_empty() {
            errors.insert("contact_person_name", "is required");
        }
        if form.contact_person_email.is_empty() {
            errors.insert("contact_person_email", "is required");
        }

        if let Err(report) = form.validate() {
            for (field, field_errors) in report.field_errors() {
                let field = field.to_string();
                for error in field_errors.iter() {
                    let message = error
                        .message
                        .as_ref()
                        .map(|message| message.to_string())
                        .unwrap_or_else(|| error.code.to_string());
                    errors.insert(&field, &message);
                }
            }
        }

        for (field, value) in [
            ("website", &form.website),
            ("logo_url", &form.logo_url),
            ("cover_url", &form.cover_url),
        ] {
            if let Some(url) = value {
                if !has_web_scheme(url) {
                    errors.insert(field, "must use http or https");
                }
            }
        }

        if !errors.is_empty() {
            return Err(errors);
        }

        Ok(RegistrationDetails {
            company_name: form.company_name,
            website: form.website,
            phone: form.phone,
            address: form.address,
            city: form.city,
            country: form.country,
            industry_id: form.industry_id,
            tax_code: form.tax_code,
            description: form.description,
            company_size: form.company_size,
            logo_url: form.logo_url,
            cover_url: form.cover_url,
            contact_person_name: form.contact_person_name,
            contact_person_email: form.contact_person_email.to_ascii_lowercase(),
            contact_person_phone: form.contact_person_phone,
        })
    }

    fn normalized(self) -> Self {
        Self {
            company_name: self.company_name.trim().to_string(),
            website: non_blank(self.website),
            phone: non_blank(self.phone),
            address: non_blank(self.address),
            city: non_blank(self.city),
            country: non_blank(self.country),
            industry_id: self.industry_id,
            tax_code: non_blank(self.tax_code),
            description: non_blank(self.description),
            company_size: non_blank(self.company_size),
            logo_url: non_blank(self.logo_url),
            cover_url: non_blank(self.cover_url),
            contact_person_name: self.contact_person_name.trim().to_string(),
            contact_person_email: self.contact_person_email.trim().to_string(),
            contact_person_phone: non_blank(self.contact_person_phone),
        }
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|raw| raw.trim().to_string())
        .filter(|trimmed| !trimmed.is_empty())
}

fn has_web_scheme(url: &str) -> bool {
    let lower = url.to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

/// Field-level validation failures, keyed by wire (camelCase) field name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldErrors(BTreeMap<String, String>);

impl FieldErrors {
    /// Records a message for `field`; the first message per field wins.
    pub fn insert(&mut self, field: &str, message: &str) {
        self.0
            .entry(camel_case(field))
            .or_insert_with(|| message.to_string());
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, field: &str) -> Option<&str> {
        self.0.get(field).map(String::as_str)
    }

    pub fn into_map(self) -> BTreeMap<String, String> {
        self.0
    }
}

impl fmt::Display for FieldErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (field, message) in &self.0 {
            if !first {
                f.write_str("; ")?;
            }
            write!(f, "{field} {message}")?;
            first = false;
        }
        Ok(())
    }
}

impl std::error::Error for FieldErrors {}

fn camel_case(field: &str) -> String {
    let mut out = String::with_capacity(field.len());
    let mut upper = false;
    for ch in field.chars() {
        if ch == '_' {
            upper = true;
        } else if upper {
            out.push(ch.to_ascii_uppercase());
            upper = false;
        } else {
            out.push(ch);
        }
    }
    out
}

/// Outcome an admin chose for a pending registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReviewDecision {
    Approve { notes: Option<String> },
    Reject { notes: String },
}

impl ReviewDecision {
    /// Builds an approval. Blank notes are treated as absent.
    pub fn approve(notes: Option<String>) -> Result<Self, ReviewError> {
        let notes = non_blank(notes);
        check_notes_len(notes.as_deref())?;
        Ok(Self::Approve { notes })
    }

    /// Builds a rejection. A non-blank reason is mandatory.
    pub fn reject(notes: Option<String>) -> Result<Self, ReviewError> {
        let notes = non_blank(notes).ok_or(ReviewError::MissingRejectionNotes)?;
        check_notes_len(Some(&notes))?;
        Ok(Self::Reject { notes })
    }

    pub fn target_status(&self) -> RegistrationStatus {
        match self {
            Self::Approve { .. } => RegistrationStatus::Approved,
            Self::Reject { .. } => RegistrationStatus::Rejected,
        }
    }

    pub fn notes(&self) -> Option<&str> {
        match self {
            Self::Approve { notes } => notes.as_deref(),
            Self::Reject { notes } => Some(notes),
        }
    }

    /// Label used for metrics and logs.
    pub fn kind_str(&self) -> &'static str {
        match self {
            Self::Approve { .. } => "approve",
            Self::Reject { .. } => "reject",
        }
    }

    pub fn provisions_company(&self) -> bool {
        matches!(self, Self::Approve { .. })
    }
}

fn check_notes_len(notes: Option<&str>) -> Result<(), ReviewError> {
    match notes {
        Some(value) if value.chars().count() > MAX_NOTES_LEN => {
            Err(ReviewError::NotesTooLong { max: MAX_NOTES_LEN })
        }
        _ => Ok(()),
    }
}

/// Errors raised while building a review decision.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReviewError {
    #[error("a rejection reason is required")]
    MissingRejectionNotes,
    #[error("notes must be at most {max} characters")]
    NotesTooLong { max: usize },
}

impl RegistrationStatus {
    /// Returns the status reached by applying `decision`, or an error once decided.
    pub fn apply(self, decision: &ReviewDecision) -> Result<RegistrationStatus, TransitionError> {
        match self {
            Self::Pending => Ok(decision.target_status()),
            Self::Approved | Self::Rejected => Err(TransitionError::AlreadyDecided { current: self }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("registration has already been decided ({current})")]
    AlreadyDecided { current: RegistrationStatus },
}

/// Company attributes derived from a registration, before an id is assigned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompanyDraft {
    pub registration_id: String,
    pub name: String,
    pub contact_email: String,
    pub phone: Option<String>,
    pub website: Option<String>,
    pub logo_url: Option<String>,
    pub cover_url: Option<String>,
    pub description: Option<String>,
    pub size: Option<String>,
    pub address: Option<String>,
    pub city: Option<String>,
    pub country: Option<String>,
    pub industry_id: Option<i64>,
    pub is_verified: bool,
}

impl CompanyDraft {
    pub fn from_registration(registration: &CompanyRegistration) -> Self {
        let details = &registration.details;
        Self {
            registration_id: registration.id.clone(),
            name: details.company_name.clone(),
            contact_email: details.contact_person_email.clone(),
            phone: details
                .phone
                .clone()
                .or_else(|| details.contact_person_phone.clone()),
            website: details.website.clone(),
            logo_url: details.logo_url.clone(),
            cover_url: details.cover_url.clone(),
            description: details.description.clone(),
            size: details.company_size.clone(),
            address: details.address.clone(),
            city: details.city.clone(),
            country: details.country.clone(),
            industry_id: details.industry_id,
            // Approved by an admin, so the company starts out verified.
            is_verified: true,
        }
    }
}
