use std::cmp::Ordering;

use crate::types::{CompanyRegistration, RegistrationStatus};

/// Admin listing filter: optional status plus a free-text needle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistrationQuery {
    pub status: Option<RegistrationStatus>,
    pub text: Option<String>,
}

impl RegistrationQuery {
    pub fn new(status: Option<RegistrationStatus>, text: Option<String>) -> Self {
        let text = text
            .map(|raw| raw.trim().to_lowercase())
            .filter(|needle| !needle.is_empty());
        Self { status, text }
    }

    /// Matches on status and, case-insensitively, on company name, contact
    /// email, contact name or tax code.
    pub fn matches(&self, registration: &CompanyRegistration) -> bool {
        if let Some(status) = self.status {
            if registration.status != status {
                return false;
            }
        }

        let Some(needle) = self.text.as_deref() else {
            return true;
        };

        let details = &registration.details;
        [
            Some(details.company_name.as_str()),
            Some(details.contact_person_email.as_str()),
            Some(details.contact_person_name.as_str()),
            details.tax_code.as_deref(),
        ]
        .into_iter()
        .flatten()
        .any(|haystack| haystack.to_lowercase().contains(needle))
    }

    /// Filters `registrations` and returns them newest first.
    pub fn apply(&self, registrations: Vec<CompanyRegistration>) -> Vec<CompanyRegistration> {
        let mut matched: Vec<_> = registrations
            .into_iter()
            .filter(|registration| self.matches(registration))
            .collect();
        sort_newest_first(&mut matched);
        matched
    }
}

/// Orders by `requested_at` descending; ties fall back to id descending so the
/// order is stable across calls.
pub fn sort_newest_first(registrations: &mut [CompanyRegistration]) {
    registrations.sort_by(|a, b| match b.requested_at.cmp(&a.requested_at) {
        Ordering::Equal => b.id.cmp(&a.id),
        other => other,
    });
}
