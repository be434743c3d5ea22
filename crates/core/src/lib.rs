//! Domain rules for the company registration workflow.
//!
//! Everything here is pure: validation of submitted forms, the review state
//! transition, company provisioning drafts and the admin listing filter.
//! Persistence lives in `jobboard-storage`, HTTP in `jobboard-app`.
pub mod query;
pub mod review;
pub mod types;

pub use query::RegistrationQuery;
pub use review::{
    CompanyDraft, FieldErrors, RegistrationForm, ReviewDecision, ReviewError, TransitionError,
};
pub use types::{
    Company, CompanyRegistration, RegistrationDetails, RegistrationStatus, Role, UserAccount,
};
