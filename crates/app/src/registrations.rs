use axum::{
    body::Bytes,
    extract::{rejection::JsonRejection, Path, Query, State},
    http::{header::CONTENT_TYPE, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::error;

use jobboard_core::{
    Company, CompanyRegistration, RegistrationForm, RegistrationQuery, RegistrationStatus,
    ReviewError,
};
use jobboard_storage::DecisionOutcome;

use crate::auth::Caller;
use crate::problem::ProblemResponse;
use crate::router::AppState;
use crate::workflow::WorkflowError;

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    q: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApproveRequest {
    #[serde(default)]
    admin_notes: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RejectRequest {
    #[serde(default)]
    notes: Option<String>,
}

/// Body returned by the approve/reject endpoints.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewResponse {
    registration: CompanyRegistration,
    #[serde(skip_serializing_if = "Option::is_none")]
    company: Option<Company>,
}

impl From<DecisionOutcome> for ReviewResponse {
    fn from(outcome: DecisionOutcome) -> Self {
        Self {
            registration: outcome.registration,
            company: outcome.company,
        }
    }
}

pub async fn submit(
    State(state): State<AppState>,
    caller: Caller,
    payload: Result<Json<RegistrationForm>, JsonRejection>,
) -> Result<(StatusCode, Json<CompanyRegistration>), ProblemResponse> {
    let Json(form) = payload.map_err(|rejection| {
        ProblemResponse::new(rejection.status(), "invalid_json", rejection.body_text())
    })?;

    let registration = state.workflow().submit(&caller, form).await?;
    Ok((StatusCode::CREATED, Json(registration)))
}

pub async fn list(
    State(state): State<AppState>,
    caller: Caller,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<CompanyRegistration>>, ProblemResponse> {
    let status = query
        .status
        .as_deref()
        .filter(|value| !value.trim().is_empty())
        .map(str::parse::<RegistrationStatus>)
        .transpose()
        .map_err(|err| {
            ProblemResponse::new(StatusCode::BAD_REQUEST, "invalid_status", err.to_string())
        })?;

    let filter = RegistrationQuery::new(status, query.q);
    let registrations = state.workflow().list(&caller, &filter).await?;
    Ok(Json(registrations))
}

pub async fn mine(State(state): State<AppState>, caller: Caller) -> Result<Response, ProblemResponse> {
    match state.workflow().mine(&caller).await? {
        Some(registration) => Ok(Json(registration).into_response()),
        None => Ok(StatusCode::NO_CONTENT.into_response()),
    }
}

pub async fn fetch(
    State(state): State<AppState>,
    caller: Caller,
    Path(request_id): Path<String>,
) -> Result<Json<CompanyRegistration>, ProblemResponse> {
    let registration = state.workflow().get(&caller, &request_id).await?;
    Ok(Json(registration))
}

pub async fn approve(
    State(state): State<AppState>,
    caller: Caller,
    Path(request_id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<ReviewResponse>, ProblemResponse> {
    let body: ApproveRequest = optional_json_body(&headers, &body)?;
    let outcome = state
        .workflow()
        .approve(&caller, &request_id, body.admin_notes)
        .await?;
    Ok(Json(outcome.into()))
}

pub async fn reject(
    State(state): State<AppState>,
    caller: Caller,
    Path(request_id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<ReviewResponse>, ProblemResponse> {
    let body: RejectRequest = optional_json_body(&headers, &body)?;
    let outcome = state
        .workflow()
        .reject(&caller, &request_id, body.notes)
        .await?;
    Ok(Json(outcome.into()))
}

pub async fn company(
    State(state): State<AppState>,
    _caller: Caller,
    Path(company_id): Path<String>,
) -> Result<Json<Company>, ProblemResponse> {
    let company = state.workflow().company(&company_id).await?;
    Ok(Json(company))
}

/// Parses a review body that may be omitted entirely.
///
/// An empty body means "no fields"; anything else must be JSON with a JSON
/// content type, so a decision is never recorded with silently dropped input.
fn optional_json_body<T>(headers: &HeaderMap, body: &[u8]) -> Result<T, ProblemResponse>
where
    T: DeserializeOwned + Default,
{
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }

    if !has_json_content_type(headers) {
        return Err(ProblemResponse::new(
            StatusCode::BAD_REQUEST,
            "invalid_json",
            "expected request with `Content-Type: application/json`",
        ));
    }

    Json::<T>::from_bytes(body)
        .map(|Json(value)| value)
        .map_err(|rejection| {
            ProblemResponse::new(StatusCode::BAD_REQUEST, "invalid_json", rejection.body_text())
        })
}

fn has_json_content_type(headers: &HeaderMap) -> bool {
    headers
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(';').next())
        .map(|essence| {
            let essence = essence.trim().to_ascii_lowercase();
            essence == "application/json" || essence.ends_with("+json")
        })
        .unwrap_or(false)
}

impl From<WorkflowError> for ProblemResponse {
    fn from(err: WorkflowError) -> Self {
        match err {
            WorkflowError::Validation(errors) => ProblemResponse::new(
                StatusCode::BAD_REQUEST,
                "validation_error",
                "one or more fields are invalid",
            )
            .with_errors(errors.into_map()),
            WorkflowError::Review(review) => {
                let field = match review {
                    ReviewError::MissingRejectionNotes | ReviewError::NotesTooLong { .. } => "notes",
                };
                ProblemResponse::new(
                    StatusCode::BAD_REQUEST,
                    "validation_error",
                    review.to_string(),
                )
                .with_errors([(field.to_string(), review.to_string())].into_iter().collect())
            }
            WorkflowError::Forbidden(detail) => {
                ProblemResponse::new(StatusCode::FORBIDDEN, "forbidden", detail)
            }
            WorkflowError::UserNotFound => ProblemResponse::new(
                StatusCode::NOT_FOUND,
                "user_not_found",
                "the requesting user does not exist",
            ),
            WorkflowError::RegistrationNotFound => ProblemResponse::new(
                StatusCode::NOT_FOUND,
                "registration_not_found",
                "no registration exists with this id",
            ),
            WorkflowError::CompanyNotFound => ProblemResponse::new(
                StatusCode::NOT_FOUND,
                "company_not_found",
                "no company exists with this id",
            ),
            WorkflowError::AlreadyEmployer => ProblemResponse::new(
                StatusCode::CONFLICT,
                "already_employer",
                "the user is already linked to a company",
            ),
            WorkflowError::PendingExists => ProblemResponse::new(
                StatusCode::CONFLICT,
                "pending_registration_exists",
                "the user already has a pending registration",
            ),
            WorkflowError::Conflict(transition) => ProblemResponse::new(
                StatusCode::CONFLICT,
                "invalid_state_transition",
                transition.to_string(),
            ),
            WorkflowError::Persistence(detail) => {
                error!(stage = "registration", error = %detail, "persistence failure");
                ProblemResponse::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "the request could not be completed",
                )
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicI64, Ordering},
        Arc,
    };

    use axum::{
        body::Body,
        http::{header, Request, StatusCode},
        Router,
    };
    use chrono::{DateTime, Duration, Utc};
    use http_body_util::BodyExt;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use jobboard_core::Role;
    use jobboard_storage::{Database, NewUser};

    use crate::auth::test_tokens::{mint, SECRET};
    use crate::router::{app_router, AppState};
    use crate::telemetry;

    struct TestContext {
        database: Database,
        state: AppState,
    }

    impl TestContext {
        async fn new() -> Self {
            let metrics = telemetry::init_metrics().expect("metrics init");
            let database = Database::connect("sqlite::memory:")
                .await
                .expect("connect");
            database.run_migrations().await.expect("migrations");
            for id in ["u-1", "u-2", "u-3"] {
                database
                    .users()
                    .insert(&NewUser {
                        id,
                        email: &format!("{id}@example.com"),
                        role: Role::Jobseeker,
                        created_at: Utc::now(),
                    })
                    .await
                    .expect("insert user");
            }

            // Each call to the clock advances one minute so ordering is deterministic.
            let base: DateTime<Utc> = "2024-05-01T10:00:00Z".parse().unwrap();
            let ticks = Arc::new(AtomicI64::new(0));
            let clock = Arc::new(move || {
                base + Duration::minutes(ticks.fetch_add(1, Ordering::SeqCst))
            });
            let state = AppState::new(metrics, database.clone(), SECRET).with_clock(clock);
            Self { database, state }
        }

        fn router(&self) -> Router {
            app_router(self.state.clone())
        }

        async fn send(
            &self,
            method: &str,
            uri: &str,
            token: Option<&str>,
            body: Option<Value>,
        ) -> (StatusCode, Value) {
            match body {
                Some(value) => {
                    self.send_raw(method, uri, token, Some("application/json"), &value.to_string())
                        .await
                }
                None => self.send_raw(method, uri, token, None, "").await,
            }
        }

        async fn send_raw(
            &self,
            method: &str,
            uri: &str,
            token: Option<&str>,
            content_type: Option<&str>,
            body: &str,
        ) -> (StatusCode, Value) {
            let mut builder = Request::builder().method(method).uri(uri);
            if let Some(token) = token {
                builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
            }
            if let Some(content_type) = content_type {
                builder = builder.header(header::CONTENT_TYPE, content_type);
            }
            let request = builder.body(Body::from(body.to_string())).unwrap();

            let response = self.router().oneshot(request).await.expect("response");
            let status = response.status();
            let bytes = response
                .into_body()
                .collect()
                .await
                .expect("body")
                .to_bytes();
            let value = if bytes.is_empty() {
                Value::Null
            } else {
                serde_json::from_slice(&bytes).expect("json body")
            };
            (status, value)
        }

        async fn status_of(&self, request_id: &str) -> String {
            let (_, body) = self
                .send(
                    "GET",
                    &format!("/registrations/{request_id}"),
                    Some(&admin()),
                    None,
                )
                .await;
            body["status"].as_str().expect("status").to_string()
        }

        async fn submit_acme(&self, user: &str) -> String {
            let (status, body) = self
                .send(
                    "POST",
                    "/registrations",
                    Some(&mint(user, "jobseeker")),
                    Some(json!({
                        "companyName": "Acme",
                        "contactPersonEmail": "a@acme.com",
                        "contactPersonName": "Jane",
                    })),
                )
                .await;
            assert_eq!(status, StatusCode::CREATED, "unexpected body: {body}");
            body["requestId"].as_str().expect("request id").to_string()
        }

        async fn company_count(&self) -> i64 {
            sqlx::query_scalar("SELECT COUNT(*) FROM companies")
                .fetch_one(self.database.pool())
                .await
                .expect("count")
        }
    }

    fn admin() -> String {
        mint("admin-1", "admin")
    }

    #[tokio::test]
    async fn submit_creates_pending_registration() {
        let context = TestContext::new().await;
        let (status, body) = context
            .send(
                "POST",
                "/registrations",
                Some(&mint("u-1", "jobseeker")),
                Some(json!({
                    "companyName": "Acme",
                    "contactPersonEmail": "a@acme.com",
                    "contactPersonName": "Jane",
                    "industryId": 1,
                    "website": "https://acme.example",
                })),
            )
            .await;

        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["status"], "Pending");
        assert_eq!(body["companyName"], "Acme");
        assert_eq!(body["requesterId"], "u-1");
        assert_eq!(body["industryId"], 1);
        assert!(body["requestId"].as_str().is_some());
        assert!(body["requestedAt"].as_str().is_some());
        assert!(body["reviewedAt"].is_null());
    }

    #[tokio::test]
    async fn submit_reports_field_errors() {
        let context = TestContext::new().await;
        let (status, body) = context
            .send(
                "POST",
                "/registrations",
                Some(&mint("u-1", "jobseeker")),
                Some(json!({ "companyName": "Acme", "contactPersonEmail": "nope" })),
            )
            .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["type"], "validation_error");
        assert_eq!(body["errors"]["contactPersonName"], "is required");
        assert_eq!(body["errors"]["contactPersonEmail"], "must be a valid email address");
    }

    #[tokio::test]
    async fn requests_without_token_are_unauthorized() {
        let context = TestContext::new().await;
        let (status, body) = context.send("GET", "/registrations/mine", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["type"], "missing_token");

        let (status, body) = context
            .send("GET", "/registrations/mine", Some("garbage"), None)
            .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["type"], "invalid_token");
    }

    #[tokio::test]
    async fn approve_provisions_company_and_links_user() {
        let context = TestContext::new().await;
        let request_id = context.submit_acme("u-1").await;

        let (status, body) = context
            .send(
                "POST",
                &format!("/registrations/{request_id}/approve"),
                Some(&admin()),
                Some(json!({ "adminNotes": "Looks good" })),
            )
            .await;

        assert_eq!(status, StatusCode::OK, "unexpected body: {body}");
        assert_eq!(body["registration"]["status"], "Approved");
        assert_eq!(body["registration"]["adminNotes"], "Looks good");
        assert_eq!(body["registration"]["reviewedByAdminId"], "admin-1");
        assert_eq!(body["company"]["name"], "Acme");
        let company_id = body["company"]["companyId"].as_str().unwrap().to_string();
        assert_eq!(body["registration"]["companyId"], company_id.as_str());

        let user = context.database.users().fetch("u-1").await.unwrap();
        assert_eq!(user.company_id.as_deref(), Some(company_id.as_str()));
        assert_eq!(user.role, Role::Employer);

        let (status, body) = context
            .send(
                "GET",
                &format!("/companies/{company_id}"),
                Some(&mint("u-1", "employer")),
                None,
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["contactEmail"], "a@acme.com");
        assert_eq!(body["isVerified"], true);
    }

    #[tokio::test]
    async fn approve_without_body_is_accepted() {
        let context = TestContext::new().await;
        let request_id = context.submit_acme("u-1").await;

        let (status, body) = context
            .send(
                "POST",
                &format!("/registrations/{request_id}/approve"),
                Some(&admin()),
                None,
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["registration"]["adminNotes"].is_null());
    }

    #[tokio::test]
    async fn unreadable_review_body_is_rejected_without_deciding() {
        let context = TestContext::new().await;
        let request_id = context.submit_acme("u-1").await;
        let approve = format!("/registrations/{request_id}/approve");
        let token = admin();

        let (status, body) = context
            .send_raw("POST", &approve, Some(&token), None, r#"{"adminNotes":"Looks good"}"#)
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["type"], "invalid_json");

        let (status, _) = context
            .send_raw(
                "POST",
                &approve,
                Some(&token),
                Some("application/json"),
                r#"{"adminNotes":42}"#,
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = context
            .send_raw(
                "POST",
                &format!("/registrations/{request_id}/reject"),
                Some(&token),
                Some("application/json"),
                "{not json",
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        assert_eq!(context.status_of(&request_id).await, "Pending");
        assert_eq!(context.company_count().await, 0);

        let (status, body) = context
            .send_raw(
                "POST",
                &approve,
                Some(&token),
                Some("application/json; charset=utf-8"),
                r#"{"adminNotes":"Looks good"}"#,
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["registration"]["adminNotes"], "Looks good");
    }

    #[tokio::test]
    async fn second_approval_conflicts() {
        let context = TestContext::new().await;
        let request_id = context.submit_acme("u-1").await;
        let uri = format!("/registrations/{request_id}/approve");

        let (status, _) = context
            .send("POST", &uri, Some(&admin()), Some(json!({})))
            .await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = context
            .send("POST", &uri, Some(&admin()), Some(json!({})))
            .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["type"], "invalid_state_transition");
        assert_eq!(context.company_count().await, 1);
    }

    #[tokio::test]
    async fn reject_requires_notes() {
        let context = TestContext::new().await;
        let request_id = context.submit_acme("u-1").await;
        let uri = format!("/registrations/{request_id}/reject");

        let (status, body) = context
            .send("POST", &uri, Some(&admin()), Some(json!({ "notes": "" })))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["errors"]["notes"].is_string());

        let (status, body) = context
            .send(
                "GET",
                &format!("/registrations/{request_id}"),
                Some(&admin()),
                None,
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "Pending");

        let (status, body) = context
            .send(
                "POST",
                &uri,
                Some(&admin()),
                Some(json!({ "notes": "Tax code missing" })),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["registration"]["status"], "Rejected");
        assert!(body.get("company").is_none());
        assert_eq!(context.company_count().await, 0);

        let user = context.database.users().fetch("u-1").await.unwrap();
        assert_eq!(user.company_id, None);
    }

    #[tokio::test]
    async fn review_of_unknown_registration_is_not_found() {
        let context = TestContext::new().await;
        let (status, body) = context
            .send(
                "POST",
                "/registrations/missing/reject",
                Some(&admin()),
                Some(json!({ "notes": "n/a" })),
            )
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["type"], "registration_not_found");
    }

    #[tokio::test]
    async fn non_admins_cannot_list_or_review() {
        let context = TestContext::new().await;
        let request_id = context.submit_acme("u-1").await;
        let jobseeker = mint("u-2", "jobseeker");

        let (status, _) = context
            .send("GET", "/registrations", Some(&jobseeker), None)
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, _) = context
            .send(
                "POST",
                &format!("/registrations/{request_id}/approve"),
                Some(&jobseeker),
                None,
            )
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (foreign, _) = context
            .send("GET", &format!("/registrations/{request_id}"), Some(&jobseeker), None)
            .await;
        let (missing, _) = context
            .send("GET", "/registrations/missing", Some(&jobseeker), None)
            .await;
        assert_eq!(foreign, StatusCode::FORBIDDEN);
        assert_eq!(missing, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn list_is_newest_first_and_filterable() {
        let context = TestContext::new().await;
        let first = context.submit_acme("u-1").await;
        let second = context.submit_acme("u-2").await;
        let third = context.submit_acme("u-3").await;

        context
            .send(
                "POST",
                &format!("/registrations/{second}/reject"),
                Some(&admin()),
                Some(json!({ "notes": "Duplicate" })),
            )
            .await;

        let (status, body) = context
            .send("GET", "/registrations", Some(&admin()), None)
            .await;
        assert_eq!(status, StatusCode::OK);
        let ids: Vec<_> = body
            .as_array()
            .unwrap()
            .iter()
            .map(|item| item["requestId"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(ids, vec![third.clone(), second.clone(), first.clone()]);

        let (_, body) = context
            .send("GET", "/registrations?status=pending", Some(&admin()), None)
            .await;
        let ids: Vec<_> = body
            .as_array()
            .unwrap()
            .iter()
            .map(|item| item["requestId"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(ids, vec![third, first]);

        let (_, body) = context
            .send("GET", "/registrations?q=ACME.COM", Some(&admin()), None)
            .await;
        assert_eq!(body.as_array().unwrap().len(), 3);

        let (status, body) = context
            .send("GET", "/registrations?status=archived", Some(&admin()), None)
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["type"], "invalid_status");
    }

    #[tokio::test]
    async fn mine_returns_no_content_then_latest_status() {
        let context = TestContext::new().await;
        let token = mint("u-1", "jobseeker");

        let (status, body) = context
            .send("GET", "/registrations/mine", Some(&token), None)
            .await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        assert!(body.is_null());

        let request_id = context.submit_acme("u-1").await;
        context
            .send(
                "POST",
                &format!("/registrations/{request_id}/reject"),
                Some(&admin()),
                Some(json!({ "notes": "Unverifiable address" })),
            )
            .await;

        let (status, body) = context
            .send("GET", "/registrations/mine", Some(&token), None)
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["requestId"], request_id.as_str());
        assert_eq!(body["status"], "Rejected");
        assert_eq!(body["adminNotes"], "Unverifiable address");
    }

    #[tokio::test]
    async fn second_pending_submission_conflicts() {
        let context = TestContext::new().await;
        context.submit_acme("u-1").await;

        let (status, body) = context
            .send(
                "POST",
                "/registrations",
                Some(&mint("u-1", "jobseeker")),
                Some(json!({
                    "companyName": "Acme Two",
                    "contactPersonEmail": "b@acme.com",
                    "contactPersonName": "John",
                })),
            )
            .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["type"], "pending_registration_exists");
    }

    #[tokio::test]
    async fn malformed_json_is_a_problem_response() {
        let context = TestContext::new().await;
        let request = Request::builder()
            .method("POST")
            .uri("/registrations")
            .header(header::AUTHORIZATION, format!("Bearer {}", mint("u-1", "jobseeker")))
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from("{not json"))
            .unwrap();

        let response = context.router().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "application/problem+json"
        );
    }
}
