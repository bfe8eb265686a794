//! Axum REST API handlers.
//!
//! Caller identity arrives in the `x-actor-id` / `x-actor-role` headers,
//! asserted by the auth proxy fronting this service; the handlers enforce
//! ownership and role guards on top of the SQL-guarded transitions in
//! [`crate::db`].

use std::sync::Arc;

use axum::extract::{FromRequestParts, Path, State};
use axum::http::{header, request::Parts, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::db;
use crate::errors::{AppError, Result};
use crate::models::{
    Actor, Application, ApplicationForm, ApplicationStatus, DisbursementStep, PaymentDetailsForm,
    Role, StepStatus,
};
use crate::pdf;
use crate::signing::{AccessToken, SigningClient, WebhookEvent};

pub struct ApiState {
    pub pool: SqlitePool,
    pub signing: SigningClient,
}

/// Assemble the full application router.
pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/applications", post(create_application).get(list_applications))
        .route("/applications/:id", get(get_application).put(update_application))
        .route("/applications/:id/submit", post(submit_application))
        .route("/applications/:id/withdraw", post(withdraw_application))
        .route("/applications/:id/approve", post(approve_application))
        .route("/applications/:id/reject", post(reject_application))
        .route("/applications/:id/send-for-signature", post(send_for_signature))
        .route("/applications/:id/agreement.pdf", get(agreement_pdf))
        .route("/applications/:id/envelope-status", get(envelope_status))
        .route("/applications/:id/document", get(signed_document))
        .route("/applications/:id/payment-details", post(submit_payment_details))
        .route("/applications/:id/payment-completed", post(mark_payment_completed))
        .route("/applications/:id/disbursements", get(list_disbursements))
        .route("/disbursements/:id/status", put(update_disbursement_step))
        .route("/signing/token", post(signing_token))
        .route("/webhooks/signing", post(signing_webhook))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ─────────────────────────────────────────────────────────
// Actor extraction
// ─────────────────────────────────────────────────────────

#[axum::async_trait]
impl<S> FromRequestParts<S> for Actor
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self> {
        let id = parts
            .headers
            .get("x-actor-id")
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .ok_or_else(|| AppError::Forbidden("Missing x-actor-id header".to_string()))?
            .to_string();
        let role = parts
            .headers
            .get("x-actor-role")
            .and_then(|v| v.to_str().ok())
            .and_then(Role::from_str)
            .ok_or_else(|| AppError::Forbidden("Missing or unknown x-actor-role header".to_string()))?;
        Ok(Actor { id, role })
    }
}

fn require_admin(actor: &Actor) -> Result<()> {
    if actor.is_admin() {
        Ok(())
    } else {
        Err(AppError::Forbidden("Admin role required".to_string()))
    }
}

/// Owner or admin may view an application; everyone else is refused.
fn require_party(actor: &Actor, app: &Application) -> Result<()> {
    if actor.is_admin() || actor.owns(app) {
        Ok(())
    } else {
        Err(AppError::Forbidden("Not a party to this application".to_string()))
    }
}

async fn load_application(pool: &SqlitePool, id: i64) -> Result<Application> {
    db::get_application(pool, id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Application {id}")))
}

fn validate_form(form: &ApplicationForm) -> Result<()> {
    if form.title.trim().is_empty() {
        return Err(AppError::Validation("Title must not be empty".to_string()));
    }
    if form.applicant_name.trim().is_empty() || form.applicant_email.trim().is_empty() {
        return Err(AppError::Validation("Applicant name and email are required".to_string()));
    }
    if form.amount <= 0 {
        return Err(AppError::Validation("Amount must be positive".to_string()));
    }
    Ok(())
}

// ─────────────────────────────────────────────────────────
// Response shapes
// ─────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct ApplicationsResponse {
    pub count: usize,
    pub applications: Vec<Application>,
}

#[derive(Serialize)]
pub struct StepsResponse {
    pub application_id: i64,
    pub count: usize,
    pub steps: Vec<DisbursementStep>,
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

#[derive(Serialize)]
pub struct WebhookAck {
    pub handled: bool,
}

#[derive(Serialize)]
pub struct UpdateAck {
    pub updated: bool,
}

#[derive(Serialize)]
pub struct EnvelopeStatusResponse {
    pub envelope_id: String,
    pub status: String,
}

#[derive(Deserialize)]
pub struct RejectRequest {
    pub feedback: String,
}

#[derive(Deserialize)]
pub struct StepStatusRequest {
    pub status: String,
}

// ─────────────────────────────────────────────────────────
// Handlers
// ─────────────────────────────────────────────────────────

/// `GET /health`
pub async fn health() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// `POST /applications` — create a draft owned by the caller.
pub async fn create_application(
    State(state): State<Arc<ApiState>>,
    actor: Actor,
    Json(form): Json<ApplicationForm>,
) -> Result<impl IntoResponse> {
    validate_form(&form)?;
    let app = db::insert_application(&state.pool, &actor.id, &form).await?;
    info!("Application {} created by {}", app.id, actor.id);
    Ok((StatusCode::CREATED, Json(app)))
}

/// `GET /applications` — admins see everything, applicants see their own.
pub async fn list_applications(
    State(state): State<Arc<ApiState>>,
    actor: Actor,
) -> Result<Json<ApplicationsResponse>> {
    let applications = if actor.is_admin() {
        db::list_applications(&state.pool).await?
    } else {
        db::list_applications_for_owner(&state.pool, &actor.id).await?
    };
    Ok(Json(ApplicationsResponse {
        count: applications.len(),
        applications,
    }))
}

/// `GET /applications/:id`
pub async fn get_application(
    State(state): State<Arc<ApiState>>,
    actor: Actor,
    Path(id): Path<i64>,
) -> Result<Json<Application>> {
    let app = load_application(&state.pool, id).await?;
    require_party(&actor, &app)?;
    Ok(Json(app))
}

/// `PUT /applications/:id` — owner edits a draft.
pub async fn update_application(
    State(state): State<Arc<ApiState>>,
    actor: Actor,
    Path(id): Path<i64>,
    Json(form): Json<ApplicationForm>,
) -> Result<Json<Application>> {
    validate_form(&form)?;
    let app = load_application(&state.pool, id).await?;
    if !actor.owns(&app) {
        return Err(AppError::Forbidden("Only the owner may edit a draft".to_string()));
    }
    if !db::update_draft(&state.pool, id, &actor.id, &form).await? {
        return Err(AppError::Conflict("Only draft applications can be edited".to_string()));
    }
    Ok(Json(load_application(&state.pool, id).await?))
}

/// `POST /applications/:id/submit` — owner; `draft → submitted`.
pub async fn submit_application(
    State(state): State<Arc<ApiState>>,
    actor: Actor,
    Path(id): Path<i64>,
) -> Result<Json<Application>> {
    let app = load_application(&state.pool, id).await?;
    if !actor.owns(&app) {
        return Err(AppError::Forbidden("Only the owner may submit".to_string()));
    }
    transition(&state.pool, id, ApplicationStatus::Draft, ApplicationStatus::Submitted).await?;
    Ok(Json(load_application(&state.pool, id).await?))
}

/// `POST /applications/:id/withdraw` — owner; `submitted → draft`.
pub async fn withdraw_application(
    State(state): State<Arc<ApiState>>,
    actor: Actor,
    Path(id): Path<i64>,
) -> Result<Json<Application>> {
    let app = load_application(&state.pool, id).await?;
    if !actor.owns(&app) {
        return Err(AppError::Forbidden("Only the owner may withdraw".to_string()));
    }
    transition(&state.pool, id, ApplicationStatus::Submitted, ApplicationStatus::Draft).await?;
    Ok(Json(load_application(&state.pool, id).await?))
}

/// `POST /applications/:id/approve` — admin; `submitted → approved`.
pub async fn approve_application(
    State(state): State<Arc<ApiState>>,
    actor: Actor,
    Path(id): Path<i64>,
) -> Result<Json<Application>> {
    require_admin(&actor)?;
    load_application(&state.pool, id).await?;
    transition(&state.pool, id, ApplicationStatus::Submitted, ApplicationStatus::Approved).await?;
    info!("Application {id} approved by {}", actor.id);
    Ok(Json(load_application(&state.pool, id).await?))
}

/// `POST /applications/:id/reject` — admin; requires non-empty feedback.
pub async fn reject_application(
    State(state): State<Arc<ApiState>>,
    actor: Actor,
    Path(id): Path<i64>,
    Json(req): Json<RejectRequest>,
) -> Result<Json<Application>> {
    require_admin(&actor)?;
    if req.feedback.trim().is_empty() {
        return Err(AppError::Validation("Rejection feedback must not be empty".to_string()));
    }
    load_application(&state.pool, id).await?;
    if !db::reject_application(&state.pool, id, req.feedback.trim()).await? {
        return Err(AppError::Conflict(
            "Only submitted applications can be rejected".to_string(),
        ));
    }
    info!("Application {id} rejected by {}", actor.id);
    Ok(Json(load_application(&state.pool, id).await?))
}

/// Shared guarded-transition helper: zero rows affected means the row left
/// the expected state, which the caller sees as a conflict.
async fn transition(
    pool: &SqlitePool,
    id: i64,
    from: ApplicationStatus,
    to: ApplicationStatus,
) -> Result<()> {
    debug_assert!(from.can_transition(to));
    if !db::set_status(pool, id, from, to).await? {
        return Err(AppError::Conflict(format!(
            "Application is not in the {} state",
            from.as_str()
        )));
    }
    Ok(())
}

/// `POST /applications/:id/send-for-signature` — admin.
///
/// Token exchange → envelope creation → envelope id persisted with the
/// `approved → pending_signature` flip.  Any failure surfaces as-is; an
/// envelope created before a failed persistence is an orphan at the
/// provider.
pub async fn send_for_signature(
    State(state): State<Arc<ApiState>>,
    actor: Actor,
    Path(id): Path<i64>,
) -> Result<Json<Application>> {
    require_admin(&actor)?;
    let app = load_application(&state.pool, id).await?;
    if app.status() != Some(ApplicationStatus::Approved) {
        return Err(AppError::Conflict(
            "Only approved applications can be sent for signature".to_string(),
        ));
    }

    let document = pdf::render_agreement(&app);
    let token = state.signing.obtain_token().await?;
    let envelope_id = state.signing.create_envelope(&token, &app, &document).await?;

    if !db::attach_envelope(&state.pool, id, &envelope_id).await? {
        warn!("Envelope {envelope_id} created but application {id} left the approved state");
        return Err(AppError::Conflict(
            "Application state changed during envelope creation".to_string(),
        ));
    }
    info!("Application {id} sent for signature (envelope {envelope_id})");
    Ok(Json(load_application(&state.pool, id).await?))
}

/// `GET /applications/:id/agreement.pdf` — unsigned agreement preview.
pub async fn agreement_pdf(
    State(state): State<Arc<ApiState>>,
    actor: Actor,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse> {
    let app = load_application(&state.pool, id).await?;
    require_party(&actor, &app)?;
    let bytes = pdf::render_agreement(&app);
    Ok(([(header::CONTENT_TYPE, "application/pdf")], bytes))
}

/// `GET /applications/:id/envelope-status` — provider-reported envelope
/// status, fetched on demand.
pub async fn envelope_status(
    State(state): State<Arc<ApiState>>,
    actor: Actor,
    Path(id): Path<i64>,
) -> Result<Json<EnvelopeStatusResponse>> {
    let app = load_application(&state.pool, id).await?;
    require_party(&actor, &app)?;
    let envelope_id = app
        .envelope_id
        .ok_or_else(|| AppError::Conflict("Application has no signature envelope".to_string()))?;

    let token = state.signing.obtain_token().await?;
    let status = state.signing.envelope_status(&token, &envelope_id).await?;
    Ok(Json(EnvelopeStatusResponse {
        envelope_id,
        status,
    }))
}

/// `GET /applications/:id/document` — proxy the signed PDF from the provider.
pub async fn signed_document(
    State(state): State<Arc<ApiState>>,
    actor: Actor,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse> {
    let app = load_application(&state.pool, id).await?;
    require_party(&actor, &app)?;
    let envelope_id = app
        .envelope_id
        .as_deref()
        .ok_or_else(|| AppError::Conflict("Application has no signature envelope".to_string()))?;

    let token = state.signing.obtain_token().await?;
    let bytes = state.signing.fetch_document(&token, envelope_id).await?;
    Ok(([(header::CONTENT_TYPE, "application/pdf")], bytes))
}

/// `POST /signing/token` — admin-facing token exchange for tooling.
pub async fn signing_token(
    State(state): State<Arc<ApiState>>,
    actor: Actor,
) -> Result<Json<AccessToken>> {
    require_admin(&actor)?;
    Ok(Json(state.signing.obtain_token().await?))
}

/// `POST /applications/:id/payment-details` — owner, once, after signing.
pub async fn submit_payment_details(
    State(state): State<Arc<ApiState>>,
    actor: Actor,
    Path(id): Path<i64>,
    Json(form): Json<PaymentDetailsForm>,
) -> Result<Json<Application>> {
    if form.bank_account_name.trim().is_empty()
        || form.bank_account_number.trim().is_empty()
        || form.bank_ifsc.trim().is_empty()
    {
        return Err(AppError::Validation("Bank account details are required".to_string()));
    }
    let app = load_application(&state.pool, id).await?;
    if !actor.owns(&app) {
        return Err(AppError::Forbidden(
            "Only the owner may submit payment details".to_string(),
        ));
    }
    if app.has_submitted_payment_details {
        return Err(AppError::Conflict("Payment details already submitted".to_string()));
    }
    if !db::submit_payment_details(&state.pool, id, &actor.id, &form).await? {
        return Err(AppError::Conflict(
            "Payment details can only be submitted for a signed application".to_string(),
        ));
    }
    Ok(Json(load_application(&state.pool, id).await?))
}

/// `POST /applications/:id/payment-completed` — admin.
pub async fn mark_payment_completed(
    State(state): State<Arc<ApiState>>,
    actor: Actor,
    Path(id): Path<i64>,
) -> Result<Json<Application>> {
    require_admin(&actor)?;
    load_application(&state.pool, id).await?;
    if !db::mark_payment_completed(&state.pool, id).await? {
        return Err(AppError::Conflict(
            "Payment can only be completed for a signed application".to_string(),
        ));
    }
    Ok(Json(load_application(&state.pool, id).await?))
}

/// `GET /applications/:id/disbursements`
pub async fn list_disbursements(
    State(state): State<Arc<ApiState>>,
    actor: Actor,
    Path(id): Path<i64>,
) -> Result<Json<StepsResponse>> {
    let app = load_application(&state.pool, id).await?;
    require_party(&actor, &app)?;
    let steps = db::get_steps(&state.pool, id).await?;
    Ok(Json(StepsResponse {
        application_id: id,
        count: steps.len(),
        steps,
    }))
}

/// `PUT /disbursements/:id/status` — admin updates one tranche.
pub async fn update_disbursement_step(
    State(state): State<Arc<ApiState>>,
    actor: Actor,
    Path(id): Path<i64>,
    Json(req): Json<StepStatusRequest>,
) -> Result<Json<UpdateAck>> {
    require_admin(&actor)?;
    let status = StepStatus::from_str(&req.status)
        .ok_or_else(|| AppError::Validation(format!("Unknown step status: {}", req.status)))?;
    if !db::update_step_status(&state.pool, id, status).await? {
        return Err(AppError::NotFound(format!("Disbursement step {id}")));
    }
    Ok(Json(UpdateAck { updated: true }))
}

/// `POST /webhooks/signing` — provider callback.
///
/// Only `envelope-completed` moves state; everything else is acknowledged
/// and dropped.  Unknown envelope ids alter nothing, and the endpoint still
/// answers 200 because the provider retries on any other status.  The
/// payload is not HMAC-verified (known gap carried from the source system).
pub async fn signing_webhook(
    State(state): State<Arc<ApiState>>,
    Json(event): Json<WebhookEvent>,
) -> Result<Json<WebhookAck>> {
    if !event.is_completed() {
        return Ok(Json(WebhookAck { handled: false }));
    }
    let Some(envelope_id) = event.data.envelope_id.as_deref() else {
        warn!("Completion event without an envelope id");
        return Ok(Json(WebhookAck { handled: false }));
    };

    match db::complete_by_envelope(&state.pool, envelope_id).await? {
        Some(app) => {
            let seeded = db::seed_disbursement_steps(&state.pool, &app).await?;
            info!(
                "Envelope {envelope_id} completed — application {} signed ({seeded} tranches seeded)",
                app.id
            );
            Ok(Json(WebhookAck { handled: true }))
        }
        None => {
            warn!("Completion event for unknown envelope {envelope_id}");
            Ok(Json(WebhookAck { handled: false }))
        }
    }
}

// ─────────────────────────────────────────────────────────
// Handler tests
// ─────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use crate::config::Config;
    use crate::db::tests::test_pool;

    async fn test_app() -> (Router, SqlitePool) {
        let pool = test_pool().await;
        let config = Config {
            database_url: "sqlite::memory:".to_string(),
            api_port: 0,
            signing_auth_base_url: "https://account-d.signing.example".to_string(),
            signing_api_base_url: "https://demo.signing.example/restapi".to_string(),
            signing_integration_key: "ik-123".to_string(),
            signing_user_id: "user-456".to_string(),
            signing_account_id: "acct-789".to_string(),
            signing_private_key_path: "tests/fixtures/test_signing_key.pem".to_string(),
            signing_token_lifetime_secs: 3600,
            admin_signer_name: "Grants Administrator".to_string(),
            admin_signer_email: "grants-admin@example.org".to_string(),
        };
        let signing = SigningClient::new(reqwest::Client::new(), &config).unwrap();
        let state = Arc::new(ApiState {
            pool: pool.clone(),
            signing,
        });
        (router(state), pool)
    }

    fn request(method: &str, uri: &str, actor: Option<(&str, &str)>, body: Option<Value>) -> Request<Body> {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some((id, role)) = actor {
            builder = builder.header("x-actor-id", id).header("x-actor-role", role);
        }
        match body {
            Some(v) => builder
                .header("content-type", "application/json")
                .body(Body::from(v.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        }
    }

    async fn json_body(resp: axum::response::Response) -> Value {
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn draft_body() -> Value {
        json!({
            "applicant_name": "Asha Rao",
            "applicant_email": "asha@example.org",
            "title": "Community library",
            "description": "Books and shelving",
            "amount": 400000,
        })
    }

    /// Drive a fresh application to `submitted` through the HTTP surface.
    async fn submitted_application(app: &Router) -> i64 {
        let resp = app
            .clone()
            .oneshot(request("POST", "/applications", Some(("owner-1", "applicant")), Some(draft_body())))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::CREATED);
        let id = json_body(resp).await["id"].as_i64().unwrap();

        let resp = app
            .clone()
            .oneshot(request(
                "POST",
                &format!("/applications/{id}/submit"),
                Some(("owner-1", "applicant")),
                None,
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        id
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let (app, _pool) = test_app().await;
        let resp = app.oneshot(request("GET", "/health", None, None)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(json_body(resp).await["status"], "ok");
    }

    #[tokio::test]
    async fn missing_actor_headers_are_refused() {
        let (app, _pool) = test_app().await;
        let resp = app
            .oneshot(request("GET", "/applications", None, None))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn submit_twice_conflicts() {
        let (app, _pool) = test_app().await;
        let id = submitted_application(&app).await;

        let resp = app
            .oneshot(request(
                "POST",
                &format!("/applications/{id}/submit"),
                Some(("owner-1", "applicant")),
                None,
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn withdraw_then_edit_then_resubmit() {
        let (app, _pool) = test_app().await;
        let id = submitted_application(&app).await;

        let resp = app
            .clone()
            .oneshot(request(
                "POST",
                &format!("/applications/{id}/withdraw"),
                Some(("owner-1", "applicant")),
                None,
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(json_body(resp).await["status"], "draft");

        let mut edited = draft_body();
        edited["amount"] = json!(500000);
        let resp = app
            .clone()
            .oneshot(request(
                "PUT",
                &format!("/applications/{id}"),
                Some(("owner-1", "applicant")),
                Some(edited),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(json_body(resp).await["amount"], 500000);

        let resp = app
            .oneshot(request(
                "POST",
                &format!("/applications/{id}/submit"),
                Some(("owner-1", "applicant")),
                None,
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn only_owner_may_submit() {
        let (app, _pool) = test_app().await;
        let resp = app
            .clone()
            .oneshot(request("POST", "/applications", Some(("owner-1", "applicant")), Some(draft_body())))
            .await
            .unwrap();
        let id = json_body(resp).await["id"].as_i64().unwrap();

        let resp = app
            .oneshot(request(
                "POST",
                &format!("/applications/{id}/submit"),
                Some(("owner-2", "applicant")),
                None,
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn approve_requires_admin_role() {
        let (app, _pool) = test_app().await;
        let id = submitted_application(&app).await;

        let resp = app
            .clone()
            .oneshot(request(
                "POST",
                &format!("/applications/{id}/approve"),
                Some(("owner-1", "applicant")),
                None,
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);

        let resp = app
            .oneshot(request(
                "POST",
                &format!("/applications/{id}/approve"),
                Some(("admin-1", "admin")),
                None,
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(json_body(resp).await["status"], "approved");
    }

    #[tokio::test]
    async fn reject_requires_feedback() {
        let (app, _pool) = test_app().await;
        let id = submitted_application(&app).await;

        let resp = app
            .clone()
            .oneshot(request(
                "POST",
                &format!("/applications/{id}/reject"),
                Some(("admin-1", "admin")),
                Some(json!({ "feedback": "   " })),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);

        let resp = app
            .oneshot(request(
                "POST",
                &format!("/applications/{id}/reject"),
                Some(("admin-1", "admin")),
                Some(json!({ "feedback": "Budget lacks detail" })),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = json_body(resp).await;
        assert_eq!(body["status"], "rejected");
        assert_eq!(body["feedback"], "Budget lacks detail");
    }

    #[tokio::test]
    async fn applicants_only_see_their_own() {
        let (app, _pool) = test_app().await;
        submitted_application(&app).await;

        let resp = app
            .clone()
            .oneshot(request("GET", "/applications", Some(("owner-2", "applicant")), None))
            .await
            .unwrap();
        assert_eq!(json_body(resp).await["count"], 0);

        let resp = app
            .oneshot(request("GET", "/applications", Some(("admin-1", "admin")), None))
            .await
            .unwrap();
        assert_eq!(json_body(resp).await["count"], 1);
    }

    #[tokio::test]
    async fn agreement_preview_is_pdf() {
        let (app, _pool) = test_app().await;
        let id = submitted_application(&app).await;

        let resp = app
            .oneshot(request(
                "GET",
                &format!("/applications/{id}/agreement.pdf"),
                Some(("owner-1", "applicant")),
                None,
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers()[header::CONTENT_TYPE], "application/pdf");
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        assert!(bytes.starts_with(b"%PDF-1.4"));
    }

    #[tokio::test]
    async fn webhook_completes_signature_and_seeds_tranches() {
        let (app, pool) = test_app().await;
        let id = submitted_application(&app).await;
        app.clone()
            .oneshot(request(
                "POST",
                &format!("/applications/{id}/approve"),
                Some(("admin-1", "admin")),
                None,
            ))
            .await
            .unwrap();
        // Envelope attached directly; send-for-signature needs the live provider.
        assert!(db::attach_envelope(&pool, id, "env-123").await.unwrap());

        let resp = app
            .clone()
            .oneshot(request(
                "POST",
                "/webhooks/signing",
                None,
                Some(json!({ "event": "envelope-completed", "data": { "envelopeId": "env-123" } })),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(json_body(resp).await["handled"], true);

        let resp = app
            .oneshot(request(
                "GET",
                &format!("/applications/{id}/disbursements"),
                Some(("owner-1", "applicant")),
                None,
            ))
            .await
            .unwrap();
        let body = json_body(resp).await;
        assert_eq!(body["count"], 4);
        assert_eq!(body["steps"][0]["status"], "pending");
    }

    #[tokio::test]
    async fn webhook_unknown_envelope_is_acknowledged_noop() {
        let (app, pool) = test_app().await;
        let id = submitted_application(&app).await;

        let resp = app
            .oneshot(request(
                "POST",
                "/webhooks/signing",
                None,
                Some(json!({ "event": "envelope-completed", "data": { "envelopeId": "no-such" } })),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(json_body(resp).await["handled"], false);

        let app_row = db::get_application(&pool, id).await.unwrap().unwrap();
        assert_eq!(app_row.status, "submitted");
    }

    #[tokio::test]
    async fn webhook_ignores_non_completion_events() {
        let (app, _pool) = test_app().await;
        let resp = app
            .oneshot(request(
                "POST",
                "/webhooks/signing",
                None,
                Some(json!({ "event": "envelope-sent", "data": { "envelopeId": "env-123" } })),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(json_body(resp).await["handled"], false);
    }

    #[tokio::test]
    async fn payment_details_flow_is_one_shot() {
        let (app, pool) = test_app().await;
        let id = submitted_application(&app).await;
        app.clone()
            .oneshot(request(
                "POST",
                &format!("/applications/{id}/approve"),
                Some(("admin-1", "admin")),
                None,
            ))
            .await
            .unwrap();
        db::attach_envelope(&pool, id, "env-777").await.unwrap();
        db::complete_by_envelope(&pool, "env-777").await.unwrap();

        let details = json!({
            "bank_account_name": "Asha Rao",
            "bank_account_number": "000111222333",
            "bank_ifsc": "HDFC0001234",
            "upi_id": "asha@upi",
        });
        let resp = app
            .clone()
            .oneshot(request(
                "POST",
                &format!("/applications/{id}/payment-details"),
                Some(("owner-1", "applicant")),
                Some(details.clone()),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(json_body(resp).await["has_submitted_payment_details"], true);

        let resp = app
            .clone()
            .oneshot(request(
                "POST",
                &format!("/applications/{id}/payment-details"),
                Some(("owner-1", "applicant")),
                Some(details),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::CONFLICT);

        let resp = app
            .oneshot(request(
                "POST",
                &format!("/applications/{id}/payment-completed"),
                Some(("admin-1", "admin")),
                None,
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(json_body(resp).await["payment_completed"], true);
    }

    #[tokio::test]
    async fn disbursement_step_update_is_admin_only() {
        let (app, pool) = test_app().await;
        let id = submitted_application(&app).await;
        let row = db::get_application(&pool, id).await.unwrap().unwrap();
        db::seed_disbursement_steps(&pool, &row).await.unwrap();
        let steps = db::get_steps(&pool, id).await.unwrap();

        let resp = app
            .clone()
            .oneshot(request(
                "PUT",
                &format!("/disbursements/{}/status", steps[0].id),
                Some(("owner-1", "applicant")),
                Some(json!({ "status": "completed" })),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);

        let resp = app
            .clone()
            .oneshot(request(
                "PUT",
                &format!("/disbursements/{}/status", steps[0].id),
                Some(("admin-1", "admin")),
                Some(json!({ "status": "completed" })),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let resp = app
            .oneshot(request(
                "PUT",
                &format!("/disbursements/{}/status", steps[1].id),
                Some(("admin-1", "admin")),
                Some(json!({ "status": "shipped" })),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn envelope_status_needs_an_envelope_and_a_party() {
        let (app, _pool) = test_app().await;
        let id = submitted_application(&app).await;

        // No envelope yet: the guard refuses before any provider call.
        let resp = app
            .clone()
            .oneshot(request(
                "GET",
                &format!("/applications/{id}/envelope-status"),
                Some(("owner-1", "applicant")),
                None,
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::CONFLICT);

        // A stranger to the application is refused outright.
        let resp = app
            .oneshot(request(
                "GET",
                &format!("/applications/{id}/envelope-status"),
                Some(("owner-2", "applicant")),
                None,
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn send_for_signature_requires_approved_status() {
        let (app, _pool) = test_app().await;
        let id = submitted_application(&app).await;

        // Still submitted: refused before any provider call is attempted.
        let resp = app
            .oneshot(request(
                "POST",
                &format!("/applications/{id}/send-for-signature"),
                Some(("admin-1", "admin")),
                None,
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn create_rejects_invalid_amount() {
        let (app, _pool) = test_app().await;
        let mut body = draft_body();
        body["amount"] = json!(0);
        let resp = app
            .oneshot(request("POST", "/applications", Some(("owner-1", "applicant")), Some(body)))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }
}
