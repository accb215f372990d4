/// Onboarding Routes
///
/// Phone-number verification: init from the app, the browser redirect
/// callback from the provider, and the provider's server-to-server webhook.

use actix_web::{http::StatusCode, web, HttpResponse};
use serde::Deserialize;
use serde_json::Value;

use crate::error::{AppError, ErrorContext, ProviderError};
use crate::verification::{CallbackOutcome, VerificationCorrelator};

/// Onboarding init request
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitRequest {
    #[serde(default)]
    pub phone: String,
    pub full_name: Option<String>,
}

/// Query string the provider redirects back with
#[derive(Deserialize)]
pub struct CallbackQuery {
    pub code: Option<String>,
    pub state: Option<String>,
}

const PAGE_VERIFIED: &str = "<html><body><h3>Phone verification successful.</h3>\
<p>You can close this page and return to the app.</p></body></html>";
const PAGE_FAILED: &str = "<html><body><h3>Phone verification failed.</h3>\
<p>Please retry verification from the app.</p></body></html>";
const PAGE_EXCHANGE_FAILED: &str = "<html><body><h3>Phone verification could not be completed.</h3>\
<p>The operator did not confirm the request. Please retry verification from the app.</p></body></html>";
const PAGE_NOT_FOUND: &str = "<html><body><h3>Verification link expired.</h3>\
<p>This verification link is no longer valid. Please start again from the app.</p></body></html>";
const PAGE_BAD_REQUEST: &str = "<html><body><h3>Invalid verification link.</h3>\
<p>The link is missing required parameters.</p></body></html>";
const PAGE_ERROR: &str = "<html><body><h3>Something went wrong.</h3>\
<p>Please try again in a few minutes.</p></body></html>";

fn html(status: StatusCode, body: &'static str) -> HttpResponse {
    HttpResponse::build(status)
        .content_type("text/html; charset=utf-8")
        .body(body)
}

/// POST /api/auth/onboard/init
///
/// Returns `{ authorizationUrl, message }`. The URL must be opened on the
/// device whose number is being verified, over mobile data.
///
/// # Errors
/// - 400: Missing or malformed phone / display name
/// - 503: Provider discovery or credentials unavailable
pub async fn onboard_init(
    body: web::Json<InitRequest>,
    correlator: web::Data<VerificationCorrelator>,
) -> Result<HttpResponse, AppError> {
    let started = correlator
        .init(&body.phone, body.full_name.as_deref())
        .await?;
    Ok(HttpResponse::Ok().json(started))
}

/// GET /api/auth/onboard/callback?code&state
///
/// Rendered to the user's browser, so every outcome is an HTML page.
pub async fn onboard_callback(
    query: web::Query<CallbackQuery>,
    correlator: web::Data<VerificationCorrelator>,
) -> HttpResponse {
    let context = ErrorContext::new("onboard_callback");

    let code = query.code.as_deref().unwrap_or_default();
    let state = query.state.as_deref().unwrap_or_default();

    match correlator.callback(code, state).await {
        Ok(CallbackOutcome::Verified) => html(StatusCode::OK, PAGE_VERIFIED),
        Ok(CallbackOutcome::Failed) => html(StatusCode::OK, PAGE_FAILED),
        Ok(CallbackOutcome::ExchangeFailed) => {
            html(StatusCode::BAD_GATEWAY, PAGE_EXCHANGE_FAILED)
        }
        Err(e) => {
            context.log_error(&e);
            match e {
                AppError::Validation(_) => html(StatusCode::BAD_REQUEST, PAGE_BAD_REQUEST),
                AppError::NotFound(_) => html(StatusCode::NOT_FOUND, PAGE_NOT_FOUND),
                AppError::Provider(ProviderError::Unavailable(_)) => {
                    html(StatusCode::SERVICE_UNAVAILABLE, PAGE_ERROR)
                }
                _ => html(StatusCode::INTERNAL_SERVER_ERROR, PAGE_ERROR),
            }
        }
    }
}

/// POST /api/auth/onboard/webhook
///
/// Accepts any JSON shape the provider sends; see
/// `VerificationCorrelator::webhook` for the fields consulted.
///
/// # Errors
/// - 400: No correlation value in the payload
/// - 404: Correlation value matches no pending verification
pub async fn onboard_webhook(
    payload: web::Json<Value>,
    correlator: web::Data<VerificationCorrelator>,
) -> Result<HttpResponse, AppError> {
    let status = correlator.webhook(payload.into_inner()).await?;
    tracing::info!(status = status.as_str(), "Webhook applied");
    Ok(HttpResponse::Ok().json(serde_json::json!({ "ok": true })))
}
