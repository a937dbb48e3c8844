//! User-facing claim endpoints.
//!
//! Endpoints:
//! - `POST /api/claim` - bind the caller to a cluster
//! - `GET  /api/cluster/ready` - has their cluster's login rolled out?
//! - `GET  /api/config` - settings the web form needs

use axum::extract::{Query, State};
use axum::Json;
use prelude_claimstate::{sanitize_fingerprint, sanitize_phone};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::api::error::ApiError;
use crate::assign::{self, AssignError};
use crate::captcha::CaptchaError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ClaimRequest {
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub password: String,
    #[serde(default, rename = "recaptchaToken")]
    pub recaptcha_token: String,
    #[serde(default)]
    pub fingerprint: String,
}

#[derive(Debug, Serialize)]
pub struct ClaimResponse {
    #[serde(rename = "webConsoleURL")]
    pub web_console_url: String,
    #[serde(rename = "aiConsoleURL")]
    pub ai_console_url: String,
    pub kubeconfig: String,
    #[serde(rename = "expiresAt")]
    pub expires_at: String,
}

pub async fn claim(
    State(state): State<AppState>,
    Json(request): Json<ClaimRequest>,
) -> Result<Json<ClaimResponse>, ApiError> {
    match state.captcha().verify(request.recaptcha_token.trim()).await {
        Ok(()) => {}
        Err(CaptchaError::MissingToken) => return Err(ApiError::forbidden("captcha_required")),
        Err(CaptchaError::Request(error)) => {
            info!(error = %error, "Captcha provider unreachable");
            return Err(ApiError::forbidden("captcha_failed"));
        }
        Err(_) => return Err(ApiError::forbidden("captcha_failed")),
    }

    let phone = sanitize_phone(request.phone.trim());
    if phone.is_empty() {
        return Err(ApiError::bad_request("phone_required"));
    }
    let password = request.password.trim();
    if password.is_empty() {
        return Err(ApiError::bad_request("password_required"));
    }
    let fingerprint = sanitize_fingerprint(&request.fingerprint);

    let assignment = assign::claim_cluster(&state, &phone, password, &fingerprint)
        .await
        .map_err(|error| match error {
            AssignError::Exhausted => ApiError::not_found("all_clusters_in_use"),
            AssignError::DeviceConflict => ApiError::conflict("device_already_claimed"),
            AssignError::ClusterUnavailable => ApiError::unavailable("cluster_unavailable"),
            AssignError::Internal(inner) => inner.into(),
        })?;

    Ok(Json(ClaimResponse {
        web_console_url: assignment.web_console_url,
        ai_console_url: assignment.ai_console_url,
        kubeconfig: assignment.kubeconfig,
        expires_at: assignment
            .expires_at
            .to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
    }))
}

#[derive(Debug, Deserialize)]
pub struct ReadyParams {
    #[serde(default)]
    pub phone: String,
}

#[derive(Debug, Serialize)]
pub struct ReadyResponse {
    pub ready: bool,
}

pub async fn cluster_ready(
    State(state): State<AppState>,
    Query(params): Query<ReadyParams>,
) -> Result<Json<ReadyResponse>, ApiError> {
    let phone = sanitize_phone(params.phone.trim());
    if phone.is_empty() {
        return Err(ApiError::bad_request("phone_required"));
    }
    Ok(Json(ReadyResponse {
        ready: assign::cluster_ready(&state, &phone).await,
    }))
}

#[derive(Debug, Serialize)]
pub struct ConfigResponse {
    #[serde(rename = "recaptchaSiteKey")]
    pub recaptcha_site_key: String,
}

pub async fn config(State(state): State<AppState>) -> Json<ConfigResponse> {
    Json(ConfigResponse {
        recaptcha_site_key: state.captcha().site_key().to_string(),
    })
}
