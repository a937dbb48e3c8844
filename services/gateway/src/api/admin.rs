//! Admin endpoints.
//!
//! Endpoints:
//! - `POST /api/admin/login` - exchange the admin password for a token
//! - `GET  /api/admin` - claims and deployments for the dashboard
//!
//! Tokens live only in this process; a restart logs everyone out. When
//! no admin password is configured the whole surface is open, which is
//! the development mode.

use axum::extract::State;
use axum::http::header::AUTHORIZATION;
use axum::http::HeaderMap;
use axum::Json;
use chrono::Utc;
use prelude_claimstate::{format_age, parse_duration};
use rand::Rng;
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use tracing::info;

use crate::api::error::ApiError;
use crate::hub::deployments::DeploymentView;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub token: String,
}

pub async fn login(
    State(state): State<AppState>,
    Json(request): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, ApiError> {
    let Some(expected) = state.config().admin_password.as_deref() else {
        return Ok(Json(LoginResponse {
            token: String::new(),
        }));
    };

    let matches: bool = request
        .password
        .as_bytes()
        .ct_eq(expected.as_bytes())
        .into();
    if !matches {
        return Err(ApiError::unauthorized("invalid_password"));
    }

    let token = generate_token();
    state.insert_session(token.clone());
    info!("Admin login succeeded, token issued");
    Ok(Json(LoginResponse { token }))
}

fn generate_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill(&mut bytes);
    hex::encode(bytes)
}

fn authorized(state: &AppState, headers: &HeaderMap) -> bool {
    if state.config().admin_password.is_none() {
        return true;
    }
    let Some(token) = headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
    else {
        return false;
    };
    state.session_valid(token)
}

#[derive(Debug, Serialize)]
pub struct AdminClaimInfo {
    pub name: String,
    pub pool: String,
    pub phone: String,
    pub authenticated: bool,
    pub namespace: String,
    pub age: String,
    #[serde(rename = "expiresAt", skip_serializing_if = "String::is_empty")]
    pub expires_at: String,
}

#[derive(Debug, Serialize)]
pub struct AdminDeploymentInfo {
    pub name: String,
    pub namespace: String,
    pub platform: String,
    pub region: String,
    pub version: String,
    #[serde(rename = "provisionStatus")]
    pub provision_status: String,
    #[serde(rename = "powerState")]
    pub power_state: String,
    pub age: String,
}

#[derive(Debug, Serialize)]
pub struct AdminResponse {
    #[serde(rename = "clusterClaims")]
    pub cluster_claims: Vec<AdminClaimInfo>,
    #[serde(rename = "clusterDeployments")]
    pub cluster_deployments: Vec<AdminDeploymentInfo>,
}

pub async fn data(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<AdminResponse>, ApiError> {
    if !authorized(&state, &headers) {
        return Err(ApiError::unauthorized("unauthenticated"));
    }

    let pool = state.config().cluster_pool.clone();
    let now = Utc::now();

    let claims = state
        .hub()
        .list_pool_claims(&pool)
        .await
        .map_err(|error| anyhow::Error::from(error).context("listing claims"))?;

    let cluster_claims = claims
        .iter()
        .map(|(_, view)| {
            // Expiry is only meaningful once someone holds the claim.
            let expires_at = if view.labels.phone.is_some() {
                view.lifetime
                    .as_deref()
                    .and_then(|lifetime| parse_duration(lifetime).ok())
                    .zip(view.created_at)
                    .map(|(lifetime, created)| {
                        (created + lifetime).to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
                    })
                    .unwrap_or_default()
            } else {
                String::new()
            };

            AdminClaimInfo {
                name: view.name.clone(),
                pool: pool.clone(),
                phone: view.labels.phone.clone().unwrap_or_default(),
                authenticated: view.labels.auth_done,
                namespace: view.cluster_id.clone().unwrap_or_default(),
                age: format_age(view.age(now)),
                expires_at,
            }
        })
        .collect();

    let deployments = state
        .hub()
        .list_pool_deployments(&pool)
        .await
        .map_err(|error| anyhow::Error::from(error).context("listing deployments"))?;

    let cluster_deployments = deployments
        .iter()
        .map(|obj| {
            let view = DeploymentView::from_object(obj);
            let age = view
                .created_at
                .map(|created| format_age(now - created))
                .unwrap_or_default();
            AdminDeploymentInfo {
                name: view.name,
                namespace: view.namespace,
                platform: view.platform,
                region: view.region,
                version: view.version,
                provision_status: view.provision_status,
                power_state: view.power_state,
                age,
            }
        })
        .collect();

    Ok(Json(AdminResponse {
        cluster_claims,
        cluster_deployments,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_are_32_bytes_of_hex() {
        let token = generate_token();
        assert_eq!(token.len(), 64);
        assert!(token.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(token, generate_token());
    }
}
