//! Human-verification gate on the claim endpoint.
//!
//! When a provider secret is configured, every claim request must carry
//! a token that the provider confirms with a passing score. Without a
//! secret the gate is open.

use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tracing::warn;

/// Provider verification endpoint.
const VERIFY_URL: &str = "https://www.google.com/recaptcha/api/siteverify";

/// Scores below this reject the request.
const MIN_SCORE: f64 = 0.5;

const VERIFY_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum CaptchaError {
    /// A secret is configured but the request carried no token.
    #[error("verification token is required")]
    MissingToken,

    /// The provider rejected the token.
    #[error("verification failed")]
    Rejected,

    /// The provider accepted the token but scored it too low.
    #[error("verification score {score:.2} below threshold {MIN_SCORE:.2}")]
    LowScore { score: f64 },

    /// The provider could not be reached or answered garbage.
    #[error("verification request failed: {0}")]
    Request(#[from] reqwest::Error),
}

#[derive(Debug, Deserialize)]
struct VerifyResponse {
    success: bool,
    #[serde(default)]
    score: f64,
}

/// Verifier handle, cheap to clone into handlers.
#[derive(Clone)]
pub struct CaptchaVerifier {
    secret: Option<String>,
    site_key: String,
    http: reqwest::Client,
    verify_url: String,
}

impl CaptchaVerifier {
    pub fn new(secret: Option<String>, site_key: String) -> Self {
        Self {
            secret,
            site_key,
            http: reqwest::Client::new(),
            verify_url: VERIFY_URL.to_string(),
        }
    }

    pub fn enabled(&self) -> bool {
        self.secret.is_some()
    }

    /// Site key for the web form; empty when verification is disabled.
    pub fn site_key(&self) -> &str {
        &self.site_key
    }

    /// Check a request token. A no-op when no secret is configured.
    pub async fn verify(&self, token: &str) -> Result<(), CaptchaError> {
        let Some(secret) = &self.secret else {
            return Ok(());
        };
        if token.is_empty() {
            return Err(CaptchaError::MissingToken);
        }

        let response = self
            .http
            .post(&self.verify_url)
            .timeout(VERIFY_TIMEOUT)
            .form(&[("secret", secret.as_str()), ("response", token)])
            .send()
            .await?;
        let verdict: VerifyResponse = response.json().await?;

        if !verdict.success {
            warn!("Captcha provider rejected token");
            return Err(CaptchaError::Rejected);
        }
        if verdict.score < MIN_SCORE {
            warn!(score = verdict.score, "Captcha score below threshold");
            return Err(CaptchaError::LowScore {
                score: verdict.score,
            });
        }
        Ok(())
    }
}
