//! Application state shared across request handlers.

use std::collections::HashSet;
use std::sync::{Arc, RwLock};

use crate::captcha::CaptchaVerifier;
use crate::config::Config;
use crate::hub::HubClient;

/// Shared application state, passed to handlers via axum's state
/// extractor.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    hub: HubClient,
    config: Config,
    captcha: CaptchaVerifier,
    /// Admin session tokens. Process-local by design: restarting the
    /// gateway logs every admin out. Never held across I/O.
    sessions: RwLock<HashSet<String>>,
}

impl AppState {
    pub fn new(hub: HubClient, config: Config) -> Self {
        let captcha = CaptchaVerifier::new(
            config.recaptcha_secret.clone(),
            config.recaptcha_site_key.clone(),
        );
        Self {
            inner: Arc::new(AppStateInner {
                hub,
                config,
                captcha,
                sessions: RwLock::new(HashSet::new()),
            }),
        }
    }

    pub fn hub(&self) -> &HubClient {
        &self.inner.hub
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub fn captcha(&self) -> &CaptchaVerifier {
        &self.inner.captcha
    }

    pub fn insert_session(&self, token: String) {
        self.inner
            .sessions
            .write()
            .expect("session lock poisoned")
            .insert(token);
    }

    pub fn session_valid(&self, token: &str) -> bool {
        self.inner
            .sessions
            .read()
            .expect("session lock poisoned")
            .contains(token)
    }
}
