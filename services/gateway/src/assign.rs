//! The assignment engine.
//!
//! Takes a sanitized phone, a chosen password, and a device
//! fingerprint, and binds the caller to one sealed claim: affinity
//! re-bind when they already hold one, device-conflict rejection when
//! their browser already grabbed a different cluster, otherwise a
//! uniformly random pick from the available set committed with a single
//! optimistic update. The winner then gets the caller's password
//! installed on the cluster and the user kubeconfig returned.

use anyhow::{anyhow, Context};
use chrono::{DateTime, Utc};
use prelude_claimstate::{
    format_duration, parse_duration, select_claim, ClaimCandidate, Selection,
};
use thiserror::Error;
use tracing::{info, warn};

use crate::htpasswd;
use crate::hub::claims::{is_conflict, ClaimView};
use crate::hub::deployments::{admin_kubeconfig_secret, console_url};
use crate::hub::HubClient;
use crate::spoke::SpokeClient;
use crate::state::AppState;

/// Host segment rewritten to produce the AI console URL.
const WEB_CONSOLE_HOST_SEGMENT: &str = "console-openshift-console";
const AI_CONSOLE_HOST_SEGMENT: &str = "data-science-gateway";
const AI_CONSOLE_SUFFIX: &str = "/learning-resources?&keyword=prelude";

/// Operator consulted by the readiness probe.
const AUTHENTICATION_OPERATOR: &str = "authentication";

#[derive(Debug, Error)]
pub enum AssignError {
    /// Every sealed claim is already assigned.
    #[error("all clusters in use")]
    Exhausted,

    /// The caller's device already holds a different cluster.
    #[error("device already claimed a cluster")]
    DeviceConflict,

    /// The assigned cluster could not be reached; the claim has been
    /// returned to the authenticator.
    #[error("cluster unavailable")]
    ClusterUnavailable,

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// Everything the user needs to start working.
#[derive(Debug)]
pub struct Assignment {
    pub web_console_url: String,
    pub ai_console_url: String,
    pub kubeconfig: String,
    pub expires_at: DateTime<Utc>,
}

/// Bind the caller to a cluster and install their password on it.
///
/// `phone` and `fingerprint` must already be sanitized.
pub async fn claim_cluster(
    state: &AppState,
    phone: &str,
    password: &str,
    fingerprint: &str,
) -> Result<Assignment, AssignError> {
    let hub = state.hub();
    let pool = &state.config().cluster_pool;

    let claims = hub
        .list_pool_claims(pool)
        .await
        .context("listing claims")?;

    let candidates: Vec<ClaimCandidate> = claims
        .iter()
        .map(|(_, view)| ClaimCandidate {
            name: view.name.clone(),
            labels: view.labels.clone(),
        })
        .collect();

    let selection = select_claim(&candidates, phone, fingerprint, &mut rand::thread_rng());
    let (view, expires_at) = match selection {
        Selection::Affinity {
            index,
            fingerprint_stale,
        } => {
            let (object, view) = &claims[index];
            info!(claim = %view.name, phone, "Re-binding existing assignment");

            if fingerprint_stale {
                // Best effort: an affinity hit must not fail because
                // the fingerprint could not be recorded.
                if let Err(error) = hub.backfill_fingerprint(object, fingerprint).await {
                    warn!(claim = %view.name, error = %error, "Fingerprint backfill failed");
                } else {
                    info!(claim = %view.name, fingerprint, "Fingerprint backfilled");
                }
            }

            let expires_at = expiry_of(view).ok_or_else(|| {
                AssignError::Internal(anyhow!("claim {} has no usable lifetime", view.name))
            })?;
            (view, expires_at)
        }

        Selection::DeviceConflict { holder_phone } => {
            info!(fingerprint, holder = %holder_phone, phone, "Device already holds a cluster");
            return Err(AssignError::DeviceConflict);
        }

        Selection::Exhausted => return Err(AssignError::Exhausted),

        Selection::Fresh { index } => {
            let (object, view) = &claims[index];

            let configured = parse_duration(&state.config().cluster_lifetime)
                .context("parsing configured lifetime")?;
            let age = view.age(Utc::now());
            let total = age + configured;
            let lifetime = format_duration(total);

            info!(
                claim = %view.name,
                phone,
                age = %format_duration(age),
                lifetime = %lifetime,
                "Assigning claim"
            );

            match hub.assign_claim(object, phone, fingerprint, &lifetime).await {
                Ok(()) => {}
                Err(error) if is_conflict(&error) => {
                    // Someone else won this claim between the list and
                    // the update; from the caller's view the pool just
                    // ran dry and a retry will pick another claim.
                    info!(claim = %view.name, "Lost assignment race");
                    return Err(AssignError::Exhausted);
                }
                Err(error) => {
                    return Err(AssignError::Internal(
                        anyhow!(error).context("labeling claim"),
                    ))
                }
            }

            let expires_at = view
                .created_at
                .map(|created| created + total)
                .unwrap_or_else(|| Utc::now() + configured);
            (view, expires_at)
        }
    };

    // A sealed claim without a bound cluster should not exist; if one
    // does, it is useless to the caller and reads as exhaustion.
    let Some(cluster) = view.cluster_id.clone() else {
        warn!(claim = %view.name, "Selected claim has no bound cluster");
        return Err(AssignError::Exhausted);
    };

    match prepare_cluster(hub, &cluster, password).await {
        Ok((web_console_url, user_kubeconfig)) => {
            info!(claim = %view.name, cluster = %cluster, phone, "Cluster assigned");
            Ok(Assignment {
                ai_console_url: ai_console_url(&web_console_url),
                web_console_url,
                kubeconfig: user_kubeconfig,
                expires_at,
            })
        }
        Err(error) => {
            // The cluster is unreachable, likely already deprovisioning.
            // Pull the claim out of circulation so the next attempt gets
            // a different cluster.
            warn!(claim = %view.name, cluster = %cluster, error = %error, "Cluster unreachable, releasing claim");
            if let Err(clear_error) = hub.clear_assignment(&view.name).await {
                warn!(claim = %view.name, error = %clear_error, "Releasing claim failed");
            }
            Err(AssignError::ClusterUnavailable)
        }
    }
}

/// Fetch the cluster's URLs and credentials and install the caller's
/// password. Returns the web console URL and the user kubeconfig.
async fn prepare_cluster(
    hub: &HubClient,
    cluster: &str,
    password: &str,
) -> anyhow::Result<(String, String)> {
    let deployment = hub
        .get_deployment(cluster)
        .await
        .context("reading cluster deployment")?;
    let web_console_url = console_url(&deployment).unwrap_or_default();
    let admin_secret_name = admin_kubeconfig_secret(&deployment)
        .with_context(|| format!("deployment {cluster} has no admin kubeconfig reference"))?;

    let admin_kubeconfig = hub
        .read_kubeconfig(cluster, &admin_secret_name)
        .await
        .context("reading admin kubeconfig")?
        .with_context(|| format!("secret {admin_secret_name} holds no kubeconfig"))?;

    let user_secret_name = prelude_kubeconfig::user_secret_name(&admin_secret_name);
    let user_kubeconfig = hub
        .read_kubeconfig(cluster, &user_secret_name)
        .await
        .context("reading user kubeconfig")?
        .with_context(|| format!("secret {user_secret_name} holds no kubeconfig"))?;

    let spoke = SpokeClient::connect(&admin_kubeconfig)
        .await
        .context("connecting to cluster")?;
    htpasswd::ensure_password(&spoke, password)
        .await
        .context("installing password")?;

    Ok((web_console_url, user_kubeconfig))
}

/// Expiry of an existing assignment: creation plus stored lifetime.
fn expiry_of(view: &ClaimView) -> Option<DateTime<Utc>> {
    let created = view.created_at?;
    let lifetime = parse_duration(view.lifetime.as_deref()?).ok()?;
    Some(created + lifetime)
}

/// Derive the AI console URL from the web console URL.
pub fn ai_console_url(web_console_url: &str) -> String {
    let rewritten =
        web_console_url.replacen(WEB_CONSOLE_HOST_SEGMENT, AI_CONSOLE_HOST_SEGMENT, 1);
    format!("{rewritten}{AI_CONSOLE_SUFFIX}")
}

/// Readiness probe: has the assigned cluster's authentication stack
/// finished rolling the new identity provider?
///
/// Never fails outward — any miss along the chain reads as "not ready".
pub async fn cluster_ready(state: &AppState, phone: &str) -> bool {
    match probe_cluster(state, phone).await {
        Ok(ready) => ready,
        Err(error) => {
            info!(phone, error = %error, "Readiness probe fell short");
            false
        }
    }
}

async fn probe_cluster(state: &AppState, phone: &str) -> anyhow::Result<bool> {
    let hub = state.hub();
    let pool = &state.config().cluster_pool;

    let claims = hub.list_pool_claims(pool).await?;
    let cluster = claims
        .iter()
        .find(|(_, view)| view.labels.phone.as_deref() == Some(phone))
        .and_then(|(_, view)| view.cluster_id.clone())
        .ok_or_else(|| anyhow!("no claim for this phone"))?;

    let deployment = hub.get_deployment(&cluster).await?;
    let admin_secret_name =
        admin_kubeconfig_secret(&deployment).ok_or_else(|| anyhow!("no kubeconfig reference"))?;
    let admin_kubeconfig = hub
        .read_kubeconfig(&cluster, &admin_secret_name)
        .await?
        .ok_or_else(|| anyhow!("empty kubeconfig secret"))?;

    let spoke = SpokeClient::connect(&admin_kubeconfig).await?;
    let operator = spoke.operators_api().get(AUTHENTICATION_OPERATOR).await?;
    Ok(crate::hub::has_condition(
        &operator.data,
        "Progressing",
        "False",
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn ai_console_url_rewrites_host_and_appends_suffix() {
        let url = ai_console_url(
            "https://console-openshift-console.apps.roadshow-abc.example.com",
        );
        assert_eq!(
            url,
            "https://data-science-gateway.apps.roadshow-abc.example.com/learning-resources?&keyword=prelude"
        );
    }

    #[test]
    fn ai_console_url_of_empty_console_is_just_the_suffix() {
        assert_eq!(ai_console_url(""), AI_CONSOLE_SUFFIX);
    }

    #[test]
    fn expiry_is_creation_plus_lifetime() {
        let created = Utc::now() - Duration::minutes(30);
        let view = ClaimView {
            name: "prelude1".to_string(),
            pool: Some("roadshow".to_string()),
            cluster_id: Some("roadshow-abc".to_string()),
            lifetime: Some("2h30m".to_string()),
            created_at: Some(created),
            labels: Default::default(),
        };
        assert_eq!(expiry_of(&view), Some(created + Duration::minutes(150)));
    }

    #[test]
    fn expiry_needs_both_creation_and_lifetime() {
        let mut view = ClaimView {
            name: "prelude1".to_string(),
            pool: None,
            cluster_id: None,
            lifetime: None,
            created_at: Some(Utc::now()),
            labels: Default::default(),
        };
        assert_eq!(expiry_of(&view), None);
        view.lifetime = Some("not a duration".to_string());
        assert_eq!(expiry_of(&view), None);
    }
}
