//! Authenticator background worker.
//!
//! Watches for claims that the orchestrator has bound to a cluster but
//! whose credentials have not been sealed yet, and takes each one
//! through the sealing flow: stability gate, fresh admin and user
//! credentials via the cluster's signing flow, credential writeback to
//! the hub, and bootstrap objects on the cluster itself. The seal label
//! is written last, so a crash anywhere earlier just means the claim is
//! picked up again on the next pass — every prior step is idempotent.

pub mod ca;
pub mod csr;
pub mod stability;

use std::time::Duration;

use anyhow::{Context, Result};
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::ByteString;
use kube::api::PostParams;
use tokio::sync::watch;
use tracing::{error, info, instrument, warn};

use crate::htpasswd::{HTPASSWD_KEY, HTPASSWD_SECRET, IDENTITY_NAMESPACE};
use crate::hub::claims::{is_not_found, ClaimView};
use crate::hub::deployments::admin_kubeconfig_secret;
use crate::hub::{sleep_or_shutdown, HubClient, WatchOutcome, STORE_RETRY_SECS};
use crate::spoke::SpokeClient;

/// Signing request name for the cluster-admin identity.
const SYSTEM_ADMIN_REQUEST: &str = "auth2kube-systemadmin-access";

/// Signing request name for the workshop user identity.
const USER_REQUEST: &str = "auth2kube-admin-access";

/// Configmap seeded on each sealed cluster.
const BOOTSTRAP_CONFIGMAP: &str = "prelude";

/// Authenticator worker: seals bound claims exactly once each.
pub struct AuthenticatorWorker {
    hub: HubClient,
    pool: String,
}

impl AuthenticatorWorker {
    pub fn new(hub: HubClient, pool: String) -> Self {
        Self { hub, pool }
    }

    /// Run until shutdown is signaled.
    #[instrument(skip(self, shutdown), fields(pool = %self.pool))]
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!("Starting authenticator");

        loop {
            if *shutdown.borrow() {
                break;
            }

            self.seal_pending_claims(&mut shutdown).await;

            // Sit on a bounded watch until the claim set moves, then
            // re-reconcile. Expiry re-reconciles too, which doubles as
            // the retry path for claims that failed this pass.
            match self.hub.claims_resource_version().await {
                Ok(version) => {
                    let api = self.hub.claims_api();
                    match crate::hub::wait_for_update(&api, None, &version, &mut shutdown, |_| {
                        true
                    })
                    .await
                    {
                        Ok(WatchOutcome::Cancelled) => break,
                        Ok(_) => {}
                        Err(error) => {
                            warn!(error = %error, "Claim watch failed");
                            if sleep_or_shutdown(
                                Duration::from_secs(STORE_RETRY_SECS),
                                &mut shutdown,
                            )
                            .await
                            {
                                break;
                            }
                        }
                    }
                }
                Err(error) => {
                    warn!(error = %error, "Claim list failed");
                    if sleep_or_shutdown(Duration::from_secs(STORE_RETRY_SECS), &mut shutdown)
                        .await
                    {
                        break;
                    }
                }
            }
        }

        info!("Authenticator shutting down");
    }

    /// One pass over the pool: seal every bound, unsealed claim.
    /// Failures are logged and skipped; the claim is retried on the
    /// next pass.
    async fn seal_pending_claims(&self, shutdown: &mut watch::Receiver<bool>) {
        let claims = match self.hub.list_pool_claims(&self.pool).await {
            Ok(claims) => claims,
            Err(error) => {
                warn!(error = %error, "Listing claims failed");
                return;
            }
        };

        for (_, view) in claims {
            if *shutdown.borrow() {
                return;
            }
            if view.labels.auth_done {
                continue;
            }
            let Some(cluster) = view.cluster_id.clone() else {
                continue;
            };

            info!(claim = %view.name, cluster = %cluster, "Sealing claim");
            if let Err(error) = self.seal_claim(&view, &cluster, shutdown).await {
                error!(claim = %view.name, cluster = %cluster, error = %error, "Sealing failed");
                continue;
            }

            if let Err(error) = self.hub.mark_authenticated(&view.name).await {
                error!(claim = %view.name, error = %error, "Committing seal label failed");
                continue;
            }
            info!(claim = %view.name, cluster = %cluster, "Claim sealed");
        }
    }

    /// The sealing flow for one claim. The seal label itself is written
    /// by the caller, strictly after this returns.
    async fn seal_claim(
        &self,
        claim: &ClaimView,
        cluster: &str,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<()> {
        let deployment = self
            .hub
            .get_deployment(cluster)
            .await
            .context("reading cluster deployment")?;
        let admin_secret_name = admin_kubeconfig_secret(&deployment)
            .with_context(|| format!("deployment {cluster} has no admin kubeconfig reference"))?;

        let original_kubeconfig = self
            .hub
            .read_kubeconfig(cluster, &admin_secret_name)
            .await
            .context("reading admin kubeconfig secret")?
            .with_context(|| format!("secret {admin_secret_name} holds no kubeconfig"))?;

        let spoke = SpokeClient::connect(&original_kubeconfig)
            .await
            .context("connecting to cluster")?;

        stability::wait_for_stable(&spoke, cluster, shutdown).await?;
        info!(claim = %claim.name, cluster, "Cluster is stable");

        let admin_kubeconfig =
            csr::mint_kubeconfig(&spoke, "system:admin", SYSTEM_ADMIN_REQUEST, shutdown)
                .await
                .context("minting cluster-admin credentials")?;
        self.hub
            .write_kubeconfig(cluster, &admin_secret_name, &admin_kubeconfig)
            .await
            .context("storing admin kubeconfig")?;
        info!(cluster, secret = %admin_secret_name, "Admin kubeconfig replaced");

        let user_kubeconfig = csr::mint_kubeconfig(&spoke, "admin", USER_REQUEST, shutdown)
            .await
            .context("minting user credentials")?;
        let user_secret_name = prelude_kubeconfig::user_secret_name(&admin_secret_name);
        self.hub
            .write_kubeconfig(cluster, &user_secret_name, &user_kubeconfig)
            .await
            .context("storing user kubeconfig")?;
        info!(cluster, secret = %user_secret_name, "User kubeconfig stored");

        // Bootstrap objects are created with the new credentials; if
        // those cannot log in, sealing must not commit.
        let sealed_spoke = SpokeClient::connect(&admin_kubeconfig)
            .await
            .context("connecting with minted credentials")?;
        seed_bootstrap_objects(&sealed_spoke, cluster)
            .await
            .context("seeding bootstrap objects")?;

        Ok(())
    }
}

/// Create the identity-provider bootstrap objects if they are missing:
/// an empty marker configmap and an empty htpasswd secret.
async fn seed_bootstrap_objects(spoke: &SpokeClient, cluster: &str) -> Result<()> {
    let configmaps = spoke.configmaps_api(IDENTITY_NAMESPACE);
    match configmaps.get(BOOTSTRAP_CONFIGMAP).await {
        Ok(_) => {}
        Err(error) if is_not_found(&error) => {
            let configmap = ConfigMap {
                metadata: ObjectMeta {
                    name: Some(BOOTSTRAP_CONFIGMAP.to_string()),
                    namespace: Some(IDENTITY_NAMESPACE.to_string()),
                    ..Default::default()
                },
                ..Default::default()
            };
            configmaps
                .create(&PostParams::default(), &configmap)
                .await
                .context("creating bootstrap configmap")?;
            info!(cluster, "Created bootstrap configmap");
        }
        Err(error) => return Err(error).context("checking bootstrap configmap"),
    }

    let secrets = spoke.secrets_api(IDENTITY_NAMESPACE);
    match secrets.get(HTPASSWD_SECRET).await {
        Ok(_) => {}
        Err(error) if is_not_found(&error) => {
            let mut data = std::collections::BTreeMap::new();
            data.insert(HTPASSWD_KEY.to_string(), ByteString(Vec::new()));
            let secret = Secret {
                metadata: ObjectMeta {
                    name: Some(HTPASSWD_SECRET.to_string()),
                    namespace: Some(IDENTITY_NAMESPACE.to_string()),
                    ..Default::default()
                },
                data: Some(data),
                ..Default::default()
            };
            secrets
                .create(&PostParams::default(), &secret)
                .await
                .context("creating htpasswd secret")?;
            info!(cluster, "Created empty htpasswd secret");
        }
        Err(error) => return Err(error).context("checking htpasswd secret"),
    }

    Ok(())
}
