//! Pool autoscaler background worker.
//!
//! Keeps the number of open claims for the pool at the effective
//! target, where the target itself breathes between a base and a
//! maximum according to demand (see `prelude_claimstate::scale`). The
//! loop is driven by a bounded watch on the pool's deployments with a
//! fallback timeout, so it reacts to newly provisioned clusters quickly
//! and still re-reconciles during quiet stretches.

use std::collections::HashSet;
use std::time::Duration;

use anyhow::{bail, Result};
use chrono::Utc;
use prelude_claimstate::{claims_needed, missing_claim_names, ScaleDecision, ScalePolicy, ScaleState};
use tokio::sync::watch;
use tracing::{info, instrument, warn};

use crate::hub::deployments::is_provisioned;
use crate::hub::{sleep_or_shutdown, HubClient, WatchOutcome, POOL_NAME_LABEL, STORE_RETRY_SECS};

/// Budget for the initial wait until the pool has one provisioned
/// cluster. The pool provisioning from nothing takes tens of minutes.
const PROVISION_WAIT_BUDGET: chrono::Duration = chrono::Duration::minutes(100);

/// Pool autoscaler worker.
pub struct AutoscalerWorker {
    hub: HubClient,
    pool: String,
    claim_prefix: String,
    policy: ScalePolicy,
}

impl AutoscalerWorker {
    pub fn new(hub: HubClient, pool: String, claim_prefix: String, policy: ScalePolicy) -> Self {
        Self {
            hub,
            pool,
            claim_prefix,
            policy,
        }
    }

    /// Run until shutdown is signaled. Fatal only when the pool never
    /// provisions at all.
    #[instrument(skip(self, shutdown), fields(pool = %self.pool))]
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        info!(
            base = self.policy.base,
            max = self.policy.max,
            increment = self.policy.increment,
            available_threshold = self.policy.available_threshold,
            "Starting autoscaler"
        );

        if !self.wait_for_provisioned(&mut shutdown).await? {
            return Ok(());
        }

        let mut state = ScaleState::new(&self.policy);

        loop {
            if *shutdown.borrow() {
                break;
            }

            self.tick(&mut state).await;

            match self.wait_for_deployment_change(&mut shutdown).await {
                Ok(WatchOutcome::Cancelled) => break,
                Ok(_) => {}
                Err(error) => {
                    warn!(error = %error, "Deployment watch failed");
                    if sleep_or_shutdown(Duration::from_secs(STORE_RETRY_SECS), &mut shutdown)
                        .await
                    {
                        break;
                    }
                }
            }
        }

        info!("Autoscaler shutting down");
        Ok(())
    }

    /// One reconcile pass: update the effective target from pool
    /// demand, then open any missing claims.
    async fn tick(&self, state: &mut ScaleState) {
        match self.count_available_and_ready().await {
            Ok((available, ready)) => {
                match state.observe(&self.policy, Utc::now(), available, ready) {
                    ScaleDecision::Hold => {}
                    ScaleDecision::ScaleUp { from, to } => {
                        info!(available, from, to, max = self.policy.max, "Raised claim target");
                    }
                    ScaleDecision::CoolingDown { since_last } => {
                        info!(
                            available,
                            minutes_since_last = since_last.num_minutes(),
                            "Scale-up wanted, waiting for previous one to take effect"
                        );
                    }
                    ScaleDecision::AvailabilityTimerStarted { available } => {
                        info!(available, "Claims available, scale-down timer started");
                    }
                    ScaleDecision::ScaleDown { from, to } => {
                        info!(from, to, "Claim target back to base after sustained availability");
                    }
                }
            }
            Err(error) => warn!(error = %error, "Counting claims failed"),
        }

        if let Err(error) = self.reconcile_claims(state.target()).await {
            warn!(error = %error, "Claim reconciliation failed");
        }
    }

    async fn count_available_and_ready(&self) -> Result<(usize, usize), kube::Error> {
        let claims = self.hub.list_pool_claims(&self.pool).await?;
        let ready = claims.iter().filter(|(_, v)| v.labels.is_ready()).count();
        let available = claims
            .iter()
            .filter(|(_, v)| v.labels.is_available())
            .count();
        Ok((available, ready))
    }

    async fn reconcile_claims(&self, target: usize) -> Result<(), kube::Error> {
        let provisioned = self
            .hub
            .list_pool_deployments(&self.pool)
            .await?
            .iter()
            .filter(|d| is_provisioned(d))
            .count();

        let existing: HashSet<String> = self
            .hub
            .list_pool_claims(&self.pool)
            .await?
            .into_iter()
            .map(|(_, view)| view.name)
            .collect();

        let needed = claims_needed(target, provisioned, existing.len());
        if needed == 0 {
            return Ok(());
        }
        info!(
            provisioned,
            existing = existing.len(),
            target,
            needed,
            "Opening claims"
        );

        for name in missing_claim_names(&self.claim_prefix, &existing, needed) {
            self.hub.create_claim(&name, &self.pool).await?;
        }
        Ok(())
    }

    /// Park on a bounded watch until a provisioned deployment for the
    /// pool is added or modified.
    async fn wait_for_deployment_change(
        &self,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<WatchOutcome, kube::Error> {
        let selector = format!("{POOL_NAME_LABEL}={}", self.pool);
        let api = self.hub.deployments_api_all();
        let list = api
            .list(&kube::api::ListParams::default().labels(&selector))
            .await?;
        let version = list.metadata.resource_version.unwrap_or_default();
        crate::hub::wait_for_update(&api, Some(&selector), &version, shutdown, is_provisioned)
            .await
    }

    /// Block until the pool has at least one provisioned deployment.
    /// Returns false when shutdown arrived first.
    async fn wait_for_provisioned(&self, shutdown: &mut watch::Receiver<bool>) -> Result<bool> {
        info!("Waiting for the pool to provision");
        let deadline = Utc::now() + PROVISION_WAIT_BUDGET;

        loop {
            if *shutdown.borrow() {
                return Ok(false);
            }
            if Utc::now() > deadline {
                bail!(
                    "pool {} had no provisioned cluster within {PROVISION_WAIT_BUDGET}",
                    self.pool
                );
            }

            match self.hub.list_pool_deployments(&self.pool).await {
                Ok(deployments) => {
                    if deployments.iter().any(is_provisioned) {
                        info!("Pool has a provisioned cluster");
                        return Ok(true);
                    }
                }
                Err(error) => {
                    warn!(error = %error, "Listing deployments failed");
                    if sleep_or_shutdown(Duration::from_secs(STORE_RETRY_SECS), shutdown).await {
                        return Ok(false);
                    }
                    continue;
                }
            }

            match self.wait_for_deployment_change(shutdown).await {
                Ok(WatchOutcome::Cancelled) => return Ok(false),
                Ok(_) => {}
                Err(error) => {
                    warn!(error = %error, "Deployment watch failed");
                    if sleep_or_shutdown(Duration::from_secs(STORE_RETRY_SECS), shutdown).await {
                        return Ok(false);
                    }
                }
            }
        }
    }
}
