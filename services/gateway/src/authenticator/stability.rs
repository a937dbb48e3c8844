//! The stability gate.
//!
//! A freshly bound cluster is still rolling out operators; minting
//! credentials against it too early produces certificates that the
//! authentication stack then churns away. The gate holds until every
//! cluster operator reports healthy continuously for a minimum period,
//! within an overall budget.

use std::time::Duration;

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use kube::api::{DynamicObject, ListParams};
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::hub::{has_condition, sleep_or_shutdown};
use crate::spoke::SpokeClient;

/// How long every operator must stay healthy before the gate opens.
const STABLE_HOLD: chrono::Duration = chrono::Duration::seconds(120);

/// Overall budget for one claim's gate.
const STABLE_BUDGET: chrono::Duration = chrono::Duration::minutes(30);

/// Spacing between operator polls.
const POLL_INTERVAL: Duration = Duration::from_secs(10);

/// One operator set observation: healthy or not.
///
/// Healthy means every operator is simultaneously Available=True,
/// Progressing=False, Degraded=False. An empty operator list is not
/// healthy; it means the cluster has not even published its operators.
pub fn operators_stable(operators: &[DynamicObject]) -> bool {
    if operators.is_empty() {
        return false;
    }
    operators.iter().all(|operator| {
        has_condition(&operator.data, "Available", "True")
            && has_condition(&operator.data, "Progressing", "False")
            && has_condition(&operator.data, "Degraded", "False")
    })
}

/// Tracks how long stability has held. Any unhealthy observation or
/// read error resets the hold.
#[derive(Debug, Default)]
pub struct HoldTracker {
    stable_since: Option<DateTime<Utc>>,
}

impl HoldTracker {
    /// Record one observation; returns true once stability has held
    /// for the full period.
    pub fn observe(&mut self, stable: bool, now: DateTime<Utc>) -> bool {
        if !stable {
            self.stable_since = None;
            return false;
        }
        let since = *self.stable_since.get_or_insert(now);
        now - since >= STABLE_HOLD
    }

    pub fn reset(&mut self) {
        self.stable_since = None;
    }
}

/// Block until the cluster has been stable for the hold period, the
/// budget runs out, or shutdown is signaled.
pub async fn wait_for_stable(
    spoke: &SpokeClient,
    cluster: &str,
    shutdown: &mut watch::Receiver<bool>,
) -> Result<()> {
    let api = spoke.operators_api();
    let deadline = Utc::now() + STABLE_BUDGET;
    let mut tracker = HoldTracker::default();

    loop {
        let now = Utc::now();
        if now > deadline {
            bail!("cluster {cluster} did not stabilize within {STABLE_BUDGET}");
        }

        match api.list(&ListParams::default()).await {
            Ok(list) => {
                let stable = operators_stable(&list.items);
                if tracker.observe(stable, now) {
                    return Ok(());
                }
                debug!(cluster, stable, "Stability poll");
            }
            Err(error) => {
                warn!(cluster, error = %error, "Operator read failed, resetting stability hold");
                tracker.reset();
            }
        }

        if sleep_or_shutdown(POLL_INTERVAL, shutdown).await {
            bail!("shutdown while waiting for cluster {cluster} to stabilize");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn operator(available: &str, progressing: &str, degraded: &str) -> DynamicObject {
        serde_json::from_value(json!({
            "apiVersion": "config.openshift.io/v1",
            "kind": "ClusterOperator",
            "metadata": {"name": "authentication"},
            "status": {
                "conditions": [
                    {"type": "Available", "status": available},
                    {"type": "Progressing", "status": progressing},
                    {"type": "Degraded", "status": degraded},
                ]
            }
        }))
        .unwrap()
    }

    #[test]
    fn all_healthy_operators_are_stable() {
        let operators = vec![
            operator("True", "False", "False"),
            operator("True", "False", "False"),
        ];
        assert!(operators_stable(&operators));
    }

    #[test]
    fn one_unhealthy_operator_spoils_the_set() {
        for bad in [
            operator("False", "False", "False"),
            operator("True", "True", "False"),
            operator("True", "False", "True"),
        ] {
            let operators = vec![operator("True", "False", "False"), bad];
            assert!(!operators_stable(&operators));
        }
    }

    #[test]
    fn empty_operator_list_is_not_stable() {
        assert!(!operators_stable(&[]));
    }

    #[test]
    fn hold_opens_only_after_continuous_stability() {
        let mut tracker = HoldTracker::default();
        let t0 = Utc::now();

        assert!(!tracker.observe(true, t0));
        assert!(!tracker.observe(true, t0 + chrono::Duration::seconds(60)));
        assert!(tracker.observe(true, t0 + chrono::Duration::seconds(120)));
    }

    #[test]
    fn instability_resets_the_hold() {
        let mut tracker = HoldTracker::default();
        let t0 = Utc::now();

        assert!(!tracker.observe(true, t0));
        assert!(!tracker.observe(false, t0 + chrono::Duration::seconds(110)));
        // The clock restarts from the next stable reading.
        assert!(!tracker.observe(true, t0 + chrono::Duration::seconds(120)));
        assert!(!tracker.observe(true, t0 + chrono::Duration::seconds(230)));
        assert!(tracker.observe(true, t0 + chrono::Duration::seconds(240)));
    }
}
