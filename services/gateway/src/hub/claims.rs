//! Claim access and label transitions.
//!
//! Every mutation here is a single optimistic `replace`: the object's
//! stored resource version rides along, so two writers racing on the
//! same claim cannot both win.

use chrono::{DateTime, Utc};
use kube::api::{DynamicObject, ListParams, PostParams};
use kube::ResourceExt;
use prelude_claimstate::{
    ClaimLabels, AUTH_DONE, AUTH_LABEL, FINGERPRINT_LABEL, PHONE_LABEL,
};
use serde_json::json;
use tracing::info;

use super::{HubClient, POOL_NAMESPACE};

/// Parsed view of one claim.
#[derive(Debug, Clone)]
pub struct ClaimView {
    pub name: String,
    pub pool: Option<String>,
    /// Namespace of the bound cluster; unset until the orchestrator
    /// satisfies the claim.
    pub cluster_id: Option<String>,
    pub lifetime: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub labels: ClaimLabels,
}

impl ClaimView {
    pub fn from_object(obj: &DynamicObject) -> Self {
        let spec_str = |field: &str| {
            obj.data
                .get("spec")
                .and_then(|s| s.get(field))
                .and_then(|v| v.as_str())
                .map(str::to_string)
        };
        Self {
            name: obj.name_any(),
            pool: spec_str("clusterPoolName"),
            cluster_id: spec_str("namespace"),
            lifetime: spec_str("lifetime"),
            created_at: obj.metadata.creation_timestamp.as_ref().map(|t| t.0),
            labels: ClaimLabels::from_map(obj.labels()),
        }
    }

    pub fn matches_pool(&self, pool: &str) -> bool {
        self.pool.as_deref() == Some(pool)
    }

    /// Wall-clock age, zero when the creation timestamp is missing.
    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        self.created_at
            .map(|created| now - created)
            .unwrap_or_else(chrono::Duration::zero)
    }
}

impl HubClient {
    /// List every claim in the pool namespace, paired with its view.
    pub async fn list_claims(&self) -> Result<Vec<(DynamicObject, ClaimView)>, kube::Error> {
        let list = self.claims_api().list(&ListParams::default()).await?;
        Ok(list
            .items
            .into_iter()
            .map(|obj| {
                let view = ClaimView::from_object(&obj);
                (obj, view)
            })
            .collect())
    }

    /// List claims belonging to one pool.
    pub async fn list_pool_claims(
        &self,
        pool: &str,
    ) -> Result<Vec<(DynamicObject, ClaimView)>, kube::Error> {
        let mut claims = self.list_claims().await?;
        claims.retain(|(_, view)| view.matches_pool(pool));
        Ok(claims)
    }

    /// Open a new claim against the pool.
    ///
    /// The orchestrator expects each claim to grant `system:masters`
    /// access on the cluster it binds.
    pub async fn create_claim(&self, name: &str, pool: &str) -> Result<(), kube::Error> {
        let mut claim = DynamicObject::new(name, &self.claim_ar).within(POOL_NAMESPACE);
        claim.data = json!({
            "spec": {
                "clusterPoolName": pool,
                "subjects": [
                    {
                        "kind": "Group",
                        "apiGroup": "rbac.authorization.k8s.io",
                        "name": "system:masters",
                    }
                ],
            }
        });
        self.claims_api()
            .create(&PostParams::default(), &claim)
            .await?;
        info!(claim = name, pool, "Claim created");
        Ok(())
    }

    /// Bind a user to a claim in one optimistic update: phone and
    /// fingerprint labels plus the extended lifetime land together.
    pub async fn assign_claim(
        &self,
        obj: &DynamicObject,
        phone: &str,
        fingerprint: &str,
        lifetime: &str,
    ) -> Result<(), kube::Error> {
        let mut updated = obj.clone();
        {
            let labels = updated.labels_mut();
            labels.insert(PHONE_LABEL.to_string(), phone.to_string());
            if !fingerprint.is_empty() {
                labels.insert(FINGERPRINT_LABEL.to_string(), fingerprint.to_string());
            }
        }
        updated.data["spec"]["lifetime"] = json!(lifetime);

        let name = updated.name_any();
        self.claims_api()
            .replace(&name, &PostParams::default(), &updated)
            .await?;
        Ok(())
    }

    /// Record the caller's fingerprint on a claim they already hold.
    pub async fn backfill_fingerprint(
        &self,
        obj: &DynamicObject,
        fingerprint: &str,
    ) -> Result<(), kube::Error> {
        let mut updated = obj.clone();
        updated
            .labels_mut()
            .insert(FINGERPRINT_LABEL.to_string(), fingerprint.to_string());
        let name = updated.name_any();
        self.claims_api()
            .replace(&name, &PostParams::default(), &updated)
            .await?;
        Ok(())
    }

    /// Stamp a claim as sealed. Always works from a fresh read so the
    /// label write cannot clobber a concurrent assignment.
    pub async fn mark_authenticated(&self, name: &str) -> Result<(), kube::Error> {
        let api = self.claims_api();
        let mut claim = api.get(name).await?;
        claim
            .labels_mut()
            .insert(AUTH_LABEL.to_string(), AUTH_DONE.to_string());
        api.replace(name, &PostParams::default(), &claim).await?;
        Ok(())
    }

    /// Strip the assignment and seal labels from a claim, removing it
    /// from circulation until the authenticator re-seals it.
    pub async fn clear_assignment(&self, name: &str) -> Result<(), kube::Error> {
        let api = self.claims_api();
        let mut claim = api.get(name).await?;
        {
            let labels = claim.labels_mut();
            labels.remove(PHONE_LABEL);
            labels.remove(AUTH_LABEL);
            labels.remove(FINGERPRINT_LABEL);
        }
        api.replace(name, &PostParams::default(), &claim).await?;
        info!(claim = name, "Assignment and seal labels cleared");
        Ok(())
    }

    /// Resource version of the claim collection, for bounded watches.
    pub async fn claims_resource_version(&self) -> Result<String, kube::Error> {
        let list = self.claims_api().list(&ListParams::default()).await?;
        Ok(list.metadata.resource_version.unwrap_or_default())
    }
}

/// True when the store rejected an optimistic update because someone
/// else won the race.
pub fn is_conflict(error: &kube::Error) -> bool {
    matches!(error, kube::Error::Api(response) if response.code == 409)
}

/// True when the store reports the object missing.
pub fn is_not_found(error: &kube::Error) -> bool {
    matches!(error, kube::Error::Api(response) if response.code == 404)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn claim_object(value: serde_json::Value) -> DynamicObject {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn parses_a_bound_claim() {
        let obj = claim_object(json!({
            "apiVersion": "hive.openshift.io/v1",
            "kind": "ClusterClaim",
            "metadata": {
                "name": "prelude1",
                "namespace": "cluster-pools",
                "creationTimestamp": "2025-06-01T12:00:00Z",
                "labels": {
                    "prelude-auth": "done",
                    "prelude": "61-435-999-768",
                    "prelude-fp": "abc123deadbeef01",
                },
            },
            "spec": {
                "clusterPoolName": "roadshow",
                "namespace": "roadshow-abc",
                "lifetime": "4h30m",
            },
        }));

        let view = ClaimView::from_object(&obj);
        assert_eq!(view.name, "prelude1");
        assert!(view.matches_pool("roadshow"));
        assert!(!view.matches_pool("other"));
        assert_eq!(view.cluster_id.as_deref(), Some("roadshow-abc"));
        assert_eq!(view.lifetime.as_deref(), Some("4h30m"));
        assert!(view.labels.auth_done);
        assert_eq!(view.labels.phone.as_deref(), Some("61-435-999-768"));
    }

    #[test]
    fn unbound_claim_has_no_cluster() {
        let obj = claim_object(json!({
            "apiVersion": "hive.openshift.io/v1",
            "kind": "ClusterClaim",
            "metadata": {"name": "prelude2", "namespace": "cluster-pools"},
            "spec": {"clusterPoolName": "roadshow"},
        }));

        let view = ClaimView::from_object(&obj);
        assert!(view.cluster_id.is_none());
        assert!(view.created_at.is_none());
        assert!(!view.labels.auth_done);
    }
}
