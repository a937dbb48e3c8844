//! Cluster deployment lookups.
//!
//! Deployments are the orchestrator's record of each provisioned
//! cluster: one per cluster namespace, carrying the console URL, the
//! admin kubeconfig reference, and provisioning state.

use chrono::{DateTime, Utc};
use kube::api::{DynamicObject, ListParams};
use kube::ResourceExt;
use serde_json::Value;

use super::{has_condition, HubClient, POOL_NAME_LABEL};

/// Parsed view of one cluster deployment.
#[derive(Debug, Clone)]
pub struct DeploymentView {
    pub name: String,
    pub namespace: String,
    pub platform: String,
    pub region: String,
    pub version: String,
    pub provision_status: String,
    pub power_state: String,
    pub created_at: Option<DateTime<Utc>>,
}

impl DeploymentView {
    pub fn from_object(obj: &DynamicObject) -> Self {
        let (platform, region) = platform_and_region(&obj.data);
        Self {
            name: obj.name_any(),
            namespace: obj.namespace().unwrap_or_default(),
            platform,
            region,
            version: status_str(&obj.data, "installVersion"),
            provision_status: provision_status(&obj.data),
            power_state: status_str(&obj.data, "powerState"),
            created_at: obj.metadata.creation_timestamp.as_ref().map(|t| t.0),
        }
    }
}

impl HubClient {
    /// List the deployments backing one pool, across all namespaces.
    pub async fn list_pool_deployments(
        &self,
        pool: &str,
    ) -> Result<Vec<DynamicObject>, kube::Error> {
        let selector = format!("{POOL_NAME_LABEL}={pool}");
        let list = self
            .deployments_api_all()
            .list(&ListParams::default().labels(&selector))
            .await?;
        Ok(list.items)
    }

    /// Fetch the deployment for a bound cluster. Deployment name and
    /// namespace both equal the cluster id.
    pub async fn get_deployment(&self, cluster_id: &str) -> Result<DynamicObject, kube::Error> {
        self.deployments_api(cluster_id).get(cluster_id).await
    }
}

/// A deployment is provisioned once the orchestrator says so.
pub fn is_provisioned(obj: &DynamicObject) -> bool {
    has_condition(&obj.data, "Provisioned", "True")
}

/// Console URL of the cluster, once installation published it.
pub fn console_url(obj: &DynamicObject) -> Option<String> {
    obj.data
        .get("status")
        .and_then(|s| s.get("webConsoleURL"))
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// Name of the secret holding the cluster's admin kubeconfig.
pub fn admin_kubeconfig_secret(obj: &DynamicObject) -> Option<String> {
    obj.data
        .get("spec")
        .and_then(|s| s.get("clusterMetadata"))
        .and_then(|m| m.get("adminKubeconfigSecretRef"))
        .and_then(|r| r.get("name"))
        .and_then(Value::as_str)
        .map(str::to_string)
}

fn status_str(data: &Value, field: &str) -> String {
    data.get("status")
        .and_then(|s| s.get(field))
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn provision_status(data: &Value) -> String {
    if has_condition(data, "Provisioned", "True") {
        return "Provisioned".to_string();
    }
    if has_condition(data, "Provisioning", "True") {
        return "Provisioning".to_string();
    }
    String::new()
}

fn platform_and_region(data: &Value) -> (String, String) {
    let Some(platform) = data
        .get("spec")
        .and_then(|s| s.get("platform"))
        .and_then(Value::as_object)
    else {
        return (String::new(), String::new());
    };
    for (name, value) in platform {
        if let Some(settings) = value.as_object() {
            let region = settings
                .get("region")
                .and_then(Value::as_str)
                .unwrap_or_default();
            return (name.clone(), region.to_string());
        }
    }
    (String::new(), String::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn deployment(value: serde_json::Value) -> DynamicObject {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn parses_a_provisioned_deployment() {
        let obj = deployment(json!({
            "apiVersion": "hive.openshift.io/v1",
            "kind": "ClusterDeployment",
            "metadata": {
                "name": "roadshow-abc",
                "namespace": "roadshow-abc",
                "creationTimestamp": "2025-06-01T09:00:00Z",
            },
            "spec": {
                "platform": {"aws": {"region": "ap-southeast-2"}},
                "clusterMetadata": {
                    "adminKubeconfigSecretRef": {"name": "roadshow-abc-admin-kubeconfig"},
                },
            },
            "status": {
                "conditions": [{"type": "Provisioned", "status": "True"}],
                "webConsoleURL": "https://console-openshift-console.apps.roadshow-abc.example.com",
                "powerState": "Running",
                "installVersion": "4.17.3",
            },
        }));

        assert!(is_provisioned(&obj));
        assert_eq!(
            console_url(&obj).unwrap(),
            "https://console-openshift-console.apps.roadshow-abc.example.com"
        );
        assert_eq!(
            admin_kubeconfig_secret(&obj).unwrap(),
            "roadshow-abc-admin-kubeconfig"
        );

        let view = DeploymentView::from_object(&obj);
        assert_eq!(view.platform, "aws");
        assert_eq!(view.region, "ap-southeast-2");
        assert_eq!(view.version, "4.17.3");
        assert_eq!(view.provision_status, "Provisioned");
        assert_eq!(view.power_state, "Running");
    }

    #[test]
    fn provisioning_state_before_completion() {
        let obj = deployment(json!({
            "apiVersion": "hive.openshift.io/v1",
            "kind": "ClusterDeployment",
            "metadata": {"name": "d", "namespace": "d"},
            "status": {
                "conditions": [{"type": "Provisioning", "status": "True"}],
            },
        }));
        assert!(!is_provisioned(&obj));
        assert_eq!(DeploymentView::from_object(&obj).provision_status, "Provisioning");
        assert!(console_url(&obj).is_none());
        assert!(admin_kubeconfig_secret(&obj).is_none());
    }
}
