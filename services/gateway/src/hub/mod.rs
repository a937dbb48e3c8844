//! Hub data-plane adapter.
//!
//! The hub cluster's API is the shared store the three control loops
//! coordinate through. This module owns the resource definitions, the
//! client construction, and the list+bounded-watch plumbing; the
//! submodules add typed views over claims, deployments, and the
//! kubeconfig secrets.

pub mod claims;
pub mod deployments;
pub mod secrets;

use std::path::Path;

use anyhow::{Context, Result};
use futures::{StreamExt, TryStreamExt};
use kube::api::{Api, DynamicObject, WatchEvent, WatchParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::core::{ApiResource, GroupVersionKind};
use kube::{Client, Config};
use serde_json::Value;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Namespace holding the pool's claims.
pub const POOL_NAMESPACE: &str = "cluster-pools";

/// Label tying a deployment to its pool.
pub const POOL_NAME_LABEL: &str = "hive.openshift.io/clusterpool-name";

/// Bounded watch timeout; loops re-list when it expires.
pub const WATCH_TIMEOUT_SECS: u32 = 30;

/// Back-off after a transient store error.
pub const STORE_RETRY_SECS: u64 = 10;

fn claim_resource() -> ApiResource {
    ApiResource::from_gvk_with_plural(
        &GroupVersionKind::gvk("hive.openshift.io", "v1", "ClusterClaim"),
        "clusterclaims",
    )
}

fn deployment_resource() -> ApiResource {
    ApiResource::from_gvk_with_plural(
        &GroupVersionKind::gvk("hive.openshift.io", "v1", "ClusterDeployment"),
        "clusterdeployments",
    )
}

/// Cluster operator health objects, read from downstream clusters.
pub fn operator_resource() -> ApiResource {
    ApiResource::from_gvk_with_plural(
        &GroupVersionKind::gvk("config.openshift.io", "v1", "ClusterOperator"),
        "clusteroperators",
    )
}

/// Handle on the hub cluster.
#[derive(Clone)]
pub struct HubClient {
    client: Client,
    claim_ar: ApiResource,
    deployment_ar: ApiResource,
}

impl HubClient {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            claim_ar: claim_resource(),
            deployment_ar: deployment_resource(),
        }
    }

    /// Connect to the hub: explicit kubeconfig path first, then the
    /// home-directory kubeconfig, then in-cluster configuration.
    pub async fn connect(kubeconfig: Option<&Path>) -> Result<Self> {
        let config = match kubeconfig {
            Some(path) => {
                info!(path = %path.display(), "Using kubeconfig");
                config_from_file(path).await?
            }
            None => match home_kubeconfig() {
                Some(path) => {
                    info!(path = %path.display(), "Using kubeconfig");
                    config_from_file(&path).await?
                }
                None => {
                    info!("Using in-cluster config");
                    Config::incluster().context("building in-cluster config")?
                }
            },
        };
        let client = Client::try_from(config).context("building hub client")?;
        Ok(Self::new(client))
    }

    pub fn client(&self) -> Client {
        self.client.clone()
    }

    /// Claims live in one well-known namespace.
    pub fn claims_api(&self) -> Api<DynamicObject> {
        Api::namespaced_with(self.client.clone(), POOL_NAMESPACE, &self.claim_ar)
    }

    /// Deployments are spread across per-cluster namespaces.
    pub fn deployments_api_all(&self) -> Api<DynamicObject> {
        Api::all_with(self.client.clone(), &self.deployment_ar)
    }

    pub fn deployments_api(&self, namespace: &str) -> Api<DynamicObject> {
        Api::namespaced_with(self.client.clone(), namespace, &self.deployment_ar)
    }
}

async fn config_from_file(path: &Path) -> Result<Config> {
    let kubeconfig = Kubeconfig::read_from(path)
        .with_context(|| format!("reading kubeconfig {}", path.display()))?;
    Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
        .await
        .context("building config from kubeconfig")
}

fn home_kubeconfig() -> Option<std::path::PathBuf> {
    let home = std::env::var_os("HOME")?;
    let candidate = Path::new(&home).join(".kube").join("config");
    candidate.exists().then_some(candidate)
}

/// How a bounded watch ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchOutcome {
    /// An interesting object was added or modified.
    Changed,

    /// The watch window expired with nothing interesting.
    Expired,

    /// Shutdown was signaled.
    Cancelled,
}

/// Open a bounded watch at the given resource version and wait until an
/// added/modified object satisfies `interesting`, the window expires,
/// or shutdown is signaled.
pub async fn wait_for_update<F>(
    api: &Api<DynamicObject>,
    label_selector: Option<&str>,
    resource_version: &str,
    shutdown: &mut watch::Receiver<bool>,
    mut interesting: F,
) -> Result<WatchOutcome, kube::Error>
where
    F: FnMut(&DynamicObject) -> bool,
{
    let mut params = WatchParams::default().timeout(WATCH_TIMEOUT_SECS);
    if let Some(selector) = label_selector {
        params = params.labels(selector);
    }

    let mut stream = api.watch(&params, resource_version).await?.boxed();
    loop {
        tokio::select! {
            event = stream.try_next() => match event {
                Ok(Some(WatchEvent::Added(obj) | WatchEvent::Modified(obj))) => {
                    if interesting(&obj) {
                        return Ok(WatchOutcome::Changed);
                    }
                }
                Ok(Some(WatchEvent::Error(status))) => {
                    warn!(message = %status.message, "Watch error event");
                    return Ok(WatchOutcome::Expired);
                }
                Ok(Some(_)) => {}
                Ok(None) => return Ok(WatchOutcome::Expired),
                Err(error) => {
                    debug!(error = %error, "Watch stream ended");
                    return Ok(WatchOutcome::Expired);
                }
            },
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    return Ok(WatchOutcome::Cancelled);
                }
            }
        }
    }
}

/// Sleep unless shutdown is signaled first. Returns true on shutdown.
pub async fn sleep_or_shutdown(
    duration: std::time::Duration,
    shutdown: &mut watch::Receiver<bool>,
) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(duration) => false,
        changed = shutdown.changed() => changed.is_err() || *shutdown.borrow(),
    }
}

/// Read the `(type, status)` pairs out of a `status.conditions` vector.
pub fn status_conditions(data: &Value) -> Vec<(String, String)> {
    let Some(conditions) = data
        .get("status")
        .and_then(|s| s.get("conditions"))
        .and_then(Value::as_array)
    else {
        return Vec::new();
    };
    conditions
        .iter()
        .filter_map(|c| {
            let kind = c.get("type")?.as_str()?;
            let status = c.get("status")?.as_str()?;
            Some((kind.to_string(), status.to_string()))
        })
        .collect()
}

/// True when the object carries a condition of the given type and status.
pub fn has_condition(data: &Value, kind: &str, status: &str) -> bool {
    status_conditions(data)
        .iter()
        .any(|(k, s)| k == kind && s == status)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn reads_condition_vectors() {
        let data = json!({
            "status": {
                "conditions": [
                    {"type": "Available", "status": "True"},
                    {"type": "Progressing", "status": "False", "reason": "AsExpected"},
                ]
            }
        });
        assert!(has_condition(&data, "Available", "True"));
        assert!(has_condition(&data, "Progressing", "False"));
        assert!(!has_condition(&data, "Degraded", "False"));
    }

    #[test]
    fn missing_status_is_empty() {
        assert!(status_conditions(&json!({})).is_empty());
        assert!(!has_condition(&json!({"status": {}}), "Available", "True"));
    }
}
