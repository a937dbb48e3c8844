//! Downstream cluster clients.
//!
//! The loops talk to each bound cluster with credentials pulled from the
//! hub. A spoke client wraps the kube client plus the API server URL the
//! kubeconfig pointed at, which the credential minting flow needs for
//! its own TLS dial.

use anyhow::{Context, Result};
use k8s_openapi::api::certificates::v1::CertificateSigningRequest;
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use kube::api::{Api, DynamicObject};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};

use crate::hub::operator_resource;

/// Default API server port when the kubeconfig URL does not carry one.
pub const DEFAULT_API_PORT: u16 = 6443;

/// Client for one downstream cluster.
#[derive(Clone)]
pub struct SpokeClient {
    client: Client,
    server: String,
}

impl SpokeClient {
    /// Build a client from a kubeconfig document.
    pub async fn connect(kubeconfig_yaml: &str) -> Result<Self> {
        let kubeconfig =
            Kubeconfig::from_yaml(kubeconfig_yaml).context("parsing spoke kubeconfig")?;
        let config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
            .await
            .context("building spoke config")?;
        let server = server_url(&config);
        let client = Client::try_from(config).context("building spoke client")?;
        Ok(Self { client, server })
    }

    pub fn client(&self) -> Client {
        self.client.clone()
    }

    /// API server URL, scheme and authority only.
    pub fn server(&self) -> &str {
        &self.server
    }

    /// The `host:port` the API server listens on.
    pub fn server_address(&self) -> String {
        host_port(&self.server)
    }

    pub fn operators_api(&self) -> Api<DynamicObject> {
        Api::all_with(self.client.clone(), &operator_resource())
    }

    pub fn csr_api(&self) -> Api<CertificateSigningRequest> {
        Api::all(self.client.clone())
    }

    pub fn secrets_api(&self, namespace: &str) -> Api<Secret> {
        Api::namespaced(self.client.clone(), namespace)
    }

    pub fn configmaps_api(&self, namespace: &str) -> Api<ConfigMap> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

fn server_url(config: &Config) -> String {
    let scheme = config.cluster_url.scheme_str().unwrap_or("https");
    match config.cluster_url.authority() {
        Some(authority) => format!("{scheme}://{authority}"),
        None => config.cluster_url.to_string(),
    }
}

/// Reduce a server URL to a dialable `host:port`.
pub fn host_port(server: &str) -> String {
    let address = server
        .trim_start_matches("https://")
        .trim_start_matches("http://")
        .trim_end_matches('/');
    if address.contains(':') {
        address.to_string()
    } else {
        format!("{address}:{DEFAULT_API_PORT}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_port_appends_default_port() {
        assert_eq!(
            host_port("https://api.roadshow.example.com"),
            "api.roadshow.example.com:6443"
        );
    }

    #[test]
    fn host_port_keeps_explicit_port() {
        assert_eq!(
            host_port("https://api.roadshow.example.com:6443/"),
            "api.roadshow.example.com:6443"
        );
        assert_eq!(host_port("api.other.example.com:443"), "api.other.example.com:443");
    }
}
