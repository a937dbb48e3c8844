//! Kubeconfig blob handling.
//!
//! Cluster credentials move through the system as kubeconfig YAML
//! documents stored in secrets. This library owns that format:
//!
//! - **Extraction**: secrets carry the document under the `kubeconfig`
//!   or `raw-kubeconfig` key, stored either raw or base64-encoded.
//!   Readers accept any of those shapes and always come out with YAML.
//! - **Assembly**: freshly minted credentials (CA, client certificate,
//!   client key, all PEM) are embedded base64-encoded into a new
//!   document.
//! - **Derived names**: the user-credential secret name is derived from
//!   the admin one, and the in-document cluster name from the API
//!   server URL.

use std::collections::BTreeMap;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Primary secret key holding the kubeconfig document.
pub const KUBECONFIG_KEY: &str = "kubeconfig";

/// Secondary secret key holding the same document.
pub const RAW_KUBECONFIG_KEY: &str = "raw-kubeconfig";

const ADMIN_SECRET_SUFFIX: &str = "-admin-kubeconfig";
const USER_SECRET_SUFFIX: &str = "-user-kubeconfig";

/// Marker proving a decoded blob really is a kubeconfig document.
const DOCUMENT_MARKER: &str = "apiVersion";

#[derive(Debug, Error)]
pub enum KubeconfigError {
    #[error("serializing kubeconfig: {0}")]
    Serialize(#[from] serde_yaml::Error),
}

/// A kubeconfig document with embedded credentials.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    #[serde(rename = "apiVersion")]
    pub api_version: String,
    pub kind: String,
    pub clusters: Vec<NamedCluster>,
    pub contexts: Vec<NamedContext>,
    #[serde(rename = "current-context")]
    pub current_context: String,
    #[serde(default)]
    pub preferences: BTreeMap<String, serde_yaml::Value>,
    pub users: Vec<NamedUser>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NamedCluster {
    pub name: String,
    pub cluster: Cluster,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cluster {
    #[serde(rename = "certificate-authority-data")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub certificate_authority_data: Option<String>,
    pub server: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NamedContext {
    pub name: String,
    pub context: Context,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Context {
    pub cluster: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    pub user: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NamedUser {
    pub name: String,
    pub user: User,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    #[serde(rename = "client-certificate-data")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_certificate_data: Option<String>,
    #[serde(rename = "client-key-data")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_key_data: Option<String>,
}

/// Decode one secret value, unwrapping a base64 layer when the decoded
/// form is recognizably a kubeconfig document.
pub fn decode_blob(raw: &[u8]) -> String {
    let data = String::from_utf8_lossy(raw).to_string();
    if let Ok(decoded) = BASE64.decode(data.trim_end()) {
        if !decoded.is_empty() {
            let text = String::from_utf8_lossy(&decoded);
            if text.contains(DOCUMENT_MARKER) {
                return text.to_string();
            }
        }
    }
    data
}

/// Pull the kubeconfig document out of a secret's data map.
///
/// Prefers the `kubeconfig` key, falls back to `raw-kubeconfig`, and as
/// a last resort takes the first value present. Returns `None` for a
/// secret with no data at all.
pub fn extract(data: &BTreeMap<String, Vec<u8>>) -> Option<String> {
    let raw = data
        .get(KUBECONFIG_KEY)
        .or_else(|| data.get(RAW_KUBECONFIG_KEY))
        .or_else(|| data.values().next())?;
    Some(decode_blob(raw))
}

/// Assemble a kubeconfig document from PEM credentials.
///
/// `server` is the API server URL; `user` becomes both the user and the
/// context user name. All three PEM inputs are embedded base64-encoded.
pub fn build(
    server: &str,
    user: &str,
    ca_pem: &[u8],
    client_cert_pem: &[u8],
    client_key_pem: &[u8],
) -> Result<String, KubeconfigError> {
    let cluster_name = cluster_name_from_server(server);
    let document = Document {
        api_version: "v1".to_string(),
        kind: "Config".to_string(),
        clusters: vec![NamedCluster {
            name: cluster_name.clone(),
            cluster: Cluster {
                certificate_authority_data: Some(BASE64.encode(ca_pem)),
                server: server.to_string(),
            },
        }],
        contexts: vec![NamedContext {
            name: user.to_string(),
            context: Context {
                cluster: cluster_name,
                namespace: Some("default".to_string()),
                user: user.to_string(),
            },
        }],
        current_context: user.to_string(),
        preferences: BTreeMap::new(),
        users: vec![NamedUser {
            name: user.to_string(),
            user: User {
                client_certificate_data: Some(BASE64.encode(client_cert_pem)),
                client_key_data: Some(BASE64.encode(client_key_pem)),
            },
        }],
    };
    Ok(serde_yaml::to_string(&document)?)
}

/// Derive the in-document cluster name from the API server URL.
///
/// API server hosts look like `api.<cluster>.<domain>`; for those the
/// full hostname is used. Anything else falls back to `cluster`.
pub fn cluster_name_from_server(server: &str) -> String {
    if !server.contains("api.") {
        return "cluster".to_string();
    }
    let host = server
        .trim_start_matches("https://")
        .trim_start_matches("http://");
    host.split(':').next().unwrap_or(host).to_string()
}

/// Derive the user-credential secret name from the admin one.
pub fn user_secret_name(admin_secret_name: &str) -> String {
    admin_secret_name.replacen(ADMIN_SECRET_SUFFIX, USER_SECRET_SUFFIX, 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "apiVersion: v1\nkind: Config\nclusters: []\ncontexts: []\ncurrent-context: ''\nusers: []\n";

    fn data(pairs: &[(&str, &[u8])]) -> BTreeMap<String, Vec<u8>> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_vec()))
            .collect()
    }

    #[test]
    fn extracts_raw_document() {
        let secret = data(&[(KUBECONFIG_KEY, SAMPLE.as_bytes())]);
        assert_eq!(extract(&secret).unwrap(), SAMPLE);
    }

    #[test]
    fn extracts_base64_document() {
        let encoded = BASE64.encode(SAMPLE.as_bytes());
        let secret = data(&[(KUBECONFIG_KEY, encoded.as_bytes())]);
        assert_eq!(extract(&secret).unwrap(), SAMPLE);
    }

    #[test]
    fn raw_and_encoded_storage_read_identically() {
        let raw = data(&[(RAW_KUBECONFIG_KEY, SAMPLE.as_bytes())]);
        let encoded_value = BASE64.encode(SAMPLE.as_bytes());
        let encoded = data(&[(RAW_KUBECONFIG_KEY, encoded_value.as_bytes())]);
        assert_eq!(extract(&raw), extract(&encoded));
    }

    #[test]
    fn prefers_primary_key() {
        let secret = data(&[
            (KUBECONFIG_KEY, SAMPLE.as_bytes()),
            (RAW_KUBECONFIG_KEY, b"other".as_slice()),
        ]);
        assert_eq!(extract(&secret).unwrap(), SAMPLE);
    }

    #[test]
    fn falls_back_to_any_value() {
        let secret = data(&[("value", SAMPLE.as_bytes())]);
        assert_eq!(extract(&secret).unwrap(), SAMPLE);
        assert!(extract(&BTreeMap::new()).is_none());
    }

    #[test]
    fn base64_that_is_not_a_document_stays_wrapped() {
        // Decodes cleanly but has no document marker, so the original
        // text is preserved.
        let secret = data(&[(KUBECONFIG_KEY, b"aGVsbG8=".as_slice())]);
        assert_eq!(extract(&secret).unwrap(), "aGVsbG8=");
    }

    #[test]
    fn built_document_round_trips() {
        let yaml = build(
            "https://api.roadshow-abc.example.com:6443",
            "system:admin",
            b"CA PEM",
            b"CERT PEM",
            b"KEY PEM",
        )
        .unwrap();

        let parsed: Document = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(parsed.api_version, "v1");
        assert_eq!(parsed.kind, "Config");
        assert_eq!(parsed.current_context, "system:admin");
        assert_eq!(parsed.clusters.len(), 1);
        assert_eq!(
            parsed.clusters[0].name,
            "api.roadshow-abc.example.com"
        );
        assert_eq!(
            parsed.clusters[0].cluster.server,
            "https://api.roadshow-abc.example.com:6443"
        );
        assert_eq!(
            parsed.clusters[0]
                .cluster
                .certificate_authority_data
                .as_deref(),
            Some(BASE64.encode(b"CA PEM").as_str())
        );
        assert_eq!(parsed.users[0].name, "system:admin");
        assert_eq!(
            parsed.contexts[0].context.namespace.as_deref(),
            Some("default")
        );
    }

    #[test]
    fn cluster_name_falls_back_without_api_host() {
        assert_eq!(
            cluster_name_from_server("https://kubernetes.default.svc"),
            "cluster"
        );
        assert_eq!(
            cluster_name_from_server("https://api.foo.bar:6443"),
            "api.foo.bar"
        );
    }

    #[test]
    fn user_secret_name_rewrites_suffix() {
        assert_eq!(
            user_secret_name("roadshow-abc-admin-kubeconfig"),
            "roadshow-abc-user-kubeconfig"
        );
        assert_eq!(user_secret_name("unrelated"), "unrelated");
    }
}
