//! Kubeconfig secrets on the hub.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::ByteString;
use kube::api::{Api, PostParams};

use super::HubClient;
use crate::hub::claims::is_not_found;

impl HubClient {
    pub fn secrets_api(&self, namespace: &str) -> Api<Secret> {
        Api::namespaced(self.client(), namespace)
    }

    /// Read a kubeconfig document out of a secret, transparently
    /// handling the raw and base64-wrapped storage shapes.
    pub async fn read_kubeconfig(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<String>, kube::Error> {
        let secret = self.secrets_api(namespace).get(name).await?;
        Ok(extract_from_secret(&secret))
    }

    /// Write a kubeconfig document into a secret under both well-known
    /// keys, creating the secret if it does not exist.
    pub async fn write_kubeconfig(
        &self,
        namespace: &str,
        name: &str,
        kubeconfig: &str,
    ) -> Result<(), kube::Error> {
        let api = self.secrets_api(namespace);
        match api.get(name).await {
            Ok(mut secret) => {
                set_kubeconfig_keys(&mut secret, kubeconfig);
                api.replace(name, &PostParams::default(), &secret).await?;
                Ok(())
            }
            Err(error) if is_not_found(&error) => {
                let mut secret = Secret {
                    metadata: ObjectMeta {
                        name: Some(name.to_string()),
                        namespace: Some(namespace.to_string()),
                        ..Default::default()
                    },
                    ..Default::default()
                };
                set_kubeconfig_keys(&mut secret, kubeconfig);
                api.create(&PostParams::default(), &secret).await?;
                Ok(())
            }
            Err(error) => Err(error),
        }
    }
}

fn set_kubeconfig_keys(secret: &mut Secret, kubeconfig: &str) {
    let data = secret.data.get_or_insert_with(BTreeMap::new);
    data.insert(
        prelude_kubeconfig::KUBECONFIG_KEY.to_string(),
        ByteString(kubeconfig.as_bytes().to_vec()),
    );
    data.insert(
        prelude_kubeconfig::RAW_KUBECONFIG_KEY.to_string(),
        ByteString(kubeconfig.as_bytes().to_vec()),
    );
}

/// Decode the kubeconfig held by a secret, if any.
pub fn extract_from_secret(secret: &Secret) -> Option<String> {
    let data = secret.data.as_ref()?;
    let byte_map: BTreeMap<String, Vec<u8>> = data
        .iter()
        .map(|(key, value)| (key.clone(), value.0.clone()))
        .collect();
    prelude_kubeconfig::extract(&byte_map)
}
