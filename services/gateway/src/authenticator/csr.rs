//! Credential minting via the cluster's own signing flow.
//!
//! For each identity we generate a fresh RSA key, submit a signing
//! request to the downstream cluster, approve it, and wait for the
//! issued certificate. Combined with the CA pulled off the API server's
//! TLS handshake this yields a self-contained kubeconfig.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use k8s_openapi::api::certificates::v1::{
    CertificateSigningRequest, CertificateSigningRequestCondition, CertificateSigningRequestSpec,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};
use k8s_openapi::ByteString;
use kube::api::{DeleteParams, Patch, PatchParams, PostParams};
use rsa::pkcs1::EncodeRsaPrivateKey;
use rsa::pkcs8::{EncodePrivateKey, LineEnding};
use rsa::RsaPrivateKey;
use tokio::sync::watch;
use tracing::{debug, info};

use super::ca::fetch_ca_pem;
use crate::hub::sleep_or_shutdown;
use crate::spoke::SpokeClient;

/// Key size for minted client certificates.
const RSA_KEY_BITS: usize = 4096;

/// Requested certificate validity: one year.
const CERTIFICATE_EXPIRATION_SECONDS: i32 = 31_536_000;

/// Signer that issues API client certificates.
const SIGNER_NAME: &str = "kubernetes.io/kube-apiserver-client";

/// Attempts and spacing while waiting for the issued certificate.
const CERTIFICATE_POLL_ATTEMPTS: u32 = 30;
const CERTIFICATE_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Mint a kubeconfig for `common_name` on the downstream cluster.
///
/// Safe to re-run: any request left behind by an earlier attempt is
/// deleted (best effort) before the new one is submitted.
pub async fn mint_kubeconfig(
    spoke: &SpokeClient,
    common_name: &str,
    request_name: &str,
    shutdown: &mut watch::Receiver<bool>,
) -> Result<String> {
    let key = tokio::task::spawn_blocking(|| {
        RsaPrivateKey::new(&mut rand::thread_rng(), RSA_KEY_BITS)
    })
    .await
    .context("key generation task failed")?
    .context("generating RSA key")?;

    let csr_pem = certificate_request_pem(&key, common_name)?;

    let api = spoke.csr_api();

    // A previous attempt may have left a request of the same name; its
    // key is gone, so the old request is useless either way.
    let _ = api.delete(request_name, &DeleteParams::default()).await;

    let request = signing_request(request_name, &csr_pem);
    let mut created = api
        .create(&PostParams::default(), &request)
        .await
        .context("submitting signing request")?;
    info!(request = request_name, cn = common_name, "Signing request submitted");

    let status = created.status.get_or_insert_with(Default::default);
    status
        .conditions
        .get_or_insert_with(Vec::new)
        .push(CertificateSigningRequestCondition {
            type_: "Approved".to_string(),
            status: "True".to_string(),
            reason: Some("PreludeAuthenticator".to_string()),
            message: Some("Approved by cluster authenticator".to_string()),
            last_update_time: Some(Time(Utc::now())),
            last_transition_time: None,
        });
    api.patch_approval(
        request_name,
        &PatchParams::default(),
        &Patch::Merge(&created),
    )
    .await
    .context("approving signing request")?;
    debug!(request = request_name, "Signing request approved");

    let certificate_pem = wait_for_certificate(spoke, request_name, shutdown).await?;
    info!(request = request_name, "Certificate issued");

    let ca_pem = fetch_ca_pem(spoke.server())
        .await
        .context("extracting CA certificate")?;

    let key_pem = key
        .to_pkcs1_pem(LineEnding::LF)
        .context("encoding private key")?;

    prelude_kubeconfig::build(
        spoke.server(),
        common_name,
        &ca_pem,
        &certificate_pem,
        key_pem.as_bytes(),
    )
    .context("assembling kubeconfig")
}

/// Build the PKCS#10 request for a bare common name.
fn certificate_request_pem(key: &RsaPrivateKey, common_name: &str) -> Result<String> {
    let pkcs8 = key
        .to_pkcs8_pem(LineEnding::LF)
        .context("encoding key for signing")?;
    let key_pair = rcgen::KeyPair::from_pem_and_sign_algo(&pkcs8, &rcgen::PKCS_RSA_SHA256)
        .context("loading key for signing")?;

    let mut params = rcgen::CertificateParams::default();
    params.distinguished_name = rcgen::DistinguishedName::new();
    params
        .distinguished_name
        .push(rcgen::DnType::CommonName, common_name);

    let request = params
        .serialize_request(&key_pair)
        .context("serializing certificate request")?;
    request.pem().context("encoding certificate request")
}

fn signing_request(name: &str, csr_pem: &str) -> CertificateSigningRequest {
    CertificateSigningRequest {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            ..Default::default()
        },
        spec: CertificateSigningRequestSpec {
            request: ByteString(csr_pem.as_bytes().to_vec()),
            signer_name: SIGNER_NAME.to_string(),
            expiration_seconds: Some(CERTIFICATE_EXPIRATION_SECONDS),
            usages: Some(vec!["client auth".to_string()]),
            groups: Some(vec!["system:authenticated".to_string()]),
            ..Default::default()
        },
        status: None,
    }
}

async fn wait_for_certificate(
    spoke: &SpokeClient,
    request_name: &str,
    shutdown: &mut watch::Receiver<bool>,
) -> Result<Vec<u8>> {
    let api = spoke.csr_api();
    for _ in 0..CERTIFICATE_POLL_ATTEMPTS {
        let request = api
            .get(request_name)
            .await
            .context("polling signing request")?;
        if let Some(certificate) = request
            .status
            .and_then(|status| status.certificate)
            .filter(|cert| !cert.0.is_empty())
        {
            return Ok(certificate.0);
        }
        if sleep_or_shutdown(CERTIFICATE_POLL_INTERVAL, shutdown).await {
            bail!("shutdown while waiting for certificate {request_name}");
        }
    }
    bail!("timed out waiting for certificate {request_name}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_pem_carries_the_common_name() {
        use x509_parser::certification_request::X509CertificationRequest;
        use x509_parser::prelude::FromDer;

        // A smaller key keeps the test fast; the request shape is the
        // same at any size.
        let key = RsaPrivateKey::new(&mut rand::thread_rng(), 2048).unwrap();
        let request_pem = certificate_request_pem(&key, "system:admin").unwrap();
        assert!(request_pem.starts_with("-----BEGIN CERTIFICATE REQUEST-----"));

        let block = pem::parse(&request_pem).unwrap();
        let (_, request) = X509CertificationRequest::from_der(block.contents()).unwrap();
        let common_name = request
            .certification_request_info
            .subject
            .iter_common_name()
            .next()
            .and_then(|attr| attr.as_str().ok());
        assert_eq!(common_name, Some("system:admin"));
    }

    #[test]
    fn signing_request_shape() {
        let request = signing_request("auth2kube-admin-access", "PEM");
        assert_eq!(request.spec.signer_name, SIGNER_NAME);
        assert_eq!(request.spec.expiration_seconds, Some(31_536_000));
        assert_eq!(
            request.spec.usages.as_deref(),
            Some(&["client auth".to_string()][..])
        );
        assert_eq!(
            request.spec.groups.as_deref(),
            Some(&["system:authenticated".to_string()][..])
        );
    }
}
