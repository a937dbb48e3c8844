//! The htpasswd identity installed on assigned clusters.
//!
//! Each cluster authenticates its workshop user through an htpasswd
//! identity provider reading the `htpass-secret` secret. Assignment
//! writes the user's chosen password there as a bcrypt entry for the
//! `admin` user.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::ByteString;
use kube::api::PostParams;
use tracing::info;

use crate::hub::claims::is_not_found;
use crate::spoke::SpokeClient;

/// Namespace the identity provider reads from.
pub const IDENTITY_NAMESPACE: &str = "openshift-config";

/// Secret consumed by the htpasswd identity provider.
pub const HTPASSWD_SECRET: &str = "htpass-secret";

/// Key inside the secret.
pub const HTPASSWD_KEY: &str = "htpasswd";

/// The single identity installed on every cluster.
pub const HTPASSWD_USER: &str = "admin";

/// Produce the htpasswd line for the user with a bcrypt hash.
pub fn entry_for(password: &str) -> Result<String> {
    let hash = bcrypt::hash(password, bcrypt::DEFAULT_COST).context("hashing password")?;
    Ok(format!("{HTPASSWD_USER}:{hash}\n"))
}

/// Does an existing htpasswd blob already grant this password?
pub fn entry_matches(existing: &[u8], password: &str) -> bool {
    let Ok(text) = std::str::from_utf8(existing) else {
        return false;
    };
    let Some((user, hash)) = text.trim().split_once(':') else {
        return false;
    };
    user == HTPASSWD_USER && bcrypt::verify(password, hash).unwrap_or(false)
}

/// Install the user's password on the cluster: create the secret if
/// missing, leave it alone when the password already matches, update it
/// otherwise.
pub async fn ensure_password(spoke: &SpokeClient, password: &str) -> Result<()> {
    let entry = entry_for(password)?;
    let api = spoke.secrets_api(IDENTITY_NAMESPACE);

    let mut secret = match api.get(HTPASSWD_SECRET).await {
        Ok(secret) => secret,
        Err(error) if is_not_found(&error) => {
            let secret = htpasswd_secret(&entry);
            api.create(&PostParams::default(), &secret)
                .await
                .context("creating htpasswd secret")?;
            info!(server = spoke.server(), "Created htpasswd secret");
            return Ok(());
        }
        Err(error) => return Err(error).context("reading htpasswd secret"),
    };

    if let Some(existing) = secret
        .data
        .as_ref()
        .and_then(|data| data.get(HTPASSWD_KEY))
    {
        if entry_matches(&existing.0, password) {
            info!(server = spoke.server(), "Password already installed, skipping update");
            return Ok(());
        }
    }

    secret
        .data
        .get_or_insert_with(BTreeMap::new)
        .insert(HTPASSWD_KEY.to_string(), ByteString(entry.into_bytes()));
    api.replace(HTPASSWD_SECRET, &PostParams::default(), &secret)
        .await
        .context("updating htpasswd secret")?;
    info!(server = spoke.server(), "Updated htpasswd secret");
    Ok(())
}

fn htpasswd_secret(entry: &str) -> Secret {
    let mut data = BTreeMap::new();
    data.insert(
        HTPASSWD_KEY.to_string(),
        ByteString(entry.as_bytes().to_vec()),
    );
    Secret {
        metadata: ObjectMeta {
            name: Some(HTPASSWD_SECRET.to_string()),
            namespace: Some(IDENTITY_NAMESPACE.to_string()),
            ..Default::default()
        },
        data: Some(data),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_carries_user_and_verifiable_hash() {
        let entry = entry_for("s3cret").unwrap();
        assert!(entry.starts_with("admin:"));
        assert!(entry.ends_with('\n'));
        assert!(entry_matches(entry.as_bytes(), "s3cret"));
        assert!(!entry_matches(entry.as_bytes(), "other"));
    }

    #[test]
    fn garbage_blobs_never_match() {
        assert!(!entry_matches(b"", "s3cret"));
        assert!(!entry_matches(b"no-colon-here", "s3cret"));
        assert!(!entry_matches(&[0xff, 0xfe], "s3cret"));
    }
}
