//! Gateway configuration.
//!
//! Everything is a flag with an environment fallback, so the same
//! binary runs from a shell during development and from a deployment
//! with env-only configuration. Secrets (admin password, captcha
//! secret) are env-only and never appear in `--help` output.

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use prelude_claimstate::{parse_duration, ScalePolicy};

/// Gateway configuration.
#[derive(Debug, Clone, Parser)]
#[command(name = "prelude-gateway", about = "Self-service gateway onto a pool of ephemeral clusters")]
pub struct Config {
    /// Cluster pool to serve claims from.
    #[arg(long = "cluster-pool", env = "CLUSTER_POOL")]
    pub cluster_pool: String,

    /// Lifetime granted to a claim at assignment (e.g. 2h, 1d12h, 30m).
    #[arg(long = "cluster-lifetime", env = "CLUSTER_LIFETIME", default_value = "2h")]
    pub cluster_lifetime: String,

    /// Prefix for synthetic claim names.
    #[arg(long = "claim-prefix", env = "CLAIM_PREFIX", default_value = "prelude")]
    pub claim_prefix: String,

    /// Baseline number of claims to keep open.
    #[arg(long = "claim-base", env = "CLUSTER_CLAIM_LIMIT", default_value_t = 4)]
    pub claim_base: usize,

    /// Maximum number of claims when scaled up.
    #[arg(long = "claim-max", env = "CLUSTER_CLAIM_MAX", default_value_t = 10)]
    pub claim_max: usize,

    /// Claims added per scale-up.
    #[arg(long = "claim-increment", env = "CLUSTER_CLAIM_INCREMENT", default_value_t = 1)]
    pub claim_increment: usize,

    /// Available-claim count at which scale-up triggers.
    #[arg(
        long = "claim-available-threshold",
        env = "CLUSTER_CLAIM_AVAILABLE_THRESHOLD",
        default_value_t = 1
    )]
    pub claim_available_threshold: usize,

    /// Address to listen on for HTTP connections.
    #[arg(long = "listen-addr", env = "LISTEN_ADDR", default_value = "0.0.0.0:8080")]
    pub listen_addr: SocketAddr,

    /// Explicit kubeconfig path for the hub connection.
    #[arg(long = "kubeconfig", env = "KUBECONFIG")]
    pub kubeconfig: Option<PathBuf>,

    /// Admin page password. Unset disables admin authentication.
    #[arg(skip)]
    pub admin_password: Option<String>,

    /// Captcha provider secret. Unset disables verification.
    #[arg(skip)]
    pub recaptcha_secret: Option<String>,

    /// Captcha site key handed to the web form.
    #[arg(skip)]
    pub recaptcha_site_key: String,
}

impl Config {
    /// Parse flags and environment, then validate.
    pub fn load() -> Result<Self> {
        Self::finalize(Self::parse())
    }

    /// Validation and env-only secrets, split out so tests can feed
    /// their own argument vectors.
    pub fn finalize(mut config: Self) -> Result<Self> {
        config.admin_password = non_empty_env("ADMIN_PASSWORD");
        config.recaptcha_secret = non_empty_env("RECAPTCHA_SECRET_KEY");
        config.recaptcha_site_key = std::env::var("RECAPTCHA_SITE_KEY").unwrap_or_default();

        if config.claim_max < config.claim_base {
            config.claim_max = config.claim_base;
        }

        parse_duration(&config.cluster_lifetime).with_context(|| {
            format!("invalid --cluster-lifetime value: {}", config.cluster_lifetime)
        })?;

        Ok(config)
    }

    /// The autoscaler policy implied by this configuration.
    pub fn scale_policy(&self) -> ScalePolicy {
        ScalePolicy {
            base: self.claim_base,
            max: self.claim_max,
            increment: self.claim_increment,
            available_threshold: self.claim_available_threshold,
            ..ScalePolicy::default()
        }
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}
