//! Service configuration loaded from environment variables.

use std::env;

use anyhow::Result;

/// Runtime configuration for the scepd HTTP service.
#[derive(Debug, Clone)]
pub struct Config {
    /// `CA_ROOT`: filesystem path containing `ca.key`, `ca.pem`, `serial`.
    pub ca_root: String,
    /// `FORCE_DEGENERATE_FOR_SINGLE_CERT`: wrap single-cert GetCACert replies in degenerate CMS.
    pub force_degenerate_for_single_cert: bool,
    /// `CA_KEY_BITS`: RSA modulus size used only when bootstrapping a new CA.
    pub ca_key_bits: usize,
    /// `CA_COMMON_NAME`: subject CN used only when bootstrapping a new CA.
    pub ca_common_name: String,
    /// `CA_LIFETIME_DAYS`: validity period used only when bootstrapping a new CA.
    pub ca_lifetime_days: i64,
    /// `DEVICE_CERT_LIFETIME_DAYS`: validity period for every issued end-entity certificate.
    pub device_cert_lifetime_days: i64,
    /// `CHALLENGE`: shared secret devices must present via `challengePassword`. When unset,
    /// enrollment is permissive — any value (including absent) is accepted, which is logged at
    /// `warn` on every acceptance so operators cannot silently run an unauthenticated endpoint.
    pub challenge: Option<String>,
    /// `BIND_ADDR`: address the server listens on.
    pub bind_addr: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let ca_root = env::var("CA_ROOT").unwrap_or_else(|_| "./ca".to_string());

        let force_degenerate_for_single_cert = env::var("FORCE_DEGENERATE_FOR_SINGLE_CERT")
            .map(|v| v == "true" || v == "1")
            .unwrap_or(false);

        let ca_key_bits = env::var("CA_KEY_BITS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(2048);

        let ca_common_name = env::var("CA_COMMON_NAME").unwrap_or_else(|_| "SCEP CA".to_string());

        let ca_lifetime_days = env::var("CA_LIFETIME_DAYS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(3650);

        let device_cert_lifetime_days = env::var("DEVICE_CERT_LIFETIME_DAYS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(365);

        let challenge = env::var("CHALLENGE").ok();
        if challenge.is_none() {
            tracing::warn!(
                "CHALLENGE is not configured; enrollment requests will be accepted regardless \
                of challengePassword (permissive mode)"
            );
        }

        let bind_addr = env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string());

        Ok(Config {
            ca_root,
            force_degenerate_for_single_cert,
            ca_key_bits,
            ca_common_name,
            ca_lifetime_days,
            device_cert_lifetime_days,
            challenge,
            bind_addr,
        })
    }
}
