//! CA Signer: signs an incoming CSR into an end-entity X.509 certificate.

use spki::SubjectPublicKeyInfoOwned;
use x509_cert::builder::{Builder, CertificateBuilder, Profile};
use x509_cert::name::Name;
use x509_cert::serial_number::SerialNumber;
use x509_cert::time::{Time, Validity};
use x509_cert::Certificate;

use crate::error::SignerError;
use crate::keystore::{CaHandle, CaStore};

/// Issuance policy for end-entity certificates.
pub struct IssuancePolicy {
    pub device_cert_lifetime_days: i64,
}

impl Default for IssuancePolicy {
    fn default() -> Self {
        Self {
            device_cert_lifetime_days: 365,
        }
    }
}

/// Signs `subject`/`spki` into a new end-entity certificate, reserving and persisting the next
/// serial from `ca` before returning.
///
/// notBefore is five minutes in the past (clock-skew tolerance),
/// notAfter is `policy.device_cert_lifetime_days` after that; `Profile::Leaf` supplies
/// basicConstraints, keyUsage, subjectKeyIdentifier (from the new key) and
/// authorityKeyIdentifier (from the issuing CA) on its own, so none of those extensions are
/// added by hand here; the signature algorithm is SHA-256-with-RSA.
pub fn sign(
    ca: &CaHandle,
    store: &dyn CaStore,
    subject: Name,
    spki: SubjectPublicKeyInfoOwned,
    policy: &IssuancePolicy,
) -> Result<Certificate, SignerError> {
    let serial_value = ca.reserve_next_serial(store)?;
    let serial = SerialNumber::from(serial_value);

    let not_before = time::OffsetDateTime::now_utc() - time::Duration::minutes(5);
    let not_after = not_before + time::Duration::days(policy.device_cert_lifetime_days);
    let validity = Validity {
        not_before: Time::try_from(not_before)
            .map_err(|e| SignerError::CertificateBuild(e.to_string()))?,
        not_after: Time::try_from(not_after)
            .map_err(|e| SignerError::CertificateBuild(e.to_string()))?,
    };

    let profile = Profile::Leaf {
        issuer: ca.subject().clone(),
        enable_key_agreement: false,
        enable_key_encipherment: true,
    };

    let builder = CertificateBuilder::new(
        profile,
        serial,
        validity,
        subject,
        spki,
        ca.signing_key(),
    )
    .map_err(|e| SignerError::CertificateBuild(e.to_string()))?;

    builder
        .build()
        .map_err(|e| SignerError::CertificateBuild(e.to_string()))
}
