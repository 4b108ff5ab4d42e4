//! CSR Inspector: decodes a PKCS#10 `CertificationRequest` and extracts the
//! challenge password attribute and subject, verifying the inner signature before anything is
//! trusted.

use const_oid::ObjectIdentifier;
use der::asn1::PrintableString;
use der::{Decode, Encode};
use rsa::pkcs1v15::VerifyingKey;
use rsa::RsaPublicKey;
use sha2::Sha256;
use signature::Verifier;
use spki::SubjectPublicKeyInfoOwned;
use x509_cert::attr::AttributeValue;
use x509_cert::name::Name;
use x509_cert::request::CertReq;

use crate::error::CsrError;

/// PKCS#9 `challengePassword` attribute OID (RFC 2985 §5.4).
const CHALLENGE_PASSWORD_OID: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("1.2.840.113549.1.9.7");

/// A parsed and signature-verified PKCS#10 request.
pub struct Csr {
    request: CertReq,
}

impl Csr {
    /// Decodes `der` as a `CertificationRequest` and verifies the inner signature against the
    /// request's own embedded SPKI. Nothing about the CSR is trustworthy until this has
    /// succeeded.
    pub fn parse(der_bytes: &[u8]) -> Result<Self, CsrError> {
        let request = CertReq::from_der(der_bytes).map_err(|e| CsrError::Malformed(e.to_string()))?;

        let tbs = request
            .info
            .to_der()
            .map_err(|e| CsrError::Malformed(e.to_string()))?;

        let public_key = RsaPublicKey::try_from(request.info.public_key.clone())
            .map_err(|_| CsrError::SignatureInvalid)?;
        let verifying_key = VerifyingKey::<Sha256>::new(public_key);

        let signature_bytes = request
            .signature
            .as_bytes()
            .ok_or_else(|| CsrError::Malformed("signature is not an octet-aligned BIT STRING".into()))?;
        let signature = rsa::pkcs1v15::Signature::try_from(signature_bytes)
            .map_err(|e| CsrError::Malformed(e.to_string()))?;

        verifying_key
            .verify(&tbs, &signature)
            .map_err(|_| CsrError::SignatureInvalid)?;

        if request.info.subject.to_string().is_empty() {
            return Err(CsrError::EmptySubject);
        }

        Ok(Self { request })
    }

    pub fn subject(&self) -> &Name {
        &self.request.info.subject
    }

    pub fn public_key(&self) -> &SubjectPublicKeyInfoOwned {
        &self.request.info.public_key
    }

    /// Returns the `challengePassword` attribute value, if present. Unknown attributes are
    /// ignored.
    pub fn challenge_password(&self) -> Option<String> {
        self.request
            .info
            .attributes
            .iter()
            .find(|attr| attr.oid == CHALLENGE_PASSWORD_OID)
            .and_then(|attr| attr.values.iter().next())
            .and_then(|value| decode_attribute_string(value))
    }
}

fn decode_attribute_string(value: &AttributeValue) -> Option<String> {
    if let Ok(s) = PrintableString::from_der(value.as_bytes()) {
        return Some(s.to_string());
    }
    if let Ok(s) = der::asn1::Utf8StringRef::from_der(value.as_bytes()) {
        return Some(s.to_string());
    }
    None
}
