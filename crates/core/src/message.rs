//! SCEP Message Codec: parses and constructs a CMS `SignedData` carrying
//! the SCEP authenticated attributes (transactionID, messageType, pkiStatus, senderNonce,
//! recipientNonce, failInfo) over an encapsulated `EnvelopedData` payload.
//!
//! This module also builds the degenerate `SignedData` (no signer, no content, a populated
//! `certificates` field) SCEP uses to carry a freshly issued certificate back to the requester
//! — the RustCrypto `cms` crate has no ready-made constructor for it, so it is assembled by hand
//! here.

use cms::cert::{CertificateChoices, IssuerAndSerialNumber};
use cms::content_info::ContentInfo;
use cms::signed_data::{
    CertificateSet, DigestAlgorithmIdentifiers, EncapsulatedContentInfo, SignedData,
    SignerIdentifier, SignerInfo, SignerInfos,
};
use const_oid::db::rfc5911::{ID_DATA, ID_SIGNED_DATA};
use const_oid::ObjectIdentifier;
use der::asn1::{OctetString, PrintableString, SetOfVec};
use der::{Any, AnyRef, Decode, Encode, Tag};
use rand::rngs::OsRng;
use rand::RngCore;
use rsa::pkcs1v15::{Signature as RsaSignature, SigningKey, VerifyingKey};
use rsa::RsaPublicKey;
use sha2::{Digest as _, Sha256};
use signature::{SignatureEncoding, Signer as _, Verifier as _};
use spki::AlgorithmIdentifierOwned;
use x509_cert::attr::{Attribute, AttributeValue, Attributes};
use x509_cert::Certificate;

use scepd_types::prelude::{FailInfo, MessageType, PkiStatus};

use crate::error::MessageError;

/// `id-contentType` (RFC 2985 §5.2, PKCS#9).
const OID_CONTENT_TYPE: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.9.3");
/// `id-messageDigest` (RFC 2985 §5.2, PKCS#9).
const OID_MESSAGE_DIGEST: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.9.4");

/// SCEP's own authenticated-attribute OIDs, under the VeriSign PKI enterprise arc
/// (draft-gutmann-scep-19 §3.2.1).
const OID_TRANSACTION_ID: ObjectIdentifier =
ObjectIdentifier::new_unwrap("2.16.840.1.113733.1.9.7");
const OID_MESSAGE_TYPE: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.16.840.1.113733.1.9.2");
const OID_PKI_STATUS: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.16.840.1.113733.1.9.3");
const OID_FAIL_INFO: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.16.840.1.113733.1.9.4");
const OID_SENDER_NONCE: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.16.840.1.113733.1.9.5");
const OID_RECIPIENT_NONCE: ObjectIdentifier =
ObjectIdentifier::new_unwrap("2.16.840.1.113733.1.9.6");

/// `id-sha256` (NIST algorithm arc).
const OID_SHA256: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.16.840.1.101.3.4.2.1");

const NONCE_LEN: usize = 16;

/// The decoded, signature-verified form of a SCEP PKI message.
///
/// Immutable once constructed; `Message::parse` is the only way to obtain one, and it does not
/// return until the outer signature has verified.
pub struct Message {
    pub message_type: MessageType,
    pub transaction_id: String,
    pub sender_nonce: [u8; NONCE_LEN],
    pub recipient_nonce: Option<[u8; NONCE_LEN]>,
    pub pki_status: Option<PkiStatus>,
    pub fail_info: Option<FailInfo>,
    pub signer_certificate: Certificate,
    /// The raw encapsulated content octets, verbatim — for PKCSReq/RenewalReq/CertPoll/GetCert
    /// this is a CMS `EnvelopedData` to be handed to the envelope codec; CertRep carries the
    /// same shape in reverse. Absent on pure-failure replies that carry no envelope.
    pub enveloped_content: Option<Vec<u8>>,
}

impl Message {
    /// Parses `der_bytes` as a CMS `ContentInfo` wrapping `SignedData`, verifies the lone
    /// signer's signature over the signed attributes, and extracts the SCEP attribute set.
    pub fn parse(der_bytes: &[u8]) -> Result<Self, MessageError> {
        let content_info =
        ContentInfo::from_der(der_bytes).map_err(|e| MessageError::Malformed(e.to_string()))?;
        if content_info.content_type != ID_SIGNED_DATA {
            return Err(MessageError::Malformed(
                    "ContentInfo does not carry SignedData".into(),
                ));
        }
        let signed_data: SignedData = content_info
            .content
            .decode_as()
            .map_err(|e| MessageError::Malformed(e.to_string()))?;

        if signed_data.signer_infos.0.len() != 1 {
            return Err(MessageError::WrongSignerCount);
        }
        let signer_info = signed_data
            .signer_infos
            .0
            .iter()
            .next()
            .expect("length checked above");

        let certificates: Vec<Certificate> = signed_data
            .certificates
            .as_ref()
            .map(|set| {
                set.0
                    .iter()
                    .filter_map(|choice| match choice {
                        CertificateChoices::Certificate(cert) => Some(cert.clone()),
                        _ => None,
                    })
                    .collect()
            })
            .unwrap_or_default();

        let signer_certificate = find_signer_certificate(&certificates, &signer_info.sid)
            .ok_or_else(|| MessageError::Malformed("no certificate matches SignerInfo sid".into()))?;

        let signed_attrs = signer_info
            .signed_attrs
            .as_ref()
            .ok_or_else(|| MessageError::MissingAttribute("signedAttrs"))?;

        let econtent = signed_data
            .encap_content_info
            .econtent
            .as_ref()
            .map(|any| any.value().to_vec());

        verify_message_digest(signed_attrs, econtent.as_deref())?;
        verify_signer_info_signature(&signer_certificate, signed_attrs, signer_info)?;

        let transaction_id = decode_printable_attribute(signed_attrs, OID_TRANSACTION_ID)
            .ok_or(MessageError::MissingAttribute("transactionID"))?;
        if transaction_id.is_empty() {
            return Err(MessageError::MissingAttribute("transactionID"));
        }

        let message_type_wire = decode_printable_attribute(signed_attrs, OID_MESSAGE_TYPE)
            .ok_or(MessageError::MissingAttribute("messageType"))?;
        let message_type_code: u8 = message_type_wire
            .parse()
            .map_err(|_| MessageError::Malformed("messageType is not numeric".into()))?;
        let message_type = MessageType::from_wire(message_type_code)
            .ok_or(MessageError::UnknownMessageType(message_type_code))?;

        let sender_nonce_bytes = decode_octet_attribute(signed_attrs, OID_SENDER_NONCE)
            .ok_or(MessageError::MissingAttribute("senderNonce"))?;
        let sender_nonce = fixed_nonce(&sender_nonce_bytes)?;

        let recipient_nonce = decode_octet_attribute(signed_attrs, OID_RECIPIENT_NONCE)
            .map(|bytes| fixed_nonce(&bytes))
            .transpose()?;

        let pki_status = decode_printable_attribute(signed_attrs, OID_PKI_STATUS)
            .map(|s| {
                s.parse::<u8>()
                    .ok()
                    .and_then(PkiStatus::from_wire)
                    .ok_or_else(|| MessageError::Malformed("pkiStatus is not recognized".into()))
            })
            .transpose()?;

        let fail_info = decode_printable_attribute(signed_attrs, OID_FAIL_INFO)
            .map(|s| {
                s.parse::<u8>()
                    .ok()
                    .and_then(FailInfo::from_wire)
                    .ok_or_else(|| MessageError::Malformed("failInfo is not recognized".into()))
            })
            .transpose()?;

        if message_type == MessageType::CertRep && pki_status.is_none() {
            return Err(MessageError::MissingAttribute("pkiStatus"));
        }
        if pki_status == Some(PkiStatus::Failure) && fail_info.is_none() {
            return Err(MessageError::MissingAttribute("failInfo"));
        }

        Ok(Self {
                message_type,
                transaction_id,
                sender_nonce,
                recipient_nonce,
                pki_status,
                fail_info,
                signer_certificate,
                enveloped_content: econtent,
            })
    }
}

fn fixed_nonce(bytes: &[u8]) -> Result<[u8; NONCE_LEN], MessageError> {
    if bytes.len() != NONCE_LEN {
        return Err(MessageError::BadNonceLength(bytes.len()));
    }
    let mut out = [0u8; NONCE_LEN];
    out.copy_from_slice(bytes);
    Ok(out)
}

fn find_signer_certificate(
    certificates: &[Certificate],
    sid: &SignerIdentifier,
) -> Option<Certificate> {
    match sid {
        SignerIdentifier::IssuerAndSerialNumber(isn) => certificates
            .iter()
            .find(|cert| {
                cert.tbs_certificate.issuer == isn.issuer
                && cert.tbs_certificate.serial_number == isn.serial_number
            })
            .cloned(),
        SignerIdentifier::SubjectKeyIdentifier(_) => {
            // SCEP clients identify themselves by issuerAndSerialNumber (their own
            // self-signed certificate); subjectKeyIdentifier sids are not used on the wire.
            None
        }
    }
}

/// Recomputes the SHA-256 digest of the encapsulated content and compares it against the
/// `messageDigest` signed attribute (RFC 5652 §5.4) — absent content hashes as the empty string.
fn verify_message_digest(
    signed_attrs: &Attributes,
    econtent: Option<&[u8]>,
) -> Result<(), MessageError> {
    let expected = Sha256::digest(econtent.unwrap_or(&[]));
    let actual = decode_octet_attribute(signed_attrs, OID_MESSAGE_DIGEST)
        .ok_or(MessageError::MissingAttribute("messageDigest"))?;
    if actual.as_slice() != expected.as_slice() {
        return Err(MessageError::SignatureInvalid);
    }
    Ok(())
}

/// Verifies the RSA signature over the DER encoding of `signed_attrs` re-tagged as a universal
/// `SET OF` (RFC 5652 §5.4) — encoding the bare `Attributes` value, rather than the `[0] IMPLICIT`
/// form it carries inside `SignerInfo`, reproduces exactly the bytes the signer hashed.
fn verify_signer_info_signature(
    signer_certificate: &Certificate,
    signed_attrs: &Attributes,
    signer_info: &SignerInfo,
) -> Result<(), MessageError> {
    let tbs = signed_attrs
        .to_der()
        .map_err(|e| MessageError::Malformed(e.to_string()))?;

    let public_key = RsaPublicKey::try_from(
        signer_certificate
            .tbs_certificate
            .subject_public_key_info
            .clone(),
    )
        .map_err(|_| MessageError::Malformed("signer SPKI is not RSA".into()))?;
    let verifying_key = VerifyingKey::<Sha256>::new(public_key);

    let signature_bytes = signer_info.signature.as_bytes();
    let signature = RsaSignature::try_from(signature_bytes)
        .map_err(|e| MessageError::Malformed(e.to_string()))?;

    verifying_key
        .verify(&tbs, &signature)
        .map_err(|_| MessageError::SignatureInvalid)
}

fn decode_printable_attribute(attrs: &Attributes, oid: ObjectIdentifier) -> Option<String> {
    let value = find_attribute_value(attrs, oid)?;
    PrintableString::from_der(value.as_bytes())
        .ok()
        .map(|s| s.to_string())
}

fn decode_octet_attribute(attrs: &Attributes, oid: ObjectIdentifier) -> Option<Vec<u8>> {
    let value = find_attribute_value(attrs, oid)?;
    OctetString::from_der(value.as_bytes())
        .ok()
        .map(|s| s.as_bytes().to_vec())
}

fn find_attribute_value(attrs: &Attributes, oid: ObjectIdentifier) -> Option<&AttributeValue> {
    attrs
        .iter()
        .find(|attr| attr.oid == oid)
        .and_then(|attr| attr.values.iter().next())
}

/// Parameters for building a SCEP PKI message.
///
/// `sender_nonce` is not a field here: the builder always mints a fresh 16-byte nonce per
/// emission, matching "required; 16 random bytes per emission".
pub struct MessageBuilder {
    pub message_type: MessageType,
    pub transaction_id: String,
    pub pki_status: Option<PkiStatus>,
    pub fail_info: Option<FailInfo>,
    pub recipient_nonce: Option<[u8; NONCE_LEN]>,
    pub pki_envelope: Option<Vec<u8>>,
    pub certificates: Vec<Certificate>,
}

impl MessageBuilder {
    /// Builds and signs the message, returning the DER-encoded `ContentInfo`.
    ///
    /// `signer` is the (certificate, key) pair used to sign the outer `SignedData` — for a
    /// request this is the device's own self-signed certificate; for a reply it is the CA's.
    pub fn build(
        self,
        signer_certificate: &Certificate,
        signer_key: &SigningKey<Sha256>,
    ) -> Result<Vec<u8>, MessageError> {
        self.validate()?;

        let mut signed_attrs: SetOfVec<Attribute> = SetOfVec::new();
        insert_attribute(
            &mut signed_attrs,
            oid_attribute(OID_CONTENT_TYPE, ID_DATA)?,
        )?;

        let content_bytes = self.pki_envelope.clone().unwrap_or_default();
        let digest = Sha256::digest(&content_bytes);
        insert_attribute(
            &mut signed_attrs,
            octet_attribute(OID_MESSAGE_DIGEST, &digest)?,
        )?;
        insert_attribute(
            &mut signed_attrs,
            printable_attribute(OID_TRANSACTION_ID, &self.transaction_id)?,
        )?;
        insert_attribute(
            &mut signed_attrs,
            printable_attribute(
                OID_MESSAGE_TYPE,
                &self.message_type.to_wire().to_string(),
            )?,
        )?;

        let mut sender_nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut sender_nonce);
        insert_attribute(
            &mut signed_attrs,
            octet_attribute(OID_SENDER_NONCE, &sender_nonce)?,
        )?;

        if let Some(recipient_nonce) = self.recipient_nonce {
            insert_attribute(
                &mut signed_attrs,
                octet_attribute(OID_RECIPIENT_NONCE, &recipient_nonce)?,
            )?;
        }
        if let Some(pki_status) = self.pki_status {
            insert_attribute(
                &mut signed_attrs,
                printable_attribute(OID_PKI_STATUS, &pki_status.to_wire().to_string())?,
            )?;
        }
        if let Some(fail_info) = self.fail_info {
            insert_attribute(
                &mut signed_attrs,
                printable_attribute(OID_FAIL_INFO, &fail_info.to_wire().to_string())?,
            )?;
        }

        let tbs = signed_attrs
            .to_der()
            .map_err(|e| MessageError::Malformed(e.to_string()))?;
        let signature: RsaSignature = signer_key.try_sign(&tbs).map_err(|e| {
                MessageError::Malformed(format!("outer SignedData signing failed: {e}"))
            })?;
        let signature_bytes = signature.to_bytes().to_vec();

        let digest_alg = AlgorithmIdentifierOwned {
            oid: OID_SHA256,
            parameters: Some(Any::from(der::asn1::Null)),
        };

        let signer_info = SignerInfo {
            version: cms::signed_data::CmsVersion::V1,
            sid: SignerIdentifier::IssuerAndSerialNumber(IssuerAndSerialNumber {
                    issuer: signer_certificate.tbs_certificate.issuer.clone(),
                    serial_number: signer_certificate.tbs_certificate.serial_number.clone(),
                }),
            digest_alg: digest_alg.clone(),
            signed_attrs: Some(signed_attrs),
            signature_algorithm: AlgorithmIdentifierOwned {
                oid: const_oid::ObjectIdentifier::new_unwrap("1.2.840.113549.1.1.11"),
                parameters: Some(Any::from(der::asn1::Null)),
            },
            signature: OctetString::new(signature_bytes)
                .map_err(|e| MessageError::Malformed(e.to_string()))?
                .into(),
            unsigned_attrs: None,
        };

        let econtent = match &self.pki_envelope {
            Some(bytes) => Some(
                Any::new(Tag::OctetString, bytes.clone())
                    .map_err(|e| MessageError::Malformed(e.to_string()))?,
            ),
            None => None,
        };

        let mut digest_algorithms: SetOfVec<AlgorithmIdentifierOwned> = SetOfVec::new();
        digest_algorithms
            .insert(digest_alg)
            .map_err(|e| MessageError::Malformed(e.to_string()))?;

        let mut signer_infos: SetOfVec<SignerInfo> = SetOfVec::new();
        signer_infos
            .insert(signer_info)
            .map_err(|e| MessageError::Malformed(e.to_string()))?;

        let mut certificate_set: SetOfVec<CertificateChoices> = SetOfVec::new();
        for cert in std::iter::once(signer_certificate.clone()).chain(self.certificates) {
            certificate_set
                .insert(CertificateChoices::Certificate(cert))
                .map_err(|e| MessageError::Malformed(e.to_string()))?;
        }

        let signed_data = SignedData {
            version: cms::signed_data::CmsVersion::V1,
            digest_algorithms: DigestAlgorithmIdentifiers(digest_algorithms),
            encap_content_info: EncapsulatedContentInfo {
                econtent_type: ID_DATA,
                econtent,
            },
            certificates: Some(CertificateSet(certificate_set)),
            crls: None,
            signer_infos: SignerInfos(signer_infos),
        };

        wrap_signed_data(signed_data)
    }

    fn validate(&self) -> Result<(), MessageError> {
        if self.transaction_id.is_empty() {
            return Err(MessageError::BuilderInvalid("transaction_id is required".into()));
        }
        let is_cert_rep = self.message_type == MessageType::CertRep;
        if is_cert_rep {
            if self.pki_status.is_none() {
                return Err(MessageError::BuilderInvalid(
                        "pki_status is required on CertRep".into(),
                    ));
            }
            if self.pki_status == Some(PkiStatus::Failure) && self.fail_info.is_none() {
                return Err(MessageError::BuilderInvalid(
                        "fail_info is required when pki_status=FAILURE".into(),
                    ));
            }
            if self.recipient_nonce.is_none() {
                return Err(MessageError::BuilderInvalid(
                        "recipient_nonce is required on replies".into(),
                    ));
            }
        } else if self.pki_status.is_some() {
            return Err(MessageError::BuilderInvalid(
                    "pki_status is forbidden outside of CertRep".into(),
                ));
        }
        Ok(())
    }
}

/// Builds the degenerate `SignedData` SCEP uses to carry a freshly issued certificate: no
/// signer, no encapsulated content, just a populated `certificates` field.
pub fn build_degenerate_cms(certificates: &[Certificate]) -> Result<Vec<u8>, MessageError> {
    let mut certificate_set: SetOfVec<CertificateChoices> = SetOfVec::new();
    for cert in certificates {
        certificate_set
            .insert(CertificateChoices::Certificate(cert.clone()))
            .map_err(|e| MessageError::Malformed(e.to_string()))?;
    }

    let signed_data = SignedData {
        version: cms::signed_data::CmsVersion::V1,
        digest_algorithms: DigestAlgorithmIdentifiers(SetOfVec::new()),
        encap_content_info: EncapsulatedContentInfo {
            econtent_type: ID_DATA,
            econtent: None,
        },
        certificates: Some(CertificateSet(certificate_set)),
        crls: None,
        signer_infos: SignerInfos(SetOfVec::new()),
    };

    wrap_signed_data(signed_data)
}

/// Parses a degenerate `SignedData` back into its carried certificate set — the inverse of
/// [`build_degenerate_cms`], used by the client side of the happy-path test and by `GetCertInitial`
/// when re-reading a previously built reply's envelope content.
pub fn parse_degenerate_cms(der_bytes: &[u8]) -> Result<Vec<Certificate>, MessageError> {
    let content_info =
    ContentInfo::from_der(der_bytes).map_err(|e| MessageError::Malformed(e.to_string()))?;
    let signed_data: SignedData = content_info
        .content
        .decode_as()
        .map_err(|e| MessageError::Malformed(e.to_string()))?;
    Ok(signed_data
            .certificates
            .map(|set| {
                set.0
                    .iter()
                    .filter_map(|choice| match choice {
                        CertificateChoices::Certificate(cert) => Some(cert.clone()),
                        _ => None,
                    })
                    .collect()
            })
            .unwrap_or_default())
}

fn wrap_signed_data(signed_data: SignedData) -> Result<Vec<u8>, MessageError> {
    let content_info = ContentInfo {
        content_type: ID_SIGNED_DATA,
        content: AnyRef::from(&signed_data)
            .try_into()
            .map_err(|e: der::Error| MessageError::Malformed(e.to_string()))?,
    };
    content_info
        .to_der()
        .map_err(|e| MessageError::Malformed(e.to_string()))
}

fn insert_attribute(
    set: &mut SetOfVec<Attribute>,
    attribute: Attribute,
) -> Result<(), MessageError> {
    set.insert(attribute)
        .map_err(|e| MessageError::Malformed(e.to_string()))
}

fn printable_attribute(oid: ObjectIdentifier, value: &str) -> Result<Attribute, MessageError> {
    let ps = PrintableString::new(value).map_err(|e| MessageError::Malformed(e.to_string()))?;
    let any: AttributeValue = AnyRef::from(&ps)
        .try_into()
        .map_err(|e: der::Error| MessageError::Malformed(e.to_string()))?;
    singleton_attribute(oid, any)
}

fn octet_attribute(oid: ObjectIdentifier, bytes: &[u8]) -> Result<Attribute, MessageError> {
    let os = OctetString::new(bytes.to_vec()).map_err(|e| MessageError::Malformed(e.to_string()))?;
    let any: AttributeValue = AnyRef::from(&os)
        .try_into()
        .map_err(|e: der::Error| MessageError::Malformed(e.to_string()))?;
    singleton_attribute(oid, any)
}

fn oid_attribute(oid: ObjectIdentifier, value: ObjectIdentifier) -> Result<Attribute, MessageError> {
    let any: AttributeValue = AnyRef::from(&value)
        .try_into()
        .map_err(|e: der::Error| MessageError::Malformed(e.to_string()))?;
    singleton_attribute(oid, any)
}

fn singleton_attribute(
    oid: ObjectIdentifier,
    value: AttributeValue,
) -> Result<Attribute, MessageError> {
    let mut values: SetOfVec<AttributeValue> = SetOfVec::new();
    values
        .insert(value)
        .map_err(|e| MessageError::Malformed(e.to_string()))?;
    Ok(Attribute { oid, values })
}

/// Derives a request's `transactionID` from the SHA-256 hex digest of the signer's SPKI.
pub fn transaction_id_for_spki(spki_der: &[u8]) -> String {
    hex::encode(Sha256::digest(spki_der))
}
