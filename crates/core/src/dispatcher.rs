//! Protocol Dispatcher: resolves the top-level `GetCACert` / `GetCACaps` /
//! `PKIOperation` selector and, for `PKIOperation`, sub-dispatches on the decoded `messageType`.
//!
//! This is the one place transport-agnostic enough to sit behind either the HTTP shim
//! (`scepd-service`) or a direct test driver (`scepd-core/tests`) — everything below it is pure
//! crypto, everything above it is wire framing.

use subtle::ConstantTimeEq;
use x509_cert::Certificate;

use scepd_types::prelude::{FailInfo, MessageType, Operation, PkiStatus};

use crate::csr::Csr;
use crate::envelope::{self, ContentEncryptionAlgorithm};
use crate::error::CoreError;
use crate::keystore::{CaHandle, CaStore};
use crate::message::{self, Message, MessageBuilder};
use crate::signer::{self, IssuancePolicy};

/// Content-Type header the transport shim should send back for each kind of response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseContentType {
    X509CaCert,
    X509CaRaCert,
    PkiMessage,
    PlainText,
}

/// A fully formed dispatcher response: bytes plus the content-type the transport shim should
/// advertise.
pub struct DispatchResponse {
    pub body: Vec<u8>,
    pub content_type: ResponseContentType,
}

/// Policy knobs the dispatcher needs beyond what `CaHandle` already carries.
pub struct DispatcherConfig {
    pub force_degenerate_for_single_cert: bool,
    pub issuance_policy: IssuancePolicy,
    /// When set, `challengePassword` must match this value (constant-time). When unset, any
    /// value — including absence — is accepted, and the acceptance is logged at `warn`.
    pub challenge: Option<String>,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            force_degenerate_for_single_cert: false,
            issuance_policy: IssuancePolicy::default(),
            challenge: None,
        }
    }
}

const GET_CA_CAPS_BODY: &str = "POSTPKIOperation\nSHA-256\nAES";

/// Handles `GetCACert`/`GetCACaps`, which need no message bytes.
pub fn dispatch_no_body(
    operation: Operation,
    ca: &CaHandle,
    config: &DispatcherConfig,
) -> Result<DispatchResponse, CoreError> {
    match operation {
        Operation::GetCACert => get_ca_cert(ca, config),
        Operation::GetCACaps => Ok(DispatchResponse {
            body: GET_CA_CAPS_BODY.as_bytes().to_vec(),
            content_type: ResponseContentType::PlainText,
        }),
        Operation::PKIOperation => Err(CoreError::PolicyDenied(
            "PKIOperation requires message bytes".into(),
        )),
    }
}

fn get_ca_cert(ca: &CaHandle, config: &DispatcherConfig) -> Result<DispatchResponse, CoreError> {
    if config.force_degenerate_for_single_cert {
        let bundle = message::build_degenerate_cms(std::slice::from_ref(ca.certificate()))
            .map_err(CoreError::Message)?;
        return Ok(DispatchResponse {
            body: bundle,
            content_type: ResponseContentType::X509CaRaCert,
        });
    }
    let der = ca
        .certificate_der()
        .map_err(|e| CoreError::Message(crate::error::MessageError::Malformed(e.to_string())))?;
    Ok(DispatchResponse {
        body: der,
        content_type: ResponseContentType::X509CaCert,
    })
}

/// Handles `PKIOperation`: parses the incoming SCEP message, sub-dispatches on its messageType,
/// and returns the signed reply bytes. A failure during parsing (no transactionID could be
/// extracted) propagates as `CoreError` for the transport shim to turn into a 4xx; every failure
/// past that point becomes a CertRep/FAILURE reply carrying the request's transactionID instead.
pub fn dispatch_pki_operation(
    message_bytes: &[u8],
    ca: &CaHandle,
    store: &dyn CaStore,
    config: &DispatcherConfig,
) -> Result<DispatchResponse, CoreError> {
    let request = Message::parse(message_bytes).map_err(CoreError::Message)?;

    let reply = match request.message_type {
        MessageType::PkcsReq => {
            handle_enrollment(&request, ca, store, config, false).unwrap_or_else(as_failure)
        }
        MessageType::RenewalReq => {
            handle_enrollment(&request, ca, store, config, true).unwrap_or_else(as_failure)
        }
        // GetCertInitial (wire code 20, `MessageType::CertPoll`) should reply SUCCESS if the
        // transactionID's certificate has already been issued, else FAILURE/badRequest. This
        // server never persists transaction state past the synchronous response that issued a
        // certificate, so by construction there is never a pending issuance left to find — the
        // "else" branch is the only reachable one.
        MessageType::CertPoll => as_failure(FailInfo::BadRequest),
        // GetCert/GetCRL are optional; neither is implemented here.
        MessageType::GetCert | MessageType::GetCrl => as_failure(FailInfo::BadRequest),
        MessageType::CertRep => as_failure(FailInfo::BadRequest),
    };

    let reply_bytes = MessageBuilder {
        message_type: MessageType::CertRep,
        transaction_id: request.transaction_id.clone(),
        pki_status: Some(reply.pki_status),
        fail_info: reply.fail_info,
        recipient_nonce: Some(request.sender_nonce),
        pki_envelope: reply.pki_envelope,
        certificates: reply.certificates,
    }
    .build(ca.certificate(), ca.signing_key())
    .map_err(CoreError::Message)?;

    Ok(DispatchResponse {
        body: reply_bytes,
        content_type: ResponseContentType::PkiMessage,
    })
}

struct EnrollmentReply {
    pki_status: PkiStatus,
    fail_info: Option<FailInfo>,
    pki_envelope: Option<Vec<u8>>,
    certificates: Vec<Certificate>,
}

fn as_failure(fail_info: FailInfo) -> EnrollmentReply {
    EnrollmentReply {
        pki_status: PkiStatus::Failure,
        fail_info: Some(fail_info),
        pki_envelope: None,
        certificates: vec![],
    }
}

/// PKCSReq/RenewalReq share everything but the proof-of-possession requirement on the signer
/// certificate. Returns `Err(FailInfo)` rather than a `CoreError` because every rejection here
/// becomes a CertRep/FAILURE reply, never a transport error.
fn handle_enrollment(
    request: &Message,
    ca: &CaHandle,
    store: &dyn CaStore,
    config: &DispatcherConfig,
    require_prior_issuance: bool,
) -> Result<EnrollmentReply, FailInfo> {
    if require_prior_issuance
        && request.signer_certificate.tbs_certificate.issuer
            != ca.certificate().tbs_certificate.subject
    {
        return Err(FailInfo::BadRequest);
    }

    let envelope_bytes = request
        .enveloped_content
        .as_ref()
        .ok_or(FailInfo::BadMessageCheck)?;

    let opened = envelope::open(envelope_bytes, ca.certificate(), ca.private_key())
        .map_err(|_| FailInfo::BadMessageCheck)?;

    let csr = Csr::parse(&opened.content).map_err(|_| FailInfo::BadRequest)?;

    if !require_prior_issuance {
        check_challenge(&csr, config)?;
    }

    let issued = signer::sign(
        ca,
        store,
        csr.subject().clone(),
        csr.public_key().clone(),
        &config.issuance_policy,
    )
    .map_err(|_| FailInfo::BadRequest)?;

    let degenerate =
        message::build_degenerate_cms(&[issued.clone()]).map_err(|_| FailInfo::BadRequest)?;

    let sealed = envelope::build(
        &degenerate,
        &request.signer_certificate,
        ContentEncryptionAlgorithm::Aes256Cbc,
    )
    .map_err(|_| FailInfo::BadRequest)?;

    Ok(EnrollmentReply {
        pki_status: PkiStatus::Success,
        fail_info: None,
        pki_envelope: Some(sealed),
        certificates: vec![issued],
    })
}

/// Constant-time comparison against the configured `CHALLENGE`, permissive when unset.
fn check_challenge(csr: &Csr, config: &DispatcherConfig) -> Result<(), FailInfo> {
    match &config.challenge {
        Some(expected) => {
            let provided = csr.challenge_password().unwrap_or_default();
            let len_matches = provided.len() == expected.len();
            let bytes_match: bool = provided.as_bytes().ct_eq(expected.as_bytes()).into();
            if !len_matches || !bytes_match {
                return Err(FailInfo::BadRequest);
            }
            Ok(())
        }
        None => {
            tracing::warn!("accepting enrollment with no CHALLENGE configured (permissive mode)");
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keystore::{BootstrapPolicy, FileCaStore};
    use rand::rngs::OsRng;
    use rsa::pkcs1v15::SigningKey;
    use rsa::RsaPrivateKey;
    use sha2::Sha256;
    use spki::SubjectPublicKeyInfoOwned;
    use x509_cert::builder::{Builder, CertificateBuilder, Profile, RequestBuilder};
    use x509_cert::name::Name;
    use x509_cert::serial_number::SerialNumber;
    use x509_cert::time::Validity;

    fn device_identity(subject: &str) -> (Certificate, RsaPrivateKey, SigningKey<Sha256>) {
        use pkcs8::EncodePublicKey;

        let mut rng = OsRng;
        let private_key = RsaPrivateKey::new(&mut rng, 2048).unwrap();
        let signing_key = SigningKey::<Sha256>::new(private_key.clone());
        let subject: Name = subject.parse().unwrap();
        let spki_pem = signing_key
            .verifying_key()
            .to_public_key_pem(pkcs8::LineEnding::LF)
            .unwrap();
        let spki = SubjectPublicKeyInfoOwned::from_pem(&spki_pem).unwrap();
        let validity = Validity::from_now(time::Duration::days(365)).unwrap();
        let builder = CertificateBuilder::new(
            Profile::Root,
            SerialNumber::from(1u64),
            validity,
            subject,
            spki,
            &signing_key,
        )
        .unwrap();
        (builder.build().unwrap(), private_key, signing_key)
    }

    fn build_csr(subject: &str, signing_key: &SigningKey<Sha256>) -> Vec<u8> {
        use der::Encode;
        use x509_cert::name::Name;

        let subject: Name = subject.parse().unwrap();
        let builder = RequestBuilder::new(subject, signing_key).unwrap();
        builder
            .build::<rsa::pkcs1v15::Signature>()
            .unwrap()
            .to_der()
            .unwrap()
    }

    fn sealed_request(
        csr_der: &[u8],
        signer_cert: &Certificate,
        signer_key: &SigningKey<Sha256>,
        ca_cert: &Certificate,
        message_type: MessageType,
    ) -> Vec<u8> {
        let envelope =
            envelope::build(csr_der, ca_cert, ContentEncryptionAlgorithm::Aes256Cbc).unwrap();
        let txid = message::transaction_id_for_spki(
            &signer_cert
                .tbs_certificate
                .subject_public_key_info
                .to_der()
                .unwrap(),
        );
        MessageBuilder {
            message_type,
            transaction_id: txid,
            pki_status: None,
            fail_info: None,
            recipient_nonce: None,
            pki_envelope: Some(envelope),
            certificates: vec![],
        }
        .build(signer_cert, signer_key)
        .unwrap()
    }

    #[test]
    fn pkcs_req_happy_path_issues_certificate() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCaStore::new(dir.path());
        let ca = CaHandle::open(&store, &BootstrapPolicy::default()).unwrap();

        let (device_cert, _device_key, device_signing_key) = device_identity("CN=device-1");
        let csr_der = build_csr("CN=device-1", &device_signing_key);
        let request_bytes = sealed_request(
            &csr_der,
            &device_cert,
            &device_signing_key,
            ca.certificate(),
            MessageType::PkcsReq,
        );

        let config = DispatcherConfig::default();
        let response = dispatch_pki_operation(&request_bytes, &ca, &store, &config).unwrap();

        let reply = Message::parse(&response.body).unwrap();
        assert_eq!(reply.message_type, MessageType::CertRep);
        assert_eq!(reply.pki_status, Some(PkiStatus::Success));
        assert!(reply.enveloped_content.is_some());
    }

    #[test]
    fn bad_challenge_is_rejected_without_consuming_a_serial() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCaStore::new(dir.path());
        let ca = CaHandle::open(&store, &BootstrapPolicy::default()).unwrap();

        let (device_cert, _device_key, device_signing_key) = device_identity("CN=device-1");
        // No challengePassword attribute at all, so `check_challenge` sees an empty provided
        // value against a configured CHALLENGE and must reject it.
        let csr_der = build_csr("CN=device-1", &device_signing_key);
        let request_bytes = sealed_request(
            &csr_der,
            &device_cert,
            &device_signing_key,
            ca.certificate(),
            MessageType::PkcsReq,
        );

        let config = DispatcherConfig {
            challenge: Some("secret".to_string()),
            ..DispatcherConfig::default()
        };
        let before = store.load_serial().unwrap();
        let response = dispatch_pki_operation(&request_bytes, &ca, &store, &config).unwrap();
        let after = store.load_serial().unwrap();

        let reply = Message::parse(&response.body).unwrap();
        assert_eq!(reply.pki_status, Some(PkiStatus::Failure));
        assert_eq!(reply.fail_info, Some(FailInfo::BadRequest));
        assert_eq!(before, after);
    }

    #[test]
    fn get_ca_caps_is_exact() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCaStore::new(dir.path());
        let ca = CaHandle::open(&store, &BootstrapPolicy::default()).unwrap();
        let config = DispatcherConfig::default();

        let response = dispatch_no_body(Operation::GetCACaps, &ca, &config).unwrap();
        assert_eq!(response.body, GET_CA_CAPS_BODY.as_bytes());
    }
}
