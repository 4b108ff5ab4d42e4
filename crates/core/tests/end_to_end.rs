//! Drives the dispatcher directly against an in-memory `CaStore`, exercising end-to-end
//! scenarios without any HTTP transport involved.

use der::{Decode, Encode};
use rand::rngs::OsRng;
use rsa::pkcs1v15::SigningKey;
use rsa::RsaPrivateKey;
use scepd_core::dispatcher::{dispatch_no_body, dispatch_pki_operation, DispatcherConfig};
use scepd_core::envelope::{self, ContentEncryptionAlgorithm};
use scepd_core::keystore::{BootstrapPolicy, CaHandle, CaStore, FileCaStore};
use scepd_core::message::{self, Message, MessageBuilder};
use scepd_types::prelude::{FailInfo, MessageType, Operation, PkiStatus};
use sha2::Sha256;
use spki::SubjectPublicKeyInfoOwned;
use x509_cert::builder::{Builder, CertificateBuilder, Profile, RequestBuilder};
use x509_cert::name::Name;
use x509_cert::serial_number::SerialNumber;
use x509_cert::time::Validity;
use x509_cert::Certificate;

fn device_identity(subject: &str) -> (Certificate, SigningKey<Sha256>) {
    use pkcs8::EncodePublicKey;

    let mut rng = OsRng;
    let private_key = RsaPrivateKey::new(&mut rng, 2048).unwrap();
    let signing_key = SigningKey::<Sha256>::new(private_key);
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
    (builder.build().unwrap(), signing_key)
}

fn build_csr(subject: &str, signing_key: &SigningKey<Sha256>) -> Vec<u8> {
    let subject: Name = subject.parse().unwrap();
    let builder = RequestBuilder::new(subject, signing_key).unwrap();
    builder
        .build::<rsa::pkcs1v15::Signature>()
        .unwrap()
        .to_der()
        .unwrap()
}

fn pkcs_req_message(
    device_cert: &Certificate,
    device_signing_key: &SigningKey<Sha256>,
    ca_cert: &Certificate,
) -> (Vec<u8>, [u8; 16]) {
    let csr_der = build_csr("CN=device-1", device_signing_key);
    let envelope = envelope::build(&csr_der, ca_cert, ContentEncryptionAlgorithm::Aes256Cbc).unwrap();
    let spki_der = device_cert
        .tbs_certificate
        .subject_public_key_info
        .to_der()
        .unwrap();
    let txid = message::transaction_id_for_spki(&spki_der);

    let der = MessageBuilder {
        message_type: MessageType::PkcsReq,
        transaction_id: txid,
        pki_status: None,
        fail_info: None,
        recipient_nonce: None,
        pki_envelope: Some(envelope),
        certificates: vec![],
    }
    .build(device_cert, device_signing_key)
    .unwrap();

    let sender_nonce = Message::parse(&der).unwrap().sender_nonce;
    (der, sender_nonce)
}

#[test]
fn cold_start_get_ca_cert() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileCaStore::new(dir.path());
    let ca = CaHandle::open(
        &store,
        &BootstrapPolicy {
            common_name: "Test SCEP CA".to_string(),
            ..BootstrapPolicy::default()
        },
    )
    .unwrap();

    let response = dispatch_no_body(Operation::GetCACert, &ca, &DispatcherConfig::default()).unwrap();
    let cert = Certificate::from_der(&response.body).unwrap();
    assert_eq!(cert.tbs_certificate.subject.to_string(), "CN=Test SCEP CA");
}

#[test]
fn get_ca_caps_is_exact_with_no_trailing_newline() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileCaStore::new(dir.path());
    let ca = CaHandle::open(&store, &BootstrapPolicy::default()).unwrap();

    let response = dispatch_no_body(Operation::GetCACaps, &ca, &DispatcherConfig::default()).unwrap();
    assert_eq!(
        String::from_utf8(response.body).unwrap(),
        "POSTPKIOperation\nSHA-256\nAES"
    );
}

#[test]
fn pkcs_req_happy_path_round_trips_through_the_client_identity() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileCaStore::new(dir.path());
    let ca = CaHandle::open(&store, &BootstrapPolicy::default()).unwrap();

    let (device_cert, device_key) = device_identity("CN=device-1");
    let (request_der, sender_nonce) = pkcs_req_message(&device_cert, &device_key, ca.certificate());

    let response =
        dispatch_pki_operation(&request_der, &ca, &store, &DispatcherConfig::default()).unwrap();

    let reply = Message::parse(&response.body).unwrap();
    assert_eq!(reply.message_type, MessageType::CertRep);
    assert_eq!(reply.pki_status, Some(PkiStatus::Success));
    assert_eq!(reply.recipient_nonce, Some(sender_nonce));

    let opened = envelope::open(
        reply.enveloped_content.as_deref().unwrap(),
        &device_cert,
        device_key.as_ref(),
    )
    .unwrap();
    let issued_certs = message::parse_degenerate_cms(&opened.content).unwrap();
    assert_eq!(issued_certs.len(), 1);
    assert_eq!(
        issued_certs[0].tbs_certificate.subject_public_key_info,
        device_cert.tbs_certificate.subject_public_key_info
    );
    assert_eq!(
        issued_certs[0].tbs_certificate.issuer,
        ca.certificate().tbs_certificate.subject
    );
}

#[test]
fn bad_challenge_rejects_without_consuming_a_serial() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileCaStore::new(dir.path());
    let ca = CaHandle::open(&store, &BootstrapPolicy::default()).unwrap();

    let (device_cert, device_key) = device_identity("CN=device-1");
    let (request_der, _) = pkcs_req_message(&device_cert, &device_key, ca.certificate());

    let config = DispatcherConfig {
        challenge: Some("secret".to_string()),
        ..DispatcherConfig::default()
    };
    let before = store.load_serial().unwrap();
    let response = dispatch_pki_operation(&request_der, &ca, &store, &config).unwrap();
    let after = store.load_serial().unwrap();

    let reply = Message::parse(&response.body).unwrap();
    assert_eq!(reply.pki_status, Some(PkiStatus::Failure));
    assert_eq!(reply.fail_info, Some(FailInfo::BadRequest));
    assert_eq!(before, after);
}

#[test]
fn tampered_outer_signature_is_rejected_before_dispatch() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileCaStore::new(dir.path());
    let ca = CaHandle::open(&store, &BootstrapPolicy::default()).unwrap();

    let (device_cert, device_key) = device_identity("CN=device-1");
    let (mut request_der, _) = pkcs_req_message(&device_cert, &device_key, ca.certificate());

    let before = store.load_serial().unwrap();
    let last = request_der.len() - 1;
    request_der[last] ^= 0xFF;

    let result = dispatch_pki_operation(&request_der, &ca, &store, &DispatcherConfig::default());
    assert!(result.is_err());
    let after = store.load_serial().unwrap();
    assert_eq!(before, after);
}

#[test]
fn unknown_message_type_yields_cert_rep_failure_with_echoed_transaction_id() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileCaStore::new(dir.path());
    let ca = CaHandle::open(&store, &BootstrapPolicy::default()).unwrap();

    let (device_cert, device_key) = device_identity("CN=device-1");
    let der = MessageBuilder {
        message_type: MessageType::GetCert,
        transaction_id: "deadbeef".to_string(),
        pki_status: None,
        fail_info: None,
        recipient_nonce: None,
        pki_envelope: None,
        certificates: vec![],
    }
    .build(&device_cert, &device_key)
    .unwrap();

    let response =
        dispatch_pki_operation(&der, &ca, &store, &DispatcherConfig::default()).unwrap();
    let reply = Message::parse(&response.body).unwrap();
    assert_eq!(reply.pki_status, Some(PkiStatus::Failure));
    assert_eq!(reply.fail_info, Some(FailInfo::BadRequest));
    assert_eq!(reply.transaction_id, "deadbeef");
}
