//! Drives end-to-end scenarios through the real `axum` HTTP surface with `axum-test`'s
//! `TestServer`, including the GET `message` param `+`/space workaround scenario.

use std::sync::Arc;

use axum_test::TestServer;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use der::{Decode, Encode};
use rand::rngs::OsRng;
use rsa::pkcs1v15::SigningKey;
use rsa::RsaPrivateKey;
use scepd_core::dispatcher::DispatcherConfig;
use scepd_core::envelope::{self, ContentEncryptionAlgorithm};
use scepd_core::keystore::{BootstrapPolicy, CaHandle, FileCaStore};
use scepd_core::message::{self, Message, MessageBuilder};
use scepd_service::{create_router, AppState};
use scepd_types::prelude::{MessageType, PkiStatus};
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

fn build_pkcs_req(device_cert: &Certificate, device_key: &SigningKey<Sha256>, ca_cert: &Certificate) -> Vec<u8> {
    let subject: Name = "CN=device-1".parse().unwrap();
    let csr_der = RequestBuilder::new(subject, device_key)
        .unwrap()
        .build::<rsa::pkcs1v15::Signature>()
        .unwrap()
        .to_der()
        .unwrap();

    let sealed = envelope::build(&csr_der, ca_cert, ContentEncryptionAlgorithm::Aes256Cbc).unwrap();
    let spki_der = device_cert
        .tbs_certificate
        .subject_public_key_info
        .to_der()
        .unwrap();
    let txid = message::transaction_id_for_spki(&spki_der);

    MessageBuilder {
        message_type: MessageType::PkcsReq,
        transaction_id: txid,
        pki_status: None,
        fail_info: None,
        recipient_nonce: None,
        pki_envelope: Some(sealed),
        certificates: vec![],
    }
    .build(device_cert, device_key)
    .unwrap()
}

fn test_server(common_name: &str) -> TestServer {
    let dir = tempfile::tempdir().unwrap();
    let store = FileCaStore::new(dir.path());
    let ca = CaHandle::open(
        &store,
        &BootstrapPolicy {
            common_name: common_name.to_string(),
            ..BootstrapPolicy::default()
        },
    )
    .unwrap();
    std::mem::forget(dir); // keep the tempdir alive for the server's lifetime

    let state = AppState {
        ca: Arc::new(ca),
        store: Arc::new(store),
        dispatcher_config: Arc::new(DispatcherConfig::default()),
    };

    TestServer::new(create_router(state)).unwrap()
}

#[tokio::test]
async fn cold_start_get_ca_cert() {
    let server = test_server("Integration Test CA");

    let response = server.get("/?operation=GetCACert").await;
    response.assert_status_ok();
    assert_eq!(
        response.header("content-type"),
        "application/x-x509-ca-cert"
    );

    let cert = Certificate::from_der(response.as_bytes()).unwrap();
    assert_eq!(
        cert.tbs_certificate.subject.to_string(),
        "CN=Integration Test CA"
    );
}

#[tokio::test]
async fn get_ca_caps() {
    let server = test_server("Test CA");

    let response = server.get("/?operation=GetCACaps").await;
    response.assert_status_ok();
    assert_eq!(response.text(), "POSTPKIOperation\nSHA-256\nAES");
}

#[tokio::test]
async fn pkcs_req_happy_path_over_post() {
    let server = test_server("Test CA");

    let ca_cert_bytes = server.get("/?operation=GetCACert").await.as_bytes().to_vec();
    let ca_cert = Certificate::from_der(&ca_cert_bytes).unwrap();

    let (device_cert, device_key) = device_identity("CN=device-1");
    let request_der = build_pkcs_req(&device_cert, &device_key, &ca_cert);

    let response = server
        .post("/?operation=PKIOperation")
        .bytes(request_der.into())
        .await;
    response.assert_status_ok();
    assert_eq!(response.header("content-type"), "application/x-pki-message");

    let reply = Message::parse(response.as_bytes()).unwrap();
    assert_eq!(reply.message_type, MessageType::CertRep);
    assert_eq!(reply.pki_status, Some(PkiStatus::Success));

    let opened = envelope::open(
        reply.enveloped_content.as_deref().unwrap(),
        &device_cert,
        device_key.as_ref(),
    )
    .unwrap();
    let issued = message::parse_degenerate_cms(&opened.content).unwrap();
    assert_eq!(issued.len(), 1);
}

#[tokio::test]
async fn pkcs_req_over_get_with_space_encoded_plus() {
    let server = test_server("Test CA");

    let ca_cert_bytes = server.get("/?operation=GetCACert").await.as_bytes().to_vec();
    let ca_cert = Certificate::from_der(&ca_cert_bytes).unwrap();

    let (device_cert, device_key) = device_identity("CN=device-2");
    let request_der = build_pkcs_req(&device_cert, &device_key, &ca_cert);
    let encoded = BASE64.encode(&request_der);
    // Simulate a client that sent literal '+' as ' '.
    let corrupted = encoded.replace('+', " ");

    let url = format!("/?operation=PKIOperation&message={}", urlencode(&corrupted));
    let response = server.get(&url).await;
    response.assert_status_ok();

    let reply = Message::parse(response.as_bytes()).unwrap();
    assert_eq!(reply.pki_status, Some(PkiStatus::Success));
}

#[tokio::test]
async fn post_with_large_body_succeeds() {
    let server = test_server("Test CA");

    let ca_cert_bytes = server.get("/?operation=GetCACert").await.as_bytes().to_vec();
    let ca_cert = Certificate::from_der(&ca_cert_bytes).unwrap();

    let (device_cert, device_key) = device_identity("CN=device-3");
    let request_der = build_pkcs_req(&device_cert, &device_key, &ca_cert);

    // `axum-test`'s `TestServer` calls into the router in-process and has no knob for
    // Transfer-Encoding, so this exercises the handler against a realistically sized PKIOperation
    // body rather than real chunked framing.
    let response = server
        .post("/?operation=PKIOperation")
        .bytes(request_der.into())
        .await;
    response.assert_status_ok();
    let reply = Message::parse(response.as_bytes()).unwrap();
    assert_eq!(reply.pki_status, Some(PkiStatus::Success));
}

fn urlencode(s: &str) -> String {
    s.chars()
        .map(|c| match c {
            'A'..='Z' | 'a'..='z' | '0'..='9' | '-' | '_' | '.' | '~' => c.to_string(),
            ' ' => "%20".to_string(),
            other => format!("%{:02X}", other as u32),
        })
        .collect()
}
