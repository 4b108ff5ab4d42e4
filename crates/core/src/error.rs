//! Unified error hierarchy for the SCEP issuance pipeline.
//!
//! Each sub-enum corresponds to one component of the issuance pipeline; [`CoreError`] aggregates
//! them the way a transport shim wants to see them, with [`CoreError::kind`] mapping each onto a
//! named error kind.

use thiserror::Error;

/// One of the named error kinds, used by the transport shim to pick an
/// HTTP status code and, where it calls for it, a SCEP `CertRep/FAILURE/*` reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    TransportMalformed,
    UnknownOperation,
    MessageMalformed,
    SignatureInvalid,
    EnvelopeFailure,
    CsrInvalid,
    ChallengeFailed,
    PolicyDenied,
    Internal,
}

impl ErrorKind {
    /// The slug for this error kind, suitable for a JSON error body's `error` field.
    pub const fn as_str(self) -> &'static str {
        match self {
            ErrorKind::TransportMalformed => "transport-malformed",
            ErrorKind::UnknownOperation => "unknown-operation",
            ErrorKind::MessageMalformed => "message-malformed",
            ErrorKind::SignatureInvalid => "signature-invalid",
            ErrorKind::EnvelopeFailure => "envelope-failure",
            ErrorKind::CsrInvalid => "csr-invalid",
            ErrorKind::ChallengeFailed => "challenge-failed",
            ErrorKind::PolicyDenied => "policy-denied",
            ErrorKind::Internal => "internal",
        }
    }
}

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("keystore operation failed")]
    Keystore(#[from] KeystoreError),

    #[error("CSR inspection failed")]
    Csr(#[from] CsrError),

    #[error("envelope codec failed")]
    Envelope(#[from] EnvelopeError),

    #[error("SCEP message codec failed")]
    Message(#[from] MessageError),

    #[error("CA signer failed")]
    Signer(#[from] SignerError),

    #[error("challenge password did not match")]
    ChallengeFailed,

    #[error("policy denied the request")]
    PolicyDenied(String),
}

impl CoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CoreError::Keystore(_) | CoreError::Signer(SignerError::SerialPersist(_)) => {
                ErrorKind::Internal
            }
            CoreError::Csr(_) => ErrorKind::CsrInvalid,
            CoreError::Envelope(_) => ErrorKind::EnvelopeFailure,
            CoreError::Message(MessageError::SignatureInvalid) => ErrorKind::SignatureInvalid,
            CoreError::Message(_) => ErrorKind::MessageMalformed,
            CoreError::Signer(_) => ErrorKind::Internal,
            CoreError::ChallengeFailed => ErrorKind::ChallengeFailed,
            CoreError::PolicyDenied(_) => ErrorKind::PolicyDenied,
        }
    }
}

/// Errors from the CA Keystore. Every variant here is fatal to startup or to
/// the request that triggered it — none of them represent a recoverable SCEP-level condition.
#[derive(Error, Debug)]
pub enum KeystoreError {
    #[error("I/O error reading or writing CA state: {0}")]
    Io(#[from] std::io::Error),

    #[error("stored CA key material is malformed: {0}")]
    MalformedKey(String),

    #[error("stored CA certificate is malformed: {0}")]
    MalformedCertificate(String),

    #[error("stored serial counter is malformed: {0}")]
    MalformedSerial(String),

    #[error("RSA key generation failed: {0}")]
    KeyGeneration(String),

    #[error("self-signed certificate construction failed: {0}")]
    CertificateBuild(String),
}

/// Errors from the CSR Inspector.
#[derive(Error, Debug)]
pub enum CsrError {
    #[error("CSR is not valid DER PKCS#10: {0}")]
    Malformed(String),

    #[error("CSR inner signature does not verify against its own public key")]
    SignatureInvalid,

    #[error("CSR subject is empty")]
    EmptySubject,
}

/// Errors from the Envelope Codec.
#[derive(Error, Debug)]
pub enum EnvelopeError {
    #[error("EnvelopedData is not valid DER CMS: {0}")]
    Malformed(String),

    #[error("content-encryption algorithm is not supported")]
    UnsupportedAlgorithm,

    #[error("no RecipientInfo targets the CA certificate")]
    NoMatchingRecipient,

    #[error("decryption failed")]
    BadDecrypt,
}

/// Errors from the SCEP Message Codec.
#[derive(Error, Debug)]
pub enum MessageError {
    #[error("message is not valid DER CMS SignedData: {0}")]
    Malformed(String),

    #[error("SignedData must carry exactly one signer")]
    WrongSignerCount,

    #[error("outer SignedData signature does not verify")]
    SignatureInvalid,

    #[error("required SCEP attribute `{0}` is missing")]
    MissingAttribute(&'static str),

    #[error("senderNonce must be 16 bytes, got {0}")]
    BadNonceLength(usize),

    #[error("messageType `{0}` is not a recognized SCEP message type")]
    UnknownMessageType(u8),

    #[error("invalid message builder configuration: {0}")]
    BuilderInvalid(String),
}

/// Errors from the CA Signer.
#[derive(Error, Debug)]
pub enum SignerError {
    #[error("certificate construction failed: {0}")]
    CertificateBuild(String),

    #[error("serial counter persistence failed: {0}")]
    SerialPersist(#[from] KeystoreError),
}
