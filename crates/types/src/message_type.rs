//! SCEP `messageType` attribute values (draft-gutmann-scep-19 §3.2.1.2).
//!
//! On the wire, `messageType` is a PrintableString carrying the decimal digits of one of
//! these codes, not a native INTEGER — see [`MessageType::to_wire`]/[`MessageType::from_wire`].

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    /// PKCS#10 enrollment request.
    PkcsReq,
    /// Certificate renewal request; same wire shape as PkcsReq but the signer must already
    /// chain to the CA.
    RenewalReq,
    /// Poll for a certificate whose issuance is still pending.
    CertPoll,
    /// Retrieve a previously issued certificate by issuer/serial.
    GetCert,
    /// Retrieve the current CRL.
    GetCrl,
    /// A CA reply (always a response, never a request).
    CertRep,
}

impl MessageType {
    pub const fn to_wire(self) -> u8 {
        match self {
            MessageType::CertRep => 3,
            MessageType::RenewalReq => 17,
            MessageType::CertPoll => 20,
            MessageType::GetCert => 21,
            MessageType::GetCrl => 22,
            MessageType::PkcsReq => 19,
        }
    }

    pub const fn from_wire(code: u8) -> Option<Self> {
        match code {
            3 => Some(MessageType::CertRep),
            17 => Some(MessageType::RenewalReq),
            19 => Some(MessageType::PkcsReq),
            20 => Some(MessageType::CertPoll),
            21 => Some(MessageType::GetCert),
            22 => Some(MessageType::GetCrl),
            _ => None,
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_wire())
    }
}
