//! Envelope Codec: builds and opens CMS `EnvelopedData` — RSA key-transport
//! to a recipient certificate's public key wrapping a fresh content-encryption key, and
//! AES/3DES-CBC symmetric encryption of the payload itself.

use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use cms::content_info::ContentInfo;
use cms::enveloped_data::{
    EncryptedContentInfo, EnvelopedData, KeyTransRecipientInfo, RecipientIdentifier,
    RecipientInfo, RecipientInfos,
};
use const_oid::db::rfc5911::{
    ID_AES_128_CBC, ID_AES_256_CBC, ID_DES_EDE_3_CBC, ID_RSAES_PKCS_1_V1_5,
};
use der::asn1::OctetString;
use der::{AnyRef, Decode, Encode};
use rand::rngs::OsRng;
use rand::RngCore;
use rsa::{Pkcs1v15Encrypt, RsaPrivateKey, RsaPublicKey};
use spki::AlgorithmIdentifierOwned;
use x509_cert::Certificate;

use crate::error::EnvelopeError;

type Aes128CbcEnc = cbc::Encryptor<aes::Aes128>;
type Aes128CbcDec = cbc::Decryptor<aes::Aes128>;
type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;
type Des3CbcEnc = cbc::Encryptor<des::TdesEde3>;
type Des3CbcDec = cbc::Decryptor<des::TdesEde3>;

/// Content-encryption algorithms this codec supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentEncryptionAlgorithm {
    Aes128Cbc,
    Aes256Cbc,
    DesEde3Cbc,
}

impl ContentEncryptionAlgorithm {
    fn key_len(self) -> usize {
        match self {
            ContentEncryptionAlgorithm::Aes128Cbc => 16,
            ContentEncryptionAlgorithm::Aes256Cbc => 32,
            ContentEncryptionAlgorithm::DesEde3Cbc => 24,
        }
    }

    fn iv_len(self) -> usize {
        match self {
            ContentEncryptionAlgorithm::Aes128Cbc | ContentEncryptionAlgorithm::Aes256Cbc => 16,
            ContentEncryptionAlgorithm::DesEde3Cbc => 8,
        }
    }

    fn oid(self) -> const_oid::ObjectIdentifier {
        match self {
            ContentEncryptionAlgorithm::Aes128Cbc => ID_AES_128_CBC,
            ContentEncryptionAlgorithm::Aes256Cbc => ID_AES_256_CBC,
            ContentEncryptionAlgorithm::DesEde3Cbc => ID_DES_EDE_3_CBC,
        }
    }

    fn from_oid(oid: const_oid::ObjectIdentifier) -> Option<Self> {
        match oid {
            ID_AES_128_CBC => Some(ContentEncryptionAlgorithm::Aes128Cbc),
            ID_AES_256_CBC => Some(ContentEncryptionAlgorithm::Aes256Cbc),
            ID_DES_EDE_3_CBC => Some(ContentEncryptionAlgorithm::DesEde3Cbc),
            _ => None,
        }
    }
}

/// A `CMS EnvelopedData` opened against the CA's own key (or, symmetrically, about to be built
/// for a recipient's public key).
pub struct OpenedEnvelope {
    pub algorithm: ContentEncryptionAlgorithm,
    pub content: Vec<u8>,
}

/// Opens `der_bytes` (a `ContentInfo` wrapping `EnvelopedData`) against `recipient_cert`'s issuer
/// and serial, decrypting with `recipient_key`.
pub fn open(
    der_bytes: &[u8],
    recipient_cert: &Certificate,
    recipient_key: &RsaPrivateKey,
) -> Result<OpenedEnvelope, EnvelopeError> {
    let content_info =
    ContentInfo::from_der(der_bytes).map_err(|e| EnvelopeError::Malformed(e.to_string()))?;
    let enveloped: EnvelopedData = content_info
        .content
        .decode_as()
        .map_err(|e| EnvelopeError::Malformed(e.to_string()))?;

    let issuer = &recipient_cert.tbs_certificate.issuer;
    let serial = &recipient_cert.tbs_certificate.serial_number;

    let recipient_info = enveloped
        .recip_infos
        .0
        .iter()
        .find_map(|ri| match ri {
            RecipientInfo::Ktri(ktri) => match &ktri.rid {
                RecipientIdentifier::IssuerAndSerialNumber(isn) => {
                    if &isn.issuer == issuer && &isn.serial_number == serial {
                        Some(ktri)
                    } else {
                        None
                    }
                }
                _ => None,
            },
            _ => None,
        })
        .ok_or(EnvelopeError::NoMatchingRecipient)?;

    let encrypted_key = recipient_info.enc_key.as_bytes();
    let cek = recipient_key
        .decrypt(Pkcs1v15Encrypt, encrypted_key)
        .map_err(|_| EnvelopeError::BadDecrypt)?;

    let eci = &enveloped.encrypted_content_info;
    let algorithm = ContentEncryptionAlgorithm::from_oid(eci.content_enc_alg.oid)
        .ok_or(EnvelopeError::UnsupportedAlgorithm)?;

    let iv = eci
        .content_enc_alg
        .parameters
        .as_ref()
        .ok_or_else(|| EnvelopeError::Malformed("missing content-encryption IV".into()))?
        .to_der()
        .map_err(|e| EnvelopeError::Malformed(e.to_string()))?;
    let iv = OctetString::from_der(&iv)
        .map_err(|e| EnvelopeError::Malformed(e.to_string()))?
        .as_bytes()
        .to_vec();

    let ciphertext = eci
        .encrypted_content
        .as_ref()
        .ok_or_else(|| EnvelopeError::Malformed("EnvelopedData carries no content".into()))?
        .as_bytes()
        .to_vec();

    let plaintext = decrypt_content(algorithm, &cek, &iv, &ciphertext)?;

    Ok(OpenedEnvelope {
            algorithm,
            content: plaintext,
        })
}

/// Builds a fresh `EnvelopedData` carrying `content`, encrypted under a new CEK/IV and
/// key-transported to `recipient_cert`'s RSA public key.
pub fn build(
    content: &[u8],
    recipient_cert: &Certificate,
    algorithm: ContentEncryptionAlgorithm,
) -> Result<Vec<u8>, EnvelopeError> {
    let recipient_key = RsaPublicKey::try_from(
        recipient_cert
            .tbs_certificate
            .subject_public_key_info
            .clone(),
    )
        .map_err(|_| EnvelopeError::Malformed("recipient SPKI is not RSA".into()))?;

    let mut rng = OsRng;
    let mut cek = vec![0u8; algorithm.key_len()];
    rng.fill_bytes(&mut cek);
    let mut iv = vec![0u8; algorithm.iv_len()];
    rng.fill_bytes(&mut iv);

    let ciphertext = encrypt_content(algorithm, &cek, &iv, content)?;

    let encrypted_key = recipient_key
        .encrypt(&mut rng, Pkcs1v15Encrypt, &cek)
        .map_err(|e| EnvelopeError::Malformed(e.to_string()))?;

    let rid = RecipientIdentifier::IssuerAndSerialNumber(cms::cert::IssuerAndSerialNumber {
            issuer: recipient_cert.tbs_certificate.issuer.clone(),
            serial_number: recipient_cert.tbs_certificate.serial_number.clone(),
        });

    let ktri = KeyTransRecipientInfo {
        version: cms::enveloped_data::CmsVersion::V0,
        rid,
        key_enc_alg: AlgorithmIdentifierOwned {
            oid: ID_RSAES_PKCS_1_V1_5,
            parameters: Some(der::Any::from(der::asn1::Null)),
        },
        enc_key: OctetString::new(encrypted_key)
            .map_err(|e| EnvelopeError::Malformed(e.to_string()))?,
    };

    let iv_any = der::Any::from(
        OctetString::new(iv).map_err(|e| EnvelopeError::Malformed(e.to_string()))?,
    );

    let enveloped = EnvelopedData {
        version: cms::enveloped_data::CmsVersion::V0,
        originator_info: None,
        recip_infos: RecipientInfos(vec![RecipientInfo::Ktri(ktri)].try_into().map_err(
                |_| EnvelopeError::Malformed("failed to build RecipientInfos set".into()),
            )?),
        encrypted_content_info: EncryptedContentInfo {
            content_type: const_oid::db::rfc5911::ID_DATA,
            content_enc_alg: AlgorithmIdentifierOwned {
                oid: algorithm.oid(),
                parameters: Some(iv_any),
            },
            encrypted_content: Some(
                OctetString::new(ciphertext).map_err(|e| EnvelopeError::Malformed(e.to_string()))?,
            ),
        },
        unprotected_attrs: None,
    };

    let content_info = ContentInfo {
        content_type: const_oid::db::rfc5911::ID_ENVELOPED_DATA,
        content: AnyRef::from(&enveloped)
            .try_into()
            .map_err(|e: der::Error| EnvelopeError::Malformed(e.to_string()))?,
    };

    content_info
        .to_der()
        .map_err(|e| EnvelopeError::Malformed(e.to_string()))
}

fn decrypt_content(
    algorithm: ContentEncryptionAlgorithm,
    key: &[u8],
    iv: &[u8],
    ciphertext: &[u8],
) -> Result<Vec<u8>, EnvelopeError> {
    let mut buf = ciphertext.to_vec();
    let plaintext = match algorithm {
        ContentEncryptionAlgorithm::Aes128Cbc => Aes128CbcDec::new(key.into(), iv.into())
            .decrypt_padded_mut::<Pkcs7>(&mut buf)
            .map_err(|_| EnvelopeError::BadDecrypt)?
            .to_vec(),
        ContentEncryptionAlgorithm::Aes256Cbc => Aes256CbcDec::new(key.into(), iv.into())
            .decrypt_padded_mut::<Pkcs7>(&mut buf)
            .map_err(|_| EnvelopeError::BadDecrypt)?
            .to_vec(),
        ContentEncryptionAlgorithm::DesEde3Cbc => Des3CbcDec::new(key.into(), iv.into())
            .decrypt_padded_mut::<Pkcs7>(&mut buf)
            .map_err(|_| EnvelopeError::BadDecrypt)?
            .to_vec(),
    };
    Ok(plaintext)
}

fn encrypt_content(
    algorithm: ContentEncryptionAlgorithm,
    key: &[u8],
    iv: &[u8],
    plaintext: &[u8],
) -> Result<Vec<u8>, EnvelopeError> {
    let ciphertext = match algorithm {
        ContentEncryptionAlgorithm::Aes128Cbc => {
            Aes128CbcEnc::new(key.into(), iv.into()).encrypt_padded_vec_mut::<Pkcs7>(plaintext)
        }
        ContentEncryptionAlgorithm::Aes256Cbc => {
            Aes256CbcEnc::new(key.into(), iv.into()).encrypt_padded_vec_mut::<Pkcs7>(plaintext)
        }
        ContentEncryptionAlgorithm::DesEde3Cbc => {
            Des3CbcEnc::new(key.into(), iv.into()).encrypt_padded_vec_mut::<Pkcs7>(plaintext)
        }
    };
    Ok(ciphertext)
}
