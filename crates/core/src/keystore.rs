//! CA Keystore: persists and loads the CA private key and
//! self-signed certificate, and the monotonic serial counter that backs issuance.

use std::fs;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use der::{Decode, Encode};
use pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey, LineEnding};
use rand::rngs::OsRng;
use rsa::pkcs1v15::SigningKey;
use rsa::RsaPrivateKey;
use sha2::Sha256;
use signature::Keypair;
use spki::SubjectPublicKeyInfoOwned;
use x509_cert::builder::{Builder, CertificateBuilder, Profile};
use x509_cert::ext::pkix::{
    AuthorityKeyIdentifier, BasicConstraints, KeyUsage, KeyUsages, SubjectKeyIdentifier,
};
use x509_cert::name::Name;
use x509_cert::serial_number::SerialNumber;
use x509_cert::time::Validity;
use x509_cert::Certificate;

use crate::error::KeystoreError;

/// Storage collaborator for CA key material and the serial counter.
///
/// Implementations are responsible for making `store_serial` crash-safe: a caller that observes
/// a successful return has a durable guarantee that the value will be read back on the next
/// `load_serial`, even across a process restart.
pub trait CaStore: Send + Sync {
    fn exists(&self) -> Result<bool, KeystoreError>;
    fn load_key_and_cert(&self) -> Result<(RsaPrivateKey, Certificate), KeystoreError>;
    fn save_key_and_cert(&self, key: &RsaPrivateKey, cert: &Certificate) -> Result<(), KeystoreError>;
    fn load_serial(&self) -> Result<u64, KeystoreError>;
    fn store_serial(&self, next: u64) -> Result<(), KeystoreError>;
}

/// Flat-file `CaStore` rooted at a directory: `ca.key` (PKCS#8 PEM), `ca.pem` (X.509 PEM),
/// `serial` (ASCII decimal).
pub struct FileCaStore {
    root: PathBuf,
}

impl FileCaStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn key_path(&self) -> PathBuf {
        self.root.join("ca.key")
    }

    fn cert_path(&self) -> PathBuf {
        self.root.join("ca.pem")
    }

    fn serial_path(&self) -> PathBuf {
        self.root.join("serial")
    }

    /// Writes `contents` to `path` via a temp-file-then-rename so a crash mid-write never leaves
    /// a partially-written file behind.
    fn write_atomic(path: &Path, contents: &[u8]) -> Result<(), KeystoreError> {
        Self::write_atomic_with_mode(path, contents, None)
    }

    /// As [`Self::write_atomic`], additionally chmod-ing the file to `mode` on Unix before the
    /// rename — used for `ca.key`, which is written at `0600`.
    fn write_atomic_with_mode(
        path: &Path,
        contents: &[u8],
        #[cfg_attr(not(unix), allow(unused_variables))] mode: Option<u32>,
    ) -> Result<(), KeystoreError> {
        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(dir)?;
        let tmp_path = dir.join(format!(
            ".{}.tmp",
            path.file_name().and_then(|n| n.to_str()).unwrap_or("scepd")
        ));
        {
            let mut tmp = fs::File::create(&tmp_path)?;
            tmp.write_all(contents)?;
            tmp.sync_all()?;
        }
        #[cfg(unix)]
        if let Some(mode) = mode {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&tmp_path, fs::Permissions::from_mode(mode))?;
        }
        fs::rename(&tmp_path, path)?;
        Ok(())
    }
}

impl CaStore for FileCaStore {
    fn exists(&self) -> Result<bool, KeystoreError> {
        Ok(self.key_path().exists() && self.cert_path().exists())
    }

    fn load_key_and_cert(&self) -> Result<(RsaPrivateKey, Certificate), KeystoreError> {
        let key_pem = fs::read_to_string(self.key_path())?;
        let key = RsaPrivateKey::from_pkcs8_pem(&key_pem)
            .map_err(|e| KeystoreError::MalformedKey(e.to_string()))?;

        let cert_pem = fs::read_to_string(self.cert_path())?;
        let cert = pem_to_certificate(&cert_pem)
            .map_err(|e| KeystoreError::MalformedCertificate(e.to_string()))?;

        Ok((key, cert))
    }

    fn save_key_and_cert(&self, key: &RsaPrivateKey, cert: &Certificate) -> Result<(), KeystoreError> {
        let key_pem = key
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(|e| KeystoreError::MalformedKey(e.to_string()))?;
        Self::write_atomic_with_mode(&self.key_path(), key_pem.as_bytes(), Some(0o600))?;

        let cert_pem = certificate_to_pem(cert)
            .map_err(|e| KeystoreError::MalformedCertificate(e.to_string()))?;
        Self::write_atomic(&self.cert_path(), cert_pem.as_bytes())?;

        Ok(())
    }

    fn load_serial(&self) -> Result<u64, KeystoreError> {
        let path = self.serial_path();
        if !path.exists() {
            return Ok(0);
        }
        let raw = fs::read_to_string(path)?;
        raw.trim()
            .parse::<u64>()
            .map_err(|e| KeystoreError::MalformedSerial(e.to_string()))
    }

    fn store_serial(&self, next: u64) -> Result<(), KeystoreError> {
        Self::write_atomic(&self.serial_path(), next.to_string().as_bytes())
    }
}

fn pem_to_certificate(pem: &str) -> Result<Certificate, String> {
    let (_label, der_bytes) =
        pem_rfc7468::decode_vec(pem.as_bytes()).map_err(|e| e.to_string())?;
    Certificate::from_der(&der_bytes).map_err(|e| e.to_string())
}

fn certificate_to_pem(cert: &Certificate) -> Result<String, String> {
    let der_bytes = cert.to_der().map_err(|e| e.to_string())?;
    pem_rfc7468::encode_string("CERTIFICATE", pem_rfc7468::LineEnding::LF, &der_bytes)
        .map_err(|e| e.to_string())
}

/// Configuration for bootstrapping a CA that was not found on disk.
pub struct BootstrapPolicy {
    pub key_bits: usize,
    pub common_name: String,
    pub lifetime_days: i64,
}

impl Default for BootstrapPolicy {
    fn default() -> Self {
        Self {
            key_bits: 2048,
            common_name: "SCEP CA".to_string(),
            lifetime_days: 3650,
        }
    }
}

/// A loaded (or freshly bootstrapped) CA: signing key, self-signed certificate, and the
/// serial-counter discipline used for issuance.
pub struct CaHandle {
    signing_key: SigningKey<Sha256>,
    certificate: Certificate,
    serial_lock: Mutex<()>,
}

impl CaHandle {
    /// Loads the CA from `store`, bootstrapping it under `policy` if it doesn't exist yet.
    ///
    /// Any failure here is fatal to startup — there is deliberately no path that silently
    /// regenerates a malformed keystore, since that would invalidate every certificate issued
    /// so far.
    pub fn open(store: &dyn CaStore, policy: &BootstrapPolicy) -> Result<Self, KeystoreError> {
        if store.exists()? {
            let (key, certificate) = store.load_key_and_cert()?;
            let signing_key = SigningKey::<Sha256>::new(key);
            return Ok(Self {
                signing_key,
                certificate,
                serial_lock: Mutex::new(()),
            });
        }

        tracing::info!(key_bits = policy.key_bits, "bootstrapping new CA keystore");
        let (signing_key, certificate) = bootstrap(policy)?;
        store.save_key_and_cert(signing_key.as_ref(), &certificate)?;
        store.store_serial(1)?;

        Ok(Self {
            signing_key,
            certificate,
            serial_lock: Mutex::new(()),
        })
    }

    pub fn certificate(&self) -> &Certificate {
        &self.certificate
    }

    pub fn certificate_der(&self) -> Result<Vec<u8>, der::Error> {
        self.certificate.to_der()
    }

    pub fn signing_key(&self) -> &SigningKey<Sha256> {
        &self.signing_key
    }

    pub fn private_key(&self) -> &RsaPrivateKey {
        self.signing_key.as_ref()
    }

    pub fn verifying_key(&self) -> rsa::pkcs1v15::VerifyingKey<Sha256> {
        self.signing_key.verifying_key()
    }

    pub fn subject(&self) -> &Name {
        &self.certificate.tbs_certificate.subject
    }

    /// Reserves and persists the next serial: the counter is durable before this call returns,
    /// so a caller that then fails to finish signing has merely burned a serial, not issued a
    /// duplicate.
    pub fn reserve_next_serial(&self, store: &dyn CaStore) -> Result<u64, KeystoreError> {
        let _guard = self.serial_lock.lock().expect("serial lock poisoned");
        let current = store.load_serial()?;
        let next = current.checked_add(1).unwrap_or(1);
        store.store_serial(next)?;
        Ok(next)
    }
}

fn bootstrap(policy: &BootstrapPolicy) -> Result<(SigningKey<Sha256>, Certificate), KeystoreError> {
    let mut rng = OsRng;
    let private_key = RsaPrivateKey::new(&mut rng, policy.key_bits)
        .map_err(|e| KeystoreError::KeyGeneration(e.to_string()))?;
    let signing_key = SigningKey::<Sha256>::new(private_key);

    let subject: Name = format!("CN={}", policy.common_name)
        .parse()
        .map_err(|e: der::Error| KeystoreError::CertificateBuild(e.to_string()))?;

    let spki_pem = signing_key
        .verifying_key()
        .to_public_key_pem(LineEnding::LF)
        .map_err(|e| KeystoreError::CertificateBuild(e.to_string()))?;
    let spki = SubjectPublicKeyInfoOwned::from_pem(&spki_pem)
        .map_err(|e| KeystoreError::CertificateBuild(e.to_string()))?;

    let validity = Validity::from_now(time::Duration::days(policy.lifetime_days))
        .map_err(|e| KeystoreError::CertificateBuild(e.to_string()))?;

    let serial = SerialNumber::from(1u64);

    // `Profile::Root` would emit BasicConstraints/SubjectKeyIdentifier/KeyUsage on its own, but
    // its KeyUsage is fixed at {keyCertSign, cRLSign} and lacks the digitalSignature bit §3/§4.1
    // requires — and the builder rejects a second KeyUsage extension once Root has already added
    // one. `Profile::Manual` adds none of the defaults, so every extension is added explicitly
    // here instead, self-signed (`issuer: None`).
    let mut builder = CertificateBuilder::new(
        Profile::Manual { issuer: None },
        serial,
        validity,
        subject,
        spki.clone(),
        &signing_key,
    )
    .map_err(|e| KeystoreError::CertificateBuild(e.to_string()))?;

    builder
        .add_extension(&BasicConstraints {
            ca: true,
            path_len_constraint: None,
        })
        .map_err(|e| KeystoreError::CertificateBuild(e.to_string()))?;
    builder
        .add_extension(&KeyUsage(
            KeyUsages::KeyCertSign | KeyUsages::CRLSign | KeyUsages::DigitalSignature,
        ))
        .map_err(|e| KeystoreError::CertificateBuild(e.to_string()))?;
    let ski = SubjectKeyIdentifier::try_from(spki.owned_to_ref())
        .map_err(|e| KeystoreError::CertificateBuild(e.to_string()))?;
    builder
        .add_extension(&ski)
        .map_err(|e| KeystoreError::CertificateBuild(e.to_string()))?;
    let aki = AuthorityKeyIdentifier::try_from(spki.owned_to_ref())
        .map_err(|e| KeystoreError::CertificateBuild(e.to_string()))?;
    builder
        .add_extension(&aki)
        .map_err(|e| KeystoreError::CertificateBuild(e.to_string()))?;

    let certificate = builder
        .build()
        .map_err(|e| KeystoreError::CertificateBuild(e.to_string()))?;

    Ok((signing_key, certificate))
}
