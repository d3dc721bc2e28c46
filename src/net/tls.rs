//! Self-signed TLS material.
//!
//! # Responsibilities
//! - Generate a self-signed certificate once per process
//! - Hand out rustls server configurations to the TLS and QUIC listeners
//!
//! The certificate is cached behind a once-gate: 4096-bit RSA key
//! generation is far too expensive to repeat, and both listeners must
//! present identical material.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::sync::{Arc, OnceLock};

use rcgen::{
    CertificateParams, DistinguishedName, DnType, ExtendedKeyUsagePurpose, KeyPair,
    KeyUsagePurpose, SanType, SerialNumber, PKCS_RSA_SHA256,
};
use rsa::pkcs8::{EncodePrivateKey, LineEnding};
use rsa::RsaPrivateKey;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};

/// Certificate validity, roughly ten years.
const VALIDITY_DAYS: i64 = 3650;

/// RSA key size in bits.
const KEY_BITS: usize = 4096;

/// Errors produced while building TLS material.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CertError {
    #[error("key generation failed: {0}")]
    KeyGeneration(String),
    #[error("certificate generation failed: {0}")]
    Certificate(String),
    #[error("TLS configuration failed: {0}")]
    Config(String),
}

/// The cached certificate and private key, DER-encoded.
#[derive(Debug)]
pub struct TlsMaterial {
    cert: CertificateDer<'static>,
    key_der: Vec<u8>,
}

impl TlsMaterial {
    pub fn certificate(&self) -> &CertificateDer<'static> {
        &self.cert
    }
}

static MATERIAL: OnceLock<Result<TlsMaterial, CertError>> = OnceLock::new();

/// rustls can be compiled with several crypto backends; pin the process
/// default so config builders are unambiguous.
fn ensure_crypto_provider() {
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
}

/// Return the process-wide self-signed material, generating it on first use.
pub fn material() -> Result<&'static TlsMaterial, CertError> {
    MATERIAL
        .get_or_init(generate_self_signed)
        .as_ref()
        .map_err(Clone::clone)
}

fn generate_self_signed() -> Result<TlsMaterial, CertError> {
    tracing::info!(bits = KEY_BITS, "generating self-signed certificate");

    let private_key = RsaPrivateKey::new(&mut rand::thread_rng(), KEY_BITS)
        .map_err(|e| CertError::KeyGeneration(e.to_string()))?;
    let key_pem = private_key
        .to_pkcs8_pem(LineEnding::LF)
        .map_err(|e| CertError::KeyGeneration(e.to_string()))?;
    let key_pair = KeyPair::from_pem_and_sign_algo(&key_pem, &PKCS_RSA_SHA256)
        .map_err(|e| CertError::KeyGeneration(e.to_string()))?;

    let mut params = CertificateParams::default();
    params.serial_number = Some(SerialNumber::from(vec![1u8]));
    params.distinguished_name = DistinguishedName::new();
    params
        .distinguished_name
        .push(DnType::OrganizationName, "Echo Inc.");
    params.subject_alt_names = vec![
        SanType::DnsName(
            "localhost"
                .try_into()
                .map_err(|_| CertError::Certificate("invalid DNS SAN".to_string()))?,
        ),
        SanType::IpAddress(IpAddr::V4(Ipv4Addr::LOCALHOST)),
        SanType::IpAddress(IpAddr::V6(Ipv6Addr::LOCALHOST)),
    ];
    params.key_usages = vec![
        KeyUsagePurpose::DigitalSignature,
        KeyUsagePurpose::KeyEncipherment,
    ];
    params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];
    params.not_before = time::OffsetDateTime::now_utc();
    params.not_after = params.not_before + time::Duration::days(VALIDITY_DAYS);

    let cert = params
        .self_signed(&key_pair)
        .map_err(|e| CertError::Certificate(e.to_string()))?;

    Ok(TlsMaterial {
        cert: cert.der().clone(),
        key_der: key_pair.serialize_der(),
    })
}

fn base_config() -> Result<rustls::ServerConfig, CertError> {
    ensure_crypto_provider();
    let material = material()?;
    let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(material.key_der.clone()));
    rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(vec![material.cert.clone()], key)
        .map_err(|e| CertError::Config(e.to_string()))
}

/// Server configuration for the TLS listener (TLS 1.2 minimum, which is
/// the rustls floor).
pub fn tls_config() -> Result<Arc<rustls::ServerConfig>, CertError> {
    base_config().map(Arc::new)
}

/// Server configuration for the QUIC listener, advertising HTTP/3 ALPN
/// tokens.
pub fn quic_tls_config() -> Result<rustls::ServerConfig, CertError> {
    let mut config = base_config()?;
    config.alpn_protocols = vec![b"h3".to_vec(), b"h3-29".to_vec()];
    Ok(config)
}
