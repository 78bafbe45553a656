//! Certificate generation and validation for the local CA.

use std::fs;
use std::path::{Path, PathBuf};

use rcgen::{
    BasicConstraints, CertificateParams, DistinguishedName, DnType, ExtendedKeyUsagePurpose, IsCa,
    Issuer, KeyPair, KeyUsagePurpose, SanType, SerialNumber,
};
use time::{Duration, OffsetDateTime};

use crate::error::{DevcertError, Result};

/// Root CA common name. Also the name Windows removal matches on.
pub const CA_COMMON_NAME: &str = "devcert";

/// Root CA organization
const CA_ORGANIZATION: &str = "devcert";

/// A freshly generated root certificate with its private key
#[derive(Clone)]
pub struct GeneratedRoot {
    pub cert_pem: String,
    pub key_pem: String,
}

/// A signed leaf certificate with its private key
#[derive(Clone)]
pub struct IssuedCertificate {
    pub cert_pem: String,
    pub key_pem: String,
}

/// Plain on-disk locations of the CA key and certificate, valid only inside
/// a key-material scope.
#[derive(Debug, Clone)]
pub struct CaKeyMaterial {
    pub key_path: PathBuf,
    pub cert_path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct DomainRequest {
    pub common_name: String,
    pub subject_alt_names: Vec<String>,
    pub serial: Vec<u8>,
    pub not_after: OffsetDateTime,
}

pub trait SigningAuthority: Send + Sync {
    fn generate_root(&self, validity_days: u32) -> Result<GeneratedRoot>;

    /// Fails if `cert_path` is unreadable, does not parse, or is outside its validity window.
    fn validate_certificate(&self, cert_path: &Path) -> Result<()>;

    fn sign_domain(&self, request: &DomainRequest, ca: &CaKeyMaterial) -> Result<IssuedCertificate>;
}

/// Signs with rcgen and validates with x509-parser.
#[derive(Debug, Default, Clone, Copy)]
pub struct RcgenSigner;

fn ca_params(not_before: OffsetDateTime, not_after: OffsetDateTime) -> CertificateParams {
    let mut params = CertificateParams::default();

    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, CA_COMMON_NAME);
    dn.push(DnType::OrganizationName, CA_ORGANIZATION);
    params.distinguished_name = dn;

    params.is_ca = IsCa::Ca(BasicConstraints::Constrained(0));
    params.key_usages = vec![
        KeyUsagePurpose::KeyCertSign,
        KeyUsagePurpose::CrlSign,
        KeyUsagePurpose::DigitalSignature,
    ];
    params.not_before = not_before;
    params.not_after = not_after;
    params
}

impl SigningAuthority for RcgenSigner {
    fn generate_root(&self, validity_days: u32) -> Result<GeneratedRoot> {
        let now = OffsetDateTime::now_utc();
        let params = ca_params(now, now + Duration::days(i64::from(validity_days)));

        let key_pair = KeyPair::generate()
            .map_err(|e| DevcertError::Signing(format!("Failed to generate keypair: {e}")))?;
        let cert = params
            .self_signed(&key_pair)
            .map_err(|e| DevcertError::Signing(format!("Failed to self-sign root: {e}")))?;

        Ok(GeneratedRoot {
            cert_pem: cert.pem(),
            key_pem: key_pair.serialize_pem(),
        })
    }

    fn validate_certificate(&self, cert_path: &Path) -> Result<()> {
        let bytes =
            fs::read(cert_path).map_err(|e| DevcertError::FileRead(cert_path.to_path_buf(), e))?;
        let (_, pem) = x509_parser::pem::parse_x509_pem(&bytes)
            .map_err(|e| DevcertError::Signing(format!("Invalid PEM: {e}")))?;
        let cert = pem
            .parse_x509()
            .map_err(|e| DevcertError::Signing(format!("Invalid certificate: {e}")))?;
        if !cert.validity().is_valid() {
            return Err(DevcertError::Signing(format!(
                "Certificate {} is outside its validity period",
                cert_path.display()
            )));
        }
        Ok(())
    }

    fn sign_domain(&self, request: &DomainRequest, ca: &CaKeyMaterial) -> Result<IssuedCertificate> {
        let key_pem = fs::read_to_string(&ca.key_path)
            .map_err(|e| DevcertError::FileRead(ca.key_path.clone(), e))?;
        let ca_key = KeyPair::from_pem(&key_pem)
            .map_err(|e| DevcertError::Signing(format!("Failed to parse CA private key: {e}")))?;

        // Only the issuer name and key matter when signing.
        let now = OffsetDateTime::now_utc();
        let issuer = Issuer::new(ca_params(now - Duration::days(1), request.not_after), ca_key);

        let mut params = CertificateParams::default();
        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, request.common_name.as_str());
        params.distinguished_name = dn;
        params.is_ca = IsCa::NoCa;
        params.key_usages = vec![
            KeyUsagePurpose::DigitalSignature,
            KeyUsagePurpose::KeyEncipherment,
        ];
        params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];
        params.serial_number = Some(SerialNumber::from_slice(&request.serial));

        let mut sans = Vec::new();
        for name in &request.subject_alt_names {
            if let Ok(ip) = name.parse::<std::net::IpAddr>() {
                sans.push(SanType::IpAddress(ip));
            } else {
                let dns = name.as_str().try_into().map_err(|e| {
                    DevcertError::Signing(format!("Invalid DNS name '{name}': {e:?}"))
                })?;
                sans.push(SanType::DnsName(dns));
            }
        }
        params.subject_alt_names = sans;

        params.not_before = now;
        params.not_after = request.not_after;

        let leaf_key = KeyPair::generate()
            .map_err(|e| DevcertError::Signing(format!("Failed to generate keypair: {e}")))?;
        let leaf = params.signed_by(&leaf_key, &issuer).map_err(|e| {
            DevcertError::Signing(format!("Failed to sign certificate for {}: {e}", request.common_name))
        })?;

        Ok(IssuedCertificate {
            cert_pem: leaf.pem(),
            key_pem: leaf_key.serialize_pem(),
        })
    }
}
