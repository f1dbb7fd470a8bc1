// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! X.509 application certificates and the PKI trust list.
//!
//! - [`Certificate`]: a parsed DER certificate with thumbprint, subject,
//!   application URI, validity window and RSA public key
//! - [`ApplicationIdentity`]: the client's own certificate plus private key
//! - [`CertificateStore`]: load-or-create of the application certificate and
//!   trust decisions for server certificates, backed by a directory
//!   ([`DirectoryStore`]) or memory ([`MemoryStore`])
//! - [`CertificateValidator`]: validity, key size and application URI checks
//!
//! # PKI layout
//!
//! ```text
//! pki/
//! ├── own/
//! │   ├── certs/      # application certificate (DER)
//! │   └── private/    # private key (PKCS#8 PEM, mode 0600)
//! ├── trusted/        # trusted server certificates
//! └── rejected/       # certificates seen but not trusted
//! ```

mod generator;
mod store;
mod validator;

use std::fmt;

use chrono::{DateTime, Utc};
use x509_parser::prelude::*;

use super::crypto::{hex, thumbprint, PrivateKey, PublicKey, SecurityResult};
use crate::error::SecurityError;

pub use generator::{CertificateRequest, SelfSignedGenerator};
pub use store::{CertificateStore, DirectoryStore, MemoryStore, TrustStatus};
pub use validator::{CertificateValidator, ValidationIssue, ValidationPolicy, ValidationResult};

// =============================================================================
// Certificate
// =============================================================================

/// A parsed DER certificate.
#[derive(Clone)]
pub struct Certificate {
    der: Vec<u8>,
    thumbprint: [u8; 20],
    subject: String,
    common_name: Option<String>,
    application_uri: Option<String>,
    hostnames: Vec<String>,
    not_before: DateTime<Utc>,
    not_after: DateTime<Utc>,
    public_key: PublicKey,
}

impl Certificate {
    /// Parses a DER certificate.
    pub fn from_der(der: impl Into<Vec<u8>>) -> SecurityResult<Self> {
        let der = der.into();
        let (rest, cert) = X509Certificate::from_der(&der)
            .map_err(|e| SecurityError::invalid_certificate(format!("X.509 parse error: {e}")))?;
        if !rest.is_empty() {
            return Err(SecurityError::invalid_certificate(format!(
                "{} trailing bytes after certificate",
                rest.len()
            )));
        }

        let public_key = PublicKey::from_spki_der(cert.public_key().raw)?;
        let subject = cert.subject().to_string();
        let common_name = cert
            .subject()
            .iter_common_name()
            .next()
            .and_then(|cn| cn.as_str().ok())
            .map(str::to_string);

        let mut application_uri = None;
        let mut hostnames = Vec::new();
        if let Ok(Some(san)) = cert.subject_alternative_name() {
            for name in &san.value.general_names {
                match name {
                    GeneralName::URI(uri) if application_uri.is_none() => {
                        application_uri = Some((*uri).to_string());
                    }
                    GeneralName::DNSName(host) => hostnames.push((*host).to_string()),
                    _ => {}
                }
            }
        }

        let validity = cert.validity();
        let not_before = timestamp(validity.not_before.timestamp())?;
        let not_after = timestamp(validity.not_after.timestamp())?;
        let thumbprint = thumbprint(&der);

        Ok(Self {
            der,
            thumbprint,
            subject,
            common_name,
            application_uri,
            hostnames,
            not_before,
            not_after,
            public_key,
        })
    }

    /// Parses a PEM certificate.
    pub fn from_pem(pem: &[u8]) -> SecurityResult<Self> {
        let (_, pem) = x509_parser::pem::parse_x509_pem(pem)
            .map_err(|e| SecurityError::invalid_certificate(format!("PEM parse error: {e}")))?;
        Self::from_der(pem.contents)
    }

    /// Parses either encoding, detecting PEM by its armour.
    pub fn from_bytes(bytes: &[u8]) -> SecurityResult<Self> {
        if bytes.starts_with(b"-----BEGIN") {
            Self::from_pem(bytes)
        } else {
            Self::from_der(bytes.to_vec())
        }
    }

    /// DER bytes.
    pub fn der(&self) -> &[u8] {
        &self.der
    }

    /// PEM encoding of the DER bytes.
    pub fn to_pem(&self) -> SecurityResult<String> {
        rsa::pkcs8::der::pem::encode_string("CERTIFICATE", rsa::pkcs8::LineEnding::LF, &self.der)
            .map_err(|e| SecurityError::crypto("encode certificate", e))
    }

    /// SHA-1 thumbprint.
    pub fn thumbprint(&self) -> &[u8; 20] {
        &self.thumbprint
    }

    /// Hex thumbprint, used as the file name in the trust list.
    pub fn thumbprint_hex(&self) -> String {
        hex(&self.thumbprint)
    }

    /// Subject distinguished name.
    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Subject common name.
    pub fn common_name(&self) -> Option<&str> {
        self.common_name.as_deref()
    }

    /// Application URI from the subject alternative name.
    pub fn application_uri(&self) -> Option<&str> {
        self.application_uri.as_deref()
    }

    /// DNS names from the subject alternative name.
    pub fn hostnames(&self) -> &[String] {
        &self.hostnames
    }

    /// Start of the validity window.
    pub fn not_before(&self) -> DateTime<Utc> {
        self.not_before
    }

    /// End of the validity window.
    pub fn not_after(&self) -> DateTime<Utc> {
        self.not_after
    }

    /// Returns `true` if `now` lies inside the validity window.
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.not_before && now <= self.not_after
    }

    /// Whole days until expiry; negative once expired.
    pub fn days_until_expiration(&self, now: DateTime<Utc>) -> i64 {
        (self.not_after - now).num_days()
    }

    /// RSA public key.
    pub fn public_key(&self) -> &PublicKey {
        &self.public_key
    }

    /// Key size in bits.
    pub fn key_bits(&self) -> usize {
        self.public_key.bits()
    }
}

impl PartialEq for Certificate {
    fn eq(&self, other: &Self) -> bool {
        self.der == other.der
    }
}

impl Eq for Certificate {}

impl fmt::Debug for Certificate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Certificate")
            .field("subject", &self.subject)
            .field("thumbprint", &self.thumbprint_hex())
            .field("application_uri", &self.application_uri)
            .field("not_after", &self.not_after)
            .finish()
    }
}

fn timestamp(seconds: i64) -> SecurityResult<DateTime<Utc>> {
    DateTime::from_timestamp(seconds, 0)
        .ok_or_else(|| SecurityError::invalid_certificate("validity out of range"))
}

// =============================================================================
// ApplicationIdentity
// =============================================================================

/// The client's own certificate and private key.
#[derive(Clone)]
pub struct ApplicationIdentity {
    /// Certificate presented to servers.
    pub certificate: Certificate,
    /// Matching private key.
    pub private_key: PrivateKey,
}

impl ApplicationIdentity {
    /// Pairs a certificate with its key, checking that they match.
    pub fn new(certificate: Certificate, private_key: PrivateKey) -> SecurityResult<Self> {
        if certificate.public_key() != &private_key.public_key() {
            return Err(SecurityError::invalid_certificate(
                "private key does not match the certificate",
            ));
        }
        Ok(Self {
            certificate,
            private_key,
        })
    }
}

impl fmt::Debug for ApplicationIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApplicationIdentity")
            .field("certificate", &self.certificate)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) fn test_identity(uri: &str) -> ApplicationIdentity {
        SelfSignedGenerator::new()
            .generate(&CertificateRequest::new("Test Client", uri).with_key_size(2048))
            .unwrap()
    }

    #[test]
    fn test_parse_generated_certificate() {
        let identity = test_identity("urn:test:client");
        let cert = &identity.certificate;
        assert_eq!(cert.application_uri(), Some("urn:test:client"));
        assert_eq!(cert.common_name(), Some("Test Client"));
        assert_eq!(cert.key_bits(), 2048);
        assert!(cert.is_valid_at(Utc::now()));
        assert_eq!(cert.thumbprint_hex().len(), 40);
    }

    #[test]
    fn test_pem_round_trip() {
        let identity = test_identity("urn:test:pem");
        let pem = identity.certificate.to_pem().unwrap();
        assert!(pem.starts_with("-----BEGIN CERTIFICATE-----\n"));
        assert!(pem.ends_with("-----END CERTIFICATE-----\n"));
        assert!(pem.lines().all(|line| line.len() <= 64), "{pem}");
        let parsed = Certificate::from_bytes(pem.as_bytes()).unwrap();
        assert_eq!(parsed, identity.certificate);
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(matches!(
            Certificate::from_der(vec![0x30, 0x03, 0x01, 0x02]),
            Err(SecurityError::InvalidCertificate { .. })
        ));
    }

    #[test]
    fn test_identity_key_mismatch() {
        let a = test_identity("urn:test:a");
        let b = test_identity("urn:test:b");
        assert!(ApplicationIdentity::new(a.certificate, b.private_key).is_err());
    }
}
