// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Self-signed application certificate generation.

use std::time::Duration;

use chrono::Utc;
use rcgen::{
    CertificateParams, DistinguishedName, DnType, ExtendedKeyUsagePurpose, Ia5String,
    KeyPair as RcgenKeyPair, KeyUsagePurpose, SanType,
};
use rustls_pki_types::PrivatePkcs8KeyDer;
use time::OffsetDateTime;

use super::{ApplicationIdentity, Certificate};
use crate::error::SecurityError;
use crate::security::crypto::{PrivateKey, SecurityResult};

/// Default RSA key size.
pub const DEFAULT_KEY_SIZE: usize = 2048;

/// Default validity of a generated certificate (five years).
pub const DEFAULT_VALIDITY: Duration = Duration::from_secs(5 * 365 * 24 * 3600);

/// Parameters for a new application certificate.
#[derive(Debug, Clone)]
pub struct CertificateRequest {
    /// Common name.
    pub application_name: String,
    /// Application URI placed in the subject alternative name.
    pub application_uri: String,
    /// Organization, if any.
    pub organization: Option<String>,
    /// DNS names placed in the subject alternative name.
    pub hostnames: Vec<String>,
    /// RSA key size in bits.
    pub key_size: usize,
    /// Validity from now.
    pub validity: Duration,
}

impl CertificateRequest {
    /// Creates a request with default key size and validity.
    pub fn new(application_name: impl Into<String>, application_uri: impl Into<String>) -> Self {
        Self {
            application_name: application_name.into(),
            application_uri: application_uri.into(),
            organization: None,
            hostnames: Vec::new(),
            key_size: DEFAULT_KEY_SIZE,
            validity: DEFAULT_VALIDITY,
        }
    }

    /// Sets the organization.
    pub fn with_organization(mut self, organization: impl Into<String>) -> Self {
        self.organization = Some(organization.into());
        self
    }

    /// Adds a DNS name.
    pub fn with_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostnames.push(hostname.into());
        self
    }

    /// Sets the key size.
    pub fn with_key_size(mut self, bits: usize) -> Self {
        self.key_size = bits;
        self
    }

    /// Sets the validity.
    pub fn with_validity(mut self, validity: Duration) -> Self {
        self.validity = validity;
        self
    }
}

/// Generates self-signed RSA certificates for OPC UA applications.
#[derive(Debug, Clone, Default)]
pub struct SelfSignedGenerator;

impl SelfSignedGenerator {
    /// Creates a generator.
    pub fn new() -> Self {
        Self
    }

    /// Generates a new key pair and a certificate signed with it.
    pub fn generate(&self, request: &CertificateRequest) -> SecurityResult<ApplicationIdentity> {
        let private_key = PrivateKey::generate(request.key_size)?;
        self.generate_with_key(request, private_key)
    }

    /// Generates a certificate for an existing key.
    pub fn generate_with_key(
        &self,
        request: &CertificateRequest,
        private_key: PrivateKey,
    ) -> SecurityResult<ApplicationIdentity> {
        let key_pair = RcgenKeyPair::from_pkcs8_der_and_sign_algo(
            &PrivatePkcs8KeyDer::from(private_key.to_pkcs8_der()?),
            &rcgen::PKCS_RSA_SHA256,
        )
        .map_err(SecurityError::generation)?;

        let mut params =
            CertificateParams::new(request.hostnames.clone()).map_err(SecurityError::generation)?;

        let mut name = DistinguishedName::new();
        name.push(DnType::CommonName, request.application_name.clone());
        if let Some(organization) = &request.organization {
            name.push(DnType::OrganizationName, organization.clone());
        }
        params.distinguished_name = name;

        let uri = Ia5String::try_from(request.application_uri.clone())
            .map_err(|e| SecurityError::generation(format!("application URI: {e}")))?;
        params.subject_alt_names.push(SanType::URI(uri));

        params.key_usages = vec![
            KeyUsagePurpose::DigitalSignature,
            KeyUsagePurpose::ContentCommitment,
            KeyUsagePurpose::KeyEncipherment,
            KeyUsagePurpose::DataEncipherment,
            KeyUsagePurpose::KeyCertSign,
        ];
        params.extended_key_usages = vec![
            ExtendedKeyUsagePurpose::ServerAuth,
            ExtendedKeyUsagePurpose::ClientAuth,
        ];

        // Backdate a little so freshly generated certificates survive clock skew.
        let now = Utc::now().timestamp();
        let validity = i64::try_from(request.validity.as_secs()).unwrap_or(i64::MAX / 2);
        params.not_before =
            OffsetDateTime::from_unix_timestamp(now - 3600).map_err(SecurityError::generation)?;
        params.not_after = OffsetDateTime::from_unix_timestamp(now.saturating_add(validity))
            .map_err(SecurityError::generation)?;

        let cert = params
            .self_signed(&key_pair)
            .map_err(SecurityError::generation)?;
        let certificate = Certificate::from_der(cert.der().to_vec())?;

        tracing::info!(
            application_uri = %request.application_uri,
            thumbprint = %certificate.thumbprint_hex(),
            key_size = request.key_size,
            "Generated self-signed application certificate"
        );

        ApplicationIdentity::new(certificate, private_key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_certificate_fields() {
        let request = CertificateRequest::new("Demo", "urn:example:demo")
            .with_organization("Example")
            .with_hostname("localhost")
            .with_validity(Duration::from_secs(30 * 24 * 3600));
        let identity = SelfSignedGenerator::new().generate(&request).unwrap();
        let cert = &identity.certificate;

        assert_eq!(cert.application_uri(), Some("urn:example:demo"));
        assert_eq!(cert.hostnames(), ["localhost".to_string()]);
        assert!(cert.subject().contains("Demo"));
        let days = cert.days_until_expiration(Utc::now());
        assert!((29..=30).contains(&days));
    }

    #[test]
    fn test_rejects_non_ascii_uri() {
        let request = CertificateRequest::new("Demo", "urn:exämple");
        let key = PrivateKey::generate(2048).unwrap();
        assert!(matches!(
            SelfSignedGenerator::new().generate_with_key(&request, key),
            Err(SecurityError::CertificateGeneration { .. })
        ));
    }
}
