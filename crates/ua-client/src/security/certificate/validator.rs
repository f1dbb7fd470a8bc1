// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Server certificate validation.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Certificate;
use crate::security::policy::SecurityPolicy;

// =============================================================================
// ValidationIssue
// =============================================================================

/// A single failed check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationIssue {
    /// The certificate is not valid yet.
    NotYetValid {
        /// Start of validity.
        not_before: DateTime<Utc>,
    },
    /// The certificate has expired.
    Expired {
        /// End of validity.
        not_after: DateTime<Utc>,
    },
    /// The key size is outside the policy's bounds.
    KeySize {
        /// Actual bits.
        bits: usize,
        /// Minimum bits.
        min: usize,
        /// Maximum bits.
        max: usize,
    },
    /// The application URI does not match the endpoint's server.
    ApplicationUri {
        /// Expected URI.
        expected: String,
        /// URI found in the certificate.
        actual: Option<String>,
    },
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotYetValid { not_before } => write!(f, "not valid before {not_before}"),
            Self::Expired { not_after } => write!(f, "expired at {not_after}"),
            Self::KeySize { bits, min, max } => {
                write!(f, "key size {bits} outside {min}..={max}")
            }
            Self::ApplicationUri { expected, actual } => write!(
                f,
                "application URI {:?} does not match {expected}",
                actual.as_deref().unwrap_or("<none>")
            ),
        }
    }
}

// =============================================================================
// ValidationPolicy
// =============================================================================

/// Which checks to run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationPolicy {
    /// Check the validity window.
    pub check_validity: bool,
    /// Check the key size against the security policy.
    pub check_key_size: bool,
    /// Check the application URI against the endpoint's server description.
    pub check_application_uri: bool,
    /// Warn when the certificate expires within this many days.
    pub expiration_warning_days: i64,
}

impl Default for ValidationPolicy {
    fn default() -> Self {
        Self {
            check_validity: true,
            check_key_size: true,
            check_application_uri: false,
            expiration_warning_days: 30,
        }
    }
}

impl ValidationPolicy {
    /// Runs no checks.
    pub fn permissive() -> Self {
        Self {
            check_validity: false,
            check_key_size: false,
            check_application_uri: false,
            expiration_warning_days: 0,
        }
    }
}

// =============================================================================
// ValidationResult
// =============================================================================

/// Outcome of validating one certificate.
#[derive(Debug, Clone)]
pub struct ValidationResult {
    /// Hex thumbprint.
    pub thumbprint: String,
    /// Subject.
    pub subject: String,
    /// Failed checks.
    pub issues: Vec<ValidationIssue>,
    /// Non-fatal findings.
    pub warnings: Vec<String>,
}

impl ValidationResult {
    /// Returns `true` if no check failed.
    pub fn is_valid(&self) -> bool {
        self.issues.is_empty()
    }

    /// Joins the issues into one message.
    pub fn summary(&self) -> String {
        self.issues
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; ")
    }
}

// =============================================================================
// CertificateValidator
// =============================================================================

/// Checks server certificates before a channel is opened.
#[derive(Debug, Clone, Default)]
pub struct CertificateValidator {
    policy: ValidationPolicy,
}

impl CertificateValidator {
    /// Creates a validator.
    pub fn new(policy: ValidationPolicy) -> Self {
        Self { policy }
    }

    /// Returns the policy.
    pub fn policy(&self) -> &ValidationPolicy {
        &self.policy
    }

    /// Validates `cert` for use with `security_policy` at time `now`.
    pub fn validate(
        &self,
        cert: &Certificate,
        security_policy: SecurityPolicy,
        expected_application_uri: Option<&str>,
        now: DateTime<Utc>,
    ) -> ValidationResult {
        let mut issues = Vec::new();
        let mut warnings = Vec::new();

        if self.policy.check_validity {
            if now < cert.not_before() {
                issues.push(ValidationIssue::NotYetValid {
                    not_before: cert.not_before(),
                });
            } else if now > cert.not_after() {
                issues.push(ValidationIssue::Expired {
                    not_after: cert.not_after(),
                });
            } else {
                let days = cert.days_until_expiration(now);
                if days < self.policy.expiration_warning_days {
                    warnings.push(format!("certificate expires in {days} days"));
                }
            }
        }

        if self.policy.check_key_size {
            let (min, max) = security_policy.key_length_bounds();
            let bits = cert.key_bits();
            if security_policy != SecurityPolicy::None && (bits < min || bits > max) {
                issues.push(ValidationIssue::KeySize { bits, min, max });
            }
        }

        if self.policy.check_application_uri {
            if let Some(expected) = expected_application_uri {
                if cert.application_uri() != Some(expected) {
                    issues.push(ValidationIssue::ApplicationUri {
                        expected: expected.to_string(),
                        actual: cert.application_uri().map(str::to_string),
                    });
                }
            }
        }

        ValidationResult {
            thumbprint: cert.thumbprint_hex(),
            subject: cert.subject().to_string(),
            issues,
            warnings,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::certificate::tests::test_identity;

    #[test]
    fn test_valid_certificate() {
        let cert = test_identity("urn:test:server").certificate;
        let result = CertificateValidator::default().validate(
            &cert,
            SecurityPolicy::Basic256Sha256,
            Some("urn:test:server"),
            Utc::now(),
        );
        assert!(result.is_valid(), "{}", result.summary());
    }

    #[test]
    fn test_expired_certificate() {
        let cert = test_identity("urn:test:server").certificate;
        let later = cert.not_after() + chrono::Duration::days(1);
        let result = CertificateValidator::default().validate(
            &cert,
            SecurityPolicy::Basic256Sha256,
            None,
            later,
        );
        assert!(matches!(result.issues[..], [ValidationIssue::Expired { .. }]));
    }

    #[test]
    fn test_application_uri_mismatch() {
        let cert = test_identity("urn:test:server").certificate;
        let validator = CertificateValidator::new(ValidationPolicy {
            check_application_uri: true,
            ..Default::default()
        });
        let result =
            validator.validate(&cert, SecurityPolicy::None, Some("urn:other"), Utc::now());
        assert!(!result.is_valid());
        assert!(result.summary().contains("urn:other"));
    }

    #[test]
    fn test_permissive_policy() {
        let cert = test_identity("urn:test:server").certificate;
        let later = cert.not_after() + chrono::Duration::days(1);
        let result = CertificateValidator::new(ValidationPolicy::permissive()).validate(
            &cert,
            SecurityPolicy::Basic256Sha256,
            None,
            later,
        );
        assert!(result.is_valid());
    }
}
