// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Security policies, message security modes and their algorithm suites.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigurationError, HandshakeError};
use crate::messages::MessageSecurityMode;

// =============================================================================
// SecurityMode
// =============================================================================

/// Message security mode.
///
/// Defines the level of security applied to messages exchanged
/// between client and server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SecurityMode {
    /// No security (messages are neither signed nor encrypted).
    #[default]
    None,

    /// Messages are signed but not encrypted.
    Sign,

    /// Messages are signed and encrypted.
    SignAndEncrypt,
}

impl SecurityMode {
    /// Returns `true` if this mode provides message signing.
    #[inline]
    pub const fn is_signed(&self) -> bool {
        matches!(self, Self::Sign | Self::SignAndEncrypt)
    }

    /// Returns `true` if this mode provides message encryption.
    #[inline]
    pub const fn is_encrypted(&self) -> bool {
        matches!(self, Self::SignAndEncrypt)
    }

    /// Returns the display name.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::None => "None",
            Self::Sign => "Sign",
            Self::SignAndEncrypt => "SignAndEncrypt",
        }
    }

    /// Converts from the wire enumeration; `Invalid` has no counterpart.
    pub fn from_message_mode(mode: MessageSecurityMode) -> Option<Self> {
        match mode {
            MessageSecurityMode::None => Some(Self::None),
            MessageSecurityMode::Sign => Some(Self::Sign),
            MessageSecurityMode::SignAndEncrypt => Some(Self::SignAndEncrypt),
            MessageSecurityMode::Invalid => Option::None,
        }
    }

    /// Converts to the wire enumeration.
    pub const fn to_message_mode(self) -> MessageSecurityMode {
        match self {
            Self::None => MessageSecurityMode::None,
            Self::Sign => MessageSecurityMode::Sign,
            Self::SignAndEncrypt => MessageSecurityMode::SignAndEncrypt,
        }
    }
}

impl fmt::Display for SecurityMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for SecurityMode {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace(['-', '_'], "").as_str() {
            "none" | "nosecurity" => Ok(Self::None),
            "sign" | "signed" => Ok(Self::Sign),
            "signandencrypt" | "signencrypt" | "encrypted" => Ok(Self::SignAndEncrypt),
            _ => Err(ConfigurationError::InvalidSecurityMode { value: s.to_string() }),
        }
    }
}

// =============================================================================
// Algorithm suites
// =============================================================================

/// Asymmetric signature algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AsymmetricSignature {
    /// RSA PKCS#1 v1.5 with SHA-1.
    RsaPkcs15Sha1,
    /// RSA PKCS#1 v1.5 with SHA-256.
    RsaPkcs15Sha256,
    /// RSA-PSS with SHA-256.
    RsaPssSha256,
}

impl AsymmetricSignature {
    /// Algorithm URI used in `SignatureData`.
    pub const fn uri(self) -> &'static str {
        match self {
            Self::RsaPkcs15Sha1 => "http://www.w3.org/2000/09/xmldsig#rsa-sha1",
            Self::RsaPkcs15Sha256 => "http://www.w3.org/2001/04/xmldsig-more#rsa-sha256",
            Self::RsaPssSha256 => "http://opcfoundation.org/UA/security/rsa-pss-sha2-256",
        }
    }
}

/// Asymmetric encryption algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AsymmetricEncryption {
    /// RSA PKCS#1 v1.5.
    RsaPkcs15,
    /// RSA-OAEP with SHA-1.
    RsaOaepSha1,
    /// RSA-OAEP with SHA-256.
    RsaOaepSha256,
}

impl AsymmetricEncryption {
    /// Algorithm URI used in identity tokens.
    pub const fn uri(self) -> &'static str {
        match self {
            Self::RsaPkcs15 => "http://www.w3.org/2001/04/xmlenc#rsa-1_5",
            Self::RsaOaepSha1 => "http://www.w3.org/2001/04/xmlenc#rsa-oaep",
            Self::RsaOaepSha256 => "http://opcfoundation.org/UA/security/rsa-oaep-sha2-256",
        }
    }

    /// Bytes of padding overhead per block.
    pub const fn padding_overhead(self) -> usize {
        match self {
            Self::RsaPkcs15 => 11,
            Self::RsaOaepSha1 => 42,
            Self::RsaOaepSha256 => 66,
        }
    }
}

/// Hash used for HMAC signatures and the key-derivation PRF.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashAlgorithm {
    /// SHA-1.
    Sha1,
    /// SHA-256.
    Sha256,
}

impl HashAlgorithm {
    /// Digest size in bytes.
    pub const fn size(self) -> usize {
        match self {
            Self::Sha1 => 20,
            Self::Sha256 => 32,
        }
    }
}

// =============================================================================
// SecurityPolicy
// =============================================================================

const POLICY_URI_PREFIX: &str = "http://opcfoundation.org/UA/SecurityPolicy#";

/// Security policy.
///
/// Defines the cryptographic algorithms used for securing messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SecurityPolicy {
    /// No security.
    #[default]
    None,

    /// Basic128Rsa15 (deprecated, for legacy systems).
    Basic128Rsa15,

    /// Basic256 (deprecated, for legacy systems).
    Basic256,

    /// Basic256Sha256.
    Basic256Sha256,

    /// Aes128_Sha256_RsaOaep.
    Aes128Sha256RsaOaep,

    /// Aes256_Sha256_RsaPss.
    Aes256Sha256RsaPss,
}

impl SecurityPolicy {
    /// All policies, weakest first.
    pub const ALL: [SecurityPolicy; 6] = [
        Self::None,
        Self::Basic128Rsa15,
        Self::Basic256,
        Self::Basic256Sha256,
        Self::Aes128Sha256RsaOaep,
        Self::Aes256Sha256RsaPss,
    ];

    /// Returns the policy URI.
    pub const fn uri(&self) -> &'static str {
        match self {
            Self::None => "http://opcfoundation.org/UA/SecurityPolicy#None",
            Self::Basic128Rsa15 => "http://opcfoundation.org/UA/SecurityPolicy#Basic128Rsa15",
            Self::Basic256 => "http://opcfoundation.org/UA/SecurityPolicy#Basic256",
            Self::Basic256Sha256 => "http://opcfoundation.org/UA/SecurityPolicy#Basic256Sha256",
            Self::Aes128Sha256RsaOaep => {
                "http://opcfoundation.org/UA/SecurityPolicy#Aes128_Sha256_RsaOaep"
            }
            Self::Aes256Sha256RsaPss => {
                "http://opcfoundation.org/UA/SecurityPolicy#Aes256_Sha256_RsaPss"
            }
        }
    }

    /// Returns the short name.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::None => "None",
            Self::Basic128Rsa15 => "Basic128Rsa15",
            Self::Basic256 => "Basic256",
            Self::Basic256Sha256 => "Basic256Sha256",
            Self::Aes128Sha256RsaOaep => "Aes128_Sha256_RsaOaep",
            Self::Aes256Sha256RsaPss => "Aes256_Sha256_RsaPss",
        }
    }

    /// Looks up a policy by its exact URI.
    pub fn from_uri(uri: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|p| p.uri() == uri)
    }

    /// Looks up a policy by URI, failing the handshake for unknown ones.
    pub fn require_uri(uri: &str) -> Result<Self, HandshakeError> {
        Self::from_uri(uri).ok_or_else(|| HandshakeError::unsupported_policy(uri))
    }

    /// Returns `true` if this policy is deprecated.
    #[inline]
    pub const fn is_deprecated(&self) -> bool {
        matches!(self, Self::Basic128Rsa15 | Self::Basic256)
    }

    /// Returns `true` if certificates are required for this policy.
    #[inline]
    pub const fn requires_certificates(&self) -> bool {
        !matches!(self, Self::None)
    }

    /// Checks that `mode` can be used with this policy.
    pub fn check_mode(&self, mode: SecurityMode) -> Result<(), HandshakeError> {
        let valid = match self {
            Self::None => mode == SecurityMode::None,
            _ => mode != SecurityMode::None,
        };
        if valid {
            Ok(())
        } else {
            Err(HandshakeError::PolicyMismatch {
                policy: self.name().to_string(),
                mode: mode.name().to_string(),
            })
        }
    }

    /// Asymmetric signature algorithm; `None` for the None policy.
    pub const fn asymmetric_signature(&self) -> Option<AsymmetricSignature> {
        match self {
            Self::None => Option::None,
            Self::Basic128Rsa15 | Self::Basic256 => Some(AsymmetricSignature::RsaPkcs15Sha1),
            Self::Basic256Sha256 | Self::Aes128Sha256RsaOaep => {
                Some(AsymmetricSignature::RsaPkcs15Sha256)
            }
            Self::Aes256Sha256RsaPss => Some(AsymmetricSignature::RsaPssSha256),
        }
    }

    /// Asymmetric encryption algorithm; `None` for the None policy.
    pub const fn asymmetric_encryption(&self) -> Option<AsymmetricEncryption> {
        match self {
            Self::None => Option::None,
            Self::Basic128Rsa15 => Some(AsymmetricEncryption::RsaPkcs15),
            Self::Basic256 | Self::Basic256Sha256 | Self::Aes128Sha256RsaOaep => {
                Some(AsymmetricEncryption::RsaOaepSha1)
            }
            Self::Aes256Sha256RsaPss => Some(AsymmetricEncryption::RsaOaepSha256),
        }
    }

    /// Hash of the symmetric HMAC signature.
    pub const fn symmetric_signature_hash(&self) -> HashAlgorithm {
        match self {
            Self::None | Self::Basic128Rsa15 | Self::Basic256 => HashAlgorithm::Sha1,
            _ => HashAlgorithm::Sha256,
        }
    }

    /// Hash of the P_hash key-derivation function.
    pub const fn key_derivation_hash(&self) -> HashAlgorithm {
        self.symmetric_signature_hash()
    }

    /// Length of the derived HMAC key.
    pub const fn signing_key_length(&self) -> usize {
        match self {
            Self::None => 0,
            Self::Basic128Rsa15 => 16,
            Self::Basic256 => 24,
            _ => 32,
        }
    }

    /// Length of the derived AES key.
    pub const fn encryption_key_length(&self) -> usize {
        match self {
            Self::None => 0,
            Self::Basic128Rsa15 | Self::Aes128Sha256RsaOaep => 16,
            _ => 32,
        }
    }

    /// AES block size, also the IV length.
    pub const fn encryption_block_size(&self) -> usize {
        match self {
            Self::None => 1,
            _ => 16,
        }
    }

    /// Size of the symmetric signature appended to each chunk.
    pub const fn symmetric_signature_size(&self) -> usize {
        match self {
            Self::None => 0,
            _ => self.symmetric_signature_hash().size(),
        }
    }

    /// Length of channel and session nonces.
    pub const fn nonce_length(&self) -> usize {
        match self {
            Self::None => 0,
            Self::Basic128Rsa15 => 16,
            _ => 32,
        }
    }

    /// Minimum and maximum RSA key sizes in bits.
    pub const fn key_length_bounds(&self) -> (usize, usize) {
        match self {
            Self::None => (0, 0),
            Self::Basic128Rsa15 | Self::Basic256 => (1024, 2048),
            Self::Basic256Sha256 | Self::Aes128Sha256RsaOaep | Self::Aes256Sha256RsaPss => {
                (2048, 4096)
            }
        }
    }
}

impl fmt::Display for SecurityPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for SecurityPolicy {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(policy) = Self::from_uri(s) {
            return Ok(policy);
        }

        let name = s.strip_prefix(POLICY_URI_PREFIX).unwrap_or(s);
        match name.to_lowercase().replace(['-', '_'], "").as_str() {
            "none" => Ok(Self::None),
            "basic128rsa15" | "basic128" => Ok(Self::Basic128Rsa15),
            "basic256" => Ok(Self::Basic256),
            "basic256sha256" => Ok(Self::Basic256Sha256),
            "aes128sha256rsaoaep" | "aes128" => Ok(Self::Aes128Sha256RsaOaep),
            "aes256sha256rsapss" | "aes256" => Ok(Self::Aes256Sha256RsaPss),
            _ => Err(ConfigurationError::InvalidSecurityPolicy { value: s.to_string() }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uri_roundtrip() {
        for policy in SecurityPolicy::ALL {
            assert_eq!(SecurityPolicy::from_uri(policy.uri()), Some(policy));
        }
    }

    #[test]
    fn test_unknown_uri_rejected() {
        let err = SecurityPolicy::require_uri("http://opcfoundation.org/UA/SecurityPolicy#Basic512")
            .unwrap_err();
        assert!(matches!(err, HandshakeError::UnsupportedPolicy { .. }));
    }

    #[test]
    fn test_parse_names() {
        assert_eq!("basic256sha256".parse::<SecurityPolicy>().unwrap(), SecurityPolicy::Basic256Sha256);
        assert_eq!(
            "Aes256_Sha256_RsaPss".parse::<SecurityPolicy>().unwrap(),
            SecurityPolicy::Aes256Sha256RsaPss
        );
        assert!("rot13".parse::<SecurityPolicy>().is_err());
        assert_eq!("sign-and-encrypt".parse::<SecurityMode>().unwrap(), SecurityMode::SignAndEncrypt);
    }

    #[test]
    fn test_mode_pairing() {
        assert!(SecurityPolicy::None.check_mode(SecurityMode::None).is_ok());
        assert!(SecurityPolicy::None.check_mode(SecurityMode::Sign).is_err());
        assert!(SecurityPolicy::Basic256Sha256.check_mode(SecurityMode::None).is_err());
        assert!(SecurityPolicy::Basic256Sha256
            .check_mode(SecurityMode::SignAndEncrypt)
            .is_ok());
    }

    #[test]
    fn test_algorithm_suites() {
        let p = SecurityPolicy::Basic128Rsa15;
        assert_eq!(p.signing_key_length(), 16);
        assert_eq!(p.encryption_key_length(), 16);
        assert_eq!(p.nonce_length(), 16);
        assert_eq!(p.asymmetric_encryption(), Some(AsymmetricEncryption::RsaPkcs15));

        let p = SecurityPolicy::Basic256;
        assert_eq!(p.signing_key_length(), 24);
        assert_eq!(p.symmetric_signature_size(), 20);

        let p = SecurityPolicy::Aes128Sha256RsaOaep;
        assert_eq!(p.encryption_key_length(), 16);
        assert_eq!(p.symmetric_signature_size(), 32);

        let p = SecurityPolicy::Aes256Sha256RsaPss;
        assert_eq!(p.asymmetric_signature(), Some(AsymmetricSignature::RsaPssSha256));
        assert_eq!(p.asymmetric_encryption(), Some(AsymmetricEncryption::RsaOaepSha256));
    }

    #[test]
    fn test_message_mode_conversion() {
        assert_eq!(SecurityMode::from_message_mode(MessageSecurityMode::Invalid), None);
        assert_eq!(
            SecurityMode::from_message_mode(SecurityMode::Sign.to_message_mode()),
            Some(SecurityMode::Sign)
        );
    }
}
