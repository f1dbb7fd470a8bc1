// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Security provider: policies, keys, certificates and session-level crypto.
//!
//! - [`policy`]: security policies and message security modes
//! - [`crypto`]: RSA, P_hash key derivation, HMAC and AES-CBC
//! - [`certificate`]: application certificates, PKI store and validation
//!
//! The free functions here cover the session-layer uses of the policy:
//! encrypting user secrets for identity tokens and the client/server
//! signatures exchanged by CreateSession and ActivateSession.

pub mod certificate;
pub mod crypto;
pub mod policy;

pub use certificate::{
    ApplicationIdentity, Certificate, CertificateRequest, CertificateStore, CertificateValidator,
    DirectoryStore, MemoryStore, SelfSignedGenerator, TrustStatus, ValidationPolicy,
};
pub use crypto::{ChannelKeys, PrivateKey, PublicKey, SecurityResult, SymmetricKeys};
pub use policy::{SecurityMode, SecurityPolicy};

use crate::error::SecurityError;
use crate::messages::SignatureData;
use crate::types::ByteString;

/// A user secret prepared for an identity token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedSecret {
    /// Token payload.
    pub data: Vec<u8>,
    /// Encryption algorithm URI; `None` when sent in plain text.
    pub algorithm: Option<&'static str>,
}

/// Encrypts a password or issued token for the server.
///
/// The plaintext is `length(u32) || secret || server_nonce`, encrypted with
/// the server public key. Under the None policy the secret is sent as is.
pub fn encrypt_secret(
    policy: SecurityPolicy,
    server_certificate: Option<&Certificate>,
    secret: &[u8],
    server_nonce: &[u8],
) -> SecurityResult<EncryptedSecret> {
    let Some(algorithm) = policy.asymmetric_encryption() else {
        return Ok(EncryptedSecret {
            data: secret.to_vec(),
            algorithm: None,
        });
    };
    let certificate = server_certificate.ok_or(SecurityError::KeyMissing {
        what: "server certificate for secret encryption",
    })?;

    let length = u32::try_from(secret.len() + server_nonce.len())
        .map_err(|_| SecurityError::crypto("secret encryption", "secret too long"))?;
    let mut plain = Vec::with_capacity(4 + length as usize);
    plain.extend_from_slice(&length.to_le_bytes());
    plain.extend_from_slice(secret);
    plain.extend_from_slice(server_nonce);

    Ok(EncryptedSecret {
        data: certificate.public_key().encrypt(algorithm, &plain)?,
        algorithm: Some(algorithm.uri()),
    })
}

/// Reverses [`encrypt_secret`], checking the trailing server nonce.
pub fn decrypt_secret(
    policy: SecurityPolicy,
    private_key: &PrivateKey,
    data: &[u8],
    server_nonce: &[u8],
) -> SecurityResult<Vec<u8>> {
    let Some(algorithm) = policy.asymmetric_encryption() else {
        return Ok(data.to_vec());
    };
    let plain = private_key.decrypt(algorithm, data)?;
    if plain.len() < 4 {
        return Err(SecurityError::crypto("secret decryption", "missing length"));
    }
    let (length, rest) = plain.split_at(4);
    let length = u32::from_le_bytes([length[0], length[1], length[2], length[3]]) as usize;
    if length != rest.len() || length < server_nonce.len() {
        return Err(SecurityError::crypto("secret decryption", "length mismatch"));
    }
    let (secret, nonce) = rest.split_at(length - server_nonce.len());
    if nonce != server_nonce {
        return Err(SecurityError::crypto("secret decryption", "nonce mismatch"));
    }
    Ok(secret.to_vec())
}

/// Signs `certificate || nonce` with the policy's asymmetric signature.
///
/// Returns an empty `SignatureData` under the None policy.
pub fn create_signature(
    policy: SecurityPolicy,
    private_key: &PrivateKey,
    certificate: &[u8],
    nonce: &[u8],
) -> SecurityResult<SignatureData> {
    let Some(algorithm) = policy.asymmetric_signature() else {
        return Ok(SignatureData::default());
    };
    let mut data = Vec::with_capacity(certificate.len() + nonce.len());
    data.extend_from_slice(certificate);
    data.extend_from_slice(nonce);
    Ok(SignatureData {
        algorithm: algorithm.uri().to_string(),
        signature: ByteString::from(private_key.sign(algorithm, &data)?),
    })
}

/// Verifies a signature made by [`create_signature`] with `signer`'s key.
pub fn verify_signature(
    policy: SecurityPolicy,
    signer: &Certificate,
    certificate: &[u8],
    nonce: &[u8],
    signature: &SignatureData,
) -> SecurityResult<()> {
    let Some(algorithm) = policy.asymmetric_signature() else {
        return Ok(());
    };
    if signature.algorithm != algorithm.uri() {
        return Err(SecurityError::crypto(
            "signature verification",
            format!("unexpected algorithm {}", signature.algorithm),
        ));
    }
    let mut data = Vec::with_capacity(certificate.len() + nonce.len());
    data.extend_from_slice(certificate);
    data.extend_from_slice(nonce);
    signer
        .public_key()
        .verify(algorithm, &data, signature.signature.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity() -> ApplicationIdentity {
        SelfSignedGenerator::new()
            .generate(&CertificateRequest::new("Server", "urn:server"))
            .unwrap()
    }

    #[test]
    fn test_secret_round_trip_all_policies() {
        let server = identity();
        let nonce = crypto::random_nonce(32);
        for policy in SecurityPolicy::ALL {
            let encrypted =
                encrypt_secret(policy, Some(&server.certificate), b"secret", &nonce).unwrap();
            assert_eq!(encrypted.algorithm.is_none(), policy == SecurityPolicy::None);
            let plain = decrypt_secret(policy, &server.private_key, &encrypted.data, &nonce).unwrap();
            assert_eq!(plain, b"secret");
        }
    }

    #[test]
    fn test_secret_wrong_nonce() {
        let server = identity();
        let encrypted = encrypt_secret(
            SecurityPolicy::Basic256Sha256,
            Some(&server.certificate),
            b"pw",
            &[1u8; 32],
        )
        .unwrap();
        assert!(decrypt_secret(
            SecurityPolicy::Basic256Sha256,
            &server.private_key,
            &encrypted.data,
            &[2u8; 32]
        )
        .is_err());
    }

    #[test]
    fn test_secret_needs_certificate() {
        assert!(matches!(
            encrypt_secret(SecurityPolicy::Basic256, None, b"pw", &[0; 32]),
            Err(SecurityError::KeyMissing { .. })
        ));
    }

    #[test]
    fn test_signature_verification() {
        let client = identity();
        let server_cert = b"server certificate bytes";
        let nonce = [7u8; 32];
        let sig = create_signature(
            SecurityPolicy::Aes256Sha256RsaPss,
            &client.private_key,
            server_cert,
            &nonce,
        )
        .unwrap();
        verify_signature(
            SecurityPolicy::Aes256Sha256RsaPss,
            &client.certificate,
            server_cert,
            &nonce,
            &sig,
        )
        .unwrap();
        assert!(verify_signature(
            SecurityPolicy::Aes256Sha256RsaPss,
            &client.certificate,
            server_cert,
            &[8u8; 32],
            &sig
        )
        .is_err());
    }

    #[test]
    fn test_none_policy_signature_is_empty() {
        let client = identity();
        let sig = create_signature(SecurityPolicy::None, &client.private_key, b"c", b"n").unwrap();
        assert!(sig.algorithm.is_empty());
        assert!(sig.signature.is_null());
    }
}
