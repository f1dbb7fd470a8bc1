// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Cryptographic primitives behind the security policies.
//!
//! - RSA keys, asymmetric signatures and block-wise asymmetric encryption
//! - P_SHA1 / P_SHA256 key derivation
//! - HMAC signatures and AES-CBC without padding for symmetric chunks

use std::fmt;

use aes::cipher::block_padding::NoPadding;
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use hmac::{Hmac, Mac};
use rand::RngCore;
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey};
use rsa::traits::PublicKeyParts;
use rsa::{Oaep, Pkcs1v15Encrypt, Pkcs1v15Sign, Pss, RsaPrivateKey, RsaPublicKey};
use sha1::Sha1;
use sha2::{Digest, Sha256};

use super::policy::{AsymmetricEncryption, AsymmetricSignature, HashAlgorithm, SecurityPolicy};
use crate::error::SecurityError;

/// Result alias for security operations.
pub type SecurityResult<T> = Result<T, SecurityError>;

// =============================================================================
// Keys
// =============================================================================

/// An RSA private key.
#[derive(Clone)]
pub struct PrivateKey(RsaPrivateKey);

impl PrivateKey {
    /// Generates a new key.
    pub fn generate(bits: usize) -> SecurityResult<Self> {
        RsaPrivateKey::new(&mut rand::thread_rng(), bits)
            .map(Self)
            .map_err(|e| SecurityError::generation(e))
    }

    /// Parses a PKCS#8 DER key.
    pub fn from_pkcs8_der(der: &[u8]) -> SecurityResult<Self> {
        RsaPrivateKey::from_pkcs8_der(der)
            .map(Self)
            .map_err(|e| SecurityError::crypto("load private key", e))
    }

    /// Parses a PKCS#8 PEM key.
    pub fn from_pkcs8_pem(pem: &str) -> SecurityResult<Self> {
        RsaPrivateKey::from_pkcs8_pem(pem)
            .map(Self)
            .map_err(|e| SecurityError::crypto("load private key", e))
    }

    /// Serializes as PKCS#8 DER.
    pub fn to_pkcs8_der(&self) -> SecurityResult<Vec<u8>> {
        self.0
            .to_pkcs8_der()
            .map(|doc| doc.as_bytes().to_vec())
            .map_err(|e| SecurityError::crypto("encode private key", e))
    }

    /// Serializes as PKCS#8 PEM.
    pub fn to_pkcs8_pem(&self) -> SecurityResult<String> {
        self.0
            .to_pkcs8_pem(rsa::pkcs8::LineEnding::LF)
            .map(|pem| pem.to_string())
            .map_err(|e| SecurityError::crypto("encode private key", e))
    }

    /// The matching public key.
    pub fn public_key(&self) -> PublicKey {
        PublicKey(self.0.to_public_key())
    }

    /// Modulus size in bytes.
    pub fn size(&self) -> usize {
        self.0.size()
    }

    /// Signs `data` with the given algorithm.
    pub fn sign(&self, algorithm: AsymmetricSignature, data: &[u8]) -> SecurityResult<Vec<u8>> {
        let result = match algorithm {
            AsymmetricSignature::RsaPkcs15Sha1 => {
                self.0.sign(Pkcs1v15Sign::new::<Sha1>(), &Sha1::digest(data))
            }
            AsymmetricSignature::RsaPkcs15Sha256 => {
                self.0.sign(Pkcs1v15Sign::new::<Sha256>(), &Sha256::digest(data))
            }
            AsymmetricSignature::RsaPssSha256 => self.0.sign_with_rng(
                &mut rand::thread_rng(),
                Pss::new::<Sha256>(),
                &Sha256::digest(data),
            ),
        };
        result.map_err(|e| SecurityError::crypto("asymmetric sign", e))
    }

    /// Decrypts block-wise ciphertext.
    pub fn decrypt(&self, algorithm: AsymmetricEncryption, data: &[u8]) -> SecurityResult<Vec<u8>> {
        let block = self.size();
        if block == 0 || data.len() % block != 0 {
            return Err(SecurityError::crypto(
                "asymmetric decrypt",
                format!("ciphertext length {} is not a multiple of {}", data.len(), block),
            ));
        }
        let mut out = Vec::with_capacity(data.len());
        for chunk in data.chunks(block) {
            let plain = match algorithm {
                AsymmetricEncryption::RsaPkcs15 => self.0.decrypt(Pkcs1v15Encrypt, chunk),
                AsymmetricEncryption::RsaOaepSha1 => self.0.decrypt(Oaep::new::<Sha1>(), chunk),
                AsymmetricEncryption::RsaOaepSha256 => {
                    self.0.decrypt(Oaep::new::<Sha256>(), chunk)
                }
            }
            .map_err(|e| SecurityError::crypto("asymmetric decrypt", e))?;
            out.extend_from_slice(&plain);
        }
        Ok(out)
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PrivateKey({} bits)", self.size() * 8)
    }
}

/// An RSA public key.
#[derive(Clone, PartialEq, Eq)]
pub struct PublicKey(RsaPublicKey);

impl PublicKey {
    /// Parses a DER SubjectPublicKeyInfo.
    pub fn from_spki_der(der: &[u8]) -> SecurityResult<Self> {
        RsaPublicKey::from_public_key_der(der)
            .map(Self)
            .map_err(|e| SecurityError::invalid_certificate(format!("unsupported public key: {}", e)))
    }

    /// Modulus size in bytes.
    pub fn size(&self) -> usize {
        self.0.size()
    }

    /// Modulus size in bits.
    pub fn bits(&self) -> usize {
        self.0.n().bits()
    }

    /// Verifies a signature over `data`.
    pub fn verify(
        &self,
        algorithm: AsymmetricSignature,
        data: &[u8],
        signature: &[u8],
    ) -> SecurityResult<()> {
        let result = match algorithm {
            AsymmetricSignature::RsaPkcs15Sha1 => {
                self.0
                    .verify(Pkcs1v15Sign::new::<Sha1>(), &Sha1::digest(data), signature)
            }
            AsymmetricSignature::RsaPkcs15Sha256 => {
                self.0
                    .verify(Pkcs1v15Sign::new::<Sha256>(), &Sha256::digest(data), signature)
            }
            AsymmetricSignature::RsaPssSha256 => {
                self.0
                    .verify(Pss::new::<Sha256>(), &Sha256::digest(data), signature)
            }
        };
        result.map_err(|e| SecurityError::crypto("asymmetric verify", e))
    }

    /// Plaintext bytes that fit in one encrypted block.
    pub fn plain_block_size(&self, algorithm: AsymmetricEncryption) -> usize {
        self.size().saturating_sub(algorithm.padding_overhead())
    }

    /// Encrypts `data` in as many blocks as needed.
    pub fn encrypt(&self, algorithm: AsymmetricEncryption, data: &[u8]) -> SecurityResult<Vec<u8>> {
        let plain_block = self.plain_block_size(algorithm);
        if plain_block == 0 {
            return Err(SecurityError::crypto("asymmetric encrypt", "key too small"));
        }
        let mut rng = rand::thread_rng();
        let mut out = Vec::with_capacity(data.len().div_ceil(plain_block) * self.size());
        for chunk in data.chunks(plain_block) {
            let cipher = match algorithm {
                AsymmetricEncryption::RsaPkcs15 => self.0.encrypt(&mut rng, Pkcs1v15Encrypt, chunk),
                AsymmetricEncryption::RsaOaepSha1 => {
                    self.0.encrypt(&mut rng, Oaep::new::<Sha1>(), chunk)
                }
                AsymmetricEncryption::RsaOaepSha256 => {
                    self.0.encrypt(&mut rng, Oaep::new::<Sha256>(), chunk)
                }
            }
            .map_err(|e| SecurityError::crypto("asymmetric encrypt", e))?;
            out.extend_from_slice(&cipher);
        }
        Ok(out)
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({} bits)", self.bits())
    }
}

// =============================================================================
// Hashing and randomness
// =============================================================================

/// SHA-1 of a DER certificate.
pub fn thumbprint(der: &[u8]) -> [u8; 20] {
    Sha1::digest(der).into()
}

/// Lower-case hex encoding.
pub fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Random bytes for nonces.
pub fn random_nonce(length: usize) -> Vec<u8> {
    let mut nonce = vec![0u8; length];
    rand::thread_rng().fill_bytes(&mut nonce);
    nonce
}

fn hmac(hash: HashAlgorithm, key: &[u8], parts: &[&[u8]]) -> SecurityResult<Vec<u8>> {
    match hash {
        HashAlgorithm::Sha1 => {
            let mut mac = <Hmac<Sha1> as Mac>::new_from_slice(key)
                .map_err(|e| SecurityError::crypto("hmac", e))?;
            for part in parts {
                mac.update(part);
            }
            Ok(mac.finalize().into_bytes().to_vec())
        }
        HashAlgorithm::Sha256 => {
            let mut mac = <Hmac<Sha256> as Mac>::new_from_slice(key)
                .map_err(|e| SecurityError::crypto("hmac", e))?;
            for part in parts {
                mac.update(part);
            }
            Ok(mac.finalize().into_bytes().to_vec())
        }
    }
}

/// The P_hash pseudo-random function of TLS 1.2.
pub fn p_hash(hash: HashAlgorithm, secret: &[u8], seed: &[u8], length: usize) -> SecurityResult<Vec<u8>> {
    let mut out = Vec::with_capacity(length + hash.size());
    let mut a = hmac(hash, secret, &[seed])?;
    while out.len() < length {
        out.extend(hmac(hash, secret, &[&a, seed])?);
        a = hmac(hash, secret, &[&a])?;
    }
    out.truncate(length);
    Ok(out)
}

// =============================================================================
// Symmetric keys
// =============================================================================

/// Keys derived for one direction of a secure channel.
#[derive(Clone, PartialEq, Eq)]
pub struct SymmetricKeys {
    policy: SecurityPolicy,
    signing_key: Vec<u8>,
    encryption_key: Vec<u8>,
    iv: Vec<u8>,
}

impl SymmetricKeys {
    /// Derives keys with P_hash(secret, seed).
    pub fn derive(policy: SecurityPolicy, secret: &[u8], seed: &[u8]) -> SecurityResult<Self> {
        let sig_len = policy.signing_key_length();
        let enc_len = policy.encryption_key_length();
        let iv_len = policy.encryption_block_size();
        let material = p_hash(policy.key_derivation_hash(), secret, seed, sig_len + enc_len + iv_len)?;
        Ok(Self {
            policy,
            signing_key: material[..sig_len].to_vec(),
            encryption_key: material[sig_len..sig_len + enc_len].to_vec(),
            iv: material[sig_len + enc_len..].to_vec(),
        })
    }

    /// The policy these keys belong to.
    pub fn policy(&self) -> SecurityPolicy {
        self.policy
    }

    /// Size of the HMAC signature.
    pub fn signature_size(&self) -> usize {
        self.policy.symmetric_signature_size()
    }

    /// AES block size.
    pub fn block_size(&self) -> usize {
        self.policy.encryption_block_size()
    }

    /// HMAC over `data`.
    pub fn sign(&self, data: &[u8]) -> SecurityResult<Vec<u8>> {
        hmac(self.policy.symmetric_signature_hash(), &self.signing_key, &[data])
    }

    /// Verifies an HMAC in constant time.
    pub fn verify(&self, data: &[u8], signature: &[u8]) -> SecurityResult<()> {
        let ok = match self.policy.symmetric_signature_hash() {
            HashAlgorithm::Sha1 => <Hmac<Sha1> as Mac>::new_from_slice(&self.signing_key)
                .map(|mut mac| {
                    mac.update(data);
                    mac.verify_slice(signature).is_ok()
                }),
            HashAlgorithm::Sha256 => <Hmac<Sha256> as Mac>::new_from_slice(&self.signing_key)
                .map(|mut mac| {
                    mac.update(data);
                    mac.verify_slice(signature).is_ok()
                }),
        }
        .map_err(|e| SecurityError::crypto("hmac", e))?;
        if ok {
            Ok(())
        } else {
            Err(SecurityError::crypto("symmetric verify", "signature mismatch"))
        }
    }

    /// AES-CBC encryption; `data` must be block aligned.
    pub fn encrypt(&self, data: &[u8]) -> SecurityResult<Vec<u8>> {
        self.check_aligned(data, "symmetric encrypt")?;
        let result = match self.encryption_key.len() {
            16 => cbc::Encryptor::<aes::Aes128>::new_from_slices(&self.encryption_key, &self.iv)
                .map(|c| c.encrypt_padded_vec_mut::<NoPadding>(data)),
            _ => cbc::Encryptor::<aes::Aes256>::new_from_slices(&self.encryption_key, &self.iv)
                .map(|c| c.encrypt_padded_vec_mut::<NoPadding>(data)),
        };
        result.map_err(|e| SecurityError::crypto("symmetric encrypt", e))
    }

    /// AES-CBC decryption; `data` must be block aligned.
    pub fn decrypt(&self, data: &[u8]) -> SecurityResult<Vec<u8>> {
        self.check_aligned(data, "symmetric decrypt")?;
        let result = match self.encryption_key.len() {
            16 => cbc::Decryptor::<aes::Aes128>::new_from_slices(&self.encryption_key, &self.iv)
                .map_err(|e| SecurityError::crypto("symmetric decrypt", e))?
                .decrypt_padded_vec_mut::<NoPadding>(data),
            _ => cbc::Decryptor::<aes::Aes256>::new_from_slices(&self.encryption_key, &self.iv)
                .map_err(|e| SecurityError::crypto("symmetric decrypt", e))?
                .decrypt_padded_vec_mut::<NoPadding>(data),
        };
        result.map_err(|e| SecurityError::crypto("symmetric decrypt", e))
    }

    fn check_aligned(&self, data: &[u8], operation: &'static str) -> SecurityResult<()> {
        let block = self.block_size();
        if data.len() % block != 0 {
            return Err(SecurityError::crypto(
                operation,
                format!("{} bytes is not a multiple of the block size {}", data.len(), block),
            ));
        }
        Ok(())
    }
}

impl fmt::Debug for SymmetricKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SymmetricKeys")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

/// Both directions of a channel's keys.
#[derive(Debug, Clone)]
pub struct ChannelKeys {
    /// Keys for messages this side sends.
    pub sending: SymmetricKeys,
    /// Keys for messages this side receives.
    pub receiving: SymmetricKeys,
}

impl ChannelKeys {
    /// Keys as seen by the client.
    ///
    /// The client signs with keys seeded by the server nonce and verifies with
    /// keys seeded by its own nonce.
    pub fn for_client(
        policy: SecurityPolicy,
        client_nonce: &[u8],
        server_nonce: &[u8],
    ) -> SecurityResult<Self> {
        Ok(Self {
            sending: SymmetricKeys::derive(policy, server_nonce, client_nonce)?,
            receiving: SymmetricKeys::derive(policy, client_nonce, server_nonce)?,
        })
    }

    /// Keys as seen by the server; the mirror image of [`for_client`](Self::for_client).
    pub fn for_server(
        policy: SecurityPolicy,
        client_nonce: &[u8],
        server_nonce: &[u8],
    ) -> SecurityResult<Self> {
        let client = Self::for_client(policy, client_nonce, server_nonce)?;
        Ok(Self {
            sending: client.receiving,
            receiving: client.sending,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_key() -> PrivateKey {
        PrivateKey::generate(1024).unwrap()
    }

    #[test]
    fn test_p_sha256_known_vector() {
        // TLS 1.2 PRF test vector (secret, "test label" + seed), first 16 bytes.
        let secret = [
            0x9b, 0xbe, 0x43, 0x6b, 0xa9, 0x40, 0xf0, 0x17, 0xb1, 0x76, 0x52, 0x84, 0x9a, 0x71,
            0xdb, 0x35,
        ];
        let mut seed = b"test label".to_vec();
        seed.extend_from_slice(&[
            0xa0, 0xba, 0x9f, 0x93, 0x6c, 0xda, 0x31, 0x18, 0x27, 0xa6, 0xf7, 0x96, 0xff, 0xd5,
            0x19, 0x8c,
        ]);
        let out = p_hash(HashAlgorithm::Sha256, &secret, &seed, 16).unwrap();
        assert_eq!(
            out,
            vec![
                0xe3, 0xf2, 0x29, 0xba, 0x72, 0x7b, 0xe1, 0x7b, 0x8d, 0x12, 0x26, 0x20, 0x55, 0x7c,
                0xd4, 0x53
            ]
        );
    }

    #[test]
    fn test_p_hash_length_and_prefix_stability() {
        let long = p_hash(HashAlgorithm::Sha1, b"secret", b"seed", 100).unwrap();
        let short = p_hash(HashAlgorithm::Sha1, b"secret", b"seed", 30).unwrap();
        assert_eq!(long.len(), 100);
        assert_eq!(&long[..30], &short[..]);
    }

    #[test]
    fn test_derived_key_lengths() {
        let keys = SymmetricKeys::derive(SecurityPolicy::Basic256, &[1; 32], &[2; 32]).unwrap();
        assert_eq!(keys.signing_key.len(), 24);
        assert_eq!(keys.encryption_key.len(), 32);
        assert_eq!(keys.iv.len(), 16);
    }

    #[test]
    fn test_client_and_server_keys_mirror() {
        let policy = SecurityPolicy::Basic256Sha256;
        let client = ChannelKeys::for_client(policy, &[1; 32], &[2; 32]).unwrap();
        let server = ChannelKeys::for_server(policy, &[1; 32], &[2; 32]).unwrap();

        let plain = vec![7u8; 64];
        let cipher = client.sending.encrypt(&plain).unwrap();
        assert_ne!(cipher, plain);
        assert_eq!(server.receiving.decrypt(&cipher).unwrap(), plain);

        let sig = server.sending.sign(b"message").unwrap();
        client.receiving.verify(b"message", &sig).unwrap();
        assert!(client.receiving.verify(b"tampered", &sig).is_err());
    }

    #[test]
    fn test_symmetric_requires_alignment() {
        let keys = SymmetricKeys::derive(SecurityPolicy::Aes128Sha256RsaOaep, &[1; 32], &[2; 32]).unwrap();
        assert!(keys.encrypt(&[0u8; 15]).is_err());
        assert_eq!(keys.encrypt(&[0u8; 32]).unwrap().len(), 32);
    }

    #[test]
    fn test_asymmetric_sign_verify_all_algorithms() {
        let key = test_key();
        let public = key.public_key();
        for algorithm in [
            AsymmetricSignature::RsaPkcs15Sha1,
            AsymmetricSignature::RsaPkcs15Sha256,
            AsymmetricSignature::RsaPssSha256,
        ] {
            let sig = key.sign(algorithm, b"payload").unwrap();
            assert_eq!(sig.len(), key.size());
            public.verify(algorithm, b"payload", &sig).unwrap();
            assert!(public.verify(algorithm, b"other", &sig).is_err());
        }
    }

    #[test]
    fn test_asymmetric_encrypt_multiple_blocks() {
        let key = test_key();
        let public = key.public_key();
        let data: Vec<u8> = (0..300u16).map(|v| v as u8).collect();
        for algorithm in [AsymmetricEncryption::RsaPkcs15, AsymmetricEncryption::RsaOaepSha1] {
            let cipher = public.encrypt(algorithm, &data).unwrap();
            let blocks = data.len().div_ceil(public.plain_block_size(algorithm));
            assert_eq!(cipher.len(), blocks * key.size());
            assert_eq!(key.decrypt(algorithm, &cipher).unwrap(), data);
        }
    }

    #[test]
    fn test_private_key_der_roundtrip() {
        let key = test_key();
        let der = key.to_pkcs8_der().unwrap();
        let back = PrivateKey::from_pkcs8_der(&der).unwrap();
        assert_eq!(back.public_key(), key.public_key());
    }

    #[test]
    fn test_thumbprint_is_sha1() {
        assert_eq!(hex(&thumbprint(b"abc")), "a9993e364706816aba3e25717850c26c9cd0d89d");
    }
}
