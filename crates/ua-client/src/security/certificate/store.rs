// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Certificate storage and trust lists.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use super::{ApplicationIdentity, Certificate, CertificateRequest, SelfSignedGenerator};
use crate::error::SecurityError;
use crate::security::crypto::{PrivateKey, SecurityResult};

// =============================================================================
// TrustStatus
// =============================================================================

/// Trust state of a peer certificate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrustStatus {
    /// In the trusted list.
    Trusted,
    /// In the rejected list.
    Rejected,
    /// Never seen.
    Unknown,
}

// =============================================================================
// CertificateStore
// =============================================================================

/// Source of the application identity and the trust list.
#[async_trait]
pub trait CertificateStore: Send + Sync {
    /// Loads the application certificate, generating and persisting a new one
    /// when none exists, it has expired, or its application URI differs from
    /// the request.
    async fn load_or_create_application_certificate(
        &self,
        request: &CertificateRequest,
    ) -> SecurityResult<ApplicationIdentity>;

    /// Returns the trust state of `cert`.
    async fn trust_status(&self, cert: &Certificate) -> SecurityResult<TrustStatus>;

    /// Adds `cert` to the trusted list.
    async fn trust(&self, cert: &Certificate) -> SecurityResult<()>;

    /// Adds `cert` to the rejected list.
    async fn reject(&self, cert: &Certificate) -> SecurityResult<()>;

    /// Lists trusted certificates.
    async fn trusted_certificates(&self) -> SecurityResult<Vec<Certificate>>;

    /// Whether unknown certificates are trusted on first contact.
    fn trust_on_first_use(&self) -> bool;

    /// Decides whether a server certificate may be used.
    ///
    /// Certificates outside their validity window are never trusted. Unknown
    /// certificates are trusted when trust-on-first-use is enabled and
    /// otherwise recorded in the rejected list.
    async fn is_trusted(&self, cert: &Certificate) -> SecurityResult<bool> {
        let thumbprint = cert.thumbprint_hex();
        if !cert.is_valid_at(Utc::now()) {
            tracing::warn!(
                thumbprint = %thumbprint,
                not_after = %cert.not_after(),
                "Server certificate outside its validity period"
            );
            return Ok(false);
        }

        match self.trust_status(cert).await? {
            TrustStatus::Trusted => Ok(true),
            TrustStatus::Rejected => {
                tracing::warn!(thumbprint = %thumbprint, subject = %cert.subject(), "Server certificate is rejected");
                Ok(false)
            }
            TrustStatus::Unknown if self.trust_on_first_use() => {
                tracing::info!(thumbprint = %thumbprint, subject = %cert.subject(), "Trusting server certificate on first use");
                self.trust(cert).await?;
                Ok(true)
            }
            TrustStatus::Unknown => {
                tracing::warn!(thumbprint = %thumbprint, subject = %cert.subject(), "Unknown server certificate moved to rejected list");
                self.reject(cert).await?;
                Ok(false)
            }
        }
    }
}

fn identity_matches(identity: &ApplicationIdentity, request: &CertificateRequest) -> bool {
    let cert = &identity.certificate;
    if cert.application_uri() != Some(request.application_uri.as_str()) {
        tracing::warn!(
            found = ?cert.application_uri(),
            expected = %request.application_uri,
            "Application certificate URI changed, regenerating"
        );
        return false;
    }
    if !cert.is_valid_at(Utc::now()) {
        tracing::warn!(not_after = %cert.not_after(), "Application certificate expired, regenerating");
        return false;
    }
    true
}

async fn generate(request: &CertificateRequest) -> SecurityResult<ApplicationIdentity> {
    let request = request.clone();
    tokio::task::spawn_blocking(move || SelfSignedGenerator::new().generate(&request))
        .await
        .map_err(SecurityError::generation)?
}

// =============================================================================
// DirectoryStore
// =============================================================================

const OWN_CERT_FILE: &str = "application.der";
const OWN_KEY_FILE: &str = "application.pem";

/// File system PKI directory.
#[derive(Debug, Clone)]
pub struct DirectoryStore {
    root: PathBuf,
    trust_on_first_use: bool,
}

impl DirectoryStore {
    /// Creates a store rooted at `root`. Directories are created lazily.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            trust_on_first_use: false,
        }
    }

    /// Enables or disables trust-on-first-use.
    pub fn with_trust_on_first_use(mut self, enabled: bool) -> Self {
        self.trust_on_first_use = enabled;
        self
    }

    /// Root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `own/certs`.
    pub fn own_certs_dir(&self) -> PathBuf {
        self.root.join("own").join("certs")
    }

    /// `own/private`.
    pub fn own_private_dir(&self) -> PathBuf {
        self.root.join("own").join("private")
    }

    /// `trusted`.
    pub fn trusted_dir(&self) -> PathBuf {
        self.root.join("trusted")
    }

    /// `rejected`.
    pub fn rejected_dir(&self) -> PathBuf {
        self.root.join("rejected")
    }

    /// Creates all PKI directories.
    pub async fn initialize(&self) -> SecurityResult<()> {
        for dir in [
            self.own_certs_dir(),
            self.own_private_dir(),
            self.trusted_dir(),
            self.rejected_dir(),
        ] {
            tokio::fs::create_dir_all(&dir)
                .await
                .map_err(|e| SecurityError::io(&dir, e))?;
        }
        tracing::debug!(root = %self.root.display(), "PKI directory initialized");
        Ok(())
    }

    async fn load_own(&self) -> SecurityResult<Option<ApplicationIdentity>> {
        let cert_path = self.own_certs_dir().join(OWN_CERT_FILE);
        let key_path = self.own_private_dir().join(OWN_KEY_FILE);

        let Some(cert_bytes) = read_optional(&cert_path).await? else {
            return Ok(None);
        };
        let Some(key_bytes) = read_optional(&key_path).await? else {
            tracing::warn!(path = %key_path.display(), "Application private key missing");
            return Ok(None);
        };

        let certificate = Certificate::from_bytes(&cert_bytes)?;
        let pem = String::from_utf8(key_bytes)
            .map_err(|_| SecurityError::invalid_certificate("private key is not PEM"))?;
        let private_key = PrivateKey::from_pkcs8_pem(&pem)?;
        ApplicationIdentity::new(certificate, private_key).map(Some)
    }

    async fn save_own(&self, identity: &ApplicationIdentity) -> SecurityResult<()> {
        let cert_path = self.own_certs_dir().join(OWN_CERT_FILE);
        let key_path = self.own_private_dir().join(OWN_KEY_FILE);

        tokio::fs::write(&cert_path, identity.certificate.der())
            .await
            .map_err(|e| SecurityError::io(&cert_path, e))?;
        let key = identity.private_key.to_pkcs8_pem()?;
        write_private(&key_path, key.as_bytes())
            .await
            .map_err(|e| SecurityError::io(&key_path, e))
    }

    fn file_name(cert: &Certificate) -> String {
        format!("{}.der", cert.thumbprint_hex())
    }

    async fn scan(dir: &Path) -> SecurityResult<Vec<Certificate>> {
        let mut entries = match tokio::fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(SecurityError::io(dir, e)),
        };
        let mut certs = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| SecurityError::io(dir, e))?
        {
            let path = entry.path();
            let is_cert = matches!(
                path.extension().and_then(|e| e.to_str()),
                Some("der" | "pem" | "crt" | "cer")
            );
            if !is_cert {
                continue;
            }
            let bytes = tokio::fs::read(&path)
                .await
                .map_err(|e| SecurityError::io(&path, e))?;
            match Certificate::from_bytes(&bytes) {
                Ok(cert) => certs.push(cert),
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "Skipping unreadable certificate"),
            }
        }
        Ok(certs)
    }

    async fn contains(dir: &Path, cert: &Certificate) -> SecurityResult<bool> {
        if tokio::fs::try_exists(dir.join(Self::file_name(cert)))
            .await
            .map_err(|e| SecurityError::io(dir, e))?
        {
            return Ok(true);
        }
        Ok(Self::scan(dir)
            .await?
            .iter()
            .any(|c| c.thumbprint() == cert.thumbprint()))
    }
}

/// Writes `contents` to a file only the owner can read.
///
/// A new file is created with mode 0600; an existing one is narrowed to
/// 0600 before it is truncated and rewritten.
async fn write_private(path: &Path, contents: &[u8]) -> io::Result<()> {
    use tokio::io::AsyncWriteExt;

    let mut options = tokio::fs::OpenOptions::new();
    options.write(true).create(true);
    #[cfg(unix)]
    options.mode(0o600);
    let mut file = options.open(path).await?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        file.set_permissions(std::fs::Permissions::from_mode(0o600)).await?;
    }
    file.set_len(0).await?;
    file.write_all(contents).await?;
    file.sync_all().await
}

async fn read_optional(path: &Path) -> SecurityResult<Option<Vec<u8>>> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(SecurityError::io(path, e)),
    }
}

#[async_trait]
impl CertificateStore for DirectoryStore {
    async fn load_or_create_application_certificate(
        &self,
        request: &CertificateRequest,
    ) -> SecurityResult<ApplicationIdentity> {
        self.initialize().await?;
        if let Some(identity) = self.load_own().await? {
            if identity_matches(&identity, request) {
                tracing::debug!(
                    thumbprint = %identity.certificate.thumbprint_hex(),
                    "Loaded application certificate"
                );
                return Ok(identity);
            }
        }

        let identity = generate(request).await?;
        self.save_own(&identity).await?;
        tracing::info!(
            root = %self.root.display(),
            thumbprint = %identity.certificate.thumbprint_hex(),
            "Stored application certificate"
        );
        Ok(identity)
    }

    async fn trust_status(&self, cert: &Certificate) -> SecurityResult<TrustStatus> {
        if Self::contains(&self.trusted_dir(), cert).await? {
            Ok(TrustStatus::Trusted)
        } else if Self::contains(&self.rejected_dir(), cert).await? {
            Ok(TrustStatus::Rejected)
        } else {
            Ok(TrustStatus::Unknown)
        }
    }

    async fn trust(&self, cert: &Certificate) -> SecurityResult<()> {
        self.initialize().await?;
        let name = Self::file_name(cert);
        let path = self.trusted_dir().join(&name);
        tokio::fs::write(&path, cert.der())
            .await
            .map_err(|e| SecurityError::io(&path, e))?;

        let rejected = self.rejected_dir().join(&name);
        match tokio::fs::remove_file(&rejected).await {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(SecurityError::io(&rejected, e)),
        }
        tracing::info!(thumbprint = %cert.thumbprint_hex(), "Certificate trusted");
        Ok(())
    }

    async fn reject(&self, cert: &Certificate) -> SecurityResult<()> {
        self.initialize().await?;
        let path = self.rejected_dir().join(Self::file_name(cert));
        tokio::fs::write(&path, cert.der())
            .await
            .map_err(|e| SecurityError::io(&path, e))
    }

    async fn trusted_certificates(&self) -> SecurityResult<Vec<Certificate>> {
        Self::scan(&self.trusted_dir()).await
    }

    fn trust_on_first_use(&self) -> bool {
        self.trust_on_first_use
    }
}

// =============================================================================
// MemoryStore
// =============================================================================

/// In-memory store for tests and ephemeral clients.
#[derive(Debug, Default)]
pub struct MemoryStore {
    own: RwLock<Option<ApplicationIdentity>>,
    certificates: RwLock<HashMap<[u8; 20], (Certificate, TrustStatus)>>,
    trust_on_first_use: bool,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store that already holds `identity`.
    pub fn with_identity(identity: ApplicationIdentity) -> Self {
        Self {
            own: RwLock::new(Some(identity)),
            ..Default::default()
        }
    }

    /// Enables or disables trust-on-first-use.
    pub fn with_trust_on_first_use(mut self, enabled: bool) -> Self {
        self.trust_on_first_use = enabled;
        self
    }

    fn set_status(&self, cert: &Certificate, status: TrustStatus) {
        self.certificates
            .write()
            .insert(*cert.thumbprint(), (cert.clone(), status));
    }
}

#[async_trait]
impl CertificateStore for MemoryStore {
    async fn load_or_create_application_certificate(
        &self,
        request: &CertificateRequest,
    ) -> SecurityResult<ApplicationIdentity> {
        let existing = self.own.read().clone();
        if let Some(identity) = existing {
            if identity_matches(&identity, request) {
                return Ok(identity);
            }
        }
        let identity = generate(request).await?;
        *self.own.write() = Some(identity.clone());
        Ok(identity)
    }

    async fn trust_status(&self, cert: &Certificate) -> SecurityResult<TrustStatus> {
        Ok(self
            .certificates
            .read()
            .get(cert.thumbprint())
            .map(|(_, status)| *status)
            .unwrap_or(TrustStatus::Unknown))
    }

    async fn trust(&self, cert: &Certificate) -> SecurityResult<()> {
        self.set_status(cert, TrustStatus::Trusted);
        Ok(())
    }

    async fn reject(&self, cert: &Certificate) -> SecurityResult<()> {
        self.set_status(cert, TrustStatus::Rejected);
        Ok(())
    }

    async fn trusted_certificates(&self) -> SecurityResult<Vec<Certificate>> {
        Ok(self
            .certificates
            .read()
            .values()
            .filter(|(_, status)| *status == TrustStatus::Trusted)
            .map(|(cert, _)| cert.clone())
            .collect())
    }

    fn trust_on_first_use(&self) -> bool {
        self.trust_on_first_use
    }
}
