//! Firmware store: the image offered for OTA and its content identity.
//!
//! The identity is the trailing [`DIGEST_LEN`] bytes of the image, rendered as
//! lowercase hex. The build appends a SHA-256 of the image body there, so the
//! value is self-reported by the artifact; [`FirmwareArtifact::embedded_digest_matches`]
//! recomputes it as a sanity check only. Nothing here authenticates the image.

use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

/// Length in bytes of the digest trailer.
pub const DIGEST_LEN: usize = 32;

/// Firmware image loaded once at startup; immutable afterwards.
#[derive(Debug, Clone)]
pub struct FirmwareArtifact {
    bytes: Vec<u8>,
    digest: String,
}

impl FirmwareArtifact {
    /// Read the whole image into memory and derive its digest.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, LoadError> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).map_err(|source| LoadError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_bytes(bytes)
    }

    /// Build from an in-memory image.
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self, LoadError> {
        if bytes.len() < DIGEST_LEN {
            return Err(LoadError::TooShort { len: bytes.len() });
        }
        let digest = hex::encode(&bytes[bytes.len() - DIGEST_LEN..]);
        Ok(Self { bytes, digest })
    }

    /// Build with an explicitly pinned identity instead of the trailer.
    pub fn with_digest(bytes: Vec<u8>, digest: impl Into<String>) -> Self {
        Self {
            bytes,
            digest: digest.into().to_ascii_lowercase(),
        }
    }

    /// Lowercase hex identity. Computed at construction.
    pub fn current_digest(&self) -> &str {
        &self.digest
    }

    pub fn byte_length(&self) -> usize {
        self.bytes.len()
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Whether the trailer equals SHA-256 of the bytes before it.
    pub fn embedded_digest_matches(&self) -> bool {
        if self.bytes.len() < DIGEST_LEN {
            return false;
        }
        let (body, trailer) = self.bytes.split_at(self.bytes.len() - DIGEST_LEN);
        let computed: [u8; 32] = Sha256::digest(body).into();
        computed.as_slice() == trailer
    }
}

/// Copy a freshly built image to the location the asset host serves it from.
pub fn stage(source: impl AsRef<Path>, dest: impl AsRef<Path>) -> Result<u64, LoadError> {
    let (source, dest) = (source.as_ref(), dest.as_ref());
    if let Some(parent) = dest.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|source| LoadError::Io {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    std::fs::copy(source, dest).map_err(|e| LoadError::Stage {
        from: source.to_path_buf(),
        to: dest.to_path_buf(),
        source: e,
    })
}

/// Firmware could not be loaded; the service must not accept devices.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("cannot read firmware {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot stage firmware {} -> {}: {source}", from.display(), to.display())]
    Stage {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("firmware is {len} bytes, shorter than its {DIGEST_LEN}-byte digest trailer")]
    TooShort { len: usize },
}
