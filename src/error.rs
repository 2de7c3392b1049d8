//! Unified error taxonomy for the encryption core.
//!
//! `CoreError` is hand-written rather than `thiserror`-derived so its
//! `Display` impls are fully under our control: every message is a fixed
//! string with no interpolated ciphertext, key material, or cipher-internal
//! detail. Newtype wrappers around upstream failures still use `thiserror`,
//! since those messages are free to carry transport-level context (bucket,
//! key, upload id) that never touches key material.

use core::fmt;

/// The error taxonomy consumed by every core operation.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum CoreError {
    /// KEK or DEK size/format is wrong (e.g. RSA modulus < 2048 bits, DEK != 32 bytes).
    InvalidKey,
    /// `kek-fingerprint` does not resolve to any registered KeyEncryptor.
    UnknownKey,
    /// `kek-fingerprint` resolved to a KeyEncryptor whose own fingerprint differs.
    KeyMismatch,
    /// Cipher-level failure with no further detail.
    DecryptFailure,
    /// HMAC or GCM tag verification failed; any drained plaintext must be discarded.
    IntegrityFailure,
    /// CTR decrypt requested without an `aes-iv` envelope entry.
    MissingIV,
    /// Multipart complete was called with a part set that disagrees with
    /// what the coordinator recorded.
    MissingPart,
    /// Part/complete/abort referenced an upload id with no active state.
    UnknownUpload,
    /// Transport failure from the upstream object store.
    UpstreamError(UpstreamErrorDetail),
    /// Requested capability (e.g. `rotate_kek`) is not implemented by this variant.
    NotSupported,
    /// The caller's `CancellationToken` fired before the operation completed.
    Cancelled,
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidKey => write!(f, "invalid key"),
            Self::UnknownKey => write!(f, "unknown key"),
            Self::KeyMismatch => write!(f, "key mismatch"),
            Self::DecryptFailure => write!(f, "decrypt failure"),
            Self::IntegrityFailure => write!(f, "integrity failure"),
            Self::MissingIV => write!(f, "missing iv"),
            Self::MissingPart => write!(f, "missing part"),
            Self::UnknownUpload => write!(f, "unknown upload"),
            Self::UpstreamError(_) => write!(f, "upstream error"),
            Self::NotSupported => write!(f, "not supported"),
            Self::Cancelled => write!(f, "operation cancelled"),
        }
    }
}

impl std::error::Error for CoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::UpstreamError(detail) => Some(detail),
            _ => None,
        }
    }
}

impl From<UpstreamErrorDetail> for CoreError {
    fn from(detail: UpstreamErrorDetail) -> Self {
        Self::UpstreamError(detail)
    }
}

/// Wrapped transport failure from an [`crate::upstream::UpstreamStore`] call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("upstream {operation} failed for {bucket}/{key}: {message}")]
pub struct UpstreamErrorDetail {
    pub operation: &'static str,
    pub bucket: String,
    pub key: String,
    pub message: String,
}

impl UpstreamErrorDetail {
    pub fn new(
        operation: &'static str,
        bucket: impl Into<String>,
        key: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            operation,
            bucket: bucket.into(),
            key: key.into(),
            message: message.into(),
        }
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
