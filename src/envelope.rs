//! EnvelopeEngine — composes one KeyEncryptor and one DataEncryptor
//! (optionally an IntegrityDeriver) into a single encrypt/decrypt pipeline,
//! and produces/consumes the metadata envelope attached to ciphertext.

use std::collections::BTreeMap;
use std::io::Read;

use base64::Engine as _;
use serde::{Deserialize, Serialize};

use crate::audit::{AuditAction, AuditEvent, AuditSinkSync};
use crate::cancel::CancellationToken;
use crate::config::GatewayConfig;
use crate::dek::{CtrDataEncryptor, DataEncryptor, GcmDataEncryptor};
use crate::error::{CoreError, CoreResult};
use crate::integrity::{self, IntegrityKey};
use crate::kek::{self, KeyEncryptor};
use crate::secret::{self, Dek};

pub const DEFAULT_PREFIX: &str = "s3ep-";

const FIELD_DEK_ALGORITHM: &str = "dek-algorithm";
const FIELD_ENCRYPTED_DEK: &str = "encrypted-dek";
const FIELD_KEK_ALGORITHM: &str = "kek-algorithm";
const FIELD_KEK_FINGERPRINT: &str = "kek-fingerprint";
const FIELD_AES_IV: &str = "aes-iv";
const FIELD_HMAC: &str = "hmac";

/// Fields recognized in unprefixed legacy form on read (never emitted on write).
const LEGACY_FIELDS: &[&str] = &[
    FIELD_DEK_ALGORITHM,
    FIELD_ENCRYPTED_DEK,
    FIELD_AES_IV,
    FIELD_HMAC,
];

/// A small mapping of stringly-typed entries attached to each ciphertext
/// object. Deterministic iteration order (`BTreeMap`) keeps logging and
/// tests reproducible.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope(pub BTreeMap<String, String>);

impl Envelope {
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// Read a field, checking the prefixed name first, then (for fields that
    /// have a legacy unprefixed form) the bare legacy name. `"dek"` is
    /// additionally recognized as a legacy alias of `encrypted-dek`.
    pub fn get_field(&self, prefix: &str, canonical: &str) -> Option<&str> {
        if let Some(v) = self.0.get(&format!("{prefix}{canonical}")) {
            return Some(v.as_str());
        }
        if LEGACY_FIELDS.contains(&canonical) {
            if let Some(v) = self.0.get(canonical) {
                return Some(v.as_str());
            }
        }
        if canonical == FIELD_ENCRYPTED_DEK {
            if let Some(v) = self.0.get("dek") {
                return Some(v.as_str());
            }
        }
        None
    }

    fn set_field(&mut self, prefix: &str, canonical: &str, value: String) {
        self.0.insert(format!("{prefix}{canonical}"), value);
    }

    /// Metadata key names (prefixed and legacy) that must be stripped from
    /// any response returned to a client, per the response filtering rule.
    pub fn is_envelope_key(prefix: &str, key: &str) -> bool {
        if key.starts_with(prefix) {
            return true;
        }
        key == "dek" || LEGACY_FIELDS.contains(&key)
    }
}

/// Explicit state machine for whole-object encrypt, so "any error
/// transitions to `failed`" is an inspectable value rather than implicit
/// control flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Idle,
    DekGenerated,
    DataStreaming,
    DekWrapped,
    MetadataReady,
    Failed,
}

/// Per-operation record returned by a successful encrypt.
pub struct EncryptionResult {
    pub ciphertext: Vec<u8>,
    pub wrapped_dek: Vec<u8>,
    pub envelope: Envelope,
    pub state: EngineState,
}

/// Composes one KeyEncryptor and one DataEncryptor, plus a metadata-prefix,
/// into a single encrypt pipeline. Decrypt is exposed as a free function
/// ([`decrypt_bytes`]) since the DataEncryptor there is resolved dynamically
/// from envelope metadata, not fixed ahead of time like on the write path.
pub struct EnvelopeEngine<'a> {
    kek: &'a dyn KeyEncryptor,
    dek_encryptor: &'a dyn DataEncryptor,
    prefix: String,
}

impl<'a> EnvelopeEngine<'a> {
    pub fn new(kek: &'a dyn KeyEncryptor, dek_encryptor: &'a dyn DataEncryptor) -> Self {
        Self {
            kek,
            dek_encryptor,
            prefix: DEFAULT_PREFIX.to_string(),
        }
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Encrypt with no integrity tag. See [`Self::encrypt_with_hmac`] for the
    /// HMAC-covered variant.
    ///
    /// `cancel` is checked before any DEK is generated; a token that fires
    /// mid-call does not interrupt the in-memory AEAD/CTR pass itself, since
    /// `plaintext` is already fully buffered by the caller, but the DEK is
    /// still wiped on return and no envelope is emitted.
    pub fn encrypt_bytes(&self, plaintext: &[u8], aad: &[u8], cancel: &CancellationToken) -> CoreResult<EncryptionResult> {
        self.encrypt_inner(plaintext, aad, false, cancel)
    }

    /// Encrypt and additionally cover `plaintext` with an HMAC tag derived
    /// from the DEK, added to the envelope as `hmac`.
    pub fn encrypt_with_hmac(
        &self,
        plaintext: &[u8],
        aad: &[u8],
        cancel: &CancellationToken,
    ) -> CoreResult<EncryptionResult> {
        self.encrypt_inner(plaintext, aad, true, cancel)
    }

    /// Encrypt a `Read`r with no integrity tag. Buffers the whole reader
    /// before encrypting — see [`crate::dek::DataEncryptor::encrypt_stream`]
    /// for why both variants need this even though only GCM strictly
    /// requires it.
    pub fn encrypt_stream(
        &self,
        reader: &mut dyn Read,
        aad: &[u8],
        cancel: &CancellationToken,
    ) -> CoreResult<EncryptionResult> {
        let mut plaintext = Vec::new();
        reader
            .read_to_end(&mut plaintext)
            .map_err(|_| CoreError::DecryptFailure)?;
        self.encrypt_inner(&plaintext, aad, false, cancel)
    }

    fn encrypt_inner(
        &self,
        plaintext: &[u8],
        aad: &[u8],
        want_hmac: bool,
        cancel: &CancellationToken,
    ) -> CoreResult<EncryptionResult> {
        let mut state = EngineState::Idle;
        if cancel.is_cancelled() {
            return Err(self.fail(&mut state, CoreError::Cancelled));
        }
        let dek = secret::generate_dek();
        state = EngineState::DekGenerated;

        let hmac_key: Option<IntegrityKey> = want_hmac.then(|| integrity::derive_integrity_key(&dek));

        let out = match self.dek_encryptor.encrypt(plaintext, &dek, aad) {
            Ok(out) => out,
            Err(e) => return Err(self.fail(&mut state, e)),
        };
        state = EngineState::DataStreaming;

        if cancel.is_cancelled() {
            return Err(self.fail(&mut state, CoreError::Cancelled));
        }

        let hmac_tag = hmac_key
            .as_ref()
            .map(|key| integrity::compute_tag(key, plaintext));

        let wrapped = match self.kek.wrap_dek(&dek) {
            Ok(w) => w,
            Err(e) => return Err(self.fail(&mut state, e)),
        };
        state = EngineState::DekWrapped;

        let mut envelope = Envelope::new();
        envelope.set_field(&self.prefix, FIELD_DEK_ALGORITHM, self.dek_encryptor.algorithm().to_string());
        envelope.set_field(
            &self.prefix,
            FIELD_ENCRYPTED_DEK,
            kek::encode_wrapped(&wrapped.ciphertext),
        );
        envelope.set_field(&self.prefix, FIELD_KEK_ALGORITHM, self.kek.name().to_string());
        envelope.set_field(&self.prefix, FIELD_KEK_FINGERPRINT, wrapped.fingerprint.clone());
        if !out.iv.is_empty() {
            envelope.set_field(
                &self.prefix,
                FIELD_AES_IV,
                base64::engine::general_purpose::STANDARD.encode(&out.iv),
            );
        }
        if let Some(tag) = hmac_tag {
            envelope.set_field(
                &self.prefix,
                FIELD_HMAC,
                base64::engine::general_purpose::STANDARD.encode(tag),
            );
        }
        state = EngineState::MetadataReady;

        Ok(EncryptionResult {
            ciphertext: out.ciphertext,
            wrapped_dek: wrapped.ciphertext,
            envelope,
            state,
        })
    }

    /// Any error transitions the local state to `failed`, wipes the DEK
    /// (automatic via `Zeroizing` drop on return), and emits no metadata.
    fn fail(&self, state: &mut EngineState, err: CoreError) -> CoreError {
        *state = EngineState::Failed;
        err
    }
}

/// Resolve the DataEncryptor implied by an envelope's `dek-algorithm` tag,
/// accepting all four historical spellings.
fn data_encryptor_for_algorithm(tag: &str) -> CoreResult<Box<dyn DataEncryptor>> {
    match tag {
        "aes-gcm" | "aes-256-gcm" => Ok(Box::new(GcmDataEncryptor::new())),
        "aes-ctr" | "aes-256-ctr" => Ok(Box::new(CtrDataEncryptor::new())),
        _ => Err(CoreError::DecryptFailure),
    }
}

/// Decrypt `ciphertext` given the envelope it was stored with and the
/// already-resolved `KeyEncryptor` (resolution by `kek-fingerprint` is the
/// registry's job, not this function's).
///
/// `config.warn_on_missing_hmac` and `audit` jointly gate a policy warning:
/// a CTR/no-GCM envelope that omits `hmac` entirely decrypts successfully
/// (absence of a tag is not itself a failure) but is reported to `audit`,
/// if given one, as [`AuditAction::DecryptMissingHmacWarning`] when the flag
/// is set. Every call also reports [`AuditAction::DecryptPerformed`] on
/// success or [`AuditAction::DecryptFailed`] on error, when `audit` is given.
#[allow(clippy::too_many_arguments)]
pub fn decrypt_bytes(
    kek: &dyn KeyEncryptor,
    envelope: &Envelope,
    ciphertext: &[u8],
    aad: &[u8],
    prefix: &str,
    cancel: &CancellationToken,
    config: &GatewayConfig,
    audit: Option<&dyn AuditSinkSync>,
) -> CoreResult<Vec<u8>> {
    let result = decrypt_bytes_inner(kek, envelope, ciphertext, aad, prefix, cancel, config, audit);
    if let Some(sink) = audit {
        match &result {
            Ok(_) => {
                let mode = envelope
                    .get_field(prefix, FIELD_DEK_ALGORITHM)
                    .unwrap_or("unknown")
                    .to_string();
                sink.record(AuditEvent::new(AuditAction::DecryptPerformed { mode }));
            }
            Err(e) => {
                sink.record(AuditEvent::new(AuditAction::DecryptFailed { reason: e.to_string() }).with_failure());
            }
        }
    }
    result
}

#[allow(clippy::too_many_arguments)]
fn decrypt_bytes_inner(
    kek: &dyn KeyEncryptor,
    envelope: &Envelope,
    ciphertext: &[u8],
    aad: &[u8],
    prefix: &str,
    cancel: &CancellationToken,
    config: &GatewayConfig,
    audit: Option<&dyn AuditSinkSync>,
) -> CoreResult<Vec<u8>> {
    if cancel.is_cancelled() {
        return Err(CoreError::Cancelled);
    }
    let algorithm = envelope
        .get_field(prefix, FIELD_DEK_ALGORITHM)
        .ok_or(CoreError::DecryptFailure)?;
    let fingerprint = envelope
        .get_field(prefix, FIELD_KEK_FINGERPRINT)
        .ok_or(CoreError::UnknownKey)?
        .to_string();
    let wrapped_b64 = envelope
        .get_field(prefix, FIELD_ENCRYPTED_DEK)
        .ok_or(CoreError::DecryptFailure)?;
    let wrapped = kek::decode_wrapped(wrapped_b64)?;

    let dek: Dek = kek.unwrap_dek(&wrapped, &fingerprint)?;

    let data_encryptor = data_encryptor_for_algorithm(algorithm)?;
    let iv = match algorithm {
        "aes-ctr" | "aes-256-ctr" => {
            let iv_b64 = envelope.get_field(prefix, FIELD_AES_IV).ok_or(CoreError::MissingIV)?;
            Some(
                base64::engine::general_purpose::STANDARD
                    .decode(iv_b64)
                    .map_err(|_| CoreError::MissingIV)?,
            )
        }
        _ => match envelope.get_field(prefix, FIELD_AES_IV) {
            Some(iv_b64) => Some(
                base64::engine::general_purpose::STANDARD
                    .decode(iv_b64)
                    .map_err(|_| CoreError::DecryptFailure)?,
            ),
            None => None,
        },
    };

    let plaintext = data_encryptor.decrypt(ciphertext, &dek, iv.as_deref(), aad)?;

    match envelope.get_field(prefix, FIELD_HMAC) {
        Some(hmac_b64) => {
            let tag = base64::engine::general_purpose::STANDARD
                .decode(hmac_b64)
                .map_err(|_| CoreError::IntegrityFailure)?;
            let hmac_key = integrity::derive_integrity_key(&dek);
            integrity::verify_tag(&hmac_key, &plaintext, &tag)?;
        }
        None if config.warn_on_missing_hmac => {
            if let Some(sink) = audit {
                sink.record(AuditEvent::new(AuditAction::DecryptMissingHmacWarning));
            }
        }
        None => {}
    }

    Ok(plaintext)
}

/// `Read`-based form of [`decrypt_bytes`]: buffers `reader` in full, then
/// decrypts.
#[allow(clippy::too_many_arguments)]
pub fn decrypt_stream(
    kek: &dyn KeyEncryptor,
    envelope: &Envelope,
    reader: &mut dyn Read,
    aad: &[u8],
    prefix: &str,
    cancel: &CancellationToken,
    config: &GatewayConfig,
    audit: Option<&dyn AuditSinkSync>,
) -> CoreResult<Vec<u8>> {
    let mut ciphertext = Vec::new();
    reader
        .read_to_end(&mut ciphertext)
        .map_err(|_| CoreError::DecryptFailure)?;
    decrypt_bytes(kek, envelope, &ciphertext, aad, prefix, cancel, config, audit)
}
