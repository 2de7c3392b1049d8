//! KeyEncryptor — wraps/unwraps a 32-byte DEK behind a stable fingerprint.
//!
//! Three variants make up the whole closed set: symmetric AES, RSA-OAEP, and
//! a pass-through `None`. Each is modeled as a concrete type implementing the
//! shared `KeyEncryptor` trait, the same interface-plus-concrete-types shape
//! used elsewhere in this crate for pluggable key-wrapping backends.

use aes::Aes256;
use base64::Engine as _;
use ctr::cipher::{KeyIvInit, StreamCipher};
use rand_core::{OsRng, RngCore};
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use sha2::{Digest, Sha256};

use crate::error::{CoreError, CoreResult};
use crate::secret::{Dek, DEK_LEN};

type Aes256Ctr = ctr::Ctr128BE<Aes256>;

/// A wrapped DEK together with the fingerprint of the KEK that wrapped it.
#[derive(Debug, Clone)]
pub struct Wrapped {
    pub ciphertext: Vec<u8>,
    pub fingerprint: String,
}

/// Contract shared by every KEK variant.
///
/// `rotate_kek` is optional: the three built-in variants all report
/// `NotSupported` since rotation is a registry-level operation, not a
/// per-instance one (see [`crate::registry::Registry::replace`]).
pub trait KeyEncryptor: Send + Sync {
    /// Short algorithm name stored as `kek-algorithm` (`"aes"`, `"rsa"`, `"none"`).
    fn name(&self) -> &'static str;

    /// Deterministic, collision-resistant identifier for this KEK's key material.
    fn fingerprint(&self) -> &str;

    fn wrap_dek(&self, dek: &Dek) -> CoreResult<Wrapped>;

    /// `expected_fingerprint` must equal `self.fingerprint()` or this fails
    /// with [`CoreError::KeyMismatch`] rather than attempting to unwrap.
    fn unwrap_dek(&self, wrapped: &[u8], expected_fingerprint: &str) -> CoreResult<Dek>;

    fn rotate_kek(&self) -> CoreResult<()> {
        Err(CoreError::NotSupported)
    }
}

fn hex_sha256(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

// ---------------------------------------------------------------------------
// Symmetric-AES KEK
// ---------------------------------------------------------------------------

/// Wraps DEKs with AES-CTR under a fresh 16-byte IV prepended to the ciphertext.
pub struct AesKek {
    key: Dek,
    fingerprint: String,
}

impl AesKek {
    pub fn new(key_material: &[u8]) -> CoreResult<Self> {
        if key_material.len() != DEK_LEN {
            return Err(CoreError::InvalidKey);
        }
        let mut key = zeroize::Zeroizing::new([0u8; DEK_LEN]);
        key.copy_from_slice(key_material);
        let fingerprint = hex_sha256(key_material);
        Ok(Self { key, fingerprint })
    }
}

impl KeyEncryptor for AesKek {
    fn name(&self) -> &'static str {
        "aes"
    }

    fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    fn wrap_dek(&self, dek: &Dek) -> CoreResult<Wrapped> {
        let mut iv = [0u8; 16];
        OsRng.fill_bytes(&mut iv);
        let mut buf = dek.to_vec();
        let mut cipher = Aes256Ctr::new((&*self.key).into(), (&iv).into());
        cipher.apply_keystream(&mut buf);
        let mut ciphertext = Vec::with_capacity(16 + buf.len());
        ciphertext.extend_from_slice(&iv);
        ciphertext.extend_from_slice(&buf);
        Ok(Wrapped {
            ciphertext,
            fingerprint: self.fingerprint.clone(),
        })
    }

    fn unwrap_dek(&self, wrapped: &[u8], expected_fingerprint: &str) -> CoreResult<Dek> {
        if expected_fingerprint != self.fingerprint {
            return Err(CoreError::KeyMismatch);
        }
        if wrapped.len() != 16 + DEK_LEN {
            return Err(CoreError::DecryptFailure);
        }
        let (iv, ct) = wrapped.split_at(16);
        let mut buf = ct.to_vec();
        let iv_arr: [u8; 16] = iv.try_into().map_err(|_| CoreError::DecryptFailure)?;
        let mut cipher = Aes256Ctr::new((&*self.key).into(), (&iv_arr).into());
        cipher.apply_keystream(&mut buf);
        let mut dek = zeroize::Zeroizing::new([0u8; DEK_LEN]);
        dek.copy_from_slice(&buf);
        buf.zeroize_fill();
        Ok(dek)
    }
}

/// Small local helper so plaintext scratch buffers are wiped even though
/// they're plain `Vec<u8>`, not `Zeroizing`.
trait ZeroizeFill {
    fn zeroize_fill(&mut self);
}

impl ZeroizeFill for Vec<u8> {
    fn zeroize_fill(&mut self) {
        use zeroize::Zeroize;
        self.zeroize();
    }
}

// ---------------------------------------------------------------------------
// RSA-OAEP KEK
// ---------------------------------------------------------------------------

/// Wraps DEKs with RSA-OAEP(SHA-256). Requires a modulus of at least 2048
/// bits and passes a construction-time self-test (encrypt probe → decrypt
/// probe) before becoming usable.
pub struct RsaKek {
    private: Option<RsaPrivateKey>,
    public: RsaPublicKey,
    fingerprint: String,
}

impl RsaKek {
    /// Build a KEK able to both wrap and unwrap.
    pub fn from_private_key(private: RsaPrivateKey) -> CoreResult<Self> {
        let public = RsaPublicKey::from(&private);
        if public.size() * 8 < 2048 {
            return Err(CoreError::InvalidKey);
        }
        let fingerprint = fingerprint_from_public(&public)?;
        let kek = Self {
            private: Some(private),
            public,
            fingerprint,
        };
        kek.self_test()?;
        Ok(kek)
    }

    /// Build a wrap-only KEK (no private key available locally) — used when
    /// registering a public-key-only peer for encryption towards a remote
    /// holder of the matching private key.
    pub fn from_public_key(public: RsaPublicKey) -> CoreResult<Self> {
        if public.size() * 8 < 2048 {
            return Err(CoreError::InvalidKey);
        }
        let fingerprint = fingerprint_from_public(&public)?;
        Ok(Self {
            private: None,
            public,
            fingerprint,
        })
    }

    fn self_test(&self) -> CoreResult<()> {
        let probe = crate::secret::generate_dek();
        let wrapped = self.wrap_dek(&probe)?;
        let unwrapped = self.unwrap_dek(&wrapped.ciphertext, &self.fingerprint)?;
        if *unwrapped != *probe {
            return Err(CoreError::InvalidKey);
        }
        Ok(())
    }
}

fn fingerprint_from_public(public: &RsaPublicKey) -> CoreResult<String> {
    let der = rsa::pkcs8::EncodePublicKey::to_public_key_der(public)
        .map_err(|_| CoreError::InvalidKey)?;
    Ok(hex_sha256(der.as_bytes()))
}

impl KeyEncryptor for RsaKek {
    fn name(&self) -> &'static str {
        "rsa"
    }

    fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    fn wrap_dek(&self, dek: &Dek) -> CoreResult<Wrapped> {
        let padding = Oaep::new::<Sha256>();
        let ciphertext = self
            .public
            .encrypt(&mut OsRng, padding, &**dek)
            .map_err(|_| CoreError::InvalidKey)?;
        Ok(Wrapped {
            ciphertext,
            fingerprint: self.fingerprint.clone(),
        })
    }

    fn unwrap_dek(&self, wrapped: &[u8], expected_fingerprint: &str) -> CoreResult<Dek> {
        if expected_fingerprint != self.fingerprint {
            return Err(CoreError::KeyMismatch);
        }
        let private = self.private.as_ref().ok_or(CoreError::DecryptFailure)?;
        let padding = Oaep::new::<Sha256>();
        let mut plain = private
            .decrypt(padding, wrapped)
            .map_err(|_| CoreError::DecryptFailure)?;
        if plain.len() != DEK_LEN {
            plain.zeroize_fill();
            return Err(CoreError::DecryptFailure);
        }
        let mut dek = zeroize::Zeroizing::new([0u8; DEK_LEN]);
        dek.copy_from_slice(&plain);
        plain.zeroize_fill();
        Ok(dek)
    }
}

// ---------------------------------------------------------------------------
// None KEK (pure pass-through)
// ---------------------------------------------------------------------------

/// Pass-through KEK for pure proxy mode. Still produces a stable fingerprint
/// so the registry and envelope round-trip exactly as any other variant.
pub struct NoneKek {
    fingerprint: String,
}

impl NoneKek {
    pub fn new() -> Self {
        Self {
            fingerprint: hex_sha256(b"none"),
        }
    }
}

impl Default for NoneKek {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyEncryptor for NoneKek {
    fn name(&self) -> &'static str {
        "none"
    }

    fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    fn wrap_dek(&self, dek: &Dek) -> CoreResult<Wrapped> {
        Ok(Wrapped {
            ciphertext: dek.to_vec(),
            fingerprint: self.fingerprint.clone(),
        })
    }

    fn unwrap_dek(&self, wrapped: &[u8], expected_fingerprint: &str) -> CoreResult<Dek> {
        if expected_fingerprint != self.fingerprint {
            return Err(CoreError::KeyMismatch);
        }
        if wrapped.len() != DEK_LEN {
            return Err(CoreError::DecryptFailure);
        }
        let mut dek = zeroize::Zeroizing::new([0u8; DEK_LEN]);
        dek.copy_from_slice(wrapped);
        Ok(dek)
    }
}

/// base64-encode wrapped DEK bytes, as stored in the `encrypted-dek` envelope entry.
pub fn encode_wrapped(wrapped: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(wrapped)
}

/// Decode the `encrypted-dek` envelope entry back into wrapped-DEK bytes.
pub fn decode_wrapped(encoded: &str) -> CoreResult<Vec<u8>> {
    base64::engine::general_purpose::STANDARD
        .decode(encoded)
        .map_err(|_| CoreError::DecryptFailure)
}
