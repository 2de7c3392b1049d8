//! IntegrityDeriver — HKDF-derives an HMAC key from a DEK, and
//! computes/verifies tags over plaintext.
//!
//! The envelope pipeline always uses the fixed-constant form (fixed salt and
//! info string) so any party holding the DEK can re-derive the HMAC key
//! without any additional metadata, using the same `Hkdf::<Sha256>::new` +
//! `.expand()` shape as this crate's other key-derivation code.

use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

use crate::error::{CoreError, CoreResult};
use crate::secret::Dek;

const FIXED_SALT: &[u8] = b"s3-proxy-integrity-v1";
const FIXED_INFO: &[u8] = b"file-hmac-key";
const FIXED_KEY_LEN: usize = 32;

/// 32-byte HMAC key derived from a DEK. Zeroed on drop like the DEK it came from.
pub type IntegrityKey = Zeroizing<[u8; FIXED_KEY_LEN]>;

/// Derive the fixed-constant HMAC key the envelope pipeline always uses.
pub fn derive_integrity_key(dek: &Dek) -> IntegrityKey {
    derive_with(&**dek, FIXED_SALT, FIXED_INFO, FIXED_KEY_LEN)
        .try_into()
        .expect("FIXED_KEY_LEN matches requested length")
}

/// Generic HKDF-Extract-and-Expand with SHA-256, for callers outside the
/// fixed envelope pipeline that need a configurable salt/info/length.
///
/// Length is clamped to `[16, 64]`, matching the configurable variant's
/// documented range; callers inside this crate only ever request 32.
pub fn derive_with(ikm: &[u8], salt: &[u8], info: &[u8], len: usize) -> Zeroizing<Vec<u8>> {
    let len = len.clamp(16, 64);
    let hk = Hkdf::<Sha256>::new(Some(salt), ikm);
    let mut okm = Zeroizing::new(vec![0u8; len]);
    hk.expand(info, &mut okm)
        .expect("len is within HKDF-SHA256's 255*32-byte limit");
    okm
}

impl TryFrom<Zeroizing<Vec<u8>>> for IntegrityKey {
    type Error = ();

    fn try_from(value: Zeroizing<Vec<u8>>) -> Result<Self, Self::Error> {
        if value.len() != FIXED_KEY_LEN {
            return Err(());
        }
        let mut out = [0u8; FIXED_KEY_LEN];
        out.copy_from_slice(&value);
        Ok(Zeroizing::new(out))
    }
}

type HmacSha256 = Hmac<Sha256>;

/// Compute the 32-byte HMAC tag over `plaintext`.
pub fn compute_tag(key: &IntegrityKey, plaintext: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(&**key).expect("any length key is valid for HMAC");
    mac.update(plaintext);
    mac.finalize().into_bytes().to_vec()
}

/// Verify `tag` against a freshly recomputed HMAC over `plaintext`, in
/// constant time. `Mac::verify_slice` performs the constant-time comparison
/// internally.
pub fn verify_tag(key: &IntegrityKey, plaintext: &[u8], tag: &[u8]) -> CoreResult<()> {
    let mut mac = HmacSha256::new_from_slice(&**key).expect("any length key is valid for HMAC");
    mac.update(plaintext);
    mac.verify_slice(tag).map_err(|_| CoreError::IntegrityFailure)
}

/// Constant-time equality check used by the registry's fingerprint lookup
/// negative-result path, so "KEK present but wrong" and "KEK absent" take
/// visibly identical time where practical.
pub fn fingerprints_equal(a: &str, b: &str) -> bool {
    a.as_bytes().ct_eq(b.as_bytes()).into()
}
