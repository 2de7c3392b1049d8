//! Secret-material wrapper shared by every DEK/KEK path.
//!
//! A 32-byte DEK is generated fresh per object (or per multipart upload) and
//! must be zeroed on every exit path: success, early return, and error. We
//! lean on `zeroize::Zeroizing` rather than hand-rolling a `Drop` impl, the
//! same way the hybrid KEM code wrapped its shared secrets.

use rand_core::{OsRng, RngCore};
use zeroize::Zeroizing;

/// Length in bytes of every data-encrypting key this core produces or accepts.
pub const DEK_LEN: usize = 32;

/// A data-encrypting key. Zeroed automatically when dropped.
pub type Dek = Zeroizing<[u8; DEK_LEN]>;

/// Generate a fresh random DEK using the OS CSPRNG.
pub fn generate_dek() -> Dek {
    let mut bytes = [0u8; DEK_LEN];
    OsRng.fill_bytes(&mut bytes);
    Zeroizing::new(bytes)
}

/// Generate `n` random bytes (IVs, nonces) using the OS CSPRNG.
pub fn random_bytes<const N: usize>() -> [u8; N] {
    let mut bytes = [0u8; N];
    OsRng.fill_bytes(&mut bytes);
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generate_dek_is_full_length_and_not_all_zero() {
        let dek = generate_dek();
        assert_eq!(dek.len(), DEK_LEN);
        assert!(dek.iter().any(|&b| b != 0));
    }

    #[test]
    fn successive_deks_differ() {
        let a = generate_dek();
        let b = generate_dek();
        assert_ne!(*a, *b);
    }
}
