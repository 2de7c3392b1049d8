//! Registry & Factory — registers KeyEncryptors by fingerprint and builds
//! EnvelopeEngines on demand.
//!
//! Lookups (the decrypt path) must not serialize against each other or
//! against registration, so the table uses a `tokio::sync::RwLock`: many
//! concurrent readers, exclusive only for insert/replace/remove. This
//! follows the same `RwLock<HashMap<..>>` shape used elsewhere in this
//! crate for the same reason (decrypt throughput scales with KEK lookups).
//!
//! Only content-type-aware data-encryptor selection is implemented here; a
//! fingerprint-only factory is not part of this crate's surface.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::dek::{CtrDataEncryptor, DataEncryptor, GcmDataEncryptor};
use crate::error::{CoreError, CoreResult};
use crate::integrity::fingerprints_equal;
use crate::kek::KeyEncryptor;
use crate::mode::Mode;

/// Fingerprint → KeyEncryptor map, safe for concurrent lookup and registration.
#[derive(Default)]
pub struct Registry {
    entries: RwLock<HashMap<String, Arc<dyn KeyEncryptor>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Register a KeyEncryptor under its own fingerprint. Replaces whatever
    /// was previously registered at that fingerprint, if anything.
    pub async fn register(&self, kek: Arc<dyn KeyEncryptor>) {
        let fingerprint = kek.fingerprint().to_string();
        self.entries.write().await.insert(fingerprint, kek);
    }

    pub async fn remove(&self, fingerprint: &str) {
        self.entries.write().await.remove(fingerprint);
    }

    /// Resolve a KeyEncryptor by fingerprint. `UnknownKey` if nothing is
    /// registered under it — a different key's fingerprint that was never
    /// registered fails lookup itself, rather than a same-slot mismatch.
    pub async fn resolve(&self, fingerprint: &str) -> CoreResult<Arc<dyn KeyEncryptor>> {
        let entries = self.entries.read().await;
        for (registered_fp, kek) in entries.iter() {
            if fingerprints_equal(registered_fp, fingerprint) {
                return Ok(Arc::clone(kek));
            }
        }
        Err(CoreError::UnknownKey)
    }

    /// KEK rotation is a registry-level operation: register the new
    /// KeyEncryptor, remove the old fingerprint. Each built-in
    /// `KeyEncryptor::rotate_kek` itself always returns `NotSupported`.
    pub async fn replace(&self, old_fingerprint: &str, new_kek: Arc<dyn KeyEncryptor>) {
        self.register(new_kek).await;
        self.remove(old_fingerprint).await;
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}

/// Build the concrete DataEncryptor implied by a mode selection.
pub fn data_encryptor_for_mode(mode: Mode) -> Box<dyn DataEncryptor> {
    match mode {
        Mode::Gcm => Box::new(GcmDataEncryptor::new()),
        Mode::Ctr => Box::new(CtrDataEncryptor::new()),
    }
}
