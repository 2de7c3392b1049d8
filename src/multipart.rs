//! MultipartCoordinator — threads a single logical CTR stream across
//! independently uploaded parts, preserving counter state and cross-part
//! integrity, then finalizes the object with envelope metadata attached.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use base64::Engine as _;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, RwLock};

use crate::audit::{AuditAction, AuditEvent, AuditSinkSync};
use crate::cancel::CancellationToken;
use crate::dek::{StreamingCtrSession, CTR_IV_LEN};
use crate::error::{CoreError, CoreResult};
use crate::kek::KeyEncryptor;
use crate::secret::{self, Dek};
use crate::upstream::{MetadataDirective, ObjectMetadata, UpstreamStore};

const FIELD_DEK_ALGORITHM: &str = "dek-algorithm";
const FIELD_ENCRYPTED_DEK: &str = "encrypted-dek";
const FIELD_KEK_ALGORITHM: &str = "kek-algorithm";
const FIELD_KEK_FINGERPRINT: &str = "kek-fingerprint";
const FIELD_AES_IV: &str = "aes-iv";

/// Per-upload state: created on initiate, mutated only by the coordinator,
/// destroyed on complete or abort.
pub struct MultipartUploadState {
    bucket: String,
    key: String,
    upstream_upload_id: String,
    dek: Dek,
    session: StreamingCtrSession,
    wrapped_dek: Vec<u8>,
    kek_fingerprint: String,
    kek_algorithm: &'static str,
    /// Ordered `partNumber -> partETag`, as returned by the upstream store.
    parts: BTreeMap<u32, String>,
    /// The next part number the running `session` is positioned to encrypt.
    /// Starts at 1; advances by one every time a part is actually fed
    /// through the session, whether it arrived on time or was drained from
    /// `pending`.
    next_part_number: u32,
    /// Plaintext for parts that arrived ahead of their turn, held until the
    /// session reaches their part number so the CTR counter stays aligned.
    pending: BTreeMap<u32, Vec<u8>>,
    created_at: DateTime<Utc>,
    last_activity_at: DateTime<Utc>,
}

impl MultipartUploadState {
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn last_activity_at(&self) -> DateTime<Utc> {
        self.last_activity_at
    }

    /// The sticky DEK for this upload, for callers driving
    /// `dek::encrypt_at_offset` themselves on out-of-order parts.
    pub fn dek(&self) -> &Dek {
        &self.dek
    }

    fn touch(&mut self) {
        self.last_activity_at = Utc::now();
    }

    fn is_expired(&self, deadline: Duration) -> bool {
        let elapsed = Utc::now() - self.last_activity_at;
        elapsed.to_std().map(|d| d >= deadline).unwrap_or(false)
    }

    fn blueprint_metadata(&self, prefix: &str) -> ObjectMetadata {
        let mut map = HashMap::new();
        map.insert(format!("{prefix}{FIELD_DEK_ALGORITHM}"), "aes-256-ctr".to_string());
        map.insert(
            format!("{prefix}{FIELD_ENCRYPTED_DEK}"),
            base64::engine::general_purpose::STANDARD.encode(&self.wrapped_dek),
        );
        map.insert(format!("{prefix}{FIELD_KEK_ALGORITHM}"), self.kek_algorithm.to_string());
        map.insert(format!("{prefix}{FIELD_KEK_FINGERPRINT}"), self.kek_fingerprint.clone());
        map.insert(
            format!("{prefix}{FIELD_AES_IV}"),
            base64::engine::general_purpose::STANDARD.encode(self.session.iv()),
        );
        ObjectMetadata(map.into_iter().collect())
    }
}

/// Maintains `uploadId -> MultipartUploadState` with mutual exclusion per
/// id: the table lock (`RwLock`) is held only for insert/remove/lookup, a
/// per-entry `tokio::sync::Mutex` guards mutation, so distinct upload ids
/// proceed in parallel.
pub struct MultipartCoordinator<S: UpstreamStore> {
    uploads: RwLock<HashMap<String, Arc<Mutex<MultipartUploadState>>>>,
    upstream: Arc<S>,
    metadata_prefix: String,
    inactivity_deadline: Duration,
    audit: Option<Arc<dyn AuditSinkSync>>,
}

impl<S: UpstreamStore> MultipartCoordinator<S> {
    pub fn new(upstream: Arc<S>, metadata_prefix: impl Into<String>, inactivity_deadline: Duration) -> Self {
        Self {
            uploads: RwLock::new(HashMap::new()),
            upstream,
            metadata_prefix: metadata_prefix.into(),
            inactivity_deadline,
            audit: None,
        }
    }

    pub fn with_audit(mut self, audit: Arc<dyn AuditSinkSync>) -> Self {
        self.audit = Some(audit);
        self
    }

    fn record(&self, event: AuditEvent) {
        if let Some(sink) = &self.audit {
            sink.record(event);
        }
    }

    /// Generate one DEK and IV, wrap the DEK once, build (but don't yet
    /// commit) the envelope blueprint, and register the state under a
    /// gateway-facing upload id.
    pub async fn initiate(
        &self,
        bucket: &str,
        key: &str,
        kek: &dyn KeyEncryptor,
        cancel: &CancellationToken,
    ) -> CoreResult<String> {
        if cancel.is_cancelled() {
            return Err(CoreError::Cancelled);
        }
        let dek = secret::generate_dek();
        let iv: [u8; CTR_IV_LEN] = secret::random_bytes();
        let wrapped = kek.wrap_dek(&dek)?;

        let upstream_upload_id = self
            .upstream
            .create_multipart_upload(bucket, key, ObjectMetadata::default())
            .await?;

        let state = MultipartUploadState {
            bucket: bucket.to_string(),
            key: key.to_string(),
            upstream_upload_id: upstream_upload_id.clone(),
            dek: dek.clone(),
            session: StreamingCtrSession::new(dek, iv),
            wrapped_dek: wrapped.ciphertext,
            kek_fingerprint: wrapped.fingerprint,
            kek_algorithm: kek.name(),
            parts: BTreeMap::new(),
            next_part_number: 1,
            pending: BTreeMap::new(),
            created_at: Utc::now(),
            last_activity_at: Utc::now(),
        };

        let gateway_upload_id = upstream_upload_id;
        self.uploads
            .write()
            .await
            .insert(gateway_upload_id.clone(), Arc::new(Mutex::new(state)));
        self.record(
            AuditEvent::new(AuditAction::MultipartInitiated)
                .with_object(bucket, key)
                .with_upload_id(&gateway_upload_id),
        );
        Ok(gateway_upload_id)
    }

    async fn entry(&self, upload_id: &str) -> CoreResult<Arc<Mutex<MultipartUploadState>>> {
        self.uploads
            .read()
            .await
            .get(upload_id)
            .cloned()
            .ok_or(CoreError::UnknownUpload)
    }

    /// Encrypt `plaintext_bytes` as `part_number` of the logical stream.
    ///
    /// The running `StreamingCtrSession` only advances correctly when fed
    /// in part-number order, but S3-style multipart permits clients to
    /// upload parts in any order. This method upholds the ordering
    /// invariant itself: a part that arrives on time is encrypted and
    /// uploaded immediately; a part that arrives ahead of its turn is
    /// buffered (plaintext only, nothing sent upstream yet) until the
    /// session reaches its part number, at which point it and any
    /// subsequent already-buffered parts are drained in sequence. Callers
    /// parallelizing encryption themselves can instead drive
    /// `dek::encrypt_at_offset` using `current_offset()` and
    /// `record_out_of_order_part()`, bypassing this buffering entirely.
    ///
    /// `cancel` firing here aborts only this one part call — the upload's
    /// state (session offset, recorded parts, pending buffer) is left
    /// exactly as it was. A subsequent `abort` or the inactivity reaper is
    /// what actually tears down the upload.
    pub async fn upload_part(
        &self,
        upload_id: &str,
        part_number: u32,
        plaintext_bytes: &[u8],
        cancel: &CancellationToken,
    ) -> CoreResult<()> {
        if cancel.is_cancelled() {
            return Err(CoreError::Cancelled);
        }
        let entry = self.entry(upload_id).await?;
        let mut state = entry.lock().await;

        if part_number < state.next_part_number {
            // Already encrypted (directly or via a prior drain); the
            // ciphertext for this part number was fixed the moment the
            // session claimed its offset. Treat a resubmission as a no-op.
            state.touch();
            return Ok(());
        }

        if part_number == state.next_part_number {
            self.encrypt_and_record(&mut state, upload_id, part_number, plaintext_bytes)
                .await?;
            while let Some(buffered) = state.pending.remove(&state.next_part_number) {
                let next = state.next_part_number;
                self.encrypt_and_record(&mut state, upload_id, next, &buffered).await?;
            }
        } else {
            state.pending.insert(part_number, plaintext_bytes.to_vec());
            state.touch();
        }
        Ok(())
    }

    /// Feed one part through the running session, upload its ciphertext,
    /// and record its ETag. Only ever called with `part_number ==
    /// state.next_part_number` — the one invariant this whole module exists
    /// to protect.
    async fn encrypt_and_record(
        &self,
        state: &mut MultipartUploadState,
        upload_id: &str,
        part_number: u32,
        plaintext_bytes: &[u8],
    ) -> CoreResult<()> {
        let ciphertext = state.session.encrypt_part(plaintext_bytes)?;
        let etag = self
            .upstream
            .upload_part(
                &state.upstream_upload_id,
                part_number,
                ciphertext,
                plaintext_bytes.len() as u64,
            )
            .await?;
        state.parts.insert(part_number, etag);
        state.next_part_number += 1;
        state.touch();
        self.record(AuditEvent::new(AuditAction::MultipartPartUploaded { part_number }).with_upload_id(upload_id));
        Ok(())
    }

    /// Byte offset the running session has reached — for callers driving
    /// `encrypt_at_offset` themselves for out-of-order/parallel part uploads.
    pub async fn current_offset(&self, upload_id: &str) -> CoreResult<u128> {
        let entry = self.entry(upload_id).await?;
        let state = entry.lock().await;
        Ok(state.session.offset())
    }

    /// Record a part ciphertext+ETag produced out-of-band (e.g. via
    /// `encrypt_at_offset`) without running it back through the session.
    pub async fn record_out_of_order_part(&self, upload_id: &str, part_number: u32, etag: String) -> CoreResult<()> {
        let entry = self.entry(upload_id).await?;
        let mut state = entry.lock().await;
        state.parts.insert(part_number, etag);
        state.touch();
        Ok(())
    }

    /// Complete the upload: verify the client's part set against what the
    /// coordinator recorded, finalize the upstream object using the
    /// coordinator's own ETags, then attach envelope metadata.
    ///
    /// Since the narrow `UpstreamStore` trait's `CompleteMultipartUpload`
    /// doesn't accept metadata, this always takes the self-copy path: a
    /// `CopyObject` with `MetadataDirective::Replace` onto itself. A store
    /// whose native API attaches metadata on complete directly is an equally
    /// conforming implementation.
    pub async fn complete(
        &self,
        upload_id: &str,
        client_part_numbers: &[u32],
        cancel: &CancellationToken,
    ) -> CoreResult<String> {
        if cancel.is_cancelled() {
            return Err(CoreError::Cancelled);
        }
        let entry = self.entry(upload_id).await?;
        let mut state = entry.lock().await;

        let mut recorded: Vec<u32> = state.parts.keys().copied().collect();
        recorded.sort_unstable();
        let mut claimed = client_part_numbers.to_vec();
        claimed.sort_unstable();
        if recorded != claimed {
            return Err(CoreError::MissingPart);
        }

        let parts: Vec<(u32, String)> = state.parts.iter().map(|(n, etag)| (*n, etag.clone())).collect();
        self.upstream
            .complete_multipart_upload(&state.upstream_upload_id, parts)
            .await?;

        let metadata = state.blueprint_metadata(&self.metadata_prefix);
        let bucket = state.bucket.clone();
        let key = state.key.clone();
        self.upstream
            .copy_object(&bucket, &key, &key, metadata, MetadataDirective::Replace)
            .await?;

        let part_count = recorded.len();
        drop(state);
        self.uploads.write().await.remove(upload_id);
        self.record(AuditEvent::new(AuditAction::MultipartCompleted { part_count }).with_upload_id(upload_id));
        Ok(key)
    }

    /// Best-effort upstream abort, unconditional state deletion. Must
    /// succeed even if the upstream abort call itself failed.
    pub async fn abort(&self, upload_id: &str) -> CoreResult<()> {
        if let Some(entry) = self.uploads.read().await.get(upload_id).cloned() {
            let state = entry.lock().await;
            let _ = self.upstream.abort_multipart_upload(&state.upstream_upload_id).await;
        }
        self.uploads.write().await.remove(upload_id);
        self.record(AuditEvent::new(AuditAction::MultipartAborted).with_upload_id(upload_id));
        Ok(())
    }

    /// Abort uploads whose `last_activity_at` exceeds the configured
    /// inactivity deadline. Callers invoke this on a timer; the coordinator
    /// does not spawn its own background task.
    pub async fn sweep_expired(&self) -> Vec<String> {
        let expired: Vec<String> = {
            let uploads = self.uploads.read().await;
            let mut expired = Vec::new();
            for (id, entry) in uploads.iter() {
                if entry.lock().await.is_expired(self.inactivity_deadline) {
                    expired.push(id.clone());
                }
            }
            expired
        };
        for id in &expired {
            self.record(
                AuditEvent::new(AuditAction::MultipartSwept {
                    reason: "inactivity deadline exceeded",
                })
                .with_upload_id(id),
            );
            let _ = self.abort(id).await;
        }
        expired
    }

    pub async fn active_upload_count(&self) -> usize {
        self.uploads.read().await.len()
    }
}
