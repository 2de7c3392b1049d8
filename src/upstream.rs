//! Narrow upstream object-store surface consumed by the core.
//!
//! Native `async fn` in traits isn't stable across this crate's supported
//! compiler range, so `UpstreamStore` uses a boxed-future trait rather than
//! pulling in `async-trait`: each method returns a
//! `Pin<Box<dyn Future<...> + Send>>` built from an `async move` block at
//! the call site.

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;

use crate::error::CoreResult;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

#[derive(Debug, Clone, Default)]
pub struct ObjectMetadata(pub BTreeMap<String, String>);

#[derive(Debug, Clone)]
pub struct GetObjectResult {
    pub body: Vec<u8>,
    pub metadata: ObjectMetadata,
    pub content_length: u64,
}

#[derive(Debug, Clone, Copy)]
pub enum MetadataDirective {
    Copy,
    Replace,
}

/// The only operations the core needs from the upstream object store; every
/// other surface (listing, ACLs, tagging) is a pass-through outside scope.
pub trait UpstreamStore: Send + Sync {
    fn put_object<'a>(
        &'a self,
        bucket: &'a str,
        key: &'a str,
        body: Vec<u8>,
        metadata: ObjectMetadata,
        content_length: u64,
    ) -> BoxFuture<'a, CoreResult<()>>;

    fn get_object<'a>(&'a self, bucket: &'a str, key: &'a str) -> BoxFuture<'a, CoreResult<GetObjectResult>>;

    fn copy_object<'a>(
        &'a self,
        bucket: &'a str,
        key: &'a str,
        source: &'a str,
        metadata: ObjectMetadata,
        metadata_directive: MetadataDirective,
    ) -> BoxFuture<'a, CoreResult<()>>;

    fn create_multipart_upload<'a>(
        &'a self,
        bucket: &'a str,
        key: &'a str,
        metadata: ObjectMetadata,
    ) -> BoxFuture<'a, CoreResult<String>>;

    fn upload_part<'a>(
        &'a self,
        upload_id: &'a str,
        part_number: u32,
        body: Vec<u8>,
        content_length: u64,
    ) -> BoxFuture<'a, CoreResult<String>>;

    fn complete_multipart_upload<'a>(
        &'a self,
        upload_id: &'a str,
        parts: Vec<(u32, String)>,
    ) -> BoxFuture<'a, CoreResult<String>>;

    fn abort_multipart_upload<'a>(&'a self, upload_id: &'a str) -> BoxFuture<'a, CoreResult<()>>;
}

/// Strip any metadata entry beginning with `prefix`, or equal to a legacy
/// envelope name, before returning object metadata to a client.
pub fn filter_response_metadata(prefix: &str, metadata: &ObjectMetadata) -> ObjectMetadata {
    let filtered = metadata
        .0
        .iter()
        .filter(|(k, _)| !crate::envelope::Envelope::is_envelope_key(prefix, k))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    ObjectMetadata(filtered)
}

/// In-memory test double for `MultipartCoordinator`/`EnvelopeEngine`
/// round-trip tests.
#[cfg(any(test, feature = "test-util"))]
pub mod testutil {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct Object {
        body: Vec<u8>,
        metadata: ObjectMetadata,
    }

    #[derive(Default)]
    struct PendingUpload {
        parts: HashMap<u32, Vec<u8>>,
        metadata: ObjectMetadata,
        bucket: String,
        key: String,
    }

    /// An in-memory stand-in upstream store. Single bucket namespace is
    /// flattened into `(bucket, key)` tuple keys for simplicity.
    pub struct InMemoryUpstreamStore {
        objects: Mutex<HashMap<(String, String), Object>>,
        uploads: Mutex<HashMap<String, PendingUpload>>,
        next_upload_id: AtomicU64,
        next_etag: AtomicU64,
    }

    impl InMemoryUpstreamStore {
        pub fn new() -> Self {
            Self {
                objects: Mutex::new(HashMap::new()),
                uploads: Mutex::new(HashMap::new()),
                next_upload_id: AtomicU64::new(1),
                next_etag: AtomicU64::new(1),
            }
        }

        fn fresh_etag(&self) -> String {
            format!("etag-{}", self.next_etag.fetch_add(1, Ordering::SeqCst))
        }
    }

    impl Default for InMemoryUpstreamStore {
        fn default() -> Self {
            Self::new()
        }
    }

    impl UpstreamStore for InMemoryUpstreamStore {
        fn put_object<'a>(
            &'a self,
            bucket: &'a str,
            key: &'a str,
            body: Vec<u8>,
            metadata: ObjectMetadata,
            _content_length: u64,
        ) -> BoxFuture<'a, CoreResult<()>> {
            Box::pin(async move {
                self.objects
                    .lock()
                    .unwrap()
                    .insert((bucket.to_string(), key.to_string()), Object { body, metadata });
                Ok(())
            })
        }

        fn get_object<'a>(&'a self, bucket: &'a str, key: &'a str) -> BoxFuture<'a, CoreResult<GetObjectResult>> {
            Box::pin(async move {
                let objects = self.objects.lock().unwrap();
                let object = objects
                    .get(&(bucket.to_string(), key.to_string()))
                    .ok_or_else(|| {
                        crate::error::UpstreamErrorDetail::new("GetObject", bucket, key, "not found".to_string())
                    })?;
                Ok(GetObjectResult {
                    body: object.body.clone(),
                    metadata: object.metadata.clone(),
                    content_length: object.body.len() as u64,
                })
            })
        }

        fn copy_object<'a>(
            &'a self,
            bucket: &'a str,
            key: &'a str,
            source: &'a str,
            metadata: ObjectMetadata,
            metadata_directive: MetadataDirective,
        ) -> BoxFuture<'a, CoreResult<()>> {
            Box::pin(async move {
                let mut objects = self.objects.lock().unwrap();
                let source_object = objects
                    .get(&(bucket.to_string(), source.to_string()))
                    .ok_or_else(|| {
                        crate::error::UpstreamErrorDetail::new("CopyObject", bucket, source, "not found".to_string())
                    })?;
                let body = source_object.body.clone();
                let final_metadata = match metadata_directive {
                    MetadataDirective::Replace => metadata,
                    MetadataDirective::Copy => source_object.metadata.clone(),
                };
                objects.insert(
                    (bucket.to_string(), key.to_string()),
                    Object {
                        body,
                        metadata: final_metadata,
                    },
                );
                Ok(())
            })
        }

        fn create_multipart_upload<'a>(
            &'a self,
            bucket: &'a str,
            key: &'a str,
            metadata: ObjectMetadata,
        ) -> BoxFuture<'a, CoreResult<String>> {
            Box::pin(async move {
                let upload_id = format!("upload-{}", self.next_upload_id.fetch_add(1, Ordering::SeqCst));
                self.uploads.lock().unwrap().insert(
                    upload_id.clone(),
                    PendingUpload {
                        parts: HashMap::new(),
                        metadata,
                        bucket: bucket.to_string(),
                        key: key.to_string(),
                    },
                );
                Ok(upload_id)
            })
        }

        fn upload_part<'a>(
            &'a self,
            upload_id: &'a str,
            part_number: u32,
            body: Vec<u8>,
            _content_length: u64,
        ) -> BoxFuture<'a, CoreResult<String>> {
            Box::pin(async move {
                let mut uploads = self.uploads.lock().unwrap();
                let upload = uploads.get_mut(upload_id).ok_or_else(|| {
                    crate::error::UpstreamErrorDetail::new("UploadPart", "", "", "unknown upload".to_string())
                })?;
                upload.parts.insert(part_number, body);
                Ok(self.fresh_etag())
            })
        }

        fn complete_multipart_upload<'a>(
            &'a self,
            upload_id: &'a str,
            parts: Vec<(u32, String)>,
        ) -> BoxFuture<'a, CoreResult<String>> {
            Box::pin(async move {
                let mut uploads = self.uploads.lock().unwrap();
                let upload = uploads.remove(upload_id).ok_or_else(|| {
                    crate::error::UpstreamErrorDetail::new(
                        "CompleteMultipartUpload",
                        "",
                        "",
                        "unknown upload".to_string(),
                    )
                })?;
                let mut body = Vec::new();
                for (part_number, _etag) in &parts {
                    let chunk = upload.parts.get(part_number).ok_or_else(|| {
                        crate::error::UpstreamErrorDetail::new(
                            "CompleteMultipartUpload",
                            &upload.bucket,
                            &upload.key,
                            "missing part".to_string(),
                        )
                    })?;
                    body.extend_from_slice(chunk);
                }
                let etag = self.fresh_etag();
                self.objects.lock().unwrap().insert(
                    (upload.bucket, upload.key),
                    Object {
                        body,
                        metadata: upload.metadata,
                    },
                );
                Ok(etag)
            })
        }

        fn abort_multipart_upload<'a>(&'a self, upload_id: &'a str) -> BoxFuture<'a, CoreResult<()>> {
            Box::pin(async move {
                self.uploads.lock().unwrap().remove(upload_id);
                Ok(())
            })
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[tokio::test]
        async fn put_then_get_round_trips_body_and_metadata() {
            let store = InMemoryUpstreamStore::new();
            let mut metadata = BTreeMap::new();
            metadata.insert("s3ep-dek-algorithm".to_string(), "aes-256-gcm".to_string());
            store
                .put_object("b", "k", b"hello".to_vec(), ObjectMetadata(metadata), 5)
                .await
                .unwrap();
            let got = store.get_object("b", "k").await.unwrap();
            assert_eq!(got.body, b"hello");
            assert_eq!(got.content_length, 5);
        }

        #[tokio::test]
        async fn multipart_lifecycle_assembles_parts_in_order() {
            let store = InMemoryUpstreamStore::new();
            let upload_id = store
                .create_multipart_upload("b", "k", ObjectMetadata::default())
                .await
                .unwrap();
            let etag1 = store.upload_part(&upload_id, 1, b"AAAA".to_vec(), 4).await.unwrap();
            let etag2 = store.upload_part(&upload_id, 2, b"BBBB".to_vec(), 4).await.unwrap();
            store
                .complete_multipart_upload(&upload_id, vec![(1, etag1), (2, etag2)])
                .await
                .unwrap();
            let got = store.get_object("b", "k").await.unwrap();
            assert_eq!(got.body, b"AAAABBBB");
        }

        #[tokio::test]
        async fn abort_discards_uncommitted_parts() {
            let store = InMemoryUpstreamStore::new();
            let upload_id = store
                .create_multipart_upload("b", "k", ObjectMetadata::default())
                .await
                .unwrap();
            store.upload_part(&upload_id, 1, b"data".to_vec(), 4).await.unwrap();
            store.abort_multipart_upload(&upload_id).await.unwrap();
            assert!(store.get_object("b", "k").await.is_err());
        }
    }
}
