//! Concrete end-to-end scenarios with literal values.

use std::sync::Arc;

use base64::Engine as _;
use sha2::{Digest, Sha256};

use s3ep_core::cancel::CancellationToken;
use s3ep_core::config::GatewayConfig;
use s3ep_core::dek::{encrypt_at_offset, CtrDataEncryptor, GcmDataEncryptor, StreamingCtrSession, CTR_IV_LEN};
use s3ep_core::envelope::{decrypt_bytes, EnvelopeEngine};
use s3ep_core::error::CoreError;
use s3ep_core::kek::{AesKek, KeyEncryptor, RsaKek};
use s3ep_core::mode::{select_mode, Mode};
use s3ep_core::registry::Registry;
use s3ep_core::secret::generate_dek;

fn live() -> CancellationToken {
    CancellationToken::new()
}

fn cfg() -> GatewayConfig {
    GatewayConfig::default()
}

#[test]
fn single_part_gcm_roundtrip_produces_expected_envelope_fields() {
    let key_material: [u8; 32] = std::array::from_fn(|i| i as u8);
    let kek = AesKek::new(&key_material).unwrap();
    let data_encryptor = GcmDataEncryptor::new();
    let engine = EnvelopeEngine::new(&kek, &data_encryptor);

    let result = engine.encrypt_bytes(b"Hello, World!", b"obj-key", &live()).unwrap();

    assert_eq!(result.envelope.get_field("s3ep-", "dek-algorithm"), Some("aes-256-gcm"));
    assert_eq!(result.envelope.get_field("s3ep-", "kek-algorithm"), Some("aes"));

    let wrapped_b64 = result.envelope.get_field("s3ep-", "encrypted-dek").unwrap();
    assert!(!wrapped_b64.is_empty());

    let expected_fingerprint = hex::encode(Sha256::digest(key_material));
    assert_eq!(
        result.envelope.get_field("s3ep-", "kek-fingerprint"),
        Some(expected_fingerprint.as_str())
    );

    let iv_b64 = result.envelope.get_field("s3ep-", "aes-iv").unwrap();
    assert_eq!(iv_b64.len(), 16);
    let iv = base64::engine::general_purpose::STANDARD.decode(iv_b64).unwrap();
    assert_eq!(iv.len(), 12);

    let plain = decrypt_bytes(
        &kek,
        &result.envelope,
        &result.ciphertext,
        b"obj-key",
        "s3ep-",
        &live(),
        &cfg(),
        None,
    )
    .unwrap();
    assert_eq!(plain, b"Hello, World!");
}

#[test]
fn single_part_object_at_the_streaming_threshold_selects_ctr() {
    const THRESHOLD: u64 = 50 * 1024 * 1024;
    const CONTENT_LENGTH: usize = 52_428_800;

    let mode = select_mode("application/octet-stream", CONTENT_LENGTH as i64, false, THRESHOLD);
    assert_eq!(mode, Mode::Ctr);

    let kek = AesKek::new(&[0x55u8; 32]).unwrap();
    let data_encryptor = CtrDataEncryptor::new();
    let engine = EnvelopeEngine::new(&kek, &data_encryptor);

    let plaintext = vec![0x41u8; CONTENT_LENGTH];
    let result = engine.encrypt_bytes(&plaintext, b"", &live()).unwrap();

    assert_eq!(result.envelope.get_field("s3ep-", "dek-algorithm"), Some("aes-256-ctr"));
    let iv_b64 = result.envelope.get_field("s3ep-", "aes-iv").unwrap();
    assert_eq!(iv_b64.len(), 24);
    let iv = base64::engine::general_purpose::STANDARD.decode(iv_b64).unwrap();
    assert_eq!(iv.len(), 16);

    assert_eq!(result.ciphertext.len(), plaintext.len());
}

#[test]
fn forced_gcm_content_type_beats_the_multipart_heuristic() {
    let mode = select_mode("application/x-s3ep-force-aes-gcm", 0, true, 50 * 1024 * 1024);
    assert_eq!(mode, Mode::Gcm);
}

#[test]
fn splitting_a_large_upload_into_parts_reproduces_single_part_ciphertext() {
    const TOTAL: usize = 12 * 1024 * 1024;
    let mut plaintext = vec![0u8; TOTAL];
    for (i, byte) in plaintext.iter_mut().enumerate() {
        // Deterministic pseudo-random fill (cryptographic randomness isn't
        // needed for a byte-equality check).
        *byte = ((i.wrapping_mul(2654435761)) >> 13) as u8;
    }

    let dek = generate_dek();
    let iv = [0xAAu8; CTR_IV_LEN];

    // Upload A: single part.
    let upload_a = encrypt_at_offset(&dek, &iv, &plaintext, 0).unwrap();

    // Upload B: four parts of sizes (1, 5, 5, 1) MiB.
    let mib = 1024 * 1024;
    let (p1, rest) = plaintext.split_at(mib);
    let (p2, rest) = rest.split_at(5 * mib);
    let (p3, p4) = rest.split_at(5 * mib);
    assert_eq!(p4.len(), mib);

    let mut session = StreamingCtrSession::new(dek, iv);
    let mut upload_b = Vec::with_capacity(TOTAL);
    upload_b.extend(session.encrypt_part(p1).unwrap());
    upload_b.extend(session.encrypt_part(p2).unwrap());
    upload_b.extend(session.encrypt_part(p3).unwrap());
    upload_b.extend(session.encrypt_part(p4).unwrap());

    assert_eq!(upload_a, upload_b);
}

#[test]
fn hmac_tamper_fails_before_returning_plaintext() {
    let kek = AesKek::new(&[0x77u8; 32]).unwrap();
    let data_encryptor = GcmDataEncryptor::new();
    let engine = EnvelopeEngine::new(&kek, &data_encryptor);

    let mut result = engine.encrypt_with_hmac(b"secret payload", b"", &live()).unwrap();
    assert!(result.envelope.get_field("s3ep-", "hmac").is_some());

    result.ciphertext[5] ^= 0xFF;

    let err = decrypt_bytes(&kek, &result.envelope, &result.ciphertext, b"", "s3ep-", &live(), &cfg(), None)
        .unwrap_err();
    assert_eq!(err, CoreError::IntegrityFailure);
}

#[tokio::test]
async fn rsa_mismatch_is_unknown_key_not_key_mismatch() {
    let mut rng = rand::thread_rng();
    let k1 = RsaKek::from_private_key(rsa::RsaPrivateKey::new(&mut rng, 2048).unwrap()).unwrap();
    let k2 = RsaKek::from_private_key(rsa::RsaPrivateKey::new(&mut rng, 2048).unwrap()).unwrap();

    let data_encryptor = GcmDataEncryptor::new();
    let engine = EnvelopeEngine::new(&k1, &data_encryptor);
    let result = engine.encrypt_bytes(b"payload", b"", &live()).unwrap();
    let fingerprint = result.envelope.get_field("s3ep-", "kek-fingerprint").unwrap().to_string();

    let registry = Registry::new();
    registry.register(Arc::new(k2)).await;

    let err = registry.resolve(&fingerprint).await.unwrap_err();
    assert_eq!(err, CoreError::UnknownKey);
}
