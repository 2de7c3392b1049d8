//! # s3ep-core
//!
//! Cryptographic core for a transparent storage-gateway: envelope
//! encryption (KEK + DEK), a metadata-driven decryption dispatcher, a
//! multipart-upload orchestrator, and mode selection between authenticated
//! whole-object (AES-256-GCM) and seekable streaming (AES-256-CTR) data
//! encryption.
//!
//! ## Quick start
//!
//! ```rust
//! use s3ep_core::kek::{AesKek, KeyEncryptor};
//! use s3ep_core::dek::GcmDataEncryptor;
//! use s3ep_core::envelope::{decrypt_bytes, EnvelopeEngine};
//! use s3ep_core::cancel::CancellationToken;
//! use s3ep_core::config::GatewayConfig;
//!
//! let kek = AesKek::new(&[0u8; 32]).unwrap();
//! let data_encryptor = GcmDataEncryptor::new();
//! let engine = EnvelopeEngine::new(&kek, &data_encryptor);
//! let cancel = CancellationToken::new();
//! let config = GatewayConfig::default();
//!
//! let result = engine.encrypt_bytes(b"hello", b"obj-key", &cancel).unwrap();
//! let plaintext = decrypt_bytes(&kek, &result.envelope, &result.ciphertext, b"obj-key", "s3ep-", &cancel, &config, None).unwrap();
//! assert_eq!(plaintext, b"hello");
//! ```
//!
//! ## What's NOT provided
//!
//! Wire-protocol parsing/dispatch, upstream client transport, credential
//! handling, CLI key-generation helpers, configuration loading, and logging
//! transport are external collaborators; this crate specifies only the
//! narrow interfaces they're consumed through ([`upstream::UpstreamStore`]).
//! Re-encrypting existing ciphertext under new keys, decrypting objects
//! whose metadata references an unregistered KEK fingerprint, encrypted
//! listings/ACLs/tagging, and random-access ranged reads of whole-object
//! authenticated ciphertext are all out of scope.

#![deny(unsafe_code)]
#![doc(html_root_url = "https://docs.rs/s3ep-core/0.1.0")]

pub mod audit;
pub mod cancel;
pub mod config;
pub mod dek;
pub mod envelope;
pub mod error;
pub mod integrity;
pub mod kek;
pub mod mode;
pub mod multipart;
pub mod registry;
pub mod secret;
pub mod upstream;

pub use error::{CoreError, CoreResult};
