//! Gateway-facing configuration: metadata prefix, streaming threshold,
//! multipart inactivity deadline, and the HMAC policy-warning flag.
//!
//! Builder shape follows this crate's usual policy construction style:
//! explicit defaults, a `build()` that can't fail because every field has
//! a sane fallback.

use std::time::Duration;

use crate::envelope::DEFAULT_PREFIX;

/// Default streaming threshold: 50 MiB.
pub const DEFAULT_STREAMING_THRESHOLD: u64 = 50 * 1024 * 1024;

/// Default multipart inactivity deadline: 24 hours.
pub const DEFAULT_INACTIVITY_DEADLINE: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Prefix every envelope metadata key carries, default `s3ep-`.
    pub metadata_prefix: String,
    /// Content length at/above which ModeSelector picks CTR for single-part writes.
    pub streaming_threshold: u64,
    /// How long a multipart upload may sit with no part activity before
    /// `MultipartCoordinator::sweep_expired` aborts it.
    pub multipart_inactivity_deadline: Duration,
    /// Whether decrypt should surface a policy warning when a stored
    /// envelope omits `hmac` entirely.
    pub warn_on_missing_hmac: bool,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            metadata_prefix: DEFAULT_PREFIX.to_string(),
            streaming_threshold: DEFAULT_STREAMING_THRESHOLD,
            multipart_inactivity_deadline: DEFAULT_INACTIVITY_DEADLINE,
            warn_on_missing_hmac: false,
        }
    }
}

pub struct GatewayConfigBuilder {
    config: GatewayConfig,
}

impl GatewayConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: GatewayConfig::default(),
        }
    }

    pub fn metadata_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.metadata_prefix = prefix.into();
        self
    }

    pub fn streaming_threshold(mut self, threshold: u64) -> Self {
        self.config.streaming_threshold = threshold;
        self
    }

    pub fn multipart_inactivity_deadline(mut self, deadline: Duration) -> Self {
        self.config.multipart_inactivity_deadline = deadline;
        self
    }

    pub fn warn_on_missing_hmac(mut self, warn: bool) -> Self {
        self.config.warn_on_missing_hmac = warn;
        self
    }

    pub fn build(self) -> GatewayConfig {
        self.config
    }
}

impl Default for GatewayConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = GatewayConfig::default();
        assert_eq!(config.metadata_prefix, "s3ep-");
        assert_eq!(config.streaming_threshold, 50 * 1024 * 1024);
        assert_eq!(config.multipart_inactivity_deadline, Duration::from_secs(86_400));
    }

    #[test]
    fn builder_overrides_apply() {
        let config = GatewayConfigBuilder::new()
            .metadata_prefix("x-enc-")
            .streaming_threshold(1024)
            .build();
        assert_eq!(config.metadata_prefix, "x-enc-");
        assert_eq!(config.streaming_threshold, 1024);
    }
}
